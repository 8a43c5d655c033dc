//! Request signing shared by venue adapters
//!
//! HMAC-SHA256 signatures over `timestamp + method + path + body`, base64
//! encoded. WebSocket auth uses the venue's newline-separated form.

use super::types::ExchangeError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

fn sign(secret_b64: &str, message: &str) -> Result<String, ExchangeError> {
    let key = BASE64
        .decode(secret_b64)
        .map_err(|e| ExchangeError::Credentials(format!("secret is not valid base64: {e}")))?;
    let mut mac = HmacSha256::new_from_slice(&key)
        .map_err(|e| ExchangeError::Credentials(e.to_string()))?;
    mac.update(message.as_bytes());
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

/// Signature for a REST request
pub(crate) fn rest_signature(
    secret_b64: &str,
    timestamp: i64,
    method: &str,
    path: &str,
    body: &str,
) -> Result<String, ExchangeError> {
    let message = format!("{timestamp}{}{path}{body}", method.to_uppercase());
    sign(secret_b64, &message)
}

/// Signature for WebSocket auth: `GET\n<timestamp>\n<path>`
pub(crate) fn ws_signature(
    secret_b64: &str,
    timestamp: i64,
    path: &str,
) -> Result<String, ExchangeError> {
    sign(secret_b64, &format!("GET\n{timestamp}\n{path}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rest_signature_is_valid_base64() {
        let secret = BASE64.encode(b"test_secret_key_12345");
        let sig = rest_signature(&secret, 1_234_567_890, "get", "/portfolio/orders", "").unwrap();
        assert!(BASE64.decode(&sig).is_ok());
    }

    #[test]
    fn test_signature_is_deterministic() {
        let secret = BASE64.encode(b"test_secret_key_12345");
        let a = rest_signature(&secret, 1_234_567_890, "POST", "/order", "{}").unwrap();
        let b = rest_signature(&secret, 1_234_567_890, "POST", "/order", "{}").unwrap();
        assert_eq!(a, b);

        let c = rest_signature(&secret, 1_234_567_891, "POST", "/order", "{}").unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_ws_signature_differs_from_rest() {
        let secret = BASE64.encode(b"test_secret_key_12345");
        let rest = rest_signature(&secret, 1_234_567_890, "GET", "/ws/user", "").unwrap();
        let ws = ws_signature(&secret, 1_234_567_890, "/ws/user").unwrap();
        assert_ne!(rest, ws);
    }

    #[test]
    fn test_invalid_secret_rejected() {
        let result = rest_signature("not-base64!!!", 0, "GET", "/", "");
        assert!(matches!(result, Err(ExchangeError::Credentials(_))));
    }
}
