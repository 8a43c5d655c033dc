//! CSV trade log
//!
//! Append-only trade records in mode-qualified, daily-rotated files
//! (`trades_<mode>_<date>.csv`). The runtime's obligation is one append per
//! fill observed on a fills subscription; storage stays out of the core
//! state model.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const HEADER: &str = "timestamp,asset,market_id,side,price,size,order_id,status,mode";

/// One trade-log row
#[derive(Debug, Clone)]
pub struct TradeRecord {
    pub timestamp: DateTime<Utc>,
    pub asset: String,
    pub market_id: String,
    pub side: String,
    pub price: Decimal,
    pub size: Decimal,
    pub order_id: String,
    pub status: String,
}

/// Appends trade rows to `trades_<mode>_<YYYY-MM-DD>.csv`, rotating daily
pub struct TradeLog {
    dir: PathBuf,
    mode: String,
    current: Option<(NaiveDate, File)>,
}

impl TradeLog {
    /// Create a log writing under `dir` with the given mode qualifier
    pub fn new(dir: impl Into<PathBuf>, mode: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            mode: mode.into(),
            current: None,
        }
    }

    /// File path for a given date
    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir
            .join(format!("trades_{}_{}.csv", self.mode, date.format("%Y-%m-%d")))
    }

    fn file_for(&mut self, date: NaiveDate) -> anyhow::Result<&mut File> {
        let rotate = match &self.current {
            Some((current_date, _)) => *current_date != date,
            None => true,
        };

        if rotate {
            std::fs::create_dir_all(&self.dir)?;
            let path = self.path_for(date);
            let new_file = !path.exists();
            let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
            if new_file {
                writeln!(file, "{HEADER}")?;
            }
            tracing::debug!(path = %path.display(), "trade log file opened");
            self.current = Some((date, file));
        }

        match &mut self.current {
            Some((_, file)) => Ok(file),
            None => anyhow::bail!("trade log file unavailable"),
        }
    }

    /// Append one record, flushing immediately
    pub fn append(&mut self, record: &TradeRecord) -> anyhow::Result<()> {
        let date = record.timestamp.date_naive();
        let mode = self.mode.clone();
        let file = self.file_for(date)?;
        writeln!(
            file,
            "{},{},{},{},{},{},{},{},{}",
            record.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            escape(&record.asset),
            escape(&record.market_id),
            escape(&record.side),
            record.price,
            record.size,
            escape(&record.order_id),
            escape(&record.status),
            mode,
        )?;
        file.flush()?;
        Ok(())
    }

    /// Directory the log writes into
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn record(secs: i64) -> TradeRecord {
        TradeRecord {
            timestamp: Utc.timestamp_opt(secs, 0).single().unwrap(),
            asset: "BTC".to_string(),
            market_id: "0xabc".to_string(),
            side: "BUY".to_string(),
            price: dec!(0.55),
            size: dec!(10),
            order_id: "ord-1".to_string(),
            status: "filled".to_string(),
        }
    }

    #[test]
    fn test_append_writes_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = TradeLog::new(dir.path(), "dry-run");

        log.append(&record(1_700_000_000)).unwrap();
        log.append(&record(1_700_000_060)).unwrap();

        let date = Utc
            .timestamp_opt(1_700_000_000, 0)
            .single()
            .unwrap()
            .date_naive();
        let content = std::fs::read_to_string(log.path_for(date)).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], HEADER);
        assert!(lines[1].starts_with("2023-11-14"));
        assert!(lines[1].ends_with(",dry-run"));
        assert!(lines[1].contains(",BTC,0xabc,BUY,0.55,10,ord-1,filled,"));
    }

    #[test]
    fn test_filename_is_mode_qualified() {
        let dir = tempfile::tempdir().unwrap();
        let log = TradeLog::new(dir.path(), "live");
        let date = NaiveDate::from_ymd_opt(2026, 1, 6).unwrap();
        assert!(log
            .path_for(date)
            .ends_with("trades_live_2026-01-06.csv"));
    }

    #[test]
    fn test_rotation_across_days() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = TradeLog::new(dir.path(), "dry-run");

        // 1_700_000_000 is 2023-11-14; add a day
        log.append(&record(1_700_000_000)).unwrap();
        log.append(&record(1_700_000_000 + 86_400)).unwrap();

        let first = NaiveDate::from_ymd_opt(2023, 11, 14).unwrap();
        let second = NaiveDate::from_ymd_opt(2023, 11, 15).unwrap();
        assert!(log.path_for(first).exists());
        assert!(log.path_for(second).exists());
    }

    #[test]
    fn test_escape_quotes_commas() {
        assert_eq!(escape("plain"), "plain");
        assert_eq!(escape("a,b"), "\"a,b\"");
        assert_eq!(escape("say \"hi\""), "\"say \"\"hi\"\"\"");
    }
}
