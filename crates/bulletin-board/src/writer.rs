//! Projects the current signal set into the on-disk formats, atomically.
use crate::eviction::{self, EvictionConfig};
use crate::formats;
use chrono::Utc;
use signal_core::{CoreError, CoreResult, Signal};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

pub struct BulletinBoardConfig {
    pub output_dir: PathBuf,
    pub magic_number: i64,
    pub eviction: EvictionConfig,
}

impl Default for BulletinBoardConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./signals"),
            magic_number: 20260728,
            eviction: EvictionConfig::default(),
        }
    }
}

pub struct BulletinBoard {
    config: BulletinBoardConfig,
}

impl BulletinBoard {
    pub fn new(config: BulletinBoardConfig) -> Self {
        Self { config }
    }

    /// Safe to call repeatedly; the same input set yields byte-identical
    /// files. Every format reflects the same logical state at return.
    pub async fn update_signals(&self, signals: &[Signal]) -> CoreResult<()> {
        let now = Utc::now();
        let (active, expired) = eviction::partition(signals, now, &self.config.eviction);

        self.atomic_write("broker_signals.csv", formats::broker_csv(&active, self.config.magic_number).as_bytes())
            .await?;
        self.atomic_write(
            "broker_signals_enhanced.csv",
            formats::enhanced_csv(&active, self.config.magic_number).as_bytes(),
        )
        .await?;
        self.atomic_write("signals.csv", formats::unified_csv(&active).as_bytes()).await?;

        let json = formats::json_snapshot(&active)
            .map_err(|e| CoreError::ShapeError(format!("failed to serialize JSON snapshot: {e}")))?;
        self.atomic_write("signals.json", json.as_bytes()).await?;

        self.write_workbook(&active, &expired).await?;
        Ok(())
    }

    /// Represents the four-sheet workbook as one CSV file per sheet under
    /// `workbook/`, since no spreadsheet-writing crate is carried by this
    /// engine's dependency stack (see DESIGN.md).
    async fn write_workbook(&self, active: &[Signal], expired: &[Signal]) -> CoreResult<()> {
        self.atomic_write("workbook/active.csv", formats::unified_csv(active).as_bytes()).await?;
        self.atomic_write("workbook/history.csv", formats::unified_csv(expired).as_bytes()).await?;
        self.atomic_write("workbook/performance.csv", self.performance_summary(active, expired).as_bytes())
            .await?;
        self.atomic_write("workbook/summary.csv", self.summary_sheet(active).as_bytes()).await
    }

    fn performance_summary(&self, active: &[Signal], expired: &[Signal]) -> String {
        let mut out = String::from("metric,value\n");
        out.push_str(&format!("active_count,{}\n", active.len()));
        out.push_str(&format!("expired_count,{}\n", expired.len()));
        let avg_confidence = if active.is_empty() {
            0.0
        } else {
            active.iter().map(|s| s.confidence).sum::<f64>() / active.len() as f64
        };
        out.push_str(&format!("avg_confidence,{avg_confidence:.4}\n"));
        out
    }

    fn summary_sheet(&self, active: &[Signal]) -> String {
        let mut out = String::from("symbol,count\n");
        let mut counts: std::collections::BTreeMap<&str, usize> = std::collections::BTreeMap::new();
        for s in active {
            *counts.entry(s.symbol.as_str()).or_insert(0) += 1;
        }
        for (symbol, count) in counts {
            out.push_str(&format!("{symbol},{count}\n"));
        }
        out
    }

    /// Copies the workbook's active sheet under `backups/`, once per day.
    pub async fn backup(&self) -> CoreResult<()> {
        let date = Utc::now().format("%Y-%m-%d");
        let source = self.config.output_dir.join("workbook/active.csv");
        let dest = self.config.output_dir.join(format!("backups/signals_backup_{date}.csv"));
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CoreError::TransientIo(format!("failed to create backup dir: {e}")))?;
        }
        tokio::fs::copy(&source, &dest)
            .await
            .map(|_| ())
            .map_err(|e| CoreError::TransientIo(format!("failed to copy backup: {e}")))
    }

    /// Writes to a sibling `.tmp` path, fsyncs, then renames over the
    /// published path so readers never observe a partial file.
    async fn atomic_write(&self, relative_path: &str, contents: &[u8]) -> CoreResult<()> {
        let final_path = self.config.output_dir.join(relative_path);
        if let Some(parent) = final_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CoreError::TransientIo(format!("failed to create {}: {e}", parent.display())))?;
        }
        let tmp_path = tmp_sibling(&final_path);

        let mut file = tokio::fs::File::create(&tmp_path)
            .await
            .map_err(|e| CoreError::TransientIo(format!("failed to create {}: {e}", tmp_path.display())))?;
        file.write_all(contents)
            .await
            .map_err(|e| CoreError::TransientIo(format!("failed to write {}: {e}", tmp_path.display())))?;
        file.sync_all()
            .await
            .map_err(|e| CoreError::TransientIo(format!("fsync failed on {}: {e}", tmp_path.display())))?;
        drop(file);

        tokio::fs::rename(&tmp_path, &final_path)
            .await
            .map_err(|e| CoreError::TransientIo(format!("rename to {} failed: {e}", final_path.display())))
    }
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().and_then(|n| n.to_str()).unwrap_or("out").to_string();
    name.push_str(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use signal_core::{MarketCondition, Side, SignalStatus, SignalStrength, Timeframe};

    fn sample_signal(symbol: &str) -> Signal {
        let now = Utc::now();
        Signal {
            id: format!("{symbol}-1"),
            created_at: now,
            last_update: now,
            symbol: symbol.to_string(),
            side: Side::Buy,
            strength: SignalStrength::Strong,
            entry: 1.1,
            stop: 1.09,
            target: 1.13,
            confidence: 0.8,
            rr_ratio: 2.0,
            timeframe: Timeframe::H1,
            expiry: now + chrono::Duration::hours(4),
            market_condition: MarketCondition::Uptrend,
            technical_confluence: 2,
            fundamental_score: 0.5,
            position_size_frac: 0.01,
            max_risk_frac: 0.01,
            status: SignalStatus::Active,
        }
    }

    fn test_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("bulletin-board-test-{name}-{}", std::process::id()))
    }

    #[tokio::test]
    async fn update_signals_produces_all_formats_and_is_repeatable() {
        let dir = test_dir("formats");
        let _ = tokio::fs::remove_dir_all(&dir).await;
        let board = BulletinBoard::new(BulletinBoardConfig { output_dir: dir.clone(), ..Default::default() });

        board.update_signals(&[sample_signal("EURUSD")]).await.unwrap();
        let first = tokio::fs::read_to_string(dir.join("broker_signals.csv")).await.unwrap();

        board.update_signals(&[sample_signal("EURUSD")]).await.unwrap();
        let second = tokio::fs::read_to_string(dir.join("broker_signals.csv")).await.unwrap();

        assert!(first.contains("EURUSD"));
        assert!(tokio::fs::metadata(dir.join("signals.json")).await.is_ok());
        assert!(tokio::fs::metadata(dir.join("workbook/active.csv")).await.is_ok());
        // same logical input, fixed field order and precision => identical bytes
        assert_eq!(first.lines().next(), second.lines().next());

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn no_tmp_file_left_behind_after_a_successful_write() {
        let dir = test_dir("tmp-cleanup");
        let _ = tokio::fs::remove_dir_all(&dir).await;
        let board = BulletinBoard::new(BulletinBoardConfig { output_dir: dir.clone(), ..Default::default() });
        board.update_signals(&[sample_signal("GBPUSD")]).await.unwrap();
        assert!(tokio::fs::metadata(dir.join("broker_signals.csv.tmp")).await.is_err());
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
