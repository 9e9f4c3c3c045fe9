//! Adapter contract for live and historical market data. Concrete broker
//! connectors are explicitly out of scope for this engine — only this
//! interface shape is core-owned; implementations are supplied externally.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use signal_core::{Bar, CoreResult, Timeframe};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quote {
    pub bid: f64,
    pub ask: f64,
    pub spread: f64,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tick {
    pub symbol_index: usize,
    pub bid: f64,
    pub ask: f64,
    pub ts: DateTime<Utc>,
}

#[async_trait]
pub trait MarketDataAdapter: Send + Sync {
    /// Most-recent-last `Bar` series, `count` bars ending at `end` (or now).
    async fn historical(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        count: usize,
        end: Option<DateTime<Utc>>,
    ) -> CoreResult<Vec<Bar>>;

    /// Latest quote for `symbol`.
    async fn current(&self, symbol: &str) -> CoreResult<Quote>;

    /// Live tick stream for the given symbols. Implementations may fan out
    /// a single upstream feed or open one connection per symbol.
    fn subscribe(&self, symbols: Vec<String>) -> BoxStream<'static, Tick>;
}

pub mod file_adapter {
    //! Reads one JSON array of `Bar` per symbol from a local directory.
    //! This is the engine's own default adapter for running against a
    //! recorded history rather than a live feed; a broker's REST/stream
    //! connector is the operator's responsibility to supply (see the
    //! `MarketDataAdapter` trait above).
    use super::*;
    use signal_core::CoreError;
    use std::path::PathBuf;

    pub struct FileAdapter {
        dir: PathBuf,
    }

    impl FileAdapter {
        pub fn new(dir: PathBuf) -> Self {
            Self { dir }
        }

        async fn load(&self, symbol: &str) -> CoreResult<Vec<Bar>> {
            let path = self.dir.join(format!("{symbol}.json"));
            let raw = tokio::fs::read(&path)
                .await
                .map_err(|e| CoreError::TransientIo(format!("reading {}: {e}", path.display())))?;
            serde_json::from_slice(&raw)
                .map_err(|e| CoreError::ShapeError(format!("parsing {}: {e}", path.display())))
        }
    }

    #[async_trait]
    impl MarketDataAdapter for FileAdapter {
        async fn historical(
            &self,
            symbol: &str,
            _timeframe: Timeframe,
            count: usize,
            _end: Option<DateTime<Utc>>,
        ) -> CoreResult<Vec<Bar>> {
            let bars = self.load(symbol).await?;
            let start = bars.len().saturating_sub(count);
            Ok(bars[start..].to_vec())
        }

        async fn current(&self, symbol: &str) -> CoreResult<Quote> {
            let bars = self.load(symbol).await?;
            let last = bars.last().ok_or_else(|| CoreError::NotReady(format!("no bars for {symbol}")))?;
            Ok(Quote { bid: last.close - 0.0001, ask: last.close + 0.0001, spread: 0.0002, ts: last.timestamp })
        }

        /// No live upstream is wired at this layer; callers relying on the
        /// stream should fall back to periodic `historical`/`current` polls.
        fn subscribe(&self, _symbols: Vec<String>) -> BoxStream<'static, Tick> {
            Box::pin(futures::stream::empty())
        }
    }
}

#[cfg(test)]
pub mod test_support {
    //! An in-process adapter over fixed `Bar` data, used only to exercise
    //! the `MarketDataAdapter` contract in this crate's own tests and in
    //! downstream crates' integration tests.
    use super::*;
    use futures::stream;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct ReplayAdapter {
        bars: Mutex<HashMap<String, Vec<Bar>>>,
    }

    impl ReplayAdapter {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn seed(&self, symbol: &str, bars: Vec<Bar>) {
            self.bars.lock().unwrap().insert(symbol.to_string(), bars);
        }
    }

    #[async_trait]
    impl MarketDataAdapter for ReplayAdapter {
        async fn historical(
            &self,
            symbol: &str,
            _timeframe: Timeframe,
            count: usize,
            _end: Option<DateTime<Utc>>,
        ) -> CoreResult<Vec<Bar>> {
            let bars = self.bars.lock().unwrap();
            let series = bars.get(symbol).cloned().unwrap_or_default();
            let start = series.len().saturating_sub(count);
            Ok(series[start..].to_vec())
        }

        async fn current(&self, symbol: &str) -> CoreResult<Quote> {
            let bars = self.bars.lock().unwrap();
            let last = bars.get(symbol).and_then(|s| s.last()).cloned();
            let close = last.map(|b| b.close).unwrap_or(1.0);
            Ok(Quote {
                bid: close - 0.0001,
                ask: close + 0.0001,
                spread: 0.0002,
                ts: Utc::now(),
            })
        }

        fn subscribe(&self, _symbols: Vec<String>) -> BoxStream<'static, Tick> {
            Box::pin(stream::empty())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::ReplayAdapter;
    use super::*;
    use chrono::Utc;

    fn bar(close: f64) -> Bar {
        Bar { timestamp: Utc::now(), open: close, high: close, low: close, close, volume: 1.0 }
    }

    #[tokio::test]
    async fn historical_returns_at_most_count_most_recent_bars() {
        let adapter = ReplayAdapter::new();
        adapter.seed("EURUSD", (0..10).map(|i| bar(i as f64)).collect());
        let bars = adapter.historical("EURUSD", Timeframe::H1, 3, None).await.unwrap();
        assert_eq!(bars.len(), 3);
        assert_eq!(bars.last().unwrap().close, 9.0);
    }

    #[tokio::test]
    async fn current_derives_quote_from_last_bar() {
        let adapter = ReplayAdapter::new();
        adapter.seed("EURUSD", vec![bar(1.1)]);
        let quote = adapter.current("EURUSD").await.unwrap();
        assert!(quote.ask > quote.bid);
    }
}
