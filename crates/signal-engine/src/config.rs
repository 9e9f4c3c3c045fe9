//! Typed environment configuration, read once at startup.
use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub scan_interval: Duration,
    pub ea_tcp_port: u16,
    pub signal_output_dir: PathBuf,
    pub backend_url: String,
    pub max_concurrent_signals: usize,
    pub symbols: Vec<String>,
    pub model_dir: PathBuf,
    pub historical_data_dir: PathBuf,
    pub starting_balance: f64,
    pub pipeline_workers: usize,
    pub symbol_kill_threshold: u32,
    pub min_confidence_threshold: f64,
    pub deadline_guard: Duration,
    pub backup_interval: Duration,
    pub max_consecutive_losses: u32,
    pub feature_stats_path: PathBuf,
    pub max_bar_staleness: Duration,
}

impl EngineConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let scan_interval_secs: u64 = env::var("SCAN_INTERVAL_SECONDS")
            .unwrap_or_else(|_| "300".to_string())
            .parse()?;
        let ea_tcp_port: u16 = env::var("EA_TCP_PORT").unwrap_or_else(|_| "9443".to_string()).parse()?;
        let symbols: Vec<String> = env::var("SYMBOLS")
            .unwrap_or_else(|_| "EURUSD,GBPUSD,USDJPY".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            scan_interval: Duration::from_secs(scan_interval_secs),
            ea_tcp_port,
            signal_output_dir: PathBuf::from(
                env::var("SIGNAL_OUTPUT_DIR").unwrap_or_else(|_| "./signals".to_string()),
            ),
            backend_url: env::var("BACKEND_URL").unwrap_or_else(|_| "http://localhost:8000".to_string()),
            max_concurrent_signals: env::var("MAX_CONCURRENT_SIGNALS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()?,
            symbols,
            model_dir: PathBuf::from(env::var("MODEL_DIR").unwrap_or_else(|_| "./models".to_string())),
            historical_data_dir: PathBuf::from(
                env::var("HISTORICAL_DATA_DIR").unwrap_or_else(|_| "./data".to_string()),
            ),
            starting_balance: env::var("STARTING_BALANCE")
                .unwrap_or_else(|_| "10000".to_string())
                .parse()?,
            pipeline_workers: env::var("PIPELINE_WORKERS").unwrap_or_else(|_| "8".to_string()).parse()?,
            symbol_kill_threshold: env::var("SYMBOL_KILL_THRESHOLD")
                .unwrap_or_else(|_| "5".to_string())
                .parse()?,
            min_confidence_threshold: env::var("MIN_CONFIDENCE_THRESHOLD")
                .unwrap_or_else(|_| "0.6".to_string())
                .parse()?,
            deadline_guard: Duration::from_secs(
                env::var("TASK_DEADLINE_GUARD_SECONDS").unwrap_or_else(|_| "30".to_string()).parse()?,
            ),
            backup_interval: Duration::from_secs(
                env::var("BULLETIN_BOARD_BACKUP_INTERVAL_SECONDS")
                    .unwrap_or_else(|_| "86400".to_string())
                    .parse()?,
            ),
            max_consecutive_losses: env::var("MAX_CONSECUTIVE_LOSSES")
                .unwrap_or_else(|_| "5".to_string())
                .parse()?,
            feature_stats_path: PathBuf::from(
                env::var("MODEL_DIR").unwrap_or_else(|_| "./models".to_string()),
            )
            .join("feature_stats.json"),
            max_bar_staleness: Duration::from_secs(
                env::var("MAX_BAR_STALENESS_SECONDS").unwrap_or_else(|_| "900".to_string()).parse()?,
            ),
        })
    }
}
