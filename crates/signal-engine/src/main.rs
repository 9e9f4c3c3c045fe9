mod config;
mod ea_subscriber;
mod pipeline;

use bulletin_board::{BulletinBoard, BulletinBoardConfig};
use config::EngineConfig;
use ea_subscriber::LedgerSubscriber;
use ea_transport::{EaServer, EaTransportConfig, MessageSubscriber};
use ensemble::EnsembleCombiner;
use feature_engineer::FeatureStats;
use market_data::{file_adapter::FileAdapter, MarketDataAdapter};
use multi_timeframe::{MultiTimeframeValidator, ValidatorConfig};
use pipeline::PipelineContext;
use portfolio_ledger::PortfolioLedger;
use risk_manager::{CircuitBreakerState, RiskManager};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use scheduler::{Scheduler, SchedulerConfig};
use signal_core::RiskParameters;
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

const MAGIC_NUMBER: i64 = 20260728;

fn init_tracing() {
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if std::env::var("RUST_LOG_FORMAT").map(|v| v == "json").unwrap_or(false) {
        tracing_subscriber::fmt().json().with_env_filter(filter()).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter()).init();
    }

    std::panic::set_hook(Box::new(|info| {
        tracing::error!(panic = %info, "unrecoverable panic");
    }));
}

/// `TransientIo`/`DataQuality` are expected to clear on their own and log at
/// WARN; everything else reaching here (`NotReady`, `ShapeError`, `Fatal`,
/// `ProtocolViolation`, `ResourceExhausted`, `Cancelled`) is ERROR.
fn log_pipeline_error(symbol: &str, error: &signal_core::CoreError) {
    if error.is_retryable_next_tick() {
        tracing::warn!(symbol, error = %error, "pipeline tick failed, retrying next tick");
    } else {
        tracing::error!(symbol, error = %error, "pipeline tick failed");
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install SIGINT handler");
    };
    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = EngineConfig::from_env()?;
    tracing::info!(symbols = ?config.symbols, tick = ?config.scan_interval, "signal-engine starting up");

    let risk_params = RiskParameters { instruments_enabled: config.symbols.clone(), ..RiskParameters::default() };
    let risk = Arc::new(RiskManager::new(risk_params));

    let starting_balance = Decimal::from_f64_retain(config.starting_balance).unwrap_or(Decimal::new(10_000, 0));
    let ledger = Arc::new(PortfolioLedger::new(starting_balance));

    let bulletin_board = Arc::new(BulletinBoard::new(BulletinBoardConfig {
        output_dir: config.signal_output_dir.clone(),
        magic_number: MAGIC_NUMBER,
        ..BulletinBoardConfig::default()
    }));

    let mut ensemble = EnsembleCombiner::new(feature_engineer::INDICATOR_VECTOR_LEN);
    if let Err(e) = ensemble.load(&config.model_dir) {
        tracing::warn!(error = %e, dir = %config.model_dir.display(), "no trained ensemble found; signals will NotReady until one is trained");
    }
    let ensemble = Arc::new(ensemble);

    let feature_stats = match FeatureStats::load(&config.feature_stats_path) {
        Ok(stats) => stats,
        Err(e) => {
            tracing::warn!(
                error = %e,
                path = %config.feature_stats_path.display(),
                "no fitted feature stats found; falling back to identity normalisation"
            );
            FeatureStats::default()
        }
    };

    let circuit_breaker = Arc::new(CircuitBreakerState::new(
        ledger.equity().to_f64().unwrap_or(config.starting_balance),
    ));

    let validator = Arc::new(MultiTimeframeValidator::new(ValidatorConfig {
        max_concurrent_signals: config.max_concurrent_signals,
        ..ValidatorConfig::default()
    }));

    let adapter: Arc<dyn MarketDataAdapter> = Arc::new(FileAdapter::new(config.historical_data_dir.clone()));

    let subscribers: Vec<Arc<dyn MessageSubscriber>> =
        vec![Arc::new(LedgerSubscriber::new(ledger.clone(), circuit_breaker.clone()))];
    let ea_server = EaServer::new(
        EaTransportConfig { bind_addr: format!("0.0.0.0:{}", config.ea_tcp_port), ..EaTransportConfig::default() },
        subscribers,
    );

    let bulletin_board_for_backup = bulletin_board.clone();

    let ctx = Arc::new(PipelineContext {
        adapter,
        ensemble,
        risk,
        validator,
        ledger,
        ea_server: ea_server.clone(),
        active_signals: Arc::new(Mutex::new(Vec::new())),
        bulletin_board,
        magic_number: MAGIC_NUMBER,
        min_confidence_threshold: config.min_confidence_threshold,
        circuit_breaker,
        max_consecutive_losses: config.max_consecutive_losses,
        feature_stats,
        max_bar_staleness: config.max_bar_staleness,
    });

    let scheduler = Scheduler::new(
        SchedulerConfig {
            tick_interval: config.scan_interval,
            pipeline_workers: config.pipeline_workers,
            symbol_kill_threshold: config.symbol_kill_threshold,
            deadline_guard: config.deadline_guard,
        },
        config.symbols.clone(),
        move |symbol| {
            let ctx = ctx.clone();
            async move {
                match pipeline::run_symbol(ctx, symbol.clone()).await {
                    Ok(()) => Ok(()),
                    Err(e) if e.is_policy_reject() => {
                        tracing::info!(symbol, reason = %e, "no signal this tick");
                        Ok(())
                    }
                    Err(e) => {
                        log_pipeline_error(&symbol, &e);
                        Err(e)
                    }
                }
            }
        },
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let scheduler_task = tokio::spawn(scheduler.run(shutdown_rx.clone()));
    let ea_task = tokio::spawn(async move {
        if let Err(e) = ea_server.run(shutdown_rx).await {
            tracing::error!(error = %e, "EA transport exited with an error");
        }
    });

    let backup_interval = config.backup_interval;
    let mut backup_shutdown_rx = shutdown_tx.subscribe();
    let backup_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(backup_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = bulletin_board_for_backup.backup().await {
                        tracing::warn!(error = %e, "bulletin board backup failed");
                    } else {
                        tracing::info!("bulletin board backup written");
                    }
                }
                _ = backup_shutdown_rx.changed() => {
                    if *backup_shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
    });

    shutdown_signal().await;
    tracing::info!("shutdown signal received, draining in-flight work");
    let _ = shutdown_tx.send(true);

    let _ = tokio::join!(scheduler_task, ea_task, backup_task);
    tracing::info!("signal-engine stopped");
    Ok(())
}
