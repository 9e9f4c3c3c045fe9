//! Drives the per-symbol prediction pipeline on a fixed cadence, fanning out
//! across a bounded worker pool and joining every task before the tick ends.
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Semaphore};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tick_interval: Duration,
    pub pipeline_workers: usize,
    pub symbol_kill_threshold: u32,
    /// Margin subtracted from `tick_interval` to get a task's deadline, so a
    /// wedged symbol is cancelled before the next tick fires rather than
    /// overlapping it.
    pub deadline_guard: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(300),
            pipeline_workers: 8,
            symbol_kill_threshold: 5,
            deadline_guard: Duration::from_secs(30),
        }
    }
}

/// Runs `pipeline(symbol)` for every active symbol once per tick. A symbol
/// whose previous tick is still in flight is skipped this round rather than
/// queued (back-pressure); a symbol that fails `symbol_kill_threshold`
/// consecutive times is dropped from rotation.
pub struct Scheduler<F> {
    config: SchedulerConfig,
    symbols: Mutex<Vec<String>>,
    in_flight: Mutex<HashSet<String>>,
    failure_counts: Mutex<HashMap<String, u32>>,
    semaphore: Arc<Semaphore>,
    pipeline: F,
}

impl<F, Fut> Scheduler<F>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = signal_core::CoreResult<()>> + Send + 'static,
{
    pub fn new(config: SchedulerConfig, symbols: Vec<String>, pipeline: F) -> Arc<Self> {
        let workers = config.pipeline_workers.max(1);
        Arc::new(Self {
            semaphore: Arc::new(Semaphore::new(workers)),
            symbols: Mutex::new(symbols),
            in_flight: Mutex::new(HashSet::new()),
            failure_counts: Mutex::new(HashMap::new()),
            config,
            pipeline,
        })
    }

    pub fn active_symbols(&self) -> Vec<String> {
        self.symbols.lock().unwrap().clone()
    }

    /// Runs until `shutdown` reports `true`. In-flight per-symbol tasks are
    /// joined at the end of every tick before the next one starts.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.tick_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.clone().run_tick().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("scheduler shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn run_tick(self: Arc<Self>) {
        let symbols = self.active_symbols();
        let mut handles = Vec::with_capacity(symbols.len());
        let deadline = self.config.tick_interval.saturating_sub(self.config.deadline_guard);

        for symbol in symbols {
            let mut in_flight = self.in_flight.lock().unwrap();
            if in_flight.contains(&symbol) {
                tracing::warn!(symbol = %symbol, "previous tick still in flight, skipping this round");
                continue;
            }
            in_flight.insert(symbol.clone());
            drop(in_flight);

            let scheduler = self.clone();
            let permit = scheduler.semaphore.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit.acquire_owned().await.expect("semaphore never closed");
                let result = match tokio::time::timeout(deadline, (scheduler.pipeline)(symbol.clone())).await {
                    Ok(result) => result,
                    Err(_) => {
                        tracing::error!(symbol = %symbol, deadline = ?deadline, "pipeline task exceeded deadline, cancelling");
                        Err(signal_core::CoreError::Cancelled)
                    }
                };
                scheduler.record_outcome(&symbol, &result);
                scheduler.in_flight.lock().unwrap().remove(&symbol);
                result
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "pipeline task panicked");
            }
        }
    }

    fn record_outcome(&self, symbol: &str, result: &signal_core::CoreResult<()>) {
        let mut failures = self.failure_counts.lock().unwrap();
        match result {
            Ok(()) => {
                failures.remove(symbol);
            }
            Err(e) => {
                tracing::warn!(symbol = %symbol, error = %e, "pipeline tick failed");
                let count = failures.entry(symbol.to_string()).or_insert(0);
                *count += 1;
                if *count >= self.config.symbol_kill_threshold {
                    tracing::error!(symbol = %symbol, failures = *count, "dropping symbol from rotation");
                    self.symbols.lock().unwrap().retain(|s| s != symbol);
                    failures.remove(symbol);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use signal_core::CoreError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn failing_symbol_is_dropped_after_kill_threshold() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let scheduler = Scheduler::new(
            SchedulerConfig {
                tick_interval: Duration::from_millis(5),
                pipeline_workers: 2,
                symbol_kill_threshold: 3,
                deadline_guard: Duration::ZERO,
            },
            vec!["EURUSD".to_string()],
            move |_symbol| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                async move { Err(CoreError::TransientIo("simulated failure".into())) }
            },
        );

        for _ in 0..5 {
            scheduler.clone().run_tick().await;
        }

        assert!(scheduler.active_symbols().is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn success_resets_failure_count() {
        let attempt = Arc::new(AtomicU32::new(0));
        let attempt_clone = attempt.clone();
        let scheduler = Scheduler::new(
            SchedulerConfig {
                tick_interval: Duration::from_millis(5),
                pipeline_workers: 2,
                symbol_kill_threshold: 2,
                deadline_guard: Duration::ZERO,
            },
            vec!["EURUSD".to_string()],
            move |_symbol| {
                let n = attempt_clone.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n % 2 == 0 {
                        Err(CoreError::TransientIo("simulated".into()))
                    } else {
                        Ok(())
                    }
                }
            },
        );

        for _ in 0..6 {
            scheduler.clone().run_tick().await;
        }

        assert_eq!(scheduler.active_symbols(), vec!["EURUSD".to_string()]);
    }

    #[tokio::test]
    async fn in_flight_symbol_is_skipped_until_previous_tick_completes() {
        let started = Arc::new(tokio::sync::Notify::new());
        let release = Arc::new(tokio::sync::Notify::new());
        let started_clone = started.clone();
        let release_clone = release.clone();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();

        let scheduler = Scheduler::new(
            SchedulerConfig::default(),
            vec!["EURUSD".to_string()],
            move |_symbol| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                let started = started_clone.clone();
                let release = release_clone.clone();
                async move {
                    started.notify_one();
                    release.notified().await;
                    Ok(())
                }
            },
        );

        let first_tick = tokio::spawn(scheduler.clone().run_tick());
        started.notified().await;
        scheduler.clone().run_tick().await; // should skip, symbol still in flight
        release.notify_one();
        first_tick.await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn task_exceeding_deadline_is_cancelled_and_counted_as_failure() {
        let scheduler = Scheduler::new(
            SchedulerConfig {
                tick_interval: Duration::from_millis(20),
                pipeline_workers: 1,
                symbol_kill_threshold: 1,
                deadline_guard: Duration::from_millis(15),
            },
            vec!["EURUSD".to_string()],
            move |_symbol| async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
        );

        scheduler.clone().run_tick().await;
        assert!(scheduler.active_symbols().is_empty(), "one failure already hits kill_threshold=1");
    }
}
