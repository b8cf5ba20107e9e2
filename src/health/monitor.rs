// src/health/monitor.rs
use crate::config::HealthCheckConfig;
use crate::health::{Prober, TcpProber};
use crate::metrics::MetricsCollector;
use crate::proxy::{EndpointStatus, ServerPool};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{info, warn};

/// Shortest period between probe rounds; `interval_at` rejects zero.
const MIN_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// Periodically re-probes every endpoint of a pool until shut down.
pub struct HealthMonitor {
    interval: Duration,
    pool: Arc<ServerPool>,
    prober: Arc<dyn Prober>,
    metrics: Option<Arc<MetricsCollector>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl HealthMonitor {
    pub fn new(
        config: &HealthCheckConfig,
        pool: Arc<ServerPool>,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Self {
        let prober = Arc::new(TcpProber::new(config.dial_timeout()));
        Self::with_prober(config.interval(), pool, prober, metrics)
    }

    pub fn with_prober(
        interval: Duration,
        pool: Arc<ServerPool>,
        prober: Arc<dyn Prober>,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        if interval < MIN_CHECK_INTERVAL {
            warn!(
                "Health check interval {:?} too short, using {:?}",
                interval, MIN_CHECK_INTERVAL
            );
        }

        Self {
            interval: interval.max(MIN_CHECK_INTERVAL),
            pool,
            prober,
            metrics,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Run until `shutdown` is called. The first round happens one interval
    /// after start; endpoints are assumed alive until then.
    pub async fn start(self: Arc<Self>) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown_rx = self.shutdown_rx.clone();

        info!("Starting health monitor with interval: {:?}", self.interval);

        loop {
            tokio::select! {
                biased;
                changed = shutdown_rx.changed() => {
                    // A dropped sender also means nobody can stop us later.
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Health monitor shutting down");
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.check_all().await;
                }
            }
        }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// One health check round over the whole pool.
    pub async fn check_all(&self) -> Vec<EndpointStatus> {
        info!("Starting health check...");
        let report = self.pool.health_check(self.prober.as_ref()).await;

        let alive = report.iter().filter(|s| s.alive).count();
        if let Some(metrics) = &self.metrics {
            for status in &report {
                metrics.update_backend_health(status.url.as_str(), status.alive);
            }
            metrics.update_backend_counts(alive, report.len());
        }

        info!(
            "Health check completed: {}/{} endpoints up",
            alive,
            report.len()
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use url::Url;

    /// Counts probes and reports every endpoint down.
    #[derive(Default)]
    struct CountingProber {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Prober for CountingProber {
        async fn probe(&self, _url: &Url) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            false
        }
    }

    fn pool() -> Arc<ServerPool> {
        let urls = vec![
            "http://10.0.0.1:80".parse().unwrap(),
            "http://10.0.0.2:80".parse().unwrap(),
        ];
        Arc::new(ServerPool::from_urls(urls).unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn test_probes_every_interval_until_shutdown() {
        let prober = Arc::new(CountingProber::default());
        let monitor = Arc::new(HealthMonitor::with_prober(
            Duration::from_secs(60),
            pool(),
            prober.clone(),
            None,
        ));

        let handle = tokio::spawn(monitor.clone().start());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(prober.calls.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(prober.calls.load(Ordering::SeqCst), 2);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(prober.calls.load(Ordering::SeqCst), 4);

        monitor.shutdown();
        handle.await.unwrap();

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(prober.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_is_clamped() {
        let prober = Arc::new(CountingProber::default());
        let monitor = Arc::new(HealthMonitor::with_prober(
            Duration::ZERO,
            pool(),
            prober.clone(),
            None,
        ));
        assert_eq!(monitor.interval, MIN_CHECK_INTERVAL);

        let handle = tokio::spawn(monitor.clone().start());
        tokio::time::sleep(MIN_CHECK_INTERVAL * 3 + MIN_CHECK_INTERVAL / 2).await;
        assert_eq!(prober.calls.load(Ordering::SeqCst), 6);

        monitor.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_check_all_writes_back_and_counts() {
        let pool = pool();
        let registry = crate::metrics::MetricsRegistry::new().unwrap();
        let monitor = HealthMonitor::with_prober(
            Duration::from_secs(60),
            pool.clone(),
            Arc::new(CountingProber::default()),
            Some(registry.collector()),
        );

        let report = monitor.check_all().await;

        assert_eq!(report.len(), 2);
        assert_eq!(pool.alive_count().await, 0);
        assert_eq!(registry.collector().healthy_backends.get(), 0);
        assert_eq!(registry.collector().total_backends.get(), 2);
    }
}
