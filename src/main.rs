//! cachetable demo
//!
//! Fills a table with expiring and permanent keys, reads them with a skewed
//! access pattern, reports the most accessed keys and watches the expiring
//! ones disappear.

use std::time::{Duration, Instant};

use anyhow::Context;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cachetable::{Config, Registry};

/// Every n-th key is inserted without a TTL.
const PERMANENT_EVERY: usize = 10;

/// How often the demo reports progress while waiting for expiry.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Entry point for the demo.
///
/// # Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Fill the "demo" table and read it with a skewed pattern
/// 4. Wait for expiring keys to be swept, or for Ctrl+C/SIGTERM
/// 5. Flush the table
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cachetable=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    info!(
        "Configuration loaded: log_events={}, demo_entries={}, demo_ttl={}ms",
        config.log_events, config.demo_entries, config.demo_ttl_ms
    );

    let registry: Registry<String, usize> = Registry::from_config(&config);
    let table = registry.table("demo");
    let ttl = Duration::from_millis(config.demo_ttl_ms);

    let started = Instant::now();
    let mut permanent = 0;
    for i in 0..config.demo_entries {
        let key_ttl = demo_ttl(i, ttl);
        if key_ttl.is_zero() {
            permanent += 1;
        }
        table.insert(format!("key{i}"), key_ttl, i);
    }
    info!(
        "Inserted {} keys ({} permanent) in {:?}",
        table.count(),
        permanent,
        started.elapsed()
    );

    // Low keys are read far more often than high ones
    let sample = config.demo_entries.min(100);
    for i in 0..sample {
        let key = format!("key{i}");
        for _ in 0..(sample - i) {
            table
                .fetch(&key)
                .with_context(|| format!("{key} vanished before it was read"))?;
        }
    }

    for item in table.most_accessed(5) {
        info!(
            "Most accessed: {} -> {} ({} hits, created {})",
            item.key(),
            item.value(),
            item.access_count(),
            item.created_on().format("%H:%M:%S%.3f")
        );
    }

    tokio::select! {
        _ = wait_for_expiry(&table, permanent) => {
            info!("Expiring keys swept after {:?}", started.elapsed());
        }
        _ = shutdown_signal() => {}
    }

    table.flush();
    info!("Demo complete");
    Ok(())
}

/// TTL for the `i`th demo key. A zero TTL makes every key permanent.
fn demo_ttl(i: usize, ttl: Duration) -> Duration {
    if i % PERMANENT_EVERY == 0 {
        Duration::ZERO
    } else {
        ttl
    }
}

/// Polls the table until only the permanent keys are left.
async fn wait_for_expiry(table: &cachetable::CacheTable<String, usize>, permanent: usize) {
    loop {
        tokio::time::sleep(POLL_INTERVAL).await;

        let remaining = table.count();
        info!(
            "{} keys left, next sweep in {:?}",
            remaining,
            table.next_sweep_due()
        );
        if remaining <= permanent {
            return;
        }
    }
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!("Failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_ttl_marks_every_tenth_key_permanent() {
        let ttl = Duration::from_millis(2000);
        assert_eq!(demo_ttl(0, ttl), Duration::ZERO);
        assert_eq!(demo_ttl(1, ttl), ttl);
        assert_eq!(demo_ttl(10, ttl), Duration::ZERO);
    }

    #[test]
    fn test_zero_demo_ttl_counts_as_permanent() {
        let permanent = (0..25).filter(|&i| demo_ttl(i, Duration::ZERO).is_zero()).count();
        assert_eq!(permanent, 25);
    }
}
