//! Refresh/backfill driver
//!
//! An interval task that keeps the stores current: addresses added to
//! the primary table get validated, and cache rows that outlived the
//! TTL get re-probed. Expired rows are registered in the primary table
//! first so the address keeps being tracked.

use crate::AppState;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// Spawn the driver loop; it runs until the process exits
pub fn spawn(state: Arc<AppState>) -> JoinHandle<()> {
    tokio::spawn(run(state))
}

async fn run(state: Arc<AppState>) {
    let period = Duration::from_millis(state.config.scheduler.interval_ms);
    info!("Validation driver running every {:?}", period);

    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;

        match process_new_addresses(&state).await {
            Ok(0) => debug!("No new addresses to process"),
            Ok(n) => info!("Validated {} new address(es)", n),
            Err(err) => error!("Processing new addresses failed: {err:#}"),
        }

        match refresh_expired(&state).await {
            Ok(0) => debug!("No expired cache rows"),
            Ok(n) => info!("Refreshed {} expired cache row(s)", n),
            Err(err) => error!("Refreshing expired cache rows failed: {err:#}"),
        }
    }
}

/// Validate addresses that were registered but never processed
async fn process_new_addresses(state: &AppState) -> anyhow::Result<usize> {
    let addresses = state.registry.unprocessed().await?;
    for address in &addresses {
        info!("Validating new address: {}", address);
        let verdict = state.cache.fetch(address).await;
        debug!("Address {} categorized as {}", address, verdict.category);
        state.registry.mark_processed(address).await?;
    }
    Ok(addresses.len())
}

/// Re-probe every cache row older than the TTL, making sure the
/// address is tracked in the primary store first
async fn refresh_expired(state: &AppState) -> anyhow::Result<usize> {
    let expired = state.cache.expired_addresses().await?;
    for address in &expired {
        state.registry.ensure_registered(address).await?;
        let verdict = state.cache.refresh(address).await;
        debug!(
            "Refreshed {} - now categorized as {}",
            address, verdict.category
        );
    }
    Ok(expired.len())
}
