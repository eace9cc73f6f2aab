//! Periodic cleanup of expired challenges and sessions.
//!
//! Expiry is enforced at read time, so the sweeper only reclaims space. It is
//! safe to run on several instances at once.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use super::handlers::auth::AuthState;

/// Spawn the sweeper; a zero interval disables it.
pub fn spawn_sweeper(
    auth_state: Arc<AuthState>,
    every: Duration,
) -> Option<tokio::task::JoinHandle<()>> {
    if every.is_zero() {
        info!("expired record sweeper disabled");
        return None;
    }
    Some(tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; skip it so startup is not slowed.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            sweep_once(&auth_state).await;
        }
    }))
}

pub(crate) async fn sweep_once(auth_state: &AuthState) {
    match auth_state.store().purge_expired(auth_state.now()).await {
        Ok(stats) if stats.challenges > 0 || stats.sessions > 0 => info!(
            challenges = stats.challenges,
            sessions = stats.sessions,
            "purged expired records"
        ),
        Ok(_) => debug!("no expired records to purge"),
        Err(err) => error!("expired record sweep failed: {err:#}"),
    }
}
