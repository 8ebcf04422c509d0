//! PLC connection monitor
//!
//! Polls the PLC state every `check` interval. The PLC is healthy while it
//! reports RUN and its application timestamp is unchanged; a new timestamp
//! means a new PLC program was downloaded and every notification handle is
//! stale.
//!
//! ```text
//!                 unhealthy                     unhealthy
//!   ┌───────────┐ ───────────▶ ┌──────────────┐ ──────────▶ reconnect, wait `retry`
//!   │ connected │              │ disconnected │
//!   └───────────┘ ◀─────────── └──────────────┘
//!                 healthy: re-register notifications
//! ```
//!
//! A PLC that was never healthy stops the monitor with a fatal error.

use crate::hub::AdsHub;
use crate::types::{AdsState, AdsType, AdsValue};
use hubkit_core::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Symbol holding the download time of the running PLC program
pub const APP_TIMESTAMP_VAR: &str = "TwinCAT_SystemInfoVarList._AppInfo.AppTimeStamp";

/// Interval between state checks
pub const CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// What the monitor does after a check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorAction {
    /// Nothing changed
    None,
    /// First healthy check: the hub is live
    Initialized,
    /// Connected PLC became unhealthy: drop notifications
    Shutdown,
    /// Still unhealthy: reconnect and wait the retry interval
    Reconnect,
    /// Healthy again: re-register notifications
    Reinitialize,
    /// Never became healthy: give up
    Stop,
}

/// Monitor state machine, free of I/O
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MonitorState {
    connected: bool,
    initialized: bool,
    app_timestamp: Option<i64>,
}

impl MonitorState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Decide the next action
    ///
    /// `running` is whether the PLC reported RUN; `app_timestamp` is the
    /// program timestamp, `None` when it could not be read.
    pub fn decide(&mut self, running: bool, app_timestamp: Option<i64>) -> MonitorAction {
        let mut healthy = running;

        if healthy {
            if let Some(ts) = app_timestamp {
                let changed = self.app_timestamp != Some(ts);
                self.app_timestamp = Some(ts);
                if changed && self.initialized {
                    warn!("PLC application timestamp changed; re-initializing connection");
                    healthy = false;
                }
            }
        }

        match (healthy, self.connected, self.initialized) {
            (false, true, _) => {
                self.connected = false;
                MonitorAction::Shutdown
            }
            (false, false, false) => MonitorAction::Stop,
            (false, false, true) => MonitorAction::Reconnect,
            // `connected` is set by `mark_connected` once re-registration worked
            (true, false, true) => MonitorAction::Reinitialize,
            (true, false, false) => {
                self.connected = true;
                self.initialized = true;
                MonitorAction::Initialized
            }
            (true, true, _) => MonitorAction::None,
        }
    }

    /// Record that notifications were re-registered
    pub fn mark_connected(&mut self) {
        self.connected = true;
    }
}

async fn check(hub: &AdsHub, state: &mut MonitorState) -> Result<MonitorAction> {
    let running = match hub.read_state().await {
        Ok((ads_state, _)) => ads_state.is_running(),
        Err(e) => {
            debug!("[{}] Failed to read PLC state: {}", hub.name(), e);
            false
        }
    };

    let app_timestamp = if running {
        match hub.read_by_name(APP_TIMESTAMP_VAR, AdsType::DateAndTime).await {
            Ok(AdsValue::Int(ts)) => Some(ts),
            Ok(other) => {
                debug!("[{}] Unexpected app timestamp {:?}", hub.name(), other);
                None
            }
            Err(e) => {
                debug!("[{}] Failed to read app timestamp: {}", hub.name(), e);
                None
            }
        }
    } else {
        None
    };

    let action = state.decide(running, app_timestamp);
    match action {
        MonitorAction::None | MonitorAction::Stop => {}
        MonitorAction::Initialized => hub.mark_online(AdsState::Run),
        MonitorAction::Shutdown => {
            warn!("[{}] PLC not running; suspending notifications", hub.name());
            hub.shutdown_notifications().await;
        }
        MonitorAction::Reconnect => {
            if let Err(e) = hub.reconnect().await {
                debug!("[{}] Reconnect failed: {}", hub.name(), e);
            }
        }
        MonitorAction::Reinitialize => {
            hub.reinitialize_notifications().await?;
            state.mark_connected();
            hub.mark_online(AdsState::Run);
            info!("[{}] PLC running again; notifications restored", hub.name());
        }
    }
    Ok(action)
}

/// Watch the PLC connection until cancelled
///
/// # Errors
///
/// `Error::Fatal` if the PLC never reached RUN.
pub async fn run_monitor(
    hub: Arc<AdsHub>,
    check_interval: Duration,
    retry: Duration,
    token: CancellationToken,
) -> Result<()> {
    let mut state = MonitorState::new();

    loop {
        if token.is_cancelled() {
            return Ok(());
        }

        let delay = match check(&hub, &mut state).await {
            Ok(MonitorAction::Stop) => {
                error!("[{}] ADS connection could not be initialized", hub.name());
                hub.mark_offline("PLC never reached RUN");
                return Err(Error::fatal("ADS connection could not be initialized"));
            }
            Ok(MonitorAction::Reconnect) => retry,
            Ok(_) => check_interval,
            Err(e) => {
                warn!("[{}] Connection monitor error: {}", hub.name(), e);
                check_interval
            }
        };

        tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(()),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_never_healthy_stops() {
        let mut state = MonitorState::new();
        assert_eq!(state.decide(false, None), MonitorAction::Stop);
    }

    #[test]
    fn test_stop_then_run_cycle() {
        let mut state = MonitorState::new();
        assert_eq!(state.decide(true, Some(100)), MonitorAction::Initialized);
        assert_eq!(state.decide(true, Some(100)), MonitorAction::None);

        assert_eq!(state.decide(false, None), MonitorAction::Shutdown);
        assert!(!state.is_connected());
        assert_eq!(state.decide(false, None), MonitorAction::Reconnect);
        assert_eq!(state.decide(true, Some(100)), MonitorAction::Reinitialize);

        // Re-registration failed: try again on the next check
        assert_eq!(state.decide(true, Some(100)), MonitorAction::Reinitialize);
        state.mark_connected();
        assert_eq!(state.decide(true, Some(100)), MonitorAction::None);
    }

    #[test]
    fn test_new_program_forces_reinitialize() {
        let mut state = MonitorState::new();
        state.decide(true, Some(100));

        assert_eq!(state.decide(true, Some(200)), MonitorAction::Shutdown);
        // Same timestamp on the next check: healthy again
        assert_eq!(state.decide(true, Some(200)), MonitorAction::Reinitialize);
    }

    #[test]
    fn test_unreadable_timestamp_is_not_a_change() {
        let mut state = MonitorState::new();
        state.decide(true, Some(100));
        assert_eq!(state.decide(true, None), MonitorAction::None);
        assert_eq!(state.decide(true, Some(100)), MonitorAction::None);
    }
}
