//! Steady-cadence poll loop with quadratic backoff on failures.

use log::{info, warn};
use std::time::Duration;

use crate::error::ApiError;
use crate::model::DeviceState;
use crate::services::session::AccountSession;

#[derive(Debug, Clone)]
pub struct PollerSettings {
    pub interval: Duration,
    pub backoff_base: Duration,
    pub max_consecutive_failures: u32,
}

#[derive(Debug, PartialEq, Eq)]
pub enum FailureAction {
    RetryAfter(Duration),
    Stop,
}

/// Delay before retry number `attempt` (1-based): base times attempt squared.
pub fn backoff_delay(attempt: u32, base: Duration) -> Duration {
    base * attempt * attempt
}

/// Decide what a poll failure means. Configuration errors and a stale app
/// version cannot resolve on their own; everything else is retried with
/// backoff until the consecutive-failure budget runs out.
pub fn failure_action(error: &ApiError, consecutive_failures: u32, settings: &PollerSettings) -> FailureAction {
    match error {
        ApiError::Configuration(_) | ApiError::AppVersionOutdated { .. } => FailureAction::Stop,
        _ if consecutive_failures >= settings.max_consecutive_failures => FailureAction::Stop,
        _ => FailureAction::RetryAfter(backoff_delay(consecutive_failures, settings.backoff_base)),
    }
}

/// Poll until an unrecoverable error occurs.
pub fn run_loop(session: &mut AccountSession, settings: &PollerSettings) -> Result<(), ApiError> {
    let mut consecutive_failures = 0u32;
    loop {
        let result = session.poll_once(true, &mut |device| {
            if let DeviceState::Active(active) = &device.state {
                info!(
                    "Device {} ({}): mode {:?}, inside {:?}, target {:?}",
                    device.name.as_deref().unwrap_or(&device.device_id),
                    device.device_id,
                    active.parameters.mode,
                    active.parameters.inside_temperature,
                    active.parameters.target_temperature,
                );
            }
        });

        match result {
            Ok(()) => {
                consecutive_failures = 0;
                std::thread::sleep(settings.interval);
            }
            Err(e) => {
                consecutive_failures += 1;
                match failure_action(&e, consecutive_failures, settings) {
                    FailureAction::Stop => {
                        warn!("Stopping poll loop after failure {}: {}", consecutive_failures, e);
                        return Err(e);
                    }
                    FailureAction::RetryAfter(delay) => {
                        warn!(
                            "Poll failed ({}), retrying in {}s (failure {} of {})",
                            e,
                            delay.as_secs(),
                            consecutive_failures,
                            settings.max_consecutive_failures
                        );
                        std::thread::sleep(delay);
                    }
                }
            }
        }
    }
}
