use std::sync::Mutex;
use std::time::Duration;

/// Snapshot of the breaker internals for observability.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CooldownSnapshot {
    pub consecutive_failures: usize,
    pub cooldowns_triggered: u64,
}

#[derive(Debug, Default)]
struct CooldownState {
    consecutive_failures: usize,
    cooldowns_triggered: u64,
}

/// Counts consecutive whole-batch failures and asks the caller to pause once
/// the threshold is reached. The counter resets on any successful batch and
/// after each pause.
#[derive(Debug)]
pub struct BatchCooldown {
    state: Mutex<CooldownState>,
    failure_threshold: usize,
    cooldown: Duration,
}

impl BatchCooldown {
    pub fn new(failure_threshold: usize, cooldown: Duration) -> Self {
        Self {
            state: Mutex::new(CooldownState::default()),
            failure_threshold: failure_threshold.max(1),
            cooldown,
        }
    }

    pub fn snapshot(&self) -> CooldownSnapshot {
        let guard = self.state.lock().expect("cooldown mutex poisoned");
        CooldownSnapshot {
            consecutive_failures: guard.consecutive_failures,
            cooldowns_triggered: guard.cooldowns_triggered,
        }
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock().expect("cooldown mutex poisoned");
        state.consecutive_failures = 0;
    }

    pub fn record_failure(&self) {
        let mut state = self.state.lock().expect("cooldown mutex poisoned");
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
    }

    /// Returns the pause to apply before the next chunk, if the threshold has
    /// been reached, and resets the failure streak.
    pub fn take_pause(&self) -> Option<Duration> {
        let mut state = self.state.lock().expect("cooldown mutex poisoned");
        if state.consecutive_failures < self.failure_threshold {
            return None;
        }

        tracing::warn!(
            consecutive_failures = state.consecutive_failures,
            cooldown_ms = self.cooldown.as_millis() as u64,
            "sustained batch failures; cooling down before the next chunk"
        );
        state.consecutive_failures = 0;
        state.cooldowns_triggered = state.cooldowns_triggered.saturating_add(1);
        Some(self.cooldown)
    }
}
