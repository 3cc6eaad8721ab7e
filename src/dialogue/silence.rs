use std::future::pending;

use tokio::time::{Duration, Instant, sleep_until};

/// Single-shot, resettable countdown that marks the end of a user turn.
/// `reset` discards any pending firing and restarts the window, so within one
/// quiet period only the latest reset can fire. Only one deadline is ever
/// pending.
pub struct SilenceTimer {
    window: Duration,
    deadline: Option<Instant>,
}

impl SilenceTimer {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
        }
    }

    pub fn reset(&mut self) {
        self.deadline = Some(Instant::now() + self.window);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Resolves when the current countdown expires; pends forever while
    /// disarmed. The caller cancels or resets after handling a firing, which
    /// keeps each reset cycle to at most one firing.
    pub async fn fired(&self) {
        match self.deadline {
            Some(deadline) => sleep_until(deadline).await,
            None => pending::<()>().await,
        }
    }
}
