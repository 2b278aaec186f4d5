//! Bounded reconnect policy for the playback source.

use crate::player::ConnectError;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionPhase {
    #[default]
    Idle,
    Connecting,
    Connected,
    Failed,
    /// Out of retries; waits for an explicit connect.
    Terminal,
}

impl ConnectionPhase {
    pub fn label(self) -> &'static str {
        match self {
            ConnectionPhase::Idle => "idle",
            ConnectionPhase::Connecting => "connecting",
            ConnectionPhase::Connected => "connected",
            ConnectionPhase::Failed => "failed",
            ConnectionPhase::Terminal => "gave up",
        }
    }
}

/// What the caller should do after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureAction {
    RetryAfter(Duration),
    /// Surface the error; no automatic retry.
    Report(String),
}

#[derive(Debug, Clone)]
pub struct ConnectionRetry {
    source_name: String,
    max_attempts: u32,
    backoff: Duration,
    attempt_count: u32,
    phase: ConnectionPhase,
    last_error: Option<ConnectError>,
    error_message: Option<String>,
}

impl ConnectionRetry {
    pub fn new(source_name: impl Into<String>, max_attempts: u32, backoff: Duration) -> Self {
        Self {
            source_name: source_name.into(),
            max_attempts: max_attempts.max(1),
            backoff,
            attempt_count: 0,
            phase: ConnectionPhase::Idle,
            last_error: None,
            error_message: None,
        }
    }

    pub fn from_config(
        source_name: impl Into<String>,
        cfg: &crate::config::ConnectionConfig,
    ) -> Self {
        Self::new(
            source_name,
            cfg.max_attempts,
            Duration::from_millis(cfg.backoff_ms),
        )
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    pub fn is_connecting(&self) -> bool {
        self.phase == ConnectionPhase::Connecting
    }

    pub fn is_terminal(&self) -> bool {
        self.phase == ConnectionPhase::Terminal
    }

    pub fn last_error(&self) -> Option<&ConnectError> {
        self.last_error.as_ref()
    }

    /// User-visible connection error, if any.
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Start an attempt. Returns false if one is already running.
    pub fn begin_attempt(&mut self) -> bool {
        if self.is_connecting() {
            return false;
        }
        self.attempt_count += 1;
        self.phase = ConnectionPhase::Connecting;
        true
    }

    pub fn on_success(&mut self) {
        self.attempt_count = 0;
        self.phase = ConnectionPhase::Connected;
        self.last_error = None;
        self.error_message = None;
    }

    /// Record a failed attempt or a lost session and decide what happens next.
    pub fn on_failure(&mut self, err: &ConnectError) -> FailureAction {
        self.last_error = Some(err.clone());

        if self.attempt_count >= self.max_attempts {
            self.phase = ConnectionPhase::Terminal;
            let msg = format!(
                "{} connection failed after {} attempts",
                self.source_name, self.attempt_count
            );
            self.error_message = Some(msg.clone());
            return FailureAction::Report(msg);
        }

        self.phase = ConnectionPhase::Failed;
        if err.is_transient() {
            return FailureAction::RetryAfter(self.backoff);
        }

        let msg = format!("Error connecting to {}: {}", self.source_name, err);
        self.error_message = Some(msg.clone());
        FailureAction::Report(msg)
    }

    /// Teardown: forget attempts and any in-progress connect.
    pub fn reset(&mut self) {
        self.attempt_count = 0;
        self.phase = ConnectionPhase::Idle;
        self.last_error = None;
        self.error_message = None;
    }
}
