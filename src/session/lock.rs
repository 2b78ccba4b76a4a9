use std::fmt;

use crate::{Error, Result};

/// Lifecycle of a session.
///
/// `Uninitialized → Connecting → Idle ⇄ Busy`, and any state may move to `Closed`,
/// which is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Uninitialized,
    Connecting,
    Idle,
    Busy,
    Closed,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionStatus::Uninitialized => "uninitialized",
            SessionStatus::Connecting => "connecting",
            SessionStatus::Idle => "idle",
            SessionStatus::Busy => "busy",
            SessionStatus::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Runtime guard allowing one operation in flight per session.
#[derive(Debug)]
pub(crate) struct ConnLock {
    status: SessionStatus,
}

impl ConnLock {
    pub(crate) fn new() -> Self {
        Self {
            status: SessionStatus::Uninitialized,
        }
    }

    pub(crate) fn status(&self) -> SessionStatus {
        self.status
    }

    pub(crate) fn connecting(&mut self) {
        if self.status == SessionStatus::Uninitialized {
            self.status = SessionStatus::Connecting;
        }
    }

    pub(crate) fn ready(&mut self) {
        if self.status == SessionStatus::Connecting {
            self.status = SessionStatus::Idle;
        }
    }

    /// Marks the session busy. Fails unless it is idle.
    pub(crate) fn acquire(&mut self) -> Result<()> {
        match self.status {
            SessionStatus::Idle => {
                self.status = SessionStatus::Busy;
                Ok(())
            }
            status => Err(Error::ConnLock { status }),
        }
    }

    /// Ends the current operation. A closed session stays closed.
    pub(crate) fn release(&mut self) {
        match self.status {
            SessionStatus::Busy => self.status = SessionStatus::Idle,
            SessionStatus::Closed => {}
            status => unreachable!("release of a session that is {status}"),
        }
    }

    /// Returns false when the session was already closed.
    pub(crate) fn close(&mut self) -> bool {
        let was_open = self.status != SessionStatus::Closed;
        self.status = SessionStatus::Closed;
        was_open
    }
}
