//! Deferred callbacks.
//!
//! The dialog manager never waits inline. It hands a [`ScheduledCallback`]
//! to a [`Scheduler`]; when the callback is due, the host rebuilds the
//! session's manager and passes the callback's kind to
//! `DialogManager::accept_callback`. Inactivity callbacks carry the counter
//! captured when they were scheduled and are ignored if the conversation
//! has moved on since.

use crate::dialog::ChatSession;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;
#[cfg(feature = "tokio-runtime")]
use tokio::{runtime::Handle, sync::mpsc};

/// When a callback is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackTime {
    /// At an absolute time
    At(DateTime<Utc>),
    /// After a delay from now
    After(Duration),
}

impl CallbackTime {
    /// Due after a number of seconds.
    pub fn after_secs(seconds: u64) -> Self {
        Self::After(Duration::from_secs(seconds))
    }

    /// Remaining delay as of `now`; zero if already due.
    pub fn delay_from(&self, now: DateTime<Utc>) -> Duration {
        match self {
            Self::After(delay) => *delay,
            Self::At(at) => (*at - now).to_std().unwrap_or(Duration::ZERO),
        }
    }
}

/// What to do when a callback fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CallbackKind {
    /// A timed callback requested by an action
    Schedule { name: String },
    /// Fires if no message arrived since `counter`
    Inactivity { name: String, counter: u64 },
}

/// A callback handed to a [`Scheduler`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledCallback {
    pub session: ChatSession,
    pub kind: CallbackKind,
    pub time: CallbackTime,
}

impl ScheduledCallback {
    /// A named timed callback.
    pub fn schedule(session: ChatSession, name: impl Into<String>, time: CallbackTime) -> Self {
        Self {
            session,
            kind: CallbackKind::Schedule { name: name.into() },
            time,
        }
    }

    /// A named inactivity callback capturing the current counter.
    pub fn inactivity(
        session: ChatSession,
        name: impl Into<String>,
        counter: u64,
        time: CallbackTime,
    ) -> Self {
        Self {
            session,
            kind: CallbackKind::Inactivity {
                name: name.into(),
                counter,
            },
            time,
        }
    }
}

/// "Run this later" capability.
pub trait Scheduler: Send + Sync {
    /// Queue a callback for delivery.
    fn schedule(&self, callback: ScheduledCallback) -> Result<()>;
}

/// Scheduler that only queues; the host drains and delivers.
#[derive(Debug, Default)]
pub struct ManualScheduler {
    queue: Mutex<Vec<ScheduledCallback>>,
}

impl ManualScheduler {
    /// Create an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queued callbacks, oldest first.
    pub fn pending(&self) -> Vec<ScheduledCallback> {
        self.queue.lock().map(|q| q.clone()).unwrap_or_default()
    }

    /// Take every queued callback.
    pub fn drain(&self) -> Vec<ScheduledCallback> {
        self.queue
            .lock()
            .map(|mut q| std::mem::take(&mut *q))
            .unwrap_or_default()
    }

    /// Number of queued callbacks.
    pub fn len(&self) -> usize {
        self.queue.lock().map(|q| q.len()).unwrap_or(0)
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, callback: ScheduledCallback) -> Result<()> {
        self.queue
            .lock()
            .map_err(|e| Error::Scheduling(format!("Failed to lock queue: {}", e)))?
            .push(callback);
        Ok(())
    }
}

/// Scheduler that sleeps on the tokio runtime, then sends due callbacks
/// to a channel the host consumes.
#[cfg(feature = "tokio-runtime")]
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    sender: mpsc::UnboundedSender<ScheduledCallback>,
    handle: Handle,
}

#[cfg(feature = "tokio-runtime")]
impl TokioScheduler {
    /// Create a scheduler bound to the current runtime, and the receiver
    /// of due callbacks.
    pub fn new() -> Result<(Self, mpsc::UnboundedReceiver<ScheduledCallback>)> {
        let handle = Handle::try_current()
            .map_err(|e| Error::Scheduling(format!("No tokio runtime available: {}", e)))?;
        let (sender, receiver) = mpsc::unbounded_channel();
        Ok((Self { sender, handle }, receiver))
    }
}

#[cfg(feature = "tokio-runtime")]
impl Scheduler for TokioScheduler {
    fn schedule(&self, callback: ScheduledCallback) -> Result<()> {
        if self.sender.is_closed() {
            return Err(Error::Scheduling("Callback receiver was dropped".into()));
        }
        let delay = callback.time.delay_from(Utc::now());
        let sender = self.sender.clone();
        self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if sender.send(callback).is_err() {
                tracing::debug!("Callback receiver dropped before delivery");
            }
        });
        Ok(())
    }
}
