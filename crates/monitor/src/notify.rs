//! Rate-limited outbound notification queue.
//!
//! `enqueue` is synchronous and non-blocking; a worker task delivers items
//! in order through an injected `AlertChannel`, throttled by a fixed-window
//! limiter that applies across the whole queue (not per recipient). A
//! global kill switch drops sends silently so outbound alerts can be
//! disabled without touching any caller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

// ---------------------------------------------------------------------------
// Outbound channel seam
// ---------------------------------------------------------------------------

/// Send primitive of the external messaging adapter. Errors are non-fatal;
/// the queue logs them and moves on.
#[async_trait]
pub trait AlertChannel: Send + Sync {
    async fn send(&self, recipient: i64, text: &str) -> Result<()>;
}

/// Channel that only logs. Wired by default until a real messenger adapter
/// is configured.
pub struct LogChannel;

#[async_trait]
impl AlertChannel for LogChannel {
    async fn send(&self, recipient: i64, text: &str) -> Result<()> {
        info!(recipient, "alert: {text}");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fixed-window limiter
// ---------------------------------------------------------------------------

/// At most `max_ops` operations per fixed window. `reserve` hands out a
/// slot and returns how long the caller must wait before using it; full
/// windows spill into the next one.
pub struct FixedWindow {
    window: Duration,
    max_ops: u32,
    window_start: Option<Instant>,
    count: u32,
}

impl FixedWindow {
    pub fn new(window: Duration, max_ops: u32) -> Self {
        Self {
            window: window.max(Duration::from_millis(1)),
            max_ops: max_ops.max(1),
            window_start: None,
            count: 0,
        }
    }

    /// Reserve one slot at `now`; returns the required delay (zero when the
    /// current window still has capacity).
    pub fn reserve(&mut self, now: Instant) -> Duration {
        let mut start = match self.window_start {
            Some(s) => s,
            None => {
                self.count = 0;
                now
            }
        };

        // Catch up when the reserved window is already in the past.
        if now >= start + self.window {
            let periods = (now.duration_since(start).as_micros()
                / self.window.as_micros().max(1)) as u32;
            start += self.window * periods;
            self.count = 0;
        }

        // Spill into the next window when this one is full.
        if self.count >= self.max_ops {
            start += self.window;
            self.count = 0;
        }

        self.window_start = Some(start);
        self.count += 1;

        start.checked_duration_since(now).unwrap_or(Duration::ZERO)
    }
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

struct Outbound {
    recipient: i64,
    text: String,
}

/// Ordered, rate-limited dispatcher for outbound alert messages.
pub struct NotificationQueue {
    tx: mpsc::UnboundedSender<Outbound>,
    disabled: Arc<AtomicBool>,
}

impl NotificationQueue {
    /// Spawn the delivery worker. `window`/`max_per_window` bound the send
    /// rate across all recipients combined.
    pub fn new(channel: Arc<dyn AlertChannel>, window: Duration, max_per_window: u32) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let disabled = Arc::new(AtomicBool::new(false));
        tokio::spawn(deliver(
            rx,
            channel,
            FixedWindow::new(window, max_per_window),
            Arc::clone(&disabled),
        ));
        Self { tx, disabled }
    }

    /// Queue one message. Never blocks; delivery happens asynchronously.
    pub fn enqueue(&self, recipient: i64, text: impl Into<String>) {
        let item = Outbound {
            recipient,
            text: text.into(),
        };
        if self.tx.send(item).is_err() {
            warn!(recipient, "notification worker gone, dropping alert");
        }
    }

    /// Kill switch: when set, dequeued items are dropped without sending.
    pub fn set_disabled(&self, disabled: bool) {
        self.disabled.store(disabled, Ordering::Relaxed);
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Relaxed)
    }
}

async fn deliver(
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    channel: Arc<dyn AlertChannel>,
    mut limiter: FixedWindow,
    disabled: Arc<AtomicBool>,
) {
    while let Some(item) = rx.recv().await {
        // Checked per item so flipping the switch takes effect immediately.
        if disabled.load(Ordering::Relaxed) {
            debug!(recipient = item.recipient, "outbound alerts disabled, dropping");
            continue;
        }

        let wait = limiter.reserve(Instant::now());
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }

        // No retry: a failed send is logged and the queue continues.
        if let Err(e) = channel.send(item.recipient, &item.text).await {
            error!(recipient = item.recipient, "notification send failed: {e}");
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
