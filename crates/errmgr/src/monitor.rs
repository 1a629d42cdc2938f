//! Threshold alerts delivered over bounded channels.
//!
//! Every [`Monitor`] for a name shares one channel, so an alert is consumed by
//! exactly one receiver no matter how many handles exist. Sends never block:
//! a full or closed channel drops the alert.

use std::fmt;
use std::sync::{Arc, Weak};

use async_channel::{Receiver, Sender, TryRecvError, TrySendError};
use faultline_error::Error;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::registry::Shared;

/// Default capacity of a monitor channel.
pub const MONITOR_SIZE: usize = 10;

pub(crate) struct AlertChannel {
    sender: Sender<Error>,
    receiver: Receiver<Error>,
    /// Guards close against concurrent sends.
    closed: Mutex<bool>,
}

impl AlertChannel {
    /// Bounded channel; zero capacity is raised to one.
    pub(crate) fn new(capacity: usize) -> Self {
        let (sender, receiver) = async_channel::bounded(capacity.max(1));
        Self {
            sender,
            receiver,
            closed: Mutex::new(false),
        }
    }

    /// Non-blocking send; returns whether the alert was queued.
    pub(crate) fn send(&self, name: &str, alert: Error) -> bool {
        let closed = self.closed.lock();
        if *closed {
            return false;
        }
        match self.sender.try_send(alert) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!(name, "Alert dropped: monitor channel full");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    pub(crate) fn close(&self) {
        let mut closed = self.closed.lock();
        if !*closed {
            self.sender.close();
            *closed = true;
        }
    }

    fn is_closed(&self) -> bool {
        *self.closed.lock()
    }
}

/// Handle onto the alert channel of one error name.
#[derive(Clone)]
pub struct Monitor {
    name: String,
    channel: Arc<AlertChannel>,
    registry: Weak<Shared>,
}

impl Monitor {
    pub(crate) fn new(name: String, channel: Arc<AlertChannel>, registry: Weak<Shared>) -> Self {
        Self {
            name,
            channel,
            registry,
        }
    }

    /// The watched name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Receiver for alerts, or `None` once the monitor is closed.
    ///
    /// Receivers are clones of one queue; each alert goes to one of them.
    pub fn alerts(&self) -> Option<Receiver<Error>> {
        let closed = self.channel.closed.lock();
        (!*closed).then(|| self.channel.receiver.clone())
    }

    /// Wait for the next alert. `None` after close once the queue is drained.
    pub async fn recv(&self) -> Option<Error> {
        self.channel.receiver.recv().await.ok()
    }

    /// Next queued alert without waiting.
    pub fn try_recv(&self) -> Option<Error> {
        match self.channel.receiver.try_recv() {
            Ok(alert) => Some(alert),
            Err(TryRecvError::Empty | TryRecvError::Closed) => None,
        }
    }

    /// Close the channel and unregister it. Safe to call repeatedly and from
    /// several handles.
    pub fn close(&self) {
        if let Some(shared) = self.registry.upgrade() {
            let mut alerts = shared.alerts.write();
            if alerts
                .get(&self.name)
                .is_some_and(|current| Arc::ptr_eq(current, &self.channel))
            {
                alerts.remove(&self.name);
            }
        }
        self.channel.close();
        trace!(name = %self.name, "Monitor closed");
    }

    /// Whether the channel has been closed.
    pub fn is_closed(&self) -> bool {
        self.channel.is_closed()
    }
}

impl fmt::Debug for Monitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Monitor")
            .field("name", &self.name)
            .field("closed", &self.is_closed())
            .field("queued", &self.channel.receiver.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_capacity_still_queues_one() {
        let channel = AlertChannel::new(0);
        assert!(channel.send("x", Error::new("first")));
        assert!(!channel.send("x", Error::new("second")));
    }

    #[test]
    fn send_after_close_is_dropped() {
        let channel = AlertChannel::new(4);
        channel.close();
        channel.close();
        assert!(channel.is_closed());
        assert!(!channel.send("x", Error::new("late")));
    }
}
