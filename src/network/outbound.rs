use std::collections::VecDeque;
use std::sync::Mutex;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::{oneshot, Notify};
use tracing::{debug, warn};

use crate::core::{Error, Result};

/// An encoded downlink waiting for the writer
#[derive(Debug)]
pub(crate) struct PendingDownlink {
    pub diid: u64,
    pub frame: Bytes,
    pub transmit_at: DateTime<Utc>,
    pub outcome: oneshot::Sender<Result<()>>,
}

impl PendingDownlink {
    /// Reports the outcome to the originator, who may have stopped listening
    pub fn complete(self, result: Result<()>) {
        let _ = self.outcome.send(result);
    }
}

#[derive(Debug, Default)]
struct State {
    entries: VecDeque<PendingDownlink>,
    closed: bool,
}

/// Bounded queue between the event loop and the writer task
#[derive(Debug)]
pub(crate) struct OutboundQueue {
    capacity: usize,
    state: Mutex<State>,
    notify: Notify,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        OutboundQueue {
            capacity: capacity.max(1),
            state: Mutex::new(State::default()),
            notify: Notify::new(),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Enqueues a downlink
    ///
    /// When the queue is full the oldest entry that is not yet due is dropped
    /// with [`Error::Backpressure`]; if every entry is due, the new one is.
    pub fn push(&self, entry: PendingDownlink, now: DateTime<Utc>) {
        let mut state = self.state();
        if state.closed {
            drop(state);
            entry.complete(Err(Error::ConnectionClosed));
            return;
        }

        if state.entries.len() >= self.capacity {
            let victim = state
                .entries
                .iter()
                .position(|queued| queued.transmit_at > now);
            match victim.and_then(|index| state.entries.remove(index)) {
                Some(dropped) => {
                    warn!(diid = dropped.diid, "Outbound queue full, dropping oldest downlink");
                    dropped.complete(Err(Error::Backpressure));
                }
                None => {
                    drop(state);
                    warn!(diid = entry.diid, "Outbound queue full, rejecting downlink");
                    entry.complete(Err(Error::Backpressure));
                    return;
                }
            }
        }

        state.entries.push_back(entry);
        drop(state);
        self.notify.notify_one();
    }

    /// Waits for the next downlink; `None` once the queue is closed
    pub async fn pop(&self) -> Option<PendingDownlink> {
        loop {
            {
                let mut state = self.state();
                if let Some(entry) = state.entries.pop_front() {
                    return Some(entry);
                }
                if state.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Closes the queue and fails everything still queued
    pub fn close(&self) {
        let drained: Vec<_> = {
            let mut state = self.state();
            state.closed = true;
            state.entries.drain(..).collect()
        };
        if !drained.is_empty() {
            debug!(count = drained.len(), "Failing queued downlinks");
        }
        for entry in drained {
            entry.complete(Err(Error::ConnectionClosed));
        }
        self.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        self.state().entries.len()
    }
}
