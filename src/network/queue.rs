//! Bounded FIFO holding envelopes sent while the socket is not open.
//!
//! Unlike a conflating buffer nothing is ever dropped to make room: action
//! messages (acknowledgements, read receipts) must reach the server, so a full
//! queue rejects the *new* envelope and leaves older ones untouched.

use std::collections::VecDeque;

use tracing::{debug, warn};

use crate::model::Envelope;

/// Queue pressure derived from fill ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePressure {
    /// Queue < 50% full.
    Green,
    /// Queue 50-90% full.
    Yellow,
    /// Queue >= 90% full.
    Red,
}

impl QueuePressure {
    /// Determine pressure from queue length and capacity.
    #[inline]
    pub fn from_capacity(current_len: usize, max_capacity: usize) -> Self {
        if max_capacity == 0 {
            return Self::Red;
        }

        let ratio = current_len as f64 / max_capacity as f64;

        if ratio < 0.5 {
            Self::Green
        } else if ratio < 0.9 {
            Self::Yellow
        } else {
            Self::Red
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Green => "green",
            Self::Yellow => "yellow",
            Self::Red => "red",
        }
    }
}

impl std::fmt::Display for QueuePressure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Counters for monitoring the offline queue.
#[derive(Debug, Default, Clone)]
pub struct QueueStats {
    pub enqueued: u64,
    pub flushed: u64,
    pub rejected: u64,
    pub requeued: u64,
}

pub struct OutboundQueue {
    items: VecDeque<Envelope>,
    capacity: usize,
    pressure: QueuePressure,
    stats: QueueStats,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            pressure: QueuePressure::Green,
            stats: QueueStats::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn pressure(&self) -> QueuePressure {
        self.pressure
    }

    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }

    /// Append to the tail. A full queue hands the envelope back.
    pub fn push(&mut self, envelope: Envelope) -> Result<(), Envelope> {
        if self.items.len() >= self.capacity {
            self.stats.rejected += 1;
            return Err(envelope);
        }
        self.items.push_back(envelope);
        self.stats.enqueued += 1;
        self.refresh_pressure();
        Ok(())
    }

    /// Put an envelope that failed mid-flush back at the head.
    ///
    /// It was already counted against capacity once, so this never fails.
    pub fn requeue_front(&mut self, envelope: Envelope) {
        self.items.push_front(envelope);
        self.stats.requeued += 1;
        self.refresh_pressure();
    }

    pub fn pop(&mut self) -> Option<Envelope> {
        let item = self.items.pop_front();
        if item.is_some() {
            self.stats.flushed += 1;
            self.refresh_pressure();
        }
        item
    }

    pub fn clear(&mut self) {
        if !self.items.is_empty() {
            debug!("Discarding {} queued envelopes", self.items.len());
        }
        self.items.clear();
        self.refresh_pressure();
    }

    fn refresh_pressure(&mut self) {
        let next = QueuePressure::from_capacity(self.items.len(), self.capacity);
        if next != self.pressure {
            match next {
                QueuePressure::Green => debug!("Outbound queue pressure: GREEN"),
                QueuePressure::Yellow | QueuePressure::Red => warn!(
                    "Outbound queue pressure: {} ({}/{})",
                    next.as_str().to_uppercase(),
                    self.items.len(),
                    self.capacity
                ),
            }
            self.pressure = next;
        }
    }
}
