// Content Accumulator
//
// Concept: Single authoritative growing text buffer for one session
// Synchronization: Accepts StreamFragments in sequence order, publishes a
// BufferSnapshot to subscribers after every accepted fragment
//
// Integrity:
// - append is the only mutation; text is never truncated or rewound
// - fragments with a non-increasing sequence are discarded
// - after close() the buffer is frozen and nothing more is published

use crate::advisory::types::{AdvisoryError, AdvisoryResult, BufferSnapshot, StreamFragment};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Default subscriber queue depth for live snapshots
pub const DEFAULT_SNAPSHOT_CAPACITY: usize = 64;

pub struct ContentAccumulator {
    buffer: BufferSnapshot,
    last_sequence: Option<u64>,
    /// Dropped on close so no further notifications can be delivered
    publisher: Option<broadcast::Sender<BufferSnapshot>>,
}

impl Default for ContentAccumulator {
    fn default() -> Self {
        Self::new(DEFAULT_SNAPSHOT_CAPACITY)
    }
}

impl ContentAccumulator {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            buffer: BufferSnapshot::default(),
            last_sequence: None,
            publisher: Some(tx),
        }
    }

    /// Subscribe to live snapshots; `None` once closed
    pub fn subscribe(&self) -> Option<broadcast::Receiver<BufferSnapshot>> {
        self.publisher.as_ref().map(|tx| tx.subscribe())
    }

    /// Append one fragment and publish the resulting snapshot
    ///
    /// # Errors
    /// - `FragmentRejected` for an out-of-order fragment or any fragment
    ///   after the final one (the buffer is unchanged)
    /// - `Cancelled` after [`ContentAccumulator::close`]
    pub fn append(&mut self, fragment: StreamFragment) -> AdvisoryResult<BufferSnapshot> {
        if self.publisher.is_none() {
            return Err(AdvisoryError::Cancelled);
        }

        if self.buffer.complete {
            warn!(
                sequence = fragment.sequence,
                "Discarding fragment received after stream completion"
            );
            return Err(AdvisoryError::FragmentRejected(format!(
                "fragment {} after final fragment",
                fragment.sequence
            )));
        }

        if let Some(last) = self.last_sequence {
            if fragment.sequence <= last {
                warn!(
                    sequence = fragment.sequence,
                    last_sequence = last,
                    "Discarding out-of-order fragment"
                );
                return Err(AdvisoryError::FragmentRejected(format!(
                    "fragment {} not after {}",
                    fragment.sequence, last
                )));
            }
        }

        self.last_sequence = Some(fragment.sequence);
        self.buffer.text.push_str(&fragment.text);
        self.buffer.fragment_count += 1;
        self.buffer.complete = fragment.is_final;

        let snapshot = self.buffer.clone();
        if let Some(tx) = &self.publisher {
            // No receivers is fine; the snapshot is still returned to the caller
            if tx.send(snapshot.clone()).is_err() {
                debug!(
                    fragment_count = snapshot.fragment_count,
                    "No snapshot subscribers"
                );
            }
        }

        Ok(snapshot)
    }

    /// Current buffer state (read-only copy)
    pub fn snapshot(&self) -> BufferSnapshot {
        self.buffer.clone()
    }

    pub fn is_complete(&self) -> bool {
        self.buffer.complete
    }

    /// Complete text, only available once the final fragment arrived
    pub fn final_text(&self) -> Option<&str> {
        self.buffer.complete.then_some(self.buffer.text.as_str())
    }

    /// Freeze the buffer and stop publishing
    ///
    /// Subscribers observe the channel closing after draining what was
    /// already published.
    pub fn close(&mut self) {
        self.publisher = None;
    }

    pub fn is_closed(&self) -> bool {
        self.publisher.is_none()
    }
}
