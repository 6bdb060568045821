//! At most one active session per feature slot
//!
//! Starting a session for a slot supersedes the previous one: its token is
//! cancelled, so its buffer stops growing and its snapshot subscribers see
//! the channel close. Slots are independent and run concurrently.

use crate::advisory::accumulator::ContentAccumulator;
use crate::advisory::session::{AdvisoryEngine, AdvisoryRequest, AdvisorySession, SessionCell};
use crate::advisory::types::BufferSnapshot;
use edu_common::events::FeatureSlot;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

struct SlotEntry {
    cell: Arc<SessionCell>,
    cancel: CancellationToken,
}

/// Handle returned to the starter of a session
pub struct SessionHandle {
    pub session_id: Uuid,
    pub cell: Arc<SessionCell>,
    /// Live buffer snapshots for this session only
    pub snapshots: Option<broadcast::Receiver<BufferSnapshot>>,
}

pub struct SlotRegistry {
    engine: Arc<AdvisoryEngine>,
    slots: Mutex<HashMap<FeatureSlot, SlotEntry>>,
}

impl SlotRegistry {
    pub fn new(engine: Arc<AdvisoryEngine>) -> Self {
        Self {
            engine,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn engine(&self) -> &Arc<AdvisoryEngine> {
        &self.engine
    }

    /// Start a session for `slot`, cancelling any session still running there
    pub async fn start(&self, slot: FeatureSlot, request: AdvisoryRequest) -> SessionHandle {
        let mut slots = self.slots.lock().await;

        if let Some(previous) = slots.remove(&slot) {
            if !previous.cell.state().is_terminal() {
                previous.cancel.cancel();
                let superseded = previous.cell.snapshot().await.session_id;
                info!(
                    slot = slot.as_str(),
                    superseded = %superseded,
                    "Superseding active session"
                );
            }
        }

        let session = AdvisorySession::new(slot, request.user_id.clone());
        let session_id = session.session_id;
        let cell = SessionCell::new(session);
        let accumulator = ContentAccumulator::new(self.engine.config().event_capacity);
        let snapshots = accumulator.subscribe();
        let cancel = CancellationToken::new();

        let engine = Arc::clone(&self.engine);
        let task_cell = Arc::clone(&cell);
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            engine.run(task_cell, request, accumulator, task_cancel).await;
        });

        slots.insert(
            slot,
            SlotEntry {
                cell: Arc::clone(&cell),
                cancel,
            },
        );

        SessionHandle {
            session_id,
            cell,
            snapshots,
        }
    }

    /// Cancel the active session for `slot`; returns its id if one was running
    pub async fn cancel(&self, slot: FeatureSlot) -> Option<Uuid> {
        let slots = self.slots.lock().await;
        let entry = slots.get(&slot)?;
        if entry.cell.state().is_terminal() {
            return None;
        }
        entry.cancel.cancel();
        let session_id = entry.cell.snapshot().await.session_id;
        info!(slot = slot.as_str(), session_id = %session_id, "Session cancel requested");
        Some(session_id)
    }

    /// Most recent session for `slot` (running or finished)
    pub async fn current(&self, slot: FeatureSlot) -> Option<AdvisorySession> {
        let cell = {
            let slots = self.slots.lock().await;
            Arc::clone(&slots.get(&slot)?.cell)
        };
        Some(cell.snapshot().await)
    }

    /// Cancel everything (shutdown)
    pub async fn cancel_all(&self) {
        for entry in self.slots.lock().await.values() {
            entry.cancel.cancel();
        }
    }
}
