//! Per-user usage quota
//!
//! The gate is consulted exactly once per session, after it reached `Done`.
//! Failed and cancelled sessions never consume quota.

use crate::advisory::types::AdvisoryResult;
use async_trait::async_trait;
use edu_common::events::FeatureSlot;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaDecision {
    Allow,
    /// Denied; `message` is shown to the user alongside the result
    Deny { message: String },
}

#[async_trait]
pub trait QuotaGate: Send + Sync {
    /// Record one completed session for `user_id`
    async fn consume(&self, user_id: &str, slot: FeatureSlot) -> AdvisoryResult<QuotaDecision>;
}

/// Fixed free allowance per user, held in memory
pub struct InMemoryQuota {
    free_sessions: u32,
    used: Mutex<HashMap<String, u32>>,
}

impl InMemoryQuota {
    pub fn new(free_sessions: u32) -> Self {
        Self {
            free_sessions,
            used: Mutex::new(HashMap::new()),
        }
    }

    /// Sessions consumed so far by `user_id`
    pub async fn used(&self, user_id: &str) -> u32 {
        self.used.lock().await.get(user_id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl QuotaGate for InMemoryQuota {
    async fn consume(&self, user_id: &str, slot: FeatureSlot) -> AdvisoryResult<QuotaDecision> {
        let mut used = self.used.lock().await;
        let count = used.entry(user_id.to_string()).or_insert(0);

        if *count >= self.free_sessions {
            info!(
                user_id,
                slot = slot.as_str(),
                used = *count,
                "Free advisory allowance exhausted"
            );
            return Ok(QuotaDecision::Deny {
                message: format!(
                    "You have used all {} free advisory sessions. Upgrade to continue.",
                    self.free_sessions
                ),
            });
        }

        *count += 1;
        debug!(user_id, slot = slot.as_str(), used = *count, "Quota consumed");
        Ok(QuotaDecision::Allow)
    }
}
