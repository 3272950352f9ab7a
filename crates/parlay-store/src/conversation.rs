//! Reconciliation of optimistic messages against polled server snapshots.

use std::collections::HashSet;

use chrono::Duration;
use tracing::{debug, warn};

use parlay_shared::constants::DEFAULT_MATCH_TOLERANCE_SECS;
use parlay_shared::{ConversationId, MessageId, UserId};

use crate::error::{Result, StoreError};
use crate::models::{
    ConversationView, CorrelationKey, FailureReason, Message, PendingMessage, PendingState,
    ViewEntry,
};

/// Result of applying one server snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Confirmed messages not present in the previous snapshot. Empty for the
    /// first snapshot, which only seeds the history.
    pub new_messages: Vec<Message>,
    /// Pending entries that were matched and dropped.
    pub matched: Vec<CorrelationKey>,
}

#[derive(Debug, Clone)]
struct PendingEntry {
    message: PendingMessage,
    /// Successful polls survived while in `Sent`.
    unconfirmed_polls: u32,
}

/// Merged confirmed + pending state for one two-party conversation.
#[derive(Debug, Clone)]
pub struct MessageStore {
    local_user: UserId,
    peer: UserId,
    tolerance: Duration,
    confirmed: Vec<Message>,
    /// Every row id reported so far, including ones a later snapshot omits.
    seen: HashSet<MessageId>,
    pending: Vec<PendingEntry>,
    generation: u64,
    seeded: bool,
}

impl MessageStore {
    pub fn new(local_user: UserId, peer: UserId) -> Self {
        Self {
            local_user,
            peer,
            tolerance: Duration::seconds(DEFAULT_MATCH_TOLERANCE_SECS),
            confirmed: Vec::new(),
            seen: HashSet::new(),
            pending: Vec::new(),
            generation: 0,
            seeded: false,
        }
    }

    /// Override the clock drift accepted when matching pending entries.
    pub fn with_tolerance(mut self, tolerance: Duration) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn local_user(&self) -> &UserId {
        &self.local_user
    }

    pub fn peer(&self) -> &UserId {
        &self.peer
    }

    pub fn conversation_id(&self) -> ConversationId {
        ConversationId::between(&self.local_user, &self.peer)
    }

    /// Number of snapshots applied so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn confirmed(&self) -> &[Message] {
        &self.confirmed
    }

    pub fn pending(&self) -> impl Iterator<Item = &PendingMessage> {
        self.pending.iter().map(|e| &e.message)
    }

    pub fn find_pending(&self, key: &CorrelationKey) -> Option<&PendingMessage> {
        self.pending
            .iter()
            .find(|e| &e.message.key == key)
            .map(|e| &e.message)
    }

    /// Insert an optimistic entry so it renders immediately.
    pub fn add_pending(&mut self, message: PendingMessage) -> Result<()> {
        if self.find_pending(&message.key).is_some() {
            return Err(StoreError::DuplicatePending(message.key.to_string()));
        }
        debug!(key = %message.key, "Adding pending message");
        self.pending.push(PendingEntry {
            message,
            unconfirmed_polls: 0,
        });
        Ok(())
    }

    /// Record that the server acknowledged the insert.
    ///
    /// Returns `false` when the entry is already gone, which happens when a
    /// poll reconciled it before the insert call returned.
    pub fn mark_sent(&mut self, key: &CorrelationKey) -> bool {
        match self.entry_mut(key) {
            Some(entry) => {
                if entry.message.state == PendingState::Sending {
                    entry.message.state = PendingState::Sent;
                }
                true
            }
            None => false,
        }
    }

    /// Flag an entry as failed without removing it.
    pub fn mark_failed(&mut self, key: &CorrelationKey, reason: FailureReason) -> Result<()> {
        let entry = self
            .entry_mut(key)
            .ok_or_else(|| StoreError::UnknownPending(key.to_string()))?;
        warn!(key = %key, %reason, "Pending message failed");
        entry.message.state = PendingState::Failed(reason);
        Ok(())
    }

    /// Take a failed entry out of the store for a user-initiated re-send.
    pub fn retry(&mut self, key: &CorrelationKey) -> Result<PendingMessage> {
        let idx = self
            .pending
            .iter()
            .position(|e| &e.message.key == key)
            .ok_or_else(|| StoreError::UnknownPending(key.to_string()))?;
        if !self.pending[idx].message.is_failed() {
            return Err(StoreError::NotFailed(key.to_string()));
        }
        Ok(self.pending.remove(idx).message)
    }

    /// Replace the confirmed set with `snapshot` and drop every pending entry
    /// that a confirmed row now accounts for.
    ///
    /// Applying the same snapshot twice leaves the store as applying it once.
    pub fn reconcile(&mut self, snapshot: Vec<Message>) -> ReconcileOutcome {
        self.generation += 1;
        let generation = self.generation;

        let mut confirmed: Vec<Message> = Vec::with_capacity(snapshot.len());
        let mut ids = HashSet::with_capacity(snapshot.len());
        for message in snapshot {
            if !message.is_between(&self.local_user, &self.peer) {
                warn!(id = %message.id, "Dropping message from another conversation");
                continue;
            }
            if ids.insert(message.id.clone()) {
                confirmed.push(message);
            }
        }
        confirmed.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut new_messages = Vec::new();
        for message in &confirmed {
            if self.seen.insert(message.id.clone()) {
                new_messages.push(message.clone());
            }
        }
        if !self.seeded {
            self.seeded = true;
            new_messages.clear();
        }

        self.confirmed = confirmed;
        let matched = self.match_pending();

        debug!(
            generation,
            confirmed = self.confirmed.len(),
            pending = self.pending.len(),
            new = new_messages.len(),
            matched = matched.len(),
            "Reconciled conversation snapshot"
        );

        ReconcileOutcome {
            new_messages,
            matched,
        }
    }

    /// Declare `Sent` entries lost once they have survived `max_polls`
    /// successful polls without a matching row. Returns the expired keys.
    pub fn expire_unconfirmed(&mut self, max_polls: u32) -> Vec<CorrelationKey> {
        let mut expired = Vec::new();
        for entry in &mut self.pending {
            if entry.message.state != PendingState::Sent {
                continue;
            }
            entry.unconfirmed_polls += 1;
            if entry.unconfirmed_polls >= max_polls {
                warn!(
                    key = %entry.message.key,
                    polls = entry.unconfirmed_polls,
                    "Sent message never confirmed, marking failed"
                );
                entry.message.state = PendingState::Failed(FailureReason::Unconfirmed);
                expired.push(entry.message.key.clone());
            }
        }
        expired
    }

    /// Confirmed and unmatched pending messages, oldest first.
    pub fn view(&self) -> ConversationView {
        let mut entries: Vec<ViewEntry> = self
            .confirmed
            .iter()
            .cloned()
            .map(ViewEntry::Confirmed)
            .chain(self.pending.iter().map(|e| ViewEntry::Pending(e.message.clone())))
            .collect();
        // stable: confirmed rows stay ahead of pending ones at equal times
        entries.sort_by_key(|e| e.created_at());
        ConversationView { entries }
    }

    fn entry_mut(&mut self, key: &CorrelationKey) -> Option<&mut PendingEntry> {
        self.pending.iter_mut().find(|e| &e.message.key == key)
    }

    /// Drop every pending entry that some confirmed row matches, whatever
    /// its state. A row may account for several identical entries.
    fn match_pending(&mut self) -> Vec<CorrelationKey> {
        let confirmed = &self.confirmed;
        let tolerance = self.tolerance;
        let mut matched = Vec::new();
        self.pending.retain(|entry| {
            let key = &entry.message.key;
            let best = confirmed
                .iter()
                .filter(|m| key.matches(m, tolerance))
                .min_by_key(|m| key.distance(m));
            match best {
                Some(message) => {
                    debug!(key = %key, id = %message.id, "Pending message confirmed");
                    matched.push(key.clone());
                    false
                }
                None => true,
            }
        });
        matched.sort_by_key(|key| key.client_ts);
        matched
    }
}
