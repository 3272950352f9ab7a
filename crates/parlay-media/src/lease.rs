//! Exclusive ownership of the shared audio device.
//!
//! Recording and playback never run at the same time, so a second
//! acquisition while a lease is live fails fast instead of queueing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::debug;

use crate::error::{MediaError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LeaseKind {
    Capture,
    Playback,
}

#[derive(Debug, Clone, Copy)]
struct Holder {
    id: u64,
    kind: LeaseKind,
}

/// The single owner of the audio hardware. Cheap to clone; all clones share
/// the same slot.
#[derive(Debug, Clone, Default)]
pub struct AudioHardware {
    slot: Arc<Mutex<Option<Holder>>>,
    next_id: Arc<AtomicU64>,
}

impl AudioHardware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, kind: LeaseKind) -> Result<AudioLease> {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(holder) = *slot {
            return Err(MediaError::ResourceUnavailable(format!(
                "audio device already leased for {:?}",
                holder.kind
            )));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        *slot = Some(Holder { id, kind });
        debug!(lease = id, ?kind, "Audio lease acquired");

        Ok(AudioLease {
            id,
            kind,
            slot: self.slot.clone(),
        })
    }

    /// What the device is currently leased for, if anything.
    pub fn current(&self) -> Option<LeaseKind> {
        self.slot
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .map(|h| h.kind)
    }

    pub fn is_free(&self) -> bool {
        self.current().is_none()
    }
}

/// Released when dropped.
#[derive(Debug)]
pub struct AudioLease {
    id: u64,
    kind: LeaseKind,
    slot: Arc<Mutex<Option<Holder>>>,
}

impl AudioLease {
    pub fn kind(&self) -> LeaseKind {
        self.kind
    }
}

impl Drop for AudioLease {
    fn drop(&mut self) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        if slot.map(|h| h.id) == Some(self.id) {
            *slot = None;
            debug!(lease = self.id, kind = ?self.kind, "Audio lease released");
        }
    }
}
