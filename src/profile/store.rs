//! Ten persisted profile slots.

use super::record::{ProfileRecord, ProfileSummary, RECORD_LEN};
use crate::error::{ProfilerError, StorageError};
use crate::storage::KeyValueStore;
use crate::types::{ProfileId, Segment, Segments, MAX_PROFILES};
use log::{error, info, warn};

#[derive(Debug, Clone, PartialEq)]
enum Slot {
    Empty,
    Stored(ProfileRecord),
    /// Failed verification. Never executed until overwritten.
    Corrupt,
}

/// A verified profile ready for execution.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedProfile {
    pub id: ProfileId,
    pub name: String,
    pub segments: Segments,
}

pub struct ProfileStore<K: KeyValueStore> {
    backend: K,
    slots: [Slot; MAX_PROFILES],
}

fn slot_key(id: ProfileId) -> String {
    format!("profile{}", id.value())
}

fn checked_id(id: u8) -> Result<ProfileId, ProfilerError> {
    ProfileId::new(id).ok_or_else(|| ProfilerError::validation(format!("profile id {} out of range 0-9", id)))
}

impl<K: KeyValueStore> ProfileStore<K> {
    /// Open the store and restore every slot from the backend.
    pub fn new(backend: K) -> Self {
        let mut store = Self {
            backend,
            slots: core::array::from_fn(|_| Slot::Empty),
        };
        store.restore();
        store
    }

    fn restore(&mut self) {
        for id in ProfileId::all() {
            let mut buf = [0u8; RECORD_LEN];
            let slot = match self.backend.get_exact(&slot_key(id), &mut buf) {
                Ok(true) => match ProfileRecord::from_bytes(&buf) {
                    Ok(record) if record.id() == id => Slot::Stored(record),
                    Ok(record) => {
                        error!("Profile slot {} holds record for id {}, ignoring", id, record.id());
                        Slot::Corrupt
                    }
                    Err(e) => {
                        error!("Profile slot {} failed verification: {}", id, e);
                        Slot::Corrupt
                    }
                },
                Ok(false) => Slot::Empty,
                Err(e) => {
                    warn!("Failed to read profile slot {}: {}", id, e);
                    Slot::Empty
                }
            };
            self.slots[id.index()] = slot;
        }
        info!("📂 Restored {} stored profiles", self.profile_count());
    }

    /// Validate, encode and persist a profile, replacing the slot.
    pub fn store(&mut self, id: u8, name: &str, segments: &[Segment]) -> Result<ProfileSummary, ProfilerError> {
        let id = checked_id(id)?;
        let record = ProfileRecord::build(id, name, segments)?;

        self.backend.put(&slot_key(id), &record.to_bytes())?;

        let summary = record.summary();
        info!(
            "💾 Profile {} stored: '{}' ({} segments, {}s)",
            id, summary.name, summary.segment_count, summary.total_duration
        );
        self.slots[id.index()] = Slot::Stored(record);
        Ok(summary)
    }

    /// Verify a slot and return its segments in decimal bar.
    pub fn load(&mut self, id: u8) -> Result<LoadedProfile, ProfilerError> {
        let id = ProfileId::new(id)
            .ok_or_else(|| ProfilerError::integrity(format!("profile id {} out of range", id)))?;

        let record = match &self.slots[id.index()] {
            Slot::Stored(record) => record,
            Slot::Empty => return Err(ProfilerError::integrity(format!("profile {} is empty", id))),
            Slot::Corrupt => return Err(ProfilerError::integrity(format!("profile {} is corrupt", id))),
        };

        if !record.checksum_valid() {
            error!("Profile checksum validation failed for id {}", id);
            self.slots[id.index()] = Slot::Corrupt;
            return Err(ProfilerError::integrity(format!("profile {} checksum mismatch", id)));
        }

        Ok(LoadedProfile {
            id,
            name: record.name().to_string(),
            segments: record.segments(),
        })
    }

    /// Empty every slot. Memory is always cleared; the first backend error is reported.
    pub fn clear_all(&mut self) -> Result<(), ProfilerError> {
        let mut first_error: Option<StorageError> = None;
        for id in ProfileId::all() {
            self.slots[id.index()] = Slot::Empty;
            if let Err(e) = self.backend.remove(&slot_key(id)) {
                warn!("Failed to remove profile slot {}: {}", id, e);
                first_error.get_or_insert(e);
            }
        }
        info!("🗑️ All profiles cleared");
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    pub fn profile_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot, Slot::Stored(_)))
            .count()
    }

    pub fn summaries(&self) -> Vec<ProfileSummary> {
        self.slots
            .iter()
            .filter_map(|slot| match slot {
                Slot::Stored(record) => Some(record.summary()),
                _ => None,
            })
            .collect()
    }

    /// Ids of slots that failed verification.
    pub fn corrupt_ids(&self) -> Vec<u8> {
        ProfileId::all()
            .filter(|id| self.slots[id.index()] == Slot::Corrupt)
            .map(ProfileId::value)
            .collect()
    }

    pub fn backend(&self) -> &K {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut K {
        &mut self.backend
    }

    #[cfg(test)]
    pub(crate) fn corrupt_in_memory(&mut self, id: u8) {
        if let Slot::Stored(record) = &mut self.slots[id as usize] {
            record.corrupt_checksum();
        }
    }
}
