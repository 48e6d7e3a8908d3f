use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};

use crate::types::{AccessFlags, JObject, MethodId};

/// Everything kept for one hooked method.
///
/// The handles are global references owned by the record and released when
/// the hook is uninstalled.
#[derive(Debug)]
pub struct HookRecord {
    pub(crate) method: MethodId,
    pub(crate) backup: MethodId,
    pub(crate) reflected_handle: JObject,
    pub(crate) additional_info: JObject,
    pub(crate) saved_entry_point: usize,
    pub(crate) saved_access_flags: AccessFlags,
}

impl HookRecord {
    /// The hooked method.
    pub fn method(&self) -> MethodId {
        self.method
    }

    /// The original handle: a directly invokable copy of the method as it
    /// was before hooking.
    pub fn backup(&self) -> MethodId {
        self.backup
    }

    /// Reflective `Method`/`Constructor` wrapping the backup, passed to the
    /// handler.
    pub fn reflected_handle(&self) -> JObject {
        self.reflected_handle
    }

    /// The payload given when the hook was installed.
    pub fn additional_info(&self) -> JObject {
        self.additional_info
    }

    /// Entry point of the method before hooking.
    pub fn saved_entry_point(&self) -> usize {
        self.saved_entry_point
    }
}

/// Hook records keyed by hooked method, plus the backups they created.
///
/// Lookups never wait for an install or uninstall in progress: those are
/// serialised by a separate transition lock and only touch the maps to
/// publish or retract a finished record.
#[derive(Default)]
pub(crate) struct HookRegistry {
    records: DashMap<MethodId, Arc<HookRecord>>,
    backups: DashMap<MethodId, MethodId>,
    transitions: Mutex<()>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, method: MethodId) -> Option<Arc<HookRecord>> {
        self.records.get(&method).map(|r| Arc::clone(r.value()))
    }

    /// The hooked method `backup` was cloned from.
    pub fn backup_of(&self, backup: MethodId) -> Option<MethodId> {
        self.backups.get(&backup).map(|r| *r.value())
    }

    /// Serialise installs and uninstalls. Held across host calls, so it must
    /// never be taken on the call path.
    pub fn lock_transitions(&self) -> MutexGuard<'_, ()> {
        self.transitions.lock()
    }

    /// Publish a record and its backup.
    pub fn insert(&self, record: Arc<HookRecord>) {
        self.backups.insert(record.backup, record.method);
        self.records.insert(record.method, record);
    }

    pub fn remove(&self, method: MethodId) -> Option<Arc<HookRecord>> {
        let (_, record) = self.records.remove(&method)?;
        self.backups.remove(&record.backup);
        Some(record)
    }

    pub fn methods(&self) -> Vec<MethodId> {
        self.records.iter().map(|r| *r.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}
