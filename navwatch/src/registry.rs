//! Status registry: the single store of [ServiceStatus] records for a session.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::status::ServiceStatus;

#[derive(Debug, Default)]
struct Entries {
    statuses: HashMap<String, ServiceStatus>,
    epoch: u64,
}

/// Map of service id to the last known [ServiceStatus].
///
/// Clones share the same map. The lock is only held for the duration of a single
/// get/set so it is never held across an await or a subscriber callback.
///
/// Every [clear_all](Self::clear_all) starts a new epoch. A writer that captured the epoch
/// before starting slow work can use [set_if_epoch](Self::set_if_epoch) so its result is
/// dropped when the registry was cleared in the meantime.
#[derive(Debug, Clone, Default)]
pub struct StatusRegistry {
    entries: Arc<Mutex<Entries>>,
}

impl StatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Last known status, or an `Unknown` status stamped now when the id was never set
    pub fn get(&self, id: &str) -> ServiceStatus {
        self.lookup(id)
            .unwrap_or_else(|| ServiceStatus::unknown(id))
    }

    /// Last known status, if there is one
    pub fn lookup(&self, id: &str) -> Option<ServiceStatus> {
        self.lock().statuses.get(id).cloned()
    }

    /// Overwrite the status for `id`
    pub fn set(&self, id: &str, status: ServiceStatus) {
        self.lock().statuses.insert(id.to_owned(), status);
    }

    /// Overwrite the status for `id` unless the registry was cleared since `epoch`.
    /// Returns true when stored.
    pub fn set_if_epoch(&self, id: &str, status: ServiceStatus, epoch: u64) -> bool {
        let mut entries = self.lock();
        if entries.epoch != epoch {
            return false;
        }
        entries.statuses.insert(id.to_owned(), status);
        true
    }

    /// Current epoch, see [set_if_epoch](Self::set_if_epoch)
    pub fn epoch(&self) -> u64 {
        self.lock().epoch
    }

    /// Remove every entry and start a new epoch
    pub fn clear_all(&self) {
        let mut entries = self.lock();
        entries.statuses.clear();
        entries.epoch += 1;
    }

    pub fn len(&self) -> usize {
        self.lock().statuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().statuses.is_empty()
    }

    /// Copy of every entry sorted by id
    pub fn snapshot(&self) -> Vec<ServiceStatus> {
        let mut statuses = self.lock().statuses.values().cloned().collect::<Vec<_>>();
        statuses.sort_by(|a, b| a.id.cmp(&b.id));
        statuses
    }
}
