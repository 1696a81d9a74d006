//! storage seam for the ledger
//!
//! every write runs as a unit of work against a staged copy of the state.
//! the copy replaces the live state only when the closure succeeds, so a
//! failed operation leaves nothing behind. writers are serialised, which is
//! what stops two payments racing past the same outstanding balance.

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::errors::{LedgerError, Result};
use crate::events::{AuditEntry, EventStore};
use crate::state::LedgerState;
use crate::types::UserId;

pub trait LedgerStore: Send + Sync {
    /// run `f` against a consistent view of the state
    fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&LedgerState) -> T;

    /// run `f` as one atomic write; events it emits become audit entries on commit
    fn atomically<T, F>(&self, actor: UserId, now: DateTime<Utc>, f: F) -> Result<T>
    where
        F: FnOnce(&mut LedgerState, &mut EventStore) -> Result<T>;
}

/// process-local store
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<LedgerState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, LedgerState>> {
        self.state.lock().map_err(|e| LedgerError::StorageError {
            message: format!("ledger state lock poisoned: {}", e),
        })
    }
}

impl LedgerStore for InMemoryStore {
    fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&LedgerState) -> T,
    {
        let guard = self.lock()?;
        Ok(f(&guard))
    }

    fn atomically<T, F>(&self, actor: UserId, now: DateTime<Utc>, f: F) -> Result<T>
    where
        F: FnOnce(&mut LedgerState, &mut EventStore) -> Result<T>,
    {
        let mut guard = self.lock()?;
        let mut staged = guard.clone();
        let mut events = EventStore::new();

        let value = f(&mut staged, &mut events)?;

        staged.audit.extend(events.take_events().into_iter().map(|event| {
            debug!(action = event.action(), actor = %actor, "audit entry committed");
            AuditEntry {
                id: Uuid::new_v4(),
                actor,
                timestamp: now,
                event,
            }
        }));
        *guard = staged;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::SchoolClass;
    use crate::decimal::Money;
    use crate::events::Event;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_commit_appends_audit() {
        let store = InMemoryStore::new();
        let actor = Uuid::new_v4();
        let class = SchoolClass::new("7B");
        let class_id = class.id;

        store
            .atomically(actor, now(), |state, events| {
                state.classes.insert(class.id, class);
                events.emit(Event::ClassBilled {
                    class_id,
                    fee_type_id: None,
                    fee_count: 0,
                    amount: Money::from_major(10),
                });
                Ok(())
            })
            .unwrap();

        let (classes, audit) = store.read(|s| (s.classes.len(), s.audit.clone())).unwrap();
        assert_eq!(classes, 1);
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].actor, actor);
        assert_eq!(audit[0].timestamp, now());
    }

    #[test]
    fn test_failed_unit_of_work_leaves_no_trace() {
        let store = InMemoryStore::new();
        let class = SchoolClass::new("7B");
        let class_id = class.id;

        let result: Result<()> = store.atomically(Uuid::new_v4(), now(), |state, events| {
            state.classes.insert(class.id, class);
            events.emit(Event::ClassBilled {
                class_id,
                fee_type_id: None,
                fee_count: 0,
                amount: Money::from_major(10),
            });
            Err(LedgerError::MissingReason)
        });

        assert_eq!(result, Err(LedgerError::MissingReason));
        assert!(store.read(|s| s.classes.is_empty() && s.audit.is_empty()).unwrap());
    }
}
