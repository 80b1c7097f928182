// crates/markplay-control/src/registry.rs
//
// One live controller per host.
//
// A host (a page, a window, a card view) may start a new session while the
// previous controller is still wired to the same engine. Registering a new
// controller revokes every earlier lease, and a revoked controller tears itself
// down on its next event instead of fighting the new one for the engine.
//
// Leases are keyed by a fresh Uuid and flagged with an AtomicBool, so the
// controller checks revocation without taking the registry lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use uuid::Uuid;

static GLOBAL: Lazy<Arc<Registry>> = Lazy::new(|| Arc::new(Registry::default()));

#[derive(Debug, Default)]
pub struct Registry {
    /// Live leases. Entries leave on revocation or when the lease drops.
    leases: Mutex<HashMap<Uuid, Arc<AtomicBool>>>,
}

impl Registry {
    /// Process-wide registry for hosts that do not manage their own.
    pub fn global() -> Arc<Registry> {
        Arc::clone(&GLOBAL)
    }

    /// Revoke every live lease, then hand out a new one.
    pub fn register(self: &Arc<Self>) -> Lease {
        let id      = Uuid::new_v4();
        let revoked = Arc::new(AtomicBool::new(false));

        let mut leases = self.leases.lock();
        for (old, flag) in leases.drain() {
            flag.store(true, Ordering::SeqCst);
            log::info!("[registry] revoked session {old}");
        }
        leases.insert(id, Arc::clone(&revoked));
        log::debug!("[registry] registered session {id}");

        Lease { id, revoked, registry: Arc::downgrade(self) }
    }

    pub fn live_count(&self) -> usize {
        self.leases.lock().len()
    }

    fn release(&self, id: &Uuid) {
        self.leases.lock().remove(id);
    }
}

/// A controller's registration. Dropping it releases the slot.
#[derive(Debug)]
pub struct Lease {
    id:       Uuid,
    revoked:  Arc<AtomicBool>,
    registry: Weak<Registry>,
}

impl Lease {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked.load(Ordering::SeqCst)
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(reg) = self.registry.upgrade() {
            reg.release(&self.id);
        }
    }
}
