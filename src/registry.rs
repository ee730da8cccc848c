/*!
Process-scoped interface registry.

Descriptors are registered once, before any dispatch, and are read-only
afterwards. A descriptor is fully constructed before it is published, so
concurrent readers never observe a partial one.
*/

use std::collections::HashMap;
use std::sync::{
    Arc,
    OnceLock,
    RwLock,
};

use crate::error::{
    BridgeError,
    Result,
};
use crate::interface::{
    InterfaceDescriptor,
    InterfaceId,
};

/// Mapping from interface identifier to its immutable descriptor.
#[derive(Default)]
pub struct InterfaceRegistry {
    entries: RwLock<HashMap<InterfaceId, Arc<InterfaceDescriptor>>>,
}

impl InterfaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry, created on first use.
    pub fn global() -> &'static InterfaceRegistry {
        static GLOBAL: OnceLock<InterfaceRegistry> = OnceLock::new();
        GLOBAL.get_or_init(InterfaceRegistry::new)
    }

    /// Registers a descriptor.
    ///
    /// Idempotent per identifier: registering the same identifier again with
    /// an identical descriptor is a no-op. A different descriptor under the
    /// same identifier fails with [`BridgeError::ConflictingInterface`].
    pub fn register(&self, descriptor: InterfaceDescriptor) -> Result<()> {
        let id = descriptor.id();
        let mut entries = self.entries.write().expect("interface registry lock poisoned");
        match entries.get(&id) {
            Some(existing) if **existing == descriptor => Ok(()),
            Some(_) => Err(BridgeError::ConflictingInterface { id }),
            None => {
                tracing::debug!(%id, interface = descriptor.name(), "registered interface");
                entries.insert(id, Arc::new(descriptor));
                Ok(())
            }
        }
    }

    /// Looks up the descriptor for an identifier. A miss is a value, not a
    /// failure; dispatch layers translate it to their "not supported" form.
    pub fn resolve(&self, id: InterfaceId) -> Option<Arc<InterfaceDescriptor>> {
        self.entries
            .read()
            .expect("interface registry lock poisoned")
            .get(&id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("interface registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
