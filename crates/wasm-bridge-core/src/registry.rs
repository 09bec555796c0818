//! Instance registry.
//!
//! Guests identify themselves on every host call by echoing back the
//! identifier they were handed at instantiation. The [`InstanceRegistry`]
//! issues those identifiers and maps them back to the [`InstanceHandle`] of
//! the calling instance.
//!
//! Identifiers are drawn from the OS random source so that one guest cannot
//! predict the identifier of another instance running in the same process.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::{Mutex, MutexGuard};
use rand::RngCore;
use rand::rngs::OsRng;
use tracing::{debug, warn};

use wasm_bridge_common::BridgeError;

use crate::context::CallContext;

/// Opaque identifier a guest uses to name its own instance.
pub type InstanceId = i32;

/// One live guest execution context as seen by host functions.
#[derive(Debug, Default)]
pub struct InstanceHandle {
    context: Mutex<CallContext>,
}

impl InstanceHandle {
    pub fn new(context: CallContext) -> Self {
        Self {
            context: Mutex::new(context),
        }
    }

    /// Lock the call context.
    ///
    /// Only the thread running the owning instance drives its host calls, so
    /// the lock is uncontended in practice.
    pub fn context(&self) -> MutexGuard<'_, CallContext> {
        self.context.lock()
    }
}

/// Process-wide mapping from [`InstanceId`] to [`InstanceHandle`].
///
/// Backed by a sharded map: lookups for one instance never wait on an
/// unrelated instance being registered or released.
#[derive(Debug, Default)]
pub struct InstanceRegistry {
    instances: DashMap<InstanceId, Arc<InstanceHandle>>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handle under a fresh random identifier.
    pub fn register(&self, handle: Arc<InstanceHandle>) -> Result<InstanceId, BridgeError> {
        self.register_with(handle, random_identifier)
    }

    fn register_with(
        &self,
        handle: Arc<InstanceHandle>,
        mut sample: impl FnMut() -> Result<InstanceId, BridgeError>,
    ) -> Result<InstanceId, BridgeError> {
        loop {
            let ident = sample()?;

            match self.instances.entry(ident) {
                Entry::Occupied(_) => {
                    debug!(ident, "Instance identifier collision, resampling");
                }
                Entry::Vacant(slot) => {
                    slot.insert(handle);
                    debug!(ident, "Instance registered");
                    return Ok(ident);
                }
            }
        }
    }

    /// Look up the handle registered under `ident`.
    ///
    /// With `requires_fresh_slot`, also fails if the instance still holds an
    /// undrained result.
    pub fn resolve(
        &self,
        ident: InstanceId,
        requires_fresh_slot: bool,
    ) -> Result<Arc<InstanceHandle>, BridgeError> {
        // Clone out of the map so the shard guard is not held by the caller
        let handle = self
            .instances
            .get(&ident)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(BridgeError::UnknownInstance { ident })?;

        if requires_fresh_slot && handle.context().has_pending_result() {
            return Err(BridgeError::ResultInProgress);
        }

        Ok(handle)
    }

    /// Remove `ident`. Releasing an unknown identifier is a no-op.
    pub fn release(&self, ident: InstanceId) {
        if let Some((_, handle)) = self.instances.remove(&ident) {
            if handle.context().has_pending_result() {
                warn!(ident, "Instance released with an undrained result");
            }
            debug!(ident, "Instance released");
        }
    }

    /// Number of registered instances.
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

/// Registration that releases its identifier when dropped.
#[derive(Debug)]
pub struct Registration<'r> {
    registry: &'r InstanceRegistry,
    ident: InstanceId,
}

impl<'r> Registration<'r> {
    /// Register `handle` and tie the identifier's lifetime to the guard.
    pub fn new(
        registry: &'r InstanceRegistry,
        handle: Arc<InstanceHandle>,
    ) -> Result<Self, BridgeError> {
        let ident = registry.register(handle)?;
        Ok(Self { registry, ident })
    }

    pub fn ident(&self) -> InstanceId {
        self.ident
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.registry.release(self.ident);
    }
}

/// Sample uniformly from `[0, 2^31)` using the OS random source.
fn random_identifier() -> Result<InstanceId, BridgeError> {
    let mut bytes = [0u8; 4];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| BridgeError::IdentifierGeneration {
            reason: e.to_string(),
        })?;

    Ok(i32::from_le_bytes(bytes) & i32::MAX)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::context::FfiResult;

    fn handle() -> Arc<InstanceHandle> {
        Arc::new(InstanceHandle::default())
    }

    #[test]
    fn test_identifiers_are_unique_and_non_negative() {
        let registry = InstanceRegistry::new();
        let mut seen = HashSet::new();

        for _ in 0..1000 {
            let ident = registry.register(handle()).unwrap();
            assert!(ident >= 0);
            assert!(seen.insert(ident), "duplicate identifier {ident}");
        }

        assert_eq!(registry.len(), 1000);
    }

    #[test]
    fn test_resolve_returns_registered_handle() {
        let registry = InstanceRegistry::new();
        let original = handle();

        let ident = registry.register(Arc::clone(&original)).unwrap();
        let resolved = registry.resolve(ident, false).unwrap();

        assert!(Arc::ptr_eq(&original, &resolved));
    }

    #[test]
    fn test_resolve_after_release_fails() {
        let registry = InstanceRegistry::new();
        let ident = registry.register(handle()).unwrap();

        registry.release(ident);

        assert_eq!(
            registry.resolve(ident, false).unwrap_err(),
            BridgeError::UnknownInstance { ident }
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_release_is_idempotent() {
        let registry = InstanceRegistry::new();
        let ident = registry.register(handle()).unwrap();

        registry.release(ident);
        registry.release(ident);
        registry.release(12345);

        assert!(registry.is_empty());
    }

    #[test]
    fn test_release_with_pending_result() {
        let registry = InstanceRegistry::new();
        let h = handle();
        let ident = registry.register(Arc::clone(&h)).unwrap();
        h.context().set_ffi_result(FfiResult::empty()).unwrap();

        registry.release(ident);
        assert!(registry.resolve(ident, false).is_err());
    }

    #[test]
    fn test_resolve_requires_fresh_slot() {
        let registry = InstanceRegistry::new();
        let h = handle();
        let ident = registry.register(Arc::clone(&h)).unwrap();

        h.context()
            .set_ffi_result(FfiResult::Payload(b"pending".to_vec()))
            .unwrap();

        assert_eq!(
            registry.resolve(ident, true).unwrap_err(),
            BridgeError::ResultInProgress
        );
        // Draining still resolves
        assert!(registry.resolve(ident, false).is_ok());

        h.context().take_ffi_result().unwrap();
        assert!(registry.resolve(ident, true).is_ok());
    }

    #[test]
    fn test_collision_is_resampled() {
        let registry = InstanceRegistry::new();
        let first = registry.register_with(handle(), || Ok(7)).unwrap();
        assert_eq!(first, 7);

        let mut candidates = vec![7, 7, 9].into_iter();
        let second = registry
            .register_with(handle(), || Ok(candidates.next().unwrap()))
            .unwrap();

        assert_eq!(second, 9);
        assert_eq!(candidates.len(), 0);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_randomness_failure_propagates() {
        let registry = InstanceRegistry::new();
        let result = registry.register_with(handle(), || {
            Err(BridgeError::IdentifierGeneration {
                reason: "no entropy".into(),
            })
        });

        assert!(matches!(
            result,
            Err(BridgeError::IdentifierGeneration { .. })
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_registration_guard_releases() {
        let registry = InstanceRegistry::new();

        let ident = {
            let registration = Registration::new(&registry, handle()).unwrap();
            assert!(registry.resolve(registration.ident(), false).is_ok());
            registration.ident()
        };

        assert!(registry.resolve(ident, false).is_err());
    }

    #[test]
    fn test_concurrent_register_and_release() {
        let registry = Arc::new(InstanceRegistry::new());

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        let ident = registry.register(handle()).unwrap();
                        assert!(registry.resolve(ident, true).is_ok());
                        registry.release(ident);
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }

        assert!(registry.is_empty());
    }
}
