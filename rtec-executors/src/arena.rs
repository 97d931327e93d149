//!
//! The Component Arena resolves opaque component ids to the proxies an
//! execution context invokes.
//!
//! Execution contexts never hold on to a component directly through the
//! administrative surface.  Callers name components by [`ComponentId`] and
//! the arena is the indirection table turning that id into a
//! [`ComponentProxy`].  A slot that is freed bumps its generation so stale
//! ids never resolve to a newer component.
//!

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use rtec_core::{ComponentId, ComponentProxy};

struct Slot {
    generation: u32,
    proxy: Option<Arc<dyn ComponentProxy>>,
}

/// A thread-safe slot table of components
#[derive(Default)]
pub struct ComponentArena {
    slots: RwLock<Vec<Slot>>,
}

impl ComponentArena {
    /// Create a new empty arena
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a component and return the id it can be resolved with
    pub fn insert(&self, proxy: Arc<dyn ComponentProxy>) -> ComponentId {
        let mut slots = self.write();
        if let Some(index) = slots.iter().position(|slot| slot.proxy.is_none()) {
            let slot = &mut slots[index];
            slot.proxy = Some(proxy);
            return ComponentId::from_parts(index as u32, slot.generation);
        }

        slots.push(Slot {
            generation: 0,
            proxy: Some(proxy),
        });
        ComponentId::from_parts((slots.len() - 1) as u32, 0)
    }

    /// Remove a component from the arena, returning its proxy.
    ///
    /// The id of the removed component never resolves again.
    pub fn remove(&self, id: ComponentId) -> Option<Arc<dyn ComponentProxy>> {
        let mut slots = self.write();
        let slot = slots.get_mut(id.index() as usize)?;
        if slot.generation != id.generation() {
            return None;
        }
        let proxy = slot.proxy.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        Some(proxy)
    }

    /// Resolve an id to the proxy of the component it names
    pub fn resolve(&self, id: ComponentId) -> Option<Arc<dyn ComponentProxy>> {
        if id.is_nil() {
            return None;
        }
        let slots = self.read();
        let slot = slots.get(id.index() as usize)?;
        if slot.generation != id.generation() {
            return None;
        }
        slot.proxy.clone()
    }

    /// Whether the id resolves to a component
    pub fn contains(&self, id: ComponentId) -> bool {
        self.resolve(id).is_some()
    }

    /// The number of live components
    pub fn len(&self) -> usize {
        self.read().iter().filter(|slot| slot.proxy.is_some()).count()
    }

    /// Whether the arena holds no live component
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Slot>> {
        self.slots.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Slot>> {
        self.slots.write().unwrap_or_else(PoisonError::into_inner)
    }
}
