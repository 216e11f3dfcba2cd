use std::sync::Arc;

use classlink_base::id::{ClassId, LoaderId};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;

use crate::class::{Class, LoadedClass};

/// The identity table: at most one published class per `(descriptor, defining loader)`.
///
/// Classes live in an arena indexed by [`ClassId`] and are never removed. The lookup lock is
/// always taken before the arena lock.
#[derive(Debug, Default)]
pub(crate) struct ClassTable {
    /// Descriptor -> every published class with that descriptor, one per defining loader
    lookup: Mutex<IndexMap<Box<str>, SmallVec<[ClassId; 2]>>>,
    arena: RwLock<Vec<Arc<Class>>>,
}
impl ClassTable {
    pub(crate) fn get(&self, id: ClassId) -> Option<Arc<Class>> {
        self.arena.read().get(id.index()).cloned()
    }

    pub(crate) fn lookup(&self, descriptor: &str, loader: Option<LoaderId>) -> Option<Arc<Class>> {
        let lookup = self.lookup.lock();
        let ids = lookup.get(descriptor)?;
        let arena = self.arena.read();
        ids.iter()
            .map(|id| &arena[id.index()])
            .find(|class| class.loader == loader)
            .cloned()
    }

    /// Publish the candidate unless a class with the same descriptor and defining loader is
    /// already present. Returns the published class and whether it was the candidate.
    ///
    /// The candidate only receives an id if it is published, so a losing candidate leaves no
    /// trace.
    pub(crate) fn insert_if_absent(&self, candidate: LoadedClass) -> (Arc<Class>, bool) {
        let mut lookup = self.lookup.lock();
        let ids = lookup.entry(candidate.descriptor.clone()).or_default();

        let mut arena = self.arena.write();
        if let Some(existing) = ids
            .iter()
            .map(|id| &arena[id.index()])
            .find(|class| class.loader == candidate.loader)
        {
            return (Arc::clone(existing), false);
        }

        let id = ClassId::new_unchecked(arena.len() as u32);
        // The first class published is the metaclass, which is its own class
        let meta_class = arena.first().map_or(id, |class| class.id);
        let class = Arc::new(Class::new(id, meta_class, candidate));
        arena.push(Arc::clone(&class));
        ids.push(id);

        (class, true)
    }

    pub(crate) fn len(&self) -> usize {
        self.arena.read().len()
    }

    /// Snapshot of every published class, in publication order
    pub(crate) fn classes(&self) -> Vec<Arc<Class>> {
        self.arena.read().clone()
    }
}
