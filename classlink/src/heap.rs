//! The seam between the linker and the object heap.
//!
//! The linker only needs to allocate a handful of objects (interned strings, loader objects)
//! and to report which classes and objects it keeps alive. Everything else about the heap is up
//! to the implementation, [`crate::gc::Gc`] being the default one.

use std::num::NonZeroU32;

use classlink_base::id::ClassId;

use crate::class::Class;

/// A handle to a heap object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef(NonZeroU32);
impl ObjectRef {
    /// `None` for the null reference
    #[must_use]
    pub fn new(raw: u32) -> Option<ObjectRef> {
        NonZeroU32::new(raw).map(ObjectRef)
    }

    #[must_use]
    pub fn get(self) -> u32 {
        self.0.get()
    }

    /// Encode an optional reference the way it is stored in an object slot
    #[must_use]
    pub fn to_slot(value: Option<ObjectRef>) -> [u8; 4] {
        value.map_or(0, ObjectRef::get).to_le_bytes()
    }
}

pub trait Heap: Send + Sync {
    /// Allocate a zeroed instance of a linked, non-array class
    fn alloc_object(&self, class: &Class) -> ObjectRef;

    /// Allocate a zeroed array of a linked array class.
    /// `None` if an array of that length can't be represented.
    fn alloc_array(&self, class: &Class, length: u32) -> Option<ObjectRef>;

    /// Store a reference into the slot at `offset`
    fn store_reference(&self, object: ObjectRef, offset: u32, value: Option<ObjectRef>);

    /// Copy raw bytes into the object at `offset`
    fn store_bytes(&self, object: ObjectRef, offset: u32, bytes: &[u8]);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Root {
    Class(ClassId),
    Object(ObjectRef),
}

pub trait RootVisitor {
    fn visit_root(&mut self, root: Root);
}
impl<F: FnMut(Root)> RootVisitor for F {
    fn visit_root(&mut self, root: Root) {
        self(root)
    }
}
