use std::hash::{Hash, Hasher};

/// Identity of a published type. This is an index into the linker's class arena, so two equal
/// ids always refer to the same `(descriptor, defining loader)` pair.
#[derive(Debug, Copy, Clone, PartialOrd, Ord)]
pub struct ClassId(u32);
impl ClassId {
    #[must_use]
    pub fn new_unchecked(id: u32) -> ClassId {
        ClassId(id)
    }

    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

// This only really holds true if they're from the same linker instance
impl PartialEq for ClassId {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl Eq for ClassId {}
impl Hash for ClassId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u32(self.0)
    }
}
#[cfg(feature = "implementation-cheaper-map-hashing")]
impl nohash_hasher::IsEnabled for ClassId {}

/// A user defined loader. The bootstrap loader has no id and is represented by `None` wherever
/// a loader is accepted.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct LoaderId(u32);
impl LoaderId {
    #[must_use]
    pub fn new_unchecked(id: u32) -> LoaderId {
        LoaderId(id)
    }

    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}
impl Hash for LoaderId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u32(self.0)
    }
}
#[cfg(feature = "implementation-cheaper-map-hashing")]
impl nohash_hasher::IsEnabled for LoaderId {}

#[derive(Debug, Copy, Clone, Eq, PartialEq, PartialOrd, Ord)]
pub struct ContainerId(u32);
impl ContainerId {
    #[must_use]
    pub fn new_unchecked(id: u32) -> ContainerId {
        ContainerId(id)
    }

    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}
impl Hash for ContainerId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u32(self.0)
    }
}
#[cfg(feature = "implementation-cheaper-map-hashing")]
impl nohash_hasher::IsEnabled for ContainerId {}

/// Index of a type descriptor inside a single container
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct TypeIndex(pub u32);
impl TypeIndex {
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of a string inside a single container
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct StringIndex(pub u32);
impl StringIndex {
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// This is an index into the methods
/// This is not meaningful without a class
pub type MethodIndex = u16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodId {
    class_id: ClassId,
    method_index: MethodIndex,
}
impl MethodId {
    #[must_use]
    pub fn unchecked_compose(class_id: ClassId, method_index: MethodIndex) -> Self {
        Self {
            class_id,
            method_index,
        }
    }

    #[must_use]
    pub fn decompose(self) -> (ClassId, MethodIndex) {
        (self.class_id, self.method_index)
    }

    #[must_use]
    pub fn class_id(self) -> ClassId {
        self.class_id
    }
}

#[must_use]
pub fn is_array_class(first: &str) -> bool {
    first.starts_with('[')
}
