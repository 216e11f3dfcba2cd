//! Resolution of the symbolic type and string references in a container.
//!
//! Each registered container has a [`ReferenceCache`] with one write-once slot per type and per
//! string index. Only successful resolutions are stored, so a reference to a class which can't be
//! found yet is retried the next time it is resolved.

use std::sync::Arc;

use classlink_base::{
    container::Container,
    id::{ClassId, StringIndex, TypeIndex},
    ContainerError,
};
use once_cell::sync::OnceCell;

use crate::{
    class::Class,
    class_linker::ClassLinker,
    heap::{ObjectRef, Root, RootVisitor},
    LinkError,
};

#[derive(Debug)]
pub struct ReferenceCache {
    types: Box<[OnceCell<ClassId>]>,
    strings: Box<[OnceCell<ObjectRef>]>,
}
impl ReferenceCache {
    #[must_use]
    pub fn new(container: &Container) -> ReferenceCache {
        ReferenceCache {
            types: (0..container.type_count()).map(|_| OnceCell::new()).collect(),
            strings: (0..container.string_count())
                .map(|_| OnceCell::new())
                .collect(),
        }
    }

    #[must_use]
    pub fn resolved_type(&self, idx: TypeIndex) -> Option<ClassId> {
        self.types.get(idx.index())?.get().copied()
    }

    #[must_use]
    pub fn resolved_string(&self, idx: StringIndex) -> Option<ObjectRef> {
        self.strings.get(idx.index())?.get().copied()
    }

    /// Number of type slots which have been filled
    #[must_use]
    pub fn resolved_type_count(&self) -> usize {
        self.types.iter().filter(|x| x.get().is_some()).count()
    }

    fn store_type(&self, idx: TypeIndex, id: ClassId) -> ClassId {
        match self.types.get(idx.index()) {
            // If another thread got here first it stored the same class, since the identity
            // table only publishes one class per descriptor and loader
            Some(slot) => *slot.get_or_init(|| id),
            None => id,
        }
    }

    fn store_string(&self, idx: StringIndex, object: ObjectRef) -> ObjectRef {
        match self.strings.get(idx.index()) {
            Some(slot) => *slot.get_or_init(|| object),
            None => object,
        }
    }

    pub(crate) fn visit_roots(&self, visitor: &mut impl RootVisitor) {
        for id in self.types.iter().filter_map(OnceCell::get) {
            visitor.visit_root(Root::Class(*id));
        }

        for object in self.strings.iter().filter_map(OnceCell::get) {
            visitor.visit_root(Root::Object(*object));
        }
    }
}

/// Resolve a type reference in the container the referring class was loaded from, using the
/// referring class's defining loader
pub(crate) fn resolve_class(
    linker: &ClassLinker,
    referring: &Arc<Class>,
    idx: TypeIndex,
) -> Result<ClassId, LinkError> {
    let container_id = referring
        .container()
        .ok_or(LinkError::NoContainer(referring.id()))?;
    let registered = linker.find_reference_cache(container_id)?;

    if let Some(id) = registered.cache().resolved_type(idx) {
        return Ok(id);
    }

    let descriptor = registered.container().get_type_descriptor(idx)?;
    tracing::trace!("Resolving {} from {}", descriptor, referring.descriptor());

    let id = linker.find_linked_class(descriptor, referring.loader())?;
    Ok(registered.cache().store_type(idx, id))
}

/// Resolve a string reference into the interned string object
pub(crate) fn resolve_string(
    linker: &ClassLinker,
    referring: &Arc<Class>,
    idx: StringIndex,
) -> Result<ObjectRef, LinkError> {
    let container_id = referring
        .container()
        .ok_or(LinkError::NoContainer(referring.id()))?;
    let registered = linker.find_reference_cache(container_id)?;

    if let Some(object) = registered.cache().resolved_string(idx) {
        return Ok(object);
    }

    let bytes = registered
        .container()
        .get_bytes(idx)
        .ok_or(ContainerError::BadStringIndex(idx))?;
    let object = linker.intern_string(bytes)?;

    Ok(registered.cache().store_string(idx, object))
}

#[cfg(test)]
mod tests {
    use classlink_base::ContainerBuilder;

    use super::*;

    #[test]
    fn test_cache_slots() {
        let mut builder = ContainerBuilder::new("test");
        let object = builder.type_descriptor("Ljava/lang/Object;");
        let hello = builder.string("hello");
        let container = builder.build().unwrap();

        let cache = ReferenceCache::new(&container);
        assert_eq!(cache.resolved_type(object), None);
        assert_eq!(cache.resolved_string(hello), None);

        let id = ClassId::new_unchecked(3);
        assert_eq!(cache.store_type(object, id), id);
        // Write once
        assert_eq!(cache.store_type(object, ClassId::new_unchecked(4)), id);
        assert_eq!(cache.resolved_type(object), Some(id));
        assert_eq!(cache.resolved_type_count(), 1);

        let string = ObjectRef::new(7).unwrap();
        assert_eq!(cache.store_string(hello, string), string);
        assert_eq!(cache.resolved_string(hello), Some(string));

        let mut roots = Vec::new();
        cache.visit_roots(&mut |root: Root| roots.push(root));
        assert_eq!(roots, vec![Root::Class(id), Root::Object(string)]);

        // Out of range indices are never cached
        assert_eq!(cache.resolved_type(TypeIndex(100)), None);
    }
}
