use crate::class::{align_up, Class, Field, ReferenceOffsets, OBJECT_HEADER_SIZE, REFERENCE_SIZE};

#[derive(Debug)]
pub(crate) struct FieldLayout {
    pub(crate) instance_size: u32,
    pub(crate) reference_offsets: ReferenceOffsets,
    pub(crate) static_size: u32,
    pub(crate) static_reference_offsets: ReferenceOffsets,
}

/// Assign offsets to the instance fields, after the super class's, and to the static fields in
/// the class's own static storage
pub(crate) fn link_fields(class: &Class, super_class: Option<&Class>) -> FieldLayout {
    let start = super_class
        .and_then(Class::instance_size)
        .unwrap_or(OBJECT_HEADER_SIZE);

    let instance_fields = class.fields().iter().filter(|f| !f.is_static());
    let (instance_size, own_references) = lay_out(instance_fields, start);

    let mut references: Vec<u32> = super_class
        .and_then(Class::linked)
        .map(|linked| linked.reference_offsets().iter().collect())
        .unwrap_or_default();
    references.extend(own_references);

    let static_fields = class.fields().iter().filter(|f| f.is_static());
    let (static_size, static_references) = lay_out(static_fields, 0);

    tracing::trace!(
        "{} instance size {} static size {}",
        class.descriptor(),
        instance_size,
        static_size
    );

    FieldLayout {
        instance_size,
        reference_offsets: ReferenceOffsets::from_offsets(references),
        static_size,
        static_reference_offsets: ReferenceOffsets::from_offsets(static_references),
    }
}

/// References first, in declaration order, then primitives from largest to smallest. Smaller
/// fields are moved into any alignment gap in front of a larger one.
/// Returns the end offset and the offsets of the references.
fn lay_out<'a>(fields: impl Iterator<Item = &'a Field>, start: u32) -> (u32, Vec<u32>) {
    let (references, mut primitives): (Vec<&Field>, Vec<&Field>) =
        fields.partition(|f| f.is_reference());

    let mut offset = start;
    let mut reference_offsets = Vec::with_capacity(references.len());
    if !references.is_empty() {
        offset = align_up(offset, REFERENCE_SIZE);
    }
    for field in references {
        let _ = field.offset.set(offset);
        reference_offsets.push(offset);
        offset += REFERENCE_SIZE;
    }

    // Stable, so same sized fields keep their declaration order
    primitives.sort_by_key(|f| std::cmp::Reverse(f.size()));

    while !primitives.is_empty() {
        let size = primitives[0].size();
        let aligned = align_up(offset, size);

        while offset < aligned {
            let filler = primitives.iter().position(|f| {
                let filler_size = f.size();
                filler_size < size && offset % filler_size == 0 && offset + filler_size <= aligned
            });
            match filler {
                Some(index) => {
                    let field = primitives.remove(index);
                    let _ = field.offset.set(offset);
                    offset += field.size();
                }
                None => offset = aligned,
            }
        }

        let field = primitives.remove(0);
        let _ = field.offset.set(offset);
        offset += size;
    }

    (offset, reference_offsets)
}
