use classlink_base::util::convert_classfile_text;
use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::{
    bootstrap::ClassRoot,
    class::{array_data_offset, Class},
    class_linker::ClassLinker,
    heap::{ObjectRef, Root, RootVisitor},
    LinkError, MalformedError,
};

/// The canonical string object for each distinct string contents
#[derive(Debug, Default)]
pub(crate) struct InternTable {
    /// Modified utf8 contents -> string object
    strings: Mutex<IndexMap<Box<[u8]>, ObjectRef>>,
}
impl InternTable {
    pub(crate) fn intern(&self, linker: &ClassLinker, contents: &[u8]) -> Result<ObjectRef, LinkError> {
        if let Some(object) = self.strings.lock().get(contents) {
            return Ok(*object);
        }

        // Allocated without holding the table, so two threads may both create the string. Only
        // the first is kept, the other is left for the heap to reclaim.
        let object = create_string(linker, contents)?;
        let mut strings = self.strings.lock();
        let interned = *strings.entry(Box::from(contents)).or_insert(object);
        if interned == object {
            tracing::trace!(
                "Interned \"{}\" as @{}",
                convert_classfile_text(contents),
                object.get()
            );
        }

        Ok(interned)
    }

    pub(crate) fn len(&self) -> usize {
        self.strings.lock().len()
    }

    pub(crate) fn visit_roots(&self, visitor: &mut impl RootVisitor) {
        for object in self.strings.lock().values() {
            visitor.visit_root(Root::Object(*object));
        }
    }
}

/// Allocate a string object holding the utf16 form of the contents
fn create_string(linker: &ClassLinker, contents: &[u8]) -> Result<ObjectRef, LinkError> {
    let string_class = linker.class(linker.try_class_root(ClassRoot::JavaLangString)?)?;
    linker.ensure_linked(&string_class)?;
    let char_array_class = linker.class(linker.try_class_root(ClassRoot::CharArrayClass)?)?;
    linker.ensure_linked(&char_array_class)?;

    let value_offset = field_offset(&string_class, "value", "[C")?;
    let count_offset = field_offset(&string_class, "count", "I").ok();

    let text = convert_classfile_text(contents);
    let chars: Vec<u8> = text.encode_utf16().flat_map(u16::to_le_bytes).collect();
    let length = (chars.len() / 2) as u32;

    let heap = linker.heap();
    let array = heap
        .alloc_array(&char_array_class, length)
        .ok_or_else(|| LinkError::ArrayTooLarge {
            class: char_array_class.descriptor().to_owned(),
            length,
        })?;
    heap.store_bytes(array, array_data_offset(2), &chars);

    let string = heap.alloc_object(&string_class);
    heap.store_reference(string, value_offset, Some(array));
    if let Some(count_offset) = count_offset {
        heap.store_bytes(string, count_offset, &(length as i32).to_le_bytes());
    }

    Ok(string)
}

fn field_offset(class: &Class, name: &str, descriptor: &str) -> Result<u32, LinkError> {
    class
        .find_field(name, descriptor)
        .and_then(|index| class.field(index))
        .filter(|field| !field.is_static())
        .and_then(|field| field.offset())
        .ok_or_else(|| {
            MalformedError::MissingRootField {
                class: class.descriptor().to_owned(),
                name: name.to_owned(),
                descriptor: descriptor.to_owned(),
            }
            .into()
        })
}
