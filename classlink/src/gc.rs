//! A basic mark and sweep heap.
//!
//! Objects are byte blocks laid out the way the linker decides: an instance is
//! [`Class::instance_size`] bytes, an array is its header followed by its elements. The collector
//! knows nothing about fields, it traces an instance through its class's reference offsets and a
//! reference array through every element.
//!
//! Collection is not concurrent with mutation. The embedder has to make sure nothing allocates
//! or stores into the heap while [`Gc::collect_garbage`] runs.

use std::collections::VecDeque;

use classlink_base::id::ClassId;
use parking_lot::Mutex;
use usize_cast::IntoUsize;

use crate::{
    class::{
        array_data_offset, ArrayElement, Class, ClassKind, ARRAY_LENGTH_OFFSET, CLASS_OFFSET,
        OBJECT_HEADER_SIZE, REFERENCE_SIZE,
    },
    class_linker::ClassLinker,
    heap::{Heap, ObjectRef, Root},
};

#[derive(Debug)]
pub struct GcObject {
    marked: bool,
    class: ClassId,
    /// Set for arrays
    array_length: Option<u32>,
    /// Arrays of references are traced through every element
    reference_array: bool,
    data: Box<[u8]>,
}
impl GcObject {
    #[must_use]
    pub fn class(&self) -> ClassId {
        self.class
    }

    #[must_use]
    pub fn array_length(&self) -> Option<u32> {
        self.array_length
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    fn memory_size(&self) -> usize {
        self.data.len() + std::mem::size_of::<GcObject>()
    }
}

#[derive(Debug)]
struct GcInner {
    /// The rough amount of memory that the objects are using
    bytes_used: usize,
    /// The amount of memory that should be used before our next garbage collection
    next_gc: usize,
    /// The allocated objects, with various spots being empty
    objects: Vec<Option<GcObject>>,
    /// Free slots, being in a vector so that it is faster to get one as we need it
    free_slots: Vec<usize>,
    grey_stack: VecDeque<usize>,
}

#[derive(Debug)]
pub struct Gc {
    inner: Mutex<GcInner>,
}
impl Gc {
    const HEAP_GROW_FACTOR: usize = 2;

    #[must_use]
    pub fn new() -> Gc {
        Gc {
            inner: Mutex::new(GcInner {
                bytes_used: 0,
                next_gc: 1024 * 1024,
                objects: Vec::new(),
                free_slots: Vec::new(),
                grey_stack: VecDeque::new(),
            }),
        }
    }

    /// Number of live objects
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .objects
            .iter()
            .filter(|x| x.is_some())
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn bytes_used(&self) -> usize {
        self.inner.lock().bytes_used
    }

    #[must_use]
    pub fn contains(&self, object: ObjectRef) -> bool {
        self.inner.lock().get(object).is_some()
    }

    #[must_use]
    pub fn class_of(&self, object: ObjectRef) -> Option<ClassId> {
        self.inner.lock().get(object).map(GcObject::class)
    }

    #[must_use]
    pub fn array_length(&self, object: ObjectRef) -> Option<u32> {
        self.inner.lock().get(object).and_then(GcObject::array_length)
    }

    /// Read the reference slot at `offset`. `None` if the object or the slot does not exist.
    #[must_use]
    pub fn load_reference(&self, object: ObjectRef, offset: u32) -> Option<Option<ObjectRef>> {
        let inner = self.inner.lock();
        read_slot(inner.get(object)?, offset)
    }

    #[must_use]
    pub fn load_bytes(&self, object: ObjectRef, offset: u32, length: usize) -> Option<Vec<u8>> {
        let inner = self.inner.lock();
        let start = offset.into_usize();
        inner
            .get(object)?
            .data
            .get(start..start + length)
            .map(<[u8]>::to_vec)
    }

    #[must_use]
    pub fn should_gc(&self) -> bool {
        let inner = self.inner.lock();
        inner.bytes_used > inner.next_gc
    }

    /// Free every object not reachable from the linker's roots. Returns how many were freed.
    pub fn collect_garbage(&self, linker: &ClassLinker) -> usize {
        let mut roots = Vec::new();
        linker.visit_roots(&mut |root: Root| {
            if let Root::Object(object) = root {
                roots.push(object);
            }
        });

        let mut inner = self.inner.lock();
        for root in roots {
            inner.mark(root);
        }
        inner.trace_references(linker);
        let freed = inner.sweep();
        inner.next_gc = inner.bytes_used * Gc::HEAP_GROW_FACTOR;

        tracing::debug!(
            "Collected {} objects, {} bytes still in use",
            freed,
            inner.bytes_used
        );
        freed
    }

    fn alloc(&self, class: &Class, size: u32, array_length: Option<u32>) -> ObjectRef {
        let mut data = vec![0; size.into_usize()].into_boxed_slice();
        write_bytes(&mut data, CLASS_OFFSET, &class.id().get().to_le_bytes());
        if let Some(length) = array_length {
            write_bytes(&mut data, ARRAY_LENGTH_OFFSET, &length.to_le_bytes());
        }

        let reference_array = matches!(
            class.kind(),
            ClassKind::Array {
                element: ArrayElement::Reference,
                ..
            }
        );
        let object = GcObject {
            marked: false,
            class: class.id(),
            array_length,
            reference_array,
            data,
        };

        let mut inner = self.inner.lock();
        inner.bytes_used += object.memory_size();
        let index = if let Some(i) = inner.free_slots.pop() {
            debug_assert!(inner.objects[i].is_none());
            inner.objects[i] = Some(object);
            i
        } else {
            inner.objects.push(Some(object));
            inner.objects.len() - 1
        };

        GcInner::make_ref(index)
    }
}
impl Default for Gc {
    fn default() -> Self {
        Self::new()
    }
}
impl Heap for Gc {
    fn alloc_object(&self, class: &Class) -> ObjectRef {
        debug_assert!(!class.is_array(), "{} allocated as an instance", class.descriptor());
        let size = class.instance_size().unwrap_or(OBJECT_HEADER_SIZE);
        self.alloc(class, size, None)
    }

    fn alloc_array(&self, class: &Class, length: u32) -> Option<ObjectRef> {
        let element_size = match class.kind() {
            ClassKind::Array { element, .. } => element.size(),
            _ => {
                tracing::warn!("{} allocated as an array", class.descriptor());
                REFERENCE_SIZE
            }
        };
        let size = match element_size
            .checked_mul(length)
            .and_then(|data| data.checked_add(array_data_offset(element_size)))
        {
            Some(size) => size,
            None => {
                tracing::warn!(
                    "Refusing to allocate {} with {} elements, it is too large",
                    class.descriptor(),
                    length
                );
                return None;
            }
        };
        Some(self.alloc(class, size, Some(length)))
    }

    fn store_reference(&self, object: ObjectRef, offset: u32, value: Option<ObjectRef>) {
        self.store_bytes(object, offset, &ObjectRef::to_slot(value));
    }

    fn store_bytes(&self, object: ObjectRef, offset: u32, bytes: &[u8]) {
        let mut inner = self.inner.lock();
        match inner.get_mut(object) {
            Some(target) => {
                if !write_bytes(&mut target.data, offset, bytes) {
                    tracing::warn!(
                        "Store of {} bytes at {} is outside of @{}",
                        bytes.len(),
                        offset,
                        object.get()
                    );
                }
            }
            None => tracing::warn!("Store into freed object @{}", object.get()),
        }
    }
}

impl GcInner {
    fn index(object: ObjectRef) -> usize {
        object.get().into_usize() - 1
    }

    fn make_ref(index: usize) -> ObjectRef {
        // Slot indices are offset by one so that zero stays the null reference
        let raw = u32::try_from(index + 1).unwrap_or(u32::MAX);
        ObjectRef::new(raw).unwrap_or_else(|| unreachable!("index + 1 is never zero"))
    }

    fn get(&self, object: ObjectRef) -> Option<&GcObject> {
        self.objects.get(GcInner::index(object)).and_then(Option::as_ref)
    }

    fn get_mut(&mut self, object: ObjectRef) -> Option<&mut GcObject> {
        self.objects
            .get_mut(GcInner::index(object))
            .and_then(Option::as_mut)
    }

    fn mark(&mut self, object: ObjectRef) {
        let index = GcInner::index(object);
        if let Some(target) = self.objects.get_mut(index).and_then(Option::as_mut) {
            if target.marked {
                return;
            }

            target.marked = true;
            self.grey_stack.push_back(index);
        } else {
            debug_assert!(false, "Marking already disposed of object {}", index);
        }
    }

    fn trace_references(&mut self, linker: &ClassLinker) {
        while let Some(index) = self.grey_stack.pop_back() {
            self.blacken_object(linker, index);
        }
    }

    /// Should always receive a valid index into the objects vector
    fn blacken_object(&mut self, linker: &ClassLinker, index: usize) {
        let object = match self.objects[index].as_ref() {
            Some(object) => object,
            None => return,
        };

        let mut children = Vec::new();
        if object.reference_array {
            let length = object.array_length.unwrap_or(0);
            let start = array_data_offset(REFERENCE_SIZE);
            for i in 0..length {
                if let Some(Some(child)) = read_slot(object, start + i * REFERENCE_SIZE) {
                    children.push(child);
                }
            }
        } else if object.array_length.is_none() {
            let class = match linker.class(object.class) {
                Ok(class) => class,
                Err(_) => {
                    tracing::warn!("Object @{} has an unknown class", index + 1);
                    return;
                }
            };
            if let Some(linked) = class.linked() {
                for offset in linked.reference_offsets().iter() {
                    if let Some(Some(child)) = read_slot(object, offset) {
                        children.push(child);
                    }
                }
            }
        }

        for child in children {
            self.mark(child);
        }
    }

    fn sweep(&mut self) -> usize {
        let mut freed = 0;
        for i in 0..self.objects.len() {
            if let Some(object) = self.objects[i].as_mut() {
                if object.marked {
                    object.marked = false;
                } else {
                    self.free(i);
                    freed += 1;
                }
            }
        }

        freed
    }

    /// Should always receive a valid index into the objects vector
    fn free(&mut self, index: usize) {
        if let Some(old) = self.objects[index].take() {
            self.bytes_used -= old.memory_size();
            self.free_slots.push(index);
        } else {
            debug_assert!(false, "Double free on {}", index);
        }
    }
}

fn read_slot(object: &GcObject, offset: u32) -> Option<Option<ObjectRef>> {
    let start = offset.into_usize();
    let bytes = object.data.get(start..start + REFERENCE_SIZE.into_usize())?;
    let mut raw = [0; 4];
    raw.copy_from_slice(bytes);
    Some(ObjectRef::new(u32::from_le_bytes(raw)))
}

fn write_bytes(data: &mut [u8], offset: u32, bytes: &[u8]) -> bool {
    let start = offset.into_usize();
    match data.get_mut(start..start + bytes.len()) {
        Some(dest) => {
            dest.copy_from_slice(bytes);
            true
        }
        None => false,
    }
}
