use std::sync::Arc;

use classlink::{
    class::array_data_offset, Class, ClassLinker, ClassRoot, FieldValue, Heap, Method,
    ObjectRef, StaticInitializer,
};
use classlink_base::{
    container::CodeRef,
    flags::{FieldAccessFlags, MethodAccessFlags},
    ContainerBuilder,
};
use parking_lot::Mutex;

mod common;
use common::{linker_with, OBJECT};

/// Fills the holder's static fields with a small object graph, remembering what it allocated
#[derive(Default)]
struct Populate {
    allocated: Mutex<Vec<ObjectRef>>,
}
impl StaticInitializer for Populate {
    fn run_static_initializer(
        &self,
        linker: &ClassLinker,
        class: &Class,
        _method: &Method,
    ) -> Result<(), String> {
        let heap = linker.heap();
        let object_class = linker
            .class(linker.class_root(ClassRoot::JavaLangObject))
            .map_err(|err| err.to_string())?;
        let array_class = linker
            .class(linker.class_root(ClassRoot::ObjectArrayClass))
            .map_err(|err| err.to_string())?;
        let next = class
            .find_field("next", "Ljava/lang/Object;")
            .and_then(|index| class.field(index))
            .and_then(|field| field.offset())
            .ok_or("no next field")?;

        // KEPT -> holder -> child
        let kept = heap.alloc_object(class);
        let child = heap.alloc_object(&object_class);
        heap.store_reference(kept, next, Some(child));

        // ITEMS -> [null, element]
        let items = heap
            .alloc_array(&array_class, 2)
            .ok_or("ITEMS not allocated")?;
        let element = heap.alloc_object(&object_class);
        heap.store_reference(items, array_data_offset(4) + 4, Some(element));

        let kept_index = class.find_field("KEPT", "Ljava/lang/Object;").ok_or("no KEPT")?;
        let items_index = class
            .find_field("ITEMS", "[Ljava/lang/Object;")
            .ok_or("no ITEMS")?;
        if !class.set_static_value(kept_index, FieldValue::Reference(Some(kept)))
            || !class.set_static_value(items_index, FieldValue::Reference(Some(items)))
        {
            return Err("statics not writable".to_owned());
        }

        self.allocated
            .lock()
            .extend_from_slice(&[kept, child, items, element]);
        Ok(())
    }
}

#[test]
fn collection_keeps_what_the_linker_references() {
    let mut builder = ContainerBuilder::new("heap");
    builder
        .class("LPkg/Holder;")
        .super_class(OBJECT)
        .field("KEPT", "Ljava/lang/Object;", FieldAccessFlags::STATIC)
        .field("ITEMS", "[Ljava/lang/Object;", FieldAccessFlags::STATIC)
        .field("next", "Ljava/lang/Object;", FieldAccessFlags::PRIVATE)
        .field("count", "I", FieldAccessFlags::PRIVATE)
        .method("<init>", "()V", MethodAccessFlags::PUBLIC)
        .static_initializer(CodeRef(1))
        .finish();
    let populate = Arc::new(Populate::default());
    let (linker, gc) = linker_with(vec![builder.build().unwrap()], populate.clone());

    let holder = linker.find_system_class("LPkg/Holder;").unwrap();
    linker.initialize_class(holder).unwrap();
    let holder = linker.class(holder).unwrap();
    let reachable = populate.allocated.lock().clone();
    assert_eq!(reachable.len(), 4);
    assert_eq!(gc.class_of(reachable[0]), Some(holder.id()));
    assert_eq!(gc.array_length(reachable[2]), Some(2));

    let interned = linker.intern_string(b"survivor").unwrap();
    let string_class = linker
        .class(linker.class_root(ClassRoot::JavaLangString))
        .unwrap();
    let value_offset = string_class
        .field(string_class.find_field("value", "[C").unwrap())
        .and_then(|field| field.offset())
        .unwrap();
    let chars = gc.load_reference(interned, value_offset).unwrap().unwrap();
    assert_eq!(gc.array_length(chars), Some(8));
    assert_eq!(
        gc.load_bytes(chars, array_data_offset(2), 4),
        Some(vec![b's', 0, b'u', 0])
    );

    let container = linker.register_container(ContainerBuilder::new("app").build().unwrap());
    let loader = linker.create_class_loader(&[container]).unwrap();
    let loader_object = linker.class_loader(loader).unwrap().object();

    // A small cycle of garbage, plus a lone object
    let object_class = linker
        .class(linker.class_root(ClassRoot::JavaLangObject))
        .unwrap();
    let next = holder
        .field(holder.find_field("next", "Ljava/lang/Object;").unwrap())
        .and_then(|field| field.offset())
        .unwrap();
    let a = gc.alloc_object(&holder);
    let b = gc.alloc_object(&holder);
    gc.store_reference(a, next, Some(b));
    gc.store_reference(b, next, Some(a));
    let lone = gc.alloc_object(&object_class);
    assert!(gc.contains(a));

    let before = gc.len();
    let freed = gc.collect_garbage(&linker);
    assert!(freed >= 3);
    assert_eq!(gc.len(), before - freed);

    for object in [a, b, lone] {
        assert!(!gc.contains(object), "@{} survived", object.get());
    }
    for object in reachable {
        assert!(gc.contains(object), "@{} was freed", object.get());
    }
    assert!(gc.contains(interned));
    assert!(gc.contains(chars));
    assert!(gc.contains(loader_object));

    // Everything left is reachable
    assert_eq!(gc.collect_garbage(&linker), 0);

    // Freed slots are reused
    let reused = gc.alloc_object(&object_class);
    assert!([a, b, lone].contains(&reused));
}

#[test]
fn objects_record_their_class_and_length() {
    let (linker, gc) = linker_with(Vec::new(), Arc::new(classlink::NoStaticInitializer));
    assert!(!gc.should_gc());

    let ints = linker.class(linker.class_root(ClassRoot::IntArrayClass)).unwrap();
    let array = gc.alloc_array(&ints, 3).unwrap();
    assert_eq!(gc.class_of(array), Some(ints.id()));
    assert_eq!(gc.array_length(array), Some(3));
    // Header, length, then the elements
    assert_eq!(
        gc.load_bytes(array, 0, 4),
        Some(ints.id().get().to_le_bytes().to_vec())
    );
    assert_eq!(gc.load_bytes(array, 8, 4), Some(3u32.to_le_bytes().to_vec()));
    assert_eq!(gc.load_bytes(array, array_data_offset(4) + 8, 4), Some(vec![0; 4]));
    assert_eq!(gc.load_bytes(array, array_data_offset(4) + 12, 4), None);

    gc.store_bytes(array, array_data_offset(4), &7i32.to_le_bytes());
    assert_eq!(
        gc.load_bytes(array, array_data_offset(4), 4),
        Some(7i32.to_le_bytes().to_vec())
    );

    let object = linker.class(linker.class_root(ClassRoot::JavaLangObject)).unwrap();
    let instance = gc.alloc_object(&object);
    assert_eq!(gc.array_length(instance), None);
    assert_eq!(gc.load_bytes(instance, 0, 8).map(|x| x.len()), Some(8));
    assert!(gc.bytes_used() > 0);
}

#[test]
fn oversized_arrays_are_refused() {
    let (linker, gc) = linker_with(Vec::new(), Arc::new(classlink::NoStaticInitializer));
    let longs = linker.class(linker.class_root(ClassRoot::LongArrayClass)).unwrap();
    let live = gc.len();
    let used = gc.bytes_used();

    assert_eq!(gc.alloc_array(&longs, u32::MAX), None);
    // The element data fits, but not with the header in front of it
    assert_eq!(gc.alloc_array(&longs, u32::MAX / 8), None);
    assert_eq!(gc.len(), live);
    assert_eq!(gc.bytes_used(), used);

    let array = gc.alloc_array(&longs, 2).unwrap();
    assert_eq!(gc.array_length(array), Some(2));
}
