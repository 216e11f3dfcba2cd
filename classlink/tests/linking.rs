use classlink::{ClassRoot, ClassStatus, LinkError, LinkageError};
use classlink_base::{
    flags::{ClassAccessFlags, FieldAccessFlags, MethodAccessFlags},
    id::{ClassId, MethodId},
    Container, ContainerBuilder,
};

mod common;
use common::{interface, linker, OBJECT};

const PUBLIC: MethodAccessFlags = MethodAccessFlags::PUBLIC;

fn abstract_method() -> MethodAccessFlags {
    MethodAccessFlags::PUBLIC | MethodAccessFlags::ABSTRACT
}

fn build(f: impl FnOnce(&mut ContainerBuilder)) -> Container {
    let mut builder = ContainerBuilder::new("test");
    f(&mut builder);
    builder.build().unwrap()
}

fn declared(linker: &classlink::ClassLinker, class: ClassId, name: &str, desc: &str) -> MethodId {
    let index = linker
        .class(class)
        .unwrap()
        .find_declared_method(name, desc)
        .unwrap();
    MethodId::unchecked_compose(class, index)
}

fn linkage_error(result: Result<ClassId, LinkError>) -> LinkageError {
    match result {
        Err(LinkError::Linkage(err)) => err,
        other => panic!("expected a linkage error, got {:?}", other),
    }
}

fn shapes() -> Container {
    build(|b| {
        b.class("LPkg/Shape;")
            .super_class(OBJECT)
            .method("<init>", "()V", PUBLIC)
            .method("area", "()D", PUBLIC)
            .method("name", "()Ljava/lang/String;", PUBLIC)
            .method("helper", "()V", MethodAccessFlags::PRIVATE)
            .method("count", "()I", PUBLIC | MethodAccessFlags::STATIC)
            .finish();
        b.class("LPkg/Square;")
            .super_class("LPkg/Shape;")
            .method("<init>", "()V", PUBLIC)
            .method("area", "()D", PUBLIC)
            .method("side", "()I", PUBLIC)
            .method("toString", "()Ljava/lang/String;", PUBLIC)
            .method("helper", "()V", PUBLIC)
            .finish();
    })
}

#[test]
fn vtable_extends_super_vtable() {
    let linker = linker(vec![shapes()]);
    let object = linker.class(linker.class_root(ClassRoot::JavaLangObject)).unwrap();
    let shape = linker.find_system_class("LPkg/Shape;").unwrap();
    let square = linker.find_system_class("LPkg/Square;").unwrap();
    let shape_class = linker.class(shape).unwrap();
    let square_class = linker.class(square).unwrap();

    let base = object.vtable().len();
    // area, name
    assert_eq!(shape_class.vtable().len(), base + 2);
    assert_eq!(&shape_class.vtable()[..base], object.vtable());
    // side and the public helper are new, private methods are never overridden
    assert_eq!(square_class.vtable().len(), base + 4);

    let shape_area = declared(&linker, shape, "area", "()D");
    let square_area = declared(&linker, square, "area", "()D");
    let (_, index) = square_area.decompose();
    let slot = square_class.method(index).unwrap().method_index().unwrap();
    let (_, index) = shape_area.decompose();
    assert_eq!(shape_class.method(index).unwrap().method_index(), Some(slot));
    assert_eq!(square_class.vtable()[usize::from(slot)], square_area);

    // Every slot not overridden is inherited as is
    for (i, (inherited, own)) in shape_class
        .vtable()
        .iter()
        .zip(square_class.vtable())
        .enumerate()
    {
        let overridden = own.class_id() == square;
        assert_eq!(inherited == own, !overridden, "slot {}", i);
    }

    // Direct methods get no slot
    let (_, index) = declared(&linker, shape, "count", "()I").decompose();
    assert_eq!(shape_class.method(index).unwrap().method_index(), None);
    let (_, index) = declared(&linker, shape, "<init>", "()V").decompose();
    assert_eq!(shape_class.method(index).unwrap().method_index(), None);

    assert_eq!(
        linker.find_virtual_method(square, "toString", "()Ljava/lang/String;").unwrap(),
        Some(declared(&linker, square, "toString", "()Ljava/lang/String;"))
    );
    assert_eq!(
        linker.find_virtual_method(square, "name", "()Ljava/lang/String;").unwrap(),
        Some(declared(&linker, shape, "name", "()Ljava/lang/String;"))
    );
    assert_eq!(linker.find_virtual_method(square, "missing", "()V").unwrap(), None);
}

#[test]
fn virtual_dispatch_picks_the_receivers_override() {
    let linker = linker(vec![shapes()]);
    let shape = linker.find_system_class("LPkg/Shape;").unwrap();
    let square = linker.find_system_class("LPkg/Square;").unwrap();
    let shape_area = declared(&linker, shape, "area", "()D");
    let square_area = declared(&linker, square, "area", "()D");
    let shape_name = declared(&linker, shape, "name", "()Ljava/lang/String;");

    assert_eq!(linker.find_virtual_target(shape, shape_area).unwrap(), shape_area);
    assert_eq!(linker.find_virtual_target(square, shape_area).unwrap(), square_area);
    assert_eq!(linker.find_virtual_target(square, shape_name).unwrap(), shape_name);

    // Direct methods run as named
    let helper = declared(&linker, shape, "helper", "()V");
    assert_eq!(linker.find_virtual_target(square, helper).unwrap(), helper);

    let object = linker.class_root(ClassRoot::JavaLangObject);
    assert_eq!(
        linker.find_virtual_target(object, square_area),
        Err(LinkError::IncompatibleReceiver {
            receiver: object,
            method: square_area
        })
    );

    assert!(linker.is_subclass_of(square, shape).unwrap());
    assert!(!linker.is_subclass_of(shape, square).unwrap());
    assert!(linker.is_assignable_from(shape, square).unwrap());
    assert!(linker.is_assignable_from(object, square).unwrap());

    let shapes = linker.find_system_class("[LPkg/Shape;").unwrap();
    let squares = linker.find_system_class("[LPkg/Square;").unwrap();
    assert!(linker.is_assignable_from(shapes, squares).unwrap());
    assert!(!linker.is_assignable_from(squares, shapes).unwrap());
}

#[test]
fn overriding_final_method_fails() {
    let linker = linker(vec![build(|b| {
        b.class("LPkg/Base;")
            .super_class(OBJECT)
            .method("run", "()V", PUBLIC | MethodAccessFlags::FINAL)
            .finish();
        b.class("LPkg/Sub;")
            .super_class("LPkg/Base;")
            .method("run", "()V", PUBLIC)
            .finish();
        b.class("LPkg/ClassGetter;")
            .super_class(OBJECT)
            .method("getClass", "()Ljava/lang/Class;", PUBLIC)
            .finish();
    })]);

    assert!(matches!(
        linkage_error(linker.find_system_class("LPkg/Sub;")),
        LinkageError::OverridesFinal { class, method } if class == "LPkg/Sub;" && method == "run()V"
    ));
    assert!(matches!(
        linkage_error(linker.find_system_class("LPkg/ClassGetter;")),
        LinkageError::OverridesFinal { .. }
    ));

    // The base class itself is fine
    assert!(linker.find_system_class("LPkg/Base;").is_ok());
}

#[test]
fn overriding_with_weaker_access_fails() {
    let linker = linker(vec![build(|b| {
        b.class("LPkg/Base;")
            .super_class(OBJECT)
            .method("run", "()V", PUBLIC)
            .method("step", "()V", MethodAccessFlags::PROTECTED)
            .finish();
        b.class("LPkg/Weaker;")
            .super_class("LPkg/Base;")
            .method("run", "()V", MethodAccessFlags::PROTECTED)
            .finish();
        b.class("LPkg/Stronger;")
            .super_class("LPkg/Base;")
            .method("step", "()V", PUBLIC)
            .finish();
    })]);

    assert!(matches!(
        linkage_error(linker.find_system_class("LPkg/Weaker;")),
        LinkageError::WeakerAccess { method, .. } if method == "run()V"
    ));
    assert!(linker.find_system_class("LPkg/Stronger;").is_ok());
}

#[test]
fn circular_inheritance_is_permanent() {
    let linker = linker(vec![build(|b| {
        b.class("LPkg/Derived;").super_class("LPkg/Derived;").finish();
        b.class("LPkg/Ping;").super_class("LPkg/Pong;").finish();
        b.class("LPkg/Pong;").super_class("LPkg/Ping;").finish();
    })]);

    let first = linker.find_system_class("LPkg/Derived;");
    assert!(matches!(
        first,
        Err(LinkError::Linkage(LinkageError::CircularInheritance { .. }))
    ));

    // The class stays published, in the error state, and keeps its error
    let id = linker.lookup_class("LPkg/Derived;", None).unwrap();
    let derived = linker.class(id).unwrap();
    assert_eq!(derived.status(), ClassStatus::Error);
    assert_eq!(derived.failure().map(Err), Some(first.clone()));
    assert_eq!(linker.find_system_class("LPkg/Derived;"), first);

    assert!(matches!(
        linker.find_system_class("LPkg/Ping;"),
        Err(LinkError::Linkage(LinkageError::CircularInheritance { .. }))
    ));
    assert!(linker.find_system_class("[LPkg/Derived;").is_err());
}

#[test]
fn bad_super_types_fail() {
    let linker = linker(vec![build(|b| {
        b.class("LPkg/Sealed;")
            .access(ClassAccessFlags::PUBLIC | ClassAccessFlags::FINAL)
            .super_class(OBJECT)
            .finish();
        b.class("LPkg/Api;")
            .access(interface())
            .super_class(OBJECT)
            .finish();
        b.class("LPkg/ExtendsFinal;").super_class("LPkg/Sealed;").finish();
        b.class("LPkg/ExtendsInterface;").super_class("LPkg/Api;").finish();
        b.class("LPkg/ImplementsClass;")
            .super_class(OBJECT)
            .interface("LPkg/Sealed;")
            .finish();
        b.class("LPkg/Orphan;").super_class("LPkg/Missing;").finish();
        b.class("LPkg/NoSuper;").finish();
    })]);

    assert!(matches!(
        linkage_error(linker.find_system_class("LPkg/ExtendsFinal;")),
        LinkageError::SuperClassFinal { super_class, .. } if super_class == "LPkg/Sealed;"
    ));
    assert!(matches!(
        linkage_error(linker.find_system_class("LPkg/ExtendsInterface;")),
        LinkageError::SuperClassInterface { .. }
    ));
    assert!(matches!(
        linkage_error(linker.find_system_class("LPkg/ImplementsClass;")),
        LinkageError::NotAnInterface { interface, .. } if interface == "LPkg/Sealed;"
    ));
    assert!(matches!(
        linker.find_system_class("LPkg/Orphan;"),
        Err(LinkError::NotFound { descriptor, .. }) if descriptor == "LPkg/Missing;"
    ));
    assert!(matches!(
        linker.find_system_class("LPkg/NoSuper;"),
        Err(LinkError::Malformed(
            classlink::MalformedError::MissingSuperClass { .. }
        ))
    ));
}

fn tasks() -> Container {
    build(|b| {
        b.class("LPkg/Task;")
            .access(interface())
            .super_class(OBJECT)
            .method("run", "()V", abstract_method())
            .method("cancel", "()Z", abstract_method())
            .finish();
        b.class("LPkg/Forgetful;")
            .super_class(OBJECT)
            .interface("LPkg/Task;")
            .method("run", "()V", PUBLIC)
            .finish();
        b.class("LPkg/Hidden;")
            .super_class(OBJECT)
            .interface("LPkg/Task;")
            .method("run", "()V", MethodAccessFlags::PROTECTED)
            .method("cancel", "()Z", PUBLIC)
            .finish();
        b.class("LPkg/Partial;")
            .access(ClassAccessFlags::PUBLIC | ClassAccessFlags::ABSTRACT)
            .super_class(OBJECT)
            .interface("LPkg/Task;")
            .method("cancel", "()Z", PUBLIC)
            .finish();
        b.class("LPkg/Complete;")
            .super_class("LPkg/Partial;")
            .method("run", "()V", PUBLIC)
            .finish();
    })
}

#[test]
fn concrete_classes_implement_every_interface_method() {
    let linker = linker(vec![tasks()]);

    assert!(matches!(
        linkage_error(linker.find_system_class("LPkg/Forgetful;")),
        LinkageError::UnimplementedInterfaceMethod { interface, method, .. }
            if interface == "LPkg/Task;" && method == "cancel()Z"
    ));
    assert!(matches!(
        linkage_error(linker.find_system_class("LPkg/Hidden;")),
        LinkageError::NonPublicImplementation { method, .. } if method == "run()V"
    ));
}

#[test]
fn abstract_classes_get_miranda_methods() {
    let linker = linker(vec![tasks()]);
    let task = linker.find_system_class("LPkg/Task;").unwrap();
    let partial = linker.find_system_class("LPkg/Partial;").unwrap();
    let partial_class = linker.class(partial).unwrap();
    let object = linker.class(linker.class_root(ClassRoot::JavaLangObject)).unwrap();

    let task_run = declared(&linker, task, "run", "()V");
    let task_cancel = declared(&linker, task, "cancel", "()Z");

    // cancel, then the miranda for run
    let linked = partial_class.linked().unwrap();
    assert_eq!(linked.mirandas().len(), 1);
    assert_eq!(partial_class.vtable().len(), object.vtable().len() + 2);

    let miranda_id = *partial_class.vtable().last().unwrap();
    assert_eq!(miranda_id.class_id(), partial);
    let miranda = partial_class.method(miranda_id.decompose().1).unwrap();
    assert!(miranda.is_miranda());
    assert!(miranda.is_abstract());
    assert_eq!(miranda.miranda_of(), Some(task_run));
    assert_eq!(miranda.name(), "run");

    let entry = &partial_class.iftable()[0];
    assert_eq!(entry.interface(), task);
    assert_eq!(entry.slots().len(), 2);

    assert_eq!(
        linker.find_interface_target(partial, task_run),
        Err(LinkError::AbstractMethod { method: miranda_id })
    );
    assert_eq!(
        linker.find_interface_target(partial, task_cancel).unwrap(),
        declared(&linker, partial, "cancel", "()Z")
    );

    // The concrete subclass fills the miranda's slot
    let complete = linker.find_system_class("LPkg/Complete;").unwrap();
    let complete_class = linker.class(complete).unwrap();
    let complete_run = declared(&linker, complete, "run", "()V");
    assert_eq!(complete_class.vtable().len(), partial_class.vtable().len());
    assert_eq!(complete_class.vtable().last(), Some(&complete_run));
    assert_eq!(linker.find_interface_target(complete, task_run).unwrap(), complete_run);
    assert_eq!(linker.find_virtual_target(complete, task_run).unwrap(), complete_run);
    assert_eq!(linker.find_virtual_target(complete, miranda_id).unwrap(), complete_run);

    assert!(linker.implements(complete, task).unwrap());
    assert!(linker.is_assignable_from(task, complete).unwrap());

    let object_id = object.id();
    assert_eq!(
        linker.find_interface_target(object_id, task_run),
        Err(LinkError::IncompatibleReceiver {
            receiver: object_id,
            method: task_run
        })
    );
}

#[test]
fn iftable_lists_inherited_interfaces() {
    let linker = linker(vec![build(|b| {
        b.class("LPkg/Named;")
            .access(interface())
            .super_class(OBJECT)
            .method("name", "()Ljava/lang/String;", abstract_method())
            .finish();
        b.class("LPkg/Labeled;")
            .access(interface())
            .super_class(OBJECT)
            .interface("LPkg/Named;")
            .method("label", "()Ljava/lang/String;", abstract_method())
            .finish();
        b.class("LPkg/Sized;")
            .access(interface())
            .super_class(OBJECT)
            .method("size", "()I", abstract_method())
            .finish();
        b.class("LPkg/Tag;")
            .super_class(OBJECT)
            .interface("LPkg/Labeled;")
            .method("name", "()Ljava/lang/String;", PUBLIC)
            .method("label", "()Ljava/lang/String;", PUBLIC)
            .finish();
        b.class("LPkg/SizedTag;")
            .super_class("LPkg/Tag;")
            .interface("LPkg/Sized;")
            .interface("LPkg/Named;")
            .method("size", "()I", PUBLIC)
            .finish();
    })]);

    let named = linker.find_system_class("LPkg/Named;").unwrap();
    let labeled = linker.find_system_class("LPkg/Labeled;").unwrap();
    let sized = linker.find_system_class("LPkg/Sized;").unwrap();
    let tag = linker.find_system_class("LPkg/Tag;").unwrap();
    let sized_tag = linker.find_system_class("LPkg/SizedTag;").unwrap();

    let interfaces = |id| -> Vec<ClassId> {
        linker
            .class(id)
            .unwrap()
            .iftable()
            .iter()
            .map(|entry| entry.interface())
            .collect()
    };
    assert_eq!(interfaces(labeled), vec![named]);
    assert_eq!(interfaces(tag), vec![labeled, named]);
    // The super class's come first and nothing is repeated
    assert_eq!(interfaces(sized_tag), vec![labeled, named, sized]);

    let named_name = declared(&linker, named, "name", "()Ljava/lang/String;");
    assert_eq!(
        linker.find_interface_target(sized_tag, named_name).unwrap(),
        declared(&linker, tag, "name", "()Ljava/lang/String;")
    );
    assert!(linker.implements(sized_tag, named).unwrap());
    assert!(linker.is_assignable_from(named, labeled).unwrap());
}

#[test]
fn fields_are_laid_out_once() {
    let linker = linker(vec![build(|b| {
        b.class("LPkg/Point;")
            .super_class(OBJECT)
            .field("x", "I", FieldAccessFlags::PRIVATE)
            .field("z", "J", FieldAccessFlags::PRIVATE)
            .field("label", "Ljava/lang/String;", FieldAccessFlags::PRIVATE)
            .field("y", "I", FieldAccessFlags::PRIVATE)
            .field("ORIGIN", "LPkg/Point;", FieldAccessFlags::STATIC)
            .field("count", "I", FieldAccessFlags::STATIC)
            .method("norm", "()D", PUBLIC)
            .finish();
        b.class("LPkg/Other;")
            .super_class(OBJECT)
            .field("flag", "Z", FieldAccessFlags::PRIVATE)
            .field("peer", "LPkg/Point;", FieldAccessFlags::PRIVATE)
            .method("norm", "()D", PUBLIC)
            .method("hashCode", "()I", PUBLIC)
            .finish();
        b.class("LPkg/Point3;")
            .super_class("LPkg/Point;")
            .field("w", "B", FieldAccessFlags::PRIVATE)
            .field("next", "LPkg/Point3;", FieldAccessFlags::PRIVATE)
            .finish();
    })]);

    let point = linker.find_system_class("LPkg/Point;").unwrap();
    let point = linker.class(point).unwrap();
    let offset = |class: &classlink::Class, name: &str| {
        class
            .fields()
            .iter()
            .find(|f| f.name() == name)
            .and_then(|f| f.offset())
    };

    assert_eq!(offset(&point, "label"), Some(8));
    // x fills the gap in front of the long
    assert_eq!(offset(&point, "x"), Some(12));
    assert_eq!(offset(&point, "z"), Some(16));
    assert_eq!(offset(&point, "y"), Some(24));
    assert_eq!(point.instance_size(), Some(28));
    let linked = point.linked().unwrap();
    assert_eq!(linked.reference_offsets().iter().collect::<Vec<_>>(), vec![8]);
    assert_eq!(offset(&point, "ORIGIN"), Some(0));
    assert_eq!(offset(&point, "count"), Some(4));
    assert_eq!(linked.static_size(), 8);
    assert_eq!(
        linked.static_reference_offsets().iter().collect::<Vec<_>>(),
        vec![0]
    );

    let layout = |class: &classlink::Class| {
        class
            .fields()
            .iter()
            .map(|f| (f.name().to_owned(), f.offset()))
            .collect::<Vec<_>>()
    };
    let point_layout = layout(&point);
    let point_vtable = point.vtable().to_vec();

    let point3 = linker.find_system_class("LPkg/Point3;").unwrap();
    let point3 = linker.class(point3).unwrap();
    assert_eq!(offset(&point3, "next"), Some(28));
    assert_eq!(offset(&point3, "w"), Some(32));
    assert_eq!(point3.instance_size(), Some(33));
    assert_eq!(
        point3.linked().unwrap().reference_offsets().iter().collect::<Vec<_>>(),
        vec![8, 28]
    );

    // Linking unrelated classes leaves Point as it was
    let other = linker.find_system_class("LPkg/Other;").unwrap();
    let other = linker.class(other).unwrap();
    assert_eq!(offset(&other, "peer"), Some(8));
    assert_eq!(offset(&other, "flag"), Some(12));
    assert_eq!(layout(&point), point_layout);
    assert_eq!(point.vtable(), point_vtable.as_slice());
    assert_eq!(point.instance_size(), Some(28));
    assert_eq!(point.linked().unwrap().static_size(), 8);

    // Looking it up again hands back the same, unchanged, class
    let again = linker.class(linker.find_system_class("LPkg/Point;").unwrap()).unwrap();
    assert!(std::sync::Arc::ptr_eq(&point, &again));
    assert_eq!(offset(&again, "z"), Some(16));
    assert_eq!(again.instance_size(), Some(28));
}

#[test]
fn loader_constraints_are_checked_across_loaders() {
    let boot = build(|b| {
        b.class("LPkg/Base;")
            .super_class(OBJECT)
            .method("take", "(LPkg/Thing;)V", PUBLIC)
            .method("size", "()I", PUBLIC)
            .finish();
    });
    let linker = linker(vec![boot]);

    let app = linker.register_container(build(|b| {
        b.class("LPkg/Thing;").super_class(OBJECT).finish();
        b.class("LPkg/Derived;")
            .super_class("LPkg/Base;")
            .method("take", "(LPkg/Thing;)V", PUBLIC)
            .finish();
        b.class("LPkg/Sizer;")
            .super_class("LPkg/Base;")
            .method("size", "()I", PUBLIC)
            .finish();
    }));
    let loader = linker.create_class_loader(&[app]).unwrap();

    // The loader defines its own Thing, which the bootstrap loader can't see
    assert!(matches!(
        linkage_error(linker.find_class("LPkg/Derived;", Some(loader))),
        LinkageError::LoaderConstraint { descriptor, .. } if descriptor == "LPkg/Thing;"
    ));

    let sizer = linker.find_class("LPkg/Sizer;", Some(loader)).unwrap();
    let base = linker.find_system_class("LPkg/Base;").unwrap();
    assert_eq!(
        linker.find_virtual_target(sizer, declared(&linker, base, "size", "()I")).unwrap(),
        declared(&linker, sizer, "size", "()I")
    );

    let thing = linker.find_class("LPkg/Thing;", Some(loader)).unwrap();
    assert!(!linker.same_descriptor_classes("LPkg/Thing;", sizer, base).unwrap());
    assert!(linker.same_descriptor_classes("Ljava/lang/String;", sizer, base).unwrap());
    assert!(linker.same_descriptor_classes("[I", sizer, base).unwrap());
    assert!(linker.same_descriptor_classes("LPkg/Thing;", sizer, thing).unwrap());
}
