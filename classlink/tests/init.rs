use std::{sync::Arc, thread, time::Duration};

use classlink::{
    Class, ClassLinker, ClassRoot, ClassStatus, FieldValue, InitializationError, LinkError,
    Method, StaticInitializer,
};
use classlink_base::{
    container::{CodeRef, ConstantValue},
    flags::FieldAccessFlags,
    Container, ContainerBuilder,
};
use parking_lot::Mutex;

mod common;
use common::{linker_with, OBJECT};

/// Records which static initializers ran, in order
#[derive(Default)]
struct Recorder {
    runs: Mutex<Vec<String>>,
    failing: Vec<&'static str>,
}
impl Recorder {
    fn failing(failing: Vec<&'static str>) -> Recorder {
        Recorder {
            runs: Mutex::new(Vec::new()),
            failing,
        }
    }

    fn runs(&self) -> Vec<String> {
        self.runs.lock().clone()
    }
}
impl StaticInitializer for Recorder {
    fn run_static_initializer(
        &self,
        linker: &ClassLinker,
        class: &Class,
        method: &Method,
    ) -> Result<(), String> {
        assert!(method.is_class_initializer());
        // Give other threads the chance to pile up behind this one
        thread::sleep(Duration::from_millis(10));
        self.runs.lock().push(class.descriptor().to_owned());

        // Reaching the class again from its own initializer returns straight away
        linker
            .initialize_class(class.id())
            .map_err(|err| err.to_string())?;

        if let Some(index) = class.find_field("ready", "Z") {
            assert!(class.set_static_value(index, FieldValue::Boolean(true)));
        }

        if self.failing.iter().any(|x| *x == class.descriptor()) {
            Err("boom".to_owned())
        } else {
            Ok(())
        }
    }
}

fn counters() -> Container {
    let mut builder = ContainerBuilder::new("counters");
    builder
        .class("LPkg/Base;")
        .super_class(OBJECT)
        .field("ready", "Z", FieldAccessFlags::STATIC)
        .static_initializer(CodeRef(1))
        .finish();
    builder
        .class("LPkg/Sub;")
        .super_class("LPkg/Base;")
        .field("ready", "Z", FieldAccessFlags::STATIC)
        .static_initializer(CodeRef(2))
        .finish();
    builder
        .class("LPkg/Bad;")
        .super_class(OBJECT)
        .static_initializer(CodeRef(3))
        .finish();
    builder
        .class("LPkg/BadSub;")
        .super_class("LPkg/Bad;")
        .static_initializer(CodeRef(4))
        .finish();
    builder
        .class("LPkg/Plain;")
        .super_class(OBJECT)
        .finish();
    builder.build().unwrap()
}

fn ready(class: &Class) -> Option<FieldValue> {
    class.static_value(class.find_field("ready", "Z").unwrap())
}

#[test]
fn initializer_runs_exactly_once() {
    let recorder = Arc::new(Recorder::default());
    let (linker, _) = linker_with(vec![counters()], recorder.clone());
    let linker = Arc::new(linker);
    let base = linker.find_system_class("LPkg/Base;").unwrap();
    assert_eq!(linker.class(base).unwrap().status(), ClassStatus::Linked);
    assert_eq!(ready(&linker.class(base).unwrap()), None);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let linker = Arc::clone(&linker);
            thread::spawn(move || {
                linker.initialize_class(base).unwrap();
                // Nobody returns before the initializer has finished
                ready(&linker.class(base).unwrap())
            })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), Some(FieldValue::Boolean(true)));
    }

    assert_eq!(recorder.runs(), vec!["LPkg/Base;".to_owned()]);
    assert_eq!(linker.class(base).unwrap().status(), ClassStatus::Initialized);

    linker.initialize_class(base).unwrap();
    assert_eq!(recorder.runs().len(), 1);
}

#[test]
fn super_class_is_initialized_first() {
    let recorder = Arc::new(Recorder::default());
    let (linker, _) = linker_with(vec![counters()], recorder.clone());
    let sub = linker.find_system_class("LPkg/Sub;").unwrap();
    linker.initialize_class(sub).unwrap();

    assert_eq!(
        recorder.runs(),
        vec!["LPkg/Base;".to_owned(), "LPkg/Sub;".to_owned()]
    );
    let base = linker.find_system_class("LPkg/Base;").unwrap();
    assert_eq!(linker.class(base).unwrap().status(), ClassStatus::Initialized);
    let object = linker.class(linker.class_root(ClassRoot::JavaLangObject)).unwrap();
    assert_eq!(object.status(), ClassStatus::Initialized);

    // A class without an initializer still gets its storage
    let plain = linker.find_system_class("LPkg/Plain;").unwrap();
    linker.initialize_class(plain).unwrap();
    let plain = linker.class(plain).unwrap();
    assert_eq!(plain.status(), ClassStatus::Initialized);
    assert!(plain.static_storage().is_some());
    assert_eq!(recorder.runs().len(), 2);
}

#[test]
fn failed_initialization_is_permanent() {
    let recorder = Arc::new(Recorder::failing(vec!["LPkg/Bad;"]));
    let (linker, _) = linker_with(vec![counters()], recorder.clone());
    let bad = linker.find_system_class("LPkg/Bad;").unwrap();
    let bad_sub = linker.find_system_class("LPkg/BadSub;").unwrap();

    let err = linker.initialize_class(bad).unwrap_err();
    assert_eq!(
        err,
        LinkError::Initialization(InitializationError::InitializerFailed {
            class: "LPkg/Bad;".to_owned(),
            message: "boom".to_owned(),
        })
    );
    assert_eq!(linker.class(bad).unwrap().status(), ClassStatus::Error);

    // Not run again, and the same error every time
    assert_eq!(linker.initialize_class(bad), Err(err.clone()));
    assert_eq!(linker.find_system_class("LPkg/Bad;"), Err(err));
    assert_eq!(recorder.runs(), vec!["LPkg/Bad;".to_owned()]);

    assert_eq!(
        linker.initialize_class(bad_sub),
        Err(LinkError::Initialization(
            InitializationError::SuperClassFailed {
                class: "LPkg/BadSub;".to_owned(),
                super_class: "LPkg/Bad;".to_owned(),
            }
        ))
    );
    assert_eq!(linker.class(bad_sub).unwrap().status(), ClassStatus::Error);
    assert_eq!(recorder.runs().len(), 1);
}

#[test]
fn failing_initializer_runs_once_for_every_caller() {
    let recorder = Arc::new(Recorder::failing(vec!["LPkg/Bad;"]));
    let (linker, _) = linker_with(vec![counters()], recorder.clone());
    let linker = Arc::new(linker);
    let bad = linker.find_system_class("LPkg/Bad;").unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let linker = Arc::clone(&linker);
            thread::spawn(move || linker.initialize_class(bad))
        })
        .collect();
    let expected = Err(LinkError::Initialization(
        InitializationError::InitializerFailed {
            class: "LPkg/Bad;".to_owned(),
            message: "boom".to_owned(),
        },
    ));
    for handle in handles {
        assert_eq!(handle.join().unwrap(), expected);
    }

    assert_eq!(recorder.runs(), vec!["LPkg/Bad;".to_owned()]);
    assert_eq!(linker.class(bad).unwrap().status(), ClassStatus::Error);
}

#[test]
fn constants_are_stored_before_the_initializer_runs() {
    let mut builder = ContainerBuilder::new("constants");
    let constant = FieldAccessFlags::PUBLIC | FieldAccessFlags::STATIC | FieldAccessFlags::FINAL;
    builder
        .class("LPkg/Limits;")
        .super_class(OBJECT)
        .field_with_value("MAX", "I", constant, Some(ConstantValue::Int(7)))
        .field_with_value("ENABLED", "Z", constant, Some(ConstantValue::Int(1)))
        .field_with_value("LOW", "B", constant, Some(ConstantValue::Int(-1)))
        .field_with_value("BIG", "J", constant, Some(ConstantValue::Long(1 << 40)))
        .field_with_value("RATIO", "D", constant, Some(ConstantValue::Double(0.5)))
        .field("unset", "S", FieldAccessFlags::STATIC)
        .string_constant("GREETING", "hello")
        .string_constant("ALSO_GREETING", "hello")
        .field("ready", "Z", FieldAccessFlags::STATIC)
        .static_initializer(CodeRef(1))
        .finish();
    let recorder = Arc::new(Recorder::default());
    let (linker, gc) = linker_with(vec![builder.build().unwrap()], recorder);

    let limits = linker.find_system_class("LPkg/Limits;").unwrap();
    linker.initialize_class(limits).unwrap();
    let limits = linker.class(limits).unwrap();
    let value = |name: &str, descriptor: &str| {
        limits.static_value(limits.find_field(name, descriptor).unwrap())
    };

    assert_eq!(value("MAX", "I"), Some(FieldValue::Int(7)));
    assert_eq!(value("ENABLED", "Z"), Some(FieldValue::Boolean(true)));
    assert_eq!(value("LOW", "B"), Some(FieldValue::Byte(-1)));
    assert_eq!(value("BIG", "J"), Some(FieldValue::Long(1 << 40)));
    assert_eq!(value("RATIO", "D"), Some(FieldValue::Double(0.5)));
    assert_eq!(value("unset", "S"), Some(FieldValue::Short(0)));
    assert_eq!(value("ready", "Z"), Some(FieldValue::Boolean(true)));

    let greeting = match value("GREETING", "Ljava/lang/String;") {
        Some(FieldValue::Reference(Some(object))) => object,
        other => panic!("expected a string, got {:?}", other),
    };
    assert_eq!(
        value("ALSO_GREETING", "Ljava/lang/String;"),
        Some(FieldValue::Reference(Some(greeting)))
    );
    assert_eq!(linker.intern_string(b"hello").unwrap(), greeting);
    assert_eq!(
        gc.class_of(greeting),
        Some(linker.class_root(ClassRoot::JavaLangString))
    );

    // The string constant went through the container's resolution cache
    let container = limits.container().unwrap();
    let registered = linker.find_reference_cache(container).unwrap();
    let index = registered
        .container()
        .class_def(0)
        .and_then(|def| def.fields.iter().find_map(|f| match f.initial_value {
            Some(ConstantValue::String(idx)) => Some(idx),
            _ => None,
        }))
        .unwrap();
    assert_eq!(registered.cache().resolved_string(index), Some(greeting));
    assert_eq!(linker.resolve_string(limits.id(), index).unwrap(), greeting);
}

#[test]
fn arrays_and_primitives_need_no_initialization() {
    let (linker, _) = linker_with(Vec::new(), Arc::new(Recorder::default()));
    let ints = linker.class_root(ClassRoot::IntArrayClass);
    let int = linker.class_root(ClassRoot::PrimitiveInt);
    assert_eq!(linker.class(ints).unwrap().status(), ClassStatus::Initialized);
    linker.initialize_class(ints).unwrap();
    linker.initialize_class(int).unwrap();
    assert_eq!(linker.class(int).unwrap().status(), ClassStatus::Initialized);
}
