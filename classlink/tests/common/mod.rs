#![allow(dead_code)]

use std::sync::{Arc, Once};

use classlink::{
    class_linker::Collaborators, gc::Gc, ClassLinker, LinkerConfig, NoStaticInitializer,
    StaticInitializer,
};
use classlink_base::{flags::ClassAccessFlags, Container};

pub const OBJECT: &str = "Ljava/lang/Object;";

static LOGGING: Once = Once::new();

/// Surface linker logs in test output, at the level in `CLASSLINK_LOG_LEVEL`
pub fn init_logging() {
    LOGGING.call_once(|| {
        let level = LinkerConfig::compute_tracing_level();
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_test_writer()
            .try_init();
    });
}

pub fn interface() -> ClassAccessFlags {
    ClassAccessFlags::PUBLIC | ClassAccessFlags::INTERFACE | ClassAccessFlags::ABSTRACT
}

pub fn linker(boot: Vec<Container>) -> ClassLinker {
    linker_with(boot, Arc::new(NoStaticInitializer)).0
}

/// A linker with the given static initializer, and the heap it allocates from
pub fn linker_with(
    boot: Vec<Container>,
    static_initializer: Arc<dyn StaticInitializer>,
) -> (ClassLinker, Arc<Gc>) {
    init_logging();

    let gc = Arc::new(Gc::new());
    let collaborators = Collaborators {
        heap: gc.clone(),
        static_initializer,
    };
    let linker = ClassLinker::create(boot, LinkerConfig::new(), collaborators)
        .expect("bootstrap should succeed");
    (linker, gc)
}
