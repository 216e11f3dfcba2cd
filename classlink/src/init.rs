use std::{sync::Arc, thread};

use classlink_base::{container::ConstantValue, descriptor::PrimitiveType};

use crate::{
    class::{Class, ClassStatus, FieldValue, Method, StaticStorage},
    class_linker::ClassLinker,
    resolve, InitializationError, LinkError, LinkageError,
};

/// Runs a class's static initializer (`<clinit>`). Executing code is outside of what the linker
/// does, so this is supplied by whatever embeds it.
pub trait StaticInitializer: Send + Sync {
    /// Run the initializer. The class's static storage is allocated, and holds the constant
    /// values of its fields. An `Err` puts the class permanently into the error state.
    fn run_static_initializer(
        &self,
        linker: &ClassLinker,
        class: &Class,
        method: &Method,
    ) -> Result<(), String>;
}

/// Treats every static initializer as doing nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoStaticInitializer;
impl StaticInitializer for NoStaticInitializer {
    fn run_static_initializer(
        &self,
        _linker: &ClassLinker,
        class: &Class,
        _method: &Method,
    ) -> Result<(), String> {
        tracing::trace!("Skipping static initializer of {}", class.descriptor());
        Ok(())
    }
}

/// Initialize the class at most once.
/// Other threads wait while one thread initializes it, while the initializing thread itself
/// returns immediately if it reaches the class again (such as from its own static initializer).
pub(crate) fn initialize_class(linker: &ClassLinker, class: &Arc<Class>) -> Result<(), LinkError> {
    linker.ensure_linked(class)?;

    let me = thread::current().id();
    {
        let mut state = class.lock_state();
        loop {
            match state.status {
                ClassStatus::Initialized => return Ok(()),
                ClassStatus::Error => {
                    return Err(state.failure.clone().unwrap_or_else(|| {
                        LinkageError::CircularInheritance {
                            class: class.descriptor().to_owned(),
                        }
                        .into()
                    }))
                }
                ClassStatus::Initializing if state.owner == Some(me) => {
                    tracing::trace!("Recursive initialization of {}", class.descriptor());
                    return Ok(());
                }
                ClassStatus::Linked => {
                    state.status = ClassStatus::Initializing;
                    state.owner = Some(me);
                    break;
                }
                // Another thread is initializing it, or still finishing linking it
                _ => class.wait_state(&mut state),
            }
        }
    }

    tracing::debug!("Initializing {}", class.descriptor());
    match run_initialization(linker, class) {
        Ok(()) => {
            class.finish(ClassStatus::Initialized);
            tracing::debug!("Initialized {}", class.descriptor());
            Ok(())
        }
        Err(err) => {
            tracing::warn!("Failed to initialize {}: {}", class.descriptor(), err);
            class.fail(err.clone());
            Err(err)
        }
    }
}

fn run_initialization(linker: &ClassLinker, class: &Arc<Class>) -> Result<(), LinkError> {
    if let Some(super_id) = class.super_class() {
        let super_class = linker.class(super_id)?;
        if initialize_class(linker, &super_class).is_err() {
            return Err(InitializationError::SuperClassFailed {
                class: class.descriptor().to_owned(),
                super_class: super_class.descriptor().to_owned(),
            }
            .into());
        }
    }

    let static_size = class.linked().map_or(0, |linked| linked.static_size());
    let statics = class.statics.get_or_init(|| StaticStorage::new(static_size));
    write_constants(linker, class, statics)?;

    if let Some(method) = class.class_initializer() {
        linker
            .static_initializer
            .run_static_initializer(linker, class, method)
            .map_err(|message| InitializationError::InitializerFailed {
                class: class.descriptor().to_owned(),
                message,
            })?;
    }

    Ok(())
}

/// Store the constant initial values of the static fields
fn write_constants(
    linker: &ClassLinker,
    class: &Arc<Class>,
    statics: &StaticStorage,
) -> Result<(), LinkError> {
    for field in class.fields().iter().filter(|f| f.is_static()) {
        let constant = match field.initial_value() {
            Some(constant) => constant,
            None => continue,
        };

        let value = match constant {
            ConstantValue::Int(x) => match field.descriptor().primitive() {
                Some(PrimitiveType::Boolean) => FieldValue::Boolean(x != 0),
                Some(PrimitiveType::Byte) => FieldValue::Byte(x as i8),
                Some(PrimitiveType::Char) => FieldValue::Char(x as u16),
                Some(PrimitiveType::Short) => FieldValue::Short(x as i16),
                _ => FieldValue::Int(x),
            },
            ConstantValue::Long(x) => FieldValue::Long(x),
            ConstantValue::Float(x) => FieldValue::Float(x),
            ConstantValue::Double(x) => FieldValue::Double(x),
            ConstantValue::String(idx) => {
                FieldValue::Reference(Some(resolve::resolve_string(linker, class, idx)?))
            }
        };

        // Loading already checked that the constant fits the field
        let written = statics.write_value(field, value);
        debug_assert!(written, "{}.{} constant not written", class.descriptor(), field.name());
    }

    Ok(())
}
