#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::similar_names)]
// This would be nice to re-enable eventually, but not while in active dev
#![allow(clippy::missing_errors_doc)]
// Shadowing is nice.
#![allow(clippy::shadow_unrelated)]
// Not awful, but it highlights entire function.
#![allow(clippy::unnecessary_wraps)]
// Cool idea but highlights entire function and is too aggressive.
#![allow(clippy::option_if_let_else)]
#![allow(clippy::missing_panics_doc)]
// This is nice to have for cases where we might want to rely on it not returning anything.
#![allow(clippy::semicolon_if_nothing_returned)]
#![allow(clippy::enum_variant_names)]
#![allow(clippy::too_many_lines)]
// Tables are indexed with u32 and u16 and the linker rejects anything larger before casting
#![allow(clippy::cast_possible_truncation)]

//! Loading, linking, and initialization of classes for a managed runtime.
//!
//! The entry point is [`ClassLinker`], which is created from a boot class path of
//! [`Container`](classlink_base::Container)s. It publishes every class exactly once per
//! `(descriptor, defining loader)`, builds its dispatch tables and field layout, and runs its
//! static initialization at most once, even with many threads asking at the same time.

use std::fmt;

use classlink_base::{
    descriptor::DescriptorError,
    id::{ClassId, ContainerId, LoaderId, MethodId},
    ContainerError,
};

pub mod bootstrap;
pub mod class;
pub mod class_linker;
pub mod gc;
pub mod heap;
pub mod init;
mod intern;
mod link;
mod load;
pub mod resolve;
mod table;
mod validate;

pub use bootstrap::ClassRoot;
pub use class::{Class, ClassStatus, Field, FieldValue, Method};
pub use class_linker::{ClassLinker, Collaborators};
pub use heap::{Heap, ObjectRef, Root, RootVisitor};
pub use init::{NoStaticInitializer, StaticInitializer};

/// Environment variable used to choose the logging level
pub const ENV_TRACING_LEVEL: &str = "CLASSLINK_LOG_LEVEL";
const DEFAULT_TRACING_LEVEL: tracing::Level = tracing::Level::WARN;

#[derive(Debug, Clone)]
pub struct LinkerConfig {
    pub tracing_level: tracing::Level,
    /// Log every class as it is published, at info rather than trace
    pub log_class_loading: bool,
    /// Reject members which have more than one visibility modifier
    pub verify_access_flags: bool,
    /// Supply minimal definitions for root classes missing from the boot class path
    pub synthesize_missing_roots: bool,
}
impl LinkerConfig {
    #[must_use]
    pub fn new() -> LinkerConfig {
        let tracing_level = LinkerConfig::compute_tracing_level();
        LinkerConfig {
            tracing_level,
            log_class_loading: false,
            verify_access_flags: true,
            synthesize_missing_roots: true,
        }
    }

    #[must_use]
    pub fn compute_tracing_level() -> tracing::Level {
        let env_log = std::env::var(ENV_TRACING_LEVEL);
        if let Ok(env_log) = env_log {
            if env_log.eq_ignore_ascii_case("trace") || env_log == "*" {
                tracing::Level::TRACE
            } else if env_log.eq_ignore_ascii_case("debug") {
                tracing::Level::DEBUG
            } else if env_log.eq_ignore_ascii_case("info") {
                tracing::Level::INFO
            } else if env_log.eq_ignore_ascii_case("warn") {
                tracing::Level::WARN
            } else if env_log.eq_ignore_ascii_case("error") {
                tracing::Level::ERROR
            } else {
                DEFAULT_TRACING_LEVEL
            }
        } else {
            DEFAULT_TRACING_LEVEL
        }
    }
}
impl Default for LinkerConfig {
    fn default() -> Self {
        Self::new()
    }
}

// Note: Currently all of these errors use non_exhaustive, but in the future that may be removed
// on some if there is a belief that they are likely to be stable.
// They are all Clone since a class keeps the error it failed with and hands it to every later
// lookup.

#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum LinkError {
    /// No container on the loader's search path defines the type
    NotFound {
        descriptor: String,
        loader: Option<LoaderId>,
    },
    Malformed(MalformedError),
    Linkage(LinkageError),
    Initialization(InitializationError),
    /// Dispatch reached a method without an implementation
    AbstractMethod { method: MethodId },
    /// The receiver does not inherit the method being dispatched
    IncompatibleReceiver { receiver: ClassId, method: MethodId },
    /// The class was not loaded from a container, so it has no symbolic references
    NoContainer(ClassId),
    BadClassId(ClassId),
    BadContainerId(ContainerId),
    BadLoaderId(LoaderId),
    BadMethodId(MethodId),
    /// The container is already on the search path of a loader
    ContainerAlreadyOwned(ContainerId),
    /// The general lookup path was used before the root classes were set up
    NotBootstrapped,
    /// The heap refused an array allocation of this length
    ArrayTooLarge { class: String, length: u32 },
}
impl From<MalformedError> for LinkError {
    fn from(err: MalformedError) -> Self {
        Self::Malformed(err)
    }
}
impl From<ContainerError> for LinkError {
    fn from(err: ContainerError) -> Self {
        Self::Malformed(MalformedError::Container(err))
    }
}
impl From<LinkageError> for LinkError {
    fn from(err: LinkageError) -> Self {
        Self::Linkage(err)
    }
}
impl From<InitializationError> for LinkError {
    fn from(err: InitializationError) -> Self {
        Self::Initialization(err)
    }
}
impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::NotFound { descriptor, loader } => match loader {
                Some(loader) => write!(
                    f,
                    "class {} not found by loader {}",
                    descriptor,
                    loader.get()
                ),
                None => write!(f, "class {} not found on the boot class path", descriptor),
            },
            LinkError::Malformed(err) => write!(f, "malformed definition: {}", err),
            LinkError::Linkage(err) => write!(f, "linkage error: {}", err),
            LinkError::Initialization(err) => write!(f, "initialization error: {}", err),
            LinkError::AbstractMethod { method } => {
                let (class, index) = method.decompose();
                write!(f, "method {} of class #{} is abstract", index, class.get())
            }
            LinkError::IncompatibleReceiver { receiver, method } => {
                let (class, index) = method.decompose();
                write!(
                    f,
                    "class #{} does not inherit method {} of class #{}",
                    receiver.get(),
                    index,
                    class.get()
                )
            }
            LinkError::NoContainer(id) => write!(f, "class #{} has no container", id.get()),
            LinkError::BadClassId(id) => write!(f, "bad class id #{}", id.get()),
            LinkError::BadContainerId(id) => write!(f, "bad container id #{}", id.get()),
            LinkError::BadLoaderId(id) => write!(f, "bad loader id #{}", id.get()),
            LinkError::BadMethodId(id) => {
                let (class, index) = id.decompose();
                write!(f, "bad method id {} of class #{}", index, class.get())
            }
            LinkError::ContainerAlreadyOwned(id) => {
                write!(f, "container #{} already belongs to a loader", id.get())
            }
            LinkError::NotBootstrapped => write!(f, "the class linker is not bootstrapped"),
            LinkError::ArrayTooLarge { class, length } => {
                write!(f, "can't allocate {} of length {}", class, length)
            }
        }
    }
}
impl std::error::Error for LinkError {}

/// The definition itself is unusable, independent of any other class
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum MalformedError {
    Container(ContainerError),
    Descriptor {
        descriptor: String,
        error: DescriptorError,
    },
    /// Class flags which contradict each other, like an interface that is final
    InvalidClassFlags { class: String },
    /// A member with more than one of public/protected/private
    IncompatibleVisibility { class: String, member: String },
    DuplicateField {
        class: String,
        name: String,
        descriptor: String,
    },
    DuplicateMethod {
        class: String,
        name: String,
        descriptor: String,
    },
    /// Interfaces may only declare static fields
    InterfaceInstanceField { class: String, field: String },
    /// A constant value of the wrong kind for its field
    ConstantTypeMismatch { class: String, field: String },
    /// A class other than the root of the hierarchy without a super class
    MissingSuperClass { class: String },
    /// The root of the hierarchy declared a super class
    RootHasSuperClass,
    /// More members than can be indexed
    TooManyMembers { class: String },
    /// A root class lacks a field the linker writes to, like the contents of a string
    MissingRootField {
        class: String,
        name: String,
        descriptor: String,
    },
}
impl fmt::Display for MalformedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MalformedError::Container(err) => err.fmt(f),
            MalformedError::Descriptor { descriptor, error } => {
                write!(f, "bad descriptor '{}': {}", descriptor, error)
            }
            MalformedError::InvalidClassFlags { class } => {
                write!(f, "{} has contradictory access flags", class)
            }
            MalformedError::IncompatibleVisibility { class, member } => {
                write!(f, "{}.{} has more than one visibility modifier", class, member)
            }
            MalformedError::DuplicateField {
                class,
                name,
                descriptor,
            } => write!(f, "{} declares field {} {} twice", class, name, descriptor),
            MalformedError::DuplicateMethod {
                class,
                name,
                descriptor,
            } => write!(f, "{} declares method {}{} twice", class, name, descriptor),
            MalformedError::InterfaceInstanceField { class, field } => {
                write!(f, "interface {} declares instance field {}", class, field)
            }
            MalformedError::ConstantTypeMismatch { class, field } => {
                write!(f, "constant value of {}.{} does not match its type", class, field)
            }
            MalformedError::MissingSuperClass { class } => {
                write!(f, "{} has no super class", class)
            }
            MalformedError::RootHasSuperClass => {
                write!(f, "the root class declares a super class")
            }
            MalformedError::TooManyMembers { class } => {
                write!(f, "{} declares too many members", class)
            }
            MalformedError::MissingRootField {
                class,
                name,
                descriptor,
            } => write!(f, "root class {} has no field {} {}", class, name, descriptor),
        }
    }
}

/// The definition is inconsistent with the classes it refers to
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum LinkageError {
    /// The class is, directly or indirectly, its own super type
    CircularInheritance { class: String },
    SuperClassFinal { class: String, super_class: String },
    SuperClassInterface { class: String, super_class: String },
    NotAnInterface { class: String, interface: String },
    /// Interfaces must have the root class as their super class
    InterfaceSuperNotObject { class: String },
    /// A super type which is neither public nor in the same runtime package
    InaccessibleClass { class: String, target: String },
    OverridesFinal { class: String, method: String },
    /// An override with less visibility than the method it overrides
    WeakerAccess { class: String, method: String },
    /// A type named in an overriding signature resolves to different classes in the two loaders
    LoaderConstraint {
        class: String,
        method: String,
        descriptor: String,
    },
    /// A concrete class does not implement an interface method
    UnimplementedInterfaceMethod {
        class: String,
        interface: String,
        method: String,
    },
    /// The method implementing an interface method is not public
    NonPublicImplementation { class: String, method: String },
    TooManyMethods { class: String },
}
impl fmt::Display for LinkageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkageError::CircularInheritance { class } => {
                write!(f, "{} inherits from itself", class)
            }
            LinkageError::SuperClassFinal { class, super_class } => {
                write!(f, "{} extends final class {}", class, super_class)
            }
            LinkageError::SuperClassInterface { class, super_class } => {
                write!(f, "{} extends interface {}", class, super_class)
            }
            LinkageError::NotAnInterface { class, interface } => {
                write!(f, "{} implements non-interface {}", class, interface)
            }
            LinkageError::InterfaceSuperNotObject { class } => {
                write!(f, "interface {} has a super class other than the root", class)
            }
            LinkageError::InaccessibleClass { class, target } => {
                write!(f, "{} cannot access {}", class, target)
            }
            LinkageError::OverridesFinal { class, method } => {
                write!(f, "{}.{} overrides a final method", class, method)
            }
            LinkageError::WeakerAccess { class, method } => {
                write!(f, "{}.{} weakens the access of the method it overrides", class, method)
            }
            LinkageError::LoaderConstraint {
                class,
                method,
                descriptor,
            } => write!(
                f,
                "{}.{}: {} resolves differently in the overriding and overridden loaders",
                class, method, descriptor
            ),
            LinkageError::UnimplementedInterfaceMethod {
                class,
                interface,
                method,
            } => write!(
                f,
                "{} does not implement {}.{}",
                class, interface, method
            ),
            LinkageError::NonPublicImplementation { class, method } => {
                write!(f, "{}.{} implements an interface method but is not public", class, method)
            }
            LinkageError::TooManyMethods { class } => {
                write!(f, "{} has too many virtual methods", class)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum InitializationError {
    /// The static initializer reported a failure
    InitializerFailed { class: String, message: String },
    /// The super class could not be initialized
    SuperClassFailed { class: String, super_class: String },
}
impl fmt::Display for InitializationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitializationError::InitializerFailed { class, message } => {
                write!(f, "static initializer of {} failed: {}", class, message)
            }
            InitializationError::SuperClassFailed { class, super_class } => {
                write!(f, "{} could not be initialized since {} failed", class, super_class)
            }
        }
    }
}
