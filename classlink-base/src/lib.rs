#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::similar_names)]
// This would be nice to re-enable eventually, but not while in active dev
#![allow(clippy::missing_errors_doc)]
// Shadowing is nice.
#![allow(clippy::shadow_unrelated)]
// Cool idea but highlights entire function and is too aggressive.
#![allow(clippy::option_if_let_else)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::semicolon_if_nothing_returned)]
#![allow(clippy::enum_variant_names)]
// Container tables are indexed with u32 and they are never that large
#![allow(clippy::cast_possible_truncation)]

//! Data shared between the linker and the tools around it: ids, access flags, type descriptors,
//! and the definition containers classes are loaded from.

pub mod container;
pub mod descriptor;
pub mod flags;
pub mod id;
pub mod util;

pub use container::{Container, ContainerBuilder, ContainerError};
pub use descriptor::{DescriptorError, PrimitiveType};
pub use id::{ClassId, ContainerId, LoaderId, MethodId};

/// The descriptor of the root of the class hierarchy
pub const OBJECT_DESCRIPTOR: &str = "Ljava/lang/Object;";
/// Name of the static initializer method
pub const CLASS_INITIALIZER_NAME: &str = "<clinit>";
/// Name of instance constructors
pub const CONSTRUCTOR_NAME: &str = "<init>";
