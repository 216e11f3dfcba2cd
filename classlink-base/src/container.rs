//! In-memory form of a definition container: an indexed bundle of class definitions along with
//! the string and type tables they refer into.
//!
//! Containers are immutable once built. Symbolic references inside a class definition (super
//! types, interfaces, field types, constant strings) are indices into the owning container's
//! tables, which is what the per-container resolution caches are keyed by.

use std::fmt;

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::{
    descriptor::{validate_type_descriptor, DescriptorError, MethodDescriptor},
    flags::{ClassAccessFlags, FieldAccessFlags, MethodAccessFlags},
    id::{StringIndex, TypeIndex},
    util,
};

/// A constant initial value for a static field
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConstantValue {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    /// A string from the container's string table, interned when the class is initialized
    String(StringIndex),
}

/// Opaque handle to executable code, passed through to the static initializer runner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CodeRef(pub u32);

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: StringIndex,
    pub type_idx: TypeIndex,
    pub access_flags: FieldAccessFlags,
    pub initial_value: Option<ConstantValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodDef {
    pub name: StringIndex,
    pub descriptor: StringIndex,
    pub access_flags: MethodAccessFlags,
    pub code: Option<CodeRef>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassDef {
    pub class_type: TypeIndex,
    pub access_flags: ClassAccessFlags,
    pub super_type: Option<TypeIndex>,
    pub interfaces: SmallVec<[TypeIndex; 4]>,
    pub fields: Vec<FieldDef>,
    pub methods: Vec<MethodDef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ContainerError {
    BadStringIndex(StringIndex),
    BadTypeIndex(TypeIndex),
    /// The string was not valid (modified) utf8
    InvalidString(StringIndex),
    InvalidDescriptor {
        descriptor: String,
        error: DescriptorError,
    },
    /// Two definitions in the same container share a descriptor
    DuplicateClass(String),
}
impl fmt::Display for ContainerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerError::BadStringIndex(idx) => write!(f, "bad string index {}", idx.0),
            ContainerError::BadTypeIndex(idx) => write!(f, "bad type index {}", idx.0),
            ContainerError::InvalidString(idx) => write!(f, "string {} is not valid utf8", idx.0),
            ContainerError::InvalidDescriptor { descriptor, error } => {
                write!(f, "invalid descriptor '{}': {}", descriptor, error)
            }
            ContainerError::DuplicateClass(desc) => {
                write!(f, "class '{}' is defined more than once", desc)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Container {
    name: String,
    /// Modified utf8 bytes of each string
    strings: Vec<Box<[u8]>>,
    /// Each type is a string holding its descriptor
    types: Vec<StringIndex>,
    class_defs: Vec<ClassDef>,
    /// Class descriptor -> index into `class_defs`
    class_def_index: IndexMap<String, usize>,
}
impl Container {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn get_bytes(&self, idx: StringIndex) -> Option<&[u8]> {
        self.strings.get(idx.index()).map(AsRef::as_ref)
    }

    pub fn get_text(&self, idx: StringIndex) -> Result<&str, ContainerError> {
        let bytes = self
            .get_bytes(idx)
            .ok_or(ContainerError::BadStringIndex(idx))?;
        std::str::from_utf8(bytes).map_err(|_| ContainerError::InvalidString(idx))
    }

    pub fn get_type_descriptor(&self, idx: TypeIndex) -> Result<&str, ContainerError> {
        let string = *self
            .types
            .get(idx.index())
            .ok_or(ContainerError::BadTypeIndex(idx))?;
        self.get_text(string)
    }

    #[must_use]
    pub fn string_count(&self) -> usize {
        self.strings.len()
    }

    #[must_use]
    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    #[must_use]
    pub fn class_defs(&self) -> &[ClassDef] {
        &self.class_defs
    }

    #[must_use]
    pub fn class_def(&self, index: usize) -> Option<&ClassDef> {
        self.class_defs.get(index)
    }

    /// Find the definition for the given class descriptor
    #[must_use]
    pub fn find_class_def(&self, descriptor: &str) -> Option<(usize, &ClassDef)> {
        let index = *self.class_def_index.get(descriptor)?;
        Some((index, &self.class_defs[index]))
    }

    /// Descriptors of every class defined, in definition order
    pub fn class_descriptors(&self) -> impl Iterator<Item = &str> {
        self.class_def_index.keys().map(String::as_str)
    }

    /// Lossy text of a string, for diagnostics
    #[must_use]
    pub fn display_string(&self, idx: StringIndex) -> String {
        self.get_bytes(idx)
            .map_or_else(|| format!("<bad string {}>", idx.0), |x| {
                util::convert_classfile_text(x).into_owned()
            })
    }
}

/// Builds a [`Container`], deduplicating its strings and types.
///
/// ```ignore
/// let mut builder = ContainerBuilder::new("app");
/// builder
///     .class("LPkg/Widget;")
///     .super_class("Ljava/lang/Object;")
///     .method("run", "()V", MethodAccessFlags::PUBLIC)
///     .finish();
/// let container = builder.build()?;
/// ```
#[derive(Debug, Default)]
pub struct ContainerBuilder {
    name: String,
    strings: IndexMap<Box<[u8]>, ()>,
    types: IndexMap<StringIndex, ()>,
    class_defs: Vec<ClassDef>,
}
impl ContainerBuilder {
    #[must_use]
    pub fn new(name: impl Into<String>) -> ContainerBuilder {
        ContainerBuilder {
            name: name.into(),
            ..ContainerBuilder::default()
        }
    }

    pub fn string(&mut self, text: &str) -> StringIndex {
        self.string_bytes(&cesu8::to_java_cesu8(text))
    }

    pub fn string_bytes(&mut self, bytes: &[u8]) -> StringIndex {
        let (index, _) = self.strings.insert_full(Box::from(bytes), ());
        StringIndex(index as u32)
    }

    /// Add a type descriptor. The descriptor is checked when the container is built.
    pub fn type_descriptor(&mut self, descriptor: &str) -> TypeIndex {
        let string = self.string(descriptor);
        let (index, _) = self.types.insert_full(string, ());
        TypeIndex(index as u32)
    }

    /// Start a new class definition. It is added once [`ClassDefBuilder::finish`] is called.
    pub fn class(&mut self, descriptor: &str) -> ClassDefBuilder<'_> {
        let class_type = self.type_descriptor(descriptor);
        ClassDefBuilder {
            builder: self,
            def: ClassDef {
                class_type,
                access_flags: ClassAccessFlags::PUBLIC,
                super_type: None,
                interfaces: SmallVec::new(),
                fields: Vec::new(),
                methods: Vec::new(),
            },
        }
    }

    pub fn push_class_def(&mut self, def: ClassDef) {
        self.class_defs.push(def);
    }

    /// Finish the container, validating the descriptors it references.
    /// Member descriptors are only checked when a class using them is loaded.
    pub fn build(self) -> Result<Container, ContainerError> {
        let strings: Vec<Box<[u8]>> = self.strings.into_iter().map(|(s, _)| s).collect();
        let types: Vec<StringIndex> = self.types.into_iter().map(|(t, _)| t).collect();

        let mut container = Container {
            name: self.name,
            strings,
            types,
            class_defs: Vec::new(),
            class_def_index: IndexMap::new(),
        };

        for idx in 0..container.types.len() {
            let descriptor = container.get_type_descriptor(TypeIndex(idx as u32))?;
            validate_type_descriptor(descriptor).map_err(|error| {
                ContainerError::InvalidDescriptor {
                    descriptor: descriptor.to_owned(),
                    error,
                }
            })?;
        }

        let mut class_def_index = IndexMap::with_capacity(self.class_defs.len());
        for (index, def) in self.class_defs.iter().enumerate() {
            let descriptor = container.get_type_descriptor(def.class_type)?.to_owned();
            if class_def_index.insert(descriptor.clone(), index).is_some() {
                tracing::warn!(
                    "Container {} defines {} more than once",
                    container.name,
                    descriptor
                );
                return Err(ContainerError::DuplicateClass(descriptor));
            }
        }

        container.class_defs = self.class_defs;
        container.class_def_index = class_def_index;

        Ok(container)
    }
}

pub struct ClassDefBuilder<'a> {
    builder: &'a mut ContainerBuilder,
    def: ClassDef,
}
impl<'a> ClassDefBuilder<'a> {
    #[must_use]
    pub fn access(mut self, flags: ClassAccessFlags) -> Self {
        self.def.access_flags = flags;
        self
    }

    #[must_use]
    pub fn super_class(mut self, descriptor: &str) -> Self {
        self.def.super_type = Some(self.builder.type_descriptor(descriptor));
        self
    }

    #[must_use]
    pub fn interface(mut self, descriptor: &str) -> Self {
        let idx = self.builder.type_descriptor(descriptor);
        self.def.interfaces.push(idx);
        self
    }

    /// Add a string to the container's table, such as the value of a string constant
    pub fn string(&mut self, text: &str) -> StringIndex {
        self.builder.string(text)
    }

    #[must_use]
    pub fn field(self, name: &str, descriptor: &str, flags: FieldAccessFlags) -> Self {
        self.field_with_value(name, descriptor, flags, None)
    }

    #[must_use]
    pub fn field_with_value(
        mut self,
        name: &str,
        descriptor: &str,
        flags: FieldAccessFlags,
        initial_value: Option<ConstantValue>,
    ) -> Self {
        let name = self.builder.string(name);
        let type_idx = self.builder.type_descriptor(descriptor);
        self.def.fields.push(FieldDef {
            name,
            type_idx,
            access_flags: flags,
            initial_value,
        });
        self
    }

    /// A static field initialized with a string constant
    #[must_use]
    pub fn string_constant(mut self, name: &str, value: &str) -> Self {
        let value = self.builder.string(value);
        self = self.field_with_value(
            name,
            "Ljava/lang/String;",
            FieldAccessFlags::PUBLIC | FieldAccessFlags::STATIC | FieldAccessFlags::FINAL,
            Some(ConstantValue::String(value)),
        );
        self
    }

    #[must_use]
    pub fn method(self, name: &str, descriptor: &str, flags: MethodAccessFlags) -> Self {
        self.method_with_code(name, descriptor, flags, None)
    }

    #[must_use]
    pub fn method_with_code(
        mut self,
        name: &str,
        descriptor: &str,
        flags: MethodAccessFlags,
        code: Option<CodeRef>,
    ) -> Self {
        let name = self.builder.string(name);
        let descriptor = self.builder.string(descriptor);
        self.def.methods.push(MethodDef {
            name,
            descriptor,
            access_flags: flags,
            code,
        });
        self
    }

    /// Add a `<clinit>` static initializer
    #[must_use]
    pub fn static_initializer(self, code: CodeRef) -> Self {
        self.method_with_code("<clinit>", "()V", MethodAccessFlags::STATIC, Some(code))
    }

    pub fn finish(self) {
        self.builder.class_defs.push(self.def);
    }
}

/// Check that a method descriptor in the container parses
pub fn parse_method_descriptor(text: &str) -> Result<MethodDescriptor, ContainerError> {
    MethodDescriptor::from_text(text).map_err(|error| ContainerError::InvalidDescriptor {
        descriptor: text.to_owned(),
        error,
    })
}
