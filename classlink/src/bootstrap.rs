//! Creation of the root classes.
//!
//! The metaclass, the root class and the primitive types depend on each other, so they are
//! published in a fixed order before the general lookup path is opened up. Everything else is
//! then found through the boot class path like any other class.

use std::sync::Arc;

use classlink_base::{
    descriptor::PrimitiveType,
    flags::{ClassAccessFlags, FieldAccessFlags, MethodAccessFlags},
    id::ClassId,
    Container, ContainerBuilder, ContainerError, CONSTRUCTOR_NAME, OBJECT_DESCRIPTOR,
};
use smallvec::SmallVec;

use crate::{
    class::{Class, ClassKind, LoadedClass},
    class_linker::ClassLinker,
    LinkError,
};

/// Name of the container holding the synthesized root class definitions
pub const SYNTHETIC_CONTAINER_NAME: &str = "<synthetic roots>";

/// The interfaces every array type implements
pub const ARRAY_INTERFACES: [&str; 2] = ["Ljava/lang/Cloneable;", "Ljava/io/Serializable;"];

/// Classes the linker itself needs to know about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClassRoot {
    JavaLangClass,
    JavaLangObject,
    ObjectArrayClass,
    JavaLangString,
    CharArrayClass,
    IntArrayClass,
    LongArrayClass,
    JavaLangReflectField,
    JavaLangReflectMethod,
    JavaLangClassLoader,
    BaseDexClassLoader,
    PathClassLoader,
    PrimitiveBoolean,
    PrimitiveChar,
    PrimitiveFloat,
    PrimitiveDouble,
    PrimitiveByte,
    PrimitiveShort,
    PrimitiveInt,
    PrimitiveLong,
    PrimitiveVoid,
}
impl ClassRoot {
    pub const COUNT: usize = 21;

    /// Every root, in the order they are set up
    pub const ALL: [ClassRoot; ClassRoot::COUNT] = [
        ClassRoot::JavaLangClass,
        ClassRoot::JavaLangObject,
        ClassRoot::ObjectArrayClass,
        ClassRoot::JavaLangString,
        ClassRoot::CharArrayClass,
        ClassRoot::IntArrayClass,
        ClassRoot::LongArrayClass,
        ClassRoot::JavaLangReflectField,
        ClassRoot::JavaLangReflectMethod,
        ClassRoot::JavaLangClassLoader,
        ClassRoot::BaseDexClassLoader,
        ClassRoot::PathClassLoader,
        ClassRoot::PrimitiveBoolean,
        ClassRoot::PrimitiveChar,
        ClassRoot::PrimitiveFloat,
        ClassRoot::PrimitiveDouble,
        ClassRoot::PrimitiveByte,
        ClassRoot::PrimitiveShort,
        ClassRoot::PrimitiveInt,
        ClassRoot::PrimitiveLong,
        ClassRoot::PrimitiveVoid,
    ];

    #[must_use]
    pub fn descriptor(self) -> &'static str {
        match self {
            ClassRoot::JavaLangClass => "Ljava/lang/Class;",
            ClassRoot::JavaLangObject => OBJECT_DESCRIPTOR,
            ClassRoot::ObjectArrayClass => "[Ljava/lang/Object;",
            ClassRoot::JavaLangString => "Ljava/lang/String;",
            ClassRoot::CharArrayClass => "[C",
            ClassRoot::IntArrayClass => "[I",
            ClassRoot::LongArrayClass => "[J",
            ClassRoot::JavaLangReflectField => "Ljava/lang/reflect/Field;",
            ClassRoot::JavaLangReflectMethod => "Ljava/lang/reflect/Method;",
            ClassRoot::JavaLangClassLoader => "Ljava/lang/ClassLoader;",
            ClassRoot::BaseDexClassLoader => "Ldalvik/system/BaseDexClassLoader;",
            ClassRoot::PathClassLoader => "Ldalvik/system/PathClassLoader;",
            _ => self.primitive().map_or("V", PrimitiveType::descriptor),
        }
    }

    #[must_use]
    pub fn primitive(self) -> Option<PrimitiveType> {
        Some(match self {
            ClassRoot::PrimitiveBoolean => PrimitiveType::Boolean,
            ClassRoot::PrimitiveChar => PrimitiveType::Char,
            ClassRoot::PrimitiveFloat => PrimitiveType::Float,
            ClassRoot::PrimitiveDouble => PrimitiveType::Double,
            ClassRoot::PrimitiveByte => PrimitiveType::Byte,
            ClassRoot::PrimitiveShort => PrimitiveType::Short,
            ClassRoot::PrimitiveInt => PrimitiveType::Int,
            ClassRoot::PrimitiveLong => PrimitiveType::Long,
            ClassRoot::PrimitiveVoid => PrimitiveType::Void,
            _ => return None,
        })
    }
}

/// The class id of every [`ClassRoot`]
#[derive(Debug, Clone)]
pub struct ClassRoots {
    roots: [ClassId; ClassRoot::COUNT],
}
impl ClassRoots {
    #[must_use]
    pub fn get(&self, root: ClassRoot) -> ClassId {
        self.roots[root as usize]
    }
}

pub(crate) fn bootstrap(linker: &ClassLinker) -> Result<ClassRoots, LinkError> {
    // Every class takes the first published class as its class, so the metaclass has to be
    // published before anything else
    let class_class = linker.lookup_or_load(ClassRoot::JavaLangClass.descriptor(), None)?;
    debug_assert_eq!(class_class.meta_class(), class_class.id());

    let object = linker.lookup_or_load(OBJECT_DESCRIPTOR, None)?;
    linker.ensure_linked(&object)?;
    linker.ensure_linked(&class_class)?;

    for prim in ClassRoot::ALL.iter().filter_map(|root| root.primitive()) {
        create_primitive_class(linker, prim)?;
    }

    // Needed before the first array class is linked
    let mut array_interfaces = SmallVec::new();
    for descriptor in ARRAY_INTERFACES {
        array_interfaces.push(linker.find_linked_class(descriptor, None)?);
    }
    let _ = linker.array_interfaces.set(array_interfaces);

    let mut roots = [class_class.id(); ClassRoot::COUNT];
    for root in ClassRoot::ALL {
        roots[root as usize] = linker.find_linked_class(root.descriptor(), None)?;
        tracing::trace!("Root {:?} is #{}", root, roots[root as usize].get());
    }

    Ok(ClassRoots { roots })
}

fn create_primitive_class(linker: &ClassLinker, prim: PrimitiveType) -> Result<Arc<Class>, LinkError> {
    let candidate = LoadedClass {
        descriptor: prim.descriptor().into(),
        loader: None,
        access_flags: ClassAccessFlags::PUBLIC | ClassAccessFlags::FINAL | ClassAccessFlags::ABSTRACT,
        kind: ClassKind::Primitive(prim),
        fields: Vec::new(),
        methods: Vec::new(),
        failure: None,
    };

    let (class, _) = linker.table.insert_if_absent(candidate);
    linker.ensure_linked(&class)?;
    Ok(class)
}

/// Minimal definitions of the root classes and what they depend on. This goes at the end of the
/// boot class path, so real definitions earlier on the path take priority.
pub(crate) fn synthetic_root_container() -> Result<Container, ContainerError> {
    const STRING: &str = "Ljava/lang/String;";
    const CLASS: &str = "Ljava/lang/Class;";
    const CLASS_LOADER: &str = "Ljava/lang/ClassLoader;";
    const ACCESSIBLE_OBJECT: &str = "Ljava/lang/reflect/AccessibleObject;";
    const MEMBER: &str = "Ljava/lang/reflect/Member;";

    let public = MethodAccessFlags::PUBLIC;
    let public_abstract = MethodAccessFlags::PUBLIC | MethodAccessFlags::ABSTRACT;
    let public_native = MethodAccessFlags::PUBLIC | MethodAccessFlags::NATIVE;
    let private = FieldAccessFlags::PRIVATE;
    let private_final = FieldAccessFlags::PRIVATE | FieldAccessFlags::FINAL;
    let interface =
        ClassAccessFlags::PUBLIC | ClassAccessFlags::INTERFACE | ClassAccessFlags::ABSTRACT;
    let public_final = ClassAccessFlags::PUBLIC | ClassAccessFlags::FINAL;

    let mut builder = ContainerBuilder::new(SYNTHETIC_CONTAINER_NAME);

    builder
        .class(OBJECT_DESCRIPTOR)
        .method(CONSTRUCTOR_NAME, "()V", public)
        .method("equals", "(Ljava/lang/Object;)Z", public)
        .method("hashCode", "()I", public_native)
        .method("toString", "()Ljava/lang/String;", public)
        .method(
            "getClass",
            "()Ljava/lang/Class;",
            public_native | MethodAccessFlags::FINAL,
        )
        .method(
            "clone",
            "()Ljava/lang/Object;",
            MethodAccessFlags::PROTECTED | MethodAccessFlags::NATIVE,
        )
        .method("finalize", "()V", MethodAccessFlags::PROTECTED)
        .finish();

    builder
        .class(CLASS)
        .access(public_final)
        .super_class(OBJECT_DESCRIPTOR)
        .interface("Ljava/io/Serializable;")
        .field("name", STRING, private)
        .field("classLoader", CLASS_LOADER, private_final)
        .method("getName", "()Ljava/lang/String;", public)
        .method("isInterface", "()Z", public_native)
        .method("getClassLoader", "()Ljava/lang/ClassLoader;", public)
        .finish();

    for descriptor in ARRAY_INTERFACES {
        builder
            .class(descriptor)
            .access(interface)
            .super_class(OBJECT_DESCRIPTOR)
            .finish();
    }

    builder
        .class("Ljava/lang/CharSequence;")
        .access(interface)
        .super_class(OBJECT_DESCRIPTOR)
        .method("length", "()I", public_abstract)
        .method("charAt", "(I)C", public_abstract)
        .method("toString", "()Ljava/lang/String;", public_abstract)
        .finish();

    builder
        .class("Ljava/lang/Comparable;")
        .access(interface)
        .super_class(OBJECT_DESCRIPTOR)
        .method("compareTo", "(Ljava/lang/Object;)I", public_abstract)
        .finish();

    builder
        .class(STRING)
        .access(public_final)
        .super_class(OBJECT_DESCRIPTOR)
        .interface("Ljava/io/Serializable;")
        .interface("Ljava/lang/Comparable;")
        .interface("Ljava/lang/CharSequence;")
        .field("value", "[C", private_final)
        .field("offset", "I", private_final)
        .field("count", "I", private_final)
        .field("hashCode", "I", private)
        .method(CONSTRUCTOR_NAME, "()V", public)
        .method("length", "()I", public)
        .method("charAt", "(I)C", public_native)
        .method("compareTo", "(Ljava/lang/Object;)I", public)
        .method("equals", "(Ljava/lang/Object;)Z", public)
        .method("hashCode", "()I", public)
        .method("toString", "()Ljava/lang/String;", public)
        .method("intern", "()Ljava/lang/String;", public_native)
        .finish();

    builder
        .class(ACCESSIBLE_OBJECT)
        .super_class(OBJECT_DESCRIPTOR)
        .field("flag", "Z", private)
        .method(CONSTRUCTOR_NAME, "()V", MethodAccessFlags::PROTECTED)
        .method("isAccessible", "()Z", public)
        .method("setAccessible", "(Z)V", public)
        .finish();

    builder
        .class(MEMBER)
        .access(interface)
        .super_class(OBJECT_DESCRIPTOR)
        .method("getName", "()Ljava/lang/String;", public_abstract)
        .method("getModifiers", "()I", public_abstract)
        .method("getDeclaringClass", "()Ljava/lang/Class;", public_abstract)
        .finish();

    builder
        .class("Ljava/lang/reflect/Field;")
        .access(public_final)
        .super_class(ACCESSIBLE_OBJECT)
        .interface(MEMBER)
        .field("declaringClass", CLASS, private)
        .field("name", STRING, private)
        .field("type", CLASS, private)
        .field("slot", "I", private)
        .field("accessFlags", "I", private)
        .method("getName", "()Ljava/lang/String;", public)
        .method("getModifiers", "()I", public)
        .method("getDeclaringClass", "()Ljava/lang/Class;", public)
        .method("getType", "()Ljava/lang/Class;", public)
        .finish();

    builder
        .class("Ljava/lang/reflect/Method;")
        .access(public_final)
        .super_class(ACCESSIBLE_OBJECT)
        .interface(MEMBER)
        .field("declaringClass", CLASS, private)
        .field("name", STRING, private)
        .field("parameterTypes", "[Ljava/lang/Class;", private)
        .field("returnType", CLASS, private)
        .field("slot", "I", private)
        .field("accessFlags", "I", private)
        .method("getName", "()Ljava/lang/String;", public)
        .method("getModifiers", "()I", public)
        .method("getDeclaringClass", "()Ljava/lang/Class;", public)
        .method("getReturnType", "()Ljava/lang/Class;", public)
        .finish();

    builder
        .class(CLASS_LOADER)
        .access(ClassAccessFlags::PUBLIC | ClassAccessFlags::ABSTRACT)
        .super_class(OBJECT_DESCRIPTOR)
        .field("parent", CLASS_LOADER, private_final)
        .method(CONSTRUCTOR_NAME, "()V", MethodAccessFlags::PROTECTED)
        .method(
            "loadClass",
            "(Ljava/lang/String;)Ljava/lang/Class;",
            public,
        )
        .method(
            "findClass",
            "(Ljava/lang/String;)Ljava/lang/Class;",
            MethodAccessFlags::PROTECTED,
        )
        .method(
            "getParent",
            "()Ljava/lang/ClassLoader;",
            public | MethodAccessFlags::FINAL,
        )
        .finish();

    builder
        .class("Ldalvik/system/BaseDexClassLoader;")
        .super_class(CLASS_LOADER)
        .field("originalPath", STRING, private_final)
        .method(CONSTRUCTOR_NAME, "()V", public)
        .method(
            "findClass",
            "(Ljava/lang/String;)Ljava/lang/Class;",
            MethodAccessFlags::PROTECTED,
        )
        .method("toString", "()Ljava/lang/String;", public)
        .finish();

    builder
        .class("Ldalvik/system/PathClassLoader;")
        .super_class("Ldalvik/system/BaseDexClassLoader;")
        .method(CONSTRUCTOR_NAME, "()V", public)
        .finish();

    builder.build()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::{class::ClassStatus, Collaborators, LinkerConfig};

    fn linker() -> ClassLinker {
        ClassLinker::create(Vec::new(), LinkerConfig::new(), Collaborators::default()).unwrap()
    }

    #[test]
    fn test_root_order() {
        assert_eq!(ClassRoot::ALL.len(), ClassRoot::COUNT);
        for (i, root) in ClassRoot::ALL.iter().enumerate() {
            assert_eq!(*root as usize, i);
        }

        assert_eq!(ClassRoot::PrimitiveInt.descriptor(), "I");
        assert_eq!(ClassRoot::PrimitiveVoid.descriptor(), "V");
        assert_eq!(ClassRoot::JavaLangString.primitive(), None);
    }

    #[test]
    fn test_bootstrap() {
        let linker = linker();
        assert!(linker.init_done());

        let class_class = linker.class_root(ClassRoot::JavaLangClass);
        assert_eq!(class_class.get(), 0);

        let ids: HashSet<ClassId> = ClassRoot::ALL
            .iter()
            .map(|root| linker.class_root(*root))
            .collect();
        assert_eq!(ids.len(), ClassRoot::COUNT);

        for root in ClassRoot::ALL {
            let class = linker.class(linker.class_root(root)).unwrap();
            assert_eq!(class.descriptor(), root.descriptor());
            assert_eq!(class.meta_class(), class_class);
            assert!(class.status().is_linked(), "{:?} is not linked", root);
            assert_eq!(class.loader(), None);
        }

        let int = linker.class(linker.class_root(ClassRoot::PrimitiveInt)).unwrap();
        assert!(int.is_primitive());
        assert_eq!(int.status(), ClassStatus::Initialized);
        assert_eq!(linker.find_primitive_class('I').unwrap(), int.id());
    }

    #[test]
    fn test_array_interfaces() {
        let linker = linker();
        let int_array = linker.class(linker.class_root(ClassRoot::IntArrayClass)).unwrap();
        let object = linker.class_root(ClassRoot::JavaLangObject);

        assert_eq!(int_array.super_class(), Some(object));
        let interfaces: Vec<String> = int_array
            .iftable()
            .iter()
            .map(|entry| linker.class(entry.interface()).unwrap().descriptor().to_owned())
            .collect();
        assert_eq!(interfaces, ARRAY_INTERFACES);

        let object_class = linker.class(object).unwrap();
        assert_eq!(int_array.vtable(), object_class.vtable());
        assert!(int_array.is_final() && int_array.is_abstract());
    }

    #[test]
    fn test_string_layout() {
        let linker = linker();
        let string = linker.class(linker.class_root(ClassRoot::JavaLangString)).unwrap();

        let value = string.field(string.find_field("value", "[C").unwrap()).unwrap();
        assert_eq!(value.offset(), Some(8));
        let count = string.field(string.find_field("count", "I").unwrap()).unwrap();
        assert!(count.offset().unwrap() >= 12);
        assert_eq!(string.instance_size(), Some(24));

        let char_sequence = linker.find_system_class("Ljava/lang/CharSequence;").unwrap();
        assert!(linker.implements(string.id(), char_sequence).unwrap());
    }
}
