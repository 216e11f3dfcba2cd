use std::thread::ThreadId;

use classlink_base::{
    container::{CodeRef, ConstantValue},
    descriptor::{self, DescriptorType, MethodDescriptor, PrimitiveType},
    flags::{ClassAccessFlags, FieldAccessFlags, MethodAccessFlags},
    id::{ClassId, ContainerId, LoaderId, MethodId, MethodIndex, TypeIndex},
    CLASS_INITIALIZER_NAME, CONSTRUCTOR_NAME,
};
use either::Either;
use once_cell::sync::OnceCell;
use parking_lot::{Condvar, Mutex, MutexGuard};
use smallvec::SmallVec;

use crate::{heap::ObjectRef, LinkError};

/// Size of the header every object starts with
pub const OBJECT_HEADER_SIZE: u32 = 8;
/// Offset of the class reference in the object header
pub const CLASS_OFFSET: u32 = 0;
/// Offset of the monitor word in the object header
pub const MONITOR_OFFSET: u32 = 4;
/// Size of a reference stored in an object
pub const REFERENCE_SIZE: u32 = 4;
/// Offset of the length in an array object
pub const ARRAY_LENGTH_OFFSET: u32 = OBJECT_HEADER_SIZE;
/// Size of an array object without its elements
pub const ARRAY_HEADER_SIZE: u32 = ARRAY_LENGTH_OFFSET + 4;

/// Offset of the first element of an array whose elements are `element_size` bytes
#[must_use]
pub fn array_data_offset(element_size: u32) -> u32 {
    align_up(ARRAY_HEADER_SIZE, element_size.max(1))
}

#[must_use]
pub(crate) fn align_up(value: u32, alignment: u32) -> u32 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

/// The lifecycle of a class. A class only ever moves forward through these, apart from moving
/// into [`ClassStatus::Error`], which it never leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ClassStatus {
    Error,
    /// Published in the identity table, nothing resolved yet
    Loaded,
    /// Super class and interfaces are resolved
    Resolved,
    /// Dispatch tables are built
    MethodsLinked,
    /// Field offsets are assigned
    FieldsLaidOut,
    Linked,
    Initializing,
    Initialized,
}
impl ClassStatus {
    #[must_use]
    pub fn is_linked(self) -> bool {
        self >= ClassStatus::Linked
    }
}

#[derive(Debug)]
pub(crate) struct ClassState {
    pub(crate) status: ClassStatus,
    /// The thread currently linking or initializing the class
    pub(crate) owner: Option<ThreadId>,
    pub(crate) failure: Option<LinkError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayElement {
    Primitive(PrimitiveType),
    Reference,
}
impl ArrayElement {
    #[must_use]
    pub fn size(self) -> u32 {
        match self {
            ArrayElement::Primitive(prim) => prim.size(),
            ArrayElement::Reference => REFERENCE_SIZE,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ClassKind {
    /// A class or interface loaded from a container
    Instance {
        container: ContainerId,
        def_index: usize,
        super_type: Option<TypeIndex>,
        interfaces: SmallVec<[TypeIndex; 4]>,
    },
    Array {
        component: ClassId,
        element: ArrayElement,
    },
    Primitive(PrimitiveType),
}

#[derive(Debug)]
pub struct Field {
    pub(crate) name: Box<str>,
    pub(crate) descriptor: DescriptorType,
    pub(crate) access_flags: FieldAccessFlags,
    pub(crate) initial_value: Option<ConstantValue>,
    /// Byte offset into the instance, or into the static storage for static fields.
    /// Assigned once during linking.
    pub(crate) offset: OnceCell<u32>,
}
impl Field {
    pub(crate) fn new(
        name: Box<str>,
        descriptor: DescriptorType,
        access_flags: FieldAccessFlags,
        initial_value: Option<ConstantValue>,
    ) -> Field {
        Field {
            name,
            descriptor,
            access_flags,
            initial_value,
            offset: OnceCell::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn descriptor(&self) -> &DescriptorType {
        &self.descriptor
    }

    #[must_use]
    pub fn access_flags(&self) -> FieldAccessFlags {
        self.access_flags
    }

    #[must_use]
    pub fn initial_value(&self) -> Option<ConstantValue> {
        self.initial_value
    }

    #[must_use]
    pub fn is_static(&self) -> bool {
        self.access_flags.contains(FieldAccessFlags::STATIC)
    }

    #[must_use]
    pub fn is_reference(&self) -> bool {
        self.descriptor.is_reference()
    }

    /// Size in bytes the field occupies
    #[must_use]
    pub fn size(&self) -> u32 {
        self.descriptor.primitive().map_or(REFERENCE_SIZE, PrimitiveType::size)
    }

    #[must_use]
    pub fn offset(&self) -> Option<u32> {
        self.offset.get().copied()
    }
}

#[derive(Debug)]
pub struct Method {
    pub(crate) name: Box<str>,
    pub(crate) descriptor_text: Box<str>,
    pub(crate) descriptor: MethodDescriptor,
    pub(crate) access_flags: MethodAccessFlags,
    pub(crate) code: Option<CodeRef>,
    /// The interface method this was synthesized for, if it is a miranda method
    pub(crate) miranda_of: Option<MethodId>,
    /// Slot in the vtable, or for interface methods the position in the interface's method list
    pub(crate) method_index: OnceCell<MethodIndex>,
}
impl Method {
    pub(crate) fn new(
        name: Box<str>,
        descriptor_text: Box<str>,
        descriptor: MethodDescriptor,
        access_flags: MethodAccessFlags,
        code: Option<CodeRef>,
    ) -> Method {
        Method {
            name,
            descriptor_text,
            descriptor,
            access_flags,
            code,
            miranda_of: None,
            method_index: OnceCell::new(),
        }
    }

    pub(crate) fn new_miranda(interface_method: &Method, source: MethodId) -> Method {
        Method {
            name: interface_method.name.clone(),
            descriptor_text: interface_method.descriptor_text.clone(),
            descriptor: interface_method.descriptor.clone(),
            access_flags: MethodAccessFlags::PUBLIC | MethodAccessFlags::ABSTRACT,
            code: None,
            miranda_of: Some(source),
            method_index: OnceCell::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn descriptor_text(&self) -> &str {
        &self.descriptor_text
    }

    #[must_use]
    pub fn descriptor(&self) -> &MethodDescriptor {
        &self.descriptor
    }

    #[must_use]
    pub fn access_flags(&self) -> MethodAccessFlags {
        self.access_flags
    }

    #[must_use]
    pub fn code(&self) -> Option<CodeRef> {
        self.code
    }

    #[must_use]
    pub fn is_static(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::STATIC)
    }

    #[must_use]
    pub fn is_abstract(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::ABSTRACT)
    }

    #[must_use]
    pub fn is_final(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::FINAL)
    }

    #[must_use]
    pub fn is_public(&self) -> bool {
        self.access_flags.contains(MethodAccessFlags::PUBLIC)
    }

    #[must_use]
    pub fn is_constructor(&self) -> bool {
        &*self.name == CONSTRUCTOR_NAME
    }

    #[must_use]
    pub fn is_class_initializer(&self) -> bool {
        &*self.name == CLASS_INITIALIZER_NAME
    }

    /// Invoked without dispatch: static methods, private methods, and constructors
    #[must_use]
    pub fn is_direct(&self) -> bool {
        !self.access_flags.can_override() || self.is_constructor() || self.is_class_initializer()
    }

    #[must_use]
    pub fn is_virtual(&self) -> bool {
        !self.is_direct()
    }

    #[must_use]
    pub fn is_miranda(&self) -> bool {
        self.miranda_of.is_some()
    }

    #[must_use]
    pub fn miranda_of(&self) -> Option<MethodId> {
        self.miranda_of
    }

    #[must_use]
    pub fn has_same_signature(&self, other: &Method) -> bool {
        self.name == other.name && self.descriptor_text == other.descriptor_text
    }

    #[must_use]
    pub fn method_index(&self) -> Option<MethodIndex> {
        self.method_index.get().copied()
    }
}

/// Offsets of the reference slots in an instance (or in the static storage), so that the heap
/// can trace objects without knowing their fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceOffsets {
    /// Bit `n` is set when the 4 byte word at offset `n * 4` holds a reference
    Bitmap(u32),
    /// Sorted, for layouts with references past the first 32 words
    List(Box<[u32]>),
}
impl ReferenceOffsets {
    #[must_use]
    pub fn from_offsets(mut offsets: Vec<u32>) -> ReferenceOffsets {
        offsets.sort_unstable();
        offsets.dedup();

        let fits_bitmap = offsets
            .iter()
            .all(|offset| offset % REFERENCE_SIZE == 0 && offset / REFERENCE_SIZE < 32);
        if fits_bitmap {
            let bits = offsets
                .iter()
                .fold(0, |bits, offset| bits | (1 << (offset / REFERENCE_SIZE)));
            ReferenceOffsets::Bitmap(bits)
        } else {
            ReferenceOffsets::List(offsets.into_boxed_slice())
        }
    }

    #[must_use]
    pub fn empty() -> ReferenceOffsets {
        ReferenceOffsets::Bitmap(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        match self {
            ReferenceOffsets::Bitmap(bits) => Either::Left(
                (0..32)
                    .filter(move |i| bits & (1 << i) != 0)
                    .map(|i| i * REFERENCE_SIZE),
            ),
            ReferenceOffsets::List(list) => Either::Right(list.iter().copied()),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            ReferenceOffsets::Bitmap(bits) => bits.count_ones() as usize,
            ReferenceOffsets::List(list) => list.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An interface implemented by a class, along with where each of the interface's methods lives in
/// the class's vtable. Interfaces themselves list their super interfaces with no slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceEntry {
    pub(crate) interface: ClassId,
    pub(crate) slots: Vec<MethodIndex>,
}
impl InterfaceEntry {
    #[must_use]
    pub fn interface(&self) -> ClassId {
        self.interface
    }

    #[must_use]
    pub fn slots(&self) -> &[MethodIndex] {
        &self.slots
    }
}

/// Everything decided by linking. Published once, when the class reaches
/// [`ClassStatus::Linked`].
#[derive(Debug)]
pub struct Linked {
    pub(crate) super_class: Option<ClassId>,
    pub(crate) interfaces: SmallVec<[ClassId; 4]>,
    pub(crate) vtable: Vec<MethodId>,
    pub(crate) iftable: Vec<InterfaceEntry>,
    pub(crate) mirandas: Vec<Method>,
    pub(crate) instance_size: u32,
    pub(crate) reference_offsets: ReferenceOffsets,
    pub(crate) static_size: u32,
    pub(crate) static_reference_offsets: ReferenceOffsets,
}
impl Linked {
    #[must_use]
    pub fn super_class(&self) -> Option<ClassId> {
        self.super_class
    }

    #[must_use]
    pub fn interfaces(&self) -> &[ClassId] {
        &self.interfaces
    }

    #[must_use]
    pub fn vtable(&self) -> &[MethodId] {
        &self.vtable
    }

    #[must_use]
    pub fn iftable(&self) -> &[InterfaceEntry] {
        &self.iftable
    }

    #[must_use]
    pub fn mirandas(&self) -> &[Method] {
        &self.mirandas
    }

    #[must_use]
    pub fn instance_size(&self) -> u32 {
        self.instance_size
    }

    #[must_use]
    pub fn reference_offsets(&self) -> &ReferenceOffsets {
        &self.reference_offsets
    }

    #[must_use]
    pub fn static_size(&self) -> u32 {
        self.static_size
    }

    #[must_use]
    pub fn static_reference_offsets(&self) -> &ReferenceOffsets {
        &self.static_reference_offsets
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    Boolean(bool),
    Byte(i8),
    Char(u16),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Reference(Option<ObjectRef>),
}

/// Storage for a class's static fields, allocated when it is initialized
#[derive(Debug)]
pub struct StaticStorage {
    data: Mutex<Box<[u8]>>,
}
impl StaticStorage {
    pub(crate) fn new(size: u32) -> StaticStorage {
        StaticStorage {
            data: Mutex::new(vec![0; size as usize].into_boxed_slice()),
        }
    }

    fn read<const N: usize>(&self, offset: u32) -> Option<[u8; N]> {
        let data = self.data.lock();
        let start = offset as usize;
        let bytes = data.get(start..start + N)?;
        let mut out = [0; N];
        out.copy_from_slice(bytes);
        Some(out)
    }

    pub(crate) fn write(&self, offset: u32, bytes: &[u8]) -> bool {
        let mut data = self.data.lock();
        let start = offset as usize;
        match data.get_mut(start..start + bytes.len()) {
            Some(dest) => {
                dest.copy_from_slice(bytes);
                true
            }
            None => false,
        }
    }

    /// Write a static field's value. Returns false if the value doesn't fit the field's type or
    /// the field has no offset in this storage.
    pub fn write_value(&self, field: &Field, value: FieldValue) -> bool {
        let offset = match field.offset() {
            Some(offset) => offset,
            None => return false,
        };

        let matches = match (field.descriptor.primitive(), value) {
            (None, FieldValue::Reference(_))
            | (Some(PrimitiveType::Boolean), FieldValue::Boolean(_))
            | (Some(PrimitiveType::Byte), FieldValue::Byte(_))
            | (Some(PrimitiveType::Char), FieldValue::Char(_))
            | (Some(PrimitiveType::Short), FieldValue::Short(_))
            | (Some(PrimitiveType::Int), FieldValue::Int(_))
            | (Some(PrimitiveType::Long), FieldValue::Long(_))
            | (Some(PrimitiveType::Float), FieldValue::Float(_))
            | (Some(PrimitiveType::Double), FieldValue::Double(_)) => true,
            _ => false,
        };
        if !matches {
            return false;
        }

        match value {
            FieldValue::Boolean(x) => self.write(offset, &[u8::from(x)]),
            FieldValue::Byte(x) => self.write(offset, &x.to_le_bytes()),
            FieldValue::Char(x) => self.write(offset, &x.to_le_bytes()),
            FieldValue::Short(x) => self.write(offset, &x.to_le_bytes()),
            FieldValue::Int(x) => self.write(offset, &x.to_le_bytes()),
            FieldValue::Long(x) => self.write(offset, &x.to_le_bytes()),
            FieldValue::Float(x) => self.write(offset, &x.to_le_bytes()),
            FieldValue::Double(x) => self.write(offset, &x.to_le_bytes()),
            FieldValue::Reference(x) => self.write(offset, &ObjectRef::to_slot(x)),
        }
    }

    #[must_use]
    pub fn read_reference(&self, offset: u32) -> Option<Option<ObjectRef>> {
        self.read::<4>(offset)
            .map(|x| ObjectRef::new(u32::from_le_bytes(x)))
    }

    #[must_use]
    pub fn read_value(&self, field: &Field) -> Option<FieldValue> {
        let offset = field.offset()?;
        Some(match field.descriptor.primitive() {
            None => FieldValue::Reference(self.read_reference(offset)?),
            Some(PrimitiveType::Boolean) => FieldValue::Boolean(self.read::<1>(offset)?[0] != 0),
            Some(PrimitiveType::Byte) => FieldValue::Byte(i8::from_le_bytes(self.read(offset)?)),
            Some(PrimitiveType::Char) => FieldValue::Char(u16::from_le_bytes(self.read(offset)?)),
            Some(PrimitiveType::Short) => {
                FieldValue::Short(i16::from_le_bytes(self.read(offset)?))
            }
            Some(PrimitiveType::Int) => FieldValue::Int(i32::from_le_bytes(self.read(offset)?)),
            Some(PrimitiveType::Long) => FieldValue::Long(i64::from_le_bytes(self.read(offset)?)),
            Some(PrimitiveType::Float) => {
                FieldValue::Float(f32::from_le_bytes(self.read(offset)?))
            }
            Some(PrimitiveType::Double) => {
                FieldValue::Double(f64::from_le_bytes(self.read(offset)?))
            }
            Some(PrimitiveType::Void) => return None,
        })
    }
}

/// A class record before it has been given an identity
#[derive(Debug)]
pub(crate) struct LoadedClass {
    pub(crate) descriptor: Box<str>,
    pub(crate) loader: Option<LoaderId>,
    pub(crate) access_flags: ClassAccessFlags,
    pub(crate) kind: ClassKind,
    pub(crate) fields: Vec<Field>,
    pub(crate) methods: Vec<Method>,
    /// Set when loading failed, the class is published directly into the error state
    pub(crate) failure: Option<LinkError>,
}
impl LoadedClass {
    pub(crate) fn failed(
        descriptor: &str,
        loader: Option<LoaderId>,
        container: ContainerId,
        def_index: usize,
        failure: LinkError,
    ) -> LoadedClass {
        LoadedClass {
            descriptor: descriptor.into(),
            loader,
            access_flags: ClassAccessFlags::empty(),
            kind: ClassKind::Instance {
                container,
                def_index,
                super_type: None,
                interfaces: SmallVec::new(),
            },
            fields: Vec::new(),
            methods: Vec::new(),
            failure: Some(failure),
        }
    }
}

/// The runtime record of a type. Shared between threads, with the link results published once
/// and the lifecycle guarded by the class's own monitor.
#[derive(Debug)]
pub struct Class {
    pub(crate) id: ClassId,
    pub(crate) meta_class: ClassId,
    pub(crate) descriptor: Box<str>,
    pub(crate) loader: Option<LoaderId>,
    pub(crate) access_flags: ClassAccessFlags,
    pub(crate) kind: ClassKind,
    pub(crate) fields: Vec<Field>,
    pub(crate) methods: Vec<Method>,
    pub(crate) linked: OnceCell<Linked>,
    pub(crate) statics: OnceCell<StaticStorage>,
    state: Mutex<ClassState>,
    state_changed: Condvar,
}
impl Class {
    pub(crate) fn new(id: ClassId, meta_class: ClassId, loaded: LoadedClass) -> Class {
        let status = if loaded.failure.is_some() {
            ClassStatus::Error
        } else {
            ClassStatus::Loaded
        };
        Class {
            id,
            meta_class,
            descriptor: loaded.descriptor,
            loader: loaded.loader,
            access_flags: loaded.access_flags,
            kind: loaded.kind,
            fields: loaded.fields,
            methods: loaded.methods,
            linked: OnceCell::new(),
            statics: OnceCell::new(),
            state: Mutex::new(ClassState {
                status,
                owner: None,
                failure: loaded.failure,
            }),
            state_changed: Condvar::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> ClassId {
        self.id
    }

    /// The class of this class's mirror object, `java/lang/Class`
    #[must_use]
    pub fn meta_class(&self) -> ClassId {
        self.meta_class
    }

    #[must_use]
    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    /// The defining loader, `None` for the bootstrap loader
    #[must_use]
    pub fn loader(&self) -> Option<LoaderId> {
        self.loader
    }

    #[must_use]
    pub fn access_flags(&self) -> ClassAccessFlags {
        self.access_flags
    }

    #[must_use]
    pub fn kind(&self) -> &ClassKind {
        &self.kind
    }

    #[must_use]
    pub fn is_interface(&self) -> bool {
        self.access_flags.is_interface()
    }

    #[must_use]
    pub fn is_abstract(&self) -> bool {
        self.access_flags.is_abstract()
    }

    #[must_use]
    pub fn is_final(&self) -> bool {
        self.access_flags.is_final()
    }

    #[must_use]
    pub fn is_public(&self) -> bool {
        self.access_flags.contains(ClassAccessFlags::PUBLIC)
    }

    #[must_use]
    pub fn is_array(&self) -> bool {
        matches!(self.kind, ClassKind::Array { .. })
    }

    #[must_use]
    pub fn is_primitive(&self) -> bool {
        matches!(self.kind, ClassKind::Primitive(_))
    }

    #[must_use]
    pub fn component(&self) -> Option<ClassId> {
        match self.kind {
            ClassKind::Array { component, .. } => Some(component),
            _ => None,
        }
    }

    #[must_use]
    pub fn container(&self) -> Option<ContainerId> {
        match self.kind {
            ClassKind::Instance { container, .. } => Some(container),
            _ => None,
        }
    }

    #[must_use]
    pub fn package_name(&self) -> &str {
        descriptor::package_name(&self.descriptor)
    }

    /// Whether the two classes are in the same runtime package, which requires the same package
    /// name and the same defining loader
    #[must_use]
    pub fn is_same_package(&self, other: &Class) -> bool {
        self.loader == other.loader && self.package_name() == other.package_name()
    }

    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    #[must_use]
    pub fn field(&self, index: usize) -> Option<&Field> {
        self.fields.get(index)
    }

    #[must_use]
    pub fn find_field(&self, name: &str, descriptor: &str) -> Option<usize> {
        self.fields.iter().position(|field| {
            field.name() == name && field.descriptor.to_descriptor_string() == descriptor
        })
    }

    /// The declared methods. Miranda methods are only reachable through [`Class::method`].
    #[must_use]
    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    /// Get a method by index, where indices past the declared methods refer to the miranda
    /// methods added by linking
    #[must_use]
    pub fn method(&self, index: MethodIndex) -> Option<&Method> {
        let index = usize::from(index);
        if let Some(method) = self.methods.get(index) {
            Some(method)
        } else {
            self.linked
                .get()?
                .mirandas
                .get(index - self.methods.len())
        }
    }

    #[must_use]
    pub fn find_declared_method(&self, name: &str, descriptor: &str) -> Option<MethodIndex> {
        self.methods
            .iter()
            .position(|m| &*m.name == name && &*m.descriptor_text == descriptor)
            .map(|x| x as MethodIndex)
    }

    #[must_use]
    pub fn class_initializer(&self) -> Option<&Method> {
        self.methods
            .iter()
            .find(|m| m.is_class_initializer() && m.is_static())
    }

    /// The link results, `None` until the class is linked
    #[must_use]
    pub fn linked(&self) -> Option<&Linked> {
        self.linked.get()
    }

    #[must_use]
    pub fn super_class(&self) -> Option<ClassId> {
        self.linked.get().and_then(|x| x.super_class)
    }

    #[must_use]
    pub fn vtable(&self) -> &[MethodId] {
        self.linked.get().map_or(&[], |x| x.vtable.as_slice())
    }

    #[must_use]
    pub fn iftable(&self) -> &[InterfaceEntry] {
        self.linked.get().map_or(&[], |x| x.iftable.as_slice())
    }

    #[must_use]
    pub fn instance_size(&self) -> Option<u32> {
        self.linked.get().map(|x| x.instance_size)
    }

    #[must_use]
    pub fn static_storage(&self) -> Option<&StaticStorage> {
        self.statics.get()
    }

    /// Read a static field, `None` if the class has not been initialized
    #[must_use]
    pub fn static_value(&self, field_index: usize) -> Option<FieldValue> {
        let field = self.fields.get(field_index).filter(|f| f.is_static())?;
        self.statics.get()?.read_value(field)
    }

    /// Write a static field, for use by the static initializer. Returns false if the class has
    /// no static storage yet or the value doesn't fit the field.
    pub fn set_static_value(&self, field_index: usize, value: FieldValue) -> bool {
        match (self.fields.get(field_index), self.statics.get()) {
            (Some(field), Some(statics)) if field.is_static() => statics.write_value(field, value),
            _ => false,
        }
    }

    #[must_use]
    pub fn status(&self) -> ClassStatus {
        self.state.lock().status
    }

    /// The error the class failed with, if it is in the error state
    #[must_use]
    pub fn failure(&self) -> Option<LinkError> {
        self.state.lock().failure.clone()
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, ClassState> {
        self.state.lock()
    }

    pub(crate) fn wait_state(&self, guard: &mut MutexGuard<'_, ClassState>) {
        self.state_changed.wait(guard);
    }

    /// Move forward to `status`, called by the thread that owns the class
    pub(crate) fn advance(&self, status: ClassStatus) {
        let mut state = self.state.lock();
        debug_assert!(
            state.status < status,
            "{} moved backwards from {:?} to {:?}",
            self.descriptor,
            state.status,
            status
        );
        state.status = status;
    }

    /// Move to `status`, release ownership, and wake any waiting threads
    pub(crate) fn finish(&self, status: ClassStatus) {
        let mut state = self.state.lock();
        state.status = status;
        state.owner = None;
        drop(state);
        self.state_changed.notify_all();
    }

    /// Put the class permanently into the error state
    pub(crate) fn fail(&self, failure: LinkError) {
        let mut state = self.state.lock();
        state.status = ClassStatus::Error;
        state.owner = None;
        state.failure = Some(failure);
        drop(state);
        self.state_changed.notify_all();
    }
}
