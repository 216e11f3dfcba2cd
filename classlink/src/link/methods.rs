//! Dispatch tables.
//!
//! A class's vtable starts as a copy of its super class's, with overriding methods replacing
//! the slot they override and new virtual methods appended. The iftable lists every interface
//! the class implements, each with the vtable slot implementing every interface method.
//! Abstract classes which don't implement an interface method get a miranda method appended to
//! the vtable so that every interface slot has somewhere to point.

use std::{collections::HashSet, sync::Arc};

use classlink_base::{
    flags::{MethodAccessFlags, Visibility},
    id::{ClassId, MethodId, MethodIndex},
    util::IdHasher,
};

use crate::{
    class::{Class, InterfaceEntry, Method},
    class_linker::ClassLinker,
    validate, LinkError, LinkageError,
};

#[derive(Debug, Default)]
pub(crate) struct MethodTables {
    pub(crate) vtable: Vec<MethodId>,
    pub(crate) iftable: Vec<InterfaceEntry>,
    pub(crate) mirandas: Vec<Method>,
}
impl MethodTables {
    /// Get a method of the class being linked, or of an already linked class
    pub(crate) fn with_method<R>(
        &self,
        linker: &ClassLinker,
        class: &Class,
        id: MethodId,
        f: impl FnOnce(&Class, &Method) -> R,
    ) -> Result<R, LinkError> {
        let (declaring, index) = id.decompose();
        if declaring == class.id() {
            let index = usize::from(index);
            let method = match class.methods().get(index) {
                Some(method) => method,
                None => self
                    .mirandas
                    .get(index - class.methods().len())
                    .ok_or(LinkError::BadMethodId(id))?,
            };
            return Ok(f(class, method));
        }

        let declaring = linker.class(declaring)?;
        let method = declaring.method(index).ok_or(LinkError::BadMethodId(id))?;
        Ok(f(&declaring, method))
    }
}

pub(crate) fn link_methods(
    linker: &ClassLinker,
    class: &Class,
    super_class: Option<&Class>,
    interfaces: &[Arc<Class>],
) -> Result<MethodTables, LinkError> {
    let mut tables = MethodTables::default();

    if class.is_interface() {
        number_interface_methods(class)?;
    } else {
        link_virtual_methods(linker, class, super_class, &mut tables)?;
    }

    link_interface_methods(linker, class, super_class, interfaces, &mut tables)?;

    Ok(tables)
}

/// Interface methods are numbered by their declaration order, which is the order of the slots in
/// every iftable entry for the interface
fn number_interface_methods(class: &Class) -> Result<(), LinkError> {
    let mut count: usize = 0;
    for method in class.methods().iter().filter(|m| m.is_virtual()) {
        let index = MethodIndex::try_from(count).map_err(|_| too_many_methods(class))?;
        let _ = method.method_index.set(index);
        count += 1;
    }

    Ok(())
}

fn link_virtual_methods(
    linker: &ClassLinker,
    class: &Class,
    super_class: Option<&Class>,
    tables: &mut MethodTables,
) -> Result<(), LinkError> {
    if let Some(super_class) = super_class {
        tables.vtable = super_class.vtable().to_vec();
    }
    let super_len = tables.vtable.len();

    for (index, method) in class.methods().iter().enumerate() {
        if !method.is_virtual() {
            continue;
        }

        let id = MethodId::unchecked_compose(class.id(), index as MethodIndex);

        let mut overridden = None;
        for slot in (0..super_len).rev() {
            let super_id = tables.vtable[slot];
            let (super_declaring, super_index) = super_id.decompose();
            let super_declaring = linker.class(super_declaring)?;
            let super_method = super_declaring
                .method(super_index)
                .ok_or(LinkError::BadMethodId(super_id))?;

            if super_method.has_same_signature(method)
                && can_override(class, &super_declaring, super_method)
            {
                overridden = Some((slot, super_declaring, super_id));
                break;
            }
        }

        let slot = if let Some((slot, super_declaring, super_id)) = overridden {
            let super_method = super_declaring
                .method(super_id.decompose().1)
                .ok_or(LinkError::BadMethodId(super_id))?;

            if super_method.is_final() {
                return Err(LinkageError::OverridesFinal {
                    class: class.descriptor().to_owned(),
                    method: signature(method),
                }
                .into());
            }

            if method.access_flags().visibility() < super_method.access_flags().visibility() {
                return Err(LinkageError::WeakerAccess {
                    class: class.descriptor().to_owned(),
                    method: signature(method),
                }
                .into());
            }

            if let Some(descriptor) = validate::method_descriptor_mismatch(
                linker,
                method,
                class.loader(),
                super_method,
                super_declaring.loader(),
            )? {
                return Err(LinkageError::LoaderConstraint {
                    class: class.descriptor().to_owned(),
                    method: signature(method),
                    descriptor,
                }
                .into());
            }

            tracing::trace!(
                "{}.{} overrides slot {} of {}",
                class.descriptor(),
                signature(method),
                slot,
                super_declaring.descriptor()
            );
            tables.vtable[slot] = id;
            slot
        } else {
            tables.vtable.push(id);
            tables.vtable.len() - 1
        };

        let slot = MethodIndex::try_from(slot).map_err(|_| too_many_methods(class))?;
        let _ = method.method_index.set(slot);
    }

    Ok(())
}

/// Package private methods can only be overridden from the same runtime package
fn can_override(class: &Class, super_declaring: &Class, super_method: &Method) -> bool {
    match super_method.access_flags().visibility() {
        Visibility::Private => false,
        Visibility::Package => class.is_same_package(super_declaring),
        Visibility::Protected | Visibility::Public => true,
    }
}

fn link_interface_methods(
    linker: &ClassLinker,
    class: &Class,
    super_class: Option<&Class>,
    interfaces: &[Arc<Class>],
    tables: &mut MethodTables,
) -> Result<(), LinkError> {
    // Every interface implemented, super class's first, then each declared interface followed by
    // the interfaces it extends
    let mut seen: HashSet<ClassId, IdHasher<ClassId>> = HashSet::default();
    let mut order = Vec::new();
    if let Some(super_class) = super_class {
        for entry in super_class.iftable() {
            if seen.insert(entry.interface) {
                order.push(entry.interface);
            }
        }
    }
    for interface in interfaces {
        if seen.insert(interface.id()) {
            order.push(interface.id());
        }
        for entry in interface.iftable() {
            if seen.insert(entry.interface) {
                order.push(entry.interface);
            }
        }
    }

    for interface_id in order {
        let interface = linker.class(interface_id)?;
        let slots = if class.is_interface() {
            Vec::new()
        } else {
            map_interface(linker, class, &interface, tables)?
        };
        tables.iftable.push(InterfaceEntry {
            interface: interface_id,
            slots,
        });
    }

    Ok(())
}

/// Find the vtable slot implementing each of the interface's methods
fn map_interface(
    linker: &ClassLinker,
    class: &Class,
    interface: &Class,
    tables: &mut MethodTables,
) -> Result<Vec<MethodIndex>, LinkError> {
    let mut slots = Vec::new();
    for (index, interface_method) in interface.methods().iter().enumerate() {
        if !interface_method.is_virtual() {
            continue;
        }

        let mut found = None;
        for slot in (0..tables.vtable.len()).rev() {
            let candidate = tables.vtable[slot];
            let matches = tables.with_method(linker, class, candidate, |_, m| {
                (m.has_same_signature(interface_method), m.is_abstract(), m.is_public())
            })?;
            if let (true, is_abstract, is_public) = matches {
                found = Some((slot, is_abstract, is_public));
                break;
            }
        }

        let slot = match found {
            Some((_, true, _)) | None if !class.is_abstract() => {
                return Err(LinkageError::UnimplementedInterfaceMethod {
                    class: class.descriptor().to_owned(),
                    interface: interface.descriptor().to_owned(),
                    method: signature(interface_method),
                }
                .into());
            }
            Some((_, false, false)) => {
                return Err(LinkageError::NonPublicImplementation {
                    class: class.descriptor().to_owned(),
                    method: signature(interface_method),
                }
                .into());
            }
            Some((slot, _, _)) => slot,
            None => {
                let source =
                    MethodId::unchecked_compose(interface.id(), index as MethodIndex);
                add_miranda(class, interface_method, source, tables)?
            }
        };

        slots.push(MethodIndex::try_from(slot).map_err(|_| too_many_methods(class))?);
    }

    Ok(slots)
}

fn add_miranda(
    class: &Class,
    interface_method: &Method,
    source: MethodId,
    tables: &mut MethodTables,
) -> Result<usize, LinkError> {
    let index = class.methods().len() + tables.mirandas.len();
    let index = MethodIndex::try_from(index).map_err(|_| too_many_methods(class))?;
    let slot = tables.vtable.len();

    let miranda = Method::new_miranda(interface_method, source);
    let _ = miranda
        .method_index
        .set(MethodIndex::try_from(slot).map_err(|_| too_many_methods(class))?);
    debug_assert!(miranda.access_flags().contains(MethodAccessFlags::ABSTRACT));

    tracing::trace!(
        "Adding miranda method {} to {}",
        signature(interface_method),
        class.descriptor()
    );
    tables.mirandas.push(miranda);
    tables
        .vtable
        .push(MethodId::unchecked_compose(class.id(), index));

    Ok(slot)
}

fn signature(method: &Method) -> String {
    format!("{}{}", method.name(), method.descriptor_text())
}

fn too_many_methods(class: &Class) -> LinkError {
    LinkageError::TooManyMethods {
        class: class.descriptor().to_owned(),
    }
    .into()
}
