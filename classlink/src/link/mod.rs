use std::{collections::HashSet, sync::Arc};

use classlink_base::{
    container::Container,
    id::{LoaderId, TypeIndex},
    OBJECT_DESCRIPTOR,
};
use smallvec::SmallVec;

use crate::{
    bootstrap::ClassRoot,
    class::{
        Class, ClassKind, ClassStatus, InterfaceEntry, Linked, ReferenceOffsets, ARRAY_HEADER_SIZE,
    },
    class_linker::ClassLinker,
    resolve, validate, LinkError, LinkageError, MalformedError,
};

mod fields;
mod methods;

pub(crate) use methods::MethodTables;

/// Link a class which this thread has claimed, publishing the result or putting the class into
/// the error state
pub(crate) fn link_class(linker: &ClassLinker, class: &Arc<Class>) -> Result<(), LinkError> {
    let result = match class.kind {
        ClassKind::Instance { .. } => link_instance_class(linker, class),
        ClassKind::Array { .. } => link_array_class(linker, class),
        ClassKind::Primitive(_) => link_primitive_class(class),
    };

    match result {
        Ok(status) => {
            tracing::trace!("Linked {} as #{}", class.descriptor(), class.id().get());
            class.finish(status);
            Ok(())
        }
        Err(err) => {
            tracing::warn!("Failed to link {}: {}", class.descriptor(), err);
            class.fail(err.clone());
            Err(err)
        }
    }
}

fn link_instance_class(linker: &ClassLinker, class: &Arc<Class>) -> Result<ClassStatus, LinkError> {
    check_circularity(linker, class)?;

    let (super_class, interfaces) = link_super_class(linker, class)?;
    class.advance(ClassStatus::Resolved);

    let tables = methods::link_methods(linker, class, super_class.as_deref(), &interfaces)?;
    class.advance(ClassStatus::MethodsLinked);

    let layout = fields::link_fields(class, super_class.as_deref());
    class.advance(ClassStatus::FieldsLaidOut);

    validate::validate_interface_descriptors(linker, class, &tables)?;

    let linked = Linked {
        super_class: super_class.map(|x| x.id()),
        interfaces: interfaces.iter().map(|x| x.id()).collect(),
        vtable: tables.vtable,
        iftable: tables.iftable,
        mirandas: tables.mirandas,
        instance_size: layout.instance_size,
        reference_offsets: layout.reference_offsets,
        static_size: layout.static_size,
        static_reference_offsets: layout.static_reference_offsets,
    };
    // This thread owns the class, so nothing else can have set it
    let _ = class.linked.set(linked);

    Ok(ClassStatus::Linked)
}

/// Arrays inherit everything from the root class, and implement the array interfaces
fn link_array_class(linker: &ClassLinker, class: &Arc<Class>) -> Result<ClassStatus, LinkError> {
    let object = linker.class(linker.try_class_root(ClassRoot::JavaLangObject)?)?;
    linker.ensure_linked(&object)?;

    let interfaces: SmallVec<[_; 4]> = linker
        .array_interfaces
        .get()
        .map(|x| x.iter().copied().collect())
        .unwrap_or_default();
    let iftable = interfaces
        .iter()
        .map(|interface| InterfaceEntry {
            interface: *interface,
            slots: Vec::new(),
        })
        .collect();

    let _ = class.linked.set(Linked {
        super_class: Some(object.id()),
        interfaces,
        vtable: object.vtable().to_vec(),
        iftable,
        mirandas: Vec::new(),
        instance_size: ARRAY_HEADER_SIZE,
        reference_offsets: ReferenceOffsets::empty(),
        static_size: 0,
        static_reference_offsets: ReferenceOffsets::empty(),
    });

    // Nothing to run for arrays
    Ok(ClassStatus::Initialized)
}

fn link_primitive_class(class: &Arc<Class>) -> Result<ClassStatus, LinkError> {
    let _ = class.linked.set(Linked {
        super_class: None,
        interfaces: SmallVec::new(),
        vtable: Vec::new(),
        iftable: Vec::new(),
        mirandas: Vec::new(),
        instance_size: 0,
        reference_offsets: ReferenceOffsets::empty(),
        static_size: 0,
        static_reference_offsets: ReferenceOffsets::empty(),
    });

    Ok(ClassStatus::Initialized)
}

fn symbolic_supers<'a>(
    container: &'a Container,
    super_type: Option<TypeIndex>,
    interfaces: &'a [TypeIndex],
) -> impl Iterator<Item = Result<&'a str, LinkError>> + 'a {
    super_type
        .into_iter()
        .chain(interfaces.iter().copied())
        .map(move |idx| container.get_type_descriptor(idx).map_err(LinkError::from))
}

/// Walk the super types by name, without loading them, to catch a class that inherits from
/// itself before anything waits on it
fn check_circularity(linker: &ClassLinker, class: &Class) -> Result<(), LinkError> {
    let (container, super_type, interfaces) = match &class.kind {
        ClassKind::Instance {
            container,
            super_type,
            interfaces,
            ..
        } => (*container, *super_type, interfaces),
        _ => return Ok(()),
    };

    let registered = linker.find_reference_cache(container)?;
    let mut pending: Vec<(String, Option<LoaderId>)> = Vec::new();
    for descriptor in symbolic_supers(registered.container(), super_type, interfaces) {
        pending.push((descriptor?.to_owned(), class.loader()));
    }

    let mut visited = HashSet::new();
    while let Some((descriptor, loader)) = pending.pop() {
        if !visited.insert((descriptor.clone(), loader)) {
            continue;
        }

        // Linked classes can't lead back to a class which is still being linked
        let published = loader
            .and_then(|_| linker.table.lookup(&descriptor, loader))
            .or_else(|| linker.table.lookup(&descriptor, None));
        let (registered, def_index, defining) = match published {
            Some(published) if published.status().is_linked() => continue,
            // Follow the definition the class was published from
            Some(published) => match &published.kind {
                ClassKind::Instance {
                    container,
                    def_index,
                    ..
                } => (
                    linker.find_reference_cache(*container)?,
                    *def_index,
                    published.loader(),
                ),
                _ => continue,
            },
            None => match linker.locate_definition(&descriptor, loader)? {
                Some(found) => found,
                // Missing classes are reported when they are resolved
                None => continue,
            },
        };

        if descriptor == class.descriptor() && defining == class.loader() {
            return Err(LinkageError::CircularInheritance {
                class: class.descriptor().to_owned(),
            }
            .into());
        }

        let container = registered.container();
        if let Some(def) = container.class_def(def_index) {
            for next in symbolic_supers(container, def.super_type, &def.interfaces) {
                pending.push((next?.to_owned(), defining));
            }
        }
    }

    Ok(())
}

type SuperTypes = (Option<Arc<Class>>, SmallVec<[Arc<Class>; 4]>);

fn link_super_class(linker: &ClassLinker, class: &Arc<Class>) -> Result<SuperTypes, LinkError> {
    let (super_type, interface_types) = match &class.kind {
        ClassKind::Instance {
            super_type,
            interfaces,
            ..
        } => (*super_type, interfaces.clone()),
        _ => return Ok((None, SmallVec::new())),
    };

    let is_root = class.descriptor() == OBJECT_DESCRIPTOR && class.loader().is_none();
    let super_class = match super_type {
        None if is_root => None,
        None => {
            return Err(MalformedError::MissingSuperClass {
                class: class.descriptor().to_owned(),
            }
            .into())
        }
        Some(_) if is_root => return Err(MalformedError::RootHasSuperClass.into()),
        Some(idx) => {
            let super_id = resolve::resolve_class(linker, class, idx)?;
            let super_class = linker.class(super_id)?;

            if super_class.is_interface() {
                return Err(LinkageError::SuperClassInterface {
                    class: class.descriptor().to_owned(),
                    super_class: super_class.descriptor().to_owned(),
                }
                .into());
            }

            if super_class.is_final() {
                return Err(LinkageError::SuperClassFinal {
                    class: class.descriptor().to_owned(),
                    super_class: super_class.descriptor().to_owned(),
                }
                .into());
            }

            check_access(class, &super_class)?;

            if class.is_interface()
                && !(super_class.descriptor() == OBJECT_DESCRIPTOR
                    && super_class.loader().is_none())
            {
                return Err(LinkageError::InterfaceSuperNotObject {
                    class: class.descriptor().to_owned(),
                }
                .into());
            }

            Some(super_class)
        }
    };

    let mut interfaces = SmallVec::new();
    for idx in interface_types {
        let interface_id = resolve::resolve_class(linker, class, idx)?;
        let interface = linker.class(interface_id)?;
        if !interface.is_interface() {
            return Err(LinkageError::NotAnInterface {
                class: class.descriptor().to_owned(),
                interface: interface.descriptor().to_owned(),
            }
            .into());
        }

        check_access(class, &interface)?;
        interfaces.push(interface);
    }

    Ok((super_class, interfaces))
}

fn check_access(class: &Class, target: &Class) -> Result<(), LinkError> {
    if target.is_public() || class.is_same_package(target) {
        Ok(())
    } else {
        Err(LinkageError::InaccessibleClass {
            class: class.descriptor().to_owned(),
            target: target.descriptor().to_owned(),
        }
        .into())
    }
}
