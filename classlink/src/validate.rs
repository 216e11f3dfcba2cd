//! Checks that a descriptor means the same class on both sides of an override or an interface
//! implementation, when the two sides have different defining loaders.
//!
//! Classes are only looked up here, never linked, so that the checks can run while the class
//! being linked is still owned by this thread.

use classlink_base::{
    descriptor::DescriptorType,
    id::{ClassId, LoaderId},
};

use crate::{
    class::{Class, Method},
    class_linker::ClassLinker,
    link::MethodTables,
    LinkError, LinkageError,
};

/// Whether the class named by `descriptor` is the same class for both loaders.
/// Primitive types trivially are. A class which neither loader can find counts as the same, it
/// will fail when something tries to use it.
pub(crate) fn has_same_descriptor_classes(
    linker: &ClassLinker,
    descriptor: &DescriptorType,
    a: Option<LoaderId>,
    b: Option<LoaderId>,
) -> Result<bool, LinkError> {
    if a == b {
        return Ok(true);
    }

    let element = descriptor.element();
    if element.primitive().is_some() {
        return Ok(true);
    }

    let element = element.to_string();
    let in_a = find_identity(linker, &element, a)?;
    let in_b = find_identity(linker, &element, b)?;
    let same = match (in_a, in_b) {
        (Some(in_a), Some(in_b)) => in_a == in_b,
        (None, None) => true,
        _ => false,
    };

    if !same {
        tracing::debug!(
            "{} differs between loaders {:?} and {:?}",
            element,
            a.map(LoaderId::get),
            b.map(LoaderId::get)
        );
    }

    Ok(same)
}

fn find_identity(
    linker: &ClassLinker,
    descriptor: &str,
    loader: Option<LoaderId>,
) -> Result<Option<ClassId>, LinkError> {
    match linker.lookup_or_load(descriptor, loader) {
        Ok(class) => Ok(Some(class.id())),
        Err(LinkError::NotFound { .. }) => Ok(None),
        Err(err) => Err(err),
    }
}

/// Compare every reference type in the two method descriptors, returning the first which
/// resolves differently for the two loaders
pub(crate) fn method_descriptor_mismatch(
    linker: &ClassLinker,
    method: &Method,
    loader: Option<LoaderId>,
    other: &Method,
    other_loader: Option<LoaderId>,
) -> Result<Option<String>, LinkError> {
    if loader == other_loader {
        return Ok(None);
    }

    // Signatures are equal by text, so only one side needs to be walked
    debug_assert_eq!(method.descriptor_text(), other.descriptor_text());
    for desc in method.descriptor().types() {
        if !desc.is_reference() {
            continue;
        }

        if !has_same_descriptor_classes(linker, desc, loader, other_loader)? {
            return Ok(Some(desc.to_descriptor_string()));
        }
    }

    Ok(None)
}

/// After the tables are built, check each interface method against the method implementing it
/// when they come from different loaders. Overrides of super class methods are checked as the
/// vtable is built.
pub(crate) fn validate_interface_descriptors(
    linker: &ClassLinker,
    class: &Class,
    tables: &MethodTables,
) -> Result<(), LinkError> {
    if class.is_interface() {
        return Ok(());
    }

    for entry in &tables.iftable {
        let interface = linker.class(entry.interface)?;
        let interface_methods = interface.methods().iter().filter(|m| m.is_virtual());

        for (interface_method, slot) in interface_methods.zip(entry.slots.iter()) {
            let implementation = tables
                .vtable
                .get(usize::from(*slot))
                .copied()
                .ok_or(LinkError::BadClassId(entry.interface))?;

            let mismatch = tables.with_method(linker, class, implementation, |declaring, method| {
                if method.is_miranda() {
                    return Ok(None);
                }

                method_descriptor_mismatch(
                    linker,
                    method,
                    declaring.loader(),
                    interface_method,
                    interface.loader(),
                )
            })??;

            if let Some(descriptor) = mismatch {
                return Err(LinkageError::LoaderConstraint {
                    class: class.descriptor().to_owned(),
                    method: format!(
                        "{}{}",
                        interface_method.name(),
                        interface_method.descriptor_text()
                    ),
                    descriptor,
                }
                .into());
            }
        }
    }

    Ok(())
}
