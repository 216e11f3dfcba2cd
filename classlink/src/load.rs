use classlink_base::{
    container::{parse_method_descriptor, ClassDef, ConstantValue, Container},
    descriptor::{DescriptorType, PrimitiveType},
    flags::{ClassAccessFlags, FieldAccessFlags},
    id::{ContainerId, LoaderId, MethodIndex},
};
use indexmap::IndexSet;

use crate::{
    class::{ClassKind, Field, LoadedClass, Method},
    LinkError, LinkerConfig, MalformedError,
};

/// Build the unpublished record for a class definition: its flags, fields, and methods, with
/// every symbolic reference left unresolved.
pub(crate) fn load_class(
    conf: &LinkerConfig,
    container: &Container,
    container_id: ContainerId,
    def_index: usize,
    def: &ClassDef,
    loader: Option<LoaderId>,
) -> Result<LoadedClass, LinkError> {
    let descriptor = container.get_type_descriptor(def.class_type)?;

    verify_class_access_flags(descriptor, def.access_flags)?;

    if def.fields.len() > usize::from(u16::MAX) || def.methods.len() > usize::from(MethodIndex::MAX)
    {
        return Err(MalformedError::TooManyMembers {
            class: descriptor.to_owned(),
        }
        .into());
    }

    let mut fields = Vec::with_capacity(def.fields.len());
    let mut seen_fields = IndexSet::with_capacity(def.fields.len());
    for field_def in &def.fields {
        let name = container.get_text(field_def.name)?;
        let field_descriptor_text = container.get_type_descriptor(field_def.type_idx)?;
        let field_descriptor = DescriptorType::from_text(field_descriptor_text).map_err(|error| {
            MalformedError::Descriptor {
                descriptor: field_descriptor_text.to_owned(),
                error,
            }
        })?;

        if !seen_fields.insert((name, field_descriptor_text)) {
            return Err(MalformedError::DuplicateField {
                class: descriptor.to_owned(),
                name: name.to_owned(),
                descriptor: field_descriptor_text.to_owned(),
            }
            .into());
        }

        if conf.verify_access_flags && field_def.access_flags.verify_visibility().is_err() {
            return Err(MalformedError::IncompatibleVisibility {
                class: descriptor.to_owned(),
                member: name.to_owned(),
            }
            .into());
        }

        let is_static = field_def.access_flags.contains(FieldAccessFlags::STATIC);
        if def.access_flags.is_interface() && !is_static {
            return Err(MalformedError::InterfaceInstanceField {
                class: descriptor.to_owned(),
                field: name.to_owned(),
            }
            .into());
        }

        if let Some(value) = field_def.initial_value {
            if !is_static || !constant_matches(&value, &field_descriptor) {
                return Err(MalformedError::ConstantTypeMismatch {
                    class: descriptor.to_owned(),
                    field: name.to_owned(),
                }
                .into());
            }
        }

        fields.push(Field::new(
            name.into(),
            field_descriptor,
            field_def.access_flags,
            field_def.initial_value,
        ));
    }

    let mut methods = Vec::with_capacity(def.methods.len());
    let mut seen_methods = IndexSet::with_capacity(def.methods.len());
    for method_def in &def.methods {
        let name = container.get_text(method_def.name)?;
        let method_descriptor_text = container.get_text(method_def.descriptor)?;
        let method_descriptor = parse_method_descriptor(method_descriptor_text)?;

        if !seen_methods.insert((name, method_descriptor_text)) {
            return Err(MalformedError::DuplicateMethod {
                class: descriptor.to_owned(),
                name: name.to_owned(),
                descriptor: method_descriptor_text.to_owned(),
            }
            .into());
        }

        if conf.verify_access_flags && method_def.access_flags.verify_visibility().is_err() {
            return Err(MalformedError::IncompatibleVisibility {
                class: descriptor.to_owned(),
                member: name.to_owned(),
            }
            .into());
        }

        methods.push(Method::new(
            name.into(),
            method_descriptor_text.into(),
            method_descriptor,
            method_def.access_flags,
            method_def.code,
        ));
    }

    Ok(LoadedClass {
        descriptor: descriptor.into(),
        loader,
        access_flags: def.access_flags,
        kind: ClassKind::Instance {
            container: container_id,
            def_index,
            super_type: def.super_type,
            interfaces: def.interfaces.clone(),
        },
        fields,
        methods,
        failure: None,
    })
}

fn verify_class_access_flags(descriptor: &str, flags: ClassAccessFlags) -> Result<(), LinkError> {
    let invalid = if flags.is_interface() {
        // Interfaces are implicitly abstract and can't be final
        !flags.is_abstract() || flags.is_final()
    } else {
        flags.is_abstract() && flags.is_final()
    };

    if invalid {
        tracing::warn!("{} has invalid access flags {:?}", descriptor, flags);
        return Err(MalformedError::InvalidClassFlags {
            class: descriptor.to_owned(),
        }
        .into());
    }

    Ok(())
}

fn constant_matches(value: &ConstantValue, descriptor: &DescriptorType) -> bool {
    match (value, descriptor.primitive()) {
        (
            ConstantValue::Int(_),
            Some(
                PrimitiveType::Boolean
                | PrimitiveType::Byte
                | PrimitiveType::Char
                | PrimitiveType::Short
                | PrimitiveType::Int,
            ),
        )
        | (ConstantValue::Long(_), Some(PrimitiveType::Long))
        | (ConstantValue::Float(_), Some(PrimitiveType::Float))
        | (ConstantValue::Double(_), Some(PrimitiveType::Double)) => true,
        (ConstantValue::String(_), None) => {
            descriptor.to_descriptor_string() == "Ljava/lang/String;"
        }
        _ => false,
    }
}
