//! Containers written as text manifests (`.cdef` files).
//!
//! Each section of a manifest defines one class:
//!
//! ```text
//! # Comments start with a '#'
//! Class: LPkg/Widget;
//! Access: public abstract
//! Super: Ljava/lang/Object;
//! Interface: LPkg/Api;
//! Field: private I size
//! Field: public static final I MAX
//! Constant: MAX 7
//! Method: public abstract draw()V
//! Method: static <clinit>()V
//! ```
//!
//! `Access` defaults to `public`, and `Super` to the root class (which itself has none).
//! Methods which are neither abstract nor native are given code, numbered in the order they
//! appear in the container.

use std::{collections::HashMap, fmt};

use classlink_base::{
    container::{ClassDefBuilder, CodeRef, ConstantValue},
    flags::{AccessFlagsError, ClassAccessFlags, FieldAccessFlags, MethodAccessFlags},
    Container, ContainerBuilder, ContainerError, OBJECT_DESCRIPTOR,
};
use kv_parser::{KeyValueParseError, Section};

const KEY_CLASS: &str = "Class";
const KEY_ACCESS: &str = "Access";
const KEY_SUPER: &str = "Super";
const KEY_INTERFACE: &str = "Interface";
const KEY_FIELD: &str = "Field";
const KEY_METHOD: &str = "Method";
const KEY_CONSTANT: &str = "Constant";

const KNOWN_KEYS: [&str; 7] = [
    KEY_CLASS,
    KEY_ACCESS,
    KEY_SUPER,
    KEY_INTERFACE,
    KEY_FIELD,
    KEY_METHOD,
    KEY_CONSTANT,
];

const STRING_DESCRIPTOR: &str = "Ljava/lang/String;";

#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ManifestError {
    Parse(KeyValueParseError),
    /// A section without a `Class` key
    MissingClass { section: usize },
    /// A key which may only appear once in a section appeared more than once
    RepeatedKey { class: String, key: &'static str },
    Flags { class: String, error: AccessFlagsError },
    BadField { class: String, line: String },
    BadMethod { class: String, line: String },
    BadConstant { class: String, line: String },
    /// A constant for a field which the class doesn't declare, or which isn't static
    UnknownConstantField { class: String, name: String },
    Container(ContainerError),
}
impl From<KeyValueParseError> for ManifestError {
    fn from(err: KeyValueParseError) -> Self {
        Self::Parse(err)
    }
}
impl From<ContainerError> for ManifestError {
    fn from(err: ContainerError) -> Self {
        Self::Container(err)
    }
}
impl fmt::Display for ManifestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManifestError::Parse(err) => err.fmt(f),
            ManifestError::MissingClass { section } => {
                write!(f, "section {} has no Class key", section)
            }
            ManifestError::RepeatedKey { class, key } => {
                write!(f, "{} has more than one {} key", class, key)
            }
            ManifestError::Flags { class, error } => write!(f, "{}: {}", class, error),
            ManifestError::BadField { class, line } => {
                write!(f, "{}: bad field '{}'", class, line)
            }
            ManifestError::BadMethod { class, line } => {
                write!(f, "{}: bad method '{}'", class, line)
            }
            ManifestError::BadConstant { class, line } => {
                write!(f, "{}: bad constant '{}'", class, line)
            }
            ManifestError::UnknownConstantField { class, name } => {
                write!(f, "{} has a constant for {}, which is not a static field", class, name)
            }
            ManifestError::Container(err) => err.fmt(f),
        }
    }
}
impl std::error::Error for ManifestError {}

/// Build a container named `name` from the text of a manifest
pub fn parse_manifest(name: &str, text: &str) -> Result<Container, ManifestError> {
    let data = kv_parser::parse_keyvalue_data(text, |warning| {
        tracing::warn!("When parsing manifest '{}': {:?}", name, warning);
    })?;

    let mut builder = ContainerBuilder::new(name);
    let mut next_code = 0;
    for (index, section) in data.sections().iter().enumerate() {
        add_class(&mut builder, index, section, &mut next_code)?;
    }

    tracing::debug!("Parsed manifest '{}' with {} classes", name, data.len());
    Ok(builder.build()?)
}

fn single<'a>(
    section: &'a Section,
    class: &str,
    key: &'static str,
) -> Result<Option<&'a str>, ManifestError> {
    let mut values = section.get_all(key);
    let first = values.next();
    if values.next().is_some() {
        return Err(ManifestError::RepeatedKey {
            class: class.to_owned(),
            key,
        });
    }

    Ok(first.map(str::trim))
}

fn add_class(
    builder: &mut ContainerBuilder,
    index: usize,
    section: &Section,
    next_code: &mut u32,
) -> Result<(), ManifestError> {
    let descriptor = section
        .get(KEY_CLASS)
        .map(str::trim)
        .ok_or(ManifestError::MissingClass { section: index })?;
    single(section, descriptor, KEY_CLASS)?;

    for (key, _) in section.entries() {
        if !KNOWN_KEYS.contains(&key) {
            tracing::warn!("Ignoring unknown key '{}' for {}", key, descriptor);
        }
    }

    let access = match single(section, descriptor, KEY_ACCESS)? {
        Some(names) => ClassAccessFlags::from_names(names).map_err(|error| ManifestError::Flags {
            class: descriptor.to_owned(),
            error,
        })?,
        None => ClassAccessFlags::PUBLIC,
    };

    let super_class = match single(section, descriptor, KEY_SUPER)? {
        Some(super_class) => Some(super_class),
        None if descriptor == OBJECT_DESCRIPTOR => None,
        None => Some(OBJECT_DESCRIPTOR),
    };

    let mut constants: HashMap<&str, &str> = HashMap::new();
    for line in section.get_all(KEY_CONSTANT) {
        let (name, value) = line
            .trim()
            .split_once(char::is_whitespace)
            .ok_or_else(|| ManifestError::BadConstant {
                class: descriptor.to_owned(),
                line: line.to_owned(),
            })?;
        if constants.insert(name, value.trim()).is_some() {
            return Err(ManifestError::RepeatedKey {
                class: descriptor.to_owned(),
                key: KEY_CONSTANT,
            });
        }
    }

    let mut class = builder.class(descriptor).access(access);
    if let Some(super_class) = super_class {
        class = class.super_class(super_class);
    }
    for interface in section.get_all(KEY_INTERFACE) {
        class = class.interface(interface.trim());
    }

    for line in section.get_all(KEY_FIELD) {
        let (flags, field_descriptor, name) =
            split_member(line).ok_or_else(|| ManifestError::BadField {
                class: descriptor.to_owned(),
                line: line.to_owned(),
            })?;
        let flags = FieldAccessFlags::from_names(flags).map_err(|error| ManifestError::Flags {
            class: descriptor.to_owned(),
            error,
        })?;

        let constant = match constants.remove(name) {
            Some(value) if flags.contains(FieldAccessFlags::STATIC) => Some(
                parse_constant(&mut class, field_descriptor, value).ok_or_else(|| {
                    ManifestError::BadConstant {
                        class: descriptor.to_owned(),
                        line: format!("{} {}", name, value),
                    }
                })?,
            ),
            Some(_) => {
                return Err(ManifestError::UnknownConstantField {
                    class: descriptor.to_owned(),
                    name: name.to_owned(),
                })
            }
            None => None,
        };

        class = class.field_with_value(name, field_descriptor, flags, constant);
    }

    if let Some(name) = constants.keys().next() {
        return Err(ManifestError::UnknownConstantField {
            class: descriptor.to_owned(),
            name: (*name).to_owned(),
        });
    }

    for line in section.get_all(KEY_METHOD) {
        let bad_method = || ManifestError::BadMethod {
            class: descriptor.to_owned(),
            line: line.to_owned(),
        };

        let line = line.trim();
        let (flags, signature) = match line.rsplit_once(char::is_whitespace) {
            Some((flags, signature)) => (flags, signature),
            None => ("", line),
        };
        let paren = signature.find('(').ok_or_else(bad_method)?;
        let (name, method_descriptor) = signature.split_at(paren);
        if name.is_empty() {
            return Err(bad_method());
        }

        let flags = MethodAccessFlags::from_names(flags).map_err(|error| ManifestError::Flags {
            class: descriptor.to_owned(),
            error,
        })?;
        let code = if flags.should_have_code() {
            let code = CodeRef(*next_code);
            *next_code += 1;
            Some(code)
        } else {
            None
        };

        class = class.method_with_code(name, method_descriptor, flags, code);
    }

    class.finish();
    Ok(())
}

/// Split `flags... descriptor name`
fn split_member(line: &str) -> Option<(&str, &str, &str)> {
    let line = line.trim();
    let (rest, name) = line.rsplit_once(char::is_whitespace)?;
    let rest = rest.trim_end();
    match rest.rsplit_once(char::is_whitespace) {
        Some((flags, descriptor)) => Some((flags, descriptor, name)),
        None => Some(("", rest, name)),
    }
}

fn parse_constant(
    class: &mut ClassDefBuilder<'_>,
    descriptor: &str,
    value: &str,
) -> Option<ConstantValue> {
    Some(match descriptor {
        "Z" => ConstantValue::Int(match value {
            "true" => 1,
            "false" => 0,
            _ => return None,
        }),
        "B" => ConstantValue::Int(i32::from(value.parse::<i8>().ok()?)),
        "S" => ConstantValue::Int(i32::from(value.parse::<i16>().ok()?)),
        "C" => ConstantValue::Int(i32::from(parse_char(value)?)),
        "I" => ConstantValue::Int(value.parse().ok()?),
        "J" => ConstantValue::Long(value.parse().ok()?),
        "F" => ConstantValue::Float(value.parse().ok()?),
        "D" => ConstantValue::Double(value.parse().ok()?),
        STRING_DESCRIPTOR => {
            let text = parse_string_literal(value)?;
            ConstantValue::String(class.string(&text))
        }
        _ => return None,
    })
}

/// A char constant, either `'c'` or its numeric value
fn parse_char(value: &str) -> Option<u16> {
    if let Some(inner) = value.strip_prefix('\'').and_then(|x| x.strip_suffix('\'')) {
        let mut chars = inner.chars();
        let c = chars.next()?;
        if chars.next().is_some() {
            return None;
        }
        let mut buf = [0; 2];
        match c.encode_utf16(&mut buf) {
            [unit] => Some(*unit),
            _ => None,
        }
    } else {
        value.parse().ok()
    }
}

/// A double quoted string, with `\\`, `\"`, `\n`, `\t` and `\0` escapes
fn parse_string_literal(value: &str) -> Option<String> {
    let inner = value.strip_prefix('"')?.strip_suffix('"')?;
    let mut text = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            text.push(c);
            continue;
        }

        text.push(match chars.next()? {
            '\\' => '\\',
            '"' => '"',
            'n' => '\n',
            't' => '\t',
            '0' => '\0',
            _ => return None,
        });
    }

    Some(text)
}
