use std::{fmt, num::NonZeroUsize};

use itertools::Itertools;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    Void,
}
impl PrimitiveType {
    pub const ALL: [PrimitiveType; 9] = [
        PrimitiveType::Boolean,
        PrimitiveType::Byte,
        PrimitiveType::Char,
        PrimitiveType::Short,
        PrimitiveType::Int,
        PrimitiveType::Long,
        PrimitiveType::Float,
        PrimitiveType::Double,
        PrimitiveType::Void,
    ];

    #[must_use]
    pub fn from_descriptor_char(c: u8) -> Option<PrimitiveType> {
        Some(match c {
            b'Z' => PrimitiveType::Boolean,
            b'B' => PrimitiveType::Byte,
            b'C' => PrimitiveType::Char,
            b'S' => PrimitiveType::Short,
            b'I' => PrimitiveType::Int,
            b'J' => PrimitiveType::Long,
            b'F' => PrimitiveType::Float,
            b'D' => PrimitiveType::Double,
            b'V' => PrimitiveType::Void,
            _ => return None,
        })
    }

    #[must_use]
    pub fn descriptor(self) -> &'static str {
        match self {
            PrimitiveType::Boolean => "Z",
            PrimitiveType::Byte => "B",
            PrimitiveType::Char => "C",
            PrimitiveType::Short => "S",
            PrimitiveType::Int => "I",
            PrimitiveType::Long => "J",
            PrimitiveType::Float => "F",
            PrimitiveType::Double => "D",
            PrimitiveType::Void => "V",
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            PrimitiveType::Boolean => "boolean",
            PrimitiveType::Byte => "byte",
            PrimitiveType::Char => "char",
            PrimitiveType::Short => "short",
            PrimitiveType::Int => "int",
            PrimitiveType::Long => "long",
            PrimitiveType::Float => "float",
            PrimitiveType::Double => "double",
            PrimitiveType::Void => "void",
        }
    }

    /// Size in bytes of a value of this type when stored in a field or array
    #[must_use]
    pub fn size(self) -> u32 {
        match self {
            PrimitiveType::Boolean | PrimitiveType::Byte => 1,
            PrimitiveType::Char | PrimitiveType::Short => 2,
            PrimitiveType::Int | PrimitiveType::Float => 4,
            PrimitiveType::Long | PrimitiveType::Double => 8,
            PrimitiveType::Void => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DescriptorError {
    Empty,
    /// The descriptor ended in the middle of a type
    UnexpectedEnd,
    InvalidCharacter(char),
    /// `L` without a terminating `;`
    UnterminatedClassName,
    EmptyClassName,
    /// Void was used somewhere other than a method return type
    VoidNotAllowed,
    /// There was extra data after the type
    TrailingData(String),
    /// A method descriptor did not start with `(`
    MissingParameterList,
    /// More than 255 array dimensions
    TooManyDimensions,
}
impl fmt::Display for DescriptorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DescriptorError::Empty => write!(f, "empty descriptor"),
            DescriptorError::UnexpectedEnd => write!(f, "descriptor ended unexpectedly"),
            DescriptorError::InvalidCharacter(c) => write!(f, "invalid character '{}'", c),
            DescriptorError::UnterminatedClassName => write!(f, "unterminated class name"),
            DescriptorError::EmptyClassName => write!(f, "empty class name"),
            DescriptorError::VoidNotAllowed => write!(f, "void is only allowed as a return type"),
            DescriptorError::TrailingData(rest) => write!(f, "trailing data '{}'", rest),
            DescriptorError::MissingParameterList => write!(f, "missing parameter list"),
            DescriptorError::TooManyDimensions => write!(f, "too many array dimensions"),
        }
    }
}

/// The maximum number of array dimensions a descriptor may have
pub const MAX_ARRAY_DIMENSIONS: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DescriptorTypeBasic {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    /// The internal name of the class, such as `java/lang/Object`
    Class(String),
    Short,
    Boolean,
}
impl DescriptorTypeBasic {
    /// Parse a single non-array type off the front of `text`
    fn parse(text: &str) -> Result<(DescriptorTypeBasic, &str), DescriptorError> {
        let first = *text.as_bytes().first().ok_or(DescriptorError::UnexpectedEnd)?;
        if first == b'L' {
            let end = text.find(';').ok_or(DescriptorError::UnterminatedClassName)?;
            let name = &text[1..end];
            if name.is_empty() {
                return Err(DescriptorError::EmptyClassName);
            }

            if let Some(c) = name.chars().find(|c| matches!(c, '.' | '[' | '(' | ')' | '<' | '>'))
            {
                return Err(DescriptorError::InvalidCharacter(c));
            }

            return Ok((DescriptorTypeBasic::Class(name.to_owned()), &text[end + 1..]));
        }

        let basic = match PrimitiveType::from_descriptor_char(first) {
            Some(PrimitiveType::Void) => return Err(DescriptorError::VoidNotAllowed),
            Some(prim) => DescriptorTypeBasic::from_primitive(prim),
            None => {
                let c = text.chars().next().unwrap_or('\0');
                return Err(DescriptorError::InvalidCharacter(c));
            }
        };

        Ok((basic, &text[1..]))
    }

    fn from_primitive(prim: PrimitiveType) -> DescriptorTypeBasic {
        match prim {
            PrimitiveType::Boolean => DescriptorTypeBasic::Boolean,
            PrimitiveType::Byte => DescriptorTypeBasic::Byte,
            PrimitiveType::Char => DescriptorTypeBasic::Char,
            PrimitiveType::Short => DescriptorTypeBasic::Short,
            PrimitiveType::Int => DescriptorTypeBasic::Int,
            PrimitiveType::Long => DescriptorTypeBasic::Long,
            PrimitiveType::Float => DescriptorTypeBasic::Float,
            PrimitiveType::Double => DescriptorTypeBasic::Double,
            // Void is rejected before this is reached
            PrimitiveType::Void => unreachable!("void is not a basic descriptor type"),
        }
    }

    #[must_use]
    pub fn primitive(&self) -> Option<PrimitiveType> {
        Some(match self {
            DescriptorTypeBasic::Byte => PrimitiveType::Byte,
            DescriptorTypeBasic::Char => PrimitiveType::Char,
            DescriptorTypeBasic::Double => PrimitiveType::Double,
            DescriptorTypeBasic::Float => PrimitiveType::Float,
            DescriptorTypeBasic::Int => PrimitiveType::Int,
            DescriptorTypeBasic::Long => PrimitiveType::Long,
            DescriptorTypeBasic::Class(_) => return None,
            DescriptorTypeBasic::Short => PrimitiveType::Short,
            DescriptorTypeBasic::Boolean => PrimitiveType::Boolean,
        })
    }
}
impl fmt::Display for DescriptorTypeBasic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DescriptorTypeBasic::Class(name) => write!(f, "L{};", name),
            _ => match self.primitive() {
                Some(prim) => f.write_str(prim.descriptor()),
                None => Ok(()),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DescriptorType {
    Basic(DescriptorTypeBasic),
    Array {
        level: NonZeroUsize,
        component: DescriptorTypeBasic,
    },
}
impl DescriptorType {
    /// Parse a single field type off the front of `text`, returning the rest
    pub fn parse(text: &str) -> Result<(DescriptorType, &str), DescriptorError> {
        let level = text.bytes().take_while(|x| *x == b'[').count();
        if level > MAX_ARRAY_DIMENSIONS {
            return Err(DescriptorError::TooManyDimensions);
        }

        let (component, rest) = DescriptorTypeBasic::parse(&text[level..])?;
        let desc = match NonZeroUsize::new(level) {
            Some(level) => DescriptorType::Array { level, component },
            None => DescriptorType::Basic(component),
        };

        Ok((desc, rest))
    }

    /// Parse the entirety of `text` as a single field type
    pub fn from_text(text: &str) -> Result<DescriptorType, DescriptorError> {
        if text.is_empty() {
            return Err(DescriptorError::Empty);
        }

        let (desc, rest) = DescriptorType::parse(text)?;
        if !rest.is_empty() {
            return Err(DescriptorError::TrailingData(rest.to_owned()));
        }

        Ok(desc)
    }

    /// Whether values of this type are stored as object references
    #[must_use]
    pub fn is_reference(&self) -> bool {
        !matches!(self, DescriptorType::Basic(x) if x.primitive().is_some())
    }

    /// The primitive type, if this is not a reference type
    #[must_use]
    pub fn primitive(&self) -> Option<PrimitiveType> {
        match self {
            DescriptorType::Basic(basic) => basic.primitive(),
            DescriptorType::Array { .. } => None,
        }
    }

    /// The innermost non-array type
    #[must_use]
    pub fn element(&self) -> &DescriptorTypeBasic {
        match self {
            DescriptorType::Basic(basic) => basic,
            DescriptorType::Array { component, .. } => component,
        }
    }

    #[must_use]
    pub fn to_descriptor_string(&self) -> String {
        self.to_string()
    }
}
impl fmt::Display for DescriptorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DescriptorType::Basic(basic) => basic.fmt(f),
            DescriptorType::Array { level, component } => {
                for _ in 0..level.get() {
                    f.write_str("[")?;
                }
                component.fmt(f)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    parameters: Vec<DescriptorType>,
    /// None represents void
    return_type: Option<DescriptorType>,
}
impl MethodDescriptor {
    #[must_use]
    /// Construct a method descriptor that takes in the given parameters and potentially returns
    /// some type
    pub fn new(parameters: Vec<DescriptorType>, return_type: Option<DescriptorType>) -> Self {
        Self {
            parameters,
            return_type,
        }
    }

    #[must_use]
    pub fn parameters(&self) -> &[DescriptorType] {
        self.parameters.as_slice()
    }

    #[must_use]
    pub fn return_type(&self) -> Option<&DescriptorType> {
        self.return_type.as_ref()
    }

    /// Every type mentioned by the descriptor, return type first
    pub fn types(&self) -> impl Iterator<Item = &DescriptorType> {
        self.return_type.iter().chain(self.parameters.iter())
    }

    pub fn from_text(text: &str) -> Result<MethodDescriptor, DescriptorError> {
        let mut rest = text
            .strip_prefix('(')
            .ok_or(DescriptorError::MissingParameterList)?;

        let mut parameters = Vec::new();
        loop {
            match rest.as_bytes().first() {
                Some(b')') => {
                    rest = &rest[1..];
                    break;
                }
                Some(_) => {
                    let (param, after) = DescriptorType::parse(rest)?;
                    parameters.push(param);
                    rest = after;
                }
                None => return Err(DescriptorError::UnexpectedEnd),
            }
        }

        let return_type = if rest == "V" {
            None
        } else {
            Some(DescriptorType::from_text(rest)?)
        };

        Ok(MethodDescriptor::new(parameters, return_type))
    }
}
impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})", self.parameters.iter().join(""))?;
        match &self.return_type {
            Some(ret) => ret.fmt(f),
            None => f.write_str("V"),
        }
    }
}

/// Check that `descriptor` names a loadable type: a primitive (including void), an array, or a
/// class.
pub fn validate_type_descriptor(descriptor: &str) -> Result<(), DescriptorError> {
    if descriptor == "V" {
        return Ok(());
    }

    DescriptorType::from_text(descriptor).map(|_| ())
}

/// `[[I` -> `[I`
#[must_use]
pub fn component_descriptor(descriptor: &str) -> Option<&str> {
    descriptor.strip_prefix('[')
}

/// `[[Ljava/lang/Object;` -> `Ljava/lang/Object;`
#[must_use]
pub fn element_descriptor(descriptor: &str) -> &str {
    descriptor.trim_start_matches('[')
}

/// `Ljava/lang/Object;` -> `java/lang/Object`
#[must_use]
pub fn class_name(descriptor: &str) -> Option<&str> {
    descriptor.strip_prefix('L')?.strip_suffix(';')
}

/// The package portion of a class descriptor, `Ljava/lang/Object;` -> `java/lang`.
/// Classes in the unnamed package, arrays, and primitives get an empty package.
#[must_use]
pub fn package_name(descriptor: &str) -> &str {
    let name = class_name(element_descriptor(descriptor)).unwrap_or("");
    match name.rfind('/') {
        Some(index) => &name[..index],
        None => "",
    }
}
