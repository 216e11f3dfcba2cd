use bitflags::bitflags;

bitflags! {
    pub struct ClassAccessFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const SUPER = 0x0020;
        const INTERFACE = 0x0200;
        const ABSTRACT = 0x0400;
        const SYNTHETIC = 0x1000;
        const ANNOTATION = 0x2000;
        const ENUM = 0x4000;
    }
}

bitflags! {
    pub struct FieldAccessFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const VOLATILE = 0x0040;
        const TRANSIENT = 0x0080;
        const SYNTHETIC = 0x1000;
        const ENUM = 0x4000;
    }
}

bitflags! {
    pub struct MethodAccessFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const SYNCHRONIZED = 0x0020;
        const BRIDGE = 0x0040;
        const VARARGS = 0x0080;
        const NATIVE = 0x0100;
        const ABSTRACT = 0x0400;
        const STRICT = 0x0800;
        const SYNTHETIC = 0x1000;
    }
}

/// Visibility of a member, ordered from the most restricted to the least.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Visibility {
    Private,
    Package,
    Protected,
    Public,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AccessFlagsError {
    /// More than one of public/protected/private was set
    IncompatibleVisibilityModifiers,
    /// A flag name that doesn't exist for this kind of declaration
    UnknownFlag(String),
}
impl std::fmt::Display for AccessFlagsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessFlagsError::IncompatibleVisibilityModifiers => {
                write!(f, "more than one of public, protected and private")
            }
            AccessFlagsError::UnknownFlag(name) => write!(f, "unknown access flag '{}'", name),
        }
    }
}

macro_rules! impl_access_flags {
    ($name:ident, [$($text:literal => $flag:ident),* $(,)?]) => {
        impl $name {
            /// Parse whitespace or comma separated lowercase flag names, such as
            /// `public static final`
            pub fn from_names(names: &str) -> Result<$name, AccessFlagsError> {
                let mut flags = $name::empty();
                for name in names
                    .split(|c: char| c.is_whitespace() || c == ',')
                    .filter(|x| !x.is_empty())
                {
                    flags |= match name {
                        $($text => $name::$flag,)*
                        _ => return Err(AccessFlagsError::UnknownFlag(name.to_owned())),
                    };
                }

                Ok(flags)
            }

            #[must_use]
            pub fn visibility(self) -> Visibility {
                if self.contains($name::PUBLIC) {
                    Visibility::Public
                } else if self.contains($name::PROTECTED) {
                    Visibility::Protected
                } else if self.contains($name::PRIVATE) {
                    Visibility::Private
                } else {
                    Visibility::Package
                }
            }

            /// Check that at most one visibility modifier is present.
            /// Something like `<clinit>` might have none of them set, which is fine.
            pub fn verify_visibility(self) -> Result<(), AccessFlagsError> {
                let is_public = self.contains($name::PUBLIC);
                let is_protected = self.contains($name::PROTECTED);
                let is_private = self.contains($name::PRIVATE);

                // It can only have one of the bits set
                if (is_public && is_private)
                    || (is_public && is_protected)
                    || (is_private && is_protected)
                {
                    return Err(AccessFlagsError::IncompatibleVisibilityModifiers);
                }

                Ok(())
            }
        }
    };
}

impl_access_flags!(ClassAccessFlags, [
    "public" => PUBLIC,
    "private" => PRIVATE,
    "protected" => PROTECTED,
    "static" => STATIC,
    "final" => FINAL,
    "super" => SUPER,
    "interface" => INTERFACE,
    "abstract" => ABSTRACT,
    "synthetic" => SYNTHETIC,
    "annotation" => ANNOTATION,
    "enum" => ENUM,
]);
impl_access_flags!(FieldAccessFlags, [
    "public" => PUBLIC,
    "private" => PRIVATE,
    "protected" => PROTECTED,
    "static" => STATIC,
    "final" => FINAL,
    "volatile" => VOLATILE,
    "transient" => TRANSIENT,
    "synthetic" => SYNTHETIC,
    "enum" => ENUM,
]);
impl_access_flags!(MethodAccessFlags, [
    "public" => PUBLIC,
    "private" => PRIVATE,
    "protected" => PROTECTED,
    "static" => STATIC,
    "final" => FINAL,
    "synchronized" => SYNCHRONIZED,
    "bridge" => BRIDGE,
    "varargs" => VARARGS,
    "native" => NATIVE,
    "abstract" => ABSTRACT,
    "strict" => STRICT,
    "synthetic" => SYNTHETIC,
]);

impl ClassAccessFlags {
    #[must_use]
    pub fn is_interface(self) -> bool {
        self.contains(ClassAccessFlags::INTERFACE)
    }

    #[must_use]
    pub fn is_abstract(self) -> bool {
        self.contains(ClassAccessFlags::ABSTRACT)
    }

    #[must_use]
    pub fn is_final(self) -> bool {
        self.contains(ClassAccessFlags::FINAL)
    }

    /// Only the public/protected/private bits
    #[must_use]
    pub fn visibility_bits(self) -> ClassAccessFlags {
        self & (ClassAccessFlags::PUBLIC | ClassAccessFlags::PROTECTED | ClassAccessFlags::PRIVATE)
    }
}

impl MethodAccessFlags {
    /// Whether the method can override some super class method
    #[must_use]
    pub fn can_override(self) -> bool {
        // Private methods can't override
        // Static methods can't override in the same way that normal methods do.
        // They can shadow, though, but this is not an override.
        !(self.contains(MethodAccessFlags::PRIVATE) || self.contains(MethodAccessFlags::STATIC))
    }

    /// Whether the method should have code or not.
    /// native and abstract methods do not have code
    #[must_use]
    pub fn should_have_code(self) -> bool {
        !self.contains(MethodAccessFlags::NATIVE) && !self.contains(MethodAccessFlags::ABSTRACT)
    }
}
