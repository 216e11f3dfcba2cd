use std::borrow::Cow;

/// Convert modified utf8 (as stored in containers) into a displayable string.
/// Invalid sequences are replaced rather than failing, so this is only meant for diagnostics and
/// for producing string contents.
#[must_use]
pub fn convert_classfile_text(bytes: &[u8]) -> Cow<str> {
    match cesu8::from_java_cesu8(bytes) {
        Ok(text) => text,
        Err(_) => String::from_utf8_lossy(bytes),
    }
}

// We wrap this because the alternative hasher is not generic
// and Rust doesn't allow unused generics.
// But this allows us to have that.
pub trait HashWrapperTrait<T> {
    type HashMapHasher;
}
pub struct HashWrapper;
impl<T> HashWrapperTrait<T> for HashWrapper {
    #[cfg(feature = "implementation-cheaper-map-hashing")]
    type HashMapHasher = nohash_hasher::BuildNoHashHasher<T>;
    #[cfg(not(feature = "implementation-cheaper-map-hashing"))]
    type HashMapHasher = std::collections::hash_map::RandomState;
}

/// Hasher used for maps and sets keyed by ids
pub type IdHasher<T> = <HashWrapper as HashWrapperTrait<T>>::HashMapHasher;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_text() {
        assert_eq!(convert_classfile_text(b"hello"), "hello");
        // Modified utf8 encodes nul as two bytes
        assert_eq!(convert_classfile_text(&[0xC0, 0x80]), "\0");
    }
}
