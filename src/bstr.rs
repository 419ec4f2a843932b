use bstr::{BString, ByteSlice};
use std::cmp::Ordering;
use std::ops::{Deref, DerefMut};

/// Byte string container used for all protocol data. Wraps a growable
/// byte buffer and adds the case- and NUL-tolerant comparisons the
/// parser needs.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Bstr {
    s: BString,
}

impl Default for Bstr {
    fn default() -> Self {
        Self::new()
    }
}

impl Bstr {
    /// Make a new owned Bstr.
    pub fn new() -> Self {
        Bstr {
            s: BString::from(Vec::new()),
        }
    }

    /// Make a new owned Bstr with given capacity.
    pub fn with_capacity(len: usize) -> Self {
        Bstr {
            s: BString::from(Vec::with_capacity(len)),
        }
    }

    /// Compare this Bstr with the given slice.
    pub fn cmp_slice<B: AsRef<[u8]>>(&self, other: B) -> Ordering {
        self.as_slice().cmp(other.as_ref())
    }

    /// Return true if self is equal to other.
    pub fn eq_slice<B: AsRef<[u8]>>(&self, other: B) -> bool {
        self.cmp_slice(other) == Ordering::Equal
    }

    /// Compare bytes in a case-insensitive manner.
    pub fn cmp_nocase<B: AsRef<[u8]>>(&self, other: B) -> Ordering {
        let lefts = &self.as_slice();
        let rights = &other.as_ref();
        let left = LowercaseIterator::new(lefts);
        let right = LowercaseIterator::new(rights);
        left.cmp(right)
    }

    /// Case-insensitive comparison between self and other, ignoring any
    /// NUL bytes in self.
    pub fn cmp_nocase_nozero<B: AsRef<[u8]>>(&self, other: B) -> Ordering {
        let lefts = &self.as_slice();
        let rights = &other.as_ref();
        let left = LowercaseNoZeroIterator::new(lefts);
        let right = LowercaseIterator::new(rights);
        left.cmp(right)
    }

    /// Extend this Bstr with the given slice.
    pub fn add<B: AsRef<[u8]>>(&mut self, other: B) {
        self.extend_from_slice(other.as_ref())
    }

    /// Return true if this Bstr starts with other, ignoring case.
    pub fn starts_with_nocase<B: AsRef<[u8]>>(&self, other: B) -> bool {
        let other = other.as_ref();
        if self.len() < other.len() {
            return false;
        }
        self.as_slice()[..other.len()].eq_ignore_ascii_case(other)
    }

    /// Find the index of the given slice, ignoring case.
    pub fn index_of_nocase<B: AsRef<[u8]>>(&self, other: B) -> Option<usize> {
        let needle = other.as_ref().to_ascii_lowercase();
        self.as_slice().to_ascii_lowercase().find(needle)
    }

    /// Find the index of the given slice, ignoring case and NUL bytes in
    /// self.
    pub fn index_of_nocase_nozero<B: AsRef<[u8]>>(&self, other: B) -> Option<usize> {
        let needle = other.as_ref();
        if needle.is_empty() {
            return Some(0);
        }
        let haystack = self.as_slice();
        'outer: for start in 0..haystack.len() {
            if haystack[start] == 0 {
                continue;
            }
            let mut pos = start;
            for want in needle {
                // NUL bytes in the haystack do not participate in the match.
                while pos < haystack.len() && haystack[pos] == 0 {
                    pos += 1;
                }
                if pos >= haystack.len()
                    || !haystack[pos].eq_ignore_ascii_case(&want.to_ascii_lowercase())
                {
                    continue 'outer;
                }
                pos += 1;
            }
            return Some(start);
        }
        None
    }

    /// Return a borrowed view of the contained bytes.
    pub fn as_slice(&self) -> &[u8] {
        self.s.as_slice()
    }
}

impl From<&[u8]> for Bstr {
    fn from(src: &[u8]) -> Self {
        Bstr {
            s: BString::from(src),
        }
    }
}

impl From<&str> for Bstr {
    fn from(src: &str) -> Self {
        src.as_bytes().into()
    }
}

impl From<Vec<u8>> for Bstr {
    fn from(src: Vec<u8>) -> Self {
        Bstr {
            s: BString::from(src),
        }
    }
}

impl Deref for Bstr {
    type Target = BString;

    fn deref(&self) -> &Self::Target {
        &self.s
    }
}

impl DerefMut for Bstr {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.s
    }
}

impl PartialEq<&str> for Bstr {
    fn eq(&self, rhs: &&str) -> bool {
        self.as_slice() == rhs.as_bytes()
    }
}

impl PartialEq<[u8]> for Bstr {
    fn eq(&self, rhs: &[u8]) -> bool {
        self.as_slice() == rhs
    }
}

/// A comparison iterator that lowercases ascii on the fly.
struct LowercaseIterator<'a> {
    value: &'a [u8],
    pos: usize,
}

impl<'a> LowercaseIterator<'a> {
    fn new(value: &'a [u8]) -> Self {
        Self { value, pos: 0 }
    }
}

impl Iterator for LowercaseIterator<'_> {
    type Item = u8;
    fn next(&mut self) -> Option<u8> {
        let next = self.value.get(self.pos)?;
        self.pos += 1;
        Some(next.to_ascii_lowercase())
    }
}

/// As LowercaseIterator, but NUL bytes are skipped entirely.
struct LowercaseNoZeroIterator<'a> {
    value: &'a [u8],
    pos: usize,
}

impl<'a> LowercaseNoZeroIterator<'a> {
    fn new(value: &'a [u8]) -> Self {
        Self { value, pos: 0 }
    }
}

impl Iterator for LowercaseNoZeroIterator<'_> {
    type Item = u8;
    fn next(&mut self) -> Option<u8> {
        loop {
            let next = self.value.get(self.pos)?;
            self.pos += 1;
            if *next != 0 {
                return Some(next.to_ascii_lowercase());
            }
        }
    }
}

// Tests

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Ordering;

    #[test]
    fn compare_nocase() {
        let b = Bstr::from("Host");
        assert_eq!(b.cmp_nocase("host"), Ordering::Equal);
        assert_eq!(b.cmp_nocase("HOST"), Ordering::Equal);
        assert_ne!(b.cmp_nocase("hosts"), Ordering::Equal);
    }

    #[test]
    fn compare_nocase_nozero() {
        let b = Bstr::from(&b"Ho\x00st"[..]);
        assert_eq!(b.cmp_nocase_nozero("host"), Ordering::Equal);
        assert_ne!(b.cmp_nocase("host"), Ordering::Equal);
    }

    #[test]
    fn add_and_eq() {
        let mut b = Bstr::from("foo");
        b.add(", ");
        b.add("bar");
        assert_eq!(b, "foo, bar");
    }

    #[test]
    fn find_nocase_nozero() {
        let b = Bstr::from(&b"ch\x00unked"[..]);
        assert_eq!(b.index_of_nocase_nozero("chunked"), Some(0));
        assert_eq!(b.index_of_nocase_nozero("gzip"), None);
        let b = Bstr::from("xx CHUNKED");
        assert_eq!(b.index_of_nocase_nozero("chunked"), Some(3));
    }

    #[test]
    fn starts_nocase() {
        let b = Bstr::from("Basic dXNlcjpwYXNz");
        assert!(b.starts_with_nocase("basic"));
        assert!(!b.starts_with_nocase("digest"));
    }
}
