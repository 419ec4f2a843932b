use crate::bstr::Bstr;
use std::cmp::Ordering;
use std::iter::Iterator;
use std::ops::Index;

/// An ordered list of (key, value) pairs with case-insensitive lookup.
/// Insertion order is preserved; lookups scan from the front, so the
/// first-inserted of several same-named entries wins.
#[derive(Clone, Debug, Default)]
pub struct Table<T> {
    /// Entries in insertion order.
    pub elements: Vec<(Bstr, T)>,
}

impl<T> Index<usize> for Table<T> {
    type Output = (Bstr, T);
    fn index(&self, idx: usize) -> &(Bstr, T) {
        &self.elements[idx]
    }
}

impl<'a, T> IntoIterator for &'a Table<T> {
    type Item = &'a (Bstr, T);
    type IntoIter = std::slice::Iter<'a, (Bstr, T)>;

    fn into_iter(self) -> std::slice::Iter<'a, (Bstr, T)> {
        self.elements.iter()
    }
}

impl<'a, T> IntoIterator for &'a mut Table<T> {
    type Item = &'a mut (Bstr, T);
    type IntoIter = std::slice::IterMut<'a, (Bstr, T)>;

    fn into_iter(self) -> std::slice::IterMut<'a, (Bstr, T)> {
        self.elements.iter_mut()
    }
}

impl<T> IntoIterator for Table<T> {
    type Item = (Bstr, T);
    type IntoIter = std::vec::IntoIter<(Bstr, T)>;

    fn into_iter(self) -> std::vec::IntoIter<(Bstr, T)> {
        self.elements.into_iter()
    }
}

impl<T> Table<T> {
    /// Make a new table with the given capacity.
    pub fn with_capacity(size: usize) -> Self {
        Self {
            elements: Vec::with_capacity(size),
        }
    }

    /// Append a (key, value) pair.
    pub fn add(&mut self, key: Bstr, item: T) {
        self.elements.push((key, item));
    }

    /// Retrieve an element by its insertion index.
    pub fn get(&self, index: usize) -> Option<&(Bstr, T)> {
        self.elements.get(index)
    }

    /// Retrieve a mutable element by its insertion index.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut (Bstr, T)> {
        self.elements.get_mut(index)
    }

    /// Find the first entry whose key matches the given slice, ignoring
    /// ascii case.
    pub fn get_nocase<K: AsRef<[u8]>>(&self, key: K) -> Option<&(Bstr, T)> {
        self.elements
            .iter()
            .find(|x| x.0.cmp_nocase(key.as_ref()) == Ordering::Equal)
    }

    /// Find the first entry whose key matches the given slice, ignoring
    /// ascii case; mutable variant.
    pub fn get_nocase_mut<K: AsRef<[u8]>>(&mut self, key: K) -> Option<&mut (Bstr, T)> {
        self.elements
            .iter_mut()
            .find(|x| x.0.cmp_nocase(key.as_ref()) == Ordering::Equal)
    }

    /// Find the first entry whose key matches the given slice, ignoring
    /// ascii case and any NUL bytes in the stored key.
    pub fn get_nocase_nozero<K: AsRef<[u8]>>(&self, key: K) -> Option<&(Bstr, T)> {
        self.elements
            .iter()
            .find(|x| x.0.cmp_nocase_nozero(key.as_ref()) == Ordering::Equal)
    }

    /// As get_nocase_nozero, mutable variant.
    pub fn get_nocase_nozero_mut<K: AsRef<[u8]>>(&mut self, key: K) -> Option<&mut (Bstr, T)> {
        self.elements
            .iter_mut()
            .find(|x| x.0.cmp_nocase_nozero(key.as_ref()) == Ordering::Equal)
    }

    /// The number of entries in the table.
    pub fn size(&self) -> usize {
        self.elements.len()
    }

    /// True when the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

// Tests

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_size() {
        let mut t = Table::with_capacity(1);
        assert_eq!(0, t.size());
        t.add(Bstr::from("Key"), "Value1");
        t.add(Bstr::from("AnotherKey"), "Value2");
        assert_eq!(2, t.size());
        assert_eq!("Value2", t.get(1).unwrap().1);
    }

    #[test]
    fn lookup_nocase() {
        let mut t = Table::with_capacity(2);
        t.add(Bstr::from("Key1"), "Value1");
        t.add(Bstr::from("KeY2"), "Value2");

        assert_eq!("Value1", t.get_nocase("KEY1").unwrap().1);
        assert_eq!("Value2", t.get_nocase("key2").unwrap().1);
        assert!(t.get_nocase("NotAKey").is_none());
    }

    #[test]
    fn lookup_nocase_nozero() {
        let mut t = Table::with_capacity(1);
        t.add(Bstr::from(&b"K\x00ey1"[..]), "Value1");

        assert_eq!("Value1", t.get_nocase_nozero("key1").unwrap().1);
        assert!(t.get_nocase("key1").is_none());
    }

    #[test]
    fn first_match_wins() {
        let mut t = Table::with_capacity(2);
        t.add(Bstr::from("dup"), 1);
        t.add(Bstr::from("DUP"), 2);
        assert_eq!(1, t.get_nocase("dup").unwrap().1);
    }
}
