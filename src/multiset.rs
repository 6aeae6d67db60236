use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::iter::FusedIterator;
use std::ptr;
use std::vec;

use log::{debug, trace};
use parking_lot::RwLock;

/// Occurrence table behind the lock. Every method assumes the caller already
/// holds the multiset's lock in the right mode.
struct Counts<T> {
    map: HashMap<T, isize>,
}

impl<T> Counts<T> {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            map: HashMap::with_capacity(capacity),
        }
    }

    fn size(&self) -> isize {
        self.map
            .values()
            .fold(0isize, |total, &count| total.saturating_add(count))
    }
}

impl<T: Eq + Hash> Counts<T> {
    fn count<Q>(&self, elem: &Q) -> isize
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.get(elem).copied().unwrap_or(0)
    }

    fn contains<'a, Q, I>(&self, elems: I) -> bool
    where
        I: IntoIterator<Item = &'a Q>,
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized + 'a,
    {
        elems.into_iter().all(|elem| self.count(elem) > 0)
    }

    fn add_count(&mut self, elem: T, c: isize) -> isize {
        let before = self.count(&elem);
        if c <= 0 {
            return before;
        }

        // saturate so a stored count can never wrap to zero or below
        let slot = self.map.entry(elem).or_insert(0);
        *slot = slot.saturating_add(c);
        before
    }

    fn remove_count<Q>(&mut self, elem: &Q, c: isize) -> isize
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let before = self.count(elem);
        if c <= 0 || before == 0 {
            return before;
        }

        if before <= c {
            self.map.remove(elem);
        } else if let Some(slot) = self.map.get_mut(elem) {
            *slot -= c;
        }
        before
    }

    fn equals(&self, other: &Counts<T>) -> bool {
        self.map.len() == other.map.len()
            && self
                .map
                .iter()
                .all(|(elem, &count)| other.count(elem) == count)
    }
}

/// A thread-safe multiset (bag).
///
/// Each distinct element maps to a strictly positive occurrence count; an
/// element that is not stored has an implicit count of zero. All operations
/// take `&self` and synchronize on a single reader/writer lock, so a
/// `Multiset` can be shared between threads through an `Arc` or a scoped
/// borrow.
///
/// Accessors never hand out the internal mapping. [`to_vec`](Self::to_vec),
/// [`distinct_elements`](Self::distinct_elements) and [`iter`](Self::iter)
/// all work on copies taken under the shared lock.
///
/// ```
/// use multiset::Multiset;
///
/// let bag = Multiset::from_elements(["a", "a", "b"]);
/// assert_eq!(bag.count(&"a"), 2);
/// assert_eq!(bag.size(), 3);
///
/// bag.remove_count(&"a", 5);
/// assert!(!bag.contains(&["a"]));
/// assert_eq!(bag.to_string(), "[b]");
/// ```
pub struct Multiset<T> {
    counts: RwLock<Counts<T>>,
}

impl<T> Multiset<T> {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Creates an empty multiset with room for `capacity` distinct elements.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            counts: RwLock::new(Counts::with_capacity(capacity)),
        }
    }

    /// Total number of occurrences, not the number of distinct elements.
    /// Saturates at `isize::MAX` when the real total is larger.
    pub fn size(&self) -> isize {
        self.counts.read().size()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.read().map.is_empty()
    }

    /// Number of distinct elements with a positive count.
    pub fn distinct_len(&self) -> usize {
        self.counts.read().map.len()
    }

    /// Discards every element. The old mapping is replaced by a fresh one and
    /// dropped after the lock is released.
    pub fn clear(&self) {
        let old = std::mem::replace(&mut *self.counts.write(), Counts::with_capacity(0));
        if !old.map.is_empty() {
            debug!("cleared multiset holding {} distinct elements", old.map.len());
        }
    }
}

impl<T: Eq + Hash> Multiset<T> {
    /// Creates a multiset holding one occurrence per element of `elems`, in
    /// sequence order.
    pub fn from_elements<I: IntoIterator<Item = T>>(elems: I) -> Self {
        let elems = elems.into_iter();
        let mut counts = Counts::with_capacity(elems.size_hint().0);
        for elem in elems {
            counts.add_count(elem, 1);
        }
        Self {
            counts: RwLock::new(counts),
        }
    }

    /// Adds a single occurrence of each element. Repeated elements add
    /// repeated occurrences.
    pub fn add<I: IntoIterator<Item = T>>(&self, elems: I) {
        let mut counts = self.counts.write();
        let mut added = 0usize;
        for elem in elems {
            counts.add_count(elem, 1);
            added += 1;
        }
        trace!("added {} occurrences", added);
    }

    /// Adds `c` occurrences of `elem` and returns the count before the call.
    /// A zero or negative `c` changes nothing.
    pub fn add_count(&self, elem: T, c: isize) -> isize {
        let before = self.counts.write().add_count(elem, c);
        trace!("add_count: {} + {}", before, c.max(0));
        before
    }

    /// Returns true if every listed element has at least one occurrence.
    /// An empty list is trivially contained.
    pub fn contains<'a, Q, I>(&self, elems: I) -> bool
    where
        I: IntoIterator<Item = &'a Q>,
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized + 'a,
    {
        self.counts.read().contains(elems)
    }

    pub fn count<Q>(&self, elem: &Q) -> isize
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.counts.read().count(elem)
    }

    /// Summed occurrences of all listed elements, taken under one lock.
    pub fn count_all<'a, Q, I>(&self, elems: I) -> isize
    where
        I: IntoIterator<Item = &'a Q>,
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized + 'a,
    {
        let counts = self.counts.read();
        elems
            .into_iter()
            .fold(0isize, |total, elem| total.saturating_add(counts.count(elem)))
    }

    /// Removes one occurrence of each listed element that is present.
    ///
    /// Returns true only if some listed element had more than one occurrence
    /// before its removal. Taking away the last occurrence of an element
    /// empties its slot but does not by itself make this return true.
    pub fn remove<'a, Q, I>(&self, elems: I) -> bool
    where
        I: IntoIterator<Item = &'a Q>,
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized + 'a,
    {
        let mut counts = self.counts.write();
        let mut changed = false;
        for elem in elems {
            if counts.remove_count(elem, 1) > 1 {
                changed = true;
            }
        }
        trace!("remove: changed = {}", changed);
        changed
    }

    /// Removes `c` occurrences of `elem` and returns the count before the
    /// call. The entry disappears once its count reaches zero. A zero or
    /// negative `c`, or an absent element, changes nothing.
    pub fn remove_count<Q>(&self, elem: &Q, c: isize) -> isize
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let before = self.counts.write().remove_count(elem, c);
        trace!("remove_count: {} - {}", before, c.max(0).min(before));
        before
    }

    /// Compares distinct elements and their counts.
    ///
    /// Both read locks are taken in address order, so `a.equals(&b)` racing
    /// `b.equals(&a)` on another thread cannot deadlock.
    pub fn equals(&self, other: &Multiset<T>) -> bool {
        if ptr::eq(self, other) {
            return true;
        }

        let (first, second) = if (self as *const Self) < (other as *const Self) {
            (self, other)
        } else {
            (other, self)
        };
        let first = first.counts.read();
        let second = second.counts.read();
        first.equals(&second)
    }

    /// Consumes the multiset and returns its element to count mapping.
    pub fn into_counts(self) -> HashMap<T, isize> {
        self.counts.into_inner().map
    }
}

impl<T: Eq + Hash + Clone> Multiset<T> {
    /// Lazily yields every occurrence of every element, in no particular
    /// order. The counts are copied under the shared lock; the iterator
    /// itself holds no lock.
    pub fn iter(&self) -> Iter<T> {
        let counts = self.counts.read();
        let total = counts
            .map
            .values()
            .try_fold(0usize, |total, &count| total.checked_add(count as usize));
        let entries: Vec<(T, isize)> = counts
            .map
            .iter()
            .map(|(elem, &count)| (elem.clone(), count))
            .collect();
        Iter {
            entries: entries.into_iter(),
            current: None,
            remaining: total.unwrap_or(usize::MAX),
            exact: total.is_some(),
        }
    }

    pub fn distinct_elements(&self) -> Vec<T> {
        self.counts.read().map.keys().cloned().collect()
    }

    pub fn to_vec(&self) -> Vec<T> {
        let counts = self.counts.read();
        let mut elems = Vec::with_capacity(counts.size() as usize);
        for (elem, &count) in &counts.map {
            for _ in 0..count {
                elems.push(elem.clone());
            }
        }
        elems
    }
}

/// Iterator returned by [`Multiset::iter`].
pub struct Iter<T> {
    entries: vec::IntoIter<(T, isize)>,
    current: Option<(T, isize)>,
    // lower bound only when the total did not fit in a usize
    remaining: usize,
    exact: bool,
}

impl<T: Clone> Iterator for Iter<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        loop {
            match &mut self.current {
                Some((elem, left)) if *left > 1 => {
                    *left -= 1;
                    self.remaining = self.remaining.saturating_sub(1);
                    return Some(elem.clone());
                }
                // last occurrence, hand out the element itself
                Some(_) => {
                    let (elem, _) = self.current.take()?;
                    self.remaining = self.remaining.saturating_sub(1);
                    return Some(elem);
                }
                None => self.current = Some(self.entries.next()?),
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, self.exact.then_some(self.remaining))
    }
}

impl<T: Clone> FusedIterator for Iter<T> {}

impl<'a, T: Eq + Hash + Clone> IntoIterator for &'a Multiset<T> {
    type Item = T;
    type IntoIter = Iter<T>;

    fn into_iter(self) -> Iter<T> {
        self.iter()
    }
}

impl<T> Default for Multiset<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Eq + Hash> FromIterator<T> for Multiset<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::from_elements(iter)
    }
}

impl<T: Eq + Hash> Extend<T> for Multiset<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        // exclusive borrow, no locking needed
        let counts = self.counts.get_mut();
        for elem in iter {
            counts.add_count(elem, 1);
        }
    }
}

impl<T: Clone> Clone for Multiset<T> {
    fn clone(&self) -> Self {
        let map = self.counts.read().map.clone();
        Self {
            counts: RwLock::new(Counts { map }),
        }
    }
}

impl<T: Eq + Hash> PartialEq for Multiset<T> {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other)
    }
}

impl<T: Eq + Hash> Eq for Multiset<T> {}

impl<T: fmt::Debug> fmt::Debug for Multiset<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts = self.counts.read();
        f.debug_struct("Multiset")
            .field("elements", &counts.map)
            .finish()
    }
}

/// Renders every occurrence as `[a, a, b]`; an empty multiset renders as `[]`.
impl<T: fmt::Display> fmt::Display for Multiset<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts = self.counts.read();
        f.write_str("[")?;
        let mut first = true;
        for (elem, &count) in &counts.map {
            for _ in 0..count {
                if !first {
                    f.write_str(", ")?;
                }
                first = false;
                write!(f, "{}", elem)?;
            }
        }
        f.write_str("]")
    }
}
