use std::fmt::Debug;
use std::hash::Hash;

use hashbrown::HashSet;

/// Per-transaction storage of module operations.
pub trait OperationContainer<T>: Default {
    fn enter_transaction(&mut self);

    fn pop_transaction(&mut self);

    /// Records `op`. Returns whether it was actually added.
    fn add(&mut self, op: T) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Operations in insertion order.
    fn iter<'a>(&'a self) -> impl Iterator<Item = &'a T>
    where
        T: 'a;
}

/// Operations of a module, grouped by transaction and deduplicated across
/// the whole conflation.
///
/// Grouping by transaction lets the most recent transaction be popped again,
/// e.g. when it turns out not to fit in the remaining capacity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StackedSet<T: Clone + Eq + Hash> {
    transactions: Vec<Vec<T>>,
    seen: HashSet<T>,
}

impl<T: Clone + Eq + Hash> Default for StackedSet<T> {
    fn default() -> Self {
        Self {
            transactions: vec![vec![]],
            seen: HashSet::new(),
        }
    }
}

impl<T: Clone + Eq + Hash + Debug> StackedSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter_transaction(&mut self) {
        self.transactions.push(vec![]);
    }

    /// Drops every operation added since the last
    /// [`StackedSet::enter_transaction`].
    pub fn pop_transaction(&mut self) {
        if let Some(popped) = self.transactions.pop() {
            for op in popped {
                self.seen.remove(&op);
            }
        }
        if self.transactions.is_empty() {
            self.transactions.push(vec![]);
        }
    }

    /// Adds `op` unless an identical operation is already present. Returns
    /// whether it was added.
    pub fn add(&mut self, op: T) -> bool {
        if !self.seen.insert(op.clone()) {
            return false;
        }
        if let Some(current) = self.transactions.last_mut() {
            current.push(op);
        }
        true
    }

    pub fn contains(&self, op: &T) -> bool {
        self.seen.contains(op)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Operations in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.transactions.iter().flatten()
    }
}

impl<T: Clone + Eq + Hash + Debug> OperationContainer<T> for StackedSet<T> {
    fn enter_transaction(&mut self) {
        StackedSet::enter_transaction(self);
    }

    fn pop_transaction(&mut self) {
        StackedSet::pop_transaction(self);
    }

    fn add(&mut self, op: T) -> bool {
        StackedSet::add(self, op)
    }

    fn len(&self) -> usize {
        StackedSet::len(self)
    }

    fn iter<'a>(&'a self) -> impl Iterator<Item = &'a T>
    where
        T: 'a,
    {
        StackedSet::iter(self)
    }
}

/// Like [`StackedSet`], but keeping duplicates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StackedList<T> {
    transactions: Vec<Vec<T>>,
}

impl<T> Default for StackedList<T> {
    fn default() -> Self {
        Self {
            transactions: vec![vec![]],
        }
    }
}

impl<T> OperationContainer<T> for StackedList<T> {
    fn enter_transaction(&mut self) {
        self.transactions.push(vec![]);
    }

    fn pop_transaction(&mut self) {
        self.transactions.pop();
        if self.transactions.is_empty() {
            self.transactions.push(vec![]);
        }
    }

    fn add(&mut self, op: T) -> bool {
        if let Some(current) = self.transactions.last_mut() {
            current.push(op);
        }
        true
    }

    fn len(&self) -> usize {
        self.transactions.iter().map(Vec::len).sum()
    }

    fn iter<'a>(&'a self) -> impl Iterator<Item = &'a T>
    where
        T: 'a,
    {
        self.transactions.iter().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicates_are_dropped_across_transactions() {
        let mut set = StackedSet::new();
        set.enter_transaction();
        assert!(set.add(1));
        assert!(!set.add(1));
        set.enter_transaction();
        assert!(!set.add(1));
        assert!(set.add(2));
        assert_eq!(set.iter().copied().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn popping_forgets_the_transaction() {
        let mut set = StackedSet::new();
        set.enter_transaction();
        set.add(1);
        set.enter_transaction();
        set.add(2);
        set.pop_transaction();
        assert_eq!(set.len(), 1);
        assert!(!set.contains(&2));
        // The popped operation can be added again.
        assert!(set.add(2));
    }

    #[test]
    fn lists_keep_duplicates() {
        let mut list = StackedList::default();
        list.enter_transaction();
        list.add(1);
        list.add(1);
        list.enter_transaction();
        list.add(3);
        assert_eq!(list.len(), 3);
        list.pop_transaction();
        assert_eq!(list.iter().copied().collect::<Vec<_>>(), vec![1, 1]);
    }
}
