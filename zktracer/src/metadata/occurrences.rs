use std::hash::Hash;

use ethereum_types::{Address, U256};
use hashbrown::HashMap;

use crate::fragment::{AccountFragment, AccountSnapshot, OccurrenceFlags, StorageFragment};

/// Conflation-wide sequence number of an account or storage fragment.
pub type FragmentId = u64;

/// A value together with the fragment it was read from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Occurrence<V> {
    pub id: FragmentId,
    pub value: V,
}

/// The values of a fragment before and after the update it records.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateTransition<S> {
    pub before: S,
    pub after: S,
}

/// The first and the last occurrence of some key, ordered by fragment id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FirstAndLast<V> {
    pub first: Occurrence<V>,
    pub last: Occurrence<V>,
}

impl<V: Clone> FirstAndLast<V> {
    pub fn new(id: FragmentId, value: V) -> Self {
        Self {
            first: Occurrence {
                id,
                value: value.clone(),
            },
            last: Occurrence { id, value },
        }
    }

    pub fn update(&mut self, id: FragmentId, value: V) {
        if id < self.first.id {
            self.first = Occurrence {
                id,
                value: value.clone(),
            };
        }
        if id > self.last.id {
            self.last = Occurrence { id, value };
        }
    }

    pub fn merge(&mut self, other: &Self) {
        self.update(other.first.id, other.first.value.clone());
        self.update(other.last.id, other.last.value.clone());
    }

    pub fn is_first(&self, id: FragmentId) -> bool {
        self.first.id == id
    }

    pub fn is_last(&self, id: FragmentId) -> bool {
        self.last.id == id
    }
}

pub type AccountOccurrence = FirstAndLast<StateTransition<AccountSnapshot>>;
pub type StorageOccurrence = FirstAndLast<StateTransition<U256>>;

fn record<K: Eq + Hash, V: Clone>(
    map: &mut HashMap<K, FirstAndLast<V>>,
    key: K,
    id: FragmentId,
    value: V,
) {
    map.entry(key)
        .and_modify(|fl| fl.update(id, value.clone()))
        .or_insert_with(|| FirstAndLast::new(id, value));
}

fn fold_into<K: Eq + Hash + Clone, V: Clone>(
    target: &mut HashMap<K, FirstAndLast<V>>,
    key: K,
    occurrence: &FirstAndLast<V>,
) {
    target
        .entry(key)
        .and_modify(|fl| fl.merge(occurrence))
        .or_insert_with(|| occurrence.clone());
}

/// First and last occurrences within one transaction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransactionOccurrences {
    pub accounts: HashMap<Address, AccountOccurrence>,
    pub storage: HashMap<(Address, U256), StorageOccurrence>,
    /// Accounts by deployment number, after the update.
    pub account_deployments: HashMap<(Address, u32), AccountOccurrence>,
    pub storage_deployments: HashMap<(Address, U256, u32), StorageOccurrence>,
}

impl TransactionOccurrences {
    pub fn record_account(&mut self, fragment: &AccountFragment) {
        let transition = StateTransition {
            before: fragment.before.clone(),
            after: fragment.after.clone(),
        };
        let address = fragment.address();
        record(
            &mut self.account_deployments,
            (address, fragment.after.deployment_number),
            fragment.id,
            transition.clone(),
        );
        record(&mut self.accounts, address, fragment.id, transition);
    }

    pub fn record_storage(&mut self, fragment: &StorageFragment) {
        let transition = StateTransition {
            before: fragment.value_current,
            after: fragment.value_next,
        };
        record(
            &mut self.storage_deployments,
            (fragment.address, fragment.key, fragment.deployment_number),
            fragment.id,
            transition.clone(),
        );
        record(
            &mut self.storage,
            (fragment.address, fragment.key),
            fragment.id,
            transition,
        );
    }

    pub fn account(&self, address: &Address) -> Option<&AccountOccurrence> {
        self.accounts.get(address)
    }

    pub fn storage(&self, address: &Address, key: &U256) -> Option<&StorageOccurrence> {
        self.storage.get(&(*address, *key))
    }
}

/// Block and conflation scoped occurrences, folded from the transactions
/// in order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Occurrences {
    block_accounts: HashMap<(Address, u32), AccountOccurrence>,
    block_storage: HashMap<(Address, U256, u32), StorageOccurrence>,
    conflation_accounts: HashMap<Address, AccountOccurrence>,
    conflation_storage: HashMap<(Address, U256), StorageOccurrence>,
    account_deployments: HashMap<(Address, u32), AccountOccurrence>,
    storage_deployments: HashMap<(Address, U256, u32), StorageOccurrence>,
}

impl Occurrences {
    /// Folds the occurrences of every transaction, each tagged with its
    /// relative block number.
    pub fn fold<'a>(transactions: impl IntoIterator<Item = (u32, &'a TransactionOccurrences)>) -> Self {
        let mut occurrences = Self::default();
        for (block, tx) in transactions {
            for (address, fl) in &tx.accounts {
                fold_into(&mut occurrences.block_accounts, (*address, block), fl);
                fold_into(&mut occurrences.conflation_accounts, *address, fl);
            }
            for ((address, key), fl) in &tx.storage {
                fold_into(&mut occurrences.block_storage, (*address, *key, block), fl);
                fold_into(&mut occurrences.conflation_storage, (*address, *key), fl);
            }
            for (key, fl) in &tx.account_deployments {
                fold_into(&mut occurrences.account_deployments, *key, fl);
            }
            for (key, fl) in &tx.storage_deployments {
                fold_into(&mut occurrences.storage_deployments, *key, fl);
            }
        }
        occurrences
    }

    pub fn account_in_block(&self, address: &Address, block: u32) -> Option<&AccountOccurrence> {
        self.block_accounts.get(&(*address, block))
    }

    pub fn storage_in_block(
        &self,
        address: &Address,
        key: &U256,
        block: u32,
    ) -> Option<&StorageOccurrence> {
        self.block_storage.get(&(*address, *key, block))
    }

    pub fn account_in_conflation(&self, address: &Address) -> Option<&AccountOccurrence> {
        self.conflation_accounts.get(address)
    }

    pub fn storage_in_conflation(&self, address: &Address, key: &U256) -> Option<&StorageOccurrence> {
        self.conflation_storage.get(&(*address, *key))
    }

    pub fn account_in_deployment(
        &self,
        address: &Address,
        deployment_number: u32,
    ) -> Option<&AccountOccurrence> {
        self.account_deployments.get(&(*address, deployment_number))
    }

    pub fn storage_in_deployment(
        &self,
        address: &Address,
        key: &U256,
        deployment_number: u32,
    ) -> Option<&StorageOccurrence> {
        self.storage_deployments
            .get(&(*address, *key, deployment_number))
    }

    /// Deployment numbers of `address` at its first and final occurrence in
    /// `block`.
    pub fn deployment_number_range(&self, address: &Address, block: u32) -> Option<(u32, u32)> {
        self.account_in_block(address, block).map(|fl| {
            (
                fl.first.value.before.deployment_number,
                fl.last.value.after.deployment_number,
            )
        })
    }

    pub fn account_flags(
        &self,
        tx: &TransactionOccurrences,
        fragment: &AccountFragment,
    ) -> OccurrenceFlags {
        let address = fragment.address();
        let id = fragment.id;
        let txn = tx.account(&address);
        let blk = self.account_in_block(&address, fragment.relative_block_number);
        let cnf = self.account_in_conflation(&address);
        OccurrenceFlags {
            first_in_txn: txn.is_some_and(|fl| fl.is_first(id)),
            first_in_blk: blk.is_some_and(|fl| fl.is_first(id)),
            first_in_cnf: cnf.is_some_and(|fl| fl.is_first(id)),
            final_in_txn: txn.is_some_and(|fl| fl.is_last(id)),
            final_in_blk: blk.is_some_and(|fl| fl.is_last(id)),
            final_in_cnf: cnf.is_some_and(|fl| fl.is_last(id)),
        }
    }

    pub fn storage_flags(
        &self,
        tx: &TransactionOccurrences,
        fragment: &StorageFragment,
    ) -> OccurrenceFlags {
        let (address, key, id) = (fragment.address, fragment.key, fragment.id);
        let txn = tx.storage(&address, &key);
        let blk = self.storage_in_block(&address, &key, fragment.relative_block_number);
        let cnf = self.storage_in_conflation(&address, &key);
        OccurrenceFlags {
            first_in_txn: txn.is_some_and(|fl| fl.is_first(id)),
            first_in_blk: blk.is_some_and(|fl| fl.is_first(id)),
            first_in_cnf: cnf.is_some_and(|fl| fl.is_first(id)),
            final_in_txn: txn.is_some_and(|fl| fl.is_last(id)),
            final_in_blk: blk.is_some_and(|fl| fl.is_last(id)),
            final_in_cnf: cnf.is_some_and(|fl| fl.is_last(id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::{DomSubStamps, StorageFragmentPurpose};

    fn sstore(id: FragmentId, block: u32, current: u64, next: u64) -> StorageFragment {
        StorageFragment {
            id,
            purpose: StorageFragmentPurpose::Sstore,
            address: Address::repeat_byte(0xaa),
            deployment_number: 0,
            key: U256::from(123),
            value_original: U256::from(current),
            value_current: U256::from(current),
            value_next: U256::from(next),
            warm_before: true,
            warm_after: true,
            dom_sub: DomSubStamps::standard(id as u32, 0),
            relative_block_number: block,
            block_deployment_numbers: None,
        }
    }

    #[test]
    fn first_and_last_follow_ids_not_insertion_order() {
        let mut fl = FirstAndLast::new(5, "b");
        fl.update(9, "c");
        fl.update(2, "a");
        fl.update(7, "x");
        assert_eq!(fl.first.value, "a");
        assert_eq!(fl.last.value, "c");
        assert!(fl.is_first(2));
        assert!(!fl.is_last(7));
    }

    #[test]
    fn storage_writes_fold_across_transactions() {
        let fragments = [sstore(1, 1, 0, 8), sstore(2, 1, 8, 10), sstore(3, 2, 10, 15)];
        let mut first_tx = TransactionOccurrences::default();
        first_tx.record_storage(&fragments[0]);
        first_tx.record_storage(&fragments[1]);
        let mut second_tx = TransactionOccurrences::default();
        second_tx.record_storage(&fragments[2]);

        let occurrences = Occurrences::fold([(1, &first_tx), (2, &second_tx)]);
        let address = Address::repeat_byte(0xaa);
        let key = U256::from(123);
        let cnf = occurrences.storage_in_conflation(&address, &key).unwrap();
        assert_eq!(cnf.first.value.before, U256::zero());
        assert_eq!(cnf.first.value.after, U256::from(8));
        assert_eq!(cnf.last.value.after, U256::from(15));

        let flags: Vec<_> = fragments
            .iter()
            .zip([&first_tx, &first_tx, &second_tx])
            .map(|(f, tx)| occurrences.storage_flags(tx, f))
            .collect();
        assert_eq!(flags.iter().filter(|f| f.first_in_cnf).count(), 1);
        assert_eq!(flags.iter().filter(|f| f.final_in_cnf).count(), 1);
        assert!(flags[1].final_in_txn && flags[1].final_in_blk && !flags[1].final_in_cnf);
        assert!(flags[2].first_in_blk && flags[2].first_in_txn);
    }
}
