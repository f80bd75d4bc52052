use ethereum_types::{Address, U256};
use zktracer_common::{address_hi_lo, hi_lo};

use super::account::DomSubStamps;
use super::OccurrenceFlags;
use crate::metadata::FragmentId;

/// Why a storage fragment was produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StorageFragmentPurpose {
    PreWarming,
    Sload,
    Sstore,
    /// Undoing an `SSTORE` of a reverted context.
    SstoreUndo,
}

/// A storage slot read or update.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StorageFragment {
    pub id: FragmentId,
    pub purpose: StorageFragmentPurpose,
    pub address: Address,
    pub deployment_number: u32,
    pub key: U256,
    /// Value at the start of the transaction.
    pub value_original: U256,
    pub value_current: U256,
    pub value_next: U256,
    pub warm_before: bool,
    pub warm_after: bool,
    pub dom_sub: DomSubStamps,
    pub relative_block_number: u32,
    /// Smallest and largest deployment numbers the address has in the block,
    /// filled when the trace is committed.
    pub block_deployment_numbers: Option<(u32, u32)>,
}

impl StorageFragment {
    /// The fragment undoing this update.
    pub fn undo(&self, id: FragmentId, dom_sub: DomSubStamps) -> Self {
        Self {
            id,
            purpose: StorageFragmentPurpose::SstoreUndo,
            value_current: self.value_next,
            value_next: self.value_current,
            warm_before: self.warm_after,
            warm_after: self.warm_before,
            dom_sub,
            ..self.clone()
        }
    }

    pub const COLUMNS: &'static [&'static str] = &[
        "STO_ADDRESS_HI",
        "STO_ADDRESS_LO",
        "STO_DEPLOYMENT_NUMBER",
        "STO_KEY_HI",
        "STO_KEY_LO",
        "STO_VALUE_ORIG_HI",
        "STO_VALUE_ORIG_LO",
        "STO_VALUE_CURR_HI",
        "STO_VALUE_CURR_LO",
        "STO_VALUE_NEXT_HI",
        "STO_VALUE_NEXT_LO",
        "STO_WARMTH",
        "STO_WARMTH_NEW",
        "STO_VALUE_ORIG_IS_ZERO",
        "STO_VALUE_CURR_IS_ORIG",
        "STO_VALUE_CURR_IS_ZERO",
        "STO_VALUE_NEXT_IS_CURR",
        "STO_VALUE_NEXT_IS_ZERO",
        "STO_VALUE_NEXT_IS_ORIG",
        "STO_SLOAD_FLAG",
        "STO_SSTORE_FLAG",
        "STO_DEPLOYMENT_NUMBER_INFTY",
        "STO_DEPLOYMENT_NUMBER_FIRST_IN_BLOCK",
        "STO_DEPLOYMENT_NUMBER_FINAL_IN_BLOCK",
        "STO_DOM_STAMP",
        "STO_SUB_STAMP",
        "STO_FIRST_IN_TXN",
        "STO_FIRST_IN_BLK",
        "STO_FIRST_IN_CNF",
        "STO_FINAL_IN_TXN",
        "STO_FINAL_IN_BLK",
        "STO_FINAL_IN_CNF",
    ];

    pub fn values(&self, flags: OccurrenceFlags) -> Vec<U256> {
        let (address_hi, address_lo) = address_hi_lo(self.address);
        let bit = |b: bool| U256::from(b as u8);
        let (first_in_block, final_in_block) = self
            .block_deployment_numbers
            .unwrap_or((self.deployment_number, self.deployment_number));
        let mut values = vec![
            U256::from(address_hi),
            U256::from(address_lo),
            U256::from(self.deployment_number),
        ];
        for word in [
            self.key,
            self.value_original,
            self.value_current,
            self.value_next,
        ] {
            let (hi, lo) = hi_lo(word);
            values.extend([U256::from(hi), U256::from(lo)]);
        }
        values.extend([
            bit(self.warm_before),
            bit(self.warm_after),
            bit(self.value_original.is_zero()),
            bit(self.value_current == self.value_original),
            bit(self.value_current.is_zero()),
            bit(self.value_next == self.value_current),
            bit(self.value_next.is_zero()),
            bit(self.value_next == self.value_original),
            bit(self.purpose == StorageFragmentPurpose::Sload),
            bit(matches!(
                self.purpose,
                StorageFragmentPurpose::Sstore | StorageFragmentPurpose::SstoreUndo
            )),
            U256::from(final_in_block),
            U256::from(first_in_block),
            U256::from(final_in_block),
            U256::from(self.dom_sub.dom),
            U256::from(self.dom_sub.sub),
        ]);
        values.extend(flags.values());
        values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undoing_swaps_values_and_warmth() {
        let fragment = StorageFragment {
            id: 3,
            purpose: StorageFragmentPurpose::Sstore,
            address: Address::repeat_byte(1),
            deployment_number: 1,
            key: U256::one(),
            value_original: U256::from(8),
            value_current: U256::from(8),
            value_next: U256::from(10),
            warm_before: false,
            warm_after: true,
            dom_sub: DomSubStamps::standard(5, 0),
            relative_block_number: 1,
            block_deployment_numbers: None,
        };
        let undo = fragment.undo(4, DomSubStamps::revert(5, 9, 0));
        assert_eq!(undo.value_current, U256::from(10));
        assert_eq!(undo.value_next, U256::from(8));
        assert!(undo.warm_before);
        assert!(!undo.warm_after);
        assert_eq!(undo.value_original, U256::from(8));
        assert_eq!(undo.purpose, StorageFragmentPurpose::SstoreUndo);
    }
}
