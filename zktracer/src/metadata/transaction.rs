use ethereum_types::{Address, U256};
use hashbrown::HashMap;
use zktracer_common::gas::*;

use super::TransactionOccurrences;
use crate::host::{BlockHeader, Transaction, WorldView};
use crate::section::SectionRef;
use crate::util::create_address;

/// Gas charged before any execution: the base cost, the deployment cost
/// with its init code words, the call data bytes and the access list.
pub fn intrinsic_gas(tx: &Transaction) -> u64 {
    let mut gas = G_TRANSACTION;
    if tx.is_deployment() {
        gas += G_TX_CREATE + G_INIT_CODE_WORD * (tx.data.len() as u64).div_ceil(32);
    }
    gas += tx
        .data
        .iter()
        .map(|&b| {
            if b == 0 {
                G_TX_DATA_ZERO
            } else {
                G_TX_DATA_NON_ZERO
            }
        })
        .sum::<u64>();
    for entry in &tx.access_list {
        gas += G_ACCESS_LIST_ADDRESS + G_ACCESS_LIST_STORAGE * entry.storage_keys.len() as u64;
    }
    gas
}

/// Everything the tracer knows about one transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionProcessingMetadata {
    /// 1-based index of the transaction in the conflation.
    pub absolute_transaction_number: u32,
    /// 1-based index of the transaction in its block.
    pub relative_transaction_number: u32,
    pub relative_block_number: u32,
    pub transaction: Transaction,
    pub sender: Address,
    /// The `to` address, or the address of the deployed contract.
    pub effective_recipient: Address,
    pub is_deployment: bool,
    pub effective_gas_price: U256,
    pub base_fee: U256,
    pub coinbase: Address,
    pub intrinsic_gas: u64,
    pub initially_available_gas: u64,
    pub requires_evm_execution: bool,
    pub requires_prewarming: bool,
    pub copy_transaction_call_data: bool,
    /// Context number of the pseudo-context holding the call data, or 0.
    pub call_data_context_number: u32,
    pub leftover_gas: u64,
    pub refund_counter: u64,
    pub refund_effective: u64,
    pub gas_used: u64,
    pub status: bool,
    pub hub_stamp_start: u32,
    pub hub_stamp_end: u32,
    /// Storage values at the start of the transaction, for every slot it
    /// touched.
    pub original_storage: HashMap<(Address, U256), U256>,
    pub occurrences: TransactionOccurrences,
    /// Accounts marked for deletion, with the section that marked them.
    pub self_destructs: Vec<(Address, SectionRef)>,
}

impl TransactionProcessingMetadata {
    pub fn new(
        world: &dyn WorldView,
        tx: &Transaction,
        header: &BlockHeader,
        absolute_transaction_number: u32,
        relative_transaction_number: u32,
        relative_block_number: u32,
        prewarming: bool,
    ) -> Self {
        let is_deployment = tx.is_deployment();
        let effective_recipient = tx
            .to
            .unwrap_or_else(|| create_address(tx.sender, tx.nonce));
        let requires_evm_execution = if is_deployment {
            !tx.data.is_empty()
        } else {
            world.account_or_default(&effective_recipient).has_code()
        };
        let intrinsic_gas = intrinsic_gas(tx);
        Self {
            absolute_transaction_number,
            relative_transaction_number,
            relative_block_number,
            transaction: tx.clone(),
            sender: tx.sender,
            effective_recipient,
            is_deployment,
            effective_gas_price: tx.effective_gas_price(header.base_fee),
            base_fee: header.base_fee,
            coinbase: header.coinbase,
            intrinsic_gas,
            initially_available_gas: tx.gas_limit.saturating_sub(intrinsic_gas),
            requires_evm_execution,
            requires_prewarming: prewarming
                && requires_evm_execution
                && !tx.access_list.is_empty(),
            copy_transaction_call_data: requires_evm_execution
                && !is_deployment
                && !tx.data.is_empty(),
            call_data_context_number: 0,
            leftover_gas: 0,
            refund_counter: 0,
            refund_effective: 0,
            gas_used: 0,
            status: false,
            hub_stamp_start: 0,
            hub_stamp_end: 0,
            original_storage: HashMap::new(),
            occurrences: TransactionOccurrences::default(),
            self_destructs: Vec::new(),
        }
    }

    /// Gas consumed before refunds.
    pub fn gas_consumed(&self) -> u64 {
        self.transaction.gas_limit.saturating_sub(self.leftover_gas)
    }

    /// Value of a storage slot at the start of the transaction, caching it
    /// on first access.
    pub fn original_storage_value(
        &mut self,
        world: &dyn WorldView,
        address: Address,
        key: U256,
    ) -> U256 {
        *self
            .original_storage
            .entry((address, key))
            .or_insert_with(|| world.storage(&address, &key))
    }

    pub fn is_marked_for_self_destruct(&self, address: &Address) -> bool {
        self.self_destructs.iter().any(|(a, _)| a == address)
    }
}

/// The metadata of every transaction of the conflation, in order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransactionStack {
    transactions: Vec<TransactionProcessingMetadata>,
}

impl TransactionStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter_transaction(&mut self, metadata: TransactionProcessingMetadata) {
        self.transactions.push(metadata);
    }

    pub fn pop_transaction(&mut self) -> Option<TransactionProcessingMetadata> {
        self.transactions.pop()
    }

    pub fn current(&self) -> Option<&TransactionProcessingMetadata> {
        self.transactions.last()
    }

    pub fn current_mut(&mut self) -> Option<&mut TransactionProcessingMetadata> {
        self.transactions.last_mut()
    }

    /// The transaction numbered `absolute_transaction_number`.
    pub fn get(&self, absolute_transaction_number: u32) -> Option<&TransactionProcessingMetadata> {
        (absolute_transaction_number as usize)
            .checked_sub(1)
            .and_then(|idx| self.transactions.get(idx))
    }

    pub fn get_mut(
        &mut self,
        absolute_transaction_number: u32,
    ) -> Option<&mut TransactionProcessingMetadata> {
        (absolute_transaction_number as usize)
            .checked_sub(1)
            .and_then(|idx| self.transactions.get_mut(idx))
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TransactionProcessingMetadata> {
        self.transactions.iter()
    }

    /// Number of transactions in block `relative_block_number`.
    pub fn count_in_block(&self, relative_block_number: u32) -> usize {
        self.transactions
            .iter()
            .filter(|tx| tx.relative_block_number == relative_block_number)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;
    use crate::host::{AccessListEntry, Account, MemoryWorld};

    #[test]
    fn intrinsic_gas_of_a_deployment() {
        let tx = Transaction {
            data: hex!("600060005500").to_vec(),
            access_list: vec![AccessListEntry {
                address: Address::repeat_byte(1),
                storage_keys: vec![U256::zero(), U256::one()],
            }],
            ..Default::default()
        };
        // Three zero and three non-zero bytes, one init code word.
        let expected = 21_000 + 32_000 + 2 + 3 * 4 + 3 * 16 + 2_400 + 2 * 1_900;
        assert_eq!(intrinsic_gas(&tx), expected);
    }

    #[test]
    fn transfers_to_accounts_without_code_skip_execution() {
        let mut world = MemoryWorld::new();
        let contract = Address::repeat_byte(2);
        world.set_account(
            contract,
            Account {
                code: vec![0x00],
                ..Default::default()
            },
        );
        let header = BlockHeader::default();
        let transfer = Transaction {
            to: Some(Address::repeat_byte(3)),
            gas_limit: 21_000,
            data: vec![1],
            ..Default::default()
        };
        let metadata = TransactionProcessingMetadata::new(&world, &transfer, &header, 1, 1, 1, true);
        assert!(!metadata.requires_evm_execution);
        assert!(!metadata.copy_transaction_call_data);

        let call = Transaction {
            to: Some(contract),
            ..transfer
        };
        let metadata = TransactionProcessingMetadata::new(&world, &call, &header, 2, 2, 1, true);
        assert!(metadata.requires_evm_execution);
        assert!(metadata.copy_transaction_call_data);
        assert!(!metadata.requires_prewarming);
    }

    #[test]
    fn original_storage_is_cached_on_first_access() {
        let mut world = MemoryWorld::new();
        let address = Address::repeat_byte(1);
        world.set_storage(address, U256::one(), U256::from(8));
        let mut metadata = TransactionProcessingMetadata::new(
            &world,
            &Transaction::default(),
            &BlockHeader::default(),
            1,
            1,
            1,
            false,
        );
        assert_eq!(
            metadata.original_storage_value(&world, address, U256::one()),
            U256::from(8)
        );
        world.set_storage(address, U256::one(), U256::from(10));
        assert_eq!(
            metadata.original_storage_value(&world, address, U256::one()),
            U256::from(8)
        );
    }
}
