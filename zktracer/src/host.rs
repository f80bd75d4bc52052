//! Data handed to the tracer by the host EVM.
//!
//! The host owns execution; the tracer only observes it. Every hook receives
//! a snapshot of the relevant frame together with a read-only view of the
//! world state.

use ethereum_types::{Address, H256, U256};
use hashbrown::{HashMap, HashSet};
use keccak_hash::keccak;
use serde::{Deserialize, Serialize};
use zktracer_common::EMPTY_CODE_HASH;

use crate::opcode::OpCode;

/// Kind of host frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameType {
    #[default]
    MessageCall,
    ContractCreation,
}

/// How a host frame ended. Only meaningful on context exit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameOutcome {
    #[default]
    Running,
    Success,
    Revert,
    ExceptionalHalt,
    /// The frame failed without executing any instruction, e.g. a contract
    /// creation colliding with an existing account.
    Failed,
}

impl FrameOutcome {
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Snapshot of a host execution frame.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HostFrame {
    pub depth: usize,
    pub frame_type: FrameType,
    pub is_static: bool,
    pub sender: Address,
    /// Account whose storage and balance the frame operates on.
    pub recipient: Address,
    /// Account whose code the frame executes.
    pub contract: Address,
    pub value: U256,
    pub input_data: Vec<u8>,
    pub code: Vec<u8>,
    pub pc: usize,
    pub remaining_gas: u64,
    pub gas_refund: u64,
    /// Stack items, bottom first.
    pub stack: Vec<U256>,
    pub memory: Vec<u8>,
    /// Return data of the last child context.
    pub return_data: Vec<u8>,
    /// Data returned by this frame when it halts.
    pub output_data: Vec<u8>,
    pub warm_addresses: HashSet<Address>,
    pub warm_storage: HashSet<(Address, U256)>,
    pub outcome: FrameOutcome,
}

impl HostFrame {
    /// The opcode at the current program counter. Executing past the end of
    /// the code is a `STOP`.
    pub fn current_opcode(&self) -> OpCode {
        OpCode::from_byte(self.code.get(self.pc).copied().unwrap_or_default())
    }

    pub fn stack_height(&self) -> usize {
        self.stack.len()
    }

    /// The `i`-th stack item counted from the top, or zero if the stack is
    /// too shallow.
    pub fn stack_item(&self, i: usize) -> U256 {
        self.stack
            .len()
            .checked_sub(i + 1)
            .and_then(|idx| self.stack.get(idx))
            .copied()
            .unwrap_or_default()
    }

    /// Active memory, in 32-byte words.
    pub fn memory_words(&self) -> u64 {
        (self.memory.len() as u64).div_ceil(32)
    }

    /// Reads memory without expanding it; bytes past the active memory read
    /// as zero.
    pub fn read_memory(&self, offset: usize, size: usize) -> Vec<u8> {
        (0..size)
            .map(|i| {
                offset
                    .checked_add(i)
                    .and_then(|idx| self.memory.get(idx))
                    .copied()
                    .unwrap_or_default()
            })
            .collect()
    }

    pub fn is_deployment(&self) -> bool {
        self.frame_type == FrameType::ContractCreation
    }

    pub fn is_address_warm(&self, address: &Address) -> bool {
        self.warm_addresses.contains(address)
    }

    pub fn is_storage_warm(&self, address: &Address, key: &U256) -> bool {
        self.warm_storage.contains(&(*address, *key))
    }
}

/// Reason given by the host for an exceptional halt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HaltReason {
    InsufficientGas,
    InsufficientStackItems,
    TooManyStackItems,
    InvalidOperation,
    IllegalStateChange,
    InvalidJumpDestination,
    InvalidReturnDataBufferAccess,
    CodeSizeLimit,
    InvalidCode,
    OutOfMemory,
}

/// Outcome of a single opcode, as reported by the host.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OperationResult {
    pub gas_cost: u64,
    pub halt_reason: Option<HaltReason>,
}

/// Account state as seen through the world view.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub nonce: u64,
    pub balance: U256,
    pub code: Vec<u8>,
}

impl Account {
    pub fn code_hash(&self) -> H256 {
        if self.code.is_empty() {
            EMPTY_CODE_HASH
        } else {
            keccak(&self.code)
        }
    }

    /// Whether the account is empty in the sense of EIP-161.
    pub fn is_empty(&self) -> bool {
        self.nonce == 0 && self.balance.is_zero() && self.code.is_empty()
    }

    pub fn has_code(&self) -> bool {
        !self.code.is_empty()
    }
}

/// Read-only access to the world state.
pub trait WorldView {
    fn account(&self, address: &Address) -> Option<Account>;

    fn storage(&self, address: &Address, key: &U256) -> U256;

    /// The account at `address`, or an empty account if it does not exist.
    fn account_or_default(&self, address: &Address) -> Account {
        self.account(address).unwrap_or_default()
    }
}

/// A [`WorldView`] backed by hash maps.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MemoryWorld {
    accounts: HashMap<Address, Account>,
    storage: HashMap<(Address, U256), U256>,
}

impl MemoryWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_account(&mut self, address: Address, account: Account) {
        self.accounts.insert(address, account);
    }

    pub fn remove_account(&mut self, address: &Address) {
        self.accounts.remove(address);
        self.storage.retain(|(owner, _), _| owner != address);
    }

    pub fn set_storage(&mut self, address: Address, key: U256, value: U256) {
        if value.is_zero() {
            self.storage.remove(&(address, key));
        } else {
            self.storage.insert((address, key), value);
        }
    }

    pub fn account_mut(&mut self, address: &Address) -> Option<&mut Account> {
        self.accounts.get_mut(address)
    }
}

impl WorldView for MemoryWorld {
    fn account(&self, address: &Address) -> Option<Account> {
        self.accounts.get(address).cloned()
    }

    fn storage(&self, address: &Address, key: &U256) -> U256 {
        self.storage
            .get(&(*address, *key))
            .copied()
            .unwrap_or_default()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionType {
    #[default]
    Legacy,
    AccessList,
    Eip1559,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessListEntry {
    pub address: Address,
    pub storage_keys: Vec<U256>,
}

/// A transaction, as submitted to the host.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub tx_type: TransactionType,
    pub sender: Address,
    /// `None` for deployments.
    pub to: Option<Address>,
    pub nonce: u64,
    pub value: U256,
    pub gas_limit: u64,
    pub gas_price: Option<U256>,
    pub max_fee_per_gas: Option<U256>,
    pub max_priority_fee_per_gas: Option<U256>,
    pub data: Vec<u8>,
    pub access_list: Vec<AccessListEntry>,
}

impl Transaction {
    pub fn is_deployment(&self) -> bool {
        self.to.is_none()
    }

    /// The price paid per unit of gas, given the block's base fee.
    pub fn effective_gas_price(&self, base_fee: U256) -> U256 {
        match self.tx_type {
            TransactionType::Legacy | TransactionType::AccessList => {
                self.gas_price.unwrap_or_default()
            }
            TransactionType::Eip1559 => {
                let max_fee = self.max_fee_per_gas.unwrap_or_default();
                let priority = self.max_priority_fee_per_gas.unwrap_or_default();
                max_fee.min(base_fee.saturating_add(priority))
            }
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub number: u64,
    pub coinbase: Address,
    pub timestamp: u64,
    pub gas_limit: u64,
    pub base_fee: U256,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockBody {
    pub transactions: Vec<Transaction>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<H256>,
    pub data: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_items_are_read_from_the_top() {
        let frame = HostFrame {
            stack: vec![U256::from(1), U256::from(2), U256::from(3)],
            ..Default::default()
        };
        assert_eq!(frame.stack_item(0), U256::from(3));
        assert_eq!(frame.stack_item(2), U256::from(1));
        assert_eq!(frame.stack_item(3), U256::zero());
    }

    #[test]
    fn code_past_the_end_is_stop() {
        let frame = HostFrame {
            code: vec![0x01],
            pc: 5,
            ..Default::default()
        };
        assert_eq!(frame.current_opcode(), OpCode::Stop);
    }

    #[test]
    fn eip1559_price_is_capped_by_max_fee() {
        let tx = Transaction {
            tx_type: TransactionType::Eip1559,
            max_fee_per_gas: Some(U256::from(10)),
            max_priority_fee_per_gas: Some(U256::from(3)),
            ..Default::default()
        };
        assert_eq!(tx.effective_gas_price(U256::from(5)), U256::from(8));
        assert_eq!(tx.effective_gas_price(U256::from(9)), U256::from(10));
    }

    #[test]
    fn zero_storage_values_are_pruned() {
        let mut world = MemoryWorld::new();
        let address = Address::repeat_byte(1);
        world.set_storage(address, U256::one(), U256::from(5));
        world.set_storage(address, U256::one(), U256::zero());
        assert_eq!(world.storage(&address, &U256::one()), U256::zero());
    }
}
