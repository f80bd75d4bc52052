//! Transaction, receipt, log and block level modules.
//!
//! These modules record one operation per transaction, log or block and
//! keep duplicates.

use ethereum_types::{Address, H256, U256};
use rlp::RlpStream;
use zktracer_common::address_hi_lo;
use zktracer_common::gas::MAX_REFUND_QUOTIENT;

use super::arith::{Mod, Wcp};
use super::container::StackedList;
use super::{hi_lo_columns, ModuleOperation, OperationModule};
use crate::host::{BlockBody, BlockHeader, Log, Transaction, TransactionType};
use crate::metadata::TransactionProcessingMetadata;

fn address_columns(address: Address) -> [U256; 2] {
    let (hi, lo) = address_hi_lo(address);
    [U256::from(hi), U256::from(lo)]
}

/// Transaction data, as consumed by the hub at initialization and
/// finalization.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxnDataOperation {
    pub absolute_transaction_number: u32,
    pub relative_block_number: u32,
    pub tx_type: TransactionType,
    pub sender: Address,
    pub recipient: Address,
    pub is_deployment: bool,
    pub value: U256,
    pub gas_limit: u64,
    pub gas_price: U256,
    pub initially_available_gas: u64,
    pub call_data_size: usize,
    pub status: bool,
    pub leftover_gas: u64,
    pub refund_effective: u64,
}

impl TxnDataOperation {
    pub fn from_metadata(metadata: &TransactionProcessingMetadata) -> Self {
        Self {
            absolute_transaction_number: metadata.absolute_transaction_number,
            relative_block_number: metadata.relative_block_number,
            tx_type: metadata.transaction.tx_type,
            sender: metadata.sender,
            recipient: metadata.effective_recipient,
            is_deployment: metadata.is_deployment,
            value: metadata.transaction.value,
            gas_limit: metadata.transaction.gas_limit,
            gas_price: metadata.effective_gas_price,
            initially_available_gas: metadata.initially_available_gas,
            call_data_size: metadata.transaction.data.len(),
            status: metadata.status,
            leftover_gas: metadata.leftover_gas,
            refund_effective: metadata.refund_effective,
        }
    }

    /// Comparisons and divisions the transaction data module delegates:
    /// the upfront gas check, the refund cap and the leftover check.
    pub fn trace_computations(&self, wcp: &mut Wcp, mod_: &mut Mod) {
        let consumed = self.gas_limit.saturating_sub(self.leftover_gas);
        wcp.call_lt(U256::from(self.initially_available_gas), U256::from(self.gas_limit));
        let cap = mod_.call_div(U256::from(consumed), U256::from(MAX_REFUND_QUOTIENT));
        wcp.call_lt(U256::from(self.refund_effective), cap + U256::one());
        wcp.call_iszero(U256::from(self.leftover_gas));
    }
}

impl ModuleOperation for TxnDataOperation {
    const MODULE: &'static str = "TXN_DATA";
    const COLUMNS: &'static [&'static str] = &[
        "ABS_TX_NUM",
        "REL_BLOCK",
        "TYPE",
        "FROM_HI",
        "FROM_LO",
        "TO_HI",
        "TO_LO",
        "IS_DEP",
        "VALUE",
        "GAS_LIMIT",
        "GAS_PRICE",
        "GAS_INITIALLY_AVAILABLE",
        "CALL_DATA_SIZE",
        "STATUS_CODE",
        "GAS_LEFTOVER",
        "REFUND_EFFECTIVE",
    ];

    fn line_count(&self) -> usize {
        match self.tx_type {
            TransactionType::Legacy => 8,
            TransactionType::AccessList => 9,
            TransactionType::Eip1559 => 10,
        }
    }

    fn columns(&self) -> Vec<U256> {
        let mut columns = vec![
            U256::from(self.absolute_transaction_number),
            U256::from(self.relative_block_number),
            U256::from(self.tx_type as u8),
        ];
        columns.extend(address_columns(self.sender));
        columns.extend(address_columns(self.recipient));
        columns.extend([
            U256::from(self.is_deployment as u8),
            self.value,
            U256::from(self.gas_limit),
            self.gas_price,
            U256::from(self.initially_available_gas),
            U256::from(self.call_data_size),
            U256::from(self.status as u8),
            U256::from(self.leftover_gas),
            U256::from(self.refund_effective),
        ]);
        columns
    }
}

pub type TxnData = OperationModule<TxnDataOperation, StackedList<TxnDataOperation>>;

/// RLP encoding of the payload a transaction's sender signs.
pub fn encode_transaction(tx: &Transaction, chain_id: u64) -> Vec<u8> {
    let fields = match tx.tx_type {
        TransactionType::Legacy => 9,
        TransactionType::AccessList => 8,
        TransactionType::Eip1559 => 9,
    };
    let mut stream = RlpStream::new_list(fields);
    if tx.tx_type != TransactionType::Legacy {
        stream.append(&chain_id);
    }
    stream.append(&tx.nonce);
    match tx.tx_type {
        TransactionType::Eip1559 => {
            stream.append(&tx.max_priority_fee_per_gas.unwrap_or_default());
            stream.append(&tx.max_fee_per_gas.unwrap_or_default());
        }
        _ => {
            stream.append(&tx.gas_price.unwrap_or_default());
        }
    }
    stream.append(&tx.gas_limit);
    match tx.to {
        Some(to) => stream.append(&to),
        None => stream.append_empty_data(),
    };
    stream.append(&tx.value);
    stream.append(&tx.data);
    if tx.tx_type == TransactionType::Legacy {
        stream.append(&chain_id);
        stream.append_empty_data();
        stream.append_empty_data();
    } else {
        stream.begin_list(tx.access_list.len());
        for entry in &tx.access_list {
            stream.begin_list(2);
            stream.append(&entry.address);
            stream.begin_list(entry.storage_keys.len());
            for key in &entry.storage_keys {
                let mut bytes = [0u8; 32];
                key.to_big_endian(&mut bytes);
                stream.append(&H256(bytes));
            }
        }
    }
    let mut encoding = stream.out().to_vec();
    if tx.tx_type != TransactionType::Legacy {
        encoding.insert(0, tx.tx_type as u8);
    }
    encoding
}

/// RLP encoding of a transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RlpTxnOperation {
    pub absolute_transaction_number: u32,
    pub encoding: Vec<u8>,
    pub access_list_entries: usize,
}

impl RlpTxnOperation {
    pub fn new(metadata: &TransactionProcessingMetadata, chain_id: u64) -> Self {
        Self {
            absolute_transaction_number: metadata.absolute_transaction_number,
            encoding: encode_transaction(&metadata.transaction, chain_id),
            access_list_entries: metadata.transaction.access_list.len(),
        }
    }
}

impl ModuleOperation for RlpTxnOperation {
    const MODULE: &'static str = "RLP_TXN";
    const COLUMNS: &'static [&'static str] = &["ABS_TX_NUM", "RLP_SIZE"];

    /// A fixed prefix plus one row per 16-byte limb of the encoding and per
    /// access list entry.
    fn line_count(&self) -> usize {
        8 + self.encoding.len().div_ceil(16) + self.access_list_entries
    }

    fn columns(&self) -> Vec<U256> {
        vec![
            U256::from(self.absolute_transaction_number),
            U256::from(self.encoding.len()),
        ]
    }
}

pub type RlpTxn = OperationModule<RlpTxnOperation, StackedList<RlpTxnOperation>>;

/// RLP encoding of a transaction receipt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RlpTxnRcptOperation {
    pub absolute_transaction_number: u32,
    pub tx_type: TransactionType,
    pub status: bool,
    pub cumulative_gas_used: u64,
    pub logs: Vec<Log>,
}

impl ModuleOperation for RlpTxnRcptOperation {
    const MODULE: &'static str = "RLP_TXN_RCPT";
    const COLUMNS: &'static [&'static str] = &["ABS_TX_NUM", "STATUS_CODE", "GAS_USED", "NB_LOGS"];

    /// Type, status, gas and bloom rows, then per log its address, topics
    /// and data limbs.
    fn line_count(&self) -> usize {
        let logs: usize = self
            .logs
            .iter()
            .map(|log| 2 + log.topics.len() + log.data.len().div_ceil(16))
            .sum();
        4 + 16 + logs
    }

    fn columns(&self) -> Vec<U256> {
        vec![
            U256::from(self.absolute_transaction_number),
            U256::from(self.status as u8),
            U256::from(self.cumulative_gas_used),
            U256::from(self.logs.len()),
        ]
    }
}

pub type RlpTxnRcpt = OperationModule<RlpTxnRcptOperation, StackedList<RlpTxnRcptOperation>>;

/// A `LOG` instruction, either surviving in the receipt or reverted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogInfoOperation {
    pub absolute_transaction_number: u32,
    pub log_stamp: u32,
    pub address: Address,
    pub topics: usize,
    pub data_size: usize,
    pub reverted: bool,
}

impl ModuleOperation for LogInfoOperation {
    const MODULE: &'static str = "LOG_INFO";
    const COLUMNS: &'static [&'static str] = &[
        "ABS_TXN_NUM",
        "ABS_LOG_NUM",
        "ADDR_HI",
        "ADDR_LO",
        "NUM_TOPICS",
        "DATA_SIZE",
        "REVERTED",
    ];

    fn line_count(&self) -> usize {
        if self.reverted {
            1
        } else {
            1 + self.topics
        }
    }

    fn columns(&self) -> Vec<U256> {
        let mut columns = vec![
            U256::from(self.absolute_transaction_number),
            U256::from(self.log_stamp),
        ];
        columns.extend(address_columns(self.address));
        columns.extend([
            U256::from(self.topics),
            U256::from(self.data_size),
            U256::from(self.reverted as u8),
        ]);
        columns
    }
}

pub type LogInfo = OperationModule<LogInfoOperation, StackedList<LogInfoOperation>>;

/// Data of a log that made it into the receipt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogDataOperation {
    pub log_stamp: u32,
    pub data: Vec<u8>,
}

impl ModuleOperation for LogDataOperation {
    const MODULE: &'static str = "LOG_DATA";
    const COLUMNS: &'static [&'static str] = &["ABS_LOG_NUM", "SIZE_TOTAL"];

    fn line_count(&self) -> usize {
        self.data.len().div_ceil(16).max(1)
    }

    fn columns(&self) -> Vec<U256> {
        vec![U256::from(self.log_stamp), U256::from(self.data.len())]
    }
}

pub type LogData = OperationModule<LogDataOperation, StackedList<LogDataOperation>>;

/// Header data of a block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockdataOperation {
    pub relative_block_number: u32,
    pub header: BlockHeader,
    pub transaction_count: usize,
}

impl ModuleOperation for BlockdataOperation {
    const MODULE: &'static str = "BLOCKDATA";
    const COLUMNS: &'static [&'static str] = &[
        "REL_BLOCK",
        "NUMBER",
        "COINBASE_HI",
        "COINBASE_LO",
        "TIMESTAMP",
        "GAS_LIMIT",
        "BASEFEE_HI",
        "BASEFEE_LO",
        "REL_TX_NUM_MAX",
    ];

    fn line_count(&self) -> usize {
        7
    }

    fn columns(&self) -> Vec<U256> {
        let mut columns = vec![
            U256::from(self.relative_block_number),
            U256::from(self.header.number),
        ];
        columns.extend(address_columns(self.header.coinbase));
        columns.extend([
            U256::from(self.header.timestamp),
            U256::from(self.header.gas_limit),
        ]);
        columns.extend(hi_lo_columns(self.header.base_fee));
        columns.push(U256::from(self.transaction_count));
        columns
    }
}

pub type Blockdata = OperationModule<BlockdataOperation, StackedList<BlockdataOperation>>;

impl Blockdata {
    pub fn call(&mut self, relative_block_number: u32, header: &BlockHeader, body: &BlockBody) {
        self.add(BlockdataOperation {
            relative_block_number,
            header: header.clone(),
            transaction_count: body.transactions.len(),
        });
    }
}

/// A `BLOCKHASH` lookup.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BlockhashOperation {
    pub block_number: U256,
    pub current_block_number: u64,
}

impl BlockhashOperation {
    /// Whether the requested block is one of the 256 most recent ones.
    pub fn in_range(&self) -> bool {
        let current = U256::from(self.current_block_number);
        self.block_number < current && current - self.block_number <= U256::from(256)
    }
}

impl ModuleOperation for BlockhashOperation {
    const MODULE: &'static str = "BLOCKHASH";
    const COLUMNS: &'static [&'static str] = &["BLOCK_NUMBER_HI", "BLOCK_NUMBER_LO", "REL_BLOCK"];

    fn line_count(&self) -> usize {
        1
    }

    fn columns(&self) -> Vec<U256> {
        let mut columns = hi_lo_columns(self.block_number).to_vec();
        columns.push(U256::from(self.current_block_number));
        columns
    }
}

pub type Blockhash = OperationModule<BlockhashOperation>;

impl Blockhash {
    /// Records a lookup and the comparisons deciding whether it is in
    /// range.
    pub fn call(&mut self, wcp: &mut Wcp, block_number: U256, current_block_number: u64) -> bool {
        let op = BlockhashOperation {
            block_number,
            current_block_number,
        };
        let current = U256::from(current_block_number);
        wcp.call_lt(block_number, current);
        wcp.call_lt(current.saturating_sub(U256::from(256)), block_number.saturating_add(U256::one()));
        let in_range = op.in_range();
        self.add(op);
        in_range
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::AccessListEntry;
    use crate::module::Module;

    #[test]
    fn legacy_encoding_is_an_rlp_list() {
        let tx = Transaction {
            to: Some(Address::repeat_byte(0x11)),
            gas_limit: 21_000,
            gas_price: Some(U256::from(7)),
            ..Default::default()
        };
        let encoding = encode_transaction(&tx, 1);
        let rlp = rlp::Rlp::new(&encoding);
        assert!(rlp.is_list());
        assert_eq!(rlp.item_count().unwrap(), 9);
        assert_eq!(rlp.val_at::<u64>(2).unwrap(), 21_000);
    }

    #[test]
    fn typed_encodings_are_prefixed() {
        let tx = Transaction {
            tx_type: TransactionType::AccessList,
            access_list: vec![AccessListEntry {
                address: Address::repeat_byte(1),
                storage_keys: vec![U256::one()],
            }],
            ..Default::default()
        };
        let encoding = encode_transaction(&tx, 1);
        assert_eq!(encoding[0], 1);
        assert!(rlp::Rlp::new(&encoding[1..]).is_list());
    }

    #[test]
    fn blockhash_range() {
        let mut wcp = Wcp::new();
        let mut blockhash = Blockhash::new();
        assert!(blockhash.call(&mut wcp, U256::from(99), 100));
        assert!(!blockhash.call(&mut wcp, U256::from(100), 100));
        assert!(!blockhash.call(&mut wcp, U256::from(10), 300));
        assert_eq!(blockhash.line_count(), 3);
        assert!(wcp.line_count() > 0);
    }

    #[test]
    fn reverted_logs_take_a_single_row() {
        let mut log_info = LogInfo::new();
        log_info.add(LogInfoOperation {
            absolute_transaction_number: 1,
            log_stamp: 1,
            address: Address::zero(),
            topics: 3,
            data_size: 0,
            reverted: false,
        });
        log_info.add(LogInfoOperation {
            absolute_transaction_number: 1,
            log_stamp: 2,
            address: Address::zero(),
            topics: 3,
            data_size: 0,
            reverted: true,
        });
        assert_eq!(log_info.line_count(), 4 + 1);
    }
}
