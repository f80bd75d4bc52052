use ethereum_types::U256;
use zktracer_common::address_hi_lo;

use crate::metadata::TransactionProcessingMetadata;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransactionFragmentKind {
    /// A transaction needing no EVM execution.
    Skip,
    Initialization,
    Finalization,
    /// Read by `ORIGIN` or `GASPRICE`.
    Instruction,
}

/// A row exposing the data of the current transaction.
///
/// Values are read from the transaction's metadata when the trace is
/// committed, since some of them are only known once it is over.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TransactionFragment {
    pub kind: TransactionFragmentKind,
    pub absolute_transaction_number: u32,
}

impl TransactionFragment {
    pub const fn new(kind: TransactionFragmentKind, absolute_transaction_number: u32) -> Self {
        Self {
            kind,
            absolute_transaction_number,
        }
    }

    pub const COLUMNS: &'static [&'static str] = &[
        "TXN_FROM_ADDRESS_HI",
        "TXN_FROM_ADDRESS_LO",
        "TXN_TO_ADDRESS_HI",
        "TXN_TO_ADDRESS_LO",
        "TXN_COINBASE_ADDRESS_HI",
        "TXN_COINBASE_ADDRESS_LO",
        "TXN_IS_DEPLOYMENT",
        "TXN_VALUE",
        "TXN_GAS_PRICE",
        "TXN_BASEFEE",
        "TXN_GAS_LIMIT",
        "TXN_GAS_INITIALLY_AVAILABLE",
        "TXN_GAS_LEFTOVER",
        "TXN_REFUND_COUNTER_INFINITY",
        "TXN_REFUND_EFFECTIVE",
        "TXN_REQUIRES_EVM_EXECUTION",
        "TXN_COPY_TXCD",
        "TXN_CALL_DATA_SIZE",
        "TXN_STATUS_CODE",
    ];

    pub fn values(&self, metadata: &TransactionProcessingMetadata) -> Vec<U256> {
        let bit = |b: bool| U256::from(b as u8);
        let mut values = Vec::with_capacity(Self::COLUMNS.len());
        for address in [
            metadata.sender,
            metadata.effective_recipient,
            metadata.coinbase,
        ] {
            let (hi, lo) = address_hi_lo(address);
            values.extend([U256::from(hi), U256::from(lo)]);
        }
        values.extend([
            bit(metadata.is_deployment),
            metadata.transaction.value,
            metadata.effective_gas_price,
            metadata.base_fee,
            U256::from(metadata.transaction.gas_limit),
            U256::from(metadata.initially_available_gas),
            U256::from(metadata.leftover_gas),
            U256::from(metadata.refund_counter),
            U256::from(metadata.refund_effective),
            bit(metadata.requires_evm_execution),
            bit(metadata.copy_transaction_call_data),
            U256::from(metadata.transaction.data.len()),
            bit(metadata.status),
        ]);
        values
    }
}
