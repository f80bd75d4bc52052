//! Sub-modules the hub hands work to.
//!
//! Each sub-module only records the operations it is asked to prove and
//! reports how many rows they take. Operations are kept per transaction so
//! that the most recent transaction can be popped when it does not fit.

pub mod arith;
pub mod code;
pub mod container;
pub mod imc;
pub mod trace;
pub mod txn;

use std::fmt::Debug;
use std::marker::PhantomData;

use ethereum_types::U256;
use zktracer_common::hi_lo;

use self::arith::*;
use self::code::*;
use self::container::{OperationContainer, StackedSet};
use self::imc::*;
use self::trace::{ColumnHeader, Trace};
use self::txn::*;

/// Rows taken by a full-width arithmetic operation.
pub const LLARGE: usize = 16;
/// Rows taken by a medium-sized arithmetic operation.
pub const MMEDIUM: usize = 8;

/// A component contributing rows to the trace.
pub trait Module {
    /// Name of the module, used to prefix its columns.
    fn module_key(&self) -> &'static str;

    fn enter_transaction(&mut self);

    /// Forgets everything recorded since the last
    /// [`Module::enter_transaction`].
    fn pop_transaction(&mut self);

    fn line_count(&self) -> usize;

    fn columns_headers(&self) -> Vec<ColumnHeader>;

    fn commit(&self, trace: &mut Trace);
}

/// An operation recorded by an [`OperationModule`].
pub trait ModuleOperation: Clone + Debug {
    const MODULE: &'static str;

    /// Names of the values returned by [`ModuleOperation::columns`].
    const COLUMNS: &'static [&'static str];

    /// Rows the operation takes.
    fn line_count(&self) -> usize;

    /// Values repeated on every row of the operation.
    fn columns(&self) -> Vec<U256>;
}

/// Splits `word` into its high and low 16 bytes, as two column values.
pub(crate) fn hi_lo_columns(word: U256) -> [U256; 2] {
    let (hi, lo) = hi_lo(word);
    [U256::from(hi), U256::from(lo)]
}

/// A module whose trace is the concatenation of its operations, each
/// numbered by a stamp and a row counter.
#[derive(Clone, Debug)]
pub struct OperationModule<Op, C = StackedSet<Op>> {
    operations: C,
    _operation: PhantomData<Op>,
}

impl<Op, C: OperationContainer<Op>> Default for OperationModule<Op, C> {
    fn default() -> Self {
        Self {
            operations: C::default(),
            _operation: PhantomData,
        }
    }
}

impl<Op: ModuleOperation, C: OperationContainer<Op>> OperationModule<Op, C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `op`. Returns whether it was new.
    pub fn add(&mut self, op: Op) -> bool {
        self.operations.add(op)
    }

    pub fn operations(&self) -> impl Iterator<Item = &Op> {
        self.operations.iter()
    }

    pub fn operation_count(&self) -> usize {
        self.operations.len()
    }
}

impl<Op: ModuleOperation, C: OperationContainer<Op>> Module for OperationModule<Op, C> {
    fn module_key(&self) -> &'static str {
        Op::MODULE
    }

    fn enter_transaction(&mut self) {
        self.operations.enter_transaction();
    }

    fn pop_transaction(&mut self) {
        self.operations.pop_transaction();
    }

    fn line_count(&self) -> usize {
        self.operations.iter().map(ModuleOperation::line_count).sum()
    }

    fn columns_headers(&self) -> Vec<ColumnHeader> {
        let length = self.line_count();
        [("STAMP", 4), ("CT", 1)]
            .into_iter()
            .chain(Op::COLUMNS.iter().map(|&name| (name, 32)))
            .map(|(name, bytes)| ColumnHeader::new(Op::MODULE, name, bytes, length))
            .collect()
    }

    fn commit(&self, trace: &mut Trace) {
        for (stamp, op) in self.operations.iter().enumerate() {
            let values = op.columns();
            debug_assert_eq!(values.len(), Op::COLUMNS.len());
            for ct in 0..op.line_count() {
                trace.push(Op::MODULE, "STAMP", U256::from(stamp + 1));
                trace.push(Op::MODULE, "CT", U256::from(ct));
                for (name, value) in Op::COLUMNS.iter().zip(&values) {
                    trace.push(Op::MODULE, name, *value);
                }
            }
        }
    }
}

/// Every sub-module of the tracer.
#[derive(Clone, Debug, Default)]
pub struct Modules {
    pub blockhash: Blockhash,
    pub add: Add,
    pub bin: Bin,
    pub ext: Ext,
    pub gas: Gas,
    pub mmu: Mmu,
    pub mod_: Mod,
    pub mul: Mul,
    pub mxp: Mxp,
    pub oob: Oob,
    pub rlp_addr: RlpAddr,
    pub rlp_txn: RlpTxn,
    pub rlp_txn_rcpt: RlpTxnRcpt,
    pub log_data: LogData,
    pub log_info: LogInfo,
    pub rom: Rom,
    pub rom_lex: RomLex,
    pub shf: Shf,
    pub stp: Stp,
    pub trm: Trm,
    pub wcp: Wcp,
    pub txn_data: TxnData,
    pub blockdata: Blockdata,
    pub exp: Exp,
    pub keccak: Keccak,
}

impl Modules {
    /// The sub-modules, in the order they are traced.
    ///
    /// Blockhash precedes WCP, the receipt module precedes the log modules,
    /// WCP precedes the transaction data module, which precedes blockdata.
    pub fn all(&self) -> [&dyn Module; 25] {
        [
            &self.blockhash,
            &self.add,
            &self.bin,
            &self.ext,
            &self.gas,
            &self.mmu,
            &self.mod_,
            &self.mul,
            &self.mxp,
            &self.oob,
            &self.rlp_addr,
            &self.rlp_txn,
            &self.rlp_txn_rcpt,
            &self.log_data,
            &self.log_info,
            &self.rom,
            &self.rom_lex,
            &self.shf,
            &self.stp,
            &self.trm,
            &self.wcp,
            &self.txn_data,
            &self.blockdata,
            &self.exp,
            &self.keccak,
        ]
    }

    /// Mutable counterpart of [`Modules::all`], in the same order.
    pub fn all_mut(&mut self) -> [&mut dyn Module; 25] {
        [
            &mut self.blockhash,
            &mut self.add,
            &mut self.bin,
            &mut self.ext,
            &mut self.gas,
            &mut self.mmu,
            &mut self.mod_,
            &mut self.mul,
            &mut self.mxp,
            &mut self.oob,
            &mut self.rlp_addr,
            &mut self.rlp_txn,
            &mut self.rlp_txn_rcpt,
            &mut self.log_data,
            &mut self.log_info,
            &mut self.rom,
            &mut self.rom_lex,
            &mut self.shf,
            &mut self.stp,
            &mut self.trm,
            &mut self.wcp,
            &mut self.txn_data,
            &mut self.blockdata,
            &mut self.exp,
            &mut self.keccak,
        ]
    }

    pub fn enter_transaction(&mut self) {
        for module in self.all_mut() {
            module.enter_transaction();
        }
    }

    pub fn pop_transaction(&mut self) {
        for module in self.all_mut() {
            module.pop_transaction();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::OpCode;

    #[test]
    fn module_order_is_fixed() {
        let modules = Modules::default();
        let keys: Vec<_> = modules.all().iter().map(|m| m.module_key()).collect();
        let position = |key| keys.iter().position(|k| *k == key).unwrap();
        assert_eq!(keys.len(), 25);
        assert_eq!(keys[0], "BLOCKHASH");
        assert!(position("BLOCKHASH") < position("WCP"));
        assert!(position("RLP_TXN_RCPT") < position("LOG_DATA"));
        assert!(position("RLP_TXN_RCPT") < position("LOG_INFO"));
        assert!(position("WCP") < position("TXN_DATA"));
        assert!(position("TXN_DATA") < position("BLOCKDATA"));
    }

    #[test]
    fn duplicated_operations_are_traced_once() {
        let mut modules = Modules::default();
        modules.enter_transaction();
        let op = ExtOperation::new(OpCode::MulMod, U256::from(7), U256::from(9), U256::MAX);
        modules.ext.add(op.clone());
        modules.enter_transaction();
        modules.ext.add(op);
        assert_eq!(modules.ext.line_count(), MMEDIUM);
    }

    #[test]
    fn commit_fills_every_row() {
        let mut add = Add::new();
        add.call(OpCode::Add, U256::one(), U256::from(2));
        add.call(OpCode::Sub, U256::one(), U256::from(2));
        let mut trace = Trace::new();
        add.commit(&mut trace);
        assert_eq!(trace.height("ADD"), 2 * LLARGE);
        let stamps = trace.column("ADD", "STAMP").unwrap();
        assert_eq!(stamps[0], U256::one());
        assert_eq!(stamps[LLARGE], U256::from(2));
        for header in add.columns_headers() {
            assert_eq!(header.length, 2 * LLARGE);
        }
    }
}
