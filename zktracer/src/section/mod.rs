//! Trace sections: the rows the hub produces for one opcode or one
//! transaction-level event.

mod call;
mod halt;
mod instruction;
mod transaction;

use ethereum_types::{Address, U256};
use static_assertions::const_assert_eq;

use crate::callstack::FrameId;
use crate::error::{TracerError, TracerResult};
use crate::fragment::{AccountFragment, Fragment, StackFragment};
use crate::gas::GasProjection;
use crate::host::{HostFrame, WorldView};
use crate::hub::HubProcessingPhase;
use crate::opcode::{InstructionFamily, OpCode};
use crate::signals::{Aborts, Exceptions, Signals, TracedException};

/// Location of a section: the transaction it belongs to and its index in
/// that transaction's sections.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SectionRef {
    /// Absolute transaction number, 1-based.
    pub tx: u32,
    pub index: usize,
}

/// The shape of a section, decided once per opcode or event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SectionKind {
    TxSkip,
    TxPreWarming,
    TxInitialization,
    TxFinalization,
    StackOnly,
    EarlyException,
    MachineState,
    Exp,
    Keccak,
    Context,
    Transaction,
    Account,
    Copy,
    CallDataLoad,
    StackRam,
    Storage,
    Jump,
    Log,
    Create,
    Call,
    Return,
    Revert,
    Stop,
    Selfdestruct,
}

impl SectionKind {
    /// Rows a section of this kind may hold besides its stack rows,
    /// including the context row appended on exceptional halts.
    const fn non_stack_rows(self, exceptional: bool) -> usize {
        match self {
            Self::TxSkip => 4,
            Self::TxPreWarming => 1,
            Self::TxInitialization => 7,
            Self::TxFinalization => 3,
            Self::StackOnly | Self::EarlyException => 1,
            Self::MachineState | Self::Exp | Self::Keccak | Self::StackRam => 2,
            Self::Context | Self::Transaction => 2,
            Self::Account => 3,
            Self::CallDataLoad | Self::Jump | Self::Log => 3,
            Self::Copy | Self::Storage => 5,
            Self::Revert | Self::Stop => 4,
            Self::Selfdestruct => 8,
            Self::Call | Self::Create => 10,
            Self::Return => {
                if exceptional {
                    4
                } else {
                    7
                }
            }
        }
    }

    /// Row budget of a section with `stack_rows` stack rows.
    pub const fn max_rows(self, stack_rows: usize, exceptional: bool) -> usize {
        stack_rows + self.non_stack_rows(exceptional)
    }

    /// Whether the section is produced by an opcode.
    pub const fn is_instruction(self) -> bool {
        !matches!(
            self,
            Self::TxSkip | Self::TxPreWarming | Self::TxInitialization | Self::TxFinalization
        )
    }
}

/// Selects the section an opcode produces.
///
/// Invalid opcodes and stack exceptions are caught before any family
/// specific processing.
pub fn section_kind(opcode: OpCode, exceptions: Exceptions) -> SectionKind {
    use InstructionFamily as F;
    if exceptions.stack_exception() || exceptions.contains(Exceptions::INVALID_OPCODE) {
        return SectionKind::EarlyException;
    }
    match opcode.family() {
        F::Add
        | F::Mod
        | F::Ext
        | F::Wcp
        | F::Bin
        | F::Shf
        | F::Batch
        | F::PushPop
        | F::Dup
        | F::Swap => SectionKind::StackOnly,
        F::Mul => {
            if opcode == OpCode::Exp {
                SectionKind::Exp
            } else {
                SectionKind::StackOnly
            }
        }
        F::Kec => SectionKind::Keccak,
        F::Context => SectionKind::Context,
        F::Account => SectionKind::Account,
        F::Copy => SectionKind::Copy,
        F::Transaction => SectionKind::Transaction,
        F::StackRam => {
            if opcode == OpCode::CallDataLoad {
                SectionKind::CallDataLoad
            } else {
                SectionKind::StackRam
            }
        }
        F::Storage => SectionKind::Storage,
        F::Jump => SectionKind::Jump,
        F::MachineState => SectionKind::MachineState,
        F::Log => SectionKind::Log,
        F::Create => SectionKind::Create,
        F::Call => SectionKind::Call,
        F::Halt => match opcode {
            OpCode::Return => SectionKind::Return,
            OpCode::Revert => SectionKind::Revert,
            OpCode::SelfDestruct => SectionKind::Selfdestruct,
            _ => SectionKind::Stop,
        },
        F::Invalid => SectionKind::EarlyException,
    }
}

/// Values shared by every row of a section.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CommonValues {
    pub hub_stamp: u32,
    pub absolute_transaction_number: u32,
    pub relative_block_number: u32,
    pub phase: HubProcessingPhase,
    pub frame_id: FrameId,
    pub context_number: u32,
    pub context_number_new: u32,
    pub pc: usize,
    pub pc_new: usize,
    pub height: usize,
    pub height_new: usize,
    pub gas_expected: u64,
    pub gas_actual: u64,
    pub gas_cost: u64,
    pub gas_next: u64,
    pub refund: u64,
    pub refund_new: u64,
    pub log_stamp: u32,
    pub exception: TracedException,
}

impl CommonValues {
    pub const COLUMNS: &'static [&'static str] = &[
        "HUB_STAMP",
        "ABSOLUTE_TRANSACTION_NUMBER",
        "RELATIVE_BLOCK_NUMBER",
        "TX_SKIP",
        "TX_WARM",
        "TX_INIT",
        "TX_EXEC",
        "TX_FINL",
        "CONTEXT_NUMBER",
        "CONTEXT_NUMBER_NEW",
        "PROGRAM_COUNTER",
        "PROGRAM_COUNTER_NEW",
        "HEIGHT",
        "HEIGHT_NEW",
        "GAS_EXPECTED",
        "GAS_ACTUAL",
        "GAS_COST",
        "GAS_NEXT",
        "REFUND_COUNTER",
        "REFUND_COUNTER_NEW",
        "LOG_INFO_STAMP",
        "EXCEPTION",
        "CONTEXT_WILL_REVERT",
        "CONTEXT_REVERT_STAMP",
        "COUNTER_TLI",
        "COUNTER_NSR",
    ];

    /// Column values of the `row`-th row of a section with `rows` rows,
    /// given the revert stamp of its frame.
    pub fn values(&self, revert_stamp: Option<u32>, row: usize, rows: usize) -> Vec<U256> {
        let phase = |p: HubProcessingPhase| U256::from((self.phase == p) as u8);
        vec![
            U256::from(self.hub_stamp),
            U256::from(self.absolute_transaction_number),
            U256::from(self.relative_block_number),
            phase(HubProcessingPhase::TxSkip),
            phase(HubProcessingPhase::TxWarm),
            phase(HubProcessingPhase::TxInit),
            phase(HubProcessingPhase::TxExec),
            phase(HubProcessingPhase::TxFinl),
            U256::from(self.context_number),
            U256::from(self.context_number_new),
            U256::from(self.pc),
            U256::from(self.pc_new),
            U256::from(self.height),
            U256::from(self.height_new),
            U256::from(self.gas_expected),
            U256::from(self.gas_actual),
            U256::from(self.gas_cost),
            U256::from(self.gas_next),
            U256::from(self.refund),
            U256::from(self.refund_new),
            U256::from(self.log_stamp),
            U256::from(self.exception as u8),
            U256::from(revert_stamp.is_some() as u8),
            U256::from(revert_stamp.unwrap_or_default()),
            U256::from(row),
            U256::from(rows - row - 1),
        ]
    }
}

const_assert_eq!(CommonValues::COLUMNS.len(), 26);

/// The fragments produced by one opcode or transaction-level event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceSection {
    pub kind: SectionKind,
    pub common: CommonValues,
    pub fragments: Vec<Fragment>,
    pub max_rows: usize,
}

impl TraceSection {
    pub fn new(kind: SectionKind, common: CommonValues, max_rows: usize) -> Self {
        Self {
            kind,
            common,
            fragments: Vec::with_capacity(max_rows),
            max_rows,
        }
    }

    /// Appends a fragment, failing if the section would exceed its budget.
    pub fn add_fragment(&mut self, fragment: impl Into<Fragment>) -> TracerResult<usize> {
        if self.fragments.len() >= self.max_rows {
            return Err(TracerError::RowBudgetExceeded {
                stamp: self.common.hub_stamp,
                max_rows: self.max_rows,
            });
        }
        self.fragments.push(fragment.into());
        Ok(self.fragments.len() - 1)
    }

    pub fn line_count(&self) -> usize {
        self.fragments.len()
    }

    pub fn stack_fragments_mut(&mut self) -> impl Iterator<Item = &mut StackFragment> {
        self.fragments.iter_mut().filter_map(Fragment::as_stack_mut)
    }

    /// Fills the pushed value of the opcode once it is known.
    pub fn unlatch_stack(&mut self, value: U256) {
        for fragment in self.stack_fragments_mut() {
            fragment.line.set_result(value);
        }
    }

    /// The last account fragment of `address`, searching backwards from
    /// fragment `before`.
    pub fn latest_account(
        &self,
        address: &Address,
        before: usize,
    ) -> Option<&AccountFragment> {
        self.fragments[..before.min(self.fragments.len())]
            .iter()
            .rev()
            .filter_map(Fragment::as_account)
            .find(|f| f.address() == *address)
    }
}

/// The opcode being traced, with everything computed before it executes.
pub(crate) struct Instruction<'a> {
    pub frame: &'a HostFrame,
    pub world: &'a dyn WorldView,
    pub opcode: OpCode,
    pub exceptions: Exceptions,
    pub aborts: Aborts,
    pub projection: GasProjection,
    pub signals: Signals,
    pub stamp: u32,
    /// Reference the section gets once pushed.
    pub section: SectionRef,
}

impl Instruction<'_> {
    pub fn exceptional(&self) -> bool {
        self.exceptions.any()
    }

    pub fn item(&self, i: usize) -> U256 {
        self.frame.stack_item(i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callstack::CallStack;
    use crate::fragment::{ContextFragment, ImcFragment};

    #[test]
    fn every_family_maps_to_a_section() {
        for byte in 0..=u8::MAX {
            let opcode = OpCode::from_byte(byte);
            let kind = section_kind(opcode, Exceptions::empty());
            assert!(kind.is_instruction(), "{opcode:?}");
            if opcode == OpCode::Invalid {
                assert_eq!(kind, SectionKind::EarlyException);
            }
        }
        assert_eq!(
            section_kind(OpCode::Call, Exceptions::STACK_UNDERFLOW),
            SectionKind::EarlyException
        );
        assert_eq!(
            section_kind(OpCode::Call, Exceptions::OUT_OF_GAS),
            SectionKind::Call
        );
        assert_eq!(
            section_kind(OpCode::CallDataLoad, Exceptions::empty()),
            SectionKind::CallDataLoad
        );
    }

    #[test]
    fn return_budget_depends_on_the_exception() {
        let rows = OpCode::Return.data().number_of_stack_rows();
        assert_eq!(SectionKind::Return.max_rows(rows, true), rows + 4);
        assert_eq!(SectionKind::Return.max_rows(rows, false), rows + 7);
    }

    #[test]
    fn fragments_beyond_the_budget_are_rejected() {
        let callstack = CallStack::new();
        let mut section = TraceSection::new(SectionKind::StackRam, CommonValues::default(), 2);
        section.add_fragment(ImcFragment::empty()).unwrap();
        section
            .add_fragment(ContextFragment::read_current(&callstack))
            .unwrap();
        assert!(matches!(
            section.add_fragment(ImcFragment::empty()),
            Err(TracerError::RowBudgetExceeded { max_rows: 2, .. })
        ));
    }
}
