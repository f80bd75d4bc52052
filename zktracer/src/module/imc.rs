//! Modules called from the hub's inter-module communication (IMC)
//! fragments: memory expansion, out-of-bounds checks, memory management,
//! stipends, exponent costs and gas.

use ethereum_types::U256;

use super::{hi_lo_columns, ModuleOperation, OperationModule, LLARGE};
use crate::gas::{exponent_byte_len, MemoryExpansion, MemoryRegion};
use crate::opcode::OpCode;
use crate::precompile::Precompile;

/// A memory expansion check.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MxpCall {
    pub stamp: u32,
    pub opcode: OpCode,
    pub regions: Vec<MemoryRegion>,
    pub expansion: MemoryExpansion,
}

impl MxpCall {
    pub fn new(stamp: u32, opcode: OpCode, regions: Vec<MemoryRegion>, expansion: MemoryExpansion) -> Self {
        Self {
            stamp,
            opcode,
            regions,
            expansion,
        }
    }

    /// Whether the call needs no byte decomposition: `MSIZE`, or only empty
    /// regions.
    fn is_trivial(&self) -> bool {
        self.opcode == OpCode::MSize
            || (!self.expansion.mxpx && self.regions.iter().all(|r| r.size.is_zero()))
    }
}

impl ModuleOperation for MxpCall {
    const MODULE: &'static str = "MXP";
    const COLUMNS: &'static [&'static str] = &["INST", "MXPX", "WORDS", "WORDS_NEW", "GAS_MXP"];

    fn line_count(&self) -> usize {
        if self.is_trivial() {
            1
        } else {
            LLARGE
        }
    }

    fn columns(&self) -> Vec<U256> {
        vec![
            U256::from(self.opcode.byte()),
            U256::from(self.expansion.mxpx as u8),
            U256::from(self.expansion.words_before),
            U256::from(self.expansion.words_after),
            U256::from(self.expansion.cost),
        ]
    }
}

pub type Mxp = OperationModule<MxpCall>;

/// Out-of-bounds checks, one variant per kind of check.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum OobCall {
    Jump {
        destination: U256,
        code_size: usize,
    },
    JumpI {
        destination: U256,
        condition: U256,
        code_size: usize,
    },
    CallDataLoad {
        offset: U256,
        call_data_size: usize,
    },
    ReturnDataCopy {
        offset: U256,
        size: U256,
        return_data_size: usize,
    },
    Sstore {
        gas: u64,
    },
    /// Code size check of a `RETURN` from a deployment.
    Deployment {
        code_size: U256,
    },
    /// Value check of a `CALL` in a static context.
    XCall {
        value: U256,
    },
    Call {
        value: U256,
        balance: U256,
        call_stack_depth: usize,
    },
    Create {
        value: U256,
        balance: U256,
        nonce: u64,
        has_code: bool,
        call_stack_depth: usize,
    },
    /// Gas and input size check of a call to a precompile.
    Precompile {
        precompile: Precompile,
        call_gas: u64,
        call_data_size: usize,
    },
}

impl OobCall {
    pub fn id(&self) -> u8 {
        match self {
            Self::Jump { .. } => 0x56,
            Self::JumpI { .. } => 0x57,
            Self::CallDataLoad { .. } => 0x35,
            Self::ReturnDataCopy { .. } => 0x3e,
            Self::Sstore { .. } => 0x55,
            Self::Deployment { .. } => 0xf3,
            Self::XCall { .. } => 0xcc,
            Self::Call { .. } => 0xca,
            Self::Create { .. } => 0xce,
            Self::Precompile { precompile, .. } => *precompile as u8,
        }
    }

    /// Whether a `CALLDATALOAD` reads past the end of the call data.
    pub fn call_data_out_of_bounds(offset: U256, call_data_size: usize) -> bool {
        offset >= U256::from(call_data_size)
    }

    fn arguments(&self) -> [U256; 3] {
        match *self {
            Self::Jump {
                destination,
                code_size,
            } => [destination, U256::from(code_size), U256::zero()],
            Self::JumpI {
                destination,
                condition,
                code_size,
            } => [destination, condition, U256::from(code_size)],
            Self::CallDataLoad {
                offset,
                call_data_size,
            } => [offset, U256::from(call_data_size), U256::zero()],
            Self::ReturnDataCopy {
                offset,
                size,
                return_data_size,
            } => [offset, size, U256::from(return_data_size)],
            Self::Sstore { gas } => [U256::from(gas), U256::zero(), U256::zero()],
            Self::Deployment { code_size } => [code_size, U256::zero(), U256::zero()],
            Self::XCall { value } => [value, U256::zero(), U256::zero()],
            Self::Call {
                value,
                balance,
                call_stack_depth,
            } => [value, balance, U256::from(call_stack_depth)],
            Self::Create {
                value,
                balance,
                nonce,
                ..
            } => [value, balance, U256::from(nonce)],
            Self::Precompile {
                call_gas,
                call_data_size,
                ..
            } => [U256::from(call_gas), U256::from(call_data_size), U256::zero()],
        }
    }
}

impl ModuleOperation for OobCall {
    const MODULE: &'static str = "OOB";
    const COLUMNS: &'static [&'static str] = &[
        "OOB_INST", "DATA_1_HI", "DATA_1_LO", "DATA_2_HI", "DATA_2_LO", "DATA_3_HI", "DATA_3_LO",
    ];

    fn line_count(&self) -> usize {
        match self {
            Self::Jump { .. } => 2,
            Self::JumpI { .. } => 3,
            Self::CallDataLoad { .. } => 2,
            Self::ReturnDataCopy { .. } => 3,
            Self::Sstore { .. } => 2,
            Self::Deployment { .. } => 2,
            Self::XCall { .. } => 2,
            Self::Call { .. } => 3,
            Self::Create { .. } => 4,
            Self::Precompile { .. } => 4,
        }
    }

    fn columns(&self) -> Vec<U256> {
        let mut columns = vec![U256::from(self.id())];
        for word in self.arguments() {
            columns.extend(hi_lo_columns(word));
        }
        columns
    }
}

pub type Oob = OperationModule<OobCall>;

/// Memory management instructions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MmuInstruction {
    MLoad,
    MStore,
    MStore8,
    /// Reads call data, possibly from the transaction call data context.
    CallDataLoad,
    /// Copies into RAM: `CALLDATACOPY`, `CODECOPY`, `EXTCODECOPY` and
    /// `RETURNDATACOPY`.
    AnyToRamWithPadding,
    /// Hashes a RAM slice.
    RamToExoWithPadding,
    /// Writes log data.
    LogData,
    /// Reads the first byte of deployed code.
    InvalidCodePrefix,
    /// Copies the return data of a child into the caller's RAM.
    RamToRamSansPadding,
    /// Copies transaction call data into its pseudo-context.
    ExoToRamTransplants,
}

impl MmuInstruction {
    pub fn id(self) -> u8 {
        self as u8 + 1
    }
}

/// A memory management request.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MmuCall {
    pub stamp: u32,
    pub instruction: MmuInstruction,
    pub source_id: u32,
    pub target_id: u32,
    pub source_offset: U256,
    pub target_offset: U256,
    pub size: u64,
}

impl MmuCall {
    pub fn new(stamp: u32, instruction: MmuInstruction, size: u64) -> Self {
        Self {
            stamp,
            instruction,
            source_id: 0,
            target_id: 0,
            source_offset: U256::zero(),
            target_offset: U256::zero(),
            size,
        }
    }

    pub fn source(mut self, id: u32, offset: U256) -> Self {
        self.source_id = id;
        self.source_offset = offset;
        self
    }

    pub fn target(mut self, id: u32, offset: U256) -> Self {
        self.target_id = id;
        self.target_offset = offset;
        self
    }
}

impl ModuleOperation for MmuCall {
    const MODULE: &'static str = "MMU";
    const COLUMNS: &'static [&'static str] = &[
        "INST",
        "SRC_ID",
        "TGT_ID",
        "SRC_OFFSET_HI",
        "SRC_OFFSET_LO",
        "TGT_OFFSET_HI",
        "TGT_OFFSET_LO",
        "SIZE",
    ];

    /// One preprocessing row plus one row per 16-byte limb.
    fn line_count(&self) -> usize {
        1 + self.size.div_ceil(16) as usize
    }

    fn columns(&self) -> Vec<U256> {
        let mut columns = vec![
            U256::from(self.instruction.id()),
            U256::from(self.source_id),
            U256::from(self.target_id),
        ];
        columns.extend(hi_lo_columns(self.source_offset));
        columns.extend(hi_lo_columns(self.target_offset));
        columns.push(U256::from(self.size));
        columns
    }
}

pub type Mmu = OperationModule<MmuCall>;

/// Gas and stipend computation of a `CALL` or `CREATE`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StpCall {
    pub opcode: OpCode,
    pub gas_requested: U256,
    pub value: U256,
    pub exists: bool,
    pub warm: bool,
    pub out_of_gas: bool,
    pub upfront_gas_cost: u64,
    pub gas_paid_out_of_pocket: u64,
    pub stipend: u64,
}

impl ModuleOperation for StpCall {
    const MODULE: &'static str = "STP";
    const COLUMNS: &'static [&'static str] = &[
        "INST",
        "GAS_HI",
        "GAS_LO",
        "VAL_HI",
        "VAL_LO",
        "EXISTS",
        "WARM",
        "OOGX",
        "GAS_UPFRONT",
        "GAS_OOPKT",
        "GAS_STIPEND",
    ];

    fn line_count(&self) -> usize {
        if self.opcode.is_create() {
            3
        } else {
            4
        }
    }

    fn columns(&self) -> Vec<U256> {
        let mut columns = vec![U256::from(self.opcode.byte())];
        columns.extend(hi_lo_columns(self.gas_requested));
        columns.extend(hi_lo_columns(self.value));
        columns.extend([
            U256::from(self.exists as u8),
            U256::from(self.warm as u8),
            U256::from(self.out_of_gas as u8),
            U256::from(self.upfront_gas_cost),
            U256::from(self.gas_paid_out_of_pocket),
            U256::from(self.stipend),
        ]);
        columns
    }
}

pub type Stp = OperationModule<StpCall>;

/// Exponent byte-length computation of an `EXP`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ExpCall {
    pub exponent: U256,
}

impl ExpCall {
    pub fn dynamic_cost(&self) -> u64 {
        zktracer_common::gas::G_EXP_BYTE * exponent_byte_len(self.exponent)
    }
}

impl ModuleOperation for ExpCall {
    const MODULE: &'static str = "EXP";
    const COLUMNS: &'static [&'static str] = &["EXPONENT_HI", "EXPONENT_LO", "DYN_COST"];

    fn line_count(&self) -> usize {
        if self.exponent.is_zero() {
            1
        } else {
            LLARGE
        }
    }

    fn columns(&self) -> Vec<U256> {
        let mut columns = hi_lo_columns(self.exponent).to_vec();
        columns.push(U256::from(self.dynamic_cost()));
        columns
    }
}

pub type Exp = OperationModule<ExpCall>;

/// Gas check of one opcode.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GasOperation {
    pub stamp: u32,
    pub gas_actual: u64,
    pub gas_cost: u64,
    pub out_of_gas: bool,
}

impl ModuleOperation for GasOperation {
    const MODULE: &'static str = "GAS";
    const COLUMNS: &'static [&'static str] = &["GAS_ACTUAL", "GAS_COST", "OOGX"];

    fn line_count(&self) -> usize {
        1
    }

    fn columns(&self) -> Vec<U256> {
        vec![
            U256::from(self.gas_actual),
            U256::from(self.gas_cost),
            U256::from(self.out_of_gas as u8),
        ]
    }
}

pub type Gas = OperationModule<GasOperation>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::Module;

    #[test]
    fn mmu_rows_follow_limbs() {
        assert_eq!(MmuCall::new(1, MmuInstruction::MLoad, 32).line_count(), 3);
        assert_eq!(MmuCall::new(1, MmuInstruction::MStore8, 1).line_count(), 2);
        assert_eq!(
            MmuCall::new(1, MmuInstruction::RamToExoWithPadding, 0).line_count(),
            1
        );
    }

    #[test]
    fn mxp_of_msize_is_one_line() {
        let call = MxpCall::new(1, OpCode::MSize, vec![], MemoryExpansion::default());
        assert_eq!(call.line_count(), 1);
        let call = MxpCall::new(
            2,
            OpCode::MLoad,
            vec![MemoryRegion {
                offset: U256::zero(),
                size: U256::from(32),
            }],
            MemoryExpansion::default(),
        );
        assert_eq!(call.line_count(), LLARGE);
    }

    #[test]
    fn gas_operations_are_kept_per_stamp() {
        let mut gas = Gas::new();
        for stamp in 1..=3 {
            gas.add(GasOperation {
                stamp,
                gas_actual: 100,
                gas_cost: 3,
                out_of_gas: false,
            });
        }
        assert_eq!(gas.line_count(), 3);
    }

    #[test]
    fn exp_cost_counts_exponent_bytes() {
        let call = ExpCall {
            exponent: U256::from(0x1_0000),
        };
        assert_eq!(call.dynamic_cost(), 3 * 50);
    }
}
