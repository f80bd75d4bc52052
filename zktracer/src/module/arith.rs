//! Arithmetic and comparison modules.

use ethereum_types::{U256, U512};

use super::{hi_lo_columns, ModuleOperation, OperationModule, LLARGE, MMEDIUM};
use crate::opcode::OpCode;

fn opcode_column(opcode: OpCode) -> U256 {
    U256::from(opcode.byte())
}

fn binary_columns(opcode: OpCode, arg1: U256, arg2: U256, result: U256) -> Vec<U256> {
    let mut columns = vec![opcode_column(opcode)];
    columns.extend(hi_lo_columns(arg1));
    columns.extend(hi_lo_columns(arg2));
    columns.extend(hi_lo_columns(result));
    columns
}

const BINARY_COLUMNS: &[&str] = &[
    "INST", "ARG_1_HI", "ARG_1_LO", "ARG_2_HI", "ARG_2_LO", "RES_HI", "RES_LO",
];

/// `ADD` and `SUB`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AddOperation {
    pub opcode: OpCode,
    pub arg1: U256,
    pub arg2: U256,
}

impl AddOperation {
    pub fn result(&self) -> U256 {
        match self.opcode {
            OpCode::Sub => self.arg1.overflowing_sub(self.arg2).0,
            _ => self.arg1.overflowing_add(self.arg2).0,
        }
    }
}

impl ModuleOperation for AddOperation {
    const MODULE: &'static str = "ADD";
    const COLUMNS: &'static [&'static str] = BINARY_COLUMNS;

    fn line_count(&self) -> usize {
        LLARGE
    }

    fn columns(&self) -> Vec<U256> {
        binary_columns(self.opcode, self.arg1, self.arg2, self.result())
    }
}

pub type Add = OperationModule<AddOperation>;

impl Add {
    pub fn call(&mut self, opcode: OpCode, arg1: U256, arg2: U256) {
        self.add(AddOperation { opcode, arg1, arg2 });
    }
}

/// Bitwise operations, `BYTE` and `SIGNEXTEND`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BinOperation {
    pub opcode: OpCode,
    pub arg1: U256,
    pub arg2: U256,
}

impl ModuleOperation for BinOperation {
    const MODULE: &'static str = "BIN";
    const COLUMNS: &'static [&'static str] = &["INST", "ARG_1_HI", "ARG_1_LO", "ARG_2_HI", "ARG_2_LO"];

    fn line_count(&self) -> usize {
        LLARGE
    }

    fn columns(&self) -> Vec<U256> {
        let mut columns = vec![opcode_column(self.opcode)];
        columns.extend(hi_lo_columns(self.arg1));
        columns.extend(hi_lo_columns(self.arg2));
        columns
    }
}

pub type Bin = OperationModule<BinOperation>;

impl Bin {
    pub fn call(&mut self, opcode: OpCode, arg1: U256, arg2: U256) {
        self.add(BinOperation { opcode, arg1, arg2 });
    }
}

/// `MUL`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MulOperation {
    pub arg1: U256,
    pub arg2: U256,
}

impl MulOperation {
    /// Multiplications by zero or one are settled on a single row.
    pub fn is_one_line(&self) -> bool {
        self.arg1 <= U256::one() || self.arg2 <= U256::one()
    }
}

impl ModuleOperation for MulOperation {
    const MODULE: &'static str = "MUL";
    const COLUMNS: &'static [&'static str] = BINARY_COLUMNS;

    fn line_count(&self) -> usize {
        if self.is_one_line() {
            1
        } else {
            MMEDIUM
        }
    }

    fn columns(&self) -> Vec<U256> {
        binary_columns(
            OpCode::Mul,
            self.arg1,
            self.arg2,
            self.arg1.overflowing_mul(self.arg2).0,
        )
    }
}

pub type Mul = OperationModule<MulOperation>;

impl Mul {
    pub fn call(&mut self, arg1: U256, arg2: U256) {
        self.add(MulOperation { arg1, arg2 });
    }
}

/// Unsigned and signed division and remainder.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ModOperation {
    pub opcode: OpCode,
    pub arg1: U256,
    pub arg2: U256,
}

impl ModOperation {
    /// Division by zero yields zero and takes a single row.
    pub fn is_one_line(&self) -> bool {
        self.arg2.is_zero()
    }
}

impl ModuleOperation for ModOperation {
    const MODULE: &'static str = "MOD";
    const COLUMNS: &'static [&'static str] = &["INST", "ARG_1_HI", "ARG_1_LO", "ARG_2_HI", "ARG_2_LO"];

    fn line_count(&self) -> usize {
        if self.is_one_line() {
            1
        } else {
            MMEDIUM
        }
    }

    fn columns(&self) -> Vec<U256> {
        let mut columns = vec![opcode_column(self.opcode)];
        columns.extend(hi_lo_columns(self.arg1));
        columns.extend(hi_lo_columns(self.arg2));
        columns
    }
}

pub type Mod = OperationModule<ModOperation>;

impl Mod {
    pub fn call(&mut self, opcode: OpCode, arg1: U256, arg2: U256) {
        self.add(ModOperation { opcode, arg1, arg2 });
    }

    /// Unsigned division requested by another module, outside of any
    /// opcode.
    pub fn call_div(&mut self, arg1: U256, arg2: U256) -> U256 {
        self.call(OpCode::Div, arg1, arg2);
        arg1.checked_div(arg2).unwrap_or_default()
    }

    /// Unsigned remainder requested by another module.
    pub fn call_mod(&mut self, arg1: U256, arg2: U256) -> U256 {
        self.call(OpCode::Mod, arg1, arg2);
        arg1.checked_rem(arg2).unwrap_or_default()
    }
}

/// `ADDMOD` and `MULMOD`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ExtOperation {
    pub opcode: OpCode,
    pub arg1: U256,
    pub arg2: U256,
    pub arg3: U256,
}

impl ExtOperation {
    pub fn new(opcode: OpCode, arg1: U256, arg2: U256, arg3: U256) -> Self {
        Self {
            opcode,
            arg1,
            arg2,
            arg3,
        }
    }

    /// A `MULMOD` with a zero factor, or any modulus below two, takes a
    /// single row.
    pub fn is_one_line(&self) -> bool {
        let mulmod = self.opcode == OpCode::MulMod;
        (mulmod && self.arg1.is_zero())
            || (mulmod && self.arg2.is_zero())
            || self.arg3 <= U256::one()
    }

    pub fn result(&self) -> U256 {
        if self.arg3.is_zero() {
            return U256::zero();
        }
        let modulus = U512::from(self.arg3);
        let value = match self.opcode {
            OpCode::MulMod => U512::from(self.arg1) * U512::from(self.arg2),
            _ => U512::from(self.arg1) + U512::from(self.arg2),
        };
        // The remainder is below the 256-bit modulus.
        U256::try_from(value % modulus).unwrap_or_default()
    }
}

impl ModuleOperation for ExtOperation {
    const MODULE: &'static str = "EXT";
    const COLUMNS: &'static [&'static str] = &[
        "INST", "ARG_1_HI", "ARG_1_LO", "ARG_2_HI", "ARG_2_LO", "ARG_3_HI", "ARG_3_LO", "RES_HI",
        "RES_LO",
    ];

    fn line_count(&self) -> usize {
        if self.is_one_line() {
            1
        } else {
            MMEDIUM
        }
    }

    fn columns(&self) -> Vec<U256> {
        let mut columns = vec![opcode_column(self.opcode)];
        for word in [self.arg1, self.arg2, self.arg3, self.result()] {
            columns.extend(hi_lo_columns(word));
        }
        columns
    }
}

pub type Ext = OperationModule<ExtOperation>;

impl Ext {
    pub fn call(&mut self, opcode: OpCode, arg1: U256, arg2: U256, arg3: U256) {
        self.add(ExtOperation::new(opcode, arg1, arg2, arg3));
    }
}

/// Shifts.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ShfOperation {
    pub opcode: OpCode,
    pub arg1: U256,
    pub arg2: U256,
}

impl ModuleOperation for ShfOperation {
    const MODULE: &'static str = "SHF";
    const COLUMNS: &'static [&'static str] = &["INST", "ARG_1_HI", "ARG_1_LO", "ARG_2_HI", "ARG_2_LO"];

    fn line_count(&self) -> usize {
        LLARGE
    }

    fn columns(&self) -> Vec<U256> {
        let mut columns = vec![opcode_column(self.opcode)];
        columns.extend(hi_lo_columns(self.arg1));
        columns.extend(hi_lo_columns(self.arg2));
        columns
    }
}

pub type Shf = OperationModule<ShfOperation>;

impl Shf {
    pub fn call(&mut self, opcode: OpCode, arg1: U256, arg2: U256) {
        self.add(ShfOperation { opcode, arg1, arg2 });
    }
}

/// Word comparisons.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct WcpOperation {
    pub opcode: OpCode,
    pub arg1: U256,
    pub arg2: U256,
}

impl WcpOperation {
    /// Equality tests need no byte decomposition.
    pub fn is_one_line(&self) -> bool {
        matches!(self.opcode, OpCode::Eq | OpCode::IsZero)
    }
}

impl ModuleOperation for WcpOperation {
    const MODULE: &'static str = "WCP";
    const COLUMNS: &'static [&'static str] = &["INST", "ARG_1_HI", "ARG_1_LO", "ARG_2_HI", "ARG_2_LO"];

    fn line_count(&self) -> usize {
        if self.is_one_line() {
            1
        } else {
            LLARGE
        }
    }

    fn columns(&self) -> Vec<U256> {
        let mut columns = vec![opcode_column(self.opcode)];
        columns.extend(hi_lo_columns(self.arg1));
        columns.extend(hi_lo_columns(self.arg2));
        columns
    }
}

pub type Wcp = OperationModule<WcpOperation>;

impl Wcp {
    pub fn call(&mut self, opcode: OpCode, arg1: U256, arg2: U256) {
        self.add(WcpOperation { opcode, arg1, arg2 });
    }

    pub fn call_lt(&mut self, arg1: U256, arg2: U256) -> bool {
        self.call(OpCode::Lt, arg1, arg2);
        arg1 < arg2
    }

    pub fn call_gt(&mut self, arg1: U256, arg2: U256) -> bool {
        self.call(OpCode::Gt, arg1, arg2);
        arg1 > arg2
    }

    pub fn call_eq(&mut self, arg1: U256, arg2: U256) -> bool {
        self.call(OpCode::Eq, arg1, arg2);
        arg1 == arg2
    }

    pub fn call_iszero(&mut self, arg: U256) -> bool {
        self.call(OpCode::IsZero, arg, U256::zero());
        arg.is_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::Module;

    #[test]
    fn ext_one_line_rule() {
        let one_line = |opcode, a: u64, b: u64, c: U256| {
            ExtOperation::new(opcode, U256::from(a), U256::from(b), c).line_count()
        };
        assert_eq!(one_line(OpCode::MulMod, 0, 5, U256::MAX), 1);
        assert_eq!(one_line(OpCode::MulMod, 5, 0, U256::MAX), 1);
        assert_eq!(one_line(OpCode::AddMod, 0, 5, U256::MAX), MMEDIUM);
        assert_eq!(one_line(OpCode::AddMod, 7, 5, U256::one()), 1);
        assert_eq!(one_line(OpCode::MulMod, 7, 5, U256::from(2)), MMEDIUM);
    }

    #[test]
    fn ext_results_do_not_overflow() {
        let op = ExtOperation::new(OpCode::MulMod, U256::MAX, U256::MAX, U256::from(7));
        // (2^256 - 1) = 1 mod 7 since 2^3 = 1 mod 7 and 256 = 1 mod 3.
        assert_eq!(op.result(), U256::from(1));
        let op = ExtOperation::new(OpCode::AddMod, U256::MAX, U256::one(), U256::MAX);
        assert_eq!(op.result(), U256::one());
    }

    #[test]
    fn mod_by_zero_is_one_line() {
        let mut module = Mod::new();
        assert_eq!(module.call_div(U256::from(10), U256::zero()), U256::zero());
        assert_eq!(module.line_count(), 1);
        assert_eq!(module.call_mod(U256::from(10), U256::from(4)), U256::from(2));
        assert_eq!(module.line_count(), 1 + MMEDIUM);
    }

    #[test]
    fn wcp_equalities_are_one_line() {
        let mut wcp = Wcp::new();
        assert!(wcp.call_eq(U256::one(), U256::one()));
        assert!(wcp.call_iszero(U256::zero()));
        assert_eq!(wcp.line_count(), 2);
        assert!(wcp.call_lt(U256::one(), U256::from(2)));
        assert_eq!(wcp.line_count(), 2 + LLARGE);
    }

    #[test]
    fn sub_wraps_around() {
        let op = AddOperation {
            opcode: OpCode::Sub,
            arg1: U256::zero(),
            arg2: U256::one(),
        };
        assert_eq!(op.result(), U256::MAX);
    }
}
