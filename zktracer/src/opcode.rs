//! Static properties of EVM opcodes: instruction family, stack behavior and
//! static gas.

use serde::{Deserialize, Serialize};
use zktracer_common::gas::*;

/// An EVM opcode, as understood by the tracer.
///
/// Any byte that does not decode to a supported instruction is mapped to
/// [`OpCode::Invalid`].
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum OpCode {
    #[default]
    Stop,
    Add,
    Mul,
    Sub,
    Div,
    Sdiv,
    Mod,
    Smod,
    AddMod,
    MulMod,
    Exp,
    SignExtend,
    Lt,
    Gt,
    Slt,
    Sgt,
    Eq,
    IsZero,
    And,
    Or,
    Xor,
    Not,
    Byte,
    Shl,
    Shr,
    Sar,
    Keccak256,
    Address,
    Balance,
    Origin,
    Caller,
    CallValue,
    CallDataLoad,
    CallDataSize,
    CallDataCopy,
    CodeSize,
    CodeCopy,
    GasPrice,
    ExtCodeSize,
    ExtCodeCopy,
    ReturnDataSize,
    ReturnDataCopy,
    ExtCodeHash,
    BlockHash,
    Coinbase,
    Timestamp,
    Number,
    PrevRandao,
    GasLimit,
    ChainId,
    SelfBalance,
    BaseFee,
    Pop,
    MLoad,
    MStore,
    MStore8,
    SLoad,
    SStore,
    Jump,
    JumpI,
    Pc,
    MSize,
    Gas,
    JumpDest,
    Push0,
    /// `PUSH1` to `PUSH32`, carrying the number of immediate bytes.
    Push(u8),
    /// `DUP1` to `DUP16`.
    Dup(u8),
    /// `SWAP1` to `SWAP16`.
    Swap(u8),
    /// `LOG0` to `LOG4`, carrying the number of topics.
    Log(u8),
    Create,
    Call,
    CallCode,
    Return,
    DelegateCall,
    Create2,
    StaticCall,
    Revert,
    Invalid,
    SelfDestruct,
}

/// Instruction families, deciding which trace section an opcode produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InstructionFamily {
    Add,
    Mod,
    Mul,
    Ext,
    Wcp,
    Bin,
    Shf,
    Kec,
    Context,
    Account,
    Copy,
    Transaction,
    Batch,
    StackRam,
    Storage,
    Jump,
    MachineState,
    PushPop,
    Dup,
    Swap,
    Log,
    Create,
    Call,
    Halt,
    Invalid,
}

/// How an opcode lays out its stack items over stack rows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StackPattern {
    /// Pops and pushes plain items.
    Plain,
    /// Reads the n-th item and pushes a copy.
    Dup,
    /// Exchanges the top with the n-th item below it.
    Swap,
}

/// Static data attached to an opcode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OpCodeData {
    pub opcode: OpCode,
    pub family: InstructionFamily,
    pub pattern: StackPattern,
    /// Number of items that must be present on the stack.
    pub delta: usize,
    /// Number of items on top of the stack after execution, counted from the
    /// `delta` consumed ones.
    pub alpha: usize,
    pub static_gas: u64,
}

impl OpCodeData {
    /// Number of stack items mentioned by the stack rows of this opcode.
    pub const fn stack_items(&self) -> usize {
        match self.pattern {
            StackPattern::Plain => self.delta + self.alpha,
            StackPattern::Dup => 2,
            StackPattern::Swap => 4,
        }
    }

    /// Number of stack rows of the opcode; each row holds up to four items.
    pub const fn number_of_stack_rows(&self) -> usize {
        let rows = self.stack_items().div_ceil(4);
        if rows == 0 {
            1
        } else {
            rows
        }
    }
}

impl OpCode {
    /// Decodes a raw byte.
    pub const fn from_byte(byte: u8) -> Self {
        match byte {
            0x00 => Self::Stop,
            0x01 => Self::Add,
            0x02 => Self::Mul,
            0x03 => Self::Sub,
            0x04 => Self::Div,
            0x05 => Self::Sdiv,
            0x06 => Self::Mod,
            0x07 => Self::Smod,
            0x08 => Self::AddMod,
            0x09 => Self::MulMod,
            0x0a => Self::Exp,
            0x0b => Self::SignExtend,
            0x10 => Self::Lt,
            0x11 => Self::Gt,
            0x12 => Self::Slt,
            0x13 => Self::Sgt,
            0x14 => Self::Eq,
            0x15 => Self::IsZero,
            0x16 => Self::And,
            0x17 => Self::Or,
            0x18 => Self::Xor,
            0x19 => Self::Not,
            0x1a => Self::Byte,
            0x1b => Self::Shl,
            0x1c => Self::Shr,
            0x1d => Self::Sar,
            0x20 => Self::Keccak256,
            0x30 => Self::Address,
            0x31 => Self::Balance,
            0x32 => Self::Origin,
            0x33 => Self::Caller,
            0x34 => Self::CallValue,
            0x35 => Self::CallDataLoad,
            0x36 => Self::CallDataSize,
            0x37 => Self::CallDataCopy,
            0x38 => Self::CodeSize,
            0x39 => Self::CodeCopy,
            0x3a => Self::GasPrice,
            0x3b => Self::ExtCodeSize,
            0x3c => Self::ExtCodeCopy,
            0x3d => Self::ReturnDataSize,
            0x3e => Self::ReturnDataCopy,
            0x3f => Self::ExtCodeHash,
            0x40 => Self::BlockHash,
            0x41 => Self::Coinbase,
            0x42 => Self::Timestamp,
            0x43 => Self::Number,
            0x44 => Self::PrevRandao,
            0x45 => Self::GasLimit,
            0x46 => Self::ChainId,
            0x47 => Self::SelfBalance,
            0x48 => Self::BaseFee,
            0x50 => Self::Pop,
            0x51 => Self::MLoad,
            0x52 => Self::MStore,
            0x53 => Self::MStore8,
            0x54 => Self::SLoad,
            0x55 => Self::SStore,
            0x56 => Self::Jump,
            0x57 => Self::JumpI,
            0x58 => Self::Pc,
            0x59 => Self::MSize,
            0x5a => Self::Gas,
            0x5b => Self::JumpDest,
            0x5f => Self::Push0,
            0x60..=0x7f => Self::Push(byte - 0x5f),
            0x80..=0x8f => Self::Dup(byte - 0x7f),
            0x90..=0x9f => Self::Swap(byte - 0x8f),
            0xa0..=0xa4 => Self::Log(byte - 0xa0),
            0xf0 => Self::Create,
            0xf1 => Self::Call,
            0xf2 => Self::CallCode,
            0xf3 => Self::Return,
            0xf4 => Self::DelegateCall,
            0xf5 => Self::Create2,
            0xfa => Self::StaticCall,
            0xfd => Self::Revert,
            0xff => Self::SelfDestruct,
            _ => Self::Invalid,
        }
    }

    /// The byte encoding of the opcode. [`OpCode::Invalid`] encodes as
    /// `0xfe`.
    pub const fn byte(self) -> u8 {
        match self {
            Self::Stop => 0x00,
            Self::Add => 0x01,
            Self::Mul => 0x02,
            Self::Sub => 0x03,
            Self::Div => 0x04,
            Self::Sdiv => 0x05,
            Self::Mod => 0x06,
            Self::Smod => 0x07,
            Self::AddMod => 0x08,
            Self::MulMod => 0x09,
            Self::Exp => 0x0a,
            Self::SignExtend => 0x0b,
            Self::Lt => 0x10,
            Self::Gt => 0x11,
            Self::Slt => 0x12,
            Self::Sgt => 0x13,
            Self::Eq => 0x14,
            Self::IsZero => 0x15,
            Self::And => 0x16,
            Self::Or => 0x17,
            Self::Xor => 0x18,
            Self::Not => 0x19,
            Self::Byte => 0x1a,
            Self::Shl => 0x1b,
            Self::Shr => 0x1c,
            Self::Sar => 0x1d,
            Self::Keccak256 => 0x20,
            Self::Address => 0x30,
            Self::Balance => 0x31,
            Self::Origin => 0x32,
            Self::Caller => 0x33,
            Self::CallValue => 0x34,
            Self::CallDataLoad => 0x35,
            Self::CallDataSize => 0x36,
            Self::CallDataCopy => 0x37,
            Self::CodeSize => 0x38,
            Self::CodeCopy => 0x39,
            Self::GasPrice => 0x3a,
            Self::ExtCodeSize => 0x3b,
            Self::ExtCodeCopy => 0x3c,
            Self::ReturnDataSize => 0x3d,
            Self::ReturnDataCopy => 0x3e,
            Self::ExtCodeHash => 0x3f,
            Self::BlockHash => 0x40,
            Self::Coinbase => 0x41,
            Self::Timestamp => 0x42,
            Self::Number => 0x43,
            Self::PrevRandao => 0x44,
            Self::GasLimit => 0x45,
            Self::ChainId => 0x46,
            Self::SelfBalance => 0x47,
            Self::BaseFee => 0x48,
            Self::Pop => 0x50,
            Self::MLoad => 0x51,
            Self::MStore => 0x52,
            Self::MStore8 => 0x53,
            Self::SLoad => 0x54,
            Self::SStore => 0x55,
            Self::Jump => 0x56,
            Self::JumpI => 0x57,
            Self::Pc => 0x58,
            Self::MSize => 0x59,
            Self::Gas => 0x5a,
            Self::JumpDest => 0x5b,
            Self::Push0 => 0x5f,
            Self::Push(n) => 0x5f + n,
            Self::Dup(n) => 0x7f + n,
            Self::Swap(n) => 0x8f + n,
            Self::Log(n) => 0xa0 + n,
            Self::Create => 0xf0,
            Self::Call => 0xf1,
            Self::CallCode => 0xf2,
            Self::Return => 0xf3,
            Self::DelegateCall => 0xf4,
            Self::Create2 => 0xf5,
            Self::StaticCall => 0xfa,
            Self::Revert => 0xfd,
            Self::Invalid => 0xfe,
            Self::SelfDestruct => 0xff,
        }
    }

    pub const fn family(self) -> InstructionFamily {
        use InstructionFamily as F;
        match self {
            Self::Add | Self::Sub => F::Add,
            Self::Div | Self::Sdiv | Self::Mod | Self::Smod => F::Mod,
            Self::Mul | Self::Exp => F::Mul,
            Self::AddMod | Self::MulMod => F::Ext,
            Self::Lt | Self::Gt | Self::Slt | Self::Sgt | Self::Eq | Self::IsZero => F::Wcp,
            Self::And | Self::Or | Self::Xor | Self::Not | Self::Byte | Self::SignExtend => F::Bin,
            Self::Shl | Self::Shr | Self::Sar => F::Shf,
            Self::Keccak256 => F::Kec,
            Self::Address
            | Self::Caller
            | Self::CallValue
            | Self::CallDataSize
            | Self::CodeSize
            | Self::ReturnDataSize => F::Context,
            Self::Balance | Self::ExtCodeSize | Self::ExtCodeHash | Self::SelfBalance => {
                F::Account
            }
            Self::CallDataCopy | Self::CodeCopy | Self::ExtCodeCopy | Self::ReturnDataCopy => {
                F::Copy
            }
            Self::Origin | Self::GasPrice => F::Transaction,
            Self::BlockHash
            | Self::Coinbase
            | Self::Timestamp
            | Self::Number
            | Self::PrevRandao
            | Self::GasLimit
            | Self::ChainId
            | Self::BaseFee => F::Batch,
            Self::CallDataLoad | Self::MLoad | Self::MStore | Self::MStore8 => F::StackRam,
            Self::SLoad | Self::SStore => F::Storage,
            Self::Jump | Self::JumpI => F::Jump,
            Self::Pc | Self::MSize | Self::Gas | Self::JumpDest => F::MachineState,
            Self::Pop | Self::Push0 | Self::Push(_) => F::PushPop,
            Self::Dup(_) => F::Dup,
            Self::Swap(_) => F::Swap,
            Self::Log(_) => F::Log,
            Self::Create | Self::Create2 => F::Create,
            Self::Call | Self::CallCode | Self::DelegateCall | Self::StaticCall => F::Call,
            Self::Stop | Self::Return | Self::Revert | Self::SelfDestruct => F::Halt,
            Self::Invalid => F::Invalid,
        }
    }

    /// Items required on the stack and items left in their place.
    const fn delta_alpha(self) -> (usize, usize) {
        match self {
            Self::Stop | Self::JumpDest | Self::Invalid => (0, 0),
            Self::AddMod | Self::MulMod => (3, 1),
            Self::Not | Self::IsZero => (1, 1),
            Self::Add
            | Self::Mul
            | Self::Sub
            | Self::Div
            | Self::Sdiv
            | Self::Mod
            | Self::Smod
            | Self::Exp
            | Self::SignExtend
            | Self::Lt
            | Self::Gt
            | Self::Slt
            | Self::Sgt
            | Self::Eq
            | Self::And
            | Self::Or
            | Self::Xor
            | Self::Byte
            | Self::Shl
            | Self::Shr
            | Self::Sar
            | Self::Keccak256 => (2, 1),
            Self::Balance
            | Self::CallDataLoad
            | Self::ExtCodeSize
            | Self::ExtCodeHash
            | Self::BlockHash
            | Self::MLoad
            | Self::SLoad => (1, 1),
            Self::Address
            | Self::Origin
            | Self::Caller
            | Self::CallValue
            | Self::CallDataSize
            | Self::CodeSize
            | Self::GasPrice
            | Self::ReturnDataSize
            | Self::Coinbase
            | Self::Timestamp
            | Self::Number
            | Self::PrevRandao
            | Self::GasLimit
            | Self::ChainId
            | Self::SelfBalance
            | Self::BaseFee
            | Self::Pc
            | Self::MSize
            | Self::Gas
            | Self::Push0
            | Self::Push(_) => (0, 1),
            Self::CallDataCopy | Self::CodeCopy | Self::ReturnDataCopy => (3, 0),
            Self::ExtCodeCopy => (4, 0),
            Self::Pop | Self::Jump | Self::SelfDestruct => (1, 0),
            Self::MStore | Self::MStore8 | Self::SStore | Self::JumpI => (2, 0),
            Self::Return | Self::Revert => (2, 0),
            Self::Dup(n) => (n as usize, n as usize + 1),
            Self::Swap(n) => (n as usize + 1, n as usize + 1),
            Self::Log(n) => (2 + n as usize, 0),
            Self::Create => (3, 1),
            Self::Create2 => (4, 1),
            Self::Call | Self::CallCode => (7, 1),
            Self::DelegateCall | Self::StaticCall => (6, 1),
        }
    }

    /// Gas charged by the opcode regardless of its arguments. For account
    /// and storage accesses this is the warm access cost.
    pub const fn static_gas(self) -> u64 {
        match self {
            Self::Stop | Self::Return | Self::Revert | Self::Invalid | Self::SStore => G_ZERO,
            Self::JumpDest => G_JUMPDEST,
            Self::Address
            | Self::Origin
            | Self::Caller
            | Self::CallValue
            | Self::CallDataSize
            | Self::CodeSize
            | Self::GasPrice
            | Self::ReturnDataSize
            | Self::Coinbase
            | Self::Timestamp
            | Self::Number
            | Self::PrevRandao
            | Self::GasLimit
            | Self::ChainId
            | Self::BaseFee
            | Self::Pop
            | Self::Pc
            | Self::MSize
            | Self::Gas
            | Self::Push0 => G_BASE,
            Self::Add
            | Self::Sub
            | Self::Not
            | Self::Lt
            | Self::Gt
            | Self::Slt
            | Self::Sgt
            | Self::Eq
            | Self::IsZero
            | Self::And
            | Self::Or
            | Self::Xor
            | Self::Byte
            | Self::Shl
            | Self::Shr
            | Self::Sar
            | Self::CallDataLoad
            | Self::CallDataCopy
            | Self::CodeCopy
            | Self::ReturnDataCopy
            | Self::MLoad
            | Self::MStore
            | Self::MStore8
            | Self::Push(_)
            | Self::Dup(_)
            | Self::Swap(_) => G_VERY_LOW,
            Self::Mul
            | Self::Div
            | Self::Sdiv
            | Self::Mod
            | Self::Smod
            | Self::SignExtend
            | Self::SelfBalance => G_LOW,
            Self::AddMod | Self::MulMod | Self::Jump => G_MID,
            Self::Exp | Self::JumpI => G_HIGH,
            Self::Keccak256 => G_KECCAK256,
            Self::BlockHash => G_BLOCKHASH,
            Self::Balance
            | Self::ExtCodeSize
            | Self::ExtCodeCopy
            | Self::ExtCodeHash
            | Self::SLoad
            | Self::Call
            | Self::CallCode
            | Self::DelegateCall
            | Self::StaticCall => G_WARM_ACCESS,
            Self::Log(n) => G_LOG + G_LOG_TOPIC * n as u64,
            Self::Create | Self::Create2 => G_CREATE,
            Self::SelfDestruct => G_SELFDESTRUCT,
        }
    }

    pub const fn data(self) -> OpCodeData {
        let (delta, alpha) = self.delta_alpha();
        let pattern = match self {
            Self::Dup(_) => StackPattern::Dup,
            Self::Swap(_) => StackPattern::Swap,
            _ => StackPattern::Plain,
        };
        OpCodeData {
            opcode: self,
            family: self.family(),
            pattern,
            delta,
            alpha,
            static_gas: self.static_gas(),
        }
    }

    pub const fn is_call(self) -> bool {
        matches!(self.family(), InstructionFamily::Call)
    }

    pub const fn is_create(self) -> bool {
        matches!(self.family(), InstructionFamily::Create)
    }

    /// Whether the opcode may spawn a child context.
    pub const fn is_call_or_create(self) -> bool {
        self.is_call() || self.is_create()
    }

    /// Whether the opcode can never be executed inside a static context.
    pub const fn is_forbidden_in_static_context(self) -> bool {
        matches!(
            self,
            Self::SStore | Self::Log(_) | Self::Create | Self::Create2 | Self::SelfDestruct
        )
    }

    /// Whether the opcode may expand memory, and hence involves the MXP
    /// module.
    pub const fn may_expand_memory(self) -> bool {
        matches!(
            self,
            Self::Keccak256
                | Self::CallDataCopy
                | Self::CodeCopy
                | Self::ExtCodeCopy
                | Self::ReturnDataCopy
                | Self::MLoad
                | Self::MStore
                | Self::MStore8
                | Self::Log(_)
                | Self::Create
                | Self::Create2
                | Self::Call
                | Self::CallCode
                | Self::DelegateCall
                | Self::StaticCall
                | Self::Return
                | Self::Revert
        )
    }

    /// Whether the opcode takes an address argument that must be trimmed to
    /// 20 bytes.
    pub const fn trims_address(self) -> bool {
        matches!(
            self,
            Self::Balance
                | Self::ExtCodeSize
                | Self::ExtCodeCopy
                | Self::ExtCodeHash
                | Self::Call
                | Self::CallCode
                | Self::DelegateCall
                | Self::StaticCall
                | Self::SelfDestruct
        )
    }

    /// Returns the immediate bytes of a `PUSH` located at `pc` in `code`,
    /// zero padded past the end of the code.
    pub fn push_value(self, code: &[u8], pc: usize) -> Option<ethereum_types::U256> {
        let Self::Push(n) = self else {
            return None;
        };
        let n = n as usize;
        let mut bytes = vec![0u8; n];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = code.get(pc + 1 + i).copied().unwrap_or_default();
        }
        Some(ethereum_types::U256::from_big_endian(&bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoding_roundtrips_every_supported_byte() {
        for byte in 0..=u8::MAX {
            let opcode = OpCode::from_byte(byte);
            if opcode != OpCode::Invalid {
                assert_eq!(opcode.byte(), byte, "{opcode:?}");
            }
        }
        assert_eq!(OpCode::from_byte(0x0c), OpCode::Invalid);
        assert_eq!(OpCode::from_byte(0xfe), OpCode::Invalid);
    }

    #[test]
    fn stack_rows() {
        assert_eq!(OpCode::Add.data().number_of_stack_rows(), 1);
        assert_eq!(OpCode::Stop.data().number_of_stack_rows(), 1);
        assert_eq!(OpCode::MulMod.data().number_of_stack_rows(), 1);
        assert_eq!(OpCode::Call.data().number_of_stack_rows(), 2);
        assert_eq!(OpCode::Log(4).data().number_of_stack_rows(), 2);
        assert_eq!(OpCode::Dup(16).data().number_of_stack_rows(), 1);
        assert_eq!(OpCode::Swap(3).data().number_of_stack_rows(), 1);
    }

    #[test]
    fn push_immediates_are_zero_padded() {
        let code = [0x61, 0x12];
        assert_eq!(
            OpCode::Push(2).push_value(&code, 0),
            Some(ethereum_types::U256::from(0x1200))
        );
        assert_eq!(OpCode::Add.push_value(&code, 0), None);
    }
}
