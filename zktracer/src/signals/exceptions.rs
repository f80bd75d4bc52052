use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Exceptional conditions raised by an opcode, computed before it
    /// executes.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct Exceptions: u16 {
        const INVALID_OPCODE = 1 << 0;
        const STACK_UNDERFLOW = 1 << 1;
        const STACK_OVERFLOW = 1 << 2;
        const MEMORY_EXPANSION = 1 << 3;
        const OUT_OF_GAS = 1 << 4;
        const RETURN_DATA_COPY_FAULT = 1 << 5;
        const JUMP_FAULT = 1 << 6;
        const STATIC_FAULT = 1 << 7;
        const OUT_OF_SSTORE = 1 << 8;
        const INVALID_CODE_PREFIX = 1 << 9;
        const MAX_CODE_SIZE = 1 << 10;
    }
}

impl Exceptions {
    pub const STACK: Self = Self::STACK_UNDERFLOW.union(Self::STACK_OVERFLOW);

    pub fn any(self) -> bool {
        !self.is_empty()
    }

    pub fn none(self) -> bool {
        self.is_empty()
    }

    pub fn stack_exception(self) -> bool {
        self.intersects(Self::STACK)
    }

    /// The exception a trace section reports, in the order the conditions are
    /// checked.
    pub fn traced(self) -> TracedException {
        const ORDER: [(Exceptions, TracedException); 11] = [
            (Exceptions::INVALID_OPCODE, TracedException::InvalidOpcode),
            (Exceptions::STACK_UNDERFLOW, TracedException::StackUnderflow),
            (Exceptions::STACK_OVERFLOW, TracedException::StackOverflow),
            (Exceptions::STATIC_FAULT, TracedException::StaticFault),
            (
                Exceptions::RETURN_DATA_COPY_FAULT,
                TracedException::ReturnDataCopyFault,
            ),
            (Exceptions::MEMORY_EXPANSION, TracedException::MemoryExpansion),
            (Exceptions::MAX_CODE_SIZE, TracedException::MaxCodeSize),
            (
                Exceptions::INVALID_CODE_PREFIX,
                TracedException::InvalidCodePrefix,
            ),
            (Exceptions::OUT_OF_SSTORE, TracedException::OutOfSstore),
            (Exceptions::OUT_OF_GAS, TracedException::OutOfGas),
            (Exceptions::JUMP_FAULT, TracedException::JumpFault),
        ];
        ORDER
            .iter()
            .find(|(flag, _)| self.contains(*flag))
            .map_or(TracedException::None, |(_, traced)| *traced)
    }
}

/// The exception recorded on a trace section.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TracedException {
    #[default]
    None,
    /// Not yet decided; sections that settle their exception late start here.
    Undefined,
    InvalidOpcode,
    StackUnderflow,
    StackOverflow,
    MemoryExpansion,
    OutOfGas,
    ReturnDataCopyFault,
    JumpFault,
    StaticFault,
    OutOfSstore,
    InvalidCodePrefix,
    MaxCodeSize,
}

impl TracedException {
    pub fn is_exceptional(self) -> bool {
        !matches!(self, Self::None)
    }
}

impl From<TracedException> for Exceptions {
    fn from(value: TracedException) -> Self {
        match value {
            TracedException::None | TracedException::Undefined => Exceptions::empty(),
            TracedException::InvalidOpcode => Exceptions::INVALID_OPCODE,
            TracedException::StackUnderflow => Exceptions::STACK_UNDERFLOW,
            TracedException::StackOverflow => Exceptions::STACK_OVERFLOW,
            TracedException::MemoryExpansion => Exceptions::MEMORY_EXPANSION,
            TracedException::OutOfGas => Exceptions::OUT_OF_GAS,
            TracedException::ReturnDataCopyFault => Exceptions::RETURN_DATA_COPY_FAULT,
            TracedException::JumpFault => Exceptions::JUMP_FAULT,
            TracedException::StaticFault => Exceptions::STATIC_FAULT,
            TracedException::OutOfSstore => Exceptions::OUT_OF_SSTORE,
            TracedException::InvalidCodePrefix => Exceptions::INVALID_CODE_PREFIX,
            TracedException::MaxCodeSize => Exceptions::MAX_CODE_SIZE,
        }
    }
}

bitflags! {
    /// Conditions under which a CALL or CREATE does not spawn a child
    /// context, without the opcode being exceptional.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct Aborts: u8 {
        const INSUFFICIENT_BALANCE = 1 << 0;
        const CALL_STACK_OVERFLOW = 1 << 1;
        const NONCE_OVERFLOW = 1 << 2;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_exceptions_take_precedence() {
        let ex = Exceptions::STACK_UNDERFLOW | Exceptions::OUT_OF_GAS;
        assert_eq!(ex.traced(), TracedException::StackUnderflow);
        assert!(ex.stack_exception());
    }

    #[test]
    fn deployment_checks_come_before_gas() {
        let ex = Exceptions::MAX_CODE_SIZE | Exceptions::OUT_OF_GAS;
        assert_eq!(ex.traced(), TracedException::MaxCodeSize);
    }

    #[test]
    fn empty_set_traces_none() {
        assert_eq!(Exceptions::empty().traced(), TracedException::None);
        assert!(!TracedException::None.is_exceptional());
        assert_eq!(
            Exceptions::from(TracedException::OutOfGas),
            Exceptions::OUT_OF_GAS
        );
    }
}
