//! Projection of the gas an opcode costs, computed independently of the host
//! from the frame's state before execution.

use ethereum_types::{Address, U256};
use zktracer_common::gas::*;
use zktracer_common::u256_to_address;

use crate::host::{HostFrame, WorldView};
use crate::opcode::OpCode;

/// Memory offsets at or beyond this bound raise a memory expansion
/// exception.
pub const MEMORY_BOUND: u64 = 1 << 32;

/// A memory region touched by an opcode, as read from the stack.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct MemoryRegion {
    pub offset: U256,
    pub size: U256,
}

impl MemoryRegion {
    const fn new(offset: U256, size: U256) -> Self {
        Self { offset, size }
    }

    /// One past the last touched byte, if within the addressable bound.
    fn end(&self) -> Option<u64> {
        if self.size.is_zero() {
            return Some(0);
        }
        if self.offset >= U256::from(MEMORY_BOUND) || self.size >= U256::from(MEMORY_BOUND) {
            return None;
        }
        let end = self.offset.low_u64() + self.size.low_u64();
        (end <= MEMORY_BOUND).then_some(end)
    }
}

/// Memory expansion caused by an opcode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct MemoryExpansion {
    pub words_before: u64,
    pub words_after: u64,
    pub cost: u64,
    /// Memory expansion exception.
    pub mxpx: bool,
}

impl MemoryExpansion {
    pub const fn expands(&self) -> bool {
        self.words_after > self.words_before
    }
}

/// Total memory cost of `words` active words.
pub const fn memory_cost(words: u64) -> u64 {
    G_MEMORY * words + words * words / G_QUAD_DIVISOR
}

/// Number of 32-byte words needed to hold `size` bytes, saturating.
pub fn words(size: U256) -> u64 {
    if size > U256::from(u64::MAX - 31) {
        u64::MAX / 32
    } else {
        size.low_u64().div_ceil(32)
    }
}

/// Memory regions read or written by `opcode`, from the stack of `frame`.
pub fn memory_regions(opcode: OpCode, frame: &HostFrame) -> Vec<MemoryRegion> {
    let item = |i| frame.stack_item(i);
    match opcode {
        OpCode::Keccak256 | OpCode::Log(_) | OpCode::Return | OpCode::Revert => {
            vec![MemoryRegion::new(item(0), item(1))]
        }
        OpCode::CallDataCopy | OpCode::CodeCopy | OpCode::ReturnDataCopy => {
            vec![MemoryRegion::new(item(0), item(2))]
        }
        OpCode::ExtCodeCopy => vec![MemoryRegion::new(item(1), item(3))],
        OpCode::MLoad | OpCode::MStore => vec![MemoryRegion::new(item(0), U256::from(32))],
        OpCode::MStore8 => vec![MemoryRegion::new(item(0), U256::one())],
        OpCode::Create | OpCode::Create2 => vec![MemoryRegion::new(item(1), item(2))],
        OpCode::Call | OpCode::CallCode => vec![
            MemoryRegion::new(item(3), item(4)),
            MemoryRegion::new(item(5), item(6)),
        ],
        OpCode::DelegateCall | OpCode::StaticCall => vec![
            MemoryRegion::new(item(2), item(3)),
            MemoryRegion::new(item(4), item(5)),
        ],
        _ => vec![],
    }
}

/// Computes the memory expansion of `opcode` executed in `frame`.
pub fn memory_expansion(opcode: OpCode, frame: &HostFrame) -> MemoryExpansion {
    let words_before = frame.memory_words();
    let mut max_end = 0u64;
    for region in memory_regions(opcode, frame) {
        match region.end() {
            Some(end) => max_end = max_end.max(end),
            None => {
                return MemoryExpansion {
                    words_before,
                    words_after: words_before,
                    cost: 0,
                    mxpx: true,
                }
            }
        }
    }
    let words_after = words_before.max(max_end.div_ceil(32));
    MemoryExpansion {
        words_before,
        words_after,
        cost: memory_cost(words_after) - memory_cost(words_before),
        mxpx: false,
    }
}

/// The gas an opcode costs according to the tracer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct GasProjection {
    pub static_gas: u64,
    pub memory: MemoryExpansion,
    /// Argument dependent costs: cold accesses, value transfers, word costs.
    pub dynamic: u64,
    /// Code deposit cost of a `RETURN` from a deployment.
    pub deployment: u64,
}

impl GasProjection {
    /// Gas that must be available before the opcode executes, excluding any
    /// gas handed to a child context and the code deposit.
    pub fn upfront(&self) -> u64 {
        self.static_gas
            .saturating_add(self.memory.cost)
            .saturating_add(self.dynamic)
    }

    /// Upfront cost including the code deposit.
    pub fn total(&self) -> u64 {
        self.upfront().saturating_add(self.deployment)
    }
}

fn cold_account_surcharge(frame: &HostFrame, address: &Address) -> u64 {
    if frame.is_address_warm(address) {
        0
    } else {
        G_COLD_ACCOUNT_ACCESS - G_WARM_ACCESS
    }
}

/// SSTORE cost under EIP-2200 and EIP-2929, excluding the cold surcharge.
pub fn sstore_cost(original: U256, current: U256, next: U256) -> u64 {
    if current == next {
        G_WARM_ACCESS
    } else if original == current {
        if original.is_zero() {
            G_SSET
        } else {
            G_SRESET
        }
    } else {
        G_WARM_ACCESS
    }
}

/// Byte length of the exponent of an `EXP`.
pub fn exponent_byte_len(exponent: U256) -> u64 {
    (exponent.bits() as u64).div_ceil(8)
}

/// Projects the gas cost of the current opcode of `frame`.
///
/// `original_storage` is the value of the slot targeted by an `SSTORE` at the
/// start of the transaction; it is ignored for every other opcode.
pub fn project(
    frame: &HostFrame,
    world: &dyn WorldView,
    original_storage: Option<U256>,
) -> GasProjection {
    let opcode = frame.current_opcode();
    let memory = if opcode.may_expand_memory() {
        memory_expansion(opcode, frame)
    } else {
        MemoryExpansion {
            words_before: frame.memory_words(),
            words_after: frame.memory_words(),
            ..Default::default()
        }
    };
    let item = |i| frame.stack_item(i);

    let dynamic = match opcode {
        OpCode::Exp => G_EXP_BYTE * exponent_byte_len(item(1)),
        OpCode::Keccak256 => G_KECCAK256_WORD.saturating_mul(words(item(1))),
        OpCode::CallDataCopy | OpCode::CodeCopy | OpCode::ReturnDataCopy => {
            G_COPY.saturating_mul(words(item(2)))
        }
        OpCode::ExtCodeCopy => G_COPY
            .saturating_mul(words(item(3)))
            .saturating_add(cold_account_surcharge(frame, &u256_to_address(item(0)))),
        OpCode::Balance | OpCode::ExtCodeSize | OpCode::ExtCodeHash => {
            cold_account_surcharge(frame, &u256_to_address(item(0)))
        }
        OpCode::SLoad => {
            if frame.is_storage_warm(&frame.recipient, &item(0)) {
                0
            } else {
                G_COLD_SLOAD - G_WARM_ACCESS
            }
        }
        OpCode::SStore => {
            let key = item(0);
            let current = world.storage(&frame.recipient, &key);
            let original = original_storage.unwrap_or(current);
            let cold = if frame.is_storage_warm(&frame.recipient, &key) {
                0
            } else {
                G_COLD_SLOAD
            };
            sstore_cost(original, current, item(1)) + cold
        }
        OpCode::Log(_) => G_LOG_DATA.saturating_mul(item(1).min(U256::from(u64::MAX)).low_u64()),
        OpCode::Create => G_INIT_CODE_WORD.saturating_mul(words(item(2))),
        OpCode::Create2 => (G_INIT_CODE_WORD + G_KECCAK256_WORD).saturating_mul(words(item(2))),
        OpCode::Call | OpCode::CallCode | OpCode::DelegateCall | OpCode::StaticCall => {
            let callee = u256_to_address(item(1));
            let mut cost = cold_account_surcharge(frame, &callee);
            let transfers_value =
                matches!(opcode, OpCode::Call | OpCode::CallCode) && !item(2).is_zero();
            if transfers_value {
                cost += G_CALL_VALUE;
                if opcode == OpCode::Call && world.account_or_default(&callee).is_empty() {
                    cost += G_NEW_ACCOUNT;
                }
            }
            cost
        }
        OpCode::SelfDestruct => {
            let beneficiary = u256_to_address(item(0));
            let mut cost = if frame.is_address_warm(&beneficiary) {
                0
            } else {
                G_COLD_ACCOUNT_ACCESS
            };
            let balance = world.account_or_default(&frame.recipient).balance;
            if !balance.is_zero() && world.account_or_default(&beneficiary).is_empty() {
                cost += G_NEW_ACCOUNT;
            }
            cost
        }
        _ => 0,
    };

    let deployment = if opcode == OpCode::Return && frame.is_deployment() && !memory.mxpx {
        G_CODE_DEPOSIT.saturating_mul(item(1).min(U256::from(u64::MAX)).low_u64())
    } else {
        0
    };

    GasProjection {
        static_gas: opcode.static_gas(),
        memory,
        dynamic,
        deployment,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryWorld;

    fn frame_with(code: &[u8], stack: &[u64]) -> HostFrame {
        HostFrame {
            code: code.to_vec(),
            // Stack literals are listed top first.
            stack: stack.iter().rev().map(|&v| U256::from(v)).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn memory_expansion_charges_the_quadratic_cost() {
        // MSTORE at offset 0 expands to one word.
        let frame = frame_with(&[0x52], &[0, 1]);
        let expansion = memory_expansion(OpCode::MStore, &frame);
        assert_eq!(expansion.words_after, 1);
        assert_eq!(expansion.cost, 3);

        // 1024 words cost 3 * 1024 + 1024^2 / 512.
        assert_eq!(memory_cost(1024), 3072 + 2048);
    }

    #[test]
    fn huge_offsets_raise_mxpx() {
        let mut frame = frame_with(&[0x51], &[]);
        frame.stack = vec![U256::from(MEMORY_BOUND)];
        assert!(memory_expansion(OpCode::MLoad, &frame).mxpx);

        // A zero sized region never expands memory, whatever its offset.
        let mut frame = frame_with(&[0x20], &[]);
        frame.stack = vec![U256::zero(), U256::MAX];
        let expansion = memory_expansion(OpCode::Keccak256, &frame);
        assert!(!expansion.mxpx);
        assert_eq!(expansion.cost, 0);
    }

    #[test]
    fn exp_charges_per_exponent_byte() {
        let world = MemoryWorld::new();
        // EXP 2 ** 0x0100: exponent on stack position 1.
        let frame = frame_with(&[0x0a], &[2, 0x100]);
        let projection = project(&frame, &world, None);
        assert_eq!(projection.upfront(), G_EXP + 2 * G_EXP_BYTE);
    }

    #[test]
    fn sstore_costs() {
        let zero = U256::zero();
        let one = U256::one();
        let two = U256::from(2);
        assert_eq!(sstore_cost(zero, zero, one), G_SSET);
        assert_eq!(sstore_cost(one, one, two), G_SRESET);
        assert_eq!(sstore_cost(one, two, zero), G_WARM_ACCESS);
        assert_eq!(sstore_cost(one, one, one), G_WARM_ACCESS);
    }

    #[test]
    fn cold_call_with_value_to_empty_account() {
        let world = MemoryWorld::new();
        // CALL gas=0 to=0xaa value=1, no memory.
        let frame = frame_with(&[0xf1], &[0, 0xaa, 1, 0, 0, 0, 0]);
        let projection = project(&frame, &world, None);
        assert_eq!(
            projection.upfront(),
            G_COLD_ACCOUNT_ACCESS + G_CALL_VALUE + G_NEW_ACCOUNT
        );
    }

    #[test]
    fn deployment_return_includes_code_deposit() {
        let world = MemoryWorld::new();
        let mut frame = frame_with(&[0xf3], &[0, 10]);
        frame.frame_type = crate::host::FrameType::ContractCreation;
        let projection = project(&frame, &world, None);
        assert_eq!(projection.deployment, 2000);
        assert_eq!(projection.total(), projection.upfront() + 2000);
    }
}
