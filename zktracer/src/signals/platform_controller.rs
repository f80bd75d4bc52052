use ethereum_types::U256;
use zktracer_common::{gas::G_CALL_STIPEND, u256_to_address, INVALID_CODE_PREFIX};

use super::{Aborts, Exceptions};
use crate::config::TracerConfig;
use crate::gas::GasProjection;
use crate::host::{HostFrame, WorldView};
use crate::opcode::{InstructionFamily, OpCode};
use crate::util::{create2_address, create_address, is_valid_jump_destination};

/// Sub-modules an opcode involves.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Signals {
    pub add: bool,
    pub bin: bool,
    pub blockhash: bool,
    pub exp: bool,
    pub ext: bool,
    pub gas: bool,
    pub keccak: bool,
    pub mmu: bool,
    pub mod_: bool,
    pub mul: bool,
    pub mxp: bool,
    pub oob: bool,
    pub rlp_addr: bool,
    pub shf: bool,
    pub stp: bool,
    pub trm: bool,
    pub wcp: bool,
}

/// Computes, once per opcode, the exceptions, aborts and create failure
/// condition of the current instruction, and the sub-modules it involves.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PlatformController {
    exceptions: Exceptions,
    aborts: Aborts,
    /// Contract creation targeting an address that already has a nonce or
    /// code.
    create_failure: bool,
    signals: Signals,
}

impl PlatformController {
    pub fn exceptions(&self) -> Exceptions {
        self.exceptions
    }

    pub fn aborts(&self) -> Aborts {
        self.aborts
    }

    pub fn create_failure(&self) -> bool {
        self.create_failure
    }

    pub fn signals(&self) -> &Signals {
        &self.signals
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Evaluates the current opcode of `frame`.
    ///
    /// Checks stop at the first raised exception: an opcode that fails its
    /// stack checks never reaches its memory or gas checks.
    pub fn setup(
        &mut self,
        frame: &HostFrame,
        world: &dyn WorldView,
        projection: &GasProjection,
        config: &TracerConfig,
    ) {
        self.reset();
        let opcode = frame.current_opcode();
        self.exceptions = compute_exceptions(frame, projection, config);
        if self.exceptions.none() {
            self.compute_aborts(frame, world, config);
        }
        self.signals = compute_signals(opcode, self.exceptions, self.aborts, self.create_failure);
    }

    fn compute_aborts(&mut self, frame: &HostFrame, world: &dyn WorldView, config: &TracerConfig) {
        let opcode = frame.current_opcode();
        if !opcode.is_call_or_create() {
            return;
        }
        let value = match opcode {
            OpCode::Call | OpCode::CallCode => frame.stack_item(2),
            OpCode::Create | OpCode::Create2 => frame.stack_item(0),
            _ => U256::zero(),
        };
        let account = world.account_or_default(&frame.recipient);
        if value > account.balance {
            self.aborts |= Aborts::INSUFFICIENT_BALANCE;
        }
        if frame.depth >= config.call_depth_limit {
            self.aborts |= Aborts::CALL_STACK_OVERFLOW;
        }
        if opcode.is_create() {
            if account.nonce == u64::MAX {
                self.aborts |= Aborts::NONCE_OVERFLOW;
            }
            if self.aborts.is_empty() {
                let createe = createe_address(frame, account.nonce);
                let target = world.account_or_default(&createe);
                self.create_failure = target.nonce != 0 || target.has_code();
            }
        }
    }
}

/// Address a `CREATE` or `CREATE2` executed in `frame` deploys to, given the
/// creator's current nonce.
pub fn createe_address(frame: &HostFrame, nonce: u64) -> ethereum_types::Address {
    match frame.current_opcode() {
        OpCode::Create2 => {
            let offset = frame.stack_item(1).low_u64() as usize;
            let size = frame.stack_item(2).low_u64() as usize;
            let init_code = frame.read_memory(offset, size);
            create2_address(
                frame.recipient,
                frame.stack_item(3),
                keccak_hash::keccak(init_code),
            )
        }
        _ => create_address(frame.recipient, nonce),
    }
}

fn compute_exceptions(
    frame: &HostFrame,
    projection: &GasProjection,
    config: &TracerConfig,
) -> Exceptions {
    let opcode = frame.current_opcode();
    if opcode == OpCode::Invalid {
        return Exceptions::INVALID_OPCODE;
    }

    let data = opcode.data();
    let height = frame.stack_height();
    if height < data.delta {
        return Exceptions::STACK_UNDERFLOW;
    }
    if height - data.delta + data.alpha > config.stack_limit {
        return Exceptions::STACK_OVERFLOW;
    }

    let transfers_value = opcode == OpCode::Call && !frame.stack_item(2).is_zero();
    if frame.is_static && (opcode.is_forbidden_in_static_context() || transfers_value) {
        return Exceptions::STATIC_FAULT;
    }

    if opcode == OpCode::ReturnDataCopy {
        let end = frame.stack_item(1).overflowing_add(frame.stack_item(2));
        if end.1 || end.0 > U256::from(frame.return_data.len()) {
            return Exceptions::RETURN_DATA_COPY_FAULT;
        }
    }

    if projection.memory.mxpx {
        return Exceptions::MEMORY_EXPANSION;
    }

    if opcode == OpCode::Return && frame.is_deployment() {
        let size = frame.stack_item(1);
        if size > U256::from(config.max_code_size) {
            return Exceptions::MAX_CODE_SIZE;
        }
        if !size.is_zero() {
            let offset = frame.stack_item(0).low_u64() as usize;
            if frame.read_memory(offset, 1)[0] == INVALID_CODE_PREFIX {
                return Exceptions::INVALID_CODE_PREFIX;
            }
        }
        if frame.remaining_gas < projection.total() {
            return Exceptions::OUT_OF_GAS;
        }
        return Exceptions::empty();
    }

    if opcode.is_create() && frame.stack_item(2) > U256::from(config.max_init_code_size) {
        return Exceptions::MAX_CODE_SIZE;
    }

    if opcode == OpCode::SStore && frame.remaining_gas <= G_CALL_STIPEND {
        return Exceptions::OUT_OF_SSTORE;
    }

    if frame.remaining_gas < projection.upfront() {
        return Exceptions::OUT_OF_GAS;
    }

    let jumps = match opcode {
        OpCode::Jump => true,
        OpCode::JumpI => !frame.stack_item(1).is_zero(),
        _ => false,
    };
    if jumps && !is_valid_jump_destination(&frame.code, frame.stack_item(0)) {
        return Exceptions::JUMP_FAULT;
    }

    Exceptions::empty()
}

fn compute_signals(
    opcode: OpCode,
    exceptions: Exceptions,
    aborts: Aborts,
    create_failure: bool,
) -> Signals {
    let mut signals = Signals::default();
    if exceptions.stack_exception() || exceptions.contains(Exceptions::INVALID_OPCODE) {
        return signals;
    }
    let unexceptional = exceptions.none();
    let family = opcode.family();

    signals.gas = true;
    signals.add = unexceptional && family == InstructionFamily::Add;
    signals.bin = unexceptional && family == InstructionFamily::Bin;
    signals.ext = unexceptional && family == InstructionFamily::Ext;
    signals.mod_ = unexceptional && family == InstructionFamily::Mod;
    signals.mul = unexceptional && opcode == OpCode::Mul;
    signals.shf = unexceptional && family == InstructionFamily::Shf;
    signals.wcp = unexceptional && family == InstructionFamily::Wcp;
    signals.exp = opcode == OpCode::Exp;
    signals.blockhash = unexceptional && opcode == OpCode::BlockHash;
    signals.keccak = unexceptional && opcode == OpCode::Keccak256;

    let static_fault = exceptions.contains(Exceptions::STATIC_FAULT);
    signals.mxp = !static_fault && (opcode.may_expand_memory() || opcode == OpCode::MSize);
    signals.oob = matches!(
        opcode,
        OpCode::CallDataLoad
            | OpCode::Jump
            | OpCode::JumpI
            | OpCode::ReturnDataCopy
            | OpCode::SStore
            | OpCode::Call
            | OpCode::CallCode
            | OpCode::DelegateCall
            | OpCode::StaticCall
            | OpCode::Create
            | OpCode::Create2
    ) || (opcode == OpCode::Return && exceptions.intersects(Exceptions::MAX_CODE_SIZE));
    signals.mmu = unexceptional && opcode.may_expand_memory();
    signals.stp = opcode.is_call_or_create()
        && !static_fault
        && !exceptions.contains(Exceptions::MEMORY_EXPANSION);
    signals.trm = !static_fault && opcode.trims_address();
    signals.rlp_addr = unexceptional && opcode.is_create() && aborts.is_empty() && !create_failure;
    signals
}

/// Address targeted by an account-reading opcode.
pub fn target_address(frame: &HostFrame) -> ethereum_types::Address {
    match frame.current_opcode() {
        OpCode::SelfBalance | OpCode::CodeSize => frame.recipient,
        OpCode::Call | OpCode::CallCode | OpCode::DelegateCall | OpCode::StaticCall => {
            u256_to_address(frame.stack_item(1))
        }
        _ => u256_to_address(frame.stack_item(0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gas::project;
    use crate::host::{Account, MemoryWorld};

    fn setup(frame: &HostFrame, world: &MemoryWorld) -> PlatformController {
        let mut pch = PlatformController::default();
        let projection = project(frame, world, None);
        pch.setup(frame, world, &projection, &TracerConfig::default());
        pch
    }

    fn frame(code: &[u8], stack_top_first: &[U256], gas: u64) -> HostFrame {
        HostFrame {
            code: code.to_vec(),
            stack: stack_top_first.iter().rev().copied().collect(),
            remaining_gas: gas,
            ..Default::default()
        }
    }

    #[test]
    fn stack_underflow_suppresses_gas_checks() {
        let world = MemoryWorld::new();
        let pch = setup(&frame(&[0x01], &[], 0), &world);
        assert_eq!(pch.exceptions(), Exceptions::STACK_UNDERFLOW);
        assert_eq!(pch.signals(), &Signals::default());
    }

    #[test]
    fn add_with_enough_gas_signals_the_add_module() {
        let world = MemoryWorld::new();
        let pch = setup(&frame(&[0x01], &[U256::one(), U256::one()], 3), &world);
        assert!(pch.exceptions().none());
        assert!(pch.signals().add);
        assert!(pch.signals().gas);
        assert!(!pch.signals().wcp);
    }

    #[test]
    fn add_one_gas_short_is_out_of_gas_and_skips_the_add_module() {
        let world = MemoryWorld::new();
        let pch = setup(&frame(&[0x01], &[U256::one(), U256::one()], 2), &world);
        assert_eq!(pch.exceptions(), Exceptions::OUT_OF_GAS);
        assert!(!pch.signals().add);
        assert!(pch.signals().gas);
    }

    #[test]
    fn sstore_in_static_context() {
        let world = MemoryWorld::new();
        let mut f = frame(&[0x55], &[U256::zero(), U256::one()], 100_000);
        f.is_static = true;
        assert_eq!(setup(&f, &world).exceptions(), Exceptions::STATIC_FAULT);
    }

    #[test]
    fn sstore_at_the_stipend_is_out_of_sstore() {
        let world = MemoryWorld::new();
        let f = frame(&[0x55], &[U256::zero(), U256::one()], 2300);
        assert_eq!(setup(&f, &world).exceptions(), Exceptions::OUT_OF_SSTORE);
    }

    #[test]
    fn bad_jump_destination() {
        let world = MemoryWorld::new();
        let f = frame(&[0x56], &[U256::from(5)], 100);
        assert_eq!(setup(&f, &world).exceptions(), Exceptions::JUMP_FAULT);
    }

    #[test]
    fn returndatacopy_beyond_buffer() {
        let world = MemoryWorld::new();
        let f = frame(&[0x3e], &[U256::zero(), U256::zero(), U256::one()], 100);
        assert_eq!(
            setup(&f, &world).exceptions(),
            Exceptions::RETURN_DATA_COPY_FAULT
        );
    }

    #[test]
    fn call_with_insufficient_balance_aborts() {
        let world = MemoryWorld::new();
        let stack = [
            U256::zero(),
            U256::from(0xaa),
            U256::one(),
            U256::zero(),
            U256::zero(),
            U256::zero(),
            U256::zero(),
        ];
        let pch = setup(&frame(&[0xf1], &stack, 1_000_000), &world);
        assert!(pch.exceptions().none());
        assert_eq!(pch.aborts(), Aborts::INSUFFICIENT_BALANCE);
        assert!(pch.signals().stp);
    }

    #[test]
    fn create_onto_existing_code_hits_failure_condition() {
        let mut world = MemoryWorld::new();
        let f = frame(
            &[0xf0],
            &[U256::zero(), U256::zero(), U256::zero()],
            1_000_000,
        );
        let createe = create_address(f.recipient, 0);
        world.set_account(
            createe,
            Account {
                code: vec![0x00],
                ..Default::default()
            },
        );
        let pch = setup(&f, &world);
        assert!(pch.create_failure());
        assert!(!pch.signals().rlp_addr);
    }
}
