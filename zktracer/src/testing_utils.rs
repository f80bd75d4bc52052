//! An in-memory host driving a [`Hub`] through its hooks, shared by the
//! tests and benchmarks.
//!
//! The host runs the subset of the EVM the tracer cares most about:
//! arithmetic, memory, storage, logs, calls, deployments and self-destructs.
//! Gas costs and exceptions come from the tracer's own gas schedule, so any
//! divergence the host reports is deliberate (see [`Driver::gas_skew`]).

use anyhow::{bail, Result};
use env_logger::{try_init_from_env, Env, DEFAULT_FILTER_ENV};
use ethereum_types::{Address, BigEndianHash, H256, U256};
use hashbrown::HashMap;
use zktracer_common::gas::{
    G_CALL_STIPEND, G_CODE_DEPOSIT, G_SRESET, G_SSET, G_WARM_ACCESS, MAX_REFUND_QUOTIENT,
};
use zktracer_common::{address_to_u256, u256_to_address};

use crate::config::TracerConfig;
use crate::gas;
use crate::host::{
    Account, BlockBody, BlockHeader, FrameOutcome, FrameType, HaltReason, HostFrame, Log,
    MemoryWorld, OperationResult, Transaction, TransactionType, WorldView,
};
use crate::hub::Hub;
use crate::metadata::intrinsic_gas;
use crate::opcode::OpCode;
use crate::precompile::Precompile;
use crate::signals::{createe_address, Exceptions, PlatformController};
use crate::util::create_address;

/// Refund granted for clearing a storage slot.
const R_SCLEAR: i64 = 4800;

pub fn init_logger() {
    let _ = try_init_from_env(Env::default().filter_or(DEFAULT_FILTER_ENV, "info"));
}

/// Decodes hex bytecode, with or without its `0x` prefix.
pub fn bytecode(code: &str) -> Result<Vec<u8>> {
    Ok(hex::decode(code.trim_start_matches("0x"))?)
}

pub fn address(n: u64) -> Address {
    Address::from_low_u64_be(n)
}

/// An externally owned account holding `balance` wei.
pub fn eoa(balance: u64) -> Account {
    Account {
        nonce: 0,
        balance: U256::from(balance),
        code: Vec::new(),
    }
}

/// A deployed contract.
pub fn contract(code: Vec<u8>) -> Account {
    Account {
        nonce: 1,
        balance: U256::zero(),
        code,
    }
}

/// A legacy message call paying 10 wei per gas.
pub fn call_tx(sender: Address, to: Address, nonce: u64, gas_limit: u64, data: Vec<u8>) -> Transaction {
    Transaction {
        tx_type: TransactionType::Legacy,
        sender,
        to: Some(to),
        nonce,
        gas_limit,
        gas_price: Some(U256::from(10)),
        data,
        ..Default::default()
    }
}

/// A legacy deployment paying 10 wei per gas.
pub fn deploy_tx(sender: Address, nonce: u64, gas_limit: u64, init_code: Vec<u8>) -> Transaction {
    Transaction {
        tx_type: TransactionType::Legacy,
        sender,
        to: None,
        nonce,
        gas_limit,
        gas_price: Some(U256::from(10)),
        data: init_code,
        ..Default::default()
    }
}

/// What the host observed while processing a transaction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransactionOutcome {
    pub success: bool,
    pub gas_used: u64,
    pub output: Vec<u8>,
    pub logs: Vec<Log>,
    pub self_destructs: Vec<Address>,
    /// Address deployed to, for deployments.
    pub created: Option<Address>,
}

/// World state and journal lengths to restore when a frame reverts.
struct Checkpoint {
    world: MemoryWorld,
    logs: usize,
    self_destructs: usize,
}

/// Value moved when a frame starts. Undone with the frame.
struct Transfer {
    from: Address,
    to: Address,
    value: U256,
    deployment: bool,
}

impl Transfer {
    fn apply(&self, world: &mut MemoryWorld) {
        if self.value.is_zero() && !self.deployment {
            return;
        }
        let mut from = world.account_or_default(&self.from);
        from.balance = from.balance.saturating_sub(self.value);
        world.set_account(self.from, from);
        let mut to = world.account_or_default(&self.to);
        to.balance = to.balance.saturating_add(self.value);
        if self.deployment {
            to.nonce = 1;
        }
        world.set_account(self.to, to);
    }
}

enum ReturnTarget {
    Memory { offset: usize, size: usize },
    Createe(Address),
}

enum Action {
    Next(usize),
    Halt(FrameOutcome),
    Spawn {
        child: Box<HostFrame>,
        transfer: Transfer,
        returns_to: ReturnTarget,
    },
}

/// Drives a [`Hub`] over transactions executed against a [`MemoryWorld`].
pub struct Driver {
    pub hub: Hub,
    pub world: MemoryWorld,
    pub header: BlockHeader,
    /// Extra gas the host reports for every execution of an opcode.
    pub gas_skew: Option<(OpCode, u64)>,
    config: TracerConfig,
    origin: Address,
    gas_price: U256,
    original_storage: HashMap<(Address, U256), U256>,
    logs: Vec<Log>,
    self_destructs: Vec<Address>,
}

impl Driver {
    pub fn new(config: TracerConfig) -> Self {
        Self {
            hub: Hub::new(config.clone()),
            world: MemoryWorld::new(),
            header: BlockHeader {
                number: 1,
                coinbase: address(0xc0ffee),
                timestamp: 1_700_000_000,
                gas_limit: 30_000_000,
                base_fee: U256::from(7),
            },
            gas_skew: None,
            config,
            origin: Address::zero(),
            gas_price: U256::zero(),
            original_storage: HashMap::new(),
            logs: Vec::new(),
            self_destructs: Vec::new(),
        }
    }

    pub fn with_account(mut self, address: Address, account: Account) -> Self {
        self.world.set_account(address, account);
        self
    }

    /// Traces one conflation made of `blocks`, each a list of transactions.
    pub fn run_conflation(&mut self, blocks: &[Vec<Transaction>]) -> Result<Vec<TransactionOutcome>> {
        self.hub.trace_start_conflation(blocks.len())?;
        let mut outcomes = Vec::new();
        for transactions in blocks {
            self.hub.trace_start_block(&self.header)?;
            for tx in transactions {
                outcomes.push(self.run_transaction(tx)?);
            }
            let body = BlockBody {
                transactions: transactions.clone(),
            };
            self.hub.trace_end_block(&self.header, &body)?;
            self.header.number += 1;
        }
        self.hub.trace_end_conflation(&self.world)?;
        Ok(outcomes)
    }

    /// Traces a conflation holding a single block.
    pub fn run_block(&mut self, transactions: &[Transaction]) -> Result<Vec<TransactionOutcome>> {
        self.run_conflation(&[transactions.to_vec()])
    }

    /// Processes `tx` within the current block.
    pub fn run_transaction(&mut self, tx: &Transaction) -> Result<TransactionOutcome> {
        let intrinsic = intrinsic_gas(tx);
        if tx.gas_limit < intrinsic {
            bail!("gas limit {} below intrinsic cost {intrinsic}", tx.gas_limit);
        }
        self.hub.trace_start_transaction(&self.world, tx)?;

        let (base_fee, coinbase) = (self.header.base_fee, self.header.coinbase);
        let price = tx.effective_gas_price(base_fee);
        let recipient = tx.to.unwrap_or_else(|| create_address(tx.sender, tx.nonce));
        let code = if tx.is_deployment() {
            tx.data.clone()
        } else {
            self.world.account_or_default(&recipient).code
        };
        self.origin = tx.sender;
        self.gas_price = price;
        self.original_storage.clear();
        self.logs.clear();
        self.self_destructs.clear();

        let mut sender = self.world.account_or_default(&tx.sender);
        sender.nonce += 1;
        sender.balance = sender
            .balance
            .saturating_sub(price * U256::from(tx.gas_limit));
        self.world.set_account(tx.sender, sender);

        let transfer = Transfer {
            from: tx.sender,
            to: recipient,
            value: tx.value,
            deployment: tx.is_deployment(),
        };
        let mut leftover = tx.gas_limit - intrinsic;
        let (mut success, mut refund, mut output) = (true, 0, Vec::new());
        if code.is_empty() {
            transfer.apply(&mut self.world);
        } else {
            let mut warm_addresses: hashbrown::HashSet<Address> =
                [tx.sender, recipient, coinbase].into_iter().collect();
            warm_addresses.extend(Precompile::ALL.map(Precompile::address));
            let mut warm_storage = hashbrown::HashSet::new();
            for entry in &tx.access_list {
                warm_addresses.insert(entry.address);
                warm_storage.extend(entry.storage_keys.iter().map(|key| (entry.address, *key)));
            }
            let mut frame = HostFrame {
                frame_type: if tx.is_deployment() {
                    FrameType::ContractCreation
                } else {
                    FrameType::MessageCall
                },
                sender: tx.sender,
                recipient,
                contract: recipient,
                value: tx.value,
                input_data: if tx.is_deployment() {
                    Vec::new()
                } else {
                    tx.data.clone()
                },
                code,
                remaining_gas: leftover,
                warm_addresses,
                warm_storage,
                ..Default::default()
            };
            self.execute_frame(&mut frame, transfer)?;
            leftover = frame.remaining_gas;
            success = frame.outcome.is_success();
            refund = if success { frame.gas_refund } else { 0 };
            output = frame.output_data;
        }

        let consumed = tx.gas_limit - leftover;
        let refund = refund.min(consumed / MAX_REFUND_QUOTIENT);
        let gas_used = consumed - refund;
        self.credit(tx.sender, price * U256::from(leftover + refund));
        self.credit(coinbase, price.saturating_sub(base_fee) * U256::from(gas_used));

        let logs = std::mem::take(&mut self.logs);
        let self_destructs = std::mem::take(&mut self.self_destructs);
        self.hub
            .trace_end_transaction(&self.world, tx, success, &logs, &self_destructs)?;
        for address in &self_destructs {
            self.world.remove_account(address);
        }
        Ok(TransactionOutcome {
            success,
            gas_used,
            output,
            logs,
            self_destructs,
            created: tx.is_deployment().then_some(recipient),
        })
    }

    fn credit(&mut self, address: Address, value: U256) {
        let mut account = self.world.account_or_default(&address);
        account.balance = account.balance.saturating_add(value);
        self.world.set_account(address, account);
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            world: self.world.clone(),
            logs: self.logs.len(),
            self_destructs: self.self_destructs.len(),
        }
    }

    fn restore(&mut self, checkpoint: Checkpoint) {
        self.world = checkpoint.world;
        self.logs.truncate(checkpoint.logs);
        self.self_destructs.truncate(checkpoint.self_destructs);
    }

    fn original_value(&mut self, address: Address, key: U256) -> U256 {
        *self
            .original_storage
            .entry((address, key))
            .or_insert_with(|| self.world.storage(&address, &key))
    }

    fn execute_frame(&mut self, frame: &mut HostFrame, transfer: Transfer) -> Result<()> {
        self.hub.trace_context_enter(&self.world, frame)?;
        let checkpoint = self.checkpoint();
        transfer.apply(&mut self.world);
        while frame.outcome == FrameOutcome::Running {
            self.execute_opcode(frame)?;
        }
        if frame.outcome.is_success() {
            if frame.is_deployment() {
                let deposit = G_CODE_DEPOSIT * frame.output_data.len() as u64;
                frame.remaining_gas = frame.remaining_gas.saturating_sub(deposit);
                if let Some(account) = self.world.account_mut(&frame.recipient) {
                    account.code = frame.output_data.clone();
                }
            }
        } else {
            self.restore(checkpoint);
        }
        self.hub.trace_context_exit(&self.world, frame)?;
        Ok(())
    }

    fn execute_opcode(&mut self, frame: &mut HostFrame) -> Result<()> {
        let opcode = frame.current_opcode();
        let original = match opcode {
            OpCode::SLoad | OpCode::SStore => {
                Some(self.original_value(frame.recipient, frame.stack_item(0)))
            }
            _ => None,
        };
        let projection = gas::project(frame, &self.world, original);
        let mut controller = PlatformController::default();
        controller.setup(frame, &self.world, &projection, &self.config);
        let skew = match self.gas_skew {
            Some((skewed, extra)) if skewed == opcode => extra,
            _ => 0,
        };
        let gas_cost = projection.upfront() + skew;

        self.hub.trace_pre_execution(&self.world, frame)?;
        let exceptions = controller.exceptions();
        if exceptions.any() {
            frame.remaining_gas = 0;
            frame.outcome = FrameOutcome::ExceptionalHalt;
            frame.output_data.clear();
            let result = OperationResult {
                gas_cost,
                halt_reason: Some(halt_reason(exceptions)),
            };
            self.hub.trace_post_execution(&self.world, frame, &result)?;
            return Ok(());
        }

        frame.remaining_gas -= projection.upfront();
        let memory_size = (projection.memory.words_after * 32) as usize;
        if frame.memory.len() < memory_size {
            frame.memory.resize(memory_size, 0);
        }
        let result = OperationResult {
            gas_cost,
            halt_reason: None,
        };
        match self.apply(frame, opcode, &controller)? {
            Action::Next(pc) => {
                frame.pc = pc;
                self.hub.trace_post_execution(&self.world, frame, &result)?;
            }
            Action::Halt(outcome) => {
                frame.outcome = outcome;
                self.hub.trace_post_execution(&self.world, frame, &result)?;
            }
            Action::Spawn {
                mut child,
                transfer,
                returns_to,
            } => {
                self.hub.trace_post_execution(&self.world, frame, &result)?;
                self.execute_frame(&mut child, transfer)?;
                resume(frame, *child, returns_to);
                frame.pc += 1;
                self.hub.trace_context_re_enter(&self.world, frame)?;
            }
        }
        Ok(())
    }

    fn apply(
        &mut self,
        frame: &mut HostFrame,
        opcode: OpCode,
        controller: &PlatformController,
    ) -> Result<Action> {
        let next = frame.pc + 1;
        let value = match opcode {
            OpCode::Stop => return Ok(Action::Halt(FrameOutcome::Success)),
            OpCode::Add
            | OpCode::Sub
            | OpCode::Mul
            | OpCode::Div
            | OpCode::Mod
            | OpCode::Exp
            | OpCode::Lt
            | OpCode::Gt
            | OpCode::Eq
            | OpCode::And
            | OpCode::Or
            | OpCode::Xor
            | OpCode::Byte
            | OpCode::Shl
            | OpCode::Shr => {
                let (a, b) = (pop(frame), pop(frame));
                binary(opcode, a, b)
            }
            OpCode::IsZero => bool_word(pop(frame).is_zero()),
            OpCode::Not => !pop(frame),
            OpCode::Keccak256 => {
                let (offset, size) = (pop(frame), pop(frame));
                keccak_hash::keccak(read(frame, offset, size)).into_uint()
            }
            OpCode::Address => address_to_u256(frame.recipient),
            OpCode::Balance | OpCode::ExtCodeSize | OpCode::ExtCodeHash => {
                let target = u256_to_address(pop(frame));
                frame.warm_addresses.insert(target);
                let account = self.world.account_or_default(&target);
                match opcode {
                    OpCode::Balance => account.balance,
                    OpCode::ExtCodeSize => U256::from(account.code.len()),
                    _ if account.is_empty() => U256::zero(),
                    _ => account.code_hash().into_uint(),
                }
            }
            OpCode::Origin => address_to_u256(self.origin),
            OpCode::Caller => address_to_u256(frame.sender),
            OpCode::CallValue => frame.value,
            OpCode::CallDataLoad => {
                let offset = pop(frame);
                U256::from_big_endian(&padded(&frame.input_data, offset, 32))
            }
            OpCode::CallDataSize => U256::from(frame.input_data.len()),
            OpCode::CodeSize => U256::from(frame.code.len()),
            OpCode::GasPrice => self.gas_price,
            OpCode::ReturnDataSize => U256::from(frame.return_data.len()),
            OpCode::CallDataCopy
            | OpCode::CodeCopy
            | OpCode::ReturnDataCopy
            | OpCode::ExtCodeCopy => {
                let source = match opcode {
                    OpCode::CallDataCopy => frame.input_data.clone(),
                    OpCode::CodeCopy => frame.code.clone(),
                    OpCode::ReturnDataCopy => frame.return_data.clone(),
                    _ => {
                        let target = u256_to_address(pop(frame));
                        frame.warm_addresses.insert(target);
                        self.world.account_or_default(&target).code
                    }
                };
                let (dest, offset, size) = (pop(frame), pop(frame), pop(frame));
                let bytes = padded(&source, offset, size.low_u64() as usize);
                write(frame, dest, &bytes);
                return Ok(Action::Next(next));
            }
            OpCode::BlockHash => {
                pop(frame);
                U256::zero()
            }
            OpCode::Coinbase => address_to_u256(self.header.coinbase),
            OpCode::Timestamp => U256::from(self.header.timestamp),
            OpCode::Number => U256::from(self.header.number),
            OpCode::PrevRandao => U256::zero(),
            OpCode::GasLimit => U256::from(self.header.gas_limit),
            OpCode::ChainId => U256::from(self.config.chain_id),
            OpCode::SelfBalance => self.world.account_or_default(&frame.recipient).balance,
            OpCode::BaseFee => self.header.base_fee,
            OpCode::Pop => {
                pop(frame);
                return Ok(Action::Next(next));
            }
            OpCode::MLoad => {
                let offset = pop(frame);
                U256::from_big_endian(&frame.read_memory(offset.low_u64() as usize, 32))
            }
            OpCode::MStore => {
                let (offset, value) = (pop(frame), pop(frame));
                let mut bytes = [0u8; 32];
                value.to_big_endian(&mut bytes);
                write(frame, offset, &bytes);
                return Ok(Action::Next(next));
            }
            OpCode::MStore8 => {
                let (offset, value) = (pop(frame), pop(frame));
                write(frame, offset, &[value.byte(0)]);
                return Ok(Action::Next(next));
            }
            OpCode::SLoad => {
                let key = pop(frame);
                frame.warm_storage.insert((frame.recipient, key));
                self.world.storage(&frame.recipient, &key)
            }
            OpCode::SStore => {
                let (key, value) = (pop(frame), pop(frame));
                let original = self.original_value(frame.recipient, key);
                let current = self.world.storage(&frame.recipient, &key);
                let refund = frame.gas_refund as i64 + sstore_refund(original, current, value);
                frame.gas_refund = refund.max(0) as u64;
                frame.warm_storage.insert((frame.recipient, key));
                self.world.set_storage(frame.recipient, key, value);
                return Ok(Action::Next(next));
            }
            OpCode::Jump => {
                let destination = pop(frame);
                return Ok(Action::Next(destination.low_u64() as usize));
            }
            OpCode::JumpI => {
                let (destination, condition) = (pop(frame), pop(frame));
                let pc = if condition.is_zero() {
                    next
                } else {
                    destination.low_u64() as usize
                };
                return Ok(Action::Next(pc));
            }
            OpCode::Pc => U256::from(frame.pc),
            OpCode::MSize => U256::from(frame.memory.len()),
            OpCode::Gas => U256::from(frame.remaining_gas),
            OpCode::JumpDest => return Ok(Action::Next(next)),
            OpCode::Push0 => U256::zero(),
            OpCode::Push(n) => {
                let value = opcode.push_value(&frame.code, frame.pc).unwrap_or_default();
                frame.stack.push(value);
                return Ok(Action::Next(next + n as usize));
            }
            OpCode::Dup(n) => frame.stack_item(n as usize - 1),
            OpCode::Swap(n) => {
                let top = frame.stack.len() - 1;
                frame.stack.swap(top, top - n as usize);
                return Ok(Action::Next(next));
            }
            OpCode::Log(n) => {
                let (offset, size) = (pop(frame), pop(frame));
                let topics = (0..n).map(|_| H256::from_uint(&pop(frame))).collect();
                let data = read(frame, offset, size);
                self.logs.push(Log {
                    address: frame.recipient,
                    topics,
                    data,
                });
                return Ok(Action::Next(next));
            }
            OpCode::Create | OpCode::Create2 => return Ok(self.create(frame, opcode, controller)),
            OpCode::Call | OpCode::CallCode | OpCode::DelegateCall | OpCode::StaticCall => {
                return self.call(frame, opcode, controller)
            }
            OpCode::Return | OpCode::Revert => {
                let (offset, size) = (pop(frame), pop(frame));
                frame.output_data = read(frame, offset, size);
                let outcome = if opcode == OpCode::Return {
                    FrameOutcome::Success
                } else {
                    FrameOutcome::Revert
                };
                return Ok(Action::Halt(outcome));
            }
            OpCode::SelfDestruct => {
                let beneficiary = u256_to_address(pop(frame));
                frame.warm_addresses.insert(beneficiary);
                let balance = self.world.account_or_default(&frame.recipient).balance;
                if let Some(account) = self.world.account_mut(&frame.recipient) {
                    account.balance = U256::zero();
                }
                self.credit(beneficiary, balance);
                if !self.self_destructs.contains(&frame.recipient) {
                    self.self_destructs.push(frame.recipient);
                }
                return Ok(Action::Halt(FrameOutcome::Success));
            }
            _ => bail!("{opcode:?} is not supported by the test host"),
        };
        frame.stack.push(value);
        Ok(Action::Next(next))
    }

    fn call(
        &mut self,
        frame: &mut HostFrame,
        opcode: OpCode,
        controller: &PlatformController,
    ) -> Result<Action> {
        let next = frame.pc + 1;
        let requested = pop(frame);
        let callee = u256_to_address(pop(frame));
        let value = match opcode {
            OpCode::Call | OpCode::CallCode => pop(frame),
            _ => U256::zero(),
        };
        let (args_offset, args_size) = (pop(frame), pop(frame));
        let (ret_offset, ret_size) = (pop(frame), pop(frame));
        frame.warm_addresses.insert(callee);
        frame.return_data.clear();
        if !controller.aborts().is_empty() {
            frame.stack.push(U256::zero());
            return Ok(Action::Next(next));
        }

        let transfer = Transfer {
            from: frame.recipient,
            to: callee,
            value: if opcode == OpCode::Call {
                value
            } else {
                U256::zero()
            },
            deployment: false,
        };
        let cap = frame.remaining_gas - frame.remaining_gas / 64;
        let out_of_pocket = if requested < U256::from(cap) {
            requested.low_u64()
        } else {
            cap
        };
        let stipend = if value.is_zero() { 0 } else { G_CALL_STIPEND };

        if let Some(precompile) = Precompile::from_address(&callee) {
            let given = out_of_pocket + stipend;
            frame.remaining_gas -= out_of_pocket;
            let input = read(frame, args_offset, args_size);
            let outcome = match precompile.cost(&input).filter(|&cost| cost <= given) {
                Some(cost) => run_precompile(precompile, &input)?.map(|output| (cost, output)),
                None => None,
            };
            let Some((cost, output)) = outcome else {
                frame.stack.push(U256::zero());
                return Ok(Action::Next(next));
            };
            transfer.apply(&mut self.world);
            frame.remaining_gas += given - cost;
            let copied = (ret_size.low_u64() as usize).min(output.len());
            write(frame, ret_offset, &output[..copied]);
            frame.return_data = output;
            frame.stack.push(U256::one());
            return Ok(Action::Next(next));
        }

        let code = self.world.account_or_default(&callee).code;
        if code.is_empty() {
            transfer.apply(&mut self.world);
            frame.stack.push(U256::one());
            return Ok(Action::Next(next));
        }

        frame.remaining_gas -= out_of_pocket;
        let child = HostFrame {
            depth: frame.depth + 1,
            frame_type: FrameType::MessageCall,
            is_static: frame.is_static || opcode == OpCode::StaticCall,
            sender: if opcode == OpCode::DelegateCall {
                frame.sender
            } else {
                frame.recipient
            },
            recipient: match opcode {
                OpCode::Call | OpCode::StaticCall => callee,
                _ => frame.recipient,
            },
            contract: callee,
            value: if opcode == OpCode::DelegateCall {
                frame.value
            } else {
                value
            },
            input_data: read(frame, args_offset, args_size),
            code,
            remaining_gas: out_of_pocket + stipend,
            gas_refund: frame.gas_refund,
            warm_addresses: frame.warm_addresses.clone(),
            warm_storage: frame.warm_storage.clone(),
            ..Default::default()
        };
        Ok(Action::Spawn {
            child: Box::new(child),
            transfer,
            returns_to: ReturnTarget::Memory {
                offset: ret_offset.low_u64() as usize,
                size: ret_size.low_u64() as usize,
            },
        })
    }

    fn create(&mut self, frame: &mut HostFrame, opcode: OpCode, controller: &PlatformController) -> Action {
        let next = frame.pc + 1;
        let nonce = self.world.account_or_default(&frame.recipient).nonce;
        let createe = createe_address(frame, nonce);
        let (value, offset, size) = (pop(frame), pop(frame), pop(frame));
        if opcode == OpCode::Create2 {
            pop(frame);
        }
        frame.return_data.clear();
        if !controller.aborts().is_empty() {
            frame.stack.push(U256::zero());
            return Action::Next(next);
        }

        if let Some(creator) = self.world.account_mut(&frame.recipient) {
            creator.nonce += 1;
        }
        frame.warm_addresses.insert(createe);
        let out_of_pocket = frame.remaining_gas - frame.remaining_gas / 64;
        if controller.create_failure() {
            frame.remaining_gas -= out_of_pocket;
            frame.stack.push(U256::zero());
            return Action::Next(next);
        }

        let init_code = read(frame, offset, size);
        let transfer = Transfer {
            from: frame.recipient,
            to: createe,
            value,
            deployment: true,
        };
        if init_code.is_empty() {
            transfer.apply(&mut self.world);
            frame.stack.push(address_to_u256(createe));
            return Action::Next(next);
        }

        frame.remaining_gas -= out_of_pocket;
        let child = HostFrame {
            depth: frame.depth + 1,
            frame_type: FrameType::ContractCreation,
            sender: frame.recipient,
            recipient: createe,
            contract: createe,
            value,
            code: init_code,
            remaining_gas: out_of_pocket,
            gas_refund: frame.gas_refund,
            warm_addresses: frame.warm_addresses.clone(),
            warm_storage: frame.warm_storage.clone(),
            ..Default::default()
        };
        Action::Spawn {
            child: Box::new(child),
            transfer,
            returns_to: ReturnTarget::Createe(createe),
        }
    }
}

/// Hands the result of `child` back to its parent.
fn resume(frame: &mut HostFrame, child: HostFrame, returns_to: ReturnTarget) {
    let success = child.outcome.is_success();
    frame.remaining_gas += child.remaining_gas;
    if success {
        frame.warm_addresses = child.warm_addresses;
        frame.warm_storage = child.warm_storage;
        frame.gas_refund = child.gas_refund;
    }
    match returns_to {
        ReturnTarget::Memory { offset, size } => {
            frame.return_data = match child.outcome {
                FrameOutcome::Success | FrameOutcome::Revert => child.output_data,
                _ => Vec::new(),
            };
            let copied = size.min(frame.return_data.len());
            if let Some(target) = frame.memory.get_mut(offset..offset + copied) {
                target.copy_from_slice(&frame.return_data[..copied]);
            }
            frame.stack.push(bool_word(success));
        }
        ReturnTarget::Createe(createe) => {
            frame.return_data = if child.outcome == FrameOutcome::Revert {
                child.output_data
            } else {
                Vec::new()
            };
            frame.stack.push(if success {
                address_to_u256(createe)
            } else {
                U256::zero()
            });
        }
    }
}

fn halt_reason(exceptions: Exceptions) -> HaltReason {
    [
        (Exceptions::STACK_UNDERFLOW, HaltReason::InsufficientStackItems),
        (Exceptions::STACK_OVERFLOW, HaltReason::TooManyStackItems),
        (Exceptions::INVALID_OPCODE, HaltReason::InvalidOperation),
        (Exceptions::STATIC_FAULT, HaltReason::IllegalStateChange),
        (Exceptions::JUMP_FAULT, HaltReason::InvalidJumpDestination),
        (
            Exceptions::RETURN_DATA_COPY_FAULT,
            HaltReason::InvalidReturnDataBufferAccess,
        ),
        (Exceptions::MAX_CODE_SIZE, HaltReason::CodeSizeLimit),
        (Exceptions::INVALID_CODE_PREFIX, HaltReason::InvalidCode),
        (Exceptions::MEMORY_EXPANSION, HaltReason::OutOfMemory),
    ]
    .into_iter()
    .find(|(flag, _)| exceptions.contains(*flag))
    .map_or(HaltReason::InsufficientGas, |(_, reason)| reason)
}

/// Refund counter change of an `SSTORE`, net of clearing refunds.
fn sstore_refund(original: U256, current: U256, next: U256) -> i64 {
    if current == next {
        return 0;
    }
    if original == current {
        return if !original.is_zero() && next.is_zero() {
            R_SCLEAR
        } else {
            0
        };
    }
    let mut refund = 0;
    if !original.is_zero() {
        if current.is_zero() {
            refund -= R_SCLEAR;
        } else if next.is_zero() {
            refund += R_SCLEAR;
        }
    }
    if original == next {
        refund += if original.is_zero() {
            (G_SSET - G_WARM_ACCESS) as i64
        } else {
            (G_SRESET - G_WARM_ACCESS) as i64
        };
    }
    refund
}

fn binary(opcode: OpCode, a: U256, b: U256) -> U256 {
    match opcode {
        OpCode::Add => a.overflowing_add(b).0,
        OpCode::Sub => a.overflowing_sub(b).0,
        OpCode::Mul => a.overflowing_mul(b).0,
        OpCode::Div => a.checked_div(b).unwrap_or_default(),
        OpCode::Mod => a.checked_rem(b).unwrap_or_default(),
        OpCode::Exp => a.overflowing_pow(b).0,
        OpCode::Lt => bool_word(a < b),
        OpCode::Gt => bool_word(a > b),
        OpCode::Eq => bool_word(a == b),
        OpCode::And => a & b,
        OpCode::Or => a | b,
        OpCode::Xor => a ^ b,
        OpCode::Byte if a < U256::from(32) => U256::from(b.byte(31 - a.as_usize())),
        OpCode::Shl if a < U256::from(256) => b << a.as_usize(),
        OpCode::Shr if a < U256::from(256) => b >> a.as_usize(),
        _ => U256::zero(),
    }
}

/// Output of a precompile given enough gas, `None` if it rejects its
/// input. Only the precompiles needing no cryptography run here.
fn run_precompile(precompile: Precompile, input: &[u8]) -> Result<Option<Vec<u8>>> {
    match precompile {
        Precompile::Identity => Ok(Some(input.to_vec())),
        Precompile::EcRecover => {
            let v = U256::from_big_endian(&padded(input, U256::from(32), 32));
            if v != U256::from(27) && v != U256::from(28) {
                return Ok(Some(Vec::new()));
            }
            bail!("ECRECOVER of a candidate signature is not supported by the test host")
        }
        _ => bail!("{precompile:?} is not supported by the test host"),
    }
}

fn bool_word(value: bool) -> U256 {
    U256::from(value as u8)
}

/// Stack exceptions are caught before an opcode is applied.
fn pop(frame: &mut HostFrame) -> U256 {
    frame.stack.pop().unwrap_or_default()
}

fn read(frame: &HostFrame, offset: U256, size: U256) -> Vec<u8> {
    if size.is_zero() {
        return Vec::new();
    }
    frame.read_memory(offset.low_u64() as usize, size.low_u64() as usize)
}

/// Memory was expanded over the written range beforehand.
fn write(frame: &mut HostFrame, offset: U256, bytes: &[u8]) {
    if bytes.is_empty() {
        return;
    }
    let start = offset.low_u64() as usize;
    if let Some(target) = frame.memory.get_mut(start..start + bytes.len()) {
        target.copy_from_slice(bytes);
    }
}

/// `size` bytes of `source` from `offset`, zero-padded past its end.
fn padded(source: &[u8], offset: U256, size: usize) -> Vec<u8> {
    let start = if offset > U256::from(source.len()) {
        source.len()
    } else {
        offset.as_usize()
    };
    (0..size)
        .map(|i| source.get(start + i).copied().unwrap_or_default())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clearing_a_slot_set_in_the_same_transaction_refunds_the_set() {
        let (zero, one) = (U256::zero(), U256::one());
        assert_eq!(sstore_refund(zero, one, zero), (G_SSET - G_WARM_ACCESS) as i64);
        assert_eq!(sstore_refund(one, one, zero), R_SCLEAR);
        assert_eq!(sstore_refund(one, zero, one), -R_SCLEAR + (G_SRESET - G_WARM_ACCESS) as i64);
        assert_eq!(sstore_refund(one, one, one), 0);
    }

    #[test]
    fn copies_are_zero_padded() {
        assert_eq!(padded(&[1, 2, 3], U256::from(2), 3), vec![3, 0, 0]);
        assert_eq!(padded(&[1, 2, 3], U256::MAX, 2), vec![0, 0]);
    }

    #[test]
    fn byte_reads_from_the_most_significant_end() {
        let word = U256::from(0xabcd);
        assert_eq!(binary(OpCode::Byte, U256::from(31), word), U256::from(0xcd));
        assert_eq!(binary(OpCode::Byte, U256::from(30), word), U256::from(0xab));
        assert_eq!(binary(OpCode::Byte, U256::from(32), word), U256::zero());
    }
}
