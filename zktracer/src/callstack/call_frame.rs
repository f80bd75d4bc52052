use ethereum_types::{Address, U256};

use super::Stack;
use crate::gas::MemoryRegion;
use crate::opcode::OpCode;
use crate::section::SectionRef;

/// Index of a frame in the [`CallStack`](super::CallStack) arena.
pub type FrameId = usize;

/// Id of the universal parent frame.
pub const UNIVERSAL_PARENT: FrameId = 0;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CallFrameType {
    /// The universal parent, shared by every transaction of a conflation.
    #[default]
    Empty,
    /// Holds the call data of a transaction.
    TransactionCallData,
    /// The depth zero frame of a transaction.
    Root,
    Standard,
    Static,
    /// A nested deployment.
    Deployment,
}

/// A byte range of memory.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct MemorySpan {
    pub offset: u64,
    pub length: u64,
}

impl MemorySpan {
    pub const fn new(offset: u64, length: u64) -> Self {
        Self { offset, length }
    }

    pub const fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// The span of a memory region known not to raise a memory expansion
    /// exception. Empty regions are normalized to offset zero.
    pub fn from_region(region: &MemoryRegion) -> Self {
        if region.size.is_zero() {
            return Self::default();
        }
        Self {
            offset: region.offset.low_u64(),
            length: region.size.low_u64(),
        }
    }
}

/// Data required to push a new frame.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameEntry {
    pub frame_type: CallFrameType,
    pub context_number: u32,
    pub is_deployment: bool,
    pub value: U256,
    pub gas: u64,
    pub account_address: Address,
    pub account_deployment_number: u32,
    pub code_address: Address,
    pub code_deployment_number: u32,
    /// Whether the code owner is under deployment.
    pub code_deployment_status: bool,
    pub bytecode: Vec<u8>,
    pub caller_address: Address,
    pub call_data: Vec<u8>,
    pub call_data_span: MemorySpan,
    pub call_data_context_number: u32,
    pub return_data_target: MemorySpan,
}

/// One execution context.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CallFrame {
    pub id: FrameId,
    pub context_number: u32,
    /// `None` for the universal parent only.
    pub parent: Option<FrameId>,
    pub children: Vec<FrameId>,
    pub depth: usize,
    pub frame_type: CallFrameType,
    pub is_deployment: bool,
    pub account_address: Address,
    pub account_deployment_number: u32,
    pub code_address: Address,
    pub code_deployment_number: u32,
    pub code_deployment_status: bool,
    pub bytecode: Vec<u8>,
    pub caller_address: Address,
    pub value: U256,
    pub gas_at_entry: u64,
    /// Gas left when the frame exited.
    pub gas_at_exit: u64,
    pub call_data: Vec<u8>,
    pub call_data_span: MemorySpan,
    pub call_data_context_number: u32,
    pub output_data: Vec<u8>,
    pub output_data_span: MemorySpan,
    pub return_data: Vec<u8>,
    pub return_data_span: MemorySpan,
    pub return_data_context_number: u32,
    pub return_data_target: MemorySpan,
    /// Hub stamp of the first revert affecting this frame.
    pub revert_stamp: Option<u32>,
    pub stack: Stack,
    pub opcode: OpCode,
    /// Section of the CALL or CREATE currently waiting for a child context
    /// to return.
    pub child_spanning_section: Option<SectionRef>,
    /// Remaining gas before the CALL or CREATE that spawned the last child.
    pub gas_before_child: u64,
}

impl CallFrame {
    pub(crate) fn from_entry(id: FrameId, parent: FrameId, depth: usize, entry: FrameEntry) -> Self {
        Self {
            id,
            context_number: entry.context_number,
            parent: Some(parent),
            depth,
            frame_type: entry.frame_type,
            is_deployment: entry.is_deployment,
            account_address: entry.account_address,
            account_deployment_number: entry.account_deployment_number,
            code_address: entry.code_address,
            code_deployment_number: entry.code_deployment_number,
            code_deployment_status: entry.code_deployment_status,
            bytecode: entry.bytecode,
            caller_address: entry.caller_address,
            value: entry.value,
            gas_at_entry: entry.gas,
            call_data: entry.call_data,
            call_data_span: entry.call_data_span,
            call_data_context_number: entry.call_data_context_number,
            return_data_target: entry.return_data_target,
            opcode: OpCode::Stop,
            ..Default::default()
        }
    }

    pub fn is_root(&self) -> bool {
        self.frame_type == CallFrameType::Root
    }

    pub fn is_static(&self) -> bool {
        self.frame_type == CallFrameType::Static
    }

    pub fn reverted(&self) -> bool {
        self.revert_stamp.is_some()
    }

    /// Whether the frame runs deployed code rather than init code.
    pub fn is_message_call(&self) -> bool {
        !self.is_deployment
    }

    /// Clears the frame's output, as done when it halts exceptionally.
    pub fn squash_output(&mut self) {
        self.output_data.clear();
        self.output_data_span = MemorySpan::default();
    }

    /// Clears the return data the frame received from its last child.
    pub fn squash_return_data(&mut self) {
        self.return_data.clear();
        self.return_data_span = MemorySpan::default();
        self.return_data_context_number = 0;
    }
}
