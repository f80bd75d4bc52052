use ethereum_types::{Address, U256};
use zktracer_common::address_hi_lo;

use crate::callstack::{CallStack, FrameId, MemorySpan};

/// What a context fragment does.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContextKind {
    ReadCurrent,
    /// Initializes a freshly entered context.
    Initialize,
    /// An exceptional halt leaves the caller with empty return data.
    ExecutionProvidesEmptyReturnData,
    /// A `RETURN` hands its output to the caller.
    ExecutionProvidesReturnData,
    /// An aborted call, or a call to an account without code, leaves the
    /// current context with empty return data.
    NonExecutionProvidesEmptyReturnData,
    /// A child context returned data to its caller.
    ProvideReturnData,
}

impl ContextKind {
    /// Whether the fragment updates the return data of the context it
    /// shows.
    pub fn updates(self) -> bool {
        matches!(
            self,
            Self::ExecutionProvidesEmptyReturnData
                | Self::ExecutionProvidesReturnData
                | Self::NonExecutionProvidesEmptyReturnData
                | Self::ProvideReturnData
        )
    }
}

/// Context-level data of a frame.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContextSnapshot {
    pub frame_id: FrameId,
    pub context_number: u32,
    pub caller_context_number: u32,
    pub is_root: bool,
    pub is_static: bool,
    pub is_deployment: bool,
    pub account_address: Address,
    pub account_deployment_number: u32,
    pub code_address: Address,
    pub code_deployment_number: u32,
    pub code_deployment_status: bool,
    pub caller_address: Address,
    pub value: U256,
    pub call_data_context_number: u32,
    pub call_data_span: MemorySpan,
    pub return_data_target: MemorySpan,
}

impl ContextSnapshot {
    /// Snapshot of frame `id`, or of the universal parent if `id` is
    /// unknown.
    pub fn of(callstack: &CallStack, id: FrameId) -> Self {
        let Some(frame) = callstack.get(id) else {
            return Self::default();
        };
        let caller_context_number = frame
            .parent
            .and_then(|parent| callstack.get(parent))
            .map_or(0, |parent| parent.context_number);
        Self {
            frame_id: id,
            context_number: frame.context_number,
            caller_context_number,
            is_root: frame.is_root(),
            is_static: frame.is_static(),
            is_deployment: frame.is_deployment,
            account_address: frame.account_address,
            account_deployment_number: frame.account_deployment_number,
            code_address: frame.code_address,
            code_deployment_number: frame.code_deployment_number,
            code_deployment_status: frame.code_deployment_status,
            caller_address: frame.caller_address,
            value: frame.value,
            call_data_context_number: frame.call_data_context_number,
            call_data_span: frame.call_data_span,
            return_data_target: frame.return_data_target,
        }
    }
}

/// A context row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContextFragment {
    pub kind: ContextKind,
    pub context: ContextSnapshot,
    /// Context that provided the return data, zero for empty return data.
    pub return_data_context_number: u32,
    pub return_data_span: MemorySpan,
}

impl ContextFragment {
    pub fn read_current(callstack: &CallStack) -> Self {
        Self::plain(ContextKind::ReadCurrent, callstack, callstack.current_id())
    }

    pub fn initialize(callstack: &CallStack, id: FrameId) -> Self {
        Self::plain(ContextKind::Initialize, callstack, id)
    }

    /// Empty return data for the caller of the current frame.
    pub fn execution_provides_empty_return_data(callstack: &CallStack) -> Self {
        let parent = callstack.current().parent.unwrap_or_default();
        Self::plain(
            ContextKind::ExecutionProvidesEmptyReturnData,
            callstack,
            parent,
        )
    }

    /// The output of the current frame handed to its caller.
    pub fn execution_provides_return_data(callstack: &CallStack) -> Self {
        let current = callstack.current();
        Self {
            kind: ContextKind::ExecutionProvidesReturnData,
            context: ContextSnapshot::of(callstack, current.parent.unwrap_or_default()),
            return_data_context_number: current.context_number,
            return_data_span: current.output_data_span,
        }
    }

    /// Empty return data for the current frame.
    pub fn non_execution_provides_empty_return_data(callstack: &CallStack) -> Self {
        Self::plain(
            ContextKind::NonExecutionProvidesEmptyReturnData,
            callstack,
            callstack.current_id(),
        )
    }

    /// Return data `span` of the context numbered `provider` handed to
    /// frame `receiver`.
    pub fn provide_return_data(
        callstack: &CallStack,
        receiver: FrameId,
        provider: u32,
        span: MemorySpan,
    ) -> Self {
        Self {
            kind: ContextKind::ProvideReturnData,
            context: ContextSnapshot::of(callstack, receiver),
            return_data_context_number: provider,
            return_data_span: span,
        }
    }

    fn plain(kind: ContextKind, callstack: &CallStack, id: FrameId) -> Self {
        let (return_data_context_number, return_data_span) = match kind {
            ContextKind::ReadCurrent | ContextKind::Initialize => callstack
                .get(id)
                .map(|f| (f.return_data_context_number, f.return_data_span))
                .unwrap_or_default(),
            _ => Default::default(),
        };
        Self {
            kind,
            context: ContextSnapshot::of(callstack, id),
            return_data_context_number,
            return_data_span,
        }
    }

    pub const COLUMNS: &'static [&'static str] = &[
        "CON_CONTEXT_NUMBER",
        "CON_CALLER_CONTEXT_NUMBER",
        "CON_IS_ROOT",
        "CON_IS_STATIC",
        "CON_IS_DEPLOYMENT",
        "CON_ACCOUNT_ADDRESS_HI",
        "CON_ACCOUNT_ADDRESS_LO",
        "CON_ACCOUNT_DEPLOYMENT_NUMBER",
        "CON_BYTE_CODE_ADDRESS_HI",
        "CON_BYTE_CODE_ADDRESS_LO",
        "CON_BYTE_CODE_DEPLOYMENT_NUMBER",
        "CON_BYTE_CODE_DEPLOYMENT_STATUS",
        "CON_CALLER_ADDRESS_HI",
        "CON_CALLER_ADDRESS_LO",
        "CON_CALL_VALUE",
        "CON_CALL_DATA_CONTEXT_NUMBER",
        "CON_CALL_DATA_OFFSET",
        "CON_CALL_DATA_SIZE",
        "CON_RETURN_AT_OFFSET",
        "CON_RETURN_AT_CAPACITY",
        "CON_UPDATE",
        "CON_RETURN_DATA_CONTEXT_NUMBER",
        "CON_RETURN_DATA_OFFSET",
        "CON_RETURN_DATA_SIZE",
    ];

    pub fn values(&self) -> Vec<U256> {
        let c = &self.context;
        let bit = |b: bool| U256::from(b as u8);
        let address = |a: Address| {
            let (hi, lo) = address_hi_lo(a);
            [U256::from(hi), U256::from(lo)]
        };
        let mut values = vec![
            U256::from(c.context_number),
            U256::from(c.caller_context_number),
            bit(c.is_root),
            bit(c.is_static),
            bit(c.is_deployment),
        ];
        values.extend(address(c.account_address));
        values.push(U256::from(c.account_deployment_number));
        values.extend(address(c.code_address));
        values.extend([
            U256::from(c.code_deployment_number),
            bit(c.code_deployment_status),
        ]);
        values.extend(address(c.caller_address));
        values.extend([
            c.value,
            U256::from(c.call_data_context_number),
            U256::from(c.call_data_span.offset),
            U256::from(c.call_data_span.length),
            U256::from(c.return_data_target.offset),
            U256::from(c.return_data_target.length),
            bit(self.kind.updates()),
            U256::from(self.return_data_context_number),
            U256::from(self.return_data_span.offset),
            U256::from(self.return_data_span.length),
        ]);
        values
    }
}
