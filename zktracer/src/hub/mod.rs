//! The hub: turns the hooks of a host EVM into trace sections.
//!
//! The hub owns every piece of state of a conflation: the call stack, the
//! sections, the deferred actions, the deployment numbers, the transaction
//! metadata and the sub-modules. Hooks must be invoked in the order the host
//! executes; an error from any hook poisons the hub.

mod checkpoints;
mod deployment;
mod execution;
mod state;
mod transaction;

use std::collections::BTreeMap;

use ethereum_types::{Address, U256};
use log::error;

pub use self::deployment::DeploymentInfo;
pub use self::state::{HubProcessingPhase, Stamps, State};
use crate::callstack::CallStack;
use crate::config::TracerConfig;
use crate::defer::{DeferRegistry, RollbackAction};
use crate::error::{TracerError, TracerResult};
use crate::fragment::{
    AccountFragment, AccountSnapshot, ContextFragment, DomSubStamps, Fragment, ImcFragment,
    OccurrenceFlags, ScenarioFragment, StackFragment, StorageFragment, TransactionFragment,
};
use crate::gas::GasProjection;
use crate::host::{BlockBody, BlockHeader, HostFrame, Log, OperationResult, Transaction, WorldView};
use crate::metadata::{
    FragmentId, Occurrences, TransactionProcessingMetadata, TransactionStack,
};
use crate::module::trace::{ColumnHeader, Trace};
use crate::module::Modules;
use crate::opcode::OpCode;
use crate::precompile::Precompile;
use crate::section::{CommonValues, SectionRef, TraceSection};
use crate::signals::{Exceptions, PlatformController};

/// Module key of the hub's own columns.
pub const HUB: &str = "HUB";

/// The opcode between its pre- and post-execution hooks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct PendingInstruction {
    pub section: SectionRef,
    pub opcode: OpCode,
    pub exceptions: Exceptions,
    pub projection: GasProjection,
    /// Whether a child context will be entered before the frame resumes.
    pub expects_child: bool,
    pub precompile: Option<PrecompileCall>,
}

/// A CALL served by a precompile instead of a child context.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct PrecompileCall {
    pub precompile: Precompile,
    /// `None` when the input is malformed.
    pub cost: Option<u64>,
    pub gas_paid_out_of_pocket: u64,
    /// Gas handed to the precompile, stipend included.
    pub gas_given: u64,
    pub undo_transfer: RollbackAction,
}

/// The tracer.
#[derive(Debug)]
pub struct Hub {
    pub(crate) config: TracerConfig,
    pub(crate) state: State,
    pub(crate) callstack: CallStack,
    pub(crate) defers: DeferRegistry,
    pub(crate) deployment_info: DeploymentInfo,
    pub(crate) transactions: TransactionStack,
    pub(crate) occurrences: Occurrences,
    pub(crate) modules: Modules,
    pub(crate) pch: PlatformController,
    pub(crate) pending: Option<PendingInstruction>,
    /// Set by the section of a CALL to a precompile until its
    /// post-execution.
    pub(crate) precompile_call: Option<PrecompileCall>,
    pub(crate) header: Option<BlockHeader>,
    pub(crate) block_count: usize,
    pub(crate) relative_block_number: u32,
    pub(crate) relative_transaction_number: u32,
    pub(crate) cumulative_gas_used: u64,
    next_fragment_id: FragmentId,
    poisoned: bool,
}

impl Hub {
    pub fn new(config: TracerConfig) -> Self {
        Self {
            config,
            state: State::new(),
            callstack: CallStack::new(),
            defers: DeferRegistry::new(),
            deployment_info: DeploymentInfo::new(),
            transactions: TransactionStack::new(),
            occurrences: Occurrences::default(),
            modules: Modules::default(),
            pch: PlatformController::default(),
            pending: None,
            precompile_call: None,
            header: None,
            block_count: 0,
            relative_block_number: 0,
            relative_transaction_number: 0,
            cumulative_gas_used: 0,
            next_fragment_id: 0,
            poisoned: false,
        }
    }

    /// Runs `hook`, poisoning the hub if it fails.
    fn guard<T>(&mut self, hook: impl FnOnce(&mut Self) -> TracerResult<T>) -> TracerResult<T> {
        if self.poisoned {
            return Err(TracerError::Poisoned);
        }
        let result = hook(self);
        if let Err(err) = &result {
            error!("tracer poisoned: {err}");
            self.poisoned = true;
        }
        result
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    pub fn trace_start_conflation(&mut self, block_count: usize) -> TracerResult<()> {
        self.guard(|hub| hub.start_conflation(block_count))
    }

    pub fn trace_start_block(&mut self, header: &BlockHeader) -> TracerResult<()> {
        self.guard(|hub| hub.start_block(header))
    }

    pub fn trace_start_transaction(
        &mut self,
        world: &dyn WorldView,
        tx: &Transaction,
    ) -> TracerResult<()> {
        self.guard(|hub| hub.start_transaction(world, tx))
    }

    pub fn trace_context_enter(
        &mut self,
        world: &dyn WorldView,
        frame: &HostFrame,
    ) -> TracerResult<()> {
        self.guard(|hub| hub.context_enter(world, frame))
    }

    pub fn trace_pre_execution(
        &mut self,
        world: &dyn WorldView,
        frame: &HostFrame,
    ) -> TracerResult<()> {
        self.guard(|hub| hub.pre_execution(world, frame))
    }

    pub fn trace_post_execution(
        &mut self,
        world: &dyn WorldView,
        frame: &HostFrame,
        result: &OperationResult,
    ) -> TracerResult<()> {
        self.guard(|hub| hub.post_execution(world, frame, result))
    }

    pub fn trace_context_re_enter(
        &mut self,
        world: &dyn WorldView,
        frame: &HostFrame,
    ) -> TracerResult<()> {
        self.guard(|hub| hub.context_re_enter(world, frame))
    }

    pub fn trace_context_exit(
        &mut self,
        world: &dyn WorldView,
        frame: &HostFrame,
    ) -> TracerResult<()> {
        self.guard(|hub| hub.context_exit(world, frame))
    }

    pub fn trace_end_transaction(
        &mut self,
        world: &dyn WorldView,
        tx: &Transaction,
        success: bool,
        logs: &[Log],
        self_destructs: &[Address],
    ) -> TracerResult<()> {
        self.guard(|hub| hub.end_transaction(world, tx, success, logs, self_destructs))
    }

    pub fn trace_end_block(&mut self, header: &BlockHeader, body: &BlockBody) -> TracerResult<()> {
        self.guard(|hub| hub.end_block(header, body))
    }

    pub fn trace_end_conflation(&mut self, world: &dyn WorldView) -> TracerResult<()> {
        self.guard(|hub| hub.end_conflation(world))
    }

    pub fn phase(&self) -> HubProcessingPhase {
        self.state.phase
    }

    pub fn stamps(&self) -> Stamps {
        self.state.stamps
    }

    pub fn sections(&self) -> impl Iterator<Item = &TraceSection> {
        self.state.sections()
    }

    pub fn section(&self, section: SectionRef) -> Option<&TraceSection> {
        self.state.section(section)
    }

    pub fn transactions(&self) -> &TransactionStack {
        &self.transactions
    }

    /// Occurrence maps folded at the end of the conflation.
    pub fn occurrences(&self) -> &Occurrences {
        &self.occurrences
    }

    pub fn deployment_info(&self) -> &DeploymentInfo {
        &self.deployment_info
    }

    pub fn callstack(&self) -> &CallStack {
        &self.callstack
    }

    pub fn modules(&self) -> &Modules {
        &self.modules
    }

    pub fn config(&self) -> &TracerConfig {
        &self.config
    }

    pub(crate) fn metadata(&self) -> TracerResult<&TransactionProcessingMetadata> {
        self.transactions.current().ok_or_else(|| {
            TracerError::InvariantViolation("no transaction is being traced".into())
        })
    }

    pub(crate) fn metadata_mut(&mut self) -> TracerResult<&mut TransactionProcessingMetadata> {
        self.transactions.current_mut().ok_or_else(|| {
            TracerError::InvariantViolation("no transaction is being traced".into())
        })
    }

    pub(crate) fn section_mut(&mut self, section: SectionRef) -> TracerResult<&mut TraceSection> {
        self.state.section_mut(section).ok_or_else(|| {
            TracerError::InvariantViolation(format!("unknown section {section:?}"))
        })
    }

    pub(crate) fn expect_phase(
        &self,
        hook: &'static str,
        allowed: &[HubProcessingPhase],
    ) -> TracerResult<()> {
        if allowed.contains(&self.state.phase) {
            Ok(())
        } else {
            Err(TracerError::UnexpectedPhase {
                hook,
                phase: self.state.phase,
            })
        }
    }

    pub(crate) fn next_fragment_id(&mut self) -> FragmentId {
        self.next_fragment_id += 1;
        self.next_fragment_id
    }

    /// The state of `address` in `world`, with its deployment bookkeeping.
    pub(crate) fn snapshot(
        &self,
        world: &dyn WorldView,
        address: Address,
        is_warm: bool,
    ) -> AccountSnapshot {
        AccountSnapshot::canonical(world, &self.deployment_info, address, is_warm)
    }

    pub(crate) fn account_fragment(
        &mut self,
        before: AccountSnapshot,
        after: AccountSnapshot,
        dom_sub: DomSubStamps,
    ) -> AccountFragment {
        AccountFragment {
            id: self.next_fragment_id(),
            before,
            after,
            dom_sub,
            relative_block_number: self.relative_block_number,
            trimmed: false,
            requires_rom_lex: false,
            code_fragment_index: None,
        }
    }

    /// Common values of a section produced at `stamp` by the current frame.
    pub(crate) fn common_values(&self, stamp: u32) -> TracerResult<CommonValues> {
        let metadata = self.metadata()?;
        let frame = self.callstack.current();
        Ok(CommonValues {
            hub_stamp: stamp,
            absolute_transaction_number: metadata.absolute_transaction_number,
            relative_block_number: metadata.relative_block_number,
            phase: self.state.phase,
            frame_id: frame.id,
            context_number: frame.context_number,
            context_number_new: frame.context_number,
            log_stamp: self.state.stamps.log,
            ..Default::default()
        })
    }

    /// Rows of the hub trace.
    pub fn line_count(&self) -> usize {
        self.state.line_count()
    }

    /// Rows of the hub and of every sub-module, by module key.
    pub fn line_counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        counts.insert(HUB, self.line_count());
        for module in self.modules.all() {
            counts.insert(module.module_key(), module.line_count());
        }
        counts
    }

    fn hub_columns() -> impl Iterator<Item = &'static str> {
        CommonValues::COLUMNS
            .iter()
            .chain(Fragment::PERSPECTIVES.iter())
            .chain(StackFragment::COLUMNS)
            .chain(ContextFragment::COLUMNS)
            .chain(AccountFragment::COLUMNS)
            .chain(StorageFragment::COLUMNS)
            .chain(ImcFragment::COLUMNS)
            .chain(ScenarioFragment::COLUMNS)
            .chain(TransactionFragment::COLUMNS)
            .copied()
    }

    /// Headers of every column, the hub's first, then the sub-modules' in
    /// their fixed order.
    pub fn columns_headers(&self) -> Vec<ColumnHeader> {
        let length = self.line_count();
        let mut headers: Vec<ColumnHeader> = Self::hub_columns()
            .map(|column| ColumnHeader::new(HUB, column, 32, length))
            .collect();
        for module in self.modules.all() {
            headers.extend(module.columns_headers());
        }
        headers
    }

    /// Writes the hub rows, then the rows of every sub-module.
    pub fn commit(&self, trace: &mut Trace) {
        let occurrences = self.fold_occurrences();
        let empty = |columns: &[&str]| vec![U256::zero(); columns.len()];
        for metadata in self.transactions.iter() {
            let tx_occurrences = &metadata.occurrences;
            for section in self
                .state
                .transaction_sections(metadata.absolute_transaction_number)
            {
                let revert_stamp = self
                    .callstack
                    .get(section.common.frame_id)
                    .and_then(|frame| frame.revert_stamp)
                    .filter(|_| section.kind.is_instruction());
                let rows = section.line_count();
                for (row, fragment) in section.fragments.iter().enumerate() {
                    let mut values = section.common.values(revert_stamp, row, rows);
                    values.extend(
                        Fragment::PERSPECTIVES
                            .iter()
                            .map(|p| U256::from((*p == fragment.perspective()) as u8)),
                    );
                    let mut stack = empty(StackFragment::COLUMNS);
                    let mut context = empty(ContextFragment::COLUMNS);
                    let mut account = empty(AccountFragment::COLUMNS);
                    let mut storage = empty(StorageFragment::COLUMNS);
                    let mut imc = empty(ImcFragment::COLUMNS);
                    let mut scenario = empty(ScenarioFragment::COLUMNS);
                    let mut transaction = empty(TransactionFragment::COLUMNS);
                    match fragment {
                        Fragment::Stack(f) => stack = f.values(),
                        Fragment::Context(f) => context = f.values(),
                        Fragment::Account(f) => {
                            account = f.values(occurrences.account_flags(tx_occurrences, f))
                        }
                        Fragment::Storage(f) => {
                            let mut f = f.clone();
                            f.block_deployment_numbers = occurrences
                                .deployment_number_range(&f.address, f.relative_block_number);
                            storage = f.values(occurrences.storage_flags(tx_occurrences, &f));
                        }
                        Fragment::Imc(f) => imc = f.values(),
                        Fragment::Scenario(f) => scenario = f.values(),
                        Fragment::Transaction(f) => {
                            transaction = self
                                .transactions
                                .get(f.absolute_transaction_number)
                                .map_or_else(|| empty(TransactionFragment::COLUMNS), |m| f.values(m))
                        }
                    }
                    for group in [stack, context, account, storage, imc, scenario, transaction] {
                        values.extend(group);
                    }
                    for (column, value) in Self::hub_columns().zip(values) {
                        trace.push(HUB, column, value);
                    }
                }
            }
        }
        for module in self.modules.all() {
            module.commit(trace);
        }
    }

    /// Folds the occurrences of every transaction traced so far.
    pub(crate) fn fold_occurrences(&self) -> Occurrences {
        Occurrences::fold(
            self.transactions
                .iter()
                .map(|m| (m.relative_block_number, &m.occurrences)),
        )
    }

    /// Occurrence flags of an account fragment, against the transactions
    /// traced so far.
    pub fn account_flags(&self, tx: u32, fragment: &AccountFragment) -> OccurrenceFlags {
        match self.transactions.get(tx) {
            Some(m) => self.fold_occurrences().account_flags(&m.occurrences, fragment),
            None => OccurrenceFlags::default(),
        }
    }

    /// Occurrence flags of a storage fragment, against the transactions
    /// traced so far.
    pub fn storage_flags(&self, tx: u32, fragment: &StorageFragment) -> OccurrenceFlags {
        match self.transactions.get(tx) {
            Some(m) => self.fold_occurrences().storage_flags(&m.occurrences, fragment),
            None => OccurrenceFlags::default(),
        }
    }
}
