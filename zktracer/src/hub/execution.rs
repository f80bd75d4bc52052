use ethereum_types::U256;
use log::{debug, trace};

use super::{Hub, HubProcessingPhase, PendingInstruction, PrecompileCall};
use crate::callstack::{CallFrameType, FrameEntry, FrameId, MemorySpan};
use crate::defer::ReentryAction;
use crate::error::{TracerError, TracerResult};
use crate::fragment::{
    CallScenario, ContextFragment, CreateScenario, Fragment, ScenarioFragment, StackFragment,
};
use crate::gas::{self, GasProjection};
use crate::host::{FrameOutcome, HostFrame, OperationResult, WorldView};
use crate::module::code::ContractMetadata;
use crate::module::imc::GasOperation;
use crate::opcode::OpCode;
use crate::section::{section_kind, Instruction, SectionRef, TraceSection};
use crate::signals::{Exceptions, Signals};
use crate::{invariant, violation};

impl Hub {
    /// Whether the context hooks of the current transaction are ignored: a
    /// transaction without EVM execution has no contexts to trace.
    fn ignores_contexts(&self) -> TracerResult<bool> {
        Ok(self.state.phase == HubProcessingPhase::TxSkip
            && !self.metadata()?.requires_evm_execution)
    }

    pub(super) fn context_enter(
        &mut self,
        _world: &dyn WorldView,
        frame: &HostFrame,
    ) -> TracerResult<()> {
        if self.ignores_contexts()? {
            return Ok(());
        }
        self.expect_phase("context_enter", &[HubProcessingPhase::TxExec])?;
        invariant!(
            self.pending.is_none(),
            "context entered before the post-execution of the spawning opcode"
        );
        let context_number = self.state.stamps.hub + 1;

        let (id, spanning) = if self.callstack.is_empty() {
            let id = self.enter_root(frame, context_number)?;
            (id, None)
        } else {
            self.enter_nested(frame, context_number)?
        };

        self.pch.reset();
        if !frame.code.is_empty() {
            let metadata = ContractMetadata {
                address: frame.contract,
                deployment_number: self.deployment_info.deployment_number(&frame.contract),
                under_deployment: self.deployment_info.is_under_deployment(&frame.contract),
            };
            self.modules.rom_lex.call(metadata, &frame.code);
            self.modules.rom.call(&frame.code);
        }
        self.resolve_context_entry(id)?;
        if let Some(spanning) = spanning {
            self.section_mut(spanning)?.common.context_number_new = context_number;
        }
        debug!(
            "entered context {context_number} (frame {id}) at depth {}",
            frame.depth
        );
        Ok(())
    }

    fn enter_root(&mut self, frame: &HostFrame, context_number: u32) -> TracerResult<FrameId> {
        let metadata = self.metadata()?;
        invariant!(
            frame.depth == 0,
            "first context of transaction {} entered at depth {}",
            metadata.absolute_transaction_number,
            frame.depth
        );
        invariant!(
            frame.remaining_gas == metadata.initially_available_gas,
            "root context starts with {} gas, {} expected",
            frame.remaining_gas,
            metadata.initially_available_gas
        );
        let recipient = metadata.effective_recipient;
        let (call_data, call_data_span) = if metadata.is_deployment {
            (Vec::new(), MemorySpan::default())
        } else {
            (
                frame.input_data.clone(),
                MemorySpan::new(0, frame.input_data.len() as u64),
            )
        };
        let entry = FrameEntry {
            frame_type: CallFrameType::Root,
            context_number,
            is_deployment: metadata.is_deployment,
            value: metadata.transaction.value,
            gas: frame.remaining_gas,
            account_address: recipient,
            account_deployment_number: self.deployment_info.deployment_number(&recipient),
            code_address: recipient,
            code_deployment_number: self.deployment_info.deployment_number(&recipient),
            code_deployment_status: self.deployment_info.is_under_deployment(&recipient),
            bytecode: frame.code.clone(),
            caller_address: metadata.sender,
            call_data,
            call_data_span,
            call_data_context_number: metadata.call_data_context_number,
            return_data_target: MemorySpan::default(),
        };
        self.callstack.new_root_context(entry)
    }

    /// Enters the child of the CALL or CREATE the current frame is waiting
    /// on. Returns the new frame and the spawning section.
    fn enter_nested(
        &mut self,
        frame: &HostFrame,
        context_number: u32,
    ) -> TracerResult<(FrameId, Option<SectionRef>)> {
        let parent = self.callstack.current();
        let Some(spanning) = parent.child_spanning_section else {
            violation!(
                "context entered at depth {} while frame {} spawned no child",
                frame.depth,
                parent.id
            );
        };
        let parent_context_number = parent.context_number;
        let regions = self
            .state
            .section(spanning)
            .and_then(|s| s.fragments.iter().find_map(Fragment::as_imc))
            .and_then(|imc| imc.mxp())
            .map(|mxp| mxp.regions.clone())
            .unwrap_or_default();
        let is_deployment = frame.is_deployment();
        let (call_data, call_data_span, return_data_target) = if is_deployment {
            (Vec::new(), MemorySpan::default(), MemorySpan::default())
        } else {
            (
                frame.input_data.clone(),
                regions.first().map(MemorySpan::from_region).unwrap_or_default(),
                regions.get(1).map(MemorySpan::from_region).unwrap_or_default(),
            )
        };
        let frame_type = if is_deployment {
            CallFrameType::Deployment
        } else if frame.is_static {
            CallFrameType::Static
        } else {
            CallFrameType::Standard
        };
        let entry = FrameEntry {
            frame_type,
            context_number,
            is_deployment,
            value: frame.value,
            gas: frame.remaining_gas,
            account_address: frame.recipient,
            account_deployment_number: self.deployment_info.deployment_number(&frame.recipient),
            code_address: frame.contract,
            code_deployment_number: self.deployment_info.deployment_number(&frame.contract),
            code_deployment_status: self.deployment_info.is_under_deployment(&frame.contract),
            bytecode: frame.code.clone(),
            caller_address: frame.sender,
            call_data,
            call_data_span,
            call_data_context_number: parent_context_number,
            return_data_target,
        };
        let id = self.callstack.enter(entry, frame.depth)?;
        Ok((id, Some(spanning)))
    }

    pub(super) fn pre_execution(
        &mut self,
        world: &dyn WorldView,
        frame: &HostFrame,
    ) -> TracerResult<()> {
        self.expect_phase("pre_execution", &[HubProcessingPhase::TxExec])?;
        invariant!(
            self.pending.is_none(),
            "pre-execution of {:?} before the post-execution of the previous opcode",
            frame.current_opcode()
        );
        invariant!(
            !self.callstack.is_empty() && self.callstack.depth() == frame.depth,
            "opcode executed at host depth {} while the tracer is at depth {}",
            frame.depth,
            self.callstack.depth()
        );

        let opcode = frame.current_opcode();
        let original = match opcode {
            OpCode::SLoad | OpCode::SStore => Some(self.metadata_mut()?.original_storage_value(
                world,
                frame.recipient,
                frame.stack_item(0),
            )),
            _ => None,
        };
        let projection = gas::project(frame, world, original);
        self.pch.setup(frame, world, &projection, &self.config);
        let exceptions = self.pch.exceptions();
        let aborts = self.pch.aborts();
        let signals = *self.pch.signals();

        let stamp = self.state.next_stamp();
        let section_ref = self.state.next_section_ref();
        let stack_limit = self.config.stack_limit;
        let current = self.callstack.current_mut();
        current.opcode = opcode;
        let lines = current
            .stack
            .process_instruction(frame, &opcode.data(), stack_limit, stamp)?;
        let (height, height_new) = (current.stack.height(), current.stack.height_new());

        let mut common = self.common_values(stamp)?;
        common.pc = frame.pc;
        common.pc_new = frame.pc;
        common.height = height;
        common.height_new = height_new;
        common.gas_expected = frame.remaining_gas;
        common.gas_actual = frame.remaining_gas;
        common.gas_cost = projection.upfront();
        common.refund = frame.gas_refund;
        common.refund_new = frame.gas_refund;
        common.exception = exceptions.traced();

        let kind = section_kind(opcode, exceptions);
        let mut section = TraceSection::new(kind, common, kind.max_rows(lines.len(), exceptions.any()));
        let push_value = opcode.push_value(&frame.code, frame.pc);
        for line in lines {
            section.add_fragment(StackFragment {
                line,
                opcode,
                height,
                height_new,
                static_gas: opcode.static_gas(),
                exception: common.exception,
                aborts,
                signals,
                push_value,
                hash: None,
            })?;
        }
        self.trigger_modules(frame, opcode, &signals, stamp, &projection, exceptions);

        let instruction = Instruction {
            frame,
            world,
            opcode,
            exceptions,
            aborts,
            projection,
            signals,
            stamp,
            section: section_ref,
        };
        let expects_child = self.trace_instruction(&instruction, &mut section)?;

        self.callstack.current_mut().stack.commit_height();
        let pushed = self.state.push(section)?;
        invariant!(
            pushed == section_ref,
            "section of stamp {stamp} pushed at {pushed:?}, expected {section_ref:?}"
        );
        self.pending = Some(PendingInstruction {
            section: section_ref,
            opcode,
            exceptions,
            projection,
            expects_child,
            precompile: self.precompile_call.take(),
        });
        trace!(
            "stamp {stamp}: {opcode:?} at pc {} in context {}, {kind:?}, exception {:?}",
            frame.pc,
            self.callstack.current().context_number,
            exceptions.traced()
        );
        Ok(())
    }

    /// Records the stack-level sub-module operations of the opcode.
    fn trigger_modules(
        &mut self,
        frame: &HostFrame,
        opcode: OpCode,
        signals: &Signals,
        stamp: u32,
        projection: &GasProjection,
        exceptions: Exceptions,
    ) {
        let a = frame.stack_item(0);
        let b = match opcode {
            OpCode::Not | OpCode::IsZero => U256::zero(),
            _ => frame.stack_item(1),
        };
        let current_block = self.header.as_ref().map_or(0, |h| h.number);
        let modules = &mut self.modules;
        if signals.add {
            modules.add.call(opcode, a, b);
        }
        if signals.bin {
            modules.bin.call(opcode, a, b);
        }
        if signals.mod_ {
            modules.mod_.call(opcode, a, b);
        }
        if signals.mul {
            modules.mul.call(a, b);
        }
        if signals.ext {
            modules.ext.call(opcode, a, b, frame.stack_item(2));
        }
        if signals.shf {
            modules.shf.call(opcode, a, b);
        }
        if signals.wcp {
            modules.wcp.call(opcode, a, b);
        }
        if signals.blockhash {
            let crate::module::Modules { blockhash, wcp, .. } = modules;
            blockhash.call(wcp, a, current_block);
        }
        if signals.gas {
            modules.gas.add(GasOperation {
                stamp,
                gas_actual: frame.remaining_gas,
                gas_cost: projection.upfront(),
                out_of_gas: exceptions.contains(Exceptions::OUT_OF_GAS),
            });
        }
    }

    pub(super) fn post_execution(
        &mut self,
        _world: &dyn WorldView,
        frame: &HostFrame,
        result: &OperationResult,
    ) -> TracerResult<()> {
        self.expect_phase("post_execution", &[HubProcessingPhase::TxExec])?;
        let Some(pending) = self.pending.take() else {
            violation!("post-execution without a pending opcode");
        };
        let opcode = pending.opcode;
        let exceptional = pending.exceptions.any();
        let host_halted = result.halt_reason.is_some();
        if exceptional != host_halted {
            return Err(TracerError::ExceptionMismatch {
                opcode,
                tracer: pending.exceptions.traced(),
                host_halted,
            });
        }
        let upfront = pending.projection.upfront();
        if !exceptional && !opcode.is_call_or_create() {
            compare_gas_costs(opcode, upfront, result.gas_cost)?;
        }

        if exceptional {
            let fragment = ContextFragment::execution_provides_empty_return_data(&self.callstack);
            let section = self.section_mut(pending.section)?;
            section.common.gas_next = 0;
            section.common.refund_new = frame.gas_refund;
            section.add_fragment(fragment)?;
            self.callstack.current_mut().squash_output();
            self.callstack.parent_mut().squash_return_data();
            return Ok(());
        }
        if pending.expects_child {
            return Ok(());
        }
        if let Some(call) = pending.precompile {
            return self.resolve_precompile(call, pending.section, opcode, upfront, frame);
        }

        let section = self.section_mut(pending.section)?;
        if opcode.is_call_or_create() {
            let consumed = section.common.gas_actual.saturating_sub(frame.remaining_gas);
            let expected = upfront + lost_to_failed_creation(section);
            compare_gas_costs(opcode, expected, consumed)?;
        }
        section.common.gas_next = frame.remaining_gas;
        section.common.pc_new = frame.pc;
        section.common.refund_new = frame.gas_refund;
        section.unlatch_stack(frame.stack_item(0));
        Ok(())
    }

    /// Reconciles the gas of a CALL served by a precompile, settles its
    /// scenario and hands the output to the caller. A failed precompile
    /// keeps none of the value it was sent.
    fn resolve_precompile(
        &mut self,
        call: PrecompileCall,
        section: SectionRef,
        opcode: OpCode,
        upfront: u64,
        frame: &HostFrame,
    ) -> TracerResult<()> {
        let succeeded = !frame.stack_item(0).is_zero();
        let affordable = call.cost.filter(|&cost| cost <= call.gas_given);
        invariant!(
            !succeeded || affordable.is_some(),
            "{:?} succeeded on the host but costs {:?} with {} gas given",
            call.precompile,
            call.cost,
            call.gas_given
        );
        let target = self.section_mut(section)?;
        let stamp = target.common.hub_stamp;
        let consumed = target.common.gas_actual.saturating_sub(frame.remaining_gas);
        let expected = match affordable {
            Some(cost) if succeeded => (upfront + call.gas_paid_out_of_pocket + cost)
                .saturating_sub(call.gas_given),
            _ => upfront + call.gas_paid_out_of_pocket,
        };
        compare_gas_costs(opcode, expected, consumed)?;

        let current = self.callstack.current_id();
        let (fragment, scenario) = if succeeded {
            let span = MemorySpan::new(0, frame.return_data.len() as u64);
            let caller = self.callstack.current_mut();
            caller.return_data = frame.return_data.clone();
            caller.return_data_span = span;
            caller.return_data_context_number = stamp + 1;
            self.defers.schedule_for_post_rollback(current, call.undo_transfer);
            (
                ContextFragment::provide_return_data(&self.callstack, current, stamp + 1, span),
                CallScenario::PrcSuccessWontRevert,
            )
        } else {
            self.callstack.current_mut().squash_return_data();
            self.apply_rollback(call.undo_transfer, stamp)?;
            (
                ContextFragment::non_execution_provides_empty_return_data(&self.callstack),
                CallScenario::PrcFailureWontRevert,
            )
        };
        debug!(
            "{:?} at stamp {stamp}: {}, {consumed} gas consumed",
            call.precompile,
            if succeeded { "success" } else { "failure" }
        );

        let target = self.section_mut(section)?;
        if let Some(placeholder) = target.fragments.iter_mut().find_map(Fragment::as_scenario_mut) {
            *placeholder = ScenarioFragment::Call(scenario);
        }
        target.add_fragment(fragment)?;
        target.common.gas_next = frame.remaining_gas;
        target.common.pc_new = frame.pc;
        target.common.refund_new = frame.gas_refund;
        target.unlatch_stack(frame.stack_item(0));
        Ok(())
    }

    pub(super) fn context_re_enter(
        &mut self,
        _world: &dyn WorldView,
        frame: &HostFrame,
    ) -> TracerResult<()> {
        self.expect_phase("context_re_enter", &[HubProcessingPhase::TxExec])?;
        invariant!(
            self.callstack.depth() == frame.depth,
            "context re-entered at host depth {} while the tracer is at depth {}",
            frame.depth,
            self.callstack.depth()
        );
        let id = self.callstack.current_id();
        let actions = self.defers.take_reentry(id);
        invariant!(
            !actions.is_empty(),
            "frame {id} resumed without a pending CALL or CREATE"
        );
        for action in actions {
            let (ReentryAction::CallReturned { section } | ReentryAction::CreateReturned { section }) =
                action;
            self.resolve_child_return(section, frame)?;
        }
        self.callstack.current_mut().child_spanning_section = None;
        Ok(())
    }

    /// Completes the section of a CALL or CREATE once its child returned.
    fn resolve_child_return(&mut self, section: SectionRef, frame: &HostFrame) -> TracerResult<()> {
        let current = self.callstack.current();
        let Some(child) = current.children.last().and_then(|&c| self.callstack.get(c)) else {
            violation!("frame {} resumed without a child", current.id);
        };
        let opcode = current.opcode;
        let gas_before_child = current.gas_before_child;
        let child_reverted = child.reverted();
        let child_gas_left = child.gas_at_exit;
        let provided = ContextFragment::provide_return_data(
            &self.callstack,
            current.id,
            current.return_data_context_number,
            current.return_data_span,
        );

        let target = self.section_mut(section)?;
        let out_of_pocket = target
            .fragments
            .iter()
            .find_map(Fragment::as_imc)
            .and_then(|imc| imc.stp())
            .map_or(0, |stp| stp.gas_paid_out_of_pocket);
        let expected = gas_before_child
            .saturating_sub(target.common.gas_cost)
            .saturating_sub(out_of_pocket)
            .saturating_add(child_gas_left);
        if frame.remaining_gas != expected {
            return Err(TracerError::GasMismatch {
                opcode,
                tracer: expected,
                host: frame.remaining_gas,
            });
        }
        if let Some(scenario) = target
            .fragments
            .iter_mut()
            .find_map(Fragment::as_scenario_mut)
            .filter(|s| s.is_undefined())
        {
            *scenario = match (*scenario, child_reverted) {
                (ScenarioFragment::Call(_), false) => {
                    ScenarioFragment::Call(CallScenario::SmcSuccessWontRevert)
                }
                (ScenarioFragment::Call(_), true) => {
                    ScenarioFragment::Call(CallScenario::SmcFailureWontRevert)
                }
                (ScenarioFragment::Create(_), false) => {
                    ScenarioFragment::Create(CreateScenario::NonemptyInitCodeSuccessWontRevert)
                }
                (ScenarioFragment::Create(_), true) => {
                    ScenarioFragment::Create(CreateScenario::NonemptyInitCodeFailureWontRevert)
                }
                (other, _) => other,
            };
        }
        target.add_fragment(provided)?;
        target.common.gas_next = frame.remaining_gas;
        target.common.pc_new = frame.pc;
        target.common.refund_new = frame.gas_refund;
        target.unlatch_stack(frame.stack_item(0));
        Ok(())
    }

    pub(super) fn context_exit(
        &mut self,
        _world: &dyn WorldView,
        frame: &HostFrame,
    ) -> TracerResult<()> {
        if self.ignores_contexts()? {
            return Ok(());
        }
        self.expect_phase("context_exit", &[HubProcessingPhase::TxExec])?;
        invariant!(self.pending.is_none(), "context exited mid-instruction");
        invariant!(
            !self.callstack.is_empty() && self.callstack.depth() == frame.depth,
            "context exited at host depth {} while the tracer is at depth {}",
            frame.depth,
            self.callstack.depth()
        );
        invariant!(
            frame.outcome != FrameOutcome::Running,
            "context exited while still running"
        );
        let success = frame.outcome.is_success();
        let id = self.callstack.current_id();
        {
            let current = self.callstack.current_mut();
            current.gas_at_exit = frame.remaining_gas;
            match frame.outcome {
                FrameOutcome::Success | FrameOutcome::Revert => {
                    current.output_data = frame.output_data.clone()
                }
                _ => current.squash_output(),
            }
        }
        if !success {
            let stamp = self.state.stamps.hub;
            self.callstack.set_revert_stamps(id, stamp);
            self.resolve_rollbacks(id, stamp)?;
        }
        self.resolve_context_exit(id)?;
        self.deployment_info.exit_deployment_from_deployment_info_pov(
            self.callstack.current(),
            frame.outcome == FrameOutcome::Failed,
        )?;

        if frame.depth == 0 {
            self.state.phase = HubProcessingPhase::TxFinl;
            let metadata = self.metadata_mut()?;
            metadata.leftover_gas = frame.remaining_gas;
            metadata.refund_counter = if success { frame.gas_refund } else { 0 };
            metadata.status = success;
            debug!(
                "transaction {} leaves execution: {:?}, {} gas left",
                metadata.absolute_transaction_number, frame.outcome, frame.remaining_gas
            );
            return Ok(());
        }

        let exiting = self.callstack.current();
        let context_number = exiting.context_number;
        let returns_data = match frame.outcome {
            FrameOutcome::Success => exiting.is_message_call(),
            FrameOutcome::Revert => true,
            _ => false,
        };
        let (data, span, provider) = if returns_data {
            (
                exiting.output_data.clone(),
                exiting.output_data_span,
                context_number,
            )
        } else {
            (Vec::new(), MemorySpan::default(), 0)
        };
        self.callstack.exit()?;
        let parent = self.callstack.current_mut();
        parent.return_data = data;
        parent.return_data_span = span;
        parent.return_data_context_number = provider;
        debug!(
            "left context {context_number} ({:?}), back in context {}",
            frame.outcome, parent.context_number
        );
        Ok(())
    }
}

/// Gas a CREATE hitting its failure condition hands to a child that never
/// runs.
fn lost_to_failed_creation(section: &TraceSection) -> u64 {
    let failed = section.fragments.iter().any(|f| {
        matches!(
            f,
            Fragment::Scenario(ScenarioFragment::Create(
                CreateScenario::FailureConditionWillRevert | CreateScenario::FailureConditionWontRevert
            ))
        )
    });
    if !failed {
        return 0;
    }
    section
        .fragments
        .iter()
        .find_map(Fragment::as_imc)
        .and_then(|imc| imc.stp())
        .map_or(0, |stp| stp.gas_paid_out_of_pocket)
}

fn compare_gas_costs(opcode: OpCode, tracer: u64, host: u64) -> TracerResult<()> {
    if tracer == host {
        Ok(())
    } else {
        Err(TracerError::GasMismatch {
            opcode,
            tracer,
            host,
        })
    }
}
