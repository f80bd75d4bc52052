//! Sections of the opcodes ending a context.

use ethereum_types::U256;
use zktracer_common::u256_to_address;

use super::instruction::mxp_call;
use super::{Instruction, TraceSection};
use crate::callstack::MemorySpan;
use crate::defer::{ExitAction, PostConflationAction, PostTransactionAction, RollbackAction};
use crate::error::TracerResult;
use crate::fragment::{
    ContextFragment, DomSubStamps, Fragment, ImcFragment, ReturnScenario, ScenarioFragment,
    SelfdestructScenario,
};
use crate::hub::Hub;
use crate::module::code::ContractMetadata;
use crate::module::imc::{MmuCall, MmuInstruction, OobCall};
use crate::signals::Exceptions;

impl Hub {
    /// Records the returned span and copies it into the caller's memory when
    /// the caller asked for return data.
    fn return_output(
        &mut self,
        inst: &Instruction,
        imc: &mut ImcFragment,
    ) -> TracerResult<bool> {
        let (offset, size) = (inst.item(0), inst.item(1));
        let current = self.callstack.current();
        let (context_number, target, is_root) =
            (current.context_number, current.return_data_target, current.is_root());
        let caller_context_number = self.callstack.parent().context_number;
        let touches_ram = !size.is_zero() && !target.is_empty() && !is_root;
        if touches_ram {
            imc.call_mmu(
                &mut self.modules,
                MmuCall::new(
                    inst.stamp,
                    MmuInstruction::RamToRamSansPadding,
                    size.low_u64().min(target.length),
                )
                .source(context_number, offset)
                .target(caller_context_number, U256::from(target.offset)),
            );
        }
        self.callstack.current_mut().output_data_span = if size.is_zero() {
            MemorySpan::default()
        } else {
            MemorySpan::new(offset.low_u64(), size.low_u64())
        };
        Ok(touches_ram)
    }

    /// Schedules the undoing of the account fragment at `fragment` should
    /// the current frame or one of its ancestors revert.
    fn undo_on_revert(&mut self, inst: &Instruction, fragment: usize) {
        let frame = self.callstack.current_id();
        self.defers.schedule_for_post_rollback(
            frame,
            RollbackAction::UndoAccount {
                section: inst.section,
                fragment,
            },
        );
    }

    pub(crate) fn trace_return(
        &mut self,
        inst: &Instruction,
        section: &mut TraceSection,
    ) -> TracerResult<()> {
        let frame = inst.frame;
        let (offset, size) = (inst.item(0), inst.item(1));
        let is_deployment = frame.is_deployment();
        let scenario = section.add_fragment(ScenarioFragment::Return(ReturnScenario::Exception))?;

        let mut imc = ImcFragment::empty();
        imc.call_mxp(&mut self.modules, mxp_call(inst));
        let reaches_code = is_deployment && !inst.exceptions.contains(Exceptions::MEMORY_EXPANSION);
        if reaches_code {
            imc.call_oob(&mut self.modules, OobCall::Deployment { code_size: size });
        }
        if reaches_code
            && !size.is_zero()
            && !inst.exceptions.contains(Exceptions::MAX_CODE_SIZE)
        {
            let context_number = self.callstack.current().context_number;
            imc.call_mmu(
                &mut self.modules,
                MmuCall::new(inst.stamp, MmuInstruction::InvalidCodePrefix, 1)
                    .source(context_number, offset),
            );
        }
        let touches_ram = if inst.exceptional() || is_deployment {
            false
        } else {
            self.return_output(inst, &mut imc)?
        };
        section.add_fragment(imc)?;
        section.add_fragment(ContextFragment::read_current(&self.callstack))?;
        if inst.exceptional() {
            return Ok(());
        }

        let outcome = if !is_deployment {
            section.add_fragment(ContextFragment::execution_provides_return_data(
                &self.callstack,
            ))?;
            if touches_ram {
                ReturnScenario::FromMessageCallWillTouchRam
            } else {
                ReturnScenario::FromMessageCallWontTouchRam
            }
        } else {
            let code = frame.read_memory(offset.low_u64() as usize, size.low_u64() as usize);
            let metadata = ContractMetadata {
                address: frame.recipient,
                deployment_number: self.deployment_info.deployment_number(&frame.recipient),
                under_deployment: false,
            };
            if !code.is_empty() {
                let hash = self.modules.keccak.call(&code);
                for fragment in section.stack_fragments_mut() {
                    fragment.hash = Some(hash);
                }
                self.modules.rom_lex.call(metadata, &code);
                self.modules.rom.call(&code);
                let context_number = self.callstack.current().context_number;
                let mut code_copy = ImcFragment::empty();
                code_copy.call_mmu(
                    &mut self.modules,
                    MmuCall::new(
                        inst.stamp,
                        MmuInstruction::RamToExoWithPadding,
                        code.len() as u64,
                    )
                    .source(context_number, offset),
                );
                section.add_fragment(code_copy)?;
            }
            let fragment = self.deposit(inst, section, &code)?;
            if !code.is_empty() {
                if let Some(account) = section
                    .fragments
                    .get_mut(fragment)
                    .and_then(Fragment::as_account_mut)
                {
                    account.requires_rom_lex = true;
                }
                self.defers.schedule_for_post_conflation(
                    PostConflationAction::AssignCodeFragmentIndex {
                        section: inst.section,
                        fragment,
                        metadata,
                    },
                );
            }
            self.undo_on_revert(inst, fragment);
            section.add_fragment(ContextFragment::execution_provides_empty_return_data(
                &self.callstack,
            ))?;
            if code.is_empty() {
                ReturnScenario::FromDeploymentEmptyCodeWontRevert
            } else {
                ReturnScenario::FromDeploymentNonemptyCodeWontRevert
            }
        };
        if let Some(scenario) = section
            .fragments
            .get_mut(scenario)
            .and_then(Fragment::as_scenario_mut)
        {
            *scenario = ScenarioFragment::Return(outcome);
        }
        self.defers
            .schedule_for_post_transaction(PostTransactionAction::ResolveScenario {
                section: inst.section,
            });
        Ok(())
    }

    /// Appends the fragment depositing `code` at the address under
    /// deployment.
    fn deposit(
        &mut self,
        inst: &Instruction,
        section: &mut TraceSection,
        code: &[u8],
    ) -> TracerResult<usize> {
        let address = inst.frame.recipient;
        let deployment_number = self.deployment_info.deployment_number(&address);
        let before = self
            .snapshot(inst.world, address, true)
            .deploy(deployment_number, &inst.frame.code);
        let after = before.clone().deposit_code(code);
        let fragment = self.account_fragment(before, after, DomSubStamps::standard(inst.stamp, 0));
        section.add_fragment(fragment)
    }

    pub(crate) fn trace_revert(
        &mut self,
        inst: &Instruction,
        section: &mut TraceSection,
    ) -> TracerResult<()> {
        let mut imc = ImcFragment::empty();
        if inst.signals.mxp {
            imc.call_mxp(&mut self.modules, mxp_call(inst));
        }
        if !inst.exceptional() {
            self.return_output(inst, &mut imc)?;
        }
        section.add_fragment(imc)?;
        section.add_fragment(ContextFragment::read_current(&self.callstack))?;
        Ok(())
    }

    pub(crate) fn trace_stop(
        &mut self,
        inst: &Instruction,
        section: &mut TraceSection,
    ) -> TracerResult<()> {
        section.add_fragment(ContextFragment::read_current(&self.callstack))?;
        self.callstack.current_mut().output_data_span = MemorySpan::default();
        if inst.frame.is_deployment() && !inst.exceptional() {
            let fragment = self.deposit(inst, section, &[])?;
            self.undo_on_revert(inst, fragment);
        }
        Ok(())
    }

    pub(crate) fn trace_selfdestruct(
        &mut self,
        inst: &Instruction,
        section: &mut TraceSection,
    ) -> TracerResult<()> {
        let scenario = section.add_fragment(ScenarioFragment::Selfdestruct(
            SelfdestructScenario::Exception,
        ))?;
        section.add_fragment(ContextFragment::read_current(&self.callstack))?;
        let beneficiary = if inst.signals.trm {
            self.modules.trm.call(inst.item(0))
        } else {
            u256_to_address(inst.item(0))
        };
        if inst.exceptional() {
            return Ok(());
        }

        let address = inst.frame.recipient;
        let stamp = inst.stamp;
        let own_before = self.snapshot(inst.world, address, true);
        let balance = own_before.balance;
        let own_after = own_before.clone().debit(balance);
        let beneficiary_before = if beneficiary == address {
            own_after.clone()
        } else {
            let warm = inst.frame.is_address_warm(&beneficiary);
            self.snapshot(inst.world, beneficiary, warm)
        };
        let beneficiary_after = beneficiary_before.clone().credit(balance).warm();

        let own = self.account_fragment(own_before, own_after, DomSubStamps::standard(stamp, 0));
        let own = section.add_fragment(own)?;
        let other = self.account_fragment(
            beneficiary_before,
            beneficiary_after,
            DomSubStamps::standard(stamp, 1),
        );
        let other = section.add_fragment(other)?;
        self.undo_on_revert(inst, own);
        self.undo_on_revert(inst, other);

        let outcome = if self.metadata()?.is_marked_for_self_destruct(&address) {
            SelfdestructScenario::WontRevertAlreadyMarked
        } else {
            SelfdestructScenario::WontRevertNotYetMarked
        };
        if let Some(scenario) = section
            .fragments
            .get_mut(scenario)
            .and_then(Fragment::as_scenario_mut)
        {
            *scenario = ScenarioFragment::Selfdestruct(outcome);
        }
        let frame = self.callstack.current_id();
        self.defers.schedule_for_context_exit(
            frame,
            ExitAction::MarkSelfDestruct {
                section: inst.section,
                address,
            },
        );
        self.defers
            .schedule_for_post_transaction(PostTransactionAction::ResolveScenario {
                section: inst.section,
            });
        Ok(())
    }
}
