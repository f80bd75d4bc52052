//! Sections of the opcodes that neither spawn nor end a context.

use ethereum_types::U256;
use zktracer_common::u256_to_address;

use super::{Instruction, SectionKind, TraceSection};
use crate::defer::{PostTransactionAction, RollbackAction};
use crate::error::TracerResult;
use crate::fragment::{
    ContextFragment, DomSubStamps, ImcFragment, StorageFragment, StorageFragmentPurpose,
    TransactionFragment, TransactionFragmentKind,
};
use crate::gas::memory_regions;
use crate::hub::Hub;
use crate::module::imc::{ExpCall, MmuCall, MmuInstruction, MxpCall, OobCall};
use crate::opcode::OpCode;
use crate::signals::target_address;
use crate::violation;

/// The memory expansion request of the opcode.
pub(super) fn mxp_call(inst: &Instruction) -> MxpCall {
    MxpCall::new(
        inst.stamp,
        inst.opcode,
        memory_regions(inst.opcode, inst.frame),
        inst.projection.memory,
    )
}

fn as_usize(value: U256) -> usize {
    value.low_u64() as usize
}

impl Hub {
    /// Appends the fragments of the opcode's family to `section`. Returns
    /// whether the opcode spawns a child context.
    pub(crate) fn trace_instruction(
        &mut self,
        inst: &Instruction,
        section: &mut TraceSection,
    ) -> TracerResult<bool> {
        match section.kind {
            SectionKind::TxSkip
            | SectionKind::TxPreWarming
            | SectionKind::TxInitialization
            | SectionKind::TxFinalization => {
                violation!("{:?} produced a {:?} section", inst.opcode, section.kind)
            }
            SectionKind::StackOnly | SectionKind::EarlyException => {}
            SectionKind::MachineState => self.trace_machine_state(inst, section)?,
            SectionKind::Exp => self.trace_exp(inst, section)?,
            SectionKind::Keccak => self.trace_keccak(inst, section)?,
            SectionKind::Context => {
                section.add_fragment(ContextFragment::read_current(&self.callstack))?;
            }
            SectionKind::Transaction => {
                let tx_number = self.metadata()?.absolute_transaction_number;
                section.add_fragment(TransactionFragment::new(
                    TransactionFragmentKind::Instruction,
                    tx_number,
                ))?;
            }
            SectionKind::Account => self.trace_account(inst, section)?,
            SectionKind::Copy => self.trace_copy(inst, section)?,
            SectionKind::CallDataLoad => self.trace_call_data_load(inst, section)?,
            SectionKind::StackRam => self.trace_stack_ram(inst, section)?,
            SectionKind::Storage => self.trace_storage(inst, section)?,
            SectionKind::Jump => self.trace_jump(inst, section)?,
            SectionKind::Log => self.trace_log(inst, section)?,
            SectionKind::Call => return self.trace_call(inst, section),
            SectionKind::Create => return self.trace_create(inst, section),
            SectionKind::Return => self.trace_return(inst, section)?,
            SectionKind::Revert => self.trace_revert(inst, section)?,
            SectionKind::Stop => self.trace_stop(inst, section)?,
            SectionKind::Selfdestruct => self.trace_selfdestruct(inst, section)?,
        }
        Ok(false)
    }

    fn trace_machine_state(
        &mut self,
        inst: &Instruction,
        section: &mut TraceSection,
    ) -> TracerResult<()> {
        if inst.signals.mxp {
            let mut imc = ImcFragment::empty();
            imc.call_mxp(&mut self.modules, mxp_call(inst));
            section.add_fragment(imc)?;
        }
        Ok(())
    }

    fn trace_exp(&mut self, inst: &Instruction, section: &mut TraceSection) -> TracerResult<()> {
        let mut imc = ImcFragment::empty();
        imc.call_exp(
            &mut self.modules,
            ExpCall {
                exponent: inst.item(1),
            },
        );
        section.add_fragment(imc)?;
        Ok(())
    }

    fn trace_keccak(&mut self, inst: &Instruction, section: &mut TraceSection) -> TracerResult<()> {
        let mut imc = ImcFragment::empty();
        imc.call_mxp(&mut self.modules, mxp_call(inst));
        if !inst.exceptional() {
            let (offset, size) = (inst.item(0), inst.item(1));
            let preimage = inst.frame.read_memory(as_usize(offset), as_usize(size));
            if !size.is_zero() {
                let context_number = self.callstack.current().context_number;
                imc.call_mmu(
                    &mut self.modules,
                    MmuCall::new(inst.stamp, MmuInstruction::RamToExoWithPadding, size.low_u64())
                        .source(context_number, offset),
                );
            }
            let hash = self.modules.keccak.call(&preimage);
            for fragment in section.stack_fragments_mut() {
                fragment.hash = Some(hash);
            }
        }
        section.add_fragment(imc)?;
        Ok(())
    }

    fn trace_account(&mut self, inst: &Instruction, section: &mut TraceSection) -> TracerResult<()> {
        if inst.signals.trm {
            self.modules.trm.call(inst.item(0));
        }
        if inst.exceptional() {
            return Ok(());
        }
        self.read_account(inst, section, target_address(inst.frame))?;
        Ok(())
    }

    /// Appends the fragment of an account read that warms `address`, undone
    /// on revert when the address was cold.
    fn read_account(
        &mut self,
        inst: &Instruction,
        section: &mut TraceSection,
        address: ethereum_types::Address,
    ) -> TracerResult<()> {
        let warm = inst.frame.is_address_warm(&address);
        let before = self.snapshot(inst.world, address, warm);
        let after = before.clone().warm();
        let mut fragment = self.account_fragment(before, after, DomSubStamps::standard(inst.stamp, 0));
        fragment.trimmed = inst.signals.trm;
        let fragment = section.add_fragment(fragment)?;
        if !warm {
            let frame = self.callstack.current_id();
            self.defers.schedule_for_post_rollback(
                frame,
                RollbackAction::UndoAccount {
                    section: inst.section,
                    fragment,
                },
            );
        }
        Ok(())
    }

    fn trace_copy(&mut self, inst: &Instruction, section: &mut TraceSection) -> TracerResult<()> {
        let frame = inst.frame;
        let mut imc = ImcFragment::empty();
        if inst.signals.mxp {
            imc.call_mxp(&mut self.modules, mxp_call(inst));
        }
        if inst.opcode == OpCode::ReturnDataCopy && inst.signals.oob {
            imc.call_oob(
                &mut self.modules,
                OobCall::ReturnDataCopy {
                    offset: inst.item(1),
                    size: inst.item(2),
                    return_data_size: frame.return_data.len(),
                },
            );
        }
        // EXTCODECOPY carries the address first.
        let shift = usize::from(inst.opcode == OpCode::ExtCodeCopy);
        let (target_offset, source_offset, size) =
            (inst.item(shift), inst.item(shift + 1), inst.item(shift + 2));
        if inst.signals.trm {
            self.modules.trm.call(inst.item(0));
        }

        let current = self.callstack.current();
        if !inst.exceptional() && !size.is_zero() {
            let source_id = match inst.opcode {
                OpCode::CallDataCopy => current.call_data_context_number,
                OpCode::ReturnDataCopy => current.return_data_context_number,
                _ => 0,
            };
            imc.call_mmu(
                &mut self.modules,
                MmuCall::new(inst.stamp, MmuInstruction::AnyToRamWithPadding, size.low_u64())
                    .source(source_id, source_offset)
                    .target(current.context_number, target_offset),
            );
        }
        section.add_fragment(imc)?;

        match inst.opcode {
            OpCode::CallDataCopy | OpCode::ReturnDataCopy => {
                section.add_fragment(ContextFragment::read_current(&self.callstack))?;
            }
            OpCode::ExtCodeCopy if !inst.exceptional() => {
                self.read_account(inst, section, u256_to_address(inst.item(0)))?;
            }
            _ => {}
        }
        Ok(())
    }

    fn trace_call_data_load(
        &mut self,
        inst: &Instruction,
        section: &mut TraceSection,
    ) -> TracerResult<()> {
        let offset = inst.item(0);
        let call_data_size = inst.frame.input_data.len();
        let mut imc = ImcFragment::empty();
        imc.call_oob(
            &mut self.modules,
            OobCall::CallDataLoad {
                offset,
                call_data_size,
            },
        );
        if !inst.exceptional() && !OobCall::call_data_out_of_bounds(offset, call_data_size) {
            let source = self.callstack.current().call_data_context_number;
            imc.call_mmu(
                &mut self.modules,
                MmuCall::new(inst.stamp, MmuInstruction::CallDataLoad, 32).source(source, offset),
            );
        }
        section.add_fragment(imc)?;
        section.add_fragment(ContextFragment::read_current(&self.callstack))?;
        Ok(())
    }

    fn trace_stack_ram(
        &mut self,
        inst: &Instruction,
        section: &mut TraceSection,
    ) -> TracerResult<()> {
        let mut imc = ImcFragment::empty();
        imc.call_mxp(&mut self.modules, mxp_call(inst));
        if !inst.exceptional() {
            let context_number = self.callstack.current().context_number;
            let offset = inst.item(0);
            let call = match inst.opcode {
                OpCode::MLoad => {
                    MmuCall::new(inst.stamp, MmuInstruction::MLoad, 32).source(context_number, offset)
                }
                OpCode::MStore => {
                    MmuCall::new(inst.stamp, MmuInstruction::MStore, 32).target(context_number, offset)
                }
                _ => MmuCall::new(inst.stamp, MmuInstruction::MStore8, 1).target(context_number, offset),
            };
            imc.call_mmu(&mut self.modules, call);
        }
        section.add_fragment(imc)?;
        Ok(())
    }

    fn trace_storage(&mut self, inst: &Instruction, section: &mut TraceSection) -> TracerResult<()> {
        let frame = inst.frame;
        let is_sstore = inst.opcode == OpCode::SStore;
        if is_sstore {
            let mut imc = ImcFragment::empty();
            imc.call_oob(
                &mut self.modules,
                OobCall::Sstore {
                    gas: frame.remaining_gas,
                },
            );
            section.add_fragment(imc)?;
        }
        section.add_fragment(ContextFragment::read_current(&self.callstack))?;
        if inst.exceptional() {
            return Ok(());
        }

        let (address, key) = (frame.recipient, inst.item(0));
        let current = inst.world.storage(&address, &key);
        let original = self
            .metadata_mut()?
            .original_storage_value(inst.world, address, key);
        let next = if is_sstore { inst.item(1) } else { current };
        let warm = frame.is_storage_warm(&address, &key);
        let fragment = StorageFragment {
            id: self.next_fragment_id(),
            purpose: if is_sstore {
                StorageFragmentPurpose::Sstore
            } else {
                StorageFragmentPurpose::Sload
            },
            address,
            deployment_number: self.deployment_info.deployment_number(&address),
            key,
            value_original: original,
            value_current: current,
            value_next: next,
            warm_before: warm,
            warm_after: true,
            dom_sub: DomSubStamps::standard(inst.stamp, 0),
            relative_block_number: self.relative_block_number,
            block_deployment_numbers: None,
        };
        let fragment = section.add_fragment(fragment)?;
        if !warm || next != current {
            let frame = self.callstack.current_id();
            self.defers.schedule_for_post_rollback(
                frame,
                RollbackAction::UndoStorage {
                    section: inst.section,
                    fragment,
                },
            );
        }
        Ok(())
    }

    fn trace_jump(&mut self, inst: &Instruction, section: &mut TraceSection) -> TracerResult<()> {
        let code_size = inst.frame.code.len();
        let call = match inst.opcode {
            OpCode::JumpI => OobCall::JumpI {
                destination: inst.item(0),
                condition: inst.item(1),
                code_size,
            },
            _ => OobCall::Jump {
                destination: inst.item(0),
                code_size,
            },
        };
        let mut imc = ImcFragment::empty();
        imc.call_oob(&mut self.modules, call);
        section.add_fragment(imc)?;
        Ok(())
    }

    fn trace_log(&mut self, inst: &Instruction, section: &mut TraceSection) -> TracerResult<()> {
        let OpCode::Log(topics) = inst.opcode else {
            violation!("{:?} traced as a log", inst.opcode);
        };
        let mut imc = ImcFragment::empty();
        if inst.signals.mxp {
            imc.call_mxp(&mut self.modules, mxp_call(inst));
        }
        let (offset, size) = (inst.item(0), inst.item(1));
        let current = self.callstack.current();
        let (frame, context_number) = (current.id, current.context_number);
        if !inst.exceptional() && !size.is_zero() {
            imc.call_mmu(
                &mut self.modules,
                MmuCall::new(inst.stamp, MmuInstruction::LogData, size.low_u64())
                    .source(context_number, offset),
            );
        }
        section.add_fragment(imc)?;
        section.add_fragment(ContextFragment::read_current(&self.callstack))?;
        if inst.exceptional() {
            return Ok(());
        }

        self.state.stamps.log += 1;
        let log_stamp = self.state.stamps.log;
        section.common.log_stamp = log_stamp;
        self.defers
            .schedule_for_post_transaction(PostTransactionAction::LogFinalization {
                frame,
                log_stamp,
                address: inst.frame.recipient,
                topics: usize::from(topics),
                data: inst.frame.read_memory(as_usize(offset), as_usize(size)),
            });
        Ok(())
    }
}
