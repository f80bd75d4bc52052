//! Sections of the opcodes spawning a child context: the CALL family and
//! CREATE/CREATE2.

use ethereum_types::{Address, U256};
use zktracer_common::{gas::G_CALL_STIPEND, u256_to_address};

use super::instruction::mxp_call;
use super::{Instruction, SectionRef, TraceSection};
use crate::defer::{
    EntryAction, PostConflationAction, PostTransactionAction, ReentryAction, RollbackAction,
};
use crate::error::TracerResult;
use crate::fragment::{
    AccountSnapshot, CallScenario, ContextFragment, CreateScenario, DomSubStamps, Fragment,
    ImcFragment, ScenarioFragment,
};
use crate::hub::{Hub, PrecompileCall};
use crate::module::code::ContractMetadata;
use crate::module::imc::{OobCall, StpCall};
use crate::opcode::OpCode;
use crate::precompile::Precompile;
use crate::signals::{createe_address, Exceptions};

/// Replaces the placeholder scenario at `index`.
fn set_scenario(section: &mut TraceSection, index: usize, scenario: ScenarioFragment) {
    if let Some(fragment) = section.fragments.get_mut(index) {
        *fragment = Fragment::Scenario(scenario);
    }
}

/// Gas handed to a child: the requested amount, capped to all but one 64th
/// of what is left once the upfront cost is paid.
fn gas_out_of_pocket(inst: &Instruction, requested: Option<U256>) -> u64 {
    if inst.exceptions.contains(Exceptions::OUT_OF_GAS) {
        return 0;
    }
    let available = inst.frame.remaining_gas.saturating_sub(inst.projection.upfront());
    let cap = available - available / 64;
    match requested {
        Some(requested) if requested < U256::from(cap) => requested.low_u64(),
        _ => cap,
    }
}

impl Hub {
    pub(crate) fn trace_call(
        &mut self,
        inst: &Instruction,
        section: &mut TraceSection,
    ) -> TracerResult<bool> {
        let (frame, opcode) = (inst.frame, inst.opcode);
        let scenario = section.add_fragment(ScenarioFragment::Call(CallScenario::Undefined))?;
        section.add_fragment(ContextFragment::read_current(&self.callstack))?;

        let callee = if inst.signals.trm {
            self.modules.trm.call(inst.item(1))
        } else {
            u256_to_address(inst.item(1))
        };
        let value = match opcode {
            OpCode::Call | OpCode::CallCode => inst.item(2),
            _ => U256::zero(),
        };
        let callee_warm = frame.is_address_warm(&callee);
        let callee_account = inst.world.account_or_default(&callee);

        let mut imc = ImcFragment::empty();
        if inst.exceptions.contains(Exceptions::STATIC_FAULT) {
            imc.call_oob(&mut self.modules, OobCall::XCall { value });
        } else {
            imc.call_mxp(&mut self.modules, mxp_call(inst));
            if !inst.exceptions.contains(Exceptions::MEMORY_EXPANSION) {
                let stipend = if value.is_zero() { 0 } else { G_CALL_STIPEND };
                imc.call_stp(
                    &mut self.modules,
                    StpCall {
                        opcode,
                        gas_requested: inst.item(0),
                        value,
                        exists: !callee_account.is_empty(),
                        warm: callee_warm,
                        out_of_gas: inst.exceptions.contains(Exceptions::OUT_OF_GAS),
                        upfront_gas_cost: inst.projection.upfront(),
                        gas_paid_out_of_pocket: gas_out_of_pocket(inst, Some(inst.item(0))),
                        stipend,
                    },
                );
            }
            if inst.exceptions.none() {
                let balance = inst.world.account_or_default(&frame.recipient).balance;
                imc.call_oob(
                    &mut self.modules,
                    OobCall::Call {
                        value,
                        balance,
                        call_stack_depth: frame.depth,
                    },
                );
            }
        }
        section.add_fragment(imc)?;

        if inst.exceptional() {
            set_scenario(section, scenario, ScenarioFragment::Call(CallScenario::Exception));
            return Ok(false);
        }
        self.defers
            .schedule_for_post_transaction(PostTransactionAction::ResolveScenario {
                section: inst.section,
            });

        let caller = frame.recipient;
        let stamp = inst.stamp;
        if !inst.aborts.is_empty() {
            let caller_snapshot = self.snapshot(inst.world, caller, true);
            let callee_before = self.snapshot(inst.world, callee, callee_warm);
            self.push_account_pair(
                section,
                stamp,
                (caller_snapshot.clone(), caller_snapshot),
                callee_before,
                |callee| callee.warm(),
            )?;
            section.add_fragment(ContextFragment::non_execution_provides_empty_return_data(
                &self.callstack,
            ))?;
            set_scenario(section, scenario, ScenarioFragment::Call(CallScenario::AbortWontRevert));
            return Ok(false);
        }

        // Only CALL moves value to another account.
        let moved = if opcode == OpCode::Call {
            value
        } else {
            U256::zero()
        };
        let caller_before = self.snapshot(inst.world, caller, true);
        let caller_after = caller_before.clone().debit(moved);
        let callee_before = if callee == caller {
            caller_after.clone()
        } else {
            self.snapshot(inst.world, callee, callee_warm)
        };
        self.push_account_pair(
            section,
            stamp,
            (caller_before, caller_after),
            callee_before,
            |callee| callee.credit(moved).warm(),
        )?;

        let undo_transfer = RollbackAction::UndoValueTransfer {
            section: inst.section,
            sender: caller,
            recipient: callee,
            value: moved,
            undo_deployment: false,
        };
        if let Some(precompile) = Precompile::from_address(&callee) {
            let (args_offset, args_size) = match opcode {
                OpCode::Call | OpCode::CallCode => (inst.item(3), inst.item(4)),
                _ => (inst.item(2), inst.item(3)),
            };
            let input =
                frame.read_memory(args_offset.low_u64() as usize, args_size.low_u64() as usize);
            let gas_paid_out_of_pocket = gas_out_of_pocket(inst, Some(inst.item(0)));
            let stipend = if value.is_zero() { 0 } else { G_CALL_STIPEND };
            let gas_given = gas_paid_out_of_pocket + stipend;
            let mut imc = ImcFragment::empty();
            imc.call_oob(
                &mut self.modules,
                OobCall::Precompile {
                    precompile,
                    call_gas: gas_given,
                    call_data_size: input.len(),
                },
            );
            section.add_fragment(imc)?;
            self.precompile_call = Some(PrecompileCall {
                precompile,
                cost: precompile.cost(&input),
                gas_paid_out_of_pocket,
                gas_given,
                undo_transfer,
            });
            return Ok(false);
        }

        let current = self.callstack.current_id();
        if !callee_account.has_code() {
            self.defers.schedule_for_post_rollback(current, undo_transfer);
            section.add_fragment(ContextFragment::non_execution_provides_empty_return_data(
                &self.callstack,
            ))?;
            set_scenario(
                section,
                scenario,
                ScenarioFragment::Call(CallScenario::EoaSuccessWontRevert),
            );
            return Ok(false);
        }
        self.await_child(inst, undo_transfer, ReentryAction::CallReturned {
            section: inst.section,
        });
        Ok(true)
    }

    pub(crate) fn trace_create(
        &mut self,
        inst: &Instruction,
        section: &mut TraceSection,
    ) -> TracerResult<bool> {
        let (frame, opcode) = (inst.frame, inst.opcode);
        let scenario = section.add_fragment(ScenarioFragment::Create(CreateScenario::Undefined))?;
        section.add_fragment(ContextFragment::read_current(&self.callstack))?;

        let value = inst.item(0);
        let (offset, size) = (inst.item(1), inst.item(2));
        let creator = frame.recipient;
        let creator_account = inst.world.account_or_default(&creator);
        let nonce = creator_account.nonce;

        let mut imc = ImcFragment::empty();
        if !inst.exceptions.contains(Exceptions::STATIC_FAULT) {
            imc.call_mxp(&mut self.modules, mxp_call(inst));
            if !inst.exceptions.contains(Exceptions::MEMORY_EXPANSION) {
                imc.call_stp(
                    &mut self.modules,
                    StpCall {
                        opcode,
                        gas_requested: U256::from(frame.remaining_gas),
                        value,
                        exists: false,
                        warm: false,
                        out_of_gas: inst.exceptions.contains(Exceptions::OUT_OF_GAS),
                        upfront_gas_cost: inst.projection.upfront(),
                        gas_paid_out_of_pocket: gas_out_of_pocket(inst, None),
                        stipend: 0,
                    },
                );
            }
            if inst.exceptions.none() {
                let target = inst.world.account_or_default(&createe_address(frame, nonce));
                imc.call_oob(
                    &mut self.modules,
                    OobCall::Create {
                        value,
                        balance: creator_account.balance,
                        nonce,
                        has_code: target.has_code(),
                        call_stack_depth: frame.depth,
                    },
                );
            }
        }
        section.add_fragment(imc)?;

        if inst.exceptional() {
            set_scenario(section, scenario, ScenarioFragment::Create(CreateScenario::Exception));
            return Ok(false);
        }
        self.defers
            .schedule_for_post_transaction(PostTransactionAction::ResolveScenario {
                section: inst.section,
            });

        let stamp = inst.stamp;
        let creator_before = self.snapshot(inst.world, creator, true);
        if !inst.aborts.is_empty() {
            let fragment = self.account_fragment(
                creator_before.clone(),
                creator_before,
                DomSubStamps::standard(stamp, 0),
            );
            section.add_fragment(fragment)?;
            section.add_fragment(ContextFragment::non_execution_provides_empty_return_data(
                &self.callstack,
            ))?;
            set_scenario(
                section,
                scenario,
                ScenarioFragment::Create(CreateScenario::AbortWontRevert),
            );
            return Ok(false);
        }

        let createe = if inst.signals.rlp_addr {
            self.createe_address(inst, creator, nonce)
        } else {
            createe_address(frame, nonce)
        };
        let createe_warm = frame.is_address_warm(&createe);
        let current = self.callstack.current_id();
        self.defers.schedule_for_post_rollback(
            current,
            RollbackAction::UndoNonce {
                section: inst.section,
                address: creator,
            },
        );

        if self.pch.create_failure() {
            let creator_after = creator_before.clone().increment_nonce();
            let createe_before = self.snapshot(inst.world, createe, createe_warm);
            self.push_account_pair(
                section,
                stamp,
                (creator_before, creator_after),
                createe_before,
                |createe| createe.warm(),
            )?;
            section.add_fragment(ContextFragment::non_execution_provides_empty_return_data(
                &self.callstack,
            ))?;
            set_scenario(
                section,
                scenario,
                ScenarioFragment::Create(CreateScenario::FailureConditionWontRevert),
            );
            return Ok(false);
        }

        let init_code = frame.read_memory(offset.low_u64() as usize, size.low_u64() as usize);
        let creator_after = creator_before.clone().increment_nonce().debit(value);
        let createe_before = self.snapshot(inst.world, createe, createe_warm);
        let deployment_number = self.deployment_info.new_deployment(createe);
        let undo_transfer = RollbackAction::UndoValueTransfer {
            section: inst.section,
            sender: creator,
            recipient: createe,
            value,
            undo_deployment: true,
        };

        if init_code.is_empty() {
            self.deployment_info.mark_deployed(createe)?;
            self.push_account_pair(
                section,
                stamp,
                (creator_before, creator_after),
                createe_before,
                |createe| {
                    createe
                        .credit(value)
                        .increment_nonce()
                        .deploy(deployment_number, &[])
                        .deposit_code(&[])
                        .warm()
                },
            )?;
            self.defers.schedule_for_post_rollback(current, undo_transfer);
            section.add_fragment(ContextFragment::non_execution_provides_empty_return_data(
                &self.callstack,
            ))?;
            set_scenario(
                section,
                scenario,
                ScenarioFragment::Create(CreateScenario::EmptyInitCodeWontRevert),
            );
            return Ok(false);
        }

        let createe_fragment = self.push_account_pair(
            section,
            stamp,
            (creator_before, creator_after),
            createe_before,
            |createe| {
                createe
                    .credit(value)
                    .increment_nonce()
                    .deploy(deployment_number, &init_code)
                    .warm()
            },
        )?;
        if let Some(account) = section
            .fragments
            .get_mut(createe_fragment)
            .and_then(Fragment::as_account_mut)
        {
            account.requires_rom_lex = true;
        }
        self.defers
            .schedule_for_post_conflation(PostConflationAction::AssignCodeFragmentIndex {
                section: inst.section,
                fragment: createe_fragment,
                metadata: ContractMetadata {
                    address: createe,
                    deployment_number,
                    under_deployment: true,
                },
            });
        self.await_child(inst, undo_transfer, ReentryAction::CreateReturned {
            section: inst.section,
        });
        Ok(true)
    }

    /// The address a CREATE or CREATE2 deploys at, computed through the
    /// address derivation module.
    fn createe_address(&mut self, inst: &Instruction, creator: Address, nonce: u64) -> Address {
        match inst.opcode {
            OpCode::Create2 => {
                let (offset, size) = (inst.item(1), inst.item(2));
                let init_code = inst
                    .frame
                    .read_memory(offset.low_u64() as usize, size.low_u64() as usize);
                let hash = self.modules.keccak.call(&init_code);
                self.modules.rlp_addr.call_create2(creator, inst.item(3), hash)
            }
            _ => self.modules.rlp_addr.call_create(creator, nonce),
        }
    }

    /// Appends the account fragments of the spawning account and its
    /// counterpart. The counterpart update is applied to `other_before`.
    /// Returns the index of the counterpart fragment.
    fn push_account_pair(
        &mut self,
        section: &mut TraceSection,
        stamp: u32,
        (own_before, own_after): (AccountSnapshot, AccountSnapshot),
        other_before: AccountSnapshot,
        update: impl FnOnce(AccountSnapshot) -> AccountSnapshot,
    ) -> TracerResult<usize> {
        let own = self.account_fragment(own_before, own_after, DomSubStamps::standard(stamp, 0));
        section.add_fragment(own)?;
        let other_after = update(other_before.clone());
        let other = self.account_fragment(other_before, other_after, DomSubStamps::standard(stamp, 1));
        section.add_fragment(other)
    }

    /// Schedules what happens once the child spawned by the section enters
    /// and once it returns.
    fn await_child(&mut self, inst: &Instruction, undo_transfer: RollbackAction, reentry: ReentryAction) {
        let section: SectionRef = inst.section;
        let current = self.callstack.current_mut();
        current.child_spanning_section = Some(section);
        current.gas_before_child = inst.frame.remaining_gas;
        let current = current.id;
        self.defers
            .schedule_for_context_entry(EntryAction::InitializeContext { section });
        self.defers
            .schedule_for_context_entry(EntryAction::RollbackOnRevert(undo_transfer));
        self.defers.schedule_for_context_reentry(current, reentry);
    }
}
