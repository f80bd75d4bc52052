use ethereum_types::Address;
use log::trace;

use super::Hub;
use crate::callstack::FrameId;
use crate::defer::{
    EntryAction, ExitAction, PostConflationAction, PostTransactionAction, RollbackAction,
};
use crate::error::{TracerError, TracerResult};
use crate::fragment::{AccountSnapshot, ContextFragment, DomSubStamps, Fragment};
use crate::module::txn::{LogDataOperation, LogInfoOperation};
use crate::section::SectionRef;
use crate::{invariant, violation};

impl Hub {
    /// Fires the entry actions against the context that was just entered.
    pub(crate) fn resolve_context_entry(&mut self, frame: FrameId) -> TracerResult<()> {
        for action in self.defers.take_entry() {
            match action {
                EntryAction::InitializeContext { section } => {
                    let fragment = ContextFragment::initialize(&self.callstack, frame);
                    self.section_mut(section)?.add_fragment(fragment)?;
                }
                EntryAction::RollbackOnRevert(rollback) => {
                    self.defers.schedule_for_post_rollback(frame, rollback)
                }
            }
        }
        Ok(())
    }

    /// Fires the exit actions of `frame`.
    pub(crate) fn resolve_context_exit(&mut self, frame: FrameId) -> TracerResult<()> {
        let reverted = self
            .callstack
            .get(frame)
            .is_some_and(|f| f.reverted());
        for action in self.defers.take_exit(frame) {
            match action {
                ExitAction::MarkSelfDestruct { section, address } => {
                    if reverted {
                        continue;
                    }
                    let metadata = self.metadata_mut()?;
                    if !metadata.is_marked_for_self_destruct(&address) {
                        metadata.self_destructs.push((address, section));
                    }
                    self.defers.schedule_for_post_rollback(
                        frame,
                        RollbackAction::UnmarkSelfDestruct { address, section },
                    );
                }
            }
        }
        Ok(())
    }

    /// Undoes everything `reverted` and its descendants did, latest change
    /// first.
    pub(crate) fn resolve_rollbacks(
        &mut self,
        reverted: FrameId,
        revert_stamp: u32,
    ) -> TracerResult<()> {
        let callstack = &self.callstack;
        let actions = self
            .defers
            .take_rollback(|frame| callstack.is_descendant_or_self(frame, reverted));
        trace!(
            "frame {reverted} reverted at stamp {revert_stamp}: {} rollback actions",
            actions.len()
        );
        for action in actions {
            self.apply_rollback(action, revert_stamp)?;
        }
        Ok(())
    }

    pub(super) fn apply_rollback(
        &mut self,
        action: RollbackAction,
        revert_stamp: u32,
    ) -> TracerResult<()> {
        match action {
            RollbackAction::UndoAccount { section, fragment } => {
                let target = self.section_mut(section)?;
                let Some(original) = target
                    .fragments
                    .get(fragment)
                    .and_then(Fragment::as_account)
                    .cloned()
                else {
                    violation!("fragment {fragment} of {section:?} is not an account fragment");
                };
                let latest = self.latest_snapshot(original.address())?;
                let after = original.undone(&latest);
                self.append_undo(section, latest, after, revert_stamp)
            }
            RollbackAction::UndoStorage { section, fragment } => {
                let id = self.next_fragment_id();
                let target = self.section_mut(section)?;
                let Some(original) = target.fragments.get(fragment).and_then(Fragment::as_storage)
                else {
                    violation!("fragment {fragment} of {section:?} is not a storage fragment");
                };
                let dom_sub = DomSubStamps::revert(
                    target.common.hub_stamp,
                    revert_stamp,
                    target.fragments.len() as u32,
                );
                let undo = original.undo(id, dom_sub);
                target.add_fragment(undo)?;
                Ok(())
            }
            RollbackAction::UndoValueTransfer {
                section,
                sender,
                recipient,
                value,
                undo_deployment,
            } => {
                let sender_before = self.latest_snapshot(sender)?;
                let sender_after = sender_before.clone().credit(value);
                self.append_undo(section, sender_before, sender_after, revert_stamp)?;

                let recipient_before = self.latest_snapshot(recipient)?;
                let mut recipient_after = recipient_before.clone().debit(value);
                if undo_deployment {
                    recipient_after.nonce = recipient_after.nonce.saturating_sub(1);
                    recipient_after = recipient_after.deposit_code(&[]);
                }
                self.append_undo(section, recipient_before, recipient_after, revert_stamp)
            }
            RollbackAction::UndoNonce { section, address } => {
                let before = self.latest_snapshot(address)?;
                let mut after = before.clone();
                after.nonce = after.nonce.saturating_sub(1);
                self.append_undo(section, before, after, revert_stamp)
            }
            RollbackAction::UnmarkSelfDestruct { address, section } => {
                self.metadata_mut()?
                    .self_destructs
                    .retain(|(a, s)| !(*a == address && *s == section));
                Ok(())
            }
        }
    }

    /// The state of `address` after its most recent account fragment in the
    /// current transaction, undo fragments included.
    fn latest_snapshot(&self, address: Address) -> TracerResult<AccountSnapshot> {
        let tx = self.metadata()?.absolute_transaction_number;
        self.state
            .transaction_sections(tx)
            .iter()
            .flat_map(|section| section.fragments.iter().filter_map(Fragment::as_account))
            .filter(|fragment| fragment.address() == address)
            .max_by_key(|fragment| fragment.id)
            .map(|fragment| fragment.after.clone())
            .ok_or_else(|| {
                TracerError::InvariantViolation(format!(
                    "no account fragment of {address:?} to undo in transaction {tx}"
                ))
            })
    }

    fn append_undo(
        &mut self,
        section: SectionRef,
        before: AccountSnapshot,
        after: AccountSnapshot,
        revert_stamp: u32,
    ) -> TracerResult<()> {
        let (stamp, offset) = {
            let target = self.section_mut(section)?;
            (target.common.hub_stamp, target.fragments.len() as u32)
        };
        let fragment = self.account_fragment(
            before,
            after,
            DomSubStamps::revert(stamp, revert_stamp, offset),
        );
        self.section_mut(section)?.add_fragment(fragment)?;
        Ok(())
    }

    /// Fires the post-transaction actions, once every rollback of the
    /// transaction has been applied.
    pub(crate) fn resolve_post_transaction(&mut self) -> TracerResult<()> {
        let kept = self.defers.discard_rollbacks();
        trace!("{kept} rollback actions outlived the transaction");
        let absolute_transaction_number = self.metadata()?.absolute_transaction_number;
        for action in self.defers.take_post_transaction() {
            match action {
                PostTransactionAction::ResolveSkip {
                    section,
                    sender,
                    recipient,
                    coinbase,
                } => self.resolve_skip(section, sender, recipient, coinbase)?,
                PostTransactionAction::ResolveScenario { section } => {
                    let target = self.section_mut(section)?;
                    let frame = target.common.frame_id;
                    let reverted = self
                        .callstack
                        .get(frame)
                        .is_some_and(|f| f.reverted());
                    let target = self.section_mut(section)?;
                    let Some(scenario) = target
                        .fragments
                        .iter_mut()
                        .find_map(Fragment::as_scenario_mut)
                    else {
                        violation!("{section:?} has no scenario to settle");
                    };
                    invariant!(
                        !scenario.is_undefined(),
                        "scenario of {section:?} still undefined after the transaction"
                    );
                    scenario.settle_revert(reverted);
                }
                PostTransactionAction::LogFinalization {
                    frame,
                    log_stamp,
                    address,
                    topics,
                    data,
                } => {
                    let reverted = self
                        .callstack
                        .get(frame)
                        .is_some_and(|f| f.reverted());
                    self.modules.log_info.add(LogInfoOperation {
                        absolute_transaction_number,
                        log_stamp,
                        address,
                        topics,
                        data_size: data.len(),
                        reverted,
                    });
                    if !reverted {
                        self.modules.log_data.add(LogDataOperation { log_stamp, data });
                    }
                }
            }
        }
        Ok(())
    }

    /// Writes the code fragment indices known once every code of the
    /// conflation went through ROM lex.
    pub(crate) fn resolve_post_conflation(&mut self) -> TracerResult<()> {
        for action in self.defers.take_post_conflation() {
            match action {
                PostConflationAction::AssignCodeFragmentIndex {
                    section,
                    fragment,
                    metadata,
                } => {
                    let index = self.modules.rom_lex.code_fragment_index(&metadata);
                    invariant!(
                        index.is_some(),
                        "no code fragment index for {metadata:?}"
                    );
                    let target = self.section_mut(section)?;
                    let Some(account) = target
                        .fragments
                        .get_mut(fragment)
                        .and_then(Fragment::as_account_mut)
                    else {
                        violation!("fragment {fragment} of {section:?} is not an account fragment");
                    };
                    account.code_fragment_index = index;
                }
            }
        }
        Ok(())
    }
}
