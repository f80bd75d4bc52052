//! Actions scheduled by a section to run at a later checkpoint.
//!
//! Each checkpoint has its own queue. Resolving a checkpoint takes the
//! matching actions out of its queue before firing any of them, so an action
//! fires at most once and actions scheduled while firing wait for the next
//! resolution.

use ethereum_types::{Address, U256};

use crate::callstack::FrameId;
use crate::fragment::AccountSnapshot;
use crate::module::code::ContractMetadata;
use crate::section::SectionRef;

/// Runs when the next context is entered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntryAction {
    /// Appends the initialization of the new context to `section`.
    InitializeContext { section: SectionRef },
    /// Schedules `rollback` against the new context.
    RollbackOnRevert(RollbackAction),
}

/// Runs when a frame resumes after its child returned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReentryAction {
    CallReturned { section: SectionRef },
    CreateReturned { section: SectionRef },
}

/// Runs when a frame exits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExitAction {
    MarkSelfDestruct { section: SectionRef, address: Address },
}

/// Runs when a frame, or one of its ancestors, reverts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RollbackAction {
    /// Undoes the account update recorded by fragment `fragment` of
    /// `section`.
    UndoAccount { section: SectionRef, fragment: usize },
    UndoStorage { section: SectionRef, fragment: usize },
    /// Gives `value` back to `sender`. A recipient that was being deployed
    /// also loses its code and nonce.
    UndoValueTransfer {
        section: SectionRef,
        sender: Address,
        recipient: Address,
        value: U256,
        undo_deployment: bool,
    },
    /// Takes back the nonce a `CREATE` consumed from its creator.
    UndoNonce { section: SectionRef, address: Address },
    UnmarkSelfDestruct { address: Address, section: SectionRef },
}

/// Runs once the transaction is over, with the final world state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PostTransactionAction {
    /// Appends the account updates of a transaction that needed no
    /// execution.
    ResolveSkip {
        section: SectionRef,
        sender: AccountSnapshot,
        recipient: AccountSnapshot,
        coinbase: AccountSnapshot,
    },
    /// Settles whether the scenario of `section` reverts.
    ResolveScenario { section: SectionRef },
    /// Records a `LOG` in the log modules, as reverted if its frame
    /// reverted.
    LogFinalization {
        frame: FrameId,
        log_stamp: u32,
        address: Address,
        topics: usize,
        data: Vec<u8>,
    },
}

/// Runs once the conflation is over.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PostConflationAction {
    /// Writes the code fragment index of `metadata` into an account
    /// fragment.
    AssignCodeFragmentIndex {
        section: SectionRef,
        fragment: usize,
        metadata: ContractMetadata,
    },
}

/// The queues of pending actions, one per checkpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeferRegistry {
    entry: Vec<EntryAction>,
    reentry: Vec<(FrameId, ReentryAction)>,
    exit: Vec<(FrameId, ExitAction)>,
    rollback: Vec<(FrameId, RollbackAction)>,
    post_transaction: Vec<PostTransactionAction>,
    post_conflation: Vec<PostConflationAction>,
}

impl DeferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule_for_context_entry(&mut self, action: EntryAction) {
        self.entry.push(action);
    }

    pub fn schedule_for_context_reentry(&mut self, frame: FrameId, action: ReentryAction) {
        self.reentry.push((frame, action));
    }

    pub fn schedule_for_context_exit(&mut self, frame: FrameId, action: ExitAction) {
        self.exit.push((frame, action));
    }

    pub fn schedule_for_post_rollback(&mut self, frame: FrameId, action: RollbackAction) {
        self.rollback.push((frame, action));
    }

    pub fn schedule_for_post_transaction(&mut self, action: PostTransactionAction) {
        self.post_transaction.push(action);
    }

    pub fn schedule_for_post_conflation(&mut self, action: PostConflationAction) {
        self.post_conflation.push(action);
    }

    pub fn take_entry(&mut self) -> Vec<EntryAction> {
        std::mem::take(&mut self.entry)
    }

    pub fn take_reentry(&mut self, frame: FrameId) -> Vec<ReentryAction> {
        take_matching(&mut self.reentry, |f| f == frame)
    }

    pub fn take_exit(&mut self, frame: FrameId) -> Vec<ExitAction> {
        take_matching(&mut self.exit, |f| f == frame)
    }

    /// Takes the rollback actions of every frame matching `reverted`, most
    /// recently scheduled first.
    pub fn take_rollback(&mut self, reverted: impl Fn(FrameId) -> bool) -> Vec<RollbackAction> {
        let mut taken = take_matching(&mut self.rollback, reverted);
        taken.reverse();
        taken
    }

    pub fn take_post_transaction(&mut self) -> Vec<PostTransactionAction> {
        std::mem::take(&mut self.post_transaction)
    }

    pub fn take_post_conflation(&mut self) -> Vec<PostConflationAction> {
        std::mem::take(&mut self.post_conflation)
    }

    /// Drops the rollback actions that can no longer fire. Returns how many
    /// were dropped.
    pub fn discard_rollbacks(&mut self) -> usize {
        let count = self.rollback.len();
        self.rollback.clear();
        count
    }

    /// Number of pending entry, re-entry and exit actions.
    pub fn pending_context_actions(&self) -> usize {
        self.entry.len() + self.reentry.len() + self.exit.len()
    }
}

fn take_matching<A>(queue: &mut Vec<(FrameId, A)>, matches: impl Fn(FrameId) -> bool) -> Vec<A> {
    let (taken, kept): (Vec<_>, Vec<_>) = std::mem::take(queue)
        .into_iter()
        .partition(|(frame, _)| matches(*frame));
    *queue = kept;
    taken.into_iter().map(|(_, action)| action).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn undo(index: usize) -> RollbackAction {
        RollbackAction::UndoAccount {
            section: SectionRef { tx: 1, index },
            fragment: 0,
        }
    }

    #[test]
    fn actions_fire_once() {
        let mut registry = DeferRegistry::new();
        registry.schedule_for_context_exit(
            3,
            ExitAction::MarkSelfDestruct {
                section: SectionRef::default(),
                address: Address::zero(),
            },
        );
        assert!(registry.take_exit(2).is_empty());
        assert_eq!(registry.take_exit(3).len(), 1);
        assert!(registry.take_exit(3).is_empty());
        assert_eq!(registry.pending_context_actions(), 0);
    }

    #[test]
    fn rollbacks_unwind_in_reverse_scheduling_order() {
        let mut registry = DeferRegistry::new();
        registry.schedule_for_post_rollback(2, undo(0));
        registry.schedule_for_post_rollback(5, undo(1));
        registry.schedule_for_post_rollback(2, undo(2));
        registry.schedule_for_post_rollback(3, undo(3));
        let taken = registry.take_rollback(|frame| frame == 2 || frame == 3);
        assert_eq!(taken, vec![undo(3), undo(2), undo(0)]);
        assert_eq!(registry.discard_rollbacks(), 1);
    }

    #[test]
    fn actions_scheduled_while_firing_wait_for_the_next_pass() {
        let mut registry = DeferRegistry::new();
        registry.schedule_for_context_entry(EntryAction::InitializeContext {
            section: SectionRef::default(),
        });
        let first = registry.take_entry();
        registry.schedule_for_context_entry(EntryAction::RollbackOnRevert(undo(4)));
        assert_eq!(first.len(), 1);
        assert_eq!(
            registry.take_entry(),
            vec![EntryAction::RollbackOnRevert(undo(4))]
        );
    }
}
