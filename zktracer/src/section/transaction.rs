//! Sections produced outside of EVM execution: skipped transactions,
//! access list warming, transaction initialization and finalization.

use ethereum_types::{Address, U256};
use hashbrown::HashSet;
use log::debug;

use super::{SectionKind, SectionRef, TraceSection};
use crate::defer::{EntryAction, PostTransactionAction, RollbackAction};
use crate::error::TracerResult;
use crate::fragment::{
    AccountSnapshot, DomSubStamps, ImcFragment, StorageFragment, StorageFragmentPurpose,
    TransactionFragment, TransactionFragmentKind,
};
use crate::host::WorldView;
use crate::hub::{Hub, HubProcessingPhase};
use crate::module::imc::{MmuCall, MmuInstruction};

impl Hub {
    fn transaction_section(&mut self, kind: SectionKind, stamp: u32) -> TracerResult<TraceSection> {
        let common = self.common_values(stamp)?;
        Ok(TraceSection::new(kind, common, kind.max_rows(0, false)))
    }

    /// A transaction needing no execution: its account updates are only
    /// known once the host processed it.
    pub(crate) fn trace_skip_transaction(&mut self, world: &dyn WorldView) -> TracerResult<()> {
        self.state.phase = HubProcessingPhase::TxSkip;
        let stamp = self.state.next_stamp();
        let metadata = self.metadata()?;
        let (tx_number, sender, recipient, coinbase, is_deployment) = (
            metadata.absolute_transaction_number,
            metadata.sender,
            metadata.effective_recipient,
            metadata.coinbase,
            metadata.is_deployment,
        );
        let sender_before = self.snapshot(world, sender, false);
        let recipient_before = self.snapshot(world, recipient, false);
        let coinbase_before = self.snapshot(world, coinbase, false);
        if is_deployment {
            self.deployment_info.new_deployment(recipient);
            self.deployment_info.mark_deployed(recipient)?;
        }

        let mut section = self.transaction_section(SectionKind::TxSkip, stamp)?;
        section.add_fragment(TransactionFragment::new(
            TransactionFragmentKind::Skip,
            tx_number,
        ))?;
        let section = self.state.push(section)?;
        self.defers
            .schedule_for_post_transaction(PostTransactionAction::ResolveSkip {
                section,
                sender: sender_before,
                recipient: recipient_before,
                coinbase: coinbase_before,
            });
        debug!("transaction {tx_number} skips execution");
        Ok(())
    }

    /// Appends the sender, recipient and coinbase updates of a skipped
    /// transaction, now that its gas usage is known.
    pub(crate) fn resolve_skip(
        &mut self,
        section: SectionRef,
        sender: AccountSnapshot,
        recipient: AccountSnapshot,
        coinbase: AccountSnapshot,
    ) -> TracerResult<()> {
        let metadata = self.metadata()?;
        let price = metadata.effective_gas_price;
        let value = metadata.transaction.value;
        let gas_used = U256::from(metadata.gas_used);
        let fee = price.saturating_sub(metadata.base_fee) * gas_used;
        let is_deployment = metadata.is_deployment;
        let stamp = self.section_mut(section)?.common.hub_stamp;

        let sender_after = sender
            .clone()
            .increment_nonce()
            .debit(value + price * gas_used)
            .warm();
        let recipient_before = if recipient.address == sender.address {
            sender_after.clone()
        } else {
            recipient
        };
        let mut recipient_after = recipient_before.clone().credit(value).warm();
        if is_deployment {
            let deployment_number = self.deployment_info.deployment_number(&recipient_after.address);
            recipient_after = recipient_after
                .increment_nonce()
                .deploy(deployment_number, &[])
                .deposit_code(&[]);
        }
        let coinbase_before = if coinbase.address == recipient_after.address {
            recipient_after.clone()
        } else if coinbase.address == sender_after.address {
            sender_after.clone()
        } else {
            coinbase
        };
        let coinbase_after = coinbase_before.clone().credit(fee).warm();

        for (offset, (before, after)) in [
            (sender, sender_after),
            (recipient_before, recipient_after),
            (coinbase_before, coinbase_after),
        ]
        .into_iter()
        .enumerate()
        {
            let fragment =
                self.account_fragment(before, after, DomSubStamps::standard(stamp, offset as u32));
            self.section_mut(section)?.add_fragment(fragment)?;
        }
        Ok(())
    }

    /// One section per access list entry and per storage key.
    pub(crate) fn trace_prewarming(&mut self, world: &dyn WorldView) -> TracerResult<()> {
        self.state.phase = HubProcessingPhase::TxWarm;
        let access_list = self.metadata()?.transaction.access_list.clone();
        let mut warm_addresses = HashSet::new();
        let mut warm_keys = HashSet::new();
        for entry in access_list {
            let stamp = self.state.next_stamp();
            let was_warm = !warm_addresses.insert(entry.address);
            let before = self.snapshot(world, entry.address, was_warm);
            let after = before.clone().warm();
            let fragment = self.account_fragment(before, after, DomSubStamps::standard(stamp, 0));
            let mut section = self.transaction_section(SectionKind::TxPreWarming, stamp)?;
            section.add_fragment(fragment)?;
            self.state.push(section)?;

            for key in entry.storage_keys {
                let stamp = self.state.next_stamp();
                let was_warm = !warm_keys.insert((entry.address, key));
                let original =
                    self.metadata_mut()?
                        .original_storage_value(world, entry.address, key);
                let fragment = StorageFragment {
                    id: self.next_fragment_id(),
                    purpose: StorageFragmentPurpose::PreWarming,
                    address: entry.address,
                    deployment_number: self.deployment_info.deployment_number(&entry.address),
                    key,
                    value_original: original,
                    value_current: original,
                    value_next: original,
                    warm_before: was_warm,
                    warm_after: true,
                    dom_sub: DomSubStamps::standard(stamp, 0),
                    relative_block_number: self.relative_block_number,
                    block_deployment_numbers: None,
                };
                let mut section = self.transaction_section(SectionKind::TxPreWarming, stamp)?;
                section.add_fragment(fragment)?;
                self.state.push(section)?;
            }
        }
        Ok(())
    }

    /// Buys the gas, transfers the value and, for deployments, opens the
    /// deployment of the recipient.
    pub(crate) fn trace_initialization(&mut self, world: &dyn WorldView) -> TracerResult<()> {
        self.state.phase = HubProcessingPhase::TxInit;
        let stamp = self.state.next_stamp();
        let metadata = self.metadata()?;
        let tx_number = metadata.absolute_transaction_number;
        let sender = metadata.sender;
        let recipient = metadata.effective_recipient;
        let is_deployment = metadata.is_deployment;
        let value = metadata.transaction.value;
        let upfront = metadata.effective_gas_price * U256::from(metadata.transaction.gas_limit);
        let init_code = metadata.transaction.data.clone();
        let copy_call_data = metadata.copy_transaction_call_data;
        let prewarmed: Vec<Address> = if metadata.requires_prewarming {
            metadata
                .transaction
                .access_list
                .iter()
                .map(|entry| entry.address)
                .collect()
        } else {
            Vec::new()
        };

        let sender_before = self.snapshot(world, sender, prewarmed.contains(&sender));
        let sender_after = sender_before
            .clone()
            .increment_nonce()
            .debit(upfront + value)
            .warm();
        let recipient_before = if recipient == sender {
            sender_after.clone()
        } else {
            self.snapshot(world, recipient, prewarmed.contains(&recipient))
        };
        let mut recipient_after = recipient_before.clone().credit(value).warm();
        if is_deployment {
            let deployment_number = self.deployment_info.new_deployment(recipient);
            recipient_after = recipient_after
                .increment_nonce()
                .deploy(deployment_number, &init_code);
        }

        let mut section = self.transaction_section(SectionKind::TxInitialization, stamp)?;
        section.add_fragment(TransactionFragment::new(
            TransactionFragmentKind::Initialization,
            tx_number,
        ))?;
        let sender_fragment =
            self.account_fragment(sender_before, sender_after, DomSubStamps::standard(stamp, 0));
        section.add_fragment(sender_fragment)?;
        let recipient_fragment = self.account_fragment(
            recipient_before,
            recipient_after,
            DomSubStamps::standard(stamp, 1),
        );
        section.add_fragment(recipient_fragment)?;

        if copy_call_data {
            let call_data = self.metadata()?.transaction.data.clone();
            let size = call_data.len() as u64;
            self.callstack
                .new_transaction_call_data_context(stamp, call_data);
            self.metadata_mut()?.call_data_context_number = stamp;
            let mut imc = ImcFragment::empty();
            imc.call_mmu(
                &mut self.modules,
                MmuCall::new(stamp, MmuInstruction::ExoToRamTransplants, size)
                    .target(stamp, U256::zero()),
            );
            section.add_fragment(imc)?;
        }

        let section = self.state.push(section)?;
        self.defers
            .schedule_for_context_entry(EntryAction::InitializeContext { section });
        self.defers
            .schedule_for_context_entry(EntryAction::RollbackOnRevert(
                RollbackAction::UndoValueTransfer {
                    section,
                    sender,
                    recipient,
                    value,
                    undo_deployment: is_deployment,
                },
            ));
        Ok(())
    }

    /// Refunds the sender and pays the coinbase.
    pub(crate) fn trace_finalization(&mut self, world: &dyn WorldView) -> TracerResult<()> {
        self.state.phase = HubProcessingPhase::TxFinl;
        let stamp = self.state.next_stamp();
        let metadata = self.metadata()?;
        let tx_number = metadata.absolute_transaction_number;
        let price = metadata.effective_gas_price;
        let refund = price * U256::from(metadata.leftover_gas + metadata.refund_effective);
        let fee = price.saturating_sub(metadata.base_fee) * U256::from(metadata.gas_used);
        let (sender, coinbase) = (metadata.sender, metadata.coinbase);

        let coinbase_after = self.snapshot(world, coinbase, true);
        let coinbase_before = coinbase_after.clone().debit(fee);
        let sender_after = if sender == coinbase {
            coinbase_before.clone()
        } else {
            self.snapshot(world, sender, true)
        };
        let sender_before = sender_after.clone().debit(refund);

        let mut section = self.transaction_section(SectionKind::TxFinalization, stamp)?;
        section.add_fragment(TransactionFragment::new(
            TransactionFragmentKind::Finalization,
            tx_number,
        ))?;
        let sender_fragment =
            self.account_fragment(sender_before, sender_after, DomSubStamps::standard(stamp, 0));
        section.add_fragment(sender_fragment)?;
        let coinbase_fragment = self.account_fragment(
            coinbase_before,
            coinbase_after,
            DomSubStamps::standard(stamp, 1),
        );
        section.add_fragment(coinbase_fragment)?;
        self.state.push(section)?;
        Ok(())
    }
}
