use ethereum_types::{Address, U256};
use log::debug;

use super::{Hub, HubProcessingPhase};
use crate::error::{TracerError, TracerResult};
use crate::fragment::{DomSubStamps, Fragment};
use crate::host::{BlockBody, BlockHeader, Log, Transaction, WorldView};
use crate::invariant;
use crate::metadata::TransactionProcessingMetadata;
use crate::module::txn::{RlpTxnOperation, RlpTxnRcptOperation, TxnDataOperation};

impl Hub {
    pub(super) fn start_conflation(&mut self, block_count: usize) -> TracerResult<()> {
        invariant!(
            self.transactions.is_empty() && self.relative_block_number == 0,
            "conflation started after {} blocks were traced",
            self.relative_block_number
        );
        debug!("starting conflation of {block_count} blocks");
        self.block_count = block_count;
        Ok(())
    }

    pub(super) fn start_block(&mut self, header: &BlockHeader) -> TracerResult<()> {
        invariant!(
            self.header.is_none(),
            "block {} started while another block is open",
            header.number
        );
        self.relative_block_number += 1;
        invariant!(
            self.block_count == 0 || self.relative_block_number as usize <= self.block_count,
            "block {} exceeds the {} blocks of the conflation",
            self.relative_block_number,
            self.block_count
        );
        self.relative_transaction_number = 0;
        self.header = Some(header.clone());
        debug!(
            "starting block {} ({} of the conflation)",
            header.number, self.relative_block_number
        );
        Ok(())
    }

    pub(super) fn start_transaction(
        &mut self,
        world: &dyn WorldView,
        tx: &Transaction,
    ) -> TracerResult<()> {
        let Some(header) = self.header.clone() else {
            return Err(TracerError::InvariantViolation(
                "transaction started outside of a block".into(),
            ));
        };
        invariant!(
            self.callstack.is_empty() && self.pending.is_none(),
            "transaction started while frame {} is still executing",
            self.callstack.current_id()
        );
        self.relative_transaction_number += 1;
        let absolute_transaction_number = self.transactions.len() as u32 + 1;
        let mut metadata = TransactionProcessingMetadata::new(
            world,
            tx,
            &header,
            absolute_transaction_number,
            self.relative_transaction_number,
            self.relative_block_number,
            self.config.prewarming,
        );
        metadata.hub_stamp_start = self.state.stamps.hub;
        let requires_evm_execution = metadata.requires_evm_execution;
        let requires_prewarming = metadata.requires_prewarming;

        self.modules.enter_transaction();
        self.state.enter_transaction();
        self.transactions.enter_transaction(metadata);
        debug!(
            "starting transaction {absolute_transaction_number}: execution {requires_evm_execution}, prewarming {requires_prewarming}"
        );

        if !requires_evm_execution {
            return self.trace_skip_transaction(world);
        }
        if requires_prewarming {
            self.trace_prewarming(world)?;
        }
        self.trace_initialization(world)?;
        self.state.phase = HubProcessingPhase::TxExec;
        Ok(())
    }

    pub(super) fn end_transaction(
        &mut self,
        world: &dyn WorldView,
        tx: &Transaction,
        success: bool,
        logs: &[Log],
        self_destructs: &[Address],
    ) -> TracerResult<()> {
        self.expect_phase(
            "end_transaction",
            &[HubProcessingPhase::TxFinl, HubProcessingPhase::TxSkip],
        )?;
        invariant!(self.pending.is_none(), "transaction ended mid-instruction");
        invariant!(
            self.defers.pending_context_actions() == 0,
            "transaction ended with {} unresolved context actions",
            self.defers.pending_context_actions()
        );
        let skipped = self.state.phase == HubProcessingPhase::TxSkip;
        {
            let metadata = self.metadata_mut()?;
            invariant!(
                metadata.hub_stamp_end == 0 && metadata.transaction == *tx,
                "transaction {} ended twice or out of order",
                metadata.absolute_transaction_number
            );
            if skipped {
                metadata.leftover_gas = metadata.initially_available_gas;
                metadata.refund_counter = 0;
                metadata.status = success;
            }
            invariant!(
                metadata.status == success,
                "host reports status {success} for transaction {}, tracer computed {}",
                metadata.absolute_transaction_number,
                metadata.status
            );
        }

        let consumed = self.metadata()?.gas_consumed();
        let refund_cap = self
            .modules
            .mod_
            .call_div(U256::from(consumed), U256::from(5u8))
            .low_u64();
        let metadata = self.metadata_mut()?;
        metadata.refund_effective = metadata.refund_counter.min(refund_cap);
        metadata.gas_used = consumed - metadata.refund_effective;
        let gas_used = metadata.gas_used;
        let absolute_transaction_number = metadata.absolute_transaction_number;
        self.cumulative_gas_used += gas_used;

        if !skipped {
            self.trace_finalization(world)?;
        }
        self.resolve_post_transaction()?;
        self.wipe_self_destructs(self_destructs)?;

        let receipt_logs = self
            .modules
            .log_info
            .operations()
            .filter(|op| op.absolute_transaction_number == absolute_transaction_number)
            .filter(|op| !op.reverted)
            .count();
        invariant!(
            receipt_logs == logs.len(),
            "host reports {} logs for transaction {absolute_transaction_number}, tracer kept {receipt_logs}",
            logs.len()
        );
        self.modules.rlp_txn_rcpt.add(RlpTxnRcptOperation {
            absolute_transaction_number,
            tx_type: tx.tx_type,
            status: success,
            cumulative_gas_used: self.cumulative_gas_used,
            logs: logs.to_vec(),
        });

        let chain_id = self.config.chain_id;
        let hub_stamp_end = self.state.stamps.hub;
        let metadata = self.metadata_mut()?;
        metadata.hub_stamp_end = hub_stamp_end;
        let txn_data = TxnDataOperation::from_metadata(metadata);
        let rlp_txn = RlpTxnOperation::new(metadata, chain_id);
        txn_data.trace_computations(&mut self.modules.wcp, &mut self.modules.mod_);
        self.modules.txn_data.add(txn_data);
        self.modules.rlp_txn.add(rlp_txn);

        self.record_occurrences(absolute_transaction_number)?;
        self.callstack.finish_transaction()?;
        debug!(
            "transaction {absolute_transaction_number} done: status {success}, gas used {gas_used}, {} rows so far",
            self.line_count()
        );
        Ok(())
    }

    /// Gives every account deleted by the transaction a fresh deployment
    /// number and records its wiping.
    fn wipe_self_destructs(&mut self, self_destructs: &[Address]) -> TracerResult<()> {
        let marked = self.metadata()?.self_destructs.clone();
        invariant!(
            marked.len() == self_destructs.len()
                && marked.iter().all(|(a, _)| self_destructs.contains(a)),
            "host deleted {self_destructs:?}, tracer marked {:?}",
            marked.iter().map(|(a, _)| a).collect::<Vec<_>>()
        );
        let end_stamp = self.state.stamps.hub;
        for (address, section) in marked {
            let deployment_number = self.deployment_info.fresh_deployment_number(address);
            let target = self.section_mut(section)?;
            let stamp = target.common.hub_stamp;
            let Some(before) = target
                .latest_account(&address, target.fragments.len())
                .map(|f| f.after.clone())
            else {
                return Err(TracerError::InvariantViolation(format!(
                    "no account fragment of self-destructed {address:?}"
                )));
            };
            let mut after = before.clone().wiped();
            after.deployment_number = deployment_number;
            let fragment = self.account_fragment(
                before,
                after,
                DomSubStamps::end_of_transaction(end_stamp, stamp),
            );
            self.section_mut(section)?.add_fragment(fragment)?;
        }
        Ok(())
    }

    /// Records the first and last account and storage fragments of the
    /// transaction, in fragment order.
    fn record_occurrences(&mut self, absolute_transaction_number: u32) -> TracerResult<()> {
        let sections = self.state.transaction_sections(absolute_transaction_number);
        let Some(metadata) = self.transactions.get_mut(absolute_transaction_number) else {
            return Err(TracerError::InvariantViolation(format!(
                "unknown transaction {absolute_transaction_number}"
            )));
        };
        for fragment in sections.iter().flat_map(|s| s.fragments.iter()) {
            match fragment {
                Fragment::Account(f) => metadata.occurrences.record_account(f),
                Fragment::Storage(f) => metadata.occurrences.record_storage(f),
                _ => {}
            }
        }
        Ok(())
    }

    pub(super) fn end_block(&mut self, header: &BlockHeader, body: &BlockBody) -> TracerResult<()> {
        let Some(current) = self.header.take() else {
            return Err(TracerError::InvariantViolation(format!(
                "block {} ended without being started",
                header.number
            )));
        };
        invariant!(
            current.number == header.number,
            "block {} ended while block {} is open",
            header.number,
            current.number
        );
        let traced = self.transactions.count_in_block(self.relative_block_number);
        invariant!(
            traced == body.transactions.len(),
            "block {} holds {} transactions, {traced} were traced",
            header.number,
            body.transactions.len()
        );
        self.modules
            .blockdata
            .call(self.relative_block_number, header, body);
        debug!("block {} done", header.number);
        Ok(())
    }

    pub(super) fn end_conflation(&mut self, _world: &dyn WorldView) -> TracerResult<()> {
        invariant!(
            self.header.is_none(),
            "conflation ended inside block {}",
            self.relative_block_number
        );
        invariant!(
            self.block_count == 0 || self.relative_block_number as usize == self.block_count,
            "conflation of {} blocks ended after {}",
            self.block_count,
            self.relative_block_number
        );
        self.resolve_post_conflation()?;
        self.occurrences = self.fold_occurrences();
        debug!(
            "conflation done: {} transactions, {} hub rows",
            self.transactions.len(),
            self.line_count()
        );
        Ok(())
    }
}
