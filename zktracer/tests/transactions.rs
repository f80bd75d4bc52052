use ethereum_types::{Address, H256, U256};
use zktracer::fragment::{CallScenario, Fragment, ScenarioFragment, StorageFragmentPurpose};
use zktracer::host::{Account, Transaction, WorldView};
use zktracer::module::trace::Trace;
use zktracer::section::{SectionKind, TraceSection};
use zktracer::testing_utils::{address, bytecode, call_tx, contract, eoa, init_logger, Driver};
use zktracer::TracerConfig;

/// Calls 0xbb with 0xffff gas, then reverts.
const CALL_BB_THEN_REVERT: &str = "6000600060006000600060bb61fffff160006000fd";
/// Stores 1 at slot 1, then reverts.
const STORE_THEN_REVERT: &str = "600160015560006000fd";
/// Sends 10 then 5 wei to 0xbb, then reverts.
const PAY_BB_TWICE_THEN_REVERT: &str =
    "6000600060006000600a60bb61fffff1506000600060006000600560bb61fffff15060006000fd";
/// Emits a log with topic 0x2a and no data.
const LOG_2A: &str = "602a60006000a100";

fn funded(config: TracerConfig) -> Driver {
    Driver::new(config).with_account(address(0xaa), eoa(1_000_000_000_000))
}

#[test]
fn value_transfer_skips_execution() -> anyhow::Result<()> {
    init_logger();
    let (sender, recipient) = (address(0xaa), address(0xbb));
    let mut driver = funded(TracerConfig::default());
    let tx = Transaction {
        value: U256::from(1000),
        ..call_tx(sender, recipient, 0, 21_000, vec![])
    };
    let outcomes = driver.run_block(&[tx])?;
    assert!(outcomes[0].success);
    assert_eq!(outcomes[0].gas_used, 21_000);

    let sections: Vec<_> = driver.hub.sections().collect();
    assert_eq!(sections.len(), 1);
    assert_eq!(sections[0].kind, SectionKind::TxSkip);
    let accounts: Vec<_> = sections[0]
        .fragments
        .iter()
        .filter_map(Fragment::as_account)
        .collect();
    assert_eq!(accounts.len(), 3);
    assert_eq!(accounts[0].after.nonce, 1);
    assert_eq!(
        accounts[0].after.balance,
        driver.world.account_or_default(&sender).balance
    );
    assert_eq!(accounts[1].address(), recipient);
    assert_eq!(accounts[1].after.balance, U256::from(1000));
    assert_eq!(accounts[2].address(), driver.header.coinbase);
    assert_eq!(accounts[2].after.balance, U256::from((10 - 7) * 21_000));
    assert_eq!(driver.hub.line_count(), 4);
    Ok(())
}

/// The rollbacks of a reverted child are applied when it exits, before the
/// post-transaction actions settle the caller's scenario.
#[test]
fn rollbacks_resolve_before_post_transaction() -> anyhow::Result<()> {
    init_logger();
    let (sender, caller, callee) = (address(0xaa), address(0xa0), address(0xbb));
    let mut driver = funded(TracerConfig::default())
        .with_account(caller, contract(bytecode(CALL_BB_THEN_REVERT)?))
        .with_account(callee, contract(bytecode(STORE_THEN_REVERT)?));
    let outcomes = driver.run_block(&[call_tx(sender, caller, 0, 200_000, vec![])])?;
    assert!(!outcomes[0].success);

    let storage: Vec<_> = driver
        .hub
        .sections()
        .flat_map(|section| section.fragments.iter().filter_map(Fragment::as_storage))
        .collect();
    assert_eq!(storage.len(), 2);
    let (write, undo) = (storage[0], storage[1]);
    assert_eq!(write.purpose, StorageFragmentPurpose::Sstore);
    assert_eq!(undo.purpose, StorageFragmentPurpose::SstoreUndo);
    assert_eq!((undo.value_current, undo.value_next), (U256::one(), U256::zero()));
    assert!(undo.id > write.id);
    assert!(undo.dom_sub.dom > write.dom_sub.dom);

    let call = driver
        .hub
        .sections()
        .find(|section| section.kind == SectionKind::Call)
        .expect("the CALL has a section");
    assert!(call.fragments.iter().any(|f| matches!(
        f,
        Fragment::Scenario(ScenarioFragment::Call(CallScenario::SmcFailureWillRevert))
    )));

    let last = driver
        .hub
        .occurrences()
        .storage_in_conflation(&callee, &U256::one())
        .expect("slot 1 was written");
    assert_eq!(last.last.value.after, U256::zero());
    assert_eq!(driver.world.storage(&callee, &U256::one()), U256::zero());
    Ok(())
}

/// Each undo starts from the account's latest state, the latest change
/// undone first.
#[test]
fn reverted_transfers_to_one_account_unwind_in_reverse() -> anyhow::Result<()> {
    init_logger();
    let (sender, payer, payee) = (address(0xaa), address(0xa0), address(0xbb));
    let mut driver = funded(TracerConfig::default()).with_account(
        payer,
        Account {
            balance: U256::from(100),
            ..contract(bytecode(PAY_BB_TWICE_THEN_REVERT)?)
        },
    );
    let outcomes = driver.run_block(&[call_tx(sender, payer, 0, 200_000, vec![])])?;
    assert!(!outcomes[0].success);
    assert_eq!(driver.world.account_or_default(&payee).balance, U256::zero());
    assert_eq!(driver.world.account_or_default(&payer).balance, U256::from(100));

    let mut undos: Vec<_> = driver
        .hub
        .sections()
        .filter(|section| section.kind == SectionKind::Call)
        .flat_map(|section| {
            section
                .fragments
                .iter()
                .filter_map(Fragment::as_account)
                .filter(move |f| f.dom_sub.dom != section.common.hub_stamp)
        })
        .collect();
    undos.sort_by_key(|f| f.id);
    let balances = |address: Address| -> Vec<(u64, u64)> {
        undos
            .iter()
            .filter(|f| f.address() == address)
            .map(|f| (f.before.balance.low_u64(), f.after.balance.low_u64()))
            .collect()
    };
    assert_eq!(balances(payee), vec![(15, 10), (10, 0)]);
    assert_eq!(balances(payer), vec![(85, 90), (90, 100)]);

    let occurrences = driver.hub.occurrences();
    for (address, balance) in [(payee, 0), (payer, 100)] {
        let occurrence = occurrences
            .account_in_conflation(&address)
            .expect("both accounts are traced");
        assert_eq!(occurrence.last.value.after.balance, U256::from(balance));
    }
    Ok(())
}

#[test]
fn logs_of_successful_frames_reach_the_receipt() -> anyhow::Result<()> {
    init_logger();
    let (sender, target) = (address(0xaa), address(0xc0));
    let mut driver = funded(TracerConfig::default()).with_account(target, contract(bytecode(LOG_2A)?));
    let outcomes = driver.run_block(&[call_tx(sender, target, 0, 100_000, vec![])])?;
    assert!(outcomes[0].success);
    assert_eq!(outcomes[0].logs.len(), 1);
    assert_eq!(outcomes[0].logs[0].topics, vec![H256::from_low_u64_be(0x2a)]);
    assert_eq!(driver.hub.stamps().log, 1);

    let log = driver
        .hub
        .sections()
        .find(|section| section.kind == SectionKind::Log)
        .expect("the LOG1 has a section");
    assert_eq!(log.common.log_stamp, 1);
    Ok(())
}

fn traced(txs: &[Transaction]) -> anyhow::Result<(Vec<TraceSection>, Trace, Driver)> {
    let mut driver = funded(TracerConfig::default())
        .with_account(address(0xa0), contract(bytecode(CALL_BB_THEN_REVERT)?))
        .with_account(address(0xbb), contract(bytecode(STORE_THEN_REVERT)?))
        .with_account(address(0xc0), contract(bytecode(LOG_2A)?));
    driver.run_block(txs)?;
    let sections = driver.hub.sections().cloned().collect();
    let mut trace = Trace::new();
    driver.hub.commit(&mut trace);
    Ok((sections, trace, driver))
}

#[test]
fn tracing_is_idempotent() -> anyhow::Result<()> {
    init_logger();
    let sender = address(0xaa);
    let txs = [
        call_tx(sender, address(0xa0), 0, 200_000, vec![]),
        call_tx(sender, address(0xc0), 1, 100_000, vec![]),
        Transaction {
            value: U256::from(5),
            ..call_tx(sender, address(0xdd), 2, 21_000, vec![])
        },
    ];
    let (first_sections, first_trace, first) = traced(&txs)?;
    let (second_sections, second_trace, second) = traced(&txs)?;
    assert_eq!(first_sections, second_sections);
    assert_eq!(first.hub.occurrences(), second.hub.occurrences());
    assert_eq!(first_trace, second_trace);
    assert_eq!(first.hub.line_counts(), second.hub.line_counts());
    assert_eq!(first_trace.height("HUB"), first.hub.line_count());
    Ok(())
}
