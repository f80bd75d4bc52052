use ethereum_types::U256;
use zktracer::fragment::{Fragment, StorageFragment, StorageFragmentPurpose};
use zktracer::host::WorldView;
use zktracer::metadata::StateTransition;
use zktracer::testing_utils::{address, bytecode, call_tx, contract, eoa, init_logger, Driver};
use zktracer::{Hub, TracerConfig};

/// Stores the first word of the call data at slot 123.
const STORE_AT_123: &str = "600035607b5500";
/// Stores 5 then 7 at slot 1, then reverts.
const STORE_TWICE_THEN_REVERT: &str = "6005600155600760015560006000fd";

fn word(value: u8) -> Vec<u8> {
    let mut word = vec![0u8; 32];
    word[31] = value;
    word
}

fn storage_fragments(hub: &Hub, purpose: StorageFragmentPurpose) -> Vec<(u32, StorageFragment)> {
    hub.sections()
        .flat_map(|section| {
            section
                .fragments
                .iter()
                .filter_map(Fragment::as_storage)
                .map(move |f| (section.common.absolute_transaction_number, f.clone()))
        })
        .filter(|(_, f)| f.purpose == purpose)
        .collect()
}

/// Slot 123 written with 8, 10 then 15 over two blocks.
#[test]
fn storage_writes_keep_first_and_last_occurrences() -> anyhow::Result<()> {
    init_logger();
    let (sender, target) = (address(0xaa), address(0xc0));
    let mut driver = Driver::new(TracerConfig::default())
        .with_account(sender, eoa(1_000_000_000_000))
        .with_account(target, contract(bytecode(STORE_AT_123)?));
    let outcomes = driver.run_conflation(&[
        vec![
            call_tx(sender, target, 0, 100_000, word(8)),
            call_tx(sender, target, 1, 100_000, word(10)),
        ],
        vec![call_tx(sender, target, 2, 100_000, word(15))],
    ])?;
    assert!(outcomes.iter().all(|outcome| outcome.success));

    let key = U256::from(123);
    let writes = storage_fragments(&driver.hub, StorageFragmentPurpose::Sstore);
    let values: Vec<_> = writes
        .iter()
        .map(|(_, f)| (f.value_current.low_u64(), f.value_next.low_u64()))
        .collect();
    assert_eq!(values, vec![(0, 8), (8, 10), (10, 15)]);

    let occurrences = driver.hub.occurrences();
    let conflation = occurrences
        .storage_in_conflation(&target, &key)
        .expect("slot 123 was written");
    assert_eq!(
        conflation.first.value,
        StateTransition {
            before: U256::zero(),
            after: U256::from(8)
        }
    );
    assert_eq!(conflation.last.value.after, U256::from(15));
    let second_block = occurrences
        .storage_in_block(&target, &key, 2)
        .expect("slot 123 was written in the second block");
    assert_eq!(second_block.first.value.before, U256::from(10));

    let flags: Vec<_> = writes
        .iter()
        .map(|(tx, f)| driver.hub.storage_flags(*tx, f))
        .collect();
    assert_eq!(flags.iter().filter(|f| f.first_in_cnf).count(), 1);
    assert_eq!(flags.iter().filter(|f| f.final_in_cnf).count(), 1);
    assert!(flags[0].first_in_cnf && flags[2].final_in_cnf);
    assert!(flags[1].final_in_blk && flags[1].final_in_txn && !flags[1].final_in_cnf);
    assert!(flags[2].first_in_blk);

    assert_eq!(driver.world.storage(&target, &key), U256::from(15));
    Ok(())
}

/// Storing the same value twice leaves both writes in the trace, with the
/// second seeing the first's value as current.
#[test]
fn repeated_writes_within_one_transaction() -> anyhow::Result<()> {
    init_logger();
    let (sender, target) = (address(0xaa), address(0xc1));
    // Slot 1 := 5, then slot 1 := 5 again, then read it back.
    let code = bytecode("60056001556005600155600154")?;
    let mut driver = Driver::new(TracerConfig::default())
        .with_account(sender, eoa(1_000_000_000_000))
        .with_account(target, contract(code));
    let outcomes = driver.run_block(&[call_tx(sender, target, 0, 100_000, vec![])])?;
    assert!(outcomes[0].success);

    let writes = storage_fragments(&driver.hub, StorageFragmentPurpose::Sstore);
    assert_eq!(writes.len(), 2);
    assert!(!writes[0].1.warm_before && writes[0].1.warm_after);
    assert!(writes[1].1.warm_before);
    assert_eq!(writes[1].1.value_current, U256::from(5));
    assert_eq!(writes[1].1.value_original, U256::zero());

    let reads = storage_fragments(&driver.hub, StorageFragmentPurpose::Sload);
    assert_eq!(reads.len(), 1);
    assert_eq!(reads[0].1.value_current, U256::from(5));
    Ok(())
}

#[test]
fn reverted_writes_to_one_slot_unwind_in_reverse() -> anyhow::Result<()> {
    init_logger();
    let (sender, target) = (address(0xaa), address(0xc0));
    let mut driver = Driver::new(TracerConfig::default())
        .with_account(sender, eoa(1_000_000_000_000))
        .with_account(target, contract(bytecode(STORE_TWICE_THEN_REVERT)?));
    let outcomes = driver.run_block(&[call_tx(sender, target, 0, 200_000, vec![])])?;
    assert!(!outcomes[0].success);
    assert_eq!(driver.world.storage(&target, &U256::one()), U256::zero());

    let mut undos = storage_fragments(&driver.hub, StorageFragmentPurpose::SstoreUndo);
    undos.sort_by_key(|(_, f)| f.id);
    let values: Vec<_> = undos
        .iter()
        .map(|(_, f)| (f.value_current.low_u64(), f.value_next.low_u64()))
        .collect();
    assert_eq!(values, vec![(7, 5), (5, 0)]);

    let slot = driver
        .hub
        .occurrences()
        .storage_in_conflation(&target, &U256::one())
        .expect("slot 1 was written");
    assert_eq!(slot.last.value.after, U256::zero());
    Ok(())
}
