use ethereum_types::U256;
use keccak_hash::keccak;
use zktracer::callstack::MemorySpan;
use zktracer::fragment::{
    ContextKind, CreateScenario, Fragment, ReturnScenario, ScenarioFragment,
};
use zktracer::host::WorldView;
use zktracer::module::code::ContractMetadata;
use zktracer::module::imc::MmuInstruction;
use zktracer::section::SectionKind;
use zktracer::testing_utils::{
    address, bytecode, call_tx, contract, deploy_tx, eoa, init_logger, Driver,
};
use zktracer::util::{create2_address, create_address};
use zktracer::TracerConfig;

/// `CALLER SELFDESTRUCT`.
const RUNTIME: &str = "33ff";
/// Returns [`RUNTIME`].
const INIT_CODE: &str = "6133ff6000526002601ef3";
/// Writes [`INIT_CODE`] to memory and deploys it with `CREATE2`, salt 0.
const FACTORY: &str = "6a6133ff6000526002601ef36000526000600b60156000f500";
/// [`FACTORY`], reverting once the deployment is done.
const FACTORY_THEN_REVERT: &str = "6a6133ff6000526002601ef36000526000600b60156000f560006000fd";
/// Returns the word 0x2a.
const RETURN_2A: &str = "602a60005260206000f3";
/// Calls 0xbb, asking for a word of return data at offset 0.
const CALL_BB_FOR_A_WORD: &str = "6020600060006000600060bb61fffff100";

#[test]
fn selfdestruct_then_redeploy_uses_fresh_deployment_numbers() -> anyhow::Result<()> {
    init_logger();
    let (sender, factory) = (address(0xaa), address(0xfa));
    let runtime = bytecode(RUNTIME)?;
    let deployed = create2_address(factory, U256::zero(), keccak(bytecode(INIT_CODE)?));
    let mut driver = Driver::new(TracerConfig::default())
        .with_account(sender, eoa(1_000_000_000_000))
        .with_account(factory, contract(bytecode(FACTORY)?));

    let outcomes = driver.run_conflation(&[
        vec![
            call_tx(sender, factory, 0, 200_000, vec![]),
            call_tx(sender, deployed, 1, 100_000, vec![]),
        ],
        vec![call_tx(sender, factory, 2, 200_000, vec![])],
    ])?;
    assert!(outcomes.iter().all(|outcome| outcome.success));
    assert_eq!(outcomes[1].self_destructs, vec![deployed]);
    assert_eq!(driver.world.account_or_default(&deployed).code, runtime);

    // Deployment, wipe, redeployment.
    assert_eq!(driver.hub.deployment_info().deployment_number(&deployed), 3);
    assert!(!driver.hub.deployment_info().is_under_deployment(&deployed));

    let occurrences = driver.hub.occurrences();
    let first = occurrences
        .account_in_deployment(&deployed, 1)
        .expect("first deployment is traced");
    let wiped = occurrences
        .account_in_deployment(&deployed, 2)
        .expect("the wipe is traced");
    let second = occurrences
        .account_in_deployment(&deployed, 3)
        .expect("redeployment is traced");
    assert_eq!(first.last.value.after.code_size, runtime.len());
    assert_eq!(wiped.last.value.after.code_size, 0);
    assert_eq!(second.first.value.before.deployment_number, 2);
    assert_eq!(second.last.value.after.code_size, runtime.len());
    assert!(first.last.id < wiped.first.id && wiped.last.id < second.first.id);

    let creates: Vec<_> = driver
        .hub
        .sections()
        .filter(|section| section.kind == SectionKind::Create)
        .collect();
    assert_eq!(creates.len(), 2);
    for create in creates {
        assert!(create.fragments.iter().any(|f| matches!(
            f,
            Fragment::Scenario(ScenarioFragment::Create(
                CreateScenario::NonemptyInitCodeSuccessWontRevert
            ))
        )));
    }
    Ok(())
}

#[test]
fn deployment_transaction_deposits_code() -> anyhow::Result<()> {
    init_logger();
    let sender = address(0xaa);
    let mut driver = Driver::new(TracerConfig::default()).with_account(sender, eoa(1_000_000_000_000));
    let outcomes = driver.run_block(&[deploy_tx(sender, 0, 200_000, bytecode(INIT_CODE)?)])?;
    let createe = create_address(sender, 0);
    assert!(outcomes[0].success);
    assert_eq!(outcomes[0].created, Some(createe));

    let account = driver.world.account(&createe).expect("code was deposited");
    assert_eq!(account.code, bytecode(RUNTIME)?);
    assert_eq!(account.nonce, 1);
    assert_eq!(driver.hub.deployment_info().deployment_number(&createe), 1);

    let deposit = driver
        .hub
        .sections()
        .filter(|section| section.kind == SectionKind::Return)
        .flat_map(|section| section.fragments.iter().filter_map(Fragment::as_account))
        .find(|f| f.address() == createe)
        .expect("RETURN deposits the code");
    assert!(deposit.before.deployment_status);
    assert!(!deposit.after.deployment_status);
    assert_eq!(deposit.after.code_hash, keccak(bytecode(RUNTIME)?));
    Ok(())
}

#[test]
fn deployed_code_reaches_rom_and_squashes_the_callers_return_data() -> anyhow::Result<()> {
    init_logger();
    let sender = address(0xaa);
    let runtime = bytecode(RUNTIME)?;
    let mut driver = Driver::new(TracerConfig::default()).with_account(sender, eoa(1_000_000_000_000));
    let outcomes = driver.run_block(&[deploy_tx(sender, 0, 200_000, bytecode(INIT_CODE)?)])?;
    assert!(outcomes[0].success);
    let createe = create_address(sender, 0);

    let section = driver
        .hub
        .sections()
        .find(|section| section.kind == SectionKind::Return)
        .expect("the init code returns");
    assert!(section.fragments.iter().any(|f| matches!(
        f,
        Fragment::Scenario(ScenarioFragment::Return(
            ReturnScenario::FromDeploymentNonemptyCodeWontRevert
        ))
    )));

    let imcs: Vec<_> = section.fragments.iter().filter_map(Fragment::as_imc).collect();
    assert_eq!(imcs.len(), 2);
    let code_copy = imcs[1].mmu().expect("the deployed code is copied out of RAM");
    assert_eq!(code_copy.instruction, MmuInstruction::RamToExoWithPadding);
    assert_eq!(code_copy.size, runtime.len() as u64);

    let deployed = ContractMetadata {
        address: createe,
        deployment_number: 1,
        under_deployment: false,
    };
    let rom_lex = &driver.hub.modules().rom_lex;
    assert!(rom_lex.operations().any(|op| op.metadata == deployed));
    assert!(driver
        .hub
        .modules()
        .rom
        .operations()
        .any(|op| op.code == runtime));

    let deposit = section
        .fragments
        .iter()
        .filter_map(Fragment::as_account)
        .find(|f| f.address() == createe)
        .expect("RETURN deposits the code");
    assert!(deposit.requires_rom_lex);
    assert!(deposit.code_fragment_index.is_some());
    assert_eq!(deposit.code_fragment_index, rom_lex.code_fragment_index(&deployed));

    let Some(Fragment::Context(squash)) = section.fragments.last() else {
        panic!("a deployment ends on a context row");
    };
    assert_eq!(squash.kind, ContextKind::ExecutionProvidesEmptyReturnData);
    assert_eq!(squash.return_data_context_number, 0);
    assert!(squash.return_data_span.is_empty());
    Ok(())
}

#[test]
fn reverted_deployment_squashes_the_deposit() -> anyhow::Result<()> {
    init_logger();
    let (sender, factory) = (address(0xaa), address(0xfa));
    let runtime = bytecode(RUNTIME)?;
    let init_code = bytecode(INIT_CODE)?;
    let deployed = create2_address(factory, U256::zero(), keccak(&init_code));
    let mut driver = Driver::new(TracerConfig::default())
        .with_account(sender, eoa(1_000_000_000_000))
        .with_account(factory, contract(bytecode(FACTORY_THEN_REVERT)?));
    let outcomes = driver.run_block(&[call_tx(sender, factory, 0, 200_000, vec![])])?;
    assert!(!outcomes[0].success);
    assert!(driver.world.account_or_default(&deployed).code.is_empty());

    let section = driver
        .hub
        .sections()
        .find(|section| section.kind == SectionKind::Return)
        .expect("the init code returns");
    assert!(section.fragments.iter().any(|f| matches!(
        f,
        Fragment::Scenario(ScenarioFragment::Return(
            ReturnScenario::FromDeploymentNonemptyCodeWillRevert
        ))
    )));
    let accounts: Vec<_> = section
        .fragments
        .iter()
        .filter_map(Fragment::as_account)
        .filter(|f| f.address() == deployed)
        .collect();
    assert_eq!(accounts.len(), 2);
    let (deposit, undo) = (accounts[0], accounts[1]);
    assert_eq!(deposit.dom_sub.dom, section.common.hub_stamp);
    assert_eq!(deposit.after.code_hash, keccak(&runtime));
    assert_ne!(undo.dom_sub.dom, section.common.hub_stamp);
    assert_eq!(undo.before, deposit.after);
    assert_eq!(undo.after.code_hash, keccak(&init_code));
    assert!(undo.id > deposit.id);

    let last = driver
        .hub
        .occurrences()
        .account_in_conflation(&deployed)
        .expect("the deployment is traced");
    assert_eq!(last.last.value.after.code_size, 0);
    assert_eq!(last.last.value.after.nonce, 0);
    Ok(())
}

#[test]
fn message_call_return_hands_its_output_to_the_caller() -> anyhow::Result<()> {
    init_logger();
    let (sender, caller, callee) = (address(0xaa), address(0xa0), address(0xbb));
    let mut driver = Driver::new(TracerConfig::default())
        .with_account(sender, eoa(1_000_000_000_000))
        .with_account(caller, contract(bytecode(CALL_BB_FOR_A_WORD)?))
        .with_account(callee, contract(bytecode(RETURN_2A)?));
    let outcomes = driver.run_block(&[call_tx(sender, caller, 0, 200_000, vec![])])?;
    assert!(outcomes[0].success);

    let returns: Vec<_> = driver
        .hub
        .sections()
        .filter(|section| section.kind == SectionKind::Return)
        .collect();
    assert_eq!(returns.len(), 1);
    let section = returns[0];
    assert!(section.fragments.iter().any(|f| matches!(
        f,
        Fragment::Scenario(ScenarioFragment::Return(
            ReturnScenario::FromMessageCallWillTouchRam
        ))
    )));
    let Some(Fragment::Context(provided)) = section.fragments.last() else {
        panic!("a message call return ends on a context row");
    };
    assert_eq!(provided.kind, ContextKind::ExecutionProvidesReturnData);
    assert_eq!(provided.context.account_address, caller);
    assert_eq!(provided.return_data_context_number, section.common.context_number);
    assert_eq!(provided.return_data_span, MemorySpan::new(0, 32));
    Ok(())
}
