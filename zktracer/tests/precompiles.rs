use ethereum_types::U256;
use zktracer::fragment::{CallScenario, ContextKind, Fragment, ScenarioFragment};
use zktracer::host::{Account, WorldView};
use zktracer::module::imc::OobCall;
use zktracer::precompile::Precompile;
use zktracer::section::{SectionKind, TraceSection};
use zktracer::testing_utils::{address, bytecode, call_tx, contract, eoa, init_logger, Driver};
use zktracer::TracerConfig;

/// Calls ECRECOVER with no input and 0xffff gas.
const ECRECOVER_WITH_ENOUGH_GAS: &str = "60006000600060006000600161fffff100";
/// Calls ECRECOVER with no input and 2999 gas.
const ECRECOVER_SHORT_OF_GAS: &str = "600060006000600060006001610bb7f100";
/// Stores 0x2a, then sends it with 5 wei to IDENTITY, asking for the echo
/// at offset 0x20.
const ECHO_2A_WITH_VALUE: &str = "602a60005260206020602060006005600461fffff100";
/// Sends 5 wei and a one byte input to ECPAIRING.
const PAIR_ONE_BYTE_WITH_VALUE: &str = "60006000600160006005600861fffff100";

fn run(code: &str, balance: u64) -> anyhow::Result<Driver> {
    let (sender, caller) = (address(0xaa), address(0xa0));
    let mut driver = Driver::new(TracerConfig::default())
        .with_account(sender, eoa(1_000_000_000_000))
        .with_account(
            caller,
            Account {
                balance: U256::from(balance),
                ..contract(bytecode(code)?)
            },
        );
    let outcomes = driver.run_block(&[call_tx(sender, caller, 0, 200_000, vec![])])?;
    assert!(outcomes[0].success);
    Ok(driver)
}

fn call_section(driver: &Driver) -> &TraceSection {
    driver
        .hub
        .sections()
        .find(|section| section.kind == SectionKind::Call)
        .expect("the contract calls a precompile")
}

fn scenario(section: &TraceSection) -> Option<CallScenario> {
    section.fragments.iter().find_map(|f| match f {
        Fragment::Scenario(ScenarioFragment::Call(scenario)) => Some(*scenario),
        _ => None,
    })
}

fn consumed(section: &TraceSection) -> u64 {
    section.common.gas_actual - section.common.gas_next
}

#[test]
fn ecrecover_with_enough_gas_succeeds() -> anyhow::Result<()> {
    init_logger();
    let driver = run(ECRECOVER_WITH_ENOUGH_GAS, 0)?;
    let section = call_section(&driver);
    assert_eq!(scenario(section), Some(CallScenario::PrcSuccessWontRevert));
    assert_eq!(consumed(section), section.common.gas_cost + 3_000);

    let oob = section
        .fragments
        .iter()
        .filter_map(Fragment::as_imc)
        .find_map(|imc| imc.oob().filter(|oob| matches!(oob, OobCall::Precompile { .. })))
        .expect("the precompile call is checked");
    assert_eq!(
        *oob,
        OobCall::Precompile {
            precompile: Precompile::EcRecover,
            call_gas: 0xffff,
            call_data_size: 0,
        }
    );

    let Some(Fragment::Context(provided)) = section.fragments.last() else {
        panic!("a precompile call ends on a context row");
    };
    assert_eq!(provided.kind, ContextKind::ProvideReturnData);
    assert_eq!(provided.return_data_context_number, section.common.hub_stamp + 1);
    assert!(provided.return_data_span.is_empty());
    Ok(())
}

#[test]
fn ecrecover_short_of_gas_fails_and_keeps_the_gas() -> anyhow::Result<()> {
    init_logger();
    let driver = run(ECRECOVER_SHORT_OF_GAS, 0)?;
    let section = call_section(&driver);
    assert_eq!(scenario(section), Some(CallScenario::PrcFailureWontRevert));
    assert_eq!(consumed(section), section.common.gas_cost + 2_999);

    let Some(Fragment::Context(empty)) = section.fragments.last() else {
        panic!("a precompile call ends on a context row");
    };
    assert_eq!(empty.kind, ContextKind::NonExecutionProvidesEmptyReturnData);
    assert_eq!(empty.return_data_context_number, 0);
    Ok(())
}

#[test]
fn identity_echoes_its_input_and_keeps_the_value() -> anyhow::Result<()> {
    init_logger();
    let identity = Precompile::Identity.address();
    let driver = run(ECHO_2A_WITH_VALUE, 100)?;
    assert_eq!(driver.world.account_or_default(&identity).balance, U256::from(5));
    assert_eq!(
        driver.world.account_or_default(&address(0xa0)).balance,
        U256::from(95)
    );

    let section = call_section(&driver);
    assert_eq!(scenario(section), Some(CallScenario::PrcSuccessWontRevert));
    // One word of input, minus the stipend handed back unused.
    assert_eq!(consumed(section), section.common.gas_cost + 18 - 2_300);
    let Some(Fragment::Context(provided)) = section.fragments.last() else {
        panic!("a precompile call ends on a context row");
    };
    assert_eq!(provided.return_data_span.length, 32);
    Ok(())
}

#[test]
fn failed_precompile_gives_back_the_value() -> anyhow::Result<()> {
    init_logger();
    let (caller, pairing) = (address(0xa0), Precompile::EcPairing.address());
    let driver = run(PAIR_ONE_BYTE_WITH_VALUE, 100)?;
    assert_eq!(driver.world.account_or_default(&pairing).balance, U256::zero());
    assert_eq!(driver.world.account_or_default(&caller).balance, U256::from(100));

    let section = call_section(&driver);
    assert_eq!(scenario(section), Some(CallScenario::PrcFailureWontRevert));
    // The transfer, then its undoing at the call's own stamp.
    let accounts: Vec<_> = section.fragments.iter().filter_map(Fragment::as_account).collect();
    assert_eq!(accounts.len(), 4);
    assert!(accounts
        .iter()
        .all(|f| f.dom_sub.dom == section.common.hub_stamp));
    let undos: Vec<_> = accounts[2..]
        .iter()
        .map(|f| (f.address(), f.before.balance.low_u64(), f.after.balance.low_u64()))
        .collect();
    assert_eq!(undos, vec![(caller, 95, 100), (pairing, 5, 0)]);

    let occurrences = driver.hub.occurrences();
    for (address, balance) in [(caller, 100), (pairing, 0)] {
        let occurrence = occurrences
            .account_in_conflation(&address)
            .expect("both accounts are traced");
        assert_eq!(occurrence.last.value.after.balance, U256::from(balance));
    }
    Ok(())
}
