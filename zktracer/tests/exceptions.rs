use ethereum_types::U256;
use zktracer::fragment::Fragment;
use zktracer::gas;
use zktracer::host::{HostFrame, WorldView};
use zktracer::metadata::intrinsic_gas;
use zktracer::opcode::OpCode;
use zktracer::section::{SectionKind, TraceSection};
use zktracer::signals::TracedException;
use zktracer::testing_utils::{
    address, bytecode, call_tx, contract, deploy_tx, eoa, init_logger, Driver,
};
use zktracer::util::create_address;
use zktracer::{Hub, TracerConfig, TracerError};

/// Calls 0xbb with zero gas, value and buffers, then stops.
const CALL_BB: &str = "6000600060006000600060bb6000f100";
/// Program counter of the `CALL` in [`CALL_BB`].
const CALL_PC: usize = 14;

fn exceptional_sections(hub: &Hub) -> Vec<&TraceSection> {
    hub.sections()
        .filter(|section| section.common.exception.is_exceptional())
        .collect()
}

/// Gas the `CALL` of [`CALL_BB`] needs upfront when 0xbb is cold.
fn call_upfront(driver: &Driver, code: &[u8]) -> u64 {
    let frame = HostFrame {
        recipient: address(0xa0),
        contract: address(0xa0),
        code: code.to_vec(),
        pc: CALL_PC,
        remaining_gas: 1_000_000,
        stack: vec![
            U256::zero(),
            U256::zero(),
            U256::zero(),
            U256::zero(),
            U256::zero(),
            U256::from(0xbb),
            U256::zero(),
        ],
        warm_addresses: [address(0xaa), address(0xa0)].into_iter().collect(),
        ..Default::default()
    };
    assert_eq!(frame.current_opcode(), OpCode::Call);
    gas::project(&frame, &driver.world, None).upfront()
}

fn call_driver(code: &[u8]) -> Driver {
    Driver::new(TracerConfig::default())
        .with_account(address(0xaa), eoa(1_000_000_000_000))
        .with_account(address(0xa0), contract(code.to_vec()))
        .with_account(address(0xbb), contract(vec![0x00]))
}

#[test]
fn call_one_gas_short_is_out_of_gas() -> anyhow::Result<()> {
    init_logger();
    let code = bytecode(CALL_BB)?;
    let mut driver = call_driver(&code);
    let pushes = 7 * OpCode::Push(1).static_gas();
    let upfront = call_upfront(&driver, &code);
    let tx = call_tx(address(0xaa), address(0xa0), 0, 0, vec![]);
    let tx = zktracer::host::Transaction {
        gas_limit: intrinsic_gas(&tx) + pushes + upfront - 1,
        ..tx
    };
    let outcomes = driver.run_block(&[tx])?;
    assert!(!outcomes[0].success);

    let exceptional = exceptional_sections(&driver.hub);
    assert_eq!(exceptional.len(), 1);
    let section = exceptional[0];
    assert_eq!(section.common.exception, TracedException::OutOfGas);
    assert_eq!(section.common.pc, CALL_PC);
    assert_eq!(section.common.gas_actual, upfront - 1);
    assert_eq!(section.common.gas_next, 0);
    Ok(())
}

#[test]
fn call_with_exactly_its_upfront_cost_succeeds() -> anyhow::Result<()> {
    init_logger();
    let code = bytecode(CALL_BB)?;
    let mut driver = call_driver(&code);
    let pushes = 7 * OpCode::Push(1).static_gas();
    let upfront = call_upfront(&driver, &code);
    let tx = call_tx(address(0xaa), address(0xa0), 0, 0, vec![]);
    let tx = zktracer::host::Transaction {
        gas_limit: intrinsic_gas(&tx) + pushes + upfront,
        ..tx
    };
    let outcomes = driver.run_block(&[tx])?;
    assert!(outcomes[0].success);
    assert!(exceptional_sections(&driver.hub).is_empty());
    let call = driver
        .hub
        .sections()
        .find(|section| section.kind == SectionKind::Call)
        .expect("the CALL has a section");
    assert_eq!(call.common.pc, CALL_PC);
    assert_ne!(call.common.context_number_new, call.common.context_number);
    Ok(())
}

#[test]
fn deployment_over_max_code_size() -> anyhow::Result<()> {
    init_logger();
    let config = TracerConfig {
        max_code_size: 32,
        ..Default::default()
    };
    let sender = address(0xaa);
    let createe = create_address(sender, 0);
    let mut driver = Driver::new(config).with_account(sender, eoa(1_000_000_000_000));
    // Returns 33 bytes of zeroed memory.
    let init_code = bytecode("60216000f3")?;
    let outcomes = driver.run_block(&[deploy_tx(sender, 0, 100_000, init_code)])?;
    assert!(!outcomes[0].success);
    assert_eq!(outcomes[0].created, Some(createe));

    let exceptional = exceptional_sections(&driver.hub);
    assert_eq!(exceptional.len(), 1);
    let section = exceptional[0];
    assert_eq!(section.kind, SectionKind::Return);
    assert_eq!(section.common.exception, TracedException::MaxCodeSize);
    assert!(section
        .fragments
        .iter()
        .all(|f| f.as_account().is_none() && f.as_storage().is_none()));

    assert!(driver
        .hub
        .sections()
        .all(|section| section.fragments.iter().all(|f| f.as_storage().is_none())));
    for section in driver.hub.sections() {
        let touches_createe = section
            .fragments
            .iter()
            .filter_map(Fragment::as_account)
            .any(|f| f.address() == createe);
        if touches_createe {
            assert_eq!(section.kind, SectionKind::TxInitialization);
        }
    }
    assert!(driver.world.account(&createe).is_none());
    assert!(!driver.hub.deployment_info().is_under_deployment(&createe));
    Ok(())
}

#[test]
fn host_gas_disagreement_poisons_the_hub() -> anyhow::Result<()> {
    init_logger();
    let (sender, target) = (address(0xaa), address(0xc0));
    let mut driver = Driver::new(TracerConfig::default())
        .with_account(sender, eoa(1_000_000_000_000))
        .with_account(target, contract(bytecode("600160020100")?));
    driver.gas_skew = Some((OpCode::Add, 1));

    let err = driver
        .run_block(&[call_tx(sender, target, 0, 100_000, vec![])])
        .expect_err("the host charged one more gas than the tracer");
    assert!(matches!(
        err.downcast_ref::<TracerError>(),
        Some(TracerError::GasMismatch {
            opcode: OpCode::Add,
            tracer: 3,
            host: 4
        })
    ));
    assert!(driver.hub.is_poisoned());
    assert!(matches!(
        driver.hub.trace_start_block(&driver.header),
        Err(TracerError::Poisoned)
    ));
    Ok(())
}

#[test]
fn stack_underflow_ends_the_frame() -> anyhow::Result<()> {
    init_logger();
    let (sender, target) = (address(0xaa), address(0xc0));
    let mut driver = Driver::new(TracerConfig::default())
        .with_account(sender, eoa(1_000_000_000_000))
        .with_account(target, contract(bytecode("600101")?));
    let outcomes = driver.run_block(&[call_tx(sender, target, 0, 100_000, vec![])])?;
    assert!(!outcomes[0].success);
    assert_eq!(outcomes[0].gas_used, 100_000);

    let exceptional = exceptional_sections(&driver.hub);
    assert_eq!(exceptional.len(), 1);
    assert_eq!(exceptional[0].common.exception, TracedException::StackUnderflow);
    assert_eq!(exceptional[0].common.pc, 2);
    Ok(())
}
