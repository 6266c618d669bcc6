use std::rc::Rc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use riscv_debug::dmi::mock::{SimulatedHart, SimulatedTarget};
use riscv_debug::dmi::DebugVersion;
use riscv_debug::poll::SteppingClock;
use riscv_debug::registers::csr;
use riscv_debug::{
    AccessWidth, DebugConfig, ErrorLayer, HartStatus, RiscvDebugInterface, RiscvError,
};
use test_case::test_case;

const RV32IMAC: u32 = 0x4014_1105;
const RV64IMAFDC: u64 = 0x8000_0000_0014_112d;

fn attach(sim: &SimulatedTarget) -> (RiscvDebugInterface, Vec<riscv_debug::HartId>) {
    let mut interface = RiscvDebugInterface::new(DebugConfig::default());
    let harts = interface
        .attach(Box::new(sim.clone()))
        .expect("Failed to attach to the simulated target.");
    (interface, harts)
}

#[test]
fn rv32_hart_identity() {
    let sim = SimulatedTarget::new(vec![
        SimulatedHart::rv32(RV32IMAC).with_csr(csr::MHARTID, 7)
    ]);
    let (interface, harts) = attach(&sim);

    assert_eq!(harts.len(), 1);
    let hart = interface.hart(harts[0]).unwrap();

    assert_eq!(hart.isa_name(), "rv32imac");
    assert_eq!(hart.register_width(), AccessWidth::Bits32);
    assert_eq!(hart.vendorid(), 0x489);
    assert_eq!(hart.archid(), 0x8000_0002);
    assert_eq!(hart.implid(), 1);
    assert_eq!(hart.hartid(), 7);
    assert_eq!(hart.status(), HartStatus::NoError);
    assert_eq!(hart.data_count(), 4);
    assert_eq!(hart.scratch_count(), 1);

    // The hart was running before the attach and is running again afterwards.
    assert!(!hart.is_halted());
    assert!(!sim.hart(0).halted);
    assert_eq!(sim.state().prepare_calls, 1);
}

#[test]
fn rv64_hart_identity() {
    let sim = SimulatedTarget::new(vec![SimulatedHart::rv64(RV64IMAFDC)]);
    let (interface, harts) = attach(&sim);

    let hart = interface.hart(harts[0]).unwrap();
    assert_eq!(hart.isa_name(), "rv64imafdc");
    assert_eq!(hart.register_width(), AccessWidth::Bits64);
    assert_eq!(hart.extensions(), 0x0014_112d);
}

#[test]
fn halted_hart_stays_halted_until_detach() {
    let sim = SimulatedTarget::new(vec![SimulatedHart::rv32(RV32IMAC).halted()]);
    let (mut interface, harts) = attach(&sim);

    assert!(interface.hart(harts[0]).unwrap().is_halted());
    assert!(sim.hart(0).halted);

    interface.detach(harts[0]).unwrap();
    assert!(!sim.hart(0).halted);
}

#[test]
fn harts_share_their_debug_module_and_bus() {
    let sim = SimulatedTarget::new(vec![
        SimulatedHart::rv32(RV32IMAC),
        SimulatedHart::rv32(RV32IMAC).with_csr(csr::MHARTID, 1),
    ]);
    let (mut interface, harts) = attach(&sim);

    assert_eq!(harts.len(), 2);
    let dm = interface.hart(harts[0]).unwrap().debug_module();
    assert_eq!(interface.hart(harts[1]).unwrap().debug_module(), dm);
    assert_eq!(interface.debug_module(dm).unwrap().ref_count(), 2);

    interface.detach(harts[0]).unwrap();

    assert!(matches!(
        interface.hart(harts[0]),
        Err(RiscvError::InvalidHandle)
    ));
    assert_eq!(interface.debug_module(dm).unwrap().ref_count(), 1);
    assert_eq!(sim.state().quiesce_calls, 0);

    // The remaining hart is still usable.
    let mut hart = interface.hart_interface(harts[1]).unwrap();
    hart.halt().unwrap();
    assert_eq!(hart.read_csr(csr::MHARTID).unwrap().as_u32(), 1);

    interface.detach(harts[1]).unwrap();

    assert!(interface.debug_module(dm).is_err());
    assert_eq!(sim.state().quiesce_calls, 1);
    assert_eq!(interface.harts().count(), 0);
}

#[test]
fn detach_twice_is_rejected() {
    let sim = SimulatedTarget::new(vec![SimulatedHart::rv32(RV32IMAC)]);
    let (mut interface, harts) = attach(&sim);

    interface.detach(harts[0]).unwrap();
    assert!(matches!(
        interface.detach(harts[0]),
        Err(RiscvError::InvalidHandle)
    ));
    assert_eq!(sim.state().quiesce_calls, 1);
}

#[test]
fn dtm_version_0_11_is_rejected() {
    let sim = SimulatedTarget::new(vec![SimulatedHart::rv32(RV32IMAC)])
        .with_dtm_version(DebugVersion::V0_11);

    let mut interface = RiscvDebugInterface::new(DebugConfig::default());
    let result = interface.attach(Box::new(sim.clone()));

    assert!(matches!(
        result,
        Err(RiscvError::UnsupportedDebugModuleVersion(DebugVersion::V0_11))
    ));
    assert_eq!(sim.state().quiesce_calls, 1);
}

#[test]
fn debug_module_version_0_11_is_rejected() {
    let sim = SimulatedTarget::new(vec![SimulatedHart::rv32(RV32IMAC)]).with_dm_version(1);

    let mut interface = RiscvDebugInterface::new(DebugConfig::default());
    let result = interface.attach(Box::new(sim.clone()));

    assert!(matches!(
        result,
        Err(RiscvError::UnsupportedDebugModuleVersion(DebugVersion::V0_11))
    ));
    assert_eq!(sim.state().register_commands, 0);
    assert_eq!(sim.state().quiesce_calls, 1);
}

#[test]
fn debug_module_version_1_0_is_accepted() {
    let sim = SimulatedTarget::new(vec![SimulatedHart::rv32(RV32IMAC)]).with_dm_version(3);
    let (interface, harts) = attach(&sim);

    let dm = interface.hart(harts[0]).unwrap().debug_module();
    assert_eq!(
        interface.debug_module(dm).unwrap().version(),
        DebugVersion::V1_0
    );
}

#[test]
fn no_harts_releases_the_bus() {
    let sim = SimulatedTarget::new(Vec::new());

    let mut interface = RiscvDebugInterface::new(DebugConfig::default());
    let result = interface.attach(Box::new(sim.clone()));

    assert!(matches!(result, Err(RiscvError::NoHartsFound)));
    assert_eq!(sim.state().prepare_calls, 1);
    assert_eq!(sim.state().quiesce_calls, 1);
}

#[test]
fn broken_transport_is_a_transport_error() {
    let sim = SimulatedTarget::new(vec![SimulatedHart::rv32(RV32IMAC)]);
    sim.state().transport_broken = true;

    let mut interface = RiscvDebugInterface::new(DebugConfig::default());
    let error = interface.attach(Box::new(sim.clone())).unwrap_err();

    assert_eq!(error.layer(), ErrorLayer::Transport);
}

#[test]
fn gpr_only_hart_uses_the_program_buffer_for_csrs() {
    let sim = SimulatedTarget::new(vec![SimulatedHart::rv32(RV32IMAC)
        .gpr_only()
        .with_csr(csr::MHARTID, 3)]);
    let (mut interface, harts) = attach(&sim);

    let hart = interface.hart(harts[0]).unwrap();
    assert!(hart.flags().data_gpr_only);
    assert_eq!(hart.isa_name(), "rv32imac");
    assert_eq!(hart.hartid(), 3);

    let mut hart = interface.hart_interface(harts[0]).unwrap();
    hart.halt().unwrap();
    hart.write_register(8, 0x1234_5678u32).unwrap();

    hart.write_csr(csr::MSTATUS, 0x88u32).unwrap();
    assert_eq!(hart.read_csr(csr::MSTATUS).unwrap().as_u32(), 0x88);

    // s0 is scratch for the program buffer and restored afterwards.
    assert_eq!(hart.read_register(8).unwrap().as_u32(), 0x1234_5678);
}

#[test]
fn program_buffer_with_implicit_ebreak() {
    let sim = SimulatedTarget::new(vec![SimulatedHart::rv32(RV32IMAC).gpr_only()])
        .with_progbuf(1, true);
    let (interface, harts) = attach(&sim);

    assert_eq!(interface.hart(harts[0]).unwrap().isa_name(), "rv32imac");
}

#[test]
fn program_buffer_too_small() {
    let sim = SimulatedTarget::new(vec![SimulatedHart::rv32(RV32IMAC).gpr_only()])
        .with_progbuf(1, false);

    let mut interface = RiscvDebugInterface::new(DebugConfig::default());
    let result = interface.attach(Box::new(sim.clone()));

    // misa is unreadable, so the only hart is dropped.
    assert!(matches!(result, Err(RiscvError::NoHartsFound)));
}

#[test]
fn busy_debug_module_times_out() {
    let sim = SimulatedTarget::new(vec![SimulatedHart::rv32(RV32IMAC)]);
    let mut interface = RiscvDebugInterface::new(DebugConfig::default())
        .with_clock(Rc::new(SteppingClock::new(Duration::from_millis(10))));
    let harts = interface.attach(Box::new(sim.clone())).unwrap();

    let mut hart = interface.hart_interface(harts[0]).unwrap();
    hart.halt().unwrap();

    sim.state().stuck_busy = true;
    let result = hart.read_register(5);

    assert!(matches!(result, Err(RiscvError::Timeout)));
    assert_eq!(hart.hart().status(), HartStatus::Busy);
}

#[test]
fn abort_stops_waiting_on_a_busy_debug_module() {
    let sim = SimulatedTarget::new(vec![SimulatedHart::rv32(RV32IMAC)]);
    let (mut interface, harts) = attach(&sim);
    let abort = interface.abort_signal();

    let mut hart = interface.hart_interface(harts[0]).unwrap();
    hart.halt().unwrap();

    sim.state().stuck_busy = true;
    abort.raise();

    assert!(matches!(hart.read_register(5), Err(RiscvError::Aborted)));
}

#[test]
fn halt_request_times_out() {
    let sim = SimulatedTarget::new(vec![SimulatedHart::rv32(RV32IMAC)]);
    let mut interface = RiscvDebugInterface::new(DebugConfig::default())
        .with_clock(Rc::new(SteppingClock::new(Duration::from_millis(10))));
    let harts = interface.attach(Box::new(sim.clone())).unwrap();

    sim.state().harts[0].ignores_halt = true;

    let mut hart = interface.hart_interface(harts[0]).unwrap();
    assert!(matches!(hart.halt(), Err(RiscvError::HaltTimeout("halt"))));
    assert!(!hart.hart().is_halted());
}

#[test]
fn slow_commands_complete() {
    let sim = SimulatedTarget::new(vec![SimulatedHart::rv32(RV32IMAC)]).with_busy_polls(3);
    let (mut interface, harts) = attach(&sim);

    let mut hart = interface.hart_interface(harts[0]).unwrap();
    hart.halt().unwrap();
    hart.write_register(5, 0xdead_beefu32).unwrap();

    assert_eq!(hart.read_register(5).unwrap().as_u32(), 0xdead_beef);
    assert_eq!(hart.hart().status(), HartStatus::NoError);
}

#[test_case(2; "not supported")]
#[test_case(3; "exception")]
#[test_case(5; "bus error")]
fn stale_cmderr_is_cleared_before_the_first_command(cmderr: u32) {
    let sim = SimulatedTarget::new(vec![SimulatedHart::rv32(RV32IMAC).with_csr(csr::MHARTID, 4)]);
    sim.state().cmderr = cmderr;

    let (interface, harts) = attach(&sim);
    let hart = interface.hart(harts[0]).unwrap();

    assert!(!hart.flags().data_gpr_only);
    assert_eq!(hart.isa_name(), "rv32imac");
    assert_eq!(hart.hartid(), 4);
    assert_eq!(sim.state().cmderr, 0);
    assert_eq!(sim.state().ignored_commands, 0);
}
