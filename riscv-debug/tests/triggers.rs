use pretty_assertions::assert_eq;
use test_case::test_case;
use riscv_debug::dmi::mock::{SimulatedHart, SimulatedTarget};
use riscv_debug::trigger::TriggerUse;
use riscv_debug::{BreakWatch, DebugConfig, HartId, RiscvDebugInterface, RiscvError, TriggerMode};

const RV32IMAC: u32 = 0x4014_1105;
const RV64IMAFDC: u64 = 0x8000_0000_0014_112d;

fn attach(sim: &SimulatedTarget) -> (RiscvDebugInterface, HartId) {
    let mut interface = RiscvDebugInterface::new(DebugConfig::default());
    let harts = interface
        .attach(Box::new(sim.clone()))
        .expect("Failed to attach to the simulated target.");
    (interface, harts[0])
}

#[test]
fn trigger_slots_are_discovered() {
    let sim = SimulatedTarget::new(vec![SimulatedHart::rv32(RV32IMAC).with_triggers(4, true)]);
    let (interface, hart) = attach(&sim);

    let hart = interface.hart(hart).unwrap();
    assert_eq!(hart.trigger_count(), 4);
    assert_eq!(
        hart.trigger_use(3),
        Some(TriggerUse {
            support: 1 << 2,
            mode: TriggerMode::Unused
        })
    );
    assert_eq!(hart.trigger_use(4), None);
}

#[test]
fn trigger_types_without_tinfo() {
    let sim = SimulatedTarget::new(vec![SimulatedHart::rv64(RV64IMAFDC).with_triggers(2, false)]);
    let (interface, hart) = attach(&sim);

    let hart = interface.hart(hart).unwrap();
    assert_eq!(hart.trigger_count(), 2);
    assert!(hart.trigger_use(1).unwrap().supports_breakwatch());
}

#[test]
fn hart_without_triggers() {
    let sim = SimulatedTarget::new(vec![SimulatedHart::rv32(RV32IMAC)]);
    let (mut interface, hart) = attach(&sim);

    assert_eq!(interface.hart(hart).unwrap().trigger_count(), 0);

    let mut hart = interface.hart_interface(hart).unwrap();
    hart.halt().unwrap();
    assert!(matches!(
        hart.set_breakwatch(BreakWatch::Execute, 0x100, 4),
        Err(RiscvError::NoTriggerAvailable)
    ));
}

#[test]
fn breakpoints_and_watchpoints_fill_free_slots() {
    let sim = SimulatedTarget::new(vec![SimulatedHart::rv32(RV32IMAC).with_triggers(2, true)]);
    let (mut interface, hart_id) = attach(&sim);

    let mut hart = interface.hart_interface(hart_id).unwrap();
    hart.halt().unwrap();

    let breakpoint = hart
        .set_breakwatch(BreakWatch::Execute, 0x0800_0100, 2)
        .unwrap();
    let watchpoint = hart
        .set_breakwatch(BreakWatch::Write, 0x2000_0040, 4)
        .unwrap();

    assert_eq!(breakpoint, 0);
    assert_eq!(watchpoint, 1);

    let triggers = sim.hart(0).triggers;
    // mcontrol, dmode, 16 bit match, enter debug mode, M/S/U, execute
    assert_eq!(triggers[0].tdata1, 0x2802_105c);
    assert_eq!(triggers[0].tdata2, 0x0800_0100);
    // mcontrol, dmode, 32 bit match, enter debug mode, M/S/U, store
    assert_eq!(triggers[1].tdata1, 0x2803_105a);
    assert_eq!(triggers[1].tdata2, 0x2000_0040);

    assert!(matches!(
        hart.set_breakwatch(BreakWatch::Read, 0x2000_0000, 4),
        Err(RiscvError::NoTriggerAvailable)
    ));

    hart.clear_breakwatch(breakpoint).unwrap();
    assert_eq!(sim.hart(0).triggers[0].tdata1, 0);
    assert_eq!(
        hart.hart().trigger_use(0).map(|trigger| trigger.mode),
        Some(TriggerMode::Unused)
    );

    let slot = hart
        .set_breakwatch(BreakWatch::Access, 0x2000_0000, 1)
        .unwrap();
    assert_eq!(slot, 0);
    assert_eq!(
        interface.hart(hart_id).unwrap().trigger_use(0).unwrap().mode,
        TriggerMode::Watchpoint
    );
}

#[test]
fn wide_match_sizes_need_rv64() {
    let sim = SimulatedTarget::new(vec![SimulatedHart::rv32(RV32IMAC).with_triggers(1, true)]);
    let (mut interface, hart) = attach(&sim);

    let mut hart = interface.hart_interface(hart).unwrap();
    hart.halt().unwrap();

    assert!(matches!(
        hart.set_breakwatch(BreakWatch::Read, 0x2000_0000, 8),
        Err(RiscvError::UnsupportedTriggerLength(8))
    ));
    assert!(matches!(
        hart.set_breakwatch(BreakWatch::Read, 0x2000_0000, 5),
        Err(RiscvError::UnsupportedTriggerLength(5))
    ));
}

#[test]
fn rv64_double_word_watchpoint() {
    let sim = SimulatedTarget::new(vec![SimulatedHart::rv64(RV64IMAFDC).with_triggers(1, true)]);
    let (mut interface, hart) = attach(&sim);

    let mut hart = interface.hart_interface(hart).unwrap();
    hart.halt().unwrap();

    hart.set_breakwatch(BreakWatch::Access, 0x8000_0000_0000, 8)
        .unwrap();

    let trigger = sim.hart(0).triggers[0].clone();
    assert_eq!(trigger.tdata1, 0x2800_0000_0021_105b);
    assert_eq!(trigger.tdata2, 0x8000_0000_0000);
}

#[test]
fn clearing_a_missing_slot() {
    let sim = SimulatedTarget::new(vec![SimulatedHart::rv32(RV32IMAC).with_triggers(1, true)]);
    let (mut interface, hart) = attach(&sim);

    let mut hart = interface.hart_interface(hart).unwrap();
    assert!(matches!(
        hart.clear_breakwatch(3),
        Err(RiscvError::InvalidTrigger(3))
    ));
}

#[test_case(1, 5; "bus error on the second slot")]
#[test_case(0, 4; "wrong state on the first slot")]
fn unreadable_trigger_slot_ends_the_list(slot: usize, cmderr: u32) {
    let sim = SimulatedTarget::new(vec![SimulatedHart::rv32(RV32IMAC)
        .with_triggers(3, true)
        .with_trigger_fault(slot, cmderr)]);
    let (mut interface, hart_id) = attach(&sim);

    let hart = interface.hart(hart_id).unwrap();
    assert_eq!(hart.trigger_count(), slot);
    assert_eq!(hart.isa_name(), "rv32imac");

    let mut hart = interface.hart_interface(hart_id).unwrap();
    hart.halt().unwrap();

    let result = hart.set_breakwatch(BreakWatch::Execute, 0x100, 4);
    if slot == 0 {
        assert!(matches!(result, Err(RiscvError::NoTriggerAvailable)));
    } else {
        assert_eq!(result.unwrap(), 0);
    }
}
