use pretty_assertions::assert_eq;
use riscv_debug::dmi::mock::{SimulatedHart, SimulatedTarget};
use riscv_debug::{
    DebugConfig, HartId, HartStatus, MemoryAccessConfig, MemoryAccessMethod,
    RiscvDebugInterface, RiscvError, SystemBusError,
};
use test_case::test_case;

const RV32IMAC: u32 = 0x4014_1105;
const RV64IMAFDC: u64 = 0x8000_0000_0014_112d;

const SYSBUS_8_TO_32: u8 = 0b0_0111;
const SYSBUS_8_TO_64: u8 = 0b0_1111;

fn attach_with(sim: &SimulatedTarget, memory_access: MemoryAccessConfig) -> (RiscvDebugInterface, HartId) {
    let config = DebugConfig {
        memory_access,
        ..DebugConfig::default()
    };
    let mut interface = RiscvDebugInterface::new(config);
    let harts = interface
        .attach(Box::new(sim.clone()))
        .expect("Failed to attach to the simulated target.");
    (interface, harts[0])
}

#[test]
fn abstract_memory_without_a_system_bus() {
    let sim = SimulatedTarget::new(vec![SimulatedHart::rv32(RV32IMAC)]);
    let (mut interface, hart) = attach_with(&sim, MemoryAccessConfig::Auto);

    assert_eq!(
        interface.hart(hart).unwrap().flags().memory,
        MemoryAccessMethod::AbstractMemory
    );
    // Only sbcs was looked at, no memory was touched to decide.
    assert_eq!(sim.state().sysbus_register_accesses, 1);
    assert_eq!(sim.state().memory_commands, 0);

    let mut hart = interface.hart_interface(hart).unwrap();
    hart.write_memory(0x2000_0000, &[1, 2, 3, 4, 5, 6, 7, 8])
        .unwrap();
    let mut buffer = [0u8; 8];
    hart.read_memory(0x2000_0000, &mut buffer).unwrap();

    assert_eq!(buffer, [1, 2, 3, 4, 5, 6, 7, 8]);
    assert_eq!(sim.state().sysbus_register_accesses, 1);
}

#[test_case(true; "abstract memory present")]
#[test_case(false; "abstract memory absent")]
fn auto_picks_the_system_bus_from_sbcs(abstract_memory: bool) {
    let sim = SimulatedTarget::new(vec![SimulatedHart::rv32(RV32IMAC)])
        .with_system_bus(SYSBUS_8_TO_32);
    sim.state().abstract_memory = abstract_memory;
    let (mut interface, hart) = attach_with(&sim, MemoryAccessConfig::Auto);

    assert_eq!(
        interface.hart(hart).unwrap().flags().memory,
        MemoryAccessMethod::SystemBus
    );
    assert_eq!(sim.state().memory_commands, 0);
    assert!(sim.state().memory_accesses.is_empty());

    sim.write_memory(0x8000_0000, &[0xde, 0xad, 0xbe, 0xef]);

    let mut hart = interface.hart_interface(hart).unwrap();
    let mut buffer = [0u8; 4];
    hart.read_memory(0x8000_0000, &mut buffer).unwrap();

    assert_eq!(buffer, [0xde, 0xad, 0xbe, 0xef]);
    assert_eq!(sim.state().memory_commands, 0);
}

#[test]
fn forced_system_bus_issues_no_abstract_memory_commands() {
    let sim = SimulatedTarget::new(vec![SimulatedHart::rv32(RV32IMAC)])
        .with_system_bus(SYSBUS_8_TO_32);
    let (mut interface, hart) = attach_with(&sim, MemoryAccessConfig::SystemBus);

    let mut hart = interface.hart_interface(hart).unwrap();
    hart.write_memory(0x100, &[9; 16]).unwrap();
    let mut buffer = [0u8; 16];
    hart.read_memory(0x100, &mut buffer).unwrap();

    assert_eq!(buffer, [9; 16]);
    assert_eq!(sim.state().memory_commands, 0);
}

#[test]
fn forced_abstract_memory_never_reads_sbcs() {
    let sim = SimulatedTarget::new(vec![SimulatedHart::rv32(RV32IMAC)])
        .with_system_bus(SYSBUS_8_TO_32);
    let (interface, hart) = attach_with(&sim, MemoryAccessConfig::Abstract);

    assert_eq!(
        interface.hart(hart).unwrap().flags().memory,
        MemoryAccessMethod::AbstractMemory
    );
    assert_eq!(sim.state().memory_commands, 0);
    assert_eq!(sim.state().sysbus_register_accesses, 0);
}

#[test_case(MemoryAccessConfig::Abstract; "abstract memory")]
#[test_case(MemoryAccessConfig::SystemBus; "system bus")]
fn misaligned_transfer_is_split_by_alignment(memory_access: MemoryAccessConfig) {
    let sim = SimulatedTarget::new(vec![SimulatedHart::rv32(RV32IMAC)])
        .with_system_bus(SYSBUS_8_TO_32);
    let (mut interface, hart) = attach_with(&sim, memory_access);

    sim.write_memory(0x2000_0000, &[0, 1, 2, 3, 4, 5, 6, 7, 8]);
    sim.state().memory_accesses.clear();

    let mut hart = interface.hart_interface(hart).unwrap();
    let mut buffer = [0u8; 7];
    hart.read_memory(0x2000_0001, &mut buffer).unwrap();

    assert_eq!(buffer, [1, 2, 3, 4, 5, 6, 7]);
    assert_eq!(
        sim.state().memory_accesses,
        vec![(0x2000_0001, 1), (0x2000_0002, 2), (0x2000_0004, 4)]
    );
}

#[test_case(MemoryAccessConfig::Abstract; "abstract memory")]
#[test_case(MemoryAccessConfig::SystemBus; "system bus")]
fn rv64_uses_double_word_accesses(memory_access: MemoryAccessConfig) {
    let sim = SimulatedTarget::new(vec![SimulatedHart::rv64(RV64IMAFDC)])
        .with_system_bus(SYSBUS_8_TO_64);
    let (mut interface, hart) = attach_with(&sim, memory_access);
    sim.state().memory_accesses.clear();

    let data: Vec<u8> = (0..24).collect();
    let mut hart = interface.hart_interface(hart).unwrap();
    hart.write_memory(0x8000_0000_1000, &data).unwrap();

    let mut buffer = [0u8; 24];
    hart.read_memory(0x8000_0000_1000, &mut buffer).unwrap();

    assert_eq!(buffer.to_vec(), data);
    assert_eq!(sim.read_memory(0x8000_0000_1000, 24), data);
    assert!(sim
        .state()
        .memory_accesses
        .iter()
        .all(|&(_, size)| size == 8));
}

#[test]
fn system_bus_reads_exactly_the_requested_words() {
    let sim = SimulatedTarget::new(vec![SimulatedHart::rv32(RV32IMAC)])
        .with_system_bus(SYSBUS_8_TO_32);
    let (mut interface, hart) = attach_with(&sim, MemoryAccessConfig::SystemBus);
    sim.state().memory_accesses.clear();

    let mut hart = interface.hart_interface(hart).unwrap();
    let mut buffer = [0u8; 32];
    hart.read_memory(0x1000, &mut buffer).unwrap();

    let accesses = sim.state().memory_accesses.clone();
    assert_eq!(accesses.len(), 8);
    assert_eq!(accesses.last(), Some(&(0x101c, 4)));
}

#[test]
fn system_bus_error_is_reported_and_cleared() {
    let sim = SimulatedTarget::new(vec![SimulatedHart::rv32(RV32IMAC)])
        .with_system_bus(SYSBUS_8_TO_32);
    sim.state().sysbus_error_above = Some(0x4000_0000);
    let (mut interface, hart) = attach_with(&sim, MemoryAccessConfig::SystemBus);

    let mut hart = interface.hart_interface(hart).unwrap();
    let mut buffer = [0u8; 4];

    assert!(matches!(
        hart.read_memory(0x4000_0000, &mut buffer),
        Err(RiscvError::SystemBus(SystemBusError::BadAddress))
    ));
    assert_eq!(hart.hart().status(), HartStatus::BusError);

    sim.write_memory(0x3000_0000, &[1, 2, 3, 4]);
    hart.read_memory(0x3000_0000, &mut buffer).unwrap();
    assert_eq!(buffer, [1, 2, 3, 4]);
    assert_eq!(hart.hart().status(), HartStatus::NoError);
}

#[test]
fn abstract_memory_error_leaves_the_hart_usable() {
    let sim = SimulatedTarget::new(vec![SimulatedHart::rv32(RV32IMAC)]);
    let (mut interface, hart) = attach_with(&sim, MemoryAccessConfig::Abstract);

    let mut hart = interface.hart_interface(hart).unwrap();
    sim.state().injected_errors.push_back(5);

    let mut buffer = [0u8; 4];
    assert!(matches!(
        hart.read_memory(0x2000_0000, &mut buffer),
        Err(RiscvError::AbstractCommand(HartStatus::BusError))
    ));

    sim.write_memory(0x2000_0000, &[4, 3, 2, 1]);
    hart.read_memory(0x2000_0000, &mut buffer).unwrap();
    assert_eq!(buffer, [4, 3, 2, 1]);
    assert_eq!(sim.state().ignored_commands, 0);
}

#[test_case(MemoryAccessConfig::Abstract; "abstract memory")]
#[test_case(MemoryAccessConfig::SystemBus; "system bus")]
fn transfer_past_the_top_of_memory_is_rejected(memory_access: MemoryAccessConfig) {
    let sim = SimulatedTarget::new(vec![SimulatedHart::rv32(RV32IMAC)])
        .with_system_bus(SYSBUS_8_TO_32);
    let (mut interface, hart) = attach_with(&sim, memory_access);

    let mut hart = interface.hart_interface(hart).unwrap();
    let mut buffer = [0u8; 4];

    assert!(matches!(
        hart.read_memory(u64::MAX - 1, &mut buffer),
        Err(RiscvError::AddressOverflow { length: 4, .. })
    ));
    assert!(matches!(
        hart.write_memory(u64::MAX, &[1, 2]),
        Err(RiscvError::AddressOverflow { length: 2, .. })
    ));
    assert_eq!(sim.state().memory_commands, 0);
    assert!(sim.state().memory_accesses.is_empty());
}

#[test]
fn unsupported_narrow_access_is_an_error() {
    let sim = SimulatedTarget::new(vec![SimulatedHart::rv32(RV32IMAC)]).with_system_bus(0b0_0100);
    let (mut interface, hart) = attach_with(&sim, MemoryAccessConfig::SystemBus);

    let mut hart = interface.hart_interface(hart).unwrap();
    let mut buffer = [0u8; 2];

    assert!(matches!(
        hart.read_memory(0x1002, &mut buffer),
        Err(RiscvError::NoAccessWidth {
            address: 0x1002,
            length: 2,
            supported: 0b0_0100
        })
    ));
    assert!(sim.state().memory_accesses.is_empty());

    let mut buffer = [0u8; 4];
    hart.read_memory(0x1000, &mut buffer).unwrap();
    assert_eq!(sim.state().memory_accesses, vec![(0x1000, 4)]);
}

#[test]
fn address_argument_beyond_the_data_registers_is_not_supported() {
    let sim = SimulatedTarget::new(vec![SimulatedHart::rv64(RV64IMAFDC)]).with_data_count(2);
    let (mut interface, hart) = attach_with(&sim, MemoryAccessConfig::Abstract);

    let mut hart = interface.hart_interface(hart).unwrap();
    hart.halt().unwrap();

    // A double word register value fits data0 and data1.
    hart.write_register(5, 0x1234_5678_9abc_def0u64).unwrap();
    assert_eq!(hart.read_register(5).unwrap().as_u64(), 0x1234_5678_9abc_def0);

    // The address argument would need data2 and data3.
    let mut buffer = [0u8; 8];
    assert!(matches!(
        hart.read_memory(0x8000_0000, &mut buffer),
        Err(RiscvError::AbstractCommand(HartStatus::NotSupported))
    ));
    assert_eq!(hart.hart().status(), HartStatus::NotSupported);
    assert_eq!(sim.state().memory_commands, 0);
    assert_eq!(sim.state().cmderr, 0);
}
