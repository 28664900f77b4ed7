//! Byte-level bus I/O against the synthetic bus.

use onewire_master::{
    DriverState, ONEWIRE_CONVERT_TEMP_CMD, ONEWIRE_READ_ROM_CMD, ONEWIRE_READ_SCRATCHPAD_CMD,
    ONEWIRE_SKIP_ROM_CMD, OneWireConfig, OneWireCrc, OneWireDriver,
};
use onewire_sim::{SynthBus, SynthDelay, SynthSlave, WRITE_SCRATCHPAD_CMD};

fn started(bus: SynthBus) -> OneWireDriver<SynthBus, SynthDelay> {
    let mut onewire = OneWireDriver::new(bus, SynthDelay::default());
    onewire.start(OneWireConfig {
        master_channel: 0,
        sample_channel: 1,
        strong_pullup: false,
    });
    onewire
}

#[test]
fn reset_without_slaves_reports_absence() {
    let mut onewire = started(SynthBus::new(0, 1));
    assert!(!onewire.reset().unwrap());
    assert!(!onewire.slave_present());
}

#[test]
fn reset_sees_presence_pulse() {
    let slave = SynthSlave::with_serial(0x28, [1, 2, 3, 4, 5, 6]);
    let mut onewire = started(SynthBus::new(0, 1).with_slave(slave));
    assert!(onewire.reset().unwrap());
    assert!(onewire.slave_present());
}

#[test]
fn loopback_roundtrip_returns_identical_bytes() {
    let mut onewire = started(SynthBus::loopback(0, 1));
    let tx = [0xa5, 0x3c, 0x00, 0xff, 0x81];
    onewire.write(&tx, 0).unwrap();
    let mut rx = [0u8; 5];
    onewire.read(&mut rx).unwrap();
    assert_eq!(rx, tx);
}

#[test]
fn read_rom_returns_the_single_device_code() {
    let slave = SynthSlave::with_serial(0x28, [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
    let rom = slave.rom();
    let mut onewire = started(SynthBus::new(0, 1).with_slave(slave));
    assert!(onewire.reset().unwrap());
    onewire.write(&[ONEWIRE_READ_ROM_CMD], 0).unwrap();
    let mut read = [0u8; 8];
    onewire.read(&mut read).unwrap();
    assert_eq!(read, rom);
    assert!(OneWireCrc::validate(&read));
}

#[test]
fn scratchpad_write_then_readback() {
    let slave = SynthSlave::with_serial(0x28, [1, 2, 3, 4, 5, 6]);
    let mut onewire = started(SynthBus::new(0, 1).with_slave(slave));

    assert!(onewire.reset().unwrap());
    onewire
        .write(
            &[ONEWIRE_SKIP_ROM_CMD, WRITE_SCRATCHPAD_CMD, 0x55, 0x2a, 0x7f],
            0,
        )
        .unwrap();

    assert!(onewire.reset().unwrap());
    onewire
        .write(&[ONEWIRE_SKIP_ROM_CMD, ONEWIRE_READ_SCRATCHPAD_CMD], 0)
        .unwrap();
    let mut scratchpad = [0u8; 9];
    onewire.read(&mut scratchpad).unwrap();

    assert!(OneWireCrc::validate(&scratchpad));
    assert_eq!(&scratchpad[2..5], &[0x55, 0x2a, 0x7f]);
}

#[test]
fn powered_write_cycles_the_pullup_once() {
    let slave = SynthSlave::with_serial(0x28, [9, 8, 7, 6, 5, 4]);
    let bus = SynthBus::new(0, 1).with_slave(slave).with_strong_pullup();
    let mut onewire = OneWireDriver::new(bus, SynthDelay::default());
    onewire.start(OneWireConfig {
        master_channel: 0,
        sample_channel: 1,
        strong_pullup: true,
    });

    assert!(onewire.reset().unwrap());
    onewire.write(&[ONEWIRE_SKIP_ROM_CMD], 0).unwrap();
    onewire.write(&[ONEWIRE_CONVERT_TEMP_CMD], 750_000).unwrap();
    assert_eq!(onewire.state(), DriverState::Ready);

    let (bus, delay) = onewire.release();
    assert_eq!(bus.pullup_asserts(), 1);
    assert_eq!(bus.pullup_releases(), 1);
    assert!(!bus.pullup_active());
    assert_eq!(delay.elapsed_ns(), 750_000_000);
}

#[test]
fn unpowered_writes_leave_the_pullup_alone() {
    let slave = SynthSlave::with_serial(0x28, [9, 8, 7, 6, 5, 4]);
    let bus = SynthBus::new(0, 1).with_slave(slave).with_strong_pullup();
    let mut onewire = OneWireDriver::new(bus, SynthDelay::default());
    onewire.start(OneWireConfig {
        master_channel: 0,
        sample_channel: 1,
        strong_pullup: true,
    });

    assert!(onewire.reset().unwrap());
    onewire.write(&[ONEWIRE_SKIP_ROM_CMD], 0).unwrap();

    let (bus, _) = onewire.release();
    assert_eq!(bus.pullup_asserts(), 0);
    assert_eq!(bus.pullup_releases(), 0);
}
