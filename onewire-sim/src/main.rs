use clap::Parser;
use fixed::types::I12F4;
use onewire_master::{
    ONEWIRE_CONVERT_TEMP_CMD, ONEWIRE_MATCH_ROM_CMD, ONEWIRE_READ_SCRATCHPAD_CMD, OneWireConfig,
    OneWireCrc, OneWireDriver, RomCode,
};
use onewire_sim::{SynthBus, SynthDelay, SynthSlave};
use rand::Rng;

/// Exercise the 1-Wire master against a synthetic bus: enumerate a random
/// device population, run a powered temperature conversion and read every
/// scratchpad back.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Number of simulated devices on the bus
    #[arg(short, long, default_value_t = 3)]
    devices: usize,
    /// Strong pull-up hold time after the convert command, in microseconds
    #[arg(long, default_value_t = 750_000)]
    pullup_us: u32,
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    let mut rng = rand::rng();

    let mut bus = SynthBus::new(0, 1).with_strong_pullup();
    for _ in 0..args.devices {
        let serial: [u8; 6] = rng.random();
        let temp = I12F4::from_bits(rng.random_range(-320i16..1360)); // -20..85 degC
        bus = bus.with_slave(SynthSlave::with_serial(0x28, serial).with_temperature(temp));
    }

    let mut onewire = OneWireDriver::new(bus, SynthDelay::default());
    onewire.start(OneWireConfig {
        master_channel: 0,
        sample_channel: 1,
        strong_pullup: true,
    });

    let mut roms = [[0u8; 8]; 255];
    let found = onewire
        .search_rom(&mut roms)
        .expect("synthetic bus cannot fail");
    log::info!("found {found} of {} devices", args.devices);

    for rom in &roms[..found] {
        address(&mut onewire, rom);
        onewire
            .write(&[ONEWIRE_CONVERT_TEMP_CMD], args.pullup_us)
            .expect("synthetic bus cannot fail");

        address(&mut onewire, rom);
        onewire
            .write(&[ONEWIRE_READ_SCRATCHPAD_CMD], 0)
            .expect("synthetic bus cannot fail");
        let mut scratchpad = [0u8; 9];
        onewire
            .read(&mut scratchpad)
            .expect("synthetic bus cannot fail");

        if !OneWireCrc::validate(&scratchpad) {
            log::warn!("rom {rom:02x?}: scratchpad checksum mismatch");
            continue;
        }
        let temp = I12F4::from_le_bytes([scratchpad[0], scratchpad[1]]);
        log::info!("rom {rom:02x?}: {temp} degC");
    }
}

/// Reset the bus and silence everything but the device with this ROM code.
fn address(onewire: &mut OneWireDriver<SynthBus, SynthDelay>, rom: &RomCode) {
    let present = onewire.reset().expect("synthetic bus cannot fail");
    assert!(present, "simulated devices vanished from the bus");
    let mut frame = [0u8; 9];
    frame[0] = ONEWIRE_MATCH_ROM_CMD;
    frame[1..].copy_from_slice(rom);
    onewire.write(&frame, 0).expect("synthetic bus cannot fail");
}
