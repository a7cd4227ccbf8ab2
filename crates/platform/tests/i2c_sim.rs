//! I2C controller against the simulated BSC.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;

use platform::gpio::GpioController;
use platform::i2c::bsc;
use platform::i2c::{Bus, I2cConfig, I2cController};
use platform::sim::{SimDevice, SimGpio, SimI2c};
use platform::HalError;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn controller(sim: &SimI2c, config: I2cConfig) -> I2cController<SimI2c, SimGpio> {
    init_tracing();
    let gpio = GpioController::shared(SimGpio::new());
    gpio.init().unwrap();
    I2cController::with_config(sim.clone(), Arc::clone(&gpio), config)
}

#[test]
fn scan_visits_nacking_address_and_reports_only_ackers() {
    let sim = SimI2c::new();
    sim.bsc(Bus::Bus1).attach(0x31, SimDevice::with_registers(&[]));
    let i2c = controller(&sim, I2cConfig::default());
    i2c.init(Bus::Bus1, 100_000).unwrap();
    sim.bsc(Bus::Bus1).clear_log();

    let found = i2c.scan(Bus::Bus1).unwrap();
    assert_eq!(found.addresses(), &[0x31]);
    assert!(!found.contains(0x30));

    let probed = sim.bsc(Bus::Bus1).probed();
    assert!(probed.contains(&0x30));
    assert!(probed.contains(&0x31));
    assert_eq!(probed.first(), Some(&0x03));
    assert_eq!(probed.last(), Some(&0x77));
    assert_eq!(probed.len(), 0x77 - 0x03 + 1);
}

#[test]
fn scan_treats_clock_stretch_as_absent_and_continues() {
    let sim = SimI2c::new();
    sim.bsc(Bus::Bus2).attach(0x10, SimDevice::Wedged);
    sim.bsc(Bus::Bus2).attach(0x40, SimDevice::with_registers(&[]));
    let i2c = controller(&sim, I2cConfig::default());
    i2c.init(Bus::Bus2, 400_000).unwrap();

    let found = i2c.scan(Bus::Bus2).unwrap();
    assert_eq!(found.addresses(), &[0x40]);
}

#[test]
fn oversized_combined_write_touches_no_register() {
    let sim = SimI2c::new();
    sim.bsc(Bus::Bus1).attach(0x45, SimDevice::with_registers(&[]));
    let i2c = controller(&sim, I2cConfig::default());
    i2c.init(Bus::Bus1, 100_000).unwrap();
    sim.bsc(Bus::Bus1).clear_log();

    let wbytes = [0u8; 17];
    assert_eq!(
        i2c.write_then_read(Bus::Bus1, 0x45, &wbytes, 2),
        Err(HalError::InvalidArgs)
    );
    assert!(sim.bsc(Bus::Bus1).register_writes().is_empty());
}

#[test]
fn full_fifo_combined_write_is_accepted() {
    let sim = SimI2c::new();
    sim.bsc(Bus::Bus1).attach(0x50, SimDevice::with_registers(&[(0x0F, 0x99)]));
    let i2c = controller(&sim, I2cConfig::default());
    i2c.init(Bus::Bus1, 100_000).unwrap();

    // Pointer byte plus 15 data bytes: exactly one FIFO.
    let mut wbytes = vec![0x00];
    wbytes.extend(1..=15u8);
    let got = i2c.write_then_read(Bus::Bus1, 0x50, &wbytes, 1).unwrap();
    assert_eq!(got, vec![0x99]);
    assert_eq!(sim.bsc(Bus::Bus1).device_register(0x50, 14), Some(15));
}

#[test]
fn double_init_keeps_first_mapping() {
    let sim = SimI2c::new();
    sim.bsc(Bus::Bus1).attach(0x47, SimDevice::with_registers(&[(0x00, 0x11)]));
    let i2c = controller(&sim, I2cConfig::default());
    i2c.init(Bus::Bus1, 100_000).unwrap();

    assert_eq!(i2c.init(Bus::Bus1, 400_000), Err(HalError::AlreadyInitialized));
    assert_eq!(sim.map_count(), 1);
    assert_eq!(i2c.divisor(Bus::Bus1), Some(15_000));
    assert_eq!(i2c.write_then_read(Bus::Bus1, 0x47, &[0x00], 1).unwrap(), vec![0x11]);
}

#[test]
fn buses_are_independent() {
    let sim = SimI2c::new();
    sim.bsc(Bus::Bus1).attach(0x47, SimDevice::with_registers(&[]));
    sim.bsc(Bus::Bus2).attach(0x45, SimDevice::with_registers(&[]));
    let i2c = controller(&sim, I2cConfig::default());
    i2c.init(Bus::Bus1, 100_000).unwrap();
    i2c.init(Bus::Bus2, 100_000).unwrap();

    assert_eq!(i2c.write(Bus::Bus1, 0x45, &[0]), Err(HalError::Failed));
    assert!(i2c.write(Bus::Bus2, 0x45, &[0]).is_ok());

    i2c.deinit(Bus::Bus1);
    assert!(!i2c.is_initialized(Bus::Bus1));
    assert!(i2c.is_initialized(Bus::Bus2));
    assert_eq!(i2c.read(Bus::Bus1, 0x47, 1), Err(HalError::NotInitialized));
}

#[test]
fn nack_clears_sticky_flags_before_returning() {
    let sim = SimI2c::new();
    let i2c = controller(&sim, I2cConfig::default());
    i2c.init(Bus::Bus1, 100_000).unwrap();
    sim.bsc(Bus::Bus1).clear_log();

    assert_eq!(i2c.write(Bus::Bus1, 0x30, &[1, 2]), Err(HalError::Failed));
    let writes = sim.bsc(Bus::Bus1).register_writes();
    assert_eq!(writes.last(), Some(&(bsc::S, bsc::S_STICKY)));
    assert_eq!(sim.bsc(Bus::Bus1).register(bsc::S) & bsc::S_STICKY, 0);
}

#[test]
fn program_sequence_clears_then_addresses() {
    let sim = SimI2c::new();
    sim.bsc(Bus::Bus1).attach(0x47, SimDevice::with_registers(&[]));
    let i2c = controller(&sim, I2cConfig::default());
    i2c.init(Bus::Bus1, 100_000).unwrap();
    sim.bsc(Bus::Bus1).clear_log();

    i2c.write_byte(Bus::Bus1, 0x47, 0xFE).unwrap();
    let writes = sim.bsc(Bus::Bus1).register_writes();
    assert_eq!(
        &writes[..4],
        &[
            (bsc::S, bsc::S_STICKY),
            (bsc::C, bsc::C_I2CEN | bsc::C_CLEAR),
            (bsc::A, 0x47),
            (bsc::DLEN, 1),
        ]
    );
    assert!(writes.contains(&(bsc::FIFO, 0xFE)));
    assert!(writes.contains(&(bsc::C, bsc::C_I2CEN | bsc::C_ST)));
}

#[test]
fn stuck_bus_is_abandoned_with_poll_limit() {
    let sim = SimI2c::new();
    let i2c = controller(&sim, I2cConfig::default().with_poll_limit(1_000));
    i2c.init(Bus::Bus1, 100_000).unwrap();
    sim.bsc(Bus::Bus1).attach(0x20, SimDevice::Stuck);

    assert_eq!(i2c.read(Bus::Bus1, 0x20, 4), Err(HalError::Failed));
    assert_eq!(
        i2c.write_then_read(Bus::Bus1, 0x20, &[0x01], 2),
        Err(HalError::Failed)
    );
}

#[test]
fn init_scan_skips_stuck_address_under_poll_limit() {
    let sim = SimI2c::new();
    sim.bsc(Bus::Bus1).attach(0x03, SimDevice::Stuck);
    sim.bsc(Bus::Bus1).attach(0x50, SimDevice::with_registers(&[]));
    let i2c = controller(&sim, I2cConfig::default().with_poll_limit(100));

    i2c.init(Bus::Bus1, 100_000).unwrap();
    assert!(i2c.is_initialized(Bus::Bus1));
    let probed = sim.bsc(Bus::Bus1).probed();
    assert!(probed.contains(&0x03));
    assert!(probed.contains(&0x50));

    let found = i2c.scan(Bus::Bus1).unwrap();
    assert!(!found.contains(0x03));
    assert!(found.contains(0x50));
    assert_eq!(found.len(), 1);
}

#[test]
fn concurrent_transfers_on_one_bus_are_serialized() {
    let sim = SimI2c::new();
    sim.bsc(Bus::Bus1).attach(0x50, SimDevice::with_registers(&[]));
    let i2c = Arc::new(controller(&sim, I2cConfig::default()));
    i2c.init(Bus::Bus1, 100_000).unwrap();

    let handles: Vec<_> = (0..4u8)
        .map(|t| {
            let i2c = Arc::clone(&i2c);
            std::thread::spawn(move || {
                let reg = t * 16;
                for v in 0..50u8 {
                    i2c.write(Bus::Bus1, 0x50, &[reg, v]).unwrap();
                    let got = i2c.write_then_read(Bus::Bus1, 0x50, &[reg], 1).unwrap();
                    assert_eq!(got, vec![v]);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
}

proptest::proptest! {
    /// Whatever is written through the FIFO comes back through a combined read.
    #[test]
    fn write_then_read_returns_written_bytes(
        reg in 0u8..=0xE0,
        data in proptest::collection::vec(proptest::num::u8::ANY, 1..=15),
    ) {
        let sim = SimI2c::new();
        sim.bsc(Bus::Bus1).attach(0x50, SimDevice::with_registers(&[]));
        let i2c = controller(&sim, I2cConfig::default());
        i2c.init(Bus::Bus1, 100_000).unwrap();

        let mut wbytes = vec![reg];
        wbytes.extend_from_slice(&data);
        i2c.write(Bus::Bus1, 0x50, &wbytes).unwrap();
        let back = i2c.write_then_read(Bus::Bus1, 0x50, &[reg], data.len()).unwrap();
        proptest::prop_assert_eq!(back, data);
    }

    /// Divisor is always within the hardware field.
    #[test]
    fn divisor_in_range(hz in 1u32..=u32::MAX) {
        let d = bsc::divisor(platform::config::CORE_CLOCK_HZ, hz);
        proptest::prop_assert!(d >= 2);
    }
}
