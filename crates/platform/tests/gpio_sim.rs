//! GPIO controller against the simulated register file.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;

use embedded_hal::digital::{InputPin, OutputPin, StatefulOutputPin};
use platform::gpio::{Edge, GpioController, GpioMode, GpioPin, Level};
use platform::sim::SimGpio;
use platform::HalError;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn gpio() -> (SimGpio, Arc<GpioController<SimGpio>>) {
    init_tracing();
    let sim = SimGpio::new();
    let gpio = GpioController::shared(sim.clone());
    gpio.init().unwrap();
    (sim, gpio)
}

#[test]
fn write_read_round_trip_every_pin() {
    let (_, gpio) = gpio();
    for pin in 0..=53u8 {
        gpio.set_mode(pin, GpioMode::Output).unwrap();
        for level in [Level::High, Level::Low, Level::High] {
            gpio.write(pin, level).unwrap();
            assert_eq!(gpio.read(pin).unwrap(), level, "pin {pin}");
        }
    }
}

#[test]
fn double_init_keeps_first_mapping() {
    let (sim, gpio) = gpio();
    gpio.set_mode(17, GpioMode::Output).unwrap();
    gpio.write(17, Level::High).unwrap();

    assert_eq!(gpio.init(), Err(HalError::AlreadyInitialized));
    assert_eq!(sim.map_count(), 1);
    assert_eq!(gpio.read(17).unwrap(), Level::High);
    assert_eq!(gpio.mode(17).unwrap(), GpioMode::Output);
}

#[test]
fn deinit_then_init_again() {
    let (sim, gpio) = gpio();
    gpio.deinit();
    gpio.deinit();
    assert!(!gpio.is_initialized());
    assert_eq!(gpio.read(0), Err(HalError::NotInitialized));
    gpio.init().unwrap();
    assert_eq!(sim.map_count(), 2);
}

#[test]
fn falling_edge_latches_until_cleared() {
    let (sim, gpio) = gpio();
    gpio.set_mode(14, GpioMode::Input).unwrap();
    sim.drive_input(14, Level::High);
    gpio.set_edge(14, Edge::Falling).unwrap();
    assert!(!gpio.get_edge_event(14).unwrap());

    sim.drive_input(14, Level::Low);
    assert!(gpio.get_edge_event(14).unwrap());
    // Sticky: still set on a second read.
    assert!(gpio.get_edge_event(14).unwrap());
    gpio.clear_edge(14).unwrap();
    assert!(!gpio.get_edge_event(14).unwrap());
}

#[test]
fn edges_in_upper_bank() {
    let (sim, gpio) = gpio();
    gpio.set_edge(40, Edge::Both).unwrap();
    sim.drive_input(40, Level::High);
    assert!(gpio.get_edge_event(40).unwrap());
    gpio.clear_edge(40).unwrap();
    sim.drive_input(40, Level::Low);
    assert!(gpio.get_edge_event(40).unwrap());
    assert!(!gpio.get_edge_event(8).unwrap());
}

#[test]
fn edge_none_disables_detection() {
    let (sim, gpio) = gpio();
    gpio.set_edge(22, Edge::Rising).unwrap();
    gpio.set_edge(22, Edge::None).unwrap();
    sim.drive_input(22, Level::High);
    assert!(!gpio.get_edge_event(22).unwrap());
}

#[test]
fn embedded_hal_pin_handle() {
    let (_, gpio) = gpio();
    let mut led = GpioPin::output(Arc::clone(&gpio), 17).unwrap();
    led.set_high().unwrap();
    assert!(led.is_set_high().unwrap());
    led.toggle().unwrap();
    assert!(led.is_set_low().unwrap());

    let mut input = GpioPin::input(Arc::clone(&gpio), 17).unwrap();
    assert!(input.is_low().unwrap());
    assert_eq!(gpio.mode(17).unwrap(), GpioMode::Input);

    assert!(GpioPin::new(gpio, 54).is_err());
}
