//! GPIO multiplexing tests against the mock transport.
//!
//! These tests verify masking and the per-device write paths without
//! requiring hardware.

use ftdi_servod::mock::MockTransport;
use ftdi_servod::{
    BitMode, ChipType, Error, GpioChannel, GpioState, I2cChannel, Interface, UartBridge,
};

fn wide_channel() -> (GpioChannel<MockTransport>, MockTransport) {
    let mock = MockTransport::new(ChipType::Ft4232H, Interface::A);
    let mut channel = GpioChannel::new(mock.clone());
    channel.open(16).unwrap();
    mock.clear_log();
    (channel, mock)
}

#[test]
fn test_open_enters_bitbang_with_inputs() {
    let mock = MockTransport::new(ChipType::Ft4232H, Interface::A);
    let mut channel = GpioChannel::new(mock.clone());
    channel.open(16).unwrap();

    let state = mock.state();
    assert_eq!(state.latency, 16);
    assert_eq!(
        state.bitmodes,
        vec![(0, BitMode::Reset), (0, BitMode::BitBang)]
    );
    assert_eq!(state.purges, 1);
    assert_eq!(channel.mask(), 0xFF);
}

#[test]
fn test_write_sets_direction_then_value() {
    let (mut channel, mock) = wide_channel();
    mock.state().pins = 0xAA;

    let pins = channel
        .write_read(Some(&GpioState::new(0xFF, 0xAA, 0xFF)), true)
        .unwrap();
    assert_eq!(pins, Some(0xAA));

    let state = mock.state();
    assert_eq!(state.bitmodes, vec![(0xFF, BitMode::BitBang)]);
    // bit-bang ports take the bare value byte
    assert_eq!(state.writes, vec![vec![0xAA]]);
}

#[test]
fn test_unmasked_bits_are_preserved() {
    let (mut channel, _mock) = wide_channel();
    channel
        .write_read(Some(&GpioState::new(0xFF, 0xF0, 0xFF)), false)
        .unwrap();
    channel
        .write_read(Some(&GpioState::new(0x00, 0x0F, 0x0F)), false)
        .unwrap();

    let state = channel.state();
    assert_eq!(state.direction, 0xF0);
    assert_eq!(state.value, 0xFF);
}

#[test]
fn test_unchanged_state_writes_nothing() {
    let (mut channel, mock) = wide_channel();
    let request = GpioState::new(0x0F, 0x05, 0x0F);
    channel.write_read(Some(&request), false).unwrap();
    mock.clear_log();

    channel.write_read(Some(&request), false).unwrap();
    let state = mock.state();
    assert!(state.writes.is_empty());
    assert!(state.bitmodes.is_empty());
}

#[test]
fn test_illegal_mask_has_no_side_effect() {
    let mock = MockTransport::new(ChipType::Ft4232H, Interface::B);
    let mut channel = I2cChannel::new(mock.clone());
    channel.open(16, 100_000).unwrap();
    mock.clear_log();
    let before = channel.port().state();

    let err = channel
        .gpio_write_read(Some(&GpioState::new(0xFF, 0xFF, 0xFF)), true)
        .unwrap_err();
    match err {
        Error::GpioMask { requested, allowed } => {
            assert_eq!(requested, 0xFF);
            assert_eq!(allowed, 0xF8);
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(channel.port().state(), before);
    assert!(mock.written().is_empty());
    assert!(mock.state().bitmodes.is_empty());
}

#[test]
fn test_i2c_port_gpio_uses_set_bits_low() {
    let mock = MockTransport::new(ChipType::Ft4232H, Interface::B);
    let mut channel = I2cChannel::new(mock.clone());
    channel.open(16, 100_000).unwrap();
    mock.clear_log();

    channel
        .gpio_write_read(Some(&GpioState::new(0x08, 0x08, 0x08)), false)
        .unwrap();
    let state = mock.state();
    assert_eq!(state.writes, vec![vec![0x80, 0x08, 0x08]]);
    // MPSSE ports never leave MPSSE mode for a GPIO update
    assert!(state.bitmodes.is_empty());
}

#[test]
fn test_narrow_device_uses_cbus() {
    let mock = MockTransport::new(ChipType::Ft232R, Interface::A);
    let mut channel = GpioChannel::new(mock.clone());
    channel.open(16).unwrap();
    assert_eq!(channel.mask(), 0x0F);
    assert!(mock.state().bitmodes.is_empty());
    mock.state().pins = 0xF5;

    let pins = channel
        .write_read(Some(&GpioState::new(0x0A, 0x03, 0x0F)), true)
        .unwrap();
    assert_eq!(pins, Some(0x05));
    let state = mock.state();
    assert_eq!(state.bitmodes, vec![(0xA3, BitMode::Cbus)]);
    assert!(state.writes.is_empty());
}

#[test]
fn test_narrow_device_rejects_high_bits() {
    let mock = MockTransport::new(ChipType::Ft232R, Interface::A);
    let mut channel = GpioChannel::new(mock);
    let err = channel
        .write_read(Some(&GpioState::new(0x10, 0x10, 0x10)), false)
        .unwrap_err();
    assert!(matches!(err, Error::GpioMask { allowed: 0x0F, .. }));
}

#[test]
fn test_uart_port_gpio_write_unsupported_on_wide_device() {
    let mock = MockTransport::new(ChipType::Ft4232H, Interface::C);
    let bridge = UartBridge::new(mock.clone());
    let err = bridge
        .gpio_write_read(Some(&GpioState::new(0x04, 0x04, 0x04)), true)
        .unwrap_err();
    assert!(matches!(err, Error::UnsupportedFeature(_)));
    assert!(mock.written().is_empty());

    // reading alone still works
    mock.state().pins = 0x03;
    assert_eq!(bridge.gpio_write_read(None, true).unwrap(), Some(0x03));
}

#[test]
fn test_short_write_is_an_error() {
    let (mut channel, mock) = wide_channel();
    mock.state().accept_limit = Some(0);
    let err = channel
        .write_read(Some(&GpioState::new(0x01, 0x01, 0x01)), false)
        .unwrap_err();
    assert!(matches!(err, Error::ShortWrite { expected: 1, actual: 0 }));
}

#[test]
fn test_close_resets_bitmode() {
    let (mut channel, mock) = wide_channel();
    channel.close().unwrap();
    let state = mock.state();
    assert_eq!(state.bitmodes, vec![(0, BitMode::Reset)]);
    assert!(state.closed);
}
