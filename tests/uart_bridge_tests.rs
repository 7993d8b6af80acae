//! UART bridge tests.
//!
//! Tests touching a real pty are skipped with the `skip-pty-tests` feature
//! for sandboxes without `/dev/pts`.

use ftdi_servod::mock::MockTransport;
use ftdi_servod::transport::{DataBits, Parity, StopBits};
use ftdi_servod::{ChipType, Error, Interface, LineConfig, UartBridge};
use std::time::Duration;

#[test]
fn test_pump_before_open_is_not_open() {
    let mock = MockTransport::new(ChipType::Ft4232H, Interface::C);
    let bridge = UartBridge::new(mock.clone());
    assert!(!bridge.is_open());
    assert!(bridge.pty_path().is_none());
    assert!(matches!(bridge.write_read(), Err(Error::NotOpen)));
    assert!(matches!(
        bridge.run(Duration::from_millis(1)),
        Err(Error::NotOpen)
    ));
    assert!(mock.written().is_empty());
}

#[test]
fn test_line_settings_applied_only_when_changed() {
    let mock = MockTransport::new(ChipType::Ft4232H, Interface::C);
    let bridge = UartBridge::new(mock.clone());
    assert_eq!(bridge.line(), None);

    let line = LineConfig::default();
    bridge.set_line(&line).unwrap();
    {
        let state = mock.state();
        assert_eq!(state.baudrate, Some(115_200));
        assert_eq!(state.baudrate_calls, 1);
        assert_eq!(state.line_calls, 1);
    }

    bridge.set_line(&line).unwrap();
    {
        let state = mock.state();
        assert_eq!(state.baudrate_calls, 1);
        assert_eq!(state.line_calls, 1);
    }

    // only the baud rate differs
    bridge
        .set_line(&LineConfig {
            baudrate: 9600,
            ..line
        })
        .unwrap();
    {
        let state = mock.state();
        assert_eq!(state.baudrate, Some(9600));
        assert_eq!(state.baudrate_calls, 2);
        assert_eq!(state.line_calls, 1);
    }

    // only the framing differs
    let framed = LineConfig {
        baudrate: 9600,
        bits: DataBits::Seven,
        parity: Parity::Even,
        stop_bits: StopBits::Two,
    };
    bridge.set_line(&framed).unwrap();
    let state = mock.state();
    assert_eq!(state.baudrate_calls, 2);
    assert_eq!(state.line_calls, 2);
    assert_eq!(state.line, Some(framed));
    drop(state);
    assert_eq!(bridge.line(), Some(framed));
}

#[test]
fn test_uart_port_mask() {
    let wide = UartBridge::new(MockTransport::new(ChipType::Ft4232H, Interface::C));
    assert_eq!(wide.mask(), 0xFC);
    let narrow = UartBridge::new(MockTransport::new(ChipType::Ft232R, Interface::A));
    assert_eq!(narrow.mask(), 0x0F);
}

#[test]
fn test_narrow_device_gpio_through_uart_port() {
    let mock = MockTransport::new(ChipType::Ft232R, Interface::A);
    let bridge = UartBridge::new(mock.clone());
    mock.state().pins = 0x52;
    let pins = bridge
        .gpio_write_read(
            Some(&ftdi_servod::GpioState::new(0x01, 0x01, 0x01)),
            true,
        )
        .unwrap();
    assert_eq!(pins, Some(0x02));
    assert_eq!(
        mock.state().bitmodes,
        vec![(0x11, ftdi_servod::BitMode::Cbus)]
    );
}

#[test]
fn test_narrow_device_cbus_written_only_on_change() {
    let mock = MockTransport::new(ChipType::Ft232R, Interface::A);
    let bridge = UartBridge::new(mock.clone());
    let state = ftdi_servod::GpioState::new(0x03, 0x01, 0x03);

    bridge.gpio_write_read(Some(&state), false).unwrap();
    bridge.gpio_write_read(Some(&state), false).unwrap();
    assert_eq!(mock.state().bitmodes.len(), 1);

    bridge
        .gpio_write_read(Some(&ftdi_servod::GpioState::new(0x03, 0x03, 0x03)), false)
        .unwrap();
    assert_eq!(
        mock.state().bitmodes,
        vec![
            (0x31, ftdi_servod::BitMode::Cbus),
            (0x33, ftdi_servod::BitMode::Cbus)
        ]
    );
}

#[cfg(not(feature = "skip-pty-tests"))]
mod pty {
    use super::*;
    use nix::fcntl::OFlag;
    use std::fs::{File, OpenOptions};
    use std::io::{ErrorKind, Read, Write};
    use std::os::unix::fs::OpenOptionsExt;
    use std::thread;

    fn open_slave(path: &str) -> File {
        OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(OFlag::O_NOCTTY.bits() | OFlag::O_NONBLOCK.bits())
            .open(path)
            .unwrap()
    }

    fn read_slave(slave: &mut File, len: usize) -> Vec<u8> {
        let mut received = Vec::new();
        let mut buf = [0u8; 64];
        for _ in 0..200 {
            match slave.read(&mut buf) {
                Ok(n) => received.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => panic!("slave read failed: {}", e),
            }
            if received.len() >= len {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        received
    }

    #[test]
    fn test_open_allocates_pty() {
        let mock = MockTransport::new(ChipType::Ft4232H, Interface::C);
        let bridge = UartBridge::new(mock.clone());
        bridge.open(&Default::default()).unwrap();

        assert!(bridge.is_open());
        let path = bridge.pty_path().unwrap();
        assert!(path.starts_with("/dev/pts/"));
        let state = mock.state();
        assert_eq!(state.bitmodes, vec![(0x01, ftdi_servod::BitMode::Reset)]);
        assert_eq!(state.baudrate, Some(115_200));
        drop(state);

        bridge.close().unwrap();
        assert!(!bridge.is_open());
        assert!(mock.state().closed);
    }

    #[test]
    fn test_pump_step_moves_bytes_both_ways() {
        let mock = MockTransport::new(ChipType::Ft4232H, Interface::C);
        let bridge = UartBridge::new(mock.clone());
        bridge.open(&Default::default()).unwrap();
        let mut slave = open_slave(&bridge.pty_path().unwrap());

        slave.write_all(b"hello").unwrap();
        for _ in 0..100 {
            bridge.write_read().unwrap();
            if mock.written().len() >= 5 {
                break;
            }
        }
        assert_eq!(mock.written(), b"hello");

        mock.push_read(b"world");
        bridge.write_read().unwrap();
        assert_eq!(read_slave(&mut slave, 5), b"world");
        bridge.close().unwrap();
    }

    #[test]
    fn test_pump_thread_forwards_device_output() {
        let mock = MockTransport::new(ChipType::Ft4232H, Interface::D);
        let bridge = UartBridge::new(mock.clone());
        bridge.open(&Default::default()).unwrap();
        let mut slave = open_slave(&bridge.pty_path().unwrap());

        assert!(!bridge.is_running());
        bridge.run(Duration::from_millis(1)).unwrap();
        // a second start is ignored
        bridge.run(Duration::from_millis(1)).unwrap();
        assert!(bridge.is_running());
        mock.push_read(b"ping");
        assert_eq!(read_slave(&mut slave, 4), b"ping");

        bridge.stop();
        assert!(!bridge.is_running());
        bridge.close().unwrap();
    }

    fn wait_for_pump_exit(bridge: &UartBridge<MockTransport>) -> bool {
        for _ in 0..200 {
            if !bridge.is_running() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_pump_thread_stops_on_transport_error() {
        let mock = MockTransport::new(ChipType::Ft4232H, Interface::C);
        let bridge = UartBridge::new(mock.clone());
        bridge.open(&Default::default()).unwrap();
        mock.state().fail_reads = true;

        bridge.run(Duration::from_millis(1)).unwrap();
        assert!(wait_for_pump_exit(&bridge));
        assert!(bridge.is_open());
        assert!(bridge.write_read().is_err());
        bridge.close().unwrap();
    }

    #[test]
    fn test_run_replaces_exited_pump() {
        let mock = MockTransport::new(ChipType::Ft4232H, Interface::C);
        let bridge = UartBridge::new(mock.clone());
        bridge.open(&Default::default()).unwrap();
        let mut slave = open_slave(&bridge.pty_path().unwrap());
        mock.state().fail_reads = true;

        bridge.run(Duration::from_millis(1)).unwrap();
        assert!(wait_for_pump_exit(&bridge));

        mock.state().fail_reads = false;
        bridge.run(Duration::from_millis(1)).unwrap();
        assert!(bridge.is_running());
        mock.push_read(b"back");
        assert_eq!(read_slave(&mut slave, 4), b"back");

        bridge.stop();
        assert!(!bridge.is_running());
        bridge.close().unwrap();
    }

    #[test]
    fn test_narrow_device_open_programs_cbus() {
        let mock = MockTransport::new(ChipType::Ft232R, Interface::A);
        let bridge = UartBridge::new(mock.clone());
        let config = ftdi_servod::UartConfig {
            cbus_direction: 0x03,
            cbus_value: 0x01,
            ..Default::default()
        };
        bridge.open(&config).unwrap();
        assert_eq!(
            mock.state().bitmodes,
            vec![(0x31, ftdi_servod::BitMode::Cbus)]
        );
        bridge.close().unwrap();
    }
}
