// tests/hardware_tests.rs
use ftdi_servod::{
    device, i2c, FtdiPort, GpioChannel, GpioState, I2cChannel, Interface, Result, Transport,
    UartBridge, UartConfig, FT4232H_PID, FTDI_VID,
};
use std::{thread, time::Duration};

// Helper to open one port of the first FT4232H, panics on failure for test simplicity
fn open_test_port(interface: Interface) -> FtdiPort {
    FtdiPort::open(FTDI_VID, FT4232H_PID, interface)
        .expect("Failed to open FT4232H. Is it connected, ftdi_sio unbound and permissions set?")
}

#[test]
#[ignore] // Ignore by default, requires hardware
fn test_enumerate_devices() -> Result<()> {
    let devices = device::device_find_all(FTDI_VID, FT4232H_PID)?;
    assert!(!devices.is_empty(), "No FT4232H found");
    for dev in &devices {
        println!("{:04x}:{:04x} {} on bus {}", dev.vid, dev.pid, dev.chip, dev.bus);
        assert_eq!(dev.chip.interface_count(), 4);
    }
    Ok(())
}

#[test]
#[ignore] // Ignore by default, requires hardware
fn test_gpio_output_readback() -> Result<()> {
    let mut gpio = GpioChannel::new(open_test_port(Interface::A));
    gpio.open(16)?;

    println!("Testing GPIO output readback on port A");
    let pins = gpio.write_read(Some(&GpioState::new(0xFF, 0xA5, 0xFF)), false)?;
    assert_eq!(pins, None);
    thread::sleep(Duration::from_millis(5)); // Allow state to settle
    assert_eq!(gpio.write_read(None, true)?, Some(0xA5), "Pins should read 0xa5");

    gpio.write_read(Some(&GpioState::new(0xFF, 0x5A, 0xFF)), false)?;
    thread::sleep(Duration::from_millis(5));
    assert_eq!(gpio.write_read(None, true)?, Some(0x5A), "Pins should read 0x5a");

    // Cleanup: back to inputs
    gpio.write_read(Some(&GpioState::new(0x00, 0x00, 0xFF)), false)?;
    gpio.close()
}

#[test]
#[ignore] // Ignore by default, requires hardware
fn test_i2c_presence_check() -> Result<()> {
    let mut port = open_test_port(Interface::B);
    port.set_read_timeout(i2c::read_timeout());
    let mut i2c = I2cChannel::new(port);
    i2c.open(16, 100_000)?;

    let known_good = 0x50; // CHANGE THIS to an address KNOWN TO BE on your bus
    let known_bad = 0x31; // CHANGE THIS to an address KNOWN TO BE EMPTY
    let mut byte = [0u8; 1];

    println!("Checking for device at 0x{:02x}...", known_good);
    i2c.set_slave(known_good);
    match i2c.write_read(&[], &mut byte) {
        Ok(()) => println!("Device found at 0x{:02x}, read 0x{:02x}", known_good, byte[0]),
        Err(ftdi_servod::Error::I2cNack { .. }) => {
            panic!("Device NOT found at 0x{:02x} (NACK), but expected.", known_good)
        }
        Err(e) => return Err(e),
    }

    println!("Checking for device at 0x{:02x}...", known_bad);
    i2c.set_slave(known_bad);
    match i2c.write_read(&[], &mut byte) {
        Ok(()) => panic!("Device found at 0x{:02x} (ACK), but NOT expected.", known_bad),
        Err(ftdi_servod::Error::I2cNack { .. }) => {
            println!("Device not found at 0x{:02x} (NACK) as expected.", known_bad)
        }
        Err(e) => return Err(e),
    }
    println!("Retries so far: {}", i2c.total_retries());
    i2c.close()
}

#[test]
#[ignore] // Ignore by default, requires hardware
fn test_uart_bridge_loopback() -> Result<()> {
    let port = open_test_port(Interface::C);
    assert_eq!(port.interface(), Interface::C);
    let bridge = UartBridge::new(port);
    bridge.open(&UartConfig::default())?;
    let path = bridge.pty_path().expect("bridge has a pty");
    println!("UART bridged to {} for 3 seconds (tie TX to RX to loop back)...", path);

    bridge.run(Duration::from_millis(5))?;
    thread::sleep(Duration::from_secs(3));
    bridge.close()
}
