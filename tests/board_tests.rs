//! Channel startup from a configuration.

use ftdi_servod::board::{dispatch_settings, open_channels};
use ftdi_servod::config::{InterfaceConfig, ServerConfig};
use ftdi_servod::mock::MockTransport;
use ftdi_servod::{BitMode, Channel, ChipType, Error, Interface, InterfaceType};
use std::collections::HashMap;

fn gpio_i2c_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.interfaces = vec![
        InterfaceConfig::I2c {
            port: 2,
            clock_hz: 400_000,
        },
        InterfaceConfig::Gpio {
            port: 1,
            direction: Some(0x0F),
            value: Some(0x05),
        },
    ];
    config
}

#[test]
fn test_channels_open_in_port_order() {
    let config = gpio_i2c_config();
    let mut mocks = HashMap::new();
    let channels = open_channels(&config, |interface, _| {
        let mock = MockTransport::new(ChipType::Ft4232H, interface);
        mocks.insert(interface, mock.clone());
        Ok(mock)
    })
    .unwrap();

    let kinds: Vec<InterfaceType> = channels.iter().map(|c| c.kind()).collect();
    assert_eq!(kinds, vec![InterfaceType::Gpio, InterfaceType::I2c]);

    // initial GPIO state applied after open
    let gpio = &mocks[&Interface::A];
    assert_eq!(gpio.state().bitmodes.last(), Some(&(0x0F, BitMode::BitBang)));
    assert_eq!(gpio.written(), vec![0x05]);

    let i2c = &mocks[&Interface::B];
    assert_eq!(i2c.state().bitmodes.last(), Some(&(0x03, BitMode::Mpsse)));
    assert!(i2c.written().ends_with(&[0x86, 9, 0]));
}

#[test]
fn test_failed_open_closes_earlier_channels() {
    let config = gpio_i2c_config();
    let mut opened = Vec::new();
    let result = open_channels(&config, |interface, _| {
        if interface == Interface::B {
            return Err(Error::DeviceNotFound {
                vid: 0x0403,
                pid: 0x6011,
            });
        }
        let mock = MockTransport::new(ChipType::Ft4232H, interface);
        opened.push(mock.clone());
        Ok(mock)
    });

    assert!(result.is_err());
    assert_eq!(opened.len(), 1);
    assert!(opened[0].state().closed);
}

#[test]
fn test_i2c_on_non_mpsse_port_fails() {
    let mut config = ServerConfig::default();
    config.interfaces = vec![InterfaceConfig::I2c {
        port: 1,
        clock_hz: 100_000,
    }];
    let result: ftdi_servod::Result<Vec<Channel<MockTransport>>> =
        open_channels(&config, |interface, _| {
            Ok(MockTransport::new(ChipType::Ft232R, interface))
        });
    assert!(matches!(result, Err(Error::NotMpsse('A'))));
}

#[test]
fn test_dispatch_settings_follow_legacy_flag() {
    let mut config = ServerConfig::default();
    let settings = dispatch_settings(&config);
    assert_eq!(settings.i2c_interface, 2);
    assert_eq!(settings.legacy_interface, None);

    config.server.legacy = true;
    config.server.legacy_interface = 4;
    assert_eq!(dispatch_settings(&config).legacy_interface, Some(4));
}
