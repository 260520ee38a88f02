//! Integration tests for the device command protocol over a mock transport.

use std::time::Duration;

use lpm::mock::MockTransport;
use lpm::{DeviceCommand, LedDriver, LpmError, ProtocolOptions, Sentinel};

fn options() -> ProtocolOptions {
    ProtocolOptions {
        line_timeout: Duration::ZERO,
        ..ProtocolOptions::default()
    }
}

#[test]
fn command_vocabulary_encodes_exact_wire_lines() {
    let mut driver = LedDriver::new(MockTransport::default(), options());

    driver.info().unwrap();
    driver.reset().unwrap();
    driver.set_pwm(10, 2000).unwrap();
    driver.shoot().unwrap();

    assert_eq!(
        driver.transport().written,
        vec![
            "info".to_string(),
            "reset".to_string(),
            "pwm 10,2000".to_string(),
            "shoot".to_string(),
        ]
    );
}

#[test]
fn info_reply_excludes_sentinel_and_keeps_order() {
    let transport = MockTransport::with_script(&[
        "pin 6: 350nm",
        "pin 9: 450nm",
        "pin 10: 630nm",
        "\u{4}",
    ]);
    let mut driver = LedDriver::new(transport, options());

    let reply = driver.info().unwrap();
    assert_eq!(
        reply,
        vec![
            "pin 6: 350nm".to_string(),
            "pin 9: 450nm".to_string(),
            "pin 10: 630nm".to_string(),
        ]
    );
}

#[test]
fn successive_commands_do_not_leak_lines() {
    let transport = MockTransport::with_script(&["led on", "\u{4}", "led off", "\u{4}"]);
    let mut driver = LedDriver::new(transport, options());

    assert_eq!(driver.set_pwm(6, 4096).unwrap(), vec!["led on".to_string()]);
    assert_eq!(driver.reset().unwrap(), vec!["led off".to_string()]);
    assert_eq!(driver.transport().remaining(), 0);
}

#[test]
fn older_firmware_star_sentinel() {
    let transport = MockTransport::with_script(&["ready", "*"]);
    let mut driver = LedDriver::new(
        transport,
        ProtocolOptions {
            sentinel: Sentinel::star(),
            line_timeout: Duration::ZERO,
            ..ProtocolOptions::default()
        },
    );
    assert_eq!(driver.reset().unwrap(), vec!["ready".to_string()]);
}

#[test]
fn runaway_device_output_is_bounded() {
    let script: Vec<String> = (0..1000).map(|i| format!("spam {}", i)).collect();
    let mut driver = LedDriver::new(
        MockTransport::with_script_owned(script),
        ProtocolOptions {
            max_read_attempts: 32,
            line_timeout: Duration::ZERO,
            ..ProtocolOptions::default()
        },
    );
    assert!(matches!(
        driver.info(),
        Err(LpmError::ProtocolTimeout { attempts: 32 })
    ));
}

#[test]
fn one_shot_command_strings_parse_like_the_cli() {
    for (input, wire) in [
        ("info", "info"),
        ("reset", "reset"),
        ("shoot", "shoot"),
        ("pwm 10,2000", "pwm 10,2000"),
        (" pwm 6,4096 ", "pwm 6,4096"),
    ] {
        let cmd: DeviceCommand = input.parse().unwrap();
        assert_eq!(cmd.wire(), wire, "input {:?}", input);
    }
    assert!(matches!(
        "strobe".parse::<DeviceCommand>(),
        Err(LpmError::UnknownCommand(_))
    ));
}
