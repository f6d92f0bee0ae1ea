//! Configuration file tests.
//!
//! Files are written to a temporary directory and loaded the way the
//! daemon loads them, then used to build a running network.

use super::common::Harness;
use probe_common::{ComponentId, ConfigError, ErrorCode, LinkConfig, ProbeConfig, TaskPriority};
use probe_stack::parse_udp_header;
use std::io::Write;
use std::net::Ipv6Addr;
use std::time::Duration;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_shipped_default_config_matches_builtin() {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("config/default.toml");
    let shipped = ProbeConfig::from_file(&path).unwrap();
    let builtin = ProbeConfig::default();

    assert_eq!(shipped.probe.port, builtin.probe.port);
    assert_eq!(shipped.probe.destination, builtin.probe.destination);
    assert_eq!(shipped.probe.priority, builtin.probe.priority);
    assert_eq!(shipped.stack.buffer_count, builtin.stack.buffer_count);
    assert_eq!(shipped.stack.slot_duration, builtin.stack.slot_duration);
    assert_eq!(shipped.stack.link, LinkConfig::Reliable);
}

#[test]
fn test_file_config_drives_network() {
    let file = write_config(
        r#"
        [probe]
        port = 5000
        destination = "bbbb::1"
        priority = "udp"

        [stack]
        buffer_count = 4
        slot_duration = "10ms"
        "#,
    );
    let config = ProbeConfig::from_file(file.path()).unwrap();
    assert_eq!(config.probe.priority, TaskPriority::Udp);

    let mut h = Harness::manual(&config);
    h.pulse_from_thread(1);
    h.run();
    h.net.sender.dispatch_transport();
    let frames = h.net.sender.stack.take_air_frames();
    assert_eq!(frames.len(), 1);

    let expected: Ipv6Addr = "bbbb::1".parse().unwrap();
    assert_eq!(frames[0].destination.as_128b(), Some(&expected.octets()));
    let (src, dst, _) = parse_udp_header(&frames[0].datagram).unwrap();
    assert_eq!((src, dst), (5000, 5000));
}

#[test]
fn test_small_pool_from_file_exhausts() {
    let file = write_config(
        r#"
        [stack]
        buffer_count = 2
        "#,
    );
    let config = ProbeConfig::from_file(file.path()).unwrap();
    let mut h = Harness::manual(&config);

    h.pulse_from_thread(5);
    assert_eq!(h.run(), 5);

    let stats = h.net.sender.probe.stats();
    assert_eq!(stats.sent, 2);
    assert_eq!(stats.no_buffer, 3);
    assert_eq!(
        h.net
            .sender
            .stack
            .serial()
            .count(ComponentId::Llatency, ErrorCode::NoFreePacketBuffer),
        3
    );

    h.clock.advance_slots(1);
    assert_eq!(h.net.propagate(), 2);
    assert_eq!(h.net.report().sender_pool.in_use, 0);
}

#[test]
fn test_slot_duration_from_file_scales_latency() {
    let file = write_config(
        r#"
        [stack]
        slot_duration = "10ms"
        "#,
    );
    let config = ProbeConfig::from_file(file.path()).unwrap();
    assert_eq!(config.stack.slot_duration, Duration::from_millis(10));

    let mut h = Harness::manual(&config);
    let samples = h.probe_after_slots(4);
    assert_eq!(samples[0].latency_ns, 40_000_000);
}

#[test]
fn test_invalid_file_rejected() {
    let file = write_config("[scheduler]\nqueue_depth = 0\n");
    let err = ProbeConfig::from_file(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));

    let file = write_config("[probe]\nport = \"not a port\"\n");
    let err = ProbeConfig::from_file(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
fn test_missing_file_reports_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");
    let err = ProbeConfig::from_file(&path).unwrap_err();
    assert!(err.to_string().contains("absent.toml"));
}
