//! Unit tests for configuration module

use super::*;
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn default_configuration_is_valid() {
    let config = StrataConfig::default();
    config.validate().expect("defaults must validate");

    assert_eq!(config.max_clients, config.client_planes.len());
    assert!(!config.ack_clients);
    assert!(config.device.is_none());
}

#[test]
fn configuration_serialization_roundtrip() {
    let original = StrataConfig {
        plane_zpos: vec![0, 3],
        ack_clients: true,
        ..Default::default()
    };

    let toml_string = toml::to_string(&original).expect("serialize");
    let deserialized: StrataConfig = toml::from_str(&toml_string).expect("deserialize");

    assert_eq!(original, deserialized);
}

#[test]
fn configuration_from_file() {
    let mut file = NamedTempFile::new().expect("temp file");
    writeln!(
        file,
        r#"
socket_path = "/tmp/strata-test.sock"
max_clients = 3
client_planes = [0, 1, 2]
ack_clients = true
"#
    )
    .expect("write config");

    let config = StrataConfig::load(file.path()).expect("load config");
    config.validate().expect("validate");

    assert_eq!(config.socket_path, PathBuf::from("/tmp/strata-test.sock"));
    assert_eq!(config.max_clients, 3);
    assert_eq!(config.client_planes, vec![0, 1, 2]);
    assert!(config.ack_clients);
    // Unspecified fields fall back to defaults
    assert!(config.plane_zpos.is_empty());
}

#[test]
fn partial_file_uses_defaults() {
    let config: StrataConfig = toml::from_str("ack_clients = true").expect("parse");
    assert!(config.ack_clients);
    assert_eq!(config.max_clients, StrataConfig::default_max_clients());
    assert_eq!(config.socket_path, StrataConfig::default_socket_path());
}

#[test]
fn mapping_length_mismatch_is_rejected() {
    let config = StrataConfig {
        max_clients: 3,
        client_planes: vec![0, 1],
        ..Default::default()
    };
    assert!(config.validate().is_err());
}

#[test]
fn mapping_beyond_max_planes_is_rejected() {
    let config = StrataConfig {
        max_clients: 1,
        client_planes: vec![MAX_PLANES],
        ..Default::default()
    };
    assert!(config.validate().is_err());
}

#[test]
fn zero_clients_is_rejected() {
    let config = StrataConfig {
        max_clients: 0,
        client_planes: Vec::new(),
        ..Default::default()
    };
    assert!(config.validate().is_err());
}
