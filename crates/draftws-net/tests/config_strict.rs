#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::io::Write;

use draftws_core::ErrorKind;
use draftws_net::config::{self, ClientConfig, DecodeErrorPolicy, FrameMode};

#[test]
fn deny_unknown_fields_nested() {
    let bad = r#"
version: 1
server:
  listen: "127.0.0.1:9000"
connection:
  buffer_sise: 512 # typo should fail
"#;

    let err = config::load_from_str(bad).expect_err("must fail");
    assert_eq!(err.kind().as_str(), "CONFIG");
}

#[test]
fn ok_minimal_config() {
    let cfg = config::load_from_str("version: 1\n").expect("must parse");
    assert_eq!(cfg.version, 1);
    assert_eq!(cfg.server.listen, "127.0.0.1:8080");
    assert_eq!(cfg.server.handshake_timeout_ms, 5000);
    assert_eq!(cfg.connection.buffer_size, 255);
    assert_eq!(cfg.connection.max_frame_bytes, 1024 * 1024);
    assert_eq!(cfg.connection.mode, FrameMode::Plain);
    assert_eq!(cfg.connection.on_decode_error, DecodeErrorPolicy::Close);
    assert_eq!(cfg.connection.heartbeat_interval_ms, 0);
}

#[test]
fn enums_use_snake_case() {
    let ok = r#"
version: 1
connection:
  mode: sub_protocol
  on_decode_error: skip
  heartbeat_interval_ms: 15000
"#;
    let cfg = config::load_from_str(ok).unwrap();
    assert_eq!(cfg.connection.mode, FrameMode::SubProtocol);
    assert_eq!(cfg.connection.on_decode_error, DecodeErrorPolicy::Skip);
}

#[test]
fn validation_rejects_out_of_range_values() {
    let cases = [
        "version: 2\n",
        "version: 1\nserver:\n  listen: \"localhost\"\n",
        "version: 1\nserver:\n  handshake_timeout_ms: 10\n",
        "version: 1\nserver:\n  max_handshake_bytes: 100000\n",
        "version: 1\nconnection:\n  buffer_size: 0\n",
        "version: 1\nconnection:\n  max_frame_bytes: 0\n",
        "version: 1\nconnection:\n  close_timeout_ms: 0\n",
        "version: 1\nconnection:\n  heartbeat_interval_ms: 10\n",
    ];
    for yaml in cases {
        let err = config::load_from_str(yaml).expect_err(yaml);
        assert_eq!(err.kind(), ErrorKind::Config, "{yaml}");
    }
}

#[test]
fn origin_allow_list() {
    let cfg = config::load_from_str(
        "version: 1\nserver:\n  allowed_origins: [\"http://a.example\"]\n",
    )
    .unwrap();
    assert!(cfg.server.origin_allowed("http://a.example"));
    assert!(!cfg.server.origin_allowed("http://b.example"));

    let open = config::load_from_str("version: 1\n").unwrap();
    assert!(open.server.origin_allowed("anything"));
}

#[test]
fn load_from_file_reads_yaml() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "version: 1\nserver:\n  listen: \"127.0.0.1:0\"").unwrap();

    let cfg = config::load_from_file(file.path()).unwrap();
    assert_eq!(cfg.server.listen, "127.0.0.1:0");
}

#[test]
fn missing_file_is_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = config::load_from_file(dir.path().join("absent.yaml")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
}

#[test]
fn client_config_builder_and_yaml_agree() {
    let built = ClientConfig::default()
        .subprotocol("chat")
        .header("X-Trace", "1")
        .cookie("sid", "abc");

    let parsed: ClientConfig = serde_yaml::from_str(
        r#"
subprotocol: chat
headers:
  - { name: X-Trace, value: "1" }
cookies:
  - { name: sid, value: abc }
"#,
    )
    .unwrap();

    assert_eq!(built.subprotocol, parsed.subprotocol);
    assert_eq!(built.headers, parsed.headers);
    assert_eq!(built.cookies, parsed.cookies);
    parsed.validate().unwrap();
}
