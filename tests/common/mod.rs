#![allow(dead_code)]

use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use xrt_client::HarnessConfig;

/// A port nothing is listening on right now.
pub fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .and_then(|l| l.local_addr())
        .map(|a| a.port())
        .expect("failed to reserve a port")
}

/// Spawn the workspace's own `xrt_server` on a fresh port.
pub fn config() -> HarnessConfig {
    let port = free_port();
    HarnessConfig {
        server_binary: Some(PathBuf::from(env!("CARGO_BIN_EXE_xrt_server"))),
        server_args: vec!["--listen".to_string(), format!("127.0.0.1:{}", port)],
        spawn_server: true,
        target: format!("grpc://127.0.0.1:{}", port),
        connect_timeout_ms: 10_000,
        seed: Some(7),
    }
}

pub fn port_of(config: &HarnessConfig) -> u16 {
    config.target().expect("test target").port
}

pub fn is_listening(port: u16) -> bool {
    TcpStream::connect(("127.0.0.1", port)).is_ok()
}
