use std::{net::SocketAddr, net::UdpSocket, process::Command, sync::Arc, time::Duration};

use framewire::{EngineConfig, TransportContext};
use tokio::time::sleep;

pub const LOCALHOST: &str = "127.0.0.1";

pub fn any_local() -> SocketAddr {
    format!("{LOCALHOST}:0").parse().unwrap()
}

#[allow(dead_code)]
pub fn ctx() -> Arc<TransportContext> {
    TransportContext::new(EngineConfig::default())
}

#[allow(dead_code)]
pub fn ctx_with(tweak: impl FnOnce(&mut EngineConfig)) -> Arc<TransportContext> {
    let mut config = EngineConfig::default();
    tweak(&mut config);
    TransportContext::new(config)
}

#[allow(dead_code)]
pub fn reserve_port(host: &str) -> u16 {
    let addr = format!("{host}:0");
    let listener = std::net::TcpListener::bind(&addr).expect("bind ephemeral port");
    listener.local_addr().unwrap().port()
}

#[allow(dead_code)]
pub fn reserve_udp_port(host: &str) -> u16 {
    let socket = UdpSocket::bind(format!("{host}:0")).expect("bind ephemeral port");
    socket.local_addr().unwrap().port()
}

#[allow(dead_code)]
pub fn spawn_framewire(host: &str, port: u16, transport: &str) -> std::process::Child {
    let exe = env!("CARGO_BIN_EXE_framewire");

    Command::new(exe)
        .env("FRAMEWIRE_HOST", host)
        .env("FRAMEWIRE_PORT", port.to_string())
        .env_remove("FRAMEWIRE_CONFIG_FILE")
        .args(["--transport", transport, "--log", "warn"])
        .spawn()
        .expect("spawn framewire")
}

#[allow(dead_code)]
pub async fn wait_for_listen(host: &str, port: u16) {
    let addr = format!("{host}:{port}");
    for _ in 0..50 {
        if std::net::TcpStream::connect(&addr).is_ok() {
            return;
        }
        sleep(Duration::from_millis(50)).await;
    }
    panic!("framewire did not start listening on {addr}");
}
