//! End-to-end tests with TLS on the tunnel hop.

mod common;

use std::time::Duration;

use http_tunnel::config::ClientConfig;
use http_tunnel::protocol::{encode_frame, Endpoint};
use http_tunnel::{TunnelChannel, TunnelError};

use common::{fixture, start_echo_destination, start_server, tls_server_config};

fn tls_client(server: std::net::SocketAddr) -> ClientConfig {
    ClientConfig {
        endpoint: server.to_string(),
        tls: true,
        server_name: "localhost".into(),
        ca_file: fixture("ca.pem").display().to_string(),
        ..ClientConfig::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn exchanges_frames_over_tls() {
    let dest = start_echo_destination().await;
    let server = start_server(tls_server_config()).await;
    let client = tls_client(server.addr);
    let destination: Endpoint = dest.addr.to_string().parse().unwrap();

    let (ready, replies) = tokio::task::spawn_blocking(move || {
        let mut channel = TunnelChannel::connect(&client, destination).unwrap();
        let small = channel
            .exchange(&encode_frame(b"over tls"), Duration::from_secs(10))
            .unwrap();
        let large = channel
            .exchange(&encode_frame(&vec![7u8; 100_000]), Duration::from_secs(10))
            .unwrap();
        let ready = channel.ready();
        channel.close();
        (ready, [small, large])
    })
    .await
    .unwrap();

    assert!(ready);
    assert_eq!(replies[0], encode_frame(b"over tls").to_vec());
    assert_eq!(replies[1].len(), 100_004);
    assert!(replies[1][4..].iter().all(|&b| b == 7));
    assert_eq!(dest.accepted(), 1);

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn untrusted_certificate_fails_the_handshake() {
    let dest = start_echo_destination().await;
    let server = start_server(tls_server_config()).await;
    let client = ClientConfig {
        // the leaf is not its own trust anchor
        ca_file: fixture("server.pem").display().to_string(),
        ..tls_client(server.addr)
    };
    let destination: Endpoint = dest.addr.to_string().parse().unwrap();

    let result = tokio::task::spawn_blocking(move || {
        let mut channel = TunnelChannel::connect(&client, destination)?;
        channel.exchange(&encode_frame(b"x"), Duration::from_secs(10))
    })
    .await
    .unwrap();

    assert!(matches!(result, Err(TunnelError::Tls(_))));
    assert_eq!(dest.accepted(), 0);

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn insecure_mode_accepts_any_certificate() {
    let dest = start_echo_destination().await;
    let server = start_server(tls_server_config()).await;
    let client = ClientConfig {
        ca_file: String::new(),
        server_name: "not-the-cert-name".into(),
        insecure_skip_verify: true,
        ..tls_client(server.addr)
    };
    let destination: Endpoint = dest.addr.to_string().parse().unwrap();

    let reply = tokio::task::spawn_blocking(move || {
        let mut channel = TunnelChannel::connect(&client, destination).unwrap();
        channel
            .exchange(&encode_frame(b"trust me"), Duration::from_secs(10))
            .unwrap()
    })
    .await
    .unwrap();

    assert_eq!(reply, encode_frame(b"trust me").to_vec());

    server.stop().await;
}
