mod support;

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use framewire::{
    DatagramEndpoint, DatagramServer, EchoHandler, EngineError, MessageFlags, PacketHeader,
    RequestHandler,
};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const WITHIN: Option<Duration> = Some(Duration::from_secs(5));

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn eight_receives_stay_outstanding_while_handling() {
    let server_ctx = support::ctx();
    let endpoint = Arc::new(
        DatagramEndpoint::bind(server_ctx.clone(), support::any_local())
            .await
            .unwrap(),
    );
    let addr = endpoint.local_addr();

    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    let stats_ctx = server_ctx.clone();
    let collect: Arc<dyn RequestHandler> =
        Arc::new(move |_: SocketAddr, _: PacketHeader, payload: &[u8]| {
            let outstanding = stats_ctx.token_stats().outstanding;
            let _ = seen_tx.send((payload.to_vec(), outstanding));
            None::<Bytes>
        });

    let shutdown = CancellationToken::new();
    let server = tokio::spawn(
        DatagramServer::new(endpoint, collect)
            .with_concurrency(8)
            .serve(shutdown.clone()),
    );

    timeout(Duration::from_secs(5), async {
        while server_ctx.token_stats().outstanding < 8 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("eight receives issued");

    let client_ctx = support::ctx();
    let client = DatagramEndpoint::bind(client_ctx, support::any_local())
        .await
        .unwrap();

    let mut seen = HashSet::new();
    for i in 0..20u32 {
        client
            .send_to(addr, &i.to_be_bytes(), MessageFlags::NONE, WITHIN)
            .await
            .unwrap();

        let (payload, outstanding) = timeout(Duration::from_secs(5), seen_rx.recv())
            .await
            .expect("datagram handled")
            .unwrap();
        let raw: [u8; 4] = payload.try_into().unwrap();
        seen.insert(u32::from_be_bytes(raw));
        assert_eq!(outstanding, 8, "receives outstanding while handling datagram {i}");
    }
    assert_eq!(seen, (0..20).collect::<HashSet<u32>>());

    shutdown.cancel();
    server.await.unwrap().unwrap();
    assert_eq!(server_ctx.token_stats().outstanding, 0);
}

#[tokio::test]
async fn oversize_send_fails_without_touching_the_wire() {
    let ctx = support::ctx_with(|c| c.max_datagram_size = 128);
    let sender = DatagramEndpoint::bind(ctx.clone(), support::any_local())
        .await
        .unwrap();
    let receiver = DatagramEndpoint::bind(ctx.clone(), support::any_local())
        .await
        .unwrap();

    let err = sender
        .send_to(receiver.local_addr(), &[7u8; 200], MessageFlags::NONE, WITHIN)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::DatagramTooLarge { size: 204, max: 128 }));

    let err = receiver
        .receive_from(MessageFlags::NONE, Some(Duration::from_millis(100)))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Timeout { .. }));
}

#[tokio::test]
async fn binary_serves_datagram_echo() {
    let host = support::LOCALHOST;
    let port = support::reserve_udp_port(host);
    let mut child = support::spawn_framewire(host, port, "datagram");
    let server: SocketAddr = format!("{host}:{port}").parse().unwrap();

    let client = DatagramEndpoint::bind(support::ctx(), support::any_local())
        .await
        .unwrap();

    // No handshake to wait on; retry until the child is up.
    let mut echoed = None;
    for _ in 0..50 {
        client
            .send_to(server, b"over udp", MessageFlags::NONE, WITHIN)
            .await
            .unwrap();
        match client
            .receive_from(MessageFlags::NONE, Some(Duration::from_millis(100)))
            .await
        {
            Ok(reply) => {
                echoed = Some(reply.into_bytes());
                break;
            }
            Err(EngineError::Timeout { .. }) => continue,
            Err(EngineError::Transport { .. }) => {
                tokio::time::sleep(Duration::from_millis(50)).await;
                continue;
            }
            Err(err) => panic!("unexpected receive error: {err}"),
        }
    }

    assert_eq!(echoed.as_deref(), Some(&b"over udp"[..]));
    let _ = child.kill();
}

#[tokio::test]
async fn echo_server_replies_to_sender() {
    let ctx = support::ctx();
    let endpoint = Arc::new(
        DatagramEndpoint::bind(ctx.clone(), support::any_local())
            .await
            .unwrap(),
    );
    let addr = endpoint.local_addr();
    let shutdown = CancellationToken::new();
    let server =
        tokio::spawn(DatagramServer::new(endpoint, Arc::new(EchoHandler)).serve(shutdown.clone()));

    let client = DatagramEndpoint::bind(ctx.clone(), support::any_local())
        .await
        .unwrap();
    client
        .send_to(addr, b"hello", MessageFlags::NONE, WITHIN)
        .await
        .unwrap();
    let reply = client.receive_from(MessageFlags::NONE, WITHIN).await.unwrap();
    assert_eq!(reply.payload(), b"hello");
    assert_eq!(reply.remote(), addr);

    shutdown.cancel();
    server.await.unwrap().unwrap();
}
