//! mTLS transport integration tests over loopback TCP.

mod common;

use common::*;
use futures::future::join_all;
use mpc_network::codec::{write_frame, REGISTRATION_ACK};
use mpc_network::{NetworkError, PeerFailure, TlsTransport, Transport};
use mpc_security::CertificateAuthority;
use mpc_types::RoleId;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_three_party_mesh_exchange() {
    let cluster = TestCluster::new(3);
    let transports: Vec<Arc<TlsTransport>> = cluster.connect_all().await.into_iter().map(Arc::new).collect();
    let cancel = CancellationToken::new();

    for sender in &transports {
        let me = sender.self_role();
        for to in (0..3).map(RoleId).filter(|r| *r != me) {
            for seq in 0u8..20 {
                sender.send(to, vec![me.0 as u8, seq], &cancel).await.unwrap();
            }
        }
    }

    for receiver in &transports {
        let me = receiver.self_role();
        for from in (0..3).map(RoleId).filter(|r| *r != me) {
            for seq in 0u8..20 {
                let msg = receiver.receive(from, &cancel).await.unwrap();
                assert_eq!(msg, vec![from.0 as u8, seq], "out of order from {}", from);
            }
        }
    }

    for t in &transports {
        t.shutdown().await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_receive_all_and_large_frames() {
    let cluster = TestCluster::new(3);
    let transports = cluster.connect_all().await;
    let cancel = CancellationToken::new();

    let big = vec![0xAB; 1 << 20];
    transports[1].send(RoleId(0), big.clone(), &cancel).await.unwrap();
    transports[2].send(RoleId(0), Vec::new(), &cancel).await.unwrap();

    let all = transports[0]
        .receive_all(&[RoleId(1), RoleId(2)], &cancel)
        .await
        .unwrap();
    assert_eq!(all[&RoleId(1)], big);
    assert!(all[&RoleId(2)].is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_misaddressed_calls_fail_fast() {
    let cluster = TestCluster::new(2);
    let transports = cluster.connect_all().await;
    let cancel = CancellationToken::new();

    assert!(matches!(
        transports[0].send(RoleId(0), vec![1], &cancel).await,
        Err(NetworkError::SendToSelf(RoleId(0)))
    ));
    assert!(matches!(
        transports[0].receive(RoleId(5), &cancel).await,
        Err(NetworkError::UnknownPeer(RoleId(5)))
    ));
    assert!(matches!(
        transports[1].receive_all(&[RoleId(0), RoleId(0)], &cancel).await,
        Err(NetworkError::DuplicateRole(RoleId(0)))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_and_close_unblock_receive() {
    let cluster = TestCluster::new(2);
    let mut transports = cluster.connect_all().await;
    let b = Arc::new(transports.pop().unwrap());
    let a = Arc::new(transports.pop().unwrap());

    let cancel = CancellationToken::new();
    let pending = {
        let a = Arc::clone(&a);
        let cancel = cancel.clone();
        tokio::spawn(async move { a.receive(RoleId(1), &cancel).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();
    let result = tokio::time::timeout(Duration::from_secs(1), pending).await.unwrap().unwrap();
    assert!(matches!(result, Err(NetworkError::Cancelled)));

    let pending = {
        let a = Arc::clone(&a);
        tokio::spawn(async move { a.receive(RoleId(1), &CancellationToken::new()).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    a.close();
    a.close();
    let result = tokio::time::timeout(Duration::from_secs(1), pending).await.unwrap().unwrap();
    assert!(matches!(result, Err(NetworkError::TransportClosed)));
    assert!(matches!(
        a.send(RoleId(1), vec![1], &CancellationToken::new()).await,
        Err(NetworkError::TransportClosed)
    ));

    // The remote side sees the stream end.
    let result = tokio::time::timeout(
        Duration::from_secs(2),
        b.receive(RoleId(0), &CancellationToken::new()),
    )
    .await
    .unwrap();
    assert!(matches!(
        result,
        Err(NetworkError::PeerFailed { role: RoleId(0), .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_messages_sent_before_close_are_delivered() {
    let cluster = TestCluster::new(2);
    let mut transports = cluster.connect_all().await;
    let b = transports.pop().unwrap();
    let a = transports.pop().unwrap();
    let cancel = CancellationToken::new();

    for i in 0u8..10 {
        a.send(RoleId(1), vec![i], &cancel).await.unwrap();
    }
    a.shutdown().await;

    for i in 0u8..10 {
        assert_eq!(b.receive(RoleId(0), &cancel).await.unwrap(), vec![i]);
    }
    assert!(matches!(
        b.receive(RoleId(0), &cancel).await,
        Err(NetworkError::PeerFailed {
            failure: PeerFailure::EndOfStream,
            ..
        })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_missing_peer_times_out() {
    let mut cluster = TestCluster::new(3);
    cluster.settings.connect_timeout_ms = 1_500;

    // Role 2 never starts.
    let started = Instant::now();
    let results = join_all([
        TlsTransport::connect(cluster.config(0)),
        TlsTransport::connect(cluster.config(1)),
    ])
    .await;
    assert!(started.elapsed() < Duration::from_secs(5));

    for result in results {
        match result {
            Err(NetworkError::ConnectTimeout { missing, .. }) => assert_eq!(missing, vec![RoleId(2)]),
            Err(e) => panic!("expected timeout, got {}", e),
            Ok(_) => panic!("expected timeout, got a transport"),
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failed_construction_releases_listener() {
    let mut cluster = TestCluster::new(2);
    cluster.settings.connect_timeout_ms = 300;

    let address = cluster.topology.entry(RoleId(1)).unwrap().address.clone();
    assert!(TlsTransport::connect(cluster.config(1)).await.is_err());
    tokio::time::sleep(Duration::from_millis(100)).await;

    std::net::TcpListener::bind(&address).expect("listener should be released");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bind_failure_is_reported() {
    let cluster = TestCluster::new(2);
    let address = cluster.topology.entry(RoleId(1)).unwrap().address.clone();
    let _occupied = std::net::TcpListener::bind(&address).unwrap();

    assert!(matches!(
        TlsTransport::connect(cluster.config(1)).await,
        Err(NetworkError::BindFailed { .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_certificate_for_wrong_party_is_rejected() {
    let mut cluster = TestCluster::new(2);
    cluster.settings.connect_timeout_ms = 1_000;

    // Role 0 presents a valid certificate issued to someone else.
    let impostor = cluster.ca.issue("mallory", &[]).unwrap();
    let (_, listener) = tokio::join!(
        TlsTransport::connect(cluster.config_with(0, mtls_for(&impostor))),
        TlsTransport::connect(cluster.config(1)),
    );

    match listener {
        Err(NetworkError::ConnectTimeout { missing, .. }) => assert_eq!(missing, vec![RoleId(0)]),
        Err(e) => panic!("expected timeout, got {}", e),
        Ok(_) => panic!("impostor was accepted"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_foreign_ca_is_rejected() {
    let mut cluster = TestCluster::new(2);
    cluster.settings.connect_timeout_ms = 1_000;

    let rogue_ca = CertificateAuthority::generate("Rogue CA").unwrap();
    let rogue = rogue_ca.issue("p0", &[]).unwrap();
    let (dialer, listener) = tokio::join!(
        TlsTransport::connect(cluster.config_with(0, mtls_for(&rogue))),
        TlsTransport::connect(cluster.config(1)),
    );

    assert!(matches!(dialer, Err(NetworkError::ConnectTimeout { .. })));
    assert!(matches!(listener, Err(NetworkError::ConnectTimeout { .. })));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_listener_survives_rejected_claims() {
    let cluster = TestCluster::new(2);
    let listener = tokio::spawn(TlsTransport::connect(cluster.config(1)));
    let p0 = cluster.mtls(0);

    // Role outside the topology.
    let mut stream = dial_raw(&cluster, 1, &p0).await;
    stream.write_all(&7u32.to_be_bytes()).await.unwrap();
    stream.flush().await.unwrap();
    assert_dropped(stream).await;

    // The listener's own role.
    let mut stream = dial_raw(&cluster, 1, &p0).await;
    stream.write_all(&1u32.to_be_bytes()).await.unwrap();
    stream.flush().await.unwrap();
    assert_dropped(stream).await;

    // Announcement cut short.
    let mut stream = dial_raw(&cluster, 1, &p0).await;
    stream.write_all(&[0, 0]).await.unwrap();
    stream.shutdown().await.unwrap();
    assert_dropped(stream).await;

    // The honest party still gets in.
    let dialer = TlsTransport::connect(cluster.config(0)).await.unwrap();
    let listener = listener.await.unwrap().unwrap();
    let cancel = CancellationToken::new();
    dialer.send(RoleId(1), b"hello".to_vec(), &cancel).await.unwrap();
    assert_eq!(listener.receive(RoleId(0), &cancel).await.unwrap(), b"hello");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_duplicate_claim_leaves_registered_peer_intact() {
    let cluster = TestCluster::new(2);
    let transports = cluster.connect_all().await;
    let cancel = CancellationToken::new();

    // A second connection, with the right certificate, claims role 0 again.
    let mut stream = dial_raw(&cluster, 1, &cluster.mtls(0)).await;
    stream.write_all(&0u32.to_be_bytes()).await.unwrap();
    stream.flush().await.unwrap();
    assert_dropped(stream).await;

    transports[0].send(RoleId(1), vec![1], &cancel).await.unwrap();
    assert_eq!(transports[1].receive(RoleId(0), &cancel).await.unwrap(), vec![1]);
    transports[1].send(RoleId(0), vec![2], &cancel).await.unwrap();
    assert_eq!(transports[0].receive(RoleId(1), &cancel).await.unwrap(), vec![2]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_confirmed_registration_wire_format() {
    let mut cluster = TestCluster::new(2);
    cluster.settings.confirm_registration = true;
    let listener = tokio::spawn(TlsTransport::connect(cluster.config(1)));

    // A refused claim gets no acknowledgement.
    let mut stream = dial_raw(&cluster, 1, &cluster.mtls(0)).await;
    stream.write_all(&9u32.to_be_bytes()).await.unwrap();
    stream.flush().await.unwrap();
    assert_dropped(stream).await;

    // An accepted one is acknowledged before any frame.
    let mut stream = dial_raw(&cluster, 1, &cluster.mtls(0)).await;
    stream.write_all(&0u32.to_be_bytes()).await.unwrap();
    stream.flush().await.unwrap();
    assert_eq!(stream.read_u8().await.unwrap(), REGISTRATION_ACK);
    write_frame(&mut stream, b"raw").await.unwrap();

    let listener = listener.await.unwrap().unwrap();
    let msg = listener.receive(RoleId(0), &CancellationToken::new()).await.unwrap();
    assert_eq!(msg, b"raw");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_confirmed_registration_mesh() {
    let mut cluster = TestCluster::new(3);
    cluster.settings.confirm_registration = true;
    let transports = cluster.connect_all().await;
    let cancel = CancellationToken::new();

    for sender in &transports {
        let me = sender.self_role();
        for to in (0..3).map(RoleId).filter(|r| *r != me) {
            sender.send(to, vec![me.0 as u8], &cancel).await.unwrap();
        }
    }
    for receiver in &transports {
        let me = receiver.self_role();
        for from in (0..3).map(RoleId).filter(|r| *r != me) {
            assert_eq!(receiver.receive(from, &cancel).await.unwrap(), vec![from.0 as u8]);
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_confirmed_registration_fails_impostor_dialer() {
    let mut cluster = TestCluster::new(2);
    cluster.settings.connect_timeout_ms = 1_000;
    cluster.settings.confirm_registration = true;

    let impostor = cluster.ca.issue("mallory", &[]).unwrap();
    let (dialer, listener) = tokio::join!(
        TlsTransport::connect(cluster.config_with(0, mtls_for(&impostor))),
        TlsTransport::connect(cluster.config(1)),
    );

    // Without the ack the dialer keeps retrying instead of registering.
    match dialer {
        Err(NetworkError::ConnectTimeout { missing, .. }) => assert_eq!(missing, vec![RoleId(1)]),
        Err(e) => panic!("expected timeout, got {}", e),
        Ok(_) => panic!("impostor dialer completed construction"),
    }
    match listener {
        Err(NetworkError::ConnectTimeout { missing, .. }) => assert_eq!(missing, vec![RoleId(0)]),
        Err(e) => panic!("expected timeout, got {}", e),
        Ok(_) => panic!("impostor was accepted"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_oversized_send_rejected_before_wire() {
    let mut cluster = TestCluster::new(2);
    cluster.settings.max_frame_len = 1024;
    let transports = cluster.connect_all().await;
    let cancel = CancellationToken::new();

    assert!(matches!(
        transports[0].send(RoleId(1), vec![0; 2048], &cancel).await,
        Err(NetworkError::FrameTooLarge { len: 2048, max: 1024, .. })
    ));

    // The connection survives; a frame at the limit goes through.
    transports[0].send(RoleId(1), vec![7; 1024], &cancel).await.unwrap();
    assert_eq!(transports[1].receive(RoleId(0), &cancel).await.unwrap(), vec![7; 1024]);
}
