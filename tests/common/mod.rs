//! Shared fixtures for the mTLS integration tests: a throwaway PKI and a
//! loopback cluster on free ports.

#![allow(dead_code)]

use futures::future::join_all;
use mpc_network::{TlsTransport, TlsTransportConfig, TransportSettings};
use mpc_security::{CertificateAuthority, IssuedCertificate, MtlsConfig};
use mpc_types::{ClusterTopology, PartyEntry, RoleId};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::TlsConnector;

/// A port that was free a moment ago.
pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Short timeouts so failure cases finish quickly.
pub fn fast_settings() -> TransportSettings {
    TransportSettings {
        dial_backoff_ms: 50,
        connect_timeout_ms: 5_000,
        handshake_timeout_ms: 2_000,
        close_linger_ms: 500,
        ..TransportSettings::default()
    }
}

pub struct TestCluster {
    pub topology: ClusterTopology,
    pub ca: CertificateAuthority,
    pub certs: Vec<IssuedCertificate>,
    pub settings: TransportSettings,
}

impl TestCluster {
    /// `n` parties named `p0..p{n-1}` on loopback, all signed by one CA.
    pub fn new(n: usize) -> Self {
        let parties = (0..n)
            .map(|i| PartyEntry::new(i as u32, format!("p{}", i), format!("127.0.0.1:{}", free_port())))
            .collect();
        let topology = ClusterTopology::new(parties).unwrap();

        let ca = CertificateAuthority::generate("Test Cluster CA").unwrap();
        let certs = topology
            .names()
            .iter()
            .map(|name| ca.issue(name, &["localhost".to_string()]).unwrap())
            .collect();

        Self {
            topology,
            ca,
            certs,
            settings: fast_settings(),
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.topology.names()
    }

    pub fn mtls(&self, role: u32) -> MtlsConfig {
        mtls_for(&self.certs[role as usize])
    }

    pub fn config(&self, role: u32) -> TlsTransportConfig {
        self.config_with(role, self.mtls(role))
    }

    pub fn config_with(&self, role: u32, mtls: MtlsConfig) -> TlsTransportConfig {
        TlsTransportConfig {
            topology: self.topology.clone(),
            self_role: RoleId(role),
            mtls,
            settings: self.settings.clone(),
        }
    }

    /// Connect every party concurrently; panics if any fails.
    pub async fn connect_all(&self) -> Vec<TlsTransport> {
        let attempts = (0..self.topology.len() as u32).map(|role| TlsTransport::connect(self.config(role)));
        join_all(attempts)
            .await
            .into_iter()
            .map(|result| result.unwrap())
            .collect()
    }
}

pub fn mtls_for(cert: &IssuedCertificate) -> MtlsConfig {
    MtlsConfig::from_manager(&cert.certificate_manager(), false).unwrap()
}

/// Open a bare mTLS stream to `to`'s listener using `mtls`, without any role
/// announcement. Retries the TCP connect while the listener starts up.
pub async fn dial_raw(cluster: &TestCluster, to: u32, mtls: &MtlsConfig) -> TlsStream<TcpStream> {
    let entry = cluster.topology.entry(RoleId(to)).unwrap();
    let mut attempts = 0;
    let socket = loop {
        match TcpStream::connect(&entry.address).await {
            Ok(socket) => break socket,
            Err(_) if attempts < 100 => {
                attempts += 1;
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            Err(e) => panic!("listener for role {} never came up: {}", to, e),
        }
    };
    let server_name = ServerName::try_from(entry.name.clone()).unwrap();
    TlsConnector::from(mtls.client.clone())
        .connect(server_name, socket)
        .await
        .unwrap()
}

/// The listener must drop `stream` without writing anything back.
pub async fn assert_dropped(mut stream: TlsStream<TcpStream>) {
    let read = tokio::time::timeout(Duration::from_secs(2), stream.read_u8())
        .await
        .expect("listener kept a rejected connection open");
    assert!(read.is_err(), "listener answered a rejected connection");
}
