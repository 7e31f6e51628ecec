//! Jobs over real mTLS transports.

mod common;

use common::*;
use futures::future::join_all;
use mpc_job::{agree_random, multi_agree_random, CallbackBridge, Job2P, JobError, JobMP};
use mpc_network::{TlsTransport, Transport};
use mpc_types::{Role, RoleId};
use std::sync::Arc;
use std::time::Duration;

fn shared(transport: TlsTransport) -> Arc<dyn Transport> {
    Arc::new(transport)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_three_parties_agree_over_mtls() {
    let cluster = TestCluster::new(3);
    let names = cluster.names();
    let jobs: Vec<JobMP> = cluster
        .connect_all()
        .await
        .into_iter()
        .enumerate()
        .map(|(i, t)| JobMP::new(shared(t), RoleId(i as u32), names.clone()).unwrap())
        .collect();

    let results = join_all(jobs.iter().map(|job| multi_agree_random(job, 256))).await;
    let results: Vec<Vec<u8>> = results.into_iter().map(Result::unwrap).collect();
    assert_eq!(results[0].len(), 32);
    assert!(results.iter().all(|r| *r == results[0]));

    // Closing one completed job leaves the others untouched.
    jobs[0].close().unwrap();
    assert!(jobs[1].channel().is_ok());
    assert!(jobs[2].channel().is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_parties_agree_over_mtls() {
    let cluster = TestCluster::new(2);
    let names = cluster.names();
    let mut transports = cluster.connect_all().await;
    let b = Job2P::new(shared(transports.pop().unwrap()), Role::P2, [names[0].clone(), names[1].clone()]).unwrap();
    let a = Job2P::new(shared(transports.pop().unwrap()), Role::P1, [names[0].clone(), names[1].clone()]).unwrap();

    let (ra, rb) = tokio::join!(agree_random(&a, 64), agree_random(&b, 64));
    assert_eq!(ra.unwrap(), rb.unwrap());

    a.close().unwrap();
    b.close().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_close_interrupts_running_protocol() {
    let cluster = TestCluster::new(2);
    let names = cluster.names();
    let mut transports = cluster.connect_all().await;
    let _idle_peer = transports.pop().unwrap();
    let job = Arc::new(
        Job2P::new(shared(transports.pop().unwrap()), Role::P1, [names[0].clone(), names[1].clone()]).unwrap(),
    );

    // The peer never answers, so the run blocks until we close.
    let running = {
        let job = Arc::clone(&job);
        tokio::spawn(async move { agree_random(&job, 128).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    job.close().unwrap();
    job.close().unwrap();

    let result = tokio::time::timeout(Duration::from_secs(2), running).await.unwrap().unwrap();
    assert!(matches!(result, Err(JobError::Closed)));
    assert!(matches!(agree_random(&job, 128).await, Err(JobError::Closed)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bridge_dispatch_over_mtls() {
    let cluster = TestCluster::new(2);
    let names = cluster.names();
    let mut transports = cluster.connect_all().await;
    let b = Job2P::new(shared(transports.pop().unwrap()), Role::P2, [names[0].clone(), names[1].clone()]).unwrap();
    let a = Job2P::new(shared(transports.pop().unwrap()), Role::P1, [names[0].clone(), names[1].clone()]).unwrap();

    let bridge = Arc::new(CallbackBridge::new());
    let ha = a.attach(&bridge).unwrap();
    let hb = b.attach(&bridge).unwrap();

    bridge.send(ha, RoleId(1), b"round-1".to_vec()).await.unwrap();
    assert_eq!(bridge.receive(hb, RoleId(0)).await.unwrap(), b"round-1");

    a.close().unwrap();
    assert!(matches!(
        bridge.send(ha, RoleId(1), vec![]).await,
        Err(JobError::UnknownHandle(_))
    ));
    assert_eq!(bridge.len(), 1);
    b.close().unwrap();
    assert!(bridge.is_empty());
}
