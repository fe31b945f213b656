use std::sync::Arc;

use small_dsm::{failover, transport, Body, CentralManager, Message, MemoryRegistry};
use tokio::net::TcpListener;

use crate::test_utils::{
    setup, start_backup_cm, start_client, start_primary_cm, wait_until,
};

/// The backup's heartbeat keeps its metadata in sync with the primary.
#[tokio::test]
async fn test_pulse_refreshes_backup_metadata() {
    setup();

    let registry = Arc::new(MemoryRegistry::new());
    let (_primary, _p_serve) = start_primary_cm(&registry).await;
    let (backup, _b_serve) = start_backup_cm(&registry).await;
    let (c1, _c1_serve) = start_client(&registry).await;

    c1.write("P1", "hello").await.unwrap();

    failover::spawn_pulse_loop(backup.clone());

    assert!(
        wait_until(|| backup.page_info("P1").is_some(), 2000).await,
        "backup never caught up with the primary's metadata"
    );
    assert_eq!(backup.page_info("P1").unwrap().owner.id, c1.id);
    assert!(!backup.is_primary());
}

/// A backup never answers coherence traffic, but it does answer PULSE.
#[tokio::test]
async fn test_backup_ignores_coherence_traffic() {
    setup();

    let registry = Arc::new(MemoryRegistry::new());
    let (_primary, _p_serve) = start_primary_cm(&registry).await;
    let (backup, _b_serve) = start_backup_cm(&registry).await;

    let read_request = Message::new(
        1,
        "127.0.0.1:1",
        Body::ReadRequest {
            page_no: "P1".to_string(),
        },
    );
    let reply = transport::send(&backup.addr, &read_request).await.unwrap();
    assert!(!reply.ack);

    let pulse = Message::from_cm(
        &backup.addr,
        Body::Pulse {
            from_addr: backup.addr.clone(),
        },
    );
    let reply = transport::send(&backup.addr, &pulse).await.unwrap();
    assert!(reply.ack);
    assert!(reply.payload.is_some());
}

/// A cancelled heartbeat loop no longer reacts to a dead primary.
#[tokio::test]
async fn test_stopped_pulse_loop_never_promotes() {
    setup();

    let registry = Arc::new(MemoryRegistry::new());
    let (_primary, p_serve) = start_primary_cm(&registry).await;
    let (backup, _b_serve) = start_backup_cm(&registry).await;

    failover::spawn_pulse_loop(backup.clone());
    backup.stop_pulse_loop();

    p_serve.abort();
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;

    assert!(!backup.is_primary());
}

/// When the primary dies, the backup's next pulse fails, it promotes
/// itself and repoints every client; reads keep working against the
/// replicated metadata.
#[tokio::test]
async fn test_backup_promotion() {
    setup();

    let registry = Arc::new(MemoryRegistry::new());
    let (_primary, p_serve) = start_primary_cm(&registry).await;
    let (backup, _b_serve) = start_backup_cm(&registry).await;
    let (c1, _c1_serve) = start_client(&registry).await;
    let (c2, _c2_serve) = start_client(&registry).await;

    c1.write("P1", "hello").await.unwrap();

    failover::spawn_pulse_loop(backup.clone());
    assert!(wait_until(|| backup.page_info("P1").is_some(), 2000).await);

    // crash the primary
    p_serve.abort();

    assert!(
        wait_until(|| backup.is_primary(), 3000).await,
        "backup never promoted itself"
    );
    assert!(
        wait_until(
            || c1.cm_addr() == backup.addr && c2.cm_addr() == backup.addr,
            2000
        )
        .await,
        "clients were not repointed at the new primary"
    );

    c2.read("P1").await.unwrap();
    assert_eq!(c2.page("P1").unwrap().content, "hello");
    assert_eq!(backup.page_info("P1").unwrap().copy_set[0].id, c2.id);
}

/// A restarted primary reclaims the role: the promoted backup demotes
/// itself, hands the current metadata over, resumes pulsing, and the
/// clients point home again.
#[tokio::test]
async fn test_primary_reclaim() {
    setup();

    let registry = Arc::new(MemoryRegistry::new());
    let (primary, p_serve) = start_primary_cm(&registry).await;
    let (backup, _b_serve) = start_backup_cm(&registry).await;
    let (c1, _c1_serve) = start_client(&registry).await;
    let (c2, _c2_serve) = start_client(&registry).await;

    c1.write("P1", "hello").await.unwrap();

    failover::spawn_pulse_loop(backup.clone());
    assert!(wait_until(|| backup.page_info("P1").is_some(), 2000).await);

    p_serve.abort();
    assert!(wait_until(|| backup.is_primary(), 3000).await);
    assert!(wait_until(|| c2.cm_addr() == backup.addr, 2000).await);

    // new state accumulates while the backup is in charge
    c2.write("P2", "world").await.unwrap();

    // the operator restarts the old primary at its registered address
    let listener = TcpListener::bind(&primary.addr).await.unwrap();
    let restarted = CentralManager::new(&primary.addr, true, registry.clone());
    let _r_serve = transport::serve(listener, Arc::new(restarted.clone()));

    failover::reclaim_primary(&restarted).await;

    assert!(restarted.is_primary());
    assert!(!backup.is_primary());

    // metadata written under the promoted backup came back with the role
    assert_eq!(restarted.page_info("P2").unwrap().owner.id, c2.id);

    assert_eq!(c1.cm_addr(), restarted.addr);
    assert_eq!(c2.cm_addr(), restarted.addr);

    // the demoted backup pulses the reclaimed primary again
    c1.write("P3", "fresh").await.unwrap();
    assert!(
        wait_until(|| backup.page_info("P3").is_some(), 2000).await,
        "demoted backup never resumed pulsing"
    );
}
