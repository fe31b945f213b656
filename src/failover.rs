use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use log::{error, info};
use tokio::{sync::watch, task::JoinHandle, time};

use crate::{
    cm::CentralManager,
    message::{Body, Message},
    transport,
};

pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 2000;
static HEARTBEAT_INTERVAL_MS: AtomicU64 = AtomicU64::new(DEFAULT_HEARTBEAT_INTERVAL_MS);

pub fn set_heartbeat_interval(ms: u64) {
    HEARTBEAT_INTERVAL_MS.store(ms, Ordering::Relaxed);
}

pub fn heartbeat_interval() -> u64 {
    HEARTBEAT_INTERVAL_MS.load(Ordering::Relaxed)
}

/// Run the backup's heartbeat as a detached task.
///
/// Every interval the backup pulses the *registered* primary address; a
/// successful reply refreshes the local metadata, a failed one triggers
/// promotion and ends the loop. Respawning (after a demotion) replaces
/// the stored stop sender, which cancels any loop left over from an
/// earlier backup stint.
pub fn spawn_pulse_loop(cm: CentralManager) -> JoinHandle<()> {
    let (stop_tx, mut stop_rx) = watch::channel(false);
    cm.store_pulse_stop(stop_tx);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = time::sleep(Duration::from_millis(heartbeat_interval())) => {
                    if !pulse_once(&cm).await {
                        return;
                    }
                }
                _ = stop_rx.changed() => {
                    return;
                }
            }
        }
    })
}

// One heartbeat. Returns false when the loop should end (promotion or
// a registry failure).
async fn pulse_once(cm: &CentralManager) -> bool {
    let primary_addr = match cm.registry().primary_cm_addr() {
        Ok(addr) => addr,
        Err(e) => {
            error!("backup cm could not get primary cm address: {}", e);
            return false;
        }
    };

    let pulse = Message::from_cm(
        &cm.addr,
        Body::Pulse {
            from_addr: cm.addr.clone(),
        },
    );

    let reply = transport::call(&primary_addr, &pulse).await;
    if !reply.ack {
        error!("pulse not returned by primary cm");
        error!("primary cm is likely dead");
        promote(cm).await;
        return false;
    }

    if let Some(metadata) = reply.payload {
        cm.install_metadata(metadata);
    }
    true
}

/// Promote this backup to primary and point every registered client at
/// it.
pub async fn promote(cm: &CentralManager) {
    info!("backup cm at {} undergoing promotion...", cm.addr);
    cm.set_primary(true);
    info!("backup cm at {} is now the primary cm", cm.addr);

    broadcast_change_cm(cm).await;
}

/// Reclaim primacy after a restart: ask every peer cm to hand the role
/// back, install the returned metadata, and point the clients home.
///
/// The restarted node starts as primary with an empty index; the ack
/// from the promoted former backup carries the live one.
pub async fn reclaim_primary(cm: &CentralManager) {
    for peer in cm.registry().all_cms() {
        // a node does not ask itself for the role
        if peer.addr == cm.addr {
            continue;
        }

        let im_back = Message::from_cm(
            &cm.addr,
            Body::ImBack {
                cm_addr: cm.addr.clone(),
            },
        );

        let reply = transport::call(&peer.addr, &im_back).await;
        if reply.ack {
            info!("cm at {} reclaiming the primary role", cm.addr);
            if let Some(metadata) = reply.payload {
                cm.install_metadata(metadata);
                info!("metadata has been restored");
            }
            broadcast_change_cm(cm).await;
        }
    }
}

// A nack here is logged and the broadcast moves on: the remaining
// clients still need the new address.
async fn broadcast_change_cm(cm: &CentralManager) {
    for client in cm.registry().all_clients() {
        let change_cm = Message::from_cm(
            &cm.addr,
            Body::ChangeCm {
                new_cm_addr: cm.addr.clone(),
            },
        );

        let reply = transport::call(&client.addr, &change_cm).await;
        if !reply.ack {
            error!(
                "msg [CHANGE_CM] from cm not acknowledged by client {}",
                client.id
            );
        }
    }
}
