use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use async_trait::async_trait;
use log::{debug, error, info, warn};
use tokio::sync::watch;

use crate::{
    failover,
    message::{
        Access, Body, ClientPointer, Message, Metadata, Page, PageInfo, Purpose, Reply,
    },
    registry::Registry,
    transport::{self, MessageHandler},
};

/// The central manager: the authoritative per-page index (owner +
/// copyset) and the orchestration of reads and writes against it.
///
/// The metadata mutex guards individual accesses only and is never held
/// across an outbound rpc: confirmations arrive re-entrantly while a
/// request handler is still awaiting its forward's ack, so a handler
/// that kept the lock would deadlock against its own write chain.
///
/// Cloning is shallow; all clones share the same state.
#[derive(Clone)]
pub struct CentralManager {
    pub addr: String,
    registry: Arc<dyn Registry>,
    metadata: Arc<Mutex<Metadata>>,
    is_primary: Arc<AtomicBool>,
    pulse_stop: Arc<Mutex<Option<watch::Sender<bool>>>>,
}

impl CentralManager {
    pub fn new(addr: &str, is_primary: bool, registry: Arc<dyn Registry>) -> Self {
        Self {
            addr: addr.to_string(),
            registry,
            metadata: Arc::new(Mutex::new(Metadata::new())),
            is_primary: Arc::new(AtomicBool::new(is_primary)),
            pulse_stop: Arc::new(Mutex::new(None)),
        }
    }

    pub fn registry(&self) -> &Arc<dyn Registry> {
        &self.registry
    }

    pub fn is_primary(&self) -> bool {
        self.is_primary.load(Ordering::SeqCst)
    }

    pub(crate) fn set_primary(&self, is_primary: bool) {
        self.is_primary.store(is_primary, Ordering::SeqCst);
    }

    pub fn metadata_snapshot(&self) -> Metadata {
        self.metadata.lock().unwrap().clone()
    }

    /// Overwrite the whole index. This is the install path for `PULSE`
    /// and `IM_BACK` payloads.
    pub fn install_metadata(&self, metadata: Metadata) {
        *self.metadata.lock().unwrap() = metadata;
    }

    pub fn page_info(&self, page_no: &str) -> Option<PageInfo> {
        self.metadata.lock().unwrap().get(page_no).cloned()
    }

    pub(crate) fn store_pulse_stop(&self, stop: watch::Sender<bool>) {
        // replacing the sender cancels any previous pulse loop
        *self.pulse_stop.lock().unwrap() = Some(stop);
    }

    pub fn stop_pulse_loop(&self) {
        *self.pulse_stop.lock().unwrap() = None;
    }

    // Sends READ_FORWARD to the page owner; the owner ships the copy to
    // the requester directly.
    async fn handle_read_request(&self, page_no: String, from_id: u32, from_addr: String) {
        let owner = self
            .metadata
            .lock()
            .unwrap()
            .get(&page_no)
            .map(|info| info.owner.clone());

        let owner = match owner {
            Some(owner) => owner,
            None => {
                error!("page {} does not exist in cm", page_no);
                error!("read request by client {} denied", from_id);
                return;
            }
        };

        let forward = Message::from_cm(
            &self.addr,
            Body::ReadForward {
                requester: ClientPointer {
                    id: from_id,
                    addr: from_addr,
                },
                page_no,
            },
        );

        debug!("cm sending msg [READ_FORWARD] to client {}", owner.id);
        let reply = transport::call(&owner.addr, &forward).await;
        if !reply.ack {
            error!(
                "msg [READ_FORWARD] from cm not acknowledged by client {}",
                owner.id
            );
        }
    }

    // The requester has installed its READ copy; record it in the
    // copyset. Repeated reads by the same client stay a single entry.
    fn handle_read_confirmation(&self, page_no: String, requester: ClientPointer) {
        let mut metadata = self.metadata.lock().unwrap();
        match metadata.get_mut(&page_no) {
            Some(info) => {
                if !info.copy_set.contains(&requester) {
                    info.copy_set.push(requester);
                }
                info!(
                    "cm updated copy set after read confirmation: {:?}",
                    info.copy_set
                );
            }
            None => {
                error!(
                    "cm has no record of page {}, dropping read confirmation",
                    page_no
                );
            }
        }
    }

    // step 1: invalidate every copyset member, aborting on the first nack
    // step 2: forward the write (with the new content) to the owner
    //
    // The copyset itself is only cleared by the write confirmation, so
    // an aborted write leaves the index untouched.
    async fn handle_write_request(&self, page_no: String, content: String, writer: ClientPointer) {
        let existing = self.metadata.lock().unwrap().get(&page_no).cloned();

        let info = match existing {
            Some(info) => info,
            None => {
                // first-ever write: synthesize the page and ship it
                // straight to the writer, no invalidations needed
                warn!("page {} doesn't exist in cm records", page_no);
                warn!("adding page {} info to cm records...", page_no);

                let info = PageInfo {
                    owner: writer.clone(),
                    copy_set: Vec::new(),
                };
                info!("page info stored: {:?}", info);
                self.metadata
                    .lock()
                    .unwrap()
                    .insert(page_no.clone(), info);

                let page_send = Message::from_cm(
                    &self.addr,
                    Body::PageSend {
                        purpose: Purpose::Write,
                        page: Page {
                            number: page_no,
                            content,
                            access: Access::Nil,
                        },
                    },
                );
                let reply = transport::call(&writer.addr, &page_send).await;
                if !reply.ack {
                    error!(
                        "msg [PAGE_SEND] from cm not acknowledged by client {}",
                        writer.id
                    );
                }
                return;
            }
        };

        for member in &info.copy_set {
            let invalidate = Message::from_cm(
                &self.addr,
                Body::InvalidateCopy {
                    page_no: page_no.clone(),
                },
            );

            let reply = transport::call(&member.addr, &invalidate).await;
            if !reply.ack {
                error!(
                    "msg [INVALIDATE_COPY] from cm not acknowledged by client {}",
                    member.id
                );
                error!("cannot forward write request");
                return;
            }
        }

        // re-read the owner: the index may have moved while the
        // invalidations were in flight
        let owner = self
            .metadata
            .lock()
            .unwrap()
            .get(&page_no)
            .map(|info| info.owner.clone());
        let owner = match owner {
            Some(owner) => owner,
            None => {
                error!("page {} vanished from cm records mid-write", page_no);
                return;
            }
        };

        let forward = Message::from_cm(
            &self.addr,
            Body::WriteForward {
                writer: writer.clone(),
                page_no,
                content,
            },
        );

        debug!("cm sending msg [WRITE_FORWARD] to client {}", owner.id);
        let reply = transport::call(&owner.addr, &forward).await;
        if !reply.ack {
            error!(
                "msg [WRITE_FORWARD] from cm not acknowledged by client {}",
                owner.id
            );
        }
    }

    // The writer has installed its READWRITE copy: it becomes the owner
    // and the whole copyset is cleared (the previous owner is not
    // subtracted individually).
    fn handle_write_confirmation(&self, page_no: String, writer: ClientPointer) {
        let mut metadata = self.metadata.lock().unwrap();
        match metadata.get_mut(&page_no) {
            Some(info) => {
                info.owner = writer;
                info.copy_set.clear();
            }
            None => {
                error!("cm does not have page info of page {}", page_no);
            }
        }
    }

    // Hand primacy back to a restarted primary: demote, reply with the
    // current index, and resume pulsing as a backup.
    fn handle_im_back(&self, cm_addr: String) -> Reply {
        if !self.is_primary() {
            debug!(
                "cm at {} received [IM_BACK] but has no primacy to hand over",
                self.addr
            );
            return Reply::nack();
        }

        info!("handing the primary role back to cm at {}", cm_addr);
        let snapshot = self.metadata_snapshot();
        self.set_primary(false);
        failover::spawn_pulse_loop(self.clone());

        Reply::with_metadata(snapshot)
    }
}

#[async_trait]
impl MessageHandler for CentralManager {
    async fn handle(&self, msg: Message) -> Reply {
        debug!("cm: message of type [{}] received", msg.body.kind());

        match msg.body {
            // answered by primary and backup alike
            Body::Pulse { .. } => Reply::with_metadata(self.metadata_snapshot()),
            Body::ImBack { cm_addr } => self.handle_im_back(cm_addr),

            _ if !self.is_primary() => {
                debug!(
                    "cm at {} is not primary, ignoring [{}]",
                    self.addr,
                    msg.body.kind()
                );
                Reply::nack()
            }

            Body::ReadRequest { page_no } => {
                self.handle_read_request(page_no, msg.from_id, msg.from_addr)
                    .await;
                Reply::ack()
            }
            Body::ReadConfirmation { page_no, requester } => {
                self.handle_read_confirmation(page_no, requester);
                Reply::ack()
            }
            Body::WriteRequest { page_no, content } => {
                let writer = ClientPointer {
                    id: msg.from_id,
                    addr: msg.from_addr,
                };
                self.handle_write_request(page_no, content, writer).await;
                Reply::ack()
            }
            Body::WriteConfirmation { page_no, writer } => {
                self.handle_write_confirmation(page_no, writer);
                Reply::ack()
            }

            _ => {
                error!("cm: unexpected msg [{}] received", msg.body.kind());
                Reply::nack()
            }
        }
    }
}
