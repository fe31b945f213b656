use std::{collections::HashMap, sync::RwLock};

use async_trait::async_trait;
use log::{debug, error, info};

use crate::{
    error::DsmError,
    message::{Access, Body, ClientPointer, Message, Page, Purpose, Reply},
    registry::Registry,
    transport::{self, MessageHandler},
    types::DsmResult,
    utils::HandyRwLock,
};

/// A client node: a local page cache plus the coherence handlers that
/// serve forwarded requests from peers and invalidations from the
/// central manager.
///
/// The page store is owned exclusively by this client; handlers take the
/// lock for the individual access and release it before any outbound
/// rpc.
pub struct DsmClient {
    pub id: u32,
    pub addr: String,
    page_store: RwLock<HashMap<String, Page>>,
    cm_addr: RwLock<String>,
}

impl DsmClient {
    /// Register with the given registry (which assigns the id) and point
    /// at its current primary central manager.
    pub fn register(registry: &dyn Registry, addr: &str) -> Result<Self, DsmError> {
        let cm_addr = registry.primary_cm_addr()?;
        let id = registry.register_client(addr);
        info!("created new client with id {}", id);

        Ok(Self {
            id,
            addr: addr.to_string(),
            page_store: RwLock::new(HashMap::new()),
            cm_addr: RwLock::new(cm_addr),
        })
    }

    fn pointer(&self) -> ClientPointer {
        ClientPointer {
            id: self.id,
            addr: self.addr.clone(),
        }
    }

    pub fn cm_addr(&self) -> String {
        self.cm_addr.rl().clone()
    }

    pub fn page(&self, page_no: &str) -> Option<Page> {
        self.page_store.rl().get(page_no).cloned()
    }

    pub fn page_store_snapshot(&self) -> HashMap<String, Page> {
        self.page_store.rl().clone()
    }

    /// Request read access to a page. The rpc returns once the central
    /// manager has orchestrated the read; the copy itself arrives via
    /// `PAGE_SEND` and is installed by this client's handler.
    pub async fn read(&self, page_no: &str) -> DsmResult {
        let request = Message::new(
            self.id,
            &self.addr,
            Body::ReadRequest {
                page_no: page_no.to_string(),
            },
        );

        let reply = transport::call(&self.cm_addr(), &request).await;
        if !reply.ack {
            error!(
                "msg [READ_REQUEST] from client {} not acknowledged by cm",
                self.id
            );
            return Err(DsmError::new("read request not acknowledged"));
        }
        Ok(())
    }

    /// Write a page. Hits locally when the page is held with READWRITE
    /// access; any other state is a page fault that goes through the
    /// central manager.
    pub async fn write(&self, page_no: &str, content: &str) -> DsmResult {
        {
            let mut store = self.page_store.wl();
            match store.get_mut(page_no) {
                Some(page) => {
                    if page.access == Access::ReadWrite {
                        info!(
                            "page {} exists in local storage with READWRITE access",
                            page_no
                        );
                        info!("writing new content in local page...");
                        page.content = content.to_string();
                        return Ok(());
                    }
                    info!(
                        "page {} exists in local storage with {:?} access",
                        page_no, page.access
                    );
                    info!("page fault...");
                }
                None => {
                    info!("page {} does not exist in local storage", page_no);
                    info!("page fault...");
                }
            }
        }

        let request = Message::new(
            self.id,
            &self.addr,
            Body::WriteRequest {
                page_no: page_no.to_string(),
                content: content.to_string(),
            },
        );

        let reply = transport::call(&self.cm_addr(), &request).await;
        if !reply.ack {
            error!(
                "msg [WRITE_REQUEST] from client {} not acknowledged by cm",
                self.id
            );
            return Err(DsmError::new("write request not acknowledged"));
        }
        Ok(())
    }

    // Ships the local copy to the read requester. The owner keeps its
    // own access mode through the forward.
    async fn handle_read_forward(&self, requester: ClientPointer, page_no: String) {
        let page = self.page_store.rl().get(&page_no).cloned();
        let page = match page {
            Some(page) => page,
            None => {
                error!(
                    "page {} doesn't exist in client {}'s page store, cannot forward",
                    page_no, self.id
                );
                return;
            }
        };

        let page_send = Message::new(
            self.id,
            &self.addr,
            Body::PageSend {
                purpose: Purpose::Read,
                page,
            },
        );

        debug!(
            "client {} sending msg [PAGE_SEND] to client {}",
            self.id, requester.id
        );
        let reply = transport::call(&requester.addr, &page_send).await;
        if !reply.ack {
            error!(
                "msg [PAGE_SEND] from client {} not acknowledged by client {}",
                self.id, requester.id
            );
        }
    }

    // Confirms to the cm first, then installs the page. A nacked
    // confirmation drops the page on the floor.
    async fn handle_page_send(&self, purpose: Purpose, mut page: Page) {
        match purpose {
            Purpose::Read => {
                page.access = Access::Read;

                let confirmation = Message::new(
                    self.id,
                    &self.addr,
                    Body::ReadConfirmation {
                        page_no: page.number.clone(),
                        requester: self.pointer(),
                    },
                );
                let reply = transport::call(&self.cm_addr(), &confirmation).await;
                if !reply.ack {
                    error!(
                        "msg [READ_CONFIRMATION] from client {} not acknowledged by cm",
                        self.id
                    );
                    return;
                }
            }
            Purpose::Write => {
                page.access = Access::ReadWrite;

                let confirmation = Message::new(
                    self.id,
                    &self.addr,
                    Body::WriteConfirmation {
                        page_no: page.number.clone(),
                        writer: self.pointer(),
                    },
                );
                let reply = transport::call(&self.cm_addr(), &confirmation).await;
                if !reply.ack {
                    error!(
                        "msg [WRITE_CONFIRMATION] from client {} not acknowledged by cm",
                        self.id
                    );
                    return;
                }
            }
        }

        self.page_store.wl().insert(page.number.clone(), page);
    }

    fn handle_invalidate_copy(&self, page_no: &str) -> bool {
        let mut store = self.page_store.wl();
        match store.get_mut(page_no) {
            Some(page) => {
                page.access = Access::Nil;
                true
            }
            None => {
                error!(
                    "page {} doesn't exist in client {}'s page store, cannot invalidate",
                    page_no, self.id
                );
                false
            }
        }
    }

    // The local copy drops to NIL access and takes the writer's new
    // content before it is shipped, so the page that travels back to
    // the writer already carries the writer's own content.
    async fn handle_write_forward(&self, writer: ClientPointer, page_no: String, content: String) {
        let shipped = {
            let mut store = self.page_store.wl();
            let existed = store.contains_key(&page_no);

            let page = store.entry(page_no.clone()).or_insert(Page {
                number: page_no.clone(),
                content: String::new(),
                access: Access::Nil,
            });
            page.access = Access::Nil;
            page.content = content;

            if existed {
                Some(page.clone())
            } else {
                None
            }
        };

        let page = match shipped {
            Some(page) => page,
            None => {
                error!(
                    "page {} requested (to write) by client {} does not exist in client {}'s page store",
                    page_no, writer.id, self.id
                );
                return;
            }
        };

        let page_send = Message::new(
            self.id,
            &self.addr,
            Body::PageSend {
                purpose: Purpose::Write,
                page,
            },
        );

        debug!(
            "client {} sending msg [PAGE_SEND] to client {}",
            self.id, writer.id
        );
        let reply = transport::call(&writer.addr, &page_send).await;
        if !reply.ack {
            error!(
                "msg [PAGE_SEND] from client {} not acknowledged by client {}",
                self.id, writer.id
            );
        }
    }

    fn handle_change_cm(&self, new_cm_addr: String) {
        info!("client {} changed cm address to {}", self.id, new_cm_addr);
        *self.cm_addr.wl() = new_cm_addr;
    }
}

#[async_trait]
impl MessageHandler for DsmClient {
    async fn handle(&self, msg: Message) -> Reply {
        debug!(
            "client {}: message of type [{}] received",
            self.id,
            msg.body.kind()
        );

        match msg.body {
            Body::ReadForward { requester, page_no } => {
                self.handle_read_forward(requester, page_no).await;
                Reply::ack()
            }
            Body::PageSend { purpose, page } => {
                self.handle_page_send(purpose, page).await;
                Reply::ack()
            }
            Body::InvalidateCopy { page_no } => {
                if self.handle_invalidate_copy(&page_no) {
                    Reply::ack()
                } else {
                    Reply::nack()
                }
            }
            Body::WriteForward {
                writer,
                page_no,
                content,
            } => {
                self.handle_write_forward(writer, page_no, content).await;
                Reply::ack()
            }
            Body::ChangeCm { new_cm_addr } => {
                self.handle_change_cm(new_cm_addr);
                Reply::ack()
            }
            _ => {
                error!(
                    "client {}: unexpected msg [{}] received",
                    self.id,
                    msg.body.kind()
                );
                Reply::nack()
            }
        }
    }
}
