use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Sender id carried by messages that originate from a central manager
/// instead of a client.
pub const CM_SENDER_ID: u32 = 0;

/// The access mode a node holds on its local copy of a page.
///
/// `Nil` means the copy is invalid and must not be served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Access {
    #[serde(rename = "NIL")]
    Nil,
    #[serde(rename = "READ")]
    Read,
    #[serde(rename = "READWRITE")]
    ReadWrite,
}

/// The stated purpose of a `PAGE_SEND`, which decides the access mode the
/// receiver installs the page with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Purpose {
    #[serde(rename = "READ")]
    Read,
    #[serde(rename = "WRITE")]
    Write,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub number: String,
    pub content: String,
    pub access: Access,
}

/// A weak reference to a client, compared by value. The central manager
/// addresses clients through these and never owns them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientPointer {
    pub id: u32,
    pub addr: String,
}

/// Per-page record on the central manager: the unique owner (the one
/// READWRITE copy) and the set of clients holding READ copies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    pub owner: ClientPointer,
    pub copy_set: Vec<ClientPointer>,
}

pub type Metadata = HashMap<String, PageInfo>;

/// A tagged RPC message. `from_id` is [`CM_SENDER_ID`] when the sender is
/// a central manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "fromId")]
    pub from_id: u32,
    #[serde(rename = "fromAddress")]
    pub from_addr: String,
    #[serde(flatten)]
    pub body: Body,
}

impl Message {
    pub fn new(from_id: u32, from_addr: &str, body: Body) -> Self {
        Self {
            from_id,
            from_addr: from_addr.to_string(),
            body,
        }
    }

    pub fn from_cm(cm_addr: &str, body: Body) -> Self {
        Self::new(CM_SENDER_ID, cm_addr, body)
    }
}

// INVALIDATE_CONFIRMATION is reserved in the protocol but never produced
// or consumed, so it has no variant here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Body {
    #[serde(rename = "READ_REQUEST")]
    ReadRequest { page_no: String },

    #[serde(rename = "READ_FORWARD")]
    ReadForward {
        requester: ClientPointer,
        page_no: String,
    },

    #[serde(rename = "PAGE_SEND")]
    PageSend { purpose: Purpose, page: Page },

    #[serde(rename = "READ_CONFIRMATION")]
    ReadConfirmation {
        page_no: String,
        requester: ClientPointer,
    },

    #[serde(rename = "WRITE_REQUEST")]
    WriteRequest { page_no: String, content: String },

    #[serde(rename = "INVALIDATE_COPY")]
    InvalidateCopy { page_no: String },

    #[serde(rename = "WRITE_FORWARD")]
    WriteForward {
        writer: ClientPointer,
        page_no: String,
        content: String,
    },

    #[serde(rename = "WRITE_CONFIRMATION")]
    WriteConfirmation {
        page_no: String,
        writer: ClientPointer,
    },

    #[serde(rename = "PULSE")]
    Pulse { from_addr: String },

    #[serde(rename = "CHANGE_CM")]
    ChangeCm { new_cm_addr: String },

    #[serde(rename = "IM_BACK")]
    ImBack { cm_addr: String },
}

impl Body {
    /// The wire tag of this message kind, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Body::ReadRequest { .. } => "READ_REQUEST",
            Body::ReadForward { .. } => "READ_FORWARD",
            Body::PageSend { .. } => "PAGE_SEND",
            Body::ReadConfirmation { .. } => "READ_CONFIRMATION",
            Body::WriteRequest { .. } => "WRITE_REQUEST",
            Body::InvalidateCopy { .. } => "INVALIDATE_COPY",
            Body::WriteForward { .. } => "WRITE_FORWARD",
            Body::WriteConfirmation { .. } => "WRITE_CONFIRMATION",
            Body::Pulse { .. } => "PULSE",
            Body::ChangeCm { .. } => "CHANGE_CM",
            Body::ImBack { .. } => "IM_BACK",
        }
    }
}

/// Every RPC reply: an ack flag plus an optional metadata map (only used
/// by `PULSE` and `IM_BACK` replies).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub ack: bool,
    pub payload: Option<Metadata>,
}

impl Reply {
    pub fn ack() -> Self {
        Self {
            ack: true,
            payload: None,
        }
    }

    pub fn nack() -> Self {
        Self {
            ack: false,
            payload: None,
        }
    }

    pub fn with_metadata(metadata: Metadata) -> Self {
        Self {
            ack: true,
            payload: Some(metadata),
        }
    }
}
