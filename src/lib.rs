pub mod client;
pub mod cm;
pub mod error;
pub mod failover;
pub mod log;
pub mod message;
pub mod registry;
pub mod transport;
pub mod types;
pub mod utils;

pub use crate::{
    client::DsmClient,
    cm::CentralManager,
    error::DsmError,
    message::{
        Access, Body, ClientPointer, Message, Metadata, Page, PageInfo, Purpose, Reply,
    },
    registry::{MemoryRegistry, Registry},
};
