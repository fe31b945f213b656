use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use log::{debug, error};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    task::JoinHandle,
    time,
};

use crate::{
    error::DsmError,
    message::{Message, Reply},
    types::DsmResult,
};

pub const DEFAULT_RPC_TIMEOUT_MS: u64 = 3000;
static RPC_TIMEOUT_MS: AtomicU64 = AtomicU64::new(DEFAULT_RPC_TIMEOUT_MS);

// Frames above this size are treated as corrupt.
const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

pub fn set_rpc_timeout(ms: u64) {
    RPC_TIMEOUT_MS.store(ms, Ordering::Relaxed);
}

pub fn rpc_timeout() -> u64 {
    RPC_TIMEOUT_MS.load(Ordering::Relaxed)
}

/// A node's inbound dispatch surface. Every inbound request is handled to
/// completion on its own task and answered with a single [`Reply`].
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, msg: Message) -> Reply;
}

/// Run the accept loop for a node. One request/reply exchange per
/// connection, each serviced on its own task.
pub fn serve(listener: TcpListener, handler: Arc<dyn MessageHandler>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let socket = match listener.accept().await {
                Ok((socket, _)) => socket,
                Err(e) => {
                    error!("accept failed: {}", e);
                    return;
                }
            };

            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                if let Err(e) = serve_connection(socket, handler).await {
                    error!("connection error: {}", e);
                }
            });
        }
    })
}

async fn serve_connection(
    mut socket: TcpStream,
    handler: Arc<dyn MessageHandler>,
) -> DsmResult {
    let buf = read_frame(&mut socket).await?;
    let msg: Message =
        serde_json::from_slice(&buf).or(Err(DsmError::new("message decode error")))?;

    let reply = handler.handle(msg).await;

    let encoded =
        serde_json::to_vec(&reply).or(Err(DsmError::new("reply encode error")))?;
    write_frame(&mut socket, &encoded).await
}

/// Send `msg` to `target` and wait for its reply, all within the RPC
/// timeout. Transport failures and timeouts both surface as errors.
pub async fn send(target: &str, msg: &Message) -> Result<Reply, DsmError> {
    let timeout = Duration::from_millis(rpc_timeout());
    match time::timeout(timeout, exchange(target, msg)).await {
        Ok(result) => result,
        Err(_) => Err(DsmError::new(&format!("rpc to {} timed out", target))),
    }
}

/// The protocol-facing shape of [`send`]: a failed exchange is logged and
/// degraded to a nack reply, which is how the coherence handlers treat
/// unreachable peers.
pub async fn call(target: &str, msg: &Message) -> Reply {
    debug!("sending msg [{}] to {}", msg.body.kind(), target);

    match send(target, msg).await {
        Ok(reply) => reply,
        Err(e) => {
            error!("error calling rpc for msg [{}]: {}", msg.body.kind(), e);
            Reply::nack()
        }
    }
}

async fn exchange(target: &str, msg: &Message) -> Result<Reply, DsmError> {
    let mut socket = TcpStream::connect(target)
        .await
        .or(Err(DsmError::new(&format!("error dialing {}", target))))?;

    let encoded =
        serde_json::to_vec(msg).or(Err(DsmError::new("message encode error")))?;
    write_frame(&mut socket, &encoded).await?;

    let buf = read_frame(&mut socket).await?;
    serde_json::from_slice(&buf).or(Err(DsmError::new("reply decode error")))
}

// step 1: 4-byte big-endian length prefix
// step 2: the json body
async fn write_frame(socket: &mut TcpStream, body: &[u8]) -> DsmResult {
    let size = (body.len() as u32).to_be_bytes();
    socket
        .write_all(&size)
        .await
        .or(Err(DsmError::new("io error")))?;
    socket
        .write_all(body)
        .await
        .or(Err(DsmError::new("io error")))?;
    socket.flush().await.or(Err(DsmError::new("io error")))
}

async fn read_frame(socket: &mut TcpStream) -> Result<Vec<u8>, DsmError> {
    let mut size_bytes = [0u8; 4];
    socket
        .read_exact(&mut size_bytes)
        .await
        .or(Err(DsmError::new("io error")))?;

    let size = u32::from_be_bytes(size_bytes) as usize;
    if size > MAX_FRAME_SIZE {
        return Err(DsmError::new(&format!("frame too large: {}", size)));
    }

    let mut buf = vec![0u8; size];
    socket
        .read_exact(&mut buf)
        .await
        .or(Err(DsmError::new("io error")))?;
    Ok(buf)
}
