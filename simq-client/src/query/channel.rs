//! Outbound message channel
//!
//! The query service never owns a transport. Whoever owns the connection hands in
//! something implementing [`MessageChannel`]; sends are fire-and-forget.

use simq_common::messages::QueryRequest;
use simq_common::{Error, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Sink for outbound requests
pub trait MessageChannel: Send + Sync {
    fn send(&self, request: QueryRequest) -> Result<()>;
}

/// Shared handle to the current channel, `None` while disconnected
pub type SharedChannel = Option<Arc<dyn MessageChannel>>;

/// Receiving side of the channel factory
pub type ChannelWatch = watch::Receiver<SharedChannel>;

/// Typed in-process channel
impl MessageChannel for mpsc::UnboundedSender<QueryRequest> {
    fn send(&self, request: QueryRequest) -> Result<()> {
        mpsc::UnboundedSender::send(self, request)
            .map_err(|e| Error::ChannelClosed(format!("{} not delivered", e.0.message_type())))
    }
}

/// Text channel carrying the JSON wire form, e.g. towards a websocket writer
impl MessageChannel for mpsc::UnboundedSender<String> {
    fn send(&self, request: QueryRequest) -> Result<()> {
        let text = request.to_json()?;
        mpsc::UnboundedSender::send(self, text)
            .map_err(|_| Error::ChannelClosed(format!("{} not delivered", request.message_type())))
    }
}
