//! HTTP API handlers: node state as JSON, plus a few control actions.

pub mod altlocs;
pub mod filter;
pub mod status;

use std::sync::Arc;
use std::time::Instant;

use peerwire_services::{
    AltLocManager, HostPool, MessageRouter, PushProxyRegistry, PushRequester, SpamServices,
    UdpReplyHandlerCache, UploadSlots,
};

#[derive(Clone)]
pub struct ApiState {
    pub reply_cache: Arc<UdpReplyHandlerCache>,
    pub router: Arc<MessageRouter>,
    pub altlocs: Arc<AltLocManager>,
    pub proxies: Arc<PushProxyRegistry>,
    pub pusher: Arc<PushRequester>,
    pub spam: Arc<SpamServices>,
    pub uploads: UploadSlots,
    pub hosts: Arc<HostPool>,
    pub started_at: Instant,
}
