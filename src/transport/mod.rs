//! Transport contract shared by every protocol backend.
//!
//! The simulator only talks to the network through [`Transport`]. The
//! built-in [`LoopbackTransport`] emulates the wire in memory; a binding to a
//! real TRDP stack implements the same trait outside this crate.

pub mod loopback;

use std::sync::Arc;
use std::time::Duration;

use crate::config::{
    Backend, EndpointKind, LoggingConfig, MdListenerConfig, MdSenderConfig, NetworkConfig,
    PdPublisherConfig, PdSubscriberConfig,
};

pub use loopback::LoopbackTransport;

/// Size of an MD session identifier in bytes
pub const SESSION_ID_SIZE: usize = 16;

/// Opaque correlator between an MD request and its reply
pub type SessionId = [u8; SESSION_ID_SIZE];

/// A delivered PD sample
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdMessage {
    pub endpoint: String,
    pub com_id: u32,
    pub payload: Vec<u8>,
    pub sequence_counter: u64,
}

/// A delivered MD request or reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MdMessage {
    pub endpoint: String,
    pub com_id: u32,
    pub payload: Vec<u8>,
    pub session_id: SessionId,
}

pub type PdHandler = Arc<dyn Fn(&PdMessage) + Send + Sync>;
pub type MdHandler = Arc<dyn Fn(&MdMessage) + Send + Sync>;

/// Errors reported by a transport backend
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Transport is not initialized")]
    NotInitialized,

    #[error("Invalid address '{address}' for {context}")]
    InvalidAddress { context: String, address: String },

    #[error("{kind} '{name}' is already registered")]
    DuplicateEndpoint { kind: EndpointKind, name: String },

    #[error("Unknown {kind} '{name}'")]
    UnknownEndpoint { kind: EndpointKind, name: String },

    #[error("Transport backend error: {0}")]
    Backend(String),
}

/// Capability set every protocol backend provides
///
/// Handlers may be invoked on the thread that triggered delivery or on a
/// backend-owned thread, and may call back into the transport.
pub trait Transport: Send + Sync {
    /// Prepare backend state for the given network
    fn initialize(
        &self,
        network: &NetworkConfig,
        logging: &LoggingConfig,
    ) -> Result<(), TransportError>;

    /// Drop every registration and pending session. Safe to call repeatedly.
    fn shutdown(&self);

    fn register_pd_publisher(&self, config: &PdPublisherConfig) -> Result<(), TransportError>;

    fn register_pd_subscriber(
        &self,
        config: &PdSubscriberConfig,
        handler: PdHandler,
    ) -> Result<(), TransportError>;

    fn publish_pd(&self, publisher_name: &str, data: &[u8]) -> Result<(), TransportError>;

    /// The reply handler fires at most once per request
    fn register_md_sender(
        &self,
        config: &MdSenderConfig,
        reply_handler: Option<MdHandler>,
    ) -> Result<(), TransportError>;

    fn send_md_request(&self, sender_name: &str, data: &[u8]) -> Result<(), TransportError>;

    fn register_md_listener(
        &self,
        config: &MdListenerConfig,
        request_handler: MdHandler,
    ) -> Result<(), TransportError>;

    /// Reply to a delivered request. Replies to a closed session are dropped.
    fn send_md_reply(
        &self,
        listener_name: &str,
        request: &MdMessage,
        data: &[u8],
    ) -> Result<(), TransportError>;

    /// Cooperative pump; must return within `timeout`
    fn poll(&self, timeout: Duration) -> Result<(), TransportError>;
}

/// Build the transport backend named in the network configuration
pub fn create_transport(backend: Backend) -> Arc<dyn Transport> {
    match backend {
        Backend::Loopback => Arc::new(LoopbackTransport::new()),
    }
}

/// Encode a numeric session counter into the trailing bytes of a session id
pub fn session_id_from_counter(counter: u64) -> SessionId {
    let mut id = [0u8; SESSION_ID_SIZE];
    id[SESSION_ID_SIZE - 8..].copy_from_slice(&counter.to_be_bytes());
    id
}
