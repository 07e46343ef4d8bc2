//! Cyclic workers: one periodic thread per PD publisher and per MD sender.

pub mod md_sender;
pub mod pd_publisher;
pub mod task;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::{PayloadFormat, PayloadSpec};
use crate::payload::{self, PayloadError};
use crate::transport::TransportError;

pub use md_sender::MdSenderWorker;
pub use pd_publisher::PdPublisherWorker;
pub use task::CyclicTask;

/// Errors raised while constructing or driving a worker
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Invalid payload for '{name}': {source}")]
    Payload {
        name: String,
        #[source]
        source: PayloadError,
    },

    #[error("Registration of '{name}' failed: {source}")]
    Registration {
        name: String,
        #[source]
        source: TransportError,
    },

    #[error("Unable to spawn worker thread for '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// The payload a worker currently sends, spec and bytes always in step
struct ActivePayload {
    spec: PayloadSpec,
    bytes: Arc<[u8]>,
}

/// Payload slot guarded by its own lock, separate from any simulator state
pub(crate) struct PayloadSlot {
    active: Mutex<ActivePayload>,
}

impl PayloadSlot {
    pub(crate) fn resolve(name: &str, spec: &PayloadSpec) -> Result<Self, WorkerError> {
        let bytes = payload::resolve(spec).map_err(|source| WorkerError::Payload {
            name: name.to_string(),
            source,
        })?;
        Ok(Self {
            active: Mutex::new(ActivePayload {
                spec: spec.clone(),
                bytes: bytes.into(),
            }),
        })
    }

    fn active(&self) -> MutexGuard<'_, ActivePayload> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Shared handle to the current bytes; never observes a half-applied update
    pub(crate) fn bytes(&self) -> Arc<[u8]> {
        Arc::clone(&self.active().bytes)
    }

    pub(crate) fn spec(&self) -> PayloadSpec {
        self.active().spec.clone()
    }

    /// Spec and bytes read under one lock acquisition
    pub(crate) fn snapshot(&self) -> (PayloadSpec, Arc<[u8]>) {
        let active = self.active();
        (active.spec.clone(), Arc::clone(&active.bytes))
    }

    /// Parse outside the lock, then swap spec and bytes together
    pub(crate) fn replace(
        &self,
        name: &str,
        format: PayloadFormat,
        value: &str,
    ) -> Result<(), WorkerError> {
        let spec = PayloadSpec::new(format, value);
        let bytes = payload::resolve(&spec).map_err(|source| WorkerError::Payload {
            name: name.to_string(),
            source,
        })?;

        let mut active = self.active();
        active.spec = spec;
        active.bytes = bytes.into();
        Ok(())
    }
}
