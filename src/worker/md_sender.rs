//! MD sender worker.
//!
//! Sends the configured request every cycle, or exactly once at start when
//! the cycle time is 0. Replies are counted through the handler registered
//! with the transport.

use log::{debug, error, info};
use std::sync::Arc;
use std::time::Duration;

use super::{CyclicTask, PayloadSlot, WorkerError};
use crate::config::{MdSenderConfig, PayloadFormat, PayloadSpec};
use crate::metrics::RuntimeMetrics;
use crate::payload::to_hex;
use crate::transport::{MdHandler, MdMessage, Transport};

pub struct MdSenderWorker {
    config: MdSenderConfig,
    transport: Arc<dyn Transport>,
    metrics: Arc<RuntimeMetrics>,
    payload: Arc<PayloadSlot>,
    task: CyclicTask,
}

impl MdSenderWorker {
    /// Resolve the payload and register the sender and its reply handler
    pub fn new(
        config: &MdSenderConfig,
        transport: Arc<dyn Transport>,
        metrics: Arc<RuntimeMetrics>,
    ) -> Result<Self, WorkerError> {
        let payload = PayloadSlot::resolve(&config.name, &config.payload)?;

        let reply_metrics = Arc::clone(&metrics);
        let name = config.name.clone();
        let reply_handler: MdHandler = Arc::new(move |reply: &MdMessage| {
            reply_metrics.record_md_reply_received(&name);
            info!(
                "MD sender '{}' received reply from '{}' (COMID {}) payload={}",
                name,
                reply.endpoint,
                reply.com_id,
                to_hex(&reply.payload)
            );
        });

        transport
            .register_md_sender(config, Some(reply_handler))
            .map_err(|source| WorkerError::Registration {
                name: config.name.clone(),
                source,
            })?;

        Ok(Self {
            config: config.clone(),
            transport,
            metrics,
            payload: Arc::new(payload),
            task: CyclicTask::new(format!("md-{}", config.name)),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn is_running(&self) -> bool {
        self.task.is_running()
    }

    pub fn start(&self) -> Result<(), WorkerError> {
        if self.config.cycle_time_ms == 0 {
            info!("MD sender '{}' sending single request", self.config.name);
            send_cycle(&self.config.name, self.transport.as_ref(), &self.metrics, &self.payload);
            return Ok(());
        }

        let name = self.config.name.clone();
        let transport = Arc::clone(&self.transport);
        let metrics = Arc::clone(&self.metrics);
        let payload = Arc::clone(&self.payload);
        let interval = Duration::from_millis(u64::from(self.config.cycle_time_ms));

        let started = self
            .task
            .start(interval, move || send_cycle(&name, transport.as_ref(), &metrics, &payload))
            .map_err(|source| WorkerError::Spawn {
                name: self.config.name.clone(),
                source,
            })?;

        if started {
            info!(
                "Starting MD sender '{}' (COMID {}, every {} ms)",
                self.config.name, self.config.com_id, self.config.cycle_time_ms
            );
        }
        Ok(())
    }

    pub fn stop(&self) {
        if self.task.stop() {
            info!("Stopped MD sender '{}'", self.config.name);
        }
    }

    pub fn payload_config(&self) -> PayloadSpec {
        self.payload.spec()
    }

    pub fn payload(&self) -> Vec<u8> {
        self.payload.bytes().to_vec()
    }

    /// The active spec together with the bytes it resolved to
    pub fn active_payload(&self) -> (PayloadSpec, Vec<u8>) {
        let (spec, bytes) = self.payload.snapshot();
        (spec, bytes.to_vec())
    }

    pub fn update_payload(&self, format: PayloadFormat, value: &str) -> Result<(), WorkerError> {
        self.payload.replace(&self.config.name, format, value)?;
        info!("Updated payload of MD sender '{}' ({})", self.config.name, format);
        Ok(())
    }
}

fn send_cycle(
    name: &str,
    transport: &dyn Transport,
    metrics: &RuntimeMetrics,
    payload: &PayloadSlot,
) {
    let bytes = payload.bytes();
    match transport.send_md_request(name, &bytes) {
        Ok(()) => {
            metrics.record_md_request_sent(name);
            debug!("MD sender '{}' sent {} bytes", name, bytes.len());
        }
        Err(e) => error!("MD request failed for '{}': {}", name, e),
    }
}
