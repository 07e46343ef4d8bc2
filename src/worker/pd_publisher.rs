//! PD publisher worker.

use log::{debug, error, info};
use std::sync::Arc;
use std::time::Duration;

use super::{CyclicTask, PayloadSlot, WorkerError};
use crate::config::{PayloadFormat, PayloadSpec, PdPublisherConfig};
use crate::metrics::RuntimeMetrics;
use crate::transport::Transport;

/// Publishes one PD dataset every cycle
pub struct PdPublisherWorker {
    config: PdPublisherConfig,
    transport: Arc<dyn Transport>,
    metrics: Arc<RuntimeMetrics>,
    payload: Arc<PayloadSlot>,
    task: CyclicTask,
}

impl PdPublisherWorker {
    /// Resolve the payload and register the publisher with the transport
    pub fn new(
        config: &PdPublisherConfig,
        transport: Arc<dyn Transport>,
        metrics: Arc<RuntimeMetrics>,
    ) -> Result<Self, WorkerError> {
        let payload = PayloadSlot::resolve(&config.name, &config.payload)?;
        transport
            .register_pd_publisher(config)
            .map_err(|source| WorkerError::Registration {
                name: config.name.clone(),
                source,
            })?;

        Ok(Self {
            config: config.clone(),
            transport,
            metrics,
            payload: Arc::new(payload),
            task: CyclicTask::new(format!("pd-{}", config.name)),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn is_running(&self) -> bool {
        self.task.is_running()
    }

    pub fn start(&self) -> Result<(), WorkerError> {
        let name = self.config.name.clone();
        let transport = Arc::clone(&self.transport);
        let metrics = Arc::clone(&self.metrics);
        let payload = Arc::clone(&self.payload);
        let interval = Duration::from_millis(u64::from(self.config.cycle_time_ms));

        let started = self
            .task
            .start(interval, move || publish_cycle(&name, transport.as_ref(), &metrics, &payload))
            .map_err(|source| WorkerError::Spawn {
                name: self.config.name.clone(),
                source,
            })?;

        if started {
            info!(
                "Starting PD publisher '{}' (COMID {}, every {} ms)",
                self.config.name, self.config.com_id, self.config.cycle_time_ms
            );
        }
        Ok(())
    }

    pub fn stop(&self) {
        if self.task.stop() {
            info!("Stopped PD publisher '{}'", self.config.name);
        }
    }

    pub fn payload_config(&self) -> PayloadSpec {
        self.payload.spec()
    }

    /// Current payload bytes
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
        info!("Updated payload of PD publisher '{}' ({})", self.config.name, format);
        Ok(())
    }
}

fn publish_cycle(
    name: &str,
    transport: &dyn Transport,
    metrics: &RuntimeMetrics,
    payload: &PayloadSlot,
) {
    let bytes = payload.bytes();
    match transport.publish_pd(name, &bytes) {
        Ok(()) => {
            metrics.record_pd_publish(name);
            debug!("PD publisher '{}' sent {} bytes", name, bytes.len());
        }
        Err(e) => error!("PD publish failed for '{}': {}", name, e),
    }
}
