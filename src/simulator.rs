//! Simulator lifecycle.
//!
//! A [`Simulator`] owns one transport, one worker per PD publisher and MD
//! sender, and a background poll loop. [`Simulator::run`] blocks the calling
//! thread until [`Simulator::stop`] is called from anywhere else, then tears
//! everything down on that same thread.

use log::{debug, error, info, warn};
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::config::{EndpointKind, PayloadFormat, PayloadSpec, SimulatorConfig, ValidationError};
use crate::logging::{self, LoggingError};
use crate::metrics::{RuntimeMetrics, Snapshot};
use crate::payload::{self, to_hex, PayloadError};
use crate::transport::{MdHandler, MdMessage, PdHandler, PdMessage, Transport, TransportError};
use crate::worker::{CyclicTask, MdSenderWorker, PdPublisherWorker, WorkerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatorState {
    Idle,
    Initializing,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl fmt::Display for SimulatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SimulatorState::Idle => "Idle",
            SimulatorState::Initializing => "Initializing",
            SimulatorState::Running => "Running",
            SimulatorState::Stopping => "Stopping",
            SimulatorState::Stopped => "Stopped",
            SimulatorState::Failed => "Failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SimulatorError {
    #[error("Cannot run while the simulator is {0}")]
    InvalidState(SimulatorState),

    #[error("No {kind} named '{name}' is configured")]
    UnknownEndpoint { kind: EndpointKind, name: String },

    #[error("{kind} '{name}' is not running")]
    NotRunning { kind: EndpointKind, name: String },

    #[error("Invalid configuration: {0}")]
    Config(#[from] ValidationError),

    #[error("Invalid reply payload for MD listener '{name}': {source}")]
    ReplyPayload {
        name: String,
        #[source]
        source: PayloadError,
    },

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Logging(#[from] LoggingError),
}

/// One live payload, as listed by [`Simulator::payloads`]
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PayloadOverview {
    pub name: String,
    pub kind: EndpointKind,
    pub spec: PayloadSpec,
    pub hex: String,
}

struct Lifecycle {
    state: SimulatorState,
    stop_requested: bool,
}

#[derive(Default)]
struct Workers {
    pd_publishers: Vec<Arc<PdPublisherWorker>>,
    md_senders: Vec<Arc<MdSenderWorker>>,
    /// Reply bytes resolved at registration, keyed by listener name
    auto_replies: Vec<(String, Arc<[u8]>)>,
}

pub struct Simulator {
    config: SimulatorConfig,
    transport: Arc<dyn Transport>,
    metrics: Arc<RuntimeMetrics>,
    lifecycle: Mutex<Lifecycle>,
    wake: Condvar,
    workers: Mutex<Workers>,
    poll_task: CyclicTask,
}

impl Simulator {
    pub fn new(config: SimulatorConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            transport,
            metrics: Arc::new(RuntimeMetrics::new()),
            lifecycle: Mutex::new(Lifecycle {
                state: SimulatorState::Idle,
                stop_requested: false,
            }),
            wake: Condvar::new(),
            workers: Mutex::new(Workers::default()),
            poll_task: CyclicTask::new("transport-poll"),
        }
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn workers(&self) -> MutexGuard<'_, Workers> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> SimulatorState {
        self.lifecycle().state
    }

    pub fn metrics(&self) -> Arc<RuntimeMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn metrics_snapshot(&self) -> Snapshot {
        self.metrics.snapshot()
    }

    /// Start every endpoint and block until [`Simulator::stop`] is called.
    ///
    /// Allowed from Idle, Stopped or Failed. An initialization failure tears
    /// down whatever was started, leaves the simulator Failed and is returned.
    pub fn run(&self) -> Result<(), SimulatorError> {
        {
            let mut lifecycle = self.lifecycle();
            match lifecycle.state {
                SimulatorState::Idle | SimulatorState::Stopped | SimulatorState::Failed => {}
                other => return Err(SimulatorError::InvalidState(other)),
            }
            lifecycle.state = SimulatorState::Initializing;
            lifecycle.stop_requested = false;
        }

        if let Err(e) = self.start_up() {
            error!("Simulator initialization failed: {}", e);
            self.tear_down();
            self.metrics.set_simulator_running(false);
            self.metrics.set_adapter_status(false, format!("Failed: {}", e));
            self.lifecycle().state = SimulatorState::Failed;
            return Err(e);
        }

        {
            let mut lifecycle = self.lifecycle();
            lifecycle.state = SimulatorState::Running;
            self.metrics.set_simulator_running(true);
            info!(
                "Simulator running with {} endpoint(s)",
                self.config.endpoint_count()
            );
            while !lifecycle.stop_requested {
                lifecycle = self.wake.wait(lifecycle).unwrap_or_else(PoisonError::into_inner);
            }
            lifecycle.state = SimulatorState::Stopping;
        }

        info!("Stopping simulator");
        self.tear_down();
        self.metrics.set_simulator_running(false);
        self.metrics.set_adapter_status(false, "Stopped");
        self.lifecycle().state = SimulatorState::Stopped;
        info!("Simulator stopped");
        Ok(())
    }

    /// Ask a running simulator to stop. Never blocks; teardown happens on the
    /// thread inside [`Simulator::run`].
    pub fn stop(&self) {
        let mut lifecycle = self.lifecycle();
        match lifecycle.state {
            SimulatorState::Initializing | SimulatorState::Running if !lifecycle.stop_requested => {
                lifecycle.stop_requested = true;
                debug!("Stop requested while {}", lifecycle.state);
                self.wake.notify_all();
            }
            _ => {}
        }
    }

    fn start_up(&self) -> Result<(), SimulatorError> {
        self.config.validate()?;

        self.metrics.reset();
        self.seed_metrics();
        logging::init(&self.config.logging)?;

        info!("Initializing transport ({:?} backend)", self.config.network.backend);
        self.metrics.set_adapter_status(false, "Initializing");
        self.transport
            .initialize(&self.config.network, &self.config.logging)?;
        self.metrics.set_adapter_status(true, "Initialized");

        self.register_pd_subscribers()?;
        self.register_md_listeners()?;

        // Workers are stored before they start so a failing start still
        // stops the ones already running.
        {
            let mut workers = self.workers();
            for publisher in &self.config.pd_publishers {
                let worker = PdPublisherWorker::new(
                    publisher,
                    Arc::clone(&self.transport),
                    Arc::clone(&self.metrics),
                )?;
                workers.pd_publishers.push(Arc::new(worker));
            }
            for sender in &self.config.md_senders {
                let worker = MdSenderWorker::new(
                    sender,
                    Arc::clone(&self.transport),
                    Arc::clone(&self.metrics),
                )?;
                workers.md_senders.push(Arc::new(worker));
            }
        }

        let (pd_publishers, md_senders) = {
            let workers = self.workers();
            (workers.pd_publishers.clone(), workers.md_senders.clone())
        };
        for worker in &pd_publishers {
            worker.start()?;
        }
        for worker in &md_senders {
            worker.start()?;
        }

        self.start_poll_loop()?;
        self.metrics.set_adapter_status(true, "Running");
        Ok(())
    }

    fn seed_metrics(&self) {
        for p in &self.config.pd_publishers {
            self.metrics.seed(EndpointKind::PdPublisher, &p.name);
        }
        for s in &self.config.pd_subscribers {
            self.metrics.seed(EndpointKind::PdSubscriber, &s.name);
        }
        for s in &self.config.md_senders {
            self.metrics.seed(EndpointKind::MdSender, &s.name);
        }
        for l in &self.config.md_listeners {
            self.metrics.seed(EndpointKind::MdListener, &l.name);
        }
    }

    fn register_pd_subscribers(&self) -> Result<(), SimulatorError> {
        for subscriber in &self.config.pd_subscribers {
            let metrics = Arc::clone(&self.metrics);
            let name = subscriber.name.clone();
            let handler: PdHandler = Arc::new(move |message: &PdMessage| {
                metrics.record_pd_receive(&name);
                info!(
                    "PD subscriber '{}' received COMID {} from '{}' (seq {}) payload={}",
                    name,
                    message.com_id,
                    message.endpoint,
                    message.sequence_counter,
                    to_hex(&message.payload)
                );
            });
            self.transport.register_pd_subscriber(subscriber, handler)?;
        }
        Ok(())
    }

    fn register_md_listeners(&self) -> Result<(), SimulatorError> {
        for listener in &self.config.md_listeners {
            let reply: Option<Arc<[u8]>> = if listener.auto_reply {
                let bytes = payload::resolve(&listener.reply_payload).map_err(|source| {
                    SimulatorError::ReplyPayload {
                        name: listener.name.clone(),
                        source,
                    }
                })?;
                let bytes: Arc<[u8]> = bytes.into();
                self.workers()
                    .auto_replies
                    .push((listener.name.clone(), Arc::clone(&bytes)));
                Some(bytes)
            } else {
                None
            };

            // Weak so the transport's own tables never keep it alive
            let transport = Arc::downgrade(&self.transport);
            let metrics = Arc::clone(&self.metrics);
            let name = listener.name.clone();
            let handler: MdHandler = Arc::new(move |request: &MdMessage| {
                metrics.record_md_request_received(&name);
                info!(
                    "MD listener '{}' received COMID {} from '{}' payload={}",
                    name,
                    request.com_id,
                    request.endpoint,
                    to_hex(&request.payload)
                );

                let (Some(reply), Some(transport)) = (&reply, transport.upgrade()) else {
                    return;
                };
                match transport.send_md_reply(&name, request, reply) {
                    Ok(()) => {
                        metrics.record_md_reply_sent(&name);
                        debug!("MD listener '{}' sent automatic reply", name);
                    }
                    Err(e) => error!("MD listener '{}' failed to send reply: {}", name, e),
                }
            });
            self.transport.register_md_listener(listener, handler)?;
        }
        Ok(())
    }

    fn start_poll_loop(&self) -> Result<(), SimulatorError> {
        let transport = Arc::clone(&self.transport);
        let timeout = self.config.simulation.poll_interval;
        self.poll_task
            .start(Duration::ZERO, move || {
                if let Err(e) = transport.poll(timeout) {
                    warn!("Transport poll failed: {}", e);
                }
            })
            .map_err(|source| WorkerError::Spawn {
                name: self.poll_task.name().to_string(),
                source,
            })?;
        Ok(())
    }

    fn tear_down(&self) {
        let workers = std::mem::take(&mut *self.workers());
        for worker in &workers.pd_publishers {
            worker.stop();
        }
        for worker in &workers.md_senders {
            worker.stop();
        }
        if self.poll_task.stop() {
            debug!("Poll loop stopped");
        }
        self.transport.shutdown();
    }

    /// The loaded configuration, with the live payload of every running worker
    pub fn current_config(&self) -> SimulatorConfig {
        let mut config = self.config.clone();
        let workers = self.workers();
        for worker in &workers.pd_publishers {
            if let Some(p) = config.pd_publishers.iter_mut().find(|p| p.name == worker.name()) {
                p.payload = worker.payload_config();
            }
        }
        for worker in &workers.md_senders {
            if let Some(s) = config.md_senders.iter_mut().find(|s| s.name == worker.name()) {
                s.payload = worker.payload_config();
            }
        }
        config
    }

    /// Every payload the simulator sends.
    ///
    /// While running, the bytes come from the workers and the auto-reply
    /// buffers actually in use; otherwise the configuration is resolved.
    pub fn payloads(&self) -> Vec<PayloadOverview> {
        // Copy the live handles out so no file is read under the lock
        let (pd_publishers, md_senders, auto_replies) = {
            let workers = self.workers();
            (
                workers.pd_publishers.clone(),
                workers.md_senders.clone(),
                workers.auto_replies.clone(),
            )
        };

        let mut overview = Vec::new();
        for p in &self.config.pd_publishers {
            let live = pd_publishers
                .iter()
                .find(|w| w.name() == p.name)
                .map(|w| w.active_payload());
            overview.push(payload_overview(&p.name, EndpointKind::PdPublisher, &p.payload, live));
        }
        for s in &self.config.md_senders {
            let live = md_senders
                .iter()
                .find(|w| w.name() == s.name)
                .map(|w| w.active_payload());
            overview.push(payload_overview(&s.name, EndpointKind::MdSender, &s.payload, live));
        }
        for l in self.config.md_listeners.iter().filter(|l| l.auto_reply) {
            let live = auto_replies
                .iter()
                .find(|(name, _)| *name == l.name)
                .map(|(_, bytes)| (l.reply_payload.clone(), bytes.to_vec()));
            overview.push(payload_overview(
                &l.name,
                EndpointKind::MdListener,
                &l.reply_payload,
                live,
            ));
        }
        overview
    }

    /// Replace the payload of a running PD publisher
    pub fn set_pd_payload(
        &self,
        name: &str,
        format: PayloadFormat,
        value: &str,
    ) -> Result<(), SimulatorError> {
        let kind = EndpointKind::PdPublisher;
        if !self.config.pd_publishers.iter().any(|p| p.name == name) {
            return Err(SimulatorError::UnknownEndpoint { kind, name: name.to_string() });
        }
        let worker = self
            .workers()
            .pd_publishers
            .iter()
            .find(|w| w.name() == name)
            .cloned()
            .ok_or_else(|| SimulatorError::NotRunning { kind, name: name.to_string() })?;
        worker.update_payload(format, value)?;
        Ok(())
    }

    /// Replace the payload of a running MD sender
    pub fn set_md_payload(
        &self,
        name: &str,
        format: PayloadFormat,
        value: &str,
    ) -> Result<(), SimulatorError> {
        let kind = EndpointKind::MdSender;
        if !self.config.md_senders.iter().any(|s| s.name == name) {
            return Err(SimulatorError::UnknownEndpoint { kind, name: name.to_string() });
        }
        let worker = self
            .workers()
            .md_senders
            .iter()
            .find(|w| w.name() == name)
            .cloned()
            .ok_or_else(|| SimulatorError::NotRunning { kind, name: name.to_string() })?;
        worker.update_payload(format, value)?;
        Ok(())
    }
}

fn payload_overview(
    name: &str,
    kind: EndpointKind,
    configured: &PayloadSpec,
    live: Option<(PayloadSpec, Vec<u8>)>,
) -> PayloadOverview {
    let (spec, hex) = match live {
        Some((spec, bytes)) => (spec, to_hex(&bytes)),
        None => {
            let hex = match payload::resolve(configured) {
                Ok(bytes) => to_hex(&bytes),
                Err(e) => format!("<{}>", e),
            };
            (configured.clone(), hex)
        }
    };
    PayloadOverview {
        name: name.to_string(),
        kind,
        spec,
        hex,
    }
}
