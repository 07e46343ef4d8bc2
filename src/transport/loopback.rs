//! In-process loopback transport.
//!
//! Reproduces the delivery rules of the real protocol stack without any
//! network: PD publishes fan out to every subscriber whose ComId and address
//! filters match, MD requests reach every matching listener, and replies are
//! routed back to the requester through a pending-session table keyed by
//! session id. Delivery is synchronous and follows registration order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info};

use super::{
    session_id_from_counter, MdHandler, MdMessage, PdHandler, PdMessage, SessionId, Transport,
    TransportError,
};
use crate::config::{
    is_valid_optional_ip, EndpointKind, LoggingConfig, MdListenerConfig, MdSenderConfig,
    NetworkConfig, PdPublisherConfig, PdSubscriberConfig,
};

/// Endpoint label used for synthetic replies when the sender has no destination
const LOOPBACK_LISTENER: &str = "loopback-listener";

struct PublisherState {
    config: PdPublisherConfig,
    sequence_counter: u64,
}

struct SubscriberState {
    config: PdSubscriberConfig,
    handler: PdHandler,
}

struct SenderState {
    config: MdSenderConfig,
    reply_handler: Option<MdHandler>,
}

struct ListenerState {
    config: MdListenerConfig,
    handler: MdHandler,
}

struct PendingSession {
    sender_name: String,
    reply_handler: MdHandler,
    reply_com_id: u32,
    deadline: Option<Instant>,
}

#[derive(Default)]
struct Tables {
    initialized: bool,
    pd_publishers: HashMap<String, PublisherState>,
    pd_subscribers: Vec<SubscriberState>,
    md_senders: HashMap<String, SenderState>,
    md_listeners: Vec<ListenerState>,
    sessions: HashMap<SessionId, PendingSession>,
}

/// Simulated wire shared by every endpoint of one process
pub struct LoopbackTransport {
    tables: Mutex<Tables>,
    // Lives outside `tables` so ids stay unique across shutdown/initialize
    next_session: AtomicU64,
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            next_session: AtomicU64::new(1),
        }
    }

    /// Number of MD requests still waiting for a reply
    pub fn pending_sessions(&self) -> usize {
        self.tables().sessions.len()
    }

    pub fn is_initialized(&self) -> bool {
        self.tables().initialized
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn initialized_tables(&self) -> Result<MutexGuard<'_, Tables>, TransportError> {
        let tables = self.tables();
        if !tables.initialized {
            return Err(TransportError::NotInitialized);
        }
        Ok(tables)
    }

    fn check_addresses(
        kind: EndpointKind,
        name: &str,
        source_ip: &str,
        dest_ip: &str,
    ) -> Result<(), TransportError> {
        for (field, address) in [("source_ip", source_ip), ("dest_ip", dest_ip)] {
            if !is_valid_optional_ip(address) {
                return Err(TransportError::InvalidAddress {
                    context: format!("{} '{}' {}", kind, name, field),
                    address: address.to_string(),
                });
            }
        }
        Ok(())
    }

    fn next_session_id(&self) -> SessionId {
        session_id_from_counter(self.next_session.fetch_add(1, Ordering::Relaxed))
    }
}

/// Empty strings on either side act as wildcards
fn addresses_match(left: &str, right: &str) -> bool {
    left.is_empty() || right.is_empty() || left == right
}

fn matches_pd_subscription(subscriber: &PdSubscriberConfig, publisher: &PdPublisherConfig) -> bool {
    if subscriber.com_id_filter && subscriber.com_id != 0 && subscriber.com_id != publisher.com_id {
        return false;
    }
    addresses_match(&subscriber.source_ip, &publisher.dest_ip)
        && addresses_match(&subscriber.dest_ip, &publisher.source_ip)
}

fn matches_md_listener(listener: &MdListenerConfig, sender: &MdSenderConfig) -> bool {
    if listener.com_id != 0 && listener.com_id != sender.com_id {
        return false;
    }
    addresses_match(&listener.dest_ip, &sender.dest_ip)
        && addresses_match(&listener.source_ip, &sender.source_ip)
}

fn endpoint_label(name: &str, ip: &str) -> String {
    if ip.is_empty() {
        name.to_string()
    } else {
        ip.to_string()
    }
}

impl Transport for LoopbackTransport {
    fn initialize(
        &self,
        network: &NetworkConfig,
        _logging: &LoggingConfig,
    ) -> Result<(), TransportError> {
        let network_ips = [("host_ip", &network.host_ip), ("gateway_ip", &network.gateway_ip)];
        for (field, address) in network_ips {
            if !is_valid_optional_ip(address) {
                return Err(TransportError::InvalidAddress {
                    context: format!("network {}", field),
                    address: address.clone(),
                });
            }
        }

        self.tables().initialized = true;
        info!(
            "Loopback transport initialized (interface '{}', host '{}')",
            network.interface, network.host_ip
        );
        Ok(())
    }

    fn shutdown(&self) {
        let mut tables = self.tables();
        let was_initialized = tables.initialized;
        *tables = Tables::default();
        drop(tables);

        if was_initialized {
            info!("Loopback transport shut down");
        }
    }

    fn register_pd_publisher(&self, config: &PdPublisherConfig) -> Result<(), TransportError> {
        Self::check_addresses(
            EndpointKind::PdPublisher,
            &config.name,
            &config.source_ip,
            &config.dest_ip,
        )?;
        let mut tables = self.initialized_tables()?;
        if tables.pd_publishers.contains_key(&config.name) {
            return Err(TransportError::DuplicateEndpoint {
                kind: EndpointKind::PdPublisher,
                name: config.name.clone(),
            });
        }
        tables.pd_publishers.insert(
            config.name.clone(),
            PublisherState {
                config: config.clone(),
                sequence_counter: 0,
            },
        );
        Ok(())
    }

    fn register_pd_subscriber(
        &self,
        config: &PdSubscriberConfig,
        handler: PdHandler,
    ) -> Result<(), TransportError> {
        Self::check_addresses(
            EndpointKind::PdSubscriber,
            &config.name,
            &config.source_ip,
            &config.dest_ip,
        )?;
        let mut tables = self.initialized_tables()?;
        if tables.pd_subscribers.iter().any(|s| s.config.name == config.name) {
            return Err(TransportError::DuplicateEndpoint {
                kind: EndpointKind::PdSubscriber,
                name: config.name.clone(),
            });
        }
        tables.pd_subscribers.push(SubscriberState {
            config: config.clone(),
            handler,
        });
        Ok(())
    }

    fn publish_pd(&self, publisher_name: &str, data: &[u8]) -> Result<(), TransportError> {
        let (message, targets) = {
            let mut tables = self.tables();
            let tables = &mut *tables;
            let publisher = tables
                .pd_publishers
                .get_mut(publisher_name)
                .ok_or_else(|| TransportError::UnknownEndpoint {
                    kind: EndpointKind::PdPublisher,
                    name: publisher_name.to_string(),
                })?;
            publisher.sequence_counter += 1;

            let targets: Vec<PdHandler> = tables
                .pd_subscribers
                .iter()
                .filter(|subscriber| matches_pd_subscription(&subscriber.config, &publisher.config))
                .map(|subscriber| Arc::clone(&subscriber.handler))
                .collect();

            let message = PdMessage {
                endpoint: endpoint_label(publisher_name, &publisher.config.source_ip),
                com_id: publisher.config.com_id,
                payload: data.to_vec(),
                sequence_counter: publisher.sequence_counter,
            };
            (message, targets)
        };

        for handler in &targets {
            handler(&message);
        }
        Ok(())
    }

    fn register_md_sender(
        &self,
        config: &MdSenderConfig,
        reply_handler: Option<MdHandler>,
    ) -> Result<(), TransportError> {
        Self::check_addresses(
            EndpointKind::MdSender,
            &config.name,
            &config.source_ip,
            &config.dest_ip,
        )?;
        let mut tables = self.initialized_tables()?;
        if tables.md_senders.contains_key(&config.name) {
            return Err(TransportError::DuplicateEndpoint {
                kind: EndpointKind::MdSender,
                name: config.name.clone(),
            });
        }
        tables.md_senders.insert(
            config.name.clone(),
            SenderState {
                config: config.clone(),
                reply_handler,
            },
        );
        Ok(())
    }

    fn send_md_request(&self, sender_name: &str, data: &[u8]) -> Result<(), TransportError> {
        let session_id = self.next_session_id();

        let (sender, request, listeners) = {
            let mut tables = self.tables();
            let tables = &mut *tables;
            let state = tables
                .md_senders
                .get(sender_name)
                .ok_or_else(|| TransportError::UnknownEndpoint {
                    kind: EndpointKind::MdSender,
                    name: sender_name.to_string(),
                })?;
            let sender = state.config.clone();

            if let Some(reply_handler) = &state.reply_handler {
                let timeout = Duration::from_millis(u64::from(sender.reply_timeout_ms));
                let deadline = (sender.reply_timeout_ms > 0).then(|| Instant::now() + timeout);
                let reply_com_id = if sender.reply_com_id == 0 {
                    sender.com_id
                } else {
                    sender.reply_com_id
                };
                tables.sessions.insert(
                    session_id,
                    PendingSession {
                        sender_name: sender_name.to_string(),
                        reply_handler: Arc::clone(reply_handler),
                        reply_com_id,
                        deadline,
                    },
                );
            }

            let listeners: Vec<MdHandler> = tables
                .md_listeners
                .iter()
                .filter(|listener| matches_md_listener(&listener.config, &sender))
                .map(|listener| Arc::clone(&listener.handler))
                .collect();

            let request = MdMessage {
                endpoint: endpoint_label(sender_name, &sender.source_ip),
                com_id: sender.com_id,
                payload: data.to_vec(),
                session_id,
            };
            (sender, request, listeners)
        };

        if listeners.is_empty() {
            debug!(
                "MD request from '{}' (COMID {}) matched no listener",
                sender_name, sender.com_id
            );
        }
        for handler in &listeners {
            handler(&request);
        }

        if !sender.expect_reply {
            // A listener may already have consumed the session with a real reply
            let pending = self.tables().sessions.remove(&session_id);
            if let Some(pending) = pending {
                let reply = MdMessage {
                    endpoint: endpoint_label(LOOPBACK_LISTENER, &sender.dest_ip),
                    com_id: pending.reply_com_id,
                    payload: Vec::new(),
                    session_id,
                };
                (pending.reply_handler)(&reply);
            }
        }
        Ok(())
    }

    fn register_md_listener(
        &self,
        config: &MdListenerConfig,
        request_handler: MdHandler,
    ) -> Result<(), TransportError> {
        Self::check_addresses(
            EndpointKind::MdListener,
            &config.name,
            &config.source_ip,
            &config.dest_ip,
        )?;
        let mut tables = self.initialized_tables()?;
        if tables.md_listeners.iter().any(|l| l.config.name == config.name) {
            return Err(TransportError::DuplicateEndpoint {
                kind: EndpointKind::MdListener,
                name: config.name.clone(),
            });
        }
        tables.md_listeners.push(ListenerState {
            config: config.clone(),
            handler: request_handler,
        });
        Ok(())
    }

    fn send_md_reply(
        &self,
        listener_name: &str,
        request: &MdMessage,
        data: &[u8],
    ) -> Result<(), TransportError> {
        let (pending, listener_ip) = {
            let mut tables = self.tables();
            let Some(pending) = tables.sessions.remove(&request.session_id) else {
                debug!("MD listener '{}' replied to a closed session; dropped", listener_name);
                return Ok(());
            };
            let listener_ip = tables
                .md_listeners
                .iter()
                .find(|l| l.config.name == listener_name)
                .map(|l| l.config.source_ip.clone())
                .unwrap_or_default();
            (pending, listener_ip)
        };

        let reply = MdMessage {
            endpoint: endpoint_label(listener_name, &listener_ip),
            com_id: pending.reply_com_id,
            payload: data.to_vec(),
            session_id: request.session_id,
        };
        (pending.reply_handler)(&reply);
        Ok(())
    }

    fn poll(&self, timeout: Duration) -> Result<(), TransportError> {
        let now = Instant::now();
        let expired: Vec<String> = {
            let mut tables = self.tables();
            let mut expired = Vec::new();
            tables.sessions.retain(|_, session| match session.deadline {
                Some(deadline) if deadline <= now => {
                    expired.push(session.sender_name.clone());
                    false
                }
                _ => true,
            });
            expired
        };

        for sender in &expired {
            debug!("MD request from '{}' timed out waiting for a reply", sender);
        }

        thread::sleep(timeout.saturating_sub(now.elapsed()));
        Ok(())
    }
}
