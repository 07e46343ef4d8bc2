use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use crate::payload;

/// Default interval handed to `Transport::poll` by the simulator's poll loop
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// The four endpoint categories of the simulated network
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    PdPublisher,
    PdSubscriber,
    MdSender,
    MdListener,
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EndpointKind::PdPublisher => "PD publisher",
            EndpointKind::PdSubscriber => "PD subscriber",
            EndpointKind::MdSender => "MD sender",
            EndpointKind::MdListener => "MD listener",
        };
        f.write_str(label)
    }
}

/// Transport backend selected at startup
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// In-process simulated wire
    #[default]
    Loopback,
}

/// Log verbosity, ordered from quietest to noisiest
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
}

impl LogLevel {
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" | "trace" => Ok(LogLevel::Debug),
            other => Err(format!("Unknown log level: {}", other)),
        }
    }
}

/// How a payload value is turned into bytes
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    /// Hexadecimal digits, whitespace ignored
    #[default]
    Hex,
    /// UTF-8 text used verbatim
    Text,
    /// Path to a file read at resolution time
    File,
}

impl fmt::Display for PayloadFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PayloadFormat::Hex => "hex",
            PayloadFormat::Text => "text",
            PayloadFormat::File => "file",
        };
        f.write_str(label)
    }
}

impl std::str::FromStr for PayloadFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "hex" => Ok(PayloadFormat::Hex),
            "text" => Ok(PayloadFormat::Text),
            "file" => Ok(PayloadFormat::File),
            other => Err(format!("Unknown payload format: {}", other)),
        }
    }
}

/// Payload source of a publisher, sender or auto-replying listener
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct PayloadSpec {
    #[serde(default)]
    pub format: PayloadFormat,
    #[serde(default)]
    pub value: String,
}

impl PayloadSpec {
    pub fn new(format: PayloadFormat, value: impl Into<String>) -> Self {
        Self {
            format,
            value: value.into(),
        }
    }

    pub fn hex(value: impl Into<String>) -> Self {
        Self::new(PayloadFormat::Hex, value)
    }

    pub fn text(value: impl Into<String>) -> Self {
        Self::new(PayloadFormat::Text, value)
    }
}

/// Local network interface settings
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    #[serde(default)]
    pub interface: String,
    #[serde(default)]
    pub host_ip: String,
    #[serde(default)]
    pub gateway_ip: String,
    #[serde(default)]
    pub vlan_id: u16,
    #[serde(default = "default_ttl")]
    pub ttl: u8,
    #[serde(default)]
    pub backend: Backend,
}

fn default_ttl() -> u8 {
    64
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            interface: String::new(),
            host_ip: String::new(),
            gateway_ip: String::new(),
            vlan_id: 0,
            ttl: default_ttl(),
            backend: Backend::Loopback,
        }
    }
}

/// Log sink settings
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    #[serde(default = "default_true")]
    pub console: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default)]
    pub level: LogLevel,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            console: true,
            file: None,
            level: LogLevel::Info,
        }
    }
}

/// Simulator timing settings
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SimulationConfig {
    #[serde(with = "humantime_serde", default = "default_poll_interval")]
    pub poll_interval: Duration,
}

fn default_poll_interval() -> Duration {
    DEFAULT_POLL_INTERVAL
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_pd_cycle_time_ms() -> u32 {
    1000
}

fn default_reply_timeout_ms() -> u32 {
    1000
}

/// Periodic PD broadcaster
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PdPublisherConfig {
    pub name: String,
    #[serde(default)]
    pub com_id: u32,
    #[serde(default)]
    pub dataset_id: u32,
    #[serde(default)]
    pub etb_topo_count: u16,
    #[serde(default)]
    pub op_trn_topo_count: u16,
    #[serde(default)]
    pub source_ip: String,
    #[serde(default)]
    pub dest_ip: String,
    #[serde(default = "default_pd_cycle_time_ms")]
    pub cycle_time_ms: u32,
    #[serde(default)]
    pub redundancy_group: u32,
    #[serde(default)]
    pub use_sequence_counter: bool,
    #[serde(default)]
    pub payload: PayloadSpec,
}

/// PD receiver
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PdSubscriberConfig {
    pub name: String,
    #[serde(default)]
    pub com_id: u32,
    #[serde(default)]
    pub etb_topo_count: u16,
    #[serde(default)]
    pub op_trn_topo_count: u16,
    #[serde(default)]
    pub source_ip: String,
    #[serde(default)]
    pub dest_ip: String,
    #[serde(default)]
    pub timeout_ms: u32,
    #[serde(default = "default_true")]
    pub com_id_filter: bool,
}

/// MD requester
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct MdSenderConfig {
    pub name: String,
    #[serde(default)]
    pub com_id: u32,
    #[serde(default)]
    pub reply_com_id: u32,
    #[serde(default)]
    pub source_ip: String,
    #[serde(default)]
    pub dest_ip: String,
    /// 0 sends a single request at start
    #[serde(default)]
    pub cycle_time_ms: u32,
    /// 0 keeps the pending session until a reply or shutdown
    #[serde(default = "default_reply_timeout_ms")]
    pub reply_timeout_ms: u32,
    #[serde(default)]
    pub expect_reply: bool,
    #[serde(default)]
    pub payload: PayloadSpec,
}

/// MD responder
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct MdListenerConfig {
    pub name: String,
    #[serde(default)]
    pub com_id: u32,
    #[serde(default)]
    pub source_ip: String,
    #[serde(default)]
    pub dest_ip: String,
    #[serde(default)]
    pub auto_reply: bool,
    #[serde(default)]
    pub reply_payload: PayloadSpec,
}

/// Complete simulator configuration
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct SimulatorConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub pd_publishers: Vec<PdPublisherConfig>,
    #[serde(default)]
    pub pd_subscribers: Vec<PdSubscriberConfig>,
    #[serde(default)]
    pub md_senders: Vec<MdSenderConfig>,
    #[serde(default)]
    pub md_listeners: Vec<MdListenerConfig>,
}

impl SimulatorConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        // Validate network settings
        let network_ips = [
            ("host_ip", &self.network.host_ip),
            ("gateway_ip", &self.network.gateway_ip),
        ];
        for (field, value) in network_ips {
            if !is_valid_optional_ip(value) {
                return Err(ValidationError::InvalidNetwork(format!(
                    "{} '{}' is not a valid IP address",
                    field, value
                )));
            }
        }

        if self.simulation.poll_interval.is_zero() {
            return Err(ValidationError::InvalidSimulation(
                "poll_interval must be greater than 0".to_string(),
            ));
        }

        Self::validate_names(
            EndpointKind::PdPublisher,
            self.pd_publishers.iter().map(|p| p.name.as_str()),
        )?;
        Self::validate_names(
            EndpointKind::PdSubscriber,
            self.pd_subscribers.iter().map(|s| s.name.as_str()),
        )?;
        Self::validate_names(
            EndpointKind::MdSender,
            self.md_senders.iter().map(|s| s.name.as_str()),
        )?;
        Self::validate_names(
            EndpointKind::MdListener,
            self.md_listeners.iter().map(|l| l.name.as_str()),
        )?;

        for publisher in &self.pd_publishers {
            if publisher.cycle_time_ms == 0 {
                return Err(ValidationError::InvalidEndpoint {
                    kind: EndpointKind::PdPublisher,
                    name: publisher.name.clone(),
                    reason: "cycle_time_ms must be greater than 0".to_string(),
                });
            }
            Self::validate_addresses(
                EndpointKind::PdPublisher,
                &publisher.name,
                &publisher.source_ip,
                &publisher.dest_ip,
            )?;
            Self::validate_payload(
                EndpointKind::PdPublisher,
                &publisher.name,
                &publisher.payload,
            )?;
        }

        for subscriber in &self.pd_subscribers {
            Self::validate_addresses(
                EndpointKind::PdSubscriber,
                &subscriber.name,
                &subscriber.source_ip,
                &subscriber.dest_ip,
            )?;
        }

        for sender in &self.md_senders {
            // Without a timeout every unanswered cycle leaves a session behind
            if sender.cycle_time_ms > 0 && sender.expect_reply && sender.reply_timeout_ms == 0 {
                return Err(ValidationError::InvalidEndpoint {
                    kind: EndpointKind::MdSender,
                    name: sender.name.clone(),
                    reason: "reply_timeout_ms must be greater than 0 for a cyclic sender \
                             expecting replies"
                        .to_string(),
                });
            }
            Self::validate_addresses(
                EndpointKind::MdSender,
                &sender.name,
                &sender.source_ip,
                &sender.dest_ip,
            )?;
            Self::validate_payload(EndpointKind::MdSender, &sender.name, &sender.payload)?;
        }

        for listener in &self.md_listeners {
            Self::validate_addresses(
                EndpointKind::MdListener,
                &listener.name,
                &listener.source_ip,
                &listener.dest_ip,
            )?;
            if listener.auto_reply {
                Self::validate_payload(
                    EndpointKind::MdListener,
                    &listener.name,
                    &listener.reply_payload,
                )?;
            }
        }

        Ok(())
    }

    fn validate_names<'a>(
        kind: EndpointKind,
        names: impl Iterator<Item = &'a str>,
    ) -> Result<(), ValidationError> {
        let mut seen = HashSet::new();
        for name in names {
            if name.trim().is_empty() {
                return Err(ValidationError::InvalidEndpoint {
                    kind,
                    name: name.to_string(),
                    reason: "name cannot be empty".to_string(),
                });
            }
            if !seen.insert(name) {
                return Err(ValidationError::DuplicateName {
                    kind,
                    name: name.to_string(),
                });
            }
        }
        Ok(())
    }

    fn validate_addresses(
        kind: EndpointKind,
        name: &str,
        source_ip: &str,
        dest_ip: &str,
    ) -> Result<(), ValidationError> {
        for (field, value) in [("source_ip", source_ip), ("dest_ip", dest_ip)] {
            if !is_valid_optional_ip(value) {
                return Err(ValidationError::InvalidEndpoint {
                    kind,
                    name: name.to_string(),
                    reason: format!("{} '{}' is not a valid IP address", field, value),
                });
            }
        }
        Ok(())
    }

    /// Hex payloads are checked up front; file payloads are only read when
    /// the worker starts.
    fn validate_payload(
        kind: EndpointKind,
        name: &str,
        spec: &PayloadSpec,
    ) -> Result<(), ValidationError> {
        if spec.format == PayloadFormat::Hex {
            payload::parse_hex(&spec.value).map_err(|e| ValidationError::InvalidEndpoint {
                kind,
                name: name.to_string(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    /// Total number of configured endpoints across all categories
    pub fn endpoint_count(&self) -> usize {
        self.pd_publishers.len()
            + self.pd_subscribers.len()
            + self.md_senders.len()
            + self.md_listeners.len()
    }
}

/// Empty strings are wildcards and always valid
pub fn is_valid_optional_ip(value: &str) -> bool {
    value.is_empty() || value.parse::<IpAddr>().is_ok()
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid network configuration: {0}")]
    InvalidNetwork(String),
    #[error("Invalid simulation configuration: {0}")]
    InvalidSimulation(String),
    #[error("Duplicate {kind} name '{name}'")]
    DuplicateName { kind: EndpointKind, name: String },
    #[error("Invalid {kind} '{name}': {reason}")]
    InvalidEndpoint {
        kind: EndpointKind,
        name: String,
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn publisher(name: &str) -> PdPublisherConfig {
        PdPublisherConfig {
            name: name.to_string(),
            com_id: 1000,
            dataset_id: 0,
            etb_topo_count: 0,
            op_trn_topo_count: 0,
            source_ip: String::new(),
            dest_ip: "239.1.1.1".to_string(),
            cycle_time_ms: 100,
            redundancy_group: 0,
            use_sequence_counter: true,
            payload: PayloadSpec::hex("01 02"),
        }
    }

    #[test]
    fn test_full_config_parsing() {
        let yaml = r#"
network:
  interface: eth0
  host_ip: 10.0.0.1
  backend: loopback
logging:
  console: false
  level: debug
simulation:
  poll_interval: 250ms
pd_publishers:
  - name: door_status
    com_id: 1000
    dest_ip: 239.1.1.1
    cycle_time_ms: 50
    payload:
      format: hex
      value: "DE AD BE EF"
pd_subscribers:
  - name: door_monitor
    com_id: 1000
    source_ip: 239.1.1.1
md_senders:
  - name: diag_request
    com_id: 2000
    expect_reply: true
    payload:
      format: text
      value: ping
md_listeners:
  - name: diag_responder
    com_id: 2000
    auto_reply: true
    reply_payload:
      format: text
      value: pong
"#;

        let config: SimulatorConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.network.ttl, 64);
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert!(!config.logging.console);
        assert_eq!(config.simulation.poll_interval, Duration::from_millis(250));
        assert_eq!(config.pd_publishers[0].cycle_time_ms, 50);
        assert!(config.pd_subscribers[0].com_id_filter);
        assert_eq!(config.md_senders[0].reply_timeout_ms, 1000);
        assert_eq!(config.md_senders[0].cycle_time_ms, 0);
        assert_eq!(config.md_listeners[0].reply_payload, PayloadSpec::text("pong"));
        assert_eq!(config.endpoint_count(), 4);
    }

    #[test]
    fn test_defaults_for_empty_document() {
        let config: SimulatorConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.network.backend, Backend::Loopback);
        assert_eq!(config.simulation.poll_interval, DEFAULT_POLL_INTERVAL);
        assert!(config.logging.console);
        assert_eq!(config.endpoint_count(), 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_pd_cycle_time_rejected() {
        let mut config = SimulatorConfig::default();
        let mut p = publisher("door_status");
        p.cycle_time_ms = 0;
        config.pd_publishers.push(p);

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("cycle_time_ms"));
    }

    #[test]
    fn test_cyclic_sender_expecting_replies_needs_timeout() {
        let sender = MdSenderConfig {
            name: "diag_poll".to_string(),
            com_id: 2000,
            reply_com_id: 0,
            source_ip: String::new(),
            dest_ip: String::new(),
            cycle_time_ms: 100,
            reply_timeout_ms: 0,
            expect_reply: true,
            payload: PayloadSpec::text("STATUS?"),
        };
        let mut config = SimulatorConfig::default();
        config.md_senders.push(sender.clone());

        let err = config.validate().unwrap_err();
        assert!(matches!(err, ValidationError::InvalidEndpoint { .. }));
        assert!(err.to_string().contains("reply_timeout_ms"));

        // Each of these bounds the pending-session table on its own
        let fixes: [fn(&mut MdSenderConfig); 3] = [
            |s| s.reply_timeout_ms = 500,
            |s| s.cycle_time_ms = 0,
            |s| s.expect_reply = false,
        ];
        for fix in fixes {
            let mut sender = sender.clone();
            fix(&mut sender);
            config.md_senders = vec![sender];
            assert!(config.validate().is_ok());
        }
    }

    #[test]
    fn test_duplicate_names_rejected_per_category() {
        let mut config = SimulatorConfig::default();
        config.pd_publishers.push(publisher("same"));
        config.pd_publishers.push(publisher("same"));
        assert!(matches!(
            config.validate(),
            Err(ValidationError::DuplicateName { kind: EndpointKind::PdPublisher, .. })
        ));

        // The same name in a different category is fine
        let mut config = SimulatorConfig::default();
        config.pd_publishers.push(publisher("same"));
        config.pd_subscribers.push(PdSubscriberConfig {
            name: "same".to_string(),
            com_id: 0,
            etb_topo_count: 0,
            op_trn_topo_count: 0,
            source_ip: String::new(),
            dest_ip: String::new(),
            timeout_ms: 0,
            com_id_filter: true,
        });
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_addresses_rejected() {
        let mut config = SimulatorConfig::default();
        config.network.host_ip = "10.0.0.300".to_string();
        assert!(matches!(config.validate(), Err(ValidationError::InvalidNetwork(_))));

        let mut config = SimulatorConfig::default();
        let mut p = publisher("door_status");
        p.dest_ip = "not-an-ip".to_string();
        config.pd_publishers.push(p);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("dest_ip"));
    }

    #[test]
    fn test_malformed_hex_payload_rejected() {
        let mut config = SimulatorConfig::default();
        let mut p = publisher("door_status");
        p.payload = PayloadSpec::hex("0G");
        config.pd_publishers.push(p);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_enum_parsing() {
        assert_eq!("HEX".parse::<PayloadFormat>(), Ok(PayloadFormat::Hex));
        assert_eq!(" text ".parse::<PayloadFormat>(), Ok(PayloadFormat::Text));
        assert!("binary".parse::<PayloadFormat>().is_err());
        assert_eq!("warning".parse::<LogLevel>(), Ok(LogLevel::Warn));
        assert!(LogLevel::Error < LogLevel::Debug);
    }
}
