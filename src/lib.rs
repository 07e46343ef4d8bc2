//! # trdpsim - Train real-time data protocol simulator
//!
//! This library simulates the two traffic classes of a train communication
//! network, driven entirely by a declarative configuration:
//!
//! - **Process data (PD)**: periodic broadcasts identified by a ComId
//! - **Message data (MD)**: request/reply exchanges correlated by session id
//!
//! It lets engineers exercise protocol participants without a live train
//! network.
//!
//! ## Architecture
//!
//! - `config`: Type-safe configuration structures and validation
//! - `config_loader`: YAML loading and CLI overrides
//! - `payload`: Payload resolution from hex, text or file sources
//! - `transport`: The backend contract and the in-process loopback backend
//! - `worker`: One periodic thread per PD publisher and MD sender
//! - `simulator`: Run/stop lifecycle tying transport, workers and polling together
//! - `metrics`: Thread-safe per-endpoint counters and snapshots
//! - `logging`: Console and file log sinks
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use trdpsim::{config_loader, transport, Simulator};
//!
//! let config = config_loader::load_config(Path::new("configs/loopback_demo.yaml"))?;
//! let transport = transport::create_transport(config.network.backend);
//! let simulator = Arc::new(Simulator::new(config, transport));
//!
//! let runner = Arc::clone(&simulator);
//! let handle = std::thread::spawn(move || runner.run());
//!
//! std::thread::sleep(std::time::Duration::from_secs(1));
//! simulator.stop();
//! handle.join().expect("simulator thread panicked")?;
//!
//! println!("{}", simulator.metrics_snapshot().to_json()?);
//! # Ok::<(), color_eyre::Report>(())
//! ```
//!
//! ## Configuration Format
//!
//! ```yaml
//! network:
//!   host_ip: "10.0.0.1"
//!   backend: loopback
//!
//! simulation:
//!   poll_interval: 100ms
//!
//! pd_publishers:
//!   - name: door_status
//!     com_id: 1000
//!     cycle_time_ms: 100
//!     payload: { format: hex, value: "01 00 FF" }
//!
//! md_listeners:
//!   - name: diag_responder
//!     com_id: 2000
//!     auto_reply: true
//!     reply_payload: { format: text, value: "OK" }
//! ```
//!
//! ## Error Handling
//!
//! Library modules return typed errors built with `thiserror`; the binary and
//! the configuration loader report them through `color_eyre`.

pub mod config;
pub mod config_loader;
pub mod logging;
pub mod metrics;
pub mod payload;
pub mod simulator;
pub mod transport;
pub mod worker;

pub use config::SimulatorConfig;
pub use metrics::{RuntimeMetrics, Snapshot};
pub use simulator::{Simulator, SimulatorError, SimulatorState};
pub use transport::{LoopbackTransport, Transport};
