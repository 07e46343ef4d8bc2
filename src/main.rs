use clap::Parser;
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use log::{info, warn};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use trdpsim::config::LogLevel;
use trdpsim::config_loader::{self, CliOverrides};
use trdpsim::{logging, transport, Simulator};

/// Train real-time data protocol simulator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the simulator configuration YAML file
    #[arg(short, long)]
    config: PathBuf,

    /// Override the configured log level (error, warn, info, debug)
    #[arg(short, long)]
    log_level: Option<LogLevel>,

    /// Stop automatically after this long (e.g. "30s", "5m")
    #[arg(short, long, value_parser = parse_duration)]
    duration: Option<Duration>,

    /// Write the final metrics snapshot to this JSON file
    #[arg(long)]
    metrics_out: Option<PathBuf>,

    /// Only load and validate the configuration
    #[arg(long)]
    check: bool,
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime_serde::re::humantime::parse_duration(value).map_err(|e| e.to_string())
}

/// Ctrl-C everywhere, plus SIGTERM on unix so service managers stop cleanly
struct ShutdownSignals {
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl ShutdownSignals {
    /// Must be called inside a tokio runtime
    fn install() -> std::io::Result<Self> {
        Ok(Self {
            #[cfg(unix)]
            terminate: tokio::signal::unix::signal(
                tokio::signal::unix::SignalKind::terminate(),
            )?,
        })
    }

    /// Wait for the first shutdown signal and name it
    async fn recv(&mut self) -> std::io::Result<&'static str> {
        #[cfg(unix)]
        {
            tokio::select! {
                result = tokio::signal::ctrl_c() => result.map(|()| "Ctrl+C"),
                _ = self.terminate.recv() => Ok("SIGTERM"),
            }
        }
        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await.map(|()| "Ctrl+C")
        }
    }
}

/// Stop the simulator on a shutdown signal from a helper thread running its
/// own runtime
fn spawn_signal_watcher(simulator: Arc<Simulator>) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .wrap_err("Failed to build signal runtime")?;

    thread::Builder::new()
        .name("signal-watch".to_string())
        .spawn(move || {
            runtime.block_on(async {
                let received = match ShutdownSignals::install() {
                    Ok(mut signals) => signals.recv().await,
                    Err(e) => Err(e),
                };
                match received {
                    Ok(signal) => {
                        info!("Received {}, stopping simulator", signal);
                        simulator.stop();
                    }
                    Err(e) => warn!("Unable to listen for shutdown signals: {}", e),
                }
            })
        })
        .wrap_err("Failed to spawn signal watcher")?;
    Ok(())
}

fn spawn_stop_timer(simulator: Arc<Simulator>, after: Duration) -> Result<()> {
    thread::Builder::new()
        .name("stop-timer".to_string())
        .spawn(move || {
            thread::sleep(after);
            info!("Configured duration of {:?} elapsed", after);
            simulator.stop();
        })
        .wrap_err("Failed to spawn stop timer")?;
    Ok(())
}

fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    let mut config = config_loader::load_config(&args.config)
        .wrap_err_with(|| format!("Invalid configuration '{}'", args.config.display()))?;
    config_loader::apply_overrides(&mut config, &CliOverrides { log_level: args.log_level })?;

    logging::init(&config.logging).wrap_err("Failed to initialize logging")?;
    info!("Starting trdpsim v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {:?}", args.config);

    if args.check {
        info!(
            "Configuration is valid: {} endpoint(s), {:?} backend",
            config.endpoint_count(),
            config.network.backend
        );
        return Ok(());
    }

    let transport = transport::create_transport(config.network.backend);
    let simulator = Arc::new(Simulator::new(config, transport));

    spawn_signal_watcher(Arc::clone(&simulator))?;
    if let Some(after) = args.duration {
        spawn_stop_timer(Arc::clone(&simulator), after)?;
    }

    simulator.run().wrap_err("Simulation failed")?;

    let snapshot = simulator.metrics_snapshot();
    for p in &snapshot.pd_publishers {
        info!("PD publisher '{}': {} sent", p.name, p.packets_sent);
    }
    for s in &snapshot.pd_subscribers {
        info!("PD subscriber '{}': {} received", s.name, s.packets_received);
    }
    for s in &snapshot.md_senders {
        info!(
            "MD sender '{}': {} requests, {} replies",
            s.name, s.requests_sent, s.replies_received
        );
    }
    for l in &snapshot.md_listeners {
        info!(
            "MD listener '{}': {} requests, {} replies",
            l.name, l.requests_received, l.replies_sent
        );
    }

    if let Some(path) = &args.metrics_out {
        let json = snapshot.to_json().wrap_err("Failed to serialize metrics")?;
        fs::write(path, json)
            .wrap_err_with(|| format!("Failed to write metrics to '{}'", path.display()))?;
        info!("Metrics written to {:?}", path);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let args = Args::parse_from(["trdpsim", "--config", "sim.yaml"]);

        assert_eq!(args.config, PathBuf::from("sim.yaml"));
        assert!(args.log_level.is_none());
        assert!(args.duration.is_none());
        assert!(args.metrics_out.is_none());
        assert!(!args.check);
    }

    #[test]
    fn test_full_args() {
        let args = Args::parse_from([
            "trdpsim",
            "--config",
            "sim.yaml",
            "--log-level",
            "debug",
            "--duration",
            "1m 30s",
            "--metrics-out",
            "metrics.json",
            "--check",
        ]);

        assert_eq!(args.log_level, Some(LogLevel::Debug));
        assert_eq!(args.duration, Some(Duration::from_secs(90)));
        assert_eq!(args.metrics_out, Some(PathBuf::from("metrics.json")));
        assert!(args.check);
    }

    #[test]
    fn test_bad_duration_is_rejected() {
        let args = ["trdpsim", "--config", "sim.yaml", "--duration", "soon"];
        assert!(Args::try_parse_from(args).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_sigterm_is_a_shutdown_signal() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let received = runtime.block_on(async {
            // Once installed, SIGTERM is captured instead of ending the process
            let mut signals = ShutdownSignals::install().unwrap();
            let status = std::process::Command::new("kill")
                .args(["-TERM", &std::process::id().to_string()])
                .status()
                .unwrap();
            assert!(status.success());
            signals.recv().await.unwrap()
        });
        assert_eq!(received, "SIGTERM");
    }
}
