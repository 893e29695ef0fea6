// src/lib.rs
//
// telebridge: frames an ASCII telemetry stream from a serial device and
// forwards decoded samples to real-time clients.

// Must come first so `tlog!` is visible to every module below
#[macro_use]
mod logging;

pub mod cancel;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod io;
pub mod registry;
pub mod settings;
pub mod transport;

#[cfg(test)]
mod testing;

pub use context::BridgeContext;
pub use error::BridgeError;
pub use logging::{current_log_file, init_file_logging, stop_file_logging};

#[cfg(feature = "cli")]
use clap::Parser;
#[cfg(feature = "cli")]
use std::path::PathBuf;
#[cfg(feature = "cli")]
use std::sync::Arc;

#[cfg(feature = "cli")]
use crate::io::{SerialBackend, SystemSerial};
#[cfg(feature = "cli")]
use crate::settings::{default_settings_path, load_settings, save_settings, BridgeSettings};
#[cfg(feature = "cli")]
use crate::transport::{parse_command, ClientCommand, JsonLinesTransport};

/// Command-line flags. Anything given here overrides the settings file.
#[cfg(feature = "cli")]
#[derive(Debug, Parser)]
#[command(name = "telebridge", version, about = "Serial telemetry bridge")]
struct Args {
    /// Settings file (.json or .toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Device path or name to select as soon as it appears
    #[arg(long)]
    port: Option<String>,

    #[arg(long)]
    baud: Option<u32>,

    /// Worker tick rate in Hz
    #[arg(long)]
    rate: Option<u32>,

    /// Minimum interval between forwarded samples
    #[arg(long)]
    throttle_ms: Option<u64>,

    /// Write a log file to this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Attach a client on startup instead of waiting for `attach`
    #[arg(long)]
    attach: bool,

    /// Print the visible serial ports and exit
    #[arg(long)]
    list: bool,

    /// Save the merged settings to the config path and exit
    #[arg(long)]
    write_config: bool,
}

#[cfg(feature = "cli")]
impl Args {
    fn apply(&self, settings: &mut BridgeSettings) {
        if let Some(port) = &self.port {
            settings.default_port = Some(port.clone());
        }
        if let Some(baud) = self.baud {
            settings.baud_rate = baud;
        }
        if let Some(rate) = self.rate {
            settings.tick_rate_hz = rate;
        }
        if let Some(ms) = self.throttle_ms {
            settings.sample_throttle_ms = ms;
        }
        if let Some(dir) = &self.log_dir {
            settings.log_dir = Some(dir.clone());
        }
    }
}

#[cfg(feature = "cli")]
pub fn run() {
    let args = Args::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tlog!("[main] Failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run_bridge(args)) {
        tlog!("[main] {}", e);
        stop_file_logging();
        std::process::exit(1);
    }
}

#[cfg(feature = "cli")]
async fn run_bridge(args: Args) -> Result<(), BridgeError> {
    use tokio::io::AsyncBufReadExt;

    let config_path = args.config.clone().or_else(default_settings_path);
    let mut settings = match &config_path {
        Some(path) => load_settings(path)?,
        None => BridgeSettings::default(),
    };
    args.apply(&mut settings);

    if args.write_config {
        let path = config_path
            .ok_or_else(|| BridgeError::Settings("No config directory available".to_string()))?;
        save_settings(&path, &settings)?;
        tlog!("[settings] Saved {}", path.display());
        return Ok(());
    }

    let backend = SystemSerial::new(settings.line.clone());

    if args.list {
        for port in backend.available_ports()? {
            println!("{}\t{}", port.path, port.name);
        }
        return Ok(());
    }

    if let Some(dir) = &settings.log_dir {
        if let Err(e) = init_file_logging(dir) {
            tlog!("[logging] {}", e);
        }
    }

    let context = BridgeContext::new(settings);
    let transport = Arc::new(JsonLinesTransport::new(std::io::stdout()));
    context.attach_dispatcher(transport);
    let commands = context.commands();

    let mut worker = context.start_worker(Box::new(backend))?;
    tlog!(
        "[main] Bridge running at {} Hz, {} baud",
        context.settings.tick_rate_hz,
        context.settings.baud_rate
    );

    if args.attach {
        commands.on_client_attached();
    }

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                tlog!("[main] Interrupted");
                break;
            }
            line = lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) if line.trim().is_empty() => {}
                    Ok(Some(line)) => {
                        match parse_command(&line) {
                            Some(ClientCommand::Quit) => break,
                            Some(command) => {
                                if let Err(e) = commands.apply(command) {
                                    tlog!("[stdio] {}", e);
                                }
                            }
                            None => tlog!("[stdio] Unknown command: {}", line.trim()),
                        }
                    }
                    Ok(None) => {
                        // Keep streaming until Ctrl-C
                        stdin_open = false;
                    }
                    Err(e) => {
                        tlog!("[stdio] Failed to read stdin: {}", e);
                        stdin_open = false;
                    }
                }
            }
        }
    }

    // Joining blocks; keep it off the runtime's worker threads
    if tokio::task::spawn_blocking(move || worker.shutdown()).await.is_err() {
        tlog!("[main] Worker shutdown panicked");
    }
    stop_file_logging();
    Ok(())
}
