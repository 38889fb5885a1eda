use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod animation;
mod color;
mod command;
mod command_server;
mod config;
mod controller;
mod driver;
mod host;
mod link;
mod output;
mod pixel_buffer;
mod protocol;
#[cfg(test)]
mod testing;

use command_server::CommandServer;
use config::Config;
use driver::Driver;
use host::{Host, Watchdog};

#[derive(Parser)]
#[command(name = "lightwall")]
#[command(about = "LED wall driver and host\n\nThe driver renders animations on the strips; the host sends it commands over a serial or TCP link.", long_about = None)]
struct Cli {
    /// Enable debug output (statistics)
    #[arg(long, global = true)]
    debug: bool,

    /// Enable detailed debug (hex dumps every frame)
    #[arg(long, global = true)]
    ddebug: bool,

    #[command(subcommand)]
    command: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Run the device side: decode commands and animate the strips
    Driver {
        /// Path to configuration file (JSON)
        config: PathBuf,
    },
    /// Run the host: accept JSON commands and forward them to the driver
    Host {
        /// Path to configuration file (JSON)
        config: PathBuf,

        /// Also read commands from stdin, one JSON object per line
        #[arg(long)]
        stdin: bool,
    },
    /// Send one JSON command to the driver and print its answer
    Send {
        /// Path to configuration file (JSON)
        config: PathBuf,

        /// The command, e.g. '{"command":"Rainbow","length":157}'
        json: String,
    },
    /// Measure link throughput with the driver's speed test
    SerialTest {
        /// Path to configuration file (JSON)
        config: PathBuf,

        /// Pause between 1000-byte blocks
        #[arg(long, default_value_t = 0)]
        delay_ms: u64,
    },
}

fn init_logging(debug: bool, ddebug: bool) {
    let level = if ddebug {
        "trace"
    } else if debug {
        "debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn install_ctrlc(running: &Arc<AtomicBool>) {
    let running = Arc::clone(running);
    let result = ctrlc::set_handler(move || {
        info!("Shutting down...");
        running.store(false, Ordering::Relaxed);
    });
    if let Err(e) = result {
        warn!(error = %e, "Could not set Ctrl-C handler");
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug, cli.ddebug);

    let running = Arc::new(AtomicBool::new(true));

    match cli.command {
        Mode::Driver { config } => {
            let config = Config::load(&config)?;
            let mut driver = Driver::open(&config)?;
            install_ctrlc(&running);
            driver.run(&running)?;
        }
        Mode::Host { config, stdin } => {
            let config = Config::load(&config)?;
            let host = Arc::new(Host::connect(&config)?);
            let _watchdog = Watchdog::spawn(
                host.sender().in_flight(),
                Duration::from_secs(config.host.watchdog_secs),
                host::exit_process,
            )?;
            if stdin {
                command_server::spawn_stdin(Arc::clone(&host))?;
            }
            install_ctrlc(&running);
            let server = CommandServer::bind(&config.host.listen, host, Arc::clone(&running))?;
            server.run()?;
        }
        Mode::Send { config, json } => {
            let config = Config::load(&config)?;
            let host = Host::connect(&config)?;
            let result = host.handle_line(&json);
            println!("{}", host::describe(&result));
            result?;
        }
        Mode::SerialTest { config, delay_ms } => {
            let config = Config::load(&config)?;
            let host = Host::connect(&config)?;
            match host::serial_test(host.sender(), Duration::from_millis(delay_ms))? {
                Some(report) => println!("{report}"),
                None => println!("driver sent no report"),
            }
        }
    }

    Ok(())
}
