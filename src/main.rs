//! Bluelink - talk to a peer over a serial-style link from the terminal

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use bluelink::app::{Command, Console, Outcome};
use bluelink::config::Config;
use bluelink::error::{Error, Result};
use bluelink::metrics::{self, BYTES_RECEIVED, BYTES_SENT};
use bluelink::radio::StaticRadio;
use bluelink::ConnectionManager;

fn main() -> Result<()> {
    let args = Args::parse();

    if args.version {
        print_version();
        return Ok(());
    }

    if args.gen_config {
        let json = serde_json::to_string_pretty(&Config::default_config())
            .map_err(|e| Error::Config(format!("Failed to render config: {}", e)))?;
        println!("{}", json);
        return Ok(());
    }

    let command = match args.command {
        Some(command) => command,
        None => {
            print_help();
            std::process::exit(1);
        }
    };

    // Load configuration
    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default_config(),
    };

    // Initialize logging
    let log_level = std::env::var("RUST_LOG")
        .ok()
        .and_then(|s| s.parse().ok())
        .or_else(|| config.log.level.parse().ok())
        .unwrap_or(Level::INFO);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| Error::Config(format!("Failed to set tracing subscriber: {}", e)))?;

    info!("Bluelink v{} starting...", env!("CARGO_PKG_VERSION"));
    if args.config.is_none() {
        info!("No config file specified, using default config");
    }
    if let Some(local) = config.tcp.local_address {
        info!("Local address {}", local);
    }

    let options = config.link.to_options()?;
    let mode = config.link.security_mode();
    metrics::init_metrics();

    let rt = tokio::runtime::Runtime::new()?;
    let outcome = rt.block_on(async {
        let manager = ConnectionManager::builder(Arc::new(config.tcp.build_transport()))
            .radio(Arc::new(StaticRadio::new()))
            .options(options)
            .build();

        let console = Console::new(Arc::new(manager), mode);
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        console
            .run(command, stdin, async {
                let _ = tokio::signal::ctrl_c().await;
                info!("Shutting down...");
            })
            .await
    });
    // Stdin is read on a blocking thread that never finishes on its own
    rt.shutdown_timeout(Duration::from_millis(100));

    eprintln!(
        "Sent {}, received {}",
        metrics::format_bytes(BYTES_SENT.get()),
        metrics::format_bytes(BYTES_RECEIVED.get())
    );
    if args.metrics {
        eprint!("{}", metrics::gather_text());
    }

    match outcome {
        Outcome::Failed(code) => {
            eprintln!("Link failed: {} ({})", code, code.code());
            std::process::exit(2);
        }
        Outcome::Refused => std::process::exit(1),
        _ => {}
    }

    info!("Goodbye!");
    Ok(())
}

/// Command line arguments
struct Args {
    config: Option<PathBuf>,
    command: Option<Command>,
    gen_config: bool,
    metrics: bool,
    version: bool,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = std::env::args().collect();
        let mut config = None;
        let mut command = None;
        let mut gen_config = false;
        let mut metrics = false;
        let mut version = false;

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "-c" | "--config" => {
                    if i + 1 < args.len() {
                        config = Some(PathBuf::from(&args[i + 1]));
                        i += 1;
                    }
                }
                "connect" => {
                    if i + 1 < args.len() {
                        command = Some(Command::Connect(args[i + 1].clone()));
                        i += 1;
                    } else {
                        eprintln!("connect needs a peer address");
                        std::process::exit(1);
                    }
                }
                "accept" => command = Some(Command::Accept),
                "--gen-config" => gen_config = true,
                "--metrics" => metrics = true,
                "-v" | "--version" => version = true,
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                _ => {}
            }
            i += 1;
        }

        Self {
            config,
            command,
            gen_config,
            metrics,
            version,
        }
    }
}

fn print_help() {
    println!(
        r#"Bluelink - serial-style links from the terminal

USAGE:
    bluelink [OPTIONS] connect <ADDR>
    bluelink [OPTIONS] accept

OPTIONS:
    -c, --config <FILE>     Path to configuration file
    --gen-config            Print an example config
    --metrics               Print Prometheus metrics on exit
    -v, --version           Print version information
    -h, --help              Print help information

Input lines are sent to the peer, received text is printed.
End of input or Ctrl+C disconnects.

EXAMPLES:
    bluelink --gen-config > a.json
    bluelink -c a.json accept
    bluelink -c b.json connect 02:00:00:00:00:01
"#
    );
}

fn print_version() {
    println!("Bluelink v{}", env!("CARGO_PKG_VERSION"));
    println!("Connection lifecycle manager for serial-style links");
}
