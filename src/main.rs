use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use hwconfd::config::{self, Config, LoggingConfig};
use hwconfd::daemon::{self, DaemonError, DaemonOptions};
use hwconfd::ipc::transport::SocketClient;
use hwconfd::ipc::{from_wire, WireValue};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "hwconfd")]
#[command(author, version, about = "Hardware configuration daemon", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use this config file instead of the default location
    #[arg(long, global = true)]
    config_file: Option<PathBuf>,

    /// Socket of the daemon (overrides the config file)
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon in the foreground
    Start {
        /// Publish a simulated receiver and mouse
        #[arg(long)]
        simulate: bool,
    },

    /// Check daemon status
    Status,

    /// Call a method, e.g. `call /io/hwconfd/device/1/dpi io.hwconfd.DPI getDPI y:0`
    Call {
        node: String,
        interface: String,
        method: String,
        /// Arguments as `<code>:<value>` (q:800, s:name, b:true) or JSON
        args: Vec<String>,
    },

    /// Read a property
    Get {
        node: String,
        interface: String,
        property: String,
    },

    /// Write a property
    Set {
        node: String,
        interface: String,
        property: String,
        value: String,
    },

    /// List published objects and their interfaces
    Introspect {
        /// Only show this node
        node: Option<String>,
    },

    /// Print signals as they are emitted
    Monitor,

    /// Configure settings
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,

        /// Ask the running daemon to reload its configuration
        #[arg(long)]
        reload: bool,
    },
}

fn init_logging(verbose: bool, logging: &LoggingConfig) {
    let filter = if verbose {
        EnvFilter::new("hwconfd=debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("hwconfd={}", logging.level)))
    };

    let json = logging.json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
    });
    let text = (!logging.json)
        .then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(text)
        .init();
}

/// Parse a command-line value such as `q:800` or a JSON-encoded wire value.
fn parse_literal(text: &str) -> anyhow::Result<WireValue> {
    let trimmed = text.trim_start();
    if trimmed.starts_with('{') {
        return serde_json::from_str(trimmed)
            .with_context(|| format!("Invalid JSON value: {}", text));
    }

    let (code, raw) = text
        .split_once(':')
        .ok_or_else(|| anyhow!("Expected <type>:<value>, got \"{}\"", text))?;
    let bad = |e: &dyn std::fmt::Display| anyhow!("Invalid {} literal \"{}\": {}", code, raw, e);

    let value = match code {
        "n" => WireValue::Int16(raw.parse().map_err(|e| bad(&e))?),
        "q" => WireValue::UInt16(raw.parse().map_err(|e| bad(&e))?),
        "i" => WireValue::Int32(raw.parse().map_err(|e| bad(&e))?),
        "u" => WireValue::UInt32(raw.parse().map_err(|e| bad(&e))?),
        "x" => WireValue::Int64(raw.parse().map_err(|e| bad(&e))?),
        "t" => WireValue::UInt64(raw.parse().map_err(|e| bad(&e))?),
        "d" => WireValue::Double(raw.parse().map_err(|e| bad(&e))?),
        "y" => WireValue::Byte(raw.parse().map_err(|e| bad(&e))?),
        "b" => WireValue::Boolean(raw.parse().map_err(|e| bad(&e))?),
        "s" => WireValue::String(raw.to_string()),
        "g" => WireValue::Signature(raw.to_string()),
        "o" => WireValue::ObjectPath(raw.to_string()),
        other => bail!("Unknown type code \"{}\"", other),
    };
    Ok(value)
}

fn print_values(values: &[WireValue]) {
    for value in values {
        match from_wire(value) {
            Ok(variant) => println!("{}: {}", variant.signature(), variant),
            Err(_) => println!("{:?}", value),
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    Ok(match path {
        Some(p) => Config::load_from(p)?,
        None => Config::load()?,
    })
}

fn connect(cli_socket: Option<&Path>, config: &Config) -> anyhow::Result<SocketClient> {
    let path = match cli_socket {
        Some(p) => p.to_path_buf(),
        None => daemon::locate(config).ok_or(DaemonError::NotRunning)?,
    };
    SocketClient::connect(&path).map_err(|e| anyhow!("{} ({})", e, path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config_file.as_deref())?;
    init_logging(cli.verbose, &config.logging);

    let socket = cli.socket.as_deref();
    match cli.command {
        Commands::Start { simulate } => {
            info!("Starting hwconfd...");
            daemon::run(DaemonOptions {
                config_path: cli.config_file.clone(),
                socket_path: cli.socket.clone(),
                simulate,
            })
            .await?;
        }

        Commands::Status => {
            daemon::status(&config)?;
        }

        Commands::Call {
            node,
            interface,
            method,
            args,
        } => {
            let args = args
                .iter()
                .map(|a| parse_literal(a))
                .collect::<anyhow::Result<Vec<_>>>()?;
            let mut client = connect(socket, &config)?;
            print_values(&client.call(&node, &interface, &method, args)?);
        }

        Commands::Get {
            node,
            interface,
            property,
        } => {
            let mut client = connect(socket, &config)?;
            let value = client.get(&node, &interface, &property)?;
            print_values(std::slice::from_ref(&value));
        }

        Commands::Set {
            node,
            interface,
            property,
            value,
        } => {
            let value = parse_literal(&value)?;
            let mut client = connect(socket, &config)?;
            client.set(&node, &interface, &property, value)?;
        }

        Commands::Introspect { node } => {
            let mut client = connect(socket, &config)?;
            for object in client.introspect(node.as_deref())? {
                println!("{}", object);
            }
        }

        Commands::Monitor => {
            let mut client = connect(socket, &config)?;
            client.subscribe()?;
            client.set_read_timeout(None);
            loop {
                let signal = client.next_signal()?;
                print!("{} {}.{}", signal.node, signal.interface, signal.signal);
                for arg in &signal.args {
                    match from_wire(arg) {
                        Ok(v) => print!(" {}", v),
                        Err(_) => print!(" {:?}", arg),
                    }
                }
                println!();
            }
        }

        Commands::Config { show, reload } => {
            if reload {
                let mut client = connect(socket, &config)?;
                client.call("/io/hwconfd", "io.hwconfd.Configuration", "reload", Vec::new())?;
                println!("Configuration reloaded");
            } else if show {
                config::show(cli.config_file.as_deref())?;
            } else {
                println!("Use --show to print the configuration or --reload to apply edits");
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_typed_literals() {
        assert_eq!(parse_literal("q:800").unwrap(), WireValue::UInt16(800));
        assert_eq!(parse_literal("y:0").unwrap(), WireValue::Byte(0));
        assert_eq!(parse_literal("b:true").unwrap(), WireValue::Boolean(true));
        assert_eq!(parse_literal("n:-3").unwrap(), WireValue::Int16(-3));
        assert_eq!(
            parse_literal("s:a:b").unwrap(),
            WireValue::String("a:b".to_string())
        );
        assert_eq!(
            parse_literal("o:/io/hwconfd").unwrap(),
            WireValue::ObjectPath("/io/hwconfd".to_string())
        );
    }

    #[test]
    fn test_parse_json_literal() {
        let value = parse_literal(r#"{"type":"tuple","value":[{"type":"boolean","value":true},{"type":"byte","value":5}]}"#)
            .unwrap();
        assert_eq!(
            value,
            WireValue::Tuple(vec![WireValue::Boolean(true), WireValue::Byte(5)])
        );
    }

    #[test]
    fn test_parse_literal_errors() {
        assert!(parse_literal("800").is_err());
        assert!(parse_literal("q:70000").is_err());
        assert!(parse_literal("z:1").is_err());
        assert!(parse_literal("{not json").is_err());
    }
}
