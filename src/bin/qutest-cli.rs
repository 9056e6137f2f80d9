//! QUTest CLI - drive a target through a running QSPY backend
//!
//! Every subcommand attaches, performs one verb, prints the trace lines that
//! arrive shortly afterwards and detaches.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use qutest::protocol::{CommandRef, FilterGroup, GlobalFilterSet, ObjectKind, ObjectRef, Signal};
use qutest::{Session, SessionConfig};
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "qutest")]
#[command(
    about = "Send commands to a QSPY-instrumented target and watch its trace",
    long_about = None
)]
struct Cli {
    /// JSON session configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Backend host (overrides the configuration)
    #[arg(long)]
    host: Option<String>,

    /// Backend UDP port (overrides the configuration)
    #[arg(short, long)]
    port: Option<u16>,

    /// How long to print trace lines after the command, in milliseconds
    #[arg(long, default_value = "500")]
    linger_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print trace lines for a while
    Monitor {
        /// Number of seconds to listen
        #[arg(short, long, default_value = "10")]
        seconds: u64,
    },

    /// Reset the target and wait for it to report in
    Reset,

    /// Send a clock tick
    Tick {
        /// Tick rate
        #[arg(default_value = "0")]
        rate: u8,
    },

    /// Run a user command (number or dictionary name)
    Command {
        /// Command id or name
        command: String,

        /// Up to three numeric parameters
        #[arg(num_args = 0..=3)]
        params: Vec<u32>,
    },

    /// Post an event to the current active object
    Post {
        /// Signal id or name
        signal: String,

        /// Event parameters as hex bytes (e.g. "02 00")
        #[arg(long)]
        params: Option<String>,
    },

    /// Publish an event
    Publish {
        /// Signal id or name
        signal: String,

        /// Event parameters as hex bytes (e.g. "02 00")
        #[arg(long)]
        params: Option<String>,
    },

    /// Dispatch an event to the current state machine
    Dispatch {
        /// Signal id or name
        signal: String,

        /// Event parameters as hex bytes (e.g. "02 00")
        #[arg(long)]
        params: Option<String>,
    },

    /// Replace the global filter with the given groups (e.g. SM AO U0)
    Filter {
        /// Filter group names
        #[arg(required = true)]
        groups: Vec<String>,
    },

    /// Select the current object
    CurrentObject {
        /// Object kind (SM, AO, MP, EQ, TE, AP, SM_AO)
        kind: String,

        /// Object address or name
        object: String,
    },

    /// Queue a test probe
    Probe {
        /// Function address or name
        function: String,

        /// Probe data word
        data: u32,
    },

    /// Resume a paused target
    Resume,
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => SessionConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => SessionConfig::default(),
    };
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    let endpoint = config.endpoint();
    let mut session = Session::new(config)?;
    session
        .attach()
        .with_context(|| format!("attaching to {endpoint}"))?;

    let linger = Duration::from_millis(cli.linger_ms);
    match cli.command {
        Commands::Monitor { seconds } => {
            print_lines(&mut session, Duration::from_secs(seconds));
        }

        Commands::Reset => {
            session.reset_target().context("resetting target")?;
            if let Some(info) = session.target_info() {
                println!(
                    "Target up: version {:#06x}, layout [{}]",
                    info.version, info.layout
                );
            }
            print_lines(&mut session, linger);
        }

        Commands::Tick { rate } => {
            session.tick(rate).context("tick")?;
            print_lines(&mut session, linger);
        }

        Commands::Command { command, params } => {
            let mut words = [0u32; 3];
            for (slot, value) in words.iter_mut().zip(params) {
                *slot = value;
            }
            let command = match command.parse::<u8>() {
                Ok(id) => CommandRef::Id(id),
                Err(_) => CommandRef::Name(command),
            };
            session.command(command, words).context("user command")?;
            print_lines(&mut session, linger);
        }

        Commands::Post { signal, params } => {
            let params = parse_params(params.as_deref())?;
            session
                .post(parse_signal(signal), &params)
                .context("post")?;
            print_lines(&mut session, linger);
        }

        Commands::Publish { signal, params } => {
            let params = parse_params(params.as_deref())?;
            session
                .publish(parse_signal(signal), &params)
                .context("publish")?;
            print_lines(&mut session, linger);
        }

        Commands::Dispatch { signal, params } => {
            let params = parse_params(params.as_deref())?;
            session
                .dispatch(parse_signal(signal), &params)
                .context("dispatch")?;
            print_lines(&mut session, linger);
        }

        Commands::Filter { groups } => {
            let mut filters = GlobalFilterSet::empty();
            for name in &groups {
                let Some(group) = FilterGroup::parse(name) else {
                    bail!("unknown filter group: {name}");
                };
                filters = filters.with(group);
            }
            session.glb_filter(filters).context("global filter")?;
            print_lines(&mut session, linger);
        }

        Commands::CurrentObject { kind, object } => {
            let kind = parse_kind(&kind)?;
            session
                .current_obj(kind, parse_object(object))
                .context("current object")?;
            print_lines(&mut session, linger);
        }

        Commands::Probe { function, data } => {
            session
                .probe(parse_object(function), data)
                .context("test probe")?;
            print_lines(&mut session, linger);
        }

        Commands::Resume => {
            session.resume().context("resume")?;
            print_lines(&mut session, linger);
        }
    }

    session.detach()?;
    Ok(())
}

fn print_lines(session: &mut Session, window: Duration) {
    let deadline = Instant::now() + window;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        if let Some(line) = session.next_line(remaining) {
            println!("{line}");
        }
    }
}

fn parse_number(text: &str) -> Option<u64> {
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

fn parse_params(text: Option<&str>) -> Result<Vec<u8>> {
    let Some(text) = text else {
        return Ok(Vec::new());
    };
    let digits: String = text
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',' && *c != ':')
        .collect();
    let digits = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
        .unwrap_or(&digits);
    if !digits.is_ascii() || digits.len() % 2 != 0 {
        bail!("event parameters must be pairs of hex digits: {text}");
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .with_context(|| format!("invalid hex byte in event parameters: {text}"))
        })
        .collect()
}

fn parse_signal(text: String) -> Signal {
    match parse_number(&text).and_then(|n| u32::try_from(n).ok()) {
        Some(id) => Signal::Id(id),
        None => Signal::Name(text),
    }
}

fn parse_object(text: String) -> ObjectRef {
    match parse_number(&text) {
        Some(addr) => ObjectRef::Addr(addr),
        None => ObjectRef::Name(text),
    }
}

fn parse_kind(text: &str) -> Result<ObjectKind> {
    let kind = match text.to_ascii_uppercase().as_str() {
        "SM" => ObjectKind::Sm,
        "AO" => ObjectKind::Ao,
        "MP" => ObjectKind::Mp,
        "EQ" => ObjectKind::Eq,
        "TE" => ObjectKind::Te,
        "AP" => ObjectKind::Ap,
        "SM_AO" | "SMAO" => ObjectKind::SmAo,
        other => bail!("unknown object kind: {other}"),
    };
    Ok(kind)
}
