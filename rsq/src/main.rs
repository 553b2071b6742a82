#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

mod commands;
mod config;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::commands::ConsumeOptions;
use crate::config::Settings;

#[derive(Parser)]
#[command(name = "rsq")]
#[command(about = "Produce to and consume from Redis stream consumer groups")]
#[command(version)]
struct Cli {
    #[arg(short, long, global = true, help = "Path to config file (.toml or .json)")]
    config: Option<PathBuf>,

    #[arg(long, global = true, help = "Redis URL (overrides config and RSQ_REDIS_URL)")]
    url: Option<String>,

    #[arg(short, long, global = true, help = "Stream name")]
    stream: Option<String>,

    #[arg(short, long, global = true, help = "Consumer group name")]
    group: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the consumer group (and the stream if missing)
    Init,
    /// Append a message; reads stdin when no body is given
    Produce {
        #[arg(help = "Message body")]
        body: Option<String>,
        #[arg(long, help = "Append one message per stdin line")]
        lines: bool,
    },
    /// Consume messages through the consumer group
    Consume {
        #[arg(short, long, help = "Consumer name within the group")]
        name: Option<String>,
        #[arg(short, long, help = "Read in batches of this size on a fixed tick")]
        batch: Option<usize>,
        #[arg(short, long, help = "Stop after this many messages")]
        max: Option<usize>,
        #[arg(long, help = "Do not acknowledge consumed messages")]
        no_ack: bool,
        #[arg(long, help = "Output bodies in hex format")]
        hex: bool,
        #[arg(long, help = "Interval between batch reads in milliseconds")]
        tick_ms: Option<u64>,
    },
    /// Acknowledge entries by ID
    Ack {
        #[arg(required = true, help = "Entry IDs (e.g. 1700000000000-0)")]
        ids: Vec<String>,
    },
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();

    let mut settings = match Settings::load(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        },
    };
    if let Some(url) = cli.url {
        settings.redis_url = url;
    }
    if let Some(stream) = cli.stream {
        settings.stream = stream;
    }
    if let Some(group) = cli.group {
        settings.group = group;
    }

    let result = match cli.command {
        Commands::Init => commands::init_group(&settings).await,
        Commands::Produce { body, lines } => commands::produce(&settings, body, lines).await,
        Commands::Consume {
            name,
            batch,
            max,
            no_ack,
            hex,
            tick_ms,
        } => {
            if let Some(name) = name {
                settings.consumer.name = name;
            }
            if let Some(size) = batch {
                settings.consumer.batch_size = size;
            }
            if let Some(tick_ms) = tick_ms {
                settings.consumer.tick_ms = tick_ms;
            }
            let options = ConsumeOptions {
                batch: batch.is_some(),
                max_messages: max,
                auto_ack: !no_ack,
                output_hex: hex,
            };
            match settings.validate() {
                Ok(()) => commands::consume(&settings, options).await,
                Err(e) => Err(e),
            }
        },
        Commands::Ack { ids } => commands::ack(&settings, &ids).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}
