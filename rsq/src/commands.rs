use std::io::{BufRead, Read};

use rsq_client::{
    ClientError, Consumer, EntryId, Message, Producer, RedisBackend, Result, create_group,
};
use tracing::{info, warn};

use crate::config::Settings;

/// Options for the consume loop
#[derive(Debug, Clone, Copy)]
pub struct ConsumeOptions {
    /// Read in batches of the configured size on a fixed tick
    pub batch: bool,
    /// Stop after this many messages
    pub max_messages: Option<usize>,
    /// Acknowledge each message after printing it
    pub auto_ack: bool,
    pub output_hex: bool,
}

#[derive(Debug, Default)]
struct ConsumeStats {
    messages: u64,
    bytes: u64,
    acked: u64,
    empty_reads: u64,
    undecodable: u64,
}

/// Ensure the configured stream and group exist
pub async fn init_group(settings: &Settings) -> Result<()> {
    let backend = RedisBackend::connect(&settings.redis_url).await?;
    create_group(&backend, &settings.stream, &settings.group).await?;

    println!(
        "Stream '{}' has consumer group '{}'",
        settings.stream, settings.group
    );
    Ok(())
}

/// Append messages from an argument, stdin, or stdin lines
pub async fn produce(settings: &Settings, body: Option<String>, lines: bool) -> Result<()> {
    let backend = RedisBackend::connect(&settings.redis_url).await?;
    let producer = Producer::new(backend, settings.producer_config());

    let bodies: Vec<Vec<u8>> = match body {
        Some(body) => vec![body.into_bytes()],
        None if lines => std::io::stdin()
            .lock()
            .lines()
            .map(|line| line.map(String::into_bytes))
            .collect::<std::io::Result<_>>()?,
        None => {
            let mut buf = Vec::new();
            std::io::stdin().read_to_end(&mut buf)?;
            vec![buf]
        },
    };

    for body in bodies {
        let id = producer.add(&settings.stream, body).await?;
        println!("{}", id);
    }
    Ok(())
}

/// Consume from the configured group until `max_messages` or Ctrl-C
pub async fn consume(settings: &Settings, options: ConsumeOptions) -> Result<()> {
    let backend = RedisBackend::connect(&settings.redis_url).await?;
    let mut consumer = Consumer::new(backend, settings.consumer_config());

    println!(
        "Consuming '{}' as {}/{}",
        settings.stream, settings.group, settings.consumer.name
    );
    if let Some(max) = options.max_messages {
        println!("Max messages: {}", max);
    }
    println!();

    let mut stats = ConsumeStats::default();
    let limit = options.max_messages.unwrap_or(usize::MAX);
    let mut ticker = tokio::time::interval(settings.tick());

    let result = loop {
        if stats.messages as usize >= limit {
            break Ok(());
        }

        let read = async {
            if options.batch {
                ticker.tick().await;
                let remaining = (limit - stats.messages as usize).min(settings.consumer.batch_size);
                consumer.read_batch(remaining).await
            } else {
                consumer.read().await.map(|m| m.into_iter().collect())
            }
        };

        let messages = tokio::select! {
            read = read => read,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping consumer");
                break Ok(());
            },
        };

        match messages {
            Ok(messages) if messages.is_empty() => stats.empty_reads += 1,
            Ok(messages) => {
                for msg in &messages {
                    print_message(msg, options.output_hex);
                    stats.messages += 1;
                    stats.bytes += msg.body.len() as u64;
                }
                if options.auto_ack {
                    let ids: Vec<EntryId> = messages.iter().map(|m| m.id).collect();
                    match consumer.ack(&ids).await {
                        Ok(n) => stats.acked += n,
                        Err(e) => break Err(e),
                    }
                }
            },
            // Never processable; acknowledging it lets the rest of its batch through
            Err(ClientError::DecodePayload { id, reason }) => {
                warn!(%id, %reason, "Acknowledging undecodable entry");
                match consumer.ack(&[id]).await {
                    Ok(n) => {
                        stats.undecodable += 1;
                        stats.acked += n;
                    },
                    Err(e) => break Err(e),
                }
            },
            Err(e) if e.is_retryable() => {
                eprintln!("Error: {}", e);
                tokio::time::sleep(settings.tick()).await;
            },
            Err(e) => break Err(e),
        }
    };

    print_consume_summary(&stats);
    result
}

/// Acknowledge IDs given on the command line
pub async fn ack(settings: &Settings, ids: &[String]) -> Result<()> {
    let ids = ids
        .iter()
        .map(|s| s.parse::<EntryId>())
        .collect::<Result<Vec<_>>>()
        .map_err(|e| ClientError::Config(e.to_string()))?;

    let backend = RedisBackend::connect(&settings.redis_url).await?;
    let consumer = Consumer::new(backend, settings.consumer_config());
    let acked = consumer.ack(&ids).await?;

    println!("Acknowledged {} of {}", acked, ids.len());
    Ok(())
}

fn print_message(msg: &Message, output_hex: bool) {
    println!("--- {} ({} bytes) ---", msg.id, msg.body.len());
    if output_hex {
        print_hex(&msg.body);
    } else {
        println!("{}", String::from_utf8_lossy(&msg.body));
    }
}

fn print_hex(data: &[u8]) {
    for (i, chunk) in data.chunks(16).enumerate() {
        print!("{:08x}  ", i * 16);

        for (j, byte) in chunk.iter().enumerate() {
            print!("{:02x} ", byte);
            if j == 7 {
                print!(" ");
            }
        }

        // Padding for incomplete rows
        for j in chunk.len()..16 {
            print!("   ");
            if j == 7 {
                print!(" ");
            }
        }

        print!(" |");
        for byte in chunk {
            if byte.is_ascii_graphic() || *byte == b' ' {
                print!("{}", *byte as char);
            } else {
                print!(".");
            }
        }
        println!("|");
    }
}

fn print_consume_summary(stats: &ConsumeStats) {
    println!();
    println!("Summary:");
    println!("  Messages: {}", stats.messages);
    println!("  Bytes: {}", stats.bytes);
    println!("  Acknowledged: {}", stats.acked);
    println!("  Empty reads: {}", stats.empty_reads);
    println!("  Undecodable (acknowledged): {}", stats.undecodable);
}
