// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log_relay::{load_config_with_env, LogEntry, LogResult, Relay};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum InputFormat {
    /// `category<TAB>message`, or a bare message for the default category
    Text,
    /// `{"category": "...", "message": "..."}`
    Json,
}

/// Log Relay - Forward categorized log lines to bucketed stores
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/relay.yaml")]
    config: PathBuf,

    /// Log level (overrides config file)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Category for input lines that do not name one
    #[arg(short, long, default_value = "default")]
    default_category: String,

    /// Format of stdin lines
    #[arg(short, long, value_enum, default_value_t = InputFormat::Text)]
    input_format: InputFormat,
}

#[derive(Deserialize)]
struct JsonLine {
    category: Option<String>,
    message: String,
}

fn parse_line(line: &str, format: InputFormat, default_category: &str) -> Result<LogEntry> {
    match format {
        InputFormat::Text => Ok(match line.split_once('\t') {
            Some((category, message)) if !category.is_empty() => {
                LogEntry::new(category, message.to_string())
            }
            _ => LogEntry::new(default_category, line.to_string()),
        }),
        InputFormat::Json => {
            let parsed: JsonLine = serde_json::from_str(line).context("Invalid JSON input line")?;
            Ok(LogEntry::new(
                parsed.category.unwrap_or_else(|| default_category.to_string()),
                parsed.message,
            ))
        }
    }
}

/// Forward stdin lines until EOF, backing off while queues are full
async fn pump_stdin(relay: &Relay, args: &Args) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut delay = Duration::from_millis(100);

    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        if line.is_empty() {
            continue;
        }
        let entry = match parse_line(&line, args.input_format, &args.default_category) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping input line: {:#}", e);
                continue;
            }
        };

        loop {
            match relay.log(vec![entry.clone()]) {
                LogResult::Ok => {
                    delay = Duration::from_millis(100);
                    break;
                }
                LogResult::TryLater => {
                    warn!("Queues full, retrying in {:?}", delay);
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(Duration::from_secs(5));
                }
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Load configuration from file
    let mut config = load_config_with_env(&args.config)?;

    // Apply CLI overrides
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }

    // Initialize tracing with configured level
    let log_level = match config.logging.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let builder = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with_writer(std::io::stderr);
    if config.logging.format == "json" {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }

    info!("Starting Log Relay");
    info!("Loaded configuration from: {:?}", args.config);
    info!(
        "Check interval: {}s, retry interval: {}s, max queue size: {} bytes",
        config.relay.check_interval_seconds,
        config.relay.retry_interval_seconds,
        config.relay.max_queue_size
    );

    let relay = Relay::new(&config)?;

    // Run until stdin closes or Ctrl+C
    tokio::select! {
        result = pump_stdin(&relay, &args) => {
            if let Err(e) = result {
                tracing::error!("Input error: {:#}", e);
            }
            info!("Input closed");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    for (category, status) in relay.status().await {
        if !status.is_empty() {
            warn!("[{}] {}", category, status);
        }
    }

    // Cleanup
    let unsent = relay.shutdown().await;
    if relay.dropped() > 0 {
        warn!("{} messages had no matching category", relay.dropped());
    }
    info!("Log Relay shut down ({} messages undelivered)", unsent);

    Ok(())
}
