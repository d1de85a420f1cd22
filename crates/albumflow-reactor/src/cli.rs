//! Command-line entry points.

use crate::clients::{self, SharedClients};
use crate::config::PipelineConfig;
use crate::notifier::LogNotifier;
use crate::pipeline::Pipeline;
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

/// Command-line interface of the `albumflow` binary.
#[derive(Parser)]
#[command(name = "albumflow")]
#[command(about = "AlbumFlow image event pipeline", long_about = None)]
pub struct Cli {
    /// Configuration file (`.toml` or `.json`).
    #[arg(short, long, default_value = "albumflow.toml")]
    pub config: PathBuf,

    /// Overrides the notification recipient.
    #[arg(long, env = "ALBUMFLOW_MAIL_TO")]
    pub recipient: Option<String>,

    /// Overrides the notification sender.
    #[arg(long, env = "ALBUMFLOW_MAIL_FROM")]
    pub sender: Option<String>,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand)]
pub enum Command {
    /// Runs the pipeline over newline-delimited JSON messages.
    Serve {
        /// Message file; stdin when omitted.
        #[arg(short, long)]
        input: Option<PathBuf>,
        /// Seconds to wait for in-flight work after input ends.
        #[arg(long, default_value = "30")]
        drain_timeout_secs: u64,
    },
    /// Validates the configuration and prints it.
    CheckConfig,
}

impl Cli {
    /// Loads the configuration file (defaults when it does not exist),
    /// applies command-line overrides and validates the result.
    pub fn load_config(&self) -> crate::error::Result<PipelineConfig> {
        let mut config = if self.config.exists() {
            PipelineConfig::from_file(&self.config)?
        } else {
            PipelineConfig::default()
        };
        if let Some(recipient) = &self.recipient {
            config.notifier.recipient = recipient.clone();
        }
        if let Some(sender) = &self.sender {
            config.notifier.sender = sender.clone();
        }
        config.validate()?;
        Ok(config)
    }

    /// Runs the selected subcommand.
    pub async fn run(self, config: PipelineConfig) -> Result<()> {
        match self.command {
            Command::Serve {
                ref input,
                drain_timeout_secs,
            } => {
                let drain_timeout = Duration::from_secs(drain_timeout_secs);
                serve(config, input.as_deref(), drain_timeout).await
            }
            Command::CheckConfig => {
                println!("{}", serde_json::to_string_pretty(&config)?);
                Ok(())
            }
        }
    }
}

async fn serve(
    config: PipelineConfig,
    input: Option<&Path>,
    drain_timeout: Duration,
) -> Result<()> {
    let shared = clients::install(SharedClients::in_memory(
        config.change_log_capacity,
        Arc::new(LogNotifier),
    ))?;
    let mut pipeline = Pipeline::new(config, shared).await?;
    let handle = pipeline.start()?;
    tracing::info!("Subscriptions: {:?}", pipeline.broker().subscription_ids().await);

    let (accepted, rejected) = match input {
        Some(path) => {
            let file = tokio::fs::File::open(path).await?;
            feed_lines(&pipeline, BufReader::new(file)).await?
        }
        None => feed_lines(&pipeline, BufReader::new(tokio::io::stdin())).await?,
    };
    tracing::info!("Input finished: {} accepted, {} rejected", accepted, rejected);

    if !pipeline.wait_idle(drain_timeout).await {
        tracing::warn!("Shutting down with work still pending");
    }
    handle.shutdown().await;

    let stats = pipeline.stats();
    println!(
        "published={} delivered={} push_failures={} acked={} redelivered={} \
         dead_lettered={} rejections_sent={}",
        stats.broker.published,
        stats.broker.delivered,
        stats.broker.push_failures,
        stats.creation_queue.acked,
        stats.creation_queue.redelivered,
        stats.dead_lettered,
        stats.rejections_sent
    );
    for record in pipeline.dead_letters() {
        println!(
            "dead-letter {} from {}: {} ({})",
            record.envelope.id,
            record.source_queue,
            record.envelope.event.object_key,
            record.reason.message
        );
    }
    Ok(())
}

async fn feed_lines<R>(pipeline: &Pipeline, reader: R) -> Result<(usize, usize)>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut accepted = 0;
    let mut rejected = 0;
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, draining");
                break;
            }
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        match pipeline.ingest_message(&line).await {
            Ok(_) => accepted += 1,
            Err(e) => {
                tracing::warn!("Rejected input line: {}", e);
                rejected += 1;
            }
        }
    }
    Ok((accepted, rejected))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_overrides_fill_notifier() {
        let cli = parse(&[
            "albumflow",
            "--config",
            "/nonexistent/albumflow.toml",
            "--recipient",
            "owner@example.com",
            "--sender",
            "albums@example.com",
            "check-config",
        ]);
        let config = cli.load_config().unwrap();
        assert_eq!(config.notifier.recipient, "owner@example.com");
        assert_eq!(config.notifier.sender, "albums@example.com");
        assert_eq!(config.topic, "images");
    }

    #[test]
    fn test_missing_addresses_fail_validation() {
        // Built directly so ALBUMFLOW_MAIL_* in the environment cannot fill them in.
        let cli = Cli {
            config: PathBuf::from("/nonexistent/albumflow.toml"),
            recipient: None,
            sender: None,
            command: Command::CheckConfig,
        };
        assert!(cli.load_config().is_err());

        let cli = Cli {
            recipient: Some("owner@example.com".to_string()),
            ..cli
        };
        assert!(cli.load_config().is_err());
    }

    #[test]
    fn test_serve_arguments() {
        let cli = parse(&[
            "albumflow",
            "serve",
            "--input",
            "events.ndjson",
            "--drain-timeout-secs",
            "5",
        ]);
        match cli.command {
            Command::Serve {
                input,
                drain_timeout_secs,
            } => {
                assert_eq!(input, Some(PathBuf::from("events.ndjson")));
                assert_eq!(drain_timeout_secs, 5);
            }
            Command::CheckConfig => panic!("expected serve"),
        }
    }

    #[test]
    fn test_config_file_is_read() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            "topic = \"albums\"\n[notifier]\n\
             recipient = \"a@example.com\"\nsender = \"b@example.com\""
        )
        .unwrap();
        let path = file.path().to_str().unwrap().to_string();
        let cli = parse(&["albumflow", "--config", &path, "check-config"]);
        let config = cli.load_config().unwrap();
        assert_eq!(config.topic, "albums");
        assert_eq!(config.notifier.recipient, "a@example.com");
    }
}
