// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use loom_common_ledger::{
	config::default_config_path, CombinedApiMetrics, LedgerConfig, LocalTaskStore, LogFormat,
	LogLevel, LoggingConfig, MetricsDeriver, PersistenceGateway, StateLedger, TaskId,
};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "loom-ledger", version, about, long_about = None)]
struct Args {
	/// Path to custom configuration file
	#[arg(short, long)]
	config: Option<PathBuf>,

	/// Task store root (overrides config)
	#[arg(short, long)]
	data_dir: Option<PathBuf>,

	/// Log level (error, warn, info, debug, trace)
	#[arg(short, long)]
	log_level: Option<String>,

	/// Output logs as JSON
	#[arg(long)]
	json_logs: bool,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// List task summaries, newest first
	History {
		/// Show at most this many rows
		#[arg(long)]
		limit: Option<usize>,
		/// Print rows as JSON
		#[arg(long)]
		json: bool,
	},
	/// Print a task's UI messages (or API history with --api) as JSON
	Show {
		task_id: String,
		#[arg(long)]
		api: bool,
	},
	/// Rewrite a task's summary from its stored UI messages
	Summarize { task_id: String },
	/// Aggregate token and cost usage for a task
	Metrics { task_id: String },
	/// Delete a task's logs and its history row
	Delete { task_id: String },
}

fn load_config(args: &Args) -> Result<LedgerConfig> {
	let path = args.config.clone().or_else(default_config_path);
	let mut config = LedgerConfig::load_from(path.as_deref()).context("failed to load configuration")?;

	if let Some(data_dir) = &args.data_dir {
		config.data_dir = data_dir.clone();
	}
	if let Some(level) = &args.log_level {
		config.logging.level = level.parse::<LogLevel>()?;
	}
	if args.json_logs {
		config.logging.format = LogFormat::Json;
	}

	Ok(config)
}

fn log_level_to_tracing(level: LogLevel) -> &'static str {
	match level {
		LogLevel::Error => "error",
		LogLevel::Warn => "warn",
		LogLevel::Info => "info",
		LogLevel::Debug => "debug",
		LogLevel::Trace => "trace",
	}
}

fn init_tracing(logging: &LoggingConfig) {
	let level = log_level_to_tracing(logging.level);
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
		EnvFilter::new(format!("loom_common_ledger={level},loom_ledger={level}"))
	});

	match logging.format {
		LogFormat::Json => {
			tracing_subscriber::registry()
				.with(filter)
				.with(fmt::layer().json().with_writer(std::io::stderr))
				.init();
		}
		LogFormat::Compact => {
			tracing_subscriber::registry()
				.with(filter)
				.with(fmt::layer().compact().with_writer(std::io::stderr))
				.init();
		}
		LogFormat::Pretty => {
			tracing_subscriber::registry()
				.with(filter)
				.with(fmt::layer().with_writer(std::io::stderr))
				.init();
		}
	}
}

async fn run(args: Args, config: LedgerConfig) -> Result<()> {
	let store = Arc::new(LocalTaskStore::from_config(&config));

	match args.command {
		Command::History { limit, json } => {
			let mut history = store.read_history().await?;
			if let Some(limit) = limit {
				history.truncate(limit);
			}

			if json {
				println!("{}", serde_json::to_string_pretty(&history)?);
				return Ok(());
			}

			if history.is_empty() {
				println!("No tasks found.");
				return Ok(());
			}
			for row in history {
				let title: String = row.task.lines().next().unwrap_or("").chars().take(60).collect();
				println!(
					"{}  {:>8} in {:>8} out  ${:.4}  {}",
					row.id, row.tokens_in, row.tokens_out, row.total_cost, title
				);
			}
		}
		Command::Show { task_id, api } => {
			let task_id = TaskId::parse(&task_id)?;
			let output = if api {
				serde_json::to_string_pretty(&store.read_api_history(&task_id).await?)?
			} else {
				serde_json::to_string_pretty(&store.read_ui_messages(&task_id).await?)?
			};
			println!("{output}");
		}
		Command::Summarize { task_id } => {
			let task_id = TaskId::parse(&task_id)?;
			let ledger = StateLedger::builder(task_id.clone(), store.clone())
				.with_config(&config)
				.load_from_gateway()
				.await
				.with_context(|| format!("failed to load task {task_id}"))?
				.build();

			ledger.persist_and_summarize().await?;
			info!(task_id = %task_id, messages = ledger.ui_messages().len(), "summary rewritten");

			let history = store.read_history().await?;
			if let Some(row) = history.iter().find(|h| h.id == task_id) {
				println!("{}", serde_json::to_string_pretty(row)?);
			}
		}
		Command::Metrics { task_id } => {
			let task_id = TaskId::parse(&task_id)?;
			let messages = store.read_ui_messages(&task_id).await?;
			let metrics = CombinedApiMetrics.aggregate(messages.get(1..).unwrap_or(&[]));

			println!("tokens in:    {}", metrics.tokens_in);
			println!("tokens out:   {}", metrics.tokens_out);
			println!("cache writes: {}", metrics.cache_writes);
			println!("cache reads:  {}", metrics.cache_reads);
			println!("total cost:   ${:.4}", metrics.total_cost);
			if let Some(last) = messages.last() {
				println!("last message: {} ({})", last.kind, last.ts);
			}
		}
		Command::Delete { task_id } => {
			let task_id = TaskId::parse(&task_id)?;
			store.delete_task(&task_id).await?;
			println!("Deleted task {task_id}");
		}
	}

	Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
	let args = Args::parse();
	let config = load_config(&args)?;

	init_tracing(&config.logging);

	run(args, config).await
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_args_parse_history() {
		let args = Args::try_parse_from(["loom-ledger", "--data-dir", "/tmp/l", "history", "--limit", "5"])
			.unwrap();
		assert_eq!(args.data_dir, Some(PathBuf::from("/tmp/l")));
		assert!(matches!(
			args.command,
			Command::History {
				limit: Some(5),
				json: false
			}
		));
	}

	#[test]
	fn test_cli_overrides_apply() {
		let args = Args::try_parse_from([
			"loom-ledger",
			"--config",
			"/nonexistent/ledger.toml",
			"--data-dir",
			"/tmp/ledger",
			"--log-level",
			"debug",
			"--json-logs",
			"metrics",
			"abc",
		])
		.unwrap();

		let config = load_config(&args).unwrap();
		assert_eq!(config.data_dir, PathBuf::from("/tmp/ledger"));
		assert_eq!(config.logging.level, LogLevel::Debug);
		assert_eq!(config.logging.format, LogFormat::Json);
	}
}
