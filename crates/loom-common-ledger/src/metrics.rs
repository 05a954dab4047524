// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Token, cache and cost aggregation over a UI message log.
//!
//! API requests are recorded in the UI log as `say api_req_started` messages
//! whose text is a JSON object (`tokensIn`, `tokensOut`, `cacheWrites`,
//! `cacheReads`, `cost`, ...). A later `say api_req_finished` may carry the
//! remaining fields. Aggregation first folds those pairs (and command/output
//! sequences) the same way the chat view displays them, then sums.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::model::{AskKind, SayKind, UiMessage};

/// Marker inserted between a command and its collected output.
pub const COMMAND_OUTPUT_MARKER: &str = "Output:";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiMetrics {
	pub tokens_in: u64,
	pub tokens_out: u64,
	pub cache_writes: u64,
	pub cache_reads: u64,
	pub total_cost: f64,
}

/// Pure aggregation step used by the summary pipeline.
pub trait MetricsDeriver: Send + Sync {
	fn aggregate(&self, messages: &[UiMessage]) -> ApiMetrics;
}

/// Combines command sequences, then API request pairs, then sums usage.
#[derive(Clone, Copy, Debug, Default)]
pub struct CombinedApiMetrics;

impl MetricsDeriver for CombinedApiMetrics {
	fn aggregate(&self, messages: &[UiMessage]) -> ApiMetrics {
		api_metrics(&combine_api_requests(&combine_command_sequences(
			messages,
		)))
	}
}

fn is_command(message: &UiMessage) -> bool {
	message.kind.is_ask(AskKind::Command) || message.kind.is_say(SayKind::Command)
}

fn is_command_output(message: &UiMessage) -> bool {
	message.kind.is_ask(AskKind::CommandOutput) || message.kind.is_say(SayKind::CommandOutput)
}

/// Folds every `command_output` into the preceding command's text and drops
/// the output messages.
pub fn combine_command_sequences(messages: &[UiMessage]) -> Vec<UiMessage> {
	let mut combined = Vec::with_capacity(messages.len());

	for (i, message) in messages.iter().enumerate() {
		if is_command_output(message) {
			continue;
		}

		if !is_command(message) {
			combined.push(message.clone());
			continue;
		}

		let mut text = message.text.clone().unwrap_or_default();
		let mut added_output = false;

		for next in &messages[i + 1..] {
			if is_command(next) {
				break;
			}
			if !is_command_output(next) {
				continue;
			}

			if !added_output {
				text.push('\n');
				text.push_str(COMMAND_OUTPUT_MARKER);
				added_output = true;
			}
			if let Some(output) = next.text.as_deref().filter(|o| !o.is_empty()) {
				text.push('\n');
				text.push_str(output);
			}
		}

		let mut folded = message.clone();
		folded.text = Some(text);
		combined.push(folded);
	}

	combined
}

/// Merges each `api_req_started` with the next `api_req_finished` (fields of
/// the finished message win) and drops the finished messages. A started
/// message without a matching finish is kept as is.
pub fn combine_api_requests(messages: &[UiMessage]) -> Vec<UiMessage> {
	let mut combined = Vec::with_capacity(messages.len());

	for (i, message) in messages.iter().enumerate() {
		if message.kind.is_say(SayKind::ApiReqFinished) {
			continue;
		}

		if !message.kind.is_say(SayKind::ApiReqStarted) {
			combined.push(message.clone());
			continue;
		}

		let finished = messages[i + 1..]
			.iter()
			.find(|m| m.kind.is_say(SayKind::ApiReqFinished));

		match finished {
			Some(finished) => {
				let mut merged = message.clone();
				merged.text = Some(merge_json_objects(
					message.text.as_deref(),
					finished.text.as_deref(),
				));
				combined.push(merged);
			}
			None => combined.push(message.clone()),
		}
	}

	combined
}

fn parse_object(text: Option<&str>) -> Map<String, Value> {
	match text.map(serde_json::from_str::<Value>) {
		Some(Ok(Value::Object(map))) => map,
		_ => Map::new(),
	}
}

fn merge_json_objects(started: Option<&str>, finished: Option<&str>) -> String {
	let mut merged = parse_object(started);
	merged.extend(parse_object(finished));
	Value::Object(merged).to_string()
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiRequestInfo {
	#[serde(default)]
	tokens_in: Option<u64>,
	#[serde(default)]
	tokens_out: Option<u64>,
	#[serde(default)]
	cache_writes: Option<u64>,
	#[serde(default)]
	cache_reads: Option<u64>,
	#[serde(default)]
	cost: Option<f64>,
}

/// Sums usage from `api_req_started` and `deleted_api_reqs` messages. Text
/// that is not a usage object is skipped.
pub fn api_metrics(messages: &[UiMessage]) -> ApiMetrics {
	let mut metrics = ApiMetrics::default();

	for message in messages {
		let counts = message.kind.is_say(SayKind::ApiReqStarted)
			|| message.kind.is_say(SayKind::DeletedApiReqs);
		if !counts {
			continue;
		}
		let Some(text) = message.text.as_deref() else {
			continue;
		};

		match serde_json::from_str::<ApiRequestInfo>(text) {
			Ok(info) => {
				metrics.tokens_in += info.tokens_in.unwrap_or(0);
				metrics.tokens_out += info.tokens_out.unwrap_or(0);
				metrics.cache_writes += info.cache_writes.unwrap_or(0);
				metrics.cache_reads += info.cache_reads.unwrap_or(0);
				metrics.total_cost += info.cost.unwrap_or(0.0);
			}
			Err(e) => {
				debug!(ts = message.ts, error = %e, "skipping unparseable api request info");
			}
		}
	}

	metrics
}
