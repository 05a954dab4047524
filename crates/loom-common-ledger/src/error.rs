// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use std::fmt;

use thiserror::Error;

use crate::model::{MessageSeq, TaskId};

#[derive(Debug, Error)]
pub enum TaskIdError {
	#[error("task ID must not be empty")]
	Empty,

	#[error("task ID contains path separators or control characters: '{0}'")]
	InvalidCharacters(String),
}

/// Failures reported by a [`crate::PersistenceGateway`].
#[derive(Debug, Error)]
pub enum TaskStoreError {
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	#[error("task not found: {0}")]
	NotFound(String),
}

/// The persistence step that failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PersistOp {
	WriteApiHistory,
	WriteUiMessages,
	WriteSummary,
}

impl PersistOp {
	pub fn as_str(&self) -> &'static str {
		match self {
			PersistOp::WriteApiHistory => "write_api_history",
			PersistOp::WriteUiMessages => "write_ui_messages",
			PersistOp::WriteSummary => "write_summary",
		}
	}
}

impl fmt::Display for PersistOp {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A gateway failure with the task and step it happened in. The in-memory
/// mutation that preceded it has already been applied.
#[derive(Debug, Error)]
#[error("{operation} failed for task {task_id}: {source}")]
pub struct PersistenceError {
	pub task_id: TaskId,
	pub operation: PersistOp,
	#[source]
	pub source: TaskStoreError,
}

#[derive(Debug, Error)]
pub enum LedgerError {
	#[error("invalid message index: {index} (log has {len} messages)")]
	Index { index: usize, len: usize },

	#[error("no message with sequence {0}")]
	UnknownMessage(MessageSeq),

	#[error("message sequence numbers exhausted")]
	SeqExhausted,

	#[error(transparent)]
	Persistence(#[from] PersistenceError),

	#[error("ledger critical section aborted: {0}")]
	Join(#[from] tokio::task::JoinError),
}

impl LedgerError {
	/// Errors returned before any side effect.
	pub fn is_rejected(&self) -> bool {
		matches!(
			self,
			LedgerError::Index { .. } | LedgerError::UnknownMessage(_) | LedgerError::SeqExhausted
		)
	}
}

pub type LedgerResult<T> = Result<T, LedgerError>;
