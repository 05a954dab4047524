// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::TaskIdError;

/// Identifier of a task. Also used as the task's directory name on disk, so
/// parsing rejects anything that could escape the tasks directory.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
	pub fn new() -> Self {
		Self(uuid7::uuid7().to_string())
	}

	/// Create a TaskId from an existing string without validation.
	/// Use `parse()` if the value comes from outside the process.
	pub fn from_string(s: String) -> Self {
		Self(s)
	}

	pub fn parse(s: &str) -> Result<Self, TaskIdError> {
		if s.is_empty() {
			return Err(TaskIdError::Empty);
		}

		if s == "."
			|| s == ".."
			|| s
				.chars()
				.any(|c| matches!(c, '/' | '\\' | '\0') || c.is_control())
		{
			return Err(TaskIdError::InvalidCharacters(s.to_string()));
		}

		Ok(Self(s.to_string()))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl Default for TaskId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for TaskId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl FromStr for TaskId {
	type Err = TaskIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::parse(s)
	}
}

/// Stable per-ledger identifier of a UI message. Unlike array positions it
/// survives deletes of other messages. `0` means "not yet assigned".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageSeq(u64);

impl MessageSeq {
	pub const UNASSIGNED: MessageSeq = MessageSeq(0);

	pub fn new(value: u64) -> Self {
		Self(value)
	}

	pub fn get(self) -> u64 {
		self.0
	}

	pub fn is_unassigned(&self) -> bool {
		self.0 == 0
	}
}

impl fmt::Display for MessageSeq {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "#{}", self.0)
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
	User,
	Assistant,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
	Text {
		text: String,
	},
	Image {
		source: serde_json::Value,
	},
	ToolUse {
		id: String,
		name: String,
		input: serde_json::Value,
	},
	ToolResult {
		tool_use_id: String,
		#[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
		content: serde_json::Value,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		is_error: Option<bool>,
	},
	Thinking {
		thinking: String,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		signature: Option<String>,
	},
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
	Text(String),
	Blocks(Vec<ContentBlock>),
}

/// One turn of the model-facing conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationEntry {
	pub role: Role,
	pub content: Content,
}

impl ConversationEntry {
	pub fn user(text: impl Into<String>) -> Self {
		Self {
			role: Role::User,
			content: Content::Text(text.into()),
		}
	}

	pub fn assistant(text: impl Into<String>) -> Self {
		Self {
			role: Role::Assistant,
			content: Content::Text(text.into()),
		}
	}

	pub fn with_blocks(role: Role, blocks: Vec<ContentBlock>) -> Self {
		Self {
			role,
			content: Content::Blocks(blocks),
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AskKind {
	Followup,
	PlanModeRespond,
	Command,
	CommandOutput,
	CompletionResult,
	Tool,
	ApiReqFailed,
	ResumeTask,
	ResumeCompletedTask,
	MistakeLimitReached,
	BrowserActionLaunch,
	UseMcpServer,
	NewTask,
	Condense,
	SummarizeTask,
	ReportBug,
}

impl AskKind {
	/// Wire name, as serialized.
	pub fn as_str(&self) -> &'static str {
		match self {
			AskKind::Followup => "followup",
			AskKind::PlanModeRespond => "plan_mode_respond",
			AskKind::Command => "command",
			AskKind::CommandOutput => "command_output",
			AskKind::CompletionResult => "completion_result",
			AskKind::Tool => "tool",
			AskKind::ApiReqFailed => "api_req_failed",
			AskKind::ResumeTask => "resume_task",
			AskKind::ResumeCompletedTask => "resume_completed_task",
			AskKind::MistakeLimitReached => "mistake_limit_reached",
			AskKind::BrowserActionLaunch => "browser_action_launch",
			AskKind::UseMcpServer => "use_mcp_server",
			AskKind::NewTask => "new_task",
			AskKind::Condense => "condense",
			AskKind::SummarizeTask => "summarize_task",
			AskKind::ReportBug => "report_bug",
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SayKind {
	Task,
	Error,
	ApiReqStarted,
	ApiReqFinished,
	Text,
	Reasoning,
	CompletionResult,
	UserFeedback,
	UserFeedbackDiff,
	ApiReqRetried,
	Command,
	CommandOutput,
	Tool,
	ShellIntegrationWarning,
	ShellIntegrationWarningWithSuggestion,
	BrowserActionLaunch,
	BrowserAction,
	BrowserActionResult,
	McpServerRequestStarted,
	McpServerResponse,
	McpNotification,
	UseMcpServer,
	DiffError,
	DeletedApiReqs,
	IgnoreError,
	CheckpointCreated,
	LoadMcpDocumentation,
	Info,
	TaskProgress,
	ErrorRetry,
	Hook,
	HookOutput,
}

impl SayKind {
	/// Wire name, as serialized.
	pub fn as_str(&self) -> &'static str {
		match self {
			SayKind::Task => "task",
			SayKind::Error => "error",
			SayKind::ApiReqStarted => "api_req_started",
			SayKind::ApiReqFinished => "api_req_finished",
			SayKind::Text => "text",
			SayKind::Reasoning => "reasoning",
			SayKind::CompletionResult => "completion_result",
			SayKind::UserFeedback => "user_feedback",
			SayKind::UserFeedbackDiff => "user_feedback_diff",
			SayKind::ApiReqRetried => "api_req_retried",
			SayKind::Command => "command",
			SayKind::CommandOutput => "command_output",
			SayKind::Tool => "tool",
			SayKind::ShellIntegrationWarning => "shell_integration_warning",
			SayKind::ShellIntegrationWarningWithSuggestion => "shell_integration_warning_with_suggestion",
			SayKind::BrowserActionLaunch => "browser_action_launch",
			SayKind::BrowserAction => "browser_action",
			SayKind::BrowserActionResult => "browser_action_result",
			SayKind::McpServerRequestStarted => "mcp_server_request_started",
			SayKind::McpServerResponse => "mcp_server_response",
			SayKind::McpNotification => "mcp_notification",
			SayKind::UseMcpServer => "use_mcp_server",
			SayKind::DiffError => "diff_error",
			SayKind::DeletedApiReqs => "deleted_api_reqs",
			SayKind::IgnoreError => "ignore_error",
			SayKind::CheckpointCreated => "checkpoint_created",
			SayKind::LoadMcpDocumentation => "load_mcp_documentation",
			SayKind::Info => "info",
			SayKind::TaskProgress => "task_progress",
			SayKind::ErrorRetry => "error_retry",
			SayKind::Hook => "hook",
			SayKind::HookOutput => "hook_output",
		}
	}
}

/// Whether a UI message asks the user for input or only informs them.
/// Serialized inline as `"type": "ask", "ask": "<subtype>"`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MessageKind {
	Ask { ask: AskKind },
	Say { say: SayKind },
}

impl MessageKind {
	/// Resume prompts are transient and never count as the task's latest
	/// activity.
	pub fn is_resume(&self) -> bool {
		matches!(
			self,
			MessageKind::Ask {
				ask: AskKind::ResumeTask | AskKind::ResumeCompletedTask
			}
		)
	}

	pub fn is_say(&self, kind: SayKind) -> bool {
		matches!(self, MessageKind::Say { say } if *say == kind)
	}

	pub fn is_ask(&self, kind: AskKind) -> bool {
		matches!(self, MessageKind::Ask { ask } if *ask == kind)
	}
}

impl fmt::Display for MessageKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			MessageKind::Ask { ask } => write!(f, "ask:{}", ask.as_str()),
			MessageKind::Say { say } => write!(f, "say:{}", say.as_str()),
		}
	}
}

/// `[start, end)` window of the API log excluded by compaction.
/// Serialized as a two-element array.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedRange(pub usize, pub usize);

impl DeletedRange {
	pub fn start(&self) -> usize {
		self.0
	}

	pub fn end(&self) -> usize {
		self.1
	}

	pub fn contains(&self, index: usize) -> bool {
		index >= self.0 && index < self.1
	}
}

fn is_false(value: &bool) -> bool {
	!*value
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiMessage {
	pub ts: i64,
	#[serde(flatten)]
	pub kind: MessageKind,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub text: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub reasoning: Option<String>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub images: Vec<String>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub files: Vec<String>,
	#[serde(default, skip_serializing_if = "is_false")]
	pub partial: bool,

	/// Position of the last API entry when this message was appended. `None`
	/// when the API log was still empty.
	#[serde(
		default,
		skip_serializing_if = "Option::is_none",
		with = "history_index"
	)]
	pub conversation_history_index: Option<usize>,

	/// Truncation window active when this message was appended.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub conversation_history_deleted_range: Option<DeletedRange>,

	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub last_checkpoint_hash: Option<String>,
	#[serde(default, skip_serializing_if = "is_false")]
	pub is_checkpoint_checked_out: bool,
	#[serde(default, skip_serializing_if = "is_false")]
	pub is_operation_outside_workspace: bool,

	#[serde(default, skip_serializing_if = "MessageSeq::is_unassigned")]
	pub seq: MessageSeq,
}

impl UiMessage {
	pub fn new(kind: MessageKind) -> Self {
		Self {
			ts: now_millis(),
			kind,
			text: None,
			reasoning: None,
			images: Vec::new(),
			files: Vec::new(),
			partial: false,
			conversation_history_index: None,
			conversation_history_deleted_range: None,
			last_checkpoint_hash: None,
			is_checkpoint_checked_out: false,
			is_operation_outside_workspace: false,
			seq: MessageSeq::UNASSIGNED,
		}
	}

	pub fn say(say: SayKind, text: impl Into<String>) -> Self {
		let mut message = Self::new(MessageKind::Say { say });
		message.text = Some(text.into());
		message
	}

	pub fn ask(ask: AskKind, text: impl Into<String>) -> Self {
		let mut message = Self::new(MessageKind::Ask { ask });
		message.text = Some(text.into());
		message
	}

	pub fn with_ts(mut self, ts: i64) -> Self {
		self.ts = ts;
		self
	}

	pub fn streaming(mut self) -> Self {
		self.partial = true;
		self
	}
}

pub fn now_millis() -> i64 {
	Utc::now().timestamp_millis()
}

/// Older task files store `-1` for "no API entry yet".
mod history_index {
	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S>(index: &Option<usize>, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		match index {
			Some(i) => serializer.serialize_u64(*i as u64),
			None => serializer.serialize_none(),
		}
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<usize>, D::Error>
	where
		D: Deserializer<'de>,
	{
		let raw = Option::<i64>::deserialize(deserializer)?;
		Ok(raw.and_then(|i| usize::try_from(i).ok()))
	}
}

/// Fields to merge into an existing UI message. `None` leaves the field as
/// it is.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UiMessagePatch {
	pub text: Option<String>,
	pub reasoning: Option<String>,
	pub images: Option<Vec<String>>,
	pub files: Option<Vec<String>>,
	pub partial: Option<bool>,
	pub last_checkpoint_hash: Option<String>,
	pub is_checkpoint_checked_out: Option<bool>,
	pub is_operation_outside_workspace: Option<bool>,
}

impl UiMessagePatch {
	pub fn text(mut self, text: impl Into<String>) -> Self {
		self.text = Some(text.into());
		self
	}

	pub fn reasoning(mut self, reasoning: impl Into<String>) -> Self {
		self.reasoning = Some(reasoning.into());
		self
	}

	pub fn partial(mut self, partial: bool) -> Self {
		self.partial = Some(partial);
		self
	}

	pub fn checkpoint_hash(mut self, hash: impl Into<String>) -> Self {
		self.last_checkpoint_hash = Some(hash.into());
		self
	}

	pub fn checkpoint_checked_out(mut self, checked_out: bool) -> Self {
		self.is_checkpoint_checked_out = Some(checked_out);
		self
	}

	pub fn apply(self, message: &mut UiMessage) {
		if let Some(text) = self.text {
			message.text = Some(text);
		}
		if let Some(reasoning) = self.reasoning {
			message.reasoning = Some(reasoning);
		}
		if let Some(images) = self.images {
			message.images = images;
		}
		if let Some(files) = self.files {
			message.files = files;
		}
		if let Some(partial) = self.partial {
			message.partial = partial;
		}
		if let Some(hash) = self.last_checkpoint_hash {
			message.last_checkpoint_hash = Some(hash);
		}
		if let Some(checked_out) = self.is_checkpoint_checked_out {
			message.is_checkpoint_checked_out = checked_out;
		}
		if let Some(outside) = self.is_operation_outside_workspace {
			message.is_operation_outside_workspace = outside;
		}
	}
}

/// Per-task scalar state owned by the orchestration layer. The ledger only
/// reads it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TaskState {
	pub conversation_history_deleted_range: Option<DeletedRange>,
	pub checkpoint_manager_error_message: Option<String>,
	pub is_favorited: bool,
}

pub type SharedTaskState = Arc<RwLock<TaskState>>;

impl TaskState {
	pub fn shared(self) -> SharedTaskState {
		Arc::new(RwLock::new(self))
	}
}

/// One row of the task history index.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistorySummary {
	pub id: TaskId,
	#[serde(default)]
	pub ulid: String,
	/// Timestamp of the last message that is not a resume prompt.
	pub ts: i64,
	/// Text of the first UI message.
	#[serde(default)]
	pub task: String,
	#[serde(default)]
	pub tokens_in: u64,
	#[serde(default)]
	pub tokens_out: u64,
	#[serde(default)]
	pub cache_writes: u64,
	#[serde(default)]
	pub cache_reads: u64,
	#[serde(default)]
	pub total_cost: f64,
	/// Bytes on disk of the task directory; `0` when it could not be measured.
	#[serde(default)]
	pub size: u64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub shadow_git_config_work_tree: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub cwd_on_task_initialization: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub conversation_history_deleted_range: Option<DeletedRange>,
	#[serde(default)]
	pub is_favorited: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub checkpoint_manager_error_message: Option<String>,
}
