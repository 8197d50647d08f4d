//! The iteration driver: one conversation turn at a time, bounded.
//!
//! The driver owns the transcript and the pending-tool slot; every
//! observable state change is serialized through it. A privileged tool
//! call suspends the loop in `WaitingForApproval` until the host calls
//! [`AgentDriver::resume`] or [`AgentDriver::cancel_pending`].

use anyhow::{Context, Result, bail};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::AgentConfig;
use crate::llm::provider::{ChatProvider, LlmError, ThinkingSink, ToolChoice};
use crate::message::{Message, MessageSource, ToolInvocation};
use crate::tools::{ToolContext, ToolManager};
use crate::transcript::Transcript;

use super::situation::build_situation;

/// Driver lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverStatus {
    Running,
    /// A privileged tool call is held pending an external decision.
    WaitingForApproval,
    Completed,
}

/// What a `run`/`resume`/`cancel_pending` call produced.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// The model gave a final answer (or the loop was exhausted).
    Completed { message: Message },
    /// A privileged call awaits approval; resume or cancel to continue.
    WaitingForApproval { call: ToolInvocation },
}

/// Calls still owed execution once the pending one is settled.
struct PendingWork {
    /// Front entry is the call awaiting approval.
    calls: VecDeque<ToolInvocation>,
}

pub struct AgentDriver {
    transcript: Transcript,
    provider: Arc<dyn ChatProvider>,
    tools: Arc<dyn ToolManager>,
    config: AgentConfig,
    status: DriverStatus,
    pending: Option<PendingWork>,
    current_iteration: usize,
    cancel: CancellationToken,
    thinking_sink: Option<ThinkingSink>,
    system_prompt: Option<String>,
}

impl AgentDriver {
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        tools: Arc<dyn ToolManager>,
        config: AgentConfig,
    ) -> Self {
        if let Some(tool_calling) = provider.as_tool_calling() {
            tool_calling.set_tool_manager(tools.clone());
        }
        Self {
            transcript: Transcript::new(),
            provider,
            tools,
            config,
            status: DriverStatus::Completed,
            pending: None,
            current_iteration: 0,
            cancel: CancellationToken::new(),
            thinking_sink: None,
            system_prompt: None,
        }
    }

    /// Install a sink receiving streamed thinking fragments.
    pub fn set_thinking_sink(&mut self, sink: ThinkingSink) {
        self.thinking_sink = Some(sink);
    }

    /// System prompt seeded into an empty transcript on the next `run`.
    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) {
        self.system_prompt = Some(prompt.into());
    }

    pub fn status(&self) -> DriverStatus {
        self.status
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Token to cancel the in-flight provider call or tool execution.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The call currently awaiting approval, if any.
    pub fn pending_call(&self) -> Option<&ToolInvocation> {
        self.pending
            .as_ref()
            .and_then(|pending| pending.calls.front())
    }

    /// Start a conversation turn from a user prompt.
    pub async fn run(&mut self, prompt: &str, images: Vec<String>) -> Result<RunOutcome> {
        if self.status == DriverStatus::WaitingForApproval {
            bail!("a tool call is awaiting approval; resume or cancel it first");
        }
        self.status = DriverStatus::Running;
        self.current_iteration = 0;
        self.cancel = CancellationToken::new();
        if self.transcript.is_empty()
            && let Some(system_prompt) = &self.system_prompt
        {
            self.transcript.append(Message::system(system_prompt.clone()));
        }
        self.transcript
            .append(Message::user_with_images(prompt, images));
        self.run_loop().await
    }

    /// Execute the pending privileged call and continue the loop.
    pub async fn resume(&mut self) -> Result<RunOutcome> {
        if self.status != DriverStatus::WaitingForApproval {
            bail!("no tool call is awaiting approval");
        }
        let mut pending = self.pending.take().context("pending slot is empty")?;
        let call = pending.calls.pop_front().context("pending slot is empty")?;
        info!(tool = call.name.as_str(), "approved tool call resumed");

        self.status = DriverStatus::Running;
        self.execute_and_append(&call).await;
        if let Some(outcome) = self.drain_pending(pending).await {
            return Ok(outcome);
        }
        self.advance_iteration();
        self.run_loop().await
    }

    /// Reject the pending privileged call and continue the loop.
    pub async fn cancel_pending(&mut self) -> Result<RunOutcome> {
        if self.status != DriverStatus::WaitingForApproval {
            bail!("no tool call is awaiting approval");
        }
        let mut pending = self.pending.take().context("pending slot is empty")?;
        let call = pending.calls.pop_front().context("pending slot is empty")?;
        info!(tool = call.name.as_str(), "pending tool call cancelled");

        self.status = DriverStatus::Running;
        self.transcript
            .append(Message::tool_error(call.id.clone(), "cancelled"));
        if let Some(outcome) = self.drain_pending(pending).await {
            return Ok(outcome);
        }
        self.advance_iteration();
        self.run_loop().await
    }

    /// Reset the conversation. Refused while a call awaits approval.
    pub fn clear(&mut self) -> Result<()> {
        if self.status == DriverStatus::WaitingForApproval {
            bail!("a tool call is awaiting approval; resume or cancel it first");
        }
        self.transcript.clear();
        self.status = DriverStatus::Completed;
        self.current_iteration = 0;
        Ok(())
    }

    async fn run_loop(&mut self) -> Result<RunOutcome> {
        while self.current_iteration < self.config.max_iterations {
            if self.cancel.is_cancelled() {
                return Ok(self.complete_with_last_assistant());
            }

            // 1. Compaction, unless the provider truncates server-side.
            if !self.provider.supports_server_side_truncation() {
                self.transcript
                    .compact_if_needed(
                        self.provider.as_ref(),
                        self.config.compaction_trigger_ratio,
                        self.config.compaction_keep_pairs,
                        &self.cancel,
                    )
                    .await
                    .context("compaction failed")?;
            }

            // 2. Mandatory cleanup: stale images out, old situation out.
            self.transcript.cleanup_mandatory();

            // 3. Situation injection.
            if let Some(situation) = build_situation(
                self.tools.as_ref(),
                self.transcript.last(),
                self.current_iteration,
                self.config.max_iterations,
            ) {
                self.transcript.append(
                    Message::system(situation).with_source(MessageSource::Situation),
                );
            }

            // 4. Model call over the pair-safe tail, reasoning stripped.
            let tail: Vec<Message> = self
                .transcript
                .select_tail(self.config.context_tail_messages)
                .into_iter()
                .filter(|message| !message.is_reasoning())
                .collect();

            let response = match self.call_model(&tail).await {
                Ok(response) => response,
                Err(LlmError::Cancelled) => {
                    return Ok(self.complete_with_last_assistant());
                }
                Err(error) => return Err(error).context("provider call failed"),
            };

            // 5. Dispatch by kind.
            if response.is_tool_call() || response.is_tool_call_batch() {
                let calls: VecDeque<ToolInvocation> =
                    response.invocations().iter().cloned().collect();
                self.transcript.append(response);
                if let Some(outcome) = self.drain_pending(PendingWork { calls }).await {
                    return Ok(outcome);
                }
            } else {
                debug!("assistant answered; turn complete");
                self.transcript.append(response.clone());
                self.status = DriverStatus::Completed;
                return Ok(RunOutcome::Completed { message: response });
            }

            self.advance_iteration();
        }

        // Iteration budget exhausted without a final answer.
        warn!(
            iterations = self.config.max_iterations,
            "iteration limit reached before completion"
        );
        let truncated = Message::assistant(
            "[Stopped: the iteration limit was reached before the task finished. \
             The transcript above reflects all progress made.]",
        );
        self.transcript.append(truncated.clone());
        self.status = DriverStatus::Completed;
        Ok(RunOutcome::Completed { message: truncated })
    }

    async fn call_model(&self, tail: &[Message]) -> Result<Message, LlmError> {
        let sink = self.thinking_sink.clone();
        match self.provider.as_tool_calling() {
            Some(tool_calling) => {
                tool_calling
                    .chat_with_tool_choice(
                        tail,
                        ToolChoice::Auto,
                        self.config.enable_thinking,
                        sink,
                        &self.cancel,
                    )
                    .await
            }
            None => {
                self.provider
                    .chat(tail, self.config.enable_thinking, sink, &self.cancel)
                    .await
            }
        }
    }

    /// Execute queued calls in emission order, suspending at the first
    /// privileged one. Returns an outcome when the loop must stop here.
    async fn drain_pending(&mut self, mut pending: PendingWork) -> Option<RunOutcome> {
        while let Some(call) = pending.calls.front() {
            if self.requires_approval(call) {
                info!(tool = call.name.as_str(), "tool call requires approval");
                let held = call.clone();
                self.pending = Some(pending);
                self.status = DriverStatus::WaitingForApproval;
                return Some(RunOutcome::WaitingForApproval { call: held });
            }
            let call = pending.calls.pop_front().expect("front checked above");
            self.execute_and_append(&call).await;
            if self.cancel.is_cancelled() {
                return Some(self.complete_with_last_assistant());
            }
        }
        None
    }

    fn requires_approval(&self, call: &ToolInvocation) -> bool {
        self.tools
            .tools()
            .get(&call.name)
            .is_some_and(|tool| tool.requires_approval(&call.arguments))
    }

    /// Run one tool call through the registry and append its result with
    /// the same id.
    async fn execute_and_append(&mut self, call: &ToolInvocation) {
        debug!(tool = call.name.as_str(), id = call.id.as_str(), "executing tool");
        let ctx = ToolContext::new(self.cancel.clone());
        let output = self
            .tools
            .call_tool(&ctx, &call.name, &call.arguments)
            .await;

        let result = if output.is_error() {
            Message::tool_error(call.id.clone(), output.error)
        } else {
            Message::tool_result(call.id.clone(), output.text).with_images(output.images)
        };
        self.transcript.append(result);
    }

    fn advance_iteration(&mut self) {
        self.current_iteration += 1;
    }

    fn complete_with_last_assistant(&mut self) -> RunOutcome {
        self.status = DriverStatus::Completed;
        let message = self
            .transcript
            .messages()
            .iter()
            .rev()
            .find(|message| message.is_assistant())
            .cloned()
            .unwrap_or_else(|| Message::assistant(""));
        RunOutcome::Completed { message }
    }
}
