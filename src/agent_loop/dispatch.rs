//! Concurrent dispatch of one assistant turn's tool calls.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::TetherError;
use crate::registry::ToolRegistry;
use crate::tools::ToolArguments;
use crate::trace::{TraceEventKind, TraceRecorder};
use crate::types::{ToolCallRequest, ToolCallResult};

use super::events::{EventSink, SessionEvent};

pub(crate) struct Dispatch<'a> {
    pub registry: &'a ToolRegistry,
    pub tool_timeout: Duration,
    pub cancel_grace: Duration,
    pub max_result_chars: usize,
    pub trace: &'a TraceRecorder,
    pub sink: &'a EventSink,
    pub cancel: &'a CancellationToken,
}

impl Dispatch<'_> {
    /// Run every call, concurrently, and return one result per call in
    /// request order.
    ///
    /// Per-call failures become failure results. On cancellation outstanding
    /// calls get `cancel_grace` to finish before they are aborted, and
    /// nothing is returned.
    pub async fn run(&self, calls: &[ToolCallRequest]) -> Result<Vec<ToolCallResult>, TetherError> {
        let mut slots: Vec<Option<ToolCallResult>> = vec![None; calls.len()];
        let mut tasks = JoinSet::new();

        for (index, call) in calls.iter().enumerate() {
            self.started(call);
            let prepared = self.registry.resolve(&call.name).and_then(|tool| {
                ToolArguments::parse(&tool.definition, call.arguments.clone())
                    .map(|arguments| (Arc::clone(&tool.connection), arguments))
            });
            match prepared {
                Ok((connection, arguments)) => {
                    let name = call.name.clone();
                    let timeout = self.tool_timeout;
                    tasks.spawn(async move {
                        (index, connection.invoke(&name, arguments, timeout).await)
                    });
                }
                Err(error) => slots[index] = Some(self.finished(call, Err(error))),
            }
        }

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    self.drain_after_cancel(&mut tasks).await;
                    return Err(TetherError::Canceled);
                }
                joined = tasks.join_next() => match joined {
                    Some(Ok((index, outcome))) => {
                        slots[index] = Some(self.finished(&calls[index], outcome));
                    }
                    Some(Err(join_error)) => {
                        tracing::error!(error = %join_error, "Tool call task failed");
                    }
                    None => break,
                },
            }
        }

        Ok(calls
            .iter()
            .zip(slots)
            .map(|(call, slot)| {
                slot.unwrap_or_else(|| {
                    self.finished(
                        call,
                        Err(TetherError::invocation(
                            &call.name,
                            "tool call task ended without a result",
                        )),
                    )
                })
            })
            .collect())
    }

    async fn drain_after_cancel(&self, tasks: &mut JoinSet<(usize, Result<serde_json::Value, TetherError>)>) {
        let outstanding = tasks.len();
        if outstanding == 0 {
            return;
        }
        let drain = async { while tasks.join_next().await.is_some() {} };
        if tokio::time::timeout(self.cancel_grace, drain).await.is_err() {
            tracing::warn!(
                outstanding,
                grace_ms = self.cancel_grace.as_millis() as u64,
                "Aborting tool calls still running after cancellation grace period"
            );
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }
        self.trace.record(
            TraceEventKind::Error,
            "tool dispatch canceled",
            json!({ "outstanding": outstanding }),
        );
    }

    fn started(&self, call: &ToolCallRequest) {
        tracing::debug!(call_id = %call.id, tool = %call.name, "Dispatching tool call");
        self.trace.record(
            TraceEventKind::ToolCallStarted,
            format!("tool {} started", call.name),
            json!({ "call_id": call.id, "tool": call.name, "arguments": call.arguments }),
        );
        self.sink.emit(SessionEvent::ToolCallStarted {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            arguments: call.arguments.clone(),
        });
    }

    fn finished(
        &self,
        call: &ToolCallRequest,
        outcome: Result<serde_json::Value, TetherError>,
    ) -> ToolCallResult {
        let result = match outcome {
            Ok(output) => ToolCallResult::success(call, truncate_output(output, self.max_result_chars)),
            Err(error) => {
                if error.is_per_call() {
                    tracing::warn!(call_id = %call.id, tool = %call.name, error = %error, "Tool call failed");
                } else {
                    tracing::error!(call_id = %call.id, tool = %call.name, error = %error, "Tool call failed unexpectedly");
                }
                self.sink.emit(SessionEvent::error(&error, false));
                ToolCallResult::failure(call, &error)
            }
        };
        self.trace.record(
            TraceEventKind::ToolCallFinished,
            format!(
                "tool {} {}",
                call.name,
                if result.is_error() { "failed" } else { "succeeded" }
            ),
            json!({ "call_id": call.id, "tool": call.name, "outcome": result.outcome }),
        );
        self.sink.emit(SessionEvent::ToolCallFinished {
            result: result.clone(),
        });
        result
    }
}

/// Cut output longer than `max_chars` characters, noting the original length.
/// Non-string output is measured in its JSON form.
pub(crate) fn truncate_output(output: serde_json::Value, max_chars: usize) -> serde_json::Value {
    let text = match &output {
        serde_json::Value::String(text) => text.clone(),
        other => other.to_string(),
    };
    let length = text.chars().count();
    if length <= max_chars {
        return output;
    }
    let kept: String = text.chars().take(max_chars).collect();
    serde_json::Value::String(format!(
        "{kept}... [Content truncated, original length: {length}]"
    ))
}
