//! Folding a delta stream back into a complete response.

use futures::{Stream, StreamExt};

use crate::error::TetherError;
use crate::types::{ResponseDelta, ToolCallRequest, Usage};

use super::ProviderResponse;

#[derive(Debug)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Accumulates [`ResponseDelta`]s into a [`ProviderResponse`].
///
/// Tool-call argument fragments are concatenated per call id and parsed as
/// JSON once the stream ends. Fragments that do not form valid JSON make the
/// whole response malformed.
#[derive(Debug, Default)]
pub struct ResponseAssembler {
    text: String,
    calls: Vec<PartialToolCall>,
    usage: Usage,
    done: bool,
}

impl ResponseAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, delta: ResponseDelta) -> Result<(), TetherError> {
        if self.done {
            return Err(TetherError::MalformedResponse(
                "delta received after end of response".into(),
            ));
        }
        match delta {
            ResponseDelta::Text { text } => self.text.push_str(&text),
            ResponseDelta::ToolCallStart { id, name } => {
                if id.trim().is_empty() || name.trim().is_empty() {
                    return Err(TetherError::MalformedResponse(
                        "tool call without id or name".into(),
                    ));
                }
                if self.calls.iter().any(|call| call.id == id) {
                    return Err(TetherError::MalformedResponse(format!(
                        "tool call id '{id}' started twice"
                    )));
                }
                self.calls.push(PartialToolCall {
                    id,
                    name,
                    arguments: String::new(),
                });
            }
            ResponseDelta::ToolCallArguments { id, fragment } => {
                let call = self
                    .calls
                    .iter_mut()
                    .find(|call| call.id == id)
                    .ok_or_else(|| {
                        TetherError::MalformedResponse(format!(
                            "arguments for unknown tool call '{id}'"
                        ))
                    })?;
                call.arguments.push_str(&fragment);
            }
            ResponseDelta::Usage { usage } => self.usage.merge(&usage),
            ResponseDelta::Done => self.done = true,
        }
        Ok(())
    }

    pub fn finish(self) -> Result<ProviderResponse, TetherError> {
        let mut tool_calls = Vec::with_capacity(self.calls.len());
        for call in self.calls {
            let raw = call.arguments.trim();
            let arguments = if raw.is_empty() {
                serde_json::Value::Object(serde_json::Map::new())
            } else {
                serde_json::from_str(raw).map_err(|e| {
                    TetherError::MalformedResponse(format!(
                        "arguments for tool call '{}' are not valid JSON: {e}",
                        call.id
                    ))
                })?
            };
            tool_calls.push(ToolCallRequest::new(call.id, call.name, arguments));
        }
        Ok(ProviderResponse {
            text: self.text,
            tool_calls,
            usage: self.usage,
        })
    }

    /// Drain a delta stream, reporting text fragments as they arrive.
    pub async fn collect<S, F>(stream: S, mut on_text: F) -> Result<ProviderResponse, TetherError>
    where
        S: Stream<Item = Result<ResponseDelta, TetherError>>,
        F: FnMut(&str),
    {
        let mut assembler = Self::new();
        futures::pin_mut!(stream);
        while let Some(delta) = stream.next().await {
            let delta = delta?;
            if let ResponseDelta::Text { text } = &delta {
                if !text.is_empty() {
                    on_text(text);
                }
            }
            let finished = matches!(delta, ResponseDelta::Done);
            assembler.push(delta)?;
            if finished {
                break;
            }
        }
        assembler.finish()
    }
}
