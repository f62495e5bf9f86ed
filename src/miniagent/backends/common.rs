//! Wire format helpers shared by OpenAI-compatible backends.

use crate::miniagent::backend::MessageChunkStream;
use crate::miniagent::error::BackendError;
use crate::miniagent::message::{
    parse_arguments, Content, ContentBlock, Message, MessageChunk, Role, TokenUsage, ToolCall,
    ToolCallDelta,
};
use crate::miniagent::toolkit::ToolMetadata;
use base64::Engine;
use futures_util::StreamExt;
use serde_json::{json, Map, Value};
use std::path::Path;

/// Convert messages to the `messages` array of a chat completion request.
/// `file://` image references are inlined as base64 `data:` URLs.
pub async fn messages_to_openai(messages: &[Message]) -> Result<Vec<Value>, BackendError> {
    let mut out = Vec::with_capacity(messages.len());
    for message in messages {
        let mut entry = Map::new();
        entry.insert("role".into(), json!(message.role.as_str()));

        let content = content_to_openai(&message.content).await?;
        if message.role == Role::Assistant && message.has_tool_calls() && message.content.is_empty() {
            entry.insert("content".into(), Value::Null);
        } else {
            entry.insert("content".into(), content);
        }

        if message.has_tool_calls() {
            let calls: Vec<Value> = message
                .tool_calls
                .iter()
                .map(|call| {
                    json!({
                        "id": call.id,
                        "type": "function",
                        "function": {
                            "name": call.name,
                            "arguments": arguments_to_string(&call.arguments),
                        }
                    })
                })
                .collect();
            entry.insert("tool_calls".into(), Value::Array(calls));
        }
        if let Some(id) = &message.tool_call_id {
            entry.insert("tool_call_id".into(), json!(id));
        }
        out.push(Value::Object(entry));
    }
    Ok(out)
}

fn arguments_to_string(arguments: &Value) -> String {
    match arguments {
        Value::String(raw) => raw.clone(),
        other => other.to_string(),
    }
}

async fn content_to_openai(content: &Content) -> Result<Value, BackendError> {
    match content {
        Content::Text(text) => Ok(json!(text)),
        Content::Blocks(blocks) => {
            let mut parts = Vec::with_capacity(blocks.len());
            for block in blocks {
                match block {
                    ContentBlock::Text { text } => parts.push(json!({"type": "text", "text": text})),
                    ContentBlock::Image { url, detail } => {
                        let mut image = Map::new();
                        image.insert("url".into(), json!(resolve_image_url(url).await?));
                        if let Some(detail) = detail {
                            image.insert("detail".into(), json!(detail));
                        }
                        parts.push(json!({"type": "image_url", "image_url": image}));
                    }
                }
            }
            Ok(Value::Array(parts))
        }
    }
}

/// `file://` URLs become `data:<mime>;base64,...`; anything else is passed through.
pub async fn resolve_image_url(url: &str) -> Result<String, BackendError> {
    let Some(path) = url.strip_prefix("file://") else {
        return Ok(url.to_string());
    };
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        BackendError::Malformed(format!("cannot read image '{}': {}", path, e))
    })?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    Ok(format!("data:{};base64,{}", image_mime(Path::new(path)), encoded))
}

fn image_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        _ => "image/png",
    }
}

/// Convert tool metadata to the `tools` array of a chat completion request.
pub fn tools_to_openai(tools: &[ToolMetadata]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.json_schema(),
                }
            })
        })
        .collect()
}

fn parse_usage(value: &Value) -> Option<TokenUsage> {
    let usage = value.get("usage").filter(|u| u.is_object())?;
    let field = |name: &str| usage.get(name).and_then(|v| v.as_u64()).map(|v| v as usize);
    let input_tokens = field("prompt_tokens").unwrap_or(0);
    let output_tokens = field("completion_tokens").unwrap_or(0);
    Some(TokenUsage {
        input_tokens,
        output_tokens,
        total_tokens: field("total_tokens").unwrap_or(input_tokens + output_tokens),
    })
}

fn api_error(error: &Value) -> BackendError {
    let message = error
        .get("message")
        .and_then(|m| m.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| error.to_string());
    BackendError::Api(message)
}

/// Parse a non-streaming chat completion body.
pub fn parse_completion(body: &Value) -> Result<(Message, Option<TokenUsage>), BackendError> {
    if let Some(error) = body.get("error").filter(|e| !e.is_null()) {
        return Err(api_error(error));
    }
    let message = body
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .ok_or_else(|| BackendError::Malformed("response has no choices[0].message".into()))?;

    let content = message
        .get("content")
        .and_then(|c| c.as_str())
        .unwrap_or_default()
        .to_string();
    let mut result = Message::assistant(content);

    if let Some(reasoning) = message
        .get("reasoning_content")
        .and_then(|r| r.as_str())
        .filter(|r| !r.is_empty())
    {
        result.reasoning_content = Some(reasoning.to_string());
    }

    if let Some(calls) = message.get("tool_calls").and_then(|c| c.as_array()) {
        for call in calls {
            let function = call
                .get("function")
                .ok_or_else(|| BackendError::Malformed("tool call without function".into()))?;
            let name = function
                .get("name")
                .and_then(|n| n.as_str())
                .ok_or_else(|| BackendError::Malformed("tool call without name".into()))?;
            let arguments = match function.get("arguments") {
                Some(Value::String(raw)) => parse_arguments(raw),
                Some(other) => other.clone(),
                None => Value::Object(Map::new()),
            };
            let mut tool_call = ToolCall::new(name, arguments);
            if let Some(id) = call.get("id").and_then(|i| i.as_str()) {
                tool_call.id = id.to_string();
            }
            result.tool_calls.push(tool_call);
        }
    }

    Ok((result, parse_usage(body)))
}

/// Parse one `data:` payload of a streamed completion. Returns `None` for
/// payloads that carry nothing (keep-alives, empty deltas).
pub fn parse_stream_chunk(value: &Value) -> Result<Option<MessageChunk>, BackendError> {
    if let Some(error) = value.get("error").filter(|e| !e.is_null()) {
        return Err(api_error(error));
    }
    let mut chunk = MessageChunk {
        usage: parse_usage(value),
        ..MessageChunk::default()
    };

    if let Some(choice) = value.get("choices").and_then(|c| c.get(0)) {
        let delta = choice.get("delta").unwrap_or(&Value::Null);
        let text = |key: &str| {
            delta
                .get(key)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };
        chunk.content = text("content");
        chunk.reasoning_content = text("reasoning_content");
        chunk.finish_reason = choice
            .get("finish_reason")
            .and_then(|f| f.as_str())
            .map(str::to_string);

        if let Some(calls) = delta.get("tool_calls").and_then(|c| c.as_array()) {
            for (position, call) in calls.iter().enumerate() {
                let function = call.get("function");
                chunk.tool_calls.push(ToolCallDelta {
                    index: call
                        .get("index")
                        .and_then(|i| i.as_u64())
                        .map(|i| i as usize)
                        .unwrap_or(position),
                    id: call.get("id").and_then(|i| i.as_str()).map(str::to_string),
                    name: function
                        .and_then(|f| f.get("name"))
                        .and_then(|n| n.as_str())
                        .map(str::to_string),
                    arguments: function
                        .and_then(|f| f.get("arguments"))
                        .and_then(|a| a.as_str())
                        .unwrap_or_default()
                        .to_string(),
                });
            }
        }
    }

    Ok(if chunk.is_empty() { None } else { Some(chunk) })
}

/// Turn a `text/event-stream` response into a chunk stream. The stream ends at
/// `data: [DONE]` or when the connection closes; the first error ends it.
pub fn sse_chunk_stream(response: reqwest::Response) -> MessageChunkStream {
    Box::pin(async_stream::stream! {
        let mut bytes = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();

        'read: while let Some(next) = bytes.next().await {
            let data = match next {
                Ok(data) => data,
                Err(e) => {
                    yield Err(BackendError::Stream(e.to_string()));
                    break 'read;
                }
            };
            buffer.extend_from_slice(&data);

            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let raw: Vec<u8> = buffer.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&raw).trim().to_string();
                let Some(payload) = line.strip_prefix("data:") else {
                    continue;
                };
                let payload = payload.trim();
                if payload == "[DONE]" {
                    break 'read;
                }
                let parsed = serde_json::from_str::<Value>(payload)
                    .map_err(|e| BackendError::Malformed(format!("bad stream payload: {}", e)))
                    .and_then(|value| parse_stream_chunk(&value));
                match parsed {
                    Ok(Some(chunk)) => {
                        yield Ok(chunk);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        yield Err(e);
                        break 'read;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_file_images_become_data_urls() {
        let mut file = tempfile::Builder::new().suffix(".jpg").tempfile().unwrap();
        file.write_all(b"fake-jpeg").unwrap();
        let url = format!("file://{}", file.path().display());

        let message = Message::user(Content::multimodal().with_text("look").with_image(url));
        let wire = messages_to_openai(&[message]).await.unwrap();
        let image_url = wire[0]["content"][1]["image_url"]["url"].as_str().unwrap();
        assert!(image_url.starts_with("data:image/jpeg;base64,"));
        assert_eq!(wire[0]["content"][0]["text"], "look");
    }

    #[tokio::test]
    async fn test_tool_exchange_wire_format() {
        let call = ToolCall::new("get_time", json!({"tz": "UTC"}));
        let messages = vec![
            Message::assistant("").with_tool_calls(vec![call.clone()]),
            Message::tool_result(&call, "12:00"),
        ];
        let wire = messages_to_openai(&messages).await.unwrap();
        assert!(wire[0]["content"].is_null());
        assert_eq!(wire[0]["tool_calls"][0]["function"]["arguments"], "{\"tz\":\"UTC\"}");
        assert_eq!(wire[1]["tool_call_id"], call.id.as_str());
    }

    #[test]
    fn test_parse_completion_with_reasoning_and_tools() {
        let body = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "reasoning_content": "need the time",
                    "tool_calls": [{
                        "id": "call_9",
                        "type": "function",
                        "function": {"name": "get_time", "arguments": "{}"}
                    }]
                }
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        });
        let (message, usage) = parse_completion(&body).unwrap();
        assert_eq!(message.reasoning_content.as_deref(), Some("need the time"));
        assert_eq!(message.tool_calls[0].id, "call_9");
        assert_eq!(usage.unwrap().total_tokens, 15);
    }

    #[test]
    fn test_parse_completion_errors() {
        assert!(matches!(
            parse_completion(&json!({"error": {"message": "bad key"}})),
            Err(BackendError::Api(m)) if m == "bad key"
        ));
        assert!(matches!(
            parse_completion(&json!({"choices": []})),
            Err(BackendError::Malformed(_))
        ));
    }

    #[test]
    fn test_parse_stream_chunk_skips_empty_delta() {
        let empty = json!({"choices": [{"delta": {"role": "assistant"}}]});
        assert!(parse_stream_chunk(&empty).unwrap().is_none());

        let text = json!({"choices": [{"delta": {"content": "Hel"}}]});
        assert_eq!(parse_stream_chunk(&text).unwrap().unwrap().content, "Hel");
    }
}
