use crate::models;
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Rewrites one upstream Codex Responses event stream into OpenAI
/// `chat.completion.chunk` events. One transformer spans exactly one stream.
pub struct SseTransformer {
    model: String,
    response_id: String,
    role_sent: bool,
    saw_tool_calls: bool,
    tool_index_by_item: HashMap<String, usize>,
    next_tool_index: usize,
}

impl SseTransformer {
    pub fn new(model: &str) -> Self {
        let model = model.trim();
        Self {
            model: if model.is_empty() {
                models::GPT_5.to_string()
            } else {
                model.to_string()
            },
            response_id: String::new(),
            role_sent: false,
            saw_tool_calls: false,
            tool_index_by_item: HashMap::new(),
            next_tool_index: 0,
        }
    }

    /// Processes a single SSE data payload. Returns the JSON chunks to emit
    /// (in order) and whether the upstream signalled `[DONE]`.
    pub fn transform(&mut self, payload: &[u8]) -> Result<(Vec<String>, bool)> {
        let text = std::str::from_utf8(payload).context("upstream event is not UTF-8")?;
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok((Vec::new(), false));
        }
        if trimmed == "[DONE]" {
            return Ok((Vec::new(), true));
        }

        let parsed: Value =
            serde_json::from_str(trimmed).context("invalid upstream JSON event")?;
        let event = parsed
            .as_object()
            .ok_or_else(|| anyhow!("upstream event is not a JSON object"))?;

        // Already OpenAI-shaped chunks pass through verbatim.
        if event.get("object").and_then(Value::as_str) == Some("chat.completion.chunk") {
            return Ok((vec![trimmed.to_string()], false));
        }

        let event_type = event.get("type").and_then(Value::as_str).unwrap_or_default();
        let sequence = event.get("sequence_number").cloned().unwrap_or(Value::Null);

        // Reasoning items can repeat with incrementing output_index; only the
        // first is surfaced so clients render a single thinking pane, and only
        // .delta events carry incremental text.
        if event_type.starts_with("response.reasoning") {
            if event
                .get("output_index")
                .and_then(Value::as_u64)
                .unwrap_or(0)
                > 0
            {
                return Ok((Vec::new(), false));
            }
            if !event_type.contains(".delta") {
                return Ok((Vec::new(), false));
            }
            let reasoning_text = extract_reasoning_content(event);
            if reasoning_text.is_empty() {
                return Ok((Vec::new(), false));
            }
            let mut chunks = Vec::new();
            self.push_role_chunk(&sequence, &mut chunks);
            chunks.push(
                self.chunk(&sequence, json!({ "reasoning_content": reasoning_text }))
                    .to_string(),
            );
            return Ok((chunks, false));
        }

        match event_type {
            "response.created" => {
                if let Some(id) = event
                    .get("response")
                    .and_then(|response| response.get("id"))
                    .and_then(Value::as_str)
                {
                    self.response_id = format!("chatcmpl-{id}");
                }
                Ok((Vec::new(), false))
            }

            "response.output_item.added" => {
                let Some(item) = event.get("item").and_then(Value::as_object) else {
                    return Ok((Vec::new(), false));
                };
                if item.get("type").and_then(Value::as_str) != Some("function_call") {
                    return Ok((Vec::new(), false));
                }

                let item_id = item.get("id").and_then(Value::as_str).unwrap_or_default();
                let index = match self.tool_index_by_item.get(item_id) {
                    Some(index) => *index,
                    None => {
                        let index = self.next_tool_index;
                        self.next_tool_index += 1;
                        self.tool_index_by_item.insert(item_id.to_string(), index);
                        index
                    }
                };
                let call_id = match item.get("call_id").and_then(Value::as_str) {
                    Some(call_id) if !call_id.is_empty() => call_id.to_string(),
                    _ => format!("call_{item_id}"),
                };
                let name = item.get("name").and_then(Value::as_str).unwrap_or_default();
                self.saw_tool_calls = true;

                let mut chunks = Vec::new();
                self.push_role_chunk(&sequence, &mut chunks);
                chunks.push(
                    self.chunk(
                        &sequence,
                        json!({
                            "tool_calls": [{
                                "index": index,
                                "id": call_id,
                                "type": "function",
                                "function": { "name": name, "arguments": "" },
                            }]
                        }),
                    )
                    .to_string(),
                );
                Ok((chunks, false))
            }

            "response.function_call_arguments.delta" => {
                let item_id = event
                    .get("item_id")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let Some(&index) = self.tool_index_by_item.get(item_id) else {
                    return Ok((Vec::new(), false));
                };
                let delta = event.get("delta").and_then(Value::as_str).unwrap_or_default();

                let mut chunks = Vec::new();
                self.push_role_chunk(&sequence, &mut chunks);
                chunks.push(
                    self.chunk(
                        &sequence,
                        json!({
                            "tool_calls": [{
                                "index": index,
                                "function": { "arguments": delta },
                            }]
                        }),
                    )
                    .to_string(),
                );
                Ok((chunks, false))
            }

            "response.function_call_arguments.done" | "response.output_item.done" => {
                Ok((Vec::new(), false))
            }

            "response.output_text.delta" => {
                let delta = event.get("delta").and_then(Value::as_str).unwrap_or_default();
                let mut chunks = Vec::new();
                self.push_role_chunk(&sequence, &mut chunks);
                chunks.push(self.chunk(&sequence, json!({ "content": delta })).to_string());
                Ok((chunks, false))
            }

            "response.completed" => {
                let finish = if self.saw_tool_calls { "tool_calls" } else { "stop" };
                let usage = map_usage(event);
                let final_chunk = json!({
                    "id": self.response_id,
                    "object": "chat.completion.chunk",
                    "created": sequence,
                    "model": self.model,
                    "choices": [{ "index": 0, "delta": {}, "finish_reason": finish }],
                    "usage": usage,
                });
                Ok((vec![final_chunk.to_string()], false))
            }

            _ => Ok((Vec::new(), false)),
        }
    }

    fn push_role_chunk(&mut self, sequence: &Value, chunks: &mut Vec<String>) {
        if self.role_sent {
            return;
        }
        self.role_sent = true;
        chunks.push(self.chunk(sequence, json!({ "role": "assistant" })).to_string());
    }

    fn chunk(&self, sequence: &Value, delta: Value) -> Value {
        json!({
            "id": self.response_id,
            "object": "chat.completion.chunk",
            "created": sequence,
            "model": self.model,
            "choices": [{ "index": 0, "delta": delta, "finish_reason": null }],
        })
    }
}

/// Maps the upstream usage record onto OpenAI field names, defaulting to
/// zeros so clients that require a usage object always see one.
fn map_usage(event: &Map<String, Value>) -> Value {
    let usage = event
        .get("response")
        .and_then(|response| response.get("usage"))
        .and_then(Value::as_object);

    let mut mapped = Map::new();
    if let Some(usage) = usage {
        let prompt = usage
            .get("prompt_tokens")
            .or_else(|| usage.get("input_tokens"))
            .and_then(Value::as_u64);
        if let Some(prompt) = prompt {
            mapped.insert("prompt_tokens".to_string(), json!(prompt));
        }
        let completion = usage
            .get("completion_tokens")
            .or_else(|| usage.get("output_tokens"))
            .and_then(Value::as_u64);
        if let Some(completion) = completion {
            mapped.insert("completion_tokens".to_string(), json!(completion));
        }
        if let Some(total) = usage.get("total_tokens").and_then(Value::as_u64) {
            mapped.insert("total_tokens".to_string(), json!(total));
        } else if let (Some(prompt), Some(completion)) = (prompt, completion) {
            mapped.insert("total_tokens".to_string(), json!(prompt + completion));
        }
    }

    if mapped.is_empty() {
        return json!({ "prompt_tokens": 0, "completion_tokens": 0, "total_tokens": 0 });
    }
    Value::Object(mapped)
}

/// Injects a paragraph break before bold markdown headers in reasoning text
/// so they render on their own line. Triggers only when the delta both opens
/// with `**` and closes it later in the same delta; tokens split across
/// deltas pass through untouched.
fn fix_reasoning_markdown_headers(text: &str) -> String {
    if text.len() >= 4 && text.starts_with("**") && text[2..].contains("**") {
        return format!("\n\n{text}");
    }
    text.to_string()
}

fn extract_reasoning_content(event: &Map<String, Value>) -> String {
    let mut content = "";
    if let Some(delta) = event.get("delta").and_then(Value::as_str) {
        if !delta.is_empty() {
            content = delta;
        }
    }
    if content.is_empty() {
        if let Some(text) = event.get("text").and_then(Value::as_str) {
            if !text.is_empty() {
                content = text;
            }
        }
    }
    if content.is_empty() {
        if let Some(part_text) = event
            .get("part")
            .and_then(|part| part.get("text"))
            .and_then(Value::as_str)
        {
            if !part_text.is_empty() {
                content = part_text;
            }
        }
    }
    if content.is_empty() {
        if let Some(item) = event.get("item").and_then(Value::as_object) {
            if item
                .get("encrypted_content")
                .and_then(Value::as_str)
                .is_some_and(|encrypted| !encrypted.is_empty())
            {
                return String::new();
            }
            content = first_summary_text(item.get("summary"));
        }
    }
    if content.is_empty() {
        content = first_summary_text(event.get("summary"));
    }

    if content.is_empty() {
        String::new()
    } else {
        fix_reasoning_markdown_headers(content)
    }
}

fn first_summary_text(summary: Option<&Value>) -> &str {
    summary
        .and_then(Value::as_array)
        .and_then(|entries| {
            entries
                .iter()
                .filter_map(|entry| entry.get("text").and_then(Value::as_str))
                .find(|text| !text.is_empty())
        })
        .unwrap_or_default()
}

/// Scans `data:` lines from an SSE byte stream, aggregating multi-line
/// payloads per event and invoking the handler once per complete event.
/// Comment lines and non-data fields are ignored; a trailing event without a
/// terminating blank line is still flushed.
fn scan_sse_events<R: Read>(reader: R, mut handle: impl FnMut(&str) -> Result<()>) -> Result<()> {
    let mut reader = BufReader::new(reader);
    let mut data_lines: Vec<String> = Vec::new();
    let mut line = String::new();

    loop {
        line.clear();
        let read = reader
            .read_line(&mut line)
            .context("failed reading SSE stream")?;
        if read == 0 {
            break;
        }
        let stripped = line.trim_end_matches('\n').trim_end_matches('\r');

        if stripped.trim().is_empty() {
            if !data_lines.is_empty() {
                let raw = data_lines.join("\n");
                data_lines.clear();
                handle(&raw)?;
            }
            continue;
        }
        if stripped.starts_with(':') {
            continue;
        }
        if let Some(payload) = stripped.strip_prefix("data:") {
            let payload = payload.strip_prefix(' ').unwrap_or(payload);
            data_lines.push(payload.to_string());
        }
    }

    if !data_lines.is_empty() {
        let raw = data_lines.join("\n");
        handle(&raw)?;
    }
    Ok(())
}

fn write_sse_data<W: Write>(writer: &mut W, payload: &str) -> Result<()> {
    writer
        .write_all(b"data: ")
        .and_then(|_| writer.write_all(payload.as_bytes()))
        .and_then(|_| writer.write_all(b"\n\n"))
        .and_then(|_| writer.flush())
        .context("failed writing SSE event")
}

/// Rewrites an upstream stream into OpenAI chunk events, flushing each event
/// as it is produced. Malformed events are skipped rather than aborting the
/// stream, and a terminal `data: [DONE]` is always the last thing written.
pub fn rewrite_sse_stream<R: Read, W: Write>(reader: R, writer: &mut W, model: &str) -> Result<()> {
    let mut transformer = SseTransformer::new(model);
    let mut done_seen = false;

    scan_sse_events(reader, |raw| {
        match transformer.transform(raw.as_bytes()) {
            Ok((chunks, done)) => {
                if done {
                    done_seen = true;
                    return write_sse_data(writer, "[DONE]");
                }
                for chunk in chunks {
                    write_sse_data(writer, &chunk)?;
                }
            }
            Err(err) => {
                debug!(error = %err, "skipping malformed upstream event");
            }
        }
        Ok(())
    })?;

    if !done_seen {
        write_sse_data(writer, "[DONE]")?;
    }
    Ok(())
}

/// Copies upstream SSE events through unchanged, normalizing framing and
/// guaranteeing the terminal `data: [DONE]`.
pub fn pass_through_sse_stream<R: Read, W: Write>(reader: R, writer: &mut W) -> Result<()> {
    let mut done_seen = false;

    scan_sse_events(reader, |raw| {
        if raw.trim() == "[DONE]" {
            done_seen = true;
            return write_sse_data(writer, "[DONE]");
        }
        if !raw.is_empty() {
            write_sse_data(writer, raw)?;
        }
        Ok(())
    })?;

    if !done_seen {
        write_sse_data(writer, "[DONE]")?;
    }
    Ok(())
}

#[derive(Debug, Default, Deserialize)]
struct StreamingDelta {
    #[serde(default)]
    role: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct StreamingChoice {
    #[serde(default)]
    delta: StreamingDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamingChunk {
    #[serde(default)]
    id: String,
    #[serde(default)]
    created: Option<i64>,
    #[serde(default)]
    model: String,
    #[serde(default)]
    choices: Vec<StreamingChoice>,
}

/// Consumes an upstream stream through the transformer and aggregates the
/// resulting chunks into a single non-streaming `chat.completion` object for
/// clients that did not ask for SSE.
pub fn buffer_chat_completion<R: Read>(reader: R, model: &str) -> Result<Value> {
    let mut transformer = SseTransformer::new(model);

    let mut response_id = String::new();
    let mut stream_model = String::new();
    let mut created: i64 = 0;
    let mut role = String::new();
    let mut content = String::new();
    let mut finish_reason = String::new();

    scan_sse_events(reader, |raw| {
        let chunks = match transformer.transform(raw.as_bytes()) {
            Ok((chunks, _done)) => chunks,
            Err(err) => {
                debug!(error = %err, "skipping malformed upstream event");
                return Ok(());
            }
        };
        for chunk_text in chunks {
            let Ok(chunk) = serde_json::from_str::<StreamingChunk>(&chunk_text) else {
                continue;
            };
            if response_id.is_empty() && !chunk.id.is_empty() {
                response_id = chunk.id;
            }
            if stream_model.is_empty() && !chunk.model.is_empty() {
                stream_model = chunk.model;
            }
            if created == 0 {
                created = chunk.created.unwrap_or(0);
            }
            for choice in chunk.choices {
                if role.is_empty() && !choice.delta.role.is_empty() {
                    role = choice.delta.role;
                }
                content.push_str(&choice.delta.content);
                if let Some(finish) = choice.finish_reason {
                    if !finish.is_empty() {
                        finish_reason = finish;
                    }
                }
            }
        }
        Ok(())
    })?;

    if response_id.is_empty() {
        response_id = "chatcmpl-buffered".to_string();
    }
    if created == 0 {
        created = epoch_seconds();
    }
    let model = if stream_model.is_empty() {
        model.to_string()
    } else {
        stream_model
    };
    if role.is_empty() {
        role = "assistant".to_string();
    }
    if finish_reason.is_empty() {
        finish_reason = "stop".to_string();
    }

    Ok(json!({
        "id": response_id,
        "object": "chat.completion",
        "created": created,
        "model": model,
        "choices": [{
            "index": 0,
            "message": { "role": role, "content": content },
            "finish_reason": finish_reason,
        }],
    }))
}

fn epoch_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect_events(output: &str) -> Vec<Value> {
        output
            .split("\n\n")
            .filter(|event| !event.is_empty())
            .map(|event| event.trim_start_matches("data: "))
            .filter(|payload| *payload != "[DONE]")
            .map(|payload| serde_json::from_str(payload).expect("valid chunk JSON"))
            .collect()
    }

    fn delta_of(chunk: &Value) -> &Value {
        &chunk["choices"][0]["delta"]
    }

    #[test]
    fn records_response_id_from_created_event() {
        let mut transformer = SseTransformer::new("gpt-5");
        let (chunks, done) = transformer
            .transform(br#"{"type":"response.created","sequence_number":0,"response":{"id":"resp_123"}}"#)
            .expect("transform");
        assert!(chunks.is_empty());
        assert!(!done);
        assert_eq!(transformer.response_id, "chatcmpl-resp_123");
    }

    #[test]
    fn first_text_delta_emits_role_then_content() {
        let mut transformer = SseTransformer::new("gpt-5");
        transformer.response_id = "chatcmpl-resp_123".to_string();

        let (chunks, _) = transformer
            .transform(br#"{"type":"response.output_text.delta","sequence_number":80,"delta":"Hello"}"#)
            .expect("transform");
        assert_eq!(chunks.len(), 2);

        let role: Value = serde_json::from_str(&chunks[0]).expect("role chunk");
        assert_eq!(role["object"].as_str(), Some("chat.completion.chunk"));
        assert_eq!(delta_of(&role)["role"].as_str(), Some("assistant"));
        assert!(delta_of(&role).get("content").is_none());
        assert_eq!(role["created"].as_i64(), Some(80));

        let content: Value = serde_json::from_str(&chunks[1]).expect("content chunk");
        assert_eq!(delta_of(&content)["content"].as_str(), Some("Hello"));

        let (chunks, _) = transformer
            .transform(br#"{"type":"response.output_text.delta","sequence_number":81,"delta":" world"}"#)
            .expect("transform");
        assert_eq!(chunks.len(), 1);
        let content: Value = serde_json::from_str(&chunks[0]).expect("content chunk");
        assert_eq!(delta_of(&content)["content"].as_str(), Some(" world"));
        assert!(delta_of(&content).get("role").is_none());
    }

    #[test]
    fn done_marker_terminates() {
        let mut transformer = SseTransformer::new("");
        let (chunks, done) = transformer.transform(b"[DONE]").expect("transform");
        assert!(chunks.is_empty());
        assert!(done);
    }

    #[test]
    fn unknown_events_are_ignored() {
        let mut transformer = SseTransformer::new("");
        let (chunks, done) = transformer
            .transform(br#"{"type":"response.in_progress","sequence_number":1,"response":{}}"#)
            .expect("transform");
        assert!(chunks.is_empty());
        assert!(!done);
    }

    #[test]
    fn openai_chunk_passes_through_unchanged() {
        let mut transformer = SseTransformer::new("");
        let input = br#"{"id":"chatcmpl-xyz","object":"chat.completion.chunk","created":1754642367,"model":"gpt-4.1","choices":[{"index":0,"delta":{"content":"Hello"},"finish_reason":null}]}"#;
        let (chunks, done) = transformer.transform(input).expect("transform");
        assert!(!done);
        assert_eq!(chunks.len(), 1);

        let reparsed: Value = serde_json::from_str(&chunks[0]).expect("valid JSON");
        let original: Value = serde_json::from_slice(input).expect("valid JSON");
        assert_eq!(reparsed, original);
    }

    #[test]
    fn reasoning_delta_becomes_reasoning_content() {
        let mut transformer = SseTransformer::new("");
        transformer.response_id = "chatcmpl-resp_123".to_string();
        let (chunks, _) = transformer
            .transform(br#"{"type":"response.reasoning_summary_text.delta","sequence_number":5,"delta":"Thinking..."}"#)
            .expect("transform");
        assert_eq!(chunks.len(), 2);
        let chunk: Value = serde_json::from_str(&chunks[1]).expect("chunk");
        assert_eq!(
            delta_of(&chunk)["reasoning_content"].as_str(),
            Some("Thinking...")
        );
    }

    #[test]
    fn later_reasoning_items_are_suppressed() {
        let mut transformer = SseTransformer::new("");
        let (chunks, _) = transformer
            .transform(br#"{"type":"response.reasoning_summary_text.delta","sequence_number":9,"output_index":1,"delta":"duplicate pane"}"#)
            .expect("transform");
        assert!(chunks.is_empty());
    }

    #[test]
    fn reasoning_header_gets_leading_newlines_only_when_complete() {
        assert_eq!(
            fix_reasoning_markdown_headers("**Plan** next"),
            "\n\n**Plan** next"
        );
        assert_eq!(fix_reasoning_markdown_headers("**Pla"), "**Pla");
        assert_eq!(fix_reasoning_markdown_headers("**"), "**");
        assert_eq!(fix_reasoning_markdown_headers("plain"), "plain");
        assert_eq!(fix_reasoning_markdown_headers(""), "");
    }

    #[test]
    fn encrypted_reasoning_items_emit_nothing() {
        let mut transformer = SseTransformer::new("");
        let (chunks, _) = transformer
            .transform(br#"{"type":"response.reasoning_text.delta","sequence_number":3,"item":{"encrypted_content":"opaque"}}"#)
            .expect("transform");
        assert!(chunks.is_empty());
    }

    #[test]
    fn completed_without_usage_emits_zeroed_usage() {
        let mut transformer = SseTransformer::new("");
        let (chunks, _) = transformer
            .transform(br#"{"type":"response.completed","sequence_number":92,"response":{}}"#)
            .expect("transform");
        assert_eq!(chunks.len(), 1);
        let chunk: Value = serde_json::from_str(&chunks[0]).expect("chunk");
        assert_eq!(chunk["choices"][0]["finish_reason"].as_str(), Some("stop"));
        assert_eq!(chunk["usage"]["prompt_tokens"].as_u64(), Some(0));
        assert_eq!(chunk["usage"]["completion_tokens"].as_u64(), Some(0));
        assert_eq!(chunk["usage"]["total_tokens"].as_u64(), Some(0));
    }

    #[test]
    fn completed_maps_upstream_token_counts() {
        let mut transformer = SseTransformer::new("");
        let (chunks, _) = transformer
            .transform(br#"{"type":"response.completed","sequence_number":10,"response":{"usage":{"input_tokens":12,"output_tokens":30}}}"#)
            .expect("transform");
        let chunk: Value = serde_json::from_str(&chunks[0]).expect("chunk");
        assert_eq!(chunk["usage"]["prompt_tokens"].as_u64(), Some(12));
        assert_eq!(chunk["usage"]["completion_tokens"].as_u64(), Some(30));
        assert_eq!(chunk["usage"]["total_tokens"].as_u64(), Some(42));
    }

    #[test]
    fn rewrites_text_stream_end_to_end() {
        let src = concat!(
            "data: {\"type\":\"response.created\",\"sequence_number\":1,\"response\":{\"id\":\"resp_abc\"}}\n\n",
            "data: {\"type\":\"response.output_text.delta\",\"sequence_number\":2,\"delta\":\"Hello\"}\n\n",
            "data: {\"type\":\"response.output_text.delta\",\"sequence_number\":3,\"delta\":\" world\"}\n\n",
            "data: {\"type\":\"response.completed\",\"sequence_number\":4}\n\n",
            "data: [DONE]\n\n",
        );

        let mut out = Vec::new();
        rewrite_sse_stream(src.as_bytes(), &mut out, "gpt-5").expect("rewrite");
        let output = String::from_utf8(out).expect("utf-8");

        assert!(output.ends_with("data: [DONE]\n\n"));
        assert_eq!(output.matches("data: [DONE]").count(), 1);

        let events = collect_events(&output);
        assert_eq!(events.len(), 4);
        assert_eq!(delta_of(&events[0])["role"].as_str(), Some("assistant"));
        assert_eq!(delta_of(&events[1])["content"].as_str(), Some("Hello"));
        assert_eq!(delta_of(&events[2])["content"].as_str(), Some(" world"));
        assert_eq!(events[3]["choices"][0]["finish_reason"].as_str(), Some("stop"));
        for event in &events {
            assert_eq!(event["id"].as_str(), Some("chatcmpl-resp_abc"));
        }
    }

    #[test]
    fn rewrites_tool_call_stream_end_to_end() {
        let src = concat!(
            "data: {\"type\":\"response.created\",\"sequence_number\":1,\"response\":{\"id\":\"resp_tool\"}}\n\n",
            "data: {\"type\":\"response.output_item.added\",\"sequence_number\":2,\"output_index\":0,\"item\":{\"id\":\"fc_123\",\"type\":\"function_call\",\"call_id\":\"call_abc\",\"name\":\"get_weather\"}}\n\n",
            "data: {\"type\":\"response.function_call_arguments.delta\",\"sequence_number\":3,\"item_id\":\"fc_123\",\"delta\":\"{\\\"location\\\":\\\"Pa\"}\n\n",
            "data: {\"type\":\"response.function_call_arguments.delta\",\"sequence_number\":4,\"item_id\":\"fc_123\",\"delta\":\"ris, France\\\"}\"}\n\n",
            "data: {\"type\":\"response.function_call_arguments.done\",\"sequence_number\":5,\"item_id\":\"fc_123\"}\n\n",
            "data: {\"type\":\"response.completed\",\"sequence_number\":6}\n\n",
            "data: [DONE]\n\n",
        );

        let mut out = Vec::new();
        rewrite_sse_stream(src.as_bytes(), &mut out, "gpt-5").expect("rewrite");
        let output = String::from_utf8(out).expect("utf-8");
        let events = collect_events(&output);

        assert_eq!(delta_of(&events[0])["role"].as_str(), Some("assistant"));

        let start = &delta_of(&events[1])["tool_calls"][0];
        assert_eq!(start["index"].as_u64(), Some(0));
        assert_eq!(start["id"].as_str(), Some("call_abc"));
        assert_eq!(start["function"]["name"].as_str(), Some("get_weather"));
        assert_eq!(start["function"]["arguments"].as_str(), Some(""));

        let first_args = delta_of(&events[2])["tool_calls"][0]["function"]["arguments"]
            .as_str()
            .expect("first args delta");
        let second_args = delta_of(&events[3])["tool_calls"][0]["function"]["arguments"]
            .as_str()
            .expect("second args delta");
        assert_eq!(
            format!("{first_args}{second_args}"),
            "{\"location\":\"Paris, France\"}"
        );

        assert_eq!(
            events[4]["choices"][0]["finish_reason"].as_str(),
            Some("tool_calls")
        );
        assert!(output.ends_with("data: [DONE]\n\n"));
    }

    #[test]
    fn tool_call_without_call_id_gets_synthetic_id() {
        let mut transformer = SseTransformer::new("");
        let (chunks, _) = transformer
            .transform(br#"{"type":"response.output_item.added","sequence_number":2,"item":{"id":"fc_9","type":"function_call","name":"ping"}}"#)
            .expect("transform");
        let start: Value = serde_json::from_str(chunks.last().expect("chunk")).expect("chunk");
        assert_eq!(
            delta_of(&start)["tool_calls"][0]["id"].as_str(),
            Some("call_fc_9")
        );
    }

    #[test]
    fn whitespace_deltas_survive_exactly() {
        let src = concat!(
            "data: {\"type\":\"response.created\",\"sequence_number\":1,\"response\":{\"id\":\"resp_ws\"}}\n\n",
            "data: {\"type\":\"response.output_text.delta\",\"sequence_number\":2,\"delta\":\"Foo\"}\n\n",
            "data: {\"type\":\"response.output_text.delta\",\"sequence_number\":3,\"delta\":\"\\n\"}\n\n",
            "data: {\"type\":\"response.output_text.delta\",\"sequence_number\":4,\"delta\":\"**Bar**\"}\n\n",
            "data: [DONE]\n\n",
        );

        let mut out = Vec::new();
        rewrite_sse_stream(src.as_bytes(), &mut out, "gpt-5").expect("rewrite");
        let events = collect_events(&String::from_utf8(out).expect("utf-8"));

        let contents: Vec<&str> = events
            .iter()
            .filter_map(|event| delta_of(event).get("content").and_then(Value::as_str))
            .collect();
        assert_eq!(contents, vec!["Foo", "\n", "**Bar**"]);
    }

    #[test]
    fn role_is_sent_at_most_once_and_first() {
        let src = concat!(
            "data: {\"type\":\"response.created\",\"sequence_number\":1,\"response\":{\"id\":\"resp_r\"}}\n\n",
            "data: {\"type\":\"response.reasoning_summary_text.delta\",\"sequence_number\":2,\"delta\":\"thinking\"}\n\n",
            "data: {\"type\":\"response.output_text.delta\",\"sequence_number\":3,\"delta\":\"answer\"}\n\n",
            "data: {\"type\":\"response.completed\",\"sequence_number\":4}\n\n",
            "data: [DONE]\n\n",
        );

        let mut out = Vec::new();
        rewrite_sse_stream(src.as_bytes(), &mut out, "gpt-5").expect("rewrite");
        let events = collect_events(&String::from_utf8(out).expect("utf-8"));

        let role_positions: Vec<usize> = events
            .iter()
            .enumerate()
            .filter(|(_, event)| delta_of(event).get("role").is_some())
            .map(|(index, _)| index)
            .collect();
        assert_eq!(role_positions, vec![0]);
    }

    #[test]
    fn synthesizes_done_when_upstream_omits_it() {
        let src = "data: {\"type\":\"response.output_text.delta\",\"sequence_number\":1,\"delta\":\"Hi\"}\n\n";
        let mut out = Vec::new();
        rewrite_sse_stream(src.as_bytes(), &mut out, "gpt-5").expect("rewrite");
        let output = String::from_utf8(out).expect("utf-8");
        assert!(output.ends_with("data: [DONE]\n\n"));
    }

    #[test]
    fn malformed_events_are_skipped_not_fatal() {
        let src = concat!(
            "data: not json at all\n\n",
            "data: {\"type\":\"response.output_text.delta\",\"sequence_number\":2,\"delta\":\"ok\"}\n\n",
            "data: [DONE]\n\n",
        );
        let mut out = Vec::new();
        rewrite_sse_stream(src.as_bytes(), &mut out, "gpt-5").expect("rewrite");
        let output = String::from_utf8(out).expect("utf-8");
        assert!(output.contains("\"content\":\"ok\""));
        assert!(output.ends_with("data: [DONE]\n\n"));
    }

    #[test]
    fn multi_line_data_payloads_are_joined() {
        let src = concat!(
            "data: {\"type\":\"response.output_text.delta\",\n",
            "data: \"sequence_number\":2,\"delta\":\"joined\"}\n\n",
            "data: [DONE]\n\n",
        );
        let mut out = Vec::new();
        rewrite_sse_stream(src.as_bytes(), &mut out, "gpt-5").expect("rewrite");
        let output = String::from_utf8(out).expect("utf-8");
        assert!(output.contains("\"content\":\"joined\""));
    }

    #[test]
    fn pass_through_preserves_events_and_guarantees_done() {
        let src = concat!(
            "data: {\"type\":\"response.created\",\"sequence_number\":1,\"response\":{\"id\":\"resp_1\"}}\n\n",
            "data: {\"type\":\"response.output_text.delta\",\"sequence_number\":2,\"delta\":\"Hi\"}\n\n",
        );
        let mut out = Vec::new();
        pass_through_sse_stream(src.as_bytes(), &mut out).expect("pass through");
        let output = String::from_utf8(out).expect("utf-8");

        assert!(output.contains("data: {\"type\":\"response.created\""));
        assert!(output.contains("\"delta\":\"Hi\""));
        assert!(output.ends_with("data: [DONE]\n\n"));
    }

    #[test]
    fn buffers_stream_into_single_completion() {
        let src = concat!(
            "data: {\"type\":\"response.created\",\"sequence_number\":1,\"response\":{\"id\":\"resp_buf\"}}\n\n",
            "data: {\"type\":\"response.output_text.delta\",\"sequence_number\":2,\"delta\":\"Hello\"}\n\n",
            "data: {\"type\":\"response.output_text.delta\",\"sequence_number\":3,\"delta\":\" world\"}\n\n",
            "data: {\"type\":\"response.completed\",\"sequence_number\":4}\n\n",
            "data: [DONE]\n\n",
        );

        let completion = buffer_chat_completion(src.as_bytes(), "gpt-5").expect("buffer");
        assert_eq!(completion["id"].as_str(), Some("chatcmpl-resp_buf"));
        assert_eq!(completion["object"].as_str(), Some("chat.completion"));
        let message = &completion["choices"][0]["message"];
        assert_eq!(message["role"].as_str(), Some("assistant"));
        assert_eq!(message["content"].as_str(), Some("Hello world"));
        assert_eq!(
            completion["choices"][0]["finish_reason"].as_str(),
            Some("stop")
        );
    }

    #[test]
    fn buffered_completion_defaults_when_stream_is_empty() {
        let completion = buffer_chat_completion(&b""[..], "gpt-5").expect("buffer");
        assert_eq!(completion["id"].as_str(), Some("chatcmpl-buffered"));
        assert_eq!(completion["choices"][0]["message"]["role"].as_str(), Some("assistant"));
        assert_eq!(
            completion["choices"][0]["finish_reason"].as_str(),
            Some("stop")
        );
        assert!(completion["created"].as_i64().unwrap_or(0) > 0);
    }
}
