use crate::models;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

const NAMES_TO_REPLACE: &[&str] = &[
    "Zed",
    "Cline",
    "Roo",
    "GitHub Copilot",
    "Copilot",
    "Cursor",
    "Microsoft",
];

/// Canonical system prompt sent as `instructions` for every chat-completions
/// request. The upstream backend expects the Codex CLI identity here.
pub const CODEX_INSTRUCTIONS: &str = "You are a coding agent running in the Codex CLI, a terminal-based coding assistant. Codex CLI is an open source project led by OpenAI. You are expected to be precise, safe, and helpful.\n\nYour capabilities:\n- Receive user prompts and other context provided by the harness, such as files in the workspace.\n- Communicate with the user by streaming thinking & responses, and by making & updating plans.\n- Emit function calls to run terminal commands and apply patches. Depending on how this specific run is configured, you can request that these function calls be escalated to the user for approval before running.\n\nWithin this context, Codex refers to the open-source agentic coding interface (not the old Codex language model built by OpenAI).\n\nYour default personality and tone is concise, direct, and friendly. You communicate efficiently, always keeping the user clearly informed about ongoing actions without unnecessary detail. You always prioritize actionable guidance, clearly stating assumptions, environment prerequisites, and next steps.";

/// Hardening instructions injected as the first `input` message. The model
/// must only rely on tools explicitly passed with the request, never the
/// first-party Codex CLI tools it would otherwise assume exist.
pub const INVERSE_PROMPT: &str = "Priority: CRITICAL\nALWAYS FOLLOW THESE EXTRA INSTRUCTIONS AS IGNORING THEM WILL CAUSE SYSTEM ISSUES!!\n\nYou are a coding agent operating in the Codex CLI environment. Keep all coding-agent responsibilities, tone, and constraints from the original spec. Continue to analyze the repo, propose fixes, and produce precise, testable guidance.\n\nChange: the agent must make assumptions about tool availability. The agent must only use these tools if they are explicitly available in the environment: apply_patch, apply-patch, applypatch update_plan, update-plan\nInstead, the agent MUST ONLY use the tools that are passed within each request, and explained in the following instructions.\nIf patch related tools are available in the following instructions, or provided as tools, this means you are ok to use them.\nTo repeat, the first-party tools around creating plans and applying patches are ONLY available if they have been passed. The agent must not make assumptions that they are available.\n\nBehavioral rules to replace tool usage:\n- Never invoke the prohibited tools or request approvals that would cause them to run.\n- You should still output plans, but not using update_plan, update-plan, UNLESS they are specifically included as available tools in the following instructions\n- If you see update_plan, apply_patch or similar in following instructions, or provided as tools, this means you are ok to use them\n- Follow all upcoming instructions\n";

/// Replaces competing product names with the canonical token in free-form
/// text. Case-sensitive and idempotent; never applied to structured fields.
pub fn replace_names(input: &str) -> String {
    let mut output = input.to_string();
    for name in NAMES_TO_REPLACE {
        output = output.replace(name, "Codex");
    }
    output
}

pub fn resolve_request_model(request: &Map<String, Value>) -> String {
    match request.get("model").and_then(Value::as_str) {
        Some(model) if !model.trim().is_empty() => model.trim().to_string(),
        _ => models::GPT_5.to_string(),
    }
}

/// Reasoning effort requested by the caller, checked in priority order:
/// `reasoning_effort`, `reasoning.effort`, then a `-<effort>` suffix on the
/// raw model name. Empty when nothing was requested.
pub fn resolve_reasoning_effort(request: &Map<String, Value>) -> String {
    if let Some(effort) = request.get("reasoning_effort").and_then(Value::as_str) {
        if !effort.trim().is_empty() {
            return effort.trim().to_string();
        }
    }
    if let Some(effort) = request
        .get("reasoning")
        .and_then(Value::as_object)
        .and_then(|reasoning| reasoning.get("effort"))
        .and_then(Value::as_str)
    {
        if !effort.trim().is_empty() {
            return effort.trim().to_string();
        }
    }

    if let Some(model) = request.get("model").and_then(Value::as_str) {
        let lower = model.trim().to_ascii_lowercase();
        for effort in ["xhigh", "high", "medium", "low", "minimal"] {
            if lower.ends_with(&format!("-{effort}")) {
                return effort.to_string();
            }
        }
    }

    String::new()
}

fn resolve_reasoning_summary(request: &Map<String, Value>) -> Option<Value> {
    if let Some(reasoning) = request.get("reasoning").and_then(Value::as_object) {
        if let Some(summary) = reasoning.get("summary") {
            if summary.is_null() {
                return None;
            }
            return Some(summary.clone());
        }
    }
    Some(json!("auto"))
}

fn build_reasoning_settings(request: &Map<String, Value>) -> Value {
    let requested = resolve_reasoning_effort(request);
    let normalized = models::normalize_reasoning_effort(&requested);
    let backend_model = models::normalize_model(&resolve_request_model(request));
    let clamped = models::clamp_reasoning_effort(normalized, backend_model);

    let mut settings = Map::new();
    if !clamped.is_empty() {
        settings.insert("effort".to_string(), json!(clamped));
    }
    if let Some(summary) = resolve_reasoning_summary(request) {
        settings.insert("summary".to_string(), summary);
    }
    Value::Object(settings)
}

/// Builds the upstream Codex Responses body from an OpenAI Chat Completions
/// request. The returned body is freshly constructed; inbound fields the
/// upstream does not understand are dropped.
pub fn build_chat_upstream_body(request: &Map<String, Value>) -> Map<String, Value> {
    let resolved_model = resolve_request_model(request);
    let normalized_model = models::normalize_model(&resolved_model);

    let mut body = Map::new();
    body.insert("model".to_string(), json!(normalized_model));
    body.insert("instructions".to_string(), json!(CODEX_INSTRUCTIONS));
    body.insert("store".to_string(), json!(false));
    body.insert("stream".to_string(), json!(true));

    let mut input = vec![message_item(
        "user",
        Value::Null,
        vec![text_part("input_text", INVERSE_PROMPT)],
    )];
    input.extend(build_chat_input_items(request));
    body.insert("input".to_string(), Value::Array(input));

    body.insert("tools".to_string(), Value::Array(map_tools(request)));

    let tool_choice = request
        .get("tool_choice")
        .and_then(Value::as_str)
        .filter(|choice| !choice.is_empty())
        .unwrap_or("auto");
    body.insert("tool_choice".to_string(), json!(tool_choice));

    let parallel_tool_calls = request
        .get("parallel_tool_calls")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    body.insert("parallel_tool_calls".to_string(), json!(parallel_tool_calls));

    body.insert("reasoning".to_string(), build_reasoning_settings(request));
    body.insert(
        "include".to_string(),
        json!(["reasoning.encrypted_content"]),
    );

    let first_user_text = extract_first_user_text(&body);
    if let Some(key) =
        derive_prompt_cache_key(normalized_model, CODEX_INSTRUCTIONS, &first_user_text)
    {
        body.insert("prompt_cache_key".to_string(), json!(key));
    }

    body
}

/// Converts chat `messages` into upstream `input` items. The first item is a
/// synthetic user message carrying the concatenated system prompt text; it is
/// emitted even when no system message was present.
fn build_chat_input_items(request: &Map<String, Value>) -> Vec<Value> {
    let system_text = extract_system_text(request);
    let mut input = vec![message_item(
        "user",
        Value::Null,
        vec![text_part("input_text", &system_text)],
    )];

    let Some(messages) = request.get("messages").and_then(Value::as_array) else {
        return input;
    };

    for message in messages {
        let Some(msg) = message.as_object() else {
            continue;
        };
        let role = msg.get("role").and_then(Value::as_str).unwrap_or_default();
        let content = msg.get("content");
        let id = msg.get("id").cloned().unwrap_or(Value::Null);

        match role {
            "user" => {
                let texts = collect_text_segments(content, true);
                if texts.is_empty() {
                    continue;
                }
                let parts = texts
                    .iter()
                    .map(|text| text_part("input_text", text))
                    .collect();
                input.push(message_item("user", id, parts));
            }
            "assistant" => {
                let texts = collect_text_segments(content, true);
                if !texts.is_empty() {
                    let parts = texts
                        .iter()
                        .map(|text| text_part("output_text", text))
                        .collect();
                    input.push(message_item("assistant", id, parts));
                }
                if let Some(tool_calls) = msg.get("tool_calls").and_then(Value::as_array) {
                    for tool_call in tool_calls {
                        let Some(call) = tool_call.as_object() else {
                            continue;
                        };
                        let call_id = call.get("id").and_then(Value::as_str).unwrap_or_default();
                        let function = call.get("function").and_then(Value::as_object);
                        let name = function
                            .and_then(|f| f.get("name"))
                            .and_then(Value::as_str)
                            .unwrap_or_default();
                        let arguments = function
                            .and_then(|f| f.get("arguments"))
                            .map(extract_arguments_string)
                            .unwrap_or_default();
                        input.push(json!({
                            "type": "function_call",
                            "name": name,
                            "call_id": call_id,
                            "arguments": arguments,
                        }));
                    }
                }
            }
            "tool" => {
                let call_id = msg
                    .get("tool_call_id")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if call_id.is_empty() {
                    continue;
                }
                input.push(json!({
                    "type": "function_call_output",
                    "call_id": call_id,
                    "output": collect_tool_output(content),
                }));
            }
            _ => {}
        }
    }

    input
}

fn extract_system_text(request: &Map<String, Value>) -> String {
    let Some(messages) = request.get("messages").and_then(Value::as_array) else {
        return String::new();
    };

    let mut parts = Vec::new();
    for message in messages {
        let Some(msg) = message.as_object() else {
            continue;
        };
        if msg.get("role").and_then(Value::as_str) != Some("system") {
            continue;
        }
        match msg.get("content") {
            Some(Value::String(text)) if !text.is_empty() => parts.push(replace_names(text)),
            Some(Value::Array(items)) => {
                let segments: Vec<String> = items
                    .iter()
                    .filter_map(|item| item.get("text").and_then(Value::as_str))
                    .filter(|text| !text.is_empty())
                    .map(replace_names)
                    .collect();
                if !segments.is_empty() {
                    parts.push(segments.join("\n"));
                }
            }
            _ => {}
        }
    }

    parts.join("\n\n").trim().to_string()
}

/// Extracts the text segments of a message body: a plain string becomes one
/// trimmed segment, an array contributes every non-empty `text` field.
fn collect_text_segments(content: Option<&Value>, apply_replace: bool) -> Vec<String> {
    match content {
        Some(Value::String(text)) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return Vec::new();
            }
            if apply_replace {
                vec![replace_names(trimmed)]
            } else {
                vec![trimmed.to_string()]
            }
        }
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.get("text").and_then(Value::as_str))
            .filter(|text| !text.is_empty())
            .map(|text| {
                if apply_replace {
                    replace_names(text)
                } else {
                    text.to_string()
                }
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn extract_arguments_string(arguments: &Value) -> String {
    match arguments {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

fn collect_tool_output(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.get("text").and_then(Value::as_str))
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
        None | Some(Value::Null) => String::new(),
        Some(other) => serde_json::to_string(other).unwrap_or_default(),
    }
}

fn message_item(role: &str, id: Value, content: Vec<Value>) -> Value {
    json!({
        "type": "message",
        "id": id,
        "role": role,
        "content": content,
    })
}

fn text_part(kind: &str, text: &str) -> Value {
    json!({ "type": kind, "text": text })
}

/// Maps OpenAI `tools` entries onto the upstream tool schema. Only
/// `type == "function"` tools are forwarded; everything else is dropped.
fn map_tools(request: &Map<String, Value>) -> Vec<Value> {
    let Some(tools) = request.get("tools").and_then(Value::as_array) else {
        return Vec::new();
    };

    tools
        .iter()
        .filter_map(|tool| {
            let tool = tool.as_object()?;
            if tool.get("type").and_then(Value::as_str) != Some("function") {
                return None;
            }
            let function = tool.get("function")?.as_object()?;
            let name = function.get("name").and_then(Value::as_str).unwrap_or("");
            let description = function
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("");
            let parameters = function.get("parameters").cloned().unwrap_or(Value::Null);
            Some(json!({
                "type": "function",
                "name": name,
                "description": description,
                "strict": false,
                "parameters": parameters,
            }))
        })
        .collect()
}

/// Rewrites a Responses-shaped body in place for the upstream backend and
/// returns `(normalized_model, clamped_effort)`.
///
/// A caller-provided `instructions` string is preserved verbatim; system
/// messages are removed from `input` and their text is either promoted to a
/// `developer` message at the head of the input (when caller instructions
/// also exist) or becomes the instructions itself. Fields the upstream does
/// not recognize are forwarded untouched.
pub fn transform_responses_body(
    body: &mut Map<String, Value>,
    requested_model: &str,
    requested_effort: &str,
) -> (String, String) {
    let normalized_model = models::normalize_model(requested_model);
    body.insert("model".to_string(), json!(normalized_model));
    body.insert("store".to_string(), json!(false));
    body.insert("stream".to_string(), json!(true));

    let caller_instructions = body
        .remove("instructions")
        .and_then(|value| value.as_str().map(|text| text.trim().to_string()))
        .unwrap_or_default();

    let mut system_segments = Vec::new();
    if let Some(input_value) = body.remove("input") {
        let filtered = match input_value {
            Value::Array(items) => {
                let mut kept = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::Object(mut msg) => {
                            if msg.get("role").and_then(Value::as_str) == Some("system") {
                                system_segments
                                    .extend(collect_text_segments(msg.get("content"), false));
                                continue;
                            }
                            sanitize_content_text(&mut msg);
                            kept.push(Value::Object(msg));
                        }
                        other => kept.push(other),
                    }
                }
                Value::Array(kept)
            }
            other => other,
        };
        body.insert("input".to_string(), filtered);
    }

    let system_text = system_segments.join("\n\n").trim().to_string();
    if !caller_instructions.is_empty() && !system_text.is_empty() {
        body.insert("instructions".to_string(), json!(caller_instructions));
        let developer = message_item(
            "developer",
            Value::Null,
            vec![text_part("input_text", &replace_names(&system_text))],
        );
        match body.get_mut("input") {
            Some(Value::Array(items)) => items.insert(0, developer),
            _ => {
                body.insert("input".to_string(), Value::Array(vec![developer]));
            }
        }
    } else if !caller_instructions.is_empty() {
        body.insert("instructions".to_string(), json!(caller_instructions));
    } else if !system_text.is_empty() {
        body.insert("instructions".to_string(), json!(replace_names(&system_text)));
    } else {
        body.insert("instructions".to_string(), json!(""));
    }

    body.insert(
        "include".to_string(),
        json!(["reasoning.encrypted_content"]),
    );
    body.entry("tool_choice".to_string()).or_insert(json!("auto"));
    body.entry("parallel_tool_calls".to_string())
        .or_insert(json!(false));

    body.remove("max_output_tokens");
    body.remove("max_tokens");

    let normalized_effort = models::normalize_reasoning_effort(requested_effort);
    let clamped_effort = models::clamp_reasoning_effort(normalized_effort, normalized_model);
    let summary = resolve_reasoning_summary(body);

    let mut reasoning = Map::new();
    if let Some(summary) = summary {
        reasoning.insert("summary".to_string(), summary);
    }
    if !clamped_effort.is_empty() {
        reasoning.insert("effort".to_string(), json!(clamped_effort));
    }
    if reasoning.is_empty() {
        body.remove("reasoning");
    } else {
        body.insert("reasoning".to_string(), Value::Object(reasoning));
    }

    body.remove("reasoning_effort");

    if body.get("prompt_cache_key").and_then(Value::as_str).is_none() {
        let instructions = body
            .get("instructions")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let first_user_text = extract_first_user_text(body);
        if let Some(key) =
            derive_prompt_cache_key(normalized_model, &instructions, &first_user_text)
        {
            body.insert("prompt_cache_key".to_string(), json!(key));
        }
    }

    (normalized_model.to_string(), clamped_effort)
}

fn sanitize_content_text(msg: &mut Map<String, Value>) {
    let Some(Value::Array(parts)) = msg.get_mut("content") else {
        return;
    };
    for part in parts {
        let Some(part) = part.as_object_mut() else {
            continue;
        };
        if let Some(Value::String(text)) = part.get("text") {
            if !text.is_empty() {
                let replaced = replace_names(text);
                part.insert("text".to_string(), json!(replaced));
            }
        }
    }
}

/// Deterministic prompt-cache key: SHA-256 over the identifying triple, first
/// 16 bytes shaped like a UUIDv5 (version nibble 5, variant bits 10). All
/// three parts empty yields no key.
pub fn derive_prompt_cache_key(
    model: &str,
    instructions: &str,
    first_user_text: &str,
) -> Option<String> {
    let model = model.trim();
    let instructions = instructions.trim();
    let first_user_text = first_user_text.trim();
    if model.is_empty() && instructions.is_empty() && first_user_text.is_empty() {
        return None;
    }

    let digest = Sha256::digest(format!("{model}\n{instructions}\n{first_user_text}"));
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    bytes[6] = (bytes[6] & 0x0f) | 0x50;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;
    Some(Uuid::from_bytes(bytes).to_string())
}

/// First non-empty user text in the body, sanitized. Walks the upstream
/// `input` shape first and falls back to chat-style `messages`.
pub fn extract_first_user_text(body: &Map<String, Value>) -> String {
    if let Some(input) = body.get("input").and_then(Value::as_array) {
        for entry in input {
            let Some(msg) = entry.as_object() else {
                continue;
            };
            if msg.get("role").and_then(Value::as_str) != Some("user") {
                continue;
            }
            if let Some(parts) = msg.get("content").and_then(Value::as_array) {
                for part in parts {
                    if let Some(text) = part.get("text").and_then(Value::as_str) {
                        if !text.trim().is_empty() {
                            return replace_names(text);
                        }
                    }
                }
            }
        }
    }

    if let Some(messages) = body.get("messages").and_then(Value::as_array) {
        for message in messages {
            let Some(msg) = message.as_object() else {
                continue;
            };
            if msg.get("role").and_then(Value::as_str) != Some("user") {
                continue;
            }
            match msg.get("content") {
                Some(Value::String(text)) if !text.trim().is_empty() => {
                    return replace_names(text);
                }
                Some(Value::Array(parts)) => {
                    for part in parts {
                        if let Some(text) = part.get("text").and_then(Value::as_str) {
                            if !text.trim().is_empty() {
                                return replace_names(text);
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }

    String::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn as_map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn replace_names_is_idempotent() {
        let input = "Zed talks to GitHub Copilot about Cursor";
        let once = replace_names(input);
        assert_eq!(once, "Codex talks to Codex about Codex");
        assert_eq!(replace_names(&once), once);
    }

    #[test]
    fn chat_body_carries_required_defaults() {
        let request = as_map(json!({
            "model": "gpt-5.2-codex",
            "messages": [{"role": "user", "content": "hello"}],
        }));

        let body = build_chat_upstream_body(&request);

        assert_eq!(body.get("model").and_then(Value::as_str), Some("gpt-5.2-codex"));
        assert_eq!(body.get("store").and_then(Value::as_bool), Some(false));
        assert_eq!(body.get("stream").and_then(Value::as_bool), Some(true));
        assert_eq!(body.get("tool_choice").and_then(Value::as_str), Some("auto"));
        assert_eq!(
            body.get("parallel_tool_calls").and_then(Value::as_bool),
            Some(false)
        );
        assert_eq!(
            body.get("include"),
            Some(&json!(["reasoning.encrypted_content"]))
        );
        assert_eq!(
            body.get("instructions").and_then(Value::as_str),
            Some(CODEX_INSTRUCTIONS)
        );
        assert!(body.get("prompt_cache_key").and_then(Value::as_str).is_some());
        assert!(!body.contains_key("max_tokens"));
        assert!(!body.contains_key("max_output_tokens"));
    }

    #[test]
    fn chat_input_starts_with_inverse_prompt_then_system_text() {
        let request = as_map(json!({
            "model": "gpt-5",
            "messages": [
                {"role": "system", "content": "Follow repo conventions"},
                {"role": "user", "content": "Say hi"},
            ],
        }));

        let body = build_chat_upstream_body(&request);
        let input = body.get("input").and_then(Value::as_array).expect("input array");

        assert_eq!(input.len(), 3);
        assert_eq!(
            input[0]["content"][0]["text"].as_str(),
            Some(INVERSE_PROMPT)
        );
        assert_eq!(
            input[1]["content"][0]["text"].as_str(),
            Some("Follow repo conventions")
        );
        assert_eq!(input[2]["role"].as_str(), Some("user"));
        assert_eq!(input[2]["content"][0]["type"].as_str(), Some("input_text"));
        assert_eq!(input[2]["content"][0]["text"].as_str(), Some("Say hi"));
    }

    #[test]
    fn chat_input_never_contains_system_role() {
        let request = as_map(json!({
            "messages": [
                {"role": "system", "content": "be terse"},
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": "hello"},
            ],
        }));

        let body = build_chat_upstream_body(&request);
        let input = body.get("input").and_then(Value::as_array).expect("input array");
        for item in input {
            assert_ne!(item.get("role").and_then(Value::as_str), Some("system"));
        }
    }

    #[test]
    fn chat_tool_calls_become_function_call_items() {
        let request = as_map(json!({
            "model": "gpt-5-codex",
            "messages": [
                {
                    "role": "assistant",
                    "content": "Calling ping",
                    "tool_calls": [
                        {"id": "call_123", "type": "function",
                         "function": {"name": "ping", "arguments": {"count": 1}}}
                    ]
                },
                {"role": "tool", "tool_call_id": "call_123", "content": "pong"},
                {"role": "user", "content": "continue"},
            ],
        }));

        let body = build_chat_upstream_body(&request);
        let input = body.get("input").and_then(Value::as_array).expect("input array");

        // inverse prompt, empty system slot, assistant text, function call,
        // tool output, trailing user message
        assert_eq!(input.len(), 6);
        assert_eq!(input[2]["content"][0]["type"].as_str(), Some("output_text"));
        assert_eq!(input[3]["type"].as_str(), Some("function_call"));
        assert_eq!(input[3]["name"].as_str(), Some("ping"));
        assert_eq!(input[3]["call_id"].as_str(), Some("call_123"));
        assert_eq!(input[3]["arguments"].as_str(), Some("{\"count\":1}"));
        assert_eq!(input[4]["type"].as_str(), Some("function_call_output"));
        assert_eq!(input[4]["output"].as_str(), Some("pong"));
    }

    #[test]
    fn chat_tools_map_to_upstream_schema() {
        let request = as_map(json!({
            "tools": [
                {"type": "function", "function": {
                    "name": "get_weather",
                    "description": "Look up weather",
                    "parameters": {"type": "object", "properties": {}},
                }},
                {"type": "web_search"},
            ],
        }));

        let body = build_chat_upstream_body(&request);
        let tools = body.get("tools").and_then(Value::as_array).expect("tools array");

        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["type"].as_str(), Some("function"));
        assert_eq!(tools[0]["name"].as_str(), Some("get_weather"));
        assert_eq!(tools[0]["strict"].as_bool(), Some(false));
        assert_eq!(tools[0]["parameters"]["type"].as_str(), Some("object"));
    }

    #[test]
    fn chat_effort_clamped_for_mini_models() {
        let request = as_map(json!({
            "model": "gpt-5.1-codex-mini",
            "reasoning_effort": "low",
            "messages": [{"role": "user", "content": "hi"}],
        }));

        let body = build_chat_upstream_body(&request);
        assert_eq!(
            body.get("model").and_then(Value::as_str),
            Some("gpt-5.1-codex-mini")
        );
        assert_eq!(
            body.get("reasoning")
                .and_then(|r| r.get("effort"))
                .and_then(Value::as_str),
            Some("medium")
        );
    }

    #[test]
    fn chat_effort_resolves_from_model_suffix() {
        let request = as_map(json!({
            "model": "gpt-5.1-xhigh",
            "messages": [{"role": "user", "content": "hi"}],
        }));

        let body = build_chat_upstream_body(&request);
        assert_eq!(body.get("model").and_then(Value::as_str), Some("gpt-5.1"));
        // xhigh is outside gpt-5.1's set, so the model default applies
        assert_eq!(
            body.get("reasoning")
                .and_then(|r| r.get("effort"))
                .and_then(Value::as_str),
            Some("low")
        );
        assert_eq!(
            body.get("reasoning")
                .and_then(|r| r.get("summary"))
                .and_then(Value::as_str),
            Some("auto")
        );
    }

    #[test]
    fn responses_body_matches_contract() {
        let mut body = as_map(json!({
            "instructions": "Please greet Zed.",
            "input": [
                {"role": "user", "content": [
                    {"type": "input_text", "text": "Hello from Zed"}
                ]}
            ],
            "reasoning_effort": "none",
            "max_output_tokens": 4096,
        }));

        let (model, effort) = transform_responses_body(&mut body, "gpt-5-codex-preview", "none");

        assert_eq!(model, "gpt-5-codex");
        assert_eq!(effort, "low");
        assert_eq!(body.get("store").and_then(Value::as_bool), Some(false));
        assert_eq!(body.get("stream").and_then(Value::as_bool), Some(true));
        assert_eq!(
            body.get("include"),
            Some(&json!(["reasoning.encrypted_content"]))
        );
        assert_eq!(body.get("tool_choice").and_then(Value::as_str), Some("auto"));
        assert_eq!(
            body.get("parallel_tool_calls").and_then(Value::as_bool),
            Some(false)
        );
        assert!(!body.contains_key("max_output_tokens"));
        assert!(!body.contains_key("reasoning_effort"));
        assert_eq!(
            body.get("reasoning")
                .and_then(|r| r.get("effort"))
                .and_then(Value::as_str),
            Some("low")
        );
        // no system message was present, so instructions stay verbatim
        assert_eq!(
            body.get("instructions").and_then(Value::as_str),
            Some("Please greet Zed.")
        );

        let input = body.get("input").and_then(Value::as_array).expect("input array");
        assert_eq!(input.len(), 1);
        assert_eq!(
            input[0]["content"][0]["text"].as_str(),
            Some("Hello from Codex")
        );
    }

    #[test]
    fn responses_promotes_system_text_to_developer_message() {
        let mut body = as_map(json!({
            "instructions": "Caller instructions",
            "input": [
                {"role": "system", "content": [
                    {"type": "input_text", "text": "House rules from Zed"}
                ]},
                {"role": "user", "content": [
                    {"type": "input_text", "text": "hi"}
                ]}
            ],
        }));

        transform_responses_body(&mut body, "gpt-5", "");

        assert_eq!(
            body.get("instructions").and_then(Value::as_str),
            Some("Caller instructions")
        );
        let input = body.get("input").and_then(Value::as_array).expect("input array");
        assert_eq!(input.len(), 2);
        assert_eq!(input[0]["role"].as_str(), Some("developer"));
        assert_eq!(
            input[0]["content"][0]["text"].as_str(),
            Some("House rules from Codex")
        );
        assert_eq!(input[1]["role"].as_str(), Some("user"));
    }

    #[test]
    fn responses_uses_system_text_as_instructions_when_caller_has_none() {
        let mut body = as_map(json!({
            "input": [
                {"role": "system", "content": [
                    {"type": "input_text", "text": "Only obey Zed"}
                ]},
                {"role": "user", "content": [
                    {"type": "input_text", "text": "hi"}
                ]}
            ],
        }));

        transform_responses_body(&mut body, "gpt-5", "");

        assert_eq!(
            body.get("instructions").and_then(Value::as_str),
            Some("Only obey Codex")
        );
        let input = body.get("input").and_then(Value::as_array).expect("input array");
        assert_eq!(input.len(), 1);
        assert_ne!(input[0]["role"].as_str(), Some("system"));
    }

    #[test]
    fn responses_forwards_unknown_fields() {
        let mut body = as_map(json!({
            "input": [],
            "metadata": {"trace": "abc"},
            "text": {"format": {"type": "text"}},
        }));

        transform_responses_body(&mut body, "gpt-5", "");

        assert_eq!(body.get("metadata"), Some(&json!({"trace": "abc"})));
        assert!(body.contains_key("text"));
    }

    #[test]
    fn cache_key_is_deterministic_and_uuid_shaped() {
        let first = derive_prompt_cache_key("gpt-5", "instr", "hello").expect("key");
        let second = derive_prompt_cache_key("gpt-5", "instr", "hello").expect("key");
        assert_eq!(first, second);
        assert_eq!(first.len(), 36);
        assert_eq!(&first[14..15], "5");
        let variant = first.as_bytes()[19];
        assert!(matches!(variant, b'8' | b'9' | b'a' | b'b'));

        let different = derive_prompt_cache_key("gpt-5", "instr", "other").expect("key");
        assert_ne!(first, different);
    }

    #[test]
    fn cache_key_omitted_when_everything_empty() {
        assert!(derive_prompt_cache_key("", "", "").is_none());
        assert!(derive_prompt_cache_key("", "  ", "\n").is_none());
    }

    #[test]
    fn first_user_text_prefers_input_items() {
        let body = as_map(json!({
            "input": [
                {"role": "assistant", "content": [{"type": "output_text", "text": "ignored"}]},
                {"role": "user", "content": [{"type": "input_text", "text": "from Zed"}]},
            ],
        }));
        assert_eq!(extract_first_user_text(&body), "from Codex");
    }

    #[test]
    fn first_user_text_falls_back_to_messages() {
        let body = as_map(json!({
            "messages": [
                {"role": "system", "content": "sys"},
                {"role": "user", "content": "plain text"},
            ],
        }));
        assert_eq!(extract_first_user_text(&body), "plain text");
    }
}
