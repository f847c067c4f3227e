use serde_json::{json, Value};

pub const GPT_5: &str = "gpt-5";
pub const GPT_5_CODEX: &str = "gpt-5-codex";
pub const GPT_5_CODEX_MINI: &str = "gpt-5-codex-mini";
pub const GPT_51: &str = "gpt-5.1";
pub const GPT_51_CODEX: &str = "gpt-5.1-codex";
pub const GPT_51_CODEX_MAX: &str = "gpt-5.1-codex-max";
pub const GPT_51_CODEX_MINI: &str = "gpt-5.1-codex-mini";
pub const GPT_52: &str = "gpt-5.2";
pub const GPT_52_CODEX: &str = "gpt-5.2-codex";
pub const GPT_53_CODEX: &str = "gpt-5.3-codex";
pub const GPT_53_CODEX_SPARK: &str = "gpt-5.3-codex-spark";

/// Collapses a caller-supplied model name onto a canonical backend model ID.
/// Clients commonly encode a reasoning effort in the model name
/// (`gpt-5.1-high`), so at most one trailing effort suffix is stripped before
/// matching. The most specific family token wins; anything mentioning `codex`
/// that matches no newer family falls back to `gpt-5-codex`, and everything
/// else collapses to `gpt-5`.
pub fn normalize_model(model: &str) -> &'static str {
    let mut lower = model.trim().to_ascii_lowercase();
    for suffix in ["-xhigh", "-high", "-medium", "-low", "-minimal"] {
        if let Some(base) = lower.strip_suffix(suffix) {
            lower = base.to_string();
            break;
        }
    }
    if lower.is_empty() {
        return GPT_5;
    }

    if lower.contains(GPT_52_CODEX) {
        return GPT_52_CODEX;
    }
    if lower.contains(GPT_52) {
        return GPT_52;
    }
    if lower.contains(GPT_51_CODEX_MAX) {
        return GPT_51_CODEX_MAX;
    }
    if lower.contains(GPT_51_CODEX_MINI) {
        return GPT_51_CODEX_MINI;
    }
    if lower.contains(GPT_51_CODEX) {
        return GPT_51_CODEX;
    }
    if lower.contains(GPT_51) {
        return GPT_51;
    }
    if lower.contains(GPT_5_CODEX_MINI) {
        return GPT_5_CODEX_MINI;
    }
    if lower.contains(GPT_5_CODEX) || lower.contains("codex") {
        return GPT_5_CODEX;
    }

    GPT_5
}

/// Reasoning effort levels each canonical model accepts upstream. Models
/// without an entry accept whatever the caller sent; the upstream decides.
pub fn allowed_efforts(model: &str) -> &'static [&'static str] {
    match model {
        GPT_5 | GPT_5_CODEX => &["minimal", "low", "medium", "high"],
        GPT_51 | GPT_51_CODEX => &["low", "medium", "high"],
        GPT_51_CODEX_MAX | GPT_52 | GPT_52_CODEX | GPT_53_CODEX | GPT_53_CODEX_SPARK => {
            &["low", "medium", "high", "xhigh"]
        }
        GPT_5_CODEX_MINI | GPT_51_CODEX_MINI => &["medium", "high"],
        _ => &[],
    }
}

pub fn default_effort(model: &str) -> Option<&'static str> {
    match model {
        GPT_51 | GPT_51_CODEX | GPT_51_CODEX_MAX => Some("low"),
        GPT_52 | GPT_52_CODEX | GPT_53_CODEX | GPT_5_CODEX_MINI | GPT_51_CODEX_MINI => {
            Some("medium")
        }
        GPT_53_CODEX_SPARK => Some("high"),
        _ => None,
    }
}

/// Maps the raw effort token to its canonical form. `none` aliases to `low`;
/// unrecognized values normalize to empty (unset).
pub fn normalize_reasoning_effort(effort: &str) -> &'static str {
    match effort.trim().to_ascii_lowercase().as_str() {
        "minimal" => "minimal",
        "low" => "low",
        "medium" => "medium",
        "high" => "high",
        "xhigh" => "xhigh",
        "none" => "low",
        _ => "",
    }
}

/// Enforces the per-model effort set and applies the model default when the
/// caller did not specify one. An empty result means the reasoning block
/// carries no effort at all.
pub fn clamp_reasoning_effort(effort: &str, model: &str) -> String {
    let effort = effort.trim();
    if effort.is_empty() {
        return default_effort(model).unwrap_or_default().to_string();
    }

    let allowed = allowed_efforts(model);
    if allowed.is_empty() || allowed.contains(&effort) {
        return effort.to_string();
    }

    match default_effort(model) {
        Some(default) if !default.is_empty() => default.to_string(),
        _ => effort.to_string(),
    }
}

struct ModelSpec {
    id: &'static str,
    name: &'static str,
    category: &'static str,
    preview: bool,
    vendor: &'static str,
    context_window: u64,
    max_output_tokens: u64,
    max_prompt_tokens: u64,
    responses_only: bool,
}

const MODEL_CATALOG: &[ModelSpec] = &[
    ModelSpec {
        id: GPT_5,
        name: "GPT-5",
        category: "versatile",
        preview: false,
        vendor: "Azure OpenAI",
        context_window: 264_000,
        max_output_tokens: 64_000,
        max_prompt_tokens: 128_000,
        responses_only: false,
    },
    ModelSpec {
        id: GPT_52,
        name: "GPT-5.2",
        category: "versatile",
        preview: false,
        vendor: "Azure OpenAI",
        context_window: 264_000,
        max_output_tokens: 64_000,
        max_prompt_tokens: 128_000,
        responses_only: false,
    },
    ModelSpec {
        id: GPT_52_CODEX,
        name: "GPT-5.2-Codex",
        category: "powerful",
        preview: true,
        vendor: "OpenAI",
        context_window: 200_000,
        max_output_tokens: 64_000,
        max_prompt_tokens: 128_000,
        responses_only: true,
    },
    ModelSpec {
        id: GPT_53_CODEX,
        name: "GPT-5.3-Codex",
        category: "powerful",
        preview: true,
        vendor: "OpenAI",
        context_window: 200_000,
        max_output_tokens: 64_000,
        max_prompt_tokens: 128_000,
        responses_only: true,
    },
    ModelSpec {
        id: GPT_53_CODEX_SPARK,
        name: "GPT-5.3-Codex Spark",
        category: "powerful",
        preview: true,
        vendor: "OpenAI",
        context_window: 200_000,
        max_output_tokens: 64_000,
        max_prompt_tokens: 128_000,
        responses_only: true,
    },
    ModelSpec {
        id: GPT_5_CODEX,
        name: "GPT-5-Codex",
        category: "powerful",
        preview: true,
        vendor: "OpenAI",
        context_window: 200_000,
        max_output_tokens: 64_000,
        max_prompt_tokens: 128_000,
        responses_only: true,
    },
    ModelSpec {
        id: GPT_51,
        name: "GPT-5.1",
        category: "versatile",
        preview: false,
        vendor: "Azure OpenAI",
        context_window: 264_000,
        max_output_tokens: 64_000,
        max_prompt_tokens: 128_000,
        responses_only: false,
    },
    ModelSpec {
        id: GPT_51_CODEX,
        name: "GPT-5.1-Codex",
        category: "powerful",
        preview: true,
        vendor: "OpenAI",
        context_window: 200_000,
        max_output_tokens: 64_000,
        max_prompt_tokens: 128_000,
        responses_only: true,
    },
    ModelSpec {
        id: GPT_51_CODEX_MAX,
        name: "GPT-5.1-Codex Max",
        category: "powerful",
        preview: true,
        vendor: "OpenAI",
        context_window: 200_000,
        max_output_tokens: 64_000,
        max_prompt_tokens: 128_000,
        responses_only: true,
    },
    ModelSpec {
        id: GPT_5_CODEX_MINI,
        name: "GPT-5-Codex Mini",
        category: "fast",
        preview: true,
        vendor: "OpenAI",
        context_window: 128_000,
        max_output_tokens: 32_000,
        max_prompt_tokens: 64_000,
        responses_only: true,
    },
    ModelSpec {
        id: GPT_51_CODEX_MINI,
        name: "GPT-5.1-Codex Mini",
        category: "fast",
        preview: true,
        vendor: "OpenAI",
        context_window: 128_000,
        max_output_tokens: 32_000,
        max_prompt_tokens: 64_000,
        responses_only: true,
    },
];

/// Model list for `/v1/models`: every base model plus one suffix variant per
/// allowed effort, so clients that encode effort in the model name can
/// discover the aliases.
pub fn advertised_models() -> Vec<Value> {
    let mut data = Vec::new();
    for spec in MODEL_CATALOG {
        let display_name = if spec.preview {
            format!("{} (Preview)", spec.name)
        } else {
            spec.name.to_string()
        };
        data.push(model_metadata(spec, spec.id, &display_name));
        for effort in allowed_efforts(spec.id) {
            let variant_id = format!("{}-{}", spec.id, effort);
            let variant_name = format!("{display_name} ({effort} reasoning)");
            data.push(model_metadata(spec, &variant_id, &variant_name));
        }
    }
    data
}

fn model_metadata(spec: &ModelSpec, id: &str, name: &str) -> Value {
    let mut metadata = json!({
        "capabilities": {
            "family": spec.id,
            "limits": {
                "max_context_window_tokens": spec.context_window,
                "max_output_tokens": spec.max_output_tokens,
                "max_prompt_tokens": spec.max_prompt_tokens,
                "vision": {
                    "max_prompt_image_size": 3_145_728,
                    "max_prompt_images": 1,
                    "supported_media_types": ["image/jpeg", "image/png", "image/webp", "image/gif"],
                },
            },
            "object": "model_capabilities",
            "supports": {
                "parallel_tool_calls": true,
                "streaming": true,
                "structured_outputs": true,
                "tool_calls": true,
                "vision": true,
            },
            "tokenizer": "o200k_base",
            "type": "chat",
        },
        "id": id,
        "model_picker_category": spec.category,
        "model_picker_enabled": true,
        "name": name,
        "object": "model",
        "policy": {
            "state": "enabled",
            "terms": format!(
                "Enable access to {} from OpenAI. [Learn more about how GitHub Copilot serves {}](https://gh.io/copilot-openai).",
                spec.name, spec.name
            ),
        },
        "preview": spec.preview,
        "vendor": spec.vendor,
        "version": spec.id,
    });
    if spec.responses_only {
        metadata["supported_endpoints"] = json!(["/responses"]);
    }
    metadata
}
