//! Request body rewriting for the two forwarded routes.
//!
//! Both entry points take the raw inbound JSON and return the raw JSON to send upstream.
//! They never touch the network.

use crate::config::Config;
use serde_json::{Map, Value, json};

pub const LOCALE_MARKER: &str = "Respond in the following locale";

const CHAT_STRIPPED_FIELDS: [&str; 3] = ["intent", "intent_threshold", "intent_content"];
const CODE_STRIPPED_FIELDS: [&str; 2] = ["extra", "nwo"];

const STABLE_CODE_MARKER: &str = "stable-code";
const DEEPSEEK_CODER_PREFIX: &str = "deepseek-coder";

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("request body is not valid json: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("request body must be a json object")]
    NotAnObject,
}

/// Reshaping applied to code completions, chosen from the configured instruct model name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CodeModelFamily {
    /// Fill-in-the-middle prompt sent as a single chat message.
    StableCode,
    /// Upstream rejects `n > 1`.
    DeepseekCoder,
    Generic,
}

impl CodeModelFamily {
    pub fn classify(model: &str) -> Self {
        if model.contains(STABLE_CODE_MARKER) {
            CodeModelFamily::StableCode
        } else if model.starts_with(DEEPSEEK_CODER_PREFIX) {
            CodeModelFamily::DeepseekCoder
        } else {
            CodeModelFamily::Generic
        }
    }

    fn reshape(self, body: &mut Map<String, Value>) {
        match self {
            CodeModelFamily::StableCode => {
                let content = fim_prompt(body.get("prompt"), body.get("suffix"));
                body.insert(
                    "messages".to_string(),
                    json!([{ "role": "user", "content": content }]),
                );
            }
            CodeModelFamily::DeepseekCoder => {
                if body.get("n").and_then(Value::as_f64).is_some_and(|n| n > 1.0) {
                    body.insert("n".to_string(), json!(1));
                }
            }
            CodeModelFamily::Generic => {}
        }
    }
}

pub fn rewrite_chat_body(raw: &[u8], config: &Config) -> Result<Vec<u8>, TransformError> {
    let mut body = parse_object(raw)?;

    let inbound_model = body.get("model").and_then(Value::as_str).unwrap_or_default();
    let model = config
        .chat_model_map
        .get(inbound_model)
        .unwrap_or(&config.chat_model_default)
        .clone();
    body.insert("model".to_string(), Value::String(model));

    if !body.contains_key("function_call") {
        annotate_locale(&mut body, config.chat_locale());
    }

    for field in CHAT_STRIPPED_FIELDS {
        body.shift_remove(field);
    }

    clamp_max_tokens(&mut body, config.chat_max_tokens);

    Ok(serde_json::to_vec(&body)?)
}

pub fn rewrite_code_body(raw: &[u8], config: &Config) -> Result<Vec<u8>, TransformError> {
    let mut body = parse_object(raw)?;

    for field in CODE_STRIPPED_FIELDS {
        body.shift_remove(field);
    }
    body.insert(
        "model".to_string(),
        Value::String(config.code_instruct_model.clone()),
    );
    clamp_max_tokens(&mut body, config.codex_max_tokens);

    CodeModelFamily::classify(&config.code_instruct_model).reshape(&mut body);

    Ok(serde_json::to_vec(&body)?)
}

fn parse_object(raw: &[u8]) -> Result<Map<String, Value>, TransformError> {
    match serde_json::from_slice(raw)? {
        Value::Object(map) => Ok(map),
        _ => Err(TransformError::NotAnObject),
    }
}

fn annotate_locale(body: &mut Map<String, Value>, locale: &str) {
    let Some(last) = body
        .get_mut("messages")
        .and_then(Value::as_array_mut)
        .and_then(|messages| messages.last_mut())
        .and_then(Value::as_object_mut)
    else {
        return;
    };

    let content = match last.get("content") {
        None | Some(Value::Null) => "",
        Some(Value::String(text)) => text.as_str(),
        // multi-part content is left as the client sent it
        Some(_) => return,
    };
    if content.contains(LOCALE_MARKER) {
        return;
    }
    let annotated = format!("{}{}: {}.", content, LOCALE_MARKER, locale);
    last.insert("content".to_string(), Value::String(annotated));
}

/// Numeric strings count as numbers, so `"99999"` is clamped too.
fn clamp_max_tokens(body: &mut Map<String, Value>, ceiling: u64) {
    let over = body
        .get("max_tokens")
        .and_then(|value| match value {
            Value::Number(n) => n.as_f64(),
            Value::String(text) => text.trim().parse::<f64>().ok(),
            _ => None,
        })
        .is_some_and(|requested| requested > ceiling as f64);
    if over {
        body.insert("max_tokens".to_string(), json!(ceiling));
    }
}

fn fim_prompt(prompt: Option<&Value>, suffix: Option<&Value>) -> String {
    format!(
        "<fim_prefix>{}<fim_suffix>{}<fim_middle>",
        render_fragment(prompt),
        render_fragment(suffix)
    )
}

fn render_fragment(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}
