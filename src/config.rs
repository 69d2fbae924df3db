use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::time::Duration;

pub const DEFAULT_INSTRUCT_MODEL: &str = "gpt-3.5-turbo-instruct";
pub const DEFAULT_CODEX_MAX_TOKENS: u64 = 500;
pub const DEFAULT_CHAT_MAX_TOKENS: u64 = 4096;
pub const DEFAULT_CHAT_LOCALE: &str = "zh_CN";
pub const DEFAULT_CODEX_DELAY_MS: u64 = 200;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config read error ({path}): {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("config invalid json: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("{0}")]
    Invalid(String),
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bind: Option<String>,
    pub proxy_url: Option<String>,
    pub timeout: u64,
    pub codex_api_base: String,
    pub codex_api_key: String,
    pub codex_api_organization: String,
    pub codex_api_project: String,
    pub codex_max_tokens: u64,
    pub code_instruct_model: String,
    pub chat_api_base: String,
    pub chat_api_key: String,
    pub chat_api_organization: String,
    pub chat_api_project: String,
    pub chat_max_tokens: u64,
    pub chat_model_default: String,
    pub chat_model_map: HashMap<String, String>,
    pub chat_locale: String,
    pub auth_token: String,
    pub codex_delay_ms: u64,
    pub observability: ObservabilityConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: None,
            proxy_url: None,
            timeout: 0,
            codex_api_base: String::new(),
            codex_api_key: String::new(),
            codex_api_organization: String::new(),
            codex_api_project: String::new(),
            codex_max_tokens: 0,
            code_instruct_model: String::new(),
            chat_api_base: String::new(),
            chat_api_key: String::new(),
            chat_api_organization: String::new(),
            chat_api_project: String::new(),
            chat_max_tokens: 0,
            chat_model_default: String::new(),
            chat_model_map: HashMap::new(),
            chat_locale: String::new(),
            auth_token: String::new(),
            codex_delay_ms: DEFAULT_CODEX_DELAY_MS,
            observability: ObservabilityConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub otlp_grpc: OtlpGrpcConfig,
    #[serde(default)]
    pub otlp_http: OtlpHttpConfig,
    #[serde(default)]
    pub exporters: ExportersConfig,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            logging: LoggingConfig::default(),
            otlp_grpc: OtlpGrpcConfig::default(),
            otlp_http: OtlpHttpConfig::default(),
            exporters: ExportersConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct OtlpGrpcConfig {
    #[serde(default = "default_otlp_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_otlp_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for OtlpGrpcConfig {
    fn default() -> Self {
        Self {
            endpoint: default_otlp_endpoint(),
            timeout_ms: default_otlp_timeout_ms(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct OtlpHttpConfig {
    #[serde(default = "default_langfuse_http_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub public_key: String,
    #[serde(default)]
    pub secret_key: String,
    #[serde(default = "default_langfuse_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for OtlpHttpConfig {
    fn default() -> Self {
        Self {
            base_url: default_langfuse_http_base_url(),
            public_key: String::new(),
            secret_key: String::new(),
            timeout_ms: default_langfuse_timeout_ms(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ExportersConfig {
    #[serde(default = "default_exporter_kind")]
    pub tracing: String,
    #[serde(default = "default_exporter_kind")]
    pub metrics: String,
}

impl Default for ExportersConfig {
    fn default() -> Self {
        Self {
            tracing: default_exporter_kind(),
            metrics: default_exporter_kind(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_stdout")]
    pub stdout: bool,
    #[serde(default)]
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            stdout: default_log_stdout(),
            file: None,
        }
    }
}

/// One environment override: the JSON field it targets and how to apply a raw value.
/// `apply` returns `false` when the value does not parse; the field is then left alone.
struct Override {
    field: &'static str,
    apply: fn(&mut Config, &str) -> bool,
}

macro_rules! string_override {
    ($field:ident) => {
        Override {
            field: stringify!($field),
            apply: |cfg, value| {
                cfg.$field = value.to_string();
                true
            },
        }
    };
}

macro_rules! optional_string_override {
    ($field:ident) => {
        Override {
            field: stringify!($field),
            apply: |cfg, value| {
                cfg.$field = Some(value.to_string());
                true
            },
        }
    };
}

macro_rules! unsigned_override {
    ($field:ident) => {
        Override {
            field: stringify!($field),
            apply: |cfg, value| match value.trim().parse::<u64>() {
                Ok(parsed) => {
                    cfg.$field = parsed;
                    true
                }
                Err(_) => false,
            },
        }
    };
}

const OVERRIDES: &[Override] = &[
    optional_string_override!(bind),
    optional_string_override!(proxy_url),
    unsigned_override!(timeout),
    string_override!(codex_api_base),
    string_override!(codex_api_key),
    string_override!(codex_api_organization),
    string_override!(codex_api_project),
    unsigned_override!(codex_max_tokens),
    string_override!(code_instruct_model),
    string_override!(chat_api_base),
    string_override!(chat_api_key),
    string_override!(chat_api_organization),
    string_override!(chat_api_project),
    unsigned_override!(chat_max_tokens),
    string_override!(chat_model_default),
    Override {
        field: "chat_model_map",
        apply: |cfg, value| match serde_json::from_str::<HashMap<String, String>>(value) {
            Ok(map) => {
                cfg.chat_model_map = map;
                true
            }
            Err(_) => false,
        },
    },
    string_override!(chat_locale),
    string_override!(auth_token),
    unsigned_override!(codex_delay_ms),
];

pub fn override_var_name(field: &str) -> String {
    format!("OVERRIDE_{}", field.to_uppercase())
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.json".to_string());
        let content = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let mut config = Self::from_json(&content)?;
        config.apply_overrides(|name| std::env::var(name).ok());
        config.normalize()?;
        Ok(config)
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(content)?)
    }

    /// Applies `OVERRIDE_<FIELD>` values found through `lookup`. Returns the fields that
    /// were overridden.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Vec<&'static str>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut applied = Vec::new();
        for entry in OVERRIDES {
            let Some(value) = lookup(&override_var_name(entry.field)) else {
                continue;
            };
            if (entry.apply)(self, &value) {
                applied.push(entry.field);
            }
        }
        applied
    }

    pub fn bind_addr(&self) -> &str {
        match self.bind.as_deref() {
            Some(bind) if !bind.trim().is_empty() => bind,
            _ => "0.0.0.0:8080",
        }
    }

    pub fn proxy_url(&self) -> Option<&str> {
        self.proxy_url.as_deref().filter(|url| !url.trim().is_empty())
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.timeout > 0).then(|| Duration::from_secs(self.timeout))
    }

    pub fn codex_delay(&self) -> Duration {
        Duration::from_millis(self.codex_delay_ms)
    }

    pub fn chat_locale(&self) -> &str {
        if self.chat_locale.is_empty() {
            DEFAULT_CHAT_LOCALE
        } else {
            &self.chat_locale
        }
    }

    pub fn auth_token(&self) -> Option<&str> {
        Some(self.auth_token.as_str()).filter(|token| !token.is_empty())
    }

    pub fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.chat_api_base)
    }

    pub fn codex_completions_url(&self) -> String {
        format!("{}/completions", self.codex_api_base)
    }

    pub fn normalize(&mut self) -> Result<(), ConfigError> {
        if self.code_instruct_model.is_empty() {
            self.code_instruct_model = DEFAULT_INSTRUCT_MODEL.to_string();
        }
        if self.codex_max_tokens == 0 {
            self.codex_max_tokens = DEFAULT_CODEX_MAX_TOKENS;
        }
        if self.chat_max_tokens == 0 {
            self.chat_max_tokens = DEFAULT_CHAT_MAX_TOKENS;
        }
        self.observability.logging.level = self.observability.logging.level.to_lowercase();
        match self.observability.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(ConfigError::Invalid(format!(
                    "observability.logging.level invalid: {}",
                    other
                )));
            }
        }
        for kind in [
            self.observability.exporters.tracing.as_str(),
            self.observability.exporters.metrics.as_str(),
        ] {
            match kind {
                "none" | "otlp_grpc" | "langfuse_http" => {}
                other => {
                    return Err(ConfigError::Invalid(format!(
                        "observability.exporters invalid: {}",
                        other
                    )));
                }
            }
        }
        Ok(())
    }
}

fn default_service_name() -> String {
    "copilot-gateway".to_string()
}

fn default_otlp_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_otlp_timeout_ms() -> u64 {
    3000
}

fn default_langfuse_http_base_url() -> String {
    "https://cloud.langfuse.com/api/public/otel".to_string()
}

fn default_langfuse_timeout_ms() -> u64 {
    5000
}

fn default_exporter_kind() -> String {
    "none".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_stdout() -> bool {
    true
}

impl OtlpHttpConfig {
    pub fn traces_endpoint(&self) -> String {
        format!("{}/v1/traces", self.base_url.trim_end_matches('/'))
    }

    pub fn metrics_endpoint(&self) -> String {
        format!("{}/v1/metrics", self.base_url.trim_end_matches('/'))
    }
}
