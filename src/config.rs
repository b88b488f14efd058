use std::env;
use std::fmt;

use anyhow::{anyhow, Context, Result};

use crate::gate::{Ipv4Cidr, DEFAULT_ALLOWED_RANGES};
use crate::sanitize::DEFAULT_MAX_TEXT_CHARS;

pub const DEFAULT_COMPLETIONS_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "deepseek/deepseek-chat:free";
pub const DEFAULT_TELEGRAM_API: &str = "https://api.telegram.org";

#[derive(Debug, Clone)]
pub struct RotationConfig {
    pub max_bytes: Option<u64>,
    pub keep: usize,
    pub compress: bool,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            max_bytes: None,
            keep: 1,
            compress: false,
        }
    }
}

/// Process-wide configuration, built once at startup and shared read-only.
#[derive(Clone)]
pub struct AppConfig {
    pub bot_token: String,
    pub api_key: String,
    pub allowed_ranges: Vec<Ipv4Cidr>,
    pub knowledge_file: String,
    pub question_log_file: String,
    pub security_log_file: String,
    pub max_text_chars: usize,
    pub completions_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub upstream_timeout_ms: u64,
    pub telegram_api: String,
    pub webhook_path: String,
    pub max_request_bytes: Option<usize>,
    pub rotation: RotationConfig,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("bot_token", &"<redacted>")
            .field("api_key", &"<redacted>")
            .field("allowed_ranges", &self.allowed_ranges)
            .field("knowledge_file", &self.knowledge_file)
            .field("question_log_file", &self.question_log_file)
            .field("security_log_file", &self.security_log_file)
            .field("max_text_chars", &self.max_text_chars)
            .field("completions_url", &self.completions_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("upstream_timeout_ms", &self.upstream_timeout_ms)
            .field("telegram_api", &self.telegram_api)
            .field("webhook_path", &self.webhook_path)
            .field("max_request_bytes", &self.max_request_bytes)
            .field("rotation", &self.rotation)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let bot_token = required("KBRELAY_BOT_TOKEN")?;
        let api_key = required("KBRELAY_API_KEY")?;

        let allowed_ranges = match env::var("KBRELAY_ALLOWED_RANGES") {
            Ok(raw) if !raw.trim().is_empty() => parse_ranges(&raw)
                .context("Failed to parse KBRELAY_ALLOWED_RANGES: expected comma separated IPv4 CIDRs")?,
            _ => parse_ranges(&DEFAULT_ALLOWED_RANGES.join(","))?,
        };

        let webhook_path = string_or("KBRELAY_WEBHOOK_PATH", "/webhook");
        if !webhook_path.starts_with('/') {
            return Err(anyhow!("KBRELAY_WEBHOOK_PATH must start with '/'"));
        }

        let max_tokens = parse_optional_u64("KBRELAY_MAX_TOKENS")?.unwrap_or(500);
        let max_tokens = u32::try_from(max_tokens)
            .map_err(|_| anyhow!("KBRELAY_MAX_TOKENS is out of range"))?;

        let rotation = RotationConfig {
            max_bytes: parse_optional_u64("LOG_MAX_BYTES")?,
            keep: parse_optional_u64("LOG_ROTATE_KEEP")?.unwrap_or(1) as usize,
            compress: parse_bool_env("LOG_ROTATE_COMPRESS")?.unwrap_or(false),
        };

        Ok(Self {
            bot_token,
            api_key,
            allowed_ranges,
            knowledge_file: string_or("KBRELAY_KNOWLEDGE_FILE", "knowledge.json"),
            question_log_file: string_or("KBRELAY_QUESTION_LOG", "logs.json"),
            security_log_file: string_or("KBRELAY_SECURITY_LOG", "security_log.txt"),
            max_text_chars: parse_optional_u64("KBRELAY_MAX_TEXT_CHARS")?
                .map(|v| v as usize)
                .unwrap_or(DEFAULT_MAX_TEXT_CHARS),
            completions_url: string_or("KBRELAY_COMPLETIONS_URL", DEFAULT_COMPLETIONS_URL),
            model: string_or("KBRELAY_MODEL", DEFAULT_MODEL),
            max_tokens,
            upstream_timeout_ms: parse_optional_u64("KBRELAY_UPSTREAM_TIMEOUT_MS")?
                .unwrap_or(20_000),
            telegram_api: string_or("KBRELAY_TELEGRAM_API", DEFAULT_TELEGRAM_API),
            webhook_path,
            max_request_bytes: parse_optional_u64("KBRELAY_MAX_REQUEST_BYTES")?
                .map(|v| v as usize),
            rotation,
        })
    }
}

fn parse_ranges(raw: &str) -> Result<Vec<Ipv4Cidr>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<Ipv4Cidr>().map_err(anyhow::Error::from))
        .collect()
}

/// Secrets must be present; their shape is checked by the request gate.
fn required(var: &str) -> Result<String> {
    match env::var(var) {
        Ok(value) => Ok(value),
        Err(env::VarError::NotPresent) => Err(anyhow!("{} must be set", var)),
        Err(err) => Err(err).with_context(|| format!("{} is not valid unicode", var)),
    }
}

fn string_or(var: &str, default: &str) -> String {
    env::var(var)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_optional_u64(var: &str) -> Result<Option<u64>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a positive integer", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_bool_env(var: &str) -> Result<Option<bool>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value)
            .map(Some)
            .ok_or_else(|| anyhow!("{} must be a boolean (true/false/1/0)", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
