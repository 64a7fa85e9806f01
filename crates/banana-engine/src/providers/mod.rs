mod dryrun;
mod gemini;
mod imagen;

use std::collections::BTreeMap;
use std::env;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use banana_contracts::request::{AspectRatio, GenerationMode};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::Value;

use crate::inputs::PreparedImage;

pub use dryrun::DryrunProvider;
pub use gemini::GeminiProvider;
pub use imagen::ImagenProvider;

/// Everything one worker sends to the generation collaborator.
#[derive(Debug, Clone)]
pub struct ProviderCall {
    /// Already composed with the multi-image suffix when applicable.
    pub prompt: String,
    pub mode: GenerationMode,
    pub aspect_ratio: AspectRatio,
    /// In slot order.
    pub images: Vec<PreparedImage>,
    pub worker_index: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ProviderResponse {
    pub images: Vec<Vec<u8>>,
    pub warnings: Vec<String>,
}

pub trait ImageProvider: Send + Sync {
    fn name(&self) -> &str;
    fn generate(&self, call: &ProviderCall) -> Result<ProviderResponse>;
}

#[derive(Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn ImageProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<P: ImageProvider + 'static>(&mut self, provider: P) {
        self.providers
            .insert(provider.name().to_string(), Arc::new(provider));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ImageProvider>> {
        self.providers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }
}

pub fn default_provider_registry() -> ProviderRegistry {
    let settings = ProviderSettings::from_env();
    let mut providers = ProviderRegistry::new();
    providers.register(DryrunProvider);
    providers.register(GeminiProvider::new(settings.clone()));
    providers.register(ImagenProvider::new(settings));
    providers
}

/// Provider for a mode when the caller does not name one.
pub fn provider_for_mode(mode: GenerationMode) -> &'static str {
    match mode {
        GenerationMode::Imagen => "imagen",
        GenerationMode::TextToImage | GenerationMode::ImageEdit => "gemini",
    }
}

pub const DEFAULT_REQUEST_TIMEOUT_S: f64 = 90.0;
pub const DEFAULT_TRANSPORT_RETRIES: usize = 2;
const DEFAULT_RETRY_BACKOFF_S: f64 = 1.2;

/// Transport settings shared by the HTTP providers.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSettings {
    pub request_timeout_s: f64,
    pub transport_retries: usize,
    pub retry_backoff_s: f64,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            request_timeout_s: DEFAULT_REQUEST_TIMEOUT_S,
            transport_retries: DEFAULT_TRANSPORT_RETRIES,
            retry_backoff_s: DEFAULT_RETRY_BACKOFF_S,
        }
    }
}

impl ProviderSettings {
    /// `BANANA_REQUEST_TIMEOUT_S` (15..=300) and `BANANA_TRANSPORT_RETRIES`
    /// (0..=4); unparsable values fall back to the defaults.
    pub fn from_env() -> Self {
        Self::from_values(
            non_empty_env("BANANA_REQUEST_TIMEOUT_S").as_deref(),
            non_empty_env("BANANA_TRANSPORT_RETRIES").as_deref(),
        )
    }

    fn from_values(timeout: Option<&str>, retries: Option<&str>) -> Self {
        let defaults = Self::default();
        Self {
            request_timeout_s: clamped_f64(timeout, defaults.request_timeout_s, 15.0, 300.0),
            transport_retries: clamped_f64(retries, defaults.transport_retries as f64, 0.0, 4.0)
                .round() as usize,
            retry_backoff_s: defaults.retry_backoff_s,
        }
    }
}

fn clamped_f64(raw: Option<&str>, default: f64, min: f64, max: f64) -> f64 {
    raw.and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .map(|value| value.clamp(min, max))
        .unwrap_or(default)
}

pub(crate) fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub(crate) fn api_base_from_env(keys: &[&str], default: &str) -> String {
    keys.iter()
        .find_map(|key| non_empty_env(key))
        .map(|value| value.trim_end_matches('/').to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// POSTs `payload` with the API key as a query parameter, retrying transient
/// transport failures with a linear backoff.
pub(crate) fn post_with_transport_retries(
    http: &HttpClient,
    provider: &str,
    endpoint: &str,
    api_key: &str,
    payload: &Value,
    settings: &ProviderSettings,
    warnings: &mut Vec<String>,
) -> Result<HttpResponse> {
    let max_retries = settings.transport_retries;
    let mut attempt = 0;
    loop {
        let response = http
            .post(endpoint)
            .query(&[("key", api_key)])
            .timeout(Duration::from_secs_f64(settings.request_timeout_s))
            .json(payload)
            .send();

        match response {
            Ok(ok) => return Ok(ok),
            Err(raw) => {
                let err =
                    anyhow::Error::new(raw).context(format!("{provider} request failed ({endpoint})"));
                if !is_retryable_transport_error(&err) || attempt >= max_retries {
                    return Err(err);
                }
                push_unique_warning(
                    warnings,
                    format!(
                        "{provider} transport retry {}/{} after transient request failure.",
                        attempt + 1,
                        max_retries
                    ),
                );
                let delay_s = settings.retry_backoff_s * (attempt as f64 + 1.0);
                thread::sleep(Duration::from_secs_f64(delay_s));
                attempt += 1;
            }
        }
    }
}

pub(crate) fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

fn is_retryable_transport_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<reqwest::Error>()
            .map(|reqwest_err| {
                reqwest_err.is_timeout() || reqwest_err.is_connect() || reqwest_err.is_request()
            })
            .unwrap_or(false)
    })
}

/// Flattens an error chain into one line, dropping repeated causes.
pub fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts.last().is_some_and(|existing| existing == trimmed) {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

pub(crate) fn push_unique_warning(warnings: &mut Vec<String>, message: String) {
    if message.trim().is_empty() {
        return;
    }
    if warnings.iter().any(|existing| existing == &message) {
        return;
    }
    warnings.push(message);
}
