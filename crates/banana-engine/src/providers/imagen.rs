use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};

use super::{
    api_base_from_env, non_empty_env, post_with_transport_retries, push_unique_warning,
    response_json_or_error, ImageProvider, ProviderCall, ProviderResponse, ProviderSettings,
};

const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const IMAGEN_MODEL: &str = "imagen-4.0-generate-preview-06-06";

/// Imagen 4 `:predict`, text-to-image only. One sample per worker.
pub struct ImagenProvider {
    api_base: String,
    model: String,
    settings: ProviderSettings,
    http: HttpClient,
}

impl ImagenProvider {
    pub fn new(settings: ProviderSettings) -> Self {
        Self {
            api_base: api_base_from_env(&["IMAGEN_API_BASE", "GEMINI_API_BASE"], DEFAULT_API_BASE),
            model: IMAGEN_MODEL.to_string(),
            settings,
            http: HttpClient::new(),
        }
    }

    fn api_key() -> Option<String> {
        non_empty_env("IMAGEN_API_KEY")
            .or_else(|| non_empty_env("GEMINI_API_KEY"))
            .or_else(|| non_empty_env("GOOGLE_API_KEY"))
    }

    fn build_payload(call: &ProviderCall) -> Value {
        json!({
            "instances": [{ "prompt": call.prompt }],
            "parameters": {
                "sampleCount": 1,
                "aspectRatio": call.aspect_ratio.as_str(),
            },
        })
    }

    fn extract_predictions(response_payload: &Value) -> Result<Vec<Vec<u8>>> {
        let predictions = response_payload
            .get("predictions")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let mut out = Vec::new();
        for row in predictions {
            let encoded = row
                .get("bytesBase64Encoded")
                .or_else(|| row.get("bytes_base64_encoded"))
                .or_else(|| row.get("image").and_then(|image| image.get("imageBytes")))
                .and_then(Value::as_str);
            let Some(encoded) = encoded else {
                continue;
            };
            let bytes = BASE64
                .decode(encoded.as_bytes())
                .context("Imagen image base64 decode failed")?;
            out.push(bytes);
        }
        Ok(out)
    }
}

impl ImageProvider for ImagenProvider {
    fn name(&self) -> &str {
        "imagen"
    }

    fn generate(&self, call: &ProviderCall) -> Result<ProviderResponse> {
        let Some(api_key) = Self::api_key() else {
            bail!("IMAGEN_API_KEY, GEMINI_API_KEY or GOOGLE_API_KEY not set");
        };
        let mut warnings = Vec::new();
        if !call.images.is_empty() {
            push_unique_warning(
                &mut warnings,
                format!(
                    "Imagen ignores reference images; {} dropped.",
                    call.images.len()
                ),
            );
        }

        let endpoint = format!("{}/models/{}:predict", self.api_base, self.model);
        let payload = Self::build_payload(call);
        let response = post_with_transport_retries(
            &self.http,
            "Imagen",
            &endpoint,
            &api_key,
            &payload,
            &self.settings,
            &mut warnings,
        )?;
        let response_payload = response_json_or_error("Imagen", response)?;
        let images = Self::extract_predictions(&response_payload)?;
        if images.is_empty() {
            bail!("Imagen returned no images");
        }
        Ok(ProviderResponse { images, warnings })
    }
}
