use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use banana_contracts::request::GenerationMode;
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Map, Value};

use super::{
    api_base_from_env, non_empty_env, post_with_transport_retries, response_json_or_error,
    ImageProvider, ProviderCall, ProviderResponse, ProviderSettings,
};

const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const GEMINI_IMAGE_MODEL: &str = "gemini-2.5-flash-image-preview";

/// Gemini `generateContent` image model. Handles text-to-image and editing
/// with up to three reference images.
pub struct GeminiProvider {
    api_base: String,
    model: String,
    settings: ProviderSettings,
    http: HttpClient,
}

impl GeminiProvider {
    pub fn new(settings: ProviderSettings) -> Self {
        Self {
            api_base: api_base_from_env(&["GEMINI_API_BASE"], DEFAULT_API_BASE),
            model: GEMINI_IMAGE_MODEL.to_string(),
            settings,
            http: HttpClient::new(),
        }
    }

    fn api_key() -> Option<String> {
        non_empty_env("GEMINI_API_KEY").or_else(|| non_empty_env("GOOGLE_API_KEY"))
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.api_base, self.model)
    }

    /// Prompt text first, then the reference images in slot order.
    fn build_parts(call: &ProviderCall) -> Vec<Value> {
        let mut parts = vec![json!({ "text": Self::prompt_text(call) })];
        for image in &call.images {
            parts.push(json!({
                "inlineData": {
                    "mimeType": "image/png",
                    "data": BASE64.encode(&image.png_bytes),
                }
            }));
        }
        parts
    }

    /// Edits send the prompt untouched; the ratio travels in `imageConfig`.
    fn prompt_text(call: &ProviderCall) -> String {
        if !call.images.is_empty() || call.mode == GenerationMode::ImageEdit {
            return call.prompt.clone();
        }
        format!(
            "Create a high-quality image based on this description: {}\n\n\
             Style: photorealistic, detailed, well-composed\n\
             Output: single image with aspect ratio {}",
            call.prompt,
            call.aspect_ratio.as_str()
        )
    }

    fn safety_settings() -> Vec<Value> {
        [
            "HARM_CATEGORY_HATE_SPEECH",
            "HARM_CATEGORY_HARASSMENT",
            "HARM_CATEGORY_SEXUALLY_EXPLICIT",
            "HARM_CATEGORY_DANGEROUS_CONTENT",
        ]
        .into_iter()
        .map(|category| {
            json!({
                "category": category,
                "threshold": "BLOCK_NONE",
            })
        })
        .collect()
    }

    fn build_payload(call: &ProviderCall) -> Value {
        let mut payload = Map::new();
        payload.insert(
            "contents".to_string(),
            json!([{
                "role": "user",
                "parts": Self::build_parts(call),
            }]),
        );
        payload.insert(
            "generationConfig".to_string(),
            json!({
                "candidateCount": 1,
                "responseModalities": ["IMAGE", "TEXT"],
                "imageConfig": { "aspectRatio": call.aspect_ratio.as_str() },
            }),
        );
        payload.insert(
            "safetySettings".to_string(),
            Value::Array(Self::safety_settings()),
        );
        Value::Object(payload)
    }

    fn extract_images(response_payload: &Value) -> Result<Vec<Vec<u8>>> {
        let candidates = response_payload
            .get("candidates")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let mut out = Vec::new();

        for candidate in candidates {
            let parts = candidate
                .get("content")
                .and_then(|content| content.get("parts"))
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for part in parts {
                let data = part
                    .get("inlineData")
                    .or_else(|| part.get("inline_data"))
                    .and_then(|inline| inline.get("data"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if data.is_empty() {
                    continue;
                }
                let bytes = BASE64
                    .decode(data.as_bytes())
                    .context("Gemini image base64 decode failed")?;
                out.push(bytes);
            }
        }
        Ok(out)
    }
}

impl ImageProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn generate(&self, call: &ProviderCall) -> Result<ProviderResponse> {
        let Some(api_key) = Self::api_key() else {
            bail!("GEMINI_API_KEY or GOOGLE_API_KEY not set");
        };
        let endpoint = self.endpoint();
        let payload = Self::build_payload(call);
        let mut warnings = Vec::new();

        let response = post_with_transport_retries(
            &self.http,
            "Gemini",
            &endpoint,
            &api_key,
            &payload,
            &self.settings,
            &mut warnings,
        )?;
        let response_payload = response_json_or_error("Gemini", response)?;
        if response_payload
            .get("candidates")
            .and_then(Value::as_array)
            .map_or(true, |rows| rows.is_empty())
        {
            let reason = response_payload
                .get("promptFeedback")
                .and_then(|feedback| feedback.get("blockReason"))
                .and_then(Value::as_str)
                .unwrap_or("no candidates");
            bail!("Gemini returned no candidates ({reason})");
        }

        let images = Self::extract_images(&response_payload)?;
        if images.is_empty() {
            bail!("Gemini response contained no image data");
        }
        Ok(ProviderResponse { images, warnings })
    }
}

#[cfg(test)]
mod tests {
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    use banana_contracts::request::{AspectRatio, GenerationMode};
    use serde_json::json;

    use super::GeminiProvider;
    use crate::inputs::PreparedImage;
    use crate::providers::ProviderCall;

    fn call(mode: GenerationMode, images: Vec<PreparedImage>) -> ProviderCall {
        ProviderCall {
            prompt: "make it yellow".to_string(),
            mode,
            aspect_ratio: AspectRatio::Portrait,
            images,
            worker_index: 0,
        }
    }

    fn prepared(tag: u8) -> PreparedImage {
        PreparedImage {
            source: format!("{tag}.png").into(),
            png_bytes: vec![tag; 4],
            width: 2,
            height: 2,
        }
    }

    #[test]
    fn text_to_image_payload_uses_descriptive_prompt() {
        let payload = GeminiProvider::build_payload(&call(GenerationMode::TextToImage, Vec::new()));
        let parts = &payload["contents"][0]["parts"];
        let text = parts[0]["text"].as_str().unwrap_or_default();
        assert!(text.starts_with("Create a high-quality image based on this description: make it yellow"));
        assert!(text.ends_with("aspect ratio 9:16"));
        assert_eq!(payload["generationConfig"]["imageConfig"]["aspectRatio"], json!("9:16"));
        assert_eq!(payload["safetySettings"][0]["threshold"], json!("BLOCK_NONE"));
    }

    #[test]
    fn edit_payload_puts_prompt_before_images_in_order() {
        let payload = GeminiProvider::build_payload(&call(
            GenerationMode::ImageEdit,
            vec![prepared(1), prepared(2)],
        ));
        let parts = payload["contents"][0]["parts"].as_array().cloned().unwrap_or_default();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0]["text"], json!("make it yellow"));
        assert_eq!(payload["generationConfig"]["imageConfig"]["aspectRatio"], json!("9:16"));
        assert_eq!(parts[1]["inlineData"]["data"], json!(BASE64.encode([1u8; 4])));
        assert_eq!(parts[2]["inlineData"]["data"], json!(BASE64.encode([2u8; 4])));
    }

    #[test]
    fn extracts_inline_images_from_candidates() -> anyhow::Result<()> {
        let response = json!({
            "candidates": [{
                "content": {
                    "parts": [
                        { "text": "here you go" },
                        { "inlineData": { "mimeType": "image/png", "data": BASE64.encode(b"img-a") } },
                        { "inline_data": { "data": BASE64.encode(b"img-b") } }
                    ]
                }
            }]
        });
        let images = GeminiProvider::extract_images(&response)?;
        assert_eq!(images, vec![b"img-a".to_vec(), b"img-b".to_vec()]);
        Ok(())
    }
}
