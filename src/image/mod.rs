//! Bildgenerierung über die Gemini REST API (generateContent)
//!
//! Das erste Bild der Antwort wird im Ausgabeverzeichnis gespeichert und
//! zusätzlich als base64 an den Client zurückgegeben.

use crate::protocol::ImageResultPayload;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::path::PathBuf;
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("Server configuration error: API key missing.")]
    MissingApiKey,

    #[error("Image generation failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Image generation failed: {0}")]
    Api(String),

    #[error("Image generation successful, but no image was returned by the model.")]
    NoImage,

    #[error("Failed to store generated image: {0}")]
    Storage(#[from] std::io::Error),
}

// ============================================================================
// REQUEST / GENERATOR TRAIT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    pub text: String,
    /// Optionales Eingabebild, base64 (JPEG)
    pub image_base64: Option<String>,
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, request: ImageRequest) -> ImageResultPayload;
}

// ============================================================================
// GEMINI IMAGE GENERATOR
// ============================================================================

pub struct GeminiImageGenerator {
    client: reqwest::Client,
    api_base: String,
    model: String,
    api_key: Option<String>,
    output_dir: PathBuf,
}

/// Ein gespeichertes Bild
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredImage {
    pub url: String,
    pub data_base64: String,
}

impl GeminiImageGenerator {
    pub fn new(
        api_base: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.into(),
            model: model.into(),
            api_key,
            output_dir: output_dir.into(),
        }
    }

    async fn try_generate(&self, request: &ImageRequest) -> Result<StoredImage, ImageError> {
        let key = self.api_key.as_deref().ok_or(ImageError::MissingApiKey)?;
        let url = format!(
            "{}/models/{}:generateContent",
            self.api_base.trim_end_matches('/'),
            self.model
        );

        tracing::info!(model = %self.model, "Sending image generation request");
        let response = self
            .client
            .post(&url)
            .query(&[("key", key)])
            .json(&request_body(request))
            .send()
            .await?;

        let status = response.status();
        let body: Value = response.json().await?;
        if !status.is_success() {
            let message = body
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(ImageError::Api(format!("{} ({})", message, status)));
        }

        let data = first_image_data(&body).ok_or(ImageError::NoImage)?;
        self.store(data).await
    }

    async fn store(&self, data_base64: String) -> Result<StoredImage, ImageError> {
        use base64::{engine::general_purpose::STANDARD, Engine as _};

        let bytes = STANDARD
            .decode(data_base64.as_bytes())
            .map_err(|e| ImageError::Api(format!("Invalid image data: {}", e)))?;

        tokio::fs::create_dir_all(&self.output_dir).await?;
        let filename = format!("generated-image-{}.png", Utc::now().timestamp_millis());
        let path = self.output_dir.join(&filename);
        tokio::fs::write(&path, &bytes).await?;
        tracing::info!("Image saved as {}", path.display());

        Ok(StoredImage {
            url: format!("/generated_images/{}", filename),
            data_base64,
        })
    }
}

#[async_trait]
impl ImageGenerator for GeminiImageGenerator {
    async fn generate(&self, request: ImageRequest) -> ImageResultPayload {
        match self.try_generate(&request).await {
            Ok(image) => ImageResultPayload {
                success: true,
                image_url: Some(image.url),
                image_data: Some(image.data_base64),
                error: None,
            },
            Err(e) => {
                tracing::warn!("Image generation failed: {}", e);
                ImageResultPayload {
                    success: false,
                    error: Some(e.to_string()),
                    ..Default::default()
                }
            }
        }
    }
}

impl std::fmt::Debug for GeminiImageGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiImageGenerator")
            .field("model", &self.model)
            .field("output_dir", &self.output_dir)
            .field("api_key_set", &self.api_key.is_some())
            .finish()
    }
}

fn request_body(request: &ImageRequest) -> Value {
    let mut parts = vec![json!({ "text": request.text })];
    if let Some(image) = &request.image_base64 {
        parts.push(json!({ "inlineData": { "mimeType": "image/jpeg", "data": image } }));
    }
    json!({
        "contents": [{ "parts": parts }],
        "generationConfig": { "responseModalities": ["TEXT", "IMAGE"] }
    })
}

/// Sucht das erste `image/*` inlineData im ersten Kandidaten
fn first_image_data(response: &Value) -> Option<String> {
    response
        .pointer("/candidates/0/content/parts")?
        .as_array()?
        .iter()
        .filter_map(|part| part.get("inlineData"))
        .find(|inline| {
            inline
                .get("mimeType")
                .and_then(Value::as_str)
                .is_some_and(|m| m.starts_with("image/"))
        })
        .and_then(|inline| inline.get("data")?.as_str())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_includes_input_image() {
        let body = request_body(&ImageRequest {
            text: "a cat".to_string(),
            image_base64: Some("AAAA".to_string()),
        });
        assert_eq!(body["contents"][0]["parts"][0]["text"], "a cat");
        assert_eq!(
            body["contents"][0]["parts"][1]["inlineData"]["mimeType"],
            "image/jpeg"
        );
        assert_eq!(body["generationConfig"]["responseModalities"][1], "IMAGE");
    }

    #[test]
    fn finds_first_image_part() {
        let response = json!({
            "candidates": [{ "content": { "parts": [
                { "text": "here you go" },
                { "inlineData": { "mimeType": "image/png", "data": "iVBO" } }
            ]}}]
        });
        assert_eq!(first_image_data(&response), Some("iVBO".to_string()));
        assert_eq!(first_image_data(&json!({ "candidates": [] })), None);
    }

    #[tokio::test]
    async fn missing_api_key_is_reported() {
        let generator = GeminiImageGenerator::new("http://localhost", "m", None, "unused");
        let result = generator
            .generate(ImageRequest {
                text: "x".to_string(),
                image_base64: None,
            })
            .await;
        assert!(!result.success);
        assert_eq!(
            result.error.as_deref(),
            Some("Server configuration error: API key missing.")
        );
    }

    #[tokio::test]
    async fn stores_image_under_output_dir() {
        let dir = std::env::temp_dir().join(format!("live-gateway-test-{}", uuid::Uuid::new_v4()));
        let generator = GeminiImageGenerator::new("http://localhost", "m", None, &dir);

        let stored = generator.store("aGVsbG8=".to_string()).await.unwrap();
        assert!(stored.url.starts_with("/generated_images/generated-image-"));
        let filename = stored.url.trim_start_matches("/generated_images/");
        assert_eq!(std::fs::read(dir.join(filename)).unwrap(), b"hello");

        let _ = std::fs::remove_dir_all(&dir);
    }
}
