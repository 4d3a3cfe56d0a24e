//! Narrative briefing service
//!
//! `GeminiClient` asks a search-grounded Gemini model for a short visitor
//! briefing about a place and returns it as an `IntelPayload` ready for the
//! first-writer-wins intel merge.

use crate::domain::types::Coordinate;
use crate::error::TransportError;
use crate::infra::config::Config;
use crate::services::merge::IntelPayload;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

#[async_trait]
pub trait BriefingService: Send + Sync {
    async fn fetch_briefing(&self, coords: Coordinate, place_name: &str) -> Result<IntelPayload, TransportError>;
}

const SYSTEM_INSTRUCTION: &str = "You are a local field guide. Keep an informative tone, avoid \
    marketing language and stay brief. Always open with a one or two sentence \"Summary:\" line, \
    followed by at most three focused bullet points. When a section has no information, write \
    \"unknown\" rather than leaving it out.";

/// Request body for `generateContent`
pub fn build_request(coords: Coordinate, place_name: &str, locale: &str) -> Value {
    let query = format!(
        "Write a concise briefing in locale {locale} for the place \"{place_name}\" at coordinates \
         {lat}, {lon}. Use this format:\n\
         Summary: one or two sentences with the most important information for a visitor.\n\
         Key points:\n\
         - A notable feature or short background (if known).\n\
         - A practical visiting tip (if relevant).\n\
         - Opening hours or availability (if known).\n\
         Avoid repetition and filler.",
        lat = coords.lat,
        lon = coords.lon,
    );
    json!({
        "contents": [{ "parts": [{ "text": query }] }],
        "tools": [{ "google_search": {} }],
        "systemInstruction": { "parts": [{ "text": SYSTEM_INSTRUCTION }] },
    })
}

/// Text of the first candidate plus its web grounding sources
pub fn parse_response(body: &Value, locale: &str) -> Result<IntelPayload, TransportError> {
    let candidate = body
        .pointer("/candidates/0")
        .ok_or_else(|| TransportError::Decode("response has no candidates".to_string()))?;
    let text = candidate
        .pointer("/content/parts/0/text")
        .and_then(Value::as_str)
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| TransportError::Decode("first candidate has no text".to_string()))?;

    let sources = candidate
        .pointer("/groundingMetadata/groundingAttributions")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|attribution| {
            let title = attribution.pointer("/web/title").and_then(Value::as_str)?;
            let uri = attribution.pointer("/web/uri").and_then(Value::as_str)?;
            Some((title.to_string(), uri.to_string()))
        })
        .collect();

    Ok(IntelPayload {
        text: text.to_string(),
        html: None,
        sources,
        locale: Some(locale.to_string()),
        place_name: None,
        coords: None,
    })
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.pointer("/error/message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| "Unknown error".to_string())
}

pub struct GeminiClient {
    url: String,
    api_key: Option<String>,
    locale: String,
    enabled: bool,
    http_client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(config: &Config) -> Result<Self, TransportError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.briefing_timeout_ms()))
            .build()?;
        Ok(Self {
            url: config.briefing_url().to_string(),
            api_key: config.briefing_api_key().map(str::to_string),
            locale: config.briefing_locale().to_string(),
            enabled: config.briefing_enabled(),
            http_client,
        })
    }
}

#[async_trait]
impl BriefingService for GeminiClient {
    async fn fetch_briefing(&self, coords: Coordinate, place_name: &str) -> Result<IntelPayload, TransportError> {
        let api_key = match (&self.api_key, self.enabled) {
            (Some(key), true) => key,
            (None, true) => {
                warn!("briefing_api_key_missing");
                return Err(TransportError::Disabled);
            }
            (_, false) => return Err(TransportError::Disabled),
        };

        debug!(place = %place_name, coords = %coords, "briefing_request");
        let response = self
            .http_client
            .post(&self.url)
            .query(&[("key", api_key.as_str())])
            .json(&build_request(coords, place_name, &self.locale))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = error_message(&body);
            warn!(status = %status.as_u16(), message = %message, "briefing_failed");
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                return Err(TransportError::Quota(message));
            }
            return Err(TransportError::Status { status: status.as_u16(), message });
        }

        let body: Value = response.json().await?;
        let mut payload = parse_response(&body, &self.locale)?;
        payload.place_name = Some(place_name.to_string());
        payload.coords = Some(coords);
        info!(place = %place_name, sources = payload.sources.len(), "briefing_received");
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_response_with_sources() {
        let body = json!({
            "candidates": [{
                "content": { "parts": [{ "text": "Summary: Busy mornings.\n- Bring ID" }] },
                "groundingMetadata": {
                    "groundingAttributions": [
                        { "web": { "title": "Clinic site", "uri": "https://clinic.example" } },
                        { "web": { "title": "No uri" } },
                        { "segment": {} }
                    ]
                }
            }]
        });

        let payload = parse_response(&body, "he-IL").unwrap();

        assert_eq!(payload.text, "Summary: Busy mornings.\n- Bring ID");
        assert_eq!(payload.sources, vec![("Clinic site".to_string(), "https://clinic.example".to_string())]);
        assert_eq!(payload.locale.as_deref(), Some("he-IL"));
    }

    #[test]
    fn test_parse_response_without_text() {
        assert!(matches!(parse_response(&json!({"candidates": []}), "he-IL"), Err(TransportError::Decode(_))));
        let empty = json!({"candidates": [{"content": {"parts": [{"text": "  "}]}}]});
        assert!(matches!(parse_response(&empty, "he-IL"), Err(TransportError::Decode(_))));
    }

    #[test]
    fn test_build_request_shape() {
        let body = build_request(Coordinate { lat: 31.5, lon: 34.9 }, "Clinic", "he-IL");

        let query = body.pointer("/contents/0/parts/0/text").and_then(Value::as_str).unwrap();
        assert!(query.contains("\"Clinic\""));
        assert!(query.contains("31.5, 34.9"));
        assert!(body["tools"][0].get("google_search").is_some());
    }

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(error_message(r#"{"error":{"message":"quota"}}"#), "quota");
        assert_eq!(error_message("<html>"), "Unknown error");
    }

    #[tokio::test]
    async fn test_missing_key_is_disabled() {
        let client = GeminiClient::new(&Config::default()).unwrap();
        if client.api_key.is_none() {
            let result = client.fetch_briefing(Coordinate { lat: 0.0, lon: 0.0 }, "x").await;
            assert!(matches!(result, Err(TransportError::Disabled)));
        }
    }
}
