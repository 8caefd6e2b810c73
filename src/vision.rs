// src/vision.rs

use crate::attributes::AttributeList;
use crate::config::VisionSection;
use crate::heuristics::{AttrValue, AttributeMap, backfill_voltage};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{info, warn};

/// Key holding the raw response when it could not be parsed.
pub const ERROR_KEY: &str = "error";

/// A hosted model that turns a nameplate photo into text.
#[async_trait(?Send)]
pub trait VisionModel {
    async fn describe(
        &self,
        image: &[u8],
        mime_type: &str,
        instruction: &str,
    ) -> Result<String, Box<dyn std::error::Error>>;

    fn name(&self) -> &str;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f64,
    top_p: f64,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

/// Gemini `generateContent` over HTTPS.
pub struct GeminiClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
    temperature: f64,
    top_p: f64,
    max_output_tokens: u32,
}

impl GeminiClient {
    /// The API key comes from `GEMINI_API_KEY`, else from the config file.
    pub fn from_config(vision: &VisionSection) -> Result<Self, Box<dyn std::error::Error>> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| vision.api_key.clone().filter(|k| !k.trim().is_empty()))
            .ok_or("No API key: set GEMINI_API_KEY or run `set-key`")?;

        let client = Client::builder()
            .timeout(Duration::from_secs(vision.timeout_secs))
            .build()?;

        info!(url = %vision.base_url, model = %vision.model, "Using Gemini backend");
        Ok(Self {
            client,
            base_url: vision.base_url.trim_end_matches('/').to_string(),
            model: vision.model.clone(),
            api_key,
            temperature: vision.temperature,
            top_p: vision.top_p,
            max_output_tokens: vision.max_output_tokens,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url,
            self.model,
            urlencoding::encode(&self.api_key)
        )
    }
}

#[async_trait(?Send)]
impl VisionModel for GeminiClient {
    async fn describe(
        &self,
        image: &[u8],
        mime_type: &str,
        instruction: &str,
    ) -> Result<String, Box<dyn std::error::Error>> {
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![
                    Part {
                        text: Some(instruction.to_string()),
                        inline_data: None,
                    },
                    Part {
                        text: None,
                        inline_data: Some(InlineData {
                            mime_type: mime_type.to_string(),
                            data: STANDARD.encode(image),
                        }),
                    },
                ],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
                top_p: self.top_p,
                max_output_tokens: self.max_output_tokens,
            },
        };

        let response = self.client.post(self.endpoint()).json(&request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(format!("Gemini API error {status}: {body}").into());
        }

        let body: GenerateResponse = response.json().await?;
        first_text(body).ok_or_else(|| "Empty response from Gemini".into())
    }

    fn name(&self) -> &str {
        &self.model
    }
}

fn first_text(response: GenerateResponse) -> Option<String> {
    response
        .candidates
        .into_iter()
        .next()?
        .content?
        .parts
        .into_iter()
        .find_map(|p| p.text)
}

/// MIME type from the image's magic bytes; JPEG when unrecognised.
pub fn sniff_mime(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        "image/png"
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        "image/gif"
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        "image/webp"
    } else {
        "image/jpeg"
    }
}

/// Extract the outermost JSON object from a string that may contain
/// surrounding text or markdown fences.
fn extract_json_object(s: &str) -> Result<&str, Box<dyn std::error::Error>> {
    let s = s
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    let start = s.find('{').ok_or("No '{' found in model response")?;
    let end = s.rfind('}').ok_or("No '}' found in model response")?;
    if end <= start {
        return Err("Malformed JSON in model response".into());
    }
    Ok(&s[start..=end])
}

fn parse_object(raw: &str) -> Result<Map<String, Value>, Box<dyn std::error::Error>> {
    let json = extract_json_object(raw)?;
    match serde_json::from_str::<Value>(json)? {
        Value::Object(obj) => Ok(obj),
        _ => Err("Model response is not a JSON object".into()),
    }
}

/// Turn a raw model response into an attribute map. Index keys resolve
/// through `attributes`. Voltage fields the model left empty are filled
/// from the raw text when it names a high-side figure. An unparsable
/// response yields a map with a single `error` entry holding the text.
pub fn parse_response(raw: &str, attributes: Option<&AttributeList>) -> AttributeMap {
    let obj = match parse_object(raw) {
        Ok(obj) => obj,
        Err(e) => {
            warn!(error = %e, chars = raw.len(), "Unparsable model response");
            let mut map = AttributeMap::new();
            map.set(ERROR_KEY, AttrValue::Text(raw.to_string()));
            return map;
        }
    };

    let mut map = AttributeMap::from_json_object(&obj, |key| match attributes {
        Some(list) => list.resolve_key(key),
        None => key.to_string(),
    });
    let filled = backfill_voltage(&mut map, raw);
    if filled > 0 {
        info!(filled, "Voltage back-filled from raw text");
    }
    map
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::RefCell;

    /// Replays canned responses and records the instructions it was sent.
    pub(crate) struct ScriptedModel {
        replies: RefCell<Vec<Result<String, String>>>,
        pub(crate) seen: RefCell<Vec<(String, usize)>>,
    }

    impl ScriptedModel {
        pub(crate) fn new(replies: Vec<Result<&str, &str>>) -> Self {
            Self {
                replies: RefCell::new(
                    replies
                        .into_iter()
                        .rev()
                        .map(|r| r.map(str::to_string).map_err(str::to_string))
                        .collect(),
                ),
                seen: RefCell::new(Vec::new()),
            }
        }
    }

    #[async_trait(?Send)]
    impl VisionModel for ScriptedModel {
        async fn describe(
            &self,
            image: &[u8],
            mime_type: &str,
            _instruction: &str,
        ) -> Result<String, Box<dyn std::error::Error>> {
            self.seen.borrow_mut().push((mime_type.to_string(), image.len()));
            match self.replies.borrow_mut().pop() {
                Some(Ok(text)) => Ok(text),
                Some(Err(e)) => Err(e.into()),
                None => Err("no scripted reply left".into()),
            }
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    #[test]
    fn test_sniff_mime() {
        assert_eq!(sniff_mime(b"\x89PNG\r\n\x1a\nrest"), "image/png");
        assert_eq!(sniff_mime(b"GIF89a..."), "image/gif");
        assert_eq!(sniff_mime(b"RIFF\0\0\0\0WEBPVP8 "), "image/webp");
        assert_eq!(sniff_mime(b"\xff\xd8\xff\xe0"), "image/jpeg");
        assert_eq!(sniff_mime(b""), "image/jpeg");
    }

    #[test]
    fn test_parse_fenced_response_with_index_keys() {
        let list = AttributeList::from_names(["MANUFACTURER", "HV RATED VOLTAGE"]);
        let raw = "Here you go:\n```json\n{\"1\": \"ABB\", \"2\": \"115 kV\", \"PHASE\": 3}\n```";
        let map = parse_response(raw, Some(&list));
        let keys: Vec<&str> = map.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["MANUFACTURER", "HV RATED VOLTAGE", "PHASE"]);
        assert_eq!(map.get("PHASE").unwrap().to_string(), "3");
    }

    #[test]
    fn test_unparsable_response_becomes_error_entry() {
        let map = parse_response("Sorry, the image is blurry.", None);
        assert_eq!(map.len(), 1);
        assert_eq!(
            map.get(ERROR_KEY).unwrap().to_string(),
            "Sorry, the image is blurry."
        );

        let not_object = parse_response("{ oops }", None);
        assert!(not_object.get(ERROR_KEY).is_some());
    }

    #[test]
    fn test_voltage_backfill_from_raw_lines() {
        let raw = "{\"HV_RATED_VOLTAGE\": \"-\", \"RATED_POWER\": \"1000 kVA\"}\nPRIMARY 22000 V";
        let map = parse_response(raw, None);
        assert_eq!(map.get("HV_RATED_VOLTAGE").unwrap().to_string(), "22000 V");
    }

    #[test]
    fn test_request_wire_format() {
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![
                    Part {
                        text: Some("read".into()),
                        inline_data: None,
                    },
                    Part {
                        text: None,
                        inline_data: Some(InlineData {
                            mime_type: "image/png".into(),
                            data: STANDARD.encode(b"abc"),
                        }),
                    },
                ],
            }],
            generation_config: GenerationConfig {
                temperature: 0.2,
                top_p: 0.8,
                max_output_tokens: 4096,
            },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "contents": [{"parts": [
                    {"text": "read"},
                    {"inlineData": {"mimeType": "image/png", "data": "YWJj"}}
                ]}],
                "generationConfig": {"temperature": 0.2, "topP": 0.8, "maxOutputTokens": 4096}
            })
        );
    }

    #[test]
    fn test_first_text_of_response() {
        let body: GenerateResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"{\"A\":1}"}],"role":"model"}}]}"#,
        )
        .unwrap();
        assert_eq!(first_text(body).as_deref(), Some("{\"A\":1}"));

        let empty: GenerateResponse = serde_json::from_str(r#"{"candidates":[]}"#).unwrap();
        assert_eq!(first_text(empty), None);
    }

    #[tokio::test]
    async fn test_scripted_model_replays_in_order() {
        let model = ScriptedModel::new(vec![Ok("first"), Err("boom")]);
        assert_eq!(model.describe(b"img", "image/jpeg", "x").await.unwrap(), "first");
        assert!(model.describe(b"img", "image/jpeg", "x").await.is_err());
        assert_eq!(model.seen.borrow().len(), 2);
    }
}
