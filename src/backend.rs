use std::cell::Cell;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Failure of one segment's translation request. Never fatal to a document
/// run: the orchestrator logs it and substitutes an empty translation.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("backend returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed backend response: {0}")]
    Response(String),
}

/// Anything that can translate one plain-text segment. The document
/// orchestrator only speaks this trait, so tests run against a stub.
pub trait SegmentTranslator {
    fn translate_segment(&self, text: &str) -> Result<String, BackendError>;
}

#[derive(Clone, Debug)]
pub struct MtEndpoint {
    pub base_url: String,
    pub source_lang: String,
    pub target_lang: String,
}

impl MtEndpoint {
    pub fn translate_url(&self) -> String {
        format!("{}/translate", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Serialize)]
struct TranslateRequest<'a> {
    id: u64,
    src: &'a str,
    #[serde(rename = "srcLang")]
    src_lang: &'a str,
    #[serde(rename = "tgtLang")]
    tgt_lang: &'a str,
}

/// Blocking HTTP client for the MT backend: `POST {base_url}/translate`
/// with a JSON body, answer carries the translation under `tgt`.
pub struct MtClient {
    http: reqwest::blocking::Client,
    endpoint: MtEndpoint,
    next_id: Cell<u64>,
}

impl MtClient {
    pub fn new(endpoint: MtEndpoint, timeout: Duration) -> Result<MtClient, BackendError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Request(e.to_string()))?;
        Ok(MtClient {
            http,
            endpoint,
            next_id: Cell::new(1),
        })
    }

    pub fn endpoint(&self) -> &MtEndpoint {
        &self.endpoint
    }
}

impl SegmentTranslator for MtClient {
    fn translate_segment(&self, text: &str) -> Result<String, BackendError> {
        let id = self.next_id.get();
        self.next_id.set(id.wrapping_add(1));
        let body = TranslateRequest {
            id,
            src: text,
            src_lang: &self.endpoint.source_lang,
            tgt_lang: &self.endpoint.target_lang,
        };
        let resp = self
            .http
            .post(self.endpoint.translate_url())
            .json(&body)
            .send()
            .map_err(|e| BackendError::Request(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let value: serde_json::Value = resp
            .json()
            .map_err(|e| BackendError::Response(e.to_string()))?;
        parse_translation(&value)
    }
}

/// Identity backend for cleaning and roundtrip paths that never call out.
pub struct PassthroughTranslator;

impl SegmentTranslator for PassthroughTranslator {
    fn translate_segment(&self, text: &str) -> Result<String, BackendError> {
        Ok(text.to_string())
    }
}

pub fn parse_translation(value: &serde_json::Value) -> Result<String, BackendError> {
    value
        .get("tgt")
        .and_then(|t| t.as_str())
        .map(|t| t.to_string())
        .ok_or_else(|| BackendError::Response("missing tgt field".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translate_url_normalizes_trailing_slash() {
        let ep = MtEndpoint {
            base_url: "http://127.0.0.1:8000/".to_string(),
            source_lang: "en-US".to_string(),
            target_lang: "es-ES".to_string(),
        };
        assert_eq!(ep.translate_url(), "http://127.0.0.1:8000/translate");
    }

    #[test]
    fn response_parsing_requires_tgt() {
        let ok = serde_json::json!({"tgt": "hola"});
        assert_eq!(parse_translation(&ok).expect("tgt"), "hola");
        let bad = serde_json::json!({"translation": "hola"});
        assert!(parse_translation(&bad).is_err());
    }

    #[test]
    fn request_body_uses_wire_field_names() {
        let body = TranslateRequest {
            id: 7,
            src: "hello",
            src_lang: "en-US",
            tgt_lang: "es-ES",
        };
        let json = serde_json::to_value(&body).expect("serialize");
        assert_eq!(json["id"], 7);
        assert_eq!(json["src"], "hello");
        assert_eq!(json["srcLang"], "en-US");
        assert_eq!(json["tgtLang"], "es-ES");
    }
}
