use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::env;
use std::time::Duration;

const GEMINI_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const MODEL: &str = "gemini-2.0-flash";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(45);

/// Boundary to the generative-text service: one prompt and a declared
/// output shape in, the first candidate's text payload out. Validation of
/// that payload against the shape happens in the request builder, not here.
#[async_trait]
pub trait GenerativeApi: Send + Sync {
    async fn generate(&self, prompt: &str, response_schema: Value) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
}

impl GeminiClient {
    pub fn from_env() -> Result<Self> {
        let api_key = env::var("GEMINI_API_KEY").context("GEMINI_API_KEY not set")?;
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("building HTTP client failed")?;
        Ok(Self { client, api_key })
    }
}

#[async_trait]
impl GenerativeApi for GeminiClient {
    async fn generate(&self, prompt: &str, response_schema: Value) -> Result<String> {
        #[derive(Deserialize)]
        struct GenerateResponse {
            candidates: Vec<ResponseCandidate>,
        }
        #[derive(Deserialize)]
        struct ResponseCandidate {
            content: CandidateContent,
        }
        #[derive(Deserialize)]
        struct CandidateContent {
            parts: Vec<ContentPart>,
        }
        #[derive(Deserialize)]
        struct ContentPart {
            text: String,
        }

        let url = format!(
            "{GEMINI_BASE}/models/{MODEL}:generateContent?key={}",
            self.api_key
        );
        let payload = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": response_schema,
            }
        });

        let res = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .context("generative request failed")?;
        let status = res.status();
        let text = res.text().await.context("reading body failed")?;
        if !status.is_success() {
            return Err(anyhow!("generative call returned {} -> {}", status, text));
        }
        let parsed: GenerateResponse =
            serde_json::from_str(&text).context("JSON parse failed")?;
        parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or_else(|| anyhow!("generative response carried no candidate text"))
    }
}
