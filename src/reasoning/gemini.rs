//! Primary reasoning tier: Google Gemini over the generateContent REST API.

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::errors::ReasoningError;
use crate::models::{FeedbackItem, Insight, InsightSummary, PatchPlan, TicketSpec};

use super::{
    Reasoner, file_fix_prompt, parse_patch_plan, parse_summary, parse_ticket, patch_plan_prompt,
    summary_prompt, ticket_prompt,
};

const DEFAULT_MODEL: &str = "gemini-2.0-flash";
const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

pub struct GeminiReasoner {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl GeminiReasoner {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model: DEFAULT_MODEL.to_string(),
        }
    }

    pub fn with_model(api_key: String, model: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model: model.to_string(),
        }
    }

    /// One generateContent round trip; returns the first candidate's text.
    async fn generate(&self, prompt: &str, json_response: bool) -> Result<String, ReasoningError> {
        let url = format!(
            "{}/{}:generateContent?key={}",
            API_BASE, self.model, self.api_key
        );
        let mut generation_config = json!({ "temperature": 0.3 });
        if json_response {
            generation_config["responseMimeType"] = json!("application/json");
        }
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": generation_config,
        });

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ReasoningError::Provider(e.to_string()))?;

        match resp.status().as_u16() {
            // Gemini reports quota exhaustion as 429 RESOURCE_EXHAUSTED.
            429 => return Err(ReasoningError::QuotaExhausted),
            s if s >= 400 => {
                return Err(ReasoningError::Provider(format!("status {}", s)));
            }
            _ => {}
        }

        let payload: Value = resp
            .json()
            .await
            .map_err(|e| ReasoningError::Parse(e.to_string()))?;
        payload
            .pointer("/candidates/0/content/parts/0/text")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ReasoningError::Parse("response carried no candidate text".into()))
    }
}

#[async_trait]
impl Reasoner for GeminiReasoner {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn synthesize_summary(
        &self,
        insight: &Insight,
        members: &[FeedbackItem],
    ) -> Result<InsightSummary, ReasoningError> {
        let raw = self.generate(&summary_prompt(insight, members), true).await?;
        parse_summary(&raw, insight)
    }

    async fn synthesize_ticket(
        &self,
        _insight: &Insight,
        summary: &InsightSummary,
        members: &[FeedbackItem],
    ) -> Result<TicketSpec, ReasoningError> {
        let raw = self.generate(&ticket_prompt(summary, members), true).await?;
        parse_ticket(&raw, members)
    }

    async fn synthesize_patch_plan(
        &self,
        ticket: &TicketSpec,
    ) -> Result<PatchPlan, ReasoningError> {
        let raw = self.generate(&patch_plan_prompt(ticket), true).await?;
        parse_patch_plan(&raw)
    }

    async fn generate_file_fix(
        &self,
        path: &str,
        current: &str,
        ticket: &TicketSpec,
    ) -> Result<String, ReasoningError> {
        let raw = self
            .generate(&file_fix_prompt(path, current, ticket), false)
            .await?;
        let content = super::strip_code_fences(&raw);
        if content.is_empty() {
            return Err(ReasoningError::Parse("empty file fix".into()));
        }
        Ok(content)
    }
}
