//! Secondary reasoning tier: OpenAI chat completions. Same contract as the
//! primary tier; attempted only after the primary errors, never in parallel
//! with it.

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::errors::ReasoningError;
use crate::models::{FeedbackItem, Insight, InsightSummary, PatchPlan, TicketSpec};

use super::{
    Reasoner, file_fix_prompt, parse_patch_plan, parse_summary, parse_ticket, patch_plan_prompt,
    strip_code_fences, summary_prompt, ticket_prompt,
};

const DEFAULT_MODEL: &str = "gpt-4o-mini";
const API_URL: &str = "https://api.openai.com/v1/chat/completions";

pub struct OpenAiReasoner {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenAiReasoner {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model: DEFAULT_MODEL.to_string(),
        }
    }

    async fn complete(&self, prompt: &str, json_response: bool) -> Result<String, ReasoningError> {
        let mut body = json!({
            "model": self.model,
            "temperature": 0.3,
            "messages": [
                {"role": "system", "content": "You respond with exactly the requested format and nothing else."},
                {"role": "user", "content": prompt}
            ],
        });
        if json_response {
            body["response_format"] = json!({ "type": "json_object" });
        }

        let resp = self
            .client
            .post(API_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ReasoningError::Provider(e.to_string()))?;

        match resp.status().as_u16() {
            429 => return Err(ReasoningError::QuotaExhausted),
            s if s >= 400 => return Err(ReasoningError::Provider(format!("status {}", s))),
            _ => {}
        }

        let payload: Value = resp
            .json()
            .await
            .map_err(|e| ReasoningError::Parse(e.to_string()))?;
        payload
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ReasoningError::Parse("completion carried no content".into()))
    }
}

#[async_trait]
impl Reasoner for OpenAiReasoner {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn synthesize_summary(
        &self,
        insight: &Insight,
        members: &[FeedbackItem],
    ) -> Result<InsightSummary, ReasoningError> {
        let raw = self.complete(&summary_prompt(insight, members), true).await?;
        parse_summary(&raw, insight)
    }

    async fn synthesize_ticket(
        &self,
        _insight: &Insight,
        summary: &InsightSummary,
        members: &[FeedbackItem],
    ) -> Result<TicketSpec, ReasoningError> {
        let raw = self.complete(&ticket_prompt(summary, members), true).await?;
        parse_ticket(&raw, members)
    }

    async fn synthesize_patch_plan(
        &self,
        ticket: &TicketSpec,
    ) -> Result<PatchPlan, ReasoningError> {
        let raw = self.complete(&patch_plan_prompt(ticket), true).await?;
        parse_patch_plan(&raw)
    }

    async fn generate_file_fix(
        &self,
        path: &str,
        current: &str,
        ticket: &TicketSpec,
    ) -> Result<String, ReasoningError> {
        let raw = self
            .complete(&file_fix_prompt(path, current, ticket), false)
            .await?;
        let content = strip_code_fences(&raw);
        if content.is_empty() {
            return Err(ReasoningError::Parse("empty file fix".into()));
        }
        Ok(content)
    }
}
