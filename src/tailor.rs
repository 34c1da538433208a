use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use tracing::warn;

use crate::error::{PipelineError, Result};
use crate::models::{JobPosting, TailoringResult, TailoringStrategy};

/// Character budget for the job description inside the resume prompt.
/// Keeps the request under provider token limits.
const RESUME_DESCRIPTION_BUDGET: usize = 2000;
/// Character budget for the description inside the cover-letter prompt.
const COVER_DESCRIPTION_BUDGET: usize = 1500;

const RESUME_MAX_TOKENS: u32 = 1500;
const COVER_MAX_TOKENS: u32 = 800;
const PROVIDER_TIMEOUT: Duration = Duration::from_secs(60);

// --- Provider contract ---

/// One bounded request to an external text-generation service.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

pub trait TextGenerator {
    fn generate(&self, request: &GenerationRequest) -> Result<String>;
    #[allow(dead_code)]
    fn model_name(&self) -> &str;
}

#[derive(Debug, Clone)]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
}

#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub provider: ProviderKind,
    pub model_id: String,
    pub short_name: String,
}

pub fn resolve_model(name: &str) -> Result<ModelSpec> {
    match name {
        "gpt-4o" | "gpt4o" => Ok(ModelSpec {
            provider: ProviderKind::OpenAi,
            model_id: "gpt-4o".to_string(),
            short_name: "gpt-4o".to_string(),
        }),
        "gpt-4o-mini" => Ok(ModelSpec {
            provider: ProviderKind::OpenAi,
            model_id: "gpt-4o-mini".to_string(),
            short_name: "gpt-4o-mini".to_string(),
        }),
        "claude-sonnet" | "sonnet" => Ok(ModelSpec {
            provider: ProviderKind::Anthropic,
            model_id: "claude-sonnet-4-5-20250929".to_string(),
            short_name: "claude-sonnet".to_string(),
        }),
        "claude-haiku" | "haiku" => Ok(ModelSpec {
            provider: ProviderKind::Anthropic,
            model_id: "claude-haiku-4-5-20251001".to_string(),
            short_name: "claude-haiku".to_string(),
        }),
        _ => Err(PipelineError::Validation(format!(
            "unknown model '{}'. Available: gpt-4o (default), gpt-4o-mini, claude-sonnet, claude-haiku",
            name
        ))),
    }
}

pub fn create_provider(spec: &ModelSpec) -> Result<Box<dyn TextGenerator>> {
    match spec.provider {
        ProviderKind::OpenAi => Ok(Box::new(OpenAiProvider::new(spec.model_id.clone())?)),
        ProviderKind::Anthropic => Ok(Box::new(AnthropicProvider::new(spec.model_id.clone())?)),
    }
}

// --- OpenAI provider ---

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Debug, Serialize)]
struct OpenAiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<OpenAiMessage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug)]
pub struct OpenAiProvider {
    api_key: String,
    model_id: String,
    client: reqwest::blocking::Client,
}

impl OpenAiProvider {
    pub fn new(model_id: String) -> Result<Self> {
        let api_key = env::var("OPENAI_API_KEY").map_err(|_| {
            PipelineError::TailoringProvider(
                "OPENAI_API_KEY environment variable not set".to_string(),
            )
        })?;
        let client = reqwest::blocking::Client::builder()
            .timeout(PROVIDER_TIMEOUT)
            .build()
            .map_err(|e| PipelineError::TailoringProvider(e.to_string()))?;
        Ok(Self {
            api_key,
            model_id,
            client,
        })
    }
}

impl TextGenerator for OpenAiProvider {
    fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let body = OpenAiRequest {
            model: self.model_id.clone(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            messages: vec![
                OpenAiMessage {
                    role: "system".to_string(),
                    content: request.system_prompt.clone(),
                },
                OpenAiMessage {
                    role: "user".to_string(),
                    content: request.user_prompt.clone(),
                },
            ],
        };

        let response = self
            .client
            .post(OPENAI_API_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .map_err(|e| {
                PipelineError::TailoringProvider(format!("OpenAI request failed: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().unwrap_or_default();
            return Err(PipelineError::TailoringProvider(format!(
                "OpenAI returned {}: {}",
                status, error_text
            )));
        }

        let parsed: OpenAiResponse = response.json().map_err(|e| {
            PipelineError::TailoringProvider(format!("malformed OpenAI response: {}", e))
        })?;

        let text = parsed
            .choices
            .first()
            .map(|choice| choice.message.content.clone())
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(PipelineError::TailoringProvider(
                "empty OpenAI response".to_string(),
            ));
        }
        Ok(text)
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }
}

// --- Anthropic provider ---

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    system: String,
    messages: Vec<AnthropicMessage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContentBlock {
    #[allow(dead_code)]
    #[serde(rename = "type")]
    content_type: String,
    text: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
}

pub struct AnthropicProvider {
    api_key: String,
    model_id: String,
    client: reqwest::blocking::Client,
}

impl AnthropicProvider {
    pub fn new(model_id: String) -> Result<Self> {
        let api_key = env::var("ANTHROPIC_API_KEY").map_err(|_| {
            PipelineError::TailoringProvider(
                "ANTHROPIC_API_KEY environment variable not set".to_string(),
            )
        })?;
        let client = reqwest::blocking::Client::builder()
            .timeout(PROVIDER_TIMEOUT)
            .build()
            .map_err(|e| PipelineError::TailoringProvider(e.to_string()))?;
        Ok(Self {
            api_key,
            model_id,
            client,
        })
    }
}

impl TextGenerator for AnthropicProvider {
    fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let body = AnthropicRequest {
            model: self.model_id.clone(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            system: request.system_prompt.clone(),
            messages: vec![AnthropicMessage {
                role: "user".to_string(),
                content: request.user_prompt.clone(),
            }],
        };

        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .map_err(|e| {
                PipelineError::TailoringProvider(format!("Anthropic request failed: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().unwrap_or_default();
            return Err(PipelineError::TailoringProvider(format!(
                "Anthropic returned {}: {}",
                status, error_text
            )));
        }

        let parsed: AnthropicResponse = response.json().map_err(|e| {
            PipelineError::TailoringProvider(format!("malformed Anthropic response: {}", e))
        })?;

        let text = parsed
            .content
            .first()
            .map(|block| block.text.clone())
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(PipelineError::TailoringProvider(
                "empty Anthropic response".to_string(),
            ));
        }
        Ok(text)
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }
}

// --- Tailoring engine ---

/// Two-tier generator for application artifacts. The primary strategy is
/// one attempt against the configured provider; any failure falls back to
/// the unmodified base resume plus a parameterized template cover letter.
/// There is no retry loop against the provider within a single call.
pub struct TailoringEngine {
    provider: Option<Box<dyn TextGenerator>>,
    base_resume: String,
}

fn truncate_chars(s: &str, budget: usize) -> &str {
    match s.char_indices().nth(budget) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

impl TailoringEngine {
    pub fn new(provider: Option<Box<dyn TextGenerator>>, base_resume: String) -> Self {
        Self {
            provider,
            base_resume,
        }
    }

    /// Produce resume and cover-letter text for one posting. Never fails:
    /// the template tier is always available.
    pub fn tailor(&self, posting: &JobPosting) -> TailoringResult {
        match self.tailor_with_provider(posting) {
            Ok(result) => result,
            Err(e) => {
                warn!(
                    company = %posting.company,
                    title = %posting.title,
                    error = %e,
                    "primary tailoring failed, using template fallback"
                );
                self.template_result(posting)
            }
        }
    }

    fn tailor_with_provider(&self, posting: &JobPosting) -> Result<TailoringResult> {
        let provider = self.provider.as_deref().ok_or_else(|| {
            PipelineError::TailoringProvider("no generation provider configured".to_string())
        })?;

        let resume_text = provider.generate(&self.resume_request(posting))?;
        let cover_letter_text = provider.generate(&self.cover_letter_request(posting))?;

        Ok(TailoringResult {
            resume_text,
            cover_letter_text,
            strategy: TailoringStrategy::Ai,
        })
    }

    fn resume_request(&self, posting: &JobPosting) -> GenerationRequest {
        GenerationRequest {
            system_prompt: "You are a professional resume writer. \
                            Keep all factual information unchanged."
                .to_string(),
            user_prompt: format!(
                "Please tailor this resume for the following job.\n\
                 Make it ATS-friendly and highlight relevant skills.\n\
                 Keep all the actual information but optimize keywords and phrasing.\n\
                 Do not make up any new experience or skills not in the original.\n\n\
                 Company: {}\n\
                 Position: {}\n\n\
                 Job Description:\n{}\n\n\
                 Current Resume:\n{}\n\n\
                 Return ONLY the tailored resume in a clean format, no explanations.",
                posting.company,
                posting.title,
                truncate_chars(&posting.description, RESUME_DESCRIPTION_BUDGET),
                self.base_resume,
            ),
            max_tokens: RESUME_MAX_TOKENS,
            temperature: 0.7,
        }
    }

    fn cover_letter_request(&self, posting: &JobPosting) -> GenerationRequest {
        GenerationRequest {
            system_prompt: "You are a professional cover letter writer.".to_string(),
            user_prompt: format!(
                "Write a concise, professional cover letter for this position.\n\
                 Make it genuine, specific to the role, and about 250-300 words.\n\n\
                 Position: {}\n\
                 Company: {}\n\n\
                 Job Description:\n{}\n\n\
                 Base it on this resume:\n{}\n\n\
                 Return ONLY the cover letter text, no explanations.",
                posting.title,
                posting.company,
                truncate_chars(&posting.description, COVER_DESCRIPTION_BUDGET),
                self.base_resume,
            ),
            max_tokens: COVER_MAX_TOKENS,
            temperature: 0.8,
        }
    }

    fn template_result(&self, posting: &JobPosting) -> TailoringResult {
        TailoringResult {
            resume_text: self.base_resume.clone(),
            cover_letter_text: template_cover_letter(&posting.company, &posting.title),
            strategy: TailoringStrategy::Template,
        }
    }
}

/// Deterministic cover letter with company and position substituted into
/// fixed prose.
pub fn template_cover_letter(company: &str, position: &str) -> String {
    let paragraphs = [
        "Dear Hiring Manager,".to_string(),
        format!(
            "I am writing to express my strong interest in the {} position at {}. \
             With my experience and passion for technology, I am confident I would \
             be a valuable addition to your team.",
            position, company
        ),
        format!(
            "I am excited about the opportunity to contribute to {} and would \
             welcome the chance to discuss how my skills and experience align \
             with your needs.",
            company
        ),
        "Thank you for considering my application. I look forward to hearing from you."
            .to_string(),
        "Best regards,".to_string(),
    ];

    paragraphs
        .iter()
        .map(|p| textwrap::fill(p, 80))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::cell::Cell;
    use std::rc::Rc;

    fn posting(description: &str) -> JobPosting {
        JobPosting {
            canonical_id: "x".to_string(),
            title: "Python Developer".to_string(),
            company: "Acme Corp".to_string(),
            location: None,
            url: None,
            description: description.to_string(),
            salary: None,
            job_type: None,
            source: "board".to_string(),
            date_found: Utc::now(),
        }
    }

    struct StaticGenerator {
        reply: String,
        calls: Cell<usize>,
    }

    impl TextGenerator for StaticGenerator {
        fn generate(&self, _request: &GenerationRequest) -> Result<String> {
            self.calls.set(self.calls.get() + 1);
            Ok(self.reply.clone())
        }
        fn model_name(&self) -> &str {
            "static"
        }
    }

    struct FailingGenerator {
        calls: Rc<Cell<usize>>,
    }

    impl TextGenerator for FailingGenerator {
        fn generate(&self, _request: &GenerationRequest) -> Result<String> {
            self.calls.set(self.calls.get() + 1);
            Err(PipelineError::TailoringProvider("quota exhausted".to_string()))
        }
        fn model_name(&self) -> &str {
            "failing"
        }
    }

    #[test]
    fn test_primary_success_is_ai_strategy() {
        let engine = TailoringEngine::new(
            Some(Box::new(StaticGenerator {
                reply: "generated text".to_string(),
                calls: Cell::new(0),
            })),
            "BASE RESUME".to_string(),
        );

        let result = engine.tailor(&posting("build things"));
        assert_eq!(result.strategy, TailoringStrategy::Ai);
        assert_eq!(result.resume_text, "generated text");
        assert_eq!(result.cover_letter_text, "generated text");
    }

    #[test]
    fn test_failure_falls_back_to_byte_identical_base_resume() {
        let engine = TailoringEngine::new(
            Some(Box::new(FailingGenerator {
                calls: Rc::new(Cell::new(0)),
            })),
            "BASE RESUME\nexactly as written".to_string(),
        );

        let result = engine.tailor(&posting("build things"));
        assert_eq!(result.strategy, TailoringStrategy::Template);
        assert_eq!(result.resume_text, "BASE RESUME\nexactly as written");
        assert!(result.cover_letter_text.contains("Acme Corp"));
        assert!(result.cover_letter_text.contains("Python Developer"));
    }

    #[test]
    fn test_single_attempt_no_retry() {
        let calls = Rc::new(Cell::new(0));
        let engine = TailoringEngine::new(
            Some(Box::new(FailingGenerator {
                calls: Rc::clone(&calls),
            })),
            "BASE".to_string(),
        );

        engine.tailor(&posting("anything"));
        // One attempt at the resume call, then straight to the template.
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_no_provider_goes_straight_to_template() {
        let engine = TailoringEngine::new(None, "BASE".to_string());
        let result = engine.tailor(&posting("anything"));
        assert_eq!(result.strategy, TailoringStrategy::Template);
        assert_eq!(result.resume_text, "BASE");
    }

    #[test]
    fn test_description_is_truncated_in_prompts() {
        let engine = TailoringEngine::new(None, "BASE".to_string());
        let long = "x".repeat(10_000);
        let request = engine.resume_request(&posting(&long));
        // Budgeted description plus surrounding prose, nowhere near 10k of x.
        let x_run = request
            .user_prompt
            .matches('x')
            .count();
        assert!(x_run <= RESUME_DESCRIPTION_BUDGET + 100);
    }

    #[test]
    fn test_truncate_chars_respects_multibyte_boundaries() {
        let text = "αβγδε".repeat(1000);
        let clipped = truncate_chars(&text, 7);
        assert_eq!(clipped.chars().count(), 7);
    }

    #[test]
    fn test_template_cover_letter_is_deterministic() {
        let a = template_cover_letter("Acme", "Dev");
        let b = template_cover_letter("Acme", "Dev");
        assert_eq!(a, b);
        assert!(a.starts_with("Dear Hiring Manager,"));
    }

    #[test]
    fn test_resolve_model() {
        let spec = resolve_model("gpt-4o").unwrap();
        assert!(matches!(spec.provider, ProviderKind::OpenAi));

        let spec = resolve_model("sonnet").unwrap();
        assert!(matches!(spec.provider, ProviderKind::Anthropic));
        assert_eq!(spec.short_name, "claude-sonnet");

        assert!(resolve_model("gpt-3").is_err());
    }

    #[test]
    fn test_openai_provider_requires_api_key() {
        let original = env::var("OPENAI_API_KEY").ok();
        unsafe {
            env::remove_var("OPENAI_API_KEY");
        }

        let result = OpenAiProvider::new("gpt-4o".to_string());

        if let Some(val) = original {
            unsafe {
                env::set_var("OPENAI_API_KEY", val);
            }
        }

        assert!(matches!(
            result.unwrap_err(),
            PipelineError::TailoringProvider(_)
        ));
    }
}
