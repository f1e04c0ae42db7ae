//! Token accounting and cost estimates.

use serde::{Deserialize, Serialize};

use crate::providers::TokenUsage;

/// USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pricing {
    pub input: f64,
    pub output: f64,
    pub cache_write: f64,
    pub cache_read: f64,
}

impl Pricing {
    const fn new(input: f64, output: f64, cache_write: f64, cache_read: f64) -> Self {
        Self {
            input,
            output,
            cache_write,
            cache_read,
        }
    }

    /// Published rates for a hosted model, matched by substring.
    ///
    /// Returns `None` for models without a known price, which covers
    /// self-hosted Ollama and vLLM models.
    pub fn for_model(model: &str) -> Option<Self> {
        let model = model.to_ascii_lowercase();
        let pricing = match model.as_str() {
            m if m.contains("gpt-4o-mini") => Self::new(0.15, 0.6, 0.0, 0.0),
            m if m.contains("gpt-4o") => Self::new(2.5, 10.0, 0.0, 0.0),
            m if m.contains("gpt-4-turbo") => Self::new(10.0, 30.0, 0.0, 0.0),
            m if m.contains("gpt-4") => Self::new(30.0, 60.0, 0.0, 0.0),
            m if m.contains("gpt-3.5-turbo") => Self::new(0.5, 1.5, 0.0, 0.0),
            m if m.contains("claude-3-opus") || m.contains("claude-opus-4") => {
                Self::new(15.0, 75.0, 18.75, 1.5)
            }
            m if m.contains("claude-3-5-haiku") => Self::new(0.8, 4.0, 1.0, 0.08),
            m if m.contains("claude-3-haiku") => Self::new(0.25, 1.25, 0.3, 0.03),
            m if m.contains("sonnet") => Self::new(3.0, 15.0, 3.75, 0.3),
            _ => return None,
        };
        Some(pricing)
    }

    /// Cost of one response in USD.
    pub fn cost(&self, usage: &TokenUsage) -> f64 {
        let per_token = |tokens: u32, rate: f64| (tokens as f64 / 1_000_000.0) * rate;

        per_token(usage.prompt_tokens, self.input)
            + per_token(usage.completion_tokens, self.output)
            + per_token(usage.cache_creation_tokens, self.cache_write)
            + per_token(usage.cache_read_tokens, self.cache_read)
    }
}

/// Usage accumulated over one or more LLM calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmUsage {
    /// Total tokens used
    pub total_tokens: u32,

    /// Prompt/input tokens
    pub prompt_tokens: u32,

    /// Completion/output tokens
    pub completion_tokens: u32,

    /// Successful LLM calls recorded
    pub llm_calls: u32,

    /// Estimated cost in USD
    pub estimated_cost: f64,

    /// Tokens written to cache
    pub cache_creation_tokens: u32,

    /// Tokens read from cache
    pub cache_read_tokens: u32,
}

impl LlmUsage {
    /// Usage of a single response.
    pub fn from_response(usage: &TokenUsage, model: &str) -> Self {
        let mut total = Self::default();
        total.add(usage, model);
        total
    }

    /// Add token usage from a provider response.
    pub fn add(&mut self, usage: &TokenUsage, model: &str) {
        self.prompt_tokens = self.prompt_tokens.saturating_add(usage.prompt_tokens);
        self.completion_tokens = self.completion_tokens.saturating_add(usage.completion_tokens);
        self.total_tokens = self.total_tokens.saturating_add(usage.total());
        self.llm_calls = self.llm_calls.saturating_add(1);
        self.cache_creation_tokens = self
            .cache_creation_tokens
            .saturating_add(usage.cache_creation_tokens);
        self.cache_read_tokens = self.cache_read_tokens.saturating_add(usage.cache_read_tokens);
        self.estimated_cost += Self::estimate_cost(usage, model);
    }

    /// Fold another accumulator into this one.
    pub fn merge(&mut self, other: &LlmUsage) {
        self.prompt_tokens = self.prompt_tokens.saturating_add(other.prompt_tokens);
        self.completion_tokens = self.completion_tokens.saturating_add(other.completion_tokens);
        self.total_tokens = self.total_tokens.saturating_add(other.total_tokens);
        self.llm_calls = self.llm_calls.saturating_add(other.llm_calls);
        self.cache_creation_tokens = self
            .cache_creation_tokens
            .saturating_add(other.cache_creation_tokens);
        self.cache_read_tokens = self.cache_read_tokens.saturating_add(other.cache_read_tokens);
        self.estimated_cost += other.estimated_cost;
    }

    /// Estimated USD cost of a response; zero for unpriced models.
    pub fn estimate_cost(usage: &TokenUsage, model: &str) -> f64 {
        Pricing::for_model(model)
            .map(|pricing| pricing.cost(usage))
            .unwrap_or(0.0)
    }
}
