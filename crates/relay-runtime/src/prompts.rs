//! Prompt templates for common customer-support tasks.
//!
//! Each [`Task`] renders user input into a prompt and carries the output
//! token bound suited to the task. Input is inserted verbatim; an empty
//! input yields the bare template.

use std::fmt;
use std::str::FromStr;

use crate::providers::ChatMessage;

/// System prompt for [`Task::Chat`]; `{context}` is replaced by the caller's context.
pub const SUPPORT_AGENT_PROMPT: &str = "You are a helpful support agent. Context: {context}";

/// A prompt template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    /// Answer a customer message, optionally with background context
    Chat { context: Option<String> },
    /// Free-form analysis
    Analyze,
    /// Summarize a support ticket for hand-off
    Summarize,
    /// One-word intent label for routing
    ClassifyIntent,
    /// Sentiment of a piece of feedback
    Sentiment,
    /// Keywords for search indexing
    ExtractKeywords,
    /// Translate into the named language
    Translate { target_language: String },
    /// Long-form help article about a topic
    HelpArticle,
    /// Three quick reply suggestions
    QuickReplies,
    /// Urgency score from 1 to 5
    Urgency,
    /// ISO language code of the input
    DetectLanguage,
}

impl Task {
    /// Names accepted by [`FromStr`]. `translate` takes a language: `translate=French`.
    pub const NAMES: &'static [&'static str] = &[
        "chat",
        "analyze",
        "summarize",
        "classify-intent",
        "sentiment",
        "extract-keywords",
        "translate",
        "help-article",
        "quick-replies",
        "urgency",
        "detect-language",
    ];

    /// The user prompt for `input`.
    pub fn render(&self, input: &str) -> String {
        match self {
            Task::Chat { .. } => input.to_string(),
            Task::Analyze => format!("Analyze the following: {}", input),
            Task::Summarize => format!("Summarize this support ticket:\n{}", input),
            Task::ClassifyIntent => format!("Classify intent (one word): {}", input),
            Task::Sentiment => format!("Analyze sentiment: {}", input),
            Task::ExtractKeywords => format!("Extract keywords from: {}", input),
            Task::Translate { target_language } => {
                format!("Translate to {}: {}", target_language, input)
            }
            Task::HelpArticle => format!("Write a detailed help article about: {}", input),
            Task::QuickReplies => format!("Generate 3 quick reply suggestions for: {}", input),
            Task::Urgency => format!("Rate urgency 1-5: {}", input),
            Task::DetectLanguage => format!(
                "What language is this? Reply with language code only: {}",
                input
            ),
        }
    }

    /// Full message list: the system prompt (chat with context only) and the user prompt.
    pub fn messages(&self, input: &str) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(2);
        if let Task::Chat {
            context: Some(context),
        } = self
        {
            messages.push(ChatMessage::system(
                SUPPORT_AGENT_PROMPT.replace("{context}", context),
            ));
        }
        messages.push(ChatMessage::user(self.render(input)));
        messages
    }

    /// Output token bound for the task.
    pub fn max_tokens(&self) -> u32 {
        match self {
            Task::Chat { .. } => 2000,
            Task::Analyze | Task::HelpArticle => 4000,
            Task::Summarize | Task::Translate { .. } => 1000,
            Task::ExtractKeywords | Task::QuickReplies | Task::Sentiment => 200,
            Task::ClassifyIntent => 50,
            Task::Urgency | Task::DetectLanguage => 10,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Task::Chat { .. } => "chat",
            Task::Analyze => "analyze",
            Task::Summarize => "summarize",
            Task::ClassifyIntent => "classify-intent",
            Task::Sentiment => "sentiment",
            Task::ExtractKeywords => "extract-keywords",
            Task::Translate { .. } => "translate",
            Task::HelpArticle => "help-article",
            Task::QuickReplies => "quick-replies",
            Task::Urgency => "urgency",
            Task::DetectLanguage => "detect-language",
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::Translate { target_language } => write!(f, "translate={}", target_language),
            other => f.write_str(other.name()),
        }
    }
}

/// Unknown task name or a `translate` without a language.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown task '{0}'; expected one of {names:?}", names = Task::NAMES)]
pub struct ParseTaskError(String);

impl FromStr for Task {
    type Err = ParseTaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, argument) = match s.split_once('=') {
            Some((name, argument)) => (name.trim(), Some(argument.trim())),
            None => (s.trim(), None),
        };

        let task = match (name, argument) {
            ("chat", None) => Task::Chat { context: None },
            ("chat", Some(context)) => Task::Chat {
                context: Some(context.to_string()),
            },
            ("translate", Some(language)) if !language.is_empty() => Task::Translate {
                target_language: language.to_string(),
            },
            ("analyze", None) => Task::Analyze,
            ("summarize", None) => Task::Summarize,
            ("classify-intent", None) => Task::ClassifyIntent,
            ("sentiment", None) => Task::Sentiment,
            ("extract-keywords", None) => Task::ExtractKeywords,
            ("help-article", None) => Task::HelpArticle,
            ("quick-replies", None) => Task::QuickReplies,
            ("urgency", None) => Task::Urgency,
            ("detect-language", None) => Task::DetectLanguage,
            _ => return Err(ParseTaskError(s.to_string())),
        };
        Ok(task)
    }
}
