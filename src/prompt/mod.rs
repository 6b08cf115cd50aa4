
use serde::{Deserialize, Serialize};
use std::fmt::{self, Write as _};
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::content_hash;
use crate::retrieval::{RetrievedContext, ScoredChunk};

const QUIZ_TEMPLATE: &str = include_str!("templates/quiz.txt");
const WORKSHEET_TEMPLATE: &str = include_str!("templates/worksheet.txt");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    /// Largest number of items a single request may ask for
    pub max_item_count: usize,
    /// Estimated token allowance for the rendered reference passages
    pub context_token_budget: usize,
}

impl Default for PromptConfig {
    #[inline]
    fn default() -> Self {
        Self {
            max_item_count: 10,
            context_token_budget: 3000,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PromptError {
    #[error("Unsupported artifact kind: {kind} (expected 'quiz' or 'worksheet')")]
    UnsupportedArtifactKind { kind: String },

    #[error("Invalid difficulty: {difficulty} (expected 'easy', 'medium' or 'hard')")]
    InvalidDifficulty { difficulty: String },

    #[error("Subject cannot be empty")]
    EmptySubject,

    #[error("Invalid item count: {count} (must be between 1 and {max})")]
    InvalidItemCount { count: usize, max: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Quiz,
    Worksheet,
}

impl ArtifactKind {
    #[inline]
    pub fn parse(kind: &str) -> Result<Self, PromptError> {
        match kind.trim().to_ascii_lowercase().as_str() {
            "quiz" => Ok(Self::Quiz),
            "worksheet" => Ok(Self::Worksheet),
            _ => Err(PromptError::UnsupportedArtifactKind {
                kind: kind.to_string(),
            }),
        }
    }

    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Quiz => "quiz",
            Self::Worksheet => "worksheet",
        }
    }

    fn template(self) -> &'static str {
        match self {
            Self::Quiz => QUIZ_TEMPLATE,
            Self::Worksheet => WORKSHEET_TEMPLATE,
        }
    }
}

impl fmt::Display for ArtifactKind {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    #[inline]
    pub fn parse(difficulty: &str) -> Result<Self, PromptError> {
        match difficulty.trim().to_ascii_lowercase().as_str() {
            "easy" => Ok(Self::Easy),
            "medium" => Ok(Self::Medium),
            "hard" => Ok(Self::Hard),
            _ => Err(PromptError::InvalidDifficulty {
                difficulty: difficulty.to_string(),
            }),
        }
    }

    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Medium => "medium",
            Self::Hard => "hard",
        }
    }
}

impl fmt::Display for Difficulty {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to generate. The subject doubles as the retrieval topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskParams {
    pub kind: ArtifactKind,
    pub count: usize,
    pub difficulty: Difficulty,
    pub subject: String,
}

impl TaskParams {
    /// Parse caller-supplied parameters.
    ///
    /// The item count is checked against the configured maximum by
    /// [`TaskParams::validate`], which [`build_request`] always calls.
    #[inline]
    pub fn new(kind: &str, count: usize, difficulty: &str, subject: &str) -> Result<Self, PromptError> {
        let kind = ArtifactKind::parse(kind)?;
        let difficulty = Difficulty::parse(difficulty)?;
        let subject = subject.trim();
        if subject.is_empty() {
            return Err(PromptError::EmptySubject);
        }

        Ok(Self {
            kind,
            count,
            difficulty,
            subject: subject.to_string(),
        })
    }

    /// Check the item count against the configured maximum
    #[inline]
    pub fn validate(&self, config: &PromptConfig) -> Result<(), PromptError> {
        if self.subject.trim().is_empty() {
            return Err(PromptError::EmptySubject);
        }
        if self.count == 0 || self.count > config.max_item_count {
            return Err(PromptError::InvalidItemCount {
                count: self.count,
                max: config.max_item_count,
            });
        }
        Ok(())
    }
}

/// A rendered prompt ready for the generator
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRequest {
    /// Passages that made it into the prompt, after budget trimming
    pub context: RetrievedContext,
    pub task_params: TaskParams,
    pub prompt: String,
    /// SHA-256 of the rendered context
    pub context_digest: String,
}

/// Render the prompt for `params`, trimming `context` to the token budget
#[inline]
pub fn build_request(
    mut context: RetrievedContext,
    params: &TaskParams,
    config: &PromptConfig,
) -> Result<GenerationRequest, PromptError> {
    params.validate(config)?;

    let budget = config.context_token_budget;
    let mut rendered = render_context(&context);
    while estimate_token_count(&rendered) > budget && context.len() > 1 {
        if let Some(dropped) = context.pop_least_relevant() {
            debug!(
                "Dropping chunk {} (score {:.3}) to fit the context budget",
                dropped.chunk.id, dropped.score
            );
        }
        rendered = render_context(&context);
    }

    if estimate_token_count(&rendered) > budget {
        if let Some(top) = context.first_mut() {
            warn!(
                "Top chunk {} alone exceeds the context budget of {} tokens, cutting it",
                top.chunk.id, budget
            );
            while estimate_token_count(&rendered) > budget && !top.chunk.text.is_empty() {
                let tokens = estimate_token_count(&rendered).max(1);
                let chars = top.chunk.text.chars().count();
                let keep = (chars.saturating_mul(budget) / tokens).min(chars.saturating_sub(1));
                top.chunk.text = top.chunk.text.chars().take(keep).collect();
                rendered = render_passages(std::slice::from_ref(top));
            }
        }
        rendered = render_context(&context);
    }

    let prompt = render_template(
        params.kind.template(),
        &[
            ("count", &params.count.to_string()),
            ("subject", &params.subject),
            ("difficulty", params.difficulty.as_str()),
            ("context", &rendered),
        ],
    );

    debug!(
        "Built {} prompt with {} passages (~{} context tokens)",
        params.kind,
        context.len(),
        estimate_token_count(&rendered)
    );

    Ok(GenerationRequest {
        context_digest: content_hash(&rendered),
        context,
        task_params: params.clone(),
        prompt,
    })
}

/// Numbered passages with their source and relevance score
#[inline]
pub fn render_context(context: &RetrievedContext) -> String {
    if context.is_empty() {
        return "(no reference passages were found)".to_string();
    }
    render_passages(context.chunks())
}

fn render_passages(passages: &[ScoredChunk]) -> String {
    let mut out = String::new();
    for (number, passage) in passages.iter().enumerate() {
        if number > 0 {
            out.push_str("\n\n");
        }
        let _ = write!(out, "[{}] source: {}", number + 1, passage.chunk.source());
        if let Some(page) = passage.chunk.page_number() {
            let _ = write!(out, ", page {page}");
        }
        let _ = write!(
            out,
            " (relevance {:.3})\n{}",
            passage.score,
            passage.chunk.text.trim()
        );
    }
    out
}

/// Substitute `{name}` placeholders; braces that do not name a variable are kept
fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        let (before, from_brace) = rest.split_at(open);
        out.push_str(before);

        let replacement = from_brace.find('}').and_then(|close| {
            let name = from_brace.get(1..close)?;
            vars.iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (*value, close))
        });

        match replacement {
            Some((value, close)) => {
                out.push_str(value);
                rest = from_brace.get(close + 1..).unwrap_or_default();
            }
            None => {
                out.push('{');
                rest = from_brace.get(1..).unwrap_or_default();
            }
        }
    }
    out.push_str(rest);
    out
}

/// Rough token estimate for English text
#[inline]
pub fn estimate_token_count(text: &str) -> usize {
    // ~0.75 words per token, plus a little for punctuation
    let word_count = text.split_whitespace().count();
    let punct_count = text.chars().filter(|c| c.is_ascii_punctuation()).count();

    (punct_count as f64).mul_add(0.1, word_count as f64 / 0.75) as usize
}
