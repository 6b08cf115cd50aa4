// Builder module
// Turns untrusted model output into a validated quiz or worksheet

pub mod repair;


use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::generation::GenerationResult;
use crate::prompt::{ArtifactKind, Difficulty, TaskParams};

/// Keys under which models tend to nest the item list
const CONTAINER_KEYS: &[&str] = &["questions", "items", "quiz", "worksheet"];

/// Start positions tried when looking for the JSON payload
const MAX_PARSE_CANDIDATES: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("Model output is not usable structured data: {reason}")]
    MalformedOutput { reason: String },

    #[error("Only {accepted} of {requested} requested items were valid")]
    InsufficientValidItems { accepted: usize, requested: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    ShortAnswer,
    FillInTheBlank,
    TrueFalse,
    MultipleChoice,
}

impl QuestionType {
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ShortAnswer => "short_answer",
            Self::FillInTheBlank => "fill_in_the_blank",
            Self::TrueFalse => "true_false",
            Self::MultipleChoice => "multiple_choice",
        }
    }

    /// Lenient parse accepting common spellings ("True/False", "MCQ", "fill-in-the-blank")
    #[inline]
    pub fn parse(value: &str) -> Option<Self> {
        let normalized: String = value
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '_' })
            .collect();
        let normalized = normalized.trim_matches('_');

        match normalized {
            "short_answer" | "short" | "open" | "open_ended" | "short_response" => Some(Self::ShortAnswer),
            "fill_in_the_blank" | "fill_in_blank" | "fill_in_the_blanks" | "fill_blank" | "cloze" => {
                Some(Self::FillInTheBlank)
            }
            "true_false" | "true_or_false" | "tf" | "boolean" => Some(Self::TrueFalse),
            "multiple_choice" | "mcq" | "multiple_choice_question" | "multi_choice" => Some(Self::MultipleChoice),
            _ => None,
        }
    }
}

impl fmt::Display for QuestionType {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionItem {
    pub prompt: String,
    pub choices: Vec<String>,
    pub correct_answer: String,
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorksheetItem {
    pub question_type: QuestionType,
    pub prompt: String,
    pub answer: String,
    /// Only present on multiple-choice items
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorksheetSection {
    pub question_type: QuestionType,
    pub items: Vec<WorksheetItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quiz {
    pub subject: String,
    pub difficulty: Difficulty,
    pub questions: Vec<QuestionItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worksheet {
    pub subject: String,
    pub difficulty: Difficulty,
    pub sections: Vec<WorksheetSection>,
}

impl Worksheet {
    #[inline]
    pub fn item_count(&self) -> usize {
        self.sections.iter().map(|s| s.items.len()).sum()
    }
}

/// A fully validated assessment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Artifact {
    Quiz(Quiz),
    Worksheet(Worksheet),
}

impl Artifact {
    #[inline]
    pub fn kind(&self) -> ArtifactKind {
        match self {
            Self::Quiz(_) => ArtifactKind::Quiz,
            Self::Worksheet(_) => ArtifactKind::Worksheet,
        }
    }

    #[inline]
    pub fn item_count(&self) -> usize {
        match self {
            Self::Quiz(quiz) => quiz.questions.len(),
            Self::Worksheet(worksheet) => worksheet.item_count(),
        }
    }
}

/// One candidate item in canonical form
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item {
    Question(QuestionItem),
    Worksheet(WorksheetItem),
}

/// Lifecycle of a single item pulled from model output.
///
/// `Accepted` and `Dropped` are terminal. An item gets at most one repair.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemState {
    Parsed(Value),
    /// `pending_repair` holds the raw value while a repair is still allowed
    Invalid {
        reason: String,
        pending_repair: Option<Value>,
    },
    Repaired(Item),
    Validated(Item),
    Accepted(Item),
    Dropped { reason: String },
}

impl ItemState {
    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Parsed(_) => "parsed",
            Self::Invalid { .. } => "invalid",
            Self::Repaired(_) => "repaired",
            Self::Validated(_) => "validated",
            Self::Accepted(_) => "accepted",
            Self::Dropped { .. } => "dropped",
        }
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Accepted(_) | Self::Dropped { .. })
    }

    /// Take one step; terminal states stay where they are
    #[inline]
    #[must_use]
    pub fn advance(self, kind: ArtifactKind) -> Self {
        match self {
            Self::Parsed(value) => match interpret(&value, kind).and_then(|item| validate(&item).map(|()| item)) {
                Ok(item) => Self::Validated(item),
                Err(reason) => Self::Invalid {
                    reason,
                    pending_repair: Some(value),
                },
            },
            Self::Invalid {
                pending_repair: Some(value),
                reason,
            } => match repair::repair_item(&value, kind) {
                Ok(item) => Self::Repaired(item),
                Err(repair_reason) => Self::Dropped {
                    reason: format!("{reason}; repair failed: {repair_reason}"),
                },
            },
            Self::Invalid {
                pending_repair: None,
                reason,
            } => Self::Dropped { reason },
            Self::Repaired(item) => match validate(&item) {
                Ok(()) => Self::Validated(item),
                Err(reason) => Self::Invalid {
                    reason: format!("still invalid after repair: {reason}"),
                    pending_repair: None,
                },
            },
            Self::Validated(item) => Self::Accepted(item),
            terminal @ (Self::Accepted(_) | Self::Dropped { .. }) => terminal,
        }
    }
}

/// Drive one raw item to a terminal state
#[inline]
pub fn process_item(raw: Value, kind: ArtifactKind) -> Result<Item, String> {
    let mut state = ItemState::Parsed(raw);
    loop {
        let next = state.advance(kind);
        debug!("Item moved to state {}", next.name());
        state = match next {
            ItemState::Accepted(item) => return Ok(item),
            ItemState::Dropped { reason } => return Err(reason),
            other => other,
        };
    }
}

/// Parse, repair and validate raw model output into an artifact with exactly
/// `params.count` items
#[inline]
pub fn build(result: &GenerationResult, params: &TaskParams) -> Result<Artifact, BuildError> {
    let raw_items = extract_items(&result.text)?;
    debug!(
        "Model output contains {} candidate items for a {} of {}",
        raw_items.len(),
        params.kind,
        params.count
    );

    let mut accepted = Vec::new();
    for (index, raw) in raw_items.into_iter().enumerate() {
        match process_item(raw, params.kind) {
            Ok(item) => accepted.push(item),
            Err(reason) => warn!("Dropped item {}: {}", index, reason),
        }
    }

    if accepted.len() < params.count {
        return Err(BuildError::InsufficientValidItems {
            accepted: accepted.len(),
            requested: params.count,
        });
    }
    if accepted.len() > params.count {
        debug!(
            "Keeping the first {} of {} valid items",
            params.count,
            accepted.len()
        );
        accepted.truncate(params.count);
    }

    let artifact = assemble(accepted, params);
    info!("Built {} with {} items", artifact.kind(), artifact.item_count());
    Ok(artifact)
}

fn assemble(items: Vec<Item>, params: &TaskParams) -> Artifact {
    match params.kind {
        ArtifactKind::Quiz => Artifact::Quiz(Quiz {
            subject: params.subject.clone(),
            difficulty: params.difficulty,
            questions: items
                .into_iter()
                .filter_map(|item| match item {
                    Item::Question(question) => Some(question),
                    Item::Worksheet(_) => None,
                })
                .collect(),
        }),
        ArtifactKind::Worksheet => {
            let mut sections: Vec<WorksheetSection> = Vec::new();
            for item in items {
                let Item::Worksheet(item) = item else {
                    continue;
                };
                match sections.iter_mut().find(|s| s.question_type == item.question_type) {
                    Some(section) => section.items.push(item),
                    None => sections.push(WorksheetSection {
                        question_type: item.question_type,
                        items: vec![item],
                    }),
                }
            }
            Artifact::Worksheet(Worksheet {
                subject: params.subject.clone(),
                difficulty: params.difficulty,
                sections,
            })
        }
    }
}

/// Strict reading of an item already in canonical shape
fn interpret(value: &Value, kind: ArtifactKind) -> Result<Item, String> {
    match kind {
        ArtifactKind::Quiz => QuestionItem::deserialize(value).map(Item::Question),
        ArtifactKind::Worksheet => WorksheetItem::deserialize(value).map(Item::Worksheet),
    }
    .map_err(|e| format!("unexpected shape: {e}"))
}

/// Structural completeness checks
#[inline]
pub fn validate(item: &Item) -> Result<(), String> {
    match item {
        Item::Question(question) => {
            require_text(&question.prompt, "prompt")?;
            validate_choices(&question.choices, &question.correct_answer)?;
            require_text(&question.explanation, "explanation")
        }
        Item::Worksheet(item) => {
            require_text(&item.prompt, "prompt")?;
            require_text(&item.answer, "answer")?;
            if item.question_type != QuestionType::MultipleChoice && !item.choices.is_empty() {
                return Err(format!("{} item should not have choices", item.question_type));
            }
            match item.question_type {
                QuestionType::ShortAnswer => Ok(()),
                QuestionType::FillInTheBlank if item.prompt.contains("___") => Ok(()),
                QuestionType::FillInTheBlank => Err("fill-in-the-blank prompt has no ___ blank".to_string()),
                QuestionType::TrueFalse if matches!(item.answer.as_str(), "true" | "false") => Ok(()),
                QuestionType::TrueFalse => Err(format!("true/false answer is {:?}", item.answer)),
                QuestionType::MultipleChoice => validate_choices(&item.choices, &item.answer),
            }
        }
    }
}

fn require_text(value: &str, field: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        Err(format!("{field} is empty"))
    } else {
        Ok(())
    }
}

fn validate_choices(choices: &[String], answer: &str) -> Result<(), String> {
    if choices.len() < 2 {
        return Err(format!("needs at least two choices, found {}", choices.len()));
    }
    if choices.iter().any(|c| c.trim().is_empty()) {
        return Err("has a blank choice".to_string());
    }
    let folded: Vec<String> = choices.iter().map(|c| c.to_lowercase()).collect();
    for (index, choice) in choices.iter().enumerate() {
        if folded.iter().skip(index + 1).any(|other| *other == folded[index]) {
            return Err(format!("choice {choice:?} appears more than once"));
        }
    }
    match choices.iter().filter(|c| c.as_str() == answer).count() {
        1 => Ok(()),
        _ => Err(format!("answer {answer:?} is not one of the choices")),
    }
}

/// Find the item list in raw model output
#[inline]
pub fn extract_items(text: &str) -> Result<Vec<Value>, BuildError> {
    let document = parse_document(text)?;
    let items = collect_items(document);
    if items.is_empty() {
        return Err(BuildError::MalformedOutput {
            reason: "no items found".to_string(),
        });
    }
    Ok(items)
}

/// Locate and parse the first usable JSON value, tolerating fences and trailing commas
#[inline]
pub fn parse_document(text: &str) -> Result<Value, BuildError> {
    let body = repair::strip_code_fences(text);
    let mut last_error = None;

    let starts = body
        .char_indices()
        .filter(|(_, c)| matches!(c, '[' | '{'))
        .map(|(offset, _)| offset)
        .take(MAX_PARSE_CANDIDATES);

    for start in starts {
        let candidate = body.get(start..).unwrap_or_default();
        let parsed = first_json_value(candidate)
            .or_else(|_| first_json_value(&repair::remove_trailing_commas(candidate)));
        match parsed {
            Ok(value) if is_usable(&value) => return Ok(value),
            Ok(_) => {}
            Err(error) => last_error = Some(error.to_string()),
        }
    }

    Err(BuildError::MalformedOutput {
        reason: last_error.unwrap_or_else(|| "no JSON object or array found".to_string()),
    })
}

fn first_json_value(text: &str) -> Result<Value, serde_json::Error> {
    serde_json::Deserializer::from_str(text)
        .into_iter::<Value>()
        .next()
        .unwrap_or_else(|| Err(<serde_json::Error as serde::de::Error>::custom("empty input")))
}

fn is_usable(value: &Value) -> bool {
    match value {
        Value::Object(_) => true,
        Value::Array(items) => items.iter().any(Value::is_object),
        _ => false,
    }
}

fn collect_items(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        Value::Object(map) => collect_from_object(map),
        other => vec![other],
    }
}

fn collect_from_object(mut map: Map<String, Value>) -> Vec<Value> {
    for container in CONTAINER_KEYS {
        let Some(key) = find_key(&map, container) else {
            continue;
        };
        match map.remove(&key) {
            Some(Value::Array(items)) => return items,
            Some(Value::Object(inner)) => return collect_from_object(inner),
            Some(other) => {
                map.insert(key, other);
            }
            None => {}
        }
    }

    if let Some(Value::Array(sections)) = find_key(&map, "sections").and_then(|key| map.get(&key)) {
        return flatten_sections(sections);
    }

    vec![Value::Object(map)]
}

/// Worksheet sections carry the question type once for all their items
fn flatten_sections(sections: &[Value]) -> Vec<Value> {
    let mut items = Vec::new();
    for section in sections.iter().filter_map(Value::as_object) {
        let section_type = find_key(section, "question_type")
            .or_else(|| find_key(section, "type"))
            .and_then(|key| section.get(&key).cloned());
        let Some(Value::Array(section_items)) = find_key(section, "items").and_then(|key| section.get(&key))
        else {
            continue;
        };
        for item in section_items {
            let mut item = item.clone();
            if let (Some(object), Some(question_type)) = (item.as_object_mut(), &section_type) {
                let typed = find_key(object, "question_type").is_some() || find_key(object, "type").is_some();
                if !typed {
                    object.insert("question_type".to_string(), question_type.clone());
                }
            }
            items.push(item);
        }
    }
    items
}

fn find_key(map: &Map<String, Value>, wanted: &str) -> Option<String> {
    map.keys()
        .find(|key| key.trim().eq_ignore_ascii_case(wanted))
        .cloned()
}
