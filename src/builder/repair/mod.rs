//! Best-effort normalization of model output into canonical items.
//!
//! Repair only reshapes what the model produced: it renames fields, unpacks
//! choice shapes and resolves answers given by letter. It never invents
//! content, so an item missing its explanation stays invalid.


use fancy_regex::Regex;
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::sync::LazyLock;

use super::{Item, QuestionItem, QuestionType, WorksheetItem};
use crate::prompt::ArtifactKind;

static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)```").expect("valid regex"));

static TRAILING_COMMA: LazyLock<Regex> = LazyLock::new(|| Regex::new(r",(\s*[\]}])").expect("valid regex"));

static BLANK_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)_{2,}|\[\s*blank\s*\]|\(\s*blank\s*\)").expect("valid regex"));

/// "A) Paris", "(b) London", "C. Rome", "D: Madrid"
static LEADING_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\(?([A-Ha-h])[\).:]\s+(?=\S)").expect("valid regex"));

/// An answer that is only a label: "B", "(b)", "C.", "Option D"
static BARE_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(?:option\s+|choice\s+)?\(?([a-h])\)?[.:)]?\s*$").expect("valid regex"));

/// Return the contents of the first fenced code block, or the text unchanged
#[inline]
pub fn strip_code_fences(text: &str) -> Cow<'_, str> {
    match CODE_FENCE.captures(text) {
        Ok(Some(captures)) => captures
            .get(1)
            .map_or(Cow::Borrowed(text), |inner| Cow::Borrowed(inner.as_str())),
        _ => Cow::Borrowed(text),
    }
}

/// Drop commas directly before a closing bracket or brace
#[inline]
pub fn remove_trailing_commas(text: &str) -> String {
    TRAILING_COMMA.replace_all(text, "$1").into_owned()
}

/// Rebuild an item from whatever shape the model used
#[inline]
pub fn repair_item(value: &Value, kind: ArtifactKind) -> Result<Item, String> {
    let object = value.as_object().ok_or_else(|| "item is not an object".to_string())?;
    let fields = Fields::from_object(object);

    match kind {
        ArtifactKind::Quiz => repair_question(&fields).map(Item::Question),
        ArtifactKind::Worksheet => repair_worksheet_item(&fields).map(Item::Worksheet),
    }
}

#[derive(Debug, Default)]
struct Fields<'a> {
    prompt: Option<&'a Value>,
    choices: Option<&'a Value>,
    answer: Option<&'a Value>,
    explanation: Option<&'a Value>,
    question_type: Option<&'a Value>,
}

impl<'a> Fields<'a> {
    fn from_object(object: &'a Map<String, Value>) -> Self {
        let mut fields = Self::default();
        for (key, value) in object {
            let slot = match normalize_key(key).as_str() {
                "prompt" | "question" | "question_text" | "text" | "stem" | "statement" | "query" => {
                    &mut fields.prompt
                }
                "choices" | "options" | "alternatives" | "answer_choices" | "answer_options" => {
                    &mut fields.choices
                }
                "correct_answer" | "answer" | "correct" | "correct_choice" | "correct_option" | "solution"
                | "answer_key" => &mut fields.answer,
                "explanation" | "rationale" | "reason" | "justification" | "explain" => {
                    &mut fields.explanation
                }
                "question_type" | "type" | "kind" | "format" | "item_type" => &mut fields.question_type,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value);
            }
        }
        fields
    }
}

fn normalize_key(key: &str) -> String {
    let normalized: String = key
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();
    normalized.trim_matches('_').to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Choice {
    key: Option<String>,
    text: String,
}

fn repair_question(fields: &Fields<'_>) -> Result<QuestionItem, String> {
    let prompt = fields
        .prompt
        .and_then(scalar_text)
        .ok_or_else(|| "missing prompt".to_string())?;
    let choices = fields.choices.map(parse_choices).unwrap_or_default();
    let raw_answer = fields
        .answer
        .and_then(scalar_text)
        .ok_or_else(|| "missing answer".to_string())?;
    let correct_answer = resolve_answer(&raw_answer, &choices).unwrap_or(raw_answer);

    Ok(QuestionItem {
        prompt,
        choices: choices.into_iter().map(|c| c.text).collect(),
        correct_answer,
        explanation: fields.explanation.and_then(scalar_text).unwrap_or_default(),
    })
}

fn repair_worksheet_item(fields: &Fields<'_>) -> Result<WorksheetItem, String> {
    let mut prompt = fields
        .prompt
        .and_then(scalar_text)
        .ok_or_else(|| "missing prompt".to_string())?;
    let choices = fields.choices.map(parse_choices).unwrap_or_default();
    let raw_answer = fields
        .answer
        .and_then(scalar_text)
        .ok_or_else(|| "missing answer".to_string())?;
    let explanation = fields
        .explanation
        .and_then(scalar_text)
        .filter(|text| !text.is_empty());

    let question_type = match fields.question_type.and_then(scalar_text) {
        Some(declared) => {
            QuestionType::parse(&declared).ok_or_else(|| format!("unknown question type {declared:?}"))?
        }
        None => infer_question_type(&prompt, &choices, &raw_answer),
    };

    let (answer, choices) = match question_type {
        QuestionType::MultipleChoice => (
            resolve_answer(&raw_answer, &choices).unwrap_or(raw_answer),
            choices.into_iter().map(|c| c.text).collect(),
        ),
        QuestionType::TrueFalse => (
            canonical_bool(&raw_answer).map_or_else(|| raw_answer.to_lowercase(), str::to_string),
            Vec::new(),
        ),
        QuestionType::FillInTheBlank => {
            prompt = normalize_blank(&prompt, &raw_answer);
            (raw_answer, Vec::new())
        }
        QuestionType::ShortAnswer => (raw_answer, Vec::new()),
    };

    Ok(WorksheetItem {
        question_type,
        prompt,
        answer,
        choices,
        explanation,
    })
}

fn infer_question_type(prompt: &str, choices: &[Choice], answer: &str) -> QuestionType {
    if !choices.is_empty() {
        QuestionType::MultipleChoice
    } else if BLANK_MARKER.is_match(prompt).unwrap_or(false) {
        QuestionType::FillInTheBlank
    } else if canonical_bool(answer).is_some() {
        QuestionType::TrueFalse
    } else {
        QuestionType::ShortAnswer
    }
}

/// Mark the blank with `___`, cutting the answer out of the prompt if needed
fn normalize_blank(prompt: &str, answer: &str) -> String {
    let marked = BLANK_MARKER.replace_all(prompt, "___").into_owned();
    if marked.contains("___") || answer.is_empty() {
        return marked;
    }
    marked.replacen(answer, "___", 1)
}

/// Plain text of a JSON scalar; single-element arrays are unwrapped
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.trim().to_string()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Array(items) if items.len() == 1 => items.first().and_then(scalar_text),
        _ => None,
    }
}

fn parse_choices(value: &Value) -> Vec<Choice> {
    let raw: Vec<Choice> = match value {
        Value::Array(items) => items.iter().filter_map(choice_from_value).collect(),
        Value::Object(map) => map
            .iter()
            .filter_map(|(key, value)| {
                scalar_text(value).map(|text| Choice {
                    key: Some(key.trim().to_string()),
                    text,
                })
            })
            .collect(),
        Value::String(text) if text.lines().count() > 1 => text
            .lines()
            .map(|line| Choice {
                key: None,
                text: line.trim().to_string(),
            })
            .collect(),
        _ => Vec::new(),
    };

    let mut choices: Vec<Choice> = Vec::with_capacity(raw.len());
    for choice in raw.into_iter().map(split_label) {
        if choice.text.is_empty() {
            continue;
        }
        let duplicate = choices
            .iter()
            .any(|existing| existing.text.to_lowercase() == choice.text.to_lowercase());
        if !duplicate {
            choices.push(choice);
        }
    }
    choices
}

fn choice_from_value(value: &Value) -> Option<Choice> {
    if let Some(text) = scalar_text(value) {
        return Some(Choice { key: None, text });
    }

    let object = value.as_object()?;
    let lookup = |names: &[&str]| {
        object
            .iter()
            .find(|(key, _)| names.contains(&normalize_key(key).as_str()))
            .and_then(|(_, value)| scalar_text(value))
    };

    if let Some(text) = lookup(&["value", "text", "content", "choice", "option", "answer"]) {
        return Some(Choice {
            key: lookup(&["key", "label", "letter", "id"]),
            text,
        });
    }

    // {"A": "Paris"}
    let mut entries = object.iter();
    match (entries.next(), entries.next()) {
        (Some((key, value)), None) => scalar_text(value).map(|text| Choice {
            key: Some(key.trim().to_string()),
            text,
        }),
        _ => None,
    }
}

/// Move a leading "A) " label into the choice key
fn split_label(choice: Choice) -> Choice {
    if choice.key.is_some() {
        return choice;
    }
    let Ok(Some(captures)) = LEADING_LABEL.captures(&choice.text) else {
        return choice;
    };
    let (Some(whole), Some(letter)) = (captures.get(0), captures.get(1)) else {
        return choice;
    };
    Choice {
        key: Some(letter.as_str().to_uppercase()),
        text: choice.text.get(whole.end()..).unwrap_or_default().trim().to_string(),
    }
}

/// Map an answer given as text, key or letter onto the matching choice text
fn resolve_answer(raw: &str, choices: &[Choice]) -> Option<String> {
    let raw = raw.trim();
    if let Some(exact) = choices.iter().find(|c| c.text == raw) {
        return Some(exact.text.clone());
    }

    let lowered = raw.to_lowercase();
    let by_text = |needle: &str| {
        choices
            .iter()
            .find(|c| c.text.to_lowercase() == needle)
            .map(|c| c.text.clone())
    };
    if let Some(found) = by_text(&lowered) {
        return Some(found);
    }

    let labelled = split_label(Choice {
        key: None,
        text: raw.to_string(),
    });
    if let Some(found) = labelled
        .key
        .as_ref()
        .and_then(|_| by_text(&labelled.text.to_lowercase()))
    {
        return Some(found);
    }

    if let Some(found) = choices
        .iter()
        .find(|c| c.key.as_deref().is_some_and(|key| key.eq_ignore_ascii_case(raw)))
    {
        return Some(found.text.clone());
    }

    let letter = match BARE_LABEL.captures(raw) {
        Ok(Some(captures)) => captures.get(1).map(|m| m.as_str().to_uppercase()),
        _ => None,
    }?;

    choices
        .iter()
        .find(|c| c.key.as_deref().is_some_and(|key| key.eq_ignore_ascii_case(&letter)))
        .or_else(|| {
            let index = letter.chars().next().map(|c| (c as usize).saturating_sub('A' as usize))?;
            choices.get(index)
        })
        .map(|c| c.text.clone())
}

fn canonical_bool(raw: &str) -> Option<&'static str> {
    match raw.trim().trim_end_matches('.').to_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "correct" | "right" => Some("true"),
        "false" | "f" | "no" | "n" | "incorrect" | "wrong" => Some("false"),
        _ => None,
    }
}
