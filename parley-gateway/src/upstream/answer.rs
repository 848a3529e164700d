//! Answer extraction from model output.
//!
//! The default system prompt asks the model to reply with `{"answer": "..."}`.
//! Models do not always comply, so anything that fails to parse is kept verbatim.

use serde::Serialize;
use serde_json::{Map, Value};

/// Model output after answer extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractedAnswer {
    /// Text taken from the `answer` field of a JSON reply
    Structured(String),
    /// The reply as received
    Raw(String),
}

/// Which branch produced the answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerFormat {
    Structured,
    Raw,
}

impl ExtractedAnswer {
    /// Parse `text` as `{"answer": String}`, falling back to the raw text.
    ///
    /// Only a JSON object qualifies. Arrays, scalars, and objects whose
    /// `answer` is not a string are kept verbatim.
    pub fn parse(text: &str) -> Self {
        let mut object = match serde_json::from_str::<Map<String, Value>>(text.trim()) {
            Ok(object) => object,
            Err(e) => {
                tracing::debug!(error = %e, "Reply is not a JSON object, using raw text");
                return Self::Raw(text.to_string());
            }
        };

        match object.remove("answer") {
            Some(Value::String(answer)) => Self::Structured(answer),
            _ => {
                tracing::debug!("Reply has no string answer field, using raw text");
                Self::Raw(text.to_string())
            }
        }
    }

    pub fn format(&self) -> AnswerFormat {
        match self {
            Self::Structured(_) => AnswerFormat::Structured,
            Self::Raw(_) => AnswerFormat::Raw,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Structured(text) | Self::Raw(text) => text,
        }
    }

    pub fn into_text(self) -> String {
        match self {
            Self::Structured(text) | Self::Raw(text) => text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_answer_is_unwrapped() {
        assert_eq!(
            ExtractedAnswer::parse(r#"{"answer":"X"}"#),
            ExtractedAnswer::Structured("X".into())
        );
    }

    #[test]
    fn extra_fields_and_whitespace_are_tolerated() {
        let parsed = ExtractedAnswer::parse("\n {\"answer\": \"42\", \"confidence\": 0.9}\n");
        assert_eq!(parsed.format(), AnswerFormat::Structured);
        assert_eq!(parsed.as_str(), "42");
    }

    #[test]
    fn plain_text_stays_raw() {
        assert_eq!(
            ExtractedAnswer::parse("plain text"),
            ExtractedAnswer::Raw("plain text".into())
        );
    }

    #[test]
    fn wrong_shapes_fall_back_to_raw() {
        for text in [r#"{"answer": 7}"#, r#"{"reply":"x"}"#, r#"["answer"]"#, "{broken"] {
            let parsed = ExtractedAnswer::parse(text);
            assert_eq!(parsed, ExtractedAnswer::Raw(text.into()), "input: {text}");
        }
    }

    #[test]
    fn arrays_are_not_read_as_positional_fields() {
        assert_eq!(
            ExtractedAnswer::parse(r#"["Paris"]"#),
            ExtractedAnswer::Raw(r#"["Paris"]"#.into())
        );
        assert_eq!(
            ExtractedAnswer::parse(" [\"Paris\", 1] ").format(),
            AnswerFormat::Raw
        );
    }

    #[test]
    fn scalars_and_null_answers_stay_raw() {
        for text in ["\"just a string\"", "42", "null", r#"{"answer": null}"#] {
            assert_eq!(
                ExtractedAnswer::parse(text),
                ExtractedAnswer::Raw(text.into()),
                "input: {text}"
            );
        }
    }

    #[test]
    fn empty_answer_is_still_structured() {
        assert_eq!(
            ExtractedAnswer::parse(r#"{"answer":""}"#).into_text(),
            String::new()
        );
    }
}
