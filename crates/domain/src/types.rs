//! Generation request and response payloads

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::{MAX_CHARACTER_NAME_LENGTH, MAX_PROMPT_LENGTH};

/// A single rejected input field
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{field}: {reason}")]
pub struct FieldViolation {
    pub field: String,
    pub reason: String,
}

impl FieldViolation {
    fn new(field: &str, reason: impl Into<String>) -> Self {
        Self { field: field.to_string(), reason: reason.into() }
    }
}

/// Request body for `POST /api/generate/image`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageGenerationRequest {
    pub character_name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub art_style: Option<String>,
}

impl ImageGenerationRequest {
    pub fn validate(&self) -> Result<(), Vec<FieldViolation>> {
        collect([
            check_name(&self.character_name),
            check_text("description", &self.description),
        ])
    }
}

/// Response body for `POST /api/generate/image`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageGenerationResponse {
    pub image_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revised_prompt: Option<String>,
}

/// Request body for `POST /api/generate/story`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryGenerationRequest {
    pub character_name: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reading_age: Option<u8>,
}

impl StoryGenerationRequest {
    pub fn validate(&self) -> Result<(), Vec<FieldViolation>> {
        let age = match self.reading_age {
            Some(age) if !(3..=12).contains(&age) => {
                Some(FieldViolation::new("reading_age", "must be between 3 and 12"))
            }
            _ => None,
        };
        collect([check_name(&self.character_name), check_text("prompt", &self.prompt), age])
    }
}

/// Response body for `POST /api/generate/story`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryGenerationResponse {
    pub title: String,
    pub content: String,
}

fn check_name(name: &str) -> Option<FieldViolation> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        Some(FieldViolation::new("character_name", "is required"))
    } else if trimmed.chars().count() > MAX_CHARACTER_NAME_LENGTH {
        Some(FieldViolation::new(
            "character_name",
            format!("must be at most {MAX_CHARACTER_NAME_LENGTH} characters"),
        ))
    } else {
        None
    }
}

fn check_text(field: &str, text: &str) -> Option<FieldViolation> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        Some(FieldViolation::new(field, "is required"))
    } else if trimmed.chars().count() > MAX_PROMPT_LENGTH {
        Some(FieldViolation::new(field, format!("must be at most {MAX_PROMPT_LENGTH} characters")))
    } else {
        None
    }
}

fn collect<const N: usize>(checks: [Option<FieldViolation>; N]) -> Result<(), Vec<FieldViolation>> {
    let violations: Vec<_> = checks.into_iter().flatten().collect();
    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_request_validation() {
        let ok = ImageGenerationRequest {
            character_name: "Pip".to_string(),
            description: "a small hedgehog in a red scarf".to_string(),
            art_style: None,
        };
        assert!(ok.validate().is_ok());

        let bad = ImageGenerationRequest { character_name: " ".to_string(), description: String::new(), art_style: None };
        let violations = bad.validate().unwrap_err();
        let fields: Vec<_> = violations.iter().map(|v| v.field.as_str()).collect();
        assert_eq!(fields, vec!["character_name", "description"]);
    }

    #[test]
    fn test_story_request_reading_age() {
        let mut request = StoryGenerationRequest {
            character_name: "Pip".to_string(),
            prompt: "Pip learns to swim".to_string(),
            reading_age: Some(6),
        };
        assert!(request.validate().is_ok());

        request.reading_age = Some(20);
        let violations = request.validate().unwrap_err();
        assert_eq!(violations[0].to_string(), "reading_age: must be between 3 and 12");
    }

    #[test]
    fn test_overlong_prompt_rejected() {
        let request = StoryGenerationRequest {
            character_name: "Pip".to_string(),
            prompt: "a".repeat(MAX_PROMPT_LENGTH + 1),
            reading_age: None,
        };
        assert_eq!(request.validate().unwrap_err()[0].field, "prompt");
    }
}
