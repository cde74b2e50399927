//! Capability definitions advertised by providers

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::schema::Schema;
use crate::{Error, Result};

/// Capability category
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Category {
    SpeechToText,
    TextToSpeech,
    LanguageCompletion,
    Utility,
    Tool,
    /// Any other named category
    Custom(String),
}

impl Category {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::SpeechToText => "speech_to_text",
            Self::TextToSpeech => "text_to_speech",
            Self::LanguageCompletion => "language_completion",
            Self::Utility => "utility",
            Self::Tool => "tool",
            Self::Custom(name) => name,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        match normalized.as_str() {
            "" => Err("category must not be empty".to_string()),
            "speech_to_text" | "stt" => Ok(Self::SpeechToText),
            "text_to_speech" | "tts" => Ok(Self::TextToSpeech),
            "language_completion" | "llm" => Ok(Self::LanguageCompletion),
            "utility" => Ok(Self::Utility),
            "tool" => Ok(Self::Tool),
            _ => Ok(Self::Custom(normalized)),
        }
    }
}

impl TryFrom<String> for Category {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Category> for String {
    fn from(category: Category) -> Self {
        category.as_str().to_string()
    }
}

/// One advertised function of a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDefinition {
    pub id: String,
    pub category: Category,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub config_schema: Schema,
    #[serde(default)]
    pub input_schema: Schema,
    #[serde(default)]
    pub output_schema: Schema,
}

impl CapabilityDefinition {
    pub fn new(id: impl Into<String>, category: Category, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            category,
            name: name.into(),
            description: String::new(),
            config_schema: Schema::default(),
            input_schema: Schema::default(),
            output_schema: Schema::default(),
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn with_config_schema(mut self, schema: Schema) -> Self {
        self.config_schema = schema;
        self
    }

    /// Check identity, category and schemas
    ///
    /// # Errors
    ///
    /// Returns `Error::Schema` if the definition is malformed
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::Schema("capability with empty id".to_string()));
        }
        if matches!(&self.category, Category::Custom(name) if name.trim().is_empty()) {
            return Err(Error::Schema(format!(
                "capability '{}' has empty category",
                self.id
            )));
        }
        self.config_schema
            .validate(&format!("{} config schema", self.id))?;
        self.input_schema
            .validate(&format!("{} input schema", self.id))?;
        self.output_schema
            .validate(&format!("{} output schema", self.id))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_parsing() {
        assert_eq!("speech-to-text".parse::<Category>(), Ok(Category::SpeechToText));
        assert_eq!("TTS".parse::<Category>(), Ok(Category::TextToSpeech));
        assert_eq!("llm".parse::<Category>(), Ok(Category::LanguageCompletion));
        assert_eq!(
            "Wake-Word".parse::<Category>(),
            Ok(Category::Custom("wake_word".to_string()))
        );
        assert!("  ".parse::<Category>().is_err());
    }

    #[test]
    fn category_serde_round_trip_uses_snake_case() {
        let json = serde_json::to_string(&Category::LanguageCompletion).unwrap();
        assert_eq!(json, "\"language_completion\"");
        let back: Category = serde_json::from_str("\"speech_to_text\"").unwrap();
        assert_eq!(back, Category::SpeechToText);
        assert!(serde_json::from_str::<Category>("\"\"").is_err());
    }

    #[test]
    fn empty_id_rejected() {
        let cap = CapabilityDefinition::new("", Category::Utility, "nothing");
        assert!(cap.validate().is_err());
    }
}
