//! Language tags carried by execution requests

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Source language of a request.
///
/// Unknown tags are kept verbatim in [`Language::Other`] so that the
/// dispatcher can reject them with an "Unsupported language" result instead
/// of failing to decode the whole message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Language {
    JavaScript,
    TypeScript,
    Python,
    Other(String),
}

impl Language {
    /// Canonical lowercase tag
    pub fn as_str(&self) -> &str {
        match self {
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Python => "python",
            Language::Other(tag) => tag,
        }
    }

    /// Guess the language from a file extension (without the dot)
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "js" | "mjs" | "cjs" => Some(Language::JavaScript),
            "ts" | "mts" | "cts" => Some(Language::TypeScript),
            "py" => Some(Language::Python),
            _ => None,
        }
    }
}

impl FromStr for Language {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s.trim().to_ascii_lowercase();
        Ok(match tag.as_str() {
            "javascript" | "js" | "node" | "mjs" => Language::JavaScript,
            "typescript" | "ts" => Language::TypeScript,
            "python" | "py" | "python3" => Language::Python,
            _ => Language::Other(tag),
        })
    }
}

impl From<&str> for Language {
    fn from(s: &str) -> Self {
        match s.parse() {
            Ok(language) => language,
            Err(never) => match never {},
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Language {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Language {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(Language::from(tag.as_str()))
    }
}
