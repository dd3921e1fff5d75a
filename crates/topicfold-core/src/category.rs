use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::CoreError;

/// What the classification labels represent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    #[default]
    Topic,
    Subtopic,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Topic => "topic",
            Self::Subtopic => "subtopic",
        }
    }

    /// The answer the model gives when no label fits, e.g. `no topic`.
    pub fn none_answer(&self) -> String {
        format!("no {}", self.as_str())
    }

    /// The value written to the dataset for rows with no fitting label.
    pub fn none_label(&self) -> &'static str {
        match self {
            Self::Topic => "No Topic",
            Self::Subtopic => "No Subtopic",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "topic" => Ok(Self::Topic),
            "subtopic" => Ok(Self::Subtopic),
            _ => Err(CoreError::InvalidCategory(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("Topic".parse::<Category>().unwrap(), Category::Topic);
        assert_eq!(" SUBTOPIC ".parse::<Category>().unwrap(), Category::Subtopic);
    }

    #[test]
    fn rejects_unknown_category() {
        let err = "theme".parse::<Category>().unwrap_err();
        assert!(matches!(err, CoreError::InvalidCategory(ref s) if s == "theme"));
    }

    #[test]
    fn none_answer_and_label() {
        assert_eq!(Category::Subtopic.none_answer(), "no subtopic");
        assert_eq!(Category::Subtopic.none_label(), "No Subtopic");
        assert_eq!(Category::Topic.none_label(), "No Topic");
    }
}
