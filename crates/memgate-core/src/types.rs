use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse-grained classification of a message's conversational mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SceneType {
    Daily,
    Plot,
    Meta,
}

impl SceneType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SceneType::Daily => "daily",
            SceneType::Plot => "plot",
            SceneType::Meta => "meta",
        }
    }
}

impl fmt::Display for SceneType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SceneType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(SceneType::Daily),
            "plot" => Ok(SceneType::Plot),
            "meta" => Ok(SceneType::Meta),
            other => Err(format!("unknown scene type: {other}")),
        }
    }
}

/// Logical "conversational universe" label (e.g. "deepseek", "claude").
/// Isolates memory, rounds, and scene state between upstream model families.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Channel(pub String);

impl Channel {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Channel {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Channel {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A classification of how a retrieved row was found by the hybrid retrieval
/// pipeline. `Both` ranks ahead of a single-arm hit in the pre-rerank order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Vector,
    Keyword,
    Both,
}

impl MatchType {
    /// Sort priority used by the fallback (non-reranked) ordering:
    /// `both` first, then `vector`, then `keyword`.
    pub fn priority(&self) -> u8 {
        match self {
            MatchType::Both => 0,
            MatchType::Vector => 1,
            MatchType::Keyword => 2,
        }
    }

    /// `both` upgrades a single-arm classification; otherwise the existing
    /// label wins only if it matches, else the pair becomes `both`.
    pub fn upgrade(self, other: MatchType) -> MatchType {
        if self == other {
            self
        } else {
            MatchType::Both
        }
    }
}
