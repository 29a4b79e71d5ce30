use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The closed set of reaction emojis. Anything outside this set is rejected
/// at the event boundary rather than carried as a free-form string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ReactionEmoji {
    ThumbsUp,
    Heart,
    Joy,
    Fire,
    Cry,
    Surprised,
}

impl ReactionEmoji {
    /// All emojis in picker order. Aggregates are emitted in this order so
    /// the view stays stable across rebuilds.
    pub const ALL: [ReactionEmoji; 6] = [
        ReactionEmoji::ThumbsUp,
        ReactionEmoji::Heart,
        ReactionEmoji::Joy,
        ReactionEmoji::Fire,
        ReactionEmoji::Cry,
        ReactionEmoji::Surprised,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ReactionEmoji::ThumbsUp => "👍",
            ReactionEmoji::Heart => "❤️",
            ReactionEmoji::Joy => "😂",
            ReactionEmoji::Fire => "🔥",
            ReactionEmoji::Cry => "😢",
            ReactionEmoji::Surprised => "😮",
        }
    }
}

impl fmt::Display for ReactionEmoji {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("not a reaction emoji: {0:?}")]
pub struct UnknownEmoji(pub String);

impl FromStr for ReactionEmoji {
    type Err = UnknownEmoji;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| UnknownEmoji(s.to_string()))
    }
}

impl TryFrom<String> for ReactionEmoji {
    type Error = UnknownEmoji;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ReactionEmoji> for String {
    fn from(e: ReactionEmoji) -> Self {
        e.as_str().to_string()
    }
}
