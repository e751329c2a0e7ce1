//! Data models for context packing

use serde::{Deserialize, Serialize};
use std::fmt;

/// Author of a conversation message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Other,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Other => "other",
        }
    }

    /// Lenient parse; unknown roles map to `Other`
    pub fn parse(role: &str) -> Self {
        match role.trim().to_ascii_lowercase().as_str() {
            "system" => Role::System,
            "user" => Role::User,
            "assistant" => Role::Assistant,
            _ => Role::Other,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Immutable conversation message
///
/// `position` is the message's index in the original history and doubles as
/// its identity for the per-message caches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub position: usize,
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(position: usize, role: Role, content: impl Into<String>) -> Self {
        Self {
            position,
            role,
            content: content.into(),
        }
    }

    /// Number an ordered list of turns from zero
    pub fn from_turns<I, S>(turns: I) -> Vec<Message>
    where
        I: IntoIterator<Item = (Role, S)>,
        S: Into<String>,
    {
        turns
            .into_iter()
            .enumerate()
            .map(|(position, (role, content))| Message::new(position, role, content))
            .collect()
    }
}

/// Representation level assigned to a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Tier {
    Full,
    Compressed,
    Placeholder,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Full => "FULL",
            Tier::Compressed => "COMPRESSED",
            Tier::Placeholder => "PLACEHOLDER",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// A message with its importance for the current query
///
/// Lives for one packing call only. The compressed cost is filled in lazily,
/// the first time the COMPRESSED tier is attempted.
#[derive(Debug, Clone)]
pub struct ScoredMessage<'a> {
    pub message: &'a Message,
    pub score: f32,
    pub full_cost: usize,
    pub compressed_cost: Option<usize>,
    pub placeholder_cost: usize,
}

/// One entry of the packed context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackedItem {
    pub role: Role,
    pub text: String,
    pub tier: Tier,
    pub position: usize,
    pub cost: usize,
}

/// Reporting record for a packing call
///
/// Field names are the reporting contract and must not change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackingStats {
    pub budget: usize,
    pub used: usize,
    /// Original-text tokens of the messages kept FULL or COMPRESSED
    pub raw_tokens: usize,
    /// Tokens charged for COMPRESSED messages
    pub compressed_tokens: usize,
    /// Messages in the input history
    pub items_total: usize,
    pub items_full: usize,
    pub items_compressed: usize,
    pub items_stubbed: usize,
}

impl PackingStats {
    /// Messages that did not fit at all
    pub fn items_dropped(&self) -> usize {
        self.items_total
            .saturating_sub(self.items_full + self.items_compressed + self.items_stubbed)
    }

    pub fn remaining(&self) -> usize {
        self.budget.saturating_sub(self.used)
    }
}

/// Packed context in original conversation order plus its stats
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackingResult {
    /// System preamble placed ahead of the history, when one was requested
    /// and fit; its cost is included in `stats.used`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preamble: Option<String>,
    pub items: Vec<PackedItem>,
    pub stats: PackingStats,
}

impl PackingResult {
    /// Ordered role/text pairs ready for a chat API
    pub fn to_chat_messages(&self) -> Vec<(Role, String)> {
        self.preamble
            .iter()
            .map(|preamble| (Role::System, preamble.clone()))
            .chain(self.items.iter().map(|item| (item.role, item.text.clone())))
            .collect()
    }

    /// Tier assigned to the message at `position`, if it was kept
    pub fn tier_of(&self, position: usize) -> Option<Tier> {
        self.items
            .iter()
            .find(|item| item.position == position)
            .map(|item| item.tier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse_is_lenient() {
        assert_eq!(Role::parse("System"), Role::System);
        assert_eq!(Role::parse(" assistant "), Role::Assistant);
        assert_eq!(Role::parse("tool"), Role::Other);
    }

    #[test]
    fn test_from_turns_assigns_positions() {
        let messages = Message::from_turns(vec![(Role::System, "a"), (Role::User, "b")]);
        assert_eq!(messages[0].position, 0);
        assert_eq!(messages[1].position, 1);
        assert_eq!(messages[1].role, Role::User);
    }

    #[test]
    fn test_stats_serialization_shape() {
        let stats = PackingStats {
            budget: 800,
            used: 500,
            raw_tokens: 600,
            compressed_tokens: 100,
            items_total: 5,
            items_full: 2,
            items_compressed: 1,
            items_stubbed: 1,
        };
        let json = serde_json::to_value(&stats).unwrap();
        let mut keys: Vec<_> = json.as_object().unwrap().keys().cloned().collect();
        keys.sort();
        assert_eq!(
            keys,
            vec![
                "budget",
                "compressed_tokens",
                "items_compressed",
                "items_full",
                "items_stubbed",
                "items_total",
                "raw_tokens",
                "used",
            ]
        );
        assert_eq!(stats.items_dropped(), 1);
        assert_eq!(stats.remaining(), 300);
    }

    #[test]
    fn test_tier_serializes_upper_case() {
        assert_eq!(serde_json::to_string(&Tier::Placeholder).unwrap(), "\"PLACEHOLDER\"");
    }

    #[test]
    fn test_preamble_leads_chat_messages() {
        let result = PackingResult {
            preamble: Some("Be brief.".to_string()),
            items: vec![PackedItem {
                role: Role::User,
                text: "hi".to_string(),
                tier: Tier::Full,
                position: 0,
                cost: 1,
            }],
            stats: PackingStats::default(),
        };
        assert_eq!(
            result.to_chat_messages(),
            vec![
                (Role::System, "Be brief.".to_string()),
                (Role::User, "hi".to_string())
            ]
        );
    }
}
