//! User identity and consent records

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Per-identity consent flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consent {
    pub analytics: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marketing: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub necessary: Option<bool>,
}

/// A user identity, keyed by its anonymous ID
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub anonymous_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traits: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consent: Option<Consent>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl User {
    pub fn new(anonymous_id: String, now: i64) -> Self {
        Self {
            id: None,
            anonymous_id,
            traits: None,
            consent: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Merge `traits` over the existing ones (new keys win)
    pub fn merge_traits(&mut self, traits: Map<String, Value>) {
        let existing = self.traits.get_or_insert_with(Map::new);
        for (key, value) in traits {
            existing.insert(key, value);
        }
    }

    /// Bump `updated_at`, keeping it strictly increasing
    pub fn touch(&mut self, now: i64) {
        self.updated_at = now.max(self.updated_at + 1);
    }

    /// Analytics consent was given explicitly
    pub fn analytics_allowed(&self) -> bool {
        self.consent.map(|c| c.analytics).unwrap_or(false)
    }
}

/// Lookup key for user records
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UserKey {
    Id(String),
    AnonymousId(String),
}

impl UserKey {
    pub fn matches(&self, user: &User) -> bool {
        match self {
            UserKey::Id(id) => user.id.as_deref() == Some(id.as_str()),
            UserKey::AnonymousId(anon) => user.anonymous_id == *anon,
        }
    }
}
