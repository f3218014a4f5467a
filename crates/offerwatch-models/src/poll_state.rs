use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::offer_state::OfferState;

/// Side-data key overriding the global cancel time (milliseconds) for one offer.
pub const CANCEL_TIME_KEY: &str = "cancelTime";

/// Side-data key overriding the global pending-confirmation cancel time (milliseconds).
pub const PENDING_CANCEL_TIME_KEY: &str = "pendingCancelTime";

/// A typed value attached to an offer by the application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OfferDataValue {
    Flag(bool),
    Integer(i64),
    Text(String),
    Json(serde_json::Value),
}

impl OfferDataValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(n) => Some(*n),
            Self::Json(v) => v.as_f64().map(|f| f as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Flag(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<i64> for OfferDataValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for OfferDataValue {
    fn from(value: bool) -> Self {
        Self::Flag(value)
    }
}

impl From<&str> for OfferDataValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for OfferDataValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Per-offer side-data, keyed by application-chosen strings.
pub type OfferData = BTreeMap<String, OfferDataValue>;

/// Everything the poller remembers between cycles.
///
/// Field names follow the camelCase layout of existing poll-data files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PollState {
    /// Last seen state of every offer we sent.
    pub sent: BTreeMap<String, OfferState>,
    /// Last seen state of every offer we received.
    pub received: BTreeMap<String, OfferState>,
    /// Creation time (epoch seconds) of every tracked offer.
    pub timestamps: BTreeMap<String, i64>,
    /// High-water mark: latest `updated` time (epoch seconds) seen in a clean cycle.
    pub offers_since: i64,
    pub offer_data: BTreeMap<String, OfferData>,
}

impl PollState {
    pub fn offer_data(&self, offer_id: &str, key: &str) -> Option<&OfferDataValue> {
        self.offer_data.get(offer_id).and_then(|data| data.get(key))
    }

    pub fn all_offer_data(&self, offer_id: &str) -> Option<&OfferData> {
        self.offer_data.get(offer_id)
    }

    /// Returns `true` when the stored value actually changed.
    pub fn set_offer_data(&mut self, offer_id: &str, key: &str, value: OfferDataValue) -> bool {
        if self.offer_data(offer_id, key) == Some(&value) {
            return false;
        }
        self.offer_data
            .entry(offer_id.to_string())
            .or_default()
            .insert(key.to_string(), value);
        true
    }

    pub fn unset_offer_data(&mut self, offer_id: &str, key: &str) -> Option<OfferDataValue> {
        let data = self.offer_data.get_mut(offer_id)?;
        let removed = data.remove(key);
        if data.is_empty() {
            self.offer_data.remove(offer_id);
        }
        removed
    }

    /// Integer side-data in milliseconds, used by the cancel policy.
    pub fn offer_millis(&self, offer_id: &str, key: &str) -> Option<i64> {
        self.offer_data(offer_id, key).and_then(OfferDataValue::as_i64)
    }
}
