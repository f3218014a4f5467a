use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::item::OfferItem;
use crate::offer_state::TradeStatus;

/// Outcome of the exchange behind an accepted offer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeDetails {
    pub status: TradeStatus,
    pub time_init: Option<DateTime<Utc>>,
    pub received: Vec<OfferItem>,
    pub given: Vec<OfferItem>,
}

/// What the trade page reveals about one side of a trade.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserDetails {
    pub persona_name: Option<String>,
    /// App/context inventory layout, passed through as sent.
    pub contexts: serde_json::Value,
    pub escrow_days: Option<u32>,
    pub probation: Option<bool>,
    pub avatar_icon: Option<String>,
    pub avatar_medium: Option<String>,
    pub avatar_full: Option<String>,
}

impl UserDetails {
    /// Fill the sized avatar variants from the icon URL.
    pub fn with_avatar(mut self, icon: &str) -> Self {
        self.avatar_icon = Some(icon.to_string());
        self.avatar_medium = Some(icon.replace(".jpg", "_medium.jpg"));
        self.avatar_full = Some(icon.replace(".jpg", "_full.jpg"));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn avatar_variants() {
        let details = UserDetails::default().with_avatar("https://cdn/abc.jpg");
        assert_eq!(details.avatar_medium.as_deref(), Some("https://cdn/abc_medium.jpg"));
        assert_eq!(details.avatar_full.as_deref(), Some("https://cdn/abc_full.jpg"));
    }
}
