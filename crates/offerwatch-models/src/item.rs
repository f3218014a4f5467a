use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::lenient;

const IMAGE_BASE_URL: &str = "https://steamcommunity-a.akamaihd.net/economy/image/";

/// App id of the community-items app, whose market names carry the fee app.
const COMMUNITY_APPID: u32 = 753;

/// Identity of an item's shared (non instance-specific) metadata.
///
/// Rendered as `{appid}_{classid}_{instanceid}`, with a missing instance id
/// normalized to `"0"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClassKey {
    pub appid: u32,
    pub classid: String,
    pub instanceid: String,
}

impl ClassKey {
    pub fn new(appid: u32, classid: impl Into<String>, instanceid: Option<&str>) -> Self {
        let instanceid = match instanceid {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => "0".to_string(),
        };
        Self {
            appid,
            classid: classid.into(),
            instanceid,
        }
    }
}

impl fmt::Display for ClassKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.appid, self.classid, self.instanceid)
    }
}

impl FromStr for ClassKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('_');
        let (Some(appid), Some(classid), Some(instanceid), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(format!("malformed class key {s:?}"));
        };
        let all_digits = |p: &str| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit());
        if !all_digits(classid) || !all_digits(instanceid) {
            return Err(format!("malformed class key {s:?}"));
        }
        let appid = appid
            .parse::<u32>()
            .map_err(|e| format!("malformed class key {s:?}: {e}"))?;
        Ok(Self::new(appid, classid, Some(instanceid)))
    }
}

/// Reference to one asset inside an offer.
///
/// Two refs denote the same asset when appid, contextid and assetid match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRef {
    pub appid: u32,
    pub contextid: String,
    pub assetid: String,
    pub amount: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instanceid: Option<String>,
}

impl ItemRef {
    pub fn new(appid: u32, contextid: impl Into<String>, assetid: impl Into<String>) -> Self {
        Self {
            appid,
            contextid: contextid.into(),
            assetid: assetid.into(),
            amount: 1,
            classid: None,
            instanceid: None,
        }
    }

    pub fn with_class(mut self, classid: impl Into<String>, instanceid: Option<&str>) -> Self {
        self.classid = Some(classid.into());
        self.instanceid = instanceid.map(str::to_string);
        self
    }

    pub fn same_asset(&self, other: &ItemRef) -> bool {
        self.appid == other.appid
            && self.contextid == other.contextid
            && self.assetid == other.assetid
    }

    /// The metadata key, when the class of this asset is known.
    pub fn class_key(&self) -> Option<ClassKey> {
        self.classid
            .as_deref()
            .map(|classid| ClassKey::new(self.appid, classid, self.instanceid.as_deref()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemTag {
    #[serde(default, deserialize_with = "lenient::string")]
    pub category: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub internal_name: String,
    #[serde(default, alias = "category_name", deserialize_with = "lenient::string")]
    pub localized_category_name: String,
    #[serde(default, alias = "name", deserialize_with = "lenient::string")]
    pub localized_tag_name: String,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub color: Option<String>,
}

/// Immutable display metadata shared by every asset of one class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemDescription {
    #[serde(default, deserialize_with = "lenient::u32")]
    pub appid: u32,
    #[serde(default, deserialize_with = "lenient::string")]
    pub classid: String,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub instanceid: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub market_name: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub market_hash_name: Option<String>,
    #[serde(rename = "type", default, deserialize_with = "lenient::opt_string")]
    pub item_type: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub name_color: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub background_color: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub icon_url: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub icon_url_large: Option<String>,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub tradable: bool,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub marketable: bool,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub commodity: bool,
    #[serde(default, deserialize_with = "lenient::u32")]
    pub market_tradable_restriction: u32,
    #[serde(default, deserialize_with = "lenient::u32")]
    pub market_marketable_restriction: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market_fee_app: Option<u32>,
    #[serde(default, deserialize_with = "lenient::list")]
    pub tags: Vec<ItemTag>,
    #[serde(default, deserialize_with = "lenient::list")]
    pub descriptions: Vec<serde_json::Value>,
    #[serde(default, deserialize_with = "lenient::list")]
    pub fraudwarnings: Vec<serde_json::Value>,
    #[serde(default, deserialize_with = "lenient::list")]
    pub actions: Vec<serde_json::Value>,
    /// Remote fields without a dedicated slot, kept verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ItemDescription {
    /// Parse a description record and fill in derived fields.
    pub fn from_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value::<Self>(value).map(Self::normalized)
    }

    fn normalized(mut self) -> Self {
        if self.appid == COMMUNITY_APPID && self.market_fee_app.is_none() {
            self.market_fee_app = self.market_hash_name.as_deref().and_then(|name| {
                let (prefix, _) = name.split_once('-')?;
                prefix.parse().ok()
            });
        }
        self
    }

    pub fn class_key(&self) -> ClassKey {
        ClassKey::new(self.appid, self.classid.clone(), self.instanceid.as_deref())
    }
}

/// An asset of an offer joined with its cached description, when known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferItem {
    #[serde(flatten)]
    pub item: ItemRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<Arc<ItemDescription>>,
}

impl OfferItem {
    pub fn bare(item: ItemRef) -> Self {
        Self {
            item,
            description: None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.description.as_ref().and_then(|d| d.name.as_deref())
    }

    pub fn tag(&self, category: &str) -> Option<&ItemTag> {
        self.description
            .as_ref()
            .and_then(|d| d.tags.iter().find(|t| t.category == category))
    }

    pub fn image_url(&self) -> Option<String> {
        let icon = self.description.as_ref()?.icon_url.as_deref()?;
        Some(format!("{IMAGE_BASE_URL}{icon}/"))
    }

    pub fn large_image_url(&self) -> Option<String> {
        match self
            .description
            .as_ref()
            .and_then(|d| d.icon_url_large.as_deref())
        {
            Some(large) => Some(format!("{IMAGE_BASE_URL}{large}/")),
            None => self.image_url(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_key_defaults_instance_to_zero() {
        let key = ClassKey::new(440, "101", None);
        assert_eq!(key.to_string(), "440_101_0");
        assert_eq!(ClassKey::new(440, "101", Some("")).instanceid, "0");
    }

    #[test]
    fn class_key_parses_rendered_form() {
        let key: ClassKey = "730_310776560_188530139".parse().unwrap();
        assert_eq!(key.appid, 730);
        assert_eq!(key.classid, "310776560");
        assert_eq!(key.instanceid, "188530139");
        assert!("730_abc_0".parse::<ClassKey>().is_err());
        assert!("730_1".parse::<ClassKey>().is_err());
    }

    #[test]
    fn same_asset_ignores_amount_and_class() {
        let a = ItemRef::new(440, "2", "100");
        let mut b = ItemRef::new(440, "2", "100").with_class("5", None);
        b.amount = 3;
        assert!(a.same_asset(&b));
        assert!(!a.same_asset(&ItemRef::new(440, "2", "101")));
    }

    #[test]
    fn description_from_remote_record() {
        let desc = ItemDescription::from_value(serde_json::json!({
            "appid": "753",
            "classid": "123",
            "instanceid": "0",
            "name": "Trading Card",
            "market_hash_name": "570-Trading Card",
            "tradable": 1,
            "marketable": "0",
            "icon_url": "abc",
            "tags": [{"category": "Rarity", "internal_name": "common", "name": "Common"}],
            "owner": "someone"
        }))
        .unwrap();
        assert_eq!(desc.market_fee_app, Some(570));
        assert!(desc.tradable);
        assert!(!desc.marketable);
        assert_eq!(desc.tags[0].localized_tag_name, "Common");
        assert_eq!(desc.extra.get("owner").unwrap(), "someone");
        assert_eq!(desc.class_key().to_string(), "753_123_0");
    }

    #[test]
    fn image_urls_fall_back_to_small_icon() {
        let desc = ItemDescription::from_value(serde_json::json!({
            "appid": 440, "classid": "1", "icon_url": "small"
        }))
        .unwrap();
        let item = OfferItem {
            item: ItemRef::new(440, "2", "1"),
            description: Some(Arc::new(desc)),
        };
        assert_eq!(
            item.large_image_url().unwrap(),
            "https://steamcommunity-a.akamaihd.net/economy/image/small/"
        );
        assert!(OfferItem::bare(ItemRef::new(440, "2", "1")).image_url().is_none());
    }
}
