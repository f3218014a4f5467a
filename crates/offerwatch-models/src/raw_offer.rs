use serde::{Deserialize, Serialize};

use crate::item::{ClassKey, ItemRef};
use crate::lenient;

/// An asset as it appears in a remote offer, receipt, or exchange record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawAsset {
    #[serde(default, deserialize_with = "lenient::u32")]
    pub appid: u32,
    #[serde(default, deserialize_with = "lenient::string")]
    pub contextid: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub assetid: String,
    /// Receipts and inventories name the asset id `id`.
    #[serde(default, deserialize_with = "lenient::opt_string", skip_serializing)]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient::string")]
    pub classid: String,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub instanceid: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub amount: Option<u64>,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub missing: bool,
}

impl RawAsset {
    pub fn class_key(&self) -> ClassKey {
        ClassKey::new(self.appid, self.classid.clone(), self.instanceid.as_deref())
    }

    pub fn asset_id(&self) -> &str {
        match self.id.as_deref() {
            Some(id) if self.assetid.is_empty() => id,
            _ => &self.assetid,
        }
    }

    pub fn to_item_ref(&self) -> ItemRef {
        ItemRef {
            appid: self.appid,
            contextid: self.contextid.clone(),
            assetid: self.asset_id().to_string(),
            amount: self.amount.unwrap_or(1) as u32,
            classid: Some(self.classid.clone()),
            instanceid: Some(self.instanceid.clone().unwrap_or_else(|| "0".to_string())),
        }
    }
}

/// A trade offer record exactly as listed by the remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawOffer {
    #[serde(default, deserialize_with = "lenient::string")]
    pub tradeofferid: String,
    #[serde(default, deserialize_with = "lenient::u32")]
    pub accountid_other: u32,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub message: Option<String>,
    #[serde(default, deserialize_with = "lenient::i64")]
    pub expiration_time: i64,
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub trade_offer_state: Option<u64>,
    #[serde(default, deserialize_with = "lenient::list")]
    pub items_to_give: Vec<RawAsset>,
    #[serde(default, deserialize_with = "lenient::list")]
    pub items_to_receive: Vec<RawAsset>,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub is_our_offer: bool,
    #[serde(default, deserialize_with = "lenient::i64")]
    pub time_created: i64,
    #[serde(default, deserialize_with = "lenient::i64")]
    pub time_updated: i64,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub tradeid: Option<String>,
    #[serde(default, deserialize_with = "lenient::flag")]
    pub from_real_time_trade: bool,
    #[serde(default, deserialize_with = "lenient::i64")]
    pub escrow_end_date: i64,
    #[serde(default, deserialize_with = "lenient::opt_u64")]
    pub confirmation_method: Option<u64>,
}

impl RawOffer {
    /// No partner: the record cannot be turned into an offer at all.
    pub fn is_severely_malformed(&self) -> bool {
        self.accountid_other == 0
    }

    /// No partner, or nothing changes hands on either side.
    pub fn is_malformed(&self) -> bool {
        self.is_severely_malformed()
            || (self.items_to_give.is_empty() && self.items_to_receive.is_empty())
    }

    pub fn assets(&self) -> impl Iterator<Item = &RawAsset> {
        self.items_to_give.iter().chain(self.items_to_receive.iter())
    }
}
