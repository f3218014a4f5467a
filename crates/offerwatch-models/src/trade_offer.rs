use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::item::{ClassKey, ItemDescription, ItemRef, OfferItem};
use crate::offer_state::{ConfirmationMethod, OfferState};
use crate::poll_state::{OfferData, OfferDataValue, CANCEL_TIME_KEY, PENDING_CANCEL_TIME_KEY};
use crate::raw_offer::{RawAsset, RawOffer};

pub const MAX_MESSAGE_CHARS: usize = 128;

/// How long the remote keeps a freshly sent offer open.
pub const OFFER_LIFETIME_DAYS: i64 = 14;

const STEAM_ID64_INDIVIDUAL_BASE: u64 = 76_561_197_960_265_728;

/// 32-bit account id of an individual account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId(pub u32);

impl AccountId {
    pub fn steam_id64(self) -> u64 {
        STEAM_ID64_INDIVIDUAL_BASE + u64::from(self.0)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.steam_id64())
    }
}

/// Result of a successful send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendOutcome {
    Sent,
    /// Created, but waiting for email or mobile confirmation.
    Pending,
}

/// Result of a successful accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcceptOutcome {
    Accepted,
    Pending,
    Escrow,
}

/// A trade proposal between us and one partner.
///
/// Offers start out unsent (no id) and freely editable, or are reconstructed
/// from a remote record. Once an id is assigned the item lists, message and
/// token are frozen.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeOffer {
    id: Option<String>,
    pub partner: AccountId,
    pub is_our_offer: bool,
    message: Option<String>,
    pub state: OfferState,
    items_to_give: Vec<OfferItem>,
    items_to_receive: Vec<OfferItem>,
    pub created: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
    pub expires: Option<DateTime<Utc>>,
    pub escrow_ends: Option<DateTime<Utc>>,
    pub trade_id: Option<String>,
    pub from_real_time_trade: bool,
    pub confirmation_method: ConfirmationMethod,
    #[serde(skip)]
    token: Option<String>,
    #[serde(skip)]
    countering: Option<String>,
    #[serde(skip)]
    pending_data: OfferData,
}

fn epoch(secs: i64) -> Option<DateTime<Utc>> {
    if secs <= 0 {
        return None;
    }
    Utc.timestamp_opt(secs, 0).single()
}

fn describe<F>(assets: &[RawAsset], lookup: &F) -> Vec<OfferItem>
where
    F: Fn(&ClassKey) -> Option<Arc<ItemDescription>>,
{
    assets
        .iter()
        .map(|asset| OfferItem {
            item: asset.to_item_ref(),
            description: lookup(&asset.class_key()),
        })
        .collect()
}

impl TradeOffer {
    /// A new, unsent offer from us to `partner`.
    pub fn new_outgoing(partner: AccountId, token: Option<String>) -> Self {
        Self {
            id: None,
            partner,
            is_our_offer: true,
            message: None,
            state: OfferState::Invalid,
            items_to_give: Vec::new(),
            items_to_receive: Vec::new(),
            created: None,
            updated: None,
            expires: None,
            escrow_ends: None,
            trade_id: None,
            from_real_time_trade: false,
            confirmation_method: ConfirmationMethod::None,
            token,
            countering: None,
            pending_data: OfferData::new(),
        }
    }

    /// Rebuild an already-sent offer from its remote record, joining item
    /// descriptions through `lookup`.
    pub fn from_raw<F>(raw: &RawOffer, lookup: F) -> Self
    where
        F: Fn(&ClassKey) -> Option<Arc<ItemDescription>>,
    {
        let state = raw
            .trade_offer_state
            .and_then(|code| u8::try_from(code).ok())
            .and_then(|code| OfferState::try_from(code).ok())
            .unwrap_or(OfferState::Invalid);
        let confirmation_method = raw
            .confirmation_method
            .and_then(|code| u8::try_from(code).ok())
            .and_then(|code| ConfirmationMethod::try_from(code).ok())
            .unwrap_or_default();

        Self {
            id: Some(raw.tradeofferid.clone()),
            partner: AccountId(raw.accountid_other),
            is_our_offer: raw.is_our_offer,
            message: raw.message.clone(),
            state,
            items_to_give: describe(&raw.items_to_give, &lookup),
            items_to_receive: describe(&raw.items_to_receive, &lookup),
            created: epoch(raw.time_created),
            updated: epoch(raw.time_updated),
            expires: epoch(raw.expiration_time),
            escrow_ends: epoch(raw.escrow_end_date),
            trade_id: raw.tradeid.clone(),
            from_real_time_trade: raw.from_real_time_trade,
            confirmation_method,
            token: None,
            countering: None,
            pending_data: OfferData::new(),
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn is_sent(&self) -> bool {
        self.id.is_some()
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Id of the received offer this one counters, if any.
    pub fn countering(&self) -> Option<&str> {
        self.countering.as_deref()
    }

    pub fn items_to_give(&self) -> &[OfferItem] {
        &self.items_to_give
    }

    pub fn items_to_receive(&self) -> &[OfferItem] {
        &self.items_to_receive
    }

    pub fn all_items(&self) -> impl Iterator<Item = &OfferItem> {
        self.items_to_give.iter().chain(self.items_to_receive.iter())
    }

    /// The remote occasionally returns sent offers with no items, or with
    /// items it cannot describe. Such offers must not drive state changes.
    pub fn is_glitched(&self, language_configured: bool) -> bool {
        if !self.is_sent() {
            return false;
        }
        if self.items_to_give.is_empty() && self.items_to_receive.is_empty() {
            return true;
        }
        language_configured && self.all_items().any(|item| item.name().is_none())
    }

    pub fn items_without_name(&self) -> usize {
        self.all_items().filter(|item| item.name().is_none()).count()
    }

    pub fn contains_item(&self, item: &ItemRef) -> bool {
        self.all_items().any(|i| i.item.same_asset(item))
    }

    fn ensure_unsent(&self, action: &'static str) -> Result<(), ValidationError> {
        if self.is_sent() {
            return Err(ValidationError::AlreadySent(action));
        }
        Ok(())
    }

    fn sent_id(&self, action: &'static str) -> Result<&str, ValidationError> {
        self.id.as_deref().ok_or(ValidationError::NotSent(action))
    }

    fn add_item(&mut self, item: ItemRef, ours: bool) -> Result<bool, ValidationError> {
        self.ensure_unsent("add items to")?;
        if item.appid == 0 || item.contextid.is_empty() || item.assetid.is_empty() {
            return Err(ValidationError::InvalidInput(
                "Missing appid, contextid, or assetid parameter".to_string(),
            ));
        }
        let list = if ours {
            &mut self.items_to_give
        } else {
            &mut self.items_to_receive
        };
        if list.iter().any(|existing| existing.item.same_asset(&item)) {
            return Ok(false);
        }
        list.push(OfferItem::bare(item));
        Ok(true)
    }

    fn remove_item(&mut self, item: &ItemRef, ours: bool) -> Result<bool, ValidationError> {
        self.ensure_unsent("remove items from")?;
        let list = if ours {
            &mut self.items_to_give
        } else {
            &mut self.items_to_receive
        };
        match list.iter().position(|existing| existing.item.same_asset(item)) {
            Some(index) => {
                list.remove(index);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Returns `false` when the asset is already in the list.
    pub fn add_my_item(&mut self, item: ItemRef) -> Result<bool, ValidationError> {
        self.add_item(item, true)
    }

    pub fn add_their_item(&mut self, item: ItemRef) -> Result<bool, ValidationError> {
        self.add_item(item, false)
    }

    /// Returns how many of `items` were newly added.
    pub fn add_my_items(&mut self, items: impl IntoIterator<Item = ItemRef>) -> Result<usize, ValidationError> {
        let mut added = 0;
        for item in items {
            added += usize::from(self.add_my_item(item)?);
        }
        Ok(added)
    }

    pub fn add_their_items(
        &mut self,
        items: impl IntoIterator<Item = ItemRef>,
    ) -> Result<usize, ValidationError> {
        let mut added = 0;
        for item in items {
            added += usize::from(self.add_their_item(item)?);
        }
        Ok(added)
    }

    pub fn remove_my_item(&mut self, item: &ItemRef) -> Result<bool, ValidationError> {
        self.remove_item(item, true)
    }

    pub fn remove_their_item(&mut self, item: &ItemRef) -> Result<bool, ValidationError> {
        self.remove_item(item, false)
    }

    pub fn remove_my_items<'a>(
        &mut self,
        items: impl IntoIterator<Item = &'a ItemRef>,
    ) -> Result<usize, ValidationError> {
        let mut removed = 0;
        for item in items {
            removed += usize::from(self.remove_my_item(item)?);
        }
        Ok(removed)
    }

    pub fn remove_their_items<'a>(
        &mut self,
        items: impl IntoIterator<Item = &'a ItemRef>,
    ) -> Result<usize, ValidationError> {
        let mut removed = 0;
        for item in items {
            removed += usize::from(self.remove_their_item(item)?);
        }
        Ok(removed)
    }

    /// Messages longer than 128 characters are truncated.
    pub fn set_message(&mut self, message: &str) -> Result<(), ValidationError> {
        self.ensure_unsent("set message in")?;
        self.message = Some(message.chars().take(MAX_MESSAGE_CHARS).collect());
        Ok(())
    }

    pub fn set_token(&mut self, token: Option<String>) -> Result<(), ValidationError> {
        self.ensure_unsent("set token in")?;
        self.token = token;
        Ok(())
    }

    /// A new unsent offer of ours with the same partner, token and items.
    pub fn duplicate(&self) -> TradeOffer {
        let mut offer = TradeOffer::new_outgoing(self.partner, self.token.clone());
        offer.items_to_give = self.items_to_give.clone();
        offer.items_to_receive = self.items_to_receive.clone();
        offer
    }

    /// A duplicate which, once sent, replaces this offer as a counter-offer.
    pub fn counter(&self) -> Result<TradeOffer, ValidationError> {
        let id = self.sent_id("counter")?;
        if self.state != OfferState::Active {
            return Err(ValidationError::InvalidState {
                id: id.to_string(),
                state: self.state,
                action: "countered",
            });
        }
        let mut offer = self.duplicate();
        offer.countering = Some(id.to_string());
        Ok(offer)
    }

    /// Checks run before sending; returns nothing, the send itself assigns the id.
    pub fn ensure_sendable(&self) -> Result<(), ValidationError> {
        self.ensure_unsent("send")?;
        if self.items_to_give.is_empty() && self.items_to_receive.is_empty() {
            return Err(ValidationError::EmptyOffer);
        }
        Ok(())
    }

    /// Apply a successful send: assign the id and timestamps, and hand back the
    /// side-data collected before submission so it can be persisted by id.
    pub fn mark_sent(
        &mut self,
        id: String,
        confirmation_method: ConfirmationMethod,
        now: DateTime<Utc>,
    ) -> (SendOutcome, OfferData) {
        self.id = Some(id);
        self.created = Some(now);
        self.updated = Some(now);
        self.expires = Some(now + Duration::days(OFFER_LIFETIME_DAYS));
        self.confirmation_method = confirmation_method;
        let outcome = if confirmation_method == ConfirmationMethod::None {
            self.state = OfferState::Active;
            SendOutcome::Sent
        } else {
            self.state = OfferState::CreatedNeedsConfirmation;
            SendOutcome::Pending
        };
        (outcome, std::mem::take(&mut self.pending_data))
    }

    /// Validates a cancel or decline and returns the offer id.
    pub fn ensure_cancelable(&self) -> Result<&str, ValidationError> {
        let id = self.sent_id("cancel or decline")?;
        if !self.state.is_cancelable() {
            return Err(ValidationError::InvalidState {
                id: id.to_string(),
                state: self.state,
                action: "cancelled or declined",
            });
        }
        Ok(id)
    }

    pub fn mark_closed(&mut self, now: DateTime<Utc>) {
        self.state = if self.is_our_offer {
            OfferState::Canceled
        } else {
            OfferState::Declined
        };
        self.updated = Some(now);
    }

    /// Validates an accept and returns the offer id. Our own offers can never
    /// be accepted, whatever their state.
    pub fn ensure_acceptable(&self) -> Result<&str, ValidationError> {
        if self.is_our_offer {
            return Err(ValidationError::OwnOffer(
                self.id.clone().unwrap_or_else(|| "(unsent)".to_string()),
            ));
        }
        let id = self.sent_id("accept")?;
        if self.state != OfferState::Active {
            return Err(ValidationError::InvalidState {
                id: id.to_string(),
                state: self.state,
                action: "accepted",
            });
        }
        Ok(id)
    }

    /// Copy server-owned fields from a fresh fetch of the same offer. A
    /// glitched local copy is replaced wholesale.
    pub fn merge_refresh(&mut self, fresh: TradeOffer, language_configured: bool) {
        if self.is_glitched(language_configured) {
            let token = self.token.take();
            let countering = self.countering.take();
            *self = fresh;
            self.token = token;
            self.countering = countering;
            return;
        }
        self.id = fresh.id;
        self.state = fresh.state;
        self.expires = fresh.expires;
        self.created = fresh.created;
        self.updated = fresh.updated;
        self.escrow_ends = fresh.escrow_ends;
        self.confirmation_method = fresh.confirmation_method;
        self.trade_id = fresh.trade_id;
    }

    /// Rejects side-data that makes no sense for this offer.
    pub fn validate_data_key(&self, key: &str) -> Result<(), ValidationError> {
        if key != CANCEL_TIME_KEY && key != PENDING_CANCEL_TIME_KEY {
            return Ok(());
        }
        let id = self.id.clone().unwrap_or_else(|| "(unsent)".to_string());
        if !self.is_our_offer {
            return Err(ValidationError::NotOurOffer {
                id,
                action: "set cancel time",
            });
        }
        if self.is_sent() && !self.state.is_cancelable() {
            return Err(ValidationError::InvalidState {
                id,
                state: self.state,
                action: "given a cancel time",
            });
        }
        Ok(())
    }

    pub fn pending_data(&self) -> &OfferData {
        &self.pending_data
    }

    /// Side-data on an unsent offer; sent offers keep theirs in the poll state.
    pub fn set_pending_data(
        &mut self,
        key: &str,
        value: OfferDataValue,
    ) -> Result<(), ValidationError> {
        self.ensure_unsent("attach side-data to")?;
        self.validate_data_key(key)?;
        self.pending_data.insert(key.to_string(), value);
        Ok(())
    }

    pub fn unset_pending_data(&mut self, key: &str) -> Option<OfferDataValue> {
        self.pending_data.remove(key)
    }
}
