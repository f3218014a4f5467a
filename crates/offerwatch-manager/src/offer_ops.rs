//! Operations on individual offers that talk to the remote.

use chrono::{DateTime, Utc};
use offerwatch_models::{
    lenient, AcceptOutcome, AccountId, ConfirmationMethod, ExchangeDetails, ItemRef, OfferDataValue,
    OfferFilter, OfferItem, OfferState, RawAsset, SendOutcome, TradeOffer, TradeStatus, UserDetails,
    ValidationError,
};
use offerwatch_remote::parser::check_receipt_page;
use offerwatch_remote::{OfferQuery, RemoteError};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::ManagerError;
use crate::events::OfferEvent;
use crate::manager::{OfferManager, SendGuard};

#[derive(Debug, Deserialize)]
struct TradeStatusEnvelope {
    response: Option<TradeStatusResponse>,
}

#[derive(Debug, Deserialize)]
struct TradeStatusResponse {
    trades: Option<Vec<TradeRecord>>,
}

#[derive(Debug, Deserialize)]
struct TradeRecord {
    #[serde(default, deserialize_with = "lenient::string")]
    tradeid: String,
    #[serde(default, deserialize_with = "lenient::u32")]
    status: u32,
    #[serde(default, deserialize_with = "lenient::i64")]
    time_init: i64,
    #[serde(default, deserialize_with = "lenient::list")]
    assets_received: Vec<RawAsset>,
    #[serde(default, deserialize_with = "lenient::list")]
    assets_given: Vec<RawAsset>,
}

fn truthy(body: &Value, field: &str) -> bool {
    match body.get(field) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        _ => false,
    }
}

fn id_field(body: &Value, field: &str) -> Option<String> {
    match body.get(field)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn asset_json(item: &OfferItem) -> Value {
    json!({
        "appid": item.item.appid,
        "contextid": item.item.contextid,
        "amount": item.item.amount.max(1),
        "assetid": item.item.assetid,
    })
}

fn offer_page_path(id: Option<&str>, partner: AccountId, token: Option<&str>) -> String {
    let mut path = format!("/tradeoffer/{}/?partner={}", id.unwrap_or("new"), partner.0);
    if let Some(token) = token {
        path.push_str("&token=");
        path.push_str(token);
    }
    path
}

impl OfferManager {
    /// A new, unsent offer to `partner`.
    pub fn create_offer(&self, partner: AccountId, token: Option<String>) -> TradeOffer {
        TradeOffer::new_outgoing(partner, token)
    }

    /// List offers, attach descriptions and report the result as
    /// [`OfferEvent::OfferList`]. Sent and received are listed concurrently.
    pub async fn get_offers(
        &self,
        filter: OfferFilter,
        historical_cutoff: Option<i64>,
    ) -> Result<(Vec<TradeOffer>, Vec<TradeOffer>), ManagerError> {
        let sent_query = OfferQuery::new(filter, historical_cutoff).sent_only();
        let received_query = OfferQuery::new(filter, historical_cutoff).received_only();
        let (sent, received) = tokio::try_join!(
            self.inner.offers.fetch(&sent_query),
            self.inner.offers.fetch(&received_query)
        )
        .map_err(|e| self.observe(e))?;

        let keys = Self::keys_of(sent.sent.iter().chain(received.received.iter()));
        let table = self
            .inner
            .descriptions
            .resolve(&keys)
            .await
            .map_err(|e| self.observe(e))?;

        let sent = Self::assemble(sent.sent.iter(), &table);
        let received = Self::assemble(received.received.iter(), &table);
        debug!(?filter, sent = sent.len(), received = received.len(), "Listed offers");
        self.emit(OfferEvent::OfferList {
            filter,
            sent: sent.clone(),
            received: received.clone(),
        });
        Ok((sent, received))
    }

    /// Offers holding any of `items`, active ones only unless `include_inactive`.
    pub async fn get_offers_containing_items(
        &self,
        items: &[ItemRef],
        include_inactive: bool,
    ) -> Result<(Vec<TradeOffer>, Vec<TradeOffer>), ManagerError> {
        let filter = if include_inactive {
            OfferFilter::All
        } else {
            OfferFilter::ActiveOnly
        };
        let (sent, received) = self.get_offers(filter, None).await?;
        let holds = |offer: &TradeOffer| items.iter().any(|item| offer.contains_item(item));
        Ok((
            sent.into_iter().filter(|o| holds(o)).collect(),
            received.into_iter().filter(|o| holds(o)).collect(),
        ))
    }

    /// Fetch one offer by id.
    pub async fn get_offer(&self, id: &str) -> Result<TradeOffer, ManagerError> {
        let (raw, inline) = self
            .inner
            .offers
            .fetch_one(id)
            .await
            .map_err(|e| self.observe(e))?;
        let mut table = self.inner.descriptions.absorb(inline).await;
        let keys: Vec<_> = Self::keys_of(std::iter::once(&raw))
            .into_iter()
            .filter(|key| !table.contains_key(key))
            .collect();
        let resolved = self
            .inner
            .descriptions
            .resolve(&keys)
            .await
            .map_err(|e| self.observe(e))?;
        table.extend(resolved);
        Ok(TradeOffer::from_raw(&raw, |key| table.get(key).cloned()))
    }

    /// Submit an unsent offer.
    ///
    /// Side-data attached before sending moves into the poll state under the
    /// new id, and the send is recorded there before the in-flight marker is
    /// cleared, so the next cycle never reports it as unknown.
    pub async fn send(&self, offer: &mut TradeOffer) -> Result<SendOutcome, ManagerError> {
        offer.ensure_sendable()?;

        let trade = json!({
            "newversion": true,
            "version": offer.items_to_give().len() + offer.items_to_receive().len() + 1,
            "me": {
                "assets": offer.items_to_give().iter().map(asset_json).collect::<Vec<_>>(),
                "currency": [],
                "ready": false
            },
            "them": {
                "assets": offer.items_to_receive().iter().map(asset_json).collect::<Vec<_>>(),
                "currency": [],
                "ready": false
            }
        });
        let create_params = match offer.token() {
            Some(token) => json!({ "trade_offer_access_token": token }),
            None => json!({}),
        };
        let mut form = vec![
            ("sessionid".to_string(), self.inner.api.session_id().to_string()),
            ("serverid".to_string(), "1".to_string()),
            ("partner".to_string(), offer.partner.steam_id64().to_string()),
            (
                "tradeoffermessage".to_string(),
                offer.message().unwrap_or_default().to_string(),
            ),
            ("json_tradeoffer".to_string(), trade.to_string()),
            ("captcha".to_string(), String::new()),
            ("trade_offer_create_params".to_string(), create_params.to_string()),
        ];
        if let Some(countering) = offer.countering() {
            form.push(("tradeofferid_countered".to_string(), countering.to_string()));
        }
        let referer = self
            .inner
            .api
            .community_url(&offer_page_path(None, offer.partner, offer.token()));

        let _in_flight = SendGuard::new(&self.inner.pending_sends);
        let body = self
            .inner
            .api
            .community_post("/tradeoffer/new/send", &referer, form, 401)
            .await
            .map_err(|e| self.observe(e))?;

        let id = id_field(&body, "tradeofferid")
            .ok_or_else(|| RemoteError::Protocol("Unknown response".to_string()))?;
        let method = if truthy(&body, "needs_mobile_confirmation") {
            ConfirmationMethod::MobileApp
        } else if truthy(&body, "needs_email_confirmation") {
            ConfirmationMethod::Email
        } else {
            ConfirmationMethod::None
        };
        let (outcome, data) = offer.mark_sent(id.clone(), method, Utc::now());

        let snapshot = {
            let mut state = self.lock_state();
            for (key, value) in data {
                state.set_offer_data(&id, &key, value);
            }
            state.sent.insert(id.clone(), offer.state);
            state.clone()
        };
        self.commit_poll_state(snapshot);
        info!(offer_id = %id, outcome = ?outcome, "Offer sent");
        Ok(outcome)
    }

    /// Cancel our offer or decline theirs, then poll soon after.
    pub async fn cancel(&self, offer: &mut TradeOffer) -> Result<(), ManagerError> {
        let id = offer.ensure_cancelable()?.to_string();
        let action = if offer.is_our_offer { "cancel" } else { "decline" };
        let referer = self
            .inner
            .api
            .community_url(&offer_page_path(Some(&id), offer.partner, offer.token()));
        let form = vec![("sessionid".to_string(), self.inner.api.session_id().to_string())];

        let body = self
            .inner
            .api
            .community_post(&format!("/tradeoffer/{id}/{action}"), &referer, form, 401)
            .await
            .map_err(|e| self.observe(e))?;
        if let Some(answered) = id_field(&body, "tradeofferid").filter(|a| *a != id) {
            warn!(offer_id = %id, answered = %answered, "Cancel answered for a different offer");
        }

        offer.mark_closed(Utc::now());
        debug!(offer_id = %id, action, "Offer closed");
        self.request_poll(false);
        Ok(())
    }

    /// Same as [`cancel`](Self::cancel); reads better for received offers.
    pub async fn decline(&self, offer: &mut TradeOffer) -> Result<(), ManagerError> {
        self.cancel(offer).await
    }

    /// Accept a received offer.
    ///
    /// With `skip_state_update` the accept response alone decides the
    /// outcome; otherwise the offer is refreshed and its new state decides.
    pub async fn accept(
        &self,
        offer: &mut TradeOffer,
        skip_state_update: bool,
    ) -> Result<AcceptOutcome, ManagerError> {
        let id = offer.ensure_acceptable()?.to_string();
        let referer = self.inner.api.community_url(&format!("/tradeoffer/{id}/"));
        let form = vec![
            ("sessionid".to_string(), self.inner.api.session_id().to_string()),
            ("serverid".to_string(), "1".to_string()),
            ("tradeofferid".to_string(), id.clone()),
            ("partner".to_string(), offer.partner.steam_id64().to_string()),
            ("captcha".to_string(), String::new()),
        ];

        let body = self
            .inner
            .api
            .community_post(&format!("/tradeoffer/{id}/accept"), &referer, form, 403)
            .await
            .map_err(|e| self.observe(e))?;
        self.request_poll(false);

        if skip_state_update {
            if let Some(trade_id) = id_field(&body, "tradeid") {
                offer.trade_id = Some(trade_id);
            }
            let pending = truthy(&body, "needs_mobile_confirmation")
                || truthy(&body, "needs_email_confirmation");
            return Ok(if pending {
                AcceptOutcome::Pending
            } else {
                AcceptOutcome::Accepted
            });
        }

        self.refresh(offer).await?;
        if offer.confirmation_method != ConfirmationMethod::None {
            Ok(AcceptOutcome::Pending)
        } else if offer.state == OfferState::InEscrow {
            Ok(AcceptOutcome::Escrow)
        } else if offer.state == OfferState::Accepted {
            Ok(AcceptOutcome::Accepted)
        } else {
            Err(RemoteError::Protocol(format!("Unknown state {}", offer.state)).into())
        }
    }

    /// Re-read a sent offer from the remote and merge the result into it.
    pub async fn refresh(&self, offer: &mut TradeOffer) -> Result<(), ManagerError> {
        let id = offer
            .id()
            .ok_or(ValidationError::NotSent("refresh"))?
            .to_string();
        let fresh = self.get_offer(&id).await?;
        offer.merge_refresh(fresh, self.language_configured());
        Ok(())
    }

    /// Side-data for an offer: on the offer itself until it is sent, in the
    /// poll state afterwards.
    pub fn offer_data(&self, offer: &TradeOffer, key: &str) -> Option<OfferDataValue> {
        match offer.id() {
            None => offer.pending_data().get(key).cloned(),
            Some(id) => self.lock_state().offer_data(id, key).cloned(),
        }
    }

    pub fn set_offer_data(
        &self,
        offer: &mut TradeOffer,
        key: &str,
        value: OfferDataValue,
    ) -> Result<(), ManagerError> {
        let Some(id) = offer.id().map(str::to_string) else {
            offer.set_pending_data(key, value)?;
            return Ok(());
        };
        offer.validate_data_key(key)?;
        let changed = {
            let mut state = self.lock_state();
            state.set_offer_data(&id, key, value).then(|| state.clone())
        };
        if let Some(snapshot) = changed {
            self.commit_poll_state(snapshot);
        }
        Ok(())
    }

    pub fn unset_offer_data(&self, offer: &mut TradeOffer, key: &str) -> Option<OfferDataValue> {
        let Some(id) = offer.id().map(str::to_string) else {
            return offer.unset_pending_data(key);
        };
        let (removed, snapshot) = {
            let mut state = self.lock_state();
            let removed = state.unset_offer_data(&id, key);
            let snapshot = removed.is_some().then(|| state.clone());
            (removed, snapshot)
        };
        if let Some(snapshot) = snapshot {
            self.commit_poll_state(snapshot);
        }
        removed
    }

    /// Items we actually received in an accepted offer, with their new asset ids.
    pub async fn get_received_items(&self, offer: &TradeOffer) -> Result<Vec<OfferItem>, ManagerError> {
        let id = offer
            .id()
            .ok_or(ValidationError::NotSent("request received items on"))?;
        if offer.state != OfferState::Accepted {
            return Err(ValidationError::InvalidState {
                id: id.to_string(),
                state: offer.state,
                action: "checked for received items",
            }
            .into());
        }
        let trade_id = offer
            .trade_id
            .as_deref()
            .ok_or_else(|| ValidationError::MissingTradeId(id.to_string()))?;

        let markup = self
            .inner
            .api
            .community_get(&format!("/trade/{trade_id}/receipt/"))
            .await
            .map_err(|e| self.observe(e))?;
        check_receipt_page(&markup).map_err(|e| self.observe(e))?;
        let assets = self.inner.parser.parse_receipt(&markup)?;
        if assets.is_empty() && !offer.items_to_receive().is_empty() {
            return Err(RemoteError::DataUnavailable.into());
        }
        self.describe_assets(&assets).await
    }

    /// Status and asset movements of the exchange behind an accepted offer.
    /// Unsettled exchanges are an error unless `include_failed`.
    pub async fn get_exchange_details(
        &self,
        offer: &TradeOffer,
        include_failed: bool,
    ) -> Result<ExchangeDetails, ManagerError> {
        let id = offer
            .id()
            .ok_or(ValidationError::NotSent("get exchange details for"))?;
        let trade_id = offer
            .trade_id
            .as_deref()
            .ok_or_else(|| ValidationError::MissingTradeId(id.to_string()))?;

        let body = self
            .inner
            .api
            .econ_get(
                "GetTradeStatus",
                vec![("tradeid".to_string(), trade_id.to_string())],
            )
            .await
            .map_err(|e| self.observe(e))?;
        let envelope: TradeStatusEnvelope = serde_json::from_value(body)?;
        let trades = envelope
            .response
            .and_then(|r| r.trades)
            .ok_or_else(|| RemoteError::Protocol("Malformed response".to_string()))?;
        let trade = trades
            .into_iter()
            .next()
            .filter(|t| t.tradeid == trade_id)
            .ok_or_else(|| {
                RemoteError::Protocol(
                    "Trade not found in GetTradeStatus response; try again later".to_string(),
                )
            })?;

        let status = u8::try_from(trade.status)
            .ok()
            .and_then(|code| TradeStatus::try_from(code).ok())
            .ok_or_else(|| RemoteError::Protocol(format!("Trade status is {}", trade.status)))?;
        if !include_failed && !status.is_settled() {
            return Err(RemoteError::Protocol(format!("Trade status is {status:?}")).into());
        }

        let all: Vec<RawAsset> = trade
            .assets_received
            .iter()
            .chain(trade.assets_given.iter())
            .cloned()
            .collect();
        let described = self.describe_assets(&all).await?;
        let (received, given) = described.split_at(trade.assets_received.len());
        Ok(ExchangeDetails {
            status,
            time_init: DateTime::from_timestamp(trade.time_init, 0).filter(|_| trade.time_init > 0),
            received: received.to_vec(),
            given: given.to_vec(),
        })
    }

    /// Details of both parties, ours first. Only for offers we are about to
    /// send or received offers that are still Active.
    pub async fn get_user_details(
        &self,
        offer: &TradeOffer,
    ) -> Result<(UserDetails, UserDetails), ManagerError> {
        if let Some(id) = offer.id() {
            if offer.is_our_offer {
                return Err(ValidationError::InvalidInput(
                    "Cannot get user details for an offer that we sent".to_string(),
                )
                .into());
            }
            if offer.state != OfferState::Active {
                return Err(ValidationError::InvalidState {
                    id: id.to_string(),
                    state: offer.state,
                    action: "inspected for user details",
                }
                .into());
            }
        }

        let path = match offer.id() {
            Some(id) => format!("/tradeoffer/{id}/"),
            None => offer_page_path(None, offer.partner, offer.token()),
        };
        let markup = self
            .inner
            .api
            .community_get(&path)
            .await
            .map_err(|e| self.observe(e))?;
        Ok(self
            .inner
            .parser
            .parse_user_details(&markup, self.inner.account, offer.partner)?)
    }

    async fn describe_assets(&self, assets: &[RawAsset]) -> Result<Vec<OfferItem>, ManagerError> {
        let keys: Vec<_> = assets.iter().map(RawAsset::class_key).collect();
        let table = self
            .inner
            .descriptions
            .resolve(&keys)
            .await
            .map_err(|e| self.observe(e))?;
        Ok(assets
            .iter()
            .map(|asset| OfferItem {
                item: asset.to_item_ref(),
                description: table.get(&asset.class_key()).cloned(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offer_page_paths() {
        assert_eq!(
            offer_page_path(None, AccountId(5), Some("tok")),
            "/tradeoffer/new/?partner=5&token=tok"
        );
        assert_eq!(offer_page_path(Some("9"), AccountId(5), None), "/tradeoffer/9/?partner=5");
    }

    #[test]
    fn response_field_forms() {
        let body = json!({"tradeofferid": 123, "tradeid": "", "needs_mobile_confirmation": 1});
        assert_eq!(id_field(&body, "tradeofferid").as_deref(), Some("123"));
        assert_eq!(id_field(&body, "tradeid"), None);
        assert!(truthy(&body, "needs_mobile_confirmation"));
        assert!(!truthy(&body, "needs_email_confirmation"));
    }
}
