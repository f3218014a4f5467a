use std::sync::Arc;

use chrono::{Duration, Utc};
use offerwatch_models::{lenient, OfferFilter, RawOffer};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::api::ApiClient;
use crate::error::RemoteError;

/// What to list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfferQuery {
    pub include_sent: bool,
    pub include_received: bool,
    pub filter: OfferFilter,
    /// Epoch seconds. With `ActiveOnly`, offers updated since then are
    /// listed too. `None` means a year from now, i.e. no historical offers.
    pub historical_cutoff: Option<i64>,
}

impl OfferQuery {
    pub fn new(filter: OfferFilter, historical_cutoff: Option<i64>) -> Self {
        Self {
            include_sent: true,
            include_received: true,
            filter,
            historical_cutoff,
        }
    }

    pub fn sent_only(mut self) -> Self {
        self.include_received = false;
        self
    }

    pub fn received_only(mut self) -> Self {
        self.include_sent = false;
        self
    }
}

/// Concatenated result of every page of one listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OfferListing {
    pub sent: Vec<RawOffer>,
    pub received: Vec<RawOffer>,
}

#[derive(Debug, Deserialize)]
struct OffersEnvelope {
    response: Option<OffersPage>,
}

#[derive(Debug, Deserialize)]
struct OffersPage {
    #[serde(default, deserialize_with = "lenient::list")]
    trade_offers_sent: Vec<RawOffer>,
    #[serde(default, deserialize_with = "lenient::list")]
    trade_offers_received: Vec<RawOffer>,
    #[serde(default)]
    next_cursor: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct SingleOfferEnvelope {
    response: Option<SingleOffer>,
}

#[derive(Debug, Deserialize)]
struct SingleOffer {
    offer: Option<RawOffer>,
    #[serde(default, deserialize_with = "lenient::list")]
    descriptions: Vec<Value>,
}

/// Lists offers page by page through `GetTradeOffers`.
pub struct OfferFetcher {
    api: Arc<ApiClient>,
    language: Option<String>,
}

impl OfferFetcher {
    pub fn new(api: Arc<ApiClient>, language: Option<String>) -> Self {
        Self { api, language }
    }

    /// Walk every page of the listing, concatenating in page order.
    pub async fn fetch(&self, query: &OfferQuery) -> Result<OfferListing, RemoteError> {
        let cutoff = query
            .historical_cutoff
            .unwrap_or_else(|| (Utc::now() + Duration::days(365)).timestamp());
        let mut listing = OfferListing::default();
        let mut cursor: u64 = 0;

        loop {
            let mut params = vec![
                ("get_sent_offers", flag(query.include_sent)),
                ("get_received_offers", flag(query.include_received)),
                ("get_descriptions", "0".to_string()),
                ("active_only", flag(query.filter == OfferFilter::ActiveOnly)),
                ("historical_only", flag(query.filter == OfferFilter::HistoricalOnly)),
                ("time_historical_cutoff", cutoff.to_string()),
                ("cursor", cursor.to_string()),
            ];
            if let Some(language) = &self.language {
                params.push(("language", language.clone()));
            }
            let params = params
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect();

            let body = self.api.econ_get("GetTradeOffers", params).await?;
            let envelope: OffersEnvelope = serde_json::from_value(body)?;
            let page = envelope
                .response
                .ok_or_else(|| RemoteError::Protocol("Malformed API response".to_string()))?;

            check_page(&page)?;
            debug!(
                cursor,
                sent = page.trade_offers_sent.len(),
                received = page.trade_offers_received.len(),
                "Fetched offer page"
            );
            listing.sent.extend(page.trade_offers_sent);
            listing.received.extend(page.trade_offers_received);

            cursor = page.next_cursor.as_ref().and_then(Value::as_u64).unwrap_or(0);
            if cursor == 0 {
                break;
            }
        }

        Ok(listing)
    }

    /// Fetch one offer by id, together with any descriptions the remote
    /// attached inline.
    pub async fn fetch_one(&self, id: &str) -> Result<(RawOffer, Vec<Value>), RemoteError> {
        let mut params = vec![("tradeofferid".to_string(), id.to_string())];
        if let Some(language) = &self.language {
            params.push(("language".to_string(), language.clone()));
        }
        let body = self.api.econ_get("GetTradeOffer", params).await?;
        let envelope: SingleOfferEnvelope = serde_json::from_value(body)?;
        let response = envelope
            .response
            .ok_or_else(|| RemoteError::Protocol("Malformed API response".to_string()))?;
        let offer = response
            .offer
            .ok_or_else(|| RemoteError::Protocol("No matching offer found".to_string()))?;
        if offer.is_malformed() {
            return Err(RemoteError::DataUnavailable);
        }
        Ok((offer, response.descriptions))
    }
}

fn flag(value: bool) -> String {
    if value { "1" } else { "0" }.to_string()
}

/// A page is unusable when it has offers and either all of them are
/// malformed or any is missing its partner.
fn check_page(page: &OffersPage) -> Result<(), RemoteError> {
    let all: Vec<&RawOffer> = page
        .trade_offers_sent
        .iter()
        .chain(page.trade_offers_received.iter())
        .collect();
    if !all.is_empty()
        && (all.iter().all(|o| o.is_malformed()) || all.iter().any(|o| o.is_severely_malformed()))
    {
        return Err(RemoteError::DataUnavailable);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Credentials;
    use crate::test_support::{offer_json, offers_page, MockTransport};
    use crate::transport::HttpResponse;
    use serde_json::json;

    fn fetcher(transport: Arc<MockTransport>) -> OfferFetcher {
        let api = ApiClient::new(
            transport,
            Credentials {
                api_key: Some("KEY".to_string()),
                ..Credentials::default()
            },
        );
        OfferFetcher::new(Arc::new(api), Some("english".to_string()))
    }

    #[tokio::test]
    async fn query_parameters() {
        let transport = Arc::new(MockTransport::always(offers_page(vec![], vec![], 0)));
        fetcher(transport.clone())
            .fetch(&OfferQuery::new(OfferFilter::ActiveOnly, Some(1_700_000_000)).sent_only())
            .await
            .unwrap();

        let request = &transport.requests()[0];
        assert_eq!(request.query_param("get_sent_offers"), Some("1"));
        assert_eq!(request.query_param("get_received_offers"), Some("0"));
        assert_eq!(request.query_param("get_descriptions"), Some("0"));
        assert_eq!(request.query_param("active_only"), Some("1"));
        assert_eq!(request.query_param("historical_only"), Some("0"));
        assert_eq!(request.query_param("time_historical_cutoff"), Some("1700000000"));
        assert_eq!(request.query_param("language"), Some("english"));
    }

    #[tokio::test]
    async fn empty_page_is_fine() {
        let transport = Arc::new(MockTransport::always(offers_page(vec![], vec![], 0)));
        let listing = fetcher(transport)
            .fetch(&OfferQuery::new(OfferFilter::All, Some(1)))
            .await
            .unwrap();
        assert_eq!(listing, OfferListing::default());
    }

    #[tokio::test]
    async fn all_malformed_page_is_unavailable() {
        let no_items = json!({"tradeofferid": "1", "accountid_other": 5, "trade_offer_state": 2});
        let transport = Arc::new(MockTransport::always(offers_page(vec![no_items], vec![], 0)));
        let err = fetcher(transport)
            .fetch(&OfferQuery::new(OfferFilter::All, Some(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::DataUnavailable));
    }

    #[tokio::test]
    async fn one_partnerless_offer_spoils_the_page() {
        let mut bad = offer_json("2", 2, true, 100);
        bad["accountid_other"] = json!(0);
        let transport = Arc::new(MockTransport::always(offers_page(
            vec![offer_json("1", 2, true, 100), bad],
            vec![],
            0,
        )));
        let err = fetcher(transport)
            .fetch(&OfferQuery::new(OfferFilter::All, Some(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::DataUnavailable));
    }

    #[tokio::test]
    async fn missing_response_is_protocol_error() {
        let transport = Arc::new(MockTransport::always(HttpResponse::ok_json(&json!({"x": 1}))));
        let err = fetcher(transport)
            .fetch(&OfferQuery::new(OfferFilter::All, Some(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Protocol(_)));
    }

    #[tokio::test]
    async fn fetch_one_variants() {
        let transport = Arc::new(MockTransport::scripted(vec![
            HttpResponse::ok_json(&json!({"response": {"offer": offer_json("5", 2, false, 100), "descriptions": [{"appid": 440, "classid": "50"}]}})),
            HttpResponse::ok_json(&json!({"response": {}})),
        ]));
        let fetcher = fetcher(transport.clone());

        let (offer, descriptions) = fetcher.fetch_one("5").await.unwrap();
        assert_eq!(offer.tradeofferid, "5");
        assert_eq!(descriptions.len(), 1);
        assert_eq!(transport.requests()[0].query_param("tradeofferid"), Some("5"));

        let err = fetcher.fetch_one("6").await.unwrap_err();
        assert_eq!(err.to_string(), "No matching offer found");
    }
}
