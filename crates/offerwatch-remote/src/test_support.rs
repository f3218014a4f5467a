//! Test support: scripted transports and an in-memory offer service.
//!
//! `MockTransport` answers every request through a closure and records what
//! it saw. `FakeOfferService` goes further and keeps a small offer book, so
//! poll cycles and offer operations can run end to end without a network.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::TransportError;
use crate::transport::{HttpRequest, HttpResponse, Transport};

type Handler = Box<dyn Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync>;

/// A transport that answers through a closure and records every request.
pub struct MockTransport {
    handler: Handler,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Same response for every request.
    pub fn always(response: HttpResponse) -> Self {
        Self::new(move |_| Ok(response.clone()))
    }

    /// Responses handed out in order; requests past the end fail.
    pub fn scripted(responses: Vec<HttpResponse>) -> Self {
        let queue = Mutex::new(VecDeque::from(responses));
        Self::new(move |_| {
            queue
                .lock()
                .ok()
                .and_then(|mut q| q.pop_front())
                .ok_or_else(|| TransportError("script exhausted".to_string()))
        })
    }

    pub fn failing(message: &str) -> Self {
        let message = message.to_string();
        Self::new(move |_| Err(TransportError(message.clone())))
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or_default()
    }

    /// Requests whose URL contains `fragment`.
    pub fn requests_to(&self, fragment: &str) -> Vec<HttpRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.url.contains(fragment))
            .collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn request(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let response = (self.handler)(&request);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        response
    }
}

/// A listing record with one item on our side of class `{id}0`.
pub fn offer_json(id: &str, state: u8, is_our_offer: bool, time_updated: i64) -> Value {
    json!({
        "tradeofferid": id,
        "accountid_other": 46143802,
        "message": "",
        "expiration_time": time_updated + 1_209_600,
        "trade_offer_state": state,
        "items_to_give": [
            {"appid": 440, "contextid": "2", "assetid": format!("{id}00"), "classid": format!("{id}0"), "instanceid": "0", "amount": 1}
        ],
        "is_our_offer": is_our_offer,
        "time_created": time_updated,
        "time_updated": time_updated,
        "from_real_time_trade": false,
        "escrow_end_date": 0,
        "confirmation_method": 0
    })
}

/// One `GetTradeOffers` page.
pub fn offers_page(sent: Vec<Value>, received: Vec<Value>, next_cursor: u64) -> HttpResponse {
    HttpResponse::ok_json(&json!({
        "response": {
            "trade_offers_sent": sent,
            "trade_offers_received": received,
            "next_cursor": next_cursor
        }
    }))
}

/// A successful `GetAssetClassInfo` answer naming every requested class.
pub fn class_info_for(request: &HttpRequest) -> HttpResponse {
    let count: usize = request
        .query_param("class_count")
        .and_then(|c| c.parse().ok())
        .unwrap_or(0);
    let mut result = serde_json::Map::new();
    result.insert("success".to_string(), json!(true));
    for i in 0..count {
        let classid = request.query_param(&format!("classid{i}")).unwrap_or("0");
        let instanceid = request.query_param(&format!("instanceid{i}")).unwrap_or("0");
        result.insert(
            format!("{classid}_{instanceid}"),
            json!({
                "classid": classid,
                "instanceid": instanceid,
                "name": format!("Item {classid}"),
                "market_hash_name": format!("Item {classid}"),
                "tradable": 1
            }),
        );
    }
    HttpResponse::ok_json(&json!({ "result": result }))
}

#[derive(Default)]
struct OfferBook {
    sent: Vec<Value>,
    received: Vec<Value>,
    requests: Vec<HttpRequest>,
    next_id: u64,
    listing_failure: Option<HttpResponse>,
    send_response: Option<Value>,
    receipt: Option<String>,
    trade_status: Option<Value>,
}

impl OfferBook {
    fn find_mut(&mut self, id: &str) -> Option<&mut Value> {
        self.sent
            .iter_mut()
            .chain(self.received.iter_mut())
            .find(|o| o["tradeofferid"] == id)
    }
}

/// An in-memory stand-in for the remote offer service.
///
/// Listing returns every stored offer in a single page, ignoring the
/// activity filter. Community actions update the stored records the way the
/// real service would.
pub struct FakeOfferService {
    book: Mutex<OfferBook>,
}

impl Default for FakeOfferService {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeOfferService {
    pub fn new() -> Self {
        Self {
            book: Mutex::new(OfferBook {
                next_id: 9000,
                ..OfferBook::default()
            }),
        }
    }

    fn with_book<R>(&self, f: impl FnOnce(&mut OfferBook) -> R) -> R {
        let mut book = match self.book.lock() {
            Ok(book) => book,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut book)
    }

    pub fn set_sent(&self, offers: Vec<Value>) {
        self.with_book(|b| b.sent = offers);
    }

    pub fn set_received(&self, offers: Vec<Value>) {
        self.with_book(|b| b.received = offers);
    }

    /// Overwrite one field of a stored offer.
    pub fn patch(&self, id: &str, field: &str, value: Value) {
        self.with_book(|b| {
            if let Some(offer) = b.find_mut(id) {
                offer[field] = value;
            }
        });
    }

    /// Make every listing request answer with `response` (or restore).
    pub fn fail_listing_with(&self, response: Option<HttpResponse>) {
        self.with_book(|b| b.listing_failure = response);
    }

    /// Body returned by the next sends instead of a plain new id.
    pub fn set_send_response(&self, body: Value) {
        self.with_book(|b| b.send_response = Some(body));
    }

    pub fn set_receipt(&self, markup: &str) {
        self.with_book(|b| b.receipt = Some(markup.to_string()));
    }

    pub fn set_trade_status(&self, trade: Value) {
        self.with_book(|b| b.trade_status = Some(trade));
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.with_book(|b| b.requests.clone())
    }

    pub fn requests_to(&self, fragment: &str) -> Vec<HttpRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.url.contains(fragment))
            .collect()
    }

    pub fn state_of(&self, id: &str) -> Option<u64> {
        self.with_book(|b| b.find_mut(id).and_then(|o| o["trade_offer_state"].as_u64()))
    }

    fn handle(book: &mut OfferBook, request: &HttpRequest) -> HttpResponse {
        let url = request.url.as_str();
        if url.contains("/GetTradeOffers/") {
            if let Some(failure) = &book.listing_failure {
                return failure.clone();
            }
            let sent = if request.query_param("get_sent_offers") == Some("1") {
                book.sent.clone()
            } else {
                Vec::new()
            };
            let received = if request.query_param("get_received_offers") == Some("1") {
                book.received.clone()
            } else {
                Vec::new()
            };
            return offers_page(sent, received, 0);
        }
        if url.contains("/GetAssetClassInfo/") {
            return class_info_for(request);
        }
        if url.contains("/GetTradeOffer/") {
            let id = request.query_param("tradeofferid").unwrap_or_default();
            return match book.find_mut(id) {
                Some(offer) => HttpResponse::ok_json(&json!({
                    "response": {"offer": offer.clone(), "descriptions": []}
                })),
                None => HttpResponse::ok_json(&json!({"response": {}})),
            };
        }
        if url.contains("/GetTradeStatus/") {
            let trades: Vec<Value> = book.trade_status.iter().cloned().collect();
            return HttpResponse::ok_json(&json!({"response": {"trades": trades}}));
        }
        if url.ends_with("/tradeoffer/new/send") {
            if let Some(body) = &book.send_response {
                return HttpResponse::ok_json(body);
            }
            book.next_id += 1;
            return HttpResponse::ok_json(&json!({"tradeofferid": book.next_id.to_string()}));
        }
        if url.contains("/receipt/") {
            return match &book.receipt {
                Some(markup) => HttpResponse::new(200, markup.clone()),
                None => HttpResponse::new(404, ""),
            };
        }
        if let Some(rest) = url.split("/tradeoffer/").nth(1) {
            let mut parts = rest.split('/');
            let id = parts.next().unwrap_or_default().to_string();
            let action = parts.next().unwrap_or_default();
            let (state, reply) = match action {
                "cancel" => (6, json!({"tradeofferid": id})),
                "decline" => (7, json!({"tradeofferid": id})),
                "accept" => (3, json!({"tradeid": format!("{id}77")})),
                _ => return HttpResponse::new(404, ""),
            };
            let Some(offer) = book.find_mut(&id) else {
                return HttpResponse::ok_json(&json!({"strError": "There was an error accepting this trade offer. (25)"}));
            };
            offer["trade_offer_state"] = json!(state);
            if action == "accept" {
                offer["tradeid"] = json!(format!("{id}77"));
            }
            return HttpResponse::ok_json(&reply);
        }
        HttpResponse::new(404, "")
    }
}

#[async_trait]
impl Transport for FakeOfferService {
    async fn request(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        Ok(self.with_book(|book| {
            let response = Self::handle(book, &request);
            book.requests.push(request);
            response
        }))
    }
}
