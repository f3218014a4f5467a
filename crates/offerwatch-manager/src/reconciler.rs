//! Diffing a fresh listing against the remembered poll state.
//!
//! [`diff`] is pure: it takes the previous [`PollState`], the offers just
//! fetched and the cancel policy, and returns the events to emit and the
//! cancels to run. The manager owns the I/O around it.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use offerwatch_models::poll_state::{CANCEL_TIME_KEY, PENDING_CANCEL_TIME_KEY};
use offerwatch_models::{ConfirmationMethod, ManagerConfig, OfferState, PollState, TradeOffer};
use tracing::debug;

use crate::events::{CancelReason, OfferEvent};

/// Automatic cancel thresholds, in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CancelPolicy {
    pub cancel_time_ms: Option<i64>,
    pub pending_cancel_time_ms: Option<i64>,
    pub cancel_offer_count: Option<usize>,
    pub cancel_offer_count_min_age_ms: i64,
}

impl From<&ManagerConfig> for CancelPolicy {
    fn from(config: &ManagerConfig) -> Self {
        Self {
            cancel_time_ms: config.cancel_time_ms,
            pending_cancel_time_ms: config.pending_cancel_time_ms,
            cancel_offer_count: config.cancel_offer_count,
            cancel_offer_count_min_age_ms: config.cancel_offer_count_min_age_ms,
        }
    }
}

/// Why an offer is about to be canceled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelKind {
    Stale(CancelReason),
    /// Never confirmed within the pending cancel time.
    Unconfirmed,
}

#[derive(Debug, Clone)]
pub struct CancelOrder {
    pub offer: TradeOffer,
    pub kind: CancelKind,
}

/// The offers of one cycle plus what the diff needs to know about the world.
pub struct CycleInput<'a> {
    pub sent: &'a [TradeOffer],
    pub received: &'a [TradeOffer],
    pub now: DateTime<Utc>,
    /// A send is awaiting its response, so unknown sent offers may be ours.
    pub sends_in_flight: bool,
    pub language_configured: bool,
    pub policy: &'a CancelPolicy,
}

#[derive(Debug, Default)]
pub struct DiffOutcome {
    pub events: Vec<OfferEvent>,
    pub cancels: Vec<CancelOrder>,
    /// At least one offer was skipped for missing data.
    pub glitched: bool,
}

fn needs_confirmation(offer: &TradeOffer) -> bool {
    offer.state == OfferState::CreatedNeedsConfirmation
        || (offer.state == OfferState::Active
            && offer.confirmation_method != ConfirmationMethod::None)
}

fn created_secs(offer: &TradeOffer) -> i64 {
    offer.created.map(|t| t.timestamp()).unwrap_or(0)
}

fn age_ms(since: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<i64> {
    since.map(|t| (now - t).num_milliseconds())
}

/// Apply one listing to `state` and work out what to report.
pub fn diff(state: &mut PollState, input: &CycleInput<'_>) -> DiffOutcome {
    let mut outcome = DiffOutcome::default();

    for offer in input.sent {
        let Some(id) = offer.id() else { continue };
        match state.sent.get(id).copied() {
            None if input.sends_in_flight => {
                debug!(offer_id = id, "Unknown sent offer while a send is in flight");
            }
            None => {
                if offer.from_real_time_trade {
                    if needs_confirmation(offer) {
                        outcome
                            .events
                            .push(OfferEvent::RealTimeTradeConfirmationRequired(offer.clone()));
                    } else if offer.state == OfferState::Accepted {
                        outcome
                            .events
                            .push(OfferEvent::RealTimeTradeCompleted(offer.clone()));
                    }
                }
                outcome.events.push(OfferEvent::UnknownOfferSent(offer.clone()));
                state.sent.insert(id.to_string(), offer.state);
                state.timestamps.insert(id.to_string(), created_secs(offer));
            }
            Some(old_state) if old_state != offer.state => {
                if offer.is_glitched(input.language_configured) {
                    debug!(
                        offer_id = id,
                        without_name = offer.items_without_name(),
                        "Suppressing change of glitched sent offer"
                    );
                    outcome.glitched = true;
                    continue;
                }
                if offer.from_real_time_trade && offer.state == OfferState::Accepted {
                    outcome
                        .events
                        .push(OfferEvent::RealTimeTradeCompleted(offer.clone()));
                }
                outcome.events.push(OfferEvent::SentOfferChanged {
                    offer: offer.clone(),
                    old_state,
                });
                state.sent.insert(id.to_string(), offer.state);
                state.timestamps.insert(id.to_string(), created_secs(offer));
            }
            Some(_) => {}
        }
    }

    outcome.cancels = plan_cancels(state, input.sent, input.now, input.policy);

    for offer in input.received {
        let Some(id) = offer.id() else { continue };
        if offer.is_glitched(input.language_configured) {
            debug!(
                offer_id = id,
                without_name = offer.items_without_name(),
                "Skipping glitched received offer"
            );
            outcome.glitched = true;
            continue;
        }

        let known = state.received.get(id).copied();
        if offer.from_real_time_trade {
            if known.is_none() && needs_confirmation(offer) {
                outcome
                    .events
                    .push(OfferEvent::RealTimeTradeConfirmationRequired(offer.clone()));
            } else if offer.state == OfferState::Accepted && known != Some(OfferState::Accepted) {
                outcome
                    .events
                    .push(OfferEvent::RealTimeTradeCompleted(offer.clone()));
            }
        }

        match known {
            None if offer.state == OfferState::Active => {
                outcome.events.push(OfferEvent::NewOffer(offer.clone()));
            }
            Some(old_state) if old_state != offer.state => {
                outcome.events.push(OfferEvent::ReceivedOfferChanged {
                    offer: offer.clone(),
                    old_state,
                });
            }
            _ => {}
        }
        state.received.insert(id.to_string(), offer.state);
        state.timestamps.insert(id.to_string(), created_secs(offer));
    }

    if !outcome.glitched {
        let latest = input
            .sent
            .iter()
            .chain(input.received.iter())
            .filter_map(|o| o.updated.map(|t| t.timestamp()))
            .max();
        if let Some(latest) = latest {
            state.offers_since = state.offers_since.max(latest);
        }
    }

    outcome
}

/// Decide which of our sent offers to cancel this cycle. Each offer appears
/// at most once.
pub fn plan_cancels(
    state: &PollState,
    sent: &[TradeOffer],
    now: DateTime<Utc>,
    policy: &CancelPolicy,
) -> Vec<CancelOrder> {
    let mut orders = Vec::new();
    let mut scheduled: HashSet<&str> = HashSet::new();

    for offer in sent {
        let Some(id) = offer.id() else { continue };
        let (limit, since, kind) = match offer.state {
            OfferState::Active => (
                state
                    .offer_millis(id, CANCEL_TIME_KEY)
                    .or(policy.cancel_time_ms),
                offer.updated,
                CancelKind::Stale(CancelReason::CancelTime),
            ),
            OfferState::CreatedNeedsConfirmation => (
                state
                    .offer_millis(id, PENDING_CANCEL_TIME_KEY)
                    .or(policy.pending_cancel_time_ms),
                offer.created,
                CancelKind::Unconfirmed,
            ),
            _ => continue,
        };
        let Some(limit) = limit.filter(|ms| *ms > 0) else { continue };
        if age_ms(since, now).is_some_and(|age| age >= limit) && scheduled.insert(id) {
            orders.push(CancelOrder {
                offer: offer.clone(),
                kind,
            });
        }
    }

    if let Some(cap) = policy.cancel_offer_count.filter(|cap| *cap > 0) {
        let active: Vec<&TradeOffer> = sent
            .iter()
            .filter(|o| o.state == OfferState::Active)
            .collect();
        if active.len() >= cap {
            let oldest = active
                .into_iter()
                .filter_map(|o| o.updated.map(|t| (t, o)))
                .min_by_key(|(t, _)| *t)
                .map(|(_, o)| o);
            if let Some(oldest) = oldest {
                let old_enough = age_ms(oldest.updated, now)
                    .is_some_and(|age| age >= policy.cancel_offer_count_min_age_ms);
                if let Some(id) = oldest.id().filter(|_| old_enough) {
                    if scheduled.insert(id) {
                        orders.push(CancelOrder {
                            offer: oldest.clone(),
                            kind: CancelKind::Stale(CancelReason::CancelOfferCount),
                        });
                    }
                }
            }
        }
    }

    orders
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use offerwatch_models::RawOffer;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn offer(id: &str, state: OfferState, ours: bool, age_secs: i64) -> TradeOffer {
        let updated = now().timestamp() - age_secs;
        let raw: RawOffer = serde_json::from_value(json!({
            "tradeofferid": id,
            "accountid_other": 46143802,
            "trade_offer_state": state.code(),
            "is_our_offer": ours,
            "time_created": updated,
            "time_updated": updated,
            "items_to_give": [{"appid": 440, "contextid": "2", "assetid": "1", "classid": "5", "instanceid": "0"}]
        }))
        .unwrap();
        TradeOffer::from_raw(&raw, |_| None)
    }

    fn empty(id: &str, state: OfferState) -> TradeOffer {
        let raw: RawOffer = serde_json::from_value(json!({
            "tradeofferid": id,
            "accountid_other": 46143802,
            "trade_offer_state": state.code(),
            "is_our_offer": true,
            "time_updated": now().timestamp()
        }))
        .unwrap();
        TradeOffer::from_raw(&raw, |_| None)
    }

    fn run(state: &mut PollState, sent: &[TradeOffer], received: &[TradeOffer], policy: &CancelPolicy) -> DiffOutcome {
        diff(
            state,
            &CycleInput {
                sent,
                received,
                now: now(),
                sends_in_flight: false,
                language_configured: false,
                policy,
            },
        )
    }

    #[test]
    fn state_change_emits_once() {
        let mut state = PollState::default();
        state.sent.insert("1".into(), OfferState::Active);
        let sent = vec![offer("1", OfferState::Accepted, true, 5)];

        let outcome = run(&mut state, &sent, &[], &CancelPolicy::default());
        assert_eq!(outcome.events.len(), 1);
        assert!(matches!(
            &outcome.events[0],
            OfferEvent::SentOfferChanged { old_state: OfferState::Active, offer } if offer.state == OfferState::Accepted
        ));
        assert_eq!(state.sent["1"], OfferState::Accepted);

        let again = run(&mut state, &sent, &[], &CancelPolicy::default());
        assert!(again.events.is_empty());
    }

    #[test]
    fn glitched_sent_change_is_suppressed() {
        let mut state = PollState::default();
        state.sent.insert("1".into(), OfferState::Active);
        state.offers_since = 10;

        let outcome = run(&mut state, &[empty("1", OfferState::Accepted)], &[], &CancelPolicy::default());
        assert!(outcome.events.is_empty());
        assert!(outcome.glitched);
        assert_eq!(state.sent["1"], OfferState::Active);
        assert_eq!(state.offers_since, 10);
    }

    #[test]
    fn unknown_sent_offer_is_reported_unless_sending() {
        let sent = vec![offer("7", OfferState::Active, true, 5)];

        let mut state = PollState::default();
        let outcome = diff(
            &mut state,
            &CycleInput {
                sent: &sent,
                received: &[],
                now: now(),
                sends_in_flight: true,
                language_configured: false,
                policy: &CancelPolicy::default(),
            },
        );
        assert!(outcome.events.is_empty());
        assert!(!state.sent.contains_key("7"));

        let outcome = run(&mut state, &sent, &[], &CancelPolicy::default());
        assert!(matches!(&outcome.events[..], [OfferEvent::UnknownOfferSent(_)]));
        assert_eq!(state.sent["7"], OfferState::Active);
        assert_eq!(state.timestamps["7"], now().timestamp() - 5);
    }

    #[test]
    fn real_time_events_precede_unknown_sent() {
        let mut accepted = offer("8", OfferState::Accepted, true, 5);
        accepted.from_real_time_trade = true;
        let mut state = PollState::default();

        let outcome = run(&mut state, &[accepted], &[], &CancelPolicy::default());
        let names: Vec<&str> = outcome.events.iter().map(OfferEvent::name).collect();
        assert_eq!(names, vec!["real_time_trade_completed", "unknown_offer_sent"]);
    }

    #[test]
    fn unconfirmed_real_time_offers_require_confirmation() {
        let mut pending = offer("9", OfferState::CreatedNeedsConfirmation, true, 5);
        pending.from_real_time_trade = true;
        let mut mobile = offer("10", OfferState::Active, true, 5);
        mobile.from_real_time_trade = true;
        mobile.confirmation_method = ConfirmationMethod::MobileApp;
        let mut state = PollState::default();

        let outcome = run(&mut state, &[pending, mobile], &[], &CancelPolicy::default());
        let names: Vec<&str> = outcome.events.iter().map(OfferEvent::name).collect();
        assert_eq!(
            names,
            vec![
                "real_time_trade_confirmation_required",
                "unknown_offer_sent",
                "real_time_trade_confirmation_required",
                "unknown_offer_sent",
            ]
        );

        let mut incoming = offer("11", OfferState::CreatedNeedsConfirmation, false, 5);
        incoming.from_real_time_trade = true;
        let outcome = run(&mut state, &[], &[incoming.clone()], &CancelPolicy::default());
        assert!(matches!(
            &outcome.events[..],
            [OfferEvent::RealTimeTradeConfirmationRequired(o)] if o.id() == Some("11")
        ));

        let again = run(&mut state, &[], &[incoming], &CancelPolicy::default());
        assert!(again.events.is_empty());
    }

    #[test]
    fn received_offers() {
        let mut state = PollState::default();
        state.received.insert("21".into(), OfferState::Active);
        let received = vec![
            offer("20", OfferState::Active, false, 5),
            offer("21", OfferState::Declined, false, 5),
            offer("22", OfferState::Accepted, false, 5),
            empty("23", OfferState::Active),
        ];

        let outcome = run(&mut state, &[], &received, &CancelPolicy::default());
        let names: Vec<&str> = outcome.events.iter().map(OfferEvent::name).collect();
        assert_eq!(names, vec!["new_offer", "received_offer_changed"]);
        assert_eq!(state.received["22"], OfferState::Accepted);
        assert!(!state.received.contains_key("23"));
        assert!(outcome.glitched);
    }

    #[test]
    fn high_water_mark_advances_on_clean_cycles() {
        let mut state = PollState::default();
        let sent = vec![offer("1", OfferState::Active, true, 100)];
        let received = vec![offer("2", OfferState::Active, false, 50)];
        state.sent.insert("1".into(), OfferState::Active);

        run(&mut state, &sent, &received, &CancelPolicy::default());
        assert_eq!(state.offers_since, now().timestamp() - 50);
    }

    #[test]
    fn cancel_time_threshold() {
        let state = PollState::default();
        let policy = CancelPolicy {
            cancel_time_ms: Some(60_000),
            ..CancelPolicy::default()
        };
        let sent = vec![
            offer("old", OfferState::Active, true, 61),
            offer("young", OfferState::Active, true, 59),
        ];

        let orders = plan_cancels(&state, &sent, now(), &policy);
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].offer.id(), Some("old"));
        assert_eq!(orders[0].kind, CancelKind::Stale(CancelReason::CancelTime));
    }

    #[test]
    fn per_offer_cancel_time_overrides_global() {
        let mut state = PollState::default();
        state.set_offer_data("young", CANCEL_TIME_KEY, 30_000.into());
        let policy = CancelPolicy {
            cancel_time_ms: Some(60_000),
            ..CancelPolicy::default()
        };
        let sent = vec![offer("young", OfferState::Active, true, 40)];

        let orders = plan_cancels(&state, &sent, now(), &policy);
        assert_eq!(orders.len(), 1);
    }

    #[test]
    fn pending_offers_use_creation_time() {
        let mut state = PollState::default();
        state.set_offer_data("p", PENDING_CANCEL_TIME_KEY, 10_000.into());
        let sent = vec![
            offer("p", OfferState::CreatedNeedsConfirmation, true, 11),
            offer("q", OfferState::CreatedNeedsConfirmation, true, 11),
        ];

        let orders = plan_cancels(&state, &sent, now(), &CancelPolicy::default());
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].kind, CancelKind::Unconfirmed);
        assert_eq!(orders[0].offer.id(), Some("p"));
    }

    #[test]
    fn offer_count_cancels_oldest_old_enough() {
        let state = PollState::default();
        let policy = CancelPolicy {
            cancel_offer_count: Some(3),
            cancel_offer_count_min_age_ms: 15_000,
            ..CancelPolicy::default()
        };
        let sent = vec![
            offer("a", OfferState::Active, true, 10),
            offer("b", OfferState::Active, true, 20),
            offer("c", OfferState::Active, true, 30),
        ];

        let orders = plan_cancels(&state, &sent, now(), &policy);
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].offer.id(), Some("c"));
        assert_eq!(orders[0].kind, CancelKind::Stale(CancelReason::CancelOfferCount));

        let young = vec![
            offer("a", OfferState::Active, true, 10),
            offer("b", OfferState::Active, true, 12),
            offer("c", OfferState::Active, true, 14),
        ];
        assert!(plan_cancels(&state, &young, now(), &policy).is_empty());
    }

    #[test]
    fn offer_scheduled_at_most_once() {
        let state = PollState::default();
        let policy = CancelPolicy {
            cancel_time_ms: Some(1_000),
            cancel_offer_count: Some(1),
            ..CancelPolicy::default()
        };
        let sent = vec![offer("a", OfferState::Active, true, 30)];

        let orders = plan_cancels(&state, &sent, now(), &policy);
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].kind, CancelKind::Stale(CancelReason::CancelTime));
    }

    #[test]
    fn age_is_measured_in_millis() {
        assert_eq!(age_ms(Some(now() - Duration::seconds(2)), now()), Some(2_000));
        assert_eq!(age_ms(None, now()), None);
    }
}
