use std::sync::Arc;

use offerwatch_models::{OfferFilter, OfferState, PollState, TradeOffer};
use tokio::sync::mpsc;

use crate::error::ManagerError;

/// Which policy triggered an automatic cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    CancelTime,
    CancelOfferCount,
}

/// Everything the manager reports to the application.
#[derive(Debug, Clone)]
pub enum OfferEvent {
    /// A received offer we had never seen, in Active state.
    NewOffer(TradeOffer),
    SentOfferChanged {
        offer: TradeOffer,
        old_state: OfferState,
    },
    ReceivedOfferChanged {
        offer: TradeOffer,
        old_state: OfferState,
    },
    SentOfferCanceled {
        offer: TradeOffer,
        reason: CancelReason,
    },
    /// Canceled because it sat unconfirmed past the pending cancel time.
    SentPendingOfferCanceled(TradeOffer),
    /// A sent offer that was not created through this manager.
    UnknownOfferSent(TradeOffer),
    RealTimeTradeConfirmationRequired(TradeOffer),
    RealTimeTradeCompleted(TradeOffer),
    /// A cycle failed; the poll state was left untouched.
    PollFailure(Arc<ManagerError>),
    PollSuccess,
    /// The poll state changed; persist it if you keep it yourself.
    PollData(PollState),
    OfferList {
        filter: OfferFilter,
        sent: Vec<TradeOffer>,
        received: Vec<TradeOffer>,
    },
    /// The remote no longer accepts our session; log in again.
    SessionExpired(String),
}

impl OfferEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::NewOffer(_) => "new_offer",
            Self::SentOfferChanged { .. } => "sent_offer_changed",
            Self::ReceivedOfferChanged { .. } => "received_offer_changed",
            Self::SentOfferCanceled { .. } => "sent_offer_canceled",
            Self::SentPendingOfferCanceled(_) => "sent_pending_offer_canceled",
            Self::UnknownOfferSent(_) => "unknown_offer_sent",
            Self::RealTimeTradeConfirmationRequired(_) => "real_time_trade_confirmation_required",
            Self::RealTimeTradeCompleted(_) => "real_time_trade_completed",
            Self::PollFailure(_) => "poll_failure",
            Self::PollSuccess => "poll_success",
            Self::PollData(_) => "poll_data",
            Self::OfferList { .. } => "offer_list",
            Self::SessionExpired(_) => "session_expired",
        }
    }

    /// The offer the event is about, if any.
    pub fn offer(&self) -> Option<&TradeOffer> {
        match self {
            Self::NewOffer(offer)
            | Self::SentPendingOfferCanceled(offer)
            | Self::UnknownOfferSent(offer)
            | Self::RealTimeTradeConfirmationRequired(offer)
            | Self::RealTimeTradeCompleted(offer)
            | Self::SentOfferChanged { offer, .. }
            | Self::ReceivedOfferChanged { offer, .. }
            | Self::SentOfferCanceled { offer, .. } => Some(offer),
            _ => None,
        }
    }
}

/// Receives manager events. Delivery is synchronous, in emission order.
pub trait EventSink: Send + Sync {
    fn deliver(&self, event: &OfferEvent);
}

impl EventSink for mpsc::UnboundedSender<OfferEvent> {
    fn deliver(&self, event: &OfferEvent) {
        // A closed receiver just means nobody is listening any more.
        let _ = self.send(event.clone());
    }
}

/// Adapts a closure into a sink.
pub struct FnSink<F>(pub F);

impl<F> EventSink for FnSink<F>
where
    F: Fn(&OfferEvent) + Send + Sync,
{
    fn deliver(&self, event: &OfferEvent) {
        (self.0)(event)
    }
}

/// Fan-out to every registered sink.
#[derive(Clone, Default)]
pub struct EventHub {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl EventHub {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }

    pub fn emit(&self, event: OfferEvent) {
        tracing::trace!(event = event.name(), sinks = self.sinks.len(), "Emitting event");
        for sink in &self.sinks {
            sink.deliver(&event);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}
