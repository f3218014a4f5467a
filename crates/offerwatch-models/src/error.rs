use thiserror::Error;

use crate::offer_state::OfferState;

/// An operation was invoked on an offer in a state that does not allow it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Cannot {0} an already-sent offer")]
    AlreadySent(&'static str),

    #[error("Cannot {0} an unsent offer")]
    NotSent(&'static str),

    #[error("Offer #{id} is {state}, so it may not be {action}")]
    InvalidState {
        id: String,
        state: OfferState,
        action: &'static str,
    },

    #[error("Cannot accept our own offer #{0}")]
    OwnOffer(String),

    #[error("Cannot {action} for offer #{id} as we did not send it")]
    NotOurOffer { id: String, action: &'static str },

    #[error("Cannot send an empty trade offer")]
    EmptyOffer,

    #[error("Offer #{0} is accepted, but does not have a trade ID")]
    MissingTradeId(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
