pub mod cache_schema;
pub mod config;
pub mod error;
pub mod exchange;
pub mod item;
pub mod lenient;
pub mod offer_state;
pub mod poll_state;
pub mod raw_offer;
pub mod trade_offer;

pub use config::{CacheSettings, ManagerConfig, PersistenceConfig};
pub use error::ValidationError;
pub use exchange::{ExchangeDetails, UserDetails};
pub use item::{ClassKey, ItemDescription, ItemRef, ItemTag, OfferItem};
pub use offer_state::{ConfirmationMethod, OfferFilter, OfferState, TradeStatus};
pub use poll_state::{OfferData, OfferDataValue, PollState};
pub use raw_offer::{RawAsset, RawOffer};
pub use trade_offer::{AcceptOutcome, AccountId, SendOutcome, TradeOffer};
