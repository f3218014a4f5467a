pub mod error;
pub mod events;
pub mod manager;
pub mod offer_ops;
pub mod reconciler;
pub mod scheduler;

pub use error::ManagerError;
pub use events::{CancelReason, EventHub, EventSink, FnSink, OfferEvent};
pub use manager::{OfferManager, OfferManagerBuilder};
pub use reconciler::{CancelPolicy, DiffOutcome};
pub use scheduler::{CycleReport, HISTORICAL_OVERLAP_SECS};
