use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a sent trade offer, as reported by the remote service.
///
/// Serialized as the remote's numeric code so persisted poll data stays
/// compatible with the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum OfferState {
    Invalid = 1,
    Active = 2,
    Accepted = 3,
    Countered = 4,
    Expired = 5,
    Canceled = 6,
    Declined = 7,
    InvalidItems = 8,
    CreatedNeedsConfirmation = 9,
    CanceledBySecondFactor = 10,
    InEscrow = 11,
}

impl OfferState {
    /// States from which an offer can still be canceled or declined.
    pub fn is_cancelable(self) -> bool {
        matches!(self, Self::Active | Self::CreatedNeedsConfirmation)
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for OfferState {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => Self::Invalid,
            2 => Self::Active,
            3 => Self::Accepted,
            4 => Self::Countered,
            5 => Self::Expired,
            6 => Self::Canceled,
            7 => Self::Declined,
            8 => Self::InvalidItems,
            9 => Self::CreatedNeedsConfirmation,
            10 => Self::CanceledBySecondFactor,
            11 => Self::InEscrow,
            other => return Err(format!("unknown trade offer state {other}")),
        })
    }
}

impl From<OfferState> for u8 {
    fn from(state: OfferState) -> Self {
        state.code()
    }
}

impl fmt::Display for OfferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// How the creator of an offer must confirm it before it becomes active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ConfirmationMethod {
    #[default]
    None = 0,
    Email = 1,
    MobileApp = 2,
}

impl TryFrom<u8> for ConfirmationMethod {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Email),
            2 => Ok(Self::MobileApp),
            other => Err(format!("unknown confirmation method {other}")),
        }
    }
}

impl From<ConfirmationMethod> for u8 {
    fn from(method: ConfirmationMethod) -> Self {
        method as u8
    }
}

/// Activity filter applied when listing offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferFilter {
    ActiveOnly = 1,
    HistoricalOnly = 2,
    All = 3,
}

/// Settlement status of the exchange behind an accepted offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum TradeStatus {
    Init = 0,
    PreCommitted = 1,
    Committed = 2,
    Complete = 3,
    Failed = 4,
    PartialSupportRollback = 5,
    FullSupportRollback = 6,
    SupportRollbackSelective = 7,
    RollbackFailed = 8,
    RollbackAbandoned = 9,
    InEscrow = 10,
    EscrowRollback = 11,
}

impl TradeStatus {
    /// Statuses for which the exchanged assets are meaningful.
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Complete | Self::InEscrow | Self::EscrowRollback)
    }
}

impl TryFrom<u8> for TradeStatus {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Init,
            1 => Self::PreCommitted,
            2 => Self::Committed,
            3 => Self::Complete,
            4 => Self::Failed,
            5 => Self::PartialSupportRollback,
            6 => Self::FullSupportRollback,
            7 => Self::SupportRollbackSelective,
            8 => Self::RollbackFailed,
            9 => Self::RollbackAbandoned,
            10 => Self::InEscrow,
            11 => Self::EscrowRollback,
            other => return Err(format!("unknown trade status {other}")),
        })
    }
}

impl From<TradeStatus> for u8 {
    fn from(status: TradeStatus) -> Self {
        status as u8
    }
}
