use offerwatch_models::{AccountId, RawAsset, UserDetails};

use crate::error::RemoteError;

/// Extracts structured data from community pages.
///
/// The pages embed their data in markup and inline scripts; how to read
/// them is left to the implementation.
pub trait MarkupParser: Send + Sync {
    /// Items listed on a trade receipt page.
    fn parse_receipt(&self, markup: &str) -> Result<Vec<RawAsset>, RemoteError>;

    /// Details of both parties from a trade offer page, ours first.
    fn parse_user_details(
        &self,
        markup: &str,
        me: AccountId,
        them: AccountId,
    ) -> Result<(UserDetails, UserDetails), RemoteError>;
}

/// Parser used when none is configured; every call fails.
pub struct UnconfiguredMarkupParser;

impl MarkupParser for UnconfiguredMarkupParser {
    fn parse_receipt(&self, _markup: &str) -> Result<Vec<RawAsset>, RemoteError> {
        Err(RemoteError::Parse("no markup parser configured".to_string()))
    }

    fn parse_user_details(
        &self,
        _markup: &str,
        _me: AccountId,
        _them: AccountId,
    ) -> Result<(UserDetails, UserDetails), RemoteError> {
        Err(RemoteError::Parse("no markup parser configured".to_string()))
    }
}

/// Reject receipt pages that carry an error instead of items.
pub fn check_receipt_page(markup: &str) -> Result<(), RemoteError> {
    const ERROR_DIV: &str = "<div id=\"error_msg\">";
    if let Some(start) = markup.find(ERROR_DIV) {
        let rest = &markup[start + ERROR_DIV.len()..];
        let message = rest.split('<').next().unwrap_or_default().trim();
        return Err(RemoteError::Protocol(message.to_string()));
    }
    let compact: String = markup.chars().filter(|c| !c.is_whitespace()).collect();
    if markup.len() < 100 && compact.contains("{\"success\":false}") {
        return Err(RemoteError::SessionExpired("receipt page".to_string()));
    }
    Ok(())
}
