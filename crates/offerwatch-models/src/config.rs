use serde::{Deserialize, Serialize};

/// Floor applied to every interval by [`ManagerConfig::sanitize`].
pub const MIN_INTERVAL_MS: i64 = 1000;

/// Top-level configuration for one offer manager.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ManagerConfig {
    /// Delay between poll cycles. Negative disables the timer; polls then
    /// only happen on request.
    pub poll_interval_ms: i64,
    /// Lower bound on the spacing between two cycle starts.
    pub minimum_poll_interval_ms: i64,
    /// How often a cycle re-lists every offer instead of only active ones.
    pub poll_full_update_interval_ms: i64,
    /// Cancel our Active offers not updated for this long.
    pub cancel_time_ms: Option<i64>,
    /// Cancel our offers still awaiting confirmation after this long.
    pub pending_cancel_time_ms: Option<i64>,
    /// Cap on simultaneously Active sent offers.
    pub cancel_offer_count: Option<usize>,
    pub cancel_offer_count_min_age_ms: i64,
    /// Description language. Without it item descriptions are never fetched.
    pub language: Option<String>,
    pub cache: CacheSettings,
    pub persistence: PersistenceConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 30_000,
            minimum_poll_interval_ms: 1_000,
            poll_full_update_interval_ms: 120_000,
            cancel_time_ms: None,
            pending_cancel_time_ms: None,
            cancel_offer_count: None,
            cancel_offer_count_min_age_ms: 0,
            language: None,
            cache: CacheSettings::default(),
            persistence: PersistenceConfig::default(),
        }
    }
}

/// Configuration for the item description cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheSettings {
    pub max_items: u64,
    pub sweep_interval_ms: u64,
    /// Whether one cache instance serves every manager in the process.
    pub shared: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_items: 500,
            sweep_interval_ms: 120_000,
            shared: false,
        }
    }
}

/// Durable storage for poll data and descriptions. No path, no persistence.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PersistenceConfig {
    pub sqlite_path: Option<String>,
    pub save_poll_data: bool,
    pub gzip_data: bool,
}

fn clamp(name: &str, value: &mut i64, warnings: &mut Vec<String>) {
    if *value < MIN_INTERVAL_MS {
        warnings.push(format!(
            "{name} of {value} ms is below the {MIN_INTERVAL_MS} ms floor; using {MIN_INTERVAL_MS}"
        ));
        *value = MIN_INTERVAL_MS;
    }
}

impl ManagerConfig {
    /// Clamp intervals to sane values and normalize the language code.
    /// Returns one warning per adjustment.
    pub fn sanitize(&mut self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.poll_interval_ms >= 0 {
            clamp("poll_interval_ms", &mut self.poll_interval_ms, &mut warnings);
        }
        clamp(
            "minimum_poll_interval_ms",
            &mut self.minimum_poll_interval_ms,
            &mut warnings,
        );
        clamp(
            "poll_full_update_interval_ms",
            &mut self.poll_full_update_interval_ms,
            &mut warnings,
        );
        if self.cache.sweep_interval_ms < MIN_INTERVAL_MS as u64 {
            warnings.push(format!(
                "cache.sweep_interval_ms of {} ms is below the {MIN_INTERVAL_MS} ms floor; using {MIN_INTERVAL_MS}",
                self.cache.sweep_interval_ms
            ));
            self.cache.sweep_interval_ms = MIN_INTERVAL_MS as u64;
        }
        self.language = self.language.take().map(|lang| normalize_language(&lang));
        warnings
    }

    pub fn polling_enabled(&self) -> bool {
        self.poll_interval_ms >= 0
    }

    pub fn language_configured(&self) -> bool {
        self.language.is_some()
    }
}

/// Expand the short language codes the remote does not understand.
pub fn normalize_language(code: &str) -> String {
    match code {
        "szh" => "schinese",
        "tzh" => "tchinese",
        "br" => "brazilian",
        other => other,
    }
    .to_string()
}
