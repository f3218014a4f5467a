/// Table holding every persisted payload: item descriptions and poll data.
///
/// ```sql
/// CREATE TABLE IF NOT EXISTS blobs (
///     key         TEXT PRIMARY KEY,
///     payload     BLOB NOT NULL,
///     updated_at  TEXT NOT NULL
/// );
/// ```
pub const BLOB_TABLE_DDL: &str = "\
CREATE TABLE IF NOT EXISTS blobs (
    key         TEXT PRIMARY KEY,
    payload     BLOB NOT NULL,
    updated_at  TEXT NOT NULL
);
";

/// Key conventions for persisted payloads.
///
/// - Item descriptions: `asset_{appid}_{classid}_{instanceid}.json`
/// - Poll state: `polldata_{steamid64}.json`
pub mod key_patterns {
    use crate::item::ClassKey;

    pub fn asset(key: &ClassKey) -> String {
        format!("asset_{key}.json")
    }

    pub fn poll_data(steam_id64: u64) -> String {
        format!("polldata_{steam_id64}.json")
    }

    /// Reverse of [`asset`], ignoring any codec suffix after `.json`.
    pub fn parse_asset(name: &str) -> Option<ClassKey> {
        let rest = name.strip_prefix("asset_")?;
        let (stem, _) = rest.split_once(".json")?;
        stem.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::ClassKey;

    #[test]
    fn key_pattern_asset() {
        let key = ClassKey::new(440, "101", None);
        assert_eq!(key_patterns::asset(&key), "asset_440_101_0.json");
    }

    #[test]
    fn key_pattern_poll_data() {
        assert_eq!(
            key_patterns::poll_data(76561197960265729),
            "polldata_76561197960265729.json"
        );
    }

    #[test]
    fn asset_key_parses_back() {
        let key = ClassKey::new(730, "5", Some("9"));
        assert_eq!(key_patterns::parse_asset("asset_730_5_9.json.gz"), Some(key));
        assert_eq!(key_patterns::parse_asset("polldata_1.json"), None);
    }
}
