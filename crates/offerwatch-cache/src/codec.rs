use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::CacheError;
use crate::storage::Storage;

/// Transform applied to every persisted payload, e.g. compression.
pub trait PayloadCodec: Send + Sync {
    /// Appended to every storage key, e.g. `.gz`.
    fn key_suffix(&self) -> &str;

    fn encode(&self, data: &[u8]) -> Result<Vec<u8>, CacheError>;

    fn decode(&self, data: &[u8]) -> Result<Vec<u8>, CacheError>;
}

/// A storage backend plus the optional codec applied to its payloads.
///
/// Callers work with logical keys (`asset_440_1_0.json`); the codec suffix
/// is added and stripped here.
#[derive(Clone)]
pub struct Persistence {
    storage: Arc<dyn Storage>,
    codec: Option<Arc<dyn PayloadCodec>>,
}

impl Persistence {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            codec: None,
        }
    }

    pub fn with_codec(mut self, codec: Arc<dyn PayloadCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    fn storage_key(&self, key: &str) -> String {
        match &self.codec {
            Some(codec) => format!("{key}{}", codec.key_suffix()),
            None => key.to_string(),
        }
    }

    fn encode(&self, data: Vec<u8>) -> Result<Vec<u8>, CacheError> {
        match &self.codec {
            Some(codec) => codec.encode(&data),
            None => Ok(data),
        }
    }

    fn decode(&self, data: Vec<u8>) -> Result<Vec<u8>, CacheError> {
        match &self.codec {
            Some(codec) => codec.decode(&data),
            None => Ok(data),
        }
    }

    pub fn save_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), CacheError> {
        let payload = self.encode(serde_json::to_vec(value)?)?;
        self.storage.write(&self.storage_key(key), &payload)
    }

    pub fn save_json_many<T: Serialize>(&self, entries: &[(String, T)]) -> Result<(), CacheError> {
        let encoded = entries
            .iter()
            .map(|(key, value)| {
                let payload = self.encode(serde_json::to_vec(value)?)?;
                Ok((self.storage_key(key), payload))
            })
            .collect::<Result<Vec<_>, CacheError>>()?;
        self.storage.write_many(&encoded)
    }

    pub fn load_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        match self.storage.read(&self.storage_key(key))? {
            Some(payload) => Ok(Some(serde_json::from_slice(&self.decode(payload)?)?)),
            None => Ok(None),
        }
    }

    /// Load several logical keys at once, returning decoded payloads keyed by
    /// logical key. Entries that fail to decode are dropped with a warning.
    pub fn load_json_many<T: DeserializeOwned>(
        &self,
        keys: &[String],
    ) -> Result<HashMap<String, T>, CacheError> {
        let storage_keys: Vec<String> = keys.iter().map(|k| self.storage_key(k)).collect();
        let mut raw = self.storage.read_many(&storage_keys)?;
        let mut loaded = HashMap::with_capacity(raw.len());
        for (key, storage_key) in keys.iter().zip(storage_keys.iter()) {
            let Some(payload) = raw.remove(storage_key) else {
                continue;
            };
            let decoded = self
                .decode(payload)
                .and_then(|bytes| serde_json::from_slice(&bytes).map_err(CacheError::from));
            match decoded {
                Ok(value) => {
                    loaded.insert(key.clone(), value);
                }
                Err(e) => tracing::warn!(key = %key, error = %e, "Dropping unreadable persisted payload"),
            }
        }
        Ok(loaded)
    }
}
