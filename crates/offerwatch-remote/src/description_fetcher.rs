use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use offerwatch_cache::{DescriptionCache, DescriptionMap};
use offerwatch_models::{ClassKey, ItemDescription};
use serde_json::Value;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::api::{ApiClient, ECONOMY_INTERFACE};
use crate::error::RemoteError;
use crate::transport::Method;

/// Maximum classes per `GetAssetClassInfo` request.
pub const CLASSES_PER_REQUEST: usize = 100;

/// Looks up descriptions for a set of class keys with as few remote
/// requests as possible, filling the cache on the way.
pub struct BatchDescriptionFetcher {
    api: Arc<ApiClient>,
    cache: Arc<DescriptionCache>,
    language: Option<String>,
}

impl BatchDescriptionFetcher {
    pub fn new(api: Arc<ApiClient>, cache: Arc<DescriptionCache>, language: Option<String>) -> Self {
        Self {
            api,
            cache,
            language,
        }
    }

    pub fn cache(&self) -> &Arc<DescriptionCache> {
        &self.cache
    }

    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    /// Descriptions for every key, from the cache, durable storage or the
    /// remote, in that order. Everything found is also cached, but the
    /// returned map is complete even when the cache is too small to hold
    /// all of it.
    ///
    /// Chunks run concurrently and each one is kept as soon as it lands;
    /// the first failure is reported only after every chunk has settled.
    pub async fn resolve(&self, keys: &[ClassKey]) -> Result<DescriptionMap, RemoteError> {
        let Some(language) = self.language.clone() else {
            return Ok(DescriptionMap::new());
        };

        let mut resolved = self.cache.get_many(keys).await;
        let wanted: BTreeSet<ClassKey> = keys
            .iter()
            .filter(|key| !resolved.contains_key(key))
            .cloned()
            .collect();
        if wanted.is_empty() {
            return Ok(resolved);
        }

        let wanted: Vec<ClassKey> = wanted.into_iter().collect();
        match self.cache.hydrate(&wanted).await {
            Ok(hydrated) => resolved.extend(hydrated),
            Err(e) => warn!(error = %e, "Description read-back failed, fetching remotely"),
        }

        let mut by_app: BTreeMap<u32, Vec<ClassKey>> = BTreeMap::new();
        for key in wanted {
            if !resolved.contains_key(&key) {
                by_app.entry(key.appid).or_default().push(key);
            }
        }
        if by_app.is_empty() {
            return Ok(resolved);
        }

        let mut tasks = JoinSet::new();
        for (appid, app_keys) in by_app {
            for chunk in app_keys.chunks(CLASSES_PER_REQUEST) {
                let api = self.api.clone();
                let language = language.clone();
                let chunk = chunk.to_vec();
                tasks.spawn(async move { fetch_chunk(&api, appid, &language, &chunk).await });
            }
        }

        let mut first_error: Option<RemoteError> = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(descriptions)) => resolved.extend(self.store(descriptions).await),
                Ok(Err(e)) => {
                    warn!(error = %e, "Description chunk failed");
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    first_error.get_or_insert(RemoteError::Protocol(format!(
                        "Description task failed: {e}"
                    )));
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(resolved),
        }
    }

    /// Take in descriptions that arrived inline with another response.
    pub async fn absorb(&self, descriptions: Vec<Value>) -> DescriptionMap {
        if self.language.is_none() {
            return DescriptionMap::new();
        }
        let parsed = descriptions
            .into_iter()
            .filter_map(|value| ItemDescription::from_value(value).ok())
            .filter(|d| d.appid != 0 && !d.classid.is_empty())
            .collect();
        self.store(parsed).await
    }

    async fn store(&self, descriptions: Vec<ItemDescription>) -> DescriptionMap {
        let entries: Vec<_> = descriptions
            .into_iter()
            .map(|d| (d.class_key(), Arc::new(d)))
            .collect();
        self.cache.put_many(entries.clone()).await;
        entries.into_iter().collect()
    }
}

fn is_class_entry(key: &str) -> bool {
    let mut parts = key.splitn(2, '_');
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    parts.next().is_some_and(all_digits) && parts.next().map_or(true, all_digits)
}

async fn fetch_chunk(
    api: &ApiClient,
    appid: u32,
    language: &str,
    keys: &[ClassKey],
) -> Result<Vec<ItemDescription>, RemoteError> {
    let mut params = vec![
        ("appid".to_string(), appid.to_string()),
        ("language".to_string(), language.to_string()),
        ("class_count".to_string(), keys.len().to_string()),
    ];
    for (i, key) in keys.iter().enumerate() {
        params.push((format!("classid{i}"), key.classid.clone()));
        params.push((format!("instanceid{i}"), key.instanceid.clone()));
    }

    debug!(appid, count = keys.len(), "Requesting class info");
    let body = api
        .call(Method::Get, ECONOMY_INTERFACE, "GetAssetClassInfo", 1, params)
        .await?;

    let result = body
        .get("result")
        .and_then(Value::as_object)
        .filter(|r| r.get("success").is_some_and(truthy))
        .ok_or_else(|| RemoteError::Protocol("Invalid API response".to_string()))?;

    let mut descriptions = Vec::new();
    for (entry_key, value) in result {
        if !is_class_entry(entry_key) {
            continue;
        }
        let mut value = value.clone();
        let Some(object) = value.as_object_mut() else {
            continue;
        };
        object.insert("appid".to_string(), Value::from(appid));
        if !object.contains_key("instanceid") {
            let instanceid = entry_key.split_once('_').map_or("0", |(_, i)| i);
            object.insert("instanceid".to_string(), Value::from(instanceid));
        }
        match ItemDescription::from_value(value) {
            Ok(description) => descriptions.push(description),
            Err(e) => warn!(appid, entry = %entry_key, error = %e, "Skipping unreadable description"),
        }
    }
    Ok(descriptions)
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty() && s != "0",
        _ => false,
    }
}
