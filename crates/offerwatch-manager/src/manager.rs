use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use offerwatch_cache::{DescriptionCache, DescriptionMap, PayloadCodec, Persistence, SqliteStorage, Storage};
use offerwatch_models::cache_schema::key_patterns;
use offerwatch_models::{AccountId, ManagerConfig, PollState, TradeOffer};
use offerwatch_remote::{
    ApiClient, BatchDescriptionFetcher, Credentials, Endpoints, MarkupParser, OfferFetcher,
    Transport, UnconfiguredMarkupParser,
};
use tracing::{error, info, warn};

use crate::error::ManagerError;
use crate::events::{EventHub, EventSink, OfferEvent};
use crate::reconciler::CancelPolicy;
use crate::scheduler::{self, CycleClock, PollScheduler};

pub(crate) struct ManagerInner {
    pub(crate) config: ManagerConfig,
    pub(crate) account: AccountId,
    pub(crate) api: Arc<ApiClient>,
    pub(crate) offers: OfferFetcher,
    pub(crate) descriptions: BatchDescriptionFetcher,
    pub(crate) parser: Arc<dyn MarkupParser>,
    pub(crate) cache: Arc<DescriptionCache>,
    pub(crate) cache_shared: bool,
    pub(crate) persistence: Option<Persistence>,
    pub(crate) poll_state: Mutex<PollState>,
    pub(crate) events: EventHub,
    pub(crate) pending_sends: AtomicUsize,
    pub(crate) policy: CancelPolicy,
    pub(crate) clock: tokio::sync::Mutex<CycleClock>,
    pub(crate) scheduler: PollScheduler,
    started: AtomicBool,
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        self.scheduler.cancel();
        if !self.cache_shared {
            self.cache.stop_sweeper();
        }
    }
}

/// Watches one account's trade offers and drives their lifecycle.
///
/// Cheap to clone; every clone is a handle to the same manager. The poll
/// loop only holds a weak reference, so dropping the last handle stops it.
#[derive(Clone)]
pub struct OfferManager {
    pub(crate) inner: Arc<ManagerInner>,
}

/// Decrements the in-flight send counter when the send settles.
pub(crate) struct SendGuard<'a>(&'a AtomicUsize);

impl<'a> SendGuard<'a> {
    pub(crate) fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for SendGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct OfferManagerBuilder {
    account: AccountId,
    config: ManagerConfig,
    transport: Option<Arc<dyn Transport>>,
    credentials: Credentials,
    endpoints: Endpoints,
    cache: Option<Arc<DescriptionCache>>,
    storage: Option<Arc<dyn Storage>>,
    codec: Option<Arc<dyn PayloadCodec>>,
    parser: Option<Arc<dyn MarkupParser>>,
    sinks: Vec<Arc<dyn EventSink>>,
    poll_state: Option<PollState>,
}

impl OfferManagerBuilder {
    pub fn config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Use a cache owned by the caller, typically shared by several managers.
    /// Shutting this manager down leaves its sweeper running.
    pub fn shared_cache(mut self, cache: Arc<DescriptionCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Durable storage; overrides `persistence.sqlite_path`.
    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn codec(mut self, codec: Arc<dyn PayloadCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    pub fn parser(mut self, parser: Arc<dyn MarkupParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Start from this poll state instead of loading a persisted one.
    pub fn poll_state(mut self, state: PollState) -> Self {
        self.poll_state = Some(state);
        self
    }

    pub fn build(self) -> Result<OfferManager, ManagerError> {
        let mut config = self.config;
        for warning in config.sanitize() {
            warn!("{warning}");
        }

        let transport = self
            .transport
            .ok_or_else(|| ManagerError::NotConfigured("no transport".to_string()))?;

        let storage: Option<Arc<dyn Storage>> = match (self.storage, &config.persistence.sqlite_path) {
            (Some(storage), _) => Some(storage),
            (None, Some(path)) => Some(Arc::new(SqliteStorage::open(path)?)),
            (None, None) => None,
        };
        let persistence = storage.map(|storage| {
            let persistence = Persistence::new(storage);
            match self.codec {
                Some(codec) => persistence.with_codec(codec),
                None => {
                    if config.persistence.gzip_data {
                        warn!("gzip_data is set but no payload codec was supplied; storing plain JSON");
                    }
                    persistence
                }
            }
        });

        let cache_shared = self.cache.is_some();
        let cache = match self.cache {
            Some(cache) => cache,
            None => {
                let cache = DescriptionCache::from_settings(&config.cache);
                Arc::new(match &persistence {
                    Some(p) => cache.with_persistence(p.clone()),
                    None => cache,
                })
            }
        };

        let poll_state = match self.poll_state {
            Some(state) => state,
            None => load_poll_state(&config, persistence.as_ref(), self.account),
        };

        let api = Arc::new(ApiClient::new(transport, self.credentials).with_endpoints(self.endpoints));
        let offers = OfferFetcher::new(api.clone(), config.language.clone());
        let descriptions =
            BatchDescriptionFetcher::new(api.clone(), cache.clone(), config.language.clone());

        info!(
            account = %self.account,
            language = config.language.as_deref().unwrap_or("none"),
            persistent = persistence.is_some(),
            cache_shared,
            "Offer manager configured"
        );

        Ok(OfferManager {
            inner: Arc::new(ManagerInner {
                policy: CancelPolicy::from(&config),
                config,
                account: self.account,
                api,
                offers,
                descriptions,
                parser: self
                    .parser
                    .unwrap_or_else(|| Arc::new(UnconfiguredMarkupParser)),
                cache,
                cache_shared,
                persistence,
                poll_state: Mutex::new(poll_state),
                events: EventHub::new(self.sinks),
                pending_sends: AtomicUsize::new(0),
                clock: tokio::sync::Mutex::new(CycleClock::default()),
                scheduler: PollScheduler::new(),
                started: AtomicBool::new(false),
            }),
        })
    }
}

fn load_poll_state(
    config: &ManagerConfig,
    persistence: Option<&Persistence>,
    account: AccountId,
) -> PollState {
    let Some(persistence) = persistence.filter(|_| config.persistence.save_poll_data) else {
        return PollState::default();
    };
    let key = key_patterns::poll_data(account.steam_id64());
    match persistence.load_json::<PollState>(&key) {
        Ok(Some(state)) => {
            info!(
                sent = state.sent.len(),
                received = state.received.len(),
                "Loaded persisted poll data"
            );
            state
        }
        Ok(None) => PollState::default(),
        Err(e) => {
            warn!(error = %e, key, "Persisted poll data unreadable, starting fresh");
            PollState::default()
        }
    }
}

impl OfferManager {
    pub fn builder(account: AccountId) -> OfferManagerBuilder {
        OfferManagerBuilder {
            account,
            config: ManagerConfig::default(),
            transport: None,
            credentials: Credentials::default(),
            endpoints: Endpoints::default(),
            cache: None,
            storage: None,
            codec: None,
            parser: None,
            sinks: Vec::new(),
            poll_state: None,
        }
    }

    pub fn account(&self) -> AccountId {
        self.inner.account
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    pub fn cache(&self) -> &Arc<DescriptionCache> {
        &self.inner.cache
    }

    /// Start the poll loop (which polls right away) and the cache sweeper.
    /// Calling it again does nothing.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }
        if !self.inner.cache.sweeper_running() {
            self.inner.cache.start_sweeper(Duration::from_millis(
                self.inner.config.cache.sweep_interval_ms,
            ));
        }
        let weak = Arc::downgrade(&self.inner);
        let notify = self.inner.scheduler.notifier();
        let cancel = self.inner.scheduler.token();
        tokio::spawn(scheduler::poll_loop(weak, notify, cancel));
        info!(account = %self.inner.account, "Offer manager started");
    }

    /// Stop polling. Safe to call more than once.
    pub fn shutdown(&self) {
        if self.inner.scheduler.is_cancelled() {
            return;
        }
        self.inner.scheduler.cancel();
        if !self.inner.cache_shared {
            self.inner.cache.stop_sweeper();
        }
        info!(account = %self.inner.account, "Offer manager stopped");
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.scheduler.is_cancelled()
    }

    /// Snapshot of the current poll state.
    pub fn poll_state(&self) -> PollState {
        self.lock_state().clone()
    }

    /// Replace the poll state wholesale, e.g. with one the application kept.
    pub fn set_poll_state(&self, state: PollState) {
        *self.lock_state() = state.clone();
        self.commit_poll_state(state);
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, PollState> {
        match self.inner.poll_state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub(crate) fn emit(&self, event: OfferEvent) {
        self.inner.events.emit(event);
    }

    /// Persist a changed poll state and tell the sinks about it.
    pub(crate) fn commit_poll_state(&self, state: PollState) {
        self.persist_poll_state(&state);
        self.emit(OfferEvent::PollData(state));
    }

    fn persist_poll_state(&self, state: &PollState) {
        if !self.inner.config.persistence.save_poll_data {
            return;
        }
        let Some(persistence) = &self.inner.persistence else {
            return;
        };
        let key = key_patterns::poll_data(self.inner.account.steam_id64());
        if let Err(e) = persistence.save_json(&key, state) {
            error!(error = %e, key, "Failed to persist poll data");
        }
    }

    /// Report a lost session to the sinks before handing the error back.
    pub(crate) fn observe(&self, err: impl Into<ManagerError>) -> ManagerError {
        let err = err.into();
        if err.is_session_expired() {
            warn!(error = %err, "Session expired");
            self.emit(OfferEvent::SessionExpired(err.to_string()));
        }
        err
    }

    pub(crate) fn language_configured(&self) -> bool {
        self.inner.config.language_configured()
    }

    /// Build offers from remote records with their descriptions attached.
    pub(crate) fn assemble<'a>(
        raw: impl Iterator<Item = &'a offerwatch_models::RawOffer>,
        table: &DescriptionMap,
    ) -> Vec<TradeOffer> {
        raw.map(|r| TradeOffer::from_raw(r, |key| table.get(key).cloned()))
            .collect()
    }
}
