//! Poll scheduling and the poll cycle itself.
//!
//! One loop task per manager waits on the timer, a [`Notify`] permit, or
//! cancellation. `Notify` stores at most one permit, so any number of
//! requests made during a cycle collapse into a single follow-up run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use offerwatch_models::{ClassKey, OfferFilter};
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ManagerError;
use crate::events::OfferEvent;
use crate::manager::{ManagerInner, OfferManager};
use crate::reconciler::{self, CancelKind, CancelOrder, CycleInput};

/// Incremental polls re-list offers updated this long before the high-water
/// mark, to absorb clock skew on the remote.
pub const HISTORICAL_OVERLAP_SECS: i64 = 1800;

/// When the last cycle and the last full sweep started.
#[derive(Debug, Default)]
pub(crate) struct CycleClock {
    last_start: Option<Instant>,
    last_full: Option<Instant>,
}

pub(crate) struct PollScheduler {
    notify: Arc<Notify>,
    full_requested: AtomicBool,
    cancel: CancellationToken,
}

impl PollScheduler {
    pub(crate) fn new() -> Self {
        Self {
            notify: Arc::new(Notify::new()),
            full_requested: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    pub(crate) fn notifier(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    pub(crate) fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn request(&self, full: bool) {
        if full {
            self.full_requested.store(true, Ordering::SeqCst);
        }
        self.notify.notify_one();
    }

    fn take_full(&self) -> bool {
        self.full_requested.swap(false, Ordering::SeqCst)
    }
}

/// What a scheduled attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PollAttempt {
    Ran,
    /// Too soon after the previous start; try again after this long.
    Deferred(Duration),
}

/// Summary of one successful cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub full: bool,
    pub sent: usize,
    pub received: usize,
    pub events: usize,
    pub cancels: usize,
    pub glitched: bool,
    pub state_changed: bool,
}

pub(crate) async fn poll_loop(
    inner: Weak<ManagerInner>,
    notify: Arc<Notify>,
    cancel: CancellationToken,
) {
    let mut wait = Some(Duration::ZERO);
    loop {
        let timer = async {
            match wait {
                Some(delay) => tokio::time::sleep(delay).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = notify.notified() => {}
            _ = timer => {}
        }

        let Some(inner) = inner.upgrade() else { break };
        let manager = OfferManager { inner };
        let attempt = tokio::select! {
            _ = cancel.cancelled() => break,
            attempt = manager.poll_if_due() => attempt,
        };
        wait = match attempt {
            PollAttempt::Deferred(remaining) => Some(remaining),
            PollAttempt::Ran => manager.regular_interval(),
        };
    }
    debug!("Poll loop shutting down");
}

impl OfferManager {
    /// Ask for a cycle as soon as the minimum spacing allows. `full` forces
    /// the next cycle to re-list every offer.
    pub fn request_poll(&self, full: bool) {
        self.inner.scheduler.request(full);
    }

    fn regular_interval(&self) -> Option<Duration> {
        let interval = self.inner.config.poll_interval_ms;
        (interval >= 0).then(|| Duration::from_millis(interval as u64))
    }

    async fn poll_if_due(&self) -> PollAttempt {
        let minimum = Duration::from_millis(self.inner.config.minimum_poll_interval_ms.max(0) as u64);
        {
            let clock = self.inner.clock.lock().await;
            if let Some(last) = clock.last_start {
                let elapsed = last.elapsed();
                if elapsed < minimum {
                    debug!(remaining_ms = (minimum - elapsed).as_millis() as u64, "Poll deferred");
                    return PollAttempt::Deferred(minimum - elapsed);
                }
            }
        }
        let full = self.inner.scheduler.take_full();
        // Failures are already reported as events.
        let _ = self.poll(full).await;
        PollAttempt::Ran
    }

    /// Run one cycle now, waiting for any cycle already in progress.
    ///
    /// The cycle is a full sweep when `force_full` is set or the full update
    /// interval has elapsed. Failures are also reported as
    /// [`OfferEvent::PollFailure`].
    pub async fn poll(&self, force_full: bool) -> Result<CycleReport, Arc<ManagerError>> {
        let mut clock = self.inner.clock.lock().await;
        let started = Instant::now();
        let full_interval =
            Duration::from_millis(self.inner.config.poll_full_update_interval_ms.max(0) as u64);
        let full = force_full || clock.last_full.map_or(true, |t| t.elapsed() >= full_interval);
        clock.last_start = Some(started);
        if full {
            clock.last_full = Some(started);
        }

        let result = self.run_cycle(full).await;
        drop(clock);
        result.map_err(|e| {
            let e = Arc::new(e);
            warn!(error = %e, full, "Poll cycle failed");
            self.emit(OfferEvent::PollFailure(e.clone()));
            e
        })
    }

    async fn run_cycle(&self, full: bool) -> Result<CycleReport, ManagerError> {
        let offers_since = self.lock_state().offers_since;
        let (filter, cutoff) = if full {
            (OfferFilter::All, 1)
        } else if offers_since > 0 {
            (OfferFilter::ActiveOnly, offers_since - HISTORICAL_OVERLAP_SECS)
        } else {
            (OfferFilter::ActiveOnly, 0)
        };
        debug!(full, cutoff, "Starting poll cycle");

        let (sent, received) = self.get_offers(filter, Some(cutoff)).await?;

        let sends_in_flight = self.inner.pending_sends.load(Ordering::SeqCst) > 0;
        let (outcome, changed) = {
            let mut state = self.lock_state();
            let before = state.clone();
            let outcome = reconciler::diff(
                &mut state,
                &CycleInput {
                    sent: &sent,
                    received: &received,
                    now: Utc::now(),
                    sends_in_flight,
                    language_configured: self.language_configured(),
                    policy: &self.inner.policy,
                },
            );
            let changed = (*state != before).then(|| state.clone());
            (outcome, changed)
        };

        let report = CycleReport {
            full,
            sent: sent.len(),
            received: received.len(),
            events: outcome.events.len(),
            cancels: outcome.cancels.len(),
            glitched: outcome.glitched,
            state_changed: changed.is_some(),
        };

        for event in outcome.events {
            self.emit(event);
        }
        for order in outcome.cancels {
            self.spawn_cancel(order);
        }
        if let Some(state) = changed {
            self.commit_poll_state(state);
        }
        self.emit(OfferEvent::PollSuccess);

        info!(
            full = report.full,
            sent = report.sent,
            received = report.received,
            events = report.events,
            cancels = report.cancels,
            glitched = report.glitched,
            "Poll cycle complete"
        );
        Ok(report)
    }

    fn spawn_cancel(&self, order: CancelOrder) {
        let manager = self.clone();
        let shutdown = self.inner.scheduler.token();
        tokio::spawn(async move {
            let CancelOrder { mut offer, kind } = order;
            let id = offer.id().unwrap_or_default().to_string();
            let result = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    debug!(offer_id = %id, "Manager shut down; skipping automatic cancel");
                    return;
                }
                result = manager.cancel(&mut offer) => result,
            };
            match result {
                Ok(()) => {
                    info!(offer_id = %id, kind = ?kind, "Automatically canceled offer");
                    manager.emit(match kind {
                        CancelKind::Stale(reason) => OfferEvent::SentOfferCanceled { offer, reason },
                        CancelKind::Unconfirmed => OfferEvent::SentPendingOfferCanceled(offer),
                    });
                }
                Err(e) => warn!(offer_id = %id, error = %e, "Automatic cancel failed"),
            }
        });
    }

    /// Every class key referenced by a set of offers.
    pub(crate) fn keys_of<'a>(
        raw: impl Iterator<Item = &'a offerwatch_models::RawOffer>,
    ) -> Vec<ClassKey> {
        raw.flat_map(|offer| offer.assets().map(|asset| asset.class_key()))
            .collect()
    }
}
