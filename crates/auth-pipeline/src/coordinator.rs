//! Renewal coordinator: single-flight renewal with a cooldown window
//!
//! One coordinator exists per credential store. It owns the renewal state
//! machine and is the only component that calls the renewal endpoint.
//!
//! Transitions:
//! - Idle → Refreshing (first caller; starts the network call)
//! - Refreshing → CoolingDown { renewed: true } (success; new pair stored)
//! - Refreshing → CoolingDown { renewed: false } (failure; pair cleared)
//! - Refreshing → CoolingDown { renewed: false } (session changed meanwhile;
//!   store untouched, waiters told the outcome is superseded)
//! - CoolingDown → Idle (5 seconds after the attempt *started*)
//!
//! Callers arriving while Refreshing queue up as waiters and are released in
//! arrival order with the single shared outcome. The network call runs on its
//! own task, so a caller dropping its future never strands the queue.
//!
//! The state check and the state write happen under one lock with no I/O in
//! between: exactly one caller can observe Idle and start a renewal.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use common::Secret;
use session_auth::CredentialStore;
use tokio::sync::{Mutex, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use transport::Transport;

use crate::error::RenewalError;
use crate::metrics;

/// Minimum time between the starts of two renewal attempts.
pub const COOLDOWN_WINDOW: Duration = Duration::from_secs(5);

/// Who asked for the renewal. Only affects logging and what a caller gets
/// back while a just-succeeded renewal is cooling down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalTrigger {
    /// Outbound stage, access token near expiry.
    Proactive,
    /// Inbound stage, a call came back 401.
    Reactive,
}

impl RenewalTrigger {
    fn label(self) -> &'static str {
        match self {
            RenewalTrigger::Proactive => "proactive",
            RenewalTrigger::Reactive => "reactive",
        }
    }
}

/// A credential handed out by the coordinator.
#[derive(Debug, Clone)]
pub struct Renewal {
    pub access: Secret<String>,
    /// True when this caller did not start the renewal itself (it waited on
    /// one already in flight, or reused one that just finished).
    pub joined: bool,
}

/// Terminal value broadcast to every waiter of one renewal attempt.
#[derive(Clone)]
enum Outcome {
    Renewed(Secret<String>),
    Failed(String),
    /// Sign-out or a new sign-in replaced the renewal token while the
    /// round-trip was in flight.
    Superseded,
}

enum Phase {
    Idle,
    Refreshing {
        started_at: Instant,
        waiters: VecDeque<oneshot::Sender<Outcome>>,
    },
    CoolingDown {
        until: Instant,
        renewed: bool,
    },
}

/// Read-only view of the coordinator state, for health reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenewalPhase {
    Idle,
    Refreshing { waiters: usize },
    CoolingDown { remaining: Duration, renewed: bool },
}

impl RenewalPhase {
    pub fn label(&self) -> &'static str {
        match self {
            RenewalPhase::Idle => "idle",
            RenewalPhase::Refreshing { .. } => "refreshing",
            RenewalPhase::CoolingDown { .. } => "cooling_down",
        }
    }
}

pub struct RenewalCoordinator {
    phase: Mutex<Phase>,
    store: Arc<dyn CredentialStore>,
    transport: Arc<dyn Transport>,
    renewal_url: String,
}

impl RenewalCoordinator {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        transport: Arc<dyn Transport>,
        renewal_url: String,
    ) -> Arc<Self> {
        Arc::new(Self {
            phase: Mutex::new(Phase::Idle),
            store,
            transport,
            renewal_url,
        })
    }

    /// Renew because the access token is about to expire.
    ///
    /// During the cooldown after a *successful* renewal this hands back the
    /// credential that renewal stored instead of failing.
    pub async fn refresh_proactively(self: &Arc<Self>) -> Result<Renewal, RenewalError> {
        self.acquire(RenewalTrigger::Proactive).await
    }

    /// Renew because a call was rejected with 401. Fails fast while cooling down.
    pub async fn refresh_reactively(self: &Arc<Self>) -> Result<Renewal, RenewalError> {
        self.acquire(RenewalTrigger::Reactive).await
    }

    pub async fn phase(&self) -> RenewalPhase {
        let phase = self.phase.lock().await;
        match &*phase {
            Phase::Idle => RenewalPhase::Idle,
            Phase::Refreshing { waiters, .. } => RenewalPhase::Refreshing {
                waiters: waiters.len(),
            },
            Phase::CoolingDown { until, renewed } => {
                let now = Instant::now();
                if now >= *until {
                    RenewalPhase::Idle
                } else {
                    RenewalPhase::CoolingDown {
                        remaining: *until - now,
                        renewed: *renewed,
                    }
                }
            }
        }
    }

    async fn acquire(self: &Arc<Self>, trigger: RenewalTrigger) -> Result<Renewal, RenewalError> {
        let (receiver, joined) = {
            let mut phase = self.phase.lock().await;
            let now = Instant::now();

            match &mut *phase {
                Phase::Refreshing { waiters, .. } => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push_back(tx);
                    metrics::record_waiter();
                    debug!(
                        trigger = trigger.label(),
                        waiters = waiters.len(),
                        "renewal in flight, waiting for its outcome"
                    );
                    (rx, true)
                }
                Phase::CoolingDown { until, renewed } if now < *until => {
                    let remaining = *until - now;
                    if *renewed && trigger == RenewalTrigger::Proactive {
                        if let Some(access) = self.store.access() {
                            return Ok(Renewal {
                                access: Secret::new(access),
                                joined: true,
                            });
                        }
                    }
                    debug!(
                        trigger = trigger.label(),
                        remaining_ms = remaining.as_millis() as u64,
                        renewed = *renewed,
                        "renewal cooling down"
                    );
                    return Err(RenewalError::CoolingDown {
                        remaining,
                        renewed: *renewed,
                    });
                }
                // Idle, or a cooldown that has elapsed
                _ => {
                    let Some(renewal) = self.store.renewal() else {
                        debug!(trigger = trigger.label(), "no renewal credential stored");
                        return Err(RenewalError::Failed("no renewal credential".into()));
                    };

                    let (tx, rx) = oneshot::channel();
                    let mut waiters = VecDeque::new();
                    waiters.push_back(tx);
                    *phase = Phase::Refreshing {
                        started_at: now,
                        waiters,
                    };
                    info!(trigger = trigger.label(), "starting credential renewal");

                    let this = Arc::clone(self);
                    tokio::spawn(async move { this.run(Secret::new(renewal)).await });
                    (rx, false)
                }
            }
        };

        match receiver.await {
            Ok(Outcome::Renewed(access)) => Ok(Renewal { access, joined }),
            Ok(Outcome::Failed(reason)) => Err(RenewalError::Failed(reason)),
            Ok(Outcome::Superseded) => Err(RenewalError::Superseded),
            Err(_) => Err(RenewalError::Failed("renewal task ended without an outcome".into())),
        }
    }

    /// Perform the renewal round-trip, store the result, release the waiters.
    async fn run(self: Arc<Self>, renewal: Secret<String>) {
        let result =
            session_auth::renew(self.transport.as_ref(), &self.renewal_url, renewal.expose()).await;

        // Writes only land if the store still holds the renewal token this
        // attempt started with.
        let outcome = match result {
            Ok(renewed) => {
                let access = renewed.access_token.clone();
                metrics::record_renewal("success");
                match self.store.renew_if_renewal(
                    renewal.expose(),
                    renewed.access_token,
                    renewed.refresh_token,
                ) {
                    Ok(true) => Outcome::Renewed(Secret::new(access)),
                    Ok(false) => {
                        info!("session changed during renewal, discarding renewed credential");
                        Outcome::Superseded
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to persist renewed credentials");
                        Outcome::Renewed(Secret::new(access))
                    }
                }
            }
            Err(e) => {
                metrics::record_renewal("failure");
                match self.store.clear_if_renewal(renewal.expose()) {
                    Ok(true) => {
                        warn!(error = %e, "credential renewal failed, cleared credentials");
                        Outcome::Failed(e.to_string())
                    }
                    Ok(false) => {
                        info!(
                            error = %e,
                            "credential renewal failed after the session changed, keeping credentials"
                        );
                        Outcome::Superseded
                    }
                    Err(clear_err) => {
                        warn!(
                            error = %e,
                            clear_error = %clear_err,
                            "credential renewal failed, clearing credentials failed"
                        );
                        Outcome::Failed(e.to_string())
                    }
                }
            }
        };
        let renewed = matches!(outcome, Outcome::Renewed(_));

        let waiters = {
            let mut phase = self.phase.lock().await;
            match std::mem::replace(&mut *phase, Phase::Idle) {
                Phase::Refreshing {
                    started_at,
                    waiters,
                } => {
                    *phase = Phase::CoolingDown {
                        until: started_at + COOLDOWN_WINDOW,
                        renewed,
                    };
                    waiters
                }
                other => {
                    // Only this task leaves Refreshing, so this cannot happen.
                    *phase = other;
                    VecDeque::new()
                }
            }
        };

        info!(renewed, waiters = waiters.len(), "credential renewal finished");
        for waiter in waiters {
            // A waiter that gave up has dropped its receiver; nothing to do.
            let _ = waiter.send(outcome.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockApi, RenewalReply, jwt_expiring_in};
    use session_auth::MemoryCredentialStore;

    fn coordinator(api: &Arc<MockApi>, store: &Arc<MemoryCredentialStore>) -> Arc<RenewalCoordinator> {
        RenewalCoordinator::new(store.clone(), api.clone(), api.renewal_url())
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_renewal() {
        let api = MockApi::new();
        api.script_renewal(RenewalReply::issue("at_new").after(Duration::from_millis(200)));
        let store = Arc::new(MemoryCredentialStore::with_pair("at_old", Some("rt_1".into())));
        let coordinator = coordinator(&api, &store);

        let (a, b, c) = tokio::join!(
            coordinator.refresh_reactively(),
            coordinator.refresh_reactively(),
            coordinator.refresh_proactively(),
        );

        assert_eq!(api.renewal_calls(), 1);
        let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());
        assert_eq!(a.access.expose(), "at_new");
        assert_eq!(b.access.expose(), "at_new");
        assert_eq!(c.access.expose(), "at_new");
        assert!(!a.joined, "first caller starts the renewal");
        assert!(b.joined && c.joined, "later callers wait on it");
        assert_eq!(store.access().as_deref(), Some("at_new"));
    }

    #[tokio::test(start_paused = true)]
    async fn rotated_renewal_token_is_stored() {
        let api = MockApi::new();
        api.script_renewal(RenewalReply::issue("at_new").rotating("rt_2"));
        let store = Arc::new(MemoryCredentialStore::with_pair("at_old", Some("rt_1".into())));

        coordinator(&api, &store).refresh_reactively().await.unwrap();

        assert_eq!(store.renewal().as_deref(), Some("rt_2"));
        assert_eq!(api.renewal_tokens_seen(), vec!["rt_1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_clears_credentials_and_releases_every_waiter() {
        let api = MockApi::new();
        api.script_renewal(RenewalReply::reject(401).after(Duration::from_millis(100)));
        let store = Arc::new(MemoryCredentialStore::with_pair("at_old", Some("rt_1".into())));
        let coordinator = coordinator(&api, &store);

        let (a, b) = tokio::join!(coordinator.refresh_reactively(), coordinator.refresh_reactively());

        assert!(matches!(a, Err(RenewalError::Failed(_))));
        assert!(matches!(b, Err(RenewalError::Failed(_))));
        assert_eq!(api.renewal_calls(), 1);
        assert!(store.access().is_none());
        assert!(store.renewal().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn sign_out_during_renewal_is_not_undone() {
        let api = MockApi::new();
        api.script_renewal(RenewalReply::issue("at_new").after(Duration::from_millis(200)));
        let store = Arc::new(MemoryCredentialStore::with_pair("at_old", Some("rt_1".into())));
        let coordinator = coordinator(&api, &store);

        let (renewal, ()) = tokio::join!(coordinator.refresh_reactively(), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            store.clear().unwrap();
        });

        assert!(matches!(renewal, Err(RenewalError::Superseded)));
        assert!(store.access().is_none());
        assert!(store.renewal().is_none());
        assert!(matches!(
            coordinator.phase().await,
            RenewalPhase::CoolingDown { renewed: false, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn sign_in_during_failing_renewal_is_kept() {
        let api = MockApi::new();
        api.script_renewal(RenewalReply::reject(401).after(Duration::from_millis(200)));
        let store = Arc::new(MemoryCredentialStore::with_pair("at_old", Some("rt_1".into())));
        let coordinator = coordinator(&api, &store);

        let (renewal, ()) = tokio::join!(coordinator.refresh_reactively(), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            store.clear().unwrap();
            store.set_access("at_signed_in".into()).unwrap();
            store.set_renewal("rt_signed_in".into()).unwrap();
        });

        assert!(matches!(renewal, Err(RenewalError::Superseded)));
        assert_eq!(store.access().as_deref(), Some("at_signed_in"));
        assert_eq!(store.renewal().as_deref(), Some("rt_signed_in"));
        assert_eq!(api.renewal_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_attempt_blocks_new_attempts_for_cooldown_window() {
        let api = MockApi::new();
        api.script_renewal(RenewalReply::reject(500));
        api.script_renewal(RenewalReply::issue("at_new"));
        let store = Arc::new(MemoryCredentialStore::with_pair("at_old", Some("rt_1".into())));
        let coordinator = coordinator(&api, &store);

        let started = Instant::now();
        assert!(coordinator.refresh_reactively().await.is_err());

        // user signs in again right away; renewal is still throttled
        store.set_access("at_fresh".into()).unwrap();
        store.set_renewal("rt_fresh".into()).unwrap();
        tokio::time::sleep(Duration::from_secs(4)).await;
        let err = coordinator.refresh_proactively().await.unwrap_err();
        assert!(matches!(err, RenewalError::CoolingDown { renewed: false, .. }));
        assert_eq!(api.renewal_calls(), 1);

        tokio::time::sleep_until(started + COOLDOWN_WINDOW).await;
        let renewal = coordinator.refresh_reactively().await.unwrap();
        assert_eq!(renewal.access.expose(), "at_new");
        assert_eq!(api.renewal_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_is_measured_from_attempt_start() {
        let api = MockApi::new();
        api.script_renewal(RenewalReply::reject(401).after(Duration::from_secs(2)));
        let store = Arc::new(MemoryCredentialStore::with_pair("at_old", Some("rt_1".into())));
        let coordinator = coordinator(&api, &store);

        let _ = coordinator.refresh_reactively().await;
        match coordinator.phase().await {
            RenewalPhase::CoolingDown { remaining, renewed } => {
                assert!(!renewed);
                assert_eq!(remaining, Duration::from_secs(3));
            }
            other => panic!("expected cooling down, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn proactive_caller_reuses_credential_from_recent_success() {
        let api = MockApi::new();
        api.script_renewal(RenewalReply::issue("at_new"));
        let store = Arc::new(MemoryCredentialStore::with_pair(
            jwt_expiring_in(30),
            Some("rt_1".into()),
        ));
        let coordinator = coordinator(&api, &store);

        coordinator.refresh_proactively().await.unwrap();
        let again = coordinator.refresh_proactively().await.unwrap();

        assert_eq!(again.access.expose(), "at_new");
        assert!(again.joined);
        assert_eq!(api.renewal_calls(), 1);

        // a reactive caller is told about the cooldown instead
        let err = coordinator.refresh_reactively().await.unwrap_err();
        assert!(matches!(err, RenewalError::CoolingDown { renewed: true, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_renewal_credential_fails_without_network() {
        let api = MockApi::new();
        let store = Arc::new(MemoryCredentialStore::with_pair("at_old", None));

        let err = coordinator(&api, &store).refresh_reactively().await.unwrap_err();

        assert!(matches!(err, RenewalError::Failed(_)));
        assert_eq!(api.renewal_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn renewal_survives_the_starting_caller_going_away() {
        let api = MockApi::new();
        api.script_renewal(RenewalReply::issue("at_new").after(Duration::from_millis(200)));
        let store = Arc::new(MemoryCredentialStore::with_pair("at_old", Some("rt_1".into())));
        let coordinator = coordinator(&api, &store);

        let leader = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.refresh_reactively().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(coordinator.phase().await, RenewalPhase::Refreshing { waiters: 1 });
        leader.abort();

        let follower = coordinator.refresh_reactively().await.unwrap();
        assert_eq!(follower.access.expose(), "at_new");
        assert!(follower.joined);
        assert_eq!(api.renewal_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn phase_returns_to_idle_after_window() {
        let api = MockApi::new();
        api.script_renewal(RenewalReply::issue("at_new"));
        let store = Arc::new(MemoryCredentialStore::with_pair("at_old", Some("rt_1".into())));
        let coordinator = coordinator(&api, &store);

        assert_eq!(coordinator.phase().await.label(), "idle");
        coordinator.refresh_reactively().await.unwrap();
        assert_eq!(coordinator.phase().await.label(), "cooling_down");
        tokio::time::sleep(COOLDOWN_WINDOW).await;
        assert_eq!(coordinator.phase().await, RenewalPhase::Idle);
    }
}
