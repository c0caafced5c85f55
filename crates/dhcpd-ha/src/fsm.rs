use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dhcpd_core::types::{HaRole, HaState};
use dhcpd_msg::events::Event;
use dhcpd_msg::MessageBus;
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

type TransitionCallback = dyn Fn(HaState, HaState, &str) + Send + Sync;

/// Five-state failover state machine (§4.5). `state` and `last_heartbeat`
/// are guarded by one fine-grained lock, separate from the pool map and
/// the peer transport's connection pointer, so a slow reservation lookup
/// elsewhere never contends with a failover transition.
struct Inner {
    state: HaState,
    last_heartbeat: Instant,
}

pub struct Fsm {
    instance_id: String,
    role: HaRole,
    failover_timeout: Duration,
    inner: Mutex<Inner>,
    events: Arc<dyn MessageBus>,
    callback: Mutex<Option<Arc<TransitionCallback>>>,
}

impl Fsm {
    pub fn new(
        instance_id: impl Into<String>,
        role: HaRole,
        failover_timeout: Duration,
        events: Arc<dyn MessageBus>,
    ) -> Arc<Self> {
        Arc::new(Self {
            instance_id: instance_id.into(),
            role,
            failover_timeout,
            inner: Mutex::new(Inner {
                state: role.initial_state(),
                last_heartbeat: Instant::now(),
            }),
            events,
            callback: Mutex::new(None),
        })
    }

    pub async fn set_callback(&self, callback: Arc<TransitionCallback>) {
        *self.callback.lock().await = Some(callback);
    }

    pub async fn current_state(&self) -> HaState {
        self.inner.lock().await.state
    }

    pub async fn is_active(&self) -> bool {
        self.inner.lock().await.state.is_active()
    }

    async fn transition(&self, new_state: HaState, reason: &str) {
        let old_state = {
            let mut inner = self.inner.lock().await;
            let old = inner.state;
            if old == new_state {
                return;
            }
            inner.state = new_state;
            old
        };

        info!(
            instance_id = %self.instance_id,
            from = ?old_state,
            to = ?new_state,
            reason,
            "HA state transition"
        );

        if let Some(cb) = self.callback.lock().await.clone() {
            cb(old_state, new_state, reason);
        }

        let _ = self
            .events
            .publish(&Event::HaStateChange {
                instance_id: self.instance_id.clone(),
                from: old_state,
                to: new_state,
                reason: reason.to_string(),
                timestamp: Utc::now(),
            })
            .await;
    }

    /// A heartbeat (or any other peer-up signal) arrived; refresh the
    /// timestamp and, unless we're already tracking the peer as up, move
    /// into PARTNER_UP (or RECOVERY if we were PARTNER_DOWN).
    pub async fn handle_peer_up(&self) {
        {
            let mut inner = self.inner.lock().await;
            inner.last_heartbeat = Instant::now();
        }
        let state = self.current_state().await;
        match state {
            HaState::PartnerUp => {}
            HaState::PartnerDown => self.transition(HaState::Recovery, "peer heartbeat resumed").await,
            HaState::Standby | HaState::Active => {
                self.transition(HaState::PartnerUp, "peer heartbeat received").await
            }
            HaState::Recovery => {}
        }
    }

    /// The peer's heartbeat has not been seen within the failover timeout.
    pub async fn handle_peer_down(&self) {
        let state = self.current_state().await;
        match state {
            HaState::PartnerUp | HaState::Standby => {
                self.transition(HaState::PartnerDown, "peer heartbeat timeout").await;
                if self.role == HaRole::Primary {
                    self.transition(HaState::Active, "primary promotes after partner-down")
                        .await;
                }
            }
            HaState::Recovery => {
                self.transition(HaState::PartnerDown, "peer heartbeat timeout during recovery")
                    .await;
            }
            HaState::Active | HaState::PartnerDown => {}
        }
    }

    /// The recovering peer finished bulk-syncing lease and conflict state.
    pub async fn handle_bulk_sync_complete(&self) {
        if self.current_state().await != HaState::Recovery {
            return;
        }
        match self.role {
            HaRole::Primary => self.transition(HaState::Active, "bulk sync complete").await,
            HaRole::Secondary => self.transition(HaState::Standby, "bulk sync complete").await,
        }
    }

    /// Administrative override: force this node to serve traffic.
    pub async fn claim_active(&self) {
        self.transition(HaState::Active, "admin claim-active").await;
    }

    /// The peer announced a failover-claim; defer to it.
    pub async fn handle_peer_claim(&self) {
        self.transition(HaState::Standby, "peer claimed active").await;
    }

    /// Called at 1 Hz by the timeout-checker loop (§4.6 loop d).
    pub async fn check_heartbeat_timeout(&self) {
        let (age, state) = {
            let inner = self.inner.lock().await;
            (inner.last_heartbeat.elapsed(), inner.state)
        };
        if age > self.failover_timeout && state != HaState::PartnerDown {
            warn!(
                instance_id = %self.instance_id,
                age_secs = age.as_secs(),
                "peer heartbeat timed out"
            );
            self.handle_peer_down().await;
        }
    }

    /// Runs the 1 Hz timeout-checker loop until `shutdown` fires.
    pub async fn run_timeout_checker(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = ticker.tick() => self.check_heartbeat_timeout().await,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dhcpd_msg::noop::NoopMessageBus;

    fn bus() -> Arc<dyn MessageBus> {
        Arc::new(NoopMessageBus::new("test"))
    }

    #[tokio::test]
    async fn test_initial_state_by_role() {
        let primary = Fsm::new("p1", HaRole::Primary, Duration::from_secs(10), bus());
        assert_eq!(primary.current_state().await, HaState::Active);
        assert!(primary.is_active().await);

        let secondary = Fsm::new("s1", HaRole::Secondary, Duration::from_secs(10), bus());
        assert_eq!(secondary.current_state().await, HaState::Standby);
        assert!(!secondary.is_active().await);
    }

    #[tokio::test]
    async fn test_secondary_promotes_after_partner_down() {
        let fsm = Fsm::new("s1", HaRole::Secondary, Duration::from_secs(10), bus());
        fsm.handle_peer_down().await;
        assert_eq!(fsm.current_state().await, HaState::PartnerDown);
        assert!(fsm.is_active().await);
    }

    #[tokio::test]
    async fn test_primary_promotes_to_active_after_partner_down() {
        let fsm = Fsm::new("p1", HaRole::Primary, Duration::from_secs(10), bus());
        // Primary starts Active; simulate it having dropped to standby-like
        // tracking via a peer claim first so the partner-down path is exercised.
        fsm.handle_peer_claim().await;
        assert_eq!(fsm.current_state().await, HaState::Standby);
        fsm.handle_peer_down().await;
        assert_eq!(fsm.current_state().await, HaState::Active);
    }

    #[tokio::test]
    async fn test_peer_claim_demotes_active() {
        let fsm = Fsm::new("p1", HaRole::Primary, Duration::from_secs(10), bus());
        assert!(fsm.is_active().await);
        fsm.handle_peer_claim().await;
        assert_eq!(fsm.current_state().await, HaState::Standby);
        assert!(!fsm.is_active().await);
    }

    #[tokio::test]
    async fn test_recovery_resolves_by_role() {
        let primary = Fsm::new("p1", HaRole::Primary, Duration::from_secs(10), bus());
        primary.handle_peer_down().await; // Active -> no-op (already serving)
        primary.handle_peer_claim().await; // -> Standby
        primary.handle_peer_down().await; // -> PartnerDown, promotes to Active
        primary.handle_peer_claim().await; // -> Standby
        primary.handle_peer_up().await; // Standby -> PartnerUp
        primary.handle_peer_down().await; // PartnerUp -> PartnerDown, promote -> Active
        assert_eq!(primary.current_state().await, HaState::Active);

        let secondary = Fsm::new("s2", HaRole::Secondary, Duration::from_secs(10), bus());
        secondary.handle_peer_down().await; // Standby -> PartnerDown
        secondary.handle_peer_up().await; // PartnerDown -> Recovery
        secondary.handle_bulk_sync_complete().await; // Recovery -> Standby
        assert_eq!(secondary.current_state().await, HaState::Standby);
    }

    #[tokio::test]
    async fn test_serving_predicate_matches_spec() {
        let fsm = Fsm::new("p1", HaRole::Primary, Duration::from_secs(10), bus());
        for state in [
            HaState::PartnerUp,
            HaState::Standby,
            HaState::Active,
            HaState::PartnerDown,
            HaState::Recovery,
        ] {
            fsm.inner.lock().await.state = state;
            assert_eq!(
                fsm.is_active().await,
                matches!(state, HaState::Active | HaState::PartnerDown)
            );
        }
    }
}
