//! Prometheus metrics for the coordinator

use crate::error::Result;
use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};

/// Collector owning the registry and all coordinator metrics
pub struct MetricsCollector {
    registry: Registry,

    pub requests_total: IntCounter,
    pub offers_opened_total: IntCounter,
    /// Labeled by terminal outcome: confirmed, declined, timed_out, cancelled
    pub offers_closed_total: IntCounterVec,
    pub sessions_started_total: IntCounter,
    pub sessions_ended_total: IntCounter,
    pub rematch_requests_total: IntCounter,

    pub users_waiting: IntGauge,
    pub active_offers: IntGauge,
    pub active_sessions: IntGauge,
    pub connected_users: IntGauge,
}

impl MetricsCollector {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let requests_total = IntCounter::with_opts(Opts::new(
            "practice_room_match_requests_total",
            "Total match requests received",
        ))?;
        let offers_opened_total = IntCounter::with_opts(Opts::new(
            "practice_room_offers_opened_total",
            "Total match offers created",
        ))?;
        let offers_closed_total = IntCounterVec::new(
            Opts::new(
                "practice_room_offers_closed_total",
                "Total match offers closed, by terminal outcome",
            ),
            &["outcome"],
        )?;
        let sessions_started_total = IntCounter::with_opts(Opts::new(
            "practice_room_sessions_started_total",
            "Total collaboration sessions started",
        ))?;
        let sessions_ended_total = IntCounter::with_opts(Opts::new(
            "practice_room_sessions_ended_total",
            "Total collaboration sessions ended",
        ))?;
        let rematch_requests_total = IntCounter::with_opts(Opts::new(
            "practice_room_rematch_requests_total",
            "Total rematch requests received",
        ))?;

        let users_waiting = IntGauge::with_opts(Opts::new(
            "practice_room_users_waiting",
            "Users currently waiting in the pool",
        ))?;
        let active_offers = IntGauge::with_opts(Opts::new(
            "practice_room_active_offers",
            "Offers currently awaiting mutual acceptance",
        ))?;
        let active_sessions = IntGauge::with_opts(Opts::new(
            "practice_room_active_sessions",
            "Collaboration sessions currently active",
        ))?;
        let connected_users = IntGauge::with_opts(Opts::new(
            "practice_room_connected_users",
            "Users currently reachable (connected or within grace)",
        ))?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(offers_opened_total.clone()))?;
        registry.register(Box::new(offers_closed_total.clone()))?;
        registry.register(Box::new(sessions_started_total.clone()))?;
        registry.register(Box::new(sessions_ended_total.clone()))?;
        registry.register(Box::new(rematch_requests_total.clone()))?;
        registry.register(Box::new(users_waiting.clone()))?;
        registry.register(Box::new(active_offers.clone()))?;
        registry.register(Box::new(active_sessions.clone()))?;
        registry.register(Box::new(connected_users.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            offers_opened_total,
            offers_closed_total,
            sessions_started_total,
            sessions_ended_total,
            rematch_requests_total,
            users_waiting,
            active_offers,
            active_sessions,
            connected_users,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_offer_closed(&self, outcome: &str) {
        self.offers_closed_total.with_label_values(&[outcome]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_and_record() {
        let metrics = MetricsCollector::new().unwrap();
        metrics.requests_total.inc();
        metrics.record_offer_closed("confirmed");
        metrics.active_sessions.set(2);

        let families = metrics.registry().gather();
        assert!(families
            .iter()
            .any(|mf| mf.get_name() == "practice_room_match_requests_total"));
        assert!(families
            .iter()
            .any(|mf| mf.get_name() == "practice_room_offers_closed_total"));
    }
}
