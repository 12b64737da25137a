//! Reporter
//!
//! Fire-and-forget sink: appends every event to a bounded in-memory ring,
//! logs it locally at a severity keyed off event type, and POSTs it to the
//! external dashboard backend. Backend unreachability is swallowed at
//! DEBUG — this component never propagates an error back into the pipeline,
//! matching `reporter.py`'s "log and move on" behavior.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::decider::PolicyDecision;
use crate::observer::MarketSnapshot;
use crate::reasoner::{ThreatAssessment, ThreatClassification};

const EVENT_RING_CAPACITY: usize = 1000;
const EVENT_POST_TIMEOUT: Duration = Duration::from_secs(10);
const RESTORE_PRICE_TIMEOUT: Duration = Duration::from_secs(180);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityEventType {
    Observation,
    Assessment,
    Decision,
    Action,
    AmmPaused,
    ProactiveDefense,
}

/// Union-shaped event record. Required fields are present on every variant;
/// everything else is omitted from the wire payload when absent.
#[derive(Debug, Clone, Serialize)]
pub struct SecurityEvent {
    pub timestamp: DateTime<Utc>,
    pub block: u64,
    pub event_type: SecurityEventType,
    pub oracle_price: f64,
    pub amm_price: f64,
    pub price_deviation: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<ThreatClassification>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execute_on_chain: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
}

impl SecurityEvent {
    fn base(snapshot: &MarketSnapshot, event_type: SecurityEventType) -> Self {
        Self {
            timestamp: Utc::now(),
            block: snapshot.block_number,
            event_type,
            oracle_price: snapshot.oracle_price,
            amm_price: snapshot.amm_spot_price,
            price_deviation: snapshot.price_deviation_pct,
            classification: None,
            confidence: None,
            explanation: None,
            evidence: None,
            action: None,
            action_reason: None,
            execute_on_chain: None,
            tx_hash: None,
        }
    }
}

pub struct Reporter {
    backend_url: String,
    event_client: reqwest::Client,
    restore_client: reqwest::Client,
    ring: VecDeque<SecurityEvent>,
}

impl Reporter {
    pub fn new(backend_url: String) -> Self {
        let event_client = reqwest::Client::builder()
            .timeout(EVENT_POST_TIMEOUT)
            .build()
            .expect("reqwest client builder with static config never fails");
        let restore_client = reqwest::Client::builder()
            .timeout(RESTORE_PRICE_TIMEOUT)
            .build()
            .expect("reqwest client builder with static config never fails");

        Self {
            backend_url,
            event_client,
            restore_client,
            ring: VecDeque::with_capacity(EVENT_RING_CAPACITY),
        }
    }

    pub fn event_ring(&self) -> &VecDeque<SecurityEvent> {
        &self.ring
    }

    async fn emit(&mut self, event: SecurityEvent, severity: tracing::Level) {
        match severity {
            tracing::Level::WARN => tracing::warn!(
                event_type = ?event.event_type,
                block = event.block,
                action = ?event.action,
                "security event"
            ),
            tracing::Level::INFO => tracing::info!(
                event_type = ?event.event_type,
                block = event.block,
                classification = ?event.classification,
                "security event"
            ),
            _ => tracing::debug!(event_type = ?event.event_type, block = event.block, "security event"),
        }

        if self.ring.len() == EVENT_RING_CAPACITY {
            self.ring.pop_front();
        }
        self.ring.push_back(event.clone());

        let url = format!("{}/api/events", self.backend_url);
        if let Err(e) = self.event_client.post(&url).json(&event).send().await {
            tracing::debug!(error = %e, "failed to post security event to backend");
        }
    }

    pub async fn report_observation(&mut self, snapshot: &MarketSnapshot) {
        let event = SecurityEvent::base(snapshot, SecurityEventType::Observation);
        self.emit(event, tracing::Level::DEBUG).await;
    }

    pub async fn report_assessment(&mut self, snapshot: &MarketSnapshot, assessment: &ThreatAssessment) {
        let mut event = SecurityEvent::base(snapshot, SecurityEventType::Assessment);
        event.classification = Some(assessment.classification);
        event.confidence = Some(assessment.confidence);
        event.explanation = Some(assessment.explanation.clone());
        event.evidence = Some(assessment.evidence.clone());

        let severity = if assessment.classification != ThreatClassification::Natural {
            tracing::Level::INFO
        } else {
            tracing::Level::DEBUG
        };
        self.emit(event, severity).await;
    }

    pub async fn report_decision(&mut self, snapshot: &MarketSnapshot, decision: &PolicyDecision) {
        let mut event = SecurityEvent::base(snapshot, SecurityEventType::Decision);
        event.classification = Some(decision.threat_classification);
        event.confidence = Some(decision.confidence);
        event.action = Some(decision.action.to_string());
        event.action_reason = Some(decision.reason.clone());
        event.execute_on_chain = Some(decision.execute_on_chain);
        event.evidence = Some(decision.evidence.clone());

        let severity = if decision.execute_on_chain {
            tracing::Level::WARN
        } else {
            tracing::Level::DEBUG
        };
        self.emit(event, severity).await;
    }

    pub async fn report_action(
        &mut self,
        snapshot: &MarketSnapshot,
        decision: &PolicyDecision,
        tx_hash: Option<String>,
    ) {
        let mut event = SecurityEvent::base(snapshot, SecurityEventType::Action);
        event.classification = Some(decision.threat_classification);
        event.confidence = Some(decision.confidence);
        event.action = Some(decision.action.to_string());
        event.action_reason = Some(decision.reason.clone());
        event.execute_on_chain = Some(decision.execute_on_chain);
        event.tx_hash = tx_hash;
        self.emit(event, tracing::Level::WARN).await;
    }

    pub async fn report_amm_pause(
        &mut self,
        snapshot: &MarketSnapshot,
        assessment: &ThreatAssessment,
        tx_hash: Option<String>,
    ) {
        let mut event = SecurityEvent::base(snapshot, SecurityEventType::AmmPaused);
        event.classification = Some(assessment.classification);
        event.confidence = Some(assessment.confidence);
        event.explanation = Some(format!(
            "AMM paused to prevent manipulation. {}",
            assessment.explanation
        ));
        event.evidence = Some(assessment.evidence.clone());
        event.action = Some("PAUSE_AMM".to_string());
        event.action_reason = Some("Emergency AMM pause - blocking price manipulation attack".to_string());
        event.tx_hash = tx_hash;
        self.emit(event, tracing::Level::WARN).await;
    }

    pub async fn report_proactive_defense(&mut self, snapshot: &MarketSnapshot) {
        let mut event = SecurityEvent::base(snapshot, SecurityEventType::ProactiveDefense);
        event.classification = Some(ThreatClassification::FlashLoanAttack);
        event.confidence = Some(0.95);
        event.explanation = Some(format!(
            "Detected {:.1}% price deviation - immediate AMM pause triggered without waiting for LLM analysis.",
            snapshot.price_deviation_pct
        ));
        event.evidence = Some(vec![
            format!("Price deviation: {:.1}%", snapshot.price_deviation_pct),
            format!("Oracle price: ${:.2}", snapshot.oracle_price),
            format!("AMM price: ${:.2}", snapshot.amm_spot_price),
            "Large deviation indicates flash loan attack in progress".to_string(),
        ]);
        event.action = Some("PROACTIVE_PAUSE_AMM".to_string());
        event.action_reason = Some(format!(
            "Immediate defense - {:.1}% deviation exceeds proactive threshold",
            snapshot.price_deviation_pct
        ));
        self.emit(event, tracing::Level::WARN).await;
    }

    /// `POST <backend_url>/api/admin/restore-price`, part of the proactive
    /// fast path's demo choreography. 180-second timeout; failures are
    /// logged and swallowed.
    pub async fn restore_price(&self) {
        let url = format!("{}/api/admin/restore-price", self.backend_url);
        match self.restore_client.post(&url).send().await {
            Ok(resp) if resp.status().is_success() => {
                tracing::info!("requested price restoration from backend");
            }
            Ok(resp) => {
                tracing::warn!(status = %resp.status(), "price restoration request rejected");
            }
            Err(e) => {
                tracing::debug!(error = %e, "failed to request price restoration");
            }
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn snapshot() -> MarketSnapshot {
        MarketSnapshot {
            timestamp: Utc::now(),
            block_number: 42,
            oracle_price: 2000.0,
            oracle_twap: 2000.0,
            oracle_updates_this_block: 0,
            amm_spot_price: 1995.0,
            amm_base_reserve: 500.0,
            amm_quote_reserve: 1_000_000.0,
            amm_swaps_this_block: 0,
            price_deviation_pct: 0.25,
            vault_total_collateral: 500.0,
            vault_total_loans: 1_000_000.0,
            amm_paused: false,
            vault_paused: false,
            liquidations_blocked: false,
            recent_liquidations: Vec::new(),
            recent_large_swaps: Vec::new(),
            price_history: Vec::new(),
        }
    }

    #[tokio::test]
    async fn event_ring_caps_at_1000_and_drops_oldest() {
        let mut reporter = Reporter::new("http://127.0.0.1:1".to_string());
        for _ in 0..(EVENT_RING_CAPACITY + 5) {
            reporter.report_observation(&snapshot()).await;
        }
        assert_eq!(reporter.event_ring().len(), EVENT_RING_CAPACITY);
    }

    #[test]
    fn security_event_omits_optional_fields_when_absent() {
        let event = SecurityEvent::base(&snapshot(), SecurityEventType::Observation);
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("classification"));
        assert!(!json.contains("tx_hash"));
    }
}
