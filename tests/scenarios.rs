//! End-to-end pipeline scenarios
//!
//! Exercises Observer context-building -> Reasoner -> Decider together,
//! the way a single tick would without touching the network. Chain I/O and
//! the Actor's signed transactions are covered by their own unit tests;
//! these scenarios pin down the decision logic the rest of the pipeline
//! hangs off.

use sentry_agent::decider::{ActionType, PolicyEngine};
use sentry_agent::observer::context::build_with_threshold;
use sentry_agent::observer::MarketSnapshot;
use sentry_agent::reasoner::{Reasoner, ThreatAssessment, ThreatClassification};
use sentry_agent::errors::LlmError;

struct ScriptedLlm {
    response: String,
}

#[async_trait::async_trait]
impl sentry_agent::reasoner::LlmClient for ScriptedLlm {
    async fn generate(&self, _prompt: &str) -> Result<String, LlmError> {
        Ok(self.response.clone())
    }
}

fn snapshot(oracle_price: f64, amm_price: f64, deviation_pct: f64) -> MarketSnapshot {
    MarketSnapshot {
        timestamp: chrono::Utc::now(),
        block_number: 1000,
        oracle_price,
        oracle_twap: oracle_price,
        oracle_updates_this_block: 0,
        amm_spot_price: amm_price,
        amm_base_reserve: 500.0,
        amm_quote_reserve: 1_000_000.0,
        amm_swaps_this_block: 0,
        price_deviation_pct: deviation_pct,
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

#[test]
fn scenario_flash_loan_crash_deviation_exceeds_proactive_threshold() {
    // Oracle $2000 vs AMM $1400 -> 30% deviation, matching the proactive
    // fast-path scenario. The agent loop's own unit tests cover the exact
    // > vs >= boundary; this confirms the snapshot-level math agrees.
    let snap = snapshot(2000.0, 1400.0, 30.0);
    assert!(snap.price_deviation_pct > 0.30 * 100.0 - 0.01);
    assert!(!snap.amm_paused && !snap.vault_paused);
}

#[tokio::test]
async fn scenario_oracle_drift_medium_confidence_blocks_liquidations() {
    let engine = PolicyEngine::new(0.65, 0.50);
    let mut reasoner = Reasoner::new(Box::new(ScriptedLlm {
        response: r#"{"classification":"ORACLE_MANIPULATION","confidence":0.60,"explanation":"oracle diverges from AMM","evidence":["5.2% divergence"]}"#.to_string(),
    }));

    let mut snap = snapshot(2100.0, 2000.0, 5.0);
    snap.oracle_updates_this_block = 2;
    let ctx = build_with_threshold(&snap, 0.03);
    assert!(reasoner.quick_check(&ctx), "multiple oracle updates in one block should trigger the gate");

    let assessment = reasoner.analyze(&ctx).await;
    assert_eq!(assessment.classification, ThreatClassification::OracleManipulation);

    let decision = engine.decide(&assessment);
    let decision = engine.override_for_state(decision, false, false);
    assert_eq!(decision.action, ActionType::BlockLiquidations);
    assert!(decision.execute_on_chain);
}

#[test]
fn scenario_static_testnet_keeps_llm_calls_at_zero() {
    let mut reasoner = Reasoner::new(Box::new(ScriptedLlm {
        response: String::new(),
    }));

    let snap = snapshot(2000.0, 1996.0, 0.5);
    let ctx = build_with_threshold(&snap, 0.03);

    for _ in 0..5 {
        assert!(!reasoner.quick_check(&ctx));
    }
    assert_eq!(reasoner.llm_calls_count(), 0);
}

#[tokio::test]
async fn scenario_malformed_llm_response_yields_none_decision() {
    let engine = PolicyEngine::new(0.65, 0.50);
    let mut reasoner = Reasoner::new(Box::new(ScriptedLlm {
        response: "not json".to_string(),
    }));

    let snap = snapshot(2000.0, 1200.0, 60.0);
    let ctx = build_with_threshold(&snap, 0.03);
    assert!(reasoner.quick_check(&ctx), "deviation above the critical 50% floor must trigger the gate");

    let assessment = reasoner.analyze(&ctx).await;
    assert_eq!(assessment.classification, ThreatClassification::Natural);
    assert_eq!(assessment.confidence, 0.0);
    assert_eq!(assessment.explanation, "Failed to parse LLM response");

    let decision = engine.decide(&assessment);
    let decision = engine.override_for_state(decision, false, false);
    assert_eq!(decision.action, ActionType::None);
    assert!(!decision.execute_on_chain);
}

#[test]
fn scenario_idempotent_override_demotes_pause_when_vault_already_paused() {
    let engine = PolicyEngine::new(0.65, 0.50);
    let assessment = ThreatAssessment {
        classification: ThreatClassification::FlashLoanAttack,
        confidence: 0.90,
        explanation: "overwhelming single-block move".to_string(),
        evidence: vec!["price recovered within one block".to_string()],
        raw_response: None,
    };

    let decision = engine.decide(&assessment);
    assert_eq!(decision.action, ActionType::PauseProtocol);

    let overridden = engine.override_for_state(decision, true, false);
    assert_eq!(overridden.action, ActionType::Monitor);
    assert!(!overridden.execute_on_chain);
}

#[test]
fn price_history_twap_fallback_has_no_history_points() {
    // Empty price history is a legitimate boundary: a fresh deployment with
    // no samples yet. TWAP falls back to spot price at the gateway layer;
    // here we confirm the context builder tolerates an empty window without
    // panicking and reports an empty recent_price_changes window.
    let snap = snapshot(2000.0, 2000.0, 0.0);
    let ctx = build_with_threshold(&snap, 0.03);
    assert!(ctx.recent_price_changes.is_empty());
}
