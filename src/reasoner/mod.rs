//! Reasoner
//!
//! Two-layer threat classification: a cheap deterministic gate
//! (`quick_check`) that decides whether a tick's context is novel enough to
//! justify an LLM call, and the LLM analyzer itself (`analyze`). Mirrors the
//! gate/caller split in `reasoner.py`, reimplemented with a pluggable
//! `LlmClient` seam so the pipeline can be exercised in tests without a
//! network call, the way external feeds are isolated behind a trait in
//! `scrapers/`.

mod gemini;

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::LlmError;
use crate::observer::AnalysisContext;

pub use gemini::GeminiClient;

/// Deviation above which the gate fires regardless of any other indicator.
const CRITICAL_DEVIATION_PCT: f64 = 50.0;
/// Deviation below which, absent any activity, the gate never fires.
const IDLE_DEVIATION_FLOOR_PCT: f64 = 5.0;
/// Deviation above which the gate fires even with zero observed activity.
const IDLE_DEVIATION_FORCE_PCT: f64 = 30.0;
/// Size of the state-signature ring used to detect an idle/static chain.
const STATE_SIGNATURE_RING_CAPACITY: usize = 10;
/// Minimum ring length before the idle-state check is meaningful.
const STATE_SIGNATURE_MIN_SAMPLES: usize = 5;
/// Unique-signature count at or below which the chain is considered idle.
const STATE_SIGNATURE_IDLE_UNIQUE_MAX: usize = 2;
/// Per-event liquidation dedup cache cap before it is cleared outright.
const LIQUIDATION_CACHE_CAP: usize = 1000;
/// Length of the context-hash digest used for dedup.
const CONTEXT_HASH_HEX_LEN: usize = 16;

const SYSTEM_PROMPT: &str = r#"You are a DeFi security analyst. Your only task is to examine blockchain market telemetry and decide whether it reflects an ongoing manipulation attack.

Classify the data into exactly one of:

1. FLASH_LOAN_ATTACK
   - a large, sudden price move (>10% in one block)
   - the price recovers within one or two blocks
   - multiple large swaps land in the same block
   - liquidations occur during the dip
   - oracle price diverges sharply from AMM price

2. ORACLE_MANIPULATION
   - oracle price differs from AMM spot price by more than 5%
   - several oracle updates land in the same block
   - the oracle move is not explained by trading activity
   - liquidations are happening at the manipulated price

3. NATURAL
   - ordinary volatility
   - price moves track trading volume
   - nothing unusual

Respond with JSON only, no markdown fences, no commentary:
{
  "classification": "NATURAL" | "ORACLE_MANIPULATION" | "FLASH_LOAN_ATTACK",
  "confidence": <float between 0.0 and 1.0>,
  "explanation": "<reasoning>",
  "evidence": ["<specific data point>", ...]
}"#;

/// The three-member classification set. No other value is representable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThreatClassification {
    Natural,
    OracleManipulation,
    FlashLoanAttack,
}

impl std::fmt::Display for ThreatClassification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ThreatClassification::Natural => "NATURAL",
            ThreatClassification::OracleManipulation => "ORACLE_MANIPULATION",
            ThreatClassification::FlashLoanAttack => "FLASH_LOAN_ATTACK",
        };
        f.write_str(s)
    }
}

/// Structured output of the reasoner for one tick.
#[derive(Debug, Clone, Serialize)]
pub struct ThreatAssessment {
    pub classification: ThreatClassification,
    pub confidence: f64,
    pub explanation: String,
    pub evidence: Vec<String>,
    pub raw_response: Option<String>,
}

impl ThreatAssessment {
    fn safe_default(explanation: impl Into<String>, evidence: Vec<String>) -> Self {
        Self {
            classification: ThreatClassification::Natural,
            confidence: 0.0,
            explanation: explanation.into(),
            evidence,
            raw_response: None,
        }
    }

    /// The assessment synthesized when `quick_check` declines to call the
    /// LLM at all.
    pub fn no_anomalies() -> Self {
        Self::safe_default("No anomalies detected", Vec::new())
    }
}

/// Seam over the hosted LLM so the pipeline can be tested without a network
/// call. Implementations return the raw model text; `Reasoner` owns all
/// parsing and fallback behavior.
#[async_trait::async_trait]
pub trait LlmClient {
    async fn generate(&self, prompt: &str) -> Result<String, crate::errors::LlmError>;
}

#[derive(Deserialize)]
struct RawAssessment {
    classification: Option<String>,
    confidence: Option<f64>,
    explanation: Option<String>,
    evidence: Option<serde_json::Value>,
}

fn strip_markdown_fences(text: &str) -> &str {
    let mut t = text.trim();
    if let Some(rest) = t.strip_prefix("```json") {
        t = rest;
    } else if let Some(rest) = t.strip_prefix("```") {
        t = rest;
    }
    if let Some(rest) = t.strip_suffix("```") {
        t = rest;
    }
    t.trim()
}

/// Parses the model's raw text into a fields-validated assessment, or the
/// specific `LlmError` that explains why it couldn't: malformed JSON after
/// fence-stripping, or a schema field missing outright. `parse_llm_response`
/// is the only caller; it converts either error into the safe NATURAL/0.0
/// default rather than ever propagating one.
fn try_parse_llm_response(raw: &str) -> Result<ThreatAssessment, LlmError> {
    let cleaned = strip_markdown_fences(raw);

    let parsed: RawAssessment =
        serde_json::from_str(cleaned).map_err(|e| LlmError::InvalidJson(e.to_string()))?;

    let classification_raw = parsed
        .classification
        .ok_or_else(|| LlmError::MissingField("classification".to_string()))?;
    let confidence_raw = parsed
        .confidence
        .ok_or_else(|| LlmError::MissingField("confidence".to_string()))?;
    let explanation = parsed
        .explanation
        .ok_or_else(|| LlmError::MissingField("explanation".to_string()))?;
    let evidence_raw = parsed
        .evidence
        .ok_or_else(|| LlmError::MissingField("evidence".to_string()))?;

    let classification = match classification_raw.as_str() {
        "NATURAL" => ThreatClassification::Natural,
        "ORACLE_MANIPULATION" => ThreatClassification::OracleManipulation,
        "FLASH_LOAN_ATTACK" => ThreatClassification::FlashLoanAttack,
        _ => ThreatClassification::Natural,
    };

    let confidence = confidence_raw.clamp(0.0, 1.0);

    let evidence = match evidence_raw {
        serde_json::Value::Array(items) => items
            .into_iter()
            .map(|v| match v {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            })
            .collect(),
        other => vec![other.to_string()],
    };

    Ok(ThreatAssessment {
        classification,
        confidence,
        explanation,
        evidence,
        raw_response: Some(raw.to_string()),
    })
}

fn parse_llm_response(raw: &str) -> ThreatAssessment {
    match try_parse_llm_response(raw) {
        Ok(assessment) => assessment,
        Err(LlmError::InvalidJson(detail)) => ThreatAssessment {
            raw_response: Some(raw.to_string()),
            ..ThreatAssessment::safe_default(
                "Failed to parse LLM response",
                vec![format!("Parse error: {detail}")],
            )
        },
        Err(LlmError::MissingField(field)) => ThreatAssessment {
            raw_response: Some(raw.to_string()),
            ..ThreatAssessment::safe_default(format!("Missing field: {field}"), Vec::new())
        },
        Err(e) => ThreatAssessment {
            raw_response: Some(raw.to_string()),
            ..ThreatAssessment::safe_default(e.to_string(), Vec::new())
        },
    }
}

fn state_signature(ctx: &AnalysisContext) -> String {
    format!(
        "{:.2}_{:.10}_{}_{}",
        ctx.oracle_price, ctx.amm_spot_price, ctx.liquidation_count, ctx.amm_swaps_this_block
    )
}

fn context_hash(ctx: &AnalysisContext) -> String {
    // `serde_json::to_value` + `BTreeMap` round-trip gives us a canonical,
    // sort-keyed encoding equivalent to `json.dumps(..., sort_keys=True)`.
    let value = serde_json::to_value(ctx).expect("AnalysisContext always serializes");
    let canonical: std::collections::BTreeMap<String, serde_json::Value> =
        match value {
            serde_json::Value::Object(map) => map.into_iter().collect(),
            _ => Default::default(),
        };
    let canonical_json = serde_json::to_string(&canonical).unwrap_or_default();
    let digest = Sha256::digest(canonical_json.as_bytes());
    hex::encode(digest)[..CONTEXT_HASH_HEX_LEN].to_string()
}

/// Deterministic anomaly gate plus LLM analyzer, with in-memory
/// deduplication state that is intentionally never reset except on process
/// restart (spec design note: resetting on a classification flip would let
/// an attacker oscillate inputs to defeat the gate).
pub struct Reasoner {
    llm: Box<dyn LlmClient + Send + Sync>,
    last_llm_block: Option<u64>,
    last_llm_call_hash: Option<String>,
    llm_calls_count: u64,
    blocks_processed: u64,
    state_signatures: VecDeque<String>,
    static_state_warnings: u64,
    analyzed_events: HashSet<String>,
}

impl Reasoner {
    pub fn new(llm: Box<dyn LlmClient + Send + Sync>) -> Self {
        Self {
            llm,
            last_llm_block: None,
            last_llm_call_hash: None,
            llm_calls_count: 0,
            blocks_processed: 0,
            state_signatures: VecDeque::with_capacity(STATE_SIGNATURE_RING_CAPACITY),
            static_state_warnings: 0,
            analyzed_events: HashSet::new(),
        }
    }

    pub fn llm_calls_count(&self) -> u64 {
        self.llm_calls_count
    }

    pub fn blocks_processed(&self) -> u64 {
        self.blocks_processed
    }

    /// Deterministic gate. Increments `blocks_processed` and updates the
    /// static-state ring as side effects; otherwise pure.
    pub fn quick_check(&mut self, ctx: &AnalysisContext) -> bool {
        self.blocks_processed += 1;

        if self.state_signatures.len() == STATE_SIGNATURE_RING_CAPACITY {
            self.state_signatures.pop_front();
        }
        self.state_signatures.push_back(state_signature(ctx));

        if self.state_signatures.len() >= STATE_SIGNATURE_MIN_SAMPLES {
            let unique: HashSet<&String> = self.state_signatures.iter().collect();
            if unique.len() <= STATE_SIGNATURE_IDLE_UNIQUE_MAX {
                self.static_state_warnings += 1;
                tracing::debug!(
                    unique_states = unique.len(),
                    deviation_pct = ctx.price_deviation_pct,
                    "static chain state detected, suppressing LLM analysis"
                );
                return false;
            }
        }

        let has_recent_activity = ctx.liquidation_count > 0
            || ctx.large_swap_count > 0
            || ctx.amm_swaps_this_block > 0
            || ctx.oracle_updates_this_block > 0;

        if !has_recent_activity {
            if ctx.price_deviation_pct < IDLE_DEVIATION_FLOOR_PCT {
                return false;
            }
            if ctx.price_deviation_pct >= IDLE_DEVIATION_FORCE_PCT {
                tracing::warn!(
                    deviation_pct = ctx.price_deviation_pct,
                    "high price deviation with no observed activity, forcing LLM analysis"
                );
                return true;
            }
        }

        if !ctx.recent_liquidation_keys.is_empty() {
            for key in &ctx.recent_liquidation_keys {
                if self.analyzed_events.contains(key) {
                    return false;
                }
                self.analyzed_events.insert(key.clone());
            }
            if self.analyzed_events.len() > LIQUIDATION_CACHE_CAP {
                self.analyzed_events.clear();
            }
        }

        if ctx.price_deviation_pct > CRITICAL_DEVIATION_PCT {
            return true;
        }

        if ctx.indicators.multiple_oracle_updates_same_block && ctx.oracle_updates_this_block > 1 {
            return true;
        }

        if ctx.amm_swaps_this_block > 3 && ctx.large_swap_count > 0 {
            return true;
        }

        if ctx.indicators.same_block_price_recovery_pattern {
            return true;
        }

        if ctx.indicators.liquidation_after_price_drop && ctx.liquidation_count > 0 {
            return true;
        }

        if ctx.recent_price_changes.iter().any(|c| c.abs() > 10.0) {
            return true;
        }

        false
    }

    /// Calls the LLM, subject to two deduplication layers: the same block
    /// number never triggers a second call, and an identical canonical
    /// context never triggers a second call.
    pub async fn analyze(&mut self, ctx: &AnalysisContext) -> ThreatAssessment {
        if Some(ctx.block_number) == self.last_llm_block {
            return ThreatAssessment::safe_default(
                "Block already analyzed (deduplication)",
                Vec::new(),
            );
        }

        let hash = context_hash(ctx);
        if Some(&hash) == self.last_llm_call_hash.as_ref() {
            return ThreatAssessment::safe_default(
                "Identical context already analyzed",
                Vec::new(),
            );
        }

        self.llm_calls_count += 1;
        self.last_llm_block = Some(ctx.block_number);
        self.last_llm_call_hash = Some(hash);

        let context_json = serde_json::to_string_pretty(ctx).unwrap_or_default();
        let prompt = format!(
            "{SYSTEM_PROMPT}\n\nCURRENT MARKET DATA:\n{context_json}\n\nAnalyze this data for potential manipulation attacks. Respond with JSON only."
        );

        tracing::info!(
            block = ctx.block_number,
            llm_calls = self.llm_calls_count,
            blocks_processed = self.blocks_processed,
            "calling LLM for threat analysis"
        );

        match self.llm.generate(&prompt).await {
            Ok(text) if text.trim().is_empty() => {
                ThreatAssessment::safe_default("Empty LLM response", Vec::new())
            }
            Ok(text) => {
                let assessment = parse_llm_response(&text);
                tracing::info!(
                    classification = %assessment.classification,
                    confidence = assessment.confidence,
                    llm_efficiency = format!(
                        "{}/{} blocks per call",
                        self.blocks_processed, self.llm_calls_count
                    ),
                    "threat assessment completed"
                );
                assessment
            }
            Err(e) => ThreatAssessment::safe_default(format!("Analysis error: {e}"), Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubClient {
        response: String,
    }

    #[async_trait::async_trait]
    impl LlmClient for StubClient {
        async fn generate(&self, _prompt: &str) -> Result<String, crate::errors::LlmError> {
            Ok(self.response.clone())
        }
    }

    fn base_context() -> AnalysisContext {
        AnalysisContext {
            block_number: 1,
            oracle_price: 2000.0,
            oracle_twap: 2000.0,
            amm_spot_price: 2000.0,
            price_deviation_pct: 0.1,
            oracle_updates_this_block: 0,
            amm_swaps_this_block: 0,
            large_swap_count: 0,
            liquidation_count: 0,
            amm_base_reserve: 500.0,
            amm_quote_reserve: 1_000_000.0,
            vault_total_collateral: 500.0,
            vault_total_loans: 1_000_000.0,
            amm_paused: false,
            vault_paused: false,
            liquidations_blocked: false,
            indicators: crate::observer::context::AnomalyIndicators::default(),
            recent_price_changes: Vec::new(),
            recent_liquidation_keys: Vec::new(),
        }
    }

    #[test]
    fn quick_check_skips_when_idle_and_deviation_small() {
        let mut reasoner = Reasoner::new(Box::new(StubClient { response: String::new() }));
        assert!(!reasoner.quick_check(&base_context()));
    }

    #[test]
    fn quick_check_fires_on_critical_deviation() {
        let mut reasoner = Reasoner::new(Box::new(StubClient { response: String::new() }));
        let mut ctx = base_context();
        ctx.price_deviation_pct = 60.0;
        ctx.amm_swaps_this_block = 1;
        assert!(reasoner.quick_check(&ctx));
    }

    #[test]
    fn quick_check_forces_true_on_high_deviation_with_no_activity() {
        let mut reasoner = Reasoner::new(Box::new(StubClient { response: String::new() }));
        let mut ctx = base_context();
        ctx.price_deviation_pct = 35.0;
        assert!(reasoner.quick_check(&ctx));
    }

    #[test]
    fn quick_check_suppresses_llm_on_static_chain() {
        let mut reasoner = Reasoner::new(Box::new(StubClient { response: String::new() }));
        let mut ctx = base_context();
        ctx.price_deviation_pct = 60.0;
        ctx.amm_swaps_this_block = 1;
        for _ in 0..6 {
            reasoner.quick_check(&ctx);
        }
        assert!(!reasoner.quick_check(&ctx));
    }

    #[tokio::test]
    async fn analyze_dedups_on_repeated_block_number() {
        let mut reasoner = Reasoner::new(Box::new(StubClient {
            response: r#"{"classification":"NATURAL","confidence":0.1,"explanation":"ok","evidence":[]}"#.to_string(),
        }));
        let ctx = base_context();
        let first = reasoner.analyze(&ctx).await;
        assert_eq!(first.explanation, "ok");

        let second = reasoner.analyze(&ctx).await;
        assert_eq!(second.explanation, "Block already analyzed (deduplication)");
        assert_eq!(reasoner.llm_calls_count(), 1);
    }

    #[tokio::test]
    async fn analyze_falls_back_to_safe_default_on_malformed_json() {
        let mut reasoner = Reasoner::new(Box::new(StubClient {
            response: "not json".to_string(),
        }));
        let assessment = reasoner.analyze(&base_context()).await;
        assert_eq!(assessment.classification, ThreatClassification::Natural);
        assert_eq!(assessment.confidence, 0.0);
        assert_eq!(assessment.explanation, "Failed to parse LLM response");
    }

    #[test]
    fn parser_clamps_out_of_range_confidence() {
        let assessment = parse_llm_response(
            r#"{"classification":"FLASH_LOAN_ATTACK","confidence":1.4,"explanation":"x","evidence":["a"]}"#,
        );
        assert_eq!(assessment.confidence, 1.0);
    }

    #[test]
    fn parser_strips_markdown_fences() {
        let raw = "```json\n{\"classification\":\"NATURAL\",\"confidence\":0.2,\"explanation\":\"x\",\"evidence\":[]}\n```";
        let assessment = parse_llm_response(raw);
        assert_eq!(assessment.classification, ThreatClassification::Natural);
    }

    #[test]
    fn parser_coerces_non_list_evidence_to_single_element_list() {
        let assessment = parse_llm_response(
            r#"{"classification":"NATURAL","confidence":0.2,"explanation":"x","evidence":"single string"}"#,
        );
        assert_eq!(assessment.evidence, vec!["single string".to_string()]);
    }

    #[test]
    fn parser_reports_missing_field_by_name() {
        let assessment =
            parse_llm_response(r#"{"confidence":0.2,"explanation":"x","evidence":[]}"#);
        assert_eq!(assessment.explanation, "Missing field: classification");
        assert_eq!(assessment.classification, ThreatClassification::Natural);
        assert_eq!(assessment.confidence, 0.0);
    }

    #[test]
    fn try_parse_surfaces_invalid_json_as_llm_error() {
        let err = try_parse_llm_response("not json").unwrap_err();
        assert!(matches!(err, LlmError::InvalidJson(_)));
    }

    #[test]
    fn try_parse_surfaces_missing_field_as_llm_error() {
        let err = try_parse_llm_response(r#"{"classification":"NATURAL"}"#).unwrap_err();
        assert!(matches!(err, LlmError::MissingField(field) if field == "confidence"));
    }
}
