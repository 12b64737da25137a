//! Decider (Policy Engine)
//!
//! A pure total function mapping a `ThreatAssessment` to a `PolicyDecision`,
//! plus the post-hoc override that enforces idempotence of irreversible
//! actions. Mirrors the ordered-rule structure of `decider.py`'s `decide`.

use serde::Serialize;

use crate::reasoner::{ThreatAssessment, ThreatClassification};

/// The five representable actions. `PAUSE_AMM`/`PROACTIVE_PAUSE_AMM` are not
/// members here — they are string labels the Agent Loop and Reporter attach
/// directly to a `SecurityEvent` for the proactive fast path, which never
/// goes through `decide`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    None,
    Monitor,
    BlockLiquidations,
    PauseProtocol,
    FlagOracle,
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ActionType::None => "NONE",
            ActionType::Monitor => "MONITOR",
            ActionType::BlockLiquidations => "BLOCK_LIQUIDATIONS",
            ActionType::PauseProtocol => "PAUSE_PROTOCOL",
            ActionType::FlagOracle => "FLAG_ORACLE",
        };
        f.write_str(s)
    }
}

/// The policy engine's verdict for one tick.
#[derive(Debug, Clone, Serialize)]
pub struct PolicyDecision {
    pub action: ActionType,
    pub reason: String,
    pub execute_on_chain: bool,
    pub confidence: f64,
    pub threat_classification: ThreatClassification,
    pub evidence: Vec<String>,
}

impl PolicyDecision {
    fn new(
        action: ActionType,
        reason: impl Into<String>,
        execute_on_chain: bool,
        assessment: &ThreatAssessment,
    ) -> Self {
        debug_assert!(
            action != ActionType::None || !execute_on_chain,
            "NONE action must never execute on-chain"
        );
        Self {
            action,
            reason: reason.into(),
            execute_on_chain,
            confidence: assessment.confidence,
            threat_classification: assessment.classification,
            evidence: assessment.evidence.clone(),
        }
    }
}

/// Policy thresholds. These are the sole source of truth for pause/block
/// confidence gates — no comment anywhere in this codebase should restate
/// a different figure.
pub struct PolicyEngine {
    pub pause_confidence_threshold: f64,
    pub block_liquidation_threshold: f64,
}

impl PolicyEngine {
    pub fn new(pause_confidence_threshold: f64, block_liquidation_threshold: f64) -> Self {
        Self {
            pause_confidence_threshold,
            block_liquidation_threshold,
        }
    }

    /// Ordered rules, first match wins. Deterministic: identical input
    /// always yields an identical decision.
    pub fn decide(&self, assessment: &ThreatAssessment) -> PolicyDecision {
        use ThreatClassification::*;

        if assessment.classification == FlashLoanAttack
            && assessment.confidence >= self.pause_confidence_threshold
        {
            return PolicyDecision::new(
                ActionType::PauseProtocol,
                "Flash loan attack detected with high confidence",
                true,
                assessment,
            );
        }

        if assessment.classification == OracleManipulation
            && assessment.confidence >= self.block_liquidation_threshold
        {
            return PolicyDecision::new(
                ActionType::BlockLiquidations,
                "Oracle manipulation detected, blocking liquidations",
                true,
                assessment,
            );
        }

        if assessment.classification == FlashLoanAttack
            && assessment.confidence >= self.block_liquidation_threshold
        {
            return PolicyDecision::new(
                ActionType::BlockLiquidations,
                "Flash loan attack detected, blocking liquidations as a precaution",
                true,
                assessment,
            );
        }

        if assessment.classification != Natural && assessment.confidence >= 0.50 {
            return PolicyDecision::new(
                ActionType::Monitor,
                "Elevated threat signal below action threshold, monitoring",
                false,
                assessment,
            );
        }

        if assessment.classification == OracleManipulation {
            return PolicyDecision::new(
                ActionType::FlagOracle,
                "Possible oracle manipulation at low confidence, flagging for review",
                false,
                assessment,
            );
        }

        PolicyDecision::new(ActionType::None, "No action warranted", false, assessment)
    }

    /// Demotes `PAUSE_PROTOCOL` to `MONITOR` if the vault is already paused,
    /// and `BLOCK_LIQUIDATIONS` to `MONITOR` if liquidations are already
    /// blocked. Idempotent: applying it twice has no further effect.
    pub fn override_for_state(
        &self,
        decision: PolicyDecision,
        vault_paused: bool,
        liquidations_blocked: bool,
    ) -> PolicyDecision {
        match decision.action {
            ActionType::PauseProtocol if vault_paused => PolicyDecision {
                action: ActionType::Monitor,
                reason: format!("{} (vault already paused)", decision.reason),
                execute_on_chain: false,
                ..decision
            },
            ActionType::BlockLiquidations if liquidations_blocked => PolicyDecision {
                action: ActionType::Monitor,
                reason: format!("{} (liquidations already blocked)", decision.reason),
                execute_on_chain: false,
                ..decision
            },
            _ => decision,
        }
    }
}
