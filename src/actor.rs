//! Actor
//!
//! The sole caller of the chain gateway's mutating methods — the agent
//! account's signing key and nonce are a single-owner resource, held
//! exclusively here, matching `actor.py`'s role as the only component that
//! touches the signing `Web3` instance.

use std::sync::Arc;

use crate::chain::{ChainGateway, ALREADY_PAUSED_SENTINEL};
use crate::decider::{ActionType, PolicyDecision};
use crate::errors::ChainError;

/// Sentinel returned in place of a transaction hash when a revert reason
/// indicates the target was already in the desired state (pause-family
/// calls).
pub const ALREADY_DONE_SENTINEL: &str = "already_paused";
/// Sentinel returned in place of a transaction hash when a `blockLiquidations`
/// revert indicates liquidations were already blocked.
pub const ALREADY_BLOCKED_SENTINEL: &str = "already_blocked";
/// Substring `actor.py`'s proactive-path exception handler matches against,
/// case-insensitively, to recognize a redundant `blockLiquidations` call.
const ALREADY_BLOCKED_REASON: &str = "already blocked";
/// Reasons longer than this are truncated before submission (gas cost).
const MAX_REASON_LEN: usize = 200;

fn truncate_reason(reason: &str) -> String {
    if reason.chars().count() <= MAX_REASON_LEN {
        reason.to_string()
    } else {
        reason.chars().take(MAX_REASON_LEN).collect()
    }
}

/// Coerces a revert whose reason contains `"Already paused"` into the
/// idempotent success sentinel; everything else propagates.
fn coerce_already_done(result: Result<String, ChainError>) -> Result<String, ChainError> {
    match result {
        Ok(tx_hash) => Ok(tx_hash),
        Err(ChainError::Reverted { reason, .. }) if reason.contains(ALREADY_PAUSED_SENTINEL) => {
            Ok(ALREADY_DONE_SENTINEL.to_string())
        }
        Err(e) => Err(e),
    }
}

/// Coerces a `blockLiquidations` revert whose reason contains `"already
/// blocked"` (case-insensitively, matching `main.py`'s proactive-path
/// `except Exception as e: if "already blocked" in str(e).lower()`) into the
/// idempotent success sentinel; everything else propagates.
fn coerce_already_blocked(result: Result<String, ChainError>) -> Result<String, ChainError> {
    match result {
        Ok(tx_hash) => Ok(tx_hash),
        Err(ChainError::Reverted { reason, .. })
            if reason.to_ascii_lowercase().contains(ALREADY_BLOCKED_REASON) =>
        {
            Ok(ALREADY_BLOCKED_SENTINEL.to_string())
        }
        Err(e) => Err(e),
    }
}

pub struct Actor {
    chain: Arc<ChainGateway>,
}

impl Actor {
    pub fn new(chain: Arc<ChainGateway>) -> Self {
        Self { chain }
    }

    pub async fn pause_protocol(&self, reason: &str) -> Result<String, ChainError> {
        let reason = truncate_reason(reason);
        coerce_already_done(self.chain.pause_vault(&reason).await)
    }

    pub async fn block_liquidations(&self) -> Result<String, ChainError> {
        coerce_already_blocked(self.chain.block_liquidations().await)
    }

    pub async fn flag_oracle(&self, reason: &str) -> Result<String, ChainError> {
        let reason = truncate_reason(reason);
        coerce_already_done(self.chain.flag_oracle(&reason).await)
    }

    pub async fn pause_amm(&self) -> Result<String, ChainError> {
        coerce_already_done(self.chain.pause_amm().await)
    }

    /// Manual recovery path after security review. Never invoked by the
    /// automated loop.
    #[allow(dead_code)]
    pub async fn unpause_amm(&self) -> Result<String, ChainError> {
        coerce_already_done(self.chain.unpause_amm().await)
    }

    /// Dispatches by `decision.action`. Only the action types whose policy
    /// table row marks `execute_on_chain = true` submit a transaction; all
    /// others are no-ops returning `None`.
    pub async fn execute(&self, decision: &PolicyDecision) -> Option<Result<String, ChainError>> {
        if !decision.execute_on_chain {
            return None;
        }

        match decision.action {
            ActionType::PauseProtocol => Some(self.pause_protocol(&decision.reason).await),
            ActionType::BlockLiquidations => Some(self.block_liquidations().await),
            ActionType::FlagOracle => Some(self.flag_oracle(&decision.reason).await),
            ActionType::Monitor | ActionType::None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_reason_is_identity_under_the_limit() {
        let reason = "short reason";
        assert_eq!(truncate_reason(reason), reason);
    }

    #[test]
    fn truncate_reason_caps_at_200_chars() {
        let reason = "x".repeat(250);
        assert_eq!(truncate_reason(&reason).chars().count(), 200);
    }

    #[test]
    fn already_paused_revert_coerces_to_sentinel() {
        let result: Result<String, ChainError> = Err(ChainError::Reverted {
            tx_hash: "0xdead".to_string(),
            reason: "Already paused".to_string(),
        });
        assert_eq!(coerce_already_done(result).unwrap(), ALREADY_DONE_SENTINEL);
    }

    #[test]
    fn unrelated_revert_propagates() {
        let result: Result<String, ChainError> = Err(ChainError::Reverted {
            tx_hash: "0xdead".to_string(),
            reason: "insufficient collateral".to_string(),
        });
        assert!(coerce_already_done(result).is_err());
    }

    #[test]
    fn already_blocked_revert_coerces_case_insensitively() {
        let result: Result<String, ChainError> = Err(ChainError::Reverted {
            tx_hash: "0xdead".to_string(),
            reason: "Liquidations Already Blocked".to_string(),
        });
        assert_eq!(
            coerce_already_blocked(result).unwrap(),
            ALREADY_BLOCKED_SENTINEL
        );
    }

    #[test]
    fn already_blocked_coercion_does_not_match_already_paused() {
        let result: Result<String, ChainError> = Err(ChainError::Reverted {
            tx_hash: "0xdead".to_string(),
            reason: "Already paused".to_string(),
        });
        assert!(coerce_already_blocked(result).is_err());
    }
}
