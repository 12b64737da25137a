//! Agent Loop
//!
//! Sequences Observer -> (proactive shortcut?) -> Reasoner -> Decider ->
//! Actor -> Reporter once per tick, and hosts the proactive fast path that
//! bypasses the LLM entirely on an overwhelming deviation. Mirrors
//! `main.py`'s `AMENAgent.run_cycle`/`run`, restructured around a shared,
//! racily-readable status handle instead of a module-global.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::watch;

use crate::actor::Actor;
use crate::chain::ChainGateway;
use crate::config::AgentConfig;
use crate::decider::{ActionType, PolicyDecision, PolicyEngine};
use crate::observer::Observer;
use crate::reasoner::{LlmClient, Reasoner, ThreatAssessment, ThreatClassification};
use crate::reporter::Reporter;

/// Deviation above which the secondary proactive AMM pause fires.
const SECONDARY_PAUSE_CONFIDENCE_FLOOR: f64 = 0.7;
/// Delay between the proactive AMM pause and the restore-price request, to
/// let the dashboard render the attack before it is neutralized.
const PROACTIVE_DEFENSE_DISPLAY_DELAY: Duration = Duration::from_secs(5);
/// Sleep applied after an unhandled tick-level error before the next tick.
const TICK_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Read-only snapshot of the loop's counters, shared with the health
/// endpoint. Written only by the loop task; read racily elsewhere, which is
/// acceptable since this is observability, not correctness.
#[derive(Debug, Clone, Serialize)]
pub struct AgentStatus {
    pub status: String,
    pub cycles: u64,
    pub threats_detected: u64,
    pub actions_taken: u64,
    pub last_snapshot_timestamp: Option<DateTime<Utc>>,
    pub last_classification: Option<ThreatClassification>,
    pub last_decision: Option<ActionType>,
}

impl Default for AgentStatus {
    fn default() -> Self {
        Self {
            status: "starting".to_string(),
            cycles: 0,
            threats_detected: 0,
            actions_taken: 0,
            last_snapshot_timestamp: None,
            last_classification: None,
            last_decision: None,
        }
    }
}

/// Pure predicate for the proactive fast path. `proactive_pause_deviation`
/// arrives as a fraction of 1 from config; the caller is responsible for
/// the single `* 100` conversion to match `price_deviation_pct`'s units
/// before calling this. Boundary case: deviation exactly at the threshold
/// must NOT fire (strict `>`).
fn proactive_shortcut_should_fire(
    deviation_pct: f64,
    threshold_pct: f64,
    amm_paused: bool,
    vault_paused: bool,
) -> bool {
    deviation_pct > threshold_pct && !amm_paused && !vault_paused
}

pub struct Agent {
    config: AgentConfig,
    observer: Observer,
    reasoner: Reasoner,
    decider: PolicyEngine,
    actor: Actor,
    reporter: Reporter,
    status: Arc<RwLock<AgentStatus>>,
}

impl Agent {
    pub fn new(config: AgentConfig, chain: Arc<ChainGateway>, llm: Box<dyn LlmClient + Send + Sync>) -> Self {
        let observer = Observer::new(
            chain.clone(),
            config.price_history_window,
            config.price_deviation_threshold,
        );
        let reasoner = Reasoner::new(llm);
        let decider = PolicyEngine::new(
            config.pause_confidence_threshold,
            config.block_liquidation_threshold,
        );
        let actor = Actor::new(chain);
        let reporter = Reporter::new(config.backend_url.clone());

        Self {
            config,
            observer,
            reasoner,
            decider,
            actor,
            reporter,
            status: Arc::new(RwLock::new(AgentStatus {
                status: "healthy".to_string(),
                ..Default::default()
            })),
        }
    }

    pub fn status_handle(&self) -> Arc<RwLock<AgentStatus>> {
        self.status.clone()
    }

    pub fn status(&self) -> AgentStatus {
        self.status.read().clone()
    }

    /// One full OBSERVE -> REASON -> DECIDE -> ACT -> REPORT pass.
    pub async fn run_cycle(&mut self) -> anyhow::Result<()> {
        {
            let mut status = self.status.write();
            status.cycles += 1;
        }

        let snapshot = self.observer.observe().await?;

        {
            let mut status = self.status.write();
            status.last_snapshot_timestamp = Some(snapshot.timestamp);
        }

        // Proactive shortcut: an overwhelming deviation is acted on directly,
        // bypassing the LLM entirely because its latency exceeds a block time.
        let proactive_threshold_pct = self.config.proactive_pause_deviation * 100.0;
        if proactive_shortcut_should_fire(
            snapshot.price_deviation_pct,
            proactive_threshold_pct,
            snapshot.amm_paused,
            snapshot.vault_paused,
        ) {
            tracing::warn!(
                deviation_pct = snapshot.price_deviation_pct,
                threshold_pct = proactive_threshold_pct,
                "critical deviation detected, activating proactive defense"
            );

            match self.actor.pause_amm().await {
                Ok(tx_hash) => {
                    {
                        let mut status = self.status.write();
                        status.actions_taken += 1;
                        status.threats_detected += 1;
                    }

                    match self.actor.block_liquidations().await {
                        Ok(tx_hash) if tx_hash == crate::actor::ALREADY_BLOCKED_SENTINEL => {
                            tracing::info!("liquidations already blocked, protection already active");
                        }
                        Ok(_) => {
                            let mut status = self.status.write();
                            status.actions_taken += 1;
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "could not block liquidations during proactive defense");
                        }
                    }

                    self.reporter.report_proactive_defense(&snapshot).await;

                    tokio::time::sleep(PROACTIVE_DEFENSE_DISPLAY_DELAY).await;
                    self.reporter.restore_price().await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to pause AMM during proactive defense");
                }
            }

            return Ok(());
        }

        self.reporter.report_observation(&snapshot).await;

        let context = self.observer.context(&snapshot);
        let assessment = if self.reasoner.quick_check(&context) {
            tracing::warn!(block = snapshot.block_number, "anomaly detected, invoking LLM");
            self.reasoner.analyze(&context).await
        } else {
            ThreatAssessment::no_anomalies()
        };

        {
            let mut status = self.status.write();
            status.last_classification = Some(assessment.classification);
        }

        if assessment.classification != ThreatClassification::Natural {
            self.reporter.report_assessment(&snapshot, &assessment).await;
            let mut status = self.status.write();
            status.threats_detected += 1;
        }

        let decision = self.decider.decide(&assessment);
        let decision = self.decider.override_for_state(
            decision,
            snapshot.vault_paused,
            snapshot.liquidations_blocked,
        );

        {
            let mut status = self.status.write();
            status.last_decision = Some(decision.action);
        }

        if decision.action != ActionType::None {
            self.reporter.report_decision(&snapshot, &decision).await;
        }

        if decision.execute_on_chain {
            self.execute_and_report(&snapshot, &decision).await;
        }

        self.maybe_secondary_amm_pause(&snapshot, &assessment).await;

        Ok(())
    }

    async fn execute_and_report(&mut self, snapshot: &crate::observer::MarketSnapshot, decision: &PolicyDecision) {
        match self.actor.execute(decision).await {
            Some(Ok(tx_hash)) => {
                let mut status = self.status.write();
                status.actions_taken += 1;
                drop(status);
                self.reporter.report_action(snapshot, decision, Some(tx_hash)).await;
            }
            Some(Err(e)) => {
                tracing::error!(error = %e, action = %decision.action, "on-chain action failed");
                self.reporter.report_action(snapshot, decision, None).await;
            }
            None => {}
        }
    }

    /// Pauses the AMM outright when the reasoner is highly confident in an
    /// active attack, independent of whatever `decide` chose — the policy
    /// table can route low-severity classifications to MONITOR while this
    /// still protects the AMM specifically.
    async fn maybe_secondary_amm_pause(
        &mut self,
        snapshot: &crate::observer::MarketSnapshot,
        assessment: &ThreatAssessment,
    ) {
        let is_attack = matches!(
            assessment.classification,
            ThreatClassification::FlashLoanAttack | ThreatClassification::OracleManipulation
        );

        if is_attack && assessment.confidence > SECONDARY_PAUSE_CONFIDENCE_FLOOR && !snapshot.amm_paused {
            match self.actor.pause_amm().await {
                Ok(tx_hash) => {
                    let mut status = self.status.write();
                    status.actions_taken += 1;
                    drop(status);
                    self.reporter.report_amm_pause(snapshot, assessment, Some(tx_hash)).await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to pause AMM on high-confidence threat");
                }
            }
        }
    }

    /// Runs ticks on `poll_interval` cadence until `shutdown` is signaled.
    /// Cooperative: finishes the in-flight tick, never cancels it.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        let poll_interval = Duration::from_secs(self.config.poll_interval);

        while !*shutdown.borrow() {
            if let Err(e) = self.run_cycle().await {
                tracing::error!(error = %e, "error in agent cycle, backing off");
                self.status.write().status = "error".to_string();
                tokio::time::sleep(TICK_ERROR_BACKOFF).await;
                continue;
            }

            if self.status.read().status == "error" {
                self.status.write().status = "healthy".to_string();
            }

            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {}
                _ = shutdown.changed() => {}
            }
        }

        self.shutdown_summary();
    }

    fn shutdown_summary(&mut self) {
        self.status.write().status = "shutting_down".to_string();

        let llm_calls = self.reasoner.llm_calls_count();
        let blocks = self.reasoner.blocks_processed();
        let efficiency = if llm_calls > 0 {
            format!("{:.1} blocks/call", blocks as f64 / llm_calls as f64)
        } else {
            "N/A".to_string()
        };

        let status = self.status.read();
        tracing::info!(
            cycles = status.cycles,
            threats_detected = status.threats_detected,
            actions_taken = status.actions_taken,
            llm_calls,
            blocks_processed = blocks,
            llm_efficiency = %efficiency,
            "agent shutting down"
        );
    }
}
