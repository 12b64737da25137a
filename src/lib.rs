//! Sentry Agent Library
//!
//! Exposes the OBSERVE -> REASON -> DECIDE -> ACT -> REPORT pipeline for use
//! by the agent binary and the integration test suite.

pub mod actor;
pub mod agent;
pub mod chain;
pub mod config;
pub mod decider;
pub mod errors;
pub mod http;
pub mod observer;
pub mod reasoner;
pub mod reporter;

pub use agent::{Agent, AgentStatus};
pub use config::AgentConfig;
pub use decider::{ActionType, PolicyDecision, PolicyEngine};
pub use observer::{MarketSnapshot, Observer, PriceData};
pub use reasoner::{Reasoner, ThreatAssessment, ThreatClassification};
