//! Scenario engine: arrange, act, assert, and always tear down.
//!
//! A [`Scenario`] receives a fresh [`ScenarioContext`] that owns every node
//! it opens. [`run_scenario`] tears the context down whatever the outcome
//! and folds the result into a [`ScenarioReport`].

pub mod catalog;
mod context;
pub mod timing;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::Instant;
use tracing::{error, info};

pub use context::ScenarioContext;
pub use timing::{TimingProfile, Wait};

use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::report::ScenarioReport;

#[async_trait]
pub trait Scenario: Send + Sync {
    /// Catalog name, used on the command line.
    fn name(&self) -> &'static str;

    /// Certification test case this scenario reproduces.
    fn description(&self) -> &'static str;

    async fn run(&self, ctx: &mut ScenarioContext) -> Result<()>;
}

/// Run one scenario against DUTs described by `config`.
pub async fn run_scenario(scenario: &dyn Scenario, config: &HarnessConfig) -> ScenarioReport {
    let started_at = Utc::now();
    let clock = Instant::now();
    let mut ctx = ScenarioContext::new(config.clone());

    info!(scenario = scenario.name(), "starting: {}", scenario.description());
    let result = scenario.run(&mut ctx).await.map_err(|e| {
        let last = match &e {
            HarnessError::Assertion { last_exchange, .. } => last_exchange.clone(),
            _ => None,
        }
        .or_else(|| ctx.last_exchange());
        error!(scenario = scenario.name(), error = %e, "scenario failed");
        (e, last)
    });

    let warnings = ctx.teardown().await;
    if result.is_ok() {
        info!(scenario = scenario.name(), "passed");
    }
    ScenarioReport::new(scenario.name(), started_at, clock.elapsed(), result, warnings)
}
