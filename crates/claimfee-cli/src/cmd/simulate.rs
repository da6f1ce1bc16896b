use crate::cmd::load_config;
use crate::output::{money, print_json, print_table};
use anyhow::Context;
use claimfee_core::collab::{
    Ledger, MemoryLedger, MemoryPermissions, MemoryRegistry, MemorySelections, RegionEntry,
    RegionRegistry, SelectionSource,
};
use claimfee_core::config::Config;
use claimfee_core::geometry::Cuboid;
use claimfee_core::outcome::{ProcessResult, Settlement};
use claimfee_core::pending::PendingPhase;
use claimfee_core::schedule::ManualScheduler;
use claimfee_core::types::{ActionKind, ActorId};
use claimfee_core::workflow::{ActionRequest, Collaborators, TransactionWorkflow};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Scenario file
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Scenario {
    /// Overrides `--config` when present.
    #[serde(default)]
    config: Option<Config>,
    #[serde(default)]
    regions: Vec<RegionEntry>,
    #[serde(default)]
    actors: BTreeMap<String, ActorSetup>,
    #[serde(default)]
    steps: Vec<Step>,
}

#[derive(Debug, Default, Deserialize)]
struct ActorSetup {
    #[serde(default)]
    balance: f64,
    #[serde(default)]
    permissions: Vec<String>,
    #[serde(default)]
    selection: Option<Cuboid>,
    /// Every withdrawal fails, as with a locked bank account.
    #[serde(default)]
    frozen: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
enum Step {
    Quote {
        actor: String,
        action: String,
        region: String,
    },
    Confirm {
        actor: String,
    },
    Cancel {
        actor: String,
    },
    /// Report the outcome of applying the confirmed change.
    Settle {
        actor: String,
        #[serde(default = "default_true")]
        success: bool,
    },
    /// Change (or with no bounds, clear) the actor's selection.
    Select {
        actor: String,
        #[serde(default)]
        bounds: Option<Cuboid>,
    },
    Advance {
        seconds: u64,
    },
}

fn default_true() -> bool {
    true
}

impl Step {
    fn actor(&self) -> Option<&str> {
        match self {
            Step::Quote { actor, .. }
            | Step::Confirm { actor }
            | Step::Cancel { actor }
            | Step::Settle { actor, .. }
            | Step::Select { actor, .. } => Some(actor.as_str()),
            Step::Advance { .. } => None,
        }
    }

    fn describe(&self) -> String {
        match self {
            Step::Quote { action, region, .. } => format!("quote {action} {region}"),
            Step::Confirm { .. } => "confirm".to_string(),
            Step::Cancel { .. } => "cancel".to_string(),
            Step::Settle { success, .. } => {
                if *success {
                    "settle".to_string()
                } else {
                    "settle (failed)".to_string()
                }
            }
            Step::Select {
                bounds: Some(bounds),
                ..
            } => format!("select {bounds}"),
            Step::Select { bounds: None, .. } => "clear selection".to_string(),
            Step::Advance { seconds } => format!("advance {seconds}s"),
        }
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct StepReport {
    index: usize,
    step: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    actor: Option<String>,
    outcome: String,
    result: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct SimulationReport {
    steps: Vec<StepReport>,
    balances: BTreeMap<String, f64>,
    regions: Vec<RegionEntry>,
}

// ---------------------------------------------------------------------------
// Host
// ---------------------------------------------------------------------------

/// In-memory stand-in for the server hosting the workflow. It applies
/// region changes the workflow lets through and rolls them back when
/// settlement fails.
struct Host {
    scheduler: Arc<ManualScheduler>,
    selections: Arc<MemorySelections>,
    registry: Arc<MemoryRegistry>,
    ledger: Arc<MemoryLedger>,
    workflow: TransactionWorkflow,
    actors: Vec<ActorId>,
}

impl Host {
    fn new(config: Config, scenario: &Scenario) -> Self {
        let scheduler = Arc::new(ManualScheduler::new());
        let selections = Arc::new(MemorySelections::new());
        let registry = Arc::new(MemoryRegistry::from_entries(scenario.regions.clone()));
        let permissions = Arc::new(MemoryPermissions::new());
        let ledger = Arc::new(MemoryLedger::new());

        let mut actors = Vec::new();
        for (name, setup) in &scenario.actors {
            let actor = ActorId::new(name.as_str());
            ledger.set_balance(&actor, setup.balance);
            if setup.frozen {
                ledger.freeze(&actor);
            }
            for node in &setup.permissions {
                permissions.grant(&actor, node.as_str());
            }
            if let Some(bounds) = setup.selection {
                selections.select(&actor, bounds);
            }
            actors.push(actor);
        }

        let workflow = TransactionWorkflow::new(
            config,
            Collaborators {
                selections: selections.clone(),
                registry: registry.clone(),
                permissions,
                ledger: ledger.clone(),
                scheduler: scheduler.clone(),
            },
        );

        Self {
            scheduler,
            selections,
            registry,
            ledger,
            workflow,
            actors,
        }
    }

    fn run_step(&self, step: &Step) -> anyhow::Result<(String, serde_json::Value)> {
        match step {
            Step::Quote {
                actor,
                action,
                region,
            } => {
                let actor = ActorId::new(actor.as_str());
                let kind: ActionKind = action
                    .parse()
                    .with_context(|| format!("invalid action in quote step: '{action}'"))?;
                let request = ActionRequest::new(kind, region.as_str())
                    .with_args(vec![action.clone(), region.clone()]);
                let result = self.workflow.quote_request(&actor, request);
                if result.is_allow() {
                    self.apply_selection(&actor, region);
                }
                Ok((self.describe_result(&actor, &result), serde_json::to_value(&result)?))
            }
            Step::Confirm { actor } => {
                let actor = ActorId::new(actor.as_str());
                let quoted_region = self.workflow.pending(&actor).map(|p| p.region);
                let result = self.workflow.confirm(&actor);
                // A confirmation that became free is applied right away;
                // otherwise the change waits for the settle step.
                if result.is_allow() && self.workflow.pending(&actor).is_none() {
                    if let Some(region) = quoted_region {
                        self.apply_selection(&actor, &region);
                    }
                }
                Ok((self.describe_result(&actor, &result), serde_json::to_value(&result)?))
            }
            Step::Cancel { actor } => {
                let actor = ActorId::new(actor.as_str());
                let result = self.workflow.cancel(&actor);
                Ok((self.describe_result(&actor, &result), serde_json::to_value(&result)?))
            }
            Step::Settle { actor, success } => {
                let actor = ActorId::new(actor.as_str());
                let settlement = self.settle(&actor, *success);
                Ok((
                    describe_settlement(&settlement),
                    serde_json::to_value(&settlement)?,
                ))
            }
            Step::Select { actor, bounds } => {
                let actor = ActorId::new(actor.as_str());
                match bounds {
                    Some(bounds) => self.selections.select(&actor, *bounds),
                    None => self.selections.clear(&actor),
                }
                Ok(("ok".to_string(), serde_json::Value::Null))
            }
            Step::Advance { seconds } => {
                let fired = self.scheduler.advance(Duration::from_secs(*seconds));
                Ok((
                    format!("{fired} timer(s) fired"),
                    serde_json::json!({ "fired": fired }),
                ))
            }
        }
    }

    /// Apply the confirmed change, then settle; undo the change if the
    /// withdrawal fails.
    fn settle(&self, actor: &ActorId, success: bool) -> Settlement {
        let applied = match self.workflow.pending(actor) {
            Some(pending) if success && pending.phase == PendingPhase::Settling => {
                let previous = self.registry.region_bounds(&pending.region);
                self.registry
                    .define(pending.region.clone(), pending.original_selection);
                Some((pending.region, previous))
            }
            _ => None,
        };

        let settlement = self.workflow.settle(actor, success);
        if !settlement.succeeded() {
            if let Some((region, previous)) = applied {
                match previous {
                    Some(bounds) => self.registry.define(region, bounds),
                    None => {
                        self.registry.remove(&region);
                    }
                }
            }
        }
        settlement
    }

    fn apply_selection(&self, actor: &ActorId, region: &str) {
        if let Ok(Some(bounds)) = self.selections.current_selection(actor) {
            self.registry.define(region, bounds);
        }
    }

    fn describe_result(&self, actor: &ActorId, result: &ProcessResult) -> String {
        match result {
            ProcessResult::Allow => "allow".to_string(),
            ProcessResult::Deny(reason) => format!("deny: {reason}"),
            ProcessResult::AwaitingConfirmation => match self.workflow.pending(actor) {
                Some(pending) => format!(
                    "awaiting confirmation: {}",
                    self.ledger.format_currency(pending.cost.total_cost)
                ),
                None => "awaiting confirmation".to_string(),
            },
        }
    }

    fn report(self, steps: Vec<StepReport>) -> SimulationReport {
        let balances = self
            .actors
            .iter()
            .map(|actor| (actor.to_string(), self.ledger.balance(actor)))
            .collect();
        self.workflow.shutdown();
        SimulationReport {
            steps,
            balances,
            regions: self.registry.entries(),
        }
    }
}

fn describe_settlement(settlement: &Settlement) -> String {
    match settlement {
        Settlement::Settled { charged } => format!("settled: charged {}", money(*charged)),
        Settlement::NothingToSettle => "nothing to settle".to_string(),
        Settlement::Abandoned => "abandoned: not charged".to_string(),
        Settlement::Failed { amount, error, .. } => {
            format!("failed to charge {}: {error} (rolled back)", money(*amount))
        }
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(config_path: Option<&Path>, scenario_path: &Path, json: bool) -> anyhow::Result<()> {
    let data = std::fs::read_to_string(scenario_path)
        .with_context(|| format!("failed to read scenario {}", scenario_path.display()))?;
    let scenario: Scenario = serde_yaml::from_str(&data)
        .with_context(|| format!("invalid scenario {}", scenario_path.display()))?;

    let config = match &scenario.config {
        Some(config) => config.clone(),
        None => load_config(config_path)?,
    };

    let host = Host::new(config, &scenario);
    let mut reports = Vec::with_capacity(scenario.steps.len());
    for (i, step) in scenario.steps.iter().enumerate() {
        let index = i + 1;
        let (outcome, result) = host
            .run_step(step)
            .with_context(|| format!("step {index} ({})", step.describe()))?;
        reports.push(StepReport {
            index,
            step: step.describe(),
            actor: step.actor().map(str::to_string),
            outcome,
            result,
        });
    }
    let report = host.report(reports);

    if json {
        return print_json(&report);
    }

    let rows = report
        .steps
        .iter()
        .map(|r| {
            vec![
                r.index.to_string(),
                r.actor.clone().unwrap_or_else(|| "-".to_string()),
                r.step.clone(),
                r.outcome.clone(),
            ]
        })
        .collect();
    print_table(&["#", "ACTOR", "STEP", "OUTCOME"], rows);

    println!();
    let balances = report
        .balances
        .iter()
        .map(|(actor, balance)| vec![actor.clone(), money(*balance)])
        .collect();
    print_table(&["ACTOR", "BALANCE"], balances);

    if !report.regions.is_empty() {
        println!();
        let regions = report
            .regions
            .iter()
            .map(|r| vec![r.name.clone(), r.bounds.to_string()])
            .collect();
        print_table(&["REGION", "BOUNDS"], regions);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO: &str = r#"
config:
  economy:
    enabled: true
    horizontal_price_per_block: 1.0
    vertical_price_per_block: 0.5
actors:
  steve:
    balance: 1000
    selection: { min: [0, 0, 0], max: [9, 4, 9] }
steps:
  - step: quote
    actor: steve
    action: claim
    region: home
  - step: confirm
    actor: steve
  - step: settle
    actor: steve
"#;

    #[test]
    fn scenario_parses_steps() {
        let scenario: Scenario = serde_yaml::from_str(SCENARIO).unwrap();
        assert_eq!(scenario.steps.len(), 3);
        assert!(matches!(scenario.steps[2], Step::Settle { success: true, .. }));
        assert_eq!(scenario.actors["steve"].balance, 1000.0);
    }

    #[test]
    fn host_charges_and_registers_region() {
        let scenario: Scenario = serde_yaml::from_str(SCENARIO).unwrap();
        let config = scenario.config.clone().unwrap();
        let host = Host::new(config, &scenario);
        for step in &scenario.steps {
            host.run_step(step).unwrap();
        }
        let report = host.report(Vec::new());
        assert_eq!(report.balances["steve"], 700.0);
        assert_eq!(report.regions.len(), 1);
        assert_eq!(report.regions[0].name, "home");
    }

    #[test]
    fn failed_withdrawal_rolls_back_region() {
        let mut scenario: Scenario = serde_yaml::from_str(SCENARIO).unwrap();
        if let Some(steve) = scenario.actors.get_mut("steve") {
            steve.frozen = true;
        }
        let config = scenario.config.clone().unwrap();
        let host = Host::new(config, &scenario);
        let mut outcomes = Vec::new();
        for step in &scenario.steps {
            outcomes.push(host.run_step(step).unwrap().0);
        }
        assert!(outcomes[2].starts_with("failed to charge 300.00"));
        let report = host.report(Vec::new());
        assert_eq!(report.balances["steve"], 1000.0);
        assert!(report.regions.is_empty());
    }
}
