//! Per-actor quote, confirm and settle workflow.
//!
//! A claim or redefine request is priced and, when it costs something, held
//! as a pending quote until the actor confirms or cancels it or the
//! confirmation window runs out. On confirmation the selection is checked
//! against the snapshot taken at quote time and the price is computed again.
//! The host then applies the region change and reports back through
//! [`TransactionWorkflow::settle`], which is the only place money moves.

use crate::collab::{Ledger, Permissions, RegionRegistry, SelectionError, SelectionSource};
use crate::config::Config;
use crate::cost::{CostCalculator, CostInfo};
use crate::geometry::Cuboid;
use crate::limits::{check_size, LIMITS_BYPASS_PERMISSION};
use crate::outcome::{DenyReason, ProcessResult, Settlement};
use crate::pending::{PendingAction, PendingActionStore, PendingPhase};
use crate::pricing::{effective_tier, PricingTier};
use crate::schedule::Scheduler;
use crate::types::{ActionKind, ActorId};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const ECONOMY_BYPASS_PERMISSION: &str = "claimfee.economy.bypass";

/// Host services the workflow talks to.
pub struct Collaborators {
    pub selections: Arc<dyn SelectionSource>,
    pub registry: Arc<dyn RegionRegistry>,
    pub permissions: Arc<dyn Permissions>,
    pub ledger: Arc<dyn Ledger>,
    pub scheduler: Arc<dyn Scheduler>,
}

/// A claim or redefine request as the actor typed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRequest {
    pub kind: ActionKind,
    pub region: String,
    /// Original command arguments, replayed by the host after confirmation.
    pub args: Vec<String>,
}

impl ActionRequest {
    pub fn new(kind: ActionKind, region: impl Into<String>) -> Self {
        let region = region.into();
        Self {
            kind,
            args: vec![kind.as_str().to_string(), region.clone()],
            region,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }
}

pub struct TransactionWorkflow {
    config: Config,
    selections: Arc<dyn SelectionSource>,
    permissions: Arc<dyn Permissions>,
    ledger: Arc<dyn Ledger>,
    calculator: CostCalculator,
    pending: PendingActionStore,
}

impl TransactionWorkflow {
    pub fn new(config: Config, collaborators: Collaborators) -> Self {
        let pending = PendingActionStore::new(
            collaborators.scheduler,
            config.economy.confirmation_timeout(),
        );
        Self {
            calculator: CostCalculator::new(collaborators.registry),
            selections: collaborators.selections,
            permissions: collaborators.permissions,
            ledger: collaborators.ledger,
            pending,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn ledger(&self) -> &dyn Ledger {
        self.ledger.as_ref()
    }

    /// Rates `actor` pays given the pricing permissions they hold.
    pub fn effective_tier(&self, actor: &ActorId) -> PricingTier {
        effective_tier(&self.config.economy, |node| {
            self.permissions.has_permission(actor, node)
        })
    }

    /// Price `kind` on `region` against the actor's current selection.
    /// `None` when there is no readable selection to price.
    pub fn price(&self, actor: &ActorId, kind: ActionKind, region: &str) -> Option<CostInfo> {
        let selection = self.selections.current_selection(actor);
        self.price_selection(actor, kind, region, &selection)
    }

    pub fn quote(&self, actor: &ActorId, kind: ActionKind, region: &str) -> ProcessResult {
        self.quote_request(actor, ActionRequest::new(kind, region))
    }

    /// Start a claim or redefinition. Any quote the actor still has open is
    /// dropped first.
    pub fn quote_request(&self, actor: &ActorId, request: ActionRequest) -> ProcessResult {
        if let Some(previous) = self.pending.remove(actor) {
            debug!(actor = %actor, id = %previous.id, "previous quote superseded");
        }

        let selection = self.selections.current_selection(actor);

        if let Ok(Some(bounds)) = &selection {
            if !self.permissions.has_permission(actor, LIMITS_BYPASS_PERMISSION) {
                if let Err(violation) = check_size(&self.config.limits, bounds) {
                    info!(actor = %actor, selection = %bounds, "selection below minimum size");
                    return ProcessResult::Deny(DenyReason::RegionTooSmall(violation));
                }
            }
        }

        if !self.config.economy.enabled {
            return ProcessResult::Allow;
        }
        if !self.ledger.is_available() {
            warn!(actor = %actor, "ledger unavailable, refusing priced action");
            return ProcessResult::Deny(DenyReason::EconomyUnavailable);
        }
        if self.permissions.has_permission(actor, ECONOMY_BYPASS_PERMISSION) {
            debug!(actor = %actor, "economy bypass");
            return ProcessResult::Allow;
        }

        let Some(cost) = self.price_selection(actor, request.kind, &request.region, &selection)
        else {
            return ProcessResult::Allow;
        };
        if cost.is_free() {
            debug!(actor = %actor, region = %request.region, "nothing new to bill");
            return ProcessResult::Allow;
        }

        let balance = self.ledger.balance(actor);
        if balance < cost.total_cost {
            info!(
                actor = %actor,
                cost = cost.total_cost,
                balance,
                "quote refused for insufficient funds"
            );
            return ProcessResult::Deny(insufficient_funds(&cost, balance));
        }

        // price_selection only returns Some for a readable selection.
        let Ok(Some(snapshot)) = selection else {
            return ProcessResult::Allow;
        };
        let action = PendingAction::new(
            actor.clone(),
            request.kind,
            request.region,
            request.args,
            cost,
            snapshot,
        );
        info!(
            actor = %actor,
            id = %action.id,
            kind = %action.kind,
            region = %action.region,
            cost = %self.ledger.format_currency(cost.total_cost),
            horizontal_blocks = %cost.horizontal_blocks,
            vertical_blocks = %cost.vertical_blocks,
            "quote awaiting confirmation"
        );
        self.pending.put(action);
        ProcessResult::AwaitingConfirmation
    }

    /// Accept the open quote. `Allow` tells the host to apply the change and
    /// then call [`settle`](Self::settle).
    pub fn confirm(&self, actor: &ActorId) -> ProcessResult {
        let Some(action) = self.pending.get(actor) else {
            return ProcessResult::Deny(DenyReason::NoPendingAction);
        };
        if action.phase == PendingPhase::Settling {
            return ProcessResult::Deny(DenyReason::AlreadyConfirmed);
        }
        let quote_id = action.id;

        let current = match self.selections.current_selection(actor) {
            Ok(Some(bounds)) if bounds == action.original_selection => bounds,
            Ok(_) => {
                self.pending.remove_if(actor, |p| p.id == quote_id);
                info!(actor = %actor, id = %quote_id, "selection changed before confirmation");
                return ProcessResult::Deny(DenyReason::SelectionChanged);
            }
            Err(e) => {
                self.pending.remove_if(actor, |p| p.id == quote_id);
                info!(actor = %actor, id = %quote_id, error = %e, "selection lost before confirmation");
                return ProcessResult::Deny(DenyReason::SelectionLost);
            }
        };

        let cost = self.calculator.quote(
            action.kind,
            &action.region,
            &current,
            self.effective_tier(actor),
        );
        if cost.is_free() {
            self.pending.remove_if(actor, |p| p.id == quote_id);
            debug!(actor = %actor, id = %quote_id, "confirmed action became free");
            return ProcessResult::Allow;
        }

        let balance = self.ledger.balance(actor);
        if balance < cost.total_cost {
            self.pending.remove_if(actor, |p| p.id == quote_id);
            info!(
                actor = %actor,
                id = %quote_id,
                cost = cost.total_cost,
                balance,
                "confirmation refused for insufficient funds"
            );
            return ProcessResult::Deny(insufficient_funds(&cost, balance));
        }

        let confirmed = PendingAction {
            cost,
            phase: PendingPhase::Settling,
            ..action
        };
        if !self.pending.refresh(confirmed) {
            return ProcessResult::Deny(DenyReason::NoPendingAction);
        }
        info!(
            actor = %actor,
            id = %quote_id,
            cost = %self.ledger.format_currency(cost.total_cost),
            "quote confirmed"
        );
        ProcessResult::Allow
    }

    /// Drop the open quote. A confirmed action can no longer be cancelled.
    pub fn cancel(&self, actor: &ActorId) -> ProcessResult {
        match self
            .pending
            .remove_if(actor, |p| p.phase == PendingPhase::Quoted)
        {
            Some(action) => {
                info!(actor = %actor, id = %action.id, "quote cancelled");
                ProcessResult::Deny(DenyReason::ActionCancelled)
            }
            None if self.pending.get(actor).is_some() => {
                ProcessResult::Deny(DenyReason::AlreadyConfirmed)
            }
            None => ProcessResult::Deny(DenyReason::NoPendingAction),
        }
    }

    /// Report whether the host managed to apply the confirmed change, and
    /// charge for it if so.
    pub fn settle(&self, actor: &ActorId, external_succeeded: bool) -> Settlement {
        let Some(action) = self.pending.begin_settlement(actor) else {
            return Settlement::NothingToSettle;
        };
        self.pending.remove_if(actor, |p| p.id == action.id);

        if !external_succeeded {
            info!(actor = %actor, id = %action.id, "region change failed, quote dropped");
            return Settlement::Abandoned;
        }

        let amount = action.cost.total_cost;
        if amount <= 0.0 {
            return Settlement::Settled { charged: 0.0 };
        }

        match self.ledger.withdraw(actor, amount) {
            Ok(()) => {
                info!(
                    actor = %actor,
                    id = %action.id,
                    kind = %action.kind,
                    region = %action.region,
                    charged = %self.ledger.format_currency(amount),
                    "action settled"
                );
                Settlement::Settled { charged: amount }
            }
            Err(e) => {
                let balance = self.ledger.balance(actor);
                warn!(
                    actor = %actor,
                    id = %action.id,
                    amount,
                    balance,
                    error = %e,
                    "withdrawal failed after region change, caller must roll back"
                );
                Settlement::Failed {
                    amount,
                    balance,
                    error: e.to_string(),
                }
            }
        }
    }

    pub fn pending(&self, actor: &ActorId) -> Option<PendingAction> {
        self.pending.get(actor)
    }

    /// Drop every open quote and cancel their timers.
    pub fn shutdown(&self) -> usize {
        let cleared = self.pending.clear();
        if cleared > 0 {
            info!(cleared, "pending actions cleared");
        }
        cleared
    }

    fn price_selection(
        &self,
        actor: &ActorId,
        kind: ActionKind,
        region: &str,
        selection: &Result<Option<Cuboid>, SelectionError>,
    ) -> Option<CostInfo> {
        match selection {
            Ok(Some(bounds)) => Some(self.calculator.quote(
                kind,
                region,
                bounds,
                self.effective_tier(actor),
            )),
            Ok(None) => {
                warn!(actor = %actor, region, "no selection to price, allowing without charge");
                None
            }
            Err(e) => {
                warn!(actor = %actor, region, error = %e, "selection unreadable, allowing without charge");
                None
            }
        }
    }
}

fn insufficient_funds(cost: &CostInfo, balance: f64) -> DenyReason {
    DenyReason::InsufficientFunds {
        required: cost.total_cost,
        balance,
        horizontal_cost: cost.horizontal_cost,
        vertical_cost: cost.vertical_cost,
        horizontal_blocks: cost.horizontal_blocks,
        vertical_blocks: cost.vertical_blocks,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::{MemoryLedger, MemoryPermissions, MemoryRegistry, MemorySelections};
    use crate::config::TierRates;
    use crate::pricing::permission_node;
    use crate::schedule::ManualScheduler;
    use std::time::Duration;

    /// 10x5x10 box: 100 footprint blocks and 400 above them, so 300 at the
    /// test rates below.
    fn home() -> Cuboid {
        Cuboid::new([0, 0, 0], [9, 4, 9])
    }

    struct Harness {
        sched: Arc<ManualScheduler>,
        selections: Arc<MemorySelections>,
        registry: Arc<MemoryRegistry>,
        permissions: Arc<MemoryPermissions>,
        ledger: Arc<MemoryLedger>,
        workflow: TransactionWorkflow,
        steve: ActorId,
    }

    fn economy_config() -> Config {
        let mut config = Config::default();
        config.economy.enabled = true;
        config.economy.horizontal_price_per_block = 1.0;
        config.economy.vertical_price_per_block = 0.5;
        config.economy.confirmation_timeout_seconds = 120;
        config
    }

    fn harness_with(config: Config) -> Harness {
        let sched = Arc::new(ManualScheduler::new());
        let selections = Arc::new(MemorySelections::new());
        let registry = Arc::new(MemoryRegistry::new());
        let permissions = Arc::new(MemoryPermissions::new());
        let ledger = Arc::new(MemoryLedger::new());
        let workflow = TransactionWorkflow::new(
            config,
            Collaborators {
                selections: selections.clone(),
                registry: registry.clone(),
                permissions: permissions.clone(),
                ledger: ledger.clone(),
                scheduler: sched.clone(),
            },
        );
        let steve = ActorId::new("steve");
        ledger.set_balance(&steve, 1000.0);
        selections.select(&steve, home());
        Harness {
            sched,
            selections,
            registry,
            permissions,
            ledger,
            workflow,
            steve,
        }
    }

    fn harness() -> Harness {
        harness_with(economy_config())
    }

    impl Harness {
        fn quote_home(&self) -> ProcessResult {
            self.workflow.quote(&self.steve, ActionKind::Claim, "home")
        }
    }

    // -- quote --------------------------------------------------------------

    #[test]
    fn priced_claim_awaits_confirmation() {
        let h = harness();
        assert_eq!(h.quote_home(), ProcessResult::AwaitingConfirmation);

        let pending = h.workflow.pending(&h.steve).unwrap();
        assert_eq!(pending.kind, ActionKind::Claim);
        assert_eq!(pending.region, "home");
        assert_eq!(pending.raw_args, vec!["claim", "home"]);
        assert_eq!(pending.original_selection, home());
        assert_eq!(pending.phase, PendingPhase::Quoted);
        assert_eq!(pending.cost.horizontal_blocks, 100);
        assert_eq!(pending.cost.vertical_blocks, 400);
        assert_eq!(pending.cost.total_cost, 300.0);
        // Quoting never touches the balance.
        assert_eq!(h.ledger.balance(&h.steve), 1000.0);
    }

    #[test]
    fn request_args_are_kept_for_replay() {
        let h = harness();
        let request = ActionRequest::new(ActionKind::Redefine, "home")
            .with_args(vec!["move".to_string(), "home".to_string()]);
        assert_eq!(
            h.workflow.quote_request(&h.steve, request),
            ProcessResult::AwaitingConfirmation
        );
        let pending = h.workflow.pending(&h.steve).unwrap();
        assert_eq!(pending.kind, ActionKind::Redefine);
        assert_eq!(pending.raw_args, vec!["move", "home"]);
    }

    #[test]
    fn disabled_economy_allows_without_quote() {
        let mut config = economy_config();
        config.economy.enabled = false;
        let h = harness_with(config);
        assert_eq!(h.quote_home(), ProcessResult::Allow);
        assert!(h.workflow.pending(&h.steve).is_none());
    }

    #[test]
    fn unavailable_ledger_denies() {
        let h = harness();
        h.ledger.set_offline(true);
        assert_eq!(
            h.quote_home(),
            ProcessResult::Deny(DenyReason::EconomyUnavailable)
        );
    }

    #[test]
    fn economy_bypass_skips_quote() {
        let h = harness();
        h.permissions.grant(&h.steve, ECONOMY_BYPASS_PERMISSION);
        assert_eq!(h.quote_home(), ProcessResult::Allow);
        assert!(h.workflow.pending(&h.steve).is_none());
        assert_eq!(h.sched.pending(), 0);
    }

    #[test]
    fn zero_cost_claim_skips_quote() {
        let h = harness();
        h.registry.define("existing", home());
        assert_eq!(h.quote_home(), ProcessResult::Allow);
        assert!(h.workflow.pending(&h.steve).is_none());
    }

    #[test]
    fn free_tier_skips_quote() {
        let mut config = economy_config();
        config.economy.price_permissions.insert(
            "staff".to_string(),
            TierRates {
                horizontal: Some(0.0),
                vertical: Some(0.0),
            },
        );
        let h = harness_with(config);
        h.permissions.grant(&h.steve, permission_node("staff"));
        assert_eq!(h.quote_home(), ProcessResult::Allow);
    }

    #[test]
    fn missing_selection_fails_open() {
        let h = harness();
        h.selections.clear(&h.steve);
        assert_eq!(h.quote_home(), ProcessResult::Allow);
        assert!(h.workflow.pending(&h.steve).is_none());
    }

    #[test]
    fn unreadable_selection_fails_open() {
        let h = harness();
        h.selections.break_selection(&h.steve, "polygon selection");
        assert_eq!(h.quote_home(), ProcessResult::Allow);
        assert!(h.workflow.price(&h.steve, ActionKind::Claim, "home").is_none());
    }

    #[test]
    fn insufficient_funds_at_quote() {
        let h = harness();
        h.ledger.set_balance(&h.steve, 299.0);
        match h.quote_home() {
            ProcessResult::Deny(DenyReason::InsufficientFunds {
                required,
                balance,
                horizontal_blocks,
                vertical_blocks,
                ..
            }) => {
                assert_eq!(required, 300.0);
                assert_eq!(balance, 299.0);
                assert_eq!(horizontal_blocks, 100);
                assert_eq!(vertical_blocks, 400);
            }
            other => panic!("expected insufficient funds, got {other:?}"),
        }
        assert!(h.workflow.pending(&h.steve).is_none());
    }

    #[test]
    fn cheapest_held_tier_applies() {
        let mut config = economy_config();
        config.economy.price_permissions.insert(
            "builder".to_string(),
            TierRates {
                horizontal: Some(0.5),
                vertical: Some(2.0),
            },
        );
        config.economy.price_permissions.insert(
            "patron".to_string(),
            TierRates {
                horizontal: Some(3.0),
                vertical: Some(0.25),
            },
        );
        let h = harness_with(config);
        h.permissions.grant(&h.steve, permission_node("builder"));
        h.permissions.grant(&h.steve, permission_node("patron"));

        assert_eq!(h.workflow.effective_tier(&h.steve), PricingTier::new(0.5, 0.25));
        h.quote_home();
        // 100 * 0.5 + 400 * 0.25
        assert_eq!(h.workflow.pending(&h.steve).unwrap().cost.total_cost, 150.0);
    }

    #[test]
    fn small_selection_denied_unless_bypassed() {
        let mut config = economy_config();
        config.limits.min_horizontal = 20;
        let h = harness_with(config);
        assert!(matches!(
            h.quote_home(),
            ProcessResult::Deny(DenyReason::RegionTooSmall(_))
        ));

        h.permissions.grant(&h.steve, LIMITS_BYPASS_PERMISSION);
        assert_eq!(h.quote_home(), ProcessResult::AwaitingConfirmation);
    }

    #[test]
    fn limits_apply_with_economy_disabled() {
        let mut config = economy_config();
        config.economy.enabled = false;
        config.limits.min_vertical = 10;
        let h = harness_with(config);
        assert!(matches!(
            h.quote_home(),
            ProcessResult::Deny(DenyReason::RegionTooSmall(_))
        ));
    }

    #[test]
    fn second_quote_supersedes_first() {
        let h = harness();
        h.quote_home();
        let first = h.workflow.pending(&h.steve).unwrap().id;

        h.sched.advance(Duration::from_secs(100));
        h.workflow.quote(&h.steve, ActionKind::Claim, "villa");
        let second = h.workflow.pending(&h.steve).unwrap();
        assert_ne!(second.id, first);
        assert_eq!(second.region, "villa");
        assert_eq!(h.sched.pending(), 1);

        // Past the first quote's deadline, the second one is still open.
        h.sched.advance(Duration::from_secs(30));
        assert_eq!(h.workflow.pending(&h.steve).unwrap().id, second.id);
    }

    #[test]
    fn new_request_drops_open_quote_even_when_free() {
        let h = harness();
        h.quote_home();
        h.permissions.grant(&h.steve, ECONOMY_BYPASS_PERMISSION);
        assert_eq!(h.quote_home(), ProcessResult::Allow);
        assert!(h.workflow.pending(&h.steve).is_none());
    }

    #[test]
    fn unconfirmed_quote_expires() {
        let h = harness();
        h.quote_home();
        h.sched.advance(Duration::from_secs(119));
        assert!(h.workflow.pending(&h.steve).is_some());
        h.sched.advance(Duration::from_secs(1));
        assert!(h.workflow.pending(&h.steve).is_none());
        assert_eq!(
            h.workflow.confirm(&h.steve),
            ProcessResult::Deny(DenyReason::NoPendingAction)
        );
    }

    // -- confirm ------------------------------------------------------------

    #[test]
    fn confirm_without_quote() {
        let h = harness();
        assert_eq!(
            h.workflow.confirm(&h.steve),
            ProcessResult::Deny(DenyReason::NoPendingAction)
        );
    }

    #[test]
    fn confirm_after_selection_changed() {
        let h = harness();
        h.quote_home();
        h.selections
            .select(&h.steve, Cuboid::new([0, 0, 0], [9, 5, 9]));
        assert_eq!(
            h.workflow.confirm(&h.steve),
            ProcessResult::Deny(DenyReason::SelectionChanged)
        );
        assert!(h.workflow.pending(&h.steve).is_none());
        assert_eq!(h.sched.pending(), 0);
    }

    #[test]
    fn confirm_after_selection_cleared() {
        let h = harness();
        h.quote_home();
        h.selections.clear(&h.steve);
        assert_eq!(
            h.workflow.confirm(&h.steve),
            ProcessResult::Deny(DenyReason::SelectionChanged)
        );
        assert!(h.workflow.pending(&h.steve).is_none());
    }

    #[test]
    fn confirm_after_selection_lost() {
        let h = harness();
        h.quote_home();
        h.selections.break_selection(&h.steve, "incomplete");
        assert_eq!(
            h.workflow.confirm(&h.steve),
            ProcessResult::Deny(DenyReason::SelectionLost)
        );
        assert!(h.workflow.pending(&h.steve).is_none());
    }

    #[test]
    fn confirm_recomputes_cost() {
        let h = harness();
        h.quote_home();
        // Someone claims the bottom layer in the meantime.
        h.registry
            .define("floor", Cuboid::new([0, 0, 0], [9, 0, 9]));

        assert_eq!(h.workflow.confirm(&h.steve), ProcessResult::Allow);
        let pending = h.workflow.pending(&h.steve).unwrap();
        assert_eq!(pending.phase, PendingPhase::Settling);
        // Footprint is fully covered; only the 400 blocks above remain.
        assert_eq!(pending.cost.horizontal_blocks, 0);
        assert_eq!(pending.cost.vertical_blocks, 400);
        assert_eq!(pending.cost.total_cost, 200.0);
    }

    #[test]
    fn confirm_when_action_became_free() {
        let h = harness();
        h.quote_home();
        h.registry.define("gift", home());

        assert_eq!(h.workflow.confirm(&h.steve), ProcessResult::Allow);
        assert!(h.workflow.pending(&h.steve).is_none());
        assert_eq!(h.workflow.settle(&h.steve, true), Settlement::NothingToSettle);
        assert_eq!(h.ledger.balance(&h.steve), 1000.0);
    }

    #[test]
    fn confirm_rechecks_balance() {
        let h = harness();
        h.quote_home();
        h.ledger.set_balance(&h.steve, 10.0);
        assert!(matches!(
            h.workflow.confirm(&h.steve),
            ProcessResult::Deny(DenyReason::InsufficientFunds { .. })
        ));
        assert!(h.workflow.pending(&h.steve).is_none());
    }

    #[test]
    fn confirm_restarts_the_clock() {
        let h = harness();
        h.quote_home();
        h.sched.advance(Duration::from_secs(100));
        assert_eq!(h.workflow.confirm(&h.steve), ProcessResult::Allow);

        h.sched.advance(Duration::from_secs(100));
        assert!(h.workflow.pending(&h.steve).is_some());
        h.sched.advance(Duration::from_secs(20));
        assert!(h.workflow.pending(&h.steve).is_none());
    }

    #[test]
    fn confirm_twice_is_refused() {
        let h = harness();
        h.quote_home();
        assert_eq!(h.workflow.confirm(&h.steve), ProcessResult::Allow);
        assert_eq!(
            h.workflow.confirm(&h.steve),
            ProcessResult::Deny(DenyReason::AlreadyConfirmed)
        );
    }

    // -- cancel -------------------------------------------------------------

    #[test]
    fn cancel_drops_quote() {
        let h = harness();
        h.quote_home();
        assert_eq!(
            h.workflow.cancel(&h.steve),
            ProcessResult::Deny(DenyReason::ActionCancelled)
        );
        assert!(h.workflow.pending(&h.steve).is_none());
        assert_eq!(h.sched.pending(), 0);
        assert_eq!(
            h.workflow.cancel(&h.steve),
            ProcessResult::Deny(DenyReason::NoPendingAction)
        );
    }

    #[test]
    fn cancel_after_confirm_is_refused() {
        let h = harness();
        h.quote_home();
        h.workflow.confirm(&h.steve);
        assert_eq!(
            h.workflow.cancel(&h.steve),
            ProcessResult::Deny(DenyReason::AlreadyConfirmed)
        );
        assert!(h.workflow.pending(&h.steve).is_some());
    }

    // -- settle -------------------------------------------------------------

    #[test]
    fn settle_withdraws_after_success() {
        let h = harness();
        h.quote_home();
        h.workflow.confirm(&h.steve);

        let settlement = h.workflow.settle(&h.steve, true);
        assert_eq!(settlement, Settlement::Settled { charged: 300.0 });
        assert!(settlement.succeeded());
        assert_eq!(h.ledger.balance(&h.steve), 700.0);
        assert!(h.workflow.pending(&h.steve).is_none());
        assert_eq!(h.sched.pending(), 0);
    }

    #[test]
    fn settle_only_once() {
        let h = harness();
        h.quote_home();
        h.workflow.confirm(&h.steve);
        h.workflow.settle(&h.steve, true);
        assert_eq!(h.workflow.settle(&h.steve, true), Settlement::NothingToSettle);
        assert_eq!(h.ledger.balance(&h.steve), 700.0);
    }

    #[test]
    fn settle_before_confirm_does_nothing() {
        let h = harness();
        h.quote_home();
        assert_eq!(h.workflow.settle(&h.steve, true), Settlement::NothingToSettle);
        assert_eq!(
            h.workflow.pending(&h.steve).unwrap().phase,
            PendingPhase::Quoted
        );
        assert_eq!(h.ledger.balance(&h.steve), 1000.0);
    }

    #[test]
    fn failed_region_change_is_not_charged() {
        let h = harness();
        h.quote_home();
        h.workflow.confirm(&h.steve);
        let settlement = h.workflow.settle(&h.steve, false);
        assert_eq!(settlement, Settlement::Abandoned);
        assert!(settlement.succeeded());
        assert_eq!(h.ledger.balance(&h.steve), 1000.0);
        assert!(h.workflow.pending(&h.steve).is_none());
    }

    #[test]
    fn failed_withdrawal_requests_rollback() {
        let h = harness();
        h.quote_home();
        h.workflow.confirm(&h.steve);
        h.ledger.freeze(&h.steve);

        let settlement = h.workflow.settle(&h.steve, true);
        assert!(!settlement.succeeded());
        match settlement {
            Settlement::Failed {
                amount, balance, ..
            } => {
                assert_eq!(amount, 300.0);
                assert_eq!(balance, 1000.0);
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(h.workflow.pending(&h.steve).is_none());
    }

    #[test]
    fn confirmed_but_unsettled_action_eventually_expires() {
        let h = harness();
        h.quote_home();
        h.workflow.confirm(&h.steve);
        h.sched.advance(Duration::from_secs(120));
        assert_eq!(h.workflow.settle(&h.steve, true), Settlement::NothingToSettle);
        assert_eq!(h.ledger.balance(&h.steve), 1000.0);
    }

    // -- redefine -----------------------------------------------------------

    #[test]
    fn redefine_bills_growth_only() {
        let h = harness();
        h.registry.define("home", home());
        // One layer taller: 100 new blocks, all above the footprint.
        h.selections
            .select(&h.steve, Cuboid::new([0, 0, 0], [9, 5, 9]));
        assert_eq!(
            h.workflow.quote(&h.steve, ActionKind::Redefine, "home"),
            ProcessResult::AwaitingConfirmation
        );
        let cost = h.workflow.pending(&h.steve).unwrap().cost;
        assert_eq!(cost.horizontal_blocks, 0);
        assert_eq!(cost.vertical_blocks, 100);
        assert_eq!(cost.total_cost, 50.0);
    }

    #[test]
    fn shrinking_redefine_is_free() {
        let h = harness();
        h.registry.define("home", home());
        h.selections
            .select(&h.steve, Cuboid::new([0, 0, 0], [4, 4, 4]));
        assert_eq!(
            h.workflow.quote(&h.steve, ActionKind::Redefine, "home"),
            ProcessResult::Allow
        );
    }

    // -- lifecycle ----------------------------------------------------------

    #[test]
    fn actors_do_not_interfere() {
        let h = harness();
        let alex = ActorId::new("alex");
        h.ledger.set_balance(&alex, 1000.0);
        h.selections
            .select(&alex, Cuboid::new([100, 0, 100], [109, 4, 109]));

        h.quote_home();
        h.workflow.quote(&alex, ActionKind::Claim, "shop");
        h.workflow.cancel(&h.steve);

        assert!(h.workflow.pending(&h.steve).is_none());
        assert_eq!(h.workflow.confirm(&alex), ProcessResult::Allow);
    }

    #[test]
    fn shutdown_clears_everything() {
        let h = harness();
        let alex = ActorId::new("alex");
        h.ledger.set_balance(&alex, 1000.0);
        h.selections.select(&alex, home());
        h.quote_home();
        h.workflow.quote(&alex, ActionKind::Claim, "shop");

        assert_eq!(h.workflow.shutdown(), 2);
        assert!(h.workflow.pending(&h.steve).is_none());
        assert_eq!(h.sched.pending(), 0);
    }
}
