use crate::config::EconomyConfig;
use serde::{Deserialize, Serialize};

/// Prefix of the permission nodes that grant a named price tier.
pub const PRICING_PERMISSION_PREFIX: &str = "claimfee.pricing.";

/// Per-block rates for the two classes of billable blocks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricingTier {
    /// Charged once per new footprint (X×Z) cell.
    pub horizontal: f64,
    /// Charged for every new block above the first layer.
    pub vertical: f64,
}

impl PricingTier {
    pub fn new(horizontal: f64, vertical: f64) -> Self {
        Self {
            horizontal,
            vertical,
        }
    }

    /// Element-wise minimum: the cheaper rate wins on each axis independently.
    pub fn cheapest(self, other: PricingTier) -> PricingTier {
        PricingTier {
            horizontal: self.horizontal.min(other.horizontal),
            vertical: self.vertical.min(other.vertical),
        }
    }

    pub fn is_free(&self) -> bool {
        self.horizontal <= 0.0 && self.vertical <= 0.0
    }
}

pub fn permission_node(tier: &str) -> String {
    format!("{PRICING_PERMISSION_PREFIX}{tier}")
}

/// Resolve the tier an actor pays: the default rates lowered by every tier
/// whose permission node `has_permission` grants.
pub fn effective_tier<F>(economy: &EconomyConfig, has_permission: F) -> PricingTier
where
    F: Fn(&str) -> bool,
{
    economy
        .price_tiers()
        .into_iter()
        .filter(|(name, _)| has_permission(&permission_node(name)))
        .fold(economy.default_tier(), |best, (_, tier)| best.cheapest(tier))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
