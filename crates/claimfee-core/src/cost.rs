//! Pricing of claims and redefinitions.
//!
//! Only blocks not already inside some other registered region are billed.
//! New blocks are split into footprint cells (billed at the horizontal rate)
//! and everything stacked above them (billed at the vertical rate).

use crate::collab::RegionRegistry;
use crate::geometry::Cuboid;
use crate::pricing::PricingTier;
use crate::types::ActionKind;
use crate::union::{covered_footprint, covered_volume};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// CostInfo
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostInfo {
    pub total_cost: f64,
    pub horizontal_cost: f64,
    pub vertical_cost: f64,
    pub horizontal_blocks: i128,
    pub vertical_blocks: i128,
    pub total_new_volume: i128,
}

impl CostInfo {
    pub fn zero() -> Self {
        Self {
            total_cost: 0.0,
            horizontal_cost: 0.0,
            vertical_cost: 0.0,
            horizontal_blocks: 0,
            vertical_blocks: 0,
            total_new_volume: 0,
        }
    }

    pub fn priced(
        horizontal_blocks: i128,
        vertical_blocks: i128,
        total_new_volume: i128,
        tier: PricingTier,
    ) -> Self {
        let horizontal_cost = saturating_cost(horizontal_blocks, tier.horizontal);
        let vertical_cost = saturating_cost(vertical_blocks, tier.vertical);
        Self {
            total_cost: saturate(horizontal_cost + vertical_cost),
            horizontal_cost,
            vertical_cost,
            horizontal_blocks,
            vertical_blocks,
            total_new_volume,
        }
    }

    pub fn is_free(&self) -> bool {
        self.total_cost <= 0.0
    }
}

/// `blocks × rate`, clamped to `[0, f64::MAX]`. Block counts beyond `i64`
/// range go straight to `f64::MAX` rather than losing magnitude.
pub fn saturating_cost(blocks: i128, rate: f64) -> f64 {
    if blocks <= 0 || rate <= 0.0 || rate.is_nan() {
        return 0.0;
    }
    if blocks > i128::from(i64::MAX) {
        return f64::MAX;
    }
    saturate(blocks as f64 * rate)
}

fn saturate(cost: f64) -> f64 {
    if cost.is_finite() {
        cost
    } else {
        f64::MAX
    }
}

// ---------------------------------------------------------------------------
// CostCalculator
// ---------------------------------------------------------------------------

pub struct CostCalculator {
    registry: Arc<dyn RegionRegistry>,
}

impl CostCalculator {
    pub fn new(registry: Arc<dyn RegionRegistry>) -> Self {
        Self { registry }
    }

    pub fn quote(
        &self,
        kind: ActionKind,
        region: &str,
        requested: &Cuboid,
        tier: PricingTier,
    ) -> CostInfo {
        if tier.is_free() {
            return CostInfo::zero();
        }
        match kind {
            ActionKind::Claim => self.claim_cost(requested, tier),
            ActionKind::Redefine => self.redefine_cost(region, requested, tier),
        }
    }

    /// Price a brand-new region covering `requested`.
    pub fn claim_cost(&self, requested: &Cuboid, tier: PricingTier) -> CostInfo {
        let existing: Vec<Cuboid> = self
            .registry
            .regions_overlapping(requested)
            .into_iter()
            .map(|entry| entry.bounds)
            .collect();

        if existing.is_empty() {
            return full_cost(requested, tier);
        }

        let new_volume = requested.volume() - covered_volume(requested, &existing);
        if new_volume <= 0 {
            return CostInfo::zero();
        }

        let new_footprint =
            (requested.footprint_area() - covered_footprint(requested, &existing)).max(0);
        let new_vertical = (new_volume - new_footprint).max(0);

        CostInfo::priced(new_footprint, new_vertical, new_volume, tier)
    }

    /// Price reshaping `region` to `requested`. Only net growth is billed;
    /// blocks the old shape held outside other regions count as already paid.
    /// An unknown region is priced as a claim.
    pub fn redefine_cost(&self, region: &str, requested: &Cuboid, tier: PricingTier) -> CostInfo {
        let Some(old) = self.registry.region_bounds(region) else {
            return self.claim_cost(requested, tier);
        };

        let others = self.other_regions(region, requested);

        let total_new_blocks = requested.volume() - covered_volume(requested, &others);
        let actual_old_blocks = old.volume() - covered_volume(&old, &others);
        let additional_blocks = total_new_blocks - actual_old_blocks;
        if additional_blocks <= 0 {
            return CostInfo::zero();
        }

        let actual_new_footprint = requested.footprint_area() - covered_footprint(requested, &others);
        let actual_old_footprint = old.footprint_area() - covered_footprint(&old, &others);
        let additional_horizontal = (actual_new_footprint - actual_old_footprint).max(0);
        let additional_vertical = (additional_blocks - additional_horizontal).max(0);

        CostInfo::priced(
            additional_horizontal,
            additional_vertical,
            additional_blocks,
            tier,
        )
    }

    /// Regions other than `region` touching the new shape.
    fn other_regions(&self, region: &str, requested: &Cuboid) -> Vec<Cuboid> {
        self.registry
            .regions_overlapping(requested)
            .into_iter()
            .filter(|entry| entry.name != region)
            .map(|entry| entry.bounds)
            .collect()
    }
}

fn full_cost(bounds: &Cuboid, tier: PricingTier) -> CostInfo {
    let footprint = bounds.footprint_area();
    let volume = bounds.volume();
    CostInfo::priced(footprint, volume - footprint, volume, tier)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
