use crate::cmd::load_config;
use crate::output::{money, print_json, print_table};
use anyhow::Context;
use claimfee_core::collab::{MemoryRegistry, RegionEntry};
use claimfee_core::cost::CostCalculator;
use claimfee_core::geometry::Cuboid;
use claimfee_core::pricing::{effective_tier, permission_node};
use claimfee_core::types::ActionKind;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;

/// Regions already registered in the world being priced against.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct World {
    #[serde(default)]
    pub regions: Vec<RegionEntry>,
}

impl World {
    pub(crate) fn load(path: &Path) -> anyhow::Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read world file {}", path.display()))?;
        serde_yaml::from_str(&data)
            .with_context(|| format!("invalid world file {}", path.display()))
    }
}

pub struct QuoteRequest<'a> {
    pub world: Option<&'a Path>,
    pub bounds: Cuboid,
    pub redefine: Option<&'a str>,
    pub tiers: &'a [String],
}

pub fn run(config: Option<&Path>, req: QuoteRequest<'_>, json: bool) -> anyhow::Result<()> {
    let config = load_config(config)?;
    let world = match req.world {
        Some(path) => World::load(path)?,
        None => World::default(),
    };

    let known = config.economy.price_tiers();
    if let Some(unknown) = req.tiers.iter().find(|t| !known.contains_key(t.as_str())) {
        anyhow::bail!("unknown price tier '{unknown}'");
    }
    let held: Vec<String> = req.tiers.iter().map(|t| permission_node(t)).collect();
    let tier = effective_tier(&config.economy, |node| held.iter().any(|h| h == node));

    let (kind, region) = match req.redefine {
        Some(name) => (ActionKind::Redefine, name),
        None => (ActionKind::Claim, ""),
    };
    if kind == ActionKind::Redefine && !world.regions.iter().any(|r| r.name == region) {
        tracing::warn!(region, "region not in world file, pricing as a new claim");
    }

    let registry = Arc::new(MemoryRegistry::from_entries(world.regions));
    let cost = CostCalculator::new(registry).quote(kind, region, &req.bounds, tier);

    if json {
        let value = serde_json::json!({
            "action": kind,
            "region": req.redefine,
            "selection": req.bounds,
            "tier": tier,
            "cost": cost,
        });
        return print_json(&value);
    }

    match req.redefine {
        Some(name) => println!("Redefine '{name}' to {}", req.bounds),
        None => println!("Claim {}", req.bounds),
    }
    println!();
    print_table(
        &["COMPONENT", "BLOCKS", "RATE", "COST"],
        vec![
            vec![
                "horizontal".to_string(),
                cost.horizontal_blocks.to_string(),
                tier.horizontal.to_string(),
                money(cost.horizontal_cost),
            ],
            vec![
                "vertical".to_string(),
                cost.vertical_blocks.to_string(),
                tier.vertical.to_string(),
                money(cost.vertical_cost),
            ],
            vec![
                "total".to_string(),
                cost.total_new_volume.to_string(),
                "-".to_string(),
                money(cost.total_cost),
            ],
        ],
    );

    if !config.economy.enabled {
        println!();
        println!("note: economy is disabled, nothing would be charged");
    }
    Ok(())
}
