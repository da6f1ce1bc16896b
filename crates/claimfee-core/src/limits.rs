//! Minimum selection size for claims and redefinitions.

use crate::config::LimitsConfig;
use crate::geometry::Cuboid;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const LIMITS_BYPASS_PERMISSION: &str = "claimfee.limits.bypass";

/// A selection that fails the configured minimums, with the sizes involved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeViolation {
    pub size_x: i128,
    pub size_y: i128,
    pub size_z: i128,
    pub min_horizontal: u64,
    pub min_vertical: u64,
}

impl fmt::Display for SizeViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "selection is {}x{}x{}, minimum is {} wide and {} tall",
            self.size_x, self.size_y, self.size_z, self.min_horizontal, self.min_vertical
        )
    }
}

/// Check `selection` against `limits`. The shorter of the two horizontal
/// sides must reach `min_horizontal` and the height `min_vertical`.
pub fn check_size(limits: &LimitsConfig, selection: &Cuboid) -> Result<(), SizeViolation> {
    if !limits.is_enforced() {
        return Ok(());
    }

    let shorter_side = selection.width_x().min(selection.width_z());
    if shorter_side < i128::from(limits.min_horizontal)
        || selection.height() < i128::from(limits.min_vertical)
    {
        return Err(SizeViolation {
            size_x: selection.width_x(),
            size_y: selection.height(),
            size_z: selection.width_z(),
            min_horizontal: limits.min_horizontal,
            min_vertical: limits.min_vertical,
        });
    }
    Ok(())
}
