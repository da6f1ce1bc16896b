//! Axis-aligned block boxes.
//!
//! A [`Cuboid`] is inclusive on every face, so a box from `(0,0,0)` to
//! `(0,0,0)` holds exactly one block. Volumes and areas are `i128`: with
//! `i32` corners the largest possible volume is below 2^96, so none of the
//! arithmetic here can overflow.

use crate::error::ClaimFeeError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Corners are kept normalized (`min <= max` on every axis); the only ways
/// to build one from outside the crate are [`Cuboid::new`], parsing, and
/// deserializing, all of which sort the corners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "CuboidRepr", into = "CuboidRepr")]
pub struct Cuboid {
    pub(crate) min_x: i32,
    pub(crate) min_y: i32,
    pub(crate) min_z: i32,
    pub(crate) max_x: i32,
    pub(crate) max_y: i32,
    pub(crate) max_z: i32,
}

impl Cuboid {
    /// Build a box spanning two opposite corners, in any order.
    pub fn new(a: [i32; 3], b: [i32; 3]) -> Self {
        Self {
            min_x: a[0].min(b[0]),
            min_y: a[1].min(b[1]),
            min_z: a[2].min(b[2]),
            max_x: a[0].max(b[0]),
            max_y: a[1].max(b[1]),
            max_z: a[2].max(b[2]),
        }
    }

    pub fn min(&self) -> [i32; 3] {
        [self.min_x, self.min_y, self.min_z]
    }

    pub fn max(&self) -> [i32; 3] {
        [self.max_x, self.max_y, self.max_z]
    }

    pub fn width_x(&self) -> i128 {
        span(self.min_x, self.max_x)
    }

    pub fn height(&self) -> i128 {
        span(self.min_y, self.max_y)
    }

    pub fn width_z(&self) -> i128 {
        span(self.min_z, self.max_z)
    }

    pub fn volume(&self) -> i128 {
        self.width_x() * self.height() * self.width_z()
    }

    /// Area of the X×Z projection; independent of Y.
    pub fn footprint_area(&self) -> i128 {
        self.width_x() * self.width_z()
    }

    /// Overlap of two boxes, or `None` when any axis interval is empty.
    pub fn intersect(&self, other: &Cuboid) -> Option<Cuboid> {
        let min_x = self.min_x.max(other.min_x);
        let min_y = self.min_y.max(other.min_y);
        let min_z = self.min_z.max(other.min_z);
        let max_x = self.max_x.min(other.max_x);
        let max_y = self.max_y.min(other.max_y);
        let max_z = self.max_z.min(other.max_z);

        (min_x <= max_x && min_y <= max_y && min_z <= max_z).then_some(Cuboid {
            min_x,
            min_y,
            min_z,
            max_x,
            max_y,
            max_z,
        })
    }

    pub fn intersects(&self, other: &Cuboid) -> bool {
        self.intersect(other).is_some()
    }

    pub fn contains(&self, other: &Cuboid) -> bool {
        self.min_x <= other.min_x
            && self.min_y <= other.min_y
            && self.min_z <= other.min_z
            && self.max_x >= other.max_x
            && self.max_y >= other.max_y
            && self.max_z >= other.max_z
    }

    /// The same footprint squashed to a single layer at `y`.
    pub fn flattened(&self, y: i32) -> Cuboid {
        Cuboid {
            min_y: y,
            max_y: y,
            ..*self
        }
    }
}

fn span(min: i32, max: i32) -> i128 {
    i128::from(max) - i128::from(min) + 1
}

impl fmt::Display for Cuboid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {}) -> ({}, {}, {})",
            self.min_x, self.min_y, self.min_z, self.max_x, self.max_y, self.max_z
        )
    }
}

impl std::str::FromStr for Cuboid {
    type Err = ClaimFeeError;

    /// Parses `x1,y1,z1,x2,y2,z2`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let coords = s
            .split(',')
            .map(|part| part.trim().parse::<i32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| ClaimFeeError::InvalidCuboid(s.to_string()))?;
        match coords.as_slice() {
            [x1, y1, z1, x2, y2, z2] => Ok(Cuboid::new([*x1, *y1, *z1], [*x2, *y2, *z2])),
            _ => Err(ClaimFeeError::InvalidCuboid(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Serde representation
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize)]
struct CuboidRepr {
    min: [i32; 3],
    max: [i32; 3],
}

impl From<CuboidRepr> for Cuboid {
    fn from(repr: CuboidRepr) -> Self {
        Cuboid::new(repr.min, repr.max)
    }
}

impl From<Cuboid> for CuboidRepr {
    fn from(c: Cuboid) -> Self {
        CuboidRepr {
            min: c.min(),
            max: c.max(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
