//! Collaborators the billing core consults but does not own.
//!
//! The host supplies selections, the region registry, permissions and the
//! money ledger through these traits. In-memory implementations back the CLI
//! replay and the tests.

use crate::geometry::Cuboid;
use crate::types::ActorId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, PoisonError, RwLock};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("selection unreadable: {0}")]
pub struct SelectionError(pub String);

pub trait SelectionSource: Send + Sync {
    /// `Ok(None)` when nothing is selected, `Err` when the selection exists
    /// but cannot be read (incomplete, wrong shape, tool failure).
    fn current_selection(&self, actor: &ActorId) -> Result<Option<Cuboid>, SelectionError>;
}

/// A named region as the registry knows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionEntry {
    pub name: String,
    pub bounds: Cuboid,
}

/// Region lookups. Implementations must leave out world-spanning sentinel
/// regions; those never count as already-billed space.
pub trait RegionRegistry: Send + Sync {
    fn regions_overlapping(&self, area: &Cuboid) -> Vec<RegionEntry>;
    fn region_bounds(&self, name: &str) -> Option<Cuboid>;
}

pub trait Permissions: Send + Sync {
    fn has_permission(&self, actor: &ActorId, node: &str) -> bool;
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    #[error("insufficient funds: balance {balance:.2}, needed {needed:.2}")]
    InsufficientFunds { balance: f64, needed: f64 },

    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    #[error("transaction rejected: {0}")]
    Rejected(String),
}

pub trait Ledger: Send + Sync {
    fn is_available(&self) -> bool {
        true
    }

    fn balance(&self, actor: &ActorId) -> f64;

    fn withdraw(&self, actor: &ActorId, amount: f64) -> Result<(), LedgerError>;

    fn format_currency(&self, amount: f64) -> String {
        format!("{amount:.2}")
    }
}

// ---------------------------------------------------------------------------
// In-memory registry
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryRegistry {
    regions: RwLock<BTreeMap<String, Cuboid>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = RegionEntry>) -> Self {
        let registry = Self::new();
        for entry in entries {
            registry.define(entry.name, entry.bounds);
        }
        registry
    }

    /// Create or reshape a region.
    pub fn define(&self, name: impl Into<String>, bounds: Cuboid) {
        self.regions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), bounds);
    }

    pub fn remove(&self, name: &str) -> Option<Cuboid> {
        self.regions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    pub fn entries(&self) -> Vec<RegionEntry> {
        self.regions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, bounds)| RegionEntry {
                name: name.clone(),
                bounds: *bounds,
            })
            .collect()
    }
}

impl RegionRegistry for MemoryRegistry {
    fn regions_overlapping(&self, area: &Cuboid) -> Vec<RegionEntry> {
        self.entries()
            .into_iter()
            .filter(|entry| entry.bounds.intersects(area))
            .collect()
    }

    fn region_bounds(&self, name: &str) -> Option<Cuboid> {
        self.regions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .copied()
    }
}

// ---------------------------------------------------------------------------
// In-memory selections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum SelectionState {
    Ready(Cuboid),
    Broken(String),
}

#[derive(Debug, Default)]
pub struct MemorySelections {
    selections: Mutex<HashMap<ActorId, SelectionState>>,
}

impl MemorySelections {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(&self, actor: &ActorId, bounds: Cuboid) {
        self.lock().insert(actor.clone(), SelectionState::Ready(bounds));
    }

    pub fn clear(&self, actor: &ActorId) {
        self.lock().remove(actor);
    }

    /// Make the actor's selection unreadable, as an incomplete tool selection is.
    pub fn break_selection(&self, actor: &ActorId, reason: impl Into<String>) {
        self.lock()
            .insert(actor.clone(), SelectionState::Broken(reason.into()));
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ActorId, SelectionState>> {
        self.selections.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SelectionSource for MemorySelections {
    fn current_selection(&self, actor: &ActorId) -> Result<Option<Cuboid>, SelectionError> {
        match self.lock().get(actor) {
            None => Ok(None),
            Some(SelectionState::Ready(bounds)) => Ok(Some(*bounds)),
            Some(SelectionState::Broken(reason)) => Err(SelectionError(reason.clone())),
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory permissions
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryPermissions {
    granted: RwLock<HashMap<ActorId, HashSet<String>>>,
}

impl MemoryPermissions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self, actor: &ActorId, node: impl Into<String>) {
        self.granted
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(actor.clone())
            .or_default()
            .insert(node.into());
    }

    pub fn revoke(&self, actor: &ActorId, node: &str) {
        if let Some(nodes) = self
            .granted
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(actor)
        {
            nodes.remove(node);
        }
    }
}

impl Permissions for MemoryPermissions {
    fn has_permission(&self, actor: &ActorId, node: &str) -> bool {
        self.granted
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(actor)
            .is_some_and(|nodes| nodes.contains(node))
    }
}

// ---------------------------------------------------------------------------
// In-memory ledger
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct LedgerState {
    balances: HashMap<ActorId, f64>,
    frozen: HashSet<ActorId>,
    offline: bool,
}

#[derive(Debug, Default)]
pub struct MemoryLedger {
    state: Mutex<LedgerState>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deposit(&self, actor: &ActorId, amount: f64) {
        *self.lock().balances.entry(actor.clone()).or_insert(0.0) += amount;
    }

    pub fn set_balance(&self, actor: &ActorId, amount: f64) {
        self.lock().balances.insert(actor.clone(), amount);
    }

    /// Reject every withdrawal for `actor` until unfrozen.
    pub fn freeze(&self, actor: &ActorId) {
        self.lock().frozen.insert(actor.clone());
    }

    pub fn unfreeze(&self, actor: &ActorId) {
        self.lock().frozen.remove(actor);
    }

    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Ledger for MemoryLedger {
    fn is_available(&self) -> bool {
        !self.lock().offline
    }

    fn balance(&self, actor: &ActorId) -> f64 {
        self.lock().balances.get(actor).copied().unwrap_or(0.0)
    }

    fn withdraw(&self, actor: &ActorId, amount: f64) -> Result<(), LedgerError> {
        let mut state = self.lock();
        if state.offline {
            return Err(LedgerError::Unavailable("ledger offline".to_string()));
        }
        if state.frozen.contains(actor) {
            return Err(LedgerError::Rejected(format!("account {actor} is frozen")));
        }
        let balance = state.balances.get(actor).copied().unwrap_or(0.0);
        if balance < amount {
            return Err(LedgerError::InsufficientFunds {
                balance,
                needed: amount,
            });
        }
        state.balances.insert(actor.clone(), balance - amount);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
