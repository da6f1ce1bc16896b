//! One open quote per actor, each with its own expiry timer.

use crate::cost::CostInfo;
use crate::geometry::Cuboid;
use crate::schedule::{CancelHandle, Scheduler};
use crate::types::{ActionKind, ActorId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// PendingAction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingPhase {
    /// Price shown, waiting for confirm or cancel.
    Quoted,
    /// Confirmed; the caller is applying the region change.
    Settling,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingAction {
    pub id: Uuid,
    pub actor: ActorId,
    pub kind: ActionKind,
    pub region: String,
    pub raw_args: Vec<String>,
    pub cost: CostInfo,
    /// Selection bounds at quote time; confirmation requires an exact match.
    pub original_selection: Cuboid,
    pub phase: PendingPhase,
    /// Set when settlement starts; a second settle for the same quote then
    /// finds nothing to do.
    pub settled: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PendingAction {
    pub fn new(
        actor: ActorId,
        kind: ActionKind,
        region: impl Into<String>,
        raw_args: Vec<String>,
        cost: CostInfo,
        original_selection: Cuboid,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            actor,
            kind,
            region: region.into(),
            raw_args,
            cost,
            original_selection,
            phase: PendingPhase::Quoted,
            settled: false,
            created_at: now,
            expires_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// PendingActionStore
// ---------------------------------------------------------------------------

struct Slot {
    /// Identity of this particular insertion; timers only remove their own.
    instance: Uuid,
    action: PendingAction,
    expiry: Box<dyn CancelHandle>,
}

type Slots = Mutex<HashMap<ActorId, Slot>>;

pub struct PendingActionStore {
    slots: Arc<Slots>,
    scheduler: Arc<dyn Scheduler>,
    timeout: Duration,
}

impl PendingActionStore {
    pub fn new(scheduler: Arc<dyn Scheduler>, timeout: Duration) -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            scheduler,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Install `action` as its actor's pending action and arm a fresh expiry.
    /// Any previous entry is returned with its timer already cancelled.
    pub fn put(&self, mut action: PendingAction) -> Option<PendingAction> {
        let actor = action.actor.clone();
        let instance = Uuid::new_v4();
        action.expires_at = expiry_time(self.timeout);

        let weak = Arc::downgrade(&self.slots);
        let timer_actor = actor.clone();

        // The timer is armed while the map is locked so it cannot observe the
        // map before its own entry is in place.
        let mut slots = lock(&self.slots);
        let expiry = self.scheduler.schedule_after(
            self.timeout,
            Box::new(move || expire(&weak, &timer_actor, instance)),
        );
        let previous = slots.insert(
            actor,
            Slot {
                instance,
                action,
                expiry,
            },
        );
        drop(slots);

        previous.map(|slot| {
            slot.expiry.cancel();
            tracing::debug!(actor = %slot.action.actor, id = %slot.action.id, "pending action replaced");
            slot.action
        })
    }

    /// Replace the actor's entry with `action` and re-arm its expiry, but only
    /// if the current entry is still the same quote (`action.id`). Returns
    /// `false` when it expired or was superseded in the meantime.
    pub fn refresh(&self, mut action: PendingAction) -> bool {
        let actor = action.actor.clone();
        let instance = Uuid::new_v4();
        action.expires_at = expiry_time(self.timeout);

        let mut slots = lock(&self.slots);
        let Some(slot) = slots.get_mut(&actor) else {
            return false;
        };
        if slot.action.id != action.id {
            return false;
        }

        let weak = Arc::downgrade(&self.slots);
        let timer_actor = actor.clone();
        let expiry = self.scheduler.schedule_after(
            self.timeout,
            Box::new(move || expire(&weak, &timer_actor, instance)),
        );
        let old = std::mem::replace(
            slot,
            Slot {
                instance,
                action,
                expiry,
            },
        );
        drop(slots);
        old.expiry.cancel();
        true
    }

    pub fn get(&self, actor: &ActorId) -> Option<PendingAction> {
        lock(&self.slots).get(actor).map(|slot| slot.action.clone())
    }

    /// Remove the actor's entry and cancel its timer. Idempotent.
    pub fn remove(&self, actor: &ActorId) -> Option<PendingAction> {
        let slot = lock(&self.slots).remove(actor)?;
        slot.expiry.cancel();
        Some(slot.action)
    }

    /// Flag the actor's confirmed entry as being settled and return a copy.
    /// `None` if there is no confirmed entry or it was already claimed.
    pub fn begin_settlement(&self, actor: &ActorId) -> Option<PendingAction> {
        let mut slots = lock(&self.slots);
        let slot = slots.get_mut(actor)?;
        if slot.action.phase != PendingPhase::Settling || slot.action.settled {
            return None;
        }
        slot.action.settled = true;
        Some(slot.action.clone())
    }

    /// Remove the actor's entry only if `keep_out` accepts it.
    pub fn remove_if<F>(&self, actor: &ActorId, keep_out: F) -> Option<PendingAction>
    where
        F: FnOnce(&PendingAction) -> bool,
    {
        let mut slots = lock(&self.slots);
        if !slots.get(actor).is_some_and(|slot| keep_out(&slot.action)) {
            return None;
        }
        let slot = slots.remove(actor)?;
        drop(slots);
        slot.expiry.cancel();
        Some(slot.action)
    }

    /// Remove everything, cancelling every timer.
    pub fn clear(&self) -> usize {
        let drained: Vec<Slot> = lock(&self.slots).drain().map(|(_, slot)| slot).collect();
        for slot in &drained {
            slot.expiry.cancel();
        }
        drained.len()
    }

    pub fn len(&self) -> usize {
        lock(&self.slots).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for PendingActionStore {
    fn drop(&mut self) {
        self.clear();
    }
}

fn lock(slots: &Slots) -> MutexGuard<'_, HashMap<ActorId, Slot>> {
    slots.lock().unwrap_or_else(PoisonError::into_inner)
}

fn expiry_time(timeout: Duration) -> DateTime<Utc> {
    let now = Utc::now();
    chrono::TimeDelta::from_std(timeout)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Timer body: drop the actor's entry only if it is still the instance this
/// timer was armed for.
fn expire(slots: &Weak<Slots>, actor: &ActorId, instance: Uuid) {
    let Some(slots) = slots.upgrade() else {
        return;
    };
    let mut map = lock(&slots);
    if map.get(actor).is_some_and(|slot| slot.instance == instance) {
        if let Some(slot) = map.remove(actor) {
            tracing::debug!(actor = %actor, id = %slot.action.id, "pending action expired");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
