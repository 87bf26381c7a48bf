//! Collaborator contracts the engine calls into.
//!
//! The virtual tabletop owns documents, dice, statuses, chat and the UI.
//! The engine sees each of those through one trait; [`Host`] is the union
//! an [`crate::Engine`] is generic over.

use crate::actor::{Actor, ActorId, Gauge, ItemId};
use crate::dice::{DiceRoller, RollOutcome};
use crate::effect::CustomEffect;
use crate::item::Item;
use crate::resolver::ResolverTarget;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors reported by the host.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("Persistence failed: {0}")]
    Persistence(String),

    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Message bus error: {0}")]
    Bus(String),
}

// ============================================================================
// Patches
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GaugeKind {
    Hp,
    Mana,
    Fortune,
    Recovery,
}

/// Partial update of an embedded item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ItemPatch {
    Quantity(i32),
    Charges(i32),
    ManaCost(i32),
    PathRank(u8),
    /// Learned/equipped field together with the action flags that follow it.
    StateAndActions(bool),
    ActionEnabled { index: usize, enabled: bool },
}

/// Partial update of an actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Patch {
    Gauge { kind: GaugeKind, gauge: Gauge },
    Level(u32),
    CurrentEffects(Vec<CustomEffect>),
    Item { item: ItemId, patch: ItemPatch },
}

impl Patch {
    pub fn item(item: ItemId, patch: ItemPatch) -> Self {
        Patch::Item { item, patch }
    }
}

// ============================================================================
// Messages
// ============================================================================

/// A precondition that was not met.
///
/// Refusals are shown to the user and the operation stops without side
/// effects; they are not errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "reason")]
pub enum Refusal {
    NoCharges { item: String },
    NoFrequencyCharges { item: String },
    NoAmmunition { item: String },
    NotEnoughMana { needed: i32, available: i32 },
    LevelTooLow { required: u32, level: u32 },
    NotEnoughHands { item: String },
    IncompatibleDefense,
    NotInCombat,
    NotLearnable { capacity: String },
    NotForgettable { capacity: String },
    ForgetQuotaReached { quota: usize },
    OrphanUnavailable,
}

impl fmt::Display for Refusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Refusal::NoCharges { item } => write!(f, "{item} has no charges left"),
            Refusal::NoFrequencyCharges { item } => {
                write!(f, "{item} cannot be used again before a rest")
            }
            Refusal::NoAmmunition { item } => write!(f, "{item} has no ammunition left"),
            Refusal::NotEnoughMana { needed, available } => {
                write!(f, "Not enough mana: {needed} needed, {available} available")
            }
            Refusal::LevelTooLow { required, level } => {
                write!(f, "Level {required} required (currently {level})")
            }
            Refusal::NotEnoughHands { item } => write!(f, "Not enough free hands for {item}"),
            Refusal::IncompatibleDefense => {
                write!(f, "Partial and full defense cannot be combined")
            }
            Refusal::NotInCombat => write!(f, "This requires an active combat"),
            Refusal::NotLearnable { capacity } => write!(f, "{capacity} cannot be learned now"),
            Refusal::NotForgettable { capacity } => write!(f, "{capacity} cannot be forgotten"),
            Refusal::ForgetQuotaReached { quota } => {
                write!(f, "At most {quota} capacity(ies) can be forgotten")
            }
            Refusal::OrphanUnavailable => {
                write!(f, "Orphan points are only available once nothing is affordable")
            }
        }
    }
}

/// Something the engine did, for the chat log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "event")]
pub enum EngineEvent {
    ActionToggled {
        actor: ActorId,
        item: ItemId,
        index: usize,
        enabled: bool,
    },
    CheckRolled {
        actor: ActorId,
        item: ItemId,
        label: String,
        roll: RollOutcome,
        difficulty: Option<i32>,
        success: Option<bool>,
        critical: bool,
    },
    DamageRolled {
        actor: ActorId,
        item: ItemId,
        roll: RollOutcome,
    },
    HpChanged {
        actor: ActorId,
        /// Positive for damage, negative for healing.
        amount: i32,
        hp: Gauge,
    },
    ManaBurned {
        actor: ActorId,
        hp_lost: i32,
    },
    EffectApplied {
        actor: ActorId,
        effect: String,
    },
    EffectRemoved {
        actor: ActorId,
        effect: String,
    },
    ItemDestroyed {
        actor: ActorId,
        item: String,
    },
    LevelGained {
        actor: ActorId,
        level: u32,
    },
}

/// A mutation only the authoritative client may perform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum PrivilegedRequest {
    ApplyEffect {
        target: ActorId,
        effect: CustomEffect,
    },
    ApplyHealing {
        target: ActorId,
        from: String,
        amount: i32,
    },
    ApplyDamage {
        target: ActorId,
        from: String,
        amount: i32,
    },
}

impl PrivilegedRequest {
    pub fn target(&self) -> ActorId {
        match self {
            PrivilegedRequest::ApplyEffect { target, .. }
            | PrivilegedRequest::ApplyHealing { target, .. }
            | PrivilegedRequest::ApplyDamage { target, .. } => *target,
        }
    }
}

/// Questions asked to the acting user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "prompt")]
pub enum Prompt {
    /// Pay the missing mana with a recovery-dice roll of HP.
    ManaBurn { needed: i32, formula: String },
}

// ============================================================================
// Traits
// ============================================================================

/// Document storage. Atomic per call, never transactional across calls.
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn update(&self, actor: ActorId, patch: &Patch) -> Result<(), HostError>;

    async fn create_embedded(&self, actor: ActorId, item: &Item) -> Result<ItemId, HostError>;

    async fn delete_embedded(&self, actor: ActorId, items: &[ItemId]) -> Result<(), HostError>;
}

/// Token status primitive. `Ok(false)` is an immunity veto.
#[async_trait]
pub trait StatusToggle: Send + Sync {
    async fn set_status(&self, actor: ActorId, status: &str, active: bool)
        -> Result<bool, HostError>;
}

#[async_trait]
pub trait Messenger: Send + Sync {
    async fn publish(&self, event: EngineEvent);

    async fn warn(&self, actor: Option<ActorId>, refusal: &Refusal);

    /// Ask the authoritative client to perform a mutation.
    async fn request_privileged_mutation(&self, request: PrivilegedRequest)
        -> Result<(), HostError>;
}

#[async_trait]
pub trait Interaction: Send + Sync {
    async fn confirm(&self, actor: ActorId, prompt: &Prompt) -> bool;

    /// Actors currently targeted by the user, filtered by the resolver scope.
    async fn acquire_targets(&self, actor: &Actor, target: &ResolverTarget) -> Vec<ActorId>;
}

/// Everything the engine needs from the tabletop.
pub trait Host: Persistence + DiceRoller + StatusToggle + Messenger + Interaction {}

impl<T> Host for T where T: Persistence + DiceRoller + StatusToggle + Messenger + Interaction {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_privileged_request_wire_format() {
        let target = ActorId::new();
        let request = PrivilegedRequest::ApplyHealing {
            target,
            from: "Soins légers".to_string(),
            amount: 6,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["kind"], "applyHealing");
        assert_eq!(json["amount"], 6);

        let back: PrivilegedRequest = serde_json::from_value(json).unwrap();
        assert_eq!(back.target(), target);
    }

    #[test]
    fn test_refusal_display() {
        let refusal = Refusal::NotEnoughMana {
            needed: 3,
            available: 2,
        };
        assert_eq!(refusal.to_string(), "Not enough mana: 3 needed, 2 available");
    }
}
