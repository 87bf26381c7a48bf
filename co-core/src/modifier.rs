//! Typed stat adjustments carried by actions and timed effects.
//!
//! A modifier's value is a formula evaluated on demand against the actor that
//! owns it. Nothing is cached: `@rank` and roll-data references follow the
//! actor's live state.

use crate::actor::{Actor, ItemId};
use crate::formula;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a modifier comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum ModifierType {
    #[default]
    Equipment,
    Feature,
    Profile,
    Capacity,
    Attack,
}

/// Which family of values a modifier adjusts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum ModifierSubtype {
    #[default]
    Ability,
    Combat,
    Resource,
    Attribute,
    Skill,
    State,
    BonusDice,
    MalusDice,
}

/// The value a modifier adjusts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum ModifierTarget {
    #[default]
    Agi,
    For,
    Con,
    Per,
    Cha,
    Int,
    Vol,
    Melee,
    Ranged,
    Magic,
    Init,
    Def,
    Crit,
    Fortune,
    Mana,
    Recovery,
    Hp,
    All,
    MovementImpairment,
    #[serde(rename = "poisonimmunity")]
    PoisonImmunity,
}

impl ModifierTarget {
    pub fn name(&self) -> &'static str {
        match self {
            ModifierTarget::Agi => "agi",
            ModifierTarget::For => "for",
            ModifierTarget::Con => "con",
            ModifierTarget::Per => "per",
            ModifierTarget::Cha => "cha",
            ModifierTarget::Int => "int",
            ModifierTarget::Vol => "vol",
            ModifierTarget::Melee => "melee",
            ModifierTarget::Ranged => "ranged",
            ModifierTarget::Magic => "magic",
            ModifierTarget::Init => "init",
            ModifierTarget::Def => "def",
            ModifierTarget::Crit => "crit",
            ModifierTarget::Fortune => "fortune",
            ModifierTarget::Mana => "mana",
            ModifierTarget::Recovery => "recovery",
            ModifierTarget::Hp => "hp",
            ModifierTarget::All => "all",
            ModifierTarget::MovementImpairment => "movementImpairment",
            ModifierTarget::PoisonImmunity => "poisonimmunity",
        }
    }
}

impl fmt::Display for ModifierTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Name and description of the item a modifier comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfos {
    pub name: String,
    pub description: String,
}

/// A single typed adjustment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modifier {
    pub source: Option<ItemId>,
    #[serde(rename = "type")]
    pub kind: ModifierType,
    pub subtype: ModifierSubtype,
    pub target: ModifierTarget,
    pub value: String,
}

impl Default for Modifier {
    fn default() -> Self {
        Self {
            source: None,
            kind: ModifierType::default(),
            subtype: ModifierSubtype::default(),
            target: ModifierTarget::default(),
            value: "0".to_string(),
        }
    }
}

impl Modifier {
    pub fn new(
        kind: ModifierType,
        subtype: ModifierSubtype,
        target: ModifierTarget,
        value: impl Into<String>,
    ) -> Self {
        Self {
            source: None,
            kind,
            subtype,
            target,
            value: value.into(),
        }
    }

    /// Bind the modifier to the item that carries it.
    pub fn with_source(mut self, source: ItemId) -> Self {
        self.source = Some(source);
        self
    }

    /// Rebind after the owning item was cloned onto an actor.
    pub fn update_source(&mut self, source: ItemId) {
        self.source = Some(source);
    }

    /// Evaluate the value against the actor's current state.
    pub fn evaluate(&self, actor: &Actor) -> i32 {
        formula::evaluate_modifier(actor, &self.value, self.source)
    }

    /// Name and description of the source item, `None` once it is gone.
    pub fn source_infos(&self, actor: &Actor) -> Option<SourceInfos> {
        let item = actor.item(self.source?)?;
        Some(SourceInfos {
            name: item.name.clone(),
            description: item.description.clone(),
        })
    }

    /// `" name : value"`, or an empty string when the value is zero.
    pub fn tooltip(&self, actor: &Actor) -> Option<String> {
        let infos = self.source_infos(actor)?;
        let value = self.evaluate(actor);
        if infos.name.is_empty() || value == 0 {
            return Some(String::new());
        }
        Some(format!(" {} : {}", infos.name, value))
    }
}
