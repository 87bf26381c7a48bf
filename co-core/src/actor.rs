//! Actors and their arena of owned items.
//!
//! An actor owns every embedded item. Items point at each other by
//! [`ItemId`]; those references are resolved through [`Actor::item`] and are
//! allowed to dangle.

use crate::dice::DieType;
use crate::effect::CustomEffect;
use crate::formula::AttackType;
use crate::host::{GaugeKind, ItemPatch, Patch};
use crate::item::{EquipmentSubtype, Item, ItemKind, PathSubtype};
use crate::modifier::{Modifier, ModifierSubtype, ModifierTarget};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

// ============================================================================
// ID Types
// ============================================================================

/// Unique identifier for actors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActorId(pub Uuid);

impl ActorId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ActorId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for embedded items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId(pub Uuid);

impl ItemId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a connected user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Scores and gauges
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ActorKind {
    #[default]
    Character,
    Encounter,
}

/// The seven ability scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ability {
    Agi,
    For,
    Con,
    Per,
    Cha,
    Int,
    Vol,
}

impl Ability {
    pub fn key(&self) -> &'static str {
        match self {
            Ability::Agi => "agi",
            Ability::For => "for",
            Ability::Con => "con",
            Ability::Per => "per",
            Ability::Cha => "cha",
            Ability::Int => "int",
            Ability::Vol => "vol",
        }
    }

    pub fn all() -> [Ability; 7] {
        [
            Ability::Agi,
            Ability::For,
            Ability::Con,
            Ability::Per,
            Ability::Cha,
            Ability::Int,
            Ability::Vol,
        ]
    }

    fn modifier_target(&self) -> ModifierTarget {
        match self {
            Ability::Agi => ModifierTarget::Agi,
            Ability::For => ModifierTarget::For,
            Ability::Con => ModifierTarget::Con,
            Ability::Per => ModifierTarget::Per,
            Ability::Cha => ModifierTarget::Cha,
            Ability::Int => ModifierTarget::Int,
            Ability::Vol => ModifierTarget::Vol,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Abilities {
    pub agi: i32,
    #[serde(rename = "for")]
    pub force: i32,
    pub con: i32,
    pub per: i32,
    pub cha: i32,
    pub int: i32,
    pub vol: i32,
}

impl Abilities {
    pub fn get(&self, ability: Ability) -> i32 {
        match ability {
            Ability::Agi => self.agi,
            Ability::For => self.force,
            Ability::Con => self.con,
            Ability::Per => self.per,
            Ability::Cha => self.cha,
            Ability::Int => self.int,
            Ability::Vol => self.vol,
        }
    }

    pub fn set(&mut self, ability: Ability, value: i32) {
        match ability {
            Ability::Agi => self.agi = value,
            Ability::For => self.force = value,
            Ability::Con => self.con = value,
            Ability::Per => self.per = value,
            Ability::Cha => self.cha = value,
            Ability::Int => self.int = value,
            Ability::Vol => self.vol = value,
        }
    }
}

/// Combat values before modifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombatValues {
    pub melee: i32,
    pub ranged: i32,
    pub magic: i32,
    pub init: i32,
    pub def: i32,
    /// Natural d20 result from which a check is critical.
    pub crit: i32,
}

impl Default for CombatValues {
    fn default() -> Self {
        Self {
            melee: 0,
            ranged: 0,
            magic: 0,
            init: 10,
            def: 10,
            crit: 20,
        }
    }
}

/// A `{value, max}` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Gauge {
    pub value: i32,
    pub max: i32,
}

impl Gauge {
    pub fn full(max: i32) -> Self {
        Self { value: max, max }
    }

    /// Clamp `value` into `[0, max]`.
    pub fn clamped(mut self) -> Self {
        self.value = self.value.clamp(0, self.max.max(0));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Resources {
    pub mana: Gauge,
    pub fortune: Gauge,
    pub recovery: Gauge,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Attributes {
    pub hp: Gauge,
    pub level: u32,
    /// Encounter difficulty rating.
    pub nc: f32,
}

impl Default for Attributes {
    fn default() -> Self {
        Self {
            hp: Gauge::full(10),
            level: 1,
            nc: 1.0,
        }
    }
}

// ============================================================================
// Actor
// ============================================================================

/// Statuses that leave an actor unable to act.
pub const INCAPACITATING_STATUSES: [&str; 5] =
    ["immobilized", "paralysis", "stun", "unconscious", "dead"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub id: ActorId,
    pub name: String,
    pub kind: ActorKind,
    /// User allowed to write this actor besides the GM.
    pub owner: Option<UserId>,
    pub abilities: Abilities,
    pub combat: CombatValues,
    pub resources: Resources,
    pub attributes: Attributes,
    /// Recovery die ("hd"), rolled to pay for mana burn.
    pub recovery_dice: DieType,
    pub items: Vec<Item>,
    pub statuses: BTreeSet<String>,
    pub current_effects: Vec<CustomEffect>,
}

impl Actor {
    pub fn new(name: impl Into<String>, kind: ActorKind) -> Self {
        Self {
            id: ActorId::new(),
            name: name.into(),
            kind,
            owner: None,
            abilities: Abilities::default(),
            combat: CombatValues::default(),
            resources: Resources {
                mana: Gauge::default(),
                fortune: Gauge::full(2),
                recovery: Gauge::full(2),
            },
            attributes: Attributes::default(),
            recovery_dice: DieType::D6,
            items: Vec::new(),
            statuses: BTreeSet::new(),
            current_effects: Vec::new(),
        }
    }

    pub fn with_owner(mut self, owner: UserId) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn with_level(mut self, level: u32) -> Self {
        self.attributes.level = level;
        self
    }

    pub fn with_nc(mut self, nc: f32) -> Self {
        self.attributes.nc = nc;
        self
    }

    pub fn with_hp(mut self, value: i32, max: i32) -> Self {
        self.attributes.hp = Gauge { value, max };
        self
    }

    pub fn with_mana(mut self, value: i32, max: i32) -> Self {
        self.resources.mana = Gauge { value, max };
        self
    }

    pub fn with_ability(mut self, ability: Ability, value: i32) -> Self {
        self.abilities.set(ability, value);
        self
    }

    pub fn with_recovery_dice(mut self, die: DieType) -> Self {
        self.recovery_dice = die;
        self
    }

    pub fn is_character(&self) -> bool {
        self.kind == ActorKind::Character
    }

    // ------------------------------------------------------------------------
    // Item arena
    // ------------------------------------------------------------------------

    pub fn item(&self, id: ItemId) -> Option<&Item> {
        self.items.iter().find(|i| i.id == id)
    }

    pub fn item_mut(&mut self, id: ItemId) -> Option<&mut Item> {
        self.items.iter_mut().find(|i| i.id == id)
    }

    pub fn add_item(&mut self, item: Item) -> ItemId {
        let id = item.id;
        self.items.push(item);
        id
    }

    pub fn remove_item(&mut self, id: ItemId) -> Option<Item> {
        let index = self.items.iter().position(|i| i.id == id)?;
        Some(self.items.remove(index))
    }

    pub fn capacities(&self) -> impl Iterator<Item = &Item> {
        self.items.iter().filter(|i| i.capacity().is_some())
    }

    pub fn paths(&self) -> impl Iterator<Item = &Item> {
        self.items.iter().filter(|i| i.path().is_some())
    }

    /// The active profile: the first profile item.
    pub fn main_profile(&self) -> Option<&Item> {
        self.items.iter().find(|i| i.profile().is_some())
    }

    pub fn equipped_weapons(&self) -> impl Iterator<Item = &Item> {
        self.items
            .iter()
            .filter(|i| matches!(i.equipment(), Some(e) if e.subtype == EquipmentSubtype::Weapon && e.equipped))
    }

    pub fn main_armor(&self) -> Option<&Item> {
        self.items
            .iter()
            .find(|i| matches!(i.equipment(), Some(e) if e.subtype == EquipmentSubtype::Armor && e.equipped))
    }

    /// Hands left free by equipped items.
    pub fn free_hands(&self) -> u8 {
        let used: u8 = self
            .items
            .iter()
            .filter_map(|i| i.equipment())
            .filter(|e| e.equipped)
            .map(|e| e.usage.hands())
            .sum();
        2u8.saturating_sub(used)
    }

    /// The path owning a capacity, following a child capacity to its parent.
    pub fn path_of_capacity(&self, capacity: ItemId) -> Option<&Item> {
        let mut source = self.item(capacity)?;
        if let Some(parent) = source.capacity()?.parent_capacity {
            tracing::debug!(capacity = %capacity, parent = %parent, "rank resolved through parent capacity");
            source = self.item(parent)?;
        }
        self.item(source.capacity()?.path?)
    }

    /// Number of consecutively learned capacities from the start of the path.
    pub fn compute_path_rank(&self, path: ItemId) -> u8 {
        let Some(data) = self.item(path).and_then(|p| p.path()) else {
            return 0;
        };
        data.capacities
            .iter()
            .map_while(|id| self.item(*id).and_then(|c| c.capacity()))
            .take_while(|c| c.learned)
            .count() as u8
    }

    /// The people path: explicitly flagged, else a path no profile references.
    pub fn people_path(&self) -> Option<&Item> {
        if let Some(path) = self
            .paths()
            .find(|p| matches!(p.path(), Some(d) if d.subtype == PathSubtype::People))
        {
            return Some(path);
        }
        let profile_paths: Vec<ItemId> = self
            .items
            .iter()
            .filter_map(|i| i.profile())
            .flat_map(|p| p.paths.iter().copied())
            .collect();
        self.paths().find(|p| {
            !profile_paths.contains(&p.id)
                && matches!(p.path(), Some(d) if d.subtype != PathSubtype::Prestige)
        })
    }

    // ------------------------------------------------------------------------
    // Statuses and modifiers
    // ------------------------------------------------------------------------

    pub fn has_status(&self, status: &str) -> bool {
        self.statuses.contains(status)
    }

    pub fn is_incapacitated(&self) -> bool {
        self.attributes.hp.value == 0
            || INCAPACITATING_STATUSES.iter().any(|s| self.has_status(s))
    }

    /// Every modifier currently applying to the actor.
    pub fn active_modifiers(&self) -> Vec<Modifier> {
        let mut modifiers: Vec<Modifier> = self
            .items
            .iter()
            .flat_map(|item| item.modifiers(self))
            .collect();
        modifiers.extend(
            self.current_effects
                .iter()
                .flat_map(|effect| effect.modifiers.iter().cloned()),
        );
        modifiers
    }

    pub fn modifiers_for(&self, subtype: ModifierSubtype, target: ModifierTarget) -> Vec<Modifier> {
        self.active_modifiers()
            .into_iter()
            .filter(|m| m.subtype == subtype && m.target == target)
            .collect()
    }

    pub fn has_modifier_target(&self, target: ModifierTarget) -> bool {
        self.active_modifiers().iter().any(|m| m.target == target)
    }

    /// Skill bonuses for a target, including those that apply to every skill.
    pub fn skill_bonus(&self, target: ModifierTarget) -> i32 {
        self.active_modifiers()
            .iter()
            .filter(|m| {
                m.subtype == ModifierSubtype::Skill
                    && (m.target == target || m.target == ModifierTarget::All)
            })
            .map(|m| m.evaluate(self))
            .sum()
    }

    pub fn has_bonus_dice_for(&self, attack: AttackType) -> bool {
        let target = attack.modifier_target();
        self.active_modifiers()
            .iter()
            .any(|m| m.subtype == ModifierSubtype::BonusDice && m.target == target)
    }

    pub fn has_malus_dice_for(&self, attack: AttackType) -> bool {
        let target = attack.modifier_target();
        self.active_modifiers()
            .iter()
            .any(|m| m.subtype == ModifierSubtype::MalusDice && m.target == target)
    }

    /// Weapons outside the profile's trainings impose a malus die.
    pub fn is_trained_with_weapon(&self, weapon: ItemId) -> bool {
        let Some(category) = self
            .item(weapon)
            .and_then(|i| i.equipment())
            .and_then(|e| e.martial_category.as_deref())
        else {
            return true;
        };
        self.main_profile()
            .and_then(|p| p.profile())
            .is_some_and(|p| p.martial_trainings.iter().any(|t| t == category))
    }

    /// Extra mana a spell costs because of the equipped armor.
    pub fn mana_cost_from_armor(&self, capacity: ItemId) -> i32 {
        let is_spell = self
            .item(capacity)
            .and_then(|i| i.capacity())
            .is_some_and(|c| c.is_spell);
        if !is_spell {
            return 0;
        }
        let limit = self
            .main_profile()
            .and_then(|p| p.profile())
            .and_then(|p| p.spell_armor_limit);
        match (limit, self.main_armor().and_then(|a| a.equipment())) {
            (Some(limit), Some(armor)) => (armor.defense - limit).max(0),
            _ => 0,
        }
    }

    fn modifier_total(&self, subtype: ModifierSubtype, target: ModifierTarget) -> i32 {
        self.active_modifiers()
            .iter()
            .filter(|m| m.subtype == subtype && m.target == target)
            .map(|m| m.evaluate(self))
            .sum()
    }

    pub fn ability(&self, ability: Ability) -> i32 {
        self.abilities.get(ability)
            + self.modifier_total(ModifierSubtype::Ability, ability.modifier_target())
    }

    pub fn combat_value(&self, target: ModifierTarget) -> i32 {
        let base = match target {
            ModifierTarget::Melee => self.combat.melee,
            ModifierTarget::Ranged => self.combat.ranged,
            ModifierTarget::Magic => self.combat.magic,
            ModifierTarget::Init => self.combat.init,
            ModifierTarget::Def => self.combat.def,
            ModifierTarget::Crit => self.combat.crit,
            _ => return 0,
        };
        base + self.modifier_total(ModifierSubtype::Combat, target)
    }

    // ------------------------------------------------------------------------
    // Roll data
    // ------------------------------------------------------------------------

    /// Raw values without modifiers.
    ///
    /// Modifier formulas are substituted against this projection so that a
    /// modifier never depends on the total it contributes to.
    pub fn base_roll_data(&self) -> Value {
        let a = &self.abilities;
        let c = &self.combat;
        self.project(
            [a.agi, a.force, a.con, a.per, a.cha, a.int, a.vol],
            [c.melee, c.ranged, c.magic, c.init, c.def, c.crit],
        )
    }

    /// Values with every active modifier applied.
    pub fn roll_data(&self) -> Value {
        let abilities = Ability::all().map(|ability| self.ability(ability));
        let combat = [
            ModifierTarget::Melee,
            ModifierTarget::Ranged,
            ModifierTarget::Magic,
            ModifierTarget::Init,
            ModifierTarget::Def,
            ModifierTarget::Crit,
        ]
        .map(|target| self.combat_value(target));
        self.project(abilities, combat)
    }

    fn project(&self, abilities: [i32; 7], combat: [i32; 6]) -> Value {
        let [agi, force, con, per, cha, int, vol] = abilities;
        let [melee, ranged, magic, init, def, crit] = combat;
        let r = &self.resources;
        let hp = &self.attributes.hp;

        let mut data = json!({
            "agi": agi, "for": force, "con": con, "per": per,
            "cha": cha, "int": int, "vol": vol,
            "def": def, "ini": init,
            "abilities": {
                "agi": { "value": agi }, "for": { "value": force },
                "con": { "value": con }, "per": { "value": per },
                "cha": { "value": cha }, "int": { "value": int },
                "vol": { "value": vol },
            },
            "combat": {
                "melee": { "value": melee }, "ranged": { "value": ranged },
                "magic": { "value": magic }, "init": { "value": init },
                "def": { "value": def }, "crit": { "value": crit },
            },
            "resources": {
                "mana": { "value": r.mana.value, "max": r.mana.max },
                "fortune": { "value": r.fortune.value, "max": r.fortune.max },
                "recovery": { "value": r.recovery.value, "max": r.recovery.max },
            },
            "attributes": {
                "hp": { "value": hp.value, "max": hp.max },
                "level": self.attributes.level,
                "nc": self.attributes.nc,
            },
        });

        if let Some(map) = data.as_object_mut() {
            match self.kind {
                ActorKind::Character => {
                    map.insert("niv".into(), json!(self.attributes.level));
                    map.insert("atc".into(), json!(melee));
                    map.insert("atd".into(), json!(ranged));
                    map.insert("atm".into(), json!(magic));
                }
                ActorKind::Encounter => {
                    map.insert("nc".into(), json!(self.attributes.nc));
                    map.insert("atm".into(), json!(magic));
                }
            }
        }
        data
    }

    // ------------------------------------------------------------------------
    // Patches
    // ------------------------------------------------------------------------

    /// Apply a persistence patch to the in-memory state.
    ///
    /// Returns false when the patch targets an item that no longer exists.
    pub fn apply_patch(&mut self, patch: &Patch) -> bool {
        match patch {
            Patch::Gauge { kind, gauge } => {
                let slot = match kind {
                    GaugeKind::Hp => &mut self.attributes.hp,
                    GaugeKind::Mana => &mut self.resources.mana,
                    GaugeKind::Fortune => &mut self.resources.fortune,
                    GaugeKind::Recovery => &mut self.resources.recovery,
                };
                *slot = *gauge;
                true
            }
            Patch::Level(level) => {
                self.attributes.level = *level;
                true
            }
            Patch::CurrentEffects(effects) => {
                self.current_effects = effects.clone();
                true
            }
            Patch::Item { item, patch } => {
                let Some(target) = self.item_mut(*item) else {
                    return false;
                };
                match patch {
                    ItemPatch::Quantity(current) => match target.equipment_mut() {
                        Some(e) => e.quantity.current = *current,
                        None => return false,
                    },
                    ItemPatch::Charges(current) => match &mut target.kind {
                        ItemKind::Equipment(e) => e.charges.current = *current,
                        ItemKind::Capacity(c) => c.charges.current = *current,
                        _ => return false,
                    },
                    ItemPatch::ManaCost(cost) => match target.capacity_mut() {
                        Some(c) => c.mana_cost = *cost,
                        None => return false,
                    },
                    ItemPatch::PathRank(rank) => match target.path_mut() {
                        Some(p) => p.rank = *rank,
                        None => return false,
                    },
                    ItemPatch::StateAndActions(state) => target.set_state_and_actions(*state),
                    ItemPatch::ActionEnabled { index, enabled } => {
                        match target.actions.get_mut(*index) {
                            Some(action) => action.properties.enabled = *enabled,
                            None => return false,
                        }
                    }
                }
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{Action, ActionProperties};
    use crate::item::{CapacityData, EquipmentData, ItemKind, PathData, ProfileData};
    use crate::modifier::ModifierType;

    fn path_with(actor: &mut Actor, learned: &[bool]) -> ItemId {
        let path_id = ItemId::new();
        let mut capacities = Vec::new();
        for (i, is_learned) in learned.iter().enumerate() {
            let mut data = CapacityData::in_path(path_id, i as u8 + 1);
            data.learned = *is_learned;
            capacities.push(actor.add_item(Item::new(
                format!("Capacité {}", i + 1),
                ItemKind::Capacity(data),
            )));
        }
        actor.add_item(
            Item::new(
                "Voie du guerrier",
                ItemKind::Path(PathData {
                    capacities,
                    ..Default::default()
                }),
            )
            .with_id(path_id),
        );
        path_id
    }

    #[test]
    fn test_compute_path_rank_stops_at_gap() {
        let mut actor = Actor::new("Aldric", ActorKind::Character);
        let path = path_with(&mut actor, &[true, true, false, true]);
        assert_eq!(actor.compute_path_rank(path), 2);
    }

    #[test]
    fn test_path_of_child_capacity() {
        let mut actor = Actor::new("Aldric", ActorKind::Character);
        let path = path_with(&mut actor, &[true]);
        let parent = actor.item(path).unwrap().path().unwrap().capacities[0];
        let child = actor.add_item(Item::new(
            "Sous-capacité",
            ItemKind::Capacity(CapacityData {
                parent_capacity: Some(parent),
                ..Default::default()
            }),
        ));
        assert_eq!(actor.path_of_capacity(child).map(|p| p.id), Some(path));
    }

    #[test]
    fn test_roll_data_keys() {
        let character = Actor::new("Aldric", ActorKind::Character)
            .with_level(4)
            .with_ability(Ability::For, 3);
        let data = character.roll_data();
        assert_eq!(data["for"], 3);
        assert_eq!(data["niv"], 4);
        assert_eq!(data["abilities"]["for"]["value"], 3);
        assert!(data.get("atc").is_some());

        let encounter = Actor::new("Gobelin", ActorKind::Encounter).with_nc(0.5);
        let data = encounter.roll_data();
        assert_eq!(data["nc"], 0.5);
        assert!(data.get("atc").is_none());
        assert!(data.get("atm").is_some());
    }

    #[test]
    fn test_roll_data_applies_modifiers() {
        let mut actor = Actor::new("Aldric", ActorKind::Character);
        let mut shield = Item::new(
            "Bouclier",
            ItemKind::Equipment(EquipmentData::new(EquipmentSubtype::Shield)),
        )
        .with_action(Action::new("Protection").with_modifier(Modifier::new(
            ModifierType::Equipment,
            ModifierSubtype::Combat,
            ModifierTarget::Def,
            "2",
        )));
        shield.set_state_and_actions(true);
        actor.add_item(shield);

        assert_eq!(actor.base_roll_data()["def"], 10);
        assert_eq!(actor.roll_data()["def"], 12);
    }

    #[test]
    fn test_incapacitated() {
        let mut actor = Actor::new("Aldric", ActorKind::Character);
        assert!(!actor.is_incapacitated());
        actor.statuses.insert("stun".to_string());
        assert!(actor.is_incapacitated());
        actor.statuses.clear();
        actor.attributes.hp.value = 0;
        assert!(actor.is_incapacitated());
    }

    #[test]
    fn test_mana_cost_from_armor() {
        let mut actor = Actor::new("Mage", ActorKind::Character);
        actor.add_item(Item::new(
            "Magicien",
            ItemKind::Profile(ProfileData {
                spell_armor_limit: Some(2),
                ..Default::default()
            }),
        ));
        let mut armor = EquipmentData::new(EquipmentSubtype::Armor);
        armor.defense = 4;
        armor.equipped = true;
        actor.add_item(Item::new("Cuirasse", ItemKind::Equipment(armor)));
        let spell = actor.add_item(Item::new(
            "Projectile",
            ItemKind::Capacity(CapacityData {
                is_spell: true,
                ..Default::default()
            }),
        ));
        assert_eq!(actor.mana_cost_from_armor(spell), 2);
    }

    #[test]
    fn test_apply_patch_missing_item() {
        let mut actor = Actor::new("Aldric", ActorKind::Character);
        let applied = actor.apply_patch(&Patch::Item {
            item: ItemId::new(),
            patch: ItemPatch::Quantity(0),
        });
        assert!(!applied);

        let activable = Item::new(
            "Rage",
            ItemKind::Capacity(CapacityData::default()),
        )
        .with_action(Action::new("Rage").with_properties(ActionProperties {
            activable: true,
            temporary: true,
            ..Default::default()
        }));
        let id = actor.add_item(activable);
        assert!(actor.apply_patch(&Patch::Item {
            item: id,
            patch: ItemPatch::ActionEnabled {
                index: 0,
                enabled: true
            },
        }));
        assert!(actor.item(id).unwrap().actions[0].properties.enabled);
    }
}
