//! Items owned by actors: equipment, capacities, features, profiles, paths
//! and natural attacks.
//!
//! Cross references between items (capacity → path, profile → paths) are
//! plain [`ItemId`] look-ups that may dangle; callers treat a missing target
//! as "nothing there".

use crate::action::Action;
use crate::actor::{Actor, ItemId};
use crate::modifier::Modifier;
use serde::{Deserialize, Serialize};

// ============================================================================
// Equipment
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EquipmentSubtype {
    Weapon,
    Armor,
    Shield,
    Consumable,
    #[default]
    Misc,
}

/// Hands needed to wield an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub one_hand: bool,
    pub two_hand: bool,
}

impl Usage {
    pub fn hands(&self) -> u8 {
        if self.two_hand {
            2
        } else if self.one_hand {
            1
        } else {
            0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quantity {
    pub current: i32,
    pub max: i32,
    pub destroy_if_empty: bool,
}

impl Default for Quantity {
    fn default() -> Self {
        Self {
            current: 1,
            max: 1,
            destroy_if_empty: false,
        }
    }
}

/// Remaining uses: ammunition for reloadable weapons, daily uses for capacities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Charges {
    pub current: i32,
    pub max: i32,
}

impl Charges {
    pub fn full(max: i32) -> Self {
        Self { current: max, max }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct EquipmentData {
    pub subtype: EquipmentSubtype,
    pub equipped: bool,
    #[serde(default)]
    pub damage: String,
    #[serde(default)]
    pub martial_category: Option<String>,
    #[serde(default)]
    pub usage: Usage,
    #[serde(default)]
    pub quantity: Quantity,
    #[serde(default)]
    pub reloadable: bool,
    #[serde(default)]
    pub charges: Charges,
    #[serde(default)]
    pub defense: i32,
}

impl EquipmentData {
    pub fn new(subtype: EquipmentSubtype) -> Self {
        Self {
            subtype,
            ..Default::default()
        }
    }

    pub fn weapon(damage: impl Into<String>) -> Self {
        Self {
            subtype: EquipmentSubtype::Weapon,
            damage: damage.into(),
            usage: Usage {
                one_hand: true,
                two_hand: false,
            },
            ..Default::default()
        }
    }
}

// ============================================================================
// Capacities and paths
// ============================================================================

/// How often a capacity may be used between rests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    #[default]
    None,
    Combat,
    Day,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityData {
    pub path: Option<ItemId>,
    #[serde(default)]
    pub parent_capacity: Option<ItemId>,
    pub learned: bool,
    pub rank: u8,
    #[serde(default)]
    pub is_spell: bool,
    /// The capacity's actions include an attack roll.
    #[serde(default)]
    pub action_type_attack: bool,
    #[serde(default)]
    pub mana_cost: i32,
    #[serde(default)]
    pub frequency: Frequency,
    #[serde(default)]
    pub charges: Charges,
}

impl Default for CapacityData {
    fn default() -> Self {
        Self {
            path: None,
            parent_capacity: None,
            learned: false,
            rank: 1,
            is_spell: false,
            action_type_attack: false,
            mana_cost: 0,
            frequency: Frequency::None,
            charges: Charges::default(),
        }
    }
}

impl CapacityData {
    pub fn in_path(path: ItemId, rank: u8) -> Self {
        Self {
            path: Some(path),
            rank,
            ..Default::default()
        }
    }

    pub fn has_frequency(&self) -> bool {
        self.frequency != Frequency::None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PathSubtype {
    People,
    #[default]
    Profile,
    Prestige,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PathData {
    pub subtype: PathSubtype,
    /// Ordered by rank.
    pub capacities: Vec<ItemId>,
    /// Persisted rank, kept in step by learning and forgetting.
    pub rank: u8,
}

// ============================================================================
// Features, profiles, attacks
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FeatureSubtype {
    People,
    #[default]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FeatureData {
    pub subtype: FeatureSubtype,
    #[serde(default)]
    pub paths: Vec<ItemId>,
    #[serde(default)]
    pub modifiers: Vec<Modifier>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProfileData {
    pub paths: Vec<ItemId>,
    #[serde(default)]
    pub modifiers: Vec<Modifier>,
    /// Weapon categories the profile is trained with.
    #[serde(default)]
    pub martial_trainings: Vec<String>,
    /// Highest armor DEF this profile casts spells in without extra mana.
    #[serde(default)]
    pub spell_armor_limit: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AttackData {
    pub damage: String,
}

// ============================================================================
// Item
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "system", rename_all = "lowercase")]
pub enum ItemKind {
    Equipment(EquipmentData),
    Capacity(CapacityData),
    Feature(FeatureData),
    Profile(ProfileData),
    Path(PathData),
    Attack(AttackData),
}

impl ItemKind {
    pub fn name(&self) -> &'static str {
        match self {
            ItemKind::Equipment(_) => "equipment",
            ItemKind::Capacity(_) => "capacity",
            ItemKind::Feature(_) => "feature",
            ItemKind::Profile(_) => "profile",
            ItemKind::Path(_) => "path",
            ItemKind::Attack(_) => "attack",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub actions: Vec<Action>,
    pub kind: ItemKind,
}

impl Item {
    pub fn new(name: impl Into<String>, kind: ItemKind) -> Self {
        let name = name.into();
        Self {
            id: ItemId::new(),
            slug: slugify(&name),
            name,
            description: String::new(),
            actions: Vec::new(),
            kind,
        }
    }

    pub fn with_id(mut self, id: ItemId) -> Self {
        self.id = id;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Attach an action, binding its modifiers to this item.
    pub fn with_action(mut self, mut action: Action) -> Self {
        for modifier in &mut action.modifiers {
            modifier.update_source(self.id);
        }
        self.actions.push(action);
        self
    }

    pub fn capacity(&self) -> Option<&CapacityData> {
        match &self.kind {
            ItemKind::Capacity(data) => Some(data),
            _ => None,
        }
    }

    pub fn capacity_mut(&mut self) -> Option<&mut CapacityData> {
        match &mut self.kind {
            ItemKind::Capacity(data) => Some(data),
            _ => None,
        }
    }

    pub fn equipment(&self) -> Option<&EquipmentData> {
        match &self.kind {
            ItemKind::Equipment(data) => Some(data),
            _ => None,
        }
    }

    pub fn equipment_mut(&mut self) -> Option<&mut EquipmentData> {
        match &mut self.kind {
            ItemKind::Equipment(data) => Some(data),
            _ => None,
        }
    }

    pub fn path(&self) -> Option<&PathData> {
        match &self.kind {
            ItemKind::Path(data) => Some(data),
            _ => None,
        }
    }

    pub fn path_mut(&mut self) -> Option<&mut PathData> {
        match &mut self.kind {
            ItemKind::Path(data) => Some(data),
            _ => None,
        }
    }

    pub fn profile(&self) -> Option<&ProfileData> {
        match &self.kind {
            ItemKind::Profile(data) => Some(data),
            _ => None,
        }
    }

    pub fn is_weapon(&self) -> bool {
        matches!(self.equipment(), Some(e) if e.subtype == EquipmentSubtype::Weapon)
    }

    pub fn is_reloadable(&self) -> bool {
        self.equipment().is_some_and(|e| e.reloadable)
    }

    pub fn is_consumable(&self) -> bool {
        matches!(self.equipment(), Some(e) if e.subtype == EquipmentSubtype::Consumable)
    }

    /// Modifiers this item currently contributes to its owner.
    ///
    /// Equipment and capacities contribute through their actions; features and
    /// profiles carry modifiers directly.
    pub fn modifiers(&self, actor: &Actor) -> Vec<Modifier> {
        match &self.kind {
            ItemKind::Equipment(_) | ItemKind::Capacity(_) => self
                .actions
                .iter()
                .filter(|action| action.contributes(self, actor))
                .flat_map(|action| action.modifiers.iter().cloned())
                .collect(),
            ItemKind::Feature(data) => data.modifiers.clone(),
            ItemKind::Profile(data) => data.modifiers.clone(),
            ItemKind::Path(_) | ItemKind::Attack(_) => Vec::new(),
        }
    }

    /// Actions the sheet should show.
    pub fn visible_actions(&self, actor: &Actor) -> Vec<&Action> {
        self.actions
            .iter()
            .filter(|action| action.is_visible(self, actor))
            .collect()
    }

    /// Set a learned/equipped field and make the actions follow it.
    pub fn set_state_and_actions(&mut self, state: bool) {
        match &mut self.kind {
            ItemKind::Capacity(data) => data.learned = state,
            ItemKind::Equipment(data) => data.equipped = state,
            _ => {}
        }
        for action in &mut self.actions {
            action.follow_item_state(state);
        }
    }
}

fn slugify(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionProperties;
    use crate::actor::ActorKind;
    use crate::modifier::{ModifierSubtype, ModifierTarget, ModifierType};

    #[test]
    fn test_slug() {
        let item = Item::new("Boule de feu", ItemKind::Attack(AttackData::default()));
        assert_eq!(item.slug, "boule-de-feu");
    }

    #[test]
    fn test_with_action_binds_modifier_source() {
        let item = Item::new(
            "Cotte de mailles",
            ItemKind::Equipment(EquipmentData::new(EquipmentSubtype::Armor)),
        )
        .with_action(Action::new("Protection").with_modifier(Modifier::new(
            ModifierType::Equipment,
            ModifierSubtype::Combat,
            ModifierTarget::Def,
            "5",
        )));
        assert_eq!(item.actions[0].modifiers[0].source, Some(item.id));
    }

    #[test]
    fn test_set_state_and_actions() {
        let mut item = Item::new(
            "Épée longue",
            ItemKind::Equipment(EquipmentData::weapon("1d8")),
        )
        .with_action(Action::new("Attaque").with_properties(ActionProperties {
            activable: true,
            ..Default::default()
        }))
        .with_action(Action::new("Garde"));

        item.set_state_and_actions(true);
        assert!(item.equipment().unwrap().equipped);
        assert!(item.actions[0].properties.visible);
        assert!(item.actions[1].properties.enabled);

        let actor = Actor::new("Aldric", ActorKind::Character);
        assert_eq!(item.visible_actions(&actor).len(), 1);
    }
}
