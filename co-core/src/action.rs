//! Actions: the activatable, resolver-bearing units carried by items.

use crate::actor::Actor;
use crate::item::{Item, ItemKind};
use crate::modifier::Modifier;
use crate::resolver::Resolver;
use serde::{Deserialize, Serialize};

/// Flags the controller flips when items are equipped, learned or toggled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ActionProperties {
    pub visible: bool,
    pub activable: bool,
    pub enabled: bool,
    pub temporary: bool,
    pub no_mana_cost: bool,
}

/// Predicate gating an action's modifier contribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "predicate", content = "object", rename_all = "camelCase")]
pub enum ActionCondition {
    /// The carrying item is equipped.
    ItemEquipped,
    /// The carrying capacity is learned.
    CapacityLearned,
    /// The actor currently has the status.
    HasStatus(String),
    /// The actor does not have the status.
    LacksStatus(String),
}

impl ActionCondition {
    pub fn evaluate(&self, item: &Item, actor: &Actor) -> bool {
        match self {
            ActionCondition::ItemEquipped => match &item.kind {
                ItemKind::Equipment(data) => data.equipped,
                _ => false,
            },
            ActionCondition::CapacityLearned => match &item.kind {
                ItemKind::Capacity(data) => data.learned,
                _ => false,
            },
            ActionCondition::HasStatus(status) => actor.has_status(status),
            ActionCondition::LacksStatus(status) => !actor.has_status(status),
        }
    }
}

/// Type of interaction the player asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RollKind {
    #[default]
    Attack,
    Damage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub label: String,
    #[serde(default)]
    pub chat_flavor: String,
    #[serde(default)]
    pub properties: ActionProperties,
    #[serde(default)]
    pub conditions: Vec<ActionCondition>,
    #[serde(default)]
    pub modifiers: Vec<Modifier>,
    #[serde(default)]
    pub resolvers: Vec<Resolver>,
}

impl Action {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Default::default()
        }
    }

    pub fn with_properties(mut self, properties: ActionProperties) -> Self {
        self.properties = properties;
        self
    }

    pub fn with_condition(mut self, condition: ActionCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_modifier(mut self, modifier: Modifier) -> Self {
        self.modifiers.push(modifier);
        self
    }

    pub fn with_resolver(mut self, resolver: Resolver) -> Self {
        self.resolvers.push(resolver);
        self
    }

    pub fn has_conditions(&self) -> bool {
        !self.conditions.is_empty()
    }

    /// Whether the action's modifiers currently apply.
    ///
    /// Conditioned actions need every condition to hold; activable ones
    /// additionally need to be enabled.
    pub fn contributes(&self, item: &Item, actor: &Actor) -> bool {
        if self.has_conditions() {
            if !self.conditions.iter().all(|c| c.evaluate(item, actor)) {
                return false;
            }
            if self.properties.activable {
                return self.properties.enabled;
            }
            return true;
        }
        self.properties.enabled
    }

    /// Visible to the player on the sheet.
    pub fn is_visible(&self, item: &Item, actor: &Actor) -> bool {
        if !self.properties.visible {
            return false;
        }
        match &item.kind {
            ItemKind::Capacity(data) => data.learned,
            ItemKind::Equipment(data) => {
                data.equipped || self.conditions.iter().all(|c| c.evaluate(item, actor))
            }
            _ => true,
        }
    }

    /// Flip the flags that follow an item's equipped/learned field.
    ///
    /// Non-activable actions follow `enabled`; activable actions without
    /// conditions follow `visible`.
    pub fn follow_item_state(&mut self, state: bool) {
        if !self.properties.activable {
            self.properties.enabled = state;
        } else if !self.has_conditions() {
            self.properties.visible = state;
        }
    }
}
