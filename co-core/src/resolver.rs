//! Resolvers: the effect-producing rules attached to actions.
//!
//! A resolver is stored with its string tag, as authored. The engine maps
//! the tag to a [`ResolverKind`] through a [`ResolverRegistry`] and
//! dispatches on the variant; unknown tags fail closed.

use crate::action::RollKind;
use crate::actor::{ActorId, ItemId};
use crate::check::CheckRequest;
use crate::effect::{CustomEffect, EffectType, EffectUnit};
use crate::engine::{Engine, EngineError, EngineResult};
use crate::formula;
use crate::host::{EngineEvent, Host, ItemPatch, Patch, PrivilegedRequest};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ============================================================================
// Data
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Skill {
    #[serde(default)]
    pub formula: String,
    #[serde(default)]
    pub difficulty: String,
    /// Natural result from which the check is critical.
    #[serde(default)]
    pub crit: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Damage {
    #[serde(default)]
    pub formula: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    #[default]
    None,
    #[serde(rename = "self")]
    Myself,
    Single,
    Multiple,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TargetScope {
    Allies,
    Enemies,
    #[default]
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverTarget {
    #[serde(rename = "type")]
    pub kind: TargetType,
    pub scope: TargetScope,
    pub number: u32,
}

impl Default for ResolverTarget {
    fn default() -> Self {
        Self {
            kind: TargetType::None,
            scope: TargetScope::All,
            number: 1,
        }
    }
}

impl ResolverTarget {
    pub fn single() -> Self {
        Self {
            kind: TargetType::Single,
            scope: TargetScope::All,
            number: 1,
        }
    }

    pub fn myself() -> Self {
        Self {
            kind: TargetType::Myself,
            ..Self::default()
        }
    }

    pub fn multiple(scope: TargetScope, number: u32) -> Self {
        Self {
            kind: TargetType::Multiple,
            scope,
            number,
        }
    }

    /// Most targets the user may pick.
    pub fn allowed(&self) -> u32 {
        match self.kind {
            TargetType::None => 0,
            TargetType::Myself | TargetType::Single => 1,
            TargetType::Multiple => self.number,
        }
    }
}

/// Check verdict on which an additional effect triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ApplyOn {
    #[default]
    Success,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AdditionalEffect {
    pub active: bool,
    #[serde(default)]
    pub apply_on: ApplyOn,
    #[serde(default)]
    pub statuses: Vec<String>,
    #[serde(default)]
    pub duration: i32,
    #[serde(default)]
    pub unit: EffectUnit,
    #[serde(default)]
    pub formula: String,
    #[serde(default)]
    pub element_type: Option<String>,
}

impl AdditionalEffect {
    pub fn triggers_on(&self, success: bool) -> bool {
        self.active
            && match self.apply_on {
                ApplyOn::Success => success,
                ApplyOn::Fail => !success,
            }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Resolver {
    /// Tag looked up in the [`ResolverRegistry`].
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub skill: Skill,
    #[serde(default)]
    pub dmg: Damage,
    #[serde(default)]
    pub target: ResolverTarget,
    #[serde(default)]
    pub additional_effect: AdditionalEffect,
    #[serde(default)]
    pub bonus_dice_add: bool,
    #[serde(default)]
    pub malus_dice_add: bool,
}

impl Resolver {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Default::default()
        }
    }

    pub fn melee(skill: impl Into<String>, damage: impl Into<String>) -> Self {
        Self::new("melee").with_skill(skill).with_damage(damage)
    }

    pub fn with_skill(mut self, formula: impl Into<String>) -> Self {
        self.skill.formula = formula.into();
        self
    }

    pub fn with_difficulty(mut self, difficulty: impl Into<String>) -> Self {
        self.skill.difficulty = difficulty.into();
        self
    }

    pub fn with_crit(mut self, crit: i32) -> Self {
        self.skill.crit = Some(crit);
        self
    }

    pub fn with_damage(mut self, formula: impl Into<String>) -> Self {
        self.dmg.formula = formula.into();
        self
    }

    pub fn with_target(mut self, target: ResolverTarget) -> Self {
        self.target = target;
        self
    }

    pub fn with_additional_effect(mut self, effect: AdditionalEffect) -> Self {
        self.additional_effect = effect;
        self
    }

    pub fn with_bonus_dice(mut self) -> Self {
        self.bonus_dice_add = true;
        self
    }

    pub fn with_malus_dice(mut self) -> Self {
        self.malus_dice_add = true;
        self
    }
}

// ============================================================================
// Registry
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolverKind {
    Melee,
    Ranged,
    Magical,
    Heal,
    Auto,
    Consumable,
}

impl ResolverKind {
    pub fn name(&self) -> &'static str {
        match self {
            ResolverKind::Melee => "melee",
            ResolverKind::Ranged => "ranged",
            ResolverKind::Magical => "magical",
            ResolverKind::Heal => "heal",
            ResolverKind::Auto => "auto",
            ResolverKind::Consumable => "consumable",
        }
    }

    pub fn is_attack(&self) -> bool {
        matches!(
            self,
            ResolverKind::Melee | ResolverKind::Ranged | ResolverKind::Magical
        )
    }
}

impl fmt::Display for ResolverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Maps authored tags to resolver variants.
#[derive(Debug, Clone)]
pub struct ResolverRegistry {
    tags: HashMap<String, ResolverKind>,
}

impl Default for ResolverRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        for kind in [
            ResolverKind::Melee,
            ResolverKind::Ranged,
            ResolverKind::Magical,
            ResolverKind::Heal,
            ResolverKind::Auto,
            ResolverKind::Consumable,
        ] {
            registry.register(kind.name(), kind);
        }
        registry.register("consume", ResolverKind::Consumable);
        registry
    }
}

impl ResolverRegistry {
    pub fn empty() -> Self {
        Self {
            tags: HashMap::new(),
        }
    }

    /// Register a tag (or an alias) for a variant.
    pub fn register(&mut self, tag: impl Into<String>, kind: ResolverKind) {
        self.tags.insert(tag.into(), kind);
    }

    pub fn lookup(&self, tag: &str) -> Option<ResolverKind> {
        self.tags.get(tag).copied()
    }
}

// ============================================================================
// Dispatch
// ============================================================================

/// Everything a resolver needs to know about its invocation.
#[derive(Debug, Clone)]
pub struct ResolveContext {
    pub actor: ActorId,
    pub item: ItemId,
    pub action_index: usize,
    pub roll_kind: RollKind,
}

impl<H: Host> Engine<H> {
    /// Run one resolver. `true` means the resolver went through and the
    /// action's consumption side effects may apply.
    pub async fn resolve(&mut self, ctx: &ResolveContext, resolver: Resolver) -> EngineResult<bool> {
        let Some(kind) = self.registry.lookup(&resolver.kind) else {
            tracing::warn!(tag = %resolver.kind, "unknown resolver type");
            return Ok(false);
        };
        if self.session.debug.resolvers {
            tracing::debug!(%kind, actor = %ctx.actor, item = %ctx.item, roll = ?ctx.roll_kind, "resolver");
        }
        match kind {
            ResolverKind::Melee | ResolverKind::Ranged | ResolverKind::Magical => {
                self.resolve_attack(ctx, resolver).await
            }
            ResolverKind::Auto => self.resolve_auto(ctx, resolver).await,
            ResolverKind::Heal => self.resolve_heal(ctx, resolver).await,
            ResolverKind::Consumable => self.consume_item(ctx.actor, ctx.item).await,
        }
    }

    /// Skill and damage formulas substituted against the attacker.
    fn attacker_formula(&self, actor: ActorId, item: ItemId, formula: &str) -> EngineResult<String> {
        let actor = self.actor(actor)?;
        let custom = formula::evaluate_custom_values_with(
            actor,
            formula,
            Some(item),
            &self.rules.evolving_dice,
        );
        Ok(formula::replace_roll_data(&custom, &actor.roll_data()))
    }

    async fn resolve_attack(&mut self, ctx: &ResolveContext, mut resolver: Resolver) -> EngineResult<bool> {
        if resolver.target.kind == TargetType::None {
            resolver.target = ResolverTarget::single();
        }
        let request = CheckRequest {
            actor: ctx.actor,
            item: ctx.item,
            action_index: ctx.action_index,
            roll_kind: ctx.roll_kind,
            auto: false,
            skill_formula: self.attacker_formula(ctx.actor, ctx.item, &resolver.skill.formula)?,
            skill_tooltip: resolver.skill.formula.clone(),
            damage_formula: self.attacker_formula(ctx.actor, ctx.item, &resolver.dmg.formula)?,
            resolver,
        };
        self.roll_check(request).await
    }

    async fn resolve_auto(&mut self, ctx: &ResolveContext, resolver: Resolver) -> EngineResult<bool> {
        let request = CheckRequest {
            actor: ctx.actor,
            item: ctx.item,
            action_index: ctx.action_index,
            roll_kind: RollKind::Damage,
            auto: true,
            skill_formula: String::new(),
            skill_tooltip: String::new(),
            damage_formula: self.attacker_formula(ctx.actor, ctx.item, &resolver.dmg.formula)?,
            resolver,
        };
        self.roll_check(request).await
    }

    async fn resolve_heal(&mut self, ctx: &ResolveContext, resolver: Resolver) -> EngineResult<bool> {
        let authored = if resolver.skill.formula.trim().is_empty() {
            &resolver.dmg.formula
        } else {
            &resolver.skill.formula
        };
        let formula = self.attacker_formula(ctx.actor, ctx.item, authored)?;
        let from = self
            .actor(ctx.actor)?
            .item(ctx.item)
            .map(|i| i.name.clone())
            .unwrap_or_default();

        let targets = match resolver.target.kind {
            TargetType::None => {
                tracing::debug!(item = %from, "heal without target");
                return Ok(true);
            }
            TargetType::Myself => vec![ctx.actor],
            TargetType::Single | TargetType::Multiple => {
                let actor = self.actor(ctx.actor)?;
                let targets = self.host.acquire_targets(actor, &resolver.target).await;
                if self.session.debug.resolvers {
                    tracing::debug!(?targets, "heal targets");
                }
                targets
            }
        };

        let roll = self.roll(&formula).await?;
        self.deliver_heal_and_damage(&targets, &from, -roll.total).await?;
        Ok(true)
    }

    /// Use up one unit of a consumable. Always succeeds.
    pub async fn consume_item(&mut self, actor: ActorId, item: ItemId) -> EngineResult<bool> {
        let Some(quantity) = self
            .actor(actor)?
            .item(item)
            .and_then(|i| i.equipment())
            .map(|e| e.quantity)
        else {
            tracing::debug!(actor = %actor, item = %item, "consumed item missing");
            return Ok(true);
        };
        let current = quantity.current - 1;
        if current <= 0 && quantity.destroy_if_empty {
            if !self.can_write(actor)? {
                return Err(EngineError::NotAuthoritative(actor));
            }
            self.host.delete_embedded(actor, &[item]).await?;
            if let Some(removed) = self.actor_mut(actor)?.remove_item(item) {
                self.host
                    .publish(EngineEvent::ItemDestroyed {
                        actor,
                        item: removed.name,
                    })
                    .await;
            }
        } else {
            self.commit(actor, Patch::item(item, ItemPatch::Quantity(current.max(0))))
                .await?;
        }
        Ok(true)
    }

    /// Build the resolver's timed effect and hand it to its targets.
    ///
    /// The formula is substituted once, against the caster.
    pub(crate) async fn manage_additional_effect(
        &mut self,
        actor_id: ActorId,
        item_id: ItemId,
        action_index: usize,
        resolver: &Resolver,
    ) -> EngineResult<bool> {
        if !self.in_combat() {
            tracing::debug!("no combat, additional effect skipped");
            return Ok(false);
        }
        let actor = self.actor(actor_id)?;
        let Some(item) = actor.item(item_id) else {
            return Ok(false);
        };
        let spec = &resolver.additional_effect;

        let mut effect = CustomEffect::new(item.name.clone())
            .with_source(item_id)
            .with_statuses(spec.statuses.iter().cloned())
            .with_duration(spec.duration, spec.unit);
        effect.element_type = spec.element_type.clone();

        let formula_set = !spec.formula.trim().is_empty() && spec.formula.trim() != "0";
        effect.effect_type = if formula_set {
            EffectType::DamageOrHeal
        } else if !spec.statuses.is_empty() {
            EffectType::Status
        } else {
            let modifiers = item
                .actions
                .get(action_index)
                .map(|a| a.modifiers.clone())
                .unwrap_or_default();
            let debuff = modifiers.iter().any(|m| m.evaluate(actor) < 0);
            effect.modifiers = modifiers;
            if debuff {
                EffectType::Debuff
            } else {
                EffectType::Buff
            }
        };

        if formula_set {
            let custom = formula::evaluate_custom_values_with(
                actor,
                &spec.formula,
                None,
                &self.rules.evolving_dice,
            );
            effect.formula = formula::replace_roll_data(&custom, &actor.roll_data());
        }

        let targets = match resolver.target.kind {
            TargetType::Myself => vec![actor_id],
            _ => self.host.acquire_targets(actor, &resolver.target).await,
        };
        self.deliver_effect(&targets, effect).await
    }

    /// Attach an effect to targets, asking the GM for those we cannot write.
    pub(crate) async fn deliver_effect(
        &mut self,
        targets: &[ActorId],
        effect: CustomEffect,
    ) -> EngineResult<bool> {
        let mut requests = Vec::new();
        let mut applied = true;
        for &target in targets {
            if self.actors.contains_key(&target) && self.can_write(target)? {
                applied &= self.apply_custom_effect(target, effect.clone()).await?;
            } else {
                requests.push(PrivilegedRequest::ApplyEffect {
                    target,
                    effect: effect.clone(),
                });
            }
        }
        self.request_all(requests).await?;
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_defaults_and_aliases() {
        let mut registry = ResolverRegistry::default();
        assert_eq!(registry.lookup("melee"), Some(ResolverKind::Melee));
        assert_eq!(registry.lookup("consume"), Some(ResolverKind::Consumable));
        assert_eq!(registry.lookup(""), None);
        assert_eq!(registry.lookup("teleport"), None);

        registry.register("contact", ResolverKind::Melee);
        assert_eq!(registry.lookup("contact"), Some(ResolverKind::Melee));
    }

    #[test]
    fn test_resolver_deserializes_authored_shape() {
        let resolver: Resolver = serde_json::from_value(serde_json::json!({
            "type": "melee",
            "skill": { "formula": "@atc", "difficulty": "@cible.def" },
            "dmg": { "formula": "1d8+@for" },
            "target": { "type": "self", "scope": "allies", "number": 1 },
            "additionalEffect": { "active": true, "statuses": ["stun"], "duration": 1 },
        }))
        .unwrap();
        assert_eq!(resolver.kind, "melee");
        assert_eq!(resolver.target.kind, TargetType::Myself);
        assert_eq!(resolver.additional_effect.apply_on, ApplyOn::Success);
        assert!(!resolver.bonus_dice_add);
    }

    #[test]
    fn test_additional_effect_trigger() {
        let mut spec = AdditionalEffect {
            active: true,
            ..Default::default()
        };
        assert!(spec.triggers_on(true));
        assert!(!spec.triggers_on(false));
        spec.apply_on = ApplyOn::Fail;
        assert!(spec.triggers_on(false));
        spec.active = false;
        assert!(!spec.triggers_on(false));
    }

    #[test]
    fn test_target_allowed() {
        assert_eq!(ResolverTarget::default().allowed(), 0);
        assert_eq!(ResolverTarget::single().allowed(), 1);
        assert_eq!(ResolverTarget::multiple(TargetScope::Enemies, 3).allowed(), 3);
    }
}
