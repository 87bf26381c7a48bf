//! Timed effects and their combat lifecycle.
//!
//! A [`CustomEffect`] bundles statuses, modifiers and a periodic damage or
//! heal formula for a number of rounds. Effects are stamped with the round
//! they started in; expiry and periodic ticks are computed from that stamp
//! and from the round last processed, so rewinding the combat clock never
//! replays a tick.

use crate::actor::{ActorId, ItemId};
use crate::config::RulesConfig;
use crate::dice::DiceExpression;
use crate::engine::{Engine, EngineError, EngineResult};
use crate::host::{EngineEvent, Host, Patch, Refusal};
use crate::modifier::Modifier;
use crate::session::ClockSnapshot;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum EffectType {
    Damage,
    Heal,
    Buff,
    Debuff,
    #[default]
    Status,
    DamageOrHeal,
}

/// Unit of an effect's duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EffectUnit {
    #[default]
    Round,
    Second,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CustomEffect {
    /// Effects are unique per name on an actor.
    pub name: String,
    pub source: Option<ItemId>,
    #[serde(default)]
    pub statuses: Vec<String>,
    pub effect_type: EffectType,
    pub unit: EffectUnit,
    pub duration: i32,
    #[serde(default)]
    pub started_at: i32,
    #[serde(default)]
    pub last_round: i32,
    /// Last round whose periodic tick was applied.
    #[serde(default)]
    pub previous_round: i32,
    #[serde(default)]
    pub modifiers: Vec<Modifier>,
    /// Periodic damage (positive) or heal (negative), already substituted.
    #[serde(default)]
    pub formula: String,
    #[serde(default)]
    pub element_type: Option<String>,
}

impl CustomEffect {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_source(mut self, source: ItemId) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_statuses<I, S>(mut self, statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.statuses = statuses.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_duration(mut self, duration: i32, unit: EffectUnit) -> Self {
        self.duration = duration;
        self.unit = unit;
        self
    }

    pub fn with_formula(mut self, formula: impl Into<String>) -> Self {
        self.formula = formula.into();
        self
    }

    pub fn with_modifiers(mut self, modifiers: Vec<Modifier>) -> Self {
        self.modifiers = modifiers;
        self
    }

    pub fn with_effect_type(mut self, effect_type: EffectType) -> Self {
        self.effect_type = effect_type;
        self
    }

    /// Stamp the start round and compute the last round.
    pub fn stamp(&mut self, round: i32, rules: &RulesConfig) {
        self.started_at = round;
        self.previous_round = round - 1;
        self.last_round = match self.unit {
            EffectUnit::Round => round + self.duration,
            EffectUnit::Second => round + rules.seconds_to_rounds(self.duration),
        };
    }

    pub fn is_expired(&self, round: i32) -> bool {
        self.last_round <= round
    }

    pub fn is_periodic(&self) -> bool {
        !self.formula.trim().is_empty()
    }

    /// Whether the periodic formula should fire for this clock.
    ///
    /// Only forward movement past the last processed round ticks.
    pub fn should_tick(&self, clock: &ClockSnapshot) -> bool {
        self.is_periodic() && clock.is_forward() && clock.round > self.previous_round
    }
}

impl<H: Host> Engine<H> {
    /// Attach a timed effect to an actor.
    ///
    /// A second effect with the same name is ignored. If any status is
    /// vetoed, statuses turned on by this call are turned back off and the
    /// effect is not attached.
    pub async fn apply_custom_effect(
        &mut self,
        target: ActorId,
        mut effect: CustomEffect,
    ) -> EngineResult<bool> {
        let actor = self.actor(target)?;
        if !self.session.can_write(actor) {
            return Err(EngineError::NotAuthoritative(target));
        }
        if actor.current_effects.iter().any(|e| e.name == effect.name) {
            tracing::debug!(actor = %actor.name, effect = %effect.name, "effect already active");
            return Ok(true);
        }
        let Some(clock) = self.clock else {
            return Ok(self.refuse(Some(target), Refusal::NotInCombat).await);
        };

        effect.stamp(clock.round, &self.rules);

        let mut turned_on: Vec<String> = Vec::new();
        for status_id in &effect.statuses {
            let already = self.actor(target)?.has_status(status_id);
            if !self.activate_status(target, status_id, true).await? {
                tracing::info!(actor = %target, status = %status_id, effect = %effect.name, "effect vetoed");
                for applied in turned_on.iter().rev() {
                    self.activate_status(target, applied.as_str(), false).await?;
                }
                return Ok(false);
            }
            if !already {
                turned_on.push(status_id.clone());
            }
        }

        let name = effect.name.clone();
        let mut effects = self.actor(target)?.current_effects.clone();
        effects.push(effect);
        self.commit(target, Patch::CurrentEffects(effects)).await?;
        self.host
            .publish(EngineEvent::EffectApplied {
                actor: target,
                effect: name,
            })
            .await;
        Ok(true)
    }

    /// Remove an active effect by name, turning its statuses off.
    pub async fn remove_custom_effect(&mut self, target: ActorId, name: &str) -> EngineResult<bool> {
        let actor = self.actor(target)?;
        let Some(effect) = actor.current_effects.iter().find(|e| e.name == name).cloned() else {
            return Ok(false);
        };
        for status_id in &effect.statuses {
            self.activate_status(target, status_id, false).await?;
        }
        let remaining: Vec<CustomEffect> = self
            .actor(target)?
            .current_effects
            .iter()
            .filter(|e| e.name != name)
            .cloned()
            .collect();
        self.commit(target, Patch::CurrentEffects(remaining)).await?;
        self.host
            .publish(EngineEvent::EffectRemoved {
                actor: target,
                effect: effect.name,
            })
            .await;
        Ok(true)
    }

    async fn remove_all_effects(&mut self, target: ActorId) -> EngineResult<()> {
        let names: Vec<String> = self
            .actor(target)?
            .current_effects
            .iter()
            .rev()
            .map(|e| e.name.clone())
            .collect();
        for name in names {
            self.remove_custom_effect(target, &name).await?;
        }
        Ok(())
    }

    fn hook_skips(&self, actor: ActorId, hook: &str) -> EngineResult<bool> {
        let writable = self.can_write(actor)?;
        if self.session.debug.hooks {
            tracing::debug!(actor = %actor, hook, writable, "combat hook");
        }
        Ok(!writable)
    }

    // ------------------------------------------------------------------------
    // Clock callbacks
    // ------------------------------------------------------------------------

    /// The combat clock moved (forward or back).
    pub fn on_round_advance(&mut self, clock: ClockSnapshot) {
        if self.session.debug.hooks {
            tracing::debug!(round = clock.round, direction = clock.direction, "round advance");
        }
        self.clock = Some(clock);
    }

    /// Apply periodic damage and healing at the start of the actor's turn.
    pub async fn on_start_turn(&mut self, actor: ActorId, clock: ClockSnapshot) -> EngineResult<()> {
        self.clock = Some(clock);
        if self.hook_skips(actor, "start_turn")? {
            return Ok(());
        }

        let mut effects = self.actor(actor)?.current_effects.clone();
        let mut amounts = Vec::new();
        for effect in effects.iter_mut() {
            if !effect.should_tick(&clock) {
                continue;
            }
            let formula = effect.formula.as_str();
            let amount = if DiceExpression::parse(formula).is_ok_and(|e| e.has_dice()) {
                self.roll(formula).await.map(|outcome| outcome.total)
            } else {
                crate::dice::evaluate_arithmetic(formula).map_err(EngineError::from)
            };
            match amount {
                Ok(amount) => {
                    effect.previous_round = clock.round;
                    amounts.push(amount);
                }
                // Left unprocessed so the round is not marked as ticked.
                Err(EngineError::Dice(err)) => {
                    tracing::warn!(effect = %effect.name, formula, %err, "periodic formula skipped");
                }
                Err(err) => return Err(err),
            }
        }
        if amounts.is_empty() {
            return Ok(());
        }
        self.commit(actor, Patch::CurrentEffects(effects)).await?;

        for amount in amounts {
            self.apply_heal_and_damage(actor, amount).await?;
        }
        Ok(())
    }

    /// Expire effects whose last round has been reached.
    pub async fn on_end_turn(&mut self, actor: ActorId, clock: ClockSnapshot) -> EngineResult<()> {
        self.clock = Some(clock);
        if self.hook_skips(actor, "end_turn")? {
            return Ok(());
        }
        let expired: Vec<String> = self
            .actor(actor)?
            .current_effects
            .iter()
            .filter(|e| e.is_expired(clock.round))
            .map(|e| e.name.clone())
            .collect();
        for name in expired {
            self.remove_custom_effect(actor, &name).await?;
        }
        Ok(())
    }

    pub async fn on_leave_combat(&mut self, actor: ActorId) -> EngineResult<()> {
        if self.hook_skips(actor, "leave_combat")? {
            return Ok(());
        }
        self.remove_all_effects(actor).await
    }

    /// End the combat: every writable actor loses its remaining effects.
    pub async fn on_combat_end(&mut self) -> EngineResult<()> {
        let ids: Vec<ActorId> = self.actors.keys().copied().collect();
        for id in ids {
            if self.can_write(id)? {
                self.remove_all_effects(id).await?;
            }
        }
        self.clock = None;
        self.pending.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::FORWARD;

    #[test]
    fn test_stamp_round_unit() {
        let mut effect = CustomEffect::new("Brûlure").with_duration(3, EffectUnit::Round);
        effect.stamp(2, &RulesConfig::default());
        assert_eq!(effect.started_at, 2);
        assert_eq!(effect.last_round, 5);
        assert_eq!(effect.previous_round, 1);
        assert!(!effect.is_expired(4));
        assert!(effect.is_expired(5));
    }

    #[test]
    fn test_stamp_second_unit() {
        let mut effect = CustomEffect::new("Lenteur").with_duration(20, EffectUnit::Second);
        effect.stamp(1, &RulesConfig::default());
        assert_eq!(effect.last_round, 4);
    }

    #[test]
    fn test_should_tick() {
        let mut effect = CustomEffect::new("Poison").with_formula("1d4");
        effect.stamp(1, &RulesConfig::default());
        assert!(effect.should_tick(&ClockSnapshot::new(1, 0, FORWARD)));
        effect.previous_round = 2;
        assert!(!effect.should_tick(&ClockSnapshot::new(2, 0, FORWARD)));
        assert!(!effect.should_tick(&ClockSnapshot::new(3, 0, -1)));
        assert!(effect.should_tick(&ClockSnapshot::new(3, 0, FORWARD)));

        let status_only = CustomEffect::new("Étourdi");
        assert!(!status_only.should_tick(&ClockSnapshot::new(5, 0, FORWARD)));
    }
}
