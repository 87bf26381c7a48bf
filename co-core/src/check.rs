//! Attack and damage checks.
//!
//! A check rolls a d20 (two with bonus or malus dice) plus the substituted
//! skill formula against a difficulty. The difficulty can be a number, a
//! value read from the target (`@cible.def`) or an opposed roll
//! (`@oppose.for`). Opposed checks are parked as a [`PendingCheck`] until
//! the target's roll is made with [`Engine::resolve_opposed_check`].
//!
//! Whatever the path, [`Engine::apply_check_consequences`] is the only place
//! where damage and additional effects follow from a verdict.

use crate::action::RollKind;
use crate::actor::{ActorId, ItemId};
use crate::dice::{self, RollOutcome};
use crate::engine::{Engine, EngineError, EngineResult};
use crate::formula;
use crate::host::{EngineEvent, Host, Refusal};
use crate::modifier::ModifierTarget;
use crate::resolver::{Resolver, ResolverTarget};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of a parked opposed check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckId(pub Uuid);

impl CheckId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CheckId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CheckId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A check about to be rolled, formulas already substituted.
#[derive(Debug, Clone)]
pub struct CheckRequest {
    pub actor: ActorId,
    pub item: ItemId,
    pub action_index: usize,
    pub roll_kind: RollKind,
    /// Damage-only roll with no attack check.
    pub auto: bool,
    pub skill_formula: String,
    /// Skill formula as authored, used to infer the attack type.
    pub skill_tooltip: String,
    pub damage_formula: String,
    pub resolver: Resolver,
}

/// An opposed check waiting for the target's roll.
#[derive(Debug, Clone)]
pub struct PendingCheck {
    pub id: CheckId,
    pub request: CheckRequest,
    pub target: ActorId,
    pub attack: RollOutcome,
    pub critical: bool,
    pub fumble: bool,
}

#[derive(Debug, Clone, PartialEq)]
enum Difficulty {
    Unknown,
    Fixed(i32),
    Opposed(ActorId),
}

/// Which d20 formula a net bonus/malus count rolls.
pub fn d20_formula(bonus: i32, malus: i32) -> &'static str {
    match (bonus - malus).signum() {
        1 => "2d20kh",
        -1 => "2d20kl",
        _ => "1d20",
    }
}

/// `(success, critical)` for a rolled check.
///
/// A natural 1 always fails; a natural at or above the threshold is a
/// critical success. Without a difficulty the check succeeds.
pub fn verdict(natural: Option<u32>, total: i32, difficulty: Option<i32>, crit: i32) -> (bool, bool) {
    match natural {
        Some(1) => return (false, false),
        Some(n) if i64::from(n) >= i64::from(crit) => return (true, true),
        _ => {}
    }
    match difficulty {
        Some(difficulty) => (total >= difficulty, false),
        None => (true, false),
    }
}

impl<H: Host> Engine<H> {
    /// Roll a check. Returns `false` only when the check could not be made.
    pub(crate) async fn roll_check(&mut self, request: CheckRequest) -> EngineResult<bool> {
        let actor = self.actor(request.actor)?;
        let Some(item) = actor.item(request.item) else {
            tracing::debug!(item = %request.item, "check item missing");
            return Ok(false);
        };
        let item_name = item.name.clone();
        let reloadable = item.is_reloadable();
        if reloadable && item.equipment().is_some_and(|e| e.charges.current <= 0) {
            return Ok(self
                .refuse(Some(request.actor), Refusal::NoAmmunition { item: item_name })
                .await);
        }

        if request.auto || request.roll_kind == RollKind::Damage {
            if reloadable {
                self.consume_ammunition(request.actor, request.item).await?;
            }
            self.apply_check_consequences(&request, true).await?;
            return Ok(true);
        }

        let difficulty = self.check_difficulty(&request).await?;

        let actor = self.actor(request.actor)?;
        let attack_type = formula::attack_type_from_formula(&request.skill_tooltip);
        let mut bonus = i32::from(request.resolver.bonus_dice_add);
        let mut malus = i32::from(request.resolver.malus_dice_add);
        if let Some(attack_type) = attack_type {
            bonus += i32::from(actor.has_bonus_dice_for(attack_type));
            malus += i32::from(actor.has_malus_dice_for(attack_type));
        }
        if actor.item(request.item).is_some_and(|i| i.is_weapon())
            && !actor.is_trained_with_weapon(request.item)
        {
            malus += 1;
        }
        let crit = request
            .resolver
            .skill
            .crit
            .unwrap_or_else(|| actor.combat_value(ModifierTarget::Crit));

        let d20 = d20_formula(bonus, malus);
        let formula = if request.skill_formula.trim().is_empty() {
            d20.to_string()
        } else {
            format!("{d20} + {}", request.skill_formula)
        };
        let roll = self.roll(&formula).await?;
        if reloadable {
            self.consume_ammunition(request.actor, request.item).await?;
        }

        if let Difficulty::Opposed(target) = difficulty {
            let (_, critical) = verdict(roll.natural, roll.total, None, crit);
            let id = CheckId::new();
            tracing::debug!(check = %id, target = %target, "opposed check pending");
            self.host
                .publish(EngineEvent::CheckRolled {
                    actor: request.actor,
                    item: request.item,
                    label: item_name,
                    roll: roll.clone(),
                    difficulty: None,
                    success: None,
                    critical,
                })
                .await;
            self.pending.insert(
                id,
                PendingCheck {
                    id,
                    fumble: roll.natural == Some(1),
                    request,
                    target,
                    attack: roll,
                    critical,
                },
            );
            return Ok(true);
        }

        let difficulty = match difficulty {
            Difficulty::Fixed(value) => Some(value),
            _ => None,
        };
        let (success, critical) = verdict(roll.natural, roll.total, difficulty, crit);
        self.host
            .publish(EngineEvent::CheckRolled {
                actor: request.actor,
                item: request.item,
                label: item_name,
                roll,
                difficulty,
                success: Some(success),
                critical,
            })
            .await;
        self.apply_check_consequences(&request, success).await?;
        Ok(true)
    }

    async fn check_difficulty(&self, request: &CheckRequest) -> EngineResult<Difficulty> {
        let authored = request.resolver.skill.difficulty.trim();
        if authored.is_empty() {
            return Ok(Difficulty::Unknown);
        }
        let actor = self.actor(request.actor)?;

        if authored.contains("@cible") || formula::is_opposed(authored) {
            let targets = self
                .host
                .acquire_targets(actor, &ResolverTarget::single())
                .await;
            let Some(&target) = targets.first() else {
                return Ok(Difficulty::Unknown);
            };
            if formula::is_opposed(authored) {
                return Ok(Difficulty::Opposed(target));
            }
            let Some(target_actor) = self.actors.get(&target) else {
                tracing::debug!(target = %target, "difficulty target not loaded");
                return Ok(Difficulty::Unknown);
            };
            let local = authored.replace("@cible.", "@");
            let substituted = formula::replace_roll_data(&local, &target_actor.roll_data());
            return Ok(match dice::evaluate_arithmetic(&substituted) {
                Ok(value) => Difficulty::Fixed(value),
                Err(err) => {
                    tracing::debug!(difficulty = authored, %err, "target difficulty unresolved");
                    Difficulty::Unknown
                }
            });
        }

        let custom = formula::evaluate_custom_values_with(
            actor,
            authored,
            Some(request.item),
            &self.rules.evolving_dice,
        );
        let substituted = formula::replace_roll_data(&custom, &actor.roll_data());
        Ok(match dice::evaluate_arithmetic(&substituted) {
            Ok(value) => Difficulty::Fixed(value),
            Err(err) => {
                tracing::debug!(difficulty = authored, %err, "difficulty unresolved");
                Difficulty::Unknown
            }
        })
    }

    /// Settle an opposed check with the target's roll.
    ///
    /// The pending check is consumed, so its consequences apply once.
    pub async fn resolve_opposed_check(&mut self, id: CheckId) -> EngineResult<bool> {
        let pending = self
            .pending
            .remove(&id)
            .ok_or(EngineError::UnknownPendingCheck(id))?;
        let target = self.actor(pending.target)?;
        let opposing = match formula::evaluate_opposite_formula(
            &pending.request.resolver.skill.difficulty,
            target,
        ) {
            Some(value) => format!("1d20 + {value}"),
            None => "1d20".to_string(),
        };
        let defense = self.roll(&opposing).await?;

        let success = !pending.fumble && (pending.critical || pending.attack.total >= defense.total);
        tracing::debug!(
            check = %id,
            attack = pending.attack.total,
            defense = defense.total,
            success,
            "opposed check settled"
        );
        self.apply_check_consequences(&pending.request, success).await?;
        Ok(success)
    }

    /// Roll damage and apply the additional effect for a verdict.
    pub async fn apply_check_consequences(
        &mut self,
        request: &CheckRequest,
        success: bool,
    ) -> EngineResult<()> {
        if success && !request.damage_formula.trim().is_empty() {
            let roll = self.roll(&request.damage_formula).await?;
            self.host
                .publish(EngineEvent::DamageRolled {
                    actor: request.actor,
                    item: request.item,
                    roll,
                })
                .await;
        }

        // Damage-only rolls of an attack resolver never re-apply its effect.
        let effect_allowed = request.auto || request.roll_kind == RollKind::Attack;
        if effect_allowed && request.resolver.additional_effect.triggers_on(success) {
            self.manage_additional_effect(
                request.actor,
                request.item,
                request.action_index,
                &request.resolver,
            )
            .await?;
        }
        Ok(())
    }
}
