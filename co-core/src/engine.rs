//! The resolution engine.
//!
//! An [`Engine`] owns the actors it is currently working on, the host it
//! reports to and the session it acts for. Every mutation goes through
//! [`Engine::commit`], which checks authority, applies the patch to the
//! local copy and persists it through the host before returning.
//!
//! The engine is driven by one task at a time: every mutating method takes
//! `&mut self` and awaits each host call before issuing the next.

use crate::actor::{Actor, ActorId, ActorKind, Gauge};
use crate::check::{CheckId, PendingCheck};
use crate::config::RulesConfig;
use crate::dice::{DiceError, RollOutcome};
use crate::host::{
    EngineEvent, GaugeKind, Host, HostError, Patch, PrivilegedRequest, Refusal,
};
use crate::modifier::ModifierTarget;
use crate::resolver::ResolverRegistry;
use crate::session::{ClockSnapshot, SessionContext};
use futures::future::join_all;
use std::collections::HashMap;
use thiserror::Error;

/// Errors that abort an engine operation.
///
/// User-facing refusals are not errors; they are reported through
/// [`crate::host::Messenger::warn`] and the operation returns `Ok(false)`.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Actor not found: {0}")]
    ActorNotFound(ActorId),

    #[error("Action {index} out of range on item {item}")]
    ActionIndexOutOfRange { item: String, index: usize },

    #[error("Client is not authoritative for actor {0}")]
    NotAuthoritative(ActorId),

    #[error("Unknown pending check: {0}")]
    UnknownPendingCheck(CheckId),

    #[error("Dice error: {0}")]
    Dice(#[from] DiceError),

    #[error("Host error: {0}")]
    Host(#[from] HostError),
}

impl EngineError {
    /// Errors a UI may show as a toast rather than log as a fault.
    pub fn is_refusal_like(&self) -> bool {
        matches!(self, EngineError::NotAuthoritative(_))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Status ids handled specially by [`Engine::activate_status`].
pub mod status {
    pub const PARTIAL_DEF: &str = "partialDef";
    pub const FULL_DEF: &str = "fullDef";
    pub const STUN: &str = "stun";
    pub const IMMOBILIZED: &str = "immobilized";
    pub const PARALYSIS: &str = "paralysis";
    pub const POISON: &str = "poison";
    pub const DEAD: &str = "dead";
    pub const UNCONSCIOUS: &str = "unconscious";
}

pub struct Engine<H: Host> {
    pub(crate) host: H,
    pub(crate) session: SessionContext,
    pub(crate) rules: RulesConfig,
    pub(crate) registry: ResolverRegistry,
    pub(crate) actors: HashMap<ActorId, Actor>,
    pub(crate) clock: Option<ClockSnapshot>,
    pub(crate) pending: HashMap<CheckId, PendingCheck>,
}

impl<H: Host> Engine<H> {
    pub fn new(host: H, session: SessionContext) -> Self {
        Self {
            host,
            session,
            rules: RulesConfig::default(),
            registry: ResolverRegistry::default(),
            actors: HashMap::new(),
            clock: None,
            pending: HashMap::new(),
        }
    }

    pub fn with_rules(mut self, rules: RulesConfig) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_registry(mut self, registry: ResolverRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn rules(&self) -> &RulesConfig {
        &self.rules
    }

    pub fn registry_mut(&mut self) -> &mut ResolverRegistry {
        &mut self.registry
    }

    pub fn clock(&self) -> Option<ClockSnapshot> {
        self.clock
    }

    pub fn in_combat(&self) -> bool {
        self.clock.is_some()
    }

    pub fn pending_checks(&self) -> impl Iterator<Item = &PendingCheck> {
        self.pending.values()
    }

    // ------------------------------------------------------------------------
    // Actor table
    // ------------------------------------------------------------------------

    /// Load an actor into the engine, replacing any previous copy.
    pub fn add_actor(&mut self, actor: Actor) -> ActorId {
        let id = actor.id;
        self.actors.insert(id, actor);
        id
    }

    pub fn actor(&self, id: ActorId) -> EngineResult<&Actor> {
        self.actors.get(&id).ok_or(EngineError::ActorNotFound(id))
    }

    pub fn actors(&self) -> impl Iterator<Item = &Actor> {
        self.actors.values()
    }

    pub(crate) fn actor_mut(&mut self, id: ActorId) -> EngineResult<&mut Actor> {
        self.actors.get_mut(&id).ok_or(EngineError::ActorNotFound(id))
    }

    pub fn can_write(&self, id: ActorId) -> EngineResult<bool> {
        Ok(self.session.can_write(self.actor(id)?))
    }

    // ------------------------------------------------------------------------
    // Mutation plumbing
    // ------------------------------------------------------------------------

    /// Apply a patch locally and persist it.
    ///
    /// Patches aimed at items that no longer exist are skipped.
    pub(crate) async fn commit(&mut self, id: ActorId, patch: Patch) -> EngineResult<()> {
        let session = self.session;
        let actor = self.actor_mut(id)?;
        if !session.can_write(actor) {
            return Err(EngineError::NotAuthoritative(id));
        }
        if !actor.apply_patch(&patch) {
            tracing::debug!(actor = %id, ?patch, "patch target missing, skipped");
            return Ok(());
        }
        self.host.update(id, &patch).await?;
        Ok(())
    }

    /// Warn the user and report the refusal as `false`.
    pub(crate) async fn refuse(&self, actor: Option<ActorId>, refusal: Refusal) -> bool {
        tracing::info!(actor = ?actor, %refusal, "refused");
        self.host.warn(actor, &refusal).await;
        false
    }

    pub(crate) async fn roll(&self, formula: &str) -> EngineResult<RollOutcome> {
        let outcome = self.host.roll(formula).await?;
        if self.session.debug.rolls {
            tracing::debug!(formula, total = outcome.total, breakdown = %outcome.breakdown, "rolled");
        }
        Ok(outcome)
    }

    /// Send privileged requests to the authoritative client concurrently.
    pub(crate) async fn request_all(&self, requests: Vec<PrivilegedRequest>) -> EngineResult<()> {
        if requests.is_empty() {
            return Ok(());
        }
        tracing::debug!(count = requests.len(), "forwarding privileged requests");
        let results = join_all(
            requests
                .into_iter()
                .map(|request| self.host.request_privileged_mutation(request)),
        )
        .await;
        for result in results {
            result?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Statuses
    // ------------------------------------------------------------------------

    /// Turn a status on or off, honouring immunities.
    ///
    /// Returns `false` when the change is vetoed.
    pub async fn activate_status(
        &mut self,
        id: ActorId,
        status_id: &str,
        active: bool,
    ) -> EngineResult<bool> {
        let actor = self.actor(id)?;
        if !self.session.can_write(actor) {
            return Err(EngineError::NotAuthoritative(id));
        }

        if active {
            let exclusive = match status_id {
                status::PARTIAL_DEF => Some(status::FULL_DEF),
                status::FULL_DEF => Some(status::PARTIAL_DEF),
                _ => None,
            };
            if exclusive.is_some_and(|other| actor.has_status(other)) {
                return Ok(self.refuse(Some(id), Refusal::IncompatibleDefense).await);
            }

            let immunity = match status_id {
                status::STUN | status::IMMOBILIZED | status::PARALYSIS => {
                    Some(ModifierTarget::MovementImpairment)
                }
                status::POISON => Some(ModifierTarget::PoisonImmunity),
                _ => None,
            };
            if let Some(target) = immunity {
                if actor.has_modifier_target(target) {
                    tracing::info!(actor = %actor.name, status = status_id, %target, "immune");
                    return Ok(false);
                }
            }
        }

        if actor.has_status(status_id) == active {
            return Ok(true);
        }

        if !self.host.set_status(id, status_id, active).await? {
            tracing::debug!(actor = %id, status = status_id, "host vetoed status");
            return Ok(false);
        }
        let actor = self.actor_mut(id)?;
        if active {
            actor.statuses.insert(status_id.to_string());
        } else {
            actor.statuses.remove(status_id);
        }
        Ok(true)
    }

    // ------------------------------------------------------------------------
    // Hit points
    // ------------------------------------------------------------------------

    /// Positive amounts are damage, negative amounts healing.
    ///
    /// HP stays within `[0, max]`. Dropping to 0 kills an encounter and
    /// knocks a character unconscious.
    pub async fn apply_heal_and_damage(&mut self, id: ActorId, amount: i32) -> EngineResult<Gauge> {
        let actor = self.actor(id)?;
        if !self.session.can_write(actor) {
            return Err(EngineError::NotAuthoritative(id));
        }
        let kind = actor.kind;
        let mut hp = actor.attributes.hp;
        hp.value = hp.value.saturating_sub(amount);
        let hp = hp.clamped();

        self.commit(id, Patch::Gauge { kind: GaugeKind::Hp, gauge: hp }).await?;

        if hp.value == 0 && amount > 0 {
            let terminal = match kind {
                ActorKind::Encounter => status::DEAD,
                ActorKind::Character => status::UNCONSCIOUS,
            };
            self.activate_status(id, terminal, true).await?;
        }

        self.host
            .publish(EngineEvent::HpChanged { actor: id, amount, hp })
            .await;
        Ok(hp)
    }

    /// Apply HP changes to targets, asking the GM for those we cannot write.
    pub(crate) async fn deliver_heal_and_damage(
        &mut self,
        targets: &[ActorId],
        from: &str,
        amount: i32,
    ) -> EngineResult<()> {
        let mut requests = Vec::new();
        for &target in targets {
            if !self.actors.contains_key(&target) || !self.can_write(target)? {
                let request = if amount >= 0 {
                    PrivilegedRequest::ApplyDamage {
                        target,
                        from: from.to_string(),
                        amount,
                    }
                } else {
                    PrivilegedRequest::ApplyHealing {
                        target,
                        from: from.to_string(),
                        amount: -amount,
                    }
                };
                requests.push(request);
            } else {
                self.apply_heal_and_damage(target, amount).await?;
            }
        }
        self.request_all(requests).await
    }

    // ------------------------------------------------------------------------
    // Authority
    // ------------------------------------------------------------------------

    /// Perform a mutation requested by a non-authoritative client.
    pub async fn handle_privileged_request(
        &mut self,
        request: PrivilegedRequest,
    ) -> EngineResult<bool> {
        let target = request.target();
        if !self.session.is_authoritative() {
            return Err(EngineError::NotAuthoritative(target));
        }
        if self.session.debug.hooks {
            tracing::debug!(?request, "handling privileged request");
        }
        match request {
            PrivilegedRequest::ApplyEffect { effect, .. } => {
                self.apply_custom_effect(target, effect).await
            }
            PrivilegedRequest::ApplyHealing { amount, .. } => {
                self.apply_heal_and_damage(target, -amount).await?;
                Ok(true)
            }
            PrivilegedRequest::ApplyDamage { amount, .. } => {
                self.apply_heal_and_damage(target, amount).await?;
                Ok(true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::UserId;
    use crate::testing::{fixtures, MockHost};

    #[tokio::test]
    async fn test_damage_clamps_and_kills_encounter() {
        let mut engine = Engine::new(MockHost::new(), SessionContext::gm());
        let goblin = engine.add_actor(fixtures::goblin());

        let hp = engine.apply_heal_and_damage(goblin, 50).await.unwrap();
        assert_eq!(hp.value, 0);
        assert!(engine.actor(goblin).unwrap().has_status(status::DEAD));
    }

    #[tokio::test]
    async fn test_heal_clamps_to_max() {
        let mut engine = Engine::new(MockHost::new(), SessionContext::gm());
        let hero = engine.add_actor(fixtures::fighter().with_hp(5, 12));

        let hp = engine.apply_heal_and_damage(hero, -20).await.unwrap();
        assert_eq!(hp, Gauge { value: 12, max: 12 });
        assert!(!engine.actor(hero).unwrap().has_status(status::UNCONSCIOUS));
    }

    #[tokio::test]
    async fn test_character_falls_unconscious() {
        let mut engine = Engine::new(MockHost::new(), SessionContext::gm());
        let hero = engine.add_actor(fixtures::fighter().with_hp(3, 12));

        engine.apply_heal_and_damage(hero, 3).await.unwrap();
        let actor = engine.actor(hero).unwrap();
        assert!(actor.has_status(status::UNCONSCIOUS));
        assert!(actor.is_incapacitated());
    }

    #[tokio::test]
    async fn test_defense_statuses_exclusive() {
        let mut engine = Engine::new(MockHost::new(), SessionContext::gm());
        let hero = engine.add_actor(fixtures::fighter());

        assert!(engine.activate_status(hero, status::PARTIAL_DEF, true).await.unwrap());
        assert!(!engine.activate_status(hero, status::FULL_DEF, true).await.unwrap());
        assert_eq!(engine.host().warnings().len(), 1);
    }

    #[tokio::test]
    async fn test_movement_immunity_vetoes_stun() {
        let mut engine = Engine::new(MockHost::new(), SessionContext::gm());
        let hero = engine.add_actor(fixtures::with_immunity(
            fixtures::fighter(),
            ModifierTarget::MovementImpairment,
        ));

        assert!(!engine.activate_status(hero, status::STUN, true).await.unwrap());
        assert!(engine.activate_status(hero, status::POISON, true).await.unwrap());
        assert!(!engine.actor(hero).unwrap().has_status(status::STUN));
    }

    #[tokio::test]
    async fn test_player_cannot_write_other_actor() {
        let user = UserId::new();
        let mut engine = Engine::new(MockHost::new(), SessionContext::player(user));
        let goblin = engine.add_actor(fixtures::goblin());

        let err = engine.apply_heal_and_damage(goblin, 2).await.unwrap_err();
        assert!(matches!(err, EngineError::NotAuthoritative(id) if id == goblin));
        assert!(err.is_refusal_like());
        assert!(engine.host().patches().is_empty());
    }

    #[tokio::test]
    async fn test_privileged_request_requires_gm() {
        let user = UserId::new();
        let mut player = Engine::new(MockHost::new(), SessionContext::player(user));
        let goblin = player.add_actor(fixtures::goblin());
        let request = PrivilegedRequest::ApplyDamage {
            target: goblin,
            from: "Épée".to_string(),
            amount: 3,
        };
        assert!(player.handle_privileged_request(request.clone()).await.is_err());

        let mut gm = Engine::new(MockHost::new(), SessionContext::gm());
        gm.add_actor(player.actor(goblin).unwrap().clone());
        assert!(gm.handle_privileged_request(request).await.unwrap());
        let hp = gm.actor(goblin).unwrap().attributes.hp;
        assert_eq!(hp.value, hp.max - 3);
    }
}
