//! Action activation and item state toggles.
//!
//! [`Engine::activate_action`] runs an action from end to end: resource
//! gates, the optional mana-burn prompt, resolvers, then the costs. A gate
//! that refuses, or a declined prompt, leaves the actor untouched.

use crate::action::{Action, RollKind};
use crate::actor::{ActorId, ItemId};
use crate::engine::{Engine, EngineError, EngineResult};
use crate::host::{EngineEvent, GaugeKind, Host, ItemPatch, Patch, Prompt, Refusal};
use crate::item::ItemKind;
use crate::resolver::{ResolveContext, ResolverKind};
use serde::{Deserialize, Serialize};

/// A user asking to activate (or toggle) one action of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationRequest {
    pub actor: ActorId,
    /// Desired state for toggled actions; `true` for instant ones.
    pub state: bool,
    pub source: ItemId,
    pub index: usize,
    pub roll_kind: RollKind,
    /// Shift-activation concentrates an attack spell.
    pub shift_key: bool,
}

impl ActivationRequest {
    pub fn new(actor: ActorId, source: ItemId, index: usize) -> Self {
        Self {
            actor,
            state: true,
            source,
            index,
            roll_kind: RollKind::Attack,
            shift_key: false,
        }
    }

    pub fn with_state(mut self, state: bool) -> Self {
        self.state = state;
        self
    }

    pub fn with_roll_kind(mut self, roll_kind: RollKind) -> Self {
        self.roll_kind = roll_kind;
        self
    }

    pub fn with_shift(mut self) -> Self {
        self.shift_key = true;
        self
    }
}

/// An action the sheet should offer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisibleAction {
    pub item: ItemId,
    pub index: usize,
    pub label: String,
    pub enabled: bool,
}

/// Mana owed for a spell activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ManaCost {
    cost: i32,
    /// Points paid in HP through a recovery-dice roll.
    burned: Option<i32>,
}

impl<H: Host> Engine<H> {
    /// Activate an action. Returns whether it went through.
    pub async fn activate_action(&mut self, request: ActivationRequest) -> EngineResult<bool> {
        let actor_id = request.actor;
        let actor = self.actor(actor_id)?;
        if !self.session.can_write(actor) {
            return Err(EngineError::NotAuthoritative(actor_id));
        }
        let Some(item) = actor.item(request.source) else {
            tracing::debug!(item = %request.source, "activated item missing");
            return Ok(false);
        };
        let Some(action) = item.actions.get(request.index).cloned() else {
            return Err(EngineError::ActionIndexOutOfRange {
                item: item.name.clone(),
                index: request.index,
            });
        };
        if self.session.debug.actions {
            tracing::debug!(actor = %actor.name, item = %item.name, action = %action.label, ?request, "activate action");
        }

        if item.is_reloadable() && item.equipment().is_some_and(|e| e.charges.current <= 0) {
            let refusal = Refusal::NoCharges {
                item: item.name.clone(),
            };
            return Ok(self.refuse(Some(actor_id), refusal).await);
        }
        if let Some(capacity) = item.capacity() {
            if capacity.has_frequency() && capacity.charges.current <= 0 {
                let refusal = Refusal::NoFrequencyCharges {
                    item: item.name.clone(),
                };
                return Ok(self.refuse(Some(actor_id), refusal).await);
            }
        }

        // Mana gate. Nothing has been written yet, so declining is free.
        let mana = match self.spell_mana_cost(&request, &action)? {
            Some(cost) => {
                let available = self.actor(actor_id)?.resources.mana.value;
                let authored = self
                    .actor(actor_id)?
                    .item(request.source)
                    .and_then(|i| i.capacity())
                    .map_or(0, |c| c.mana_cost);
                if authored > 0 && available < cost {
                    let needed = cost - available;
                    let formula = format!("{needed}{}", self.actor(actor_id)?.recovery_dice);
                    let prompt = Prompt::ManaBurn { needed, formula };
                    if !self.host.confirm(actor_id, &prompt).await {
                        tracing::debug!(actor = %actor_id, "mana burn declined");
                        return Ok(false);
                    }
                    Some(ManaCost {
                        cost,
                        burned: Some(needed),
                    })
                } else {
                    Some(ManaCost { cost, burned: None })
                }
            }
            None => None,
        };

        let success = if action.properties.temporary {
            let patch = Patch::item(
                request.source,
                ItemPatch::ActionEnabled {
                    index: request.index,
                    enabled: request.state,
                },
            );
            self.commit(actor_id, patch).await?;
            self.host
                .publish(EngineEvent::ActionToggled {
                    actor: actor_id,
                    item: request.source,
                    index: request.index,
                    enabled: request.state,
                })
                .await;
            true
        } else {
            self.run_resolvers(&request, &action).await?
        };

        if success {
            if let Some(mana) = mana {
                self.pay_mana(actor_id, mana).await?;
            }
            self.spend_capacity_charge(actor_id, request.source, request.index)
                .await?;
        }
        Ok(success)
    }

    /// Mana owed by a spell activation, `None` when nothing is owed.
    fn spell_mana_cost(&self, request: &ActivationRequest, action: &Action) -> EngineResult<Option<i32>> {
        let actor = self.actor(request.actor)?;
        let Some(capacity) = actor.item(request.source).and_then(|i| i.capacity()) else {
            return Ok(None);
        };
        if action.properties.no_mana_cost || !request.state || !capacity.is_spell {
            return Ok(None);
        }
        let concentration = if capacity.action_type_attack && request.shift_key {
            self.rules.concentration_discount
        } else {
            0
        };
        Ok(Some(
            capacity.mana_cost + actor.mana_cost_from_armor(request.source) - concentration,
        ))
    }

    /// Run every resolver in order; all must succeed.
    async fn run_resolvers(&mut self, request: &ActivationRequest, action: &Action) -> EngineResult<bool> {
        let ctx = ResolveContext {
            actor: request.actor,
            item: request.source,
            action_index: request.index,
            roll_kind: request.roll_kind,
        };
        let resolvers = action.resolvers.clone();
        let mut results = Vec::with_capacity(resolvers.len());
        let mut consumed = false;
        for resolver in resolvers {
            let kind = self.registry.lookup(&resolver.kind);
            let ok = self.resolve(&ctx, resolver).await?;
            consumed |= ok && kind == Some(ResolverKind::Consumable);
            results.push(ok);
        }
        let success = results.iter().all(|ok| *ok);

        let is_consumable = self
            .actor(request.actor)?
            .item(request.source)
            .is_some_and(|i| i.is_consumable());
        if success && is_consumable && !consumed {
            self.consume_item(request.actor, request.source).await?;
        }
        Ok(success)
    }

    async fn pay_mana(&mut self, actor_id: ActorId, mana: ManaCost) -> EngineResult<()> {
        if mana.cost <= 0 {
            return Ok(());
        }
        let actor = self.actor(actor_id)?;
        let mut gauge = actor.resources.mana;
        gauge.value = (gauge.value - mana.cost).max(0);
        let hd = actor.recovery_dice;
        self.commit(actor_id, Patch::Gauge { kind: GaugeKind::Mana, gauge })
            .await?;

        if let Some(needed) = mana.burned {
            let roll = self.roll(&format!("{needed}{hd}")).await?;
            self.apply_heal_and_damage(actor_id, roll.total).await?;
            self.host
                .publish(EngineEvent::ManaBurned {
                    actor: actor_id,
                    hp_lost: roll.total,
                })
                .await;
        }
        Ok(())
    }

    /// Spend one charge of a limited-use capacity, disabling the action at 0.
    async fn spend_capacity_charge(&mut self, actor_id: ActorId, item: ItemId, index: usize) -> EngineResult<()> {
        let Some(charges) = self
            .actor(actor_id)?
            .item(item)
            .and_then(|i| i.capacity())
            .filter(|c| c.has_frequency() && c.charges.current > 0)
            .map(|c| c.charges)
        else {
            return Ok(());
        };
        let current = (charges.current - 1).max(0);
        self.commit(actor_id, Patch::item(item, ItemPatch::Charges(current)))
            .await?;
        if current == 0 {
            let patch = ItemPatch::ActionEnabled {
                index,
                enabled: false,
            };
            self.commit(actor_id, Patch::item(item, patch)).await?;
        }
        Ok(())
    }

    /// Spend one round of ammunition from a reloadable weapon.
    pub async fn consume_ammunition(&mut self, actor_id: ActorId, item: ItemId) -> EngineResult<()> {
        let Some(charges) = self
            .actor(actor_id)?
            .item(item)
            .filter(|i| i.is_reloadable())
            .and_then(|i| i.equipment())
            .map(|e| e.charges)
        else {
            return Ok(());
        };
        let current = (charges.current - 1).max(0);
        self.commit(actor_id, Patch::item(item, ItemPatch::Charges(current)))
            .await
    }

    /// Learn or forget a capacity.
    ///
    /// Learning needs the level required by the path's next rank; it then
    /// raises the path rank and sets the capacity's mana cost to that rank.
    pub async fn toggle_capacity_learned(
        &mut self,
        actor_id: ActorId,
        capacity: ItemId,
        state: bool,
    ) -> EngineResult<bool> {
        let actor = self.actor(actor_id)?;
        let Some(item) = actor.item(capacity).filter(|i| i.capacity().is_some()) else {
            tracing::debug!(capacity = %capacity, "capacity missing");
            return Ok(false);
        };
        let name = item.name.clone();
        let Some(path) = actor.path_of_capacity(capacity).map(|p| p.id) else {
            tracing::debug!(capacity = %name, "capacity has no path");
            return Ok(false);
        };
        let current_rank = actor.compute_path_rank(path);
        let level = actor.attributes.level;

        if state {
            let new_rank = current_rank + 1;
            match self.rules.min_level_for_rank(new_rank) {
                Some(required) if level >= required => {}
                Some(required) => {
                    let refusal = Refusal::LevelTooLow { required, level };
                    return Ok(self.refuse(Some(actor_id), refusal).await);
                }
                None => {
                    let refusal = Refusal::NotLearnable { capacity: name };
                    return Ok(self.refuse(Some(actor_id), refusal).await);
                }
            }

            self.commit(actor_id, Patch::item(capacity, ItemPatch::StateAndActions(true)))
                .await?;
            self.commit(actor_id, Patch::item(path, ItemPatch::PathRank(new_rank)))
                .await?;
            self.commit(
                actor_id,
                Patch::item(capacity, ItemPatch::ManaCost(i32::from(new_rank))),
            )
            .await?;
        } else {
            self.commit(actor_id, Patch::item(capacity, ItemPatch::StateAndActions(false)))
                .await?;
            let rank = self.actor(actor_id)?.compute_path_rank(path);
            self.commit(actor_id, Patch::item(path, ItemPatch::PathRank(rank)))
                .await?;
        }
        Ok(true)
    }

    /// Equip or unequip an item; its actions follow.
    pub async fn toggle_equipment_equipped(
        &mut self,
        actor_id: ActorId,
        item: ItemId,
        bypass_checks: bool,
    ) -> EngineResult<bool> {
        let actor = self.actor(actor_id)?;
        let Some(target) = actor.item(item) else {
            return Ok(false);
        };
        let ItemKind::Equipment(data) = &target.kind else {
            return Ok(false);
        };
        let equip = !data.equipped;
        let hands = data.usage.hands();
        if equip && hands > 0 && self.rules.free_hands_check && !bypass_checks && actor.free_hands() < hands {
            let refusal = Refusal::NotEnoughHands {
                item: target.name.clone(),
            };
            return Ok(self.refuse(Some(actor_id), refusal).await);
        }
        self.commit(actor_id, Patch::item(item, ItemPatch::StateAndActions(equip)))
            .await?;
        Ok(true)
    }

    /// Actions of learned capacities and equipped items the sheet shows.
    pub fn visible_actions(&self, actor_id: ActorId) -> EngineResult<Vec<VisibleAction>> {
        let actor = self.actor(actor_id)?;
        Ok(actor
            .items
            .iter()
            .flat_map(|item| {
                item.actions
                    .iter()
                    .enumerate()
                    .filter(|(_, action)| action.is_visible(item, actor))
                    .map(|(index, action)| VisibleAction {
                        item: item.id,
                        index,
                        label: action.label.clone(),
                        enabled: action.properties.enabled,
                    })
            })
            .collect())
    }

    pub fn is_incapacitated(&self, actor_id: ActorId) -> EngineResult<bool> {
        Ok(self.actor(actor_id)?.is_incapacitated())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::{Actor, ActorKind};
    use crate::item::{CapacityData, EquipmentData, Frequency, Item, PathSubtype};
    use crate::session::SessionContext;
    use crate::testing::{fixtures, MockHost};

    fn set_mana_cost(actor: &mut Actor, spell: ItemId, cost: i32) {
        if let Some(data) = actor.item_mut(spell).and_then(|i| i.capacity_mut()) {
            data.mana_cost = cost;
        }
    }

    #[tokio::test]
    async fn test_declined_mana_burn_mutates_nothing() {
        let (mage, spell) = fixtures::mage_with_spell(1);
        let mut engine = Engine::new(MockHost::new().with_confirm(false), SessionContext::gm());
        let id = engine.add_actor(mage.clone());

        let done = engine
            .activate_action(ActivationRequest::new(id, spell, 0))
            .await
            .unwrap();
        assert!(!done);
        assert_eq!(engine.host().prompts().len(), 1);
        assert!(engine.host().patches().is_empty());
        assert!(engine.host().rolled().is_empty());
        assert_eq!(engine.actor(id).unwrap(), &mage);
    }

    #[tokio::test]
    async fn test_mana_burn_pays_the_difference_in_hp() {
        let (mut mage, spell) = fixtures::mage_with_spell(2);
        set_mana_cost(&mut mage, spell, 3);
        // Damage roll of the spell, then the burn roll.
        let host = MockHost::new().with_rolls(&[(3, None), (4, None)]);
        let mut engine = Engine::new(host, SessionContext::gm());
        let id = engine.add_actor(mage);

        let done = engine
            .activate_action(ActivationRequest::new(id, spell, 0))
            .await
            .unwrap();
        assert!(done);
        assert_eq!(
            engine.host().prompts(),
            vec![Prompt::ManaBurn {
                needed: 1,
                formula: "1d6".to_string()
            }]
        );
        assert_eq!(engine.host().rolled(), vec!["1d4+2", "1d6"]);
        let actor = engine.actor(id).unwrap();
        assert_eq!(actor.resources.mana.value, 0);
        assert_eq!(actor.attributes.hp.value, 6);
        assert!(engine
            .host()
            .events()
            .contains(&EngineEvent::ManaBurned { actor: id, hp_lost: 4 }));
    }

    #[tokio::test]
    async fn test_concentration_discount() {
        let (mut mage, spell) = fixtures::mage_with_spell(5);
        set_mana_cost(&mut mage, spell, 3);
        let mut engine = Engine::new(MockHost::new(), SessionContext::gm());
        let id = engine.add_actor(mage);

        let request = ActivationRequest::new(id, spell, 0).with_shift();
        assert!(engine.activate_action(request).await.unwrap());
        assert_eq!(engine.actor(id).unwrap().resources.mana.value, 4);
        assert!(engine.host().prompts().is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_frequency_refuses() {
        let mut hero = fixtures::fighter();
        let capacity = hero.add_item(
            Item::new(
                "Second souffle",
                ItemKind::Capacity(CapacityData {
                    learned: true,
                    frequency: Frequency::Combat,
                    ..Default::default()
                }),
            )
            .with_action(fixtures::activable("Souffler", Vec::new())),
        );
        let mut engine = Engine::new(MockHost::new(), SessionContext::gm());
        let id = engine.add_actor(hero);

        let done = engine
            .activate_action(ActivationRequest::new(id, capacity, 0))
            .await
            .unwrap();
        assert!(!done);
        assert!(matches!(
            engine.host().warnings()[0],
            Refusal::NoFrequencyCharges { .. }
        ));
    }

    #[tokio::test]
    async fn test_last_charge_disables_action() {
        let mut hero = fixtures::fighter();
        let capacity = hero.add_item(
            Item::new(
                "Second souffle",
                ItemKind::Capacity(CapacityData {
                    learned: true,
                    frequency: Frequency::Day,
                    charges: crate::item::Charges::full(1),
                    ..Default::default()
                }),
            )
            .with_action(fixtures::activable("Souffler", Vec::new())),
        );
        let mut engine = Engine::new(MockHost::new(), SessionContext::gm());
        let id = engine.add_actor(hero);
        if let Some(item) = engine.actor_mut(id).unwrap().item_mut(capacity) {
            item.actions[0].properties.enabled = true;
        }

        assert!(engine
            .activate_action(ActivationRequest::new(id, capacity, 0))
            .await
            .unwrap());
        let item = engine.actor(id).unwrap().item(capacity).unwrap();
        assert_eq!(item.capacity().unwrap().charges.current, 0);
        assert!(!item.actions[0].properties.enabled);
    }

    #[tokio::test]
    async fn test_temporary_action_toggles() {
        let mut hero = fixtures::fighter();
        let mut action = fixtures::activable("Rage", Vec::new());
        action.properties.temporary = true;
        let capacity = hero.add_item(
            Item::new("Rage", ItemKind::Capacity(CapacityData::default())).with_action(action),
        );
        let mut engine = Engine::new(MockHost::new(), SessionContext::gm());
        let id = engine.add_actor(hero);

        let request = ActivationRequest::new(id, capacity, 0);
        assert!(engine.activate_action(request).await.unwrap());
        assert!(engine.actor(id).unwrap().item(capacity).unwrap().actions[0].properties.enabled);

        assert!(engine.activate_action(request.with_state(false)).await.unwrap());
        assert!(!engine.actor(id).unwrap().item(capacity).unwrap().actions[0].properties.enabled);
    }

    #[tokio::test]
    async fn test_action_index_out_of_range() {
        let mut hero = fixtures::fighter();
        let sword = hero.add_item(fixtures::sword());
        let mut engine = Engine::new(MockHost::new(), SessionContext::gm());
        let id = engine.add_actor(hero);

        let err = engine
            .activate_action(ActivationRequest::new(id, sword, 3))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ActionIndexOutOfRange { index: 3, .. }));
    }

    #[tokio::test]
    async fn test_potion_heals_and_is_destroyed() {
        let mut hero = fixtures::fighter().with_hp(5, 12);
        let potion = hero.add_item(fixtures::potion(1));
        let mut engine = Engine::new(MockHost::new().with_rolls(&[(5, None)]), SessionContext::gm());
        let id = engine.add_actor(hero);

        assert!(engine
            .activate_action(ActivationRequest::new(id, potion, 0))
            .await
            .unwrap());
        let actor = engine.actor(id).unwrap();
        assert_eq!(actor.attributes.hp.value, 10);
        assert!(actor.item(potion).is_none());
        assert_eq!(engine.host().deleted(), vec![(id, potion)]);
    }

    #[tokio::test]
    async fn test_learning_needs_level_for_next_rank() {
        let mut hero = Actor::new("Aldric", ActorKind::Character).with_level(2);
        let (path, capacities) =
            fixtures::add_path(&mut hero, "Voie du bouclier", PathSubtype::Profile, 3, 2);
        let mut engine = Engine::new(MockHost::new(), SessionContext::gm());
        let id = engine.add_actor(hero);

        assert!(!engine
            .toggle_capacity_learned(id, capacities[2], true)
            .await
            .unwrap());
        assert_eq!(
            engine.host().warnings(),
            vec![Refusal::LevelTooLow {
                required: 3,
                level: 2
            }]
        );
        let actor = engine.actor(id).unwrap();
        assert_eq!(actor.item(path).unwrap().path().unwrap().rank, 2);
        assert!(!actor.item(capacities[2]).unwrap().capacity().unwrap().learned);
    }

    #[tokio::test]
    async fn test_learning_and_forgetting_update_path_rank() {
        let mut hero = Actor::new("Aldric", ActorKind::Character).with_level(3);
        let (path, capacities) =
            fixtures::add_path(&mut hero, "Voie du bouclier", PathSubtype::Profile, 3, 2);
        let mut engine = Engine::new(MockHost::new(), SessionContext::gm());
        let id = engine.add_actor(hero);

        assert!(engine
            .toggle_capacity_learned(id, capacities[2], true)
            .await
            .unwrap());
        let actor = engine.actor(id).unwrap();
        assert_eq!(actor.item(path).unwrap().path().unwrap().rank, 3);
        let learned = actor.item(capacities[2]).unwrap().capacity().unwrap();
        assert!(learned.learned);
        assert_eq!(learned.mana_cost, 3);

        assert!(engine
            .toggle_capacity_learned(id, capacities[1], false)
            .await
            .unwrap());
        let actor = engine.actor(id).unwrap();
        assert_eq!(actor.item(path).unwrap().path().unwrap().rank, 1);
    }

    #[tokio::test]
    async fn test_equip_needs_free_hands() {
        let mut hero = fixtures::fighter();
        let mut two_handed = EquipmentData::weapon("2d6");
        two_handed.usage.two_hand = true;
        let great_sword = hero.add_item(Item::new("Épée à deux mains", ItemKind::Equipment(two_handed)));
        hero.add_item(fixtures::sword());
        let mut engine = Engine::new(MockHost::new(), SessionContext::gm());
        let id = engine.add_actor(hero);

        assert!(!engine
            .toggle_equipment_equipped(id, great_sword, false)
            .await
            .unwrap());
        assert!(matches!(
            engine.host().warnings()[0],
            Refusal::NotEnoughHands { .. }
        ));
        assert!(engine
            .toggle_equipment_equipped(id, great_sword, true)
            .await
            .unwrap());
        let actor = engine.actor(id).unwrap();
        assert!(actor.item(great_sword).unwrap().equipment().unwrap().equipped);
    }

    #[tokio::test]
    async fn test_visible_actions_follow_equipment() {
        let mut hero = fixtures::fighter();
        let sword = hero.add_item(fixtures::sword());
        let mut engine = Engine::new(MockHost::new(), SessionContext::gm());
        let id = engine.add_actor(hero);

        let visible = engine.visible_actions(id).unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].item, sword);

        engine.toggle_equipment_equipped(id, sword, false).await.unwrap();
        assert!(engine.visible_actions(id).unwrap().is_empty());
        assert!(!engine.is_incapacitated(id).unwrap());
    }
}
