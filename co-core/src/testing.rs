//! Testing utilities for the engine.
//!
//! This module provides tools for unit and integration tests:
//! - `MockHost` recording every host call, with scripted dice and answers
//! - `fixtures` building the actors and items scenarios start from

use crate::actor::{Actor, ActorId, ItemId};
use crate::dice::{DiceError, DiceExpression, DiceRoller, RollOutcome};
use crate::host::{
    EngineEvent, HostError, Interaction, Messenger, Persistence, Patch, PrivilegedRequest, Prompt,
    Refusal, StatusToggle,
};
use crate::item::Item;
use crate::resolver::ResolverTarget;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug)]
struct MockState {
    patches: Vec<(ActorId, Patch)>,
    created: Vec<(ActorId, Item)>,
    deleted: Vec<(ActorId, ItemId)>,
    events: Vec<EngineEvent>,
    warnings: Vec<(Option<ActorId>, Refusal)>,
    requests: Vec<PrivilegedRequest>,
    prompts: Vec<Prompt>,
    rolled: Vec<String>,
    rolls: VecDeque<(i32, Option<u32>)>,
    vetoed: Vec<String>,
    targets: Vec<ActorId>,
    confirm: bool,
    rng: StdRng,
}

/// A host that records what the engine asked of it.
///
/// Dice come from the scripted queue first, then from a seeded RNG.
/// Prompts are answered with the configured answer (yes by default).
#[derive(Debug)]
pub struct MockHost {
    state: Mutex<MockState>,
}

impl Default for MockHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHost {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                patches: Vec::new(),
                created: Vec::new(),
                deleted: Vec::new(),
                events: Vec::new(),
                warnings: Vec::new(),
                requests: Vec::new(),
                prompts: Vec::new(),
                rolled: Vec::new(),
                rolls: VecDeque::new(),
                vetoed: Vec::new(),
                targets: Vec::new(),
                confirm: true,
                rng: StdRng::seed_from_u64(7),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue a roll result. `natural` is the kept d20 face for checks.
    pub fn push_roll(&self, total: i32, natural: Option<u32>) {
        self.state().rolls.push_back((total, natural));
    }

    pub fn with_rolls(self, rolls: &[(i32, Option<u32>)]) -> Self {
        self.state().rolls.extend(rolls.iter().copied());
        self
    }

    pub fn with_confirm(self, answer: bool) -> Self {
        self.state().confirm = answer;
        self
    }

    /// Actors returned by every target acquisition.
    pub fn with_targets(self, targets: Vec<ActorId>) -> Self {
        self.state().targets = targets;
        self
    }

    pub fn set_targets(&self, targets: Vec<ActorId>) {
        self.state().targets = targets;
    }

    /// Make the status primitive refuse a status.
    pub fn veto_status(self, status: impl Into<String>) -> Self {
        self.state().vetoed.push(status.into());
        self
    }

    pub fn patches(&self) -> Vec<(ActorId, Patch)> {
        self.state().patches.clone()
    }

    pub fn created(&self) -> Vec<(ActorId, Item)> {
        self.state().created.clone()
    }

    pub fn deleted(&self) -> Vec<(ActorId, ItemId)> {
        self.state().deleted.clone()
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.state().events.clone()
    }

    pub fn warnings(&self) -> Vec<Refusal> {
        self.state().warnings.iter().map(|(_, r)| r.clone()).collect()
    }

    pub fn requests(&self) -> Vec<PrivilegedRequest> {
        self.state().requests.clone()
    }

    pub fn prompts(&self) -> Vec<Prompt> {
        self.state().prompts.clone()
    }

    /// Formulas handed to the dice primitive, in order.
    pub fn rolled(&self) -> Vec<String> {
        self.state().rolled.clone()
    }
}

#[async_trait]
impl Persistence for MockHost {
    async fn update(&self, actor: ActorId, patch: &Patch) -> Result<(), HostError> {
        self.state().patches.push((actor, patch.clone()));
        Ok(())
    }

    async fn create_embedded(&self, actor: ActorId, item: &Item) -> Result<ItemId, HostError> {
        self.state().created.push((actor, item.clone()));
        Ok(item.id)
    }

    async fn delete_embedded(&self, actor: ActorId, items: &[ItemId]) -> Result<(), HostError> {
        self.state()
            .deleted
            .extend(items.iter().map(|item| (actor, *item)));
        Ok(())
    }
}

#[async_trait]
impl DiceRoller for MockHost {
    async fn roll(&self, formula: &str) -> Result<RollOutcome, DiceError> {
        let expr = DiceExpression::parse(formula)?;
        let mut state = self.state();
        state.rolled.push(formula.to_string());
        if let Some((total, natural)) = state.rolls.pop_front() {
            return Ok(RollOutcome {
                formula: formula.to_string(),
                total,
                natural,
                breakdown: "scripted".to_string(),
            });
        }
        let result = expr.roll_with_rng(&mut state.rng)?;
        Ok(result.into())
    }
}

#[async_trait]
impl StatusToggle for MockHost {
    async fn set_status(&self, _actor: ActorId, status: &str, active: bool) -> Result<bool, HostError> {
        Ok(!active || !self.state().vetoed.iter().any(|s| s == status))
    }
}

#[async_trait]
impl Messenger for MockHost {
    async fn publish(&self, event: EngineEvent) {
        self.state().events.push(event);
    }

    async fn warn(&self, actor: Option<ActorId>, refusal: &Refusal) {
        self.state().warnings.push((actor, refusal.clone()));
    }

    async fn request_privileged_mutation(&self, request: PrivilegedRequest) -> Result<(), HostError> {
        self.state().requests.push(request);
        Ok(())
    }
}

#[async_trait]
impl Interaction for MockHost {
    async fn confirm(&self, _actor: ActorId, prompt: &Prompt) -> bool {
        let mut state = self.state();
        state.prompts.push(prompt.clone());
        state.confirm
    }

    async fn acquire_targets(&self, _actor: &Actor, target: &ResolverTarget) -> Vec<ActorId> {
        let targets = self.state().targets.clone();
        match target.allowed() {
            0 => targets,
            allowed => targets.into_iter().take(allowed as usize).collect(),
        }
    }
}

/// Ready-made actors and items.
pub mod fixtures {
    use crate::action::{Action, ActionProperties};
    use crate::actor::{Ability, Actor, ActorKind, ItemId};
    use crate::item::{
        CapacityData, EquipmentData, EquipmentSubtype, FeatureData, Item, ItemKind, PathData,
        PathSubtype, ProfileData,
    };
    use crate::modifier::{Modifier, ModifierSubtype, ModifierTarget, ModifierType};
    use crate::resolver::Resolver;

    pub fn fighter() -> Actor {
        Actor::new("Aldric", ActorKind::Character)
            .with_level(3)
            .with_hp(12, 12)
            .with_ability(Ability::For, 2)
    }

    pub fn goblin() -> Actor {
        Actor::new("Gobelin", ActorKind::Encounter)
            .with_nc(0.5)
            .with_hp(6, 6)
    }

    /// Give an actor a feature carrying a modifier with `target`.
    pub fn with_immunity(mut actor: Actor, target: ModifierTarget) -> Actor {
        actor.add_item(Item::new(
            "Immunité",
            ItemKind::Feature(FeatureData {
                modifiers: vec![Modifier::new(
                    ModifierType::Feature,
                    ModifierSubtype::State,
                    target,
                    "1",
                )],
                ..Default::default()
            }),
        ));
        actor
    }

    /// An activable action running the given resolvers.
    pub fn activable(label: &str, resolvers: Vec<Resolver>) -> Action {
        let mut action = Action::new(label).with_properties(ActionProperties {
            visible: true,
            activable: true,
            ..Default::default()
        });
        action.resolvers = resolvers;
        action
    }

    /// Add a path with `count` capacities; the first `learned` are learned.
    ///
    /// Returns the path id and the capacity ids in rank order.
    pub fn add_path(
        actor: &mut Actor,
        name: &str,
        subtype: PathSubtype,
        count: u8,
        learned: u8,
    ) -> (ItemId, Vec<ItemId>) {
        let path = ItemId::new();
        let capacities: Vec<ItemId> = (1..=count)
            .map(|rank| {
                let mut data = CapacityData::in_path(path, rank);
                data.learned = rank <= learned;
                data.mana_cost = i32::from(rank);
                actor.add_item(Item::new(format!("{name} {rank}"), ItemKind::Capacity(data)))
            })
            .collect();
        actor.add_item(
            Item::new(
                name,
                ItemKind::Path(PathData {
                    subtype,
                    capacities: capacities.clone(),
                    rank: learned,
                }),
            )
            .with_id(path),
        );
        (path, capacities)
    }

    /// Add a profile referencing `paths`.
    pub fn add_profile(actor: &mut Actor, name: &str, paths: Vec<ItemId>) -> ItemId {
        actor.add_item(Item::new(
            name,
            ItemKind::Profile(ProfileData {
                paths,
                ..Default::default()
            }),
        ))
    }

    /// A level 5 mage with one learned rank 2 attack spell.
    ///
    /// Returns the actor and the spell id.
    pub fn mage_with_spell(mana: i32) -> (Actor, ItemId) {
        let mut actor = Actor::new("Élise", ActorKind::Character)
            .with_level(5)
            .with_hp(10, 10)
            .with_mana(mana, 10)
            .with_ability(Ability::Int, 2);
        let (path, capacities) = add_path(&mut actor, "Voie de la magie destructrice", PathSubtype::Profile, 3, 2);
        add_profile(&mut actor, "Magicien", vec![path]);
        let spell = capacities[1];
        if let Some(item) = actor.item_mut(spell) {
            item.name = "Projectile magique".to_string();
            if let Some(data) = item.capacity_mut() {
                data.is_spell = true;
                data.action_type_attack = true;
                data.mana_cost = 2;
            }
            item.actions.push(activable(
                "Lancer",
                vec![Resolver::new("auto").with_damage("1d4+@int")],
            ));
        }
        (actor, spell)
    }

    /// An equipped one-handed weapon with a melee attack action.
    pub fn sword() -> Item {
        let mut data = EquipmentData::weapon("1d8");
        data.equipped = true;
        Item::new("Épée longue", ItemKind::Equipment(data)).with_action(activable(
            "Attaque",
            vec![Resolver::melee("@atc", "@arme.dmg+@for")
                .with_difficulty("@cible.def")],
        ))
    }

    /// A potion destroyed when its last dose is drunk.
    pub fn potion(quantity: i32) -> Item {
        let mut data = EquipmentData::new(EquipmentSubtype::Consumable);
        data.quantity.current = quantity;
        data.quantity.max = quantity;
        data.quantity.destroy_if_empty = true;
        Item::new("Potion de soins", ItemKind::Equipment(data)).with_action(activable(
            "Boire",
            vec![Resolver::new("heal")
                .with_skill("1d8")
                .with_target(crate::resolver::ResolverTarget::myself())],
        ))
    }
}
