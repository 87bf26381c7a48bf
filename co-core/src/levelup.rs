//! Level-up: capacity-point budget, eligibility and confirmation.
//!
//! A [`LevelUpTransaction`] collects what the player intends to do on
//! gaining a level: capacities to learn and forget, an optional "orphan"
//! point trade and a staged profile or prestige path. [`evaluate`] is a pure
//! function of the actor and the transaction; the engine applies the
//! transaction in one go with [`Engine::confirm_level_up`].

use crate::actor::{Ability, Actor, ActorId, ItemId};
use crate::config::RulesConfig;
use crate::engine::{Engine, EngineError, EngineResult};
use crate::host::{EngineEvent, GaugeKind, Host, Patch, Refusal};
use crate::item::{Item, PathSubtype};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Capacity points a rank costs.
pub fn cost_of(rank: u8) -> u32 {
    if rank <= 2 {
        1
    } else {
        2
    }
}

/// What a leftover capacity point can be traded for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrphanChoice {
    Fortune,
    Recovery,
    Hp,
    Mp,
}

impl OrphanChoice {
    pub fn name(&self) -> &'static str {
        match self {
            OrphanChoice::Fortune => "fortune",
            OrphanChoice::Recovery => "recovery",
            OrphanChoice::Hp => "hp",
            OrphanChoice::Mp => "mp",
        }
    }
}

impl fmt::Display for OrphanChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Why a capacity cannot be learned at this level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Ineligibility {
    /// The next level is below the rank's minimum.
    Level,
    /// The previous rank of the path is neither learned nor picked.
    Prerequisite,
    /// Not enough capacity points left.
    Budget,
    /// Opening another profile path would exceed the limit.
    OpenPathLimit,
    /// The capacity is being forgotten in this transaction.
    Forgotten,
}

/// Pending choices for one level gained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct LevelUpTransaction {
    pub picks: BTreeSet<ItemId>,
    pub forgets: BTreeSet<ItemId>,
    /// Extra points granted on top of the base budget.
    pub bonus_pc: u32,
    pub orphan: Option<OrphanChoice>,
    /// A new profile with its paths and capacities.
    pub staged_profile: Vec<Item>,
    /// A prestige path with its capacities.
    pub staged_prestige: Vec<Item>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityEligibility {
    pub id: ItemId,
    pub path: ItemId,
    pub rank: u8,
    pub cost: u32,
    pub learned: bool,
    pub can_learn: bool,
    pub reason: Option<Ineligibility>,
    pub forgettable: bool,
    pub selected: bool,
    pub forgetting: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelUpReport {
    pub capacities: Vec<CapacityEligibility>,
    pub spent: u32,
    pub refunds: u32,
    pub remaining_before_orphan: u32,
    pub remaining: u32,
    pub open_slots_left: usize,
    pub orphan_enabled: bool,
    pub forget_quota: usize,
}

impl LevelUpReport {
    pub fn capacity(&self, id: ItemId) -> Option<&CapacityEligibility> {
        self.capacities.iter().find(|c| c.id == id)
    }
}

/// A path as the level-up sees it.
struct PathView {
    id: ItemId,
    subtype: PathSubtype,
    /// `(rank, capacity)` in path order.
    capacities: Vec<(u8, ItemId)>,
}

/// The actor with the transaction's staged items added.
fn prospective(actor: &Actor, tx: &LevelUpTransaction) -> Actor {
    let mut snapshot = actor.clone();
    for item in tx.staged_profile.iter().chain(&tx.staged_prestige) {
        if snapshot.item(item.id).is_none() {
            snapshot.add_item(item.clone());
        }
    }
    snapshot
}

/// People path first, then prestige paths, then the profile paths.
fn level_up_paths(actor: &Actor) -> Vec<PathView> {
    let mut ids: Vec<ItemId> = Vec::new();
    let mut push = |id: ItemId| {
        if !ids.contains(&id) {
            ids.push(id);
        }
    };
    if let Some(people) = actor.people_path() {
        push(people.id);
    }
    actor
        .paths()
        .filter(|p| p.path().is_some_and(|d| d.subtype == PathSubtype::Prestige))
        .for_each(|p| push(p.id));
    actor
        .items
        .iter()
        .filter_map(|i| i.profile())
        .flat_map(|p| p.paths.iter().copied())
        .for_each(&mut push);

    let people = actor.people_path().map(|p| p.id);
    ids.into_iter()
        .filter_map(|id| {
            let data = actor.item(id)?.path()?;
            let subtype = if Some(id) == people {
                PathSubtype::People
            } else {
                data.subtype
            };
            let capacities = data
                .capacities
                .iter()
                .filter_map(|cap| actor.item(*cap)?.capacity().map(|c| (c.rank, *cap)))
                .collect();
            Some(PathView {
                id,
                subtype,
                capacities,
            })
        })
        .collect()
}

/// Evaluate a transaction against an actor.
pub fn evaluate(actor: &Actor, tx: &LevelUpTransaction, rules: &RulesConfig) -> LevelUpReport {
    let actor = prospective(actor, tx);
    let paths = level_up_paths(&actor);
    let next_level = actor.attributes.level + 1;

    let learned = |id: ItemId| {
        actor
            .item(id)
            .and_then(|i| i.capacity())
            .is_some_and(|c| c.learned)
    };
    let learned_prospective =
        |id: ItemId| (learned(id) && !tx.forgets.contains(&id)) || tx.picks.contains(&id);

    let rank_of = |id: ItemId| actor.item(id).and_then(|i| i.capacity()).map(|c| c.rank);
    let spent: u32 = tx.picks.iter().filter_map(|id| rank_of(*id)).map(cost_of).sum();
    let refunds: u32 = tx
        .forgets
        .iter()
        .filter(|id| learned(**id))
        .filter_map(|id| rank_of(*id))
        .map(cost_of)
        .sum();
    let budget = rules.base_capacity_points + tx.bonus_pc + refunds;
    let remaining_before_orphan = budget.saturating_sub(spent);
    let remaining = remaining_before_orphan.saturating_sub(u32::from(tx.orphan.is_some()));

    let open_paths = paths
        .iter()
        .filter(|p| p.subtype == PathSubtype::Profile)
        .filter(|p| p.capacities.iter().any(|(_, id)| learned_prospective(*id)))
        .count();
    let open_slots_left = rules.open_path_limit.saturating_sub(open_paths);

    let mut capacities = Vec::new();
    for path in &paths {
        let min_rank = path.capacities.iter().map(|(rank, _)| *rank).min().unwrap_or(1);
        let top_learned = path
            .capacities
            .iter()
            .filter(|(_, id)| learned(*id) && !tx.forgets.contains(id))
            .map(|(rank, _)| *rank)
            .max();
        let path_open = path
            .capacities
            .iter()
            .any(|(_, id)| learned_prospective(*id));

        for &(rank, id) in &path.capacities {
            let is_learned = learned(id);
            let selected = tx.picks.contains(&id);
            let forgetting = tx.forgets.contains(&id);
            let cost = cost_of(rank);

            let reason = if is_learned && !forgetting {
                None
            } else if forgetting {
                Some(Ineligibility::Forgotten)
            } else if !rules
                .min_level_for_rank(rank)
                .is_some_and(|required| next_level >= required)
            {
                Some(Ineligibility::Level)
            } else if rank != min_rank
                && !path
                    .capacities
                    .iter()
                    .any(|(r, other)| *r + 1 == rank && learned_prospective(*other))
            {
                Some(Ineligibility::Prerequisite)
            } else if !selected && remaining < cost {
                Some(Ineligibility::Budget)
            } else if path.subtype == PathSubtype::Profile
                && rank == min_rank
                && !path_open
                && open_slots_left == 0
            {
                Some(Ineligibility::OpenPathLimit)
            } else {
                None
            };
            let can_learn = !(is_learned && !forgetting) && reason.is_none();

            let forgettable = is_learned
                && (forgetting || Some(rank) == top_learned)
                && !(path.subtype == PathSubtype::People && rank == min_rank);

            capacities.push(CapacityEligibility {
                id,
                path: path.id,
                rank,
                cost,
                learned: is_learned,
                can_learn,
                reason,
                forgettable,
                selected,
                forgetting,
            });
        }
    }

    let has_affordable = capacities
        .iter()
        .any(|c| c.can_learn && !c.selected && c.cost <= remaining);
    let orphan_enabled = !has_affordable && (remaining_before_orphan >= 1 || tx.orphan.is_some());

    LevelUpReport {
        capacities,
        spent,
        refunds,
        remaining_before_orphan,
        remaining,
        open_slots_left,
        orphan_enabled,
        forget_quota: if actor.ability(Ability::Int) >= 2 { 2 } else { 1 },
    }
}

fn capacity_name(actor: &Actor, id: ItemId) -> String {
    actor
        .item(id)
        .map(|i| i.name.clone())
        .unwrap_or_else(|| id.to_string())
}

impl LevelUpTransaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bonus_pc(mut self, bonus: u32) -> Self {
        self.bonus_pc = bonus;
        self
    }

    /// Pick or unpick a capacity to learn.
    pub fn toggle_pick(
        &mut self,
        actor: &Actor,
        capacity: ItemId,
        rules: &RulesConfig,
    ) -> Result<(), Refusal> {
        if self.picks.remove(&capacity) {
            self.orphan = None;
            self.prune_picks(actor, rules);
            return Ok(());
        }
        let report = evaluate(actor, self, rules);
        if !report.capacity(capacity).is_some_and(|c| c.can_learn) {
            return Err(Refusal::NotLearnable {
                capacity: capacity_name(actor, capacity),
            });
        }
        self.picks.insert(capacity);
        Ok(())
    }

    /// Mark or unmark a learned capacity to forget.
    pub fn toggle_forget(
        &mut self,
        actor: &Actor,
        capacity: ItemId,
        rules: &RulesConfig,
    ) -> Result<(), Refusal> {
        if self.forgets.remove(&capacity) {
            // Lower ranks of the same path cannot stay forgotten under it.
            let snapshot = prospective(actor, self);
            if let Some(path) = level_up_paths(&snapshot)
                .into_iter()
                .find(|p| p.capacities.iter().any(|(_, id)| *id == capacity))
            {
                let rank = path
                    .capacities
                    .iter()
                    .find(|(_, id)| *id == capacity)
                    .map_or(0, |(rank, _)| *rank);
                for (_, id) in path.capacities.iter().filter(|(r, _)| *r < rank) {
                    self.forgets.remove(id);
                }
            }
            self.orphan = None;
            self.prune_picks(actor, rules);
            return Ok(());
        }
        let report = evaluate(actor, self, rules);
        if self.forgets.len() >= report.forget_quota {
            return Err(Refusal::ForgetQuotaReached {
                quota: report.forget_quota,
            });
        }
        if !report.capacity(capacity).is_some_and(|c| c.forgettable) {
            return Err(Refusal::NotForgettable {
                capacity: capacity_name(actor, capacity),
            });
        }
        self.forgets.insert(capacity);
        self.orphan = None;
        self.prune_picks(actor, rules);
        Ok(())
    }

    /// Choose an orphan trade; choosing the current one clears it.
    pub fn choose_orphan(
        &mut self,
        actor: &Actor,
        choice: OrphanChoice,
        rules: &RulesConfig,
    ) -> Result<(), Refusal> {
        if !evaluate(actor, self, rules).orphan_enabled {
            return Err(Refusal::OrphanUnavailable);
        }
        self.orphan = if self.orphan == Some(choice) {
            None
        } else {
            Some(choice)
        };
        Ok(())
    }

    /// Drop every choice, keeping the bonus points.
    pub fn reset(&mut self) {
        *self = Self {
            bonus_pc: self.bonus_pc,
            ..Self::default()
        };
    }

    pub fn stage_profile(&mut self, items: Vec<Item>) {
        self.staged_profile = items;
    }

    pub fn stage_prestige(&mut self, items: Vec<Item>) {
        self.staged_prestige = items;
    }

    /// Unpick capacities whose prerequisites no longer hold, then the
    /// highest ranks until the picks fit the budget again.
    fn prune_picks(&mut self, actor: &Actor, rules: &RulesConfig) {
        loop {
            let report = evaluate(actor, self, rules);
            let stale: Vec<ItemId> = report
                .capacities
                .iter()
                .filter(|c| c.selected && !c.can_learn)
                .map(|c| c.id)
                .collect();
            if !stale.is_empty() {
                tracing::debug!(count = stale.len(), "picks dropped after prerequisite change");
                for id in stale {
                    self.picks.remove(&id);
                }
                continue;
            }

            let budget = rules.base_capacity_points + self.bonus_pc + report.refunds;
            if report.spent <= budget {
                return;
            }
            let Some(costliest) = report
                .capacities
                .iter()
                .filter(|c| c.selected)
                .max_by_key(|c| (c.rank, c.id))
                .map(|c| c.id)
            else {
                return;
            };
            tracing::debug!(capacity = %costliest, spent = report.spent, budget, "pick dropped over budget");
            self.picks.remove(&costliest);
        }
    }
}

impl<H: Host> Engine<H> {
    /// Apply a level-up transaction.
    ///
    /// Staged items are created, the level is raised, then forgets and picks
    /// (lowest rank first) go through the usual learning gates.
    pub async fn confirm_level_up(
        &mut self,
        actor_id: ActorId,
        tx: LevelUpTransaction,
    ) -> EngineResult<bool> {
        if !self.can_write(actor_id)? {
            return Err(EngineError::NotAuthoritative(actor_id));
        }

        for item in tx.staged_profile.iter().chain(&tx.staged_prestige) {
            if self.actor(actor_id)?.item(item.id).is_some() {
                continue;
            }
            let created = self.host.create_embedded(actor_id, item).await?;
            if created != item.id {
                tracing::debug!(staged = %item.id, %created, "host assigned a new item id");
            }
            self.actor_mut(actor_id)?.add_item(item.clone());
        }

        let level = self.actor(actor_id)?.attributes.level + 1;
        self.commit(actor_id, Patch::Level(level)).await?;

        let mut complete = true;
        for capacity in &tx.forgets {
            complete &= self
                .toggle_capacity_learned(actor_id, *capacity, false)
                .await?;
        }

        let actor = self.actor(actor_id)?;
        let mut ordered: Vec<(u8, ItemId)> = tx
            .picks
            .iter()
            .filter_map(|id| actor.item(*id)?.capacity().map(|c| (c.rank, *id)))
            .collect();
        ordered.sort();
        for (_, capacity) in ordered {
            complete &= self
                .toggle_capacity_learned(actor_id, capacity, true)
                .await?;
        }

        if let Some(choice) = tx.orphan {
            let gains = self.rules.orphan_gains;
            let resources = &self.actor(actor_id)?.resources;
            let (kind, mut gauge, delta) = match choice {
                OrphanChoice::Fortune => (GaugeKind::Fortune, resources.fortune, gains.fortune),
                OrphanChoice::Recovery => (GaugeKind::Recovery, resources.recovery, gains.recovery),
                OrphanChoice::Hp => (
                    GaugeKind::Hp,
                    self.actor(actor_id)?.attributes.hp,
                    gains.hp,
                ),
                OrphanChoice::Mp => (GaugeKind::Mana, resources.mana, gains.mana),
            };
            gauge.max += delta;
            self.commit(actor_id, Patch::Gauge { kind, gauge }).await?;
        }

        tracing::info!(actor = %actor_id, level, complete, "level gained");
        self.host
            .publish(EngineEvent::LevelGained {
                actor: actor_id,
                level,
            })
            .await;
        Ok(complete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::ActorKind;
    use crate::testing::fixtures;

    /// Level 2 hero: people path rank 1, one profile path rank 1.
    fn hero() -> (Actor, Vec<ItemId>, Vec<ItemId>) {
        let mut actor = Actor::new("Aldric", ActorKind::Character).with_level(2);
        let (_, people) = fixtures::add_path(&mut actor, "Voie des humains", PathSubtype::People, 5, 1);
        let (path, profile) =
            fixtures::add_path(&mut actor, "Voie du bouclier", PathSubtype::Profile, 5, 1);
        fixtures::add_profile(&mut actor, "Guerrier", vec![path]);
        (actor, people, profile)
    }

    #[test]
    fn test_cost_of() {
        assert_eq!(cost_of(1), 1);
        assert_eq!(cost_of(2), 1);
        assert_eq!(cost_of(3), 2);
        assert_eq!(cost_of(5), 2);
    }

    #[test]
    fn test_evaluate_gates() {
        let (actor, people, profile) = hero();
        let report = evaluate(&actor, &LevelUpTransaction::new(), &RulesConfig::default());

        assert_eq!(report.remaining, 2);
        let rank2 = report.capacity(profile[1]).unwrap();
        assert!(rank2.can_learn);
        // Level 3 meets rank 3's minimum, but rank 2 is not learned yet.
        let rank3 = report.capacity(profile[2]).unwrap();
        assert_eq!(rank3.reason, Some(Ineligibility::Prerequisite));
        // Rank 4 needs level 5.
        assert_eq!(report.capacity(profile[3]).unwrap().reason, Some(Ineligibility::Level));

        assert!(!report.capacity(people[0]).unwrap().forgettable);
        assert!(report.capacity(profile[0]).unwrap().forgettable);
    }

    #[test]
    fn test_pick_unlocks_next_rank_and_spends_budget() {
        let (actor, _, profile) = hero();
        let rules = RulesConfig::default();
        let mut tx = LevelUpTransaction::new();
        tx.toggle_pick(&actor, profile[1], &rules).unwrap();

        let report = evaluate(&actor, &tx, &rules);
        assert_eq!(report.spent, 1);
        assert_eq!(report.remaining, 1);
        // Rank 3 costs 2 and only 1 point is left.
        assert_eq!(report.capacity(profile[2]).unwrap().reason, Some(Ineligibility::Budget));
        assert!(matches!(
            tx.toggle_pick(&actor, profile[2], &rules),
            Err(Refusal::NotLearnable { .. })
        ));
        assert_eq!(tx.picks.len(), 1);
    }

    #[test]
    fn test_unpick_prunes_dependent_picks() {
        let (actor, _, profile) = hero();
        let rules = RulesConfig::default();
        let mut tx = LevelUpTransaction::new().with_bonus_pc(2);
        tx.toggle_pick(&actor, profile[1], &rules).unwrap();
        tx.toggle_pick(&actor, profile[2], &rules).unwrap();
        tx.toggle_pick(&actor, profile[1], &rules).unwrap();
        assert!(tx.picks.is_empty());
    }

    #[test]
    fn test_forget_refunds_and_quota() {
        let (actor, people, profile) = hero();
        let rules = RulesConfig::default();
        let mut tx = LevelUpTransaction::new();
        tx.toggle_forget(&actor, profile[0], &rules).unwrap();

        let report = evaluate(&actor, &tx, &rules);
        assert_eq!(report.refunds, 1);
        assert_eq!(report.remaining, 3);
        assert_eq!(report.forget_quota, 1);
        assert_eq!(
            report.capacity(profile[0]).unwrap().reason,
            Some(Ineligibility::Forgotten)
        );

        assert_eq!(
            tx.toggle_forget(&actor, people[0], &rules),
            Err(Refusal::ForgetQuotaReached { quota: 1 })
        );
    }

    #[test]
    fn test_clever_hero_forgets_two_ranks_of_one_path() {
        let mut actor = Actor::new("Elwyn", ActorKind::Character)
            .with_level(4)
            .with_ability(Ability::Int, 2);
        let (path, capacities) =
            fixtures::add_path(&mut actor, "Voie de l'air", PathSubtype::Profile, 5, 3);
        fixtures::add_profile(&mut actor, "Magicien", vec![path]);
        let rules = RulesConfig::default();
        let mut tx = LevelUpTransaction::new();

        tx.toggle_forget(&actor, capacities[2], &rules).unwrap();
        tx.toggle_forget(&actor, capacities[1], &rules).unwrap();
        let report = evaluate(&actor, &tx, &rules);
        assert_eq!(report.refunds, 3);
        assert!(report.capacity(capacities[2]).unwrap().forgettable);
        assert_eq!(
            tx.toggle_forget(&actor, capacities[0], &rules),
            Err(Refusal::ForgetQuotaReached { quota: 2 })
        );

        // Keeping rank 3 keeps rank 2 as well.
        tx.toggle_forget(&actor, capacities[2], &rules).unwrap();
        assert!(tx.forgets.is_empty());
    }

    #[test]
    fn test_withdrawn_forget_drops_the_picks_it_paid_for() {
        let (actor, people, profile) = hero();
        let rules = RulesConfig::default();
        let mut tx = LevelUpTransaction::new();
        tx.toggle_forget(&actor, profile[0], &rules).unwrap();
        tx.toggle_pick(&actor, people[1], &rules).unwrap();
        tx.toggle_pick(&actor, people[2], &rules).unwrap();
        assert_eq!(evaluate(&actor, &tx, &rules).spent, 3);

        tx.toggle_forget(&actor, profile[0], &rules).unwrap();
        let report = evaluate(&actor, &tx, &rules);
        assert_eq!(report.refunds, 0);
        assert!(report.spent <= rules.base_capacity_points);
        assert_eq!(tx.picks, BTreeSet::from([people[1]]));
    }

    #[test]
    fn test_open_path_limit() {
        let (mut actor, _, _) = hero();
        let rules = RulesConfig::default().with_open_path_limit(1);
        let (closed, capacities) =
            fixtures::add_path(&mut actor, "Voie de la guerre", PathSubtype::Profile, 5, 0);
        let profile_id = actor.main_profile().map(|p| p.id).unwrap();
        if let Some(crate::item::ItemKind::Profile(data)) =
            actor.item_mut(profile_id).map(|i| &mut i.kind)
        {
            data.paths.push(closed);
        }

        let report = evaluate(&actor, &LevelUpTransaction::new(), &rules);
        assert_eq!(report.open_slots_left, 0);
        assert_eq!(
            report.capacity(capacities[0]).unwrap().reason,
            Some(Ineligibility::OpenPathLimit)
        );
    }

    #[test]
    fn test_orphan_only_when_nothing_affordable() {
        let (actor, people, profile) = hero();
        let rules = RulesConfig::default();
        let mut tx = LevelUpTransaction::new().with_bonus_pc(1);
        assert_eq!(
            tx.choose_orphan(&actor, OrphanChoice::Hp, &rules),
            Err(Refusal::OrphanUnavailable)
        );

        tx.toggle_pick(&actor, profile[1], &rules).unwrap();
        tx.toggle_pick(&actor, people[1], &rules).unwrap();
        // One point left, every remaining rank 3 costs 2.
        let report = evaluate(&actor, &tx, &rules);
        assert_eq!(report.remaining, 1);
        assert!(report.orphan_enabled);

        tx.choose_orphan(&actor, OrphanChoice::Hp, &rules).unwrap();
        let report = evaluate(&actor, &tx, &rules);
        assert_eq!(report.remaining, 0);
        assert!(report.orphan_enabled);

        // Unpicking clears the trade.
        tx.toggle_pick(&actor, people[1], &rules).unwrap();
        assert_eq!(tx.orphan, None);
        assert!(!evaluate(&actor, &tx, &rules).orphan_enabled);
    }

    #[test]
    fn test_reset_keeps_bonus() {
        let (actor, _, profile) = hero();
        let rules = RulesConfig::default();
        let mut tx = LevelUpTransaction::new().with_bonus_pc(1);
        tx.toggle_pick(&actor, profile[1], &rules).unwrap();
        tx.reset();
        assert!(tx.picks.is_empty());
        assert_eq!(tx.bonus_pc, 1);
    }
}
