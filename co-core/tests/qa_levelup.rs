//! QA scenarios for levelling up.

use co_core::host::EngineEvent;
use co_core::item::{CapacityData, Item, ItemKind, PathData, PathSubtype, ProfileData};
use co_core::levelup::{cost_of, evaluate};
use co_core::testing::{fixtures, MockHost};
use co_core::{Actor, ActorKind, Engine, ItemId, LevelUpTransaction, OrphanChoice, RulesConfig, SessionContext};

/// Level 2 hero with a people path and one profile path, both at rank 1.
fn hero() -> (Actor, Vec<ItemId>, Vec<ItemId>) {
    let mut actor = Actor::new("Aldric", ActorKind::Character)
        .with_level(2)
        .with_hp(14, 14);
    let (_, people) = fixtures::add_path(&mut actor, "Voie des humains", PathSubtype::People, 5, 1);
    let (path, profile) = fixtures::add_path(&mut actor, "Voie du bouclier", PathSubtype::Profile, 5, 1);
    fixtures::add_profile(&mut actor, "Guerrier", vec![path]);
    (actor, people, profile)
}

#[tokio::test]
async fn test_confirm_applies_picks_and_orphan_gain() {
    let (actor, people, profile) = hero();
    let rules = RulesConfig::default();
    let mut tx = LevelUpTransaction::new().with_bonus_pc(1);
    tx.toggle_pick(&actor, profile[1], &rules).unwrap();
    tx.toggle_pick(&actor, people[1], &rules).unwrap();
    tx.choose_orphan(&actor, OrphanChoice::Hp, &rules).unwrap();

    let mut engine = Engine::new(MockHost::new(), SessionContext::gm());
    let id = engine.add_actor(actor);
    assert!(engine.confirm_level_up(id, tx).await.unwrap());

    let actor = engine.actor(id).unwrap();
    assert_eq!(actor.attributes.level, 3);
    assert_eq!(actor.attributes.hp.max, 16);
    for capacity in [profile[1], people[1]] {
        assert!(actor.item(capacity).unwrap().capacity().unwrap().learned);
    }
    let path = actor.path_of_capacity(profile[1]).unwrap();
    assert_eq!(path.path().unwrap().rank, 2);
    assert!(engine
        .host()
        .events()
        .contains(&EngineEvent::LevelGained { actor: id, level: 3 }));
}

#[tokio::test]
async fn test_confirm_forgets_before_learning() {
    let (actor, _, profile) = hero();
    let rules = RulesConfig::default();
    let mut tx = LevelUpTransaction::new();
    tx.toggle_forget(&actor, profile[0], &rules).unwrap();

    let mut engine = Engine::new(MockHost::new(), SessionContext::gm());
    let id = engine.add_actor(actor);
    engine.confirm_level_up(id, tx).await.unwrap();

    let actor = engine.actor(id).unwrap();
    assert!(!actor.item(profile[0]).unwrap().capacity().unwrap().learned);
    let path = actor.path_of_capacity(profile[0]).unwrap();
    assert_eq!(path.path().unwrap().rank, 0);
}

#[test]
fn test_budget_is_never_exceeded() {
    let (actor, people, profile) = hero();
    let rules = RulesConfig::default();
    let mut tx = LevelUpTransaction::new();
    let base = rules.base_capacity_points + tx.bonus_pc;

    let attempts = [profile[1], profile[2], people[1], people[2], profile[3], people[3]];
    for capacity in attempts {
        let before = tx.picks.len();
        let accepted = tx.toggle_pick(&actor, capacity, &rules).is_ok();
        assert_eq!(tx.picks.len(), before + usize::from(accepted));

        let report = evaluate(&actor, &tx, &rules);
        assert!(report.spent <= base + report.refunds);
    }

    let spent: u32 = tx
        .picks
        .iter()
        .map(|id| cost_of(actor.item(*id).unwrap().capacity().unwrap().rank))
        .sum();
    assert_eq!(spent, 2);
}

/// One step of a player's level-up session.
#[derive(Clone, Copy)]
enum Step {
    Pick(ItemId),
    Forget(ItemId),
    Orphan(OrphanChoice),
}

fn assert_within_budget(actor: &Actor, tx: &LevelUpTransaction, rules: &RulesConfig) {
    let report = evaluate(actor, tx, rules);
    let budget = rules.base_capacity_points + tx.bonus_pc + report.refunds;
    let orphan = u32::from(tx.orphan.is_some());
    assert!(
        report.spent + orphan <= budget,
        "spent {} + orphan {} over budget {}",
        report.spent,
        orphan,
        budget
    );
}

#[test]
fn test_budget_holds_across_forgets_and_withdrawals() {
    let (actor, people, profile) = hero();
    let rules = RulesConfig::default();

    let sessions = [
        (0, vec![
            Step::Forget(profile[0]),
            Step::Pick(people[1]),
            Step::Pick(people[2]),
            Step::Forget(profile[0]),
        ]),
        (0, vec![
            Step::Pick(people[1]),
            Step::Forget(profile[0]),
            Step::Pick(people[2]),
            Step::Pick(people[1]),
            Step::Forget(profile[0]),
            Step::Pick(profile[1]),
        ]),
        (1, vec![
            Step::Pick(profile[1]),
            Step::Orphan(OrphanChoice::Fortune),
            Step::Pick(people[1]),
            Step::Orphan(OrphanChoice::Mp),
            Step::Pick(profile[1]),
            Step::Pick(people[2]),
        ]),
    ];

    for (bonus, steps) in sessions {
        let mut tx = LevelUpTransaction::new().with_bonus_pc(bonus);
        for step in steps {
            let _ = match step {
                Step::Pick(id) => tx.toggle_pick(&actor, id, &rules),
                Step::Forget(id) => tx.toggle_forget(&actor, id, &rules),
                Step::Orphan(choice) => tx.choose_orphan(&actor, choice, &rules),
            };
            assert_within_budget(&actor, &tx, &rules);
        }
    }
}

#[tokio::test]
async fn test_withdrawn_forget_never_over_learns() {
    let (actor, people, profile) = hero();
    let rules = RulesConfig::default();
    let mut tx = LevelUpTransaction::new();
    tx.toggle_forget(&actor, profile[0], &rules).unwrap();
    tx.toggle_pick(&actor, people[1], &rules).unwrap();
    tx.toggle_pick(&actor, people[2], &rules).unwrap();
    tx.toggle_forget(&actor, profile[0], &rules).unwrap();
    assert_within_budget(&actor, &tx, &rules);

    let mut engine = Engine::new(MockHost::new(), SessionContext::gm());
    let id = engine.add_actor(actor);
    engine.confirm_level_up(id, tx).await.unwrap();

    let actor = engine.actor(id).unwrap();
    assert!(actor.item(profile[0]).unwrap().capacity().unwrap().learned);
    assert!(actor.item(people[1]).unwrap().capacity().unwrap().learned);
    assert!(!actor.item(people[2]).unwrap().capacity().unwrap().learned);
}

#[tokio::test]
async fn test_staged_profile_is_created_and_learnable() {
    let (actor, _, _) = hero();
    let rules = RulesConfig::default();

    let path = ItemId::new();
    let first = Item::new("Projectile magique", ItemKind::Capacity(CapacityData::in_path(path, 1)));
    let first_id = first.id;
    let staged = vec![
        Item::new(
            "Magicien",
            ItemKind::Profile(ProfileData {
                paths: vec![path],
                ..Default::default()
            }),
        ),
        Item::new(
            "Voie de la magie destructrice",
            ItemKind::Path(PathData {
                subtype: PathSubtype::Profile,
                capacities: vec![first_id],
                rank: 0,
            }),
        )
        .with_id(path),
        first,
    ];

    let mut tx = LevelUpTransaction::new();
    tx.stage_profile(staged);
    assert!(evaluate(&actor, &tx, &rules).capacity(first_id).unwrap().can_learn);
    tx.toggle_pick(&actor, first_id, &rules).unwrap();

    let mut engine = Engine::new(MockHost::new(), SessionContext::gm());
    let id = engine.add_actor(actor);
    assert!(engine.confirm_level_up(id, tx).await.unwrap());

    assert_eq!(engine.host().created().len(), 3);
    let actor = engine.actor(id).unwrap();
    assert!(actor.item(first_id).unwrap().capacity().unwrap().learned);
    assert_eq!(actor.item(path).unwrap().path().unwrap().rank, 1);
}
