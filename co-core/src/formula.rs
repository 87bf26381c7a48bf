//! Placeholder substitution for CO formulas.
//!
//! Authored formulas mix dice notation with shortcuts that only make sense
//! against a given actor: the evolving die `d4°`, path ranks (`@rank`,
//! `@rank[1,0,0,1]`), profile-wide ranks (`@allrank[n]`), the equipped
//! weapon's damage (`@arme.dmg`), opposed values (`@oppose.for`) and plain
//! roll-data references (`@for`, `@abilities.agi.value`). The functions
//! here turn such a formula into plain dice notation understood by
//! [`crate::dice`].

use crate::actor::{Actor, ActorKind, ItemId};
use crate::dice::{self, DieType};
use crate::modifier::ModifierTarget;
use regex_lite::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::LazyLock;

static RANK_BRACKET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@ran[gk]\[([^\]]*)\]").expect("valid regex"));

static RANK_PLAIN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@ran[gk]\b").expect("valid regex"));

static ALL_RANK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@(?:allrank|toutrang)\[([^\]]*)\]").expect("valid regex"));

static OPPOSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@oppose\.(\S+)").expect("valid regex"));

static ROLL_DATA_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"@([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*)").expect("valid regex")
});

pub const EVOLVING_DIE: &str = "d4°";
pub const WEAPON_DAMAGE: &str = "@arme.dmg";

// ============================================================================
// Evolving dice
// ============================================================================

/// Breakpoints for the evolving die, keyed on level or encounter rating.
///
/// Each entry is an inclusive upper bound; ratings above every bound use
/// `beyond`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvolvingDice {
    pub steps: Vec<(f32, DieType)>,
    pub beyond: DieType,
}

impl Default for EvolvingDice {
    fn default() -> Self {
        // Below 6 is d4, which for integer levels is the same as "up to 5".
        Self {
            steps: vec![
                (5.99, DieType::D4),
                (8.0, DieType::D6),
                (11.0, DieType::D8),
                (14.0, DieType::D10),
            ],
            beyond: DieType::D12,
        }
    }
}

impl EvolvingDice {
    pub fn die_for(&self, rating: f32) -> DieType {
        self.steps
            .iter()
            .find(|(bound, _)| rating <= *bound)
            .map(|(_, die)| *die)
            .unwrap_or(self.beyond)
    }

    pub fn die_for_actor(&self, actor: &Actor) -> DieType {
        let rating = match actor.kind {
            ActorKind::Character => actor.attributes.level as f32,
            ActorKind::Encounter => actor.attributes.nc,
        };
        self.die_for(rating)
    }
}

// ============================================================================
// Custom values
// ============================================================================

/// Substitute the actor-specific shortcuts with the default evolving table.
pub fn evaluate_custom_values(actor: &Actor, formula: &str, source: Option<ItemId>) -> String {
    evaluate_custom_values_with(actor, formula, source, &EvolvingDice::default())
}

/// Substitute evolving dice, ranks, profile ranks and weapon damage, in that
/// order.
///
/// Rank shortcuts need a source; without one they are left untouched.
pub fn evaluate_custom_values_with(
    actor: &Actor,
    formula: &str,
    source: Option<ItemId>,
    evolving: &EvolvingDice,
) -> String {
    let mut replaced = formula.to_string();

    if replaced.contains(EVOLVING_DIE) {
        let die = evolving.die_for_actor(actor);
        replaced = replaced.replace(EVOLVING_DIE, &die.to_string());
    }

    if let Some(source) = source {
        if replaced.contains("@rank") || replaced.contains("@rang") {
            replaced = replace_rank(actor, &replaced, source);
        }
        if replaced.contains("@allrank") || replaced.contains("@toutrang") {
            replaced = replace_all_rank(actor, &replaced);
        }
    }

    if replaced.contains(WEAPON_DAMAGE) {
        if let Some(damage) = actor
            .equipped_weapons()
            .next()
            .and_then(|w| w.equipment())
            .map(|e| e.damage.as_str())
            .filter(|d| !d.is_empty())
        {
            replaced = replaced.replace(WEAPON_DAMAGE, damage);
        }
    }

    replaced
}

fn replace_rank(actor: &Actor, content: &str, source: ItemId) -> String {
    // Only capacities carry a rank.
    if actor.item(source).and_then(|i| i.capacity()).is_none() {
        tracing::debug!(source = %source, "rank source is not a capacity");
        return content.to_string();
    }
    let rank = actor
        .path_of_capacity(source)
        .map(|path| actor.compute_path_rank(path.id))
        .unwrap_or(0) as usize;

    // Brackets first so the plain token does not eat their prefix.
    let bracketed = RANK_BRACKET.replace_all(content, |caps: &Captures| {
        caps[1]
            .split(',')
            .take(rank)
            .filter_map(|n| n.trim().parse::<i32>().ok())
            .sum::<i32>()
            .to_string()
    });
    RANK_PLAIN
        .replace_all(&bracketed, rank.to_string().as_str())
        .into_owned()
}

fn replace_all_rank(actor: &Actor, content: &str) -> String {
    let Some(profile) = actor.main_profile().and_then(|p| p.profile()) else {
        return content.to_string();
    };
    ALL_RANK
        .replace_all(content, |caps: &Captures| match caps[1].trim().parse::<u8>() {
            Ok(n) if (1..=8).contains(&n) => profile
                .paths
                .iter()
                .filter(|path| actor.compute_path_rank(**path) >= n)
                .count()
                .to_string(),
            _ => caps[0].to_string(),
        })
        .into_owned()
}

// ============================================================================
// Roll data
// ============================================================================

/// Look up a dotted path in a roll-data projection.
pub fn lookup<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(data, |node, key| node.get(key))
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
        _ => None,
    }
}

/// Replace `@path` references with values from the roll data.
///
/// References that do not resolve to a scalar are left in place.
pub fn replace_roll_data(formula: &str, data: &Value) -> String {
    ROLL_DATA_REF
        .replace_all(formula, |caps: &Captures| {
            lookup(data, &caps[1])
                .and_then(scalar)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Resolve `@oppose.<path>` against the actor's roll data.
///
/// `None` means there is no opposed difficulty. It is never zero.
pub fn evaluate_opposite_formula(formula: &str, actor: &Actor) -> Option<i32> {
    let path = OPPOSE.captures(formula)?.get(1)?.as_str().to_string();
    let data = actor.roll_data();
    match lookup(&data, &path)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)).map(|v| v as i32),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn is_opposed(formula: &str) -> bool {
    formula.contains("@oppose")
}

/// Numeric value of a modifier formula.
///
/// Dice-bearing formulas never randomize a modifier and count as 0.
/// Substitution uses the actor's base values so that a modifier cannot
/// depend on the total it is part of.
pub fn evaluate_modifier(actor: &Actor, formula: &str, source: Option<ItemId>) -> i32 {
    if formula.is_empty() || formula.contains('d') || formula.contains('D') {
        return 0;
    }

    if formula.contains('@') {
        let substituted = evaluate_custom_values(actor, formula, source);
        let substituted = replace_roll_data(&substituted, &actor.base_roll_data());
        return match dice::evaluate_arithmetic(&substituted) {
            Ok(value) => value,
            Err(err) => {
                tracing::debug!(formula, %err, "modifier formula did not evaluate");
                0
            }
        };
    }

    parse_leading_int(formula).unwrap_or(0)
}

/// Leading integer of a string, as a lenient `parseInt` would read it.
fn parse_leading_int(text: &str) -> Option<i32> {
    let text = text.trim_start();
    let end = text
        .char_indices()
        .find(|(i, c)| !(c.is_ascii_digit() || (*i == 0 && (*c == '-' || *c == '+'))))
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    text[..end].parse().ok()
}

// ============================================================================
// Attack type
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttackType {
    Melee,
    Ranged,
    Magical,
}

impl AttackType {
    pub fn modifier_target(&self) -> ModifierTarget {
        match self {
            AttackType::Melee => ModifierTarget::Melee,
            AttackType::Ranged => ModifierTarget::Ranged,
            AttackType::Magical => ModifierTarget::Magic,
        }
    }
}

/// Attack type implied by the attack value a skill formula references.
pub fn attack_type_from_formula(formula: &str) -> Option<AttackType> {
    if formula.contains("@atc") {
        Some(AttackType::Melee)
    } else if formula.contains("@atd") {
        Some(AttackType::Ranged)
    } else if formula.contains("@atm") {
        Some(AttackType::Magical)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::Ability;
    use crate::item::{CapacityData, EquipmentData, Item, ItemKind, PathData, ProfileData};

    /// A character whose single path has `learned` capacities learned in a row.
    fn ranked_actor(level: u32, learned: usize) -> (Actor, ItemId) {
        let mut actor = Actor::new("Aldric", ActorKind::Character).with_level(level);
        let path_id = ItemId::new();
        let mut capacities = Vec::new();
        for rank in 1..=5u8 {
            let mut data = CapacityData::in_path(path_id, rank);
            data.learned = (rank as usize) <= learned;
            capacities.push(actor.add_item(Item::new(
                format!("Capacité {rank}"),
                ItemKind::Capacity(data),
            )));
        }
        actor.add_item(
            Item::new(
                "Voie de l'escrime",
                ItemKind::Path(PathData {
                    capacities: capacities.clone(),
                    ..Default::default()
                }),
            )
            .with_id(path_id),
        );
        actor.add_item(Item::new(
            "Guerrier",
            ItemKind::Profile(ProfileData {
                paths: vec![path_id],
                ..Default::default()
            }),
        ));
        (actor, capacities[0])
    }

    #[test]
    fn test_evolving_dice_by_level() {
        for (level, expected) in [(5, "2d4+1"), (9, "2d8+1"), (7, "2d6+1"), (20, "2d12+1")] {
            let actor = Actor::new("Aldric", ActorKind::Character).with_level(level);
            assert_eq!(evaluate_custom_values(&actor, "2d4°+1", None), expected);
        }
    }

    #[test]
    fn test_evolving_dice_by_encounter_rating() {
        let actor = Actor::new("Ogre", ActorKind::Encounter).with_nc(12.0);
        assert_eq!(evaluate_custom_values(&actor, "1d4°", None), "1d10");
    }

    #[test]
    fn test_rank_bracket() {
        let (actor, source) = ranked_actor(5, 4);
        assert_eq!(
            evaluate_custom_values(&actor, "@rank[1,0,0,1,0]", Some(source)),
            "2"
        );
        assert_eq!(
            evaluate_custom_values(&actor, "@rang[2,2,2,2,2]+@rank", Some(source)),
            "8+4"
        );
    }

    #[test]
    fn test_rank_without_source_untouched() {
        let (actor, _) = ranked_actor(5, 2);
        assert_eq!(evaluate_custom_values(&actor, "@rank", None), "@rank");
    }

    #[test]
    fn test_all_rank() {
        let (actor, source) = ranked_actor(5, 3);
        assert_eq!(evaluate_custom_values(&actor, "@allrank[3]", Some(source)), "1");
        assert_eq!(evaluate_custom_values(&actor, "@toutrang[4]", Some(source)), "0");
        assert_eq!(
            evaluate_custom_values(&actor, "@allrank[9]", Some(source)),
            "@allrank[9]"
        );
    }

    #[test]
    fn test_weapon_damage() {
        let mut actor = Actor::new("Aldric", ActorKind::Character);
        assert_eq!(evaluate_custom_values(&actor, "@arme.dmg+2", None), "@arme.dmg+2");

        let mut sword = EquipmentData::weapon("1d8");
        sword.equipped = true;
        actor.add_item(Item::new("Épée longue", ItemKind::Equipment(sword)));
        assert_eq!(evaluate_custom_values(&actor, "@arme.dmg+2", None), "1d8+2");
    }

    #[test]
    fn test_evaluate_modifier() {
        let (actor, source) = ranked_actor(5, 2);
        assert_eq!(evaluate_modifier(&actor, "", Some(source)), 0);
        assert_eq!(evaluate_modifier(&actor, "1d6", Some(source)), 0);
        assert_eq!(evaluate_modifier(&actor, "5", Some(source)), 5);
        assert_eq!(evaluate_modifier(&actor, "-2", Some(source)), -2);
        assert_eq!(evaluate_modifier(&actor, "abc", Some(source)), 0);
        assert_eq!(evaluate_modifier(&actor, "@rank*2", Some(source)), 4);
    }

    #[test]
    fn test_evaluate_modifier_roll_data() {
        let actor = Actor::new("Aldric", ActorKind::Character).with_ability(Ability::Con, 3);
        assert_eq!(evaluate_modifier(&actor, "@con+1", None), 4);
        assert_eq!(evaluate_modifier(&actor, "@unknown+1", None), 0);
    }

    #[test]
    fn test_evaluate_modifier_overflow_is_zero() {
        let actor = Actor::new("Aldric", ActorKind::Character).with_ability(Ability::Con, 3);
        assert_eq!(evaluate_modifier(&actor, "@con*2147483647", None), 0);
    }

    #[test]
    fn test_replace_roll_data_nested() {
        let actor = Actor::new("Aldric", ActorKind::Character).with_hp(7, 12);
        let data = actor.roll_data();
        assert_eq!(
            replace_roll_data("@attributes.hp.max-@attributes.hp.value", &data),
            "12-7"
        );
        assert_eq!(replace_roll_data("@nope", &data), "@nope");
    }

    #[test]
    fn test_opposite_formula() {
        let actor = Actor::new("Aldric", ActorKind::Character).with_ability(Ability::For, 2);
        assert_eq!(evaluate_opposite_formula("@oppose.for", &actor), Some(2));
        assert_eq!(evaluate_opposite_formula("@oppose.abilities.for.value", &actor), Some(2));
        assert_eq!(evaluate_opposite_formula("@oppose.missing", &actor), None);
        assert_eq!(evaluate_opposite_formula("12", &actor), None);
    }

    #[test]
    fn test_attack_type_from_formula() {
        assert_eq!(attack_type_from_formula("1d20+@atc"), Some(AttackType::Melee));
        assert_eq!(attack_type_from_formula("1d20+@atd"), Some(AttackType::Ranged));
        assert_eq!(attack_type_from_formula("1d20+@atm"), Some(AttackType::Magical));
        assert_eq!(attack_type_from_formula("1d20+@for"), None);
    }
}
