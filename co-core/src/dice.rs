//! Dice expressions for CO rolls.
//!
//! A dice expression is a small arithmetic language: integers, dice terms
//! (`2d6`, `2d20kh`, `4d6kl2`), `+ - * /`, unary minus and parentheses.
//! Nothing else parses, so a substituted formula can be evaluated without
//! ever handing it to a general interpreter.

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type for dice parsing and rolling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiceError {
    #[error("Invalid dice notation: {0}")]
    InvalidNotation(String),
    #[error("Invalid die size: {0}")]
    InvalidDieSize(u32),
    #[error("No dice specified")]
    NoDice,
    #[error("Cannot keep {keep} dice when only rolling {count} (in {notation})")]
    InvalidKeepCount {
        keep: u32,
        count: u32,
        notation: String,
    },
    #[error("Division by zero in {0}")]
    DivisionByZero(String),
    #[error("Expression contains dice: {0}")]
    NotConstant(String),
    #[error("Arithmetic overflow in {0}")]
    Overflow(String),
    #[error("Cannot roll {count} dice at once (at most {max})")]
    TooManyDice { count: u32, max: u32 },
}

/// Most dice a single term may roll.
pub const MAX_DICE: u32 = 100;

/// Die sizes used by CO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DieType {
    D3,
    D4,
    D6,
    D8,
    D10,
    D12,
    D20,
    D100,
}

impl DieType {
    pub fn sides(&self) -> u32 {
        match self {
            DieType::D3 => 3,
            DieType::D4 => 4,
            DieType::D6 => 6,
            DieType::D8 => 8,
            DieType::D10 => 10,
            DieType::D12 => 12,
            DieType::D20 => 20,
            DieType::D100 => 100,
        }
    }

    pub fn from_sides(sides: u32) -> Option<DieType> {
        match sides {
            3 => Some(DieType::D3),
            4 => Some(DieType::D4),
            6 => Some(DieType::D6),
            8 => Some(DieType::D8),
            10 => Some(DieType::D10),
            12 => Some(DieType::D12),
            20 => Some(DieType::D20),
            100 => Some(DieType::D100),
            _ => None,
        }
    }
}

impl fmt::Display for DieType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "d{}", self.sides())
    }
}

impl FromStr for DieType {
    type Err = DiceError;

    /// Parses `d6`, `D6` or `6`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix('d')
            .or_else(|| trimmed.strip_prefix('D'))
            .unwrap_or(trimmed);
        let sides: u32 = digits
            .parse()
            .map_err(|_| DiceError::InvalidNotation(s.to_string()))?;
        DieType::from_sides(sides).ok_or(DiceError::InvalidDieSize(sides))
    }
}

/// A single die component of a dice expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiceComponent {
    pub count: u32,
    pub die_type: DieType,
    pub keep_highest: Option<u32>,
    pub keep_lowest: Option<u32>,
}

/// Binary operators allowed in a formula.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    Add,
    Sub,
    Mul,
    Div,
}

impl Operator {
    fn symbol(&self) -> char {
        match self {
            Operator::Add => '+',
            Operator::Sub => '-',
            Operator::Mul => '*',
            Operator::Div => '/',
        }
    }

    fn apply(&self, left: i32, right: i32, notation: &str) -> Result<i32, DiceError> {
        let result = match self {
            Operator::Add => left.checked_add(right),
            Operator::Sub => left.checked_sub(right),
            Operator::Mul => left.checked_mul(right),
            Operator::Div => {
                if right == 0 {
                    return Err(DiceError::DivisionByZero(notation.to_string()));
                }
                left.checked_div(right)
            }
        };
        result.ok_or_else(|| DiceError::Overflow(notation.to_string()))
    }
}

/// Node of a parsed dice expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiceTerm {
    Constant(i32),
    Dice(DiceComponent),
    Negate(Box<DiceTerm>),
    Binary {
        op: Operator,
        left: Box<DiceTerm>,
        right: Box<DiceTerm>,
    },
}

impl DiceTerm {
    fn has_dice(&self) -> bool {
        match self {
            DiceTerm::Constant(_) => false,
            DiceTerm::Dice(_) => true,
            DiceTerm::Negate(inner) => inner.has_dice(),
            DiceTerm::Binary { left, right, .. } => left.has_dice() || right.has_dice(),
        }
    }
}

/// A complete dice expression (e.g., `2d20kh+5`, `(1d6+2)*2`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiceExpression {
    pub root: DiceTerm,
    pub original: String,
}

impl DiceExpression {
    /// Parse a dice notation string.
    pub fn parse(notation: &str) -> Result<Self, DiceError> {
        let normalized = notation.trim().to_lowercase();
        if normalized.is_empty() {
            return Err(DiceError::NoDice);
        }

        let mut parser = Parser {
            chars: normalized.chars().filter(|c| !c.is_whitespace()).collect(),
            pos: 0,
            notation: &normalized,
        };
        let root = parser.expression()?;
        if parser.pos != parser.chars.len() {
            return Err(DiceError::InvalidNotation(normalized.clone()));
        }

        Ok(DiceExpression {
            root,
            original: normalized,
        })
    }

    /// True when the expression rolls at least one die.
    pub fn has_dice(&self) -> bool {
        self.root.has_dice()
    }

    /// Evaluate a dice-free expression with integer arithmetic.
    ///
    /// Division truncates toward zero.
    pub fn evaluate_constant(&self) -> Result<i32, DiceError> {
        if self.has_dice() {
            return Err(DiceError::NotConstant(self.original.clone()));
        }
        let mut components = Vec::new();
        let mut rng = rand::rngs::mock::StepRng::new(0, 0);
        self.eval(&self.root, &mut rng, &mut components)
    }

    /// Roll the dice expression and return the result.
    pub fn roll(&self) -> Result<RollResult, DiceError> {
        self.roll_with_rng(&mut rand::thread_rng())
    }

    /// Roll with a specific RNG (useful for testing).
    pub fn roll_with_rng<R: Rng>(&self, rng: &mut R) -> Result<RollResult, DiceError> {
        let mut component_results = Vec::new();
        let total = self.eval(&self.root, rng, &mut component_results)?;

        // The natural result is the kept d20 of a single-d20 term.
        let natural = component_results
            .iter()
            .find(|c| c.die_type == DieType::D20 && c.kept.len() == 1)
            .and_then(|c| c.kept.first().copied());

        Ok(RollResult {
            expression: self.clone(),
            component_results,
            total,
            natural,
        })
    }

    fn eval<R: Rng>(
        &self,
        term: &DiceTerm,
        rng: &mut R,
        components: &mut Vec<ComponentResult>,
    ) -> Result<i32, DiceError> {
        match term {
            DiceTerm::Constant(value) => Ok(*value),
            DiceTerm::Negate(inner) => self
                .eval(inner, rng, components)?
                .checked_neg()
                .ok_or_else(|| DiceError::Overflow(self.original.clone())),
            DiceTerm::Binary { op, left, right } => {
                let l = self.eval(left, rng, components)?;
                let r = self.eval(right, rng, components)?;
                op.apply(l, r, &self.original)
            }
            DiceTerm::Dice(component) => {
                let rolls: Vec<u32> = (0..component.count)
                    .map(|_| rng.gen_range(1..=component.die_type.sides()))
                    .collect();
                let kept = if let Some(keep) = component.keep_highest {
                    let mut sorted = rolls.clone();
                    sorted.sort_by(|a, b| b.cmp(a));
                    sorted.truncate(keep as usize);
                    sorted
                } else if let Some(keep) = component.keep_lowest {
                    let mut sorted = rolls.clone();
                    sorted.sort();
                    sorted.truncate(keep as usize);
                    sorted
                } else {
                    rolls.clone()
                };
                let subtotal: u32 = kept.iter().sum();
                let total =
                    i32::try_from(subtotal).map_err(|_| DiceError::Overflow(self.original.clone()))?;
                components.push(ComponentResult {
                    die_type: component.die_type,
                    rolls,
                    kept,
                    subtotal,
                });
                Ok(total)
            }
        }
    }
}

impl FromStr for DiceExpression {
    type Err = DiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DiceExpression::parse(s)
    }
}

impl fmt::Display for DiceExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.original)
    }
}

struct Parser<'a> {
    chars: Vec<char>,
    pos: usize,
    notation: &'a str,
}

impl Parser<'_> {
    fn invalid(&self) -> DiceError {
        DiceError::InvalidNotation(self.notation.to_string())
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn expression(&mut self) -> Result<DiceTerm, DiceError> {
        let mut left = self.product()?;
        while let Some(c) = self.peek() {
            let op = match c {
                '+' => Operator::Add,
                '-' => Operator::Sub,
                _ => break,
            };
            self.pos += 1;
            let right = self.product()?;
            left = DiceTerm::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn product(&mut self) -> Result<DiceTerm, DiceError> {
        let mut left = self.unary()?;
        while let Some(c) = self.peek() {
            let op = match c {
                '*' => Operator::Mul,
                '/' => Operator::Div,
                _ => break,
            };
            self.pos += 1;
            let right = self.unary()?;
            left = DiceTerm::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<DiceTerm, DiceError> {
        match self.peek() {
            Some('-') => {
                self.pos += 1;
                Ok(DiceTerm::Negate(Box::new(self.unary()?)))
            }
            Some('+') => {
                self.pos += 1;
                self.unary()
            }
            _ => self.atom(),
        }
    }

    fn atom(&mut self) -> Result<DiceTerm, DiceError> {
        match self.peek() {
            Some('(') => {
                self.pos += 1;
                let inner = self.expression()?;
                if self.peek() != Some(')') {
                    return Err(self.invalid());
                }
                self.pos += 1;
                Ok(inner)
            }
            Some(c) if c.is_ascii_digit() || c == 'd' => self.dice_or_number(),
            _ => Err(self.invalid()),
        }
    }

    fn number(&mut self) -> Option<u32> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        if start == self.pos {
            return None;
        }
        self.chars[start..self.pos]
            .iter()
            .collect::<String>()
            .parse()
            .ok()
    }

    fn dice_or_number(&mut self) -> Result<DiceTerm, DiceError> {
        let count = self.number();
        if self.peek() != Some('d') {
            let value = count.ok_or_else(|| self.invalid())?;
            let value = i32::try_from(value).map_err(|_| self.invalid())?;
            return Ok(DiceTerm::Constant(value));
        }
        self.pos += 1;
        let count = count.unwrap_or(1);
        if count > MAX_DICE {
            return Err(DiceError::TooManyDice {
                count,
                max: MAX_DICE,
            });
        }
        let sides = self.number().ok_or_else(|| self.invalid())?;
        let die_type = DieType::from_sides(sides).ok_or(DiceError::InvalidDieSize(sides))?;

        let mut keep_highest = None;
        let mut keep_lowest = None;
        if self.peek() == Some('k') {
            let which = self.peek_at(1);
            self.pos += 2;
            let keep = self.number().unwrap_or(1);
            match which {
                Some('h') => keep_highest = Some(keep),
                Some('l') => keep_lowest = Some(keep),
                _ => return Err(self.invalid()),
            }
            if keep > count {
                return Err(DiceError::InvalidKeepCount {
                    keep,
                    count,
                    notation: self.notation.to_string(),
                });
            }
        }

        Ok(DiceTerm::Dice(DiceComponent {
            count,
            die_type,
            keep_highest,
            keep_lowest,
        }))
    }
}

/// Result of rolling a single dice component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentResult {
    pub die_type: DieType,
    pub rolls: Vec<u32>,
    pub kept: Vec<u32>,
    pub subtotal: u32,
}

/// Complete result of a dice roll.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollResult {
    pub expression: DiceExpression,
    pub component_results: Vec<ComponentResult>,
    pub total: i32,
    /// Kept face of the first single-d20 term, if any.
    pub natural: Option<u32>,
}

impl RollResult {
    /// Format the individual dice results for display.
    ///
    /// Dropped dice are shown in parentheses.
    pub fn dice_display(&self) -> String {
        let dice_parts: Vec<String> = self
            .component_results
            .iter()
            .map(|c| {
                let mut kept_used = vec![false; c.kept.len()];
                let shown: Vec<String> = c
                    .rolls
                    .iter()
                    .map(|&roll| {
                        let slot = c
                            .kept
                            .iter()
                            .enumerate()
                            .position(|(i, &k)| k == roll && !kept_used[i]);
                        match slot {
                            Some(i) => {
                                kept_used[i] = true;
                                roll.to_string()
                            }
                            None => format!("({roll})"),
                        }
                    })
                    .collect();
                format!("{}[{}]", c.die_type, shown.join(", "))
            })
            .collect();
        dice_parts.join(" ")
    }
}

impl fmt::Display for RollResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.expression, self.total)
    }
}

impl fmt::Display for DiceTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiceTerm::Constant(v) => write!(f, "{v}"),
            DiceTerm::Dice(c) => {
                write!(f, "{}{}", c.count, c.die_type)?;
                if let Some(k) = c.keep_highest {
                    write!(f, "kh{k}")?;
                }
                if let Some(k) = c.keep_lowest {
                    write!(f, "kl{k}")?;
                }
                Ok(())
            }
            DiceTerm::Negate(inner) => write!(f, "-{inner}"),
            DiceTerm::Binary { op, left, right } => {
                write!(f, "({left} {} {right})", op.symbol())
            }
        }
    }
}

// ============================================================================
// Roll primitive
// ============================================================================

/// Outcome handed back by a [`DiceRoller`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollOutcome {
    pub formula: String,
    pub total: i32,
    /// Kept face of the d20 for checks.
    pub natural: Option<u32>,
    pub breakdown: String,
}

impl From<RollResult> for RollOutcome {
    fn from(result: RollResult) -> Self {
        RollOutcome {
            formula: result.expression.original.clone(),
            total: result.total,
            natural: result.natural,
            breakdown: result.dice_display(),
        }
    }
}

/// Injectable dice primitive.
///
/// Formula substitution happens before this is called; implementations only
/// ever see plain dice notation.
#[async_trait]
pub trait DiceRoller: Send + Sync {
    async fn roll(&self, formula: &str) -> Result<RollOutcome, DiceError>;
}

/// Rolls with the thread-local RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomRoller;

#[async_trait]
impl DiceRoller for RandomRoller {
    async fn roll(&self, formula: &str) -> Result<RollOutcome, DiceError> {
        let expr = DiceExpression::parse(formula)?;
        Ok(expr.roll()?.into())
    }
}

/// Convenience function to roll dice from a notation string.
pub fn roll(notation: &str) -> Result<RollResult, DiceError> {
    DiceExpression::parse(notation)?.roll()
}

/// Evaluate a dice-free arithmetic string.
pub fn evaluate_arithmetic(expression: &str) -> Result<i32, DiceError> {
    DiceExpression::parse(expression)?.evaluate_constant()
}
