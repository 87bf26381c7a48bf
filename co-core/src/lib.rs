//! Chroniques Oubliées resolution engine.
//!
//! This crate provides:
//! - Formula substitution and evaluation (`@rank[...]`, evolving dice, roll data)
//! - Typed modifiers, actions and tag-dispatched resolvers
//! - Attack checks, including opposed checks settled later
//! - Timed custom effects driven by the combat clock
//! - Action activation with mana, charges and ammunition gates
//! - Level-up eligibility and confirmation
//!
//! The tabletop behind the engine is abstracted by the [`host::Host`] traits.
//!
//! # Quick Start
//!
//! ```ignore
//! use co_core::{ActivationRequest, Engine, SessionContext};
//!
//! async fn attack(host: impl co_core::Host, hero: co_core::Actor) -> co_core::EngineResult<()> {
//!     let mut engine = Engine::new(host, SessionContext::gm());
//!     let sword = hero.items[0].id;
//!     let hero = engine.add_actor(hero);
//!
//!     engine.activate_action(ActivationRequest::new(hero, sword, 0)).await?;
//!     Ok(())
//! }
//! ```

pub mod action;
pub mod actor;
pub mod check;
pub mod config;
pub mod controller;
pub mod dice;
pub mod effect;
pub mod engine;
pub mod formula;
pub mod host;
pub mod item;
pub mod levelup;
pub mod modifier;
pub mod resolver;
pub mod session;
pub mod testing;

// Primary public API
pub use action::{Action, ActionProperties, RollKind};
pub use actor::{Ability, Actor, ActorId, ActorKind, ItemId, UserId};
pub use check::{CheckId, PendingCheck};
pub use config::{ConfigError, RulesConfig};
pub use controller::ActivationRequest;
pub use dice::{DiceError, DiceRoller, RandomRoller, RollOutcome};
pub use effect::{CustomEffect, EffectUnit};
pub use engine::{Engine, EngineError, EngineResult};
pub use host::{Host, HostError, Patch, PrivilegedRequest, Refusal};
pub use item::{Item, ItemKind};
pub use levelup::{LevelUpReport, LevelUpTransaction, OrphanChoice};
pub use modifier::{Modifier, ModifierTarget};
pub use resolver::{Resolver, ResolverKind, ResolverRegistry};
pub use session::{ClockSnapshot, SessionContext};
