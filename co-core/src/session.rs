//! Per-call context: who is acting, and when.
//!
//! The acting user, their GM flag and the debug switches are threaded
//! through the engine explicitly. Combat timing arrives as an immutable
//! [`ClockSnapshot`] with each host callback.

use crate::actor::{Actor, UserId};
use serde::{Deserialize, Serialize};

/// Verbose tracing switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DebugFlags {
    pub actions: bool,
    pub resolvers: bool,
    pub rolls: bool,
    pub hooks: bool,
}

impl DebugFlags {
    pub fn all() -> Self {
        Self {
            actions: true,
            resolvers: true,
            rolls: true,
            hooks: true,
        }
    }
}

/// Identity and authority of the client driving an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    pub user: UserId,
    /// The GM client is authoritative for every actor.
    pub is_gm: bool,
    #[serde(default)]
    pub debug: DebugFlags,
}

impl SessionContext {
    pub fn gm() -> Self {
        Self {
            user: UserId::new(),
            is_gm: true,
            debug: DebugFlags::default(),
        }
    }

    pub fn player(user: UserId) -> Self {
        Self {
            user,
            is_gm: false,
            debug: DebugFlags::default(),
        }
    }

    pub fn with_debug(mut self, debug: DebugFlags) -> Self {
        self.debug = debug;
        self
    }

    pub fn is_authoritative(&self) -> bool {
        self.is_gm
    }

    /// Whether this client may write the actor's protected state directly.
    pub fn can_write(&self, actor: &Actor) -> bool {
        self.is_gm || actor.owner == Some(self.user)
    }
}

/// Round counter movement between two snapshots.
pub const FORWARD: i8 = 1;
pub const REWIND: i8 = -1;

/// Immutable view of the combat clock handed to each callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockSnapshot {
    pub round: i32,
    pub turn: u32,
    /// `1` when moving forward, `-1` when the GM rewinds.
    pub direction: i8,
}

impl ClockSnapshot {
    pub fn new(round: i32, turn: u32, direction: i8) -> Self {
        Self {
            round,
            turn,
            direction,
        }
    }

    /// First round of a freshly started combat.
    pub fn start() -> Self {
        Self::new(1, 0, FORWARD)
    }

    pub fn is_forward(&self) -> bool {
        self.direction >= FORWARD
    }
}
