//! Core data types for the flagfeed feedback pipeline
//!
//! This module defines the identifiers, entity keys and message shapes that flow
//! between the resolver, the statistics accumulator and durable storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new random identifier
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Parse an identifier from its string form
            pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

entity_id!(
    /// Stable identifier of a project
    ProjectId
);
entity_id!(
    /// Stable identifier of a variable, unique within its project
    VariableId
);
entity_id!(
    /// Stable identifier of a flag, unique within its project
    FlagId
);

/// Kind of entity the resolver manages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Project,
    Variable,
    Flag,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Project => write!(f, "project"),
            EntityKind::Variable => write!(f, "variable"),
            EntityKind::Flag => write!(f, "flag"),
        }
    }
}

/// Natural key of an entity: (kind, scope, name)
///
/// The scope is absent for projects and holds the owning project for
/// variables and flags. Durable storage enforces uniqueness on (scope, name)
/// per kind, and the identifier cache uses the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityKey {
    pub kind: EntityKind,
    pub scope: Option<ProjectId>,
    pub name: String,
}

impl EntityKey {
    pub fn project(name: impl Into<String>) -> Self {
        Self {
            kind: EntityKind::Project,
            scope: None,
            name: name.into(),
        }
    }

    pub fn variable(project: ProjectId, name: impl Into<String>) -> Self {
        Self {
            kind: EntityKind::Variable,
            scope: Some(project),
            name: name.into(),
        }
    }

    pub fn flag(project: ProjectId, name: impl Into<String>) -> Self {
        Self {
            kind: EntityKind::Flag,
            scope: Some(project),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.scope {
            Some(scope) => write!(f, "{}:{}/{}", self.kind, scope, self.name),
            None => write!(f, "{}:{}", self.kind, self.name),
        }
    }
}

/// Declared type of a variable, fixed at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableType {
    String,
    Number,
    Timestamp,
    Set,
}

impl VariableType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VariableType::String => "string",
            VariableType::Number => "number",
            VariableType::Timestamp => "timestamp",
            VariableType::Set => "set",
        }
    }
}

impl std::fmt::Display for VariableType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for VariableType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "string" => Ok(VariableType::String),
            "number" => Ok(VariableType::Number),
            "timestamp" => Ok(VariableType::Timestamp),
            "set" => Ok(VariableType::Set),
            other => Err(format!("unknown variable type: {:?}", other)),
        }
    }
}

/// Largest counter value durable storage can hold (SQLite INTEGER is i64)
pub const MAX_COUNT: u64 = i64::MAX as u64;

/// Positive/negative evaluation counters
///
/// Addition saturates at [`MAX_COUNT`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    pub positive: u64,
    pub negative: u64,
}

impl Counts {
    pub fn new(positive: u64, negative: u64) -> Self {
        Self { positive, negative }
    }

    pub fn add(&mut self, positive: u64, negative: u64) {
        self.positive = self.positive.saturating_add(positive).min(MAX_COUNT);
        self.negative = self.negative.saturating_add(negative).min(MAX_COUNT);
    }

    pub fn is_zero(&self) -> bool {
        self.positive == 0 && self.negative == 0
    }
}

/// A variable declared by a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableDeclaration {
    pub name: String,
    #[serde(rename = "type")]
    pub var_type: VariableType,
}

/// Evaluation counters reported by a client for one flag and interval
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagUsage {
    pub name: String,
    pub interval: DateTime<Utc>,
    #[serde(default)]
    pub positive_count: u64,
    #[serde(default)]
    pub negative_count: u64,
}

/// One inbound feedback message from a feature-flag client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackBatch {
    pub project: String,
    #[serde(default)]
    pub variables: Vec<VariableDeclaration>,
    #[serde(default)]
    pub flags_usage: Vec<FlagUsage>,
}

/// Snapshot of one drained statistics bucket
///
/// Produced once per bucket by the accumulator and consumed by the merger
/// (or an external durable-write service).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushTask {
    pub flag_id: FlagId,
    pub interval: DateTime<Utc>,
    pub positive_count: u64,
    pub negative_count: u64,
}

impl FlushTask {
    pub fn counts(&self) -> Counts {
        Counts::new(self.positive_count, self.negative_count)
    }
}

/// Durable statistics row for one (flag, interval)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticsRow {
    pub flag_id: FlagId,
    pub interval: DateTime<Utc>,
    pub positive_count: u64,
    pub negative_count: u64,
}
