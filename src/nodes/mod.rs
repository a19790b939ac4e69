//! Planner data written by workers.

pub mod model;

pub use model::{Category, ContainerRef, Node, NodeType, Recurrence, Relation, RelationKind};
