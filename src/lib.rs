//! Planner agent: intent classification, slot filling and a durable job
//! queue feeding task, calendar and project workers.

pub mod agent;
pub mod api;
pub mod config;
pub mod error;
pub mod jobs;
pub mod llm;
pub mod nodes;
pub mod store;
pub mod workers;
