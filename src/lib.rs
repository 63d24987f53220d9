//! Guided Chat — workflow-driven conversations with a generative agent.

pub mod agent;
pub mod config;
pub mod error;
pub mod handoff;
pub mod llm;
pub mod quality;
pub mod routes;
pub mod session;
pub mod transcript;
pub mod workflow;
