//! Plugin orchestration, workflow engine, and checkpoint store for Probekit.
//!
//! This crate defines the "ports" (the plugin contract and the checkpoint
//! repository trait) and the business logic that drives them. It depends only
//! on `probekit-types` -- never on `probekit-infra` or any database crate.

pub mod checkpoint;
pub mod engine;
pub mod orchestrator;
pub mod plugin;
pub mod repository;

#[cfg(test)]
mod test_support;
