//! Polls a Lucky reverse proxy for new rules and provisions their domains on
//! Alibaba Cloud ESA, optionally chaining a CNAME into alidns or DNSPod.

pub mod dns;
pub mod provision;
pub mod rate_limit;
pub mod resolver;
pub mod rule;
pub mod scheduler;
pub mod settings;
pub mod source;

pub use scheduler::{CycleOutcome, Scheduler};
pub use settings::{ConfigStore, FileConfigStore};
