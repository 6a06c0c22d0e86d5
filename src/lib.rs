//! barrage: a programmable load generator.
//!
//! Users pair ammo from a [`ammo::Provider`] with ticks from a
//! [`schedule::Schedule`], fire each through a [`gun::Gun`], and hand the
//! timing [`sample::Sample`] to an [`aggregate::Aggregator`]. Pools of
//! users are wired from JSON by [`config::Registry`] and run by
//! [`engine::Engine`].

pub mod aggregate;
pub mod ammo;
pub mod config;
pub mod engine;
pub mod error;
pub mod gun;
pub mod pool;
pub mod sample;
pub mod schedule;
pub mod target;
pub mod user;

pub use config::{GlobalConfig, Registry};
pub use engine::Engine;
pub use error::{Error, Result};
