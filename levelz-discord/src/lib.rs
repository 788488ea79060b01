//! # levelz-discord: chat bot integration for levelz
//!
//! This crate connects the platform-agnostic `levelz-core` engine to a chat
//! bot's event loop.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │              Bot event loop              │
//! │  ┌────────────────────────────────────┐  │
//! │  │          levelz-discord            │  │
//! │  │  ┌──────────┐  ┌───────────────┐   │  │
//! │  │  │  Hooks   │  │    Systems    │   │  │
//! │  │  └────┬─────┘  └───────┬───────┘   │  │
//! │  │       │                │           │  │
//! │  │       ▼                ▼           │  │
//! │  │  ┌─────────────────────────────┐   │  │
//! │  │  │         levelz-core         │   │  │
//! │  │  └─────────────────────────────┘   │  │
//! │  │  ┌─────────────────────────────┐   │  │
//! │  │  │ Effects (roles, alerts)     │   │  │
//! │  │  └─────────────────────────────┘   │  │
//! │  └────────────────────────────────────┘  │
//! └──────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - `events`: inbound message events
//! - `hooks`: per-message entry point
//! - `effects`: role and alert collaborators and how outcomes are applied
//! - `systems`: the periodic flush task
//! - `recording`: in-memory collaborators for the simulator and tests
//! - `telemetry`: tracing subscriber setup

#![deny(clippy::unwrap_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod effects;
pub mod error;
pub mod events;
pub mod hooks;
pub mod recording;
pub mod systems;
pub mod telemetry;

pub use config::BotConfig;
pub use error::{DiscordError, Result};
pub use events::MessageEvent;
pub use hooks::LevelingHook;
