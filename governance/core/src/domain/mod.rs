// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Mod
//!
//! Pure governance types: task policy and control block, resource tokens,
//! the hierarchy predicate, domain events, configuration and errors.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Types and pure rules. No runtime handles; the only I/O is
//!   configuration loading in `config`

pub mod config;
pub mod error;
pub mod events;
pub mod hierarchy;
pub mod task;
pub mod token;
