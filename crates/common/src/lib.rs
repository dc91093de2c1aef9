// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
// SPDX-License-Identifier: AGPL-3.0
//! SDB Common - Shared functionality for SDB components
//!
//! This crate provides shared utilities used by both the sdb binary
//! and the engine crate, including the wire message types exchanged over
//! the breakpoint pipe, logging setup and environment variable names.

pub mod env;
pub mod expression;
pub mod logging;
pub mod types;

pub use expression::*;
pub use types::*;
