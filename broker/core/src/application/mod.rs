// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Application Layer
//!
//! Broker use cases and store selection.

pub mod broker;
pub mod repository_factory;
