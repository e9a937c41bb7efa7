// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the nfsbroker CLI

pub mod resolve;

pub use self::resolve::ResolveArgs;
