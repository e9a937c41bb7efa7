// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain Layer
//!
//! Mount-option resolution, the broker's persisted records and the store
//! contract. Nothing in here performs I/O.

pub mod mount_mask;
pub mod mount_options;
pub mod repository;
pub mod service;
