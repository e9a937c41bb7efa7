// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! NFS Broker Core
//!
//! Service broker for pre-existing NFS and SMB shares: the mount-options
//! engine, broker records and stores, and the HTTP API.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Library behind the `nfsbroker` binary

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
