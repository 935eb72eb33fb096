// SPDX-FileCopyrightText: 2025 Greenbone AG
//
// SPDX-License-Identifier: GPL-2.0-or-later WITH x11vnc-openssl-exception

pub mod acl;
pub mod agent_groups;
pub mod agents;
pub mod config;
pub mod context;
pub mod controller;
pub mod database;
pub mod error;
pub mod ipc;
pub mod scanners;
pub mod sync;
pub mod updater;

#[cfg(test)]
pub(crate) mod test_utils;
