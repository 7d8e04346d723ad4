// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Command implementations of the `filetable` binary

pub mod commands;
pub mod common;
