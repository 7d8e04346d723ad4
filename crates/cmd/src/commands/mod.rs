// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

pub mod convert;
pub mod partitions;
pub mod prune;
pub mod query;
pub mod tables;

pub use convert::convert_command;
pub use partitions::partitions_command;
pub use prune::prune_command;
pub use query::{OutputFormat, query_command};
pub use tables::tables_command;
