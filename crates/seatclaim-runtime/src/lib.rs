// Copyright 2026 Seatclaim Contributors
// SPDX-License-Identifier: Apache-2.0

//! Browser-driven runtime for seatclaim.

pub mod audit;
pub mod browser;
pub mod config;
pub mod runner;
