// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Shepherd Drupal scaffold.
//!
//! Shepherd keeps a Drupal project deployable. It generates the Shepherd
//! block of `settings.php` from environment variables, locks and unlocks
//! configuration files around dependency installation, and wraps the usual
//! build and development chores around drush.
//!
//! # See Also
//!
//! 1. [`settings`] for the generated settings block.
//! 2. [`permissions`] for the lock and unlock tables.
//! 3. [`tasks`] for build and development tasks.

pub mod config;
pub mod env;
pub mod exec;
pub mod hook;
pub mod patch;
pub mod permissions;
pub mod settings;
pub mod tasks;
