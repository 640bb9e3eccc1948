// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! OIDC Session Gateway - Authorization Code login with stateless sessions
//!
//! This crate signs browsers in through an external OAuth2 / OpenID Connect
//! identity provider and keeps the provider-signed identity token as the
//! session, re-verified locally on every request.
//!
//! ## Modules
//!
//! - `api` - HTTP API handlers (Axum)
//! - `auth` - Key set cache, token verification, code exchange, session cookie
//! - `config` - Startup configuration
//! - `state` - Shared application state

pub mod api;
pub mod auth;
pub mod config;
pub mod state;
