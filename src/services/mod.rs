// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod health_data;
pub mod oauth;
pub mod pkce;
pub mod sessions;
pub mod tokens;

pub use oauth::{ProviderClient, ProviderRegistry, ProviderService};
pub use sessions::{IssuedTokens, SessionService};
