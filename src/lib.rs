// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! mHearts API: account sessions and wearable provider linking.
//!
//! This crate provides the backend API that issues the app's own
//! access/refresh token pair and brokers OAuth2 + PKCE connections to
//! external health providers (Fitbit, Omron).

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use config::Config;
use db::CredentialStore;
use services::{ProviderRegistry, SessionService};
use std::sync::Arc;
use time_utils::Clock;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn CredentialStore>,
    pub clock: Arc<dyn Clock>,
    pub sessions: SessionService,
    pub providers: ProviderRegistry,
}

impl AppState {
    /// Wire the services over a store and clock.
    pub fn new(
        config: Config,
        store: Arc<dyn CredentialStore>,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        let sessions = SessionService::new(&config, store.clone(), clock.clone());
        let providers = ProviderRegistry::from_config(&config, store.clone(), clock.clone())?;

        Ok(Self {
            config,
            store,
            clock,
            sessions,
            providers,
        })
    }
}
