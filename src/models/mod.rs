// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod goals;
pub mod provider;
pub mod session;
pub mod user;

pub use goals::Goals;
pub use provider::{PendingAuthorization, Provider, ProviderLink, ProviderTokens};
pub use session::RefreshSession;
pub use user::{UserRecord, UserResponse};
