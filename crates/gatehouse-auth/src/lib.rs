//! # gatehouse-auth
//!
//! Federated sign-in for Gatehouse.
//!
//! This crate provides:
//! - A provider-agnostic OAuth 2.0 client seam with a GitHub implementation
//! - Stateless CSRF state for the authorization-code handshake
//! - Account reconciliation (find-or-create on external identity)
//! - Access token (JWT) and refresh token issuance
//! - The login flow controller and its axum handlers
//!
//! ## Overview
//!
//! A login starts at `GET /login`, which redirects the browser to the
//! provider. The provider calls back on `GET /login/callback` with an
//! authorization code; the code is exchanged for a verified profile, the
//! profile is reconciled against the [`directory::IdentityDirectory`], and a
//! fresh refresh token is appended to the configured success URL.
//!
//! ## Modules
//!
//! - [`config`] - Provider, token and redirect configuration
//! - [`directory`] - Identity directory trait, data model and in-memory backend
//! - [`federation`] - Provider client, GitHub handshake and OAuth state
//! - [`reconcile`] - Account reconciliation
//! - [`token`] - Access and refresh token issuance
//! - [`flow`] - Login flow state machine
//! - [`http`] - Axum HTTP handlers for the login endpoints

pub mod config;
pub mod directory;
pub mod error;
pub mod federation;
pub mod flow;
pub mod http;
pub mod reconcile;
pub mod token;

pub use config::{AuthConfig, ConfigError};
pub use directory::{
    DirectoryError, ExternalIdentity, IdentityDirectory, InMemoryDirectory, RefreshTokenRecord,
    User, UserDraft,
};
pub use error::{AuthError, ErrorCategory};
pub use federation::{GithubProvider, ProfileValue, ProviderClient, ProviderProfile, StateCodec};
pub use flow::{
    AuthFlowController, CallbackOutcome, CallbackParams, FlowState, LoginRedirect, LoginSession,
};
pub use http::{STATE_COOKIE_NAME, login_router};
pub use reconcile::{AccountReconciler, ReconcileAction, Reconciliation};
pub use token::{AccessTokenClaims, IssuedRefreshToken, TokenIssuer};

/// Type alias for authentication results.
pub type AuthResult<T> = Result<T, AuthError>;
