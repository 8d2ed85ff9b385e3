//! External identity provider federation.
//!
//! This module provides:
//!
//! - The [`ProviderClient`] seam for authorization-code providers
//! - A GitHub implementation
//! - Verified profiles with named fallbacks for optional fields
//! - Signed, stateless OAuth `state` values

pub mod error;
pub mod github;
pub mod profile;
pub mod provider;
pub mod state;

pub use error::IdpError;
pub use github::GithubProvider;
pub use profile::{
    ProfileValue, ProviderProfile, best_effort_avatar, best_effort_display_name,
    best_effort_email,
};
pub use provider::ProviderClient;
pub use state::{IssuedState, STATE_AUDIENCE, StateCodec};
