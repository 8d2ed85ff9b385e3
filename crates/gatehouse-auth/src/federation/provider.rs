//! Identity provider client seam.

use async_trait::async_trait;
use url::Url;

use super::error::IdpError;
use super::profile::ProviderProfile;

/// Authorization-code primitives of an OAuth 2.0 provider.
///
/// Constructed once at startup and injected into the flow controller.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Provider name recorded on identity links.
    fn name(&self) -> &str;

    /// Builds the URL the browser is sent to for consent.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint URL cannot be built.
    fn authorization_url(&self, state: &str) -> Result<Url, IdpError>;

    /// Exchanges an authorization code for a verified profile.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider rejects the code or cannot be reached.
    async fn exchange_code(&self, code: &str) -> Result<ProviderProfile, IdpError>;
}
