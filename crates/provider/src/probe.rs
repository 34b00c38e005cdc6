//! Source location reachability.

use std::time::Duration;

use async_trait::async_trait;

use stack::ProviderError;

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Checks that a project's source location can be fetched.
#[async_trait]
pub trait SourceProbe: Send + Sync {
    async fn check(&self, location: &str) -> Result<(), ProviderError>;
}

/// Probes a location with an HTTP `GET`, following redirects.
#[derive(Debug, Clone)]
pub struct HttpSourceProbe {
    client: reqwest::Client,
}

impl HttpSourceProbe {
    pub fn new() -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .user_agent(concat!("codebuild-stack/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SourceProbe for HttpSourceProbe {
    async fn check(&self, location: &str) -> Result<(), ProviderError> {
        let unreachable = |reason: String| ProviderError::Unreachable {
            location: location.to_string(),
            reason,
        };

        let response = self
            .client
            .get(location)
            .send()
            .await
            .map_err(|e| unreachable(e.to_string()))?;
        let status = response.status();
        tracing::debug!(location, %status, "probed source location");
        if status.is_success() {
            Ok(())
        } else {
            Err(unreachable(format!("HTTP {status}")))
        }
    }
}

/// A probe that accepts every location.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProbe;

#[async_trait]
impl SourceProbe for NoProbe {
    async fn check(&self, _location: &str) -> Result<(), ProviderError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_is_object_safe() {
        fn _takes_boxed(_: Box<dyn SourceProbe>) {}
    }

    #[tokio::test]
    async fn unparseable_location_is_unreachable() {
        let probe = HttpSourceProbe::new().unwrap();
        let err = probe.check("not a url").await.unwrap_err();
        assert!(matches!(err, ProviderError::Unreachable { .. }), "got: {err:?}");
    }
}
