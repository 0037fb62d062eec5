//! Embedder callbacks consumed by the broker.

use url::Url;

/// Hooks implemented by the embedding environment.
///
/// `resolve_url` must be idempotent and side-effect free: it runs before
/// every loader and instance-table lookup so that aliases never fragment
/// instance identity.
pub trait BrokerDelegate: Send + Sync {
    /// Called when the application holding the other end of a shell channel
    /// goes away.
    fn on_application_error(&self, _url: &Url) {}

    /// Maps a requested URL to its canonical form.
    fn resolve_url(&self, url: &Url) -> Url {
        url.clone()
    }
}

/// Identity delegate used when the embedder supplies none.
#[derive(Debug, Default)]
pub struct DefaultDelegate;

impl BrokerDelegate for DefaultDelegate {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_resolution_is_identity_and_idempotent() {
        let delegate = DefaultDelegate;
        let url = Url::parse("test:app").expect("url");
        let once = delegate.resolve_url(&url);
        assert_eq!(once, url);
        assert_eq!(delegate.resolve_url(&once), once);
    }
}
