//! Application loaders and their registry.
//!
//! A loader turns a URL plus the application end of a channel into a running
//! application. Loaders are registered for an exact URL, for a scheme, or as
//! the catch-all default; exact beats scheme beats default, and registration
//! is last-write-wins per key. The registry owns every registered loader
//! until it is replaced.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

use crate::channel::ApplicationEndpoint;

/// Produces a live application bound to `application`.
///
/// There is no return value: success or failure is observed only through the
/// endpoint signalling ready or closing. The call runs on its own task and
/// must not assume it executes on the broker's sequence.
#[async_trait]
pub trait ApplicationLoader: Send + Sync {
    async fn load(&self, url: Url, application: ApplicationEndpoint);
}

#[derive(Default)]
pub struct LoaderRegistry {
    url_to_loader: HashMap<Url, Arc<dyn ApplicationLoader>>,
    scheme_to_loader: HashMap<String, Arc<dyn ApplicationLoader>>,
    default_loader: Option<Arc<dyn ApplicationLoader>>,
}

impl LoaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_loader_for_url(&mut self, loader: Arc<dyn ApplicationLoader>, url: Url) {
        self.url_to_loader.insert(url, loader);
    }

    pub fn set_loader_for_scheme(&mut self, loader: Arc<dyn ApplicationLoader>, scheme: String) {
        self.scheme_to_loader.insert(scheme, loader);
    }

    pub fn set_default_loader(&mut self, loader: Arc<dyn ApplicationLoader>) {
        self.default_loader = Some(loader);
    }

    /// Returns the loader serving `url`, if any.
    ///
    /// `include_default=false` is the probe used before the content-handler
    /// path, so the default loader does not mask it.
    pub fn get_loader(&self, url: &Url, include_default: bool) -> Option<Arc<dyn ApplicationLoader>> {
        if let Some(loader) = self.url_to_loader.get(url) {
            return Some(loader.clone());
        }
        if let Some(loader) = self.scheme_to_loader.get(url.scheme()) {
            return Some(loader.clone());
        }
        if include_default {
            return self.default_loader.clone();
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopLoader;

    #[async_trait]
    impl ApplicationLoader for NoopLoader {
        async fn load(&self, _url: Url, _application: ApplicationEndpoint) {}
    }

    fn loader() -> Arc<dyn ApplicationLoader> {
        Arc::new(NoopLoader)
    }

    fn is_same(found: Option<Arc<dyn ApplicationLoader>>, expected: &Arc<dyn ApplicationLoader>) -> bool {
        found.is_some_and(|l| Arc::ptr_eq(&l, expected))
    }

    #[test]
    fn exact_url_beats_scheme_beats_default() {
        let mut registry = LoaderRegistry::new();
        let url = Url::parse("test:app").expect("url");

        let (exact, scheme, default) = (loader(), loader(), loader());
        registry.set_default_loader(default.clone());
        registry.set_loader_for_scheme(scheme.clone(), "test".to_string());
        registry.set_loader_for_url(exact.clone(), url.clone());

        assert!(is_same(registry.get_loader(&url, true), &exact));
        assert!(is_same(
            registry.get_loader(&Url::parse("test:other").expect("url"), true),
            &scheme
        ));
        assert!(is_same(
            registry.get_loader(&Url::parse("other:app").expect("url"), true),
            &default
        ));
    }

    #[test]
    fn probe_without_default_misses_unmatched_urls() {
        let mut registry = LoaderRegistry::new();
        registry.set_default_loader(loader());

        let url = Url::parse("test:app").expect("url");
        assert!(registry.get_loader(&url, false).is_none());
        assert!(registry.get_loader(&url, true).is_some());
    }

    #[test]
    fn registration_is_last_write_wins() {
        let mut registry = LoaderRegistry::new();
        let url = Url::parse("test:app").expect("url");

        let (first, second) = (loader(), loader());
        registry.set_loader_for_url(first, url.clone());
        registry.set_loader_for_url(second.clone(), url.clone());

        assert!(is_same(registry.get_loader(&url, false), &second));
    }
}
