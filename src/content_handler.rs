//! Content-handler registration and connection cache entries.
//!
//! A content handler is a secondary application that interprets fetched
//! content the broker cannot load natively. The registry maps mime types to
//! handler URLs; the broker keeps one connection per handler URL so a single
//! handler instance serves many content loads.

use std::collections::HashMap;

use url::Url;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct ContentHandlerRegistry {
    mime_to_url: HashMap<String, Url>,
}

impl ContentHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler_url` for `mime_type`, replacing any previous entry.
    pub fn set_handler(&mut self, mime_type: String, handler_url: Url) {
        self.mime_to_url.insert(mime_type, handler_url);
    }

    pub fn handler_for(&self, mime_type: &str) -> Option<&Url> {
        self.mime_to_url.get(mime_type)
    }
}

/// Cache entry tying a handler URL to the running instance serving it.
///
/// Invalidated when that instance errors; loads still routed through it fail.
#[derive(Debug, Clone)]
pub(crate) struct ContentHandlerConnection {
    pub handler_url: Url,
    pub instance_id: Uuid,
}
