//! Per-URL startup argument table.
//!
//! Arguments are supplied out of band, consulted once at load time, and not
//! mutable by the running application. Repeated registrations for the same
//! URL append.

use std::collections::HashMap;

use url::Url;

#[derive(Debug, Default)]
pub struct ArgsTable {
    url_to_args: HashMap<Url, Vec<String>>,
}

impl ArgsTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_args_for_url(&mut self, args: Vec<String>, url: Url) {
        self.url_to_args.entry(url).or_default().extend(args);
    }

    /// Arguments registered for `url`; empty if none were.
    pub fn args_for_url(&self, url: &Url) -> Vec<String> {
        self.url_to_args.get(url).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_url_has_no_args() {
        let table = ArgsTable::new();
        assert!(table.args_for_url(&Url::parse("test:app").expect("url")).is_empty());
    }

    #[test]
    fn repeated_registration_appends() {
        let mut table = ArgsTable::new();
        let url = Url::parse("test:app").expect("url");

        table.set_args_for_url(vec!["--one".to_string()], url.clone());
        table.set_args_for_url(vec!["--two".to_string()], url.clone());

        assert_eq!(table.args_for_url(&url), ["--one", "--two"]);
    }
}
