//! `Cache-Control` directives.

use http::HeaderMap;
use http::header::CACHE_CONTROL;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    NoCache,
    NoStore,
    Private,
    Public,
    MustRevalidate,
    ProxyRevalidate,
    OnlyIfCached,
    MaxAge(u64),
    SMaxAge(u64),
    MinFresh(u64),
    /// `max-stale` with an optional limit in seconds
    MaxStale(Option<u64>),
    /// a known directive with an unparsable argument
    Malformed(String),
    Extension(String),
}

impl Directive {
    pub fn parse(directive: &str) -> Self {
        let directive = directive.trim();
        let (name, value) = match directive.split_once('=') {
            Some((name, value)) => (name.trim(), Some(value.trim().trim_matches('"'))),
            None => (directive, None),
        };

        let seconds = |value: Option<&str>| value.and_then(|value| value.parse::<u64>().ok());
        let malformed = || Directive::Malformed(directive.to_string());

        match (name.to_ascii_lowercase().as_str(), value) {
            ("no-cache", _) => Directive::NoCache,
            ("no-store", _) => Directive::NoStore,
            ("private", _) => Directive::Private,
            ("public", _) => Directive::Public,
            ("must-revalidate", _) => Directive::MustRevalidate,
            ("proxy-revalidate", _) => Directive::ProxyRevalidate,
            ("only-if-cached", _) => Directive::OnlyIfCached,
            ("max-age", value) => seconds(value).map_or_else(malformed, Directive::MaxAge),
            ("s-maxage", value) => seconds(value).map_or_else(malformed, Directive::SMaxAge),
            ("min-fresh", value) => seconds(value).map_or_else(malformed, Directive::MinFresh),
            ("max-stale", None) => Directive::MaxStale(None),
            ("max-stale", value) => seconds(value).map_or_else(malformed, |limit| Directive::MaxStale(Some(limit))),
            _ => Directive::Extension(directive.to_string()),
        }
    }

    pub fn is_no_cache(&self) -> bool {
        matches!(self, Directive::NoCache | Directive::NoStore)
    }
}

/// All directives of all `Cache-Control` headers, in order.
///
/// Returns `None` if there is no `Cache-Control` header.
pub fn cache_control(headers: &HeaderMap) -> Option<Vec<Directive>> {
    let mut values = headers.get_all(CACHE_CONTROL).iter().peekable();
    values.peek()?;

    let directives = values
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter(|directive| !directive.trim().is_empty())
        .map(Directive::parse)
        .collect();
    Some(directives)
}

/// Renders directives back into a header value.
pub fn render(directives: &[Directive]) -> String {
    directives
        .iter()
        .map(|directive| match directive {
            Directive::NoCache => "no-cache".to_string(),
            Directive::NoStore => "no-store".to_string(),
            Directive::Private => "private".to_string(),
            Directive::Public => "public".to_string(),
            Directive::MustRevalidate => "must-revalidate".to_string(),
            Directive::ProxyRevalidate => "proxy-revalidate".to_string(),
            Directive::OnlyIfCached => "only-if-cached".to_string(),
            Directive::MaxAge(seconds) => format!("max-age={seconds}"),
            Directive::SMaxAge(seconds) => format!("s-maxage={seconds}"),
            Directive::MinFresh(seconds) => format!("min-fresh={seconds}"),
            Directive::MaxStale(None) => "max-stale".to_string(),
            Directive::MaxStale(Some(seconds)) => format!("max-stale={seconds}"),
            Directive::Malformed(raw) | Directive::Extension(raw) => raw.clone(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}
