//! Scope tags - structured names for nodes of the scope tree
//!
//! A tag labels a scope with its role (`Database`, `Workflow:order-workflow`,
//! `Window:<id>`) and doubles as the target of ancestor matching: services
//! registered "per matching tag" are shared by every scope below the nearest
//! ancestor whose tag satisfies a [`TagMatcher`].

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Role of a scope in the tree.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ScopeKind {
    Root,
    Database,
    Workflow,
    Window,
    /// Application-defined role, rendered verbatim.
    Custom(String),
}

impl ScopeKind {
    pub fn as_str(&self) -> &str {
        match self {
            ScopeKind::Root => "Root",
            ScopeKind::Database => "Database",
            ScopeKind::Workflow => "Workflow",
            ScopeKind::Window => "Window",
            ScopeKind::Custom(name) => name,
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "Root" => ScopeKind::Root,
            "Database" => ScopeKind::Database,
            "Workflow" => ScopeKind::Workflow,
            "Window" => ScopeKind::Window,
            other => ScopeKind::Custom(other.to_string()),
        }
    }
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable label of a scope: a kind plus an optional discriminator.
///
/// Two tags are equal iff both kind and discriminator match.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ScopeTag {
    kind: ScopeKind,
    discriminator: Option<String>,
}

impl ScopeTag {
    pub fn root() -> Self {
        Self {
            kind: ScopeKind::Root,
            discriminator: None,
        }
    }

    pub fn database() -> Self {
        Self {
            kind: ScopeKind::Database,
            discriminator: None,
        }
    }

    pub fn workflow(name: impl Into<String>) -> Self {
        Self {
            kind: ScopeKind::Workflow,
            discriminator: Some(name.into()),
        }
    }

    pub fn window(id: impl fmt::Display) -> Self {
        Self {
            kind: ScopeKind::Window,
            discriminator: Some(id.to_string()),
        }
    }

    pub fn custom(kind: impl Into<String>, discriminator: Option<String>) -> Self {
        Self {
            kind: ScopeKind::parse(&kind.into()),
            discriminator,
        }
    }

    pub fn kind(&self) -> &ScopeKind {
        &self.kind
    }

    pub fn discriminator(&self) -> Option<&str> {
        self.discriminator.as_deref()
    }

    /// Canonical string key, e.g. `"Database"` or `"Workflow:order-workflow"`.
    pub fn to_key(&self) -> String {
        match &self.discriminator {
            Some(d) => format!("{}:{}", self.kind, d),
            None => self.kind.to_string(),
        }
    }
}

impl fmt::Display for ScopeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.discriminator {
            Some(d) => write!(f, "{}:{}", self.kind, d),
            None => write!(f, "{}", self.kind),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TagParseError {
    #[error("scope tag key is empty")]
    Empty,
    #[error("scope tag '{0}' has an empty kind")]
    EmptyKind(String),
}

impl FromStr for ScopeTag {
    type Err = TagParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(TagParseError::Empty);
        }
        // Only the first ':' separates kind from discriminator; window ids and
        // workflow names may contain further colons.
        let (kind, discriminator) = match s.split_once(':') {
            Some((k, d)) => (k, Some(d.to_string())),
            None => (s, None),
        };
        if kind.is_empty() {
            return Err(TagParseError::EmptyKind(s.to_string()));
        }
        Ok(Self {
            kind: ScopeKind::parse(kind),
            discriminator,
        })
    }
}

/// Predicate over scope tags used for ancestor matching.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TagMatcher {
    /// Any tag of the given kind, whatever its discriminator.
    Kind(ScopeKind),
    /// Exactly this tag.
    Exact(ScopeTag),
}

impl TagMatcher {
    pub fn kind(kind: ScopeKind) -> Self {
        TagMatcher::Kind(kind)
    }

    pub fn exact(tag: ScopeTag) -> Self {
        TagMatcher::Exact(tag)
    }

    pub fn matches(&self, tag: &ScopeTag) -> bool {
        match self {
            TagMatcher::Kind(kind) => tag.kind() == kind,
            TagMatcher::Exact(expected) => expected == tag,
        }
    }

    /// Stable predicate id.
    pub fn key(&self) -> String {
        match self {
            TagMatcher::Kind(kind) => format!("kind={kind}"),
            TagMatcher::Exact(tag) => format!("tag={tag}"),
        }
    }
}

impl fmt::Display for TagMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_render_kind_and_discriminator() {
        assert_eq!(ScopeTag::root().to_key(), "Root");
        assert_eq!(ScopeTag::database().to_key(), "Database");
        assert_eq!(
            ScopeTag::workflow("order-workflow").to_key(),
            "Workflow:order-workflow"
        );
        assert_eq!(ScopeTag::window("42").to_string(), "Window:42");
    }

    #[test]
    fn parse_round_trips_constructors() {
        for tag in [
            ScopeTag::root(),
            ScopeTag::database(),
            ScopeTag::workflow("x"),
            ScopeTag::window("a:b"),
            ScopeTag::custom("Report", Some("monthly".into())),
        ] {
            let parsed: ScopeTag = tag.to_key().parse().unwrap();
            assert_eq!(parsed, tag);
        }
    }

    #[test]
    fn parse_rejects_empty_input() {
        assert_eq!("".parse::<ScopeTag>().unwrap_err(), TagParseError::Empty);
        assert!(matches!(
            ":x".parse::<ScopeTag>().unwrap_err(),
            TagParseError::EmptyKind(_)
        ));
    }

    #[test]
    fn equality_needs_kind_and_discriminator() {
        assert_eq!(ScopeTag::workflow("x"), ScopeTag::workflow("x"));
        assert_ne!(ScopeTag::workflow("x"), ScopeTag::workflow("y"));
        assert_ne!(
            ScopeTag::workflow("x"),
            ScopeTag::custom("Report", Some("x".into()))
        );
    }

    #[test]
    fn kind_matcher_ignores_discriminator() {
        let m = TagMatcher::kind(ScopeKind::Workflow);
        assert!(m.matches(&ScopeTag::workflow("x")));
        assert!(m.matches(&ScopeTag::workflow("y")));
        assert!(!m.matches(&ScopeTag::database()));

        let exact = TagMatcher::exact(ScopeTag::workflow("x"));
        assert!(exact.matches(&ScopeTag::workflow("x")));
        assert!(!exact.matches(&ScopeTag::workflow("y")));
        assert_ne!(m.key(), exact.key());
    }
}
