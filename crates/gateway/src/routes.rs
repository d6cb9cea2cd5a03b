//! Route registry: one set of patterns per transport kind and auth class.
//!
//! The table is filled once at startup and only read afterwards, so it is
//! shared behind an `Arc` without locking.

use std::{
    collections::{HashMap, HashSet},
    fmt,
};

use serde::Serialize;

use crate::{
    error::{ResolveError, RouteError},
    handler::{Endpoint, Handler},
};

// ── Classification ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransportKind {
    Html,
    Xhr,
    Ws,
    File,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Html => "HTML",
            Self::Xhr => "XHR",
            Self::Ws => "WS",
            Self::File => "FILE",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum AuthClass {
    Public,
    Authenticated,
}

impl fmt::Display for AuthClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Public => "Public",
            Self::Authenticated => "Authd",
        })
    }
}

fn accepts(kind: TransportKind, endpoint: &Endpoint) -> bool {
    matches!(
        (kind, endpoint),
        (TransportKind::Html | TransportKind::File, Endpoint::Page(_))
            | (TransportKind::Xhr, Endpoint::Xhr(_))
            | (TransportKind::Ws, Endpoint::Ws(_))
    )
}

// ── Patterns ─────────────────────────────────────────────────────────────────

/// Expand `|`-separated synonyms: `"/about|/about-us"` → `["/about", "/about-us"]`.
pub fn route_synonyms(pattern: &str) -> Vec<String> {
    pattern
        .split('|')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    Rest(String),
}

/// A parsed path template.
///
/// `{name}` captures one non-empty segment; `{name*}` in last position
/// captures the remainder of the path. A trailing slash is ignored except on
/// the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    normalized: String,
    segments: Vec<Segment>,
}

fn normalize(path: &str) -> &str {
    if path.len() > 1 {
        path.strip_suffix('/').unwrap_or(path)
    } else {
        path
    }
}

fn split_segments(path: &str) -> impl Iterator<Item = &str> {
    normalize(path)
        .strip_prefix('/')
        .unwrap_or_default()
        .split('/')
        .filter(|s| !s.is_empty())
}

impl PathPattern {
    pub fn parse(raw: &str) -> Result<Self, RouteError> {
        let invalid = |reason| RouteError::InvalidPattern {
            pattern: raw.to_string(),
            reason,
        };
        if !raw.starts_with('/') {
            return Err(invalid("must start with '/'"));
        }
        if raw.contains('|') {
            return Err(invalid("synonyms must be expanded before registration"));
        }

        let parts: Vec<&str> = split_segments(raw).collect();
        let mut segments = Vec::with_capacity(parts.len());
        for (i, part) in parts.iter().enumerate() {
            let segment = match part.strip_prefix('{') {
                Some(inner) => {
                    let name = inner
                        .strip_suffix('}')
                        .ok_or_else(|| invalid("unterminated '{'"))?;
                    if let Some(rest) = name.strip_suffix('*') {
                        if i + 1 != parts.len() {
                            return Err(invalid("'{name*}' must be the last segment"));
                        }
                        Segment::Rest(rest.to_string())
                    } else {
                        Segment::Param(name.to_string())
                    }
                },
                None if part.contains('{') || part.contains('}') => {
                    return Err(invalid("braces must wrap a whole segment"));
                },
                None => Segment::Literal((*part).to_string()),
            };
            if let Segment::Param(n) | Segment::Rest(n) = &segment
                && (n.is_empty() || n.contains(['{', '}', '*']))
            {
                return Err(invalid("empty or malformed parameter name"));
            }
            segments.push(segment);
        }

        Ok(Self {
            normalized: normalize(raw).to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.normalized
    }

    pub fn is_exact(&self) -> bool {
        self.segments
            .iter()
            .all(|s| matches!(s, Segment::Literal(_)))
    }

    /// Captured parameters when `path` matches.
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let parts: Vec<&str> = split_segments(path).collect();
        let mut params = HashMap::new();
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Literal(lit) => {
                    if parts.get(i) != Some(&lit.as_str()) {
                        return None;
                    }
                },
                Segment::Param(name) => {
                    params.insert(name.clone(), (*parts.get(i)?).to_string());
                },
                Segment::Rest(name) => {
                    if parts.len() <= i {
                        return None;
                    }
                    params.insert(name.clone(), parts[i..].join("/"));
                    return Some(params);
                },
            }
        }
        (parts.len() == self.segments.len()).then_some(params)
    }
}

// ── Table ────────────────────────────────────────────────────────────────────

struct RouteEntry {
    pattern: PathPattern,
    kind: TransportKind,
    class: AuthClass,
    handler: Handler,
}

/// Result of resolving a request path.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub handler: Handler,
    pub class: AuthClass,
    pub pattern: String,
    pub params: HashMap<String, String>,
    /// True when this is the HTML not-found handler.
    pub fallback: bool,
}

/// Reporting-only projection of a registered route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteSummaryEntry {
    /// e.g. "HTML Authd", "HTML Not Found".
    pub group: String,
    pub pattern: String,
    pub handler: String,
    pub module: String,
    #[serde(skip)]
    rank: u8,
}

fn group_rank(kind: TransportKind, class: AuthClass) -> u8 {
    let base = match kind {
        TransportKind::Html => 0,
        TransportKind::Xhr => 2,
        TransportKind::Ws => 4,
        TransportKind::File => 6,
    };
    base + u8::from(class == AuthClass::Authenticated)
}

const NOT_FOUND_RANK: u8 = 8;

#[derive(Default)]
pub struct RouteTable {
    routes: Vec<RouteEntry>,
    /// (kind, normalized pattern) → route indices, for literal patterns.
    exact: HashMap<(TransportKind, String), Vec<usize>>,
    keys: HashSet<(TransportKind, AuthClass, String)>,
    summary: Vec<RouteSummaryEntry>,
    not_found: Option<Handler>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one pattern. The first registration of a
    /// (pattern, kind, class) tuple wins; later ones fail.
    pub fn register(
        &mut self,
        pattern: &str,
        kind: TransportKind,
        class: AuthClass,
        handler: Handler,
    ) -> Result<(), RouteError> {
        self.register_with_synonyms(&[pattern], kind, class, handler)
    }

    /// Register every pattern for the same handler. Either all patterns are
    /// registered or none is.
    pub fn register_with_synonyms<S: AsRef<str>>(
        &mut self,
        patterns: &[S],
        kind: TransportKind,
        class: AuthClass,
        handler: Handler,
    ) -> Result<(), RouteError> {
        let Some(first) = patterns.first() else {
            return Err(RouteError::InvalidPattern {
                pattern: String::new(),
                reason: "no pattern given",
            });
        };
        if !accepts(kind, handler.endpoint()) {
            return Err(RouteError::EndpointMismatch {
                pattern: first.as_ref().to_string(),
                kind,
                handler: handler.name().to_string(),
                endpoint: handler.endpoint().kind_name(),
            });
        }
        if kind == TransportKind::File && class == AuthClass::Authenticated {
            return Err(RouteError::FilePublicOnly {
                pattern: first.as_ref().to_string(),
            });
        }

        let mut parsed: Vec<PathPattern> = Vec::with_capacity(patterns.len());
        for raw in patterns {
            let pattern = PathPattern::parse(raw.as_ref())?;
            let key = (kind, class, pattern.as_str().to_string());
            if self.keys.contains(&key) || parsed.iter().any(|p| p == &pattern) {
                return Err(RouteError::Duplicate {
                    pattern: pattern.as_str().to_string(),
                    kind,
                    class,
                });
            }
            parsed.push(pattern);
        }

        self.summary.push(RouteSummaryEntry {
            group: format!("{kind} {class}"),
            pattern: patterns
                .iter()
                .map(|p| p.as_ref())
                .collect::<Vec<_>>()
                .join("|"),
            handler: handler.name().to_string(),
            module: handler.module().to_string(),
            rank: group_rank(kind, class),
        });

        for pattern in parsed {
            let index = self.routes.len();
            self.keys
                .insert((kind, class, pattern.as_str().to_string()));
            if pattern.is_exact() {
                self.exact
                    .entry((kind, pattern.as_str().to_string()))
                    .or_default()
                    .push(index);
            }
            self.routes.push(RouteEntry {
                pattern,
                kind,
                class,
                handler: handler.clone(),
            });
        }
        Ok(())
    }

    /// Register map-style entries whose keys may hold `|` synonyms.
    pub fn register_all(
        &mut self,
        kind: TransportKind,
        class: AuthClass,
        entries: impl IntoIterator<Item = (String, Handler)>,
    ) -> Result<(), RouteError> {
        for (pattern, handler) in entries {
            self.register_with_synonyms(&route_synonyms(&pattern), kind, class, handler)?;
        }
        Ok(())
    }

    /// Handler for HTML requests nothing else matched.
    pub fn set_not_found(&mut self, handler: Handler) -> Result<(), RouteError> {
        if !matches!(handler.endpoint(), Endpoint::Page(_)) {
            return Err(RouteError::EndpointMismatch {
                pattern: "*".into(),
                kind: TransportKind::Html,
                handler: handler.name().to_string(),
                endpoint: handler.endpoint().kind_name(),
            });
        }
        self.summary.retain(|e| e.rank != NOT_FOUND_RANK);
        self.summary.push(RouteSummaryEntry {
            group: "HTML Not Found".into(),
            pattern: "*".into(),
            handler: handler.name().to_string(),
            module: handler.module().to_string(),
            rank: NOT_FOUND_RANK,
        });
        self.not_found = Some(handler);
        Ok(())
    }

    /// Match `path` against `kind` routes only, without the not-found fallback.
    ///
    /// Literal patterns win over templates; templates are tried in
    /// registration order. For the same pattern, Public wins over
    /// Authenticated.
    pub fn lookup(&self, kind: TransportKind, path: &str) -> Option<RouteMatch> {
        if let Some(indices) = self.exact.get(&(kind, normalize(path).to_string())) {
            let best = indices
                .iter()
                .map(|&i| &self.routes[i])
                .min_by_key(|r| r.class)?;
            return Some(RouteMatch {
                handler: best.handler.clone(),
                class: best.class,
                pattern: best.pattern.as_str().to_string(),
                params: HashMap::new(),
                fallback: false,
            });
        }

        [AuthClass::Public, AuthClass::Authenticated]
            .into_iter()
            .find_map(|class| {
                self.routes
                    .iter()
                    .filter(|r| r.kind == kind && r.class == class && !r.pattern.is_exact())
                    .find_map(|r| {
                        r.pattern.matches(path).map(|params| RouteMatch {
                            handler: r.handler.clone(),
                            class: r.class,
                            pattern: r.pattern.as_str().to_string(),
                            params,
                            fallback: false,
                        })
                    })
            })
    }

    /// Match `path`; HTML falls back to the not-found handler.
    pub fn resolve(&self, kind: TransportKind, path: &str) -> Result<RouteMatch, ResolveError> {
        if let Some(found) = self.lookup(kind, path) {
            return Ok(found);
        }
        match (&self.not_found, kind) {
            (Some(handler), TransportKind::Html) => Ok(RouteMatch {
                handler: handler.clone(),
                class: AuthClass::Public,
                pattern: "*".into(),
                params: HashMap::new(),
                fallback: true,
            }),
            _ => Err(ResolveError::NotFound {
                kind,
                path: path.to_string(),
            }),
        }
    }

    /// Registered routes grouped HTML, XHR, WS, FILE (public before
    /// authenticated) and then the not-found handler. Insertion order is kept
    /// within each group and synonyms share one entry.
    pub fn summarize(&self) -> Vec<RouteSummaryEntry> {
        let mut entries = self.summary.clone();
        entries.sort_by_key(|e| e.rank);
        entries
    }

    /// Number of concrete patterns (synonyms counted separately).
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use {axum::response::IntoResponse, serde_json::json};

    use {super::*, crate::handler::ProcRegistry};

    fn page(name: &str) -> Handler {
        Handler::page(name, module_path!(), |_ctx| async { "page".into_response() })
    }

    fn xhr(name: &str) -> Handler {
        Handler::xhr(name, module_path!(), |_ctx| async { Ok(json!({})) })
    }

    #[test]
    fn synonyms_split_on_pipe() {
        assert_eq!(route_synonyms("/about|/about-us"), vec!["/about", "/about-us"]);
        assert_eq!(route_synonyms("/home"), vec!["/home"]);
        assert_eq!(route_synonyms(" /a | /b |"), vec!["/a", "/b"]);
    }

    #[test]
    fn pattern_parsing_rejects_malformed() {
        for bad in ["home", "/a/{id", "/a/x{id}", "/{}", "/{rest*}/tail", "/a|/b"] {
            assert!(
                matches!(PathPattern::parse(bad), Err(RouteError::InvalidPattern { .. })),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn templated_patterns_capture() {
        let p = PathPattern::parse("/users/{id}/posts/{post}").unwrap();
        let params = p.matches("/users/7/posts/42").unwrap();
        assert_eq!(params["id"], "7");
        assert_eq!(params["post"], "42");
        assert!(p.matches("/users/7/posts").is_none());
        assert!(p.matches("/users/7/posts/42/extra").is_none());

        let rest = PathPattern::parse("/static/{path*}").unwrap();
        assert_eq!(rest.matches("/static/css/app.css").unwrap()["path"], "css/app.css");
        assert!(rest.matches("/static").is_none());
    }

    #[test]
    fn trailing_slash_is_ignored_except_root() {
        let p = PathPattern::parse("/about/").unwrap();
        assert_eq!(p.as_str(), "/about");
        assert!(p.matches("/about").is_some());
        assert!(p.matches("/about/").is_some());

        let root = PathPattern::parse("/").unwrap();
        assert!(root.matches("/").is_some());
        assert!(root.matches("/x").is_none());
    }

    #[test]
    fn resolve_returns_exact_registered_handler() {
        let mut table = RouteTable::new();
        let home = page("home");
        let me = xhr("me");
        table
            .register("/home", TransportKind::Html, AuthClass::Public, home.clone())
            .unwrap();
        table
            .register("/api/me", TransportKind::Xhr, AuthClass::Authenticated, me.clone())
            .unwrap();

        let found = table.resolve(TransportKind::Html, "/home").unwrap();
        assert!(found.handler.same_as(&home));
        assert_eq!(found.class, AuthClass::Public);

        let found = table.resolve(TransportKind::Xhr, "/api/me").unwrap();
        assert!(found.handler.same_as(&me));
        assert_eq!(found.class, AuthClass::Authenticated);

        // Kinds do not leak into each other.
        assert!(table.lookup(TransportKind::Xhr, "/home").is_none());
    }

    #[test]
    fn duplicate_registration_fails_and_first_stays() {
        let mut table = RouteTable::new();
        let first = page("first");
        table
            .register("/home", TransportKind::Html, AuthClass::Public, first.clone())
            .unwrap();
        let err = table
            .register("/home/", TransportKind::Html, AuthClass::Public, page("second"))
            .unwrap_err();
        assert_eq!(err, RouteError::Duplicate {
            pattern: "/home".into(),
            kind: TransportKind::Html,
            class: AuthClass::Public,
        });
        let found = table.resolve(TransportKind::Html, "/home").unwrap();
        assert!(found.handler.same_as(&first));

        // Same pattern under another class is a different route.
        table
            .register("/home", TransportKind::Html, AuthClass::Authenticated, page("authd"))
            .unwrap();
    }

    #[test]
    fn public_wins_over_authenticated_for_same_pattern() {
        let mut table = RouteTable::new();
        let authd = page("authd");
        let public = page("public");
        table
            .register("/both", TransportKind::Html, AuthClass::Authenticated, authd)
            .unwrap();
        table
            .register("/both", TransportKind::Html, AuthClass::Public, public.clone())
            .unwrap();
        assert!(table.resolve(TransportKind::Html, "/both").unwrap().handler.same_as(&public));
    }

    #[test]
    fn synonyms_share_one_handler() {
        let mut table = RouteTable::new();
        let home = page("home");
        table
            .register_with_synonyms(
                &["/home", "/", "/index"],
                TransportKind::Html,
                AuthClass::Public,
                home.clone(),
            )
            .unwrap();
        for path in ["/home", "/", "/index"] {
            let found = table.resolve(TransportKind::Html, path).unwrap();
            assert!(found.handler.same_as(&home), "{path} should resolve to home");
        }
        assert_eq!(table.len(), 3);
        assert_eq!(table.summarize().len(), 1);
        assert_eq!(table.summarize()[0].pattern, "/home|/|/index");
    }

    #[test]
    fn synonym_registration_is_all_or_nothing() {
        let mut table = RouteTable::new();
        table
            .register("/b", TransportKind::Html, AuthClass::Public, page("b"))
            .unwrap();
        let err = table.register_with_synonyms(
            &["/a", "/b"],
            TransportKind::Html,
            AuthClass::Public,
            page("ab"),
        );
        assert!(matches!(err, Err(RouteError::Duplicate { .. })));
        assert!(table.lookup(TransportKind::Html, "/a").is_none());
    }

    #[test]
    fn exact_beats_template_and_templates_keep_order() {
        let mut table = RouteTable::new();
        let by_id = page("by_id");
        let new = page("new");
        let catch_all = page("catch_all");
        table
            .register("/items/{id}", TransportKind::Html, AuthClass::Public, by_id.clone())
            .unwrap();
        table
            .register("/items/{rest*}", TransportKind::Html, AuthClass::Public, catch_all.clone())
            .unwrap();
        table
            .register("/items/new", TransportKind::Html, AuthClass::Public, new.clone())
            .unwrap();

        assert!(table.resolve(TransportKind::Html, "/items/new").unwrap().handler.same_as(&new));
        let found = table.resolve(TransportKind::Html, "/items/9").unwrap();
        assert!(found.handler.same_as(&by_id));
        assert_eq!(found.params["id"], "9");
        assert!(
            table
                .resolve(TransportKind::Html, "/items/9/edit")
                .unwrap()
                .handler
                .same_as(&catch_all)
        );
    }

    #[test]
    fn html_falls_back_to_not_found_other_kinds_error() {
        let mut table = RouteTable::new();
        assert!(table.resolve(TransportKind::Html, "/missing").is_err());

        let nf = page("not_found");
        table.set_not_found(nf.clone()).unwrap();
        let found = table.resolve(TransportKind::Html, "/missing").unwrap();
        assert!(found.fallback);
        assert!(found.handler.same_as(&nf));

        assert_eq!(
            table.resolve(TransportKind::Xhr, "/missing").unwrap_err(),
            ResolveError::NotFound {
                kind: TransportKind::Xhr,
                path: "/missing".into()
            }
        );
        assert!(table.resolve(TransportKind::Ws, "/missing").is_err());
    }

    #[test]
    fn endpoint_must_fit_kind() {
        let mut table = RouteTable::new();
        let err = table
            .register("/api/x", TransportKind::Xhr, AuthClass::Public, page("p"))
            .unwrap_err();
        assert!(matches!(err, RouteError::EndpointMismatch { endpoint: "page", .. }));

        let ws = Handler::ws("live", module_path!(), ProcRegistry::new());
        assert!(table.register("/ws", TransportKind::Html, AuthClass::Public, ws.clone()).is_err());
        assert!(table.register("/ws", TransportKind::Ws, AuthClass::Public, ws).is_ok());
        assert!(table.set_not_found(xhr("nf")).is_err());
    }

    #[test]
    fn file_routes_are_public_only() {
        let mut table = RouteTable::new();
        let err = table
            .register("/static/{p*}", TransportKind::File, AuthClass::Authenticated, page("f"))
            .unwrap_err();
        assert!(matches!(err, RouteError::FilePublicOnly { .. }));
    }

    #[test]
    fn summary_groups_in_fixed_order_keeping_insertion_order() {
        let mut table = RouteTable::new();
        table.set_not_found(page("nf")).unwrap();
        table
            .register("/files/{p*}", TransportKind::File, AuthClass::Public, page("files"))
            .unwrap();
        table
            .register("/api/b", TransportKind::Xhr, AuthClass::Public, xhr("b"))
            .unwrap();
        table
            .register("/dash", TransportKind::Html, AuthClass::Authenticated, page("dash"))
            .unwrap();
        table
            .register("/api/a", TransportKind::Xhr, AuthClass::Public, xhr("a"))
            .unwrap();
        table
            .register("/", TransportKind::Html, AuthClass::Public, page("root"))
            .unwrap();

        let summary = table.summarize();
        let rows: Vec<(&str, &str)> = summary
            .iter()
            .map(|e| (e.group.as_str(), e.handler.as_str()))
            .collect();
        assert_eq!(rows, vec![
            ("HTML Public", "root"),
            ("HTML Authd", "dash"),
            ("XHR Public", "b"),
            ("XHR Public", "a"),
            ("FILE Public", "files"),
            ("HTML Not Found", "nf"),
        ]);
    }
}
