use crate::error::GantryError;
use serde::{Deserialize, Serialize};

/// A compiled path glob.
///
/// Grammar: segments separated by `/`; a literal segment matches exactly; `*`
/// inside a segment matches any non-`/` run; a trailing `/*` matches any
/// suffix including the empty one. Matching is case-sensitive and anchored on
/// both ends.
///
/// Compilation happens once (at route/rule creation or snapshot build);
/// `matches` walks the path with `str::split` and borrowed slices only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Pattern {
    raw: String,
    segments: Vec<Segment>,
    /// Trailing `/*` — the prefix above matches any suffix, including empty.
    rest: bool,
}

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    /// Literal pieces between `*`s; always at least two entries.
    Glob(Vec<String>),
}

impl Pattern {
    pub fn compile(raw: &str) -> Result<Self, GantryError> {
        if raw.is_empty() {
            return Err(GantryError::InvalidPattern("pattern must not be empty".into()));
        }
        if !raw.starts_with('/') {
            return Err(GantryError::InvalidPattern(format!(
                "pattern must start with '/': {raw}"
            )));
        }

        let (body, rest) = if raw == "/*" {
            ("", true)
        } else if let Some(prefix) = raw.strip_suffix("/*") {
            (prefix, true)
        } else {
            (raw, false)
        };

        let segments = if body.is_empty() {
            Vec::new()
        } else {
            body[1..]
                .split('/')
                .map(|seg| {
                    if seg.contains('*') {
                        Segment::Glob(seg.split('*').map(str::to_string).collect())
                    } else {
                        Segment::Literal(seg.to_string())
                    }
                })
                .collect()
        };

        Ok(Self { raw: raw.to_string(), segments, rest })
    }

    /// Test a path against this pattern. Anchored, case-sensitive.
    pub fn matches(&self, path: &str) -> bool {
        if !path.starts_with('/') {
            return false;
        }
        let mut path_segs = path[1..].split('/');

        for seg in &self.segments {
            let Some(candidate) = path_segs.next() else {
                return false;
            };
            let ok = match seg {
                Segment::Literal(lit) => lit == candidate,
                Segment::Glob(parts) => glob_segment_match(parts, candidate),
            };
            if !ok {
                return false;
            }
        }

        if self.rest {
            // The `/` before the suffix must be present; the suffix itself
            // may be empty ("/a/*" matches "/a/" but not "/a").
            path_segs.next().is_some()
        } else {
            path_segs.next().is_none()
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}
impl Eq for Pattern {}

impl TryFrom<String> for Pattern {
    type Error = GantryError;
    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Pattern::compile(&raw)
    }
}

impl From<Pattern> for String {
    fn from(p: Pattern) -> String {
        p.raw
    }
}

impl std::fmt::Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Match one path segment against the literal pieces of a `*`-bearing
/// pattern segment: fixed prefix, fixed suffix, middles found in order.
fn glob_segment_match(parts: &[String], seg: &str) -> bool {
    let first = parts[0].as_str();
    let last = parts[parts.len() - 1].as_str();

    let Some(mut rem) = seg.strip_prefix(first) else {
        return false;
    };
    for middle in &parts[1..parts.len() - 1] {
        match rem.find(middle.as_str()) {
            Some(i) => rem = &rem[i + middle.len()..],
            None => return false,
        }
    }
    rem.ends_with(last)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pat(s: &str) -> Pattern {
        Pattern::compile(s).unwrap()
    }

    #[test]
    fn test_literal_exact() {
        let p = pat("/api/v1/users");
        assert!(p.matches("/api/v1/users"));
        assert!(!p.matches("/api/v1/users/7"));
        assert!(!p.matches("/api/v1"));
        assert!(!p.matches("/api/v1/Users"));
    }

    #[test]
    fn test_trailing_rest_matches_any_suffix() {
        let p = pat("/api/v1/auth/*");
        assert!(p.matches("/api/v1/auth/login"));
        assert!(p.matches("/api/v1/auth/users/42"));
        assert!(p.matches("/api/v1/auth/"));
        assert!(!p.matches("/api/v1/auth"));
        assert!(!p.matches("/api/v1/other/login"));
    }

    #[test]
    fn test_mid_segment_wildcard() {
        let p = pat("/api/v1/*/items/*");
        assert!(p.matches("/api/v1/content/items/3"));
        assert!(p.matches("/api/v1/x/items/"));
        assert!(!p.matches("/api/v1/content/other/3"));
        assert!(!p.matches("/api/v1/content/items"));
    }

    #[test]
    fn test_embedded_star_in_segment() {
        let p = pat("/files/*.json");
        assert!(p.matches("/files/report.json"));
        assert!(p.matches("/files/.json"));
        assert!(!p.matches("/files/report.yaml"));
        assert!(!p.matches("/files/a/b.json"));
    }

    #[test]
    fn test_root_wildcard() {
        let p = pat("/*");
        assert!(p.matches("/"));
        assert!(p.matches("/anything"));
        assert!(p.matches("/a/b/c"));
    }

    #[test]
    fn test_unanchored_path_rejected() {
        let p = pat("/api/*");
        assert!(!p.matches("api/x"));
        assert!(!p.matches(""));
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(Pattern::compile("").is_err());
        assert!(Pattern::compile("api/v1").is_err());
    }

    #[test]
    fn test_serde_roundtrip() {
        let p = pat("/api/v1/auth/*");
        let s = serde_json::to_string(&p).unwrap();
        assert_eq!(s, "\"/api/v1/auth/*\"");
        let back: Pattern = serde_json::from_str(&s).unwrap();
        assert!(back.matches("/api/v1/auth/login"));
    }

    proptest::proptest! {
        /// Compilation + matching never panic on arbitrary input.
        #[test]
        fn pattern_never_panics(raw in "/[a-z*/]{0,30}", path in "/[a-z/]{0,30}") {
            if let Ok(p) = Pattern::compile(&raw) {
                let _ = p.matches(&path);
            }
        }

        /// A pattern with no wildcards matches exactly itself.
        #[test]
        fn literal_pattern_matches_self(segs in proptest::collection::vec("[a-z]{1,8}", 1..5)) {
            let raw = format!("/{}", segs.join("/"));
            let p = Pattern::compile(&raw).unwrap();
            assert!(p.matches(&raw));
            assert!(!p.matches(&format!("{raw}/extra")));
        }
    }
}
