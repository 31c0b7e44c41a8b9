// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Per-session cookie cache, grounded on
//! `examples/original_source/gw/cookies.c`. Equality for the "same
//! cookie" replacement test is `(name, domain, path)` per RFC 2109
//! §4.3.3, exactly as `add_cookie_to_cache` compares.
//!
//! Preserves a source quirk rather than fixing it: a `Set-Cookie`
//! that specifies its own `Version` attribute is stored without the
//! trailing `;` the default `$Version="0";` carries, so the rendered
//! outgoing header concatenates that version literal directly onto
//! `name=value` with no separating semicolon. `$Path`/`$Domain`, when
//! present, are stored pre-formatted with their own `$`-prefixed literal
//! and appended after a semicolon as usual.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    /// The raw `$Version=...` literal, as received or defaulted. Carries
    /// its own trailing `;` only in the defaulted case (the preserved
    /// quirk).
    pub version: String,
    pub domain: String,
    pub path: String,
    /// `$Path=...` / `$Domain=...` literals, stored pre-formatted as the
    /// source builds them; empty when the attribute was absent.
    pub path_literal: String,
    pub domain_literal: String,
    /// Seconds; `-1` means a session cookie.
    pub max_age: i64,
    pub birth: DateTime<Utc>,
}

impl Cookie {
    /// RFC 2109 §4.3.3 "same cookie" identity.
    fn identity(&self) -> (&str, &str, &str) {
        (&self.name, &self.domain, &self.path)
    }

    fn has_expired(&self, now: DateTime<Utc>) -> bool {
        if self.max_age < 0 {
            return false;
        }
        (now - self.birth).num_seconds() >= self.max_age
    }
}

#[derive(Debug, Default)]
pub struct CookieCache {
    cookies: Vec<Cookie>,
}

impl CookieCache {
    pub fn new() -> Self {
        Self { cookies: Vec::new() }
    }

    /// Replaces any existing cookie with the same `(name, domain, path)`
    /// identity, matching `add_cookie_to_cache`'s linear scan-and-replace.
    pub fn store(&mut self, cookie: Cookie) {
        if let Some(slot) = self
            .cookies
            .iter_mut()
            .find(|c| c.identity() == cookie.identity())
        {
            *slot = cookie;
        } else {
            self.cookies.push(cookie);
        }
    }

    pub fn prune_expired(&mut self, now: DateTime<Utc>) {
        self.cookies.retain(|c| !c.has_expired(now));
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    /// Renders every live cookie as a `Cookie:` request header value,
    /// preserving the version-concatenation quirk described above.
    pub fn render_cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        let mut parts = Vec::with_capacity(self.cookies.len());
        for cookie in &self.cookies {
            parts.push(render_one(cookie));
        }
        Some(parts.join(", "))
    }
}

fn render_one(cookie: &Cookie) -> String {
    let mut out = String::new();
    out.push_str(&cookie.version);
    out.push_str(&cookie.name);
    out.push('=');
    out.push_str(&cookie.value);
    if !cookie.path_literal.is_empty() {
        out.push(';');
        out.push_str(&cookie.path_literal);
    }
    if !cookie.domain_literal.is_empty() {
        out.push(';');
        out.push_str(&cookie.domain_literal);
    }
    out
}

/// Default version literal used when a `Set-Cookie` did not specify one;
/// carries the quirk-preserving trailing semicolon.
pub fn default_version_literal() -> String {
    "$Version=\"0\";".to_string()
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn sample(path: &str, domain: &str) -> Cookie {
        Cookie {
            name: "sid".to_string(),
            value: "abc123".to_string(),
            version: default_version_literal(),
            domain: domain.to_string(),
            path: path.to_string(),
            path_literal: if path.is_empty() {
                String::new()
            } else {
                format!("$Path={path}")
            },
            domain_literal: if domain.is_empty() {
                String::new()
            } else {
                format!("$Domain={domain}")
            },
            max_age: -1,
            birth: Utc::now(),
        }
    }

    #[test]
    fn replacing_same_identity_overwrites_in_place() {
        let mut cache = CookieCache::new();
        cache.store(sample("/", "example.com"));
        let mut replacement = sample("/", "example.com");
        replacement.value = "xyz789".to_string();
        cache.store(replacement);
        assert_eq!(cache.len(), 1);
        assert_eq!(
            cache.render_cookie_header(),
            Some("$Version=\"0\";sid=xyz789;$Path=/;$Domain=example.com".to_string())
        );
    }

    #[test]
    fn differing_path_is_a_distinct_cookie() {
        let mut cache = CookieCache::new();
        cache.store(sample("/a", "example.com"));
        cache.store(sample("/b", "example.com"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn default_version_carries_its_own_trailing_semicolon() {
        let cookie = sample("/", "");
        let rendered = render_one(&cookie);
        assert!(rendered.starts_with("$Version=\"0\";sid="));
    }

    #[test]
    fn peer_supplied_version_is_concatenated_without_a_separator() {
        // Preserves the source quirk: a peer-specified version literal
        // has no trailing `;`, so it runs directly into `name=value`.
        let mut cookie = sample("/", "");
        cookie.version = "$Version=1".to_string();
        assert_eq!(render_one(&cookie), "$Version=1sid=abc123");
    }

    #[test]
    fn session_cookie_never_expires() {
        let cookie = sample("/", "");
        assert!(!cookie.has_expired(Utc::now() + Duration::days(365)));
    }

    #[test]
    fn aged_cookie_is_pruned() {
        let mut cache = CookieCache::new();
        let mut cookie = sample("/", "");
        cookie.max_age = 1;
        cookie.birth = Utc::now() - Duration::seconds(10);
        cache.store(cookie);
        cache.prune_expired(Utc::now());
        assert!(cache.is_empty());
    }
}
