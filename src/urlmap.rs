// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! URL rewrite rules, applied at the front of
//! the method layer's fetch dispatch. Loaded from the `map-url*`
//! configuration options.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    /// `in*` -> `out*`: `in` must prefix the requested URL; the tail
    /// after the prefix is appended to `out`.
    ExactPrefix { from: String, to: String },
    /// A literal source URL replaced verbatim.
    Verbatim { from: String, to: String },
}

pub struct UrlMap {
    rules: Vec<Rule>,
    device_home: Option<String>,
}

impl UrlMap {
    pub fn new(rules: Vec<Rule>, device_home: Option<String>) -> Self {
        Self { rules, device_home }
    }

    /// Applies the first matching rule, in configured order. `DEVICE:home`
    /// maps to the configured destination.
    pub fn map(&self, url: &str) -> String {
        if url == "DEVICE:home" {
            if let Some(home) = &self.device_home {
                return home.clone();
            }
        }
        for rule in &self.rules {
            match rule {
                Rule::Verbatim { from, to } if from == url => return to.clone(),
                Rule::ExactPrefix { from, to } => {
                    let prefix = from.trim_end_matches('*');
                    if let Some(tail) = url.strip_prefix(prefix) {
                        let out_prefix = to.trim_end_matches('*');
                        return format!("{out_prefix}{tail}");
                    }
                },
                _ => {},
            }
        }
        url.to_string()
    }
}
