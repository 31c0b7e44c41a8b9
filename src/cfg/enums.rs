// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use core::fmt;

use serde::{Deserialize, Serialize};

/// `syslog-level`: either disabled, or a
/// standard syslog priority threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyslogLevel {
    None,
    Level(u8),
}

impl<'de> Deserialize<'de> for SyslogLevel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where D: serde::Deserializer<'de> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Str(String),
            Num(u8),
        }
        match Repr::deserialize(deserializer)? {
            Repr::Str(s) if s.eq_ignore_ascii_case("none") => Ok(SyslogLevel::None),
            Repr::Str(s) => s
                .parse::<u8>()
                .map(SyslogLevel::Level)
                .map_err(serde::de::Error::custom),
            Repr::Num(n) => Ok(SyslogLevel::Level(n)),
        }
    }
}

impl Serialize for SyslogLevel {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where S: serde::Serializer {
        match self {
            SyslogLevel::None => serializer.serialize_str("none"),
            SyslogLevel::Level(n) => serializer.serialize_u8(*n),
        }
    }
}

impl fmt::Display for SyslogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyslogLevel::None => f.write_str("none"),
            SyslogLevel::Level(n) => write!(f, "{n}"),
        }
    }
}
