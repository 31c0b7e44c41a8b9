// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Timer intervals and retry limits,
//! grounded on `examples/original_source/gw/wtp_resp_state-decl.h` and
//! the companion timer defaults in `gw/wtp.h`.

use std::time::Duration;

pub const AEC_MAX: u8 = 6;
pub const MAX_RCR: u8 = 8;

/// Half the 15-bit TID space; the forward-window radius for duplicate
/// detection.
pub const WTP_TID_WINDOW_SIZE: u32 = 16384;

pub const L_A_WITH_USER_ACK: Duration = Duration::from_secs(4);
pub const L_A_WITHOUT_USER_ACK: Duration = Duration::from_secs(2);
pub const L_R_WITH_USER_ACK: Duration = Duration::from_secs(7);
pub const L_R_WITHOUT_USER_ACK: Duration = Duration::from_secs(3);
pub const W_WITH_USER_ACK: Duration = Duration::from_secs(30);

/// The well-known connectionless WSP port, distinct from
/// the connection-oriented port carried in configuration.
pub const CONNECTIONLESS_PORT: u16 = 9200;
