// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Wireless Transaction Protocol: PDU codec, TID validation cache, and
//! the Responder/Initiator state machines.

pub mod constants;
pub mod initiator;
pub mod pdu;
pub mod responder;
pub mod tid_cache;
