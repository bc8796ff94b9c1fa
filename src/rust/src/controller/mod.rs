//
// Copyright (C) 2019 Signal Messenger, LLC.
// All rights reserved.
//
// SPDX-License-Identifier: GPL-3.0-only
//

//! The call control plane: the central state machine plus its two
//! supporting pieces, the participant sub-state-machine and the named
//! timer table.

pub mod call_controller;
pub mod participants;
pub mod timers;

pub use call_controller::{CallController, CallControllerConfig};
