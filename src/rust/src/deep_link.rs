//
// Copyright (C) 2019 Signal Messenger, LLC.
// All rights reserved.
//
// SPDX-License-Identifier: GPL-3.0-only
//

//! Deep-link resolution and the trusted-host policy applied to it.
//!
//! Parsing a raw deep-link string is itself out of scope (an external
//! collaborator); this module starts from the already-resolved action and
//! applies the host policy the controller needs: a trusted host becomes the
//! new persisted default, an untrusted one is used for this call only.

use crate::common::RoomId;

#[derive(Clone, Debug, PartialEq)]
pub enum DeepLinkAction {
    Join {
        room_id: RoomId,
        host: Option<String>,
    },
    SaveRoom {
        room_id: RoomId,
        host: Option<String>,
        saved_room_name: Option<String>,
    },
}

/// Whether a deep link's host should become the new persisted default, or
/// apply only to the call it was carried on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HostPolicy {
    PersistAsDefault,
    OneOffOnly,
}

/// A fixed allowlist of canonical hosts. Deep links naming any other host
/// are honored for the current call only and never overwrite the
/// persisted default (spec's resolution of an otherwise-unclear behavior).
pub struct TrustedHosts {
    hosts: Vec<String>,
}

impl TrustedHosts {
    pub fn new(hosts: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            hosts: hosts.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_trusted(&self, host: &str) -> bool {
        self.hosts.iter().any(|h| h.eq_ignore_ascii_case(host))
    }

    pub fn resolve_policy(&self, host: Option<&str>) -> HostPolicy {
        match host {
            None => HostPolicy::PersistAsDefault,
            Some(host) if self.is_trusted(host) => HostPolicy::PersistAsDefault,
            Some(_) => HostPolicy::OneOffOnly,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hosts() -> TrustedHosts {
        TrustedHosts::new(["call.example.com", "call2.example.com"])
    }

    #[test]
    fn no_host_means_use_the_persisted_default() {
        assert_eq!(hosts().resolve_policy(None), HostPolicy::PersistAsDefault);
    }

    #[test]
    fn trusted_host_persists() {
        assert_eq!(
            hosts().resolve_policy(Some("CALL.EXAMPLE.COM")),
            HostPolicy::PersistAsDefault
        );
    }

    #[test]
    fn untrusted_host_is_one_off() {
        assert_eq!(
            hosts().resolve_policy(Some("evil.example.com")),
            HostPolicy::OneOffOnly
        );
    }
}
