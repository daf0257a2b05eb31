//
// Copyright (c) The Polsim Contributors
//
// SPDX-License-Identifier: MIT
//

//! CIDR match modes and the three-valued outcome lattice they feed into.

use ipnetwork::Ipv4Network;

use crate::address::{usable_hosts, AddressBook, AddressObject, Ipv4NetworkExt};
use crate::error::{Error, Result};
use crate::service::{Protocol, ServiceBook};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchMode {
    // Full-containment: the probed CIDR must be entirely inside the object.
    Segment,
    // Only the probed CIDR's network address is tested for containment.
    SampleIp,
    // Below `max_hosts` addresses, every host in the probed CIDR must be
    // individually contained; at or above it, falls back to `Segment`.
    Expand { max_hosts: u64 },
    // Any overlap between the probed CIDR and the object counts as a match.
    Fuzzy,
}

impl MatchMode {
    pub fn expand(max_hosts: u64) -> Result<Self> {
        if max_hosts == 0 {
            return Err(Error::InvalidMaxHosts(max_hosts as i64));
        }
        Ok(MatchMode::Expand { max_hosts })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchOutcome {
    Match,
    NoMatch,
    Unknown,
}

fn address_object_matches(object: &AddressObject, target: Ipv4Network, mode: MatchMode) -> bool {
    match mode {
        MatchMode::Segment => object.contains_network(target),
        MatchMode::SampleIp => object.contains_ip(target.network()),
        MatchMode::Fuzzy => object.overlaps_network(target),
        MatchMode::Expand { max_hosts } => {
            if target.host_count() <= max_hosts {
                usable_hosts(target).iter().all(|ip| object.contains_ip(*ip))
            } else {
                object.contains_network(target)
            }
        }
    }
}

// Aggregates a flattened list of address objects into a single outcome: any
// concrete match wins outright, any named (unresolved) member downgrades an
// otherwise-empty result to `unknown` rather than `no_match`.
fn aggregate_address_objects(
    objects: &[AddressObject],
    target: Ipv4Network,
    mode: MatchMode,
) -> MatchOutcome {
    let mut saw_unknown = false;
    for object in objects {
        if object.is_named() {
            saw_unknown = true;
            continue;
        }
        if address_object_matches(object, target, mode) {
            return MatchOutcome::Match;
        }
    }
    if saw_unknown {
        MatchOutcome::Unknown
    } else {
        MatchOutcome::NoMatch
    }
}

// Resolves every name in `names` against `book`, flattens recursively, and
// aggregates. A name that resolves to nothing at all (unknown group/object
// name) counts the same as an unresolved member: it downgrades `no_match`
// to `unknown` but never suppresses a concrete match found elsewhere in the
// group.
pub fn evaluate_address_group(
    book: &AddressBook,
    names: &[String],
    target: Ipv4Network,
    mode: MatchMode,
) -> MatchOutcome {
    let mut combined = Vec::new();
    let mut saw_unresolved_name = false;
    for name in names {
        let resolved = book.resolve(name);
        if resolved.is_empty() {
            saw_unresolved_name = true;
        }
        combined.extend(resolved.iter().cloned());
    }

    let outcome = aggregate_address_objects(&combined, target, mode);
    match outcome {
        MatchOutcome::NoMatch if saw_unresolved_name => MatchOutcome::Unknown,
        other => other,
    }
}

fn aggregate_service_objects(
    objects: &[crate::service::ServiceObject],
    protocol: Protocol,
    port: u16,
) -> MatchOutcome {
    let mut saw_unknown = false;
    for object in objects {
        if object.is_unknown() {
            saw_unknown = true;
            continue;
        }
        if object.matches(protocol, port) {
            return MatchOutcome::Match;
        }
    }
    if saw_unknown {
        MatchOutcome::Unknown
    } else {
        MatchOutcome::NoMatch
    }
}

pub fn evaluate_service_group(
    book: &ServiceBook,
    names: &[String],
    protocol: Protocol,
    port: u16,
) -> MatchOutcome {
    let mut combined = Vec::new();
    let mut saw_unresolved_name = false;
    for name in names {
        let resolved = book.resolve(name);
        if resolved.is_empty() {
            saw_unresolved_name = true;
        }
        combined.extend(resolved.iter().cloned());
    }

    let outcome = aggregate_service_objects(&combined, protocol, port);
    match outcome {
        MatchOutcome::NoMatch if saw_unresolved_name => MatchOutcome::Unknown,
        other => other,
    }
}
