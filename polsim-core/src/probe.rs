//
// Copyright (c) The Polsim Contributors
//
// SPDX-License-Identifier: MIT
//

//! Probe records and the planner that turns source/destination/port lists
//! into the Cartesian sequence the parallel driver evaluates.

use std::collections::BTreeMap;

use ipnetwork::Ipv4Network;

use crate::address::{usable_hosts, Ipv4NetworkExt};
use crate::matchmode::MatchMode;
use crate::service::Protocol;

// Arbitrary passthrough columns a CSV/spreadsheet/DB row may carry (site
// name, ticket reference, GN tag, and so on) that have no bearing on
// evaluation but must reach the output row unchanged. A `BTreeMap` keeps
// column order deterministic regardless of the ingest adapter's hashing.
pub type CarrierFields = BTreeMap<String, String>;

#[derive(Clone, Debug)]
pub struct SourceRecord {
    pub network: Ipv4Network,
    pub fields: CarrierFields,
}

#[derive(Clone, Debug)]
pub struct DestinationRecord {
    pub network: Ipv4Network,
    pub fields: CarrierFields,
}

#[derive(Clone, Debug)]
pub struct PortSpec {
    pub label: String,
    pub protocol: Protocol,
    pub port: u16,
}

#[derive(Clone, Debug)]
pub struct Probe {
    pub source: SourceRecord,
    pub destination_network: Ipv4Network,
    pub destination: DestinationRecord,
    pub port_spec: PortSpec,
}

// Expand-mode splits only the destination side: below `max_hosts`, each
// destination CIDR is enumerated into one probe per host address (each
// carrying a `/32` network but the original record's carrier fields
// unchanged); at or above it, the destination CIDR is left whole.
fn expand_destinations(
    destinations: &[DestinationRecord],
    mode: MatchMode,
) -> Vec<(Ipv4Network, &DestinationRecord)> {
    let mut expanded = Vec::new();
    for record in destinations {
        match mode {
            MatchMode::Expand { max_hosts } if record.network.host_count() <= max_hosts => {
                for ip in usable_hosts(record.network) {
                    let host = Ipv4Network::new(ip, 32)
                        .expect("a /32 prefix is always a valid Ipv4Network");
                    expanded.push((host, record));
                }
            }
            _ => expanded.push((record.network, record)),
        }
    }
    expanded
}

// Builds the full probe sequence: sources outermost, then (possibly
// host-expanded) destinations, then ports innermost. Every caller collects
// this into a `Vec` anyway (the parallel driver needs an indexed slice to
// fan out over), so this builds the `Vec` directly with plain nested loops
// rather than threading a borrow of `expanded_destinations` through nested
// closures into a returned `impl Iterator` — that borrow cannot outlive the
// closures that capture it.
pub fn plan_probes(
    sources: &[SourceRecord],
    destinations: &[DestinationRecord],
    ports: &[PortSpec],
    mode: MatchMode,
) -> Vec<Probe> {
    let expanded_destinations = expand_destinations(destinations, mode);
    let mut probes = Vec::with_capacity(sources.len() * expanded_destinations.len() * ports.len());
    for source in sources {
        for (dst_net, dst_rec) in &expanded_destinations {
            for port_spec in ports {
                probes.push(Probe {
                    source: source.clone(),
                    destination_network: *dst_net,
                    destination: (*dst_rec).clone(),
                    port_spec: port_spec.clone(),
                });
            }
        }
    }
    probes
}
