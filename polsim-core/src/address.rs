//
// Copyright (c) The Polsim Contributors
//
// SPDX-License-Identifier: MIT
//

//! Address objects, address groups, and the book that resolves them.
//!
//! Group membership is flattened eagerly (or lazily, on first lookup) into a
//! sorted, deduplicated list of concrete leaf objects, with a mutable
//! visited-set carried through the recursion so that a cycle anywhere in the
//! membership graph breaks cleanly instead of overflowing the stack.

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::{Arc, RwLock};

use ipnetwork::Ipv4Network;

// Extension methods for `Ipv4Network` used throughout the evaluator.
pub trait Ipv4NetworkExt {
    // Re-derives the network from its own masked address, discarding any
    // host bits the caller's input CIDR may have carried.
    #[must_use]
    fn apply_mask(&self) -> Ipv4Network;

    // Number of addresses covered, including network/broadcast.
    fn host_count(&self) -> u64;
}

impl Ipv4NetworkExt for Ipv4Network {
    fn apply_mask(&self) -> Ipv4Network {
        Ipv4Network::new(self.network(), self.prefix())
            .expect("masking a valid network never changes its prefix length")
    }

    fn host_count(&self) -> u64 {
        1u64 << (32 - u32::from(self.prefix()))
    }
}

// Returns the usable host addresses of `network` for expand-mode
// enumeration. `/31` and `/32` networks have no distinct network/broadcast
// pair, so the network address itself stands in for the single host.
pub fn usable_hosts(network: Ipv4Network) -> Vec<Ipv4Addr> {
    if network.host_count() <= 2 {
        return vec![network.network()];
    }
    let start = u32::from(network.network()) + 1;
    let end = u32::from(network.broadcast()) - 1;
    (start..=end).map(Ipv4Addr::from).collect()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AddressObject {
    Subnet {
        name: String,
        network: Ipv4Network,
    },
    Range {
        name: String,
        start: Ipv4Addr,
        end: Ipv4Addr,
    },
    // A reference that never resolved to a concrete subnet or range (an
    // FQDN, a dynamic object, or anything else the ingest adapter couldn't
    // pin down). Always contributes `unknown`, never `match`.
    Named {
        name: String,
    },
}

impl AddressObject {
    pub fn subnet(name: impl Into<String>, network: Ipv4Network) -> Self {
        AddressObject::Subnet {
            name: name.into(),
            network: network.apply_mask(),
        }
    }

    pub fn range(name: impl Into<String>, start: Ipv4Addr, end: Ipv4Addr) -> Self {
        AddressObject::Range {
            name: name.into(),
            start,
            end,
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        AddressObject::Named { name: name.into() }
    }

    pub fn name(&self) -> &str {
        match self {
            AddressObject::Subnet { name, .. }
            | AddressObject::Range { name, .. }
            | AddressObject::Named { name } => name,
        }
    }

    pub fn is_named(&self) -> bool {
        matches!(self, AddressObject::Named { .. })
    }

    pub fn contains_ip(&self, ip: Ipv4Addr) -> bool {
        match self {
            AddressObject::Subnet { network, .. } => network.contains(ip),
            AddressObject::Range { start, end, .. } => *start <= ip && ip <= *end,
            AddressObject::Named { .. } => false,
        }
    }

    // Full containment: every address in `target` also belongs to `self`.
    pub fn contains_network(&self, target: Ipv4Network) -> bool {
        match self {
            AddressObject::Subnet { network, .. } => {
                network.network() <= target.network() && target.broadcast() <= network.broadcast()
            }
            AddressObject::Range { start, end, .. } => {
                *start <= target.network() && target.broadcast() <= *end
            }
            AddressObject::Named { .. } => false,
        }
    }

    // Any address in `target` also belongs to `self`.
    pub fn overlaps_network(&self, target: Ipv4Network) -> bool {
        match self {
            AddressObject::Subnet { network, .. } => {
                !(network.broadcast() < target.network() || network.network() > target.broadcast())
            }
            AddressObject::Range { start, end, .. } => {
                !(*end < target.network() || *start > target.broadcast())
            }
            AddressObject::Named { .. } => false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AddressGroup {
    pub name: String,
    pub members: Vec<String>,
}

impl AddressGroup {
    pub fn new(name: impl Into<String>, members: Vec<String>) -> Self {
        Self {
            name: name.into(),
            members,
        }
    }
}

// Holds every address object and address group known to a run, and resolves
// group membership into flattened, sorted, deduplicated leaf-object lists.
//
// The flattened cache is behind an `RwLock` rather than plain interior
// mutability so an `Arc<AddressBook>` can be handed to worker threads: after
// `flatten_all` is called once during setup, every lookup is a cache hit and
// the lock sees read contention only.
pub struct AddressBook {
    objects: HashMap<String, AddressObject>,
    groups: HashMap<String, AddressGroup>,
    flattened: RwLock<HashMap<String, Arc<[AddressObject]>>>,
}

impl AddressBook {
    pub fn new() -> Self {
        Self {
            objects: HashMap::new(),
            groups: HashMap::new(),
            flattened: RwLock::new(HashMap::new()),
        }
    }

    pub fn insert_object(&mut self, object: AddressObject) {
        self.objects.insert(object.name().to_string(), object);
    }

    pub fn insert_group(&mut self, group: AddressGroup) {
        self.groups.insert(group.name.clone(), group);
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.objects.contains_key(name) || self.groups.contains_key(name)
    }

    // Resolves every known group up front, single-threaded, so that once
    // this book is shared across worker threads every lookup hits the cache.
    pub fn flatten_all(&self) {
        let names: Vec<String> = self.groups.keys().cloned().collect();
        for name in &names {
            self.resolve(name);
        }
    }

    // Returns the flattened, sorted, deduplicated leaf-object tuple for
    // `name`: the object itself if `name` names a concrete object, the
    // recursively flattened members if it names a group, or an empty slice
    // if `name` is unknown (the caller is expected to treat that as
    // `unknown`, not `no_match`, at the evaluation layer).
    pub fn resolve(&self, name: &str) -> Arc<[AddressObject]> {
        if let Some(cached) = self.flattened.read().unwrap().get(name) {
            return cached.clone();
        }
        let mut visited = HashSet::new();
        self.resolve_inner(name, &mut visited)
    }

    fn resolve_inner(&self, name: &str, visited: &mut HashSet<String>) -> Arc<[AddressObject]> {
        if let Some(cached) = self.flattened.read().unwrap().get(name) {
            return cached.clone();
        }
        if let Some(object) = self.objects.get(name) {
            return Arc::from(vec![object.clone()]);
        }
        let Some(group) = self.groups.get(name) else {
            return Arc::from(Vec::new());
        };
        if visited.contains(name) {
            return Arc::from(Vec::new());
        }
        visited.insert(name.to_string());

        let members = group.members.clone();
        let mut resolved = Vec::new();
        for member in &members {
            let sub = self.resolve_inner(member, visited);
            resolved.extend(sub.iter().cloned());
        }
        resolved.sort_by(|a, b| a.name().cmp(b.name()));
        resolved.dedup_by(|a, b| a.name() == b.name());

        let result: Arc<[AddressObject]> = Arc::from(resolved);
        self.flattened
            .write()
            .unwrap()
            .insert(name.to_string(), result.clone());
        result
    }
}

impl Default for AddressBook {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(cidr: &str) -> Ipv4Network {
        cidr.parse().unwrap()
    }

    #[test]
    fn flattens_nested_groups() {
        let mut book = AddressBook::new();
        book.insert_object(AddressObject::subnet("web-1", net("10.0.1.0/24")));
        book.insert_object(AddressObject::subnet("web-2", net("10.0.2.0/24")));
        book.insert_group(AddressGroup::new("web-tier", vec!["web-1".into(), "web-2".into()]));
        book.insert_group(AddressGroup::new(
            "app-tier",
            vec!["web-tier".into(), "web-1".into()],
        ));

        let resolved = book.resolve("app-tier");
        let names: Vec<&str> = resolved.iter().map(|o| o.name()).collect();
        assert_eq!(names, vec!["web-1", "web-2"]);
    }

    #[test]
    fn breaks_cycles_without_overflow() {
        let mut book = AddressBook::new();
        book.insert_group(AddressGroup::new("a", vec!["b".into()]));
        book.insert_group(AddressGroup::new("b", vec!["a".into()]));

        let resolved = book.resolve("a");
        assert!(resolved.is_empty());
    }

    #[test]
    fn unknown_name_resolves_empty() {
        let book = AddressBook::new();
        assert!(book.resolve("does-not-exist").is_empty());
    }

    #[test]
    fn eager_and_lazy_flattening_agree() {
        let mut book = AddressBook::new();
        book.insert_object(AddressObject::subnet("web-1", net("10.0.1.0/24")));
        book.insert_group(AddressGroup::new("web-tier", vec!["web-1".into()]));

        let lazy = book.resolve("web-tier");
        book.flatten_all();
        let eager = book.resolve("web-tier");
        assert_eq!(lazy.iter().map(|o| o.name()).collect::<Vec<_>>(),
                   eager.iter().map(|o| o.name()).collect::<Vec<_>>());
    }

    #[test]
    fn subnet_contains_network_is_inclusive_of_equal() {
        let outer = AddressObject::subnet("outer", net("10.0.0.0/16"));
        assert!(outer.contains_network(net("10.0.0.0/16")));
        assert!(outer.contains_network(net("10.0.5.0/24")));
        assert!(!outer.contains_network(net("10.1.0.0/24")));
    }

    #[test]
    fn range_overlap_is_symmetric_about_bounds() {
        let range = AddressObject::range(
            "r",
            "10.0.0.10".parse().unwrap(),
            "10.0.0.20".parse().unwrap(),
        );
        assert!(range.overlaps_network(net("10.0.0.0/28")));
        assert!(!range.overlaps_network(net("10.0.1.0/24")));
    }
}
