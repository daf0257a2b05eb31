//
// Copyright (c) The Polsim Contributors
//
// SPDX-License-Identifier: MIT
//

//! Service objects, service groups, and the book that resolves them.
//!
//! Mirrors `address`'s resolver shape exactly: the membership graph is the
//! same kind of object/group DAG, just carrying protocol/port entries
//! instead of CIDRs at the leaves.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, RwLock};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

impl std::str::FromStr for Protocol {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            _ => Err(crate::error::Error::InvalidPortRange { start: 0, end: 0 }),
        }
    }
}

// A single protocol/port-range clause. `ServiceEntry::any()` is the
// universal match used for the bundled `ALL` pseudo-service and never
// constrains protocol or port.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ServiceEntry {
    protocol: Option<Protocol>,
    start_port: Option<u16>,
    end_port: Option<u16>,
}

impl ServiceEntry {
    pub fn any() -> Self {
        Self {
            protocol: None,
            start_port: None,
            end_port: None,
        }
    }

    pub fn new(protocol: Protocol, start_port: u16, end_port: u16) -> crate::error::Result<Self> {
        if start_port == 0 || end_port == 0 || start_port > end_port {
            return Err(crate::error::Error::InvalidPortRange {
                start: start_port,
                end: end_port,
            });
        }
        Ok(Self {
            protocol: Some(protocol),
            start_port: Some(start_port),
            end_port: Some(end_port),
        })
    }

    pub fn matches(&self, protocol: Protocol, port: u16) -> bool {
        match self.protocol {
            None => true,
            Some(p) => {
                p == protocol
                    && self.start_port.is_some_and(|s| s <= port)
                    && self.end_port.is_some_and(|e| port <= e)
            }
        }
    }

    // The entry's port bounds, if it carries any; `any()` has none.
    pub fn port_range(&self) -> Option<(u16, u16)> {
        match (self.start_port, self.end_port) {
            (Some(s), Some(e)) => Some((s, e)),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ServiceObject {
    pub name: String,
    pub entries: Vec<ServiceEntry>,
}

impl ServiceObject {
    pub fn new(name: impl Into<String>, entries: Vec<ServiceEntry>) -> Self {
        Self {
            name: name.into(),
            entries,
        }
    }

    // A service object with no entries at all is the service-side analogue
    // of a named, never-resolved address object: it always contributes
    // `unknown`, never `match`.
    pub fn is_unknown(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn matches(&self, protocol: Protocol, port: u16) -> bool {
        self.entries.iter().any(|e| e.matches(protocol, port))
    }
}

#[derive(Clone, Debug)]
pub struct ServiceGroup {
    pub name: String,
    pub members: Vec<String>,
}

impl ServiceGroup {
    pub fn new(name: impl Into<String>, members: Vec<String>) -> Self {
        Self {
            name: name.into(),
            members,
        }
    }
}

pub struct ServiceBook {
    objects: HashMap<String, ServiceObject>,
    groups: HashMap<String, ServiceGroup>,
    flattened: RwLock<HashMap<String, Arc<[ServiceObject]>>>,
}

impl ServiceBook {
    pub fn new() -> Self {
        Self {
            objects: HashMap::new(),
            groups: HashMap::new(),
            flattened: RwLock::new(HashMap::new()),
        }
    }

    pub fn insert_object(&mut self, object: ServiceObject) {
        self.objects.insert(object.name.clone(), object);
    }

    pub fn insert_group(&mut self, group: ServiceGroup) {
        self.groups.insert(group.name.clone(), group);
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.objects.contains_key(name) || self.groups.contains_key(name)
    }

    pub fn flatten_all(&self) {
        let names: Vec<String> = self.groups.keys().cloned().collect();
        for name in &names {
            self.resolve(name);
        }
    }

    pub fn resolve(&self, name: &str) -> Arc<[ServiceObject]> {
        if let Some(cached) = self.flattened.read().unwrap().get(name) {
            return cached.clone();
        }
        let mut visited = HashSet::new();
        self.resolve_inner(name, &mut visited)
    }

    fn resolve_inner(&self, name: &str, visited: &mut HashSet<String>) -> Arc<[ServiceObject]> {
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
        resolved.sort_by(|a, b| a.name.cmp(&b.name));
        resolved.dedup_by(|a, b| a.name == b.name);

        let result: Arc<[ServiceObject]> = Arc::from(resolved);
        self.flattened
            .write()
            .unwrap()
            .insert(name.to_string(), result.clone());
        result
    }
}

impl Default for ServiceBook {
    fn default() -> Self {
        Self::new()
    }
}
