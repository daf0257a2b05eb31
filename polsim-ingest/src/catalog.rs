//
// Copyright (c) The Polsim Contributors
//
// SPDX-License-Identifier: MIT
//

//! The bundled well-known port catalogue. A small compile-time table
//! covering the handful of services every rule source assumes exist
//! (DNS/HTTP/HTTPS/SSH/SMTP), optionally augmented at runtime from a
//! `/etc/services`-formatted file. User-defined service names always win:
//! this module only ever fills in gaps, never overwrites.

use std::collections::HashMap;
use std::path::Path;

use polsim_core::service::{Protocol, ServiceBook, ServiceEntry, ServiceObject};

type CatalogEntry = (Protocol, u16, u16);

static DEFAULT_SERVICES: phf::Map<&'static str, &'static [CatalogEntry]> = phf::phf_map! {
    "DNS" => &[(Protocol::Udp, 53, 53)],
    "HTTP" => &[(Protocol::Tcp, 80, 80)],
    "HTTPS" => &[(Protocol::Tcp, 443, 443)],
    "SSH" => &[(Protocol::Tcp, 22, 22)],
    "SMTP" => &[(Protocol::Tcp, 25, 25)],
};

fn service_object_from_entries(name: &str, entries: &[CatalogEntry]) -> ServiceObject {
    let entries = entries
        .iter()
        .map(|(protocol, start, end)| {
            ServiceEntry::new(*protocol, *start, *end)
                .expect("catalog entries are constructed with valid port ranges")
        })
        .collect();
    ServiceObject::new(name, entries)
}

// Looks a name up in the bundled catalogue, case-insensitively.
pub fn lookup(name: &str) -> Option<ServiceObject> {
    let key = name.to_ascii_uppercase();
    DEFAULT_SERVICES
        .get(key.as_str())
        .map(|entries| service_object_from_entries(&key, entries))
}

// Parses a `/etc/services`-style file: `name  port/proto  [aliases] [# comment]`
// per line. Entries for names already known are skipped (the default table
// always wins), and multiple lines contributing to the same name are
// aggregated before being added.
pub fn load_services_file(path: &Path) -> std::io::Result<Vec<ServiceObject>> {
    let contents = std::fs::read_to_string(path)?;
    let mut aggregated: HashMap<String, Vec<ServiceEntry>> = HashMap::new();

    for raw_line in contents.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let clean_line = line.split('#').next().unwrap_or("").trim();
        if clean_line.is_empty() {
            continue;
        }
        let mut parts = clean_line.split_whitespace();
        let (Some(name), Some(port_def)) = (parts.next(), parts.next()) else {
            continue;
        };
        let Some((port_str, proto_str)) = port_def.split_once('/') else {
            continue;
        };
        let Ok(port) = port_str.parse::<u16>() else {
            continue;
        };
        let protocol = match proto_str.to_ascii_lowercase().as_str() {
            "tcp" => Protocol::Tcp,
            "udp" => Protocol::Udp,
            _ => continue,
        };
        let Ok(entry) = ServiceEntry::new(protocol, port, port) else {
            continue;
        };
        let key = name.to_ascii_uppercase();
        let bucket = aggregated.entry(key).or_default();
        if !bucket.contains(&entry) {
            bucket.push(entry);
        }
    }

    Ok(aggregated
        .into_iter()
        .filter(|(name, _)| !DEFAULT_SERVICES.contains_key(name.as_str()))
        .map(|(name, entries)| ServiceObject::new(name, entries))
        .collect())
}

// Fills in the bundled defaults (and, if given, a system services file)
// without overwriting anything the rule source already defined, then
// guarantees the `ALL` pseudo-service exists.
pub fn populate_default_services(book: &mut ServiceBook, services_file: Option<&Path>) {
    for (name, entries) in DEFAULT_SERVICES.entries() {
        if !book.contains_name(name) {
            book.insert_object(service_object_from_entries(name, entries));
        }
    }
    if let Some(path) = services_file {
        match load_services_file(path) {
            Ok(extra) => {
                for object in extra {
                    if !book.contains_name(&object.name) {
                        book.insert_object(object);
                    }
                }
            }
            Err(err) => {
                tracing::debug!(path = %path.display(), error = %err, "skipping services file augmentation");
            }
        }
    }
    if !book.contains_name("ALL") {
        book.insert_object(ServiceObject::new("ALL", vec![ServiceEntry::any()]));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let object = lookup("https").unwrap();
        assert!(object.matches(Protocol::Tcp, 443));
    }

    #[test]
    fn populate_does_not_overwrite_user_defined_name() {
        let mut book = ServiceBook::new();
        book.insert_object(ServiceObject::new(
            "HTTPS",
            vec![ServiceEntry::new(Protocol::Tcp, 8443, 8443).unwrap()],
        ));
        populate_default_services(&mut book, None);
        let resolved = book.resolve("HTTPS");
        assert!(resolved[0].matches(Protocol::Tcp, 8443));
        assert!(!resolved[0].matches(Protocol::Tcp, 443));
    }

    #[test]
    fn populate_adds_all_pseudo_service() {
        let mut book = ServiceBook::new();
        populate_default_services(&mut book, None);
        assert!(book.contains_name("ALL"));
    }
}
