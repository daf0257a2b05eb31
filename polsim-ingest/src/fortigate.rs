//
// Copyright (c) The Polsim Contributors
//
// SPDX-License-Identifier: MIT
//

//! Line-oriented parser for FortiGate-style
//! `config ... edit ... set ... next ... end` CLI configuration exports.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use polsim_core::address::{AddressBook, AddressGroup, AddressObject, Ipv4NetworkExt};
use polsim_core::policy::PolicyRule;
use polsim_core::service::{Protocol, ServiceBook, ServiceGroup, ServiceObject};

use crate::error::{Error, Result};
use crate::ParsedRules;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Section {
    Address,
    AddrGroup,
    ServiceCustom,
    ServiceGroup,
    Policy,
}

impl Section {
    fn from_header(header: &str) -> Option<Self> {
        match header {
            "config firewall address" => Some(Section::Address),
            "config firewall addrgrp" => Some(Section::AddrGroup),
            "config firewall service custom" => Some(Section::ServiceCustom),
            "config firewall service group" => Some(Section::ServiceGroup),
            "config firewall policy" => Some(Section::Policy),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
enum FieldValue {
    Single(String),
    Multi(Vec<String>),
}

impl FieldValue {
    fn push(&mut self, value: String) {
        match self {
            FieldValue::Single(existing) => {
                *self = FieldValue::Multi(vec![existing.clone(), value]);
            }
            FieldValue::Multi(values) => values.push(value),
        }
    }

    fn as_multi(&self) -> Vec<String> {
        match self {
            FieldValue::Single(s) => vec![s.clone()],
            FieldValue::Multi(v) => v.clone(),
        }
    }

    fn as_single(&self) -> &str {
        match self {
            FieldValue::Single(s) => s,
            FieldValue::Multi(v) => v.last().map(String::as_str).unwrap_or(""),
        }
    }
}

// Splits FortiGate member strings the way `set member "a" "b"` lines
// accumulate: whitespace-separated tokens, quotes stripped, across however
// many `set member ...` repetitions the object carried.
fn split_members(raw: &[String]) -> Vec<String> {
    let mut result = Vec::new();
    for item in raw {
        for token in item.split_whitespace() {
            let trimmed = token.trim_matches('"');
            if !trimmed.is_empty() {
                result.push(trimmed.to_string());
            }
        }
    }
    result
}

fn mask_to_prefix(mask: Ipv4Addr) -> Result<u8> {
    let bits = u32::from(mask);
    let prefix = bits.leading_ones();
    if prefix < 32 && (bits << prefix) != 0 {
        return Err(Error::InvalidNetmask(mask.to_string()));
    }
    Ok(prefix as u8)
}

pub fn parse_address_object(
    name: &str,
    address_type: &str,
    subnet: Option<&str>,
    start_ip: Option<&str>,
    end_ip: Option<&str>,
) -> Result<AddressObject> {
    match address_type.to_ascii_lowercase().as_str() {
        "ipmask" => {
            let subnet = subnet.ok_or(Error::MissingField {
                object: name.to_string(),
                field: "subnet",
            })?;
            let (ip_part, suffix) = subnet
                .split_once('/')
                .ok_or_else(|| Error::InvalidCidr(subnet.to_string()))?;
            let ip: Ipv4Addr = ip_part
                .parse()
                .map_err(|_| Error::InvalidCidr(subnet.to_string()))?;
            let prefix = if suffix.chars().all(|c| c.is_ascii_digit()) && !suffix.is_empty() {
                suffix
                    .parse::<u8>()
                    .map_err(|_| Error::InvalidCidr(subnet.to_string()))?
            } else {
                let mask: Ipv4Addr = suffix
                    .parse()
                    .map_err(|_| Error::InvalidCidr(subnet.to_string()))?;
                mask_to_prefix(mask)?
            };
            let network = Ipv4Network::new(ip, prefix)
                .map_err(|_| Error::InvalidCidr(subnet.to_string()))?;
            Ok(AddressObject::subnet(name, network.apply_mask()))
        }
        "none" => {
            let start = start_ip.ok_or(Error::MissingField {
                object: name.to_string(),
                field: "start-ip",
            })?;
            let end = end_ip.ok_or(Error::MissingField {
                object: name.to_string(),
                field: "end-ip",
            })?;
            let ip: Ipv4Addr = start.parse().map_err(|_| Error::InvalidAddress(start.to_string()))?;
            let mask: Ipv4Addr = end.parse().map_err(|_| Error::InvalidAddress(end.to_string()))?;
            let prefix = mask_to_prefix(mask)?;
            let network = Ipv4Network::new(ip, prefix).map_err(|_| Error::InvalidCidr(format!("{start}/{end}")))?;
            Ok(AddressObject::subnet(name, network.apply_mask()))
        }
        "iprange" => {
            let start = start_ip.ok_or(Error::MissingField {
                object: name.to_string(),
                field: "start-ip",
            })?;
            let end = end_ip.ok_or(Error::MissingField {
                object: name.to_string(),
                field: "end-ip",
            })?;
            let start: Ipv4Addr = start.parse().map_err(|_| Error::InvalidAddress(start.to_string()))?;
            let end: Ipv4Addr = end.parse().map_err(|_| Error::InvalidAddress(end.to_string()))?;
            Ok(AddressObject::range(name, start, end))
        }
        "fqdn" => Ok(AddressObject::named(name)),
        other => Err(Error::UnsupportedAddressType(other.to_string())),
    }
}

pub fn make_any_service(name: impl Into<String>) -> ServiceObject {
    ServiceObject::new(name, vec![polsim_core::service::ServiceEntry::any()])
}

fn port_pattern() -> &'static regex::Regex {
    static PATTERN: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    PATTERN.get_or_init(|| regex::Regex::new(r"^(tcp|udp)_(\d+)(?:-(\d+))?$").unwrap())
}

// Parses a single `tcp_80` / `udp_1000-2000` style service-entry string.
pub fn parse_service_entry(value: &str) -> Result<polsim_core::service::ServiceEntry> {
    let lowered = value.trim().to_ascii_lowercase();
    let caps = port_pattern()
        .captures(&lowered)
        .ok_or_else(|| Error::InvalidServiceEntry(lowered.clone()))?;
    let protocol = if &caps[1] == "tcp" { Protocol::Tcp } else { Protocol::Udp };
    let start: u32 = caps[2]
        .parse()
        .map_err(|_| Error::InvalidServiceEntry(lowered.clone()))?;
    let end: u32 = match caps.get(3) {
        Some(m) => m
            .as_str()
            .parse()
            .map_err(|_| Error::InvalidServiceEntry(lowered.clone()))?,
        None => start,
    };
    if !(1..=65535).contains(&start) || !(1..=65535).contains(&end) || start > end {
        return Err(Error::PortOutOfRange(lowered));
    }
    Ok(polsim_core::service::ServiceEntry::new(protocol, start as u16, end as u16)?)
}

struct Parser {
    address_book: AddressBook,
    service_book: ServiceBook,
    policies: Vec<PolicyRule>,
    current_section: Option<Section>,
    current_name: Option<String>,
    current_fields: HashMap<String, FieldValue>,
}

impl Parser {
    fn new() -> Self {
        Self {
            address_book: AddressBook::new(),
            service_book: ServiceBook::new(),
            policies: Vec::new(),
            current_section: None,
            current_name: None,
            current_fields: HashMap::new(),
        }
    }

    fn flush_current_section(&mut self) {
        match self.current_section {
            Some(Section::Address) => self.flush_address(),
            Some(Section::AddrGroup) => self.flush_addr_group(),
            Some(Section::ServiceCustom) => self.flush_service(),
            Some(Section::ServiceGroup) => self.flush_service_group(),
            Some(Section::Policy) => self.flush_policy(),
            None => {}
        }
    }

    fn register_service_name(&mut self, member: &str) {
        if self.service_book.contains_name(member) {
            return;
        }
        let lowered = member.to_ascii_lowercase();
        if lowered.starts_with("tcp_") || lowered.starts_with("udp_") {
            if let Ok(entry) = parse_service_entry(member) {
                self.service_book.insert_object(ServiceObject::new(member, vec![entry]));
            }
            return;
        }
        if let Some(object) = crate::catalog::lookup(member) {
            self.service_book.insert_object(object);
        }
    }

    fn flush_address(&mut self) {
        let Some(name) = self.current_name.take() else {
            return;
        };
        let fields = std::mem::take(&mut self.current_fields);
        let address_type = fields
            .get("type")
            .map(|v| v.as_single().to_string())
            .unwrap_or_else(|| "ipmask".to_string());
        let mut subnet_value = fields.get("subnet").map(|v| v.as_multi().join(" "));
        if let Some(sv) = &subnet_value {
            if address_type.eq_ignore_ascii_case("ipmask") {
                let parts: Vec<&str> = sv.split_whitespace().collect();
                if parts.len() == 2 {
                    subnet_value = Some(format!("{}/{}", parts[0], parts[1]));
                }
            }
        }
        let start_ip = fields.get("start-ip").map(|v| v.as_multi()[0].clone());
        let end_ip = fields.get("end-ip").map(|v| v.as_multi()[0].clone());

        let object = parse_address_object(
            &name,
            &address_type,
            subnet_value.as_deref(),
            start_ip.as_deref(),
            end_ip.as_deref(),
        )
        .unwrap_or_else(|_| AddressObject::named(name.as_str()));
        self.address_book.insert_object(object);
    }

    fn flush_addr_group(&mut self) {
        let Some(name) = self.current_name.take() else {
            return;
        };
        let fields = std::mem::take(&mut self.current_fields);
        let members = fields.get("member").map(|v| v.as_multi()).unwrap_or_default();
        self.address_book
            .insert_group(AddressGroup::new(name, split_members(&members)));
    }

    fn flush_service(&mut self) {
        let Some(name) = self.current_name.take() else {
            return;
        };
        let fields = std::mem::take(&mut self.current_fields);
        let mut entries = Vec::new();
        for (key, proto) in [("tcp-portrange", "tcp"), ("udp-portrange", "udp")] {
            let Some(raw) = fields.get(key) else { continue };
            for value in raw.as_multi() {
                for part in value.split_whitespace() {
                    if let Ok(entry) = parse_service_entry(&format!("{proto}_{part}")) {
                        entries.push(entry);
                    }
                }
            }
        }
        let object = if entries.is_empty() {
            make_any_service(name)
        } else {
            ServiceObject::new(name, entries)
        };
        self.service_book.insert_object(object);
    }

    fn flush_service_group(&mut self) {
        let Some(name) = self.current_name.take() else {
            return;
        };
        let fields = std::mem::take(&mut self.current_fields);
        let members = fields.get("member").map(|v| v.as_multi()).unwrap_or_default();
        let cleaned = split_members(&members);
        for member in &cleaned {
            self.register_service_name(member);
        }
        self.service_book
            .insert_group(ServiceGroup::new(name, cleaned));
    }

    fn flush_policy(&mut self) {
        let Some(policy_id) = self.current_name.take() else {
            return;
        };
        let fields = std::mem::take(&mut self.current_fields);
        let name = fields
            .get("name")
            .map(|v| v.as_single().trim_matches('"').to_string())
            .unwrap_or_else(|| "no-name".to_string());
        let srcaddr = fields.get("srcaddr").map(|v| v.as_multi()).unwrap_or_default();
        let dstaddr = fields.get("dstaddr").map(|v| v.as_multi()).unwrap_or_default();
        let service = fields.get("service").map(|v| v.as_multi()).unwrap_or_default();
        let action = fields
            .get("action")
            .map(|v| v.as_single().to_string())
            .unwrap_or_else(|| "deny".to_string());
        let schedule = fields
            .get("schedule")
            .map(|v| v.as_single().trim_matches('"').to_string());
        let status = fields
            .get("status")
            .map(|v| v.as_single().to_string())
            .unwrap_or_else(|| "enable".to_string());

        let cleaned_services = split_members(&service);
        for member in &cleaned_services {
            self.register_service_name(member);
        }

        let priority = policy_id
            .parse::<i64>()
            .unwrap_or((self.policies.len() + 1) as i64);

        self.policies.push(PolicyRule {
            policy_id: policy_id.clone(),
            name,
            priority,
            source: split_members(&srcaddr),
            destination: split_members(&dstaddr),
            services: cleaned_services,
            action,
            enabled: status.eq_ignore_ascii_case("enable"),
            schedule,
            comment: None,
        });
    }
}

// Parses a FortiGate CLI configuration export into address/service books
// and a priority-sorted policy list. An address object whose fields don't
// parse as a concrete subnet/range is demoted to name-based rather than
// failing the whole parse, since real-world exports routinely reference
// FQDN objects with no subnet/start-ip/end-ip fields at all.
pub fn parse_fortigate_config<I, S>(lines: I) -> Result<ParsedRules>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut parser = Parser::new();

    for raw_line in lines {
        let line = raw_line.as_ref().trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line.starts_with("config ") {
            parser.flush_current_section();
            parser.current_section = Section::from_header(line);
            continue;
        }
        if line == "end" {
            parser.flush_current_section();
            parser.current_section = None;
            continue;
        }
        if let Some(rest) = line.strip_prefix("edit ") {
            parser.flush_current_section();
            parser.current_name = Some(rest.trim().trim_matches('"').to_string());
            parser.current_fields = HashMap::new();
            continue;
        }
        if line == "next" {
            parser.flush_current_section();
            continue;
        }
        if let Some(rest) = line.strip_prefix("set ") {
            let mut parts = rest.splitn(2, ' ');
            let Some(key) = parts.next() else { continue };
            let value = parts.next().unwrap_or("").trim().to_string();
            match parser.current_fields.get_mut(key) {
                Some(existing) => existing.push(value),
                None => {
                    parser
                        .current_fields
                        .insert(key.to_string(), FieldValue::Single(value));
                }
            }
            continue;
        }
        if let Some(rest) = line.strip_prefix("unset ") {
            parser.current_fields.remove(rest.trim());
        }
    }
    parser.flush_current_section();

    if !parser.address_book.contains_name("all") {
        parser
            .address_book
            .insert_object(AddressObject::subnet("all", "0.0.0.0/0".parse().unwrap()));
    }
    crate::catalog::populate_default_services(&mut parser.service_book, None);

    parser.policies.sort_by_key(|p| p.priority);

    Ok(ParsedRules {
        address_book: parser.address_book,
        service_book: parser.service_book,
        policies: parser.policies,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
config firewall address
    edit "lan"
        set type ipmask
        set subnet 10.0.0.0 255.255.255.0
    next
    edit "broken-fqdn"
        set type fqdn
    next
end
config firewall addrgrp
    edit "internal"
        set member "lan" "broken-fqdn"
    next
end
config firewall service custom
    edit "web"
        set tcp-portrange 443
    next
end
config firewall policy
    edit 1
        set name "allow-web"
        set srcaddr "lan"
        set dstaddr "lan"
        set service "web"
        set action accept
        set status enable
    next
end
"#;

    #[test]
    fn parses_addresses_groups_services_and_policies() {
        let lines: Vec<&str> = SAMPLE.lines().collect();
        let parsed = parse_fortigate_config(lines).unwrap();

        assert!(parsed.address_book.contains_name("lan"));
        assert!(parsed.address_book.contains_name("internal"));
        assert!(parsed.address_book.contains_name("all"));
        assert!(parsed.service_book.contains_name("web"));
        assert_eq!(parsed.policies.len(), 1);
        assert_eq!(parsed.policies[0].action, "accept");
    }

    #[test]
    fn unresolvable_address_falls_back_to_named() {
        let lines: Vec<&str> = SAMPLE.lines().collect();
        let parsed = parse_fortigate_config(lines).unwrap();
        let resolved = parsed.address_book.resolve("broken-fqdn");
        assert!(resolved[0].is_named());
    }
}
