//
// Copyright (c) The Polsim Contributors
//
// SPDX-License-Identifier: MIT
//

//! Reads a firewall rule workbook laid out as four sheets: `Address Object`,
//! `Address Group`, `Service Group`, and `Rule`. Columns are looked up by
//! header name rather than fixed position, so a reordered export still
//! parses correctly.

use std::collections::HashMap;
use std::path::Path;

use calamine::{open_workbook_auto, Data, Range, Reader, Sheets};

use polsim_core::address::{AddressBook, AddressGroup, AddressObject};
use polsim_core::policy::PolicyRule;
use polsim_core::service::{ServiceBook, ServiceGroup};

use crate::error::{Error, Result};
use crate::fortigate::parse_address_object;
use crate::ParsedRules;

fn cell_string(cell: Option<&Data>) -> Option<String> {
    match cell {
        None | Some(Data::Empty) => None,
        Some(other) => {
            let text = other.to_string();
            let trimmed = text.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
    }
}

fn cell_int(cell: Option<&Data>) -> Option<i64> {
    match cell {
        Some(Data::Int(i)) => Some(*i),
        Some(Data::Float(f)) => Some(*f as i64),
        other => cell_string(other).and_then(|s| s.parse().ok()),
    }
}

// Splits a member list cell on both newlines and commas, the two
// conventions real-world exports mix freely within the same column.
fn split_members(raw: Option<String>) -> Vec<String> {
    let Some(raw) = raw else { return Vec::new() };
    raw.lines()
        .flat_map(|line| line.split(','))
        .map(|part| part.trim().to_string())
        .filter(|part| !part.is_empty())
        .collect()
}

fn header_map(range: &Range<Data>) -> HashMap<String, usize> {
    range
        .rows()
        .next()
        .map(|header_row| {
            header_row
                .iter()
                .enumerate()
                .filter_map(|(idx, cell)| cell_string(Some(cell)).map(|h| (h, idx)))
                .collect()
        })
        .unwrap_or_default()
}

fn worksheet(
    workbook: &mut Sheets<std::io::BufReader<std::fs::File>>,
    name: &'static str,
) -> Result<Range<Data>> {
    workbook
        .worksheet_range(name)
        .ok_or(Error::MissingSheet(name))?
        .map_err(|e| Error::Excel(e.to_string()))
}

pub fn parse_excel(path: &Path) -> Result<ParsedRules> {
    let mut workbook = open_workbook_auto(path).map_err(|e| Error::Excel(e.to_string()))?;

    let mut address_book = AddressBook::new();
    let mut service_book = ServiceBook::new();
    let mut policies = Vec::new();

    let address_range = worksheet(&mut workbook, "Address Object")?;
    let headers = header_map(&address_range);
    for row in address_range.rows().skip(1) {
        let name = headers.get("Object Name").and_then(|&i| cell_string(row.get(i)));
        let Some(name) = name else { continue };
        let address_type = headers
            .get("Type")
            .and_then(|&i| cell_string(row.get(i)))
            .unwrap_or_else(|| "ipmask".to_string());
        let subnet_value = headers.get("Subnet/Start-IP").and_then(|&i| cell_string(row.get(i)));
        let mask_value = headers.get("Mask/End-IP").and_then(|&i| cell_string(row.get(i)));

        let (subnet, start_ip, end_ip) = if address_type.eq_ignore_ascii_case("ipmask") {
            match (&subnet_value, &mask_value) {
                (Some(s), Some(m)) => (Some(format!("{s}/{m}")), None, None),
                _ => (None, None, None),
            }
        } else if address_type.eq_ignore_ascii_case("iprange") {
            (None, subnet_value.clone(), mask_value.clone())
        } else {
            (None, None, None)
        };

        let object = parse_address_object(&name, &address_type, subnet.as_deref(), start_ip.as_deref(), end_ip.as_deref())
            .unwrap_or_else(|_| AddressObject::named(name.as_str()));
        address_book.insert_object(object);
    }

    let address_group_range = worksheet(&mut workbook, "Address Group")?;
    let headers = header_map(&address_group_range);
    for row in address_group_range.rows().skip(1) {
        let group_name = headers.get("Group Name").and_then(|&i| cell_string(row.get(i)));
        let Some(group_name) = group_name else { continue };
        let members = headers.get("Member").and_then(|&i| cell_string(row.get(i)));
        address_book.insert_group(AddressGroup::new(group_name, split_members(members)));
    }

    let service_group_range = worksheet(&mut workbook, "Service Group")?;
    let headers = header_map(&service_group_range);
    let mut service_group_members: Vec<String> = Vec::new();
    for row in service_group_range.rows().skip(1) {
        let group_name = headers.get("Group Name").and_then(|&i| cell_string(row.get(i)));
        let Some(group_name) = group_name else { continue };
        let members = split_members(headers.get("Member").and_then(|&i| cell_string(row.get(i))));
        service_group_members.extend(members.iter().cloned());
        service_book.insert_group(ServiceGroup::new(group_name, members));
    }

    let rule_range = worksheet(&mut workbook, "Rule")?;
    let headers = header_map(&rule_range);
    for row in rule_range.rows().skip(1) {
        let seq = headers.get("Seq").and_then(|&i| cell_int(row.get(i)));
        let Some(seq) = seq else { continue };
        let enable = headers.get("Enable").and_then(|&i| cell_string(row.get(i)));
        let source = headers.get("Source").and_then(|&i| cell_string(row.get(i)));
        let destination = headers.get("Destination").and_then(|&i| cell_string(row.get(i)));
        let service = headers.get("Service").and_then(|&i| cell_string(row.get(i)));
        let action = headers.get("Action").and_then(|&i| cell_string(row.get(i)));
        let rule_id = headers.get("ID").and_then(|&i| cell_string(row.get(i)));
        let comments = headers.get("Comments").and_then(|&i| cell_string(row.get(i)));

        let policy_id = rule_id.clone().unwrap_or_else(|| seq.to_string());
        policies.push(PolicyRule {
            policy_id: policy_id.clone(),
            name: policy_id,
            priority: seq,
            source: split_members(source),
            destination: split_members(destination),
            services: split_members(service),
            action: action.unwrap_or_else(|| "deny".to_string()),
            enabled: enable.is_some_and(|e| e.eq_ignore_ascii_case("true")),
            schedule: Some("always".to_string()),
            comment: comments,
        });
    }

    crate::catalog::populate_default_services(&mut service_book, None);
    for member in &service_group_members {
        if service_book.contains_name(member) {
            continue;
        }
        let lowered = member.to_ascii_lowercase();
        if lowered.starts_with("tcp_") || lowered.starts_with("udp_") {
            if let Ok(entry) = crate::fortigate::parse_service_entry(member) {
                service_book.insert_object(polsim_core::service::ServiceObject::new(member.clone(), vec![entry]));
            }
        } else if let Some(object) = crate::catalog::lookup(member) {
            service_book.insert_object(object);
        }
    }

    policies.sort_by_key(|p| p.priority);

    Ok(ParsedRules {
        address_book,
        service_book,
        policies,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_members_handles_both_newline_and_comma_conventions() {
        let raw = Some("lan-a,lan-b\nlan-c".to_string());
        assert_eq!(split_members(raw), vec!["lan-a", "lan-b", "lan-c"]);
    }

    #[test]
    fn split_members_of_none_is_empty() {
        assert!(split_members(None).is_empty());
    }

    #[test]
    fn split_members_trims_blank_entries() {
        let raw = Some("lan-a, , lan-b".to_string());
        assert_eq!(split_members(raw), vec!["lan-a", "lan-b"]);
    }
}
