//
// Copyright (c) The Polsim Contributors
//
// SPDX-License-Identifier: MIT
//

//! Reads an equivalent rule set from a MySQL/MariaDB-compatible schema:
//! `cfg_address`, `cfg_address_group`, `cfg_service_group`, `cfg_policy`.
//! An optional fabrication-plant name filters every query to one tenant's
//! rows, carried over from the original CLI's `--fab-name` argument.

use sqlx::mysql::MySqlPoolOptions;
use sqlx::Row;

use polsim_core::address::{AddressBook, AddressGroup, AddressObject};
use polsim_core::policy::PolicyRule;
use polsim_core::service::{Protocol, ServiceBook, ServiceEntry, ServiceGroup, ServiceObject};

use crate::error::{Error, Result};
use crate::fortigate::parse_address_object;
use crate::ParsedRules;

pub struct DatabaseConfig<'a> {
    pub user: &'a str,
    pub password: &'a str,
    pub host: &'a str,
    pub database: &'a str,
    pub fab_name: Option<&'a str>,
}

fn parse_json_array(value: Option<&str>) -> Result<Vec<String>> {
    let Some(value) = value else { return Ok(Vec::new()) };
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let parsed: serde_json::Value =
        serde_json::from_str(trimmed).map_err(|_| Error::InvalidJsonArray(value.to_string()))?;
    match parsed {
        serde_json::Value::Array(items) => Ok(items
            .into_iter()
            .map(|item| match item {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            })
            .collect()),
        _ => Err(Error::InvalidJsonArray(value.to_string())),
    }
}

// Registers a service name a policy or group referenced but that was never
// separately defined: explicit `tcp_`/`udp_` strings resolve directly,
// everything else falls back to the bundled well-known-port catalogue (the
// closest portable analogue to a host service-name lookup), and existing
// definitions or groups are never overwritten.
fn register_service_name(service_book: &mut ServiceBook, name: &str) {
    let normalized = name.trim();
    if normalized.is_empty() || service_book.contains_name(normalized) {
        return;
    }
    if normalized.eq_ignore_ascii_case("all") {
        service_book.insert_object(ServiceObject::new(
            "ALL",
            vec![polsim_core::service::ServiceEntry::any()],
        ));
        return;
    }
    let lowered = normalized.to_ascii_lowercase();
    if lowered.starts_with("tcp_") || lowered.starts_with("udp_") {
        if let Ok(entry) = crate::fortigate::parse_service_entry(normalized) {
            service_book.insert_object(ServiceObject::new(normalized, vec![entry]));
        }
        return;
    }
    if let Some(object) = crate::catalog::lookup(normalized) {
        // The catalogue only tracks one protocol per name; a plain service
        // lookup like the original's host-service-database fallback should
        // answer for both, so widen single-protocol catalogue hits to both.
        let widened: Vec<ServiceEntry> = object
            .entries
            .iter()
            .flat_map(|entry| {
                let (start, end) = entry.port_range().unwrap_or((0, 0));
                [Protocol::Tcp, Protocol::Udp]
                    .into_iter()
                    .filter_map(move |proto| ServiceEntry::new(proto, start, end).ok())
            })
            .collect();
        service_book.insert_object(ServiceObject::new(normalized, widened));
    }
}

pub async fn parse_database(config: DatabaseConfig<'_>) -> Result<ParsedRules> {
    let url = format!(
        "mysql://{}:{}@{}/{}",
        config.user, config.password, config.host, config.database
    );
    let pool = MySqlPoolOptions::new()
        .max_connections(1)
        .connect(&url)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

    let mut address_book = AddressBook::new();
    let mut service_book = ServiceBook::new();
    let mut policies = Vec::new();

    let address_query = match config.fab_name {
        Some(fab) => sqlx::query(
            "SELECT object_name, address_type, subnet, start_ip, end_ip FROM cfg_address WHERE fab_name = ?",
        )
        .bind(fab),
        None => sqlx::query("SELECT object_name, address_type, subnet, start_ip, end_ip FROM cfg_address"),
    };
    let rows = address_query
        .fetch_all(&pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
    for row in rows {
        let name: String = row.try_get("object_name").map_err(|e| Error::Database(e.to_string()))?;
        if name.eq_ignore_ascii_case("all") {
            continue;
        }
        let address_type: String = row
            .try_get("address_type")
            .map_err(|e| Error::Database(e.to_string()))?;
        let subnet: Option<String> = row.try_get("subnet").ok();
        let start_ip: Option<String> = row.try_get("start_ip").ok();
        let end_ip: Option<String> = row.try_get("end_ip").ok();

        let object = parse_address_object(&name, &address_type, subnet.as_deref(), start_ip.as_deref(), end_ip.as_deref())
            .unwrap_or_else(|_| AddressObject::named(name.as_str()));
        address_book.insert_object(object);
    }

    let group_query = match config.fab_name {
        Some(fab) => sqlx::query("SELECT group_name, members FROM cfg_address_group WHERE fab_name = ?").bind(fab),
        None => sqlx::query("SELECT group_name, members FROM cfg_address_group"),
    };
    let rows = group_query
        .fetch_all(&pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
    for row in rows {
        let group_name: String = row.try_get("group_name").map_err(|e| Error::Database(e.to_string()))?;
        let members_raw: Option<String> = row.try_get("members").ok();
        let members = parse_json_array(members_raw.as_deref())?;
        address_book.insert_group(AddressGroup::new(group_name, members));
    }

    let svc_group_query = match config.fab_name {
        Some(fab) => sqlx::query("SELECT group_name, members FROM cfg_service_group WHERE fab_name = ?").bind(fab),
        None => sqlx::query("SELECT group_name, members FROM cfg_service_group"),
    };
    let rows = svc_group_query
        .fetch_all(&pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
    let mut service_group_members = Vec::new();
    for row in rows {
        let group_name: String = row.try_get("group_name").map_err(|e| Error::Database(e.to_string()))?;
        let members_raw: Option<String> = row.try_get("members").ok();
        let members = parse_json_array(members_raw.as_deref())?;
        service_group_members.extend(members.iter().cloned());
        service_book.insert_group(ServiceGroup::new(group_name, members));
    }

    let policy_query = match config.fab_name {
        Some(fab) => sqlx::query(
            "SELECT priority, policy_id, src_objects, dst_objects, service_objects, action, is_enabled, comments \
             FROM cfg_policy WHERE fab_name = ?",
        )
        .bind(fab),
        None => sqlx::query(
            "SELECT priority, policy_id, src_objects, dst_objects, service_objects, action, is_enabled, comments \
             FROM cfg_policy",
        ),
    };
    let rows = policy_query
        .fetch_all(&pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
    for row in rows {
        let policy_id: String = row.try_get("policy_id").map_err(|e| Error::Database(e.to_string()))?;
        let priority: i64 = row.try_get("priority").map_err(|e| Error::Database(e.to_string()))?;
        let src_objects = parse_json_array(row.try_get::<Option<String>, _>("src_objects").ok().flatten().as_deref())?;
        let dst_objects = parse_json_array(row.try_get::<Option<String>, _>("dst_objects").ok().flatten().as_deref())?;
        let service_raw: Option<String> = row.try_get("service_objects").ok().flatten();
        let services = match &service_raw {
            Some(raw) if raw.trim_start().starts_with('[') => parse_json_array(Some(raw))?,
            Some(raw) => vec![raw.clone()],
            None => Vec::new(),
        };
        for service_name in &services {
            register_service_name(&mut service_book, service_name);
        }
        let action: String = row.try_get("action").unwrap_or_else(|_| "deny".to_string());
        let is_enabled: bool = row.try_get("is_enabled").unwrap_or(false);
        let comments: Option<String> = row.try_get("comments").ok().flatten();

        policies.push(PolicyRule {
            policy_id: policy_id.clone(),
            name: policy_id,
            priority,
            source: src_objects,
            destination: dst_objects,
            services,
            action,
            enabled: is_enabled,
            schedule: Some("always".to_string()),
            comment: comments,
        });
    }

    crate::catalog::populate_default_services(&mut service_book, None);
    if !address_book.contains_name("all") {
        address_book.insert_object(AddressObject::subnet("all", "0.0.0.0/0".parse().unwrap()));
    }
    for member in &service_group_members {
        register_service_name(&mut service_book, member);
    }

    policies.sort_by_key(|p| p.priority);

    Ok(ParsedRules {
        address_book,
        service_book,
        policies,
    })
}
