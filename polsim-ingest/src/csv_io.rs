//
// Copyright (c) The Polsim Contributors
//
// SPDX-License-Identifier: MIT
//

//! CSV and ports-file readers, and the output/routable CSV writers.

use std::net::Ipv4Addr;
use std::path::Path;

use ipnetwork::Ipv4Network;
use polsim_core::address::Ipv4NetworkExt;
use polsim_core::driver::{ProbeResult, RoutableRow};
use polsim_core::probe::{CarrierFields, DestinationRecord, PortSpec, SourceRecord};
use polsim_core::service::Protocol;

use crate::error::{Error, Result};

const REQUIRED_NETWORK_HEADER: &str = "Network Segment";

pub const OUTPUT_HEADER: &[&str] = &[
    "src_network_segment",
    "dst_network_segment",
    "dst_gn",
    "dst_site",
    "dst_location",
    "service_label",
    "protocol",
    "port",
    "decision",
    "matched_policy_id",
    "matched_policy_action",
    "reason",
];

// Accepts either a bare dotted-quad (treated as a /32 host) or a full
// CIDR, and masks any host bits present, mirroring `ip_network(..., strict=False)`.
pub fn parse_ipv4_cidr(value: &str) -> Result<Ipv4Network> {
    let value = value.trim();
    let network: Ipv4Network = if value.contains('/') {
        value
            .parse()
            .map_err(|_| Error::InvalidCidr(value.to_string()))?
    } else {
        let addr: Ipv4Addr = value
            .parse()
            .map_err(|_| Error::InvalidCidr(value.to_string()))?;
        Ipv4Network::new(addr, 32).map_err(|_| Error::InvalidCidr(value.to_string()))?
    };
    Ok(network.apply_mask())
}

fn read_network_records(path: &Path) -> Result<Vec<(Ipv4Network, CarrierFields)>> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    if !headers.iter().any(|h| h == REQUIRED_NETWORK_HEADER) {
        return Err(Error::MissingCsvHeader {
            path: path.display().to_string(),
            header: REQUIRED_NETWORK_HEADER,
        });
    }

    let mut records = Vec::new();
    for result in reader.records() {
        let record = result?;
        let mut fields = CarrierFields::new();
        let mut network = None;
        for (header, value) in headers.iter().zip(record.iter()) {
            let value = value.trim().to_string();
            if header == REQUIRED_NETWORK_HEADER {
                network = Some(parse_ipv4_cidr(&value)?);
            }
            fields.insert(header.to_string(), value);
        }
        let network = network.expect("required header presence was validated above");
        records.push((network, fields));
    }
    Ok(records)
}

pub fn read_source_csv(path: &Path) -> Result<Vec<SourceRecord>> {
    Ok(read_network_records(path)?
        .into_iter()
        .map(|(network, fields)| SourceRecord { network, fields })
        .collect())
}

pub fn read_destination_csv(path: &Path) -> Result<Vec<DestinationRecord>> {
    Ok(read_network_records(path)?
        .into_iter()
        .map(|(network, fields)| DestinationRecord { network, fields })
        .collect())
}

// Parses the `<label>,<port>/<proto>` ports file grammar: one entry per
// non-empty line, blank lines skipped, everything else a hard parse error.
pub fn parse_ports_file(contents: &str) -> Result<Vec<PortSpec>> {
    let mut specs = Vec::new();
    for raw_line in contents.lines() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((label, value)) = line.split_once(',') else {
            return Err(Error::InvalidPortLine(line.to_string()));
        };
        let label = label.trim().to_string();
        let value = value.trim();
        let Some((port_str, proto_str)) = value.split_once('/') else {
            return Err(Error::InvalidPortLine(line.to_string()));
        };
        let port_str = port_str.trim();
        if !port_str.chars().all(|c| c.is_ascii_digit()) || port_str.is_empty() {
            return Err(Error::InvalidPortLine(line.to_string()));
        }
        let port: u32 = port_str
            .parse()
            .map_err(|_| Error::InvalidPortLine(line.to_string()))?;
        if !(1..=65535).contains(&port) {
            return Err(Error::PortOutOfRange(port_str.to_string()));
        }
        let protocol = match proto_str.trim().to_ascii_lowercase().as_str() {
            "tcp" => Protocol::Tcp,
            "udp" => Protocol::Udp,
            other => return Err(Error::UnsupportedProtocol(other.to_string())),
        };
        specs.push(PortSpec {
            label,
            protocol,
            port: port as u16,
        });
    }
    Ok(specs)
}

pub fn read_ports_file(path: &Path) -> Result<Vec<PortSpec>> {
    let contents = std::fs::read_to_string(path)?;
    parse_ports_file(&contents)
}

#[derive(Clone, Debug, serde::Serialize)]
pub struct OutputRow {
    pub src_network_segment: String,
    pub dst_network_segment: String,
    pub dst_gn: String,
    pub dst_site: String,
    pub dst_location: String,
    pub service_label: String,
    pub protocol: String,
    pub port: u16,
    pub decision: String,
    pub matched_policy_id: String,
    pub matched_policy_action: String,
    pub reason: String,
}

fn carrier(fields: &CarrierFields, key: &str) -> String {
    fields.get(key).cloned().unwrap_or_default()
}

pub fn output_row_from_result(result: &ProbeResult) -> OutputRow {
    let destination_fields = &result.probe.destination.fields;
    OutputRow {
        src_network_segment: result.probe.source.network.to_string(),
        dst_network_segment: result.probe.destination_network.to_string(),
        dst_gn: carrier(destination_fields, "GN"),
        dst_site: carrier(destination_fields, "Site"),
        dst_location: carrier(destination_fields, "Location"),
        service_label: result.probe.port_spec.label.clone(),
        protocol: result.probe.port_spec.protocol.to_string(),
        port: result.probe.port_spec.port,
        decision: result.detail.decision.to_string(),
        matched_policy_id: result.detail.matched_policy_id.clone().unwrap_or_default(),
        matched_policy_action: result
            .detail
            .matched_policy_action
            .clone()
            .unwrap_or_default(),
        reason: result.detail.reason.to_string(),
    }
}

// The routable companion row carries the matched policy's destination
// names instead of the probed CIDR in `dst_network_segment`; every other
// column matches the corresponding `OutputRow` exactly.
pub fn output_row_from_routable(row: &RoutableRow) -> OutputRow {
    let mut output = output_row_from_result(&ProbeResult {
        probe: row.probe.clone(),
        detail: row.detail.clone(),
    });
    output.dst_network_segment = row.destination_names.clone();
    output
}

// Header is written explicitly, unconditionally, before any rows: relying
// on serde's on-first-serialize header emission drops the header entirely
// when `rows` is empty (an empty `--filter-policy-id` match, or an empty
// fuzzy-mode routable set), and the output file must always have one.
pub fn write_output_rows(path: &Path, rows: &[OutputRow]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)?;
    writer.write_record(OUTPUT_HEADER)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ports_file_parses_label_port_protocol() {
        let specs = parse_ports_file("web,443/tcp\ndns,53/udp\n").unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].label, "web");
        assert_eq!(specs[0].port, 443);
        assert_eq!(specs[0].protocol, Protocol::Tcp);
    }

    #[test]
    fn ports_file_skips_blank_lines() {
        let specs = parse_ports_file("\nweb,443/tcp\n\n").unwrap();
        assert_eq!(specs.len(), 1);
    }

    #[test]
    fn ports_file_rejects_missing_comma() {
        assert!(parse_ports_file("443/tcp").is_err());
    }

    #[test]
    fn ports_file_rejects_out_of_range_port() {
        assert!(parse_ports_file("web,70000/tcp").is_err());
    }

    #[test]
    fn ports_file_rejects_unknown_protocol() {
        assert!(parse_ports_file("web,443/sctp").is_err());
    }

    #[test]
    fn bare_ip_is_treated_as_host_cidr() {
        let network = parse_ipv4_cidr("10.0.0.5").unwrap();
        assert_eq!(network.prefix(), 32);
    }

    #[test]
    fn host_bits_are_masked_on_parse() {
        let network = parse_ipv4_cidr("10.0.0.5/24").unwrap();
        assert_eq!(network.network(), "10.0.0.0".parse::<Ipv4Addr>().unwrap());
    }

    #[test]
    fn output_rows_serialize_with_the_exact_header_order() {
        let row = OutputRow {
            src_network_segment: "10.0.0.0/24".into(),
            dst_network_segment: "192.168.1.0/24".into(),
            dst_gn: "GN1".into(),
            dst_site: "HQ".into(),
            dst_location: "Floor 2".into(),
            service_label: "https".into(),
            protocol: "tcp".into(),
            port: 443,
            decision: "ALLOW".into(),
            matched_policy_id: "P1".into(),
            matched_policy_action: "accept".into(),
            reason: "MATCH_POLICY_ACCEPT".into(),
        };

        let path = std::env::temp_dir().join(format!(
            "polsim-output-row-test-{}.csv",
            std::process::id()
        ));
        write_output_rows(&path, std::slice::from_ref(&row)).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).ok();

        let mut lines = contents.lines();
        assert_eq!(lines.next().unwrap(), OUTPUT_HEADER.join(","));
        assert_eq!(
            lines.next().unwrap(),
            "10.0.0.0/24,192.168.1.0/24,GN1,HQ,Floor 2,https,tcp,443,ALLOW,P1,accept,MATCH_POLICY_ACCEPT"
        );
    }

    #[test]
    fn header_is_written_even_when_there_are_no_rows() {
        let path = std::env::temp_dir().join(format!(
            "polsim-output-row-empty-test-{}.csv",
            std::process::id()
        ));
        write_output_rows(&path, &[]).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).ok();

        let mut lines = contents.lines();
        assert_eq!(lines.next().unwrap(), OUTPUT_HEADER.join(","));
        assert!(lines.next().is_none());
    }
}
