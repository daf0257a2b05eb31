//
// Copyright (c) The Polsim Contributors
//
// SPDX-License-Identifier: MIT
//

//! The parallel driver: fans a probe sequence out across a worker pool and
//! collects results back in submission order, then offers the two
//! result-shaping helpers (routable-row emission, policy-id filtering) the
//! CLI layer composes on top of the raw evaluation output.

use rayon::prelude::*;
use rayon::ThreadPoolBuilder;

use crate::address::AddressBook;
use crate::matchmode::MatchMode;
use crate::policy::{evaluate_policy, Decision, MatchDetail, PolicyRule};
use crate::probe::Probe;
use crate::service::ServiceBook;

// Everything a worker thread needs to evaluate a probe, built once in the
// single-threaded setup phase and shared read-only via `Arc` from there on.
pub struct SimulationContext {
    pub policies: Vec<PolicyRule>,
    pub address_book: AddressBook,
    pub service_book: ServiceBook,
    pub mode: MatchMode,
    pub ignore_schedule: bool,
}

impl SimulationContext {
    fn evaluate_one(&self, probe: Probe) -> ProbeResult {
        let detail = evaluate_policy(
            &self.policies,
            &self.address_book,
            &self.service_book,
            probe.source.network,
            probe.destination_network,
            probe.port_spec.protocol,
            probe.port_spec.port,
            self.mode,
            self.ignore_schedule,
        );
        ProbeResult { probe, detail }
    }
}

#[derive(Clone, Debug)]
pub struct ProbeResult {
    pub probe: Probe,
    pub detail: MatchDetail,
}

// Mirrors the original's worker-count resolution: an explicit request is
// clamped to the number of records to evaluate (spinning up more workers
// than there is work to hand out buys nothing); `0` means "auto", resolved
// against the available parallelism, again clamped to the record count.
pub fn resolve_worker_count(requested: usize, record_count: usize) -> usize {
    if record_count == 0 {
        return 1;
    }
    let available = if requested == 0 {
        std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(1)
    } else {
        requested
    };
    available.min(record_count)
}

// Runs every probe through the context and returns results in the same
// order the probes were submitted in, regardless of how rayon schedules the
// underlying work across threads. `workers <= 1` takes a plain sequential
// path with no thread-pool setup cost.
pub fn run(context: &SimulationContext, probes: Vec<Probe>, workers: usize) -> Vec<ProbeResult> {
    if workers <= 1 || probes.len() <= 1 {
        return probes.into_iter().map(|p| context.evaluate_one(p)).collect();
    }

    let pool = ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .expect("failed to build worker thread pool");

    // Chunk size mirrors a `ProcessPoolExecutor.map(chunksize=...)` split:
    // enough chunks per worker to keep the pool busy even if some probes
    // resolve faster than others, without paying per-probe scheduling
    // overhead.
    let chunk_size = std::cmp::max(1, probes.len() / (workers * 4));

    pool.install(|| {
        probes
            .into_par_iter()
            .with_min_len(chunk_size)
            .map(|probe| context.evaluate_one(probe))
            .collect()
    })
}

// Keeps only the rows whose matched policy carries the given id, discarding
// implicit-deny and unknown-outcome rows that never matched any policy.
pub fn filter_by_policy_id(results: Vec<ProbeResult>, policy_id: &str) -> Vec<ProbeResult> {
    results
        .into_iter()
        .filter(|r| r.detail.matched_policy_id.as_deref() == Some(policy_id))
        .collect()
}

#[derive(Clone, Debug)]
pub struct RoutableRow {
    pub probe: Probe,
    pub detail: MatchDetail,
    pub destination_names: String,
}

// In fuzzy mode, every allowed probe also produces a "routable" companion
// row whose destination column is a joined rendering of the matched
// policy's destination object names, rather than the raw probed CIDR — a
// reachability view layered on top of the per-probe decision. Only
// meaningful in fuzzy mode, where the probed CIDR may only partially
// overlap the matched policy's destination.
pub fn routable_rows(results: &[ProbeResult], mode: MatchMode) -> Vec<RoutableRow> {
    if !matches!(mode, MatchMode::Fuzzy) {
        return Vec::new();
    }
    results
        .iter()
        .filter(|r| r.detail.decision == Decision::Allow)
        .map(|r| RoutableRow {
            probe: r.probe.clone(),
            detail: r.detail.clone(),
            destination_names: r.detail.matched_policy_destination.join(", "),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::AddressObject;
    use crate::policy::ReasonCode;
    use crate::probe::{plan_probes, CarrierFields, DestinationRecord, PortSpec, SourceRecord};
    use crate::service::{Protocol, ServiceEntry, ServiceObject};

    fn net(cidr: &str) -> ipnetwork::Ipv4Network {
        cidr.parse().unwrap()
    }

    fn rule(id: &str, priority: i64) -> PolicyRule {
        PolicyRule {
            policy_id: id.to_string(),
            name: format!("rule-{id}"),
            priority,
            source: vec!["lan".into()],
            destination: vec!["dmz".into()],
            services: vec!["https".into()],
            action: "accept".to_string(),
            enabled: true,
            schedule: None,
            comment: None,
        }
    }

    fn context() -> SimulationContext {
        let mut address_book = AddressBook::new();
        address_book.insert_object(AddressObject::subnet("lan", net("10.0.0.0/24")));
        address_book.insert_object(AddressObject::subnet("dmz", net("192.168.1.0/24")));
        let mut service_book = ServiceBook::new();
        service_book.insert_object(ServiceObject::new(
            "https",
            vec![ServiceEntry::new(Protocol::Tcp, 443, 443).unwrap()],
        ));

        SimulationContext {
            policies: vec![rule("1", 1)],
            address_book,
            service_book,
            mode: MatchMode::Segment,
            ignore_schedule: false,
        }
    }

    fn sample_probes(count: usize) -> Vec<Probe> {
        let sources: Vec<SourceRecord> = (0..count)
            .map(|i| SourceRecord {
                network: ipnetwork::Ipv4Network::new(
                    std::net::Ipv4Addr::new(10, 0, 0, i as u8),
                    32,
                )
                .unwrap(),
                fields: CarrierFields::new(),
            })
            .collect();
        let destinations = vec![DestinationRecord {
            network: net("192.168.1.0/24"),
            fields: CarrierFields::new(),
        }];
        let ports = vec![PortSpec {
            label: "https".into(),
            protocol: Protocol::Tcp,
            port: 443,
        }];
        plan_probes(&sources, &destinations, &ports, MatchMode::Segment)
    }

    #[test]
    fn sequential_and_parallel_paths_agree_on_order() {
        let ctx = context();
        let probes = sample_probes(50);

        let sequential = run(&ctx, probes.clone(), 1);
        let parallel = run(&ctx, probes, 4);

        assert_eq!(sequential.len(), parallel.len());
        for (a, b) in sequential.iter().zip(parallel.iter()) {
            assert_eq!(a.probe.source.network, b.probe.source.network);
            assert_eq!(a.detail.reason, b.detail.reason);
        }
    }

    #[test]
    fn resolve_worker_count_clamps_to_record_count() {
        assert_eq!(resolve_worker_count(16, 3), 3);
        assert_eq!(resolve_worker_count(0, 0), 1);
    }

    #[test]
    fn routable_rows_are_empty_outside_fuzzy_mode() {
        let ctx = context();
        let probes = sample_probes(2);
        let results = run(&ctx, probes, 1);
        assert!(routable_rows(&results, MatchMode::Segment).is_empty());
    }

    #[test]
    fn routable_rows_join_destination_names_in_fuzzy_mode() {
        let ctx = context();
        let probes = sample_probes(2);
        let results = run(&ctx, probes, 1);
        let rows = routable_rows(&results, MatchMode::Fuzzy);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].destination_names, "dmz");
    }

    #[test]
    fn filter_by_policy_id_drops_non_matching_rows() {
        let ctx = context();
        let probes = sample_probes(2);
        let mut results = run(&ctx, probes, 1);
        results[0].detail.matched_policy_id = Some("other".into());
        let filtered = filter_by_policy_id(results, "1");
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].detail.reason, ReasonCode::MatchPolicyAccept);
    }
}
