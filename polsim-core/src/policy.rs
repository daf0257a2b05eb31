//
// Copyright (c) The Polsim Contributors
//
// SPDX-License-Identifier: MIT
//

//! Ordered policy rules and the first-match evaluator.

use std::fmt;

use ipnetwork::Ipv4Network;

use crate::address::AddressBook;
use crate::matchmode::{evaluate_address_group, evaluate_service_group, MatchMode, MatchOutcome};
use crate::service::{Protocol, ServiceBook};

#[derive(Clone, Debug)]
pub struct PolicyRule {
    pub policy_id: String,
    pub name: String,
    pub priority: i64,
    pub source: Vec<String>,
    pub destination: Vec<String>,
    pub services: Vec<String>,
    pub action: String,
    pub enabled: bool,
    pub schedule: Option<String>,
    pub comment: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
    Unknown,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Allow => write!(f, "ALLOW"),
            Decision::Deny => write!(f, "DENY"),
            Decision::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReasonCode {
    MatchPolicyAccept,
    MatchPolicyDeny,
    UnknownMatchCondition,
    ImplicitDeny,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::MatchPolicyAccept => "MATCH_POLICY_ACCEPT",
            ReasonCode::MatchPolicyDeny => "MATCH_POLICY_DENY",
            ReasonCode::UnknownMatchCondition => "UNKNOWN_MATCH_CONDITION",
            ReasonCode::ImplicitDeny => "IMPLICIT_DENY",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Clone, Debug)]
pub struct MatchDetail {
    pub decision: Decision,
    pub matched_policy_id: Option<String>,
    pub matched_policy_name: Option<String>,
    pub matched_policy_action: Option<String>,
    // Destination object names of the matched policy, kept around so the
    // parallel driver can render the "routable" companion row in fuzzy
    // mode without re-resolving the policy.
    pub matched_policy_destination: Vec<String>,
    pub reason: ReasonCode,
}

impl MatchDetail {
    fn implicit_deny() -> Self {
        Self {
            decision: Decision::Deny,
            matched_policy_id: None,
            matched_policy_name: None,
            matched_policy_action: None,
            matched_policy_destination: Vec::new(),
            reason: ReasonCode::ImplicitDeny,
        }
    }
}

// A policy with no schedule is always active. `always` (case-insensitive)
// is likewise always active; anything else is a named schedule window this
// analyzer can't resolve and is therefore treated as inactive.
pub fn schedule_active(schedule: Option<&str>) -> bool {
    match schedule {
        None => true,
        Some(s) => s.eq_ignore_ascii_case("always"),
    }
}

#[allow(clippy::too_many_arguments)]
pub fn evaluate_policy(
    policies: &[PolicyRule],
    address_book: &AddressBook,
    service_book: &ServiceBook,
    src_network: Ipv4Network,
    dst_network: Ipv4Network,
    protocol: Protocol,
    port: u16,
    mode: MatchMode,
    ignore_schedule: bool,
) -> MatchDetail {
    for policy in policies {
        if !policy.enabled {
            continue;
        }
        if !ignore_schedule && !schedule_active(policy.schedule.as_deref()) {
            tracing::trace!(policy = %policy.policy_id, "skipping inactive schedule");
            continue;
        }

        let source_outcome = evaluate_address_group(address_book, &policy.source, src_network, mode);
        if source_outcome == MatchOutcome::NoMatch {
            continue;
        }
        let destination_outcome =
            evaluate_address_group(address_book, &policy.destination, dst_network, mode);
        if destination_outcome == MatchOutcome::NoMatch {
            continue;
        }
        let service_outcome = evaluate_service_group(service_book, &policy.services, protocol, port);
        if service_outcome == MatchOutcome::NoMatch {
            continue;
        }

        tracing::debug!(
            policy = %policy.policy_id,
            source = ?source_outcome,
            destination = ?destination_outcome,
            service = ?service_outcome,
            "candidate policy matched"
        );

        if source_outcome == MatchOutcome::Unknown
            || destination_outcome == MatchOutcome::Unknown
            || service_outcome == MatchOutcome::Unknown
        {
            return MatchDetail {
                decision: Decision::Unknown,
                matched_policy_id: Some(policy.policy_id.clone()),
                matched_policy_name: Some(policy.name.clone()),
                matched_policy_action: Some(policy.action.clone()),
                matched_policy_destination: policy.destination.clone(),
                reason: ReasonCode::UnknownMatchCondition,
            };
        }

        let accept = policy.action.eq_ignore_ascii_case("accept");
        return MatchDetail {
            decision: if accept { Decision::Allow } else { Decision::Deny },
            matched_policy_id: Some(policy.policy_id.clone()),
            matched_policy_name: Some(policy.name.clone()),
            matched_policy_action: Some(policy.action.clone()),
            matched_policy_destination: policy.destination.clone(),
            reason: if accept {
                ReasonCode::MatchPolicyAccept
            } else {
                ReasonCode::MatchPolicyDeny
            },
        };
    }

    MatchDetail::implicit_deny()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::AddressObject;
    use crate::service::{ServiceEntry, ServiceObject};

    fn net(cidr: &str) -> Ipv4Network {
        cidr.parse().unwrap()
    }

    fn books() -> (AddressBook, ServiceBook) {
        let mut addresses = AddressBook::new();
        addresses.insert_object(AddressObject::subnet("lan", net("10.0.0.0/24")));
        addresses.insert_object(AddressObject::subnet("dmz", net("192.168.1.0/24")));

        let mut services = ServiceBook::new();
        services.insert_object(ServiceObject::new(
            "https",
            vec![ServiceEntry::new(Protocol::Tcp, 443, 443).unwrap()],
        ));
        (addresses, services)
    }

    fn rule(id: &str, priority: i64, action: &str) -> PolicyRule {
        PolicyRule {
            policy_id: id.to_string(),
            name: format!("rule-{id}"),
            priority,
            source: vec!["lan".into()],
            destination: vec!["dmz".into()],
            services: vec!["https".into()],
            action: action.to_string(),
            enabled: true,
            schedule: None,
            comment: None,
        }
    }

    #[test]
    fn exact_match_returns_accept() {
        let (addresses, services) = books();
        let policies = vec![rule("1", 1, "accept")];
        let detail = evaluate_policy(
            &policies,
            &addresses,
            &services,
            net("10.0.0.5/32"),
            net("192.168.1.0/24"),
            Protocol::Tcp,
            443,
            MatchMode::Segment,
            false,
        );
        assert_eq!(detail.decision, Decision::Allow);
        assert_eq!(detail.reason, ReasonCode::MatchPolicyAccept);
        assert_eq!(detail.matched_policy_id.as_deref(), Some("1"));
    }

    #[test]
    fn no_matching_rule_is_implicit_deny() {
        let (addresses, services) = books();
        let policies = vec![rule("1", 1, "accept")];
        let detail = evaluate_policy(
            &policies,
            &addresses,
            &services,
            net("172.16.0.0/24"),
            net("192.168.1.0/24"),
            Protocol::Tcp,
            443,
            MatchMode::Segment,
            false,
        );
        assert_eq!(detail.decision, Decision::Deny);
        assert_eq!(detail.reason, ReasonCode::ImplicitDeny);
        assert!(detail.matched_policy_id.is_none());
    }

    #[test]
    fn first_match_wins_over_later_more_specific_rule() {
        let (addresses, services) = books();
        let policies = vec![rule("1", 1, "deny"), rule("2", 2, "accept")];
        let detail = evaluate_policy(
            &policies,
            &addresses,
            &services,
            net("10.0.0.0/24"),
            net("192.168.1.0/24"),
            Protocol::Tcp,
            443,
            MatchMode::Segment,
            false,
        );
        assert_eq!(detail.decision, Decision::Deny);
        assert_eq!(detail.matched_policy_id.as_deref(), Some("1"));
    }

    #[test]
    fn disabled_rule_is_skipped() {
        let (addresses, services) = books();
        let mut first = rule("1", 1, "deny");
        first.enabled = false;
        let policies = vec![first, rule("2", 2, "accept")];
        let detail = evaluate_policy(
            &policies,
            &addresses,
            &services,
            net("10.0.0.0/24"),
            net("192.168.1.0/24"),
            Protocol::Tcp,
            443,
            MatchMode::Segment,
            false,
        );
        assert_eq!(detail.matched_policy_id.as_deref(), Some("2"));
    }

    #[test]
    fn schedule_inactive_is_skipped() {
        let (addresses, services) = books();
        let mut first = rule("1", 1, "deny");
        first.schedule = Some("business-hours".into());
        let policies = vec![first, rule("2", 2, "accept")];
        let detail = evaluate_policy(
            &policies,
            &addresses,
            &services,
            net("10.0.0.0/24"),
            net("192.168.1.0/24"),
            Protocol::Tcp,
            443,
            MatchMode::Segment,
            false,
        );
        assert_eq!(detail.matched_policy_id.as_deref(), Some("2"));
    }

    #[test]
    fn schedule_ignored_flag_bypasses_inactive_schedule() {
        let (addresses, services) = books();
        let mut first = rule("1", 1, "deny");
        first.schedule = Some("business-hours".into());
        let policies = vec![first, rule("2", 2, "accept")];
        let detail = evaluate_policy(
            &policies,
            &addresses,
            &services,
            net("10.0.0.0/24"),
            net("192.168.1.0/24"),
            Protocol::Tcp,
            443,
            MatchMode::Segment,
            true,
        );
        assert_eq!(detail.matched_policy_id.as_deref(), Some("1"));
        assert_eq!(detail.decision, Decision::Deny);
    }

    #[test]
    fn unresolved_destination_yields_unknown_before_action_is_applied() {
        let mut addresses = AddressBook::new();
        addresses.insert_object(AddressObject::subnet("lan", net("10.0.0.0/24")));
        addresses.insert_object(AddressObject::named("some-fqdn.example.com"));
        let mut services = ServiceBook::new();
        services.insert_object(ServiceObject::new(
            "https",
            vec![ServiceEntry::new(Protocol::Tcp, 443, 443).unwrap()],
        ));

        let mut unknown_rule = rule("1", 1, "accept");
        unknown_rule.destination = vec!["some-fqdn.example.com".into()];
        let policies = vec![unknown_rule];

        let detail = evaluate_policy(
            &policies,
            &addresses,
            &services,
            net("10.0.0.0/24"),
            net("192.168.1.0/24"),
            Protocol::Tcp,
            443,
            MatchMode::Segment,
            false,
        );
        assert_eq!(detail.decision, Decision::Unknown);
        assert_eq!(detail.reason, ReasonCode::UnknownMatchCondition);
    }
}
