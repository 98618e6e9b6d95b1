use crate::engine::Rcodes;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

/// Misconfiguration tag: an NS record whose rdata is the root label.
pub const INVALID_NS_RECORD: &str = "invalid_ns_record";
/// Misconfiguration tag: no NS records at the child zone.
pub const MISSING_NS_RECORDS: &str = "missing_ns_records";
/// Misconfiguration tag: NS records owned by an address-shaped name.
pub const IP_NS_RECORDS: &str = "ip_ns_records";

/// Which bucket family a dependency value is recorded into: the plain
/// buckets of the target itself, or the "ps_" buckets filled while
/// resolving public suffix infrastructure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepPrefix {
    Host,
    PublicSuffix,
}

/// The categories of the flat dependency summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepKind {
    Ns,
    Ipv4,
    Ipv6,
    Tld,
    Sld,
}

/// One observed query outcome, attached to a zone classified as
/// hazardous or misconfigured.
#[derive(Debug, Clone)]
pub struct QuerySummary {
    pub name: String,
    pub nameserver: IpAddr,
    pub rcodes: Rcodes,
}

/// Query summaries grouped by the zone name they describe.
#[derive(Debug, Clone, Default)]
pub struct QuerySummaryList {
    queries: BTreeMap<String, Vec<(String, Rcodes)>>,
}

impl QuerySummaryList {
    pub fn add(&mut self, summary: QuerySummary) {
        let name = summary.name.to_ascii_lowercase();
        self.queries
            .entry(name)
            .or_default()
            .push((summary.nameserver.to_string(), summary.rcodes));
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.queries.contains_key(name)
    }

    /// The json form: `{ name: [ {nameserver, rcodes}, ... ], ... }`.
    pub fn json(&self) -> Value {
        let mut map = serde_json::Map::new();
        for (name, entries) in &self.queries {
            let list: Vec<Value> = entries
                .iter()
                .map(|(nameserver, rcodes)| {
                    let mut entry = serde_json::Map::new();
                    entry.insert("nameserver".to_string(), Value::String(nameserver.clone()));
                    entry.insert("rcodes".to_string(), rcodes.to_json());
                    Value::Object(entry)
                })
                .collect();
            map.insert(name.clone(), Value::Array(list));
        }
        Value::Object(map)
    }
}

/// The fixed-field dependency record accumulated over one crawl. Every
/// key of the final summary exists from the start, so downstream code
/// never checks for presence. All set values are case folded on entry
/// and kept sorted by the set type.
#[derive(Debug, Default)]
pub struct Dependencies {
    ns: BTreeSet<String>,
    ipv4: BTreeSet<String>,
    ipv6: BTreeSet<String>,
    tld: BTreeSet<String>,
    sld: BTreeSet<String>,
    ps_ns: BTreeSet<String>,
    ps_ipv4: BTreeSet<String>,
    ps_ipv6: BTreeSet<String>,
    ps_tld: BTreeSet<String>,
    ps_sld: BTreeSet<String>,
    pub hazardous_domains: QuerySummaryList,
    pub misconfigured_domains: BTreeMap<&'static str, QuerySummaryList>,
    pub nonhazardous_domains: BTreeSet<String>,
}

impl Dependencies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one dependency value into the given bucket.
    pub fn add(&mut self, prefix: DepPrefix, kind: DepKind, value: &str) {
        let value = value.to_ascii_lowercase();
        let bucket = match (prefix, kind) {
            (DepPrefix::Host, DepKind::Ns) => &mut self.ns,
            (DepPrefix::Host, DepKind::Ipv4) => &mut self.ipv4,
            (DepPrefix::Host, DepKind::Ipv6) => &mut self.ipv6,
            (DepPrefix::Host, DepKind::Tld) => &mut self.tld,
            (DepPrefix::Host, DepKind::Sld) => &mut self.sld,
            (DepPrefix::PublicSuffix, DepKind::Ns) => &mut self.ps_ns,
            (DepPrefix::PublicSuffix, DepKind::Ipv4) => &mut self.ps_ipv4,
            (DepPrefix::PublicSuffix, DepKind::Ipv6) => &mut self.ps_ipv6,
            (DepPrefix::PublicSuffix, DepKind::Tld) => &mut self.ps_tld,
            (DepPrefix::PublicSuffix, DepKind::Sld) => &mut self.ps_sld,
        };
        bucket.insert(value);
    }

    /// Record a query summary under a misconfiguration tag.
    pub fn add_misconfigured(&mut self, tag: &'static str, summary: QuerySummary) {
        self.misconfigured_domains.entry(tag).or_default().add(summary);
    }

    pub fn bucket(&self, prefix: DepPrefix, kind: DepKind) -> &BTreeSet<String> {
        match (prefix, kind) {
            (DepPrefix::Host, DepKind::Ns) => &self.ns,
            (DepPrefix::Host, DepKind::Ipv4) => &self.ipv4,
            (DepPrefix::Host, DepKind::Ipv6) => &self.ipv6,
            (DepPrefix::Host, DepKind::Tld) => &self.tld,
            (DepPrefix::Host, DepKind::Sld) => &self.sld,
            (DepPrefix::PublicSuffix, DepKind::Ns) => &self.ps_ns,
            (DepPrefix::PublicSuffix, DepKind::Ipv4) => &self.ps_ipv4,
            (DepPrefix::PublicSuffix, DepKind::Ipv6) => &self.ps_ipv6,
            (DepPrefix::PublicSuffix, DepKind::Tld) => &self.ps_tld,
            (DepPrefix::PublicSuffix, DepKind::Sld) => &self.ps_sld,
        }
    }

    /// Project the accumulated sets into the deterministic per-host
    /// summary object. Every key is always present; list values are
    /// sorted and case folded.
    pub fn summary(&self, query: &str) -> Value {
        let set_json = |set: &BTreeSet<String>| -> Value {
            Value::Array(set.iter().cloned().map(Value::String).collect())
        };
        let mut misconfigured = serde_json::Map::new();
        for (tag, list) in &self.misconfigured_domains {
            misconfigured.insert(tag.to_string(), list.json());
        }

        let mut map = serde_json::Map::new();
        map.insert("query".to_string(), Value::String(query.to_string()));
        map.insert("ns".to_string(), set_json(&self.ns));
        map.insert("ipv4".to_string(), set_json(&self.ipv4));
        map.insert("ipv6".to_string(), set_json(&self.ipv6));
        map.insert("tld".to_string(), set_json(&self.tld));
        map.insert("sld".to_string(), set_json(&self.sld));
        map.insert("ps_ns".to_string(), set_json(&self.ps_ns));
        map.insert("ps_ipv4".to_string(), set_json(&self.ps_ipv4));
        map.insert("ps_ipv6".to_string(), set_json(&self.ps_ipv6));
        map.insert("ps_tld".to_string(), set_json(&self.ps_tld));
        map.insert("ps_sld".to_string(), set_json(&self.ps_sld));
        map.insert("hazardous_domains".to_string(), self.hazardous_domains.json());
        map.insert("misconfigured_domains".to_string(), Value::Object(misconfigured));
        Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_has_all_keys_when_empty() {
        let deps = Dependencies::new();
        let summary = deps.summary("example.com.");
        let object = summary.as_object().unwrap();
        for key in [
            "query",
            "ns",
            "ipv4",
            "ipv6",
            "tld",
            "sld",
            "ps_ns",
            "ps_ipv4",
            "ps_ipv6",
            "ps_tld",
            "ps_sld",
            "hazardous_domains",
            "misconfigured_domains",
        ] {
            assert!(object.contains_key(key), "missing key: {}", key);
        }
        assert_eq!(object["ns"], serde_json::json!([]));
        assert_eq!(object["hazardous_domains"], serde_json::json!({}));
    }

    #[test]
    fn test_values_are_case_folded_and_sorted() {
        let mut deps = Dependencies::new();
        deps.add(DepPrefix::Host, DepKind::Ns, "NS2.Example.COM.");
        deps.add(DepPrefix::Host, DepKind::Ns, "ns1.example.com.");
        deps.add(DepPrefix::Host, DepKind::Ns, "ns2.example.com.");
        let summary = deps.summary("example.com.");
        assert_eq!(
            summary["ns"],
            serde_json::json!(["ns1.example.com.", "ns2.example.com."])
        );
    }

    #[test]
    fn test_prefixed_buckets_are_separate() {
        let mut deps = Dependencies::new();
        deps.add(DepPrefix::Host, DepKind::Tld, "com.");
        deps.add(DepPrefix::PublicSuffix, DepKind::Tld, "uk.");
        let summary = deps.summary("example.com.");
        assert_eq!(summary["tld"], serde_json::json!(["com."]));
        assert_eq!(summary["ps_tld"], serde_json::json!(["uk."]));
    }

    #[test]
    fn test_misconfigured_grouping() {
        let mut deps = Dependencies::new();
        deps.add_misconfigured(
            INVALID_NS_RECORD,
            QuerySummary {
                name: "Bad.Example.".to_string(),
                nameserver: "192.0.2.1".parse().unwrap(),
                rcodes: Rcodes::timed_out(),
            },
        );
        let summary = deps.summary("bad.example.");
        let entries = &summary["misconfigured_domains"][INVALID_NS_RECORD]["bad.example."];
        assert_eq!(entries.as_array().unwrap().len(), 1);
        assert_eq!(entries[0]["nameserver"], "192.0.2.1");
        assert_eq!(entries[0]["rcodes"]["timeout"], true);
    }
}
