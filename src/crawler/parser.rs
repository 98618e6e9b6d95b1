use crate::crawler::crawl::*;
use crate::crawler::deps::*;
use crate::crawler::ns_set::*;
use crate::engine::QueryResponse;
use crate::graph::*;
use crate::shared::dns;
use crate::shared::dns::Name;
use std::collections::{BTreeSet, HashMap};

/// What one parse of a response produced: the authoritative
/// nameserver -> ips map of the parsed name, plus the observation that
/// some NS record pointed at the root label (the caller turns that into
/// the invalid_ns_record misconfiguration).
pub(crate) struct ParseOutcome {
    pub auth_ns: NsSet,
    pub saw_root_ns: bool,
}

impl Crawl<'_> {
    /// Turn the records of one query response into the authoritative
    /// nameserver set of `current_name`. Along the way: glue goes into
    /// the glue cache, dependency values into the buckets (unless
    /// `with_deps` is off, i.e. while resolving bare tlds), nameserver
    /// and address nodes into the graph hanging off `current_node` with
    /// the given edge label. Nameservers without glue that live outside
    /// the bailiwick of `current_name` are re-resolved through the
    /// walker, unless their registrable domain is already being resolved
    /// (a dependency cycle, broken here and remembered as such).
    pub(crate) fn parse(
        &mut self,
        current_name: &Name,
        response: &QueryResponse,
        with_deps: bool,
        prefix: DepPrefix,
        is_ns: bool,
        current_node: &str,
        edge: TrustKind,
    ) -> ParseOutcome {
        assert!(
            self.graph.contains(current_node),
            "record parser invoked for '{}' without its graph node",
            current_name,
        );

        let mut auth_ns = NsSet::new();
        let mut ns_names: BTreeSet<String> = BTreeSet::new();
        let mut ns_nodes: HashMap<String, String> = HashMap::new();
        let mut saw_root_ns = false;

        // First sweep: collect in-zone NS targets and every address
        // record (the glue of this response).
        for record in &response.records {
            match record {
                dns::Record::NS { node: owner, name: target, .. } => {
                    if !current_name.is_in_zone(owner) {
                        continue;
                    }
                    if target.is_root() {
                        saw_root_ns = true;
                        continue;
                    }
                    let target_str = target.to_string();
                    ns_names.insert(target_str.clone());
                    if owner == current_name {
                        let ns_xid = self.graph.create_node(&target_str, NodeType::Nameserver);
                        self.graph.add_trust(current_node, edge, &ns_xid);
                        ns_nodes.insert(target_str.clone(), ns_xid);
                    }
                    if with_deps {
                        self.deps.add(prefix, DepKind::Ns, &target_str);
                    }
                }
                dns::Record::A { node: owner, address, .. } => {
                    self.parse_address_record(
                        owner,
                        address.to_string(),
                        DepKind::Ipv4,
                        NodeType::Ipv4,
                        current_name,
                        with_deps,
                        prefix,
                        is_ns,
                        current_node,
                        edge,
                        &mut ns_names,
                    );
                }
                dns::Record::AAAA { node: owner, address, .. } => {
                    self.parse_address_record(
                        owner,
                        address.to_string(),
                        DepKind::Ipv6,
                        NodeType::Ipv6,
                        current_name,
                        with_deps,
                        prefix,
                        is_ns,
                        current_node,
                        edge,
                        &mut ns_names,
                    );
                }
            }
        }

        // Tld/sld bookkeeping for the parsed name and every nameserver
        // referenced for it.
        if with_deps {
            self.add_tld_sld_for(current_name.as_ref(), prefix, is_ns);
            for ns_name in &ns_names {
                self.add_tld_sld_for(ns_name, prefix, is_ns);
            }
        }

        // Second sweep: assemble the ns -> ips map, re-resolving what
        // has no glue.
        for ns_name in &ns_names {
            let glue_ips = self.glue.get(ns_name).cloned();
            if let Some(ips) = glue_ips {
                auth_ns.insert_all(ns_name, ips.clone());
                if let Some(ns_xid) = ns_nodes.get(ns_name) {
                    let ns_xid = ns_xid.clone();
                    self.attach_address_nodes(&ns_xid, &ips, edge);
                }
                continue;
            }
            if !with_deps {
                continue;
            }

            let ns_registrable = registrable_form(ns_name);
            if self.active_resolutions.contains(&ns_registrable) {
                // The nameserver's domain is on the current resolution
                // path: a cyclic dependency. Break it and remember the
                // name is not hazardous, just circular.
                self.deps.nonhazardous_domains.insert(current_name.to_string());
                continue;
            }

            let ns_extracted = crate::crawler::psl::extract(ns_name);
            let current_extracted = crate::crawler::psl::extract(current_name.as_ref());
            let out_of_bailiwick = ns_extracted.domain != current_extracted.domain
                || ns_extracted.suffix != current_extracted.suffix;
            if !out_of_bailiwick {
                // In-bailiwick and glueless: resolving it from here would
                // chase our own tail, the next pass may supply the glue.
                continue;
            }

            let ns_target = match Name::from_string(ns_name) {
                Ok(name) => name,
                Err(err) => {
                    log::warn!("Skipping unusable nameserver name '{}': {:?}.", ns_name, err);
                    continue;
                }
            };
            self.active_resolutions.insert(ns_registrable);
            let ns_xid = match ns_nodes.get(ns_name) {
                Some(xid) => xid.clone(),
                None => self.graph.create_node(ns_name, NodeType::Nameserver),
            };
            let resolved = self.map_name(&ns_target, None, prefix, true, ns_xid.clone());
            if let Some(ips) = resolved.get(ns_name).cloned() {
                auth_ns.insert_all(ns_name, ips.clone());
                self.attach_address_nodes(&ns_xid, &ips, edge);
            }
        }

        ParseOutcome { auth_ns, saw_root_ns }
    }

    // Handle one A/AAAA record: cache the glue, record the dependency,
    // and when the record belongs to the parsed name itself, hang the
    // address node off the current node. For nameserver resolutions the
    // name's own address records double as glue, so the name joins the
    // nameserver set.
    #[allow(clippy::too_many_arguments)]
    fn parse_address_record(
        &mut self,
        owner: &Name,
        address: String,
        kind: DepKind,
        node_type: NodeType,
        current_name: &Name,
        with_deps: bool,
        prefix: DepPrefix,
        is_ns: bool,
        current_node: &str,
        edge: TrustKind,
        ns_names: &mut BTreeSet<String>,
    ) {
        self.glue.entry(owner.to_string()).or_default().insert(address.clone());
        if with_deps {
            self.deps.add(prefix, kind, &address);
        }
        if owner == current_name {
            let ip_xid = self.graph.create_node(&address, node_type);
            self.graph.add_trust(current_node, edge, &ip_xid);
            if is_ns {
                ns_names.insert(current_name.to_string());
            }
        }
    }

    // Create the address nodes of a nameserver and link them to it.
    fn attach_address_nodes(&mut self, ns_xid: &str, ips: &BTreeSet<String>, edge: TrustKind) {
        for ip in ips {
            let node_type = if ip.contains(':') { NodeType::Ipv6 } else { NodeType::Ipv4 };
            let ip_xid = self.graph.create_node(ip, node_type);
            self.graph.add_trust(ns_xid, edge, &ip_xid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineParams, QueryEngine, Rcodes};
    use crate::shared::dns::{Class, Record};
    use std::net::IpAddr;
    use std::sync::Arc;

    fn test_engine() -> Arc<QueryEngine> {
        Arc::new(QueryEngine::new(EngineParams::default(), Default::default()))
    }

    fn name(s: &str) -> Name {
        Name::from_string(s).unwrap()
    }

    fn ns_record(owner: &str, target: &str) -> Record {
        Record::NS {
            node: name(owner),
            class: Class::IN,
            ttl: 300,
            name: name(target),
        }
    }

    fn a_record(owner: &str, address: &str) -> Record {
        Record::A {
            node: name(owner),
            class: Class::IN,
            ttl: 300,
            address: address.parse().unwrap(),
        }
    }

    fn response_with(records: Vec<Record>, domain: &str) -> QueryResponse {
        let mut rcodes = Rcodes::default();
        rcodes.record(dns::RecordType::NS, 0);
        rcodes.record(dns::RecordType::A, 0);
        rcodes.record(dns::RecordType::AAAA, 0);
        QueryResponse {
            records: records.into_iter().collect(),
            rcodes,
            domain: name(domain),
            nameserver: "192.0.2.53".parse::<IpAddr>().unwrap(),
        }
    }

    #[test]
    fn test_parse_uses_glue_and_fills_dependencies() {
        let engine = test_engine();
        let mut crawl = Crawl::new(&engine, "v1");
        let target = name("example.com.");
        let node_xid = crawl.graph.create_node(target.as_ref(), NodeType::Domain);

        let response = response_with(
            vec![
                ns_record("example.com.", "ns1.example.com."),
                ns_record("example.com.", "NS2.example.com."),
                a_record("ns1.example.com.", "192.0.2.1"),
                a_record("ns2.example.com.", "192.0.2.2"),
            ],
            "example.com.",
        );
        let outcome = crawl.parse(&target, &response, true, DepPrefix::Host, false, &node_xid, TrustKind::Parent);

        assert!(!outcome.saw_root_ns);
        assert_eq!(outcome.auth_ns.len(), 2);
        assert_eq!(
            outcome.auth_ns.get("ns1.example.com.").unwrap(),
            &["192.0.2.1".to_string()].into_iter().collect::<BTreeSet<_>>()
        );
        let deps_ns = crawl.deps.bucket(DepPrefix::Host, DepKind::Ns);
        assert!(deps_ns.contains("ns1.example.com."));
        assert!(deps_ns.contains("ns2.example.com."));
        assert!(crawl.deps.bucket(DepPrefix::Host, DepKind::Ipv4).contains("192.0.2.2"));
        assert!(crawl.deps.bucket(DepPrefix::Host, DepKind::Sld).contains("example.com."));
        assert!(crawl.deps.bucket(DepPrefix::Host, DepKind::Tld).contains("com."));

        // Graph: both nameservers hang off the domain with parent edges,
        // and the glued addresses hang off their nameservers.
        let domain_node = crawl.graph.get(&node_xid).unwrap();
        assert_eq!(domain_node.trusts(TrustKind::Parent).count(), 2);
        let ns1 = crawl.graph.get("NSR$ns1.example.com.").unwrap();
        let ns1_edges: Vec<&String> = ns1.trusts(TrustKind::Parent).collect();
        assert_eq!(ns1_edges, vec!["IP4$192.0.2.1"]);
        engine.shutdown();
    }

    #[test]
    fn test_parse_flags_root_ns_rdata() {
        let engine = test_engine();
        let mut crawl = Crawl::new(&engine, "v1");
        let target = name("bad.example.");
        let node_xid = crawl.graph.create_node(target.as_ref(), NodeType::Domain);

        let response = response_with(vec![ns_record("bad.example.", ".")], "bad.example.");
        let outcome = crawl.parse(&target, &response, true, DepPrefix::Host, false, &node_xid, TrustKind::Parent);

        assert!(outcome.saw_root_ns);
        assert!(outcome.auth_ns.is_empty());
        // The root label never becomes a dependency or a graph node.
        assert!(!crawl.deps.bucket(DepPrefix::Host, DepKind::Ns).contains("."));
        assert!(!crawl.graph.contains("NSR$."));
        engine.shutdown();
    }

    #[test]
    fn test_parse_out_of_zone_ns_records_are_ignored() {
        let engine = test_engine();
        let mut crawl = Crawl::new(&engine, "v1");
        let target = name("example.com.");
        let node_xid = crawl.graph.create_node(target.as_ref(), NodeType::Domain);

        let response = response_with(
            vec![
                ns_record("other.org.", "ns1.other.org."),
                a_record("ns1.other.org.", "192.0.2.9"),
            ],
            "example.com.",
        );
        let outcome = crawl.parse(&target, &response, true, DepPrefix::Host, false, &node_xid, TrustKind::Parent);

        assert!(outcome.auth_ns.is_empty());
        assert!(!crawl.deps.bucket(DepPrefix::Host, DepKind::Ns).contains("ns1.other.org."));
        // The stray glue still lands in the glue cache and ip bucket.
        assert!(crawl.glue.contains_key("ns1.other.org."));
        assert!(crawl.deps.bucket(DepPrefix::Host, DepKind::Ipv4).contains("192.0.2.9"));
        engine.shutdown();
    }

    #[test]
    fn test_parse_own_addresses_act_as_glue_for_nameservers() {
        let engine = test_engine();
        let mut crawl = Crawl::new(&engine, "v1");
        let target = name("ns1.example.net.");
        let node_xid = crawl.graph.create_node(target.as_ref(), NodeType::Nameserver);

        // Resolving a nameserver: a bare A record for the name itself
        // must make it its own nameserver entry.
        let response = response_with(vec![a_record("ns1.example.net.", "192.0.2.4")], "ns1.example.net.");
        let outcome = crawl.parse(&target, &response, true, DepPrefix::Host, true, &node_xid, TrustKind::Child);

        assert_eq!(outcome.auth_ns.len(), 1);
        assert_eq!(
            outcome.auth_ns.get("ns1.example.net.").unwrap(),
            &["192.0.2.4".to_string()].into_iter().collect::<BTreeSet<_>>()
        );
        assert!(crawl.deps.bucket(DepPrefix::Host, DepKind::Sld).contains("example.net."));
        engine.shutdown();
    }

    #[test]
    fn test_parse_skips_sld_of_nameserver_named_like_its_domain() {
        let engine = test_engine();
        let mut crawl = Crawl::new(&engine, "v1");
        let target = name("example.net.");
        let node_xid = crawl.graph.create_node(target.as_ref(), NodeType::Nameserver);

        // A nameserver whose name is its own registrable domain: the
        // sld entry would just repeat the name and is skipped.
        let response = response_with(vec![a_record("example.net.", "192.0.2.5")], "example.net.");
        let outcome = crawl.parse(&target, &response, true, DepPrefix::Host, true, &node_xid, TrustKind::Child);

        assert_eq!(outcome.auth_ns.len(), 1);
        assert!(!crawl.deps.bucket(DepPrefix::Host, DepKind::Sld).contains("example.net."));
        assert!(crawl.deps.bucket(DepPrefix::Host, DepKind::Tld).contains("net."));
        engine.shutdown();
    }

    #[test]
    fn test_parse_cycle_breaks_into_nonhazardous() {
        let engine = test_engine();
        let mut crawl = Crawl::new(&engine, "v1");
        let target = name("example.com.");
        let node_xid = crawl.graph.create_node(target.as_ref(), NodeType::Domain);

        // The nameserver's registrable domain is already being resolved:
        // no recursion, the name is remembered as cyclic-but-fine.
        crawl.active_resolutions.insert("example.org.".to_string());
        let response = response_with(vec![ns_record("example.com.", "ns1.example.org.")], "example.com.");
        let outcome = crawl.parse(&target, &response, true, DepPrefix::Host, false, &node_xid, TrustKind::Parent);

        assert!(outcome.auth_ns.is_empty());
        assert!(crawl.deps.nonhazardous_domains.contains("example.com."));
        engine.shutdown();
    }

    #[test]
    #[should_panic(expected = "without its graph node")]
    fn test_parse_without_graph_node_is_a_programmer_error() {
        let engine = test_engine();
        let mut crawl = Crawl::new(&engine, "v1");
        let target = name("example.com.");
        let response = response_with(vec![], "example.com.");
        crawl.parse(&target, &response, true, DepPrefix::Host, false, "DMN$missing.", TrustKind::Parent);
    }
}
