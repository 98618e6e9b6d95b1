use crate::crawler::deps::*;
use crate::crawler::ns_set::*;
use crate::crawler::psl;
use crate::engine::*;
use crate::graph::*;
use crate::shared::dns;
use crate::shared::dns::{Name, ALL_RECORD_TYPES};
use rand::seq::SliceRandom;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::thread;

// The list of root nameservers of the domain name system, used to
// bootstrap every crawl.
pub(crate) const ROOT_SERVERS: [(&str, &str); 13] = [
    ("a.root-servers.net.", "198.41.0.4"),
    ("b.root-servers.net.", "199.9.14.201"),
    ("c.root-servers.net.", "192.33.4.12"),
    ("d.root-servers.net.", "199.7.91.13"),
    ("e.root-servers.net.", "192.203.230.10"),
    ("f.root-servers.net.", "192.5.5.241"),
    ("g.root-servers.net.", "192.112.36.4"),
    ("h.root-servers.net.", "198.97.190.53"),
    ("i.root-servers.net.", "192.36.148.17"),
    ("j.root-servers.net.", "192.58.128.30"),
    ("k.root-servers.net.", "193.0.14.129"),
    ("l.root-servers.net.", "199.7.83.42"),
    ("m.root-servers.net.", "202.12.27.33"),
];

/// Options of a single crawl.
#[derive(Debug, Clone, Default)]
pub struct CrawlOpts {
    /// The target is known to be a nameserver hostname.
    pub is_ns: bool,
    /// Also return the dependency graph serialized to json.
    pub db_json: bool,
    /// Also return the dependency graph serialized to n-quad rdf.
    pub db_rdf: bool,
    /// The crawl version stamp; defaults to now, in rfc 3339 form.
    pub version: Option<String>,
}

/// The outputs of a single crawl: the flat summary, always, plus the
/// graph serializations that were asked for.
#[derive(Debug)]
pub struct HostDependencies {
    pub summary: Value,
    pub graph_json: Option<Value>,
    pub graph_rdf: Option<String>,
}

/// The crawler front end. It borrows the process-wide [`QueryEngine`]
/// and runs one crawl at a time: each call to
/// [`Crawler::get_host_dependencies`] owns its graph, dependency record
/// and resolution caches privately and discards them at the end.
pub struct Crawler {
    engine: Arc<QueryEngine>,
}

impl Crawler {
    /// Build and return a new [`Crawler`] using the passed engine.
    pub fn new(engine: &Arc<QueryEngine>) -> Self {
        Self { engine: Arc::clone(engine) }
    }

    /// Walk the authoritative nameserver tree down to `name` and collect
    /// everything the host depends on. A crawl never fails: whatever
    /// happens on the network ends up as flags and summary entries, and
    /// a summary object is always produced.
    pub fn get_host_dependencies(&self, name: &str, opts: &CrawlOpts) -> HostDependencies {
        let version = match &opts.version {
            Some(version) => version.clone(),
            None => chrono::Utc::now().to_rfc3339(),
        };

        let target = match Name::from_string(name) {
            Ok(target) => target,
            Err(err) => {
                log::error!("Unusable crawl target '{}': {:?}.", name, err);
                let graph = NodeList::new(&version);
                return HostDependencies {
                    summary: Dependencies::new().summary(name),
                    graph_json: opts.db_json.then(|| graph.json()),
                    graph_rdf: opts.db_rdf.then(|| graph.rdf()),
                };
            }
        };
        log::info!("Starting crawl of '{}' (version {}).", target, version);

        let mut crawl = Crawl::new(&self.engine, &version);
        let root_type = Node::infer_node_type(target.as_ref(), opts.is_ns);
        let node_xid = crawl.graph.create_node(target.as_ref(), root_type);
        crawl.map_name(&target, None, DepPrefix::Host, opts.is_ns, node_xid);

        log::info!("Finished crawl of '{}': {} graph nodes.", target, crawl.graph.len());
        HostDependencies {
            summary: crawl.deps.summary(target.as_ref()),
            graph_json: opts.db_json.then(|| crawl.graph.json()),
            graph_rdf: opts.db_rdf.then(|| crawl.graph.rdf()),
        }
    }
}

/// The private state of one crawl. The walker and the record parser both
/// live on this struct; everything here is touched only from the crawl's
/// own thread, the engine fan-out being the only concurrent part.
pub(crate) struct Crawl<'a> {
    pub(crate) engine: &'a Arc<QueryEngine>,
    /// Glue cache: hostname -> addresses, seeded with the root servers.
    pub(crate) glue: HashMap<String, BTreeSet<String>>,
    /// Registrable forms currently being resolved; the cycle breaker.
    pub(crate) active_resolutions: HashSet<String>,
    /// Completed resolutions, keyed by the resolved name.
    pub(crate) past_resolutions: HashMap<String, NsSet>,
    pub(crate) deps: Dependencies,
    pub(crate) graph: NodeList,
}

impl<'a> Crawl<'a> {
    pub(crate) fn new(engine: &'a Arc<QueryEngine>, version: &str) -> Self {
        let mut glue: HashMap<String, BTreeSet<String>> = HashMap::new();
        for (hostname, ip) in ROOT_SERVERS {
            glue.entry(hostname.to_string()).or_default().insert(ip.to_string());
        }
        Self {
            engine,
            glue,
            active_resolutions: HashSet::new(),
            past_resolutions: HashMap::new(),
            deps: Dependencies::new(),
            graph: NodeList::new(version),
        }
    }

    /// Recursively resolve the authoritative nameserver set of a name,
    /// descending zone by zone from the root. `minimized` is the current
    /// qname-minimized form (`None` on entry, when it equals the
    /// original target); `node_xid` is the graph node of the name being
    /// resolved, already inserted by the caller.
    pub(crate) fn map_name(
        &mut self,
        original: &Name,
        minimized: Option<Name>,
        prefix: DepPrefix,
        is_ns: bool,
        node_xid: String,
    ) -> NsSet {
        let name = minimized.unwrap_or_else(|| original.clone());
        if let Some(cached) = self.past_resolutions.get(name.as_ref()) {
            return cached.clone();
        }

        let extracted = psl::extract(name.as_ref());
        let is_suffix = extracted.domain.is_empty();
        // Once the walk enters public suffix territory, every dependency
        // recorded below lands in the ps_ buckets.
        let prefix = if is_suffix { DepPrefix::PublicSuffix } else { prefix };
        if is_suffix && !name.is_root() {
            self.graph.get_mut(&node_xid).unwrap().is_public_suffix = true;
        }
        let is_tld = name.label_count() <= 1;

        let mut auth_ns = if is_tld {
            // Base case: ask a root server about the tld.
            self.random_root_server()
        } else {
            let superdomain = name.superdomain().unwrap();
            let super_type = Node::infer_node_type(superdomain.as_ref(), false);
            let super_xid = self.graph.create_node(superdomain.as_ref(), super_type);
            self.graph.add_trust(&node_xid, TrustKind::Provisioning, &super_xid);
            self.map_name(original, Some(superdomain), prefix, false, super_xid)
        };

        // Dependency accounting is suppressed while resolving a bare tld:
        // root zone furniture is not a dependency of the target.
        let with_deps = !is_tld;

        // Two verification passes: the parent pass asks the superdomain's
        // servers (the delegation view), the child pass asks the servers
        // so obtained (the zone's own view).
        for (phase, edge) in [TrustKind::Parent, TrustKind::Child].into_iter().enumerate() {
            let pairs: Vec<(String, std::net::IpAddr)> = auth_ns
                .pairs()
                .into_iter()
                .filter_map(|(ns, ip)| ip.parse().ok().map(|ip| (ns, ip)))
                .collect();

            // All queries of the pass are issued concurrently; responses
            // are processed only after the whole gather.
            let responses: Vec<Arc<QueryResponse>> = thread::scope(|scope| {
                let name = &name;
                let engine = self.engine;
                let handles: Vec<_> = pairs
                    .iter()
                    .map(|(_, ip)| scope.spawn(move || engine.query(name, *ip, &ALL_RECORD_TYPES)))
                    .collect();
                handles.into_iter().map(|handle| handle.join().unwrap()).collect()
            });

            let mut new_auth_ns = NsSet::new();
            let mut summaries: Vec<Arc<QueryResponse>> = vec![];
            let mut responded = 0_usize;
            let mut nxdomain_responses = 0_usize;
            let mut saw_noerror_empty = false;
            let mut saw_other = false;

            for ((ns_name, ip), mut response) in pairs.iter().zip(responses) {
                summaries.push(Arc::clone(&response));
                let mut query_name = name.clone();

                if response.records.is_empty() {
                    if response.rcodes.timeout {
                        continue;
                    }
                    let noerror =
                        response.rcodes.code_for(dns::RecordType::NS) == Some(dns::RespCode::NoError.to_num());
                    if noerror && name != *original {
                        // The minimized qname produced nothing: retry once
                        // with the full target on this nameserver.
                        query_name = original.clone();
                        response = self.engine.query(original, *ip, &ALL_RECORD_TYPES);
                    }
                    if response.records.is_empty() {
                        if response.rcodes.timeout {
                            continue;
                        }
                        responded += 1;
                        if response.rcodes.is_nxdomain() {
                            nxdomain_responses += 1;
                            continue;
                        }
                        if response.rcodes.code_for(dns::RecordType::NS) == Some(dns::RespCode::NoError.to_num()) {
                            // NOERROR with no records: an empty non-terminal
                            // candidate. Keep the pair for the next pass.
                            saw_noerror_empty = true;
                            new_auth_ns.insert(ns_name, &ip.to_string());
                            continue;
                        }
                        saw_other = true;
                        continue;
                    }
                }

                // Records present: turn them into nameserver -> ips data.
                responded += 1;
                saw_other = true;
                let outcome = self.parse(&query_name, &response, with_deps, prefix, is_ns, &node_xid, edge);
                if outcome.saw_root_ns {
                    let node = self.graph.get_mut(&node_xid).unwrap();
                    node.is_misconfigured = true;
                    node.misconfigurations.insert(INVALID_NS_RECORD);
                    self.deps.add_misconfigured(
                        INVALID_NS_RECORD,
                        QuerySummary {
                            name: name.to_string(),
                            nameserver: response.nameserver,
                            rcodes: response.rcodes.clone(),
                        },
                    );
                }
                new_auth_ns.update(&outcome.auth_ns);
            }

            if new_auth_ns.is_empty() && !self.deps.nonhazardous_domains.contains(name.as_ref()) {
                // Nothing usable came back. With an NXDOMAIN consensus
                // (vacuously true when every server timed out) the name is
                // classified; either way the walk below this name is over.
                let consensus = nxdomain_responses == responded;
                if consensus {
                    self.classify_dead_name(&name, phase, &summaries, &node_xid);
                    self.add_tld_sld_for(name.as_ref(), prefix, false);
                }
                auth_ns = new_auth_ns;
                break;
            }

            if !new_auth_ns.is_empty() && saw_noerror_empty && !saw_other {
                // Every answering server said NOERROR with zero records:
                // the name exists in the tree but holds no records.
                self.graph.get_mut(&node_xid).unwrap().is_empty_nonterminal = true;
            }

            auth_ns = new_auth_ns;
        }

        let registrable = registrable_form(name.as_ref());
        self.active_resolutions.remove(&registrable);
        self.past_resolutions.insert(name.to_string(), auth_ns.clone());
        auth_ns
    }

    // Tag the node of a name that produced no usable nameservers: at the
    // parent pass it is hazardous (or, for address-shaped owners, the
    // ip_ns_records misconfiguration); at the child pass the zone is
    // missing its NS records.
    fn classify_dead_name(&mut self, name: &Name, phase: usize, summaries: &[Arc<QueryResponse>], node_xid: &str) {
        let numeric_owner = name.last_label().map_or(false, |label| label.chars().all(|c| c.is_ascii_digit()));
        let (tag, hazardous) = match (phase, numeric_owner) {
            (0, true) => (Some(IP_NS_RECORDS), false),
            (0, false) => (None, true),
            (_, _) => (Some(MISSING_NS_RECORDS), false),
        };

        let node = self.graph.get_mut(node_xid).unwrap();
        if hazardous {
            node.is_hazardous = true;
            log::warn!("Hazardous name: '{}' has no usable authoritative nameservers.", name);
        }
        if let Some(tag) = tag {
            node.is_misconfigured = true;
            node.misconfigurations.insert(tag);
            log::warn!("Misconfigured name '{}': {}.", name, tag);
        }

        for response in summaries {
            let summary = QuerySummary {
                name: name.to_string(),
                nameserver: response.nameserver,
                rcodes: response.rcodes.clone(),
            };
            match tag {
                Some(tag) => self.deps.add_misconfigured(tag, summary),
                None => self.deps.hazardous_domains.add(summary),
            }
        }
    }

    /// Record the tld and sld entries of a name into the dependency
    /// buckets. Names with no public suffix split degrade to the last
    /// label (tld) and last two labels (sld). When resolving a
    /// nameserver whose name is itself the registrable domain, the sld
    /// entry is skipped.
    pub(crate) fn add_tld_sld_for(&mut self, name: &str, prefix: DepPrefix, is_ns: bool) {
        let extracted = psl::extract(name);
        let labels: Vec<&str> = name.split('.').filter(|l| !l.is_empty()).collect();
        if !extracted.domain.is_empty() && !extracted.suffix.is_empty() {
            let sld = format!("{}.{}.", extracted.domain, extracted.suffix);
            if !(is_ns && sld == name) {
                self.deps.add(prefix, DepKind::Sld, &sld);
            }
            self.deps.add(prefix, DepKind::Tld, &format!("{}.", extracted.suffix));
        } else if labels.len() > 1 {
            if !is_ns {
                self.deps.add(prefix, DepKind::Sld, name);
            }
            self.deps.add(prefix, DepKind::Tld, &format!("{}.", labels[1..].join(".")));
        } else if labels.len() == 1 {
            self.deps.add(prefix, DepKind::Tld, &format!("{}.", labels[0]));
        }
    }

    // One random root server as a one-entry nameserver set.
    fn random_root_server(&self) -> NsSet {
        let (hostname, ip) = ROOT_SERVERS
            .choose(&mut rand::thread_rng())
            .expect("root server list is never empty");
        let mut set = NsSet::new();
        set.insert(hostname, ip);
        set
    }
}

/// The registrable form of a name ("domain.suffix.") used to key the
/// cycle-breaker set, falling back to the name itself for names with no
/// registrable domain.
pub(crate) fn registrable_form(name: &str) -> String {
    match psl::extract(name).registrable() {
        Some(registrable) => registrable,
        None => name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registrable_form() {
        assert_eq!(registrable_form("ns1.example.com."), "example.com.");
        assert_eq!(registrable_form("example.com."), "example.com.");
        assert_eq!(registrable_form("co.uk."), "co.uk.");
        assert_eq!(registrable_form("com."), "com.");
    }

    #[test]
    fn test_root_servers_are_well_formed() {
        assert_eq!(ROOT_SERVERS.len(), 13);
        for (hostname, ip) in ROOT_SERVERS {
            assert!(hostname.ends_with(".root-servers.net."));
            assert!(ip.parse::<std::net::IpAddr>().is_ok());
        }
    }

    #[test]
    fn test_add_tld_sld_fallbacks() {
        let engine = Arc::new(QueryEngine::new(EngineParams::default(), Default::default()));
        let mut crawl = Crawl::new(&engine, "v1");

        crawl.add_tld_sld_for("www.example.com.", DepPrefix::Host, false);
        assert!(crawl.deps.bucket(DepPrefix::Host, DepKind::Sld).contains("example.com."));
        assert!(crawl.deps.bucket(DepPrefix::Host, DepKind::Tld).contains("com."));

        // No suffix split: last-label / last-two-labels heuristics.
        crawl.add_tld_sld_for("bar.kawasaki.jp.", DepPrefix::Host, false);
        assert!(crawl.deps.bucket(DepPrefix::Host, DepKind::Sld).contains("bar.kawasaki.jp."));
        assert!(crawl.deps.bucket(DepPrefix::Host, DepKind::Tld).contains("kawasaki.jp."));

        // Single label: tld only.
        crawl.add_tld_sld_for("com.", DepPrefix::PublicSuffix, false);
        assert!(crawl.deps.bucket(DepPrefix::PublicSuffix, DepKind::Tld).contains("com."));
        engine.shutdown();
    }

    #[test]
    fn test_add_tld_sld_skips_own_sld_for_nameservers() {
        let engine = Arc::new(QueryEngine::new(EngineParams::default(), Default::default()));
        let mut crawl = Crawl::new(&engine, "v1");
        crawl.add_tld_sld_for("example.com.", DepPrefix::Host, true);
        assert!(!crawl.deps.bucket(DepPrefix::Host, DepKind::Sld).contains("example.com."));
        assert!(crawl.deps.bucket(DepPrefix::Host, DepKind::Tld).contains("com."));
        engine.shutdown();
    }
}
