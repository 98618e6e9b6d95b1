use crate::crawler::psl;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

/// The kinds of entities tracked in the dependency graph. The type
/// determines the external id prefix and, at serialization time, the
/// record shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NodeType {
    Nameserver,
    Ipv4,
    Ipv6,
    Domain,
    Subdomain,
    Tld,
    PublicSuffixTld,
}

impl NodeType {
    /// The external id prefix of the type.
    pub fn prefix(&self) -> &'static str {
        match self {
            NodeType::Nameserver => "NSR",
            NodeType::Ipv4 => "IP4",
            NodeType::Ipv6 => "IP6",
            NodeType::Domain => "DMN",
            NodeType::Subdomain => "SDN",
            NodeType::Tld => "TLD",
            NodeType::PublicSuffixTld => "PS_TLD",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Nameserver => "nameserver",
            NodeType::Ipv4 => "ipv4",
            NodeType::Ipv6 => "ipv6",
            NodeType::Domain => "domain",
            NodeType::Subdomain => "subdomain",
            NodeType::Tld => "tld",
            NodeType::PublicSuffixTld => "public_suffix_tld",
        }
    }

    pub fn is_ip(&self) -> bool {
        matches!(self, NodeType::Ipv4 | NodeType::Ipv6)
    }
}

/// Labels of the directed trust edges between nodes. `Parent` and
/// `Child` record which verification pass of the walker discovered the
/// edge; `Provisioning` ties every name to its parent zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TrustKind {
    Parent,
    Child,
    Provisioning,
}

impl TrustKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrustKind::Parent => "parent",
            TrustKind::Child => "child",
            TrustKind::Provisioning => "provisioning",
        }
    }
}

/// One entity of the dependency graph: a hostname or address with its
/// classification flags and outgoing trust edges. Edges reference other
/// nodes by external id, which keeps arbitrarily cyclic graphs flat and
/// makes merging two nodes a plain set union.
#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub node_type: NodeType,
    pub is_hazardous: bool,
    pub is_misconfigured: bool,
    pub is_empty_nonterminal: bool,
    pub is_public_suffix: bool,
    pub misconfigurations: BTreeSet<&'static str>,
    trusts: BTreeMap<TrustKind, BTreeSet<String>>,
}

impl Node {
    /// Create a bare node, canonicalizing the name: hostnames are case
    /// folded and absolute, addresses are kept in their text form.
    pub fn new(name: &str, node_type: NodeType) -> Self {
        Self {
            name: Self::canonical_name(name, node_type),
            node_type,
            is_hazardous: false,
            is_misconfigured: false,
            is_empty_nonterminal: false,
            is_public_suffix: false,
            misconfigurations: BTreeSet::new(),
            trusts: BTreeMap::new(),
        }
    }

    pub fn canonical_name(name: &str, node_type: NodeType) -> String {
        let mut name = name.to_ascii_lowercase();
        if !node_type.is_ip() && !name.ends_with('.') {
            name.push('.');
        }
        name
    }

    /// The external id of the node, unique per graph.
    pub fn xid(&self) -> String {
        Self::xid_for(&self.name, self.node_type)
    }

    pub fn xid_for(name: &str, node_type: NodeType) -> String {
        format!("{}${}", node_type.prefix(), Self::canonical_name(name, node_type))
    }

    /// The blank-node uid used in the serialized forms.
    pub fn uid(&self) -> String {
        format!("_:{}", self.xid())
    }

    /// Add a directed trust edge towards the node with the given xid.
    pub fn add_trust(&mut self, kind: TrustKind, target_xid: String) {
        self.trusts.entry(kind).or_default().insert(target_xid);
    }

    pub fn trusts(&self, kind: TrustKind) -> impl Iterator<Item = &String> {
        self.trusts.get(&kind).into_iter().flatten()
    }

    /// All outgoing edges as (kind, target xid) pairs.
    pub fn all_trusts(&self) -> impl Iterator<Item = (TrustKind, &String)> {
        self.trusts.iter().flat_map(|(kind, targets)| targets.iter().map(move |t| (*kind, t)))
    }

    /// Merge another node with the same xid into this one: flags are
    /// OR-ed, misconfiguration tags and edge sets are unioned. Nothing
    /// is ever cleared, which keeps re-insertion monotonic.
    pub fn merge_from(&mut self, other: Node) {
        debug_assert_eq!(self.xid(), other.xid());
        self.is_hazardous |= other.is_hazardous;
        self.is_misconfigured |= other.is_misconfigured;
        self.is_empty_nonterminal |= other.is_empty_nonterminal;
        self.is_public_suffix |= other.is_public_suffix;
        self.misconfigurations.extend(other.misconfigurations);
        for (kind, targets) in other.trusts {
            self.trusts.entry(kind).or_default().extend(targets);
        }
    }

    /// Guess the type of a node from its name alone, for names coming
    /// out of dns data rather than out of a typed context.
    pub fn infer_node_type(name: &str, is_ns: bool) -> NodeType {
        if is_ns {
            return NodeType::Nameserver;
        }
        let trimmed = name.trim_end_matches('.');
        let labels: Vec<&str> = trimmed.split('.').filter(|l| !l.is_empty()).collect();
        // A single label without ':' is a tld, not an address.
        if labels.len() == 1 && !labels[0].contains(':') {
            return NodeType::Tld;
        }
        if let Ok(ip) = trimmed.parse::<IpAddr>() {
            return match ip {
                IpAddr::V4(_) => NodeType::Ipv4,
                IpAddr::V6(_) => NodeType::Ipv6,
            };
        }
        let extracted = psl::extract(name);
        if extracted.domain.is_empty() {
            NodeType::PublicSuffixTld
        } else if extracted.subdomain.is_empty() {
            NodeType::Domain
        } else {
            NodeType::Subdomain
        }
    }

    /// The name of the parent zone of this node: the registrable domain
    /// for subdomains, the public suffix for domains, the label-drop
    /// superdomain otherwise. Single-label names are their own parent.
    /// Addresses have none.
    pub fn parent_zone(&self) -> Option<String> {
        if self.node_type.is_ip() {
            return None;
        }
        let extracted = psl::extract(&self.name);
        if !extracted.subdomain.is_empty() {
            return Some(format!("{}.{}.", extracted.domain, extracted.suffix));
        }
        if !extracted.domain.is_empty() {
            return Some(format!("{}.", extracted.suffix));
        }
        let labels: Vec<&str> = self.name.split('.').filter(|l| !l.is_empty()).collect();
        if labels.len() > 1 {
            Some(format!("{}.", labels[1..].join(".")))
        } else {
            Some(self.name.clone())
        }
    }
}

impl Node {
    /// The json form of the node: scalar attributes at the top, flags in
    /// a single faceted `details` record, edges in a single `trusts`
    /// record listing target uids per edge label. Keys come out sorted,
    /// `serde_json` maps being ordered.
    pub fn json(&self, version: &str) -> Value {
        let details_xid = format!("{}_details_{}", self.xid(), version);
        let trusts_xid = format!("{}_trust_{}", self.xid(), version);

        let mut details = serde_json::Map::new();
        details.insert("details|version".into(), Value::String(version.to_string()));
        details.insert("is_empty_nonterminal".into(), Value::Bool(self.is_empty_nonterminal));
        details.insert("is_hazardous".into(), Value::Bool(self.is_hazardous));
        details.insert("is_misconfigured".into(), Value::Bool(self.is_misconfigured));
        details.insert("is_public_suffix".into(), Value::Bool(self.is_public_suffix));
        details.insert(
            "misconfigurations".into(),
            Value::Array(self.misconfigurations.iter().map(|t| Value::String(t.to_string())).collect()),
        );
        details.insert("uid".into(), Value::String(format!("_:{}", details_xid)));
        details.insert("xid".into(), Value::String(details_xid));

        let mut trusts = serde_json::Map::new();
        trusts.insert("uid".into(), Value::String(format!("_:{}", trusts_xid)));
        trusts.insert("xid".into(), Value::String(trusts_xid));
        for (kind, targets) in &self.trusts {
            let refs: Vec<Value> = targets
                .iter()
                .map(|xid| {
                    let mut entry = serde_json::Map::new();
                    entry.insert("uid".into(), Value::String(format!("_:{}", xid)));
                    Value::Object(entry)
                })
                .collect();
            trusts.insert(kind.as_str().into(), Value::Array(refs));
        }

        let mut node = serde_json::Map::new();
        node.insert("name".into(), Value::String(self.name.clone()));
        node.insert("type".into(), Value::String(self.node_type.as_str().to_string()));
        node.insert("uid".into(), Value::String(self.uid()));
        node.insert("xid".into(), Value::String(self.xid()));
        node.insert("details".into(), Value::Array(vec![Value::Object(details)]));
        node.insert("trusts".into(), Value::Array(vec![Value::Object(trusts)]));
        Value::Object(node)
    }

    /// The n-quad rdf form of the node: one line per scalar attribute,
    /// one line per misconfiguration tag, one faceted edge line per
    /// trust, plus the faceted links binding the details and trusts
    /// records to the entity.
    pub fn rdf(&self, version: &str) -> Vec<String> {
        let uid = self.uid();
        let details_xid = format!("{}_details_{}", self.xid(), version);
        let details_uid = format!("_:{}", details_xid);
        let trusts_xid = format!("{}_trust_{}", self.xid(), version);
        let trusts_uid = format!("_:{}", trusts_xid);
        let facets = format!("(first_seen=\"{}\", last_seen=\"{}\")", version, version);

        let mut lines = vec![
            format!("<{}> <name> \"{}\" .", uid, self.name),
            format!("<{}> <type> \"{}\" .", uid, self.node_type.as_str()),
            format!("<{}> <xid> \"{}\" .", uid, self.xid()),
            format!("<{}> <is_empty_nonterminal> \"{}\" .", details_uid, self.is_empty_nonterminal),
            format!("<{}> <is_hazardous> \"{}\" .", details_uid, self.is_hazardous),
            format!("<{}> <is_misconfigured> \"{}\" .", details_uid, self.is_misconfigured),
            format!("<{}> <is_public_suffix> \"{}\" .", details_uid, self.is_public_suffix),
            format!("<{}> <xid> \"{}\" .", details_uid, details_xid),
            format!("<{}> <type> \"node_details\" .", details_uid),
            format!("<{}> <xid> \"{}\" .", trusts_uid, trusts_xid),
            format!("<{}> <type> \"node_trusts\" .", trusts_uid),
        ];
        for tag in &self.misconfigurations {
            lines.push(format!("<{}> <misconfiguration> \"{}\" .", details_uid, tag));
        }
        for (kind, target_xid) in self.all_trusts() {
            lines.push(format!("<{}> <{}> <_:{}> {} .", trusts_uid, kind.as_str(), target_xid, facets));
        }
        lines.push(format!("<{}> <details> <{}> {} .", uid, details_uid, facets));
        lines.push(format!("<{}> <trusts> <{}> {} .", uid, trusts_uid, facets));
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xid_and_canonical_name() {
        let node = Node::new("NS1.Example.Com", NodeType::Nameserver);
        assert_eq!(node.name, "ns1.example.com.");
        assert_eq!(node.xid(), "NSR$ns1.example.com.");
        assert_eq!(node.uid(), "_:NSR$ns1.example.com.");

        let ip = Node::new("192.0.2.1", NodeType::Ipv4);
        assert_eq!(ip.name, "192.0.2.1");
        assert_eq!(ip.xid(), "IP4$192.0.2.1");
    }

    #[test]
    fn test_infer_node_type() {
        assert_eq!(Node::infer_node_type("ns1.example.com.", true), NodeType::Nameserver);
        assert_eq!(Node::infer_node_type("com.", false), NodeType::Tld);
        assert_eq!(Node::infer_node_type("192.0.2.1", false), NodeType::Ipv4);
        assert_eq!(Node::infer_node_type("2001:db8::1", false), NodeType::Ipv6);
        assert_eq!(Node::infer_node_type("co.uk.", false), NodeType::PublicSuffixTld);
        assert_eq!(Node::infer_node_type("example.com.", false), NodeType::Domain);
        assert_eq!(Node::infer_node_type("www.example.com.", false), NodeType::Subdomain);
    }

    #[test]
    fn test_parent_zone() {
        let sub = Node::new("a.b.example.com.", NodeType::Subdomain);
        assert_eq!(sub.parent_zone().unwrap(), "example.com.");
        let domain = Node::new("example.com.", NodeType::Domain);
        assert_eq!(domain.parent_zone().unwrap(), "com.");
        let suffix = Node::new("co.uk.", NodeType::PublicSuffixTld);
        assert_eq!(suffix.parent_zone().unwrap(), "uk.");
        let tld = Node::new("com.", NodeType::Tld);
        assert_eq!(tld.parent_zone().unwrap(), "com.");
        let ip = Node::new("192.0.2.1", NodeType::Ipv4);
        assert_eq!(ip.parent_zone(), None);
    }

    #[test]
    fn test_merge_is_monotonic() {
        let mut node = Node::new("example.com.", NodeType::Domain);
        node.is_hazardous = true;
        node.add_trust(TrustKind::Parent, "NSR$ns1.example.com.".to_string());

        let mut other = Node::new("example.com.", NodeType::Domain);
        other.is_misconfigured = true;
        other.misconfigurations.insert("missing_ns_records");
        other.add_trust(TrustKind::Child, "NSR$ns2.example.com.".to_string());

        node.merge_from(other);
        assert!(node.is_hazardous);
        assert!(node.is_misconfigured);
        assert!(node.misconfigurations.contains("missing_ns_records"));
        assert_eq!(node.trusts(TrustKind::Parent).count(), 1);
        assert_eq!(node.trusts(TrustKind::Child).count(), 1);
    }

    #[test]
    fn test_json_and_rdf_edges_agree() {
        let mut node = Node::new("example.com.", NodeType::Domain);
        node.add_trust(TrustKind::Parent, "NSR$ns1.example.com.".to_string());
        node.add_trust(TrustKind::Provisioning, "TLD$com.".to_string());

        let json = node.json("v1");
        let trusts = &json["trusts"][0];
        let mut json_edges = vec![];
        for kind in ["parent", "child", "provisioning"] {
            if let Some(refs) = trusts.get(kind).and_then(|v| v.as_array()) {
                for r in refs {
                    json_edges.push((kind.to_string(), r["uid"].as_str().unwrap().to_string()));
                }
            }
        }

        let rdf = node.rdf("v1");
        let mut rdf_edges = vec![];
        for line in &rdf {
            for kind in ["parent", "child", "provisioning"] {
                let marker = format!("<{}>", kind);
                if line.contains(&marker) && line.starts_with("<_:DMN$example.com._trust_v1>") {
                    let target = line.split_whitespace().nth(2).unwrap();
                    let target = target.trim_matches(|c| c == '<' || c == '>');
                    rdf_edges.push((kind.to_string(), target.to_string()));
                }
            }
        }

        json_edges.sort();
        rdf_edges.sort();
        assert_eq!(json_edges, rdf_edges);
        assert_eq!(json_edges.len(), 2);
    }
}
