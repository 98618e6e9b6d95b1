use crate::graph::node::*;
use serde_json::Value;
use std::collections::BTreeMap;

/// The typed, de-duplicated node set of one crawl: a mapping from
/// external id to [`Node`] plus the crawl version stamp. Insertion of a
/// node whose xid is already present merges the two (flags OR, tag and
/// edge sets union), so nothing observed is ever lost. Since edges are
/// xid references, merging whole graphs terminates on arbitrary cycles.
#[derive(Debug)]
pub struct NodeList {
    version: String,
    nodes: BTreeMap<String, Node>,
}

impl NodeList {
    /// Creates an empty [`NodeList`] stamped with the crawl version.
    pub fn new(version: &str) -> Self {
        Self {
            version: version.to_string(),
            nodes: BTreeMap::new(),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Create (or fetch) the node of the given name and type and return
    /// its xid. New non-address nodes are tied to their parent zone: the
    /// parent node is created as well, recursively up to the tld, and a
    /// `provisioning` edge from the new node to it is added. The forward
    /// node is inserted before the parent is touched, which keeps the
    /// construction non-reentrant.
    pub fn create_node(&mut self, name: &str, node_type: NodeType) -> String {
        let xid = Node::xid_for(name, node_type);
        if self.nodes.contains_key(&xid) {
            return xid;
        }
        let node = Node::new(name, node_type);
        let parent_name = node.parent_zone().filter(|parent| parent != &node.name);
        self.nodes.insert(xid.clone(), node);

        if let Some(parent_name) = parent_name {
            let parent_type = Node::infer_node_type(&parent_name, false);
            let parent_xid = self.create_node(&parent_name, parent_type);
            self.nodes
                .get_mut(&xid)
                .unwrap()
                .add_trust(TrustKind::Provisioning, parent_xid);
        }
        xid
    }

    /// Insert a node, merging it into the existing one when the xid is
    /// already present. Returns the xid.
    pub fn add(&mut self, node: Node) -> String {
        let xid = node.xid();
        match self.nodes.get_mut(&xid) {
            Some(existing) => existing.merge_from(node),
            None => {
                self.nodes.insert(xid.clone(), node);
            }
        }
        xid
    }

    /// Add a trust edge between two nodes already in the list. Calling
    /// this for an absent source node is a programmer error.
    pub fn add_trust(&mut self, from_xid: &str, kind: TrustKind, to_xid: &str) {
        let node = self
            .nodes
            .get_mut(from_xid)
            .unwrap_or_else(|| panic!("trust edge from unknown node: {}", from_xid));
        node.add_trust(kind, to_xid.to_string());
    }

    pub fn contains(&self, xid: &str) -> bool {
        self.nodes.contains_key(xid)
    }

    pub fn get(&self, xid: &str) -> Option<&Node> {
        self.nodes.get(xid)
    }

    pub fn get_mut(&mut self, xid: &str) -> Option<&mut Node> {
        self.nodes.get_mut(xid)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Merge every node of `other` into this list. The merge never
    /// re-enters a node, so shared cycles between the two graphs are
    /// handled by construction.
    pub fn merge(&mut self, other: NodeList) {
        for (_, node) in other.nodes {
            self.add(node);
        }
    }

    /// The json form: an array of node objects, sorted by xid.
    pub fn json(&self) -> Value {
        Value::Array(self.nodes.values().map(|node| node.json(&self.version)).collect())
    }

    /// The rdf form: utf-8 n-quads, one statement per line, nodes sorted
    /// by xid.
    pub fn rdf(&self) -> String {
        let mut lines = vec![];
        for node in self.nodes.values() {
            lines.extend(node.rdf(&self.version));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_node_is_idempotent() {
        let mut graph = NodeList::new("v1");
        let first = graph.create_node("Example.COM", NodeType::Domain);
        let second = graph.create_node("example.com.", NodeType::Domain);
        assert_eq!(first, second);
        // The domain plus its tld parent.
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn test_parent_closure() {
        let mut graph = NodeList::new("v1");
        let xid = graph.create_node("a.b.example.com.", NodeType::Subdomain);
        // Subdomain -> registrable domain -> tld, linked by provisioning.
        let sub = graph.get(&xid).unwrap();
        let parents: Vec<&String> = sub.trusts(TrustKind::Provisioning).collect();
        assert_eq!(parents, vec!["DMN$example.com."]);
        let domain = graph.get("DMN$example.com.").unwrap();
        let parents: Vec<&String> = domain.trusts(TrustKind::Provisioning).collect();
        assert_eq!(parents, vec!["TLD$com."]);
        let tld = graph.get("TLD$com.").unwrap();
        assert_eq!(tld.trusts(TrustKind::Provisioning).count(), 0);
    }

    #[test]
    fn test_every_non_ip_node_has_parent_edge() {
        let mut graph = NodeList::new("v1");
        graph.create_node("a.b.example.co.uk.", NodeType::Subdomain);
        graph.create_node("ns1.example.com.", NodeType::Nameserver);
        graph.create_node("192.0.2.1", NodeType::Ipv4);
        for node in graph.iter() {
            if node.node_type.is_ip() {
                assert_eq!(node.trusts(TrustKind::Provisioning).count(), 0);
                continue;
            }
            if node.node_type == NodeType::Tld {
                continue;
            }
            let parents: Vec<&String> = node.trusts(TrustKind::Provisioning).collect();
            assert_eq!(parents.len(), 1, "node without parent edge: {}", node.xid());
            assert!(graph.contains(parents[0]), "dangling parent of {}", node.xid());
        }
    }

    #[test]
    fn test_merge_on_reinsert_preserves_everything() {
        let mut graph = NodeList::new("v1");
        let xid = graph.create_node("example.com.", NodeType::Domain);
        graph.get_mut(&xid).unwrap().is_hazardous = true;

        let mut flagged = Node::new("example.com.", NodeType::Domain);
        flagged.is_empty_nonterminal = true;
        flagged.add_trust(TrustKind::Child, "NSR$ns1.example.com.".to_string());
        graph.add(flagged);

        let node = graph.get(&xid).unwrap();
        assert!(node.is_hazardous);
        assert!(node.is_empty_nonterminal);
        assert_eq!(node.trusts(TrustKind::Child).count(), 1);
        // The provisioning edge added at creation survived the merge.
        assert_eq!(node.trusts(TrustKind::Provisioning).count(), 1);
    }

    #[test]
    fn test_merge_of_cyclic_graphs_terminates() {
        let version = "v1";
        let mut left = NodeList::new(version);
        let a = left.create_node("a.example.com.", NodeType::Nameserver);
        let b = left.create_node("b.example.org.", NodeType::Nameserver);
        left.add_trust(&a, TrustKind::Parent, &b);
        left.add_trust(&b, TrustKind::Parent, &a);

        let mut right = NodeList::new(version);
        let a2 = right.create_node("a.example.com.", NodeType::Nameserver);
        let b2 = right.create_node("b.example.org.", NodeType::Nameserver);
        right.add_trust(&a2, TrustKind::Child, &b2);
        right.add_trust(&b2, TrustKind::Child, &a2);

        left.merge(right);
        let a_node = left.get(&a).unwrap();
        assert_eq!(a_node.trusts(TrustKind::Parent).count(), 1);
        assert_eq!(a_node.trusts(TrustKind::Child).count(), 1);
    }

    #[test]
    fn test_json_lists_nodes_sorted_by_xid() {
        let mut graph = NodeList::new("v1");
        graph.create_node("zz.example.com.", NodeType::Nameserver);
        graph.create_node("192.0.2.1", NodeType::Ipv4);
        let json = graph.json();
        let xids: Vec<&str> = json
            .as_array()
            .unwrap()
            .iter()
            .map(|node| node["xid"].as_str().unwrap())
            .collect();
        let mut sorted = xids.clone();
        sorted.sort();
        assert_eq!(xids, sorted);
    }
}
