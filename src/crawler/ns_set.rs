use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Display, Formatter};
use std::hash::{Hash, Hasher};

/// An ordered collection of nameservers, each mapped to the set of its
/// addresses (in canonical text form). This is the currency of the
/// walker: the authoritative nameserver set of a zone as understood at
/// one step of the descent. Equality and hashing go through the
/// canonical string form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NsSet {
    nameservers: BTreeMap<String, BTreeSet<String>>,
}

impl NsSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one address to a nameserver, creating its entry if needed.
    pub fn insert(&mut self, nameserver: &str, ip: &str) {
        self.nameservers
            .entry(nameserver.to_string())
            .or_default()
            .insert(ip.to_string());
    }

    /// Merge a whole set of addresses into a nameserver entry.
    pub fn insert_all(&mut self, nameserver: &str, ips: BTreeSet<String>) {
        self.nameservers.entry(nameserver.to_string()).or_default().extend(ips);
    }

    pub fn get(&self, nameserver: &str) -> Option<&BTreeSet<String>> {
        self.nameservers.get(nameserver)
    }

    /// Merge another [`NsSet`] into this one, nameserver by nameserver.
    pub fn update(&mut self, other: &NsSet) {
        for (nameserver, ips) in &other.nameservers {
            self.nameservers.entry(nameserver.clone()).or_default().extend(ips.iter().cloned());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nameservers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nameservers.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &BTreeSet<String>)> {
        self.nameservers.iter()
    }

    /// Flatten into (nameserver, address) pairs, the unit the walker
    /// queries concurrently.
    pub fn pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![];
        for (nameserver, ips) in &self.nameservers {
            for ip in ips {
                pairs.push((nameserver.clone(), ip.clone()));
            }
        }
        pairs
    }
}

/// The canonical string form: one sorted "nameserver: ip, ip" line per
/// entry. Hashing is defined over this form.
impl Display for NsSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "NSSet")?;
        if self.nameservers.is_empty() {
            return write!(f, "(empty)");
        }
        let mut first = true;
        for (nameserver, ips) in &self.nameservers {
            if !first {
                writeln!(f)?;
            }
            first = false;
            let ip_list = ips.iter().cloned().collect::<Vec<_>>().join(", ");
            write!(f, "{}: {}", nameserver, ip_list)?;
        }
        Ok(())
    }
}

impl Hash for NsSet {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.to_string().hash(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_update() {
        let mut set = NsSet::new();
        set.insert("ns1.example.com.", "192.0.2.1");
        set.insert("ns1.example.com.", "192.0.2.2");

        let mut other = NsSet::new();
        other.insert("ns2.example.com.", "192.0.2.3");
        other.insert("ns1.example.com.", "192.0.2.1");
        set.update(&other);

        assert_eq!(set.len(), 2);
        assert_eq!(set.get("ns1.example.com.").unwrap().len(), 2);
        assert_eq!(set.pairs().len(), 3);
    }

    #[test]
    fn test_canonical_form() {
        let mut set = NsSet::new();
        set.insert("b.example.com.", "192.0.2.2");
        set.insert("a.example.com.", "192.0.2.9");
        set.insert("a.example.com.", "192.0.2.1");
        let expected = "NSSet\na.example.com.: 192.0.2.1, 192.0.2.9\nb.example.com.: 192.0.2.2";
        assert_eq!(set.to_string(), expected);
        assert_eq!(NsSet::new().to_string(), "NSSet\n(empty)");
    }
}
