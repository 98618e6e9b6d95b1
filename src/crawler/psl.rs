use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::OnceLock;

// The bundled public suffix snapshot, compiled into the binary. The
// list is never updated at runtime.
const SUFFIX_DATA: &str = include_str!("../../data/public_suffix_list.dat");

static RULES: OnceLock<RuleSet> = OnceLock::new();

/// The pieces of a hostname split at its public suffix boundary, in the
/// manner of the usual suffix-list extractors: "caag.state.ca.us" gives
/// subdomain "caag", domain "state", suffix "ca.us". All pieces are
/// returned without trailing dots and any of them can be empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    pub subdomain: String,
    pub domain: String,
    pub suffix: String,
}

impl Extracted {
    /// The registrable domain in canonical form ("domain.suffix."), or
    /// `None` when the name is itself a public suffix (or an address).
    pub fn registrable(&self) -> Option<String> {
        if self.domain.is_empty() || self.suffix.is_empty() {
            return None;
        }
        Some(format!("{}.{}.", self.domain, self.suffix))
    }
}

/// Split a hostname at its public suffix. The name may carry a trailing
/// dot and mixed case. IPv4 literals come back whole in `domain`, like
/// the extractor the crawler was built around does. Names matching no
/// rule fall under the prevailing rule: the last label is the suffix.
pub fn extract(name: &str) -> Extracted {
    let trimmed = name.trim().trim_end_matches('.').to_ascii_lowercase();
    if trimmed.parse::<Ipv4Addr>().is_ok() {
        return Extracted {
            subdomain: String::new(),
            domain: trimmed,
            suffix: String::new(),
        };
    }
    let labels: Vec<&str> = trimmed.split('.').filter(|l| !l.is_empty()).collect();
    if labels.is_empty() {
        return Extracted {
            subdomain: String::new(),
            domain: String::new(),
            suffix: String::new(),
        };
    }

    let suffix_start = match_rules(&labels);
    let suffix = labels[suffix_start..].join(".");
    let (subdomain, domain) = if suffix_start == 0 {
        (String::new(), String::new())
    } else {
        (labels[..suffix_start - 1].join("."), labels[suffix_start - 1].to_string())
    };
    Extracted { subdomain, domain, suffix }
}

struct RuleSet {
    exact: HashSet<&'static str>,
    wildcard: HashSet<&'static str>,
    exception: HashSet<&'static str>,
}

// Find the index of the label starting the public suffix. Longer rules
// win, which the scan order guarantees: candidates are tried from the
// whole name down to the last label.
fn match_rules(labels: &[&str]) -> usize {
    let rules = rules();
    for i in 0..labels.len() {
        let candidate = labels[i..].join(".");
        if rules.exception.contains(candidate.as_str()) {
            return i + 1;
        }
        if rules.exact.contains(candidate.as_str()) {
            return i;
        }
        if labels.len() - i >= 2 {
            let wildcard_tail = labels[i + 1..].join(".");
            if rules.wildcard.contains(wildcard_tail.as_str()) {
                return i;
            }
        }
    }
    labels.len() - 1
}

fn rules() -> &'static RuleSet {
    RULES.get_or_init(|| {
        let mut exact = HashSet::new();
        let mut wildcard = HashSet::new();
        let mut exception = HashSet::new();
        for line in SUFFIX_DATA.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with("//") {
                continue;
            }
            if let Some(rest) = line.strip_prefix("!") {
                exception.insert(rest);
            } else if let Some(rest) = line.strip_prefix("*.") {
                wildcard.insert(rest);
            } else {
                exact.insert(line);
            }
        }
        RuleSet { exact, wildcard, exception }
    })
}
