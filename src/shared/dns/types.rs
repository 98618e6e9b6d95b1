/// Record types known to the crawler. Queries are issued for these three
/// types only, and any other type found in a response is skipped while
/// decoding. The numeric values are the ones of the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RecordType {
    A,
    NS,
    AAAA,
}

/// The three types requested for every crawl query, in wire-dispatch order.
pub const ALL_RECORD_TYPES: [RecordType; 3] = [RecordType::NS, RecordType::A, RecordType::AAAA];

impl RecordType {
    /// Try to generate a [`RecordType`] from its raw number representation.
    pub fn from_num(n: u16) -> Result<Self, u16> {
        match n {
            1 => Ok(RecordType::A),
            2 => Ok(RecordType::NS),
            28 => Ok(RecordType::AAAA),
            n => Err(n),
        }
    }

    /// Convert a [`RecordType`] to its raw number representation.
    pub fn to_num(&self) -> u16 {
        match self {
            RecordType::A => 1,
            RecordType::NS => 2,
            RecordType::AAAA => 28,
        }
    }

    /// The textual mnemonic, used in cache keys and rcode maps.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::NS => "NS",
            RecordType::AAAA => "AAAA",
        }
    }
}
