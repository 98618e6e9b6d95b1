/// Classes of dns records. Only the internet class is supported,
/// records of other classes are skipped while decoding responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Class {
    IN,
}

impl Class {
    /// Try to generate a [`Class`] from its raw number representation.
    pub fn from_num(n: u16) -> Result<Self, u16> {
        match n {
            1 => Ok(Class::IN),
            n => Err(n),
        }
    }

    /// Convert a [`Class`] to its raw number representation.
    pub fn to_num(&self) -> u16 {
        match self {
            Class::IN => 1,
        }
    }
}
