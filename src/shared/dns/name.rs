use crate::shared::dns::bytes::*;
use crate::shared::dns::errors::*;
use std::fmt::{self, Display, Formatter};
use std::str;

/// A wrapper for domain names. The [`Name`] struct holds absolute, case
/// folded domain names ("example.com.", the root being "."). This is the
/// invariant guaranteed by every method that creates or modifies names.
/// Validation is deliberately loose: a crawler meets hostnames in the
/// wild that violate the letter of the RFCs (underscores, digit-only
/// labels) and still must walk them. [`Name`] implements `AsRef<str>`,
/// so a reference to the inner string can be easily obtained.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Name(String);

impl AsRef<str> for Name {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for Name {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Name {
    const POINTER_MASK: u8 = 0b1100_0000;
    const MAX_REDIR: u16 = 15;

    /// Returns the [`Name`] of the dns root.
    pub fn root() -> Self {
        Self(".".to_string())
    }

    /// Creates a [`Name`] from the passed string, canonicalizing it: the
    /// name is case folded and the trailing dot is appended when missing.
    pub fn from_string(s: &str) -> Result<Self, NameErr> {
        let mut name = s.to_ascii_lowercase();
        if !name.ends_with('.') {
            name.push('.');
        }
        validate_name(&name)?;
        Ok(Self(name))
    }

    /// Creates a [`Name`] parsing its binary representation (a series of
    /// labels, divided by a length byte). Compression pointers are followed,
    /// with a max number of jumps allowed (for security reasons).
    pub fn from_bytes(reader: &mut ByteReader) -> Result<Self, NameErr> {
        let mut name_bytes: Vec<u8> = Vec::with_capacity(100);
        let mut pos_after_jump: usize = 0;
        let mut n_jumps: u16 = 0;

        loop {
            let len_byte = check_name_end(reader.read_u8())?;
            match len_byte & Self::POINTER_MASK {
                // Pointer type. Set the next read pos to the referenced
                // part. After all jumps, the position must be re-set.
                0b1100_0000 => {
                    if n_jumps >= Self::MAX_REDIR {
                        return Err(NameErr::MaxRedir);
                    }
                    let second_byte = check_name_end(reader.read_u8())? as u16;
                    if n_jumps == 0 {
                        pos_after_jump = reader.pos();
                    }
                    let jump_pos = ((len_byte & !Self::POINTER_MASK) as u16) << 8 | second_byte;
                    reader.seek(jump_pos as usize);
                    n_jumps += 1;
                }
                // Normal label type. Could be found either after
                // a pointer redirection or the very first time.
                0b0000_0000 => {
                    if len_byte == 0 {
                        name_bytes.push(b'.');
                        break;
                    }
                    if !name_bytes.is_empty() {
                        name_bytes.push(b'.');
                    }
                    let label_bytes = check_name_end(reader.read_bytes(len_byte as usize))?;
                    name_bytes.extend(label_bytes);
                    if name_bytes.len() > 255 {
                        return Err(NameErr::LongName);
                    }
                }
                // Starting bits are 10 or 01. These are reserved
                // for later use. We treat this as an error.
                _ => return Err(NameErr::MalformedLabel("wrong starting bits")),
            }
        }

        // Re-set the position if we followed a pointer.
        if pos_after_jump > 0 {
            reader.seek(pos_after_jump);
        }

        match str::from_utf8(&name_bytes) {
            Err(_) => Err(NameErr::MalformedName("not UTF-8")),
            Ok(name) => Self::from_string(name),
        }
    }

    /// Encode and return a domain [`Name`] in its binary representation
    /// (a series of labels, divided by a length byte). Compression is
    /// never used on the encoding side.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut vec = Vec::with_capacity(self.0.len() + 1);
        for label in self.labels() {
            vec.push(label.len() as u8);
            vec.extend(label.as_bytes());
        }
        vec.push(0);
        vec
    }
}

impl Name {
    /// Reports if the [`Name`] is the dns root.
    pub fn is_root(&self) -> bool {
        self.0 == "."
    }

    /// Iterate over the labels of the name, most specific first.
    /// The root yields no labels.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.0.split('.').filter(|l| !l.is_empty())
    }

    /// The number of labels of the name. The root has zero.
    pub fn label_count(&self) -> usize {
        self.labels().count()
    }

    /// The least significant label of the name, if any.
    pub fn last_label(&self) -> Option<&str> {
        self.labels().last()
    }

    /// Returns the name obtained dropping the most specific label
    /// ("ns1.example.com." -> "example.com."), or the root when a
    /// single label is left. Returns `None` for the root itself.
    pub fn superdomain(&self) -> Option<Name> {
        if self.is_root() {
            return None;
        }
        match self.0.split_once('.') {
            Some((_, "")) => Some(Name::root()),
            Some((_, rest)) => Some(Name(rest.to_string())),
            None => None,
        }
    }

    /// Reports if the [`Name`] is contained in the passed zone. Every
    /// name is contained in the root zone.
    pub fn is_in_zone(&self, zone: &Self) -> bool {
        let mut name_labels = self.0.rsplit('.');
        let zone_labels = zone.0.rsplit('.');
        for zl in zone_labels {
            let nl = match name_labels.next() {
                None => return false,
                Some(v) => v,
            };
            if nl != zl {
                return false;
            }
        }
        true
    }
}

// Validate the string to check if it's a valid absolute domain name.
// Labels are checked for length and for characters that would break
// the textual form, everything else is tolerated.
fn validate_name(name: &str) -> Result<(), NameErr> {
    if name == "." {
        return Ok(());
    }
    if name.len() > 255 {
        return Err(NameErr::LongName);
    }
    if name.starts_with('.') {
        return Err(NameErr::MalformedName("starts with dot"));
    }
    if name.contains("..") {
        return Err(NameErr::MalformedName("double dot in name"));
    }
    let name = &name[..name.len() - 1];
    for label in name.split('.') {
        if label.is_empty() {
            return Err(NameErr::MalformedLabel("empty label"));
        }
        if label.len() > 63 {
            return Err(NameErr::LongLabel);
        }
        let printable = label.chars().all(|ch| ch.is_ascii_graphic());
        if !printable {
            return Err(NameErr::MalformedLabel("not printable ascii"));
        }
    }
    Ok(())
}

fn check_name_end<T>(opt: Option<T>) -> Result<T, NameErr> {
    match opt {
        None => Err(NameErr::BytesEnd),
        Some(v) => Ok(v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_form() {
        assert_eq!(Name::from_string("EXAMPLE.Com").unwrap().as_ref(), "example.com.");
        assert_eq!(Name::from_string("example.com.").unwrap().as_ref(), "example.com.");
        assert_eq!(Name::from_string(".").unwrap().as_ref(), ".");
        assert_eq!(Name::from_string("_spf.example.com").unwrap().as_ref(), "_spf.example.com.");
        assert!(Name::from_string("a..b").is_err());
        assert!(Name::from_string(".a.b").is_err());
    }

    #[test]
    fn test_labels_and_superdomain() {
        let name = Name::from_string("ns1.example.com").unwrap();
        assert_eq!(name.labels().collect::<Vec<_>>(), vec!["ns1", "example", "com"]);
        assert_eq!(name.label_count(), 3);
        assert_eq!(name.last_label(), Some("com"));
        assert_eq!(name.superdomain().unwrap().as_ref(), "example.com.");

        let tld = Name::from_string("com").unwrap();
        assert_eq!(tld.superdomain().unwrap(), Name::root());
        assert_eq!(Name::root().superdomain(), None);
        assert_eq!(Name::root().label_count(), 0);
    }

    #[test]
    fn test_zone_containment() {
        let name = Name::from_string("a.b.example.com.").unwrap();
        assert!(name.is_in_zone(&Name::from_string("example.com.").unwrap()));
        assert!(name.is_in_zone(&Name::root()));
        assert!(name.is_in_zone(&name));
        assert!(!name.is_in_zone(&Name::from_string("other.com.").unwrap()));
        // Label-wise check, not a naive string suffix match.
        assert!(!name.is_in_zone(&Name::from_string("ple.com.").unwrap()));
    }

    #[test]
    fn test_decode_simple() {
        let bytes = [3, b'w', b'w', b'w', 7, b'E', b'x', b'a', b'm', b'p', b'l', b'e', 3, b'c', b'o', b'm', 0];
        let mut reader = ByteReader::new(&bytes);
        let name = Name::from_bytes(&mut reader).unwrap();
        assert_eq!(name.as_ref(), "www.example.com.");
        assert_eq!(reader.pos(), bytes.len());
    }

    #[test]
    fn test_decode_root() {
        let mut reader = ByteReader::new(&[0]);
        assert_eq!(Name::from_bytes(&mut reader).unwrap(), Name::root());
    }

    #[test]
    fn test_decode_with_pointer() {
        // "example.com." at offset 0, "ns1" + pointer to offset 0 at offset 13.
        let bytes = [
            7, b'e', b'x', b'a', b'm', b'p', b'l', b'e', 3, b'c', b'o', b'm', 0, // offset 0
            3, b'n', b's', b'1', 0xc0, 0x00, // offset 13
            0xff, // trailing byte, must not be consumed
        ];
        let mut reader = ByteReader::new(&bytes);
        reader.seek(13);
        let name = Name::from_bytes(&mut reader).unwrap();
        assert_eq!(name.as_ref(), "ns1.example.com.");
        assert_eq!(reader.pos(), 19);
    }

    #[test]
    fn test_decode_pointer_loop() {
        // A pointer referencing itself must hit the redirection limit.
        let bytes = [0xc0, 0x00];
        let mut reader = ByteReader::new(&bytes);
        assert_eq!(Name::from_bytes(&mut reader), Err(NameErr::MaxRedir));
    }

    #[test]
    fn test_wire_round_trip() {
        let name = Name::from_string("ns1.example.com.").unwrap();
        let wire = name.to_wire();
        let mut reader = ByteReader::new(&wire);
        assert_eq!(Name::from_bytes(&mut reader).unwrap(), name);
        assert_eq!(Name::root().to_wire(), vec![0]);
    }
}
