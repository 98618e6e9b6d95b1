use crate::shared::dns::bytes::*;
use crate::shared::dns::class::*;
use crate::shared::dns::errors::*;
use crate::shared::dns::name::*;
use crate::shared::dns::types::*;
use std::net::{Ipv4Addr, Ipv6Addr};

/// Records present in the answer, authority and additional sections of dns
/// messages. Only the record types the crawler works with have a variant;
/// decoding any other type consumes its bytes and reports [`ParsingErr::UnknownType`]
/// so the caller can skip it. Records are value-equal and hashable, which
/// lets responses hold them in sets.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Record {
    A {
        node: Name,
        class: Class,
        ttl: u32,
        address: Ipv4Addr,
    },
    AAAA {
        node: Name,
        class: Class,
        ttl: u32,
        address: Ipv6Addr,
    },
    NS {
        node: Name,
        class: Class,
        ttl: u32,
        name: Name,
    },
}

impl Record {
    /// Decode a dns message [`Record`] from the bytes read from the passed
    /// reader. Unknown types and classes are detected and the function returns
    /// proper errors. Unknown records types still cause the bytes of that
    /// record to be consumed (and an error is returned as usual).
    pub fn decode_from_buf(reader: &mut ByteReader) -> Result<Record, ParsingErr> {
        let node = Name::from_bytes(reader)?;
        let type_num = check_end(reader.read_u16())?;
        let class_num = check_end(reader.read_u16())?;
        let ttl = check_end(reader.read_u32())?;
        let data_len = check_end(reader.read_u16())? as usize;

        let rec_type = match RecordType::from_num(type_num) {
            Err(n) => {
                check_end(reader.skip(data_len))?;
                return Err(ParsingErr::UnknownType(n));
            }
            Ok(v) => v,
        };
        let class = match Class::from_num(class_num) {
            Err(n) => {
                check_end(reader.skip(data_len))?;
                return Err(ParsingErr::UnknownClass(n));
            }
            Ok(v) => v,
        };

        match rec_type {
            RecordType::A => {
                if data_len != 4 {
                    return Err(ParsingErr::BadRdata("A rdata must be 4 bytes"));
                }
                let octets: [u8; 4] = check_end(reader.read_bytes(4))?.try_into().unwrap();
                Ok(Record::A { node, class, ttl, address: Ipv4Addr::from(octets) })
            }
            RecordType::AAAA => {
                if data_len != 16 {
                    return Err(ParsingErr::BadRdata("AAAA rdata must be 16 bytes"));
                }
                let octets: [u8; 16] = check_end(reader.read_bytes(16))?.try_into().unwrap();
                Ok(Record::AAAA { node, class, ttl, address: Ipv6Addr::from(octets) })
            }
            RecordType::NS => {
                // The target name can use compression pointers, so the
                // rdata length is only a bound on the local bytes.
                let rdata_end = reader.pos() + data_len;
                let name = Name::from_bytes(reader)?;
                reader.seek(rdata_end);
                Ok(Record::NS { node, class, ttl, name })
            }
        }
    }
}

impl Record {
    /// The node (owner name) the record refers to.
    pub fn node(&self) -> &Name {
        match self {
            Record::A { node, .. } => node,
            Record::AAAA { node, .. } => node,
            Record::NS { node, .. } => node,
        }
    }

    pub fn record_type(&self) -> RecordType {
        match self {
            Record::A { .. } => RecordType::A,
            Record::AAAA { .. } => RecordType::AAAA,
            Record::NS { .. } => RecordType::NS,
        }
    }

    pub fn ttl(&self) -> u32 {
        match self {
            Record::A { ttl, .. } => *ttl,
            Record::AAAA { ttl, .. } => *ttl,
            Record::NS { ttl, .. } => *ttl,
        }
    }

    /// The record data in its canonical text form: the address for
    /// A/AAAA records, the target name for NS records.
    pub fn rdata(&self) -> String {
        match self {
            Record::A { address, .. } => address.to_string(),
            Record::AAAA { address, .. } => address.to_string(),
            Record::NS { name, .. } => name.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_record_header(writer: &mut ByteWriter, node: &str, type_num: u16, data_len: u16) {
        writer.write_bytes(&Name::from_string(node).unwrap().to_wire());
        writer.write_u16(type_num);
        writer.write_u16(1); // IN
        writer.write_u8(0);
        writer.write_u8(0);
        writer.write_u16(3600); // ttl as u32, hi half written above
        writer.write_u16(data_len);
    }

    #[test]
    fn test_decode_a_record() {
        let mut writer = ByteWriter::new();
        encode_record_header(&mut writer, "ns1.example.com.", 1, 4);
        writer.write_bytes(&[192, 0, 2, 1]);
        let bytes = writer.into_vec();

        let record = Record::decode_from_buf(&mut ByteReader::new(&bytes)).unwrap();
        assert_eq!(record.node().as_ref(), "ns1.example.com.");
        assert_eq!(record.record_type(), RecordType::A);
        assert_eq!(record.ttl(), 3600);
        assert_eq!(record.rdata(), "192.0.2.1");
    }

    #[test]
    fn test_decode_aaaa_record() {
        let mut writer = ByteWriter::new();
        encode_record_header(&mut writer, "ns1.example.com.", 28, 16);
        writer.write_bytes(&[0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]);
        let bytes = writer.into_vec();

        let record = Record::decode_from_buf(&mut ByteReader::new(&bytes)).unwrap();
        assert_eq!(record.record_type(), RecordType::AAAA);
        assert_eq!(record.rdata(), "2001:db8::1");
    }

    #[test]
    fn test_decode_ns_record() {
        let mut writer = ByteWriter::new();
        let target = Name::from_string("ns1.example.com.").unwrap();
        encode_record_header(&mut writer, "example.com.", 2, target.to_wire().len() as u16);
        writer.write_bytes(&target.to_wire());
        let bytes = writer.into_vec();

        let mut reader = ByteReader::new(&bytes);
        let record = Record::decode_from_buf(&mut reader).unwrap();
        assert_eq!(record.record_type(), RecordType::NS);
        assert_eq!(record.rdata(), "ns1.example.com.");
        assert_eq!(reader.pos(), bytes.len());
    }

    #[test]
    fn test_decode_unknown_type_consumes_bytes() {
        let mut writer = ByteWriter::new();
        encode_record_header(&mut writer, "example.com.", 6, 5); // SOA, not supported
        writer.write_bytes(&[1, 2, 3, 4, 5]);
        writer.write_u8(0xaa); // next item in the section
        let bytes = writer.into_vec();

        let mut reader = ByteReader::new(&bytes);
        let err = Record::decode_from_buf(&mut reader).unwrap_err();
        assert_eq!(err, ParsingErr::UnknownType(6));
        assert_eq!(reader.read_u8(), Some(0xaa));
    }

    #[test]
    fn test_decode_bad_rdata_len() {
        let mut writer = ByteWriter::new();
        encode_record_header(&mut writer, "example.com.", 1, 3);
        writer.write_bytes(&[1, 2, 3]);
        let bytes = writer.into_vec();

        let err = Record::decode_from_buf(&mut ByteReader::new(&bytes)).unwrap_err();
        assert_eq!(err, ParsingErr::BadRdata("A rdata must be 4 bytes"));
    }
}
