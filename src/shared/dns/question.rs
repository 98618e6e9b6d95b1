use crate::shared::dns::bytes::*;
use crate::shared::dns::class::*;
use crate::shared::dns::errors::*;
use crate::shared::dns::name::*;
use crate::shared::dns::types::*;

/// A dns question, present in the question section of dns messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub node: Name,
    pub record_type: RecordType,
    pub class: Class,
}

impl Question {
    /// Decode a dns [`Question`] from the bytes read from the passed reader.
    /// The bytes of questions of unknown type or class are still consumed.
    pub fn decode_from_buf(reader: &mut ByteReader) -> Result<Question, ParsingErr> {
        let node = Name::from_bytes(reader)?;
        let type_num = check_end(reader.read_u16())?;
        let class_num = check_end(reader.read_u16())?;
        let record_type = match RecordType::from_num(type_num) {
            Err(n) => return Err(ParsingErr::UnknownType(n)),
            Ok(v) => v,
        };
        let class = match Class::from_num(class_num) {
            Err(n) => return Err(ParsingErr::UnknownClass(n)),
            Ok(v) => v,
        };
        Ok(Question { node, record_type, class })
    }

    /// Encode a dns [`Question`] to raw bytes, writing them into the writer.
    pub fn encode_to_buf(&self, writer: &mut ByteWriter) {
        writer.write_bytes(&self.node.to_wire());
        writer.write_u16(self.record_type.to_num());
        writer.write_u16(self.class.to_num());
    }
}
