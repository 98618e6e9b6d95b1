use crate::shared::dns::bytes::*;
use crate::shared::dns::errors::*;
use rand::Rng;

/// Header of dns messages. This type can be generated manually or obtained
/// decoding it from raw bytes. The `Default` trait is implemented to
/// generate an empty header with a random id. The op code is kept in its
/// raw form: the crawler only ever sends standard queries and accepts
/// whatever servers put in their responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub id: u16,
    pub query_resp: bool,
    pub op_code: u8,
    pub auth_answer: bool,
    pub truncated: bool,
    pub recursion_desired: bool,
    pub recursion_available: bool,
    pub z: u8,
    pub resp_code: RespCode,
    pub questions_count: u16,
    pub answers_count: u16,
    pub authorities_count: u16,
    pub additionals_count: u16,
}

impl Default for Header {
    fn default() -> Self {
        Header {
            id: rand::thread_rng().gen::<u16>(),
            query_resp: false,
            op_code: 0,
            auth_answer: false,
            truncated: false,
            recursion_desired: false,
            recursion_available: false,
            z: 0,
            resp_code: RespCode::NoError,
            questions_count: 0,
            answers_count: 0,
            authorities_count: 0,
            additionals_count: 0,
        }
    }
}

impl Header {
    /// Decode a dns message [`Header`] from the bytes read from the provided reader.
    pub fn decode_from_buf(reader: &mut ByteReader) -> Result<Header, ParsingErr> {
        let id = check_end(reader.read_u16())?;
        let flags = check_end(reader.read_u16())?;
        let questions_count = check_end(reader.read_u16())?;
        let answers_count = check_end(reader.read_u16())?;
        let authorities_count = check_end(reader.read_u16())?;
        let additionals_count = check_end(reader.read_u16())?;
        Ok(Header {
            id,
            query_resp: flags >> 15 & 1 == 1,
            op_code: (flags >> 11 & 0b1111) as u8,
            auth_answer: flags >> 10 & 1 == 1,
            truncated: flags >> 9 & 1 == 1,
            recursion_desired: flags >> 8 & 1 == 1,
            recursion_available: flags >> 7 & 1 == 1,
            z: (flags >> 4 & 0b111) as u8,
            resp_code: RespCode::from_num((flags & 0b1111) as u8),
            questions_count,
            answers_count,
            authorities_count,
            additionals_count,
        })
    }

    /// Encode a dns [`Header`] to raw bytes, writing them into the provided writer.
    pub fn encode_to_buf(&self, writer: &mut ByteWriter) {
        let mut flags: u16 = 0;
        flags |= (self.query_resp as u16) << 15;
        flags |= (self.op_code as u16 & 0b1111) << 11;
        flags |= (self.auth_answer as u16) << 10;
        flags |= (self.truncated as u16) << 9;
        flags |= (self.recursion_desired as u16) << 8;
        flags |= (self.recursion_available as u16) << 7;
        flags |= (self.z as u16 & 0b111) << 4;
        flags |= self.resp_code.to_num() as u16 & 0b1111;
        writer.write_u16(self.id);
        writer.write_u16(flags);
        writer.write_u16(self.questions_count);
        writer.write_u16(self.answers_count);
        writer.write_u16(self.authorities_count);
        writer.write_u16(self.additionals_count);
    }

    /// Tells if a [`Header`] represents a request.
    pub fn is_request(&self) -> bool {
        !self.query_resp
    }
}

/// The response code is a code present in the [`Header`] and it's used to
/// inform the client about the outcome of the query. Codes without a
/// dedicated variant are preserved in [`RespCode::Other`]: the crawler
/// records every rcode it meets instead of rejecting uncommon ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RespCode {
    NoError,
    FormErr,
    ServFail,
    NxDomain,
    NotImp,
    Refused,
    Other(u8),
}

impl RespCode {
    pub fn from_num(n: u8) -> Self {
        match n {
            0 => RespCode::NoError,
            1 => RespCode::FormErr,
            2 => RespCode::ServFail,
            3 => RespCode::NxDomain,
            4 => RespCode::NotImp,
            5 => RespCode::Refused,
            n => RespCode::Other(n),
        }
    }

    pub fn to_num(&self) -> u8 {
        match self {
            RespCode::NoError => 0,
            RespCode::FormErr => 1,
            RespCode::ServFail => 2,
            RespCode::NxDomain => 3,
            RespCode::NotImp => 4,
            RespCode::Refused => 5,
            RespCode::Other(n) => *n,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_round_trip() {
        let header = Header {
            id: 0xbeef,
            query_resp: true,
            op_code: 0,
            auth_answer: true,
            truncated: false,
            recursion_desired: true,
            recursion_available: false,
            z: 0,
            resp_code: RespCode::NxDomain,
            questions_count: 1,
            answers_count: 2,
            authorities_count: 3,
            additionals_count: 4,
        };
        let mut writer = ByteWriter::new();
        header.encode_to_buf(&mut writer);
        let bytes = writer.into_vec();
        assert_eq!(bytes.len(), 12);

        let mut reader = ByteReader::new(&bytes);
        let decoded = Header::decode_from_buf(&mut reader).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_header_decode_flags() {
        // id=1, flags: qr=1 aa=1 rcode=0, one question.
        let bytes = [0x00, 0x01, 0x84, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        let header = Header::decode_from_buf(&mut ByteReader::new(&bytes)).unwrap();
        assert!(header.query_resp);
        assert!(header.auth_answer);
        assert!(!header.is_request());
        assert_eq!(header.resp_code, RespCode::NoError);
        assert_eq!(header.questions_count, 1);
    }

    #[test]
    fn test_resp_code_mapping() {
        assert_eq!(RespCode::from_num(3), RespCode::NxDomain);
        assert_eq!(RespCode::from_num(9), RespCode::Other(9));
        assert_eq!(RespCode::Other(9).to_num(), 9);
    }
}
