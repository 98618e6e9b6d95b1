use crate::shared::dns::bytes::*;
use crate::shared::dns::errors::*;
use crate::shared::dns::header::*;
use crate::shared::dns::question::*;
use crate::shared::dns::records::*;

/// Represents a complete dns message. The counts in the [`Header`] must be
/// concordant with the [`Question`]s and [`Record`]s carried in the other
/// message fields.
#[derive(Debug)]
pub struct Message {
    pub header: Header,
    pub questions: Vec<Question>,
    pub answers: Vec<Record>,
    pub authorities: Vec<Record>,
    pub additionals: Vec<Record>,
}

impl Message {
    /// Decode a dns [`Message`] from the provided bytes. Questions and records
    /// of unknown types or classes still cause their bytes to be consumed and
    /// are skipped: a crawler keeps whatever it can use out of a response and
    /// ignores the rest.
    pub fn decode_from_bytes(bytes: &[u8]) -> Result<Message, MessageErr> {
        let mut reader = ByteReader::new(bytes);

        let header = match Header::decode_from_buf(&mut reader) {
            Err(err) => return Err(MessageErr::HeaderErr(err)),
            Ok(header) => header,
        };

        let mut questions = Vec::with_capacity(header.questions_count as usize);
        let mut answers = Vec::with_capacity(header.answers_count as usize);
        let mut authorities = Vec::with_capacity(header.authorities_count as usize);
        let mut additionals = Vec::with_capacity(header.additionals_count as usize);

        for i in 0..header.questions_count as usize {
            let decoded_question = Question::decode_from_buf(&mut reader);
            match decoded_question {
                Err(ParsingErr::UnknownType(_)) => continue,
                Err(ParsingErr::UnknownClass(_)) => continue,
                Err(err) => return Err(MessageErr::QuestionErr(i, err)),
                Ok(v) => questions.push(v),
            };
        }
        for i in 0..header.answers_count as usize {
            let decoded_answer = Record::decode_from_buf(&mut reader);
            match decoded_answer {
                Err(ParsingErr::UnknownType(_)) => continue,
                Err(ParsingErr::UnknownClass(_)) => continue,
                Err(err) => return Err(MessageErr::AnswerErr(i, err)),
                Ok(v) => answers.push(v),
            };
        }
        for i in 0..header.authorities_count as usize {
            let decoded_authority = Record::decode_from_buf(&mut reader);
            match decoded_authority {
                Err(ParsingErr::UnknownType(_)) => continue,
                Err(ParsingErr::UnknownClass(_)) => continue,
                Err(err) => return Err(MessageErr::AuthorityErr(i, err)),
                Ok(v) => authorities.push(v),
            };
        }
        for i in 0..header.additionals_count as usize {
            let decoded_additional = Record::decode_from_buf(&mut reader);
            match decoded_additional {
                Err(ParsingErr::UnknownType(_)) => continue,
                Err(ParsingErr::UnknownClass(_)) => continue,
                Err(err) => return Err(MessageErr::AdditionalErr(i, err)),
                Ok(v) => additionals.push(v),
            };
        }

        Ok(Message {
            header,
            questions,
            answers,
            authorities,
            additionals,
        })
    }

    /// Encode a dns [`Message`] to raw bytes, returning a bytes vector. Only
    /// query messages are ever formed internally, so only the header and the
    /// question section are encoded; the record sections must be empty.
    pub fn encode_to_bytes(&self) -> Vec<u8> {
        debug_assert!(self.answers.is_empty());
        debug_assert!(self.authorities.is_empty());
        debug_assert!(self.additionals.is_empty());

        let mut writer = ByteWriter::new();
        self.header.encode_to_buf(&mut writer);
        for i in 0..self.header.questions_count as usize {
            self.questions[i].encode_to_buf(&mut writer);
        }
        writer.into_vec()
    }
}

impl Message {
    pub fn id(&self) -> u16 {
        self.header.id
    }
}
