use std::collections::HashMap;
use std::fmt::Display;
use std::net::{ IpAddr, Ipv4Addr, Ipv6Addr };

use log::debug;

use crate::mdns_error::{ MdnsError, Result };
use crate::service::{ quote, split_name };

const HEADER_LEN: usize = 12;

const FLAGS_QR_MASK: u16 = 0x8000;
const FLAGS_QR_RESPONSE: u16 = 0x8000;
const FLAGS_OPCODE_MASK: u16 = 0x7800;
const FLAGS_OPCODE_SHIFT: u16 = 11;
const FLAGS_AA: u16 = 0x0400;
const FLAGS_TC: u16 = 0x0200;
const FLAGS_RCODE_MASK: u16 = 0x000f;

pub const CLASS_IN: u16 = 0x0001;
const CLASS_MASK: u16 = 0x7fff;

/// Top bit of a question class: the querier asks for a unicast reply.
pub const CLASS_UNICAST_RESPONSE: u16 = 0x8000;

/// Top bit of a record class: the record replaces all cached records of the set.
pub const CLASS_CACHE_FLUSH: u16 = 0x8000;

const MAX_COMPRESSION_POINTERS: u8 = 126;
const MAX_LABEL_OCTETS: usize = 63;
const MAX_NAME_OCTETS: usize = 255;
const MAX_POINTER_OFFSET: usize = 0x3fff;
const MAX_TXT_OCTETS: usize = 255;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RecordType
{
    A,
    NS,
    CNAME,
    SOA,
    PTR,
    MX,
    TXT,
    AAAA,
    SRV,
    OPT,
    NSEC,
    ANY,
    Unknown(u16)
}

impl RecordType
{
    pub fn from(value: u16) -> RecordType
    {
        match value
        {
            1 => RecordType::A,
            2 => RecordType::NS,
            5 => RecordType::CNAME,
            6 => RecordType::SOA,
            12 => RecordType::PTR,
            15 => RecordType::MX,
            16 => RecordType::TXT,
            28 => RecordType::AAAA,
            33 => RecordType::SRV,
            41 => RecordType::OPT,
            47 => RecordType::NSEC,
            255 => RecordType::ANY,
            other => RecordType::Unknown(other)
        }
    }

    pub fn code(&self) -> u16
    {
        match self
        {
            RecordType::A => 1,
            RecordType::NS => 2,
            RecordType::CNAME => 5,
            RecordType::SOA => 6,
            RecordType::PTR => 12,
            RecordType::MX => 15,
            RecordType::TXT => 16,
            RecordType::AAAA => 28,
            RecordType::SRV => 33,
            RecordType::OPT => 41,
            RecordType::NSEC => 47,
            RecordType::ANY => 255,
            RecordType::Unknown(other) => *other
        }
    }
}

impl Display for RecordType
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        match self
        {
            RecordType::A => write!(f, "A"),
            RecordType::NS => write!(f, "NS"),
            RecordType::CNAME => write!(f, "CNAME"),
            RecordType::SOA => write!(f, "SOA"),
            RecordType::PTR => write!(f, "PTR"),
            RecordType::MX => write!(f, "MX"),
            RecordType::TXT => write!(f, "TXT"),
            RecordType::AAAA => write!(f, "AAAA"),
            RecordType::SRV => write!(f, "SRV"),
            RecordType::OPT => write!(f, "OPT"),
            RecordType::NSEC => write!(f, "NSEC"),
            RecordType::ANY => write!(f, "ANY"),
            RecordType::Unknown(other) => write!(f, "TYPE{}", other)
        }
    }
}

struct DnsHeader
{
    id: u16,
    flags: u16,
    queries_len: u16,
    answers_len: u16,
    authorities_len: u16,
    additional_len: u16
}

impl DnsHeader
{
    fn from(buffer: &[u8]) -> Result<DnsHeader>
    {
        if buffer.len() < HEADER_LEN
        {
            return Err(MdnsError::InvalidHeader);
        }

        Ok(DnsHeader
        {
            id: u16::from_be_bytes([buffer[0], buffer[1]]),
            flags: u16::from_be_bytes([buffer[2], buffer[3]]),
            queries_len: u16::from_be_bytes([buffer[4], buffer[5]]),
            answers_len: u16::from_be_bytes([buffer[6], buffer[7]]),
            authorities_len: u16::from_be_bytes([buffer[8], buffer[9]]),
            additional_len: u16::from_be_bytes([buffer[10], buffer[11]])
        })
    }

    fn to_bytes(&self) -> Vec<u8>
    {
        let mut buffer = Vec::with_capacity(HEADER_LEN);

        buffer.extend_from_slice(&self.id.to_be_bytes());
        buffer.extend_from_slice(&self.flags.to_be_bytes());
        buffer.extend_from_slice(&self.queries_len.to_be_bytes());
        buffer.extend_from_slice(&self.answers_len.to_be_bytes());
        buffer.extend_from_slice(&self.authorities_len.to_be_bytes());
        buffer.extend_from_slice(&self.additional_len.to_be_bytes());

        buffer
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Question
{
    pub name: String,
    pub qtype: RecordType,
    pub class: u16
}

impl Question
{
    pub fn new(name: &str, qtype: RecordType) -> Question
    {
        Question
        {
            name: name.to_string(),
            qtype,
            class: CLASS_IN
        }
    }

    pub fn unicast_response(&self) -> bool
    {
        self.class & CLASS_UNICAST_RESPONSE != 0
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecordData
{
    A(Ipv4Addr),
    AAAA(Ipv6Addr),
    PTR(String),
    SRV
    {
        priority: u16,
        weight: u16,
        port: u16,
        target: String
    },
    TXT(Vec<String>)
}

impl RecordData
{
    pub fn record_type(&self) -> RecordType
    {
        match self
        {
            RecordData::A(_) => RecordType::A,
            RecordData::AAAA(_) => RecordType::AAAA,
            RecordData::PTR(_) => RecordType::PTR,
            RecordData::SRV { .. } => RecordType::SRV,
            RecordData::TXT(_) => RecordType::TXT
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record
{
    pub name: String,
    pub class: u16,
    pub cache_flush: bool,
    pub ttl: u32,
    pub data: RecordData
}

impl Record
{
    pub fn new(name: &str, ttl: u32, data: RecordData) -> Record
    {
        Record
        {
            name: name.to_string(),
            class: CLASS_IN,
            cache_flush: false,
            ttl,
            data
        }
    }

    pub fn ptr(name: &str, ttl: u32, target: &str) -> Record
    {
        Record::new(name, ttl, RecordData::PTR(target.to_string()))
    }

    pub fn srv(name: &str, ttl: u32, port: u16, target: &str) -> Record
    {
        Record::new(name, ttl, RecordData::SRV { priority: 0, weight: 0, port, target: target.to_string() })
    }

    pub fn txt(name: &str, ttl: u32, records: &[String]) -> Record
    {
        Record::new(name, ttl, RecordData::TXT(records.to_vec()))
    }

    pub fn address(name: &str, ttl: u32, addr: IpAddr) -> Record
    {
        match addr
        {
            IpAddr::V4(v4) => Record::new(name, ttl, RecordData::A(v4)),
            IpAddr::V6(v6) => Record::new(name, ttl, RecordData::AAAA(v6))
        }
    }

    pub fn record_type(&self) -> RecordType
    {
        self.data.record_type()
    }
}

impl Display for Record
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        match &self.data
        {
            RecordData::PTR(target) => write!(f, "PTR: {} -> {} (ttl {})", self.name, target, self.ttl),
            RecordData::SRV { port, target, .. } => write!(f, "SRV: {} -> {}:{} (ttl {})", self.name, target, port, self.ttl),
            RecordData::TXT(records) => write!(f, "TXT: {} -> {:?} (ttl {})", self.name, records, self.ttl),
            RecordData::A(address) => write!(f, "A: {} -> {} (ttl {})", self.name, address, self.ttl),
            RecordData::AAAA(address) => write!(f, "AAAA: {} -> {} (ttl {})", self.name, address, self.ttl)
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Message
{
    pub id: u16,
    pub flags: u16,
    pub questions: Vec<Question>,
    pub answers: Vec<Record>,
    pub authorities: Vec<Record>,
    pub additionals: Vec<Record>
}

impl Message
{
    /// A multicast query with a single question. The unicast-response bit is
    /// never set.
    pub fn new_query(name: &str, qtype: RecordType) -> Message
    {
        Message
        {
            questions: vec![Question::new(name, qtype)],
            ..Default::default()
        }
    }

    /// An empty authoritative response with id 0.
    pub fn new_response() -> Message
    {
        Message
        {
            flags: FLAGS_QR_RESPONSE | FLAGS_AA,
            ..Default::default()
        }
    }

    pub fn is_response(&self) -> bool
    {
        self.flags & FLAGS_QR_MASK == FLAGS_QR_RESPONSE
    }

    pub fn is_authoritative(&self) -> bool
    {
        self.flags & FLAGS_AA != 0
    }

    pub fn is_truncated(&self) -> bool
    {
        self.flags & FLAGS_TC != 0
    }

    pub fn opcode(&self) -> u8
    {
        ((self.flags & FLAGS_OPCODE_MASK) >> FLAGS_OPCODE_SHIFT) as u8
    }

    pub fn rcode(&self) -> u8
    {
        (self.flags & FLAGS_RCODE_MASK) as u8
    }

    /// Records from the answer, authority and additional sections, in order.
    pub fn records(&self) -> impl Iterator<Item = &Record>
    {
        self.answers.iter().chain(self.authorities.iter()).chain(self.additionals.iter())
    }

    pub fn from(buffer: &[u8]) -> Result<Message>
    {
        let header = DnsHeader::from(buffer)?;
        let mut message = Message
        {
            id: header.id,
            flags: header.flags,
            ..Default::default()
        };

        let mut offset: usize = HEADER_LEN;

        for _ in 0..header.queries_len
        {
            let (name, label_end) = label_to_string(buffer, offset)?;
            let qtype = RecordType::from(read_u16(buffer, label_end)?);
            let class = read_u16(buffer, label_end + 2)?;
            offset = label_end + 4;

            message.questions.push(Question { name, qtype, class });
        }

        offset = parse_section(buffer, offset, header.answers_len, &mut message.answers)?;
        offset = parse_section(buffer, offset, header.authorities_len, &mut message.authorities)?;
        parse_section(buffer, offset, header.additional_len, &mut message.additionals)?;

        Ok(message)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>>
    {
        let max = u16::MAX as usize;
        if self.questions.len() > max || self.answers.len() > max || self.authorities.len() > max || self.additionals.len() > max
        {
            return Err(MdnsError::BadParameter(String::from("to_bytes: too many records")));
        }

        let header = DnsHeader
        {
            id: self.id,
            flags: self.flags,
            queries_len: self.questions.len() as u16,
            answers_len: self.answers.len() as u16,
            authorities_len: self.authorities.len() as u16,
            additional_len: self.additionals.len() as u16
        };

        let mut writer = Writer::new();
        writer.buffer.extend(header.to_bytes());

        for question in &self.questions
        {
            writer.write_name(&question.name)?;
            writer.write_u16(question.qtype.code());
            writer.write_u16(question.class);
        }

        for record in self.records()
        {
            writer.write_record(record)?;
        }

        Ok(writer.buffer)
    }
}

fn read_u16(buffer: &[u8], offset: usize) -> Result<u16>
{
    match buffer.get(offset..offset + 2)
    {
        Some(bytes) => Ok(u16::from_be_bytes([bytes[0], bytes[1]])),
        None => Err(MdnsError::InvalidRecord)
    }
}

fn read_u32(buffer: &[u8], offset: usize) -> Result<u32>
{
    match buffer.get(offset..offset + 4)
    {
        Some(bytes) => Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
        None => Err(MdnsError::InvalidRecord)
    }
}

fn parse_section(buffer: &[u8], mut offset: usize, count: u16, records: &mut Vec<Record>) -> Result<usize>
{
    for _ in 0..count
    {
        let (record, record_end) = parse_record(buffer, offset)?;
        if let Some(record) = record
        {
            records.push(record);
        }

        offset = record_end;
    }

    Ok(offset)
}

fn parse_record(buffer: &[u8], offset: usize) -> Result<(Option<Record>, usize)>
{
    // Parse DNS label.
    let (name, label_end) = label_to_string(buffer, offset)?;

    let record_type = RecordType::from(read_u16(buffer, label_end)?);
    let class = read_u16(buffer, label_end + 2)?;
    let ttl = read_u32(buffer, label_end + 4)?;
    let data_len = read_u16(buffer, label_end + 8)? as usize;

    let offset = label_end + 10;
    let end = offset + data_len;
    if end > buffer.len()
    {
        return Err(MdnsError::InvalidRecord);
    }

    let data = match record_type
    {
        RecordType::A =>
        {
            if data_len != 4
            {
                return Err(MdnsError::InvalidRecord);
            }

            Some(RecordData::A(Ipv4Addr::new(buffer[offset], buffer[offset + 1], buffer[offset + 2], buffer[offset + 3])))
        },
        RecordType::AAAA =>
        {
            if data_len != 16
            {
                return Err(MdnsError::InvalidRecord);
            }

            let mut octets = [0u8; 16];
            octets.copy_from_slice(&buffer[offset..end]);

            Some(RecordData::AAAA(Ipv6Addr::from(octets)))
        },
        RecordType::SRV =>
        {
            if data_len < 7
            {
                return Err(MdnsError::InvalidRecord);
            }

            let priority = read_u16(buffer, offset)?;
            let weight = read_u16(buffer, offset + 2)?;
            let port = read_u16(buffer, offset + 4)?;
            let (target, next) = label_to_string(buffer, offset + 6)?;
            if next > end
            {
                return Err(MdnsError::InvalidRecord);
            }

            Some(RecordData::SRV { priority, weight, port, target })
        },
        RecordType::PTR =>
        {
            let (target, next) = label_to_string(buffer, offset)?;
            if next > end
            {
                return Err(MdnsError::InvalidRecord);
            }

            Some(RecordData::PTR(target))
        },
        RecordType::TXT =>
        {
            let mut records: Vec<String> = Vec::new();
            let mut txt_offset = offset;

            while txt_offset < end
            {
                let txt_len = buffer[txt_offset] as usize;
                txt_offset += 1;

                if txt_offset + txt_len > end
                {
                    return Err(MdnsError::InvalidRecord);
                }

                match std::str::from_utf8(&buffer[txt_offset..txt_offset + txt_len])
                {
                    // A lone empty string is how an empty TXT set goes on the wire.
                    Ok("") => (),
                    Ok(txt) => records.push(txt.to_string()),
                    Err(_) => debug!("Skipping TXT string that is not UTF-8 in {}", name)
                }

                txt_offset += txt_len;
            }

            Some(RecordData::TXT(records))
        },
        _ =>
        {
            // We got a record we don't care about. Skip it.
            None
        }
    };

    let record = data.map(|data| Record
    {
        name,
        class: class & CLASS_MASK,
        cache_flush: class & CLASS_CACHE_FLUSH != 0,
        ttl,
        data
    });

    Ok((record, end))
}

/// Reads a possibly compressed name at `start_offset`. Returns the name in
/// presentation form (labels quoted, trailing dot) and the offset just past it.
fn label_to_string(buffer: &[u8], start_offset: usize) -> Result<(String, usize)>
{
    let mut labels: Vec<String> = Vec::new();
    let mut offset = start_offset;
    let mut ptr_budget = MAX_COMPRESSION_POINTERS;
    let mut end_offset: Option<usize> = None;
    let mut name_len: usize = 0;

    loop
    {
        let len_byte = *buffer.get(offset).ok_or(MdnsError::LabelInvalid)?;

        match len_byte & 0xc0
        {
            0x00 =>
            {
                if len_byte == 0x00
                {
                    // End of name, set offset to next thing.
                    if end_offset.is_none()
                    {
                        end_offset = Some(offset + 1);
                    }

                    break;
                }

                let label_len = len_byte as usize;
                offset += 1;

                if offset + label_len > buffer.len()
                {
                    return Err(MdnsError::LabelTooLong);
                }

                name_len += label_len + 1;
                if name_len > MAX_NAME_OCTETS
                {
                    return Err(MdnsError::LabelTooLong);
                }

                let label = String::from_utf8_lossy(&buffer[offset..offset + label_len]);
                labels.push(quote(&label));

                offset += label_len;
            },
            0xc0 =>
            {
                // Pointer.
                if ptr_budget == 0
                {
                    return Err(MdnsError::LabelCompressionLoop);
                }

                ptr_budget -= 1;

                let low = *buffer.get(offset + 1).ok_or(MdnsError::LabelInvalid)?;
                let ptr = (((len_byte & 0x3f) as usize) << 8) | low as usize;
                if ptr >= offset
                {
                    return Err(MdnsError::LabelPtrForward);
                }

                if end_offset.is_none()
                {
                    end_offset = Some(offset + 2);
                }

                offset = ptr;
            },
            _ =>
            {
                return Err(MdnsError::LabelInvalid);
            }
        }
    }

    let name = if labels.is_empty()
    {
        String::from(".")
    }
    else
    {
        labels.join(".") + "."
    };

    Ok((name, end_offset.unwrap_or(offset + 1)))
}

struct Writer
{
    buffer: Vec<u8>,
    compression: HashMap<String, usize>
}

impl Writer
{
    fn new() -> Writer
    {
        Writer
        {
            buffer: Vec::with_capacity(512),
            compression: HashMap::new()
        }
    }

    fn write_u16(&mut self, value: u16)
    {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    fn write_u32(&mut self, value: u32)
    {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    fn write_name(&mut self, name: &str) -> Result<()>
    {
        let labels = split_name(name)?;

        let total: usize = labels.iter().map(|label| label.len() + 1).sum();
        if total + 1 > MAX_NAME_OCTETS
        {
            return Err(MdnsError::LabelTooLong);
        }

        for i in 0..labels.len()
        {
            let suffix: Vec<String> = labels[i..].iter().map(|label| quote(label)).collect();
            let key = suffix.join(".");

            if let Some(ptr) = self.compression.get(&key)
            {
                self.write_u16(0xc000 | *ptr as u16);
                return Ok(());
            }

            if self.buffer.len() <= MAX_POINTER_OFFSET
            {
                self.compression.insert(key, self.buffer.len());
            }

            let bytes = labels[i].as_bytes();
            if bytes.len() > MAX_LABEL_OCTETS
            {
                return Err(MdnsError::LabelTooLong);
            }

            self.buffer.push(bytes.len() as u8);
            self.buffer.extend_from_slice(bytes);
        }

        self.buffer.push(0x00);

        Ok(())
    }

    fn write_record(&mut self, record: &Record) -> Result<()>
    {
        self.write_name(&record.name)?;
        self.write_u16(record.record_type().code());

        let class = if record.cache_flush
        {
            record.class | CLASS_CACHE_FLUSH
        }
        else
        {
            record.class
        };
        self.write_u16(class);
        self.write_u32(record.ttl);

        // Length is filled in once the data is written.
        let len_offset = self.buffer.len();
        self.write_u16(0);

        match &record.data
        {
            RecordData::A(address) => self.buffer.extend_from_slice(&address.octets()),
            RecordData::AAAA(address) => self.buffer.extend_from_slice(&address.octets()),
            RecordData::PTR(target) => self.write_name(target)?,
            RecordData::SRV { priority, weight, port, target } =>
            {
                self.write_u16(*priority);
                self.write_u16(*weight);
                self.write_u16(*port);
                self.write_name(target)?;
            },
            RecordData::TXT(records) =>
            {
                if records.is_empty()
                {
                    self.buffer.push(0x00);
                }

                for txt in records
                {
                    if txt.len() > MAX_TXT_OCTETS
                    {
                        return Err(MdnsError::InvalidRecord);
                    }

                    self.buffer.push(txt.len() as u8);
                    self.buffer.extend_from_slice(txt.as_bytes());
                }
            }
        }

        let data_len = self.buffer.len() - len_offset - 2;
        if data_len > u16::MAX as usize
        {
            return Err(MdnsError::InvalidRecord);
        }

        self.buffer[len_offset..len_offset + 2].copy_from_slice(&(data_len as u16).to_be_bytes());

        Ok(())
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_label_to_string_1()
    {
        let packet: [u8; 17] =
        [
            0x04, 0x5f, 0x68, 0x61, 0x70, 0x04, 0x5f, 0x74, 0x63, 0x70, 0x05, 0x6c, 0x6f, 0x63,
            0x61, 0x6c, 0x00,
        ];

        let (label, offset) = label_to_string(&packet, 0).unwrap();

        assert_eq!(label, "_hap._tcp.local.");
        assert_eq!(offset, 17);
    }

    #[test]
    fn test_label_to_string_pointer()
    {
        let packet: [u8; 229] =
        [
            0x00, 0x00, 0x84, 0x00, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00, 0x04, 0x5f, 0x68, 0x61,
            0x70, 0x04, 0x5f, 0x74, 0x63, 0x70, 0x05, 0x6c, 0x6f, 0x63, 0x61, 0x6c, 0x00, 0x00, 0x0c, 0x00,
            0x01, 0x00, 0x00, 0x11, 0x94, 0x00, 0x0b, 0x08, 0x44, 0x49, 0x52, 0x49, 0x47, 0x45, 0x52, 0x41,
            0xc0, 0x0c, 0xc0, 0x27, 0x00, 0x10, 0x80, 0x01, 0x00, 0x00, 0x11, 0x94, 0x00, 0x66, 0x05, 0x63,
            0x23, 0x3d, 0x32, 0x32, 0x04, 0x66, 0x66, 0x3d, 0x31, 0x14, 0x69, 0x64, 0x3d, 0x42, 0x35, 0x3a,
            0x42, 0x30, 0x3a, 0x41, 0x30, 0x3a, 0x36, 0x37, 0x3a, 0x42, 0x34, 0x3a, 0x36, 0x39, 0x22, 0x6d,
            0x64, 0x3d, 0x44, 0x49, 0x52, 0x49, 0x47, 0x45, 0x52, 0x41, 0x20, 0x48, 0x75, 0x62, 0x20, 0x66,
            0x6f, 0x72, 0x20, 0x73, 0x6d, 0x61, 0x72, 0x74, 0x20, 0x70, 0x72, 0x6f, 0x64, 0x75, 0x63, 0x74,
            0x73, 0x06, 0x70, 0x76, 0x3d, 0x31, 0x2e, 0x31, 0x05, 0x73, 0x23, 0x3d, 0x32, 0x30, 0x04, 0x73,
            0x66, 0x3d, 0x30, 0x04, 0x63, 0x69, 0x3d, 0x32, 0x0b, 0x73, 0x68, 0x3d, 0x6b, 0x37, 0x50, 0x76,
            0x43, 0x67, 0x3d, 0x3d, 0xc0, 0x27, 0x00, 0x21, 0x80, 0x01, 0x00, 0x00, 0x00, 0x78, 0x00, 0x19,
            0x00, 0x00, 0x00, 0x00, 0x1f, 0x40, 0x10, 0x67, 0x77, 0x32, 0x2d, 0x38, 0x66, 0x66, 0x36, 0x65,
            0x64, 0x32, 0x31, 0x30, 0x61, 0x34, 0x38, 0xc0, 0x16, 0xc0, 0xb6, 0x00, 0x1c, 0x80, 0x01, 0x00,
            0x00, 0x00, 0x78, 0x00, 0x10, 0xfd, 0x05, 0x0b, 0x30, 0x32, 0x24, 0x4a, 0x5c, 0x6a, 0xec, 0x8a,
            0xff, 0xfe, 0x00, 0xd0, 0xed
        ];

        let (label, offset) = label_to_string(&packet, 39).unwrap();

        assert_eq!(label, "DIRIGERA._hap._tcp.local.");
        assert_eq!(offset, 50);
    }

    #[test]
    fn test_label_to_string_escapes_dots()
    {
        let packet: [u8; 17] =
        [
            0x0a, b'M', b'y', b'.', b'P', b'r', b'i', b'n', b't', b'e', b'r', 0x04, b'l', b'o', b'c', b'a', 0x00
        ];

        let (label, offset) = label_to_string(&packet, 0).unwrap();

        assert_eq!(label, "My\\.Printer.loca.");
        assert_eq!(offset, 17);
    }

    #[test]
    fn test_label_pointer_loop()
    {
        // Pointer at offset 2 pointing to itself is rejected as a forward pointer.
        let packet: [u8; 4] = [0x01, 0x61, 0xc0, 0x02];
        match label_to_string(&packet, 0)
        {
            Err(MdnsError::LabelPtrForward) => (),
            other => panic!("unexpected result: {:?}", other)
        }
    }

    #[test]
    fn test_label_out_of_bounds()
    {
        let packet: [u8; 3] = [0x05, 0x61, 0x62];
        assert!(label_to_string(&packet, 0).is_err());
    }

    #[test]
    fn test_header_to_bytes()
    {
        let header = DnsHeader
        {
            id: 0,
            flags: 0x0000,
            queries_len: 1,
            answers_len: 0,
            authorities_len: 0,
            additional_len: 0
        };

        let buffer = header.to_bytes();

        assert_eq!(buffer, vec![0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_header_too_short()
    {
        match Message::from(&[0x00, 0x00, 0x84])
        {
            Err(MdnsError::InvalidHeader) => (),
            other => panic!("unexpected result: {:?}", other)
        }
    }

    #[test]
    fn test_new_query()
    {
        let query = Message::new_query("_hap._tcp.local.", RecordType::PTR).to_bytes().unwrap();

        let expected: [u8; 33] =
        [
            0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x04, 0x5f, 0x68, 0x61, 0x70, 0x04, 0x5f, 0x74, 0x63, 0x70, 0x05, 0x6c,
            0x6f, 0x63, 0x61, 0x6c, 0x00, 0x00, 0x0c, 0x00, 0x01
        ];

        assert_eq!(query, expected.to_vec());
    }

    #[test]
    fn test_dns_response_from()
    {
        let packet: [u8; 221] = [ 0x00, 0x00, 0x84, 0x00, 0x00, 0x01, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00, 0x08, 0x44, 0x49, 0x52,
                                  0x49, 0x47, 0x45, 0x52, 0x41, 0x04, 0x5f, 0x68, 0x61, 0x70, 0x04, 0x5f, 0x74, 0x63, 0x70, 0x05,
                                  0x6c, 0x6f, 0x63, 0x61, 0x6c, 0x00, 0x00, 0xff, 0x80, 0x01, 0xc0, 0x0c, 0x00, 0x21, 0x00, 0x01,
                                  0x00, 0x00, 0x00, 0x0a, 0x00, 0x19, 0x00, 0x00, 0x00, 0x00, 0x1f, 0x40, 0x10, 0x67, 0x77, 0x32,
                                  0x2d, 0x38, 0x66, 0x66, 0x36, 0x65, 0x64, 0x32, 0x31, 0x30, 0x61, 0x34, 0x38, 0xc0, 0x1f, 0xc0,
                                  0x3c, 0x00, 0x1c, 0x00, 0x01, 0x00, 0x00, 0x00, 0x0a, 0x00, 0x10, 0xfd, 0x05, 0x0b, 0x30, 0x32,
                                  0x24, 0x4a, 0x5c, 0x6a, 0xec, 0x8a, 0xff, 0xfe, 0x00, 0xd0, 0xed, 0xc0, 0x0c, 0x00, 0x10, 0x00,
                                  0x01, 0x00, 0x00, 0x00, 0x0a, 0x00, 0x66, 0x05, 0x63, 0x23, 0x3d, 0x34, 0x30, 0x04, 0x66, 0x66,
                                  0x3d, 0x31, 0x14, 0x69, 0x64, 0x3d, 0x42, 0x35, 0x3a, 0x42, 0x30, 0x3a, 0x41, 0x30, 0x3a, 0x36,
                                  0x37, 0x3a, 0x42, 0x34, 0x3a, 0x36, 0x39, 0x22, 0x6d, 0x64, 0x3d, 0x44, 0x49, 0x52, 0x49, 0x47,
                                  0x45, 0x52, 0x41, 0x20, 0x48, 0x75, 0x62, 0x20, 0x66, 0x6f, 0x72, 0x20, 0x73, 0x6d, 0x61, 0x72,
                                  0x74, 0x20, 0x70, 0x72, 0x6f, 0x64, 0x75, 0x63, 0x74, 0x73, 0x06, 0x70, 0x76, 0x3d, 0x31, 0x2e,
                                  0x31, 0x05, 0x73, 0x23, 0x3d, 0x34, 0x37, 0x04, 0x73, 0x66, 0x3d, 0x30, 0x04, 0x63, 0x69, 0x3d,
                                  0x32, 0x0b, 0x73, 0x68, 0x3d, 0x6b, 0x37, 0x50, 0x76, 0x43, 0x67, 0x3d, 0x3d ];

        let message = Message::from(&packet).unwrap();

        assert!(message.is_response());
        assert!(message.is_authoritative());
        assert!(!message.is_truncated());
        assert_eq!(message.opcode(), 0);
        assert_eq!(message.rcode(), 0);

        assert_eq!(message.questions.len(), 1);
        assert_eq!(message.questions[0].name, "DIRIGERA._hap._tcp.local.");
        assert_eq!(message.questions[0].qtype, RecordType::ANY);
        assert!(message.questions[0].unicast_response());

        assert_eq!(message.answers.len(), 3);
        let mut matches = 0;
        for answer in &message.answers
        {
            assert_eq!(answer.ttl, 10);
            match &answer.data
            {
                RecordData::SRV { port, target, .. } =>
                {
                    assert_eq!(answer.name, "DIRIGERA._hap._tcp.local.");
                    assert_eq!(target, "gw2-8ff6ed210a48.local.");
                    assert_eq!(*port, 8000);
                    matches += 1;
                },
                RecordData::TXT(records) =>
                {
                    assert_eq!(answer.name, "DIRIGERA._hap._tcp.local.");
                    assert_eq!(records.len(), 9);
                    assert_eq!(records[0], "c#=40");
                    assert_eq!(records[2], "id=B5:B0:A0:67:B4:69");
                    assert_eq!(records[3], "md=DIRIGERA Hub for smart products");
                    assert_eq!(records[8], "sh=k7PvCg==");
                    matches += 1;
                },
                RecordData::AAAA(address) =>
                {
                    assert_eq!(answer.name, "gw2-8ff6ed210a48.local.");
                    assert_eq!(*address, Ipv6Addr::new(0xfd05, 0x0b30, 0x3224, 0x4a5c, 0x6aec, 0x8aff, 0xfe00, 0xd0ed));
                    matches += 1;
                },
                _ => ()
            }
        }
        assert_eq!(matches, 3);
    }

    #[test]
    fn test_response_encode_decode()
    {
        let mut response = Message::new_response();
        response.answers.push(Record::ptr("_gopi._tcp.local.", 120, "First._gopi._tcp.local."));
        response.additionals.push(Record::srv("First._gopi._tcp.local.", 120, 8080, "test1.local."));
        response.additionals.push(Record::txt("First._gopi._tcp.local.", 120, &[String::from("name=test1")]));
        response.additionals.push(Record::address("test1.local.", 120, IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))));

        let bytes = response.to_bytes().unwrap();
        let decoded = Message::from(&bytes).unwrap();

        assert_eq!(decoded, response);
    }

    #[test]
    fn test_compression_reuses_suffix()
    {
        let mut plain = Message::new_response();
        plain.answers.push(Record::ptr("_gopi._tcp.local.", 120, "First._gopi._tcp.local."));
        let bytes = plain.to_bytes().unwrap();

        // Header, owner name, fixed fields, then "First" plus a two byte pointer.
        assert_eq!(bytes.len(), 12 + 18 + 10 + 6 + 2);
        assert_eq!(&bytes[bytes.len() - 2..], &[0xc0, 0x0c]);
    }

    #[test]
    fn test_escaped_label_on_wire()
    {
        let mut message = Message::new_response();
        message.answers.push(Record::ptr("_gopi._tcp.local.", 0, "My\\.Printer._gopi._tcp.local."));
        let bytes = message.to_bytes().unwrap();

        let label: &[u8] = &[0x0a, b'M', b'y', b'.', b'P', b'r', b'i', b'n', b't', b'e', b'r'];
        assert!(bytes.windows(label.len()).any(|window| window == label));

        let decoded = Message::from(&bytes).unwrap();
        assert_eq!(decoded.answers[0].data, RecordData::PTR(String::from("My\\.Printer._gopi._tcp.local.")));
    }

    #[test]
    fn test_empty_txt()
    {
        let mut message = Message::new_response();
        message.answers.push(Record::txt("First._gopi._tcp.local.", 120, &[]));
        let bytes = message.to_bytes().unwrap();
        let decoded = Message::from(&bytes).unwrap();

        assert_eq!(decoded.answers[0].data, RecordData::TXT(Vec::new()));
    }

    #[test]
    fn test_txt_skips_strings_that_are_not_utf8()
    {
        let mut message = Message::new_response();
        message.answers.push(Record::txt("First._gopi._tcp.local.", 120, &[String::from("a=1"), String::from("zzz")]));
        let mut bytes = message.to_bytes().unwrap();

        let at = bytes.windows(3).position(|window| window == b"zzz").unwrap();
        bytes[at..at + 3].copy_from_slice(&[0xff, 0xfe, 0xfd]);

        let decoded = Message::from(&bytes).unwrap();
        assert_eq!(decoded.answers[0].data, RecordData::TXT(vec![String::from("a=1")]));
    }

    #[test]
    fn test_label_that_is_not_utf8()
    {
        let mut bytes = Message::new_query("zzz._gopi._tcp.local.", RecordType::PTR).to_bytes().unwrap();

        let at = bytes.windows(3).position(|window| window == b"zzz").unwrap();
        bytes[at + 1] = 0xff;

        let decoded = Message::from(&bytes).unwrap();
        assert_eq!(decoded.questions[0].name, "z\u{fffd}z._gopi._tcp.local.");
    }

    #[test]
    fn test_target_past_rdata()
    {
        let bytes: [u8; 42] = [
            0x00, 0x00, 0x84, 0x00, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00,
            // a. PTR, rdata holds a label but not the terminating zero
            0x01, 0x61, 0x00, 0x00, 0x0c, 0x00, 0x01, 0x00, 0x00, 0x00, 0x78, 0x00, 0x02, 0x01, 0x62,
            // . A 127.0.0.1
            0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x00, 0x78, 0x00, 0x04, 0x7f, 0x00, 0x00, 0x01
        ];

        match Message::from(&bytes)
        {
            Err(MdnsError::InvalidRecord) => (),
            other => panic!("unexpected result: {:?}", other)
        }
    }

    #[test]
    fn test_label_too_long()
    {
        let name = format!("{}.local.", "a".repeat(64));
        let message = Message::new_query(&name, RecordType::PTR);

        match message.to_bytes()
        {
            Err(MdnsError::LabelTooLong) => (),
            other => panic!("unexpected result: {:?}", other)
        }
    }

    #[test]
    fn test_flags()
    {
        let mut message = Message::new_query("_gopi._tcp.local.", RecordType::PTR);
        assert!(!message.is_response());

        message.flags |= FLAGS_TC;
        assert!(message.is_truncated());

        message.flags = (2 << FLAGS_OPCODE_SHIFT) | 3;
        assert_eq!(message.opcode(), 2);
        assert_eq!(message.rcode(), 3);
    }
}
