//! DNS message parsing and construction.

use crate::error::ParseError;

const HEADER_LEN: usize = 12;
const MAX_LABEL_LEN: usize = 63;
const MAX_NAME_LEN: usize = 253;

/// The query a packet carries, as seen by the DNS rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsModel {
    pub id: u16,
    /// Lowercased name of the first question, without trailing dot.
    pub domain: String,
    pub qtype: u16,
    pub qclass: u16,
}

/// Parse the first question of a DNS message.
pub fn parse_dns_query(data: &[u8]) -> Result<DnsModel, ParseError> {
    if data.len() < HEADER_LEN + 1 {
        return Err(ParseError::Truncated("dns header"));
    }
    let qdcount = u16::from_be_bytes([data[4], data[5]]);
    if qdcount == 0 {
        return Err(ParseError::Invalid("dns message without question"));
    }

    let id = u16::from_be_bytes([data[0], data[1]]);

    let mut pos = HEADER_LEN;
    let mut domain = String::new();

    loop {
        let Some(&label_len) = data.get(pos) else {
            return Err(ParseError::Truncated("dns qname"));
        };
        pos += 1;
        if label_len == 0 {
            break;
        }
        // Compression pointers and extended label types never start a query name.
        if label_len as usize > MAX_LABEL_LEN {
            return Err(ParseError::Invalid("dns label length"));
        }
        let end = pos + label_len as usize;
        let Some(label) = data.get(pos..end) else {
            return Err(ParseError::Truncated("dns label"));
        };
        let label = std::str::from_utf8(label).map_err(|_| ParseError::Invalid("dns label"))?;
        if !domain.is_empty() {
            domain.push('.');
        }
        domain.push_str(label);
        if domain.len() > MAX_NAME_LEN {
            return Err(ParseError::Invalid("dns name length"));
        }
        pos = end;
    }

    if domain.is_empty() {
        return Err(ParseError::Invalid("dns root query"));
    }

    let Some(tail) = data.get(pos..pos + 4) else {
        return Err(ParseError::Truncated("dns qtype/qclass"));
    };

    domain.make_ascii_lowercase();
    Ok(DnsModel {
        id,
        domain,
        qtype: u16::from_be_bytes([tail[0], tail[1]]),
        qclass: u16::from_be_bytes([tail[2], tail[3]]),
    })
}

impl DnsModel {
    /// Create a blocked response (returns 0.0.0.0).
    pub fn blocked_response(&self) -> DnsResponse {
        DnsResponse::blocked(self)
    }
}

/// A DNS response.
#[derive(Debug, Clone)]
pub struct DnsResponse {
    pub id: u16,
    pub flags: u16,
    pub questions: Vec<DnsQuestion>,
    pub answers: Vec<DnsRecord>,
}

/// A DNS question section entry.
#[derive(Debug, Clone)]
pub struct DnsQuestion {
    pub domain: String,
    pub qtype: u16,
    pub qclass: u16,
}

/// A DNS resource record.
#[derive(Debug, Clone)]
pub struct DnsRecord {
    pub name: String,
    pub rtype: u16,
    pub class: u16,
    pub ttl: u32,
    pub rdata: Vec<u8>,
}

const TYPE_A: u16 = 1;
const CLASS_IN: u16 = 1;

impl DnsResponse {
    /// Create a blocked response for a query.
    ///
    /// A queries get a `0.0.0.0` answer; any other type gets an empty answer
    /// section so the client stops waiting.
    pub fn blocked(query: &DnsModel) -> Self {
        let answers = if query.qtype == TYPE_A {
            vec![DnsRecord {
                name: query.domain.clone(),
                rtype: TYPE_A,
                class: CLASS_IN,
                ttl: 300,
                rdata: vec![0, 0, 0, 0],
            }]
        } else {
            Vec::new()
        };

        Self {
            id: query.id,
            flags: 0x8180, // Standard response, recursion available, no error
            questions: vec![DnsQuestion {
                domain: query.domain.clone(),
                qtype: query.qtype,
                qclass: query.qclass,
            }],
            answers,
        }
    }

    /// Encode the response to wire format bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(512);

        // Header
        data.extend_from_slice(&self.id.to_be_bytes());
        data.extend_from_slice(&self.flags.to_be_bytes());
        data.extend_from_slice(&(self.questions.len() as u16).to_be_bytes());
        data.extend_from_slice(&(self.answers.len() as u16).to_be_bytes());
        data.extend_from_slice(&[0x00, 0x00]); // NSCOUNT
        data.extend_from_slice(&[0x00, 0x00]); // ARCOUNT

        for q in &self.questions {
            Self::encode_domain(&mut data, &q.domain);
            data.extend_from_slice(&q.qtype.to_be_bytes());
            data.extend_from_slice(&q.qclass.to_be_bytes());
        }

        for a in &self.answers {
            // Use compression pointer if this is the first question's domain
            if !self.questions.is_empty() && a.name == self.questions[0].domain {
                data.extend_from_slice(&[0xC0, 0x0C]); // Pointer to offset 12
            } else {
                Self::encode_domain(&mut data, &a.name);
            }
            data.extend_from_slice(&a.rtype.to_be_bytes());
            data.extend_from_slice(&a.class.to_be_bytes());
            data.extend_from_slice(&a.ttl.to_be_bytes());
            data.extend_from_slice(&(a.rdata.len() as u16).to_be_bytes());
            data.extend_from_slice(&a.rdata);
        }

        data
    }

    fn encode_domain(buf: &mut Vec<u8>, domain: &str) {
        for label in domain.split('.') {
            buf.push(label.len() as u8);
            buf.extend_from_slice(label.as_bytes());
        }
        buf.push(0);
    }
}

#[cfg(test)]
pub(crate) fn build_query(id: u16, domain: &str, qtype: u16) -> Vec<u8> {
    let mut query = Vec::new();
    query.extend_from_slice(&id.to_be_bytes());
    query.extend_from_slice(&[0x01, 0x00]); // Flags: standard query
    query.extend_from_slice(&[0x00, 0x01]); // Questions: 1
    query.extend_from_slice(&[0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
    DnsResponse::encode_domain(&mut query, domain);
    query.extend_from_slice(&qtype.to_be_bytes());
    query.extend_from_slice(&CLASS_IN.to_be_bytes());
    query
}
