//! SNMP v2c wire transport
//!
//! A minimal BER codec for the five PDU types the monitor exchanges, plus a
//! shared-socket UDP backend.  One socket serves every session; responses are
//! routed back to their waiting request by request id.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::net::UdpSocket;
use tokio::sync::{oneshot, OnceCell};
use tokio::time::timeout;
use tracing::{debug, warn};

use super::{MibObject, Oid, SessionParams, SnmpBackend, SnmpError, SnmpResult, SnmpValue};

const SNMP_VERSION_2C: i64 = 1;
const MAX_DATAGRAM: usize = 65_535;

/// PDU types used by the monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PduType {
    GetRequest,
    GetNextRequest,
    Response,
    GetBulkRequest,
    TrapV2,
}

impl PduType {
    fn tag(self) -> u8 {
        match self {
            PduType::GetRequest => 0xA0,
            PduType::GetNextRequest => 0xA1,
            PduType::Response => 0xA2,
            PduType::GetBulkRequest => 0xA5,
            PduType::TrapV2 => 0xA7,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0xA0 => Some(PduType::GetRequest),
            0xA1 => Some(PduType::GetNextRequest),
            0xA2 => Some(PduType::Response),
            0xA5 => Some(PduType::GetBulkRequest),
            0xA7 => Some(PduType::TrapV2),
            _ => None,
        }
    }
}

/// A decoded SNMP message
#[derive(Debug, Clone)]
pub struct SnmpMessage {
    pub community: String,
    pub pdu_type: PduType,
    pub request_id: i64,
    pub error_status: i64,
    pub error_index: i64,
    pub varbinds: Vec<MibObject>,
}

// --- BER encoding ---

fn encode_length(length: usize, out: &mut Vec<u8>) {
    if length < 0x80 {
        out.push(length as u8);
    } else {
        let bytes = length.to_be_bytes();
        let skip = bytes.iter().take_while(|&&b| b == 0).count();
        out.push(0x80 | (bytes.len() - skip) as u8);
        out.extend_from_slice(&bytes[skip..]);
    }
}

fn encode_tlv(tag: u8, content: &[u8], out: &mut Vec<u8>) {
    out.push(tag);
    encode_length(content.len(), out);
    out.extend_from_slice(content);
}

fn encode_integer(value: i64, out: &mut Vec<u8>) {
    let bytes = value.to_be_bytes();
    let mut start = 0;
    // Trim redundant leading bytes while keeping the sign bit intact
    while start < 7 {
        let first = bytes[start];
        let next_msb = bytes[start + 1] & 0x80;
        if (first == 0x00 && next_msb == 0) || (first == 0xFF && next_msb != 0) {
            start += 1;
        } else {
            break;
        }
    }
    encode_tlv(0x02, &bytes[start..], out);
}

fn encode_octet_string(value: &[u8], out: &mut Vec<u8>) {
    encode_tlv(0x04, value, out);
}

fn encode_null(out: &mut Vec<u8>) {
    encode_tlv(0x05, &[], out);
}

fn encode_oid(oid: &Oid, out: &mut Vec<u8>) {
    let mut content = Vec::with_capacity(oid.len() + 4);
    let components = &oid.0;
    if components.len() >= 2 {
        content.push((components[0] * 40 + components[1]) as u8);
        for &component in &components[2..] {
            encode_subidentifier(component, &mut content);
        }
    } else if components.len() == 1 {
        content.push((components[0] * 40) as u8);
    } else {
        content.push(0);
    }
    encode_tlv(0x06, &content, out);
}

fn encode_subidentifier(value: u32, out: &mut Vec<u8>) {
    let mut chunks = [0u8; 5];
    let mut count = 0;
    let mut remaining = value;
    loop {
        chunks[count] = (remaining & 0x7F) as u8;
        count += 1;
        remaining >>= 7;
        if remaining == 0 {
            break;
        }
    }
    for i in (0..count).rev() {
        let continuation = if i == 0 { 0 } else { 0x80 };
        out.push(chunks[i] | continuation);
    }
}

fn encode_unsigned(tag: u8, value: u64, out: &mut Vec<u8>) {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count().min(7);
    let mut content = Vec::with_capacity(9);
    // A leading zero byte keeps large values from reading as negative
    if bytes[skip] & 0x80 != 0 {
        content.push(0);
    }
    content.extend_from_slice(&bytes[skip..]);
    encode_tlv(tag, &content, out);
}

fn encode_value(value: &SnmpValue, out: &mut Vec<u8>) {
    match value {
        SnmpValue::Integer(value) => encode_integer(*value, out),
        SnmpValue::OctetString(bytes) => encode_octet_string(bytes, out),
        SnmpValue::Null => encode_null(out),
        SnmpValue::ObjectId(oid) => encode_oid(oid, out),
        SnmpValue::IpAddress(addr) => encode_tlv(0x40, &addr.octets(), out),
        SnmpValue::Counter32(value) => encode_unsigned(0x41, *value as u64, out),
        SnmpValue::Gauge32(value) => encode_unsigned(0x42, *value as u64, out),
        SnmpValue::TimeTicks(value) => encode_unsigned(0x43, *value as u64, out),
        SnmpValue::Opaque(bytes) => encode_tlv(0x44, bytes, out),
        SnmpValue::Counter64(value) => encode_unsigned(0x46, *value, out),
        SnmpValue::NoSuchObject => encode_tlv(0x80, &[], out),
        SnmpValue::NoSuchInstance => encode_tlv(0x81, &[], out),
        SnmpValue::EndOfMibView => encode_tlv(0x82, &[], out),
    }
}

/// Encodes a complete SNMP v2c message with value-carrying varbinds.  This
/// covers responses and traps; requests go through [`encode_request`].
pub fn encode_message(
    community: &str,
    pdu_type: PduType,
    request_id: i64,
    varbinds: &[MibObject],
    error_status: i64,
    error_index: i64,
) -> Vec<u8> {
    let mut bindings = Vec::new();
    for varbind in varbinds {
        let mut binding = Vec::new();
        encode_oid(&varbind.oid, &mut binding);
        encode_value(&varbind.value, &mut binding);
        encode_tlv(0x30, &binding, &mut bindings);
    }
    let mut binding_list = Vec::new();
    encode_tlv(0x30, &bindings, &mut binding_list);

    let mut pdu = Vec::new();
    encode_integer(request_id, &mut pdu);
    encode_integer(error_status, &mut pdu);
    encode_integer(error_index, &mut pdu);
    pdu.extend_from_slice(&binding_list);

    let mut body = Vec::new();
    encode_integer(SNMP_VERSION_2C, &mut body);
    encode_octet_string(community.as_bytes(), &mut body);
    encode_tlv(pdu_type.tag(), &pdu, &mut body);

    let mut message = Vec::new();
    encode_tlv(0x30, &body, &mut message);
    message
}

/// Encodes a request PDU.  For GET-BULK the two PDU integers carry
/// non-repeaters and max-repetitions instead of an error status and index.
pub fn encode_request(
    community: &str,
    pdu_type: PduType,
    request_id: i64,
    oids: &[Oid],
    error_status: i64,
    error_index: i64,
) -> Vec<u8> {
    let varbinds: Vec<MibObject> = oids
        .iter()
        .map(|oid| MibObject {
            oid: oid.clone(),
            value: SnmpValue::Null,
        })
        .collect();
    encode_message(community, pdu_type, request_id, &varbinds, error_status, error_index)
}

// --- BER decoding ---

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn has_more(&self) -> bool {
        self.pos < self.data.len()
    }

    fn read_byte(&mut self) -> SnmpResult<u8> {
        let byte = *self
            .data
            .get(self.pos)
            .ok_or_else(|| malformed("unexpected end of message"))?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_tlv(&mut self) -> SnmpResult<(u8, &'a [u8])> {
        let tag = self.read_byte()?;
        let first = self.read_byte()?;
        let length = if first < 0x80 {
            first as usize
        } else {
            let count = (first & 0x7F) as usize;
            if count == 0 || count > 4 {
                return Err(malformed("unsupported BER length"));
            }
            let mut length = 0usize;
            for _ in 0..count {
                length = (length << 8) | self.read_byte()? as usize;
            }
            length
        };
        let end = self
            .pos
            .checked_add(length)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| malformed("BER length overruns message"))?;
        let content = &self.data[self.pos..end];
        self.pos = end;
        Ok((tag, content))
    }
}

fn malformed(reason: &str) -> SnmpError {
    SnmpError::Backend(format!("malformed SNMP message: {}", reason))
}

fn parse_integer(content: &[u8]) -> SnmpResult<i64> {
    if content.is_empty() || content.len() > 8 {
        return Err(malformed("bad INTEGER length"));
    }
    let mut value: i64 = if content[0] & 0x80 != 0 { -1 } else { 0 };
    for &byte in content {
        value = (value << 8) | byte as i64;
    }
    Ok(value)
}

fn parse_unsigned(content: &[u8]) -> SnmpResult<u64> {
    let trimmed = if content.first() == Some(&0) {
        &content[1..]
    } else {
        content
    };
    if trimmed.len() > 8 {
        return Err(malformed("bad unsigned length"));
    }
    let mut value: u64 = 0;
    for &byte in trimmed {
        value = (value << 8) | byte as u64;
    }
    Ok(value)
}

fn parse_oid(content: &[u8]) -> SnmpResult<Oid> {
    if content.is_empty() {
        return Err(malformed("empty OID"));
    }
    let mut components = vec![(content[0] / 40) as u32, (content[0] % 40) as u32];
    let mut current: u32 = 0;
    for &byte in &content[1..] {
        current = current
            .checked_shl(7)
            .ok_or_else(|| malformed("OID subidentifier overflow"))?
            | (byte & 0x7F) as u32;
        if byte & 0x80 == 0 {
            components.push(current);
            current = 0;
        }
    }
    Ok(Oid(components))
}

fn parse_value(tag: u8, content: &[u8]) -> SnmpResult<SnmpValue> {
    let value = match tag {
        0x02 => SnmpValue::Integer(parse_integer(content)?),
        0x04 => SnmpValue::OctetString(content.to_vec()),
        0x05 => SnmpValue::Null,
        0x06 => SnmpValue::ObjectId(parse_oid(content)?),
        0x40 => {
            let octets: [u8; 4] = content
                .try_into()
                .map_err(|_| malformed("bad IpAddress length"))?;
            SnmpValue::IpAddress(octets.into())
        }
        0x41 => SnmpValue::Counter32(parse_unsigned(content)? as u32),
        0x42 => SnmpValue::Gauge32(parse_unsigned(content)? as u32),
        0x43 => SnmpValue::TimeTicks(parse_unsigned(content)? as u32),
        0x44 => SnmpValue::Opaque(content.to_vec()),
        0x46 => SnmpValue::Counter64(parse_unsigned(content)?),
        0x80 => SnmpValue::NoSuchObject,
        0x81 => SnmpValue::NoSuchInstance,
        0x82 => SnmpValue::EndOfMibView,
        other => return Err(malformed(&format!("unknown value tag {:#04x}", other))),
    };
    Ok(value)
}

/// Decodes a complete SNMP v2c message
pub fn decode_message(data: &[u8]) -> SnmpResult<SnmpMessage> {
    let mut outer = Reader::new(data);
    let (tag, body) = outer.read_tlv()?;
    if tag != 0x30 {
        return Err(malformed("message is not a SEQUENCE"));
    }

    let mut reader = Reader::new(body);
    let (tag, version) = reader.read_tlv()?;
    if tag != 0x02 || parse_integer(version)? != SNMP_VERSION_2C {
        return Err(malformed("unsupported SNMP version"));
    }
    let (tag, community) = reader.read_tlv()?;
    if tag != 0x04 {
        return Err(malformed("missing community string"));
    }
    let community = String::from_utf8_lossy(community).into_owned();

    let (tag, pdu) = reader.read_tlv()?;
    let pdu_type =
        PduType::from_tag(tag).ok_or_else(|| malformed(&format!("unknown PDU tag {:#04x}", tag)))?;

    let mut reader = Reader::new(pdu);
    let (_, request_id) = reader.read_tlv()?;
    let request_id = parse_integer(request_id)?;
    let (_, error_status) = reader.read_tlv()?;
    let error_status = parse_integer(error_status)?;
    let (_, error_index) = reader.read_tlv()?;
    let error_index = parse_integer(error_index)?;

    let (tag, binding_list) = reader.read_tlv()?;
    if tag != 0x30 {
        return Err(malformed("varbind list is not a SEQUENCE"));
    }
    let mut varbinds = Vec::new();
    let mut bindings = Reader::new(binding_list);
    while bindings.has_more() {
        let (tag, binding) = bindings.read_tlv()?;
        if tag != 0x30 {
            return Err(malformed("varbind is not a SEQUENCE"));
        }
        let mut reader = Reader::new(binding);
        let (tag, oid) = reader.read_tlv()?;
        if tag != 0x06 {
            return Err(malformed("varbind name is not an OID"));
        }
        let (value_tag, value) = reader.read_tlv()?;
        varbinds.push(MibObject {
            oid: parse_oid(oid)?,
            value: parse_value(value_tag, value)?,
        });
    }

    Ok(SnmpMessage {
        community,
        pdu_type,
        request_id,
        error_status,
        error_index,
        varbinds,
    })
}

// --- UDP backend ---

/// SNMP v2c over UDP, with a single shared socket for all sessions
pub struct UdpBackend {
    socket: OnceCell<Arc<UdpSocket>>,
    pending: Arc<DashMap<i64, oneshot::Sender<SnmpMessage>>>,
    next_request_id: AtomicI64,
}

impl UdpBackend {
    pub fn new() -> Self {
        Self {
            socket: OnceCell::new(),
            pending: Arc::new(DashMap::new()),
            next_request_id: AtomicI64::new(rand::random::<u16>() as i64 + 1),
        }
    }

    async fn socket(&self) -> SnmpResult<Arc<UdpSocket>> {
        let socket = self
            .socket
            .get_or_try_init(|| async {
                let socket = UdpSocket::bind(("0.0.0.0", 0))
                    .await
                    .map_err(|e| SnmpError::Backend(format!("failed to bind SNMP socket: {}", e)))?;
                let socket = Arc::new(socket);
                tokio::spawn(receive_loop(socket.clone(), self.pending.clone()));
                Ok::<_, SnmpError>(socket)
            })
            .await?;
        Ok(socket.clone())
    }

    async fn request(
        &self,
        session: &SessionParams,
        pdu_type: PduType,
        oids: &[Oid],
        error_status: i64,
        error_index: i64,
    ) -> SnmpResult<Vec<MibObject>> {
        let socket = self.socket().await?;
        let target = (session.address, session.port);

        for _attempt in 0..=session.retries {
            let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed) & 0x7FFF_FFFF;
            let packet =
                encode_request(&session.community, pdu_type, request_id, oids, error_status, error_index);
            let (tx, rx) = oneshot::channel();
            self.pending.insert(request_id, tx);

            if let Err(error) = socket.send_to(&packet, target).await {
                self.pending.remove(&request_id);
                return Err(SnmpError::Backend(format!("send failed: {}", error)));
            }

            match timeout(session.timeout, rx).await {
                Ok(Ok(response)) => {
                    return check_response(response);
                }
                _ => {
                    self.pending.remove(&request_id);
                    debug!("SNMP request to {} timed out, retrying", session.address);
                }
            }
        }
        Err(SnmpError::Timeout)
    }
}

impl Default for UdpBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn check_response(response: SnmpMessage) -> SnmpResult<Vec<MibObject>> {
    match response.error_status {
        0 => Ok(response.varbinds),
        // noSuchName: v1-style row miss
        2 => Err(SnmpError::NoSuchInstance),
        status => Err(SnmpError::Backend(format!(
            "agent reported error status {} at index {}",
            status, response.error_index
        ))),
    }
}

async fn receive_loop(socket: Arc<UdpSocket>, pending: Arc<DashMap<i64, oneshot::Sender<SnmpMessage>>>) {
    let mut buffer = vec![0u8; MAX_DATAGRAM];
    loop {
        let (length, sender) = match socket.recv_from(&mut buffer).await {
            Ok(received) => received,
            Err(error) => {
                warn!("SNMP receive failed: {}", error);
                continue;
            }
        };
        let message = match decode_message(&buffer[..length]) {
            Ok(message) => message,
            Err(error) => {
                debug!("dropping garbage datagram from {}: {}", sender, error);
                continue;
            }
        };
        if message.pdu_type != PduType::Response {
            continue;
        }
        if let Some((_, tx)) = pending.remove(&message.request_id) {
            let _ = tx.send(message);
        } else {
            debug!("unmatched SNMP response from {} dropped", sender);
        }
    }
}

#[async_trait]
impl SnmpBackend for UdpBackend {
    async fn get(&self, session: &SessionParams, oids: &[Oid]) -> SnmpResult<Vec<MibObject>> {
        self.request(session, PduType::GetRequest, oids, 0, 0).await
    }

    async fn get_next(&self, session: &SessionParams, oids: &[Oid]) -> SnmpResult<Vec<MibObject>> {
        self.request(session, PduType::GetNextRequest, oids, 0, 0).await
    }

    async fn get_bulk(
        &self,
        session: &SessionParams,
        oids: &[Oid],
        max_repetitions: u32,
    ) -> SnmpResult<Vec<MibObject>> {
        self.request(
            session,
            PduType::GetBulkRequest,
            oids,
            0,
            max_repetitions as i64,
        )
        .await
    }
}
