//! SNMP client abstraction
//!
//! Provides the per-device management session used by all polling tasks:
//! `get`, `get_many`, `get_next`, `walk`, `bulk_walk` and `sparse_walk`,
//! working on symbolic MIB names.  The wire protocol itself lives behind the
//! [`SnmpBackend`] trait; the bundled backend speaks SNMP v2c over UDP.

pub mod mib;
pub mod mock;
pub mod transport;

use std::collections::{BTreeMap, HashMap};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::polldevs::PollDevice;

/// Result type for SNMP operations
pub type SnmpResult<T> = Result<T, SnmpError>;

/// Classified SNMP failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SnmpError {
    /// No response within the configured timeout, after all retries
    #[error("timed out waiting for SNMP response")]
    Timeout,

    /// The agent has no definition for the requested OID
    #[error("no such object")]
    NoSuchObject,

    /// The requested table row does not exist
    #[error("no such instance")]
    NoSuchInstance,

    /// A walk ran off the end of the agent's MIB view
    #[error("end of MIB view")]
    EndOfMibView,

    /// Local symbolic lookup failed
    #[error("MIB object not found: {0}")]
    MibNotFound(String),

    /// Transport or agent-reported error
    #[error("SNMP backend error: {0}")]
    Backend(String),
}

/// Object identifier in component form
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Oid(pub Vec<u32>);

impl Oid {
    pub fn new(components: Vec<u32>) -> Self {
        Self(components)
    }

    /// Parses a dotted OID string, with or without a leading dot
    pub fn parse(text: &str) -> SnmpResult<Self> {
        let components: Result<Vec<u32>, _> = text
            .split('.')
            .filter(|part| !part.is_empty())
            .map(str::parse)
            .collect();
        components
            .map(Self)
            .map_err(|_| SnmpError::Backend(format!("invalid OID: {}", text)))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns a new OID with `component` appended
    pub fn child(&self, component: u32) -> Self {
        let mut components = self.0.clone();
        components.push(component);
        Self(components)
    }

    /// Returns a new OID with all of `suffix` appended
    pub fn extend(&self, suffix: &Oid) -> Self {
        let mut components = self.0.clone();
        components.extend_from_slice(&suffix.0);
        Self(components)
    }

    /// Returns true if this OID is a strict prefix of `other`
    pub fn is_prefix_of(&self, other: &Oid) -> bool {
        other.0.len() > self.0.len() && other.0[..self.0.len()] == self.0[..]
    }

    /// Returns this OID with `prefix` removed, or None if `prefix` is not a
    /// strict prefix of it
    pub fn strip_prefix(&self, prefix: &Oid) -> Option<Oid> {
        if prefix.is_prefix_of(self) {
            Some(Oid(self.0[prefix.0.len()..].to_vec()))
        } else {
            None
        }
    }
}

impl std::fmt::Display for Oid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for component in &self.0 {
            write!(f, ".{}", component)?;
        }
        Ok(())
    }
}

impl From<&[u32]> for Oid {
    fn from(components: &[u32]) -> Self {
        Self(components.to_vec())
    }
}

/// A typed SNMP value, including the v2c exception markers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SnmpValue {
    Integer(i64),
    OctetString(Vec<u8>),
    Null,
    ObjectId(Oid),
    IpAddress(Ipv4Addr),
    Counter32(u32),
    Gauge32(u32),
    TimeTicks(u32),
    Opaque(Vec<u8>),
    Counter64(u64),
    NoSuchObject,
    NoSuchInstance,
    EndOfMibView,
}

impl SnmpValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SnmpValue::Integer(value) => Some(*value),
            SnmpValue::Counter32(value) | SnmpValue::Gauge32(value) | SnmpValue::TimeTicks(value) => {
                Some(*value as i64)
            }
            SnmpValue::Counter64(value) => i64::try_from(*value).ok(),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        self.as_i64().and_then(|value| u32::try_from(value).ok())
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            SnmpValue::Counter64(value) => Some(*value),
            _ => self.as_i64().and_then(|value| u64::try_from(value).ok()),
        }
    }

    /// Octet string contents decoded as UTF-8, lossily
    pub fn as_text(&self) -> Option<String> {
        match self {
            SnmpValue::OctetString(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
            _ => None,
        }
    }

    pub fn as_oid(&self) -> Option<&Oid> {
        match self {
            SnmpValue::ObjectId(oid) => Some(oid),
            _ => None,
        }
    }

    /// Interprets the value as an IP address.  Handles both the IpAddress
    /// type and 4/16-byte octet strings, which the BGP and BFD MIBs use.
    pub fn as_ip(&self) -> Option<IpAddr> {
        match self {
            SnmpValue::IpAddress(addr) => Some(IpAddr::V4(*addr)),
            SnmpValue::OctetString(bytes) => match bytes.len() {
                4 => {
                    let octets: [u8; 4] = bytes.as_slice().try_into().ok()?;
                    Some(IpAddr::V4(octets.into()))
                }
                16 => {
                    let octets: [u8; 16] = bytes.as_slice().try_into().ok()?;
                    Some(IpAddr::V6(octets.into()))
                }
                _ => None,
            },
            _ => None,
        }
    }

    /// Returns the classified error for exception markers, if this is one
    fn exception(&self) -> Option<SnmpError> {
        match self {
            SnmpValue::NoSuchObject => Some(SnmpError::NoSuchObject),
            SnmpValue::NoSuchInstance => Some(SnmpError::NoSuchInstance),
            SnmpValue::EndOfMibView => Some(SnmpError::EndOfMibView),
            _ => None,
        }
    }
}

/// A single variable binding: an OID and its value
#[derive(Debug, Clone, PartialEq)]
pub struct MibObject {
    pub oid: Oid,
    pub value: SnmpValue,
}

/// Identifies a MIB object symbolically by MIB, object name and row index
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier {
    pub mib: String,
    pub object: String,
    pub index: Option<Oid>,
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}::{}", self.mib, self.object)?;
        if let Some(index) = &self.index {
            write!(f, "{}", index)?;
        }
        Ok(())
    }
}

/// Rows returned by a sparse walk: row index mapped to column name and value
pub type SparseWalkResponse = BTreeMap<Oid, HashMap<String, SnmpValue>>;

/// Transport parameters for one management session
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionParams {
    pub address: IpAddr,
    pub port: u16,
    pub community: String,
    pub timeout: Duration,
    pub retries: u32,
}

impl SessionParams {
    pub fn from_device(device: &PollDevice) -> Self {
        Self {
            address: device.address,
            port: device.port,
            community: device.community.clone(),
            timeout: Duration::from_secs(device.timeout),
            retries: device.retries,
        }
    }
}

/// The wire-level contract all SNMP back-ends implement.  Requests carry raw
/// OIDs; symbolic resolution happens in [`SnmpClient`].
#[async_trait]
pub trait SnmpBackend: Send + Sync {
    /// SNMP GET for one or more OIDs
    async fn get(&self, session: &SessionParams, oids: &[Oid]) -> SnmpResult<Vec<MibObject>>;

    /// SNMP GET-NEXT for one or more OIDs
    async fn get_next(&self, session: &SessionParams, oids: &[Oid]) -> SnmpResult<Vec<MibObject>>;

    /// SNMP GET-BULK.  The response is the flat varbind list from the agent,
    /// in repetition-major order (one round of all requested columns, then
    /// the next round, and so on).
    async fn get_bulk(
        &self,
        session: &SessionParams,
        oids: &[Oid],
        max_repetitions: u32,
    ) -> SnmpResult<Vec<MibObject>>;
}

/// Default max-repetitions for GET-BULK based walks
pub const DEFAULT_MAX_REPETITIONS: u32 = 10;

/// An SNMP management session for a single device
#[derive(Clone)]
pub struct SnmpClient {
    session: SessionParams,
    max_repetitions: u32,
    backend: Arc<dyn SnmpBackend>,
}

impl SnmpClient {
    pub fn new(device: &PollDevice, backend: Arc<dyn SnmpBackend>) -> Self {
        Self {
            session: SessionParams::from_device(device),
            max_repetitions: device.max_repetitions.unwrap_or(DEFAULT_MAX_REPETITIONS),
            backend,
        }
    }

    pub fn session(&self) -> &SessionParams {
        &self.session
    }

    /// SNMP-GETs a single object, optionally a specific row instance
    pub async fn get(&self, mib: &str, object: &str, index: Option<u32>) -> SnmpResult<MibObject> {
        let mut oid = mib::resolve_symbol(mib, object)?;
        if let Some(index) = index {
            oid = oid.child(index);
        }
        let mut response = self.backend.get(&self.session, &[oid]).await?;
        let object = response
            .pop()
            .ok_or_else(|| SnmpError::Backend("empty GET response".to_string()))?;
        if let Some(error) = object.value.exception() {
            return Err(error);
        }
        Ok(object)
    }

    /// SNMP-GETs several objects in a single request, returning symbolically
    /// resolved varbinds.  Exception values are passed through untouched so
    /// the caller can proceed with partial data.
    pub async fn get_many(
        &self,
        items: &[(&str, &str, u32)],
    ) -> SnmpResult<Vec<(Identifier, SnmpValue)>> {
        let mut oids = Vec::with_capacity(items.len());
        for (mib, object, index) in items {
            oids.push(mib::resolve_symbol(mib, object)?.child(*index));
        }
        let response = self.backend.get(&self.session, &oids).await?;
        let mut result = Vec::with_capacity(response.len());
        for object in response {
            let identifier = mib::resolve_oid(&object.oid)
                .ok_or_else(|| SnmpError::MibNotFound(object.oid.to_string()))?;
            result.push((identifier, object.value));
        }
        Ok(result)
    }

    /// SNMP-GETNEXTs the given object
    pub async fn get_next(&self, mib: &str, object: &str) -> SnmpResult<MibObject> {
        let oid = mib::resolve_symbol(mib, object)?;
        let mut response = self.backend.get_next(&self.session, &[oid]).await?;
        let object = response
            .pop()
            .ok_or_else(|| SnmpError::Backend("empty GETNEXT response".to_string()))?;
        if let Some(error) = object.value.exception() {
            return Err(error);
        }
        Ok(object)
    }

    /// Retrieves the whole subtree under the object using GET-NEXT requests
    pub async fn walk(&self, mib: &str, object: &str) -> SnmpResult<Vec<MibObject>> {
        let root = mib::resolve_symbol(mib, object)?;
        let mut current = root.clone();
        let mut results = Vec::new();
        loop {
            let mut response = self.backend.get_next(&self.session, &[current.clone()]).await?;
            let object = match response.pop() {
                Some(object) => object,
                None => break,
            };
            if object.value.exception().is_some() || !root.is_prefix_of(&object.oid) {
                break;
            }
            current = object.oid.clone();
            results.push(object);
        }
        Ok(results)
    }

    /// Retrieves the whole subtree under the object using GET-BULK requests
    pub async fn bulk_walk(&self, mib: &str, object: &str) -> SnmpResult<Vec<MibObject>> {
        let root = mib::resolve_symbol(mib, object)?;
        let mut current = root.clone();
        let mut results = Vec::new();
        'outer: loop {
            let response = self
                .backend
                .get_bulk(&self.session, &[current.clone()], self.max_repetitions)
                .await?;
            if response.is_empty() {
                break;
            }
            for object in response {
                if object.value.exception().is_some() || !root.is_prefix_of(&object.oid) {
                    break 'outer;
                }
                current = object.oid.clone();
                results.push(object);
            }
        }
        Ok(results)
    }

    /// Walks several table columns in lock step with repeated GET-BULKs,
    /// producing one map of column values per encountered row index.  Each
    /// column terminates independently when it leaves its subtree or hits
    /// end-of-MIB-view; rows missing from a column are simply absent.
    pub async fn sparse_walk(&self, columns: &[(&str, &str)]) -> SnmpResult<SparseWalkResponse> {
        struct Column {
            name: String,
            root: Oid,
            current: Oid,
        }

        let mut active: Vec<Column> = Vec::with_capacity(columns.len());
        for (mib, object) in columns {
            let root = mib::resolve_symbol(mib, object)?;
            active.push(Column {
                name: (*object).to_string(),
                root: root.clone(),
                current: root,
            });
        }

        let mut rows: SparseWalkResponse = BTreeMap::new();
        while !active.is_empty() {
            let oids: Vec<Oid> = active.iter().map(|column| column.current.clone()).collect();
            let response = self
                .backend
                .get_bulk(&self.session, &oids, self.max_repetitions)
                .await?;
            if response.is_empty() {
                break;
            }

            let width = active.len();
            let mut finished = vec![false; width];
            for (position, object) in response.into_iter().enumerate() {
                let slot = position % width;
                if finished[slot] {
                    continue;
                }
                let column = &mut active[slot];
                if object.value.exception().is_some() || !column.root.is_prefix_of(&object.oid) {
                    finished[slot] = true;
                    continue;
                }
                let index = object
                    .oid
                    .strip_prefix(&column.root)
                    .unwrap_or_else(|| object.oid.clone());
                rows.entry(index)
                    .or_default()
                    .insert(column.name.clone(), object.value);
                column.current = object.oid;
            }

            let mut slot = 0;
            active.retain(|_| {
                let keep = !finished[slot];
                slot += 1;
                keep
            });
        }
        Ok(rows)
    }

    /// Probes whether the agent exposes anything under the given subtree
    pub async fn subtree_is_supported(&self, mib: &str, object: &str) -> SnmpResult<bool> {
        let root = mib::resolve_symbol(mib, object)?;
        match self.backend.get_next(&self.session, &[root.clone()]).await {
            Ok(response) => Ok(response
                .first()
                .map(|object| object.value.exception().is_none() && root.is_prefix_of(&object.oid))
                .unwrap_or(false)),
            Err(SnmpError::EndOfMibView) | Err(SnmpError::NoSuchObject) => Ok(false),
            Err(error) => Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oid_parse_and_display_round_trip() {
        let oid = Oid::parse(".1.3.6.1.2.1.1.3").unwrap();
        assert_eq!(oid.to_string(), ".1.3.6.1.2.1.1.3");
        assert_eq!(Oid::parse("1.3.6").unwrap(), Oid::new(vec![1, 3, 6]));
    }

    #[test]
    fn oid_prefix_relations() {
        let table = Oid::parse(".1.3.6.1.2.1.2.2.1").unwrap();
        let cell = table.child(2).child(1);
        assert!(table.is_prefix_of(&cell));
        assert!(!cell.is_prefix_of(&table));
        assert!(!table.is_prefix_of(&table));
        assert_eq!(cell.strip_prefix(&table), Some(Oid::new(vec![2, 1])));
    }

    #[test]
    fn value_coercions() {
        assert_eq!(SnmpValue::Integer(2).as_i64(), Some(2));
        assert_eq!(SnmpValue::TimeTicks(100).as_u64(), Some(100));
        assert_eq!(
            SnmpValue::OctetString(b"Gi1/1".to_vec()).as_text(),
            Some("Gi1/1".to_string())
        );
        assert_eq!(
            SnmpValue::OctetString(vec![10, 0, 0, 1]).as_ip(),
            Some("10.0.0.1".parse().unwrap())
        );
    }
}
