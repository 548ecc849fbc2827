//! Scripted in-memory SNMP agent, used by the test suite and the poll test
//! tool.  Implements the same walk semantics as a real agent: an OID-ordered
//! tree, get-next over lexicographic order, and end-of-MIB-view exceptions.

use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::ops::Bound;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{mib, MibObject, Oid, SessionParams, SnmpBackend, SnmpResult, SnmpError, SnmpValue};

#[derive(Default)]
struct AgentTree {
    objects: BTreeMap<Oid, SnmpValue>,
    unreachable: bool,
}

/// In-memory SNMP backend with one scripted OID tree per agent address
#[derive(Default)]
pub struct MockBackend {
    agents: RwLock<HashMap<IpAddr, AgentTree>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a value on an agent, addressed symbolically
    pub fn set(&self, address: IpAddr, mib: &str, object: &str, index: &[u32], value: SnmpValue) {
        let oid = mib::resolve_symbol(mib, object)
            .unwrap_or_else(|_| panic!("unknown mock object {}::{}", mib, object))
            .extend(&Oid::new(index.to_vec()));
        self.set_oid(address, oid, value);
    }

    /// Sets a value on an agent by raw OID
    pub fn set_oid(&self, address: IpAddr, oid: Oid, value: SnmpValue) {
        let mut agents = self.agents.write();
        agents.entry(address).or_default().objects.insert(oid, value);
    }

    /// Removes a value from an agent's tree
    pub fn remove(&self, address: IpAddr, mib: &str, object: &str, index: &[u32]) {
        if let Ok(oid) = mib::resolve_symbol(mib, object) {
            let oid = oid.extend(&Oid::new(index.to_vec()));
            if let Some(agent) = self.agents.write().get_mut(&address) {
                agent.objects.remove(&oid);
            }
        }
    }

    /// Makes every request to the agent time out (or stop doing so)
    pub fn set_unreachable(&self, address: IpAddr, unreachable: bool) {
        let mut agents = self.agents.write();
        agents.entry(address).or_default().unreachable = unreachable;
    }

    fn with_agent<T>(
        &self,
        session: &SessionParams,
        handler: impl FnOnce(&AgentTree) -> T,
    ) -> SnmpResult<T> {
        let agents = self.agents.read();
        let agent = agents
            .get(&session.address)
            .ok_or(SnmpError::Timeout)?;
        if agent.unreachable {
            return Err(SnmpError::Timeout);
        }
        Ok(handler(agent))
    }
}

fn next_in_tree(tree: &BTreeMap<Oid, SnmpValue>, after: &Oid) -> Option<MibObject> {
    tree.range((Bound::Excluded(after.clone()), Bound::Unbounded))
        .next()
        .map(|(oid, value)| MibObject {
            oid: oid.clone(),
            value: value.clone(),
        })
}

#[async_trait]
impl SnmpBackend for MockBackend {
    async fn get(&self, session: &SessionParams, oids: &[Oid]) -> SnmpResult<Vec<MibObject>> {
        self.with_agent(session, |agent| {
            oids.iter()
                .map(|oid| MibObject {
                    oid: oid.clone(),
                    value: agent
                        .objects
                        .get(oid)
                        .cloned()
                        .unwrap_or(SnmpValue::NoSuchInstance),
                })
                .collect()
        })
    }

    async fn get_next(&self, session: &SessionParams, oids: &[Oid]) -> SnmpResult<Vec<MibObject>> {
        self.with_agent(session, |agent| {
            oids.iter()
                .map(|oid| {
                    next_in_tree(&agent.objects, oid).unwrap_or(MibObject {
                        oid: oid.clone(),
                        value: SnmpValue::EndOfMibView,
                    })
                })
                .collect()
        })
    }

    async fn get_bulk(
        &self,
        session: &SessionParams,
        oids: &[Oid],
        max_repetitions: u32,
    ) -> SnmpResult<Vec<MibObject>> {
        self.with_agent(session, |agent| {
            let mut cursors: Vec<Oid> = oids.to_vec();
            let mut response = Vec::new();
            for _round in 0..max_repetitions {
                for cursor in cursors.iter_mut() {
                    match next_in_tree(&agent.objects, cursor) {
                        Some(object) => {
                            *cursor = object.oid.clone();
                            response.push(object);
                        }
                        None => response.push(MibObject {
                            oid: cursor.clone(),
                            value: SnmpValue::EndOfMibView,
                        }),
                    }
                }
            }
            response
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::polldevs::PollDevice;
    use crate::snmp::SnmpClient;
    use std::sync::Arc;

    fn test_device(address: &str) -> PollDevice {
        PollDevice {
            name: "test-gw".to_string(),
            address: address.parse().unwrap(),
            ..PollDevice::default()
        }
    }

    fn populated_backend(address: IpAddr) -> Arc<MockBackend> {
        let backend = Arc::new(MockBackend::new());
        backend.set(address, "SNMPv2-MIB", "sysUpTime", &[0], SnmpValue::TimeTicks(360_000));
        for ifindex in [1u32, 2, 5] {
            backend.set(address, "IF-MIB", "ifIndex", &[ifindex], SnmpValue::Integer(ifindex as i64));
            backend.set(
                address,
                "IF-MIB",
                "ifDescr",
                &[ifindex],
                SnmpValue::OctetString(format!("Gi1/{}", ifindex).into_bytes()),
            );
        }
        // ifAlias only exists for one row, to exercise sparse results
        backend.set(address, "IF-MIB", "ifAlias", &[2], SnmpValue::OctetString(b"uplink".to_vec()));
        backend
    }

    #[tokio::test]
    async fn get_returns_scripted_value() {
        let address: IpAddr = "10.0.0.1".parse().unwrap();
        let client = SnmpClient::new(&test_device("10.0.0.1"), populated_backend(address));
        let uptime = client.get("SNMPv2-MIB", "sysUpTime", Some(0)).await.unwrap();
        assert_eq!(uptime.value, SnmpValue::TimeTicks(360_000));
    }

    #[tokio::test]
    async fn get_missing_row_is_no_such_instance() {
        let address: IpAddr = "10.0.0.1".parse().unwrap();
        let client = SnmpClient::new(&test_device("10.0.0.1"), populated_backend(address));
        let error = client.get("SNMPv2-MIB", "sysDescr", Some(0)).await.unwrap_err();
        assert_eq!(error, SnmpError::NoSuchInstance);
    }

    #[tokio::test]
    async fn walk_stays_inside_subtree() {
        let address: IpAddr = "10.0.0.1".parse().unwrap();
        let client = SnmpClient::new(&test_device("10.0.0.1"), populated_backend(address));
        let rows = client.walk("IF-MIB", "ifDescr").await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].value.as_text().as_deref(), Some("Gi1/1"));
    }

    #[tokio::test]
    async fn sparse_walk_collects_columns_by_row() {
        let address: IpAddr = "10.0.0.1".parse().unwrap();
        let client = SnmpClient::new(&test_device("10.0.0.1"), populated_backend(address));
        let rows = client
            .sparse_walk(&[("IF-MIB", "ifIndex"), ("IF-MIB", "ifDescr"), ("IF-MIB", "ifAlias")])
            .await
            .unwrap();
        assert_eq!(rows.len(), 3);
        let row = rows.get(&Oid::new(vec![2])).unwrap();
        assert_eq!(row["ifAlias"].as_text().as_deref(), Some("uplink"));
        let row = rows.get(&Oid::new(vec![1])).unwrap();
        assert!(!row.contains_key("ifAlias"));
    }

    #[tokio::test]
    async fn unreachable_agent_times_out() {
        let address: IpAddr = "10.0.0.1".parse().unwrap();
        let backend = populated_backend(address);
        backend.set_unreachable(address, true);
        let client = SnmpClient::new(&test_device("10.0.0.1"), backend);
        let error = client.get("SNMPv2-MIB", "sysUpTime", Some(0)).await.unwrap_err();
        assert_eq!(error, SnmpError::Timeout);
    }
}
