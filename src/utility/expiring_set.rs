//! Set whose members expire
//!
//! Members live in a sorted set scored by their expiry time. Every
//! mutating call first evicts expired members in the same transaction,
//! and reads only return members scored after "now". The member list is
//! cached until the next mutation.

use tracing::debug;

use super::expiry::{self, Expiry};
use crate::client::Serializer;
use crate::proxy::Proxy;
use crate::sequence::{Output, Results, Sequence};
use crate::utils::{ClientError, Result, Value};

/// Fail on the first error reply of a transaction
fn check_replies(results: &Results) -> Result<()> {
    for (_, output) in results.iter() {
        if let Output::Value(Value::Error(e)) = output {
            return Err(ClientError::Server(e.clone()));
        }
    }
    Ok(())
}

pub struct ExpiringSet {
    key: String,
    proxy: Proxy,
    cached: Option<Vec<Value>>,
    serializer: Option<Serializer>,
}

impl ExpiringSet {
    pub fn new(key: impl Into<String>, proxy: Proxy) -> Self {
        Self {
            key: key.into(),
            proxy,
            cached: None,
            serializer: None,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    fn serializer(&mut self) -> Serializer {
        *self.serializer.get_or_insert_with(|| self.proxy.serializer())
    }

    /// Transaction on the node owning the set, evicting expired members
    fn pruning_transaction(&self, now: f64) -> Result<Sequence> {
        self.proxy
            .transaction_for_key(&self.key)?
            .cmd("ZREMRANGEBYSCORE", [Value::from(self.key.as_str()), "-inf".into(), now.into()])
    }

    /// Add `value`, or move its expiry if already present
    pub fn add(&mut self, value: impl Into<Value>, expiry: impl Into<Expiry>) -> Result<&mut Self> {
        let value = value.into();
        let serializer = self.serializer();
        if !value.is_scalar() && !serializer.is_enabled() {
            return Err(ClientError::UnsupportedValue(value.kind()));
        }
        let member = serializer.encode(&value)?;

        let now = expiry::now();
        let score = expiry.into().score(now);
        let results = self
            .pruning_transaction(now)?
            .cmd("ZADD", [Value::from(self.key.as_str()), score.into(), member.into()])?
            .execute()?;
        check_replies(&results)?;

        debug!("Added member to {} expiring at {}", self.key, score);
        self.cached = None;
        Ok(self)
    }

    pub fn remove(&mut self, value: impl Into<Value>) -> Result<&mut Self> {
        let member = self.serializer().encode(&value.into())?;

        let results = self
            .pruning_transaction(expiry::now())?
            .cmd("ZREM", [Value::from(self.key.as_str()), member.into()])?
            .execute()?;
        check_replies(&results)?;

        self.cached = None;
        Ok(self)
    }

    /// Membership, compared the way the value would come back from the store
    pub fn contains(&mut self, value: impl Into<Value>) -> Result<bool> {
        let serializer = self.serializer();
        let stored = serializer.decode(&serializer.encode(&value.into())?)?;
        Ok(self.all()?.contains(&stored))
    }

    /// Unexpired members in expiry order
    pub fn all(&mut self) -> Result<&[Value]> {
        if self.cached.is_none() {
            let members = self.fetch()?;
            self.cached = Some(members);
        }
        Ok(self.cached.as_deref().unwrap_or_default())
    }

    fn fetch(&mut self) -> Result<Vec<Value>> {
        let serializer = self.serializer();
        let now = expiry::now();
        let results = self
            .pruning_transaction(now)?
            .cmd(
                "ZRANGEBYSCORE",
                [
                    Value::from(self.key.as_str()),
                    format!("({}", now).into(),
                    "+inf".into(),
                ],
            )?
            .alias("list")?
            .execute()?;
        check_replies(&results)?;

        match results.value("list") {
            Some(Value::Array(members)) => members
                .iter()
                .map(|member| match member {
                    Value::Bytes(bytes) => serializer.decode(bytes),
                    other => Ok(other.clone()),
                })
                .collect(),
            _ => Ok(Vec::new()),
        }
    }

    /// Evict expired members
    pub fn prune(&mut self) -> Result<&mut Self> {
        let key = self.key.as_str();
        self.proxy
            .call("ZREMRANGEBYSCORE", [Value::from(key), "-inf".into(), expiry::now().into()])?;
        self.cached = None;
        Ok(self)
    }

    /// Delete the whole set
    pub fn clear(&mut self) -> Result<&mut Self> {
        self.proxy.call("DEL", [self.key.as_str()])?;
        self.cached = Some(Vec::new());
        Ok(self)
    }

    pub fn count(&mut self) -> Result<usize> {
        Ok(self.all()?.len())
    }

    pub fn is_empty(&mut self) -> Result<bool> {
        Ok(self.count()? == 0)
    }

    /// Iterate a snapshot of `all()`
    pub fn iter(&mut self) -> Result<std::vec::IntoIter<Value>> {
        Ok(self.all()?.to_vec().into_iter())
    }
}

impl<'a> IntoIterator for &'a mut ExpiringSet {
    type Item = Result<Value>;
    type IntoIter = std::vec::IntoIter<Result<Value>>;

    /// A failed fetch yields its error as the only item
    fn into_iter(self) -> Self::IntoIter {
        match self.all() {
            Ok(members) => members.iter().cloned().map(Ok).collect::<Vec<_>>().into_iter(),
            Err(e) => vec![Err(e)].into_iter(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args;
    use crate::client::mock::MockConnector;
    use crate::client::Connector;
    use crate::config::{ClientConfig, ServerAddress};
    use std::sync::Arc;
    use std::time::{Duration, SystemTime};

    fn standalone(serializer: Serializer) -> (Arc<MockConnector>, Proxy) {
        let connector = Arc::new(MockConnector::standalone(1));
        let config = ClientConfig {
            serializer,
            ..ClientConfig::default()
        };
        let proxy =
            Proxy::with_connector(&config, Arc::clone(&connector) as Arc<dyn Connector>).unwrap();
        (connector, proxy)
    }

    fn every_topology() -> Vec<(Arc<MockConnector>, Proxy)> {
        let sharded = ClientConfig {
            addresses: vec![
                ServerAddress::new("127.0.0.1", 6379),
                ServerAddress::new("127.0.0.1", 6380),
            ],
            ..ClientConfig::default()
        };
        let cluster = ClientConfig {
            addresses: vec![ServerAddress::new("127.0.0.1", 7000)],
            cluster: true,
            ..ClientConfig::default()
        };
        let mut proxies = vec![standalone(Serializer::None)];
        for (config, connector) in [
            (sharded, MockConnector::standalone(2)),
            (cluster, MockConnector::cluster(3)),
        ] {
            let connector = Arc::new(connector);
            let proxy =
                Proxy::with_connector(&config, Arc::clone(&connector) as Arc<dyn Connector>)
                    .unwrap();
            proxies.push((connector, proxy));
        }
        proxies
    }

    /// Run `f` against the node holding `key`
    fn with_owner<R>(
        connector: &MockConnector,
        key: &str,
        f: impl Fn(&mut crate::client::mock::MockServer) -> R,
    ) -> R {
        let addresses = connector.addresses();
        let owner = addresses
            .iter()
            .find(|a| connector.server(a).lock().zset_len(key) > 0)
            .unwrap_or(&addresses[0]);
        let server = connector.server(owner);
        let mut guard = server.lock();
        f(&mut guard)
    }

    fn names(set: &mut ExpiringSet) -> Vec<Value> {
        set.all().unwrap().to_vec()
    }

    #[test]
    fn test_add_get_remove_and_clear() {
        for (connector, proxy) in every_topology() {
            let mut set = proxy.expiring_set("set_key");

            set.add("foo", 60).unwrap();
            assert_eq!(with_owner(&connector, "set_key", |s| s.zset_len("set_key")), 1);
            assert_eq!(set.count().unwrap(), 1);
            assert_eq!(names(&mut set), args!["foo"]);
            assert!(set.contains("foo").unwrap());

            set.add("bar", 61).unwrap().add("baz", 62).unwrap().prune().unwrap();
            assert_eq!(set.count().unwrap(), 3);
            assert_eq!(names(&mut set), args!["foo", "bar", "baz"]);
            let iterated: Vec<Value> = (&mut set).into_iter().map(|m| m.unwrap()).collect();
            assert_eq!(iterated, args!["foo", "bar", "baz"]);

            set.remove("invalid").unwrap().remove("baz").unwrap();
            assert_eq!(names(&mut set), args!["foo", "bar"]);
            assert!(!set.contains("baz").unwrap());

            assert!(set.clear().unwrap().is_empty().unwrap());
            let remaining: usize = connector
                .addresses()
                .iter()
                .map(|a| connector.server(a).lock().zset_len("set_key"))
                .sum();
            assert_eq!(remaining, 0);
        }
    }

    fn score(proxy: &Proxy, member: &str) -> Option<f64> {
        let reply = proxy.call("ZSCORE", ["set_key", member]).unwrap();
        reply
            .as_bytes()
            .and_then(|b| std::str::from_utf8(b).ok())
            .and_then(|s| s.parse::<f64>().ok())
    }

    #[test]
    fn test_re_add_moves_expiry() {
        for (_connector, proxy) in every_topology() {
            let mut set = proxy.expiring_set("set_key");
            let start = expiry::now();
            set.add("foo", 60).unwrap();
            let first = score(&proxy, "foo").unwrap();
            assert!(first >= start + 60.0 && first < start + 62.0);

            set.add("foo", 600).unwrap();
            assert_eq!(set.count().unwrap(), 1);
            let second = score(&proxy, "foo").unwrap();
            assert!(second >= start + 600.0 && second < start + 602.0);

            // Shortening works the same way
            set.add("foo", 30).unwrap();
            assert_eq!(set.count().unwrap(), 1);
            assert!(score(&proxy, "foo").unwrap() < start + 32.0);
        }
    }

    #[test]
    fn test_members_expire_without_prune() {
        let (connector, proxy) = standalone(Serializer::None);
        let mut set = proxy.expiring_set("set_key");
        set.add("foo", Duration::from_millis(100))
            .unwrap()
            .add("bar", 60)
            .unwrap();
        std::thread::sleep(Duration::from_millis(150));

        assert_eq!(set.count().unwrap(), 1);
        assert_eq!(names(&mut set), args!["bar"]);
        assert!(!set.contains("foo").unwrap());
        // Evicted by the read itself
        assert_eq!(with_owner(&connector, "set_key", |s| s.zset_len("set_key")), 1);
    }

    #[test]
    fn test_error_replies_fail_and_are_not_cached() {
        let (_connector, proxy) = standalone(Serializer::None);
        proxy.call("SET", ["set_key", "not a zset"]).unwrap();
        let mut set = proxy.expiring_set("set_key");

        for _ in 0..2 {
            assert!(matches!(
                set.count(),
                Err(ClientError::Server(msg)) if msg.starts_with("WRONGTYPE")
            ));
        }
        assert!(matches!(
            set.contains("foo"),
            Err(ClientError::Server(_))
        ));
        assert!(matches!(set.add("foo", 60), Err(ClientError::Server(_))));
        assert!(matches!(set.remove("foo"), Err(ClientError::Server(_))));

        // Usable again once the key holds a sorted set
        set.clear().unwrap();
        set.add("foo", 60).unwrap();
        assert_eq!(names(&mut set), args!["foo"]);
    }

    #[test]
    fn test_cache_until_prune() {
        let (connector, proxy) = standalone(Serializer::None);
        let mut set = proxy.expiring_set("set_key");
        set.add("foo", 60).unwrap().add("bar", 61).unwrap();
        assert_eq!(names(&mut set), args!["foo", "bar"]);

        // Expire "foo" behind the set's back
        with_owner(&connector, "set_key", |s| s.zadd_raw("set_key", 10.0, b"foo"));
        assert_eq!(set.count().unwrap(), 2);

        set.prune().unwrap();
        assert_eq!(names(&mut set), args!["bar"]);
    }

    #[test]
    fn test_reads_and_writes_evict_expired() {
        let (connector, proxy) = standalone(Serializer::None);
        let future = expiry::now() + 60.0;
        with_owner(&connector, "set_key", |s| {
            s.zadd_raw("set_key", future, b"foo");
            s.zadd_raw("set_key", 60.0, b"bar");
        });

        let mut set = proxy.expiring_set("set_key");
        assert_eq!(names(&mut set), args!["foo"]);

        with_owner(&connector, "set_key", |s| s.zadd_raw("set_key", 60.0, b"old"));
        set.add("baz", 120).unwrap();
        assert_eq!(names(&mut set), args!["foo", "baz"]);
        assert_eq!(with_owner(&connector, "set_key", |s| s.zset_len("set_key")), 2);
    }

    #[test]
    fn test_expiry_forms() {
        let (connector, proxy) = standalone(Serializer::None);
        let mut set = proxy.expiring_set("set_key");
        let start = expiry::now();

        set.add("seconds", 50).unwrap();
        set.add("duration", Duration::from_secs(100)).unwrap();
        set.add("parsed", "1 hour".parse::<Expiry>().unwrap()).unwrap();
        set.add("absolute", SystemTime::now() + Duration::from_secs(200))
            .unwrap();
        set.add("expired", "-5 seconds".parse::<Expiry>().unwrap())
            .unwrap();

        let seconds = score(&proxy, "seconds").unwrap();
        assert!(seconds >= start + 50.0 && seconds < start + 52.0);
        let duration = score(&proxy, "duration").unwrap();
        assert!(duration >= start + 100.0 && duration < start + 102.0);
        let parsed = score(&proxy, "parsed").unwrap();
        assert!(parsed >= start + 3600.0 && parsed < start + 3602.0);
        let absolute = score(&proxy, "absolute").unwrap();
        assert!(absolute >= start + 200.0 && absolute < start + 202.0);

        assert_eq!(names(&mut set), args!["seconds", "duration", "absolute", "parsed"]);
        assert!(!set.contains("expired").unwrap());
        assert_eq!(with_owner(&connector, "set_key", |s| s.zset_len("set_key")), 4);
    }

    #[test]
    fn test_composite_value_needs_serializer() {
        let (_connector, proxy) = standalone(Serializer::None);
        let mut set = proxy.expiring_set("set_key");
        assert!(matches!(
            set.add(Value::Array(args!["a", "b"]), 60),
            Err(ClientError::UnsupportedValue("array"))
        ));
        assert_eq!(set.count().unwrap(), 0);
    }

    #[test]
    fn test_serialized_members() {
        let (_connector, proxy) = standalone(Serializer::Json);
        let mut set = proxy.expiring_set("set_key");
        let composite = Value::Array(args!["a", 1]);
        set.add(composite.clone(), 60).unwrap().add(5, 61).unwrap();

        assert_eq!(names(&mut set), vec![composite.clone(), Value::Int(5)]);
        assert!(set.contains(composite).unwrap());
        assert!(set.contains(5).unwrap());
        assert!(!set.contains("5").unwrap());
    }

    #[test]
    fn test_plain_members_compare_as_stored() {
        let (_connector, proxy) = standalone(Serializer::None);
        let mut set = proxy.expiring_set("set_key");
        set.add(5, 60).unwrap();
        assert_eq!(names(&mut set), args!["5"]);
        assert!(set.contains(5).unwrap());
        assert!(set.contains("5").unwrap());
    }

    #[test]
    fn test_prefix_applies_to_set_key() {
        let connector = Arc::new(MockConnector::standalone(1));
        let config = ClientConfig {
            prefix: Some("app:".to_string()),
            ..ClientConfig::default()
        };
        let proxy =
            Proxy::with_connector(&config, Arc::clone(&connector) as Arc<dyn Connector>).unwrap();
        let mut set = proxy.expiring_set("set_key");
        set.add("foo", 60).unwrap();
        assert_eq!(names(&mut set), args!["foo"]);

        let server = connector.server(&ServerAddress::new("127.0.0.1", 6379));
        assert_eq!(server.lock().zset_len("app:set_key"), 1);
        assert_eq!(server.lock().zset_len("set_key"), 0);
    }

    #[test]
    #[ignore]
    fn test_live_expiry() {
        let proxy = Proxy::from_dsn("redis://127.0.0.1:6379").expect("Failed to connect");
        let mut set = proxy.expiring_set("expiring_set:live");
        set.clear().unwrap();
        set.add("foo", 1).unwrap();
        assert!(proxy
            .expiring_set("expiring_set:live")
            .contains("foo")
            .unwrap());
        std::thread::sleep(Duration::from_millis(1100));
        assert_eq!(set.count().unwrap(), 0);
    }
}
