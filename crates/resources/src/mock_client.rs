//! In-memory command client
//!
//! Implements a small subset of a key/value command store, with injectable
//! failures, for tests and dry runs.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use contracts::{Command, CommandClient, ContractError};
use serde_json::Value;
use tracing::instrument;

/// Failure injection for `MockCommandClient`
#[derive(Debug, Default, Clone)]
pub struct MockCommandConfig {
    /// Commands whose first argument is one of these keys always fail
    pub fail_keys: Vec<String>,
    /// Number of leading `execute` calls that fail with a transient error
    pub transient_failures: u32,
    /// Number of leading `connect` calls that fail
    pub connect_failures: u32,
    /// Simulated latency of every `execute` call
    pub delay: Duration,
}

#[derive(Debug, Default)]
struct Store {
    strings: HashMap<String, String>,
    sets: HashMap<String, BTreeSet<String>>,
}

#[derive(Debug, Default)]
struct State {
    connected: bool,
    store: Store,
    history: Vec<Command>,
}

/// Command client backed by an in-process store
#[derive(Debug, Default)]
pub struct MockCommandClient {
    config: MockCommandConfig,
    state: Mutex<State>,
    execute_calls: AtomicU32,
    connect_calls: AtomicU32,
    close_calls: AtomicU32,
}

impl MockCommandClient {
    /// Create a client with no injected failures
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a client with the given failure injection
    pub fn with_config(config: MockCommandConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Number of `execute` calls, including failed ones
    pub fn execute_calls(&self) -> u32 {
        self.execute_calls.load(Ordering::SeqCst)
    }

    /// Number of `connect` calls
    pub fn connect_calls(&self) -> u32 {
        self.connect_calls.load(Ordering::SeqCst)
    }

    /// Number of `close` calls
    pub fn close_calls(&self) -> u32 {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Executed commands, rendered, in order
    pub fn history(&self) -> Vec<String> {
        self.state().history.iter().map(ToString::to_string).collect()
    }

    /// Current string value of `key`
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.state().store.strings.get(key).cloned()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CommandClient for MockCommandClient {
    #[instrument(name = "mock_client_connect", skip(self))]
    async fn connect(&self) -> Result<(), ContractError> {
        let attempt = self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if attempt < self.config.connect_failures {
            return Err(ContractError::external("mock", "connection refused"));
        }
        self.state().connected = true;
        Ok(())
    }

    #[instrument(name = "mock_client_execute", skip(self), fields(command = %command.name))]
    async fn execute(&self, command: &Command) -> Result<Value, ContractError> {
        let call = self.execute_calls.fetch_add(1, Ordering::SeqCst);
        if !self.config.delay.is_zero() {
            tokio::time::sleep(self.config.delay).await;
        }

        let mut state = self.state();
        if !state.connected {
            return Err(ContractError::NotConnected {
                sink_name: "mock".to_string(),
            });
        }
        state.history.push(command.clone());

        if call < self.config.transient_failures {
            return Err(ContractError::external("mock", "transient failure"));
        }
        let args: Vec<String> = command.args.iter().map(ToString::to_string).collect();
        if let Some(key) = args.first() {
            if self.config.fail_keys.contains(key) {
                return Err(ContractError::external("mock", format!("injected failure for {key}")));
            }
        }

        apply(&mut state.store, &command.name.to_ascii_uppercase(), &args)
    }

    async fn close(&self) -> Result<(), ContractError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.state().connected = false;
        Ok(())
    }
}

fn apply(store: &mut Store, name: &str, args: &[String]) -> Result<Value, ContractError> {
    match (name, args) {
        ("PING", []) => Ok(Value::from("PONG")),
        ("GET", [key]) => Ok(store
            .strings
            .get(key)
            .map_or(Value::Null, |v| Value::from(v.as_str()))),
        ("SET", [key, value]) => {
            store.strings.insert(key.clone(), value.clone());
            Ok(Value::from("OK"))
        }
        ("INCR", [key]) => incr_by(store, key, "1"),
        ("INCRBY", [key, delta]) => incr_by(store, key, delta),
        ("SADD", [key, members @ ..]) if !members.is_empty() => {
            let set = store.sets.entry(key.clone()).or_default();
            let added = members.iter().filter(|m| set.insert((*m).clone())).count();
            Ok(Value::from(added as i64))
        }
        ("SCARD", [key]) => Ok(Value::from(
            store.sets.get(key).map_or(0, BTreeSet::len) as i64,
        )),
        ("KEYS", [pattern]) => {
            let mut keys: Vec<&String> = store
                .strings
                .keys()
                .chain(store.sets.keys())
                .filter(|k| glob_match(pattern.as_bytes(), k.as_bytes()))
                .collect();
            keys.sort();
            Ok(Value::from(
                keys.into_iter().map(|k| Value::from(k.as_str())).collect::<Vec<_>>(),
            ))
        }
        ("DEL", keys) if !keys.is_empty() => {
            let removed = keys
                .iter()
                .filter(|k| store.strings.remove(*k).is_some() | store.sets.remove(*k).is_some())
                .count();
            Ok(Value::from(removed as i64))
        }
        _ => Err(ContractError::external(
            "mock",
            format!("unsupported command {name} with {} args", args.len()),
        )),
    }
}

fn incr_by(store: &mut Store, key: &str, delta: &str) -> Result<Value, ContractError> {
    let delta: i64 = delta
        .parse()
        .map_err(|_| ContractError::external("mock", "value is not an integer"))?;
    let current: i64 = match store.strings.get(key) {
        Some(v) => v
            .parse()
            .map_err(|_| ContractError::external("mock", "value is not an integer"))?,
        None => 0,
    };
    let next = current + delta;
    store.strings.insert(key.to_string(), next.to_string());
    Ok(Value::from(next))
}

fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    match (pattern.first(), text.first()) {
        (None, None) => true,
        (Some(b'*'), _) => {
            glob_match(&pattern[1..], text) || (!text.is_empty() && glob_match(pattern, &text[1..]))
        }
        (Some(b'?'), Some(_)) => glob_match(&pattern[1..], &text[1..]),
        (Some(p), Some(t)) if p == t => glob_match(&pattern[1..], &text[1..]),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn connected(config: MockCommandConfig) -> MockCommandClient {
        let client = MockCommandClient::with_config(config);
        client.connect().await.unwrap();
        client
    }

    #[tokio::test]
    async fn test_incrby() {
        let client = connected(MockCommandConfig::default()).await;
        let cmd = Command::new("incrby").arg("ash").arg(10_i64);
        assert_eq!(client.execute(&cmd).await.unwrap(), json!(10));
        let cmd = Command::new("INCRBY").arg("ash").arg(-2_i64);
        assert_eq!(client.execute(&cmd).await.unwrap(), json!(8));
        assert_eq!(client.get_string("ash").as_deref(), Some("8"));
    }

    #[tokio::test]
    async fn test_sets_and_keys() {
        let client = connected(MockCommandConfig::default()).await;
        client
            .execute(&Command::new("SADD").arg("s1").arg("a").arg("b"))
            .await
            .unwrap();
        let added = client
            .execute(&Command::new("SADD").arg("s1").arg("a"))
            .await
            .unwrap();
        assert_eq!(added, json!(0));
        assert_eq!(
            client.execute(&Command::new("SCARD").arg("s1")).await.unwrap(),
            json!(2)
        );
        client
            .execute(&Command::new("SET").arg("s2").arg("x"))
            .await
            .unwrap();
        assert_eq!(
            client.execute(&Command::new("KEYS").arg("s?")).await.unwrap(),
            json!(["s1", "s2"])
        );
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let client = connected(MockCommandConfig {
            fail_keys: vec!["bad".to_string()],
            transient_failures: 1,
            ..Default::default()
        })
        .await;

        let ping = Command::new("PING");
        assert!(client.execute(&ping).await.unwrap_err().is_retryable());
        assert_eq!(client.execute(&ping).await.unwrap(), json!("PONG"));
        assert!(client
            .execute(&Command::new("GET").arg("bad"))
            .await
            .is_err());
        assert_eq!(client.execute_calls(), 3);
        assert_eq!(client.history().len(), 3);
    }

    #[tokio::test]
    async fn test_requires_connect() {
        let client = MockCommandClient::with_config(MockCommandConfig {
            connect_failures: 1,
            ..Default::default()
        });
        assert!(matches!(
            client.execute(&Command::new("PING")).await,
            Err(ContractError::NotConnected { .. })
        ));
        assert!(client.connect().await.is_err());
        client.connect().await.unwrap();
        client.close().await.unwrap();
        assert!(client.execute(&Command::new("PING")).await.is_err());
        assert_eq!(client.close_calls(), 1);
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match(b"*", b"anything"));
        assert!(glob_match(b"user:*", b"user:1"));
        assert!(!glob_match(b"user:?", b"user:12"));
    }
}
