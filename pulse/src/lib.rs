#[macro_use]
extern crate serde_derive;

use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;

pub mod logging;
pub mod net;

pub const HOST: &str = "localhost";

/// Port the pulse is sent to. This is where the peer under test receives,
/// not where `udp-listener` binds.
pub const PULSE_PORT: u16 = 40001;

/// Port the listener binds. The peer under test sends here.
pub const LISTEN_PORT: u16 = 40002;

pub const MAX_DATAGRAM_LEN: usize = 1024;

pub const DEFAULT_KEY: &str = "1";
pub const DEFAULT_VALUE: f64 = 3.0;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed json payload: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("cannot encode payload: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("no ipv4 address for {0}")]
    Unresolved(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A test message: string keys mapped to numbers, sent as a bare JSON object.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Pulse(BTreeMap<String, f64>);

impl Pulse {
    pub fn new(key: impl Into<String>, value: f64) -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(key.into(), value);
        Self(entries)
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.0.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl Default for Pulse {
    fn default() -> Self {
        Self::new(DEFAULT_KEY, DEFAULT_VALUE)
    }
}

impl fmt::Display for Pulse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&text)
    }
}

/// Encodes a pulse as UTF-8 JSON text, ready to go out as one datagram.
pub fn encode(pulse: &Pulse) -> Result<Vec<u8>> {
    serde_json::to_vec(pulse).map_err(Error::Encode)
}

pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    serde_json::from_slice(payload).map_err(Error::Decode)
}

#[test]
fn test_default_pulse() {
    let val = Pulse::default();
    let buf = encode(&val).unwrap();

    assert_eq!(buf, br#"{"1":3.0}"#);
    assert_eq!(val.to_string(), r#"{"1":3.0}"#);
}

#[test]
fn test_round_trip() {
    for (key, value) in [
        ("1", 3.0),
        ("incrementor", -0.5),
        ("", 0.1),
        ("eins", 1e300),
        ("ünïcødé", f64::MIN_POSITIVE),
    ] {
        let val = Pulse::new(key, value);
        let buf = encode(&val).unwrap();
        let deval: Pulse = decode(&buf).unwrap();

        assert_eq!(val, deval);
        assert_eq!(deval.get(key), Some(value));
        assert_eq!(deval.iter().collect::<Vec<_>>(), vec![(key, value)]);
    }
}

#[test]
fn test_decode_untyped() {
    let deval: serde_json::Value = decode(br#"{"1": 3.0}"#).unwrap();

    dbg!(&deval);

    assert_eq!(deval, serde_json::json!({"1": 3.0}));
}

#[test]
fn test_decode_integer_value() {
    let deval: Pulse = decode(br#"{"1": 3}"#).unwrap();

    assert_eq!(deval, Pulse::default());
    assert_eq!(deval.len(), 1);
}

#[test]
fn test_decode_malformed() {
    let res = decode::<serde_json::Value>(b"{\"1\": 3.0");

    assert!(matches!(res, Err(Error::Decode(_))));
}
