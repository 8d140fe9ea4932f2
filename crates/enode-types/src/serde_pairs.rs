//! Serialize maps with structured keys as vectors of pairs.
//!
//! JSON maps require string keys; the cache files key maps by
//! outpoints and addresses, so those fields round-trip through
//! `Vec<(K, V)>` instead. Use with `#[serde(with = "serde_pairs")]`.

use serde::de::{Deserialize, Deserializer};
use serde::ser::{Serialize, Serializer};
use std::collections::HashMap;
use std::hash::Hash;

/// Serialize a map as a vector of key/value pairs.
pub fn serialize<K, V, S>(map: &HashMap<K, V>, serializer: S) -> Result<S::Ok, S::Error>
where
    K: Serialize,
    V: Serialize,
    S: Serializer,
{
    let pairs: Vec<(&K, &V)> = map.iter().collect();
    pairs.serialize(serializer)
}

/// Deserialize a vector of key/value pairs into a map.
pub fn deserialize<'de, K, V, D>(deserializer: D) -> Result<HashMap<K, V>, D::Error>
where
    K: Deserialize<'de> + Eq + Hash,
    V: Deserialize<'de>,
    D: Deserializer<'de>,
{
    let pairs: Vec<(K, V)> = Vec::deserialize(deserializer)?;
    Ok(pairs.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Outpoint;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Wrapper {
        #[serde(with = "super")]
        map: HashMap<Outpoint, i64>,
    }

    #[test]
    fn structured_keys_roundtrip_through_json() {
        let mut map = HashMap::new();
        map.insert(Outpoint::new(crate::sha256d(b"a"), 1), 42i64);
        let json = serde_json::to_string(&Wrapper { map }).unwrap();
        let back: Wrapper = serde_json::from_str(&json).unwrap();
        assert_eq!(back.map.len(), 1);
        assert_eq!(
            back.map[&Outpoint::new(crate::sha256d(b"a"), 1)],
            42
        );
    }
}
