// ABOUTME: Serde helpers for non-empty plan collections.
// ABOUTME: Plans use plain YAML/JSON sequences on the wire.

use nonempty::NonEmpty;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub fn deserialize_nonempty<'de, D, T>(deserializer: D) -> Result<NonEmpty<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    let values: Vec<T> = Vec::deserialize(deserializer)?;
    NonEmpty::from_vec(values).ok_or_else(|| serde::de::Error::custom("list cannot be empty"))
}

pub fn serialize_nonempty<S, T>(values: &NonEmpty<T>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    T: Serialize,
{
    serializer.collect_seq(values.iter())
}
