// ABOUTME: Custom serde deserializers for config types.
// ABOUTME: Accepts SSH endpoints as either a compact string or a mapping.

use serde::Deserialize;

use super::ServerConfig;

pub fn deserialize_server_option<'de, D>(deserializer: D) -> Result<Option<ServerConfig>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<ServerEntry> = Option::deserialize(deserializer)?;
    opt.map(ServerEntry::into_server_config)
        .transpose()
        .map_err(serde::de::Error::custom)
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ServerEntry {
    Simple(String),
    Detailed(ServerConfig),
}

impl ServerEntry {
    fn into_server_config(self) -> Result<ServerConfig, String> {
        match self {
            ServerEntry::Simple(s) => ServerConfig::parse(&s),
            ServerEntry::Detailed(c) => Ok(c),
        }
    }
}
