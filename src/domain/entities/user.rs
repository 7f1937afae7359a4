//! User identity snapshot.
//!
//! Denormalized identity fields as the gateway and REST API report them.
//! Records are immutable and carry no reference back to the client that
//! produced them; look a user up again by id when fresher data is needed.

use serde::{de, Deserialize, Deserializer, Serialize};

use crate::domain::value_objects::Snowflake;

/// Immutable identity record for a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    /// Snowflake ID of the user
    pub id: Snowflake,

    /// Four-digit discriminator (0 for users on the unique-username system)
    #[serde(default, deserialize_with = "deserialize_discriminator")]
    pub discriminator: u16,

    /// Display name of the account
    #[serde(rename = "username")]
    pub name: String,
}

impl UserInfo {
    pub fn new(id: impl Into<Snowflake>, discriminator: u16, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            discriminator,
            name: name.into(),
        }
    }

    /// Snowflake ID of the user.
    pub fn id(&self) -> Snowflake {
        self.id
    }

    /// Discriminator of the user.
    pub fn discriminator(&self) -> u16 {
        self.discriminator
    }

    /// Name of the user; its byte length is `name().len()`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `name#0001` form, or just the name when the discriminator is zero.
    pub fn tag(&self) -> String {
        if self.discriminator == 0 {
            self.name.clone()
        } else {
            format!("{}#{:04}", self.name, self.discriminator)
        }
    }
}

impl std::fmt::Display for UserInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.tag())
    }
}

/// The API sends discriminators as zero-padded strings ("0001").
fn deserialize_discriminator<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u16),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.parse().map_err(de::Error::custom),
    }
}
