use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

pub fn validate_instance_id(value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err("instance id must be non-empty".to_string());
    }
    if value.chars().any(char::is_control) {
        return Err("instance id must not contain control characters".to_string());
    }
    Ok(())
}

/// Identifier of one workflow instance (one pipeline run).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    pub fn parse(raw: &str) -> Result<Self, String> {
        validate_instance_id(raw)?;
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::borrow::Borrow<str> for InstanceId {
    fn borrow(&self) -> &str {
        self.as_str()
    }
}

impl AsRef<str> for InstanceId {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl TryFrom<String> for InstanceId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_instance_id(&value)?;
        Ok(Self(value))
    }
}

impl<'de> Deserialize<'de> for InstanceId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw)
            .map_err(|err| D::Error::custom(format!("invalid instance id `{raw}`: {err}")))
    }
}
