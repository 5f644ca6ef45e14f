use std::fmt;

use crate::error::{Error, Result};

/// Parsed AILive API key.
///
/// The raw token is `<prefix>-<agent>-<skill>`. Agent and skill double as
/// directory components under the session root, so they are restricted to
/// path-safe characters. The raw value only leaves the process inside the
/// sign-url request body; `Debug` and `Display` redact the prefix.
#[derive(Clone)]
pub struct ApiKey {
    raw: String,
    agent: String,
    skill: String,
}

impl ApiKey {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let parts: Vec<&str> = raw.split('-').collect();
        if parts.len() != 3 {
            return Err(Error::msg(
                "invalid API key (expected <prefix>-<agent>-<skill>)",
            ));
        }
        let agent = parts[1];
        let skill = parts[2];
        for (field, value) in [("agent", agent), ("skill", skill)] {
            if value.is_empty() {
                return Err(Error::msg(format!("API key {field} segment is empty")));
            }
            if !value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(Error::msg(format!(
                    "API key {field} segment '{value}' contains invalid characters (allowed: a-zA-Z0-9_)"
                )));
            }
        }
        Ok(Self {
            raw: raw.to_string(),
            agent: agent.to_string(),
            skill: skill.to_string(),
        })
    }

    pub fn agent(&self) -> &str {
        &self.agent
    }

    pub fn skill(&self) -> &str {
        &self.skill
    }

    /// Raw token for the sign-url request body. Keep out of logs.
    pub fn reveal(&self) -> &str {
        &self.raw
    }

    pub fn redacted(&self) -> String {
        format!("***-{}-{}", self.agent, self.skill)
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKey")
            .field("agent", &self.agent)
            .field("skill", &self.skill)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}
