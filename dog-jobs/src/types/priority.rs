use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Ordering hint carried by an item; the queue serves higher levels first
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    Low = 1,
    #[default]
    Normal = 2,
    High = 3,
    Critical = 4,
}

const LEVELS: [(JobPriority, &str); 4] = [
    (JobPriority::Low, "low"),
    (JobPriority::Normal, "normal"),
    (JobPriority::High, "high"),
    (JobPriority::Critical, "critical"),
];

impl JobPriority {
    /// Parse the `priority` option: a level name or its number (1 = low .. 4 = critical)
    pub fn from_option(value: &Value) -> Option<Self> {
        match value {
            Value::String(name) => name.parse().ok(),
            Value::Number(n) => n.as_u64().and_then(|level| Self::try_from(level).ok()),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        LEVELS
            .iter()
            .find(|(level, _)| *level == self)
            .map(|(_, name)| *name)
            .unwrap_or("normal")
    }
}

impl TryFrom<u64> for JobPriority {
    type Error = String;

    fn try_from(level: u64) -> Result<Self, Self::Error> {
        LEVELS
            .iter()
            .map(|(priority, _)| *priority)
            .find(|priority| *priority as u64 == level)
            .ok_or_else(|| format!("priority level out of range: {}", level))
    }
}

impl FromStr for JobPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LEVELS
            .iter()
            .find(|(_, name)| name.eq_ignore_ascii_case(s))
            .map(|(priority, _)| *priority)
            .ok_or_else(|| format!("unknown priority: {}", s))
    }
}

impl fmt::Display for JobPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
