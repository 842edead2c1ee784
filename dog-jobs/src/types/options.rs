use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

use super::JobPriority;

/// Base delay used when `backoff` is enabled without an explicit delay
pub const DEFAULT_BACKOFF_DELAY: Duration = Duration::from_secs(1);

/// Upper bound for exponential retry delays
pub const MAX_BACKOFF_DELAY: Duration = Duration::from_secs(3600);

/// Retry-delay policy handed to the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Backoff {
    /// Same delay before every retry
    Fixed { delay: Duration },

    /// Delay doubles with every attempt, capped at [`MAX_BACKOFF_DELAY`]
    Exponential { delay: Duration },
}

impl Backoff {
    /// Parse the `backoff` option.
    ///
    /// Accepts `true` (exponential from [`DEFAULT_BACKOFF_DELAY`]), a number of
    /// milliseconds (fixed), or `{ "type": "fixed" | "exponential", "delay": ms }`.
    /// `false` and `null` disable backoff.
    pub fn from_option(value: &Value) -> Result<Option<Self>, String> {
        match value {
            Value::Null | Value::Bool(false) => Ok(None),
            Value::Bool(true) => Ok(Some(Self::Exponential { delay: DEFAULT_BACKOFF_DELAY })),
            Value::Number(n) => n
                .as_u64()
                .map(|ms| Some(Self::Fixed { delay: Duration::from_millis(ms) }))
                .ok_or_else(|| format!("backoff delay must be a non-negative integer, got {n}")),
            Value::Object(policy) => {
                let delay = match policy.get("delay") {
                    None | Some(Value::Null) => DEFAULT_BACKOFF_DELAY,
                    Some(Value::Number(n)) => n
                        .as_u64()
                        .map(Duration::from_millis)
                        .ok_or_else(|| format!("backoff delay must be a non-negative integer, got {n}"))?,
                    Some(other) => return Err(format!("backoff delay must be a number, got {other}")),
                };

                match policy.get("type").and_then(Value::as_str).unwrap_or("fixed") {
                    "fixed" => Ok(Some(Self::Fixed { delay })),
                    "exponential" => Ok(Some(Self::Exponential { delay })),
                    other => Err(format!("unknown backoff type: {other}")),
                }
            }
            other => Err(format!("unsupported backoff policy: {other}")),
        }
    }

    /// Delay before the next attempt, given how many attempts have run so far
    pub fn delay_for(&self, attempts_made: u32) -> Duration {
        match self {
            Self::Fixed { delay } => *delay,
            Self::Exponential { delay } => {
                let factor = 2u32.saturating_pow(attempts_made.saturating_sub(1));
                delay.saturating_mul(factor).min(MAX_BACKOFF_DELAY)
            }
        }
    }
}

/// Option keys interpreted by [`ItemOptions::from_map`]
pub const RECOGNIZED_OPTIONS: [&str; 4] = ["removeOnComplete", "attempts", "priority", "backoff"];

/// Recognized item options after merging definition options with overrides
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemOptions {
    /// Drop the item from the queue once it completes
    pub remove_on_complete: bool,

    /// Total number of attempts the queue may make
    pub attempts: Option<u32>,

    /// Ordering hint
    pub priority: Option<JobPriority>,

    /// Delay policy between attempts
    pub backoff: Option<Backoff>,
}

impl ItemOptions {
    /// Extract recognized keys from a merged options map.
    ///
    /// Keys the queue does not understand are ignored. A recognized key with a
    /// value of the wrong shape is an error.
    pub fn from_map(options: &Map<String, Value>) -> Result<Self, String> {
        let remove_on_complete = !matches!(options.get("removeOnComplete"), Some(Value::Bool(false)));

        let attempts = match options.get("attempts") {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => match n.as_i64() {
                Some(n) if n > 0 => Some(u32::try_from(n).unwrap_or(u32::MAX)),
                Some(_) => None,
                None => return Err(format!("attempts must be an integer, got {n}")),
            },
            Some(other) => return Err(format!("attempts must be an integer, got {other}")),
        };

        let priority = match options.get("priority") {
            None | Some(Value::Null) => None,
            Some(value) => Some(
                JobPriority::from_option(value).ok_or_else(|| format!("unrecognized priority: {value}"))?,
            ),
        };

        let backoff = match options.get("backoff") {
            None => None,
            Some(value) => Backoff::from_option(value)?,
        };

        Ok(Self {
            remove_on_complete,
            attempts,
            priority,
            backoff,
        })
    }
}
