//! Retention policy and its evaluation over a version history

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::VersionRecord;
use crate::error::{VaultError, VaultResult};

/// Which versions of an artifact to keep.
///
/// Serialized as `"all"`, an integer N, or a table `{ n = N, days = D }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "RetentionRepr", into = "RetentionRepr")]
pub enum RetentionPolicy {
    #[default]
    KeepAll,
    /// The N most recent versions
    KeepLast(usize),
    /// Kept if among the `n` most recent OR created within `days`
    Window { n: Option<usize>, days: Option<u32> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RetentionRepr {
    Keyword(String),
    Count(usize),
    Window {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        n: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        days: Option<u32>,
    },
}

impl TryFrom<RetentionRepr> for RetentionPolicy {
    type Error = String;

    fn try_from(repr: RetentionRepr) -> Result<Self, Self::Error> {
        match repr {
            RetentionRepr::Keyword(word) if word == "all" => Ok(RetentionPolicy::KeepAll),
            RetentionRepr::Keyword(word) => Err(format!("unknown retention keyword {word:?} (expected \"all\")")),
            RetentionRepr::Count(n) => Ok(RetentionPolicy::KeepLast(n)),
            RetentionRepr::Window { n, days } => Ok(RetentionPolicy::Window { n, days }),
        }
    }
}

impl From<RetentionPolicy> for RetentionRepr {
    fn from(policy: RetentionPolicy) -> Self {
        match policy {
            RetentionPolicy::KeepAll => RetentionRepr::Keyword("all".to_string()),
            RetentionPolicy::KeepLast(n) => RetentionRepr::Count(n),
            RetentionPolicy::Window { n, days } => RetentionRepr::Window { n, days },
        }
    }
}

impl fmt::Display for RetentionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetentionPolicy::KeepAll => write!(f, "keep all"),
            RetentionPolicy::KeepLast(n) => write!(f, "keep last {n}"),
            RetentionPolicy::Window { n, days } => {
                let mut parts = Vec::new();
                if let Some(n) = n {
                    parts.push(format!("last {n}"));
                }
                if let Some(days) = days {
                    parts.push(format!("within {days}d"));
                }
                write!(f, "keep {}", parts.join(" or "))
            }
        }
    }
}

impl RetentionPolicy {
    /// Window from optional CLI-style limits; `KeepAll` when both are absent.
    pub fn from_limits(n: Option<usize>, days: Option<u32>) -> Self {
        match (n, days) {
            (None, None) => RetentionPolicy::KeepAll,
            (Some(n), None) => RetentionPolicy::KeepLast(n),
            (n, days) => RetentionPolicy::Window { n, days },
        }
    }

    pub fn validate(&self) -> VaultResult<()> {
        match self {
            RetentionPolicy::KeepAll => Ok(()),
            RetentionPolicy::KeepLast(0) => Err(VaultError::Config(
                "retention count must be at least 1".to_string(),
            )),
            RetentionPolicy::KeepLast(_) => Ok(()),
            RetentionPolicy::Window { n: None, days: None } => Err(VaultError::Config(
                "retention window needs `n`, `days` or both".to_string(),
            )),
            RetentionPolicy::Window { .. } => Ok(()),
        }
    }

    pub fn is_keep_all(&self) -> bool {
        matches!(self, RetentionPolicy::KeepAll)
    }

    fn keeps(&self, rank: usize, created_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match *self {
            RetentionPolicy::KeepAll => true,
            RetentionPolicy::KeepLast(n) => rank < n,
            RetentionPolicy::Window { n, days } => {
                let by_count = n.is_some_and(|n| rank < n);
                let by_age = days.is_some_and(|d| now - created_at <= Duration::days(i64::from(d)));
                by_count || by_age
            }
        }
    }
}

/// Outcome of evaluating a policy; both lists are oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionDecision {
    pub keep: Vec<String>,
    pub delete: Vec<String>,
}

/// Split `versions` into keep and delete sets.
///
/// `latest_version_id` is always kept. Rank 0 is the most recent version.
pub fn evaluate(
    versions: &[&VersionRecord],
    latest_version_id: &str,
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
) -> RetentionDecision {
    let mut ordered: Vec<&VersionRecord> = versions.to_vec();
    ordered.sort_by(|a, b| b.chronology().cmp(&a.chronology()));

    let mut decision = RetentionDecision::default();
    for (rank, version) in ordered.iter().enumerate() {
        let keep = version.version_id == latest_version_id || policy.keeps(rank, version.created_at, now);
        if keep {
            decision.keep.push(version.version_id.clone());
        } else {
            decision.delete.push(version.version_id.clone());
        }
    }
    decision.keep.reverse();
    decision.delete.reverse();
    decision
}
