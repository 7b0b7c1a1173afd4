//! Correlation snapshot consumed by the exposure tracker.
//!
//! Refreshing the snapshot is an external concern. The core only reads the
//! current one and decides how much to trust it based on its age.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// One pairwise correlation coefficient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationEntry {
    pub a: String,
    pub b: String,
    pub rho: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CorrelationFile {
    as_of: DateTime<Utc>,
    #[serde(default)]
    clusters: HashMap<String, String>,
    #[serde(default)]
    correlations: Vec<CorrelationEntry>,
}

/// Point-in-time correlation map plus cluster membership.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CorrelationFile", into = "CorrelationFile")]
pub struct CorrelationSnapshot {
    as_of: DateTime<Utc>,
    clusters: HashMap<String, String>,
    pairs: HashMap<(String, String), f64>,
}

fn pair_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

impl TryFrom<CorrelationFile> for CorrelationSnapshot {
    type Error = String;

    fn try_from(file: CorrelationFile) -> Result<Self, Self::Error> {
        let mut pairs = HashMap::with_capacity(file.correlations.len());
        for entry in file.correlations {
            if !entry.rho.is_finite() || !(-1.0..=1.0).contains(&entry.rho) {
                return Err(format!(
                    "correlation {}/{} = {} is outside [-1, 1]",
                    entry.a, entry.b, entry.rho
                ));
            }
            pairs.insert(pair_key(&entry.a, &entry.b), entry.rho);
        }
        Ok(Self {
            as_of: file.as_of,
            clusters: file.clusters,
            pairs,
        })
    }
}

impl From<CorrelationSnapshot> for CorrelationFile {
    fn from(snapshot: CorrelationSnapshot) -> Self {
        let mut correlations: Vec<CorrelationEntry> = snapshot
            .pairs
            .into_iter()
            .map(|((a, b), rho)| CorrelationEntry { a, b, rho })
            .collect();
        correlations.sort_by(|x, y| (&x.a, &x.b).cmp(&(&y.a, &y.b)));
        Self {
            as_of: snapshot.as_of,
            clusters: snapshot.clusters,
            correlations,
        }
    }
}

impl CorrelationSnapshot {
    #[must_use]
    pub fn new(as_of: DateTime<Utc>) -> Self {
        Self {
            as_of,
            clusters: HashMap::new(),
            pairs: HashMap::new(),
        }
    }

    /// Adds a correlation. Values are clamped to [-1, 1].
    #[must_use]
    pub fn with_correlation(mut self, a: &str, b: &str, rho: f64) -> Self {
        self.pairs.insert(pair_key(a, b), rho.clamp(-1.0, 1.0));
        self
    }

    #[must_use]
    pub fn with_cluster(mut self, symbol: &str, cluster: &str) -> Self {
        self.clusters.insert(symbol.to_string(), cluster.to_string());
        self
    }

    /// Loads a snapshot from a JSON file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or fails validation.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading correlation snapshot {}", path.display()))?;
        let snapshot = serde_json::from_str(&raw)
            .with_context(|| format!("parsing correlation snapshot {}", path.display()))?;
        Ok(snapshot)
    }

    #[must_use]
    pub fn as_of(&self) -> DateTime<Utc> {
        self.as_of
    }

    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.as_of
    }

    /// Correlation between two symbols. A symbol is perfectly correlated with
    /// itself; unknown pairs return `None`, never zero.
    #[must_use]
    pub fn correlation(&self, a: &str, b: &str) -> Option<f64> {
        if a == b {
            return Some(1.0);
        }
        self.pairs.get(&pair_key(a, b)).copied()
    }

    #[must_use]
    pub fn cluster_of(&self, symbol: &str) -> Option<&str> {
        self.clusters.get(symbol).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn correlation_is_symmetric_and_unknown_is_none() {
        let snapshot = CorrelationSnapshot::new(Utc::now())
            .with_correlation("EURUSD", "GBPUSD", 0.85);
        assert_eq!(snapshot.correlation("GBPUSD", "EURUSD"), Some(0.85));
        assert_eq!(snapshot.correlation("EURUSD", "EURUSD"), Some(1.0));
        assert_eq!(snapshot.correlation("EURUSD", "USDJPY"), None);
    }

    #[test]
    fn parses_file_format_and_rejects_out_of_range() {
        let json = r#"{
            "as_of": "2026-03-02T08:00:00Z",
            "clusters": {"EURUSD": "usd_majors", "GBPUSD": "usd_majors"},
            "correlations": [{"a": "EURUSD", "b": "GBPUSD", "rho": 0.9}]
        }"#;
        let snapshot: CorrelationSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.cluster_of("GBPUSD"), Some("usd_majors"));
        assert_eq!(
            snapshot.as_of(),
            Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap()
        );

        let bad = json.replace("0.9", "1.4");
        assert!(serde_json::from_str::<CorrelationSnapshot>(&bad).is_err());
    }

    #[test]
    fn load_reads_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("correlations.json");
        let snapshot = CorrelationSnapshot::new(Utc::now())
            .with_cluster("XAUUSD", "metals")
            .with_correlation("XAUUSD", "XAGUSD", 0.7);
        std::fs::write(&path, serde_json::to_string(&snapshot).unwrap()).unwrap();

        let loaded = CorrelationSnapshot::load(&path).unwrap();
        assert_eq!(loaded, snapshot);
    }
}
