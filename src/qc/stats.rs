// 📊 Peer-Group Statistics - mean / median / dispersion of EV multiples
//
// Computed once per run from the post-override fields, then read-only for
// every rule. Summation follows peer-universe order.

use crate::merge::PeerFields;
use crate::metrics::{EvBasis, Multiple};
use crate::peers::Peer;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MultipleStats {
    pub count: usize,
    pub mean: Option<f64>,
    pub median: Option<f64>,
    /// Sample standard deviation; needs two values
    pub std_dev: Option<f64>,
    #[serde(skip)]
    sum: f64,
    #[serde(skip)]
    sum_sq: f64,
}

impl MultipleStats {
    pub fn from_values(values: &[f64]) -> Self {
        let count = values.len();
        let sum: f64 = values.iter().sum();
        let sum_sq: f64 = values.iter().map(|v| v * v).sum();

        let mean = (count > 0).then(|| sum / count as f64);

        let median = if count == 0 {
            None
        } else {
            let mut sorted = values.to_vec();
            sorted.sort_by(f64::total_cmp);
            let mid = count / 2;
            Some(if count % 2 == 0 {
                (sorted[mid - 1] + sorted[mid]) / 2.0
            } else {
                sorted[mid]
            })
        };

        MultipleStats {
            count,
            mean,
            median,
            std_dev: sample_std_dev(count, sum, sum_sq),
            sum,
            sum_sq,
        }
    }

    /// Distance of `value` from the rest of the group, in standard deviations.
    /// When `value` is itself a member it is taken out first, so one outlier
    /// cannot hide behind the dispersion it causes. None below `min_peers`
    /// other values or when the others do not vary.
    pub fn z_score(&self, value: f64, is_member: bool, min_peers: usize) -> Option<f64> {
        let (n, sum, sum_sq) = if is_member {
            (self.count.checked_sub(1)?, self.sum - value, self.sum_sq - value * value)
        } else {
            (self.count, self.sum, self.sum_sq)
        };

        if n < min_peers.max(2) {
            return None;
        }

        let mean = sum / n as f64;
        let std_dev = sample_std_dev(n, sum, sum_sq)?;
        if std_dev <= f64::EPSILON * mean.abs().max(1.0) {
            return None;
        }
        Some((value - mean) / std_dev)
    }
}

fn sample_std_dev(n: usize, sum: f64, sum_sq: f64) -> Option<f64> {
    if n < 2 {
        return None;
    }
    let mean = sum / n as f64;
    let variance = ((sum_sq - n as f64 * mean * mean) / (n as f64 - 1.0)).max(0.0);
    Some(variance.sqrt())
}

// ============================================================================
// PEER GROUP
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeerGroupStats {
    pub fiscal_year: i32,
    pub members: BTreeSet<String>,
    pub multiples: BTreeMap<Multiple, MultipleStats>,
}

impl PeerGroupStats {
    pub fn compute<'a, I>(records: I, basis: &EvBasis, fiscal_year: i32) -> Self
    where
        I: IntoIterator<Item = (&'a Peer, &'a PeerFields)>,
    {
        let mut members = BTreeSet::new();
        let mut values: BTreeMap<Multiple, Vec<f64>> = BTreeMap::new();

        for (peer, fields) in records {
            members.insert(peer.id.clone());
            for multiple in Multiple::ALL {
                if let Some(v) = basis.multiple(fields, multiple, fiscal_year) {
                    if v.is_finite() {
                        values.entry(multiple).or_default().push(v);
                    }
                }
            }
        }

        let multiples = Multiple::ALL
            .iter()
            .map(|m| {
                let vals = values.get(m).map(Vec::as_slice).unwrap_or(&[]);
                (*m, MultipleStats::from_values(vals))
            })
            .collect();

        PeerGroupStats {
            fiscal_year,
            members,
            multiples,
        }
    }

    pub fn includes(&self, peer: &Peer) -> bool {
        self.members.contains(&peer.id)
    }

    pub fn get(&self, multiple: Multiple) -> Option<&MultipleStats> {
        self.multiples.get(&multiple)
    }
}

/// Statistics for the whole universe and the flagged subsets
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupStats {
    pub all: PeerGroupStats,
    pub selected: PeerGroupStats,
    pub core: PeerGroupStats,
}

impl GroupStats {
    pub fn compute(records: &[(&Peer, &PeerFields)], basis: &EvBasis, fiscal_year: i32) -> Self {
        let subset = |keep: fn(&Peer) -> bool| {
            PeerGroupStats::compute(
                records.iter().copied().filter(|(peer, _)| keep(peer)),
                basis,
                fiscal_year,
            )
        };

        GroupStats {
            all: subset(|_| true),
            selected: subset(Peer::is_selected),
            core: subset(Peer::is_core),
        }
    }

    /// The population the scaling rule compares against
    pub fn qc_population(&self, selected_only: bool) -> &PeerGroupStats {
        if selected_only {
            &self.selected
        } else {
            &self.all
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_median_std_dev() {
        let stats = MultipleStats::from_values(&[8.0, 10.0, 12.0, 30.0]);

        assert_eq!(stats.count, 4);
        assert_eq!(stats.mean, Some(15.0));
        assert_eq!(stats.median, Some(11.0));
        assert!((stats.std_dev.unwrap() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_stats() {
        let stats = MultipleStats::from_values(&[]);
        assert_eq!(stats.count, 0);
        assert_eq!(stats.mean, None);
        assert_eq!(stats.median, None);
        assert_eq!(stats.std_dev, None);
    }

    #[test]
    fn test_z_score_excludes_member_itself() {
        let stats = MultipleStats::from_values(&[9.0, 10.0, 11.0, 10.0, 10.0, 100.0]);

        let z = stats.z_score(100.0, true, 4).unwrap();
        assert!(z > 100.0, "z = {}", z);

        let typical = stats.z_score(10.0, true, 4).unwrap();
        assert!(typical.abs() < 1.0);
    }

    #[test]
    fn test_z_score_needs_enough_peers() {
        let stats = MultipleStats::from_values(&[9.0, 10.0, 50.0]);
        assert_eq!(stats.z_score(50.0, true, 4), None);

        let flat = MultipleStats::from_values(&[10.0, 10.0, 10.0, 10.0, 10.0]);
        assert_eq!(flat.z_score(10.0, true, 4), None);
    }
}
