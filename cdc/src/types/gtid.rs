use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::bail;
use crate::error::{CdcError, ErrorKind};

/// A set of executed transaction identifiers, as printed by `SELECT @@gtid_executed`.
///
/// Intervals are inclusive and kept sorted and merged per server uuid.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GtidSet {
    intervals: BTreeMap<String, Vec<(u64, u64)>>,
}

impl GtidSet {
    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// Adds `start..=end` for `uuid`, merging with adjacent or overlapping intervals.
    pub fn add_interval(&mut self, uuid: &str, start: u64, end: u64) {
        let intervals = self.intervals.entry(uuid.to_lowercase()).or_default();
        intervals.push((start.min(end), start.max(end)));
        intervals.sort_unstable();

        let mut merged: Vec<(u64, u64)> = Vec::with_capacity(intervals.len());
        for &(start, end) in intervals.iter() {
            match merged.last_mut() {
                Some(last) if start <= last.1.saturating_add(1) => last.1 = last.1.max(end),
                _ => merged.push((start, end)),
            }
        }
        *intervals = merged;
    }

    /// Returns `true` when every transaction of this set is also part of `other`.
    pub fn is_contained_within(&self, other: &GtidSet) -> bool {
        self.intervals.iter().all(|(uuid, intervals)| {
            let Some(other_intervals) = other.intervals.get(uuid) else {
                return false;
            };

            intervals.iter().all(|&(start, end)| {
                other_intervals
                    .iter()
                    .any(|&(other_start, other_end)| other_start <= start && end <= other_end)
            })
        })
    }
}

impl FromStr for GtidSet {
    type Err = CdcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut set = GtidSet::default();

        for entry in s.split(',').map(str::trim).filter(|entry| !entry.is_empty()) {
            let mut parts = entry.split(':');
            let uuid = parts.next().unwrap_or_default().trim();
            if uuid.is_empty() {
                bail!(ErrorKind::ConversionError, "Invalid GTID set", entry);
            }

            let mut has_interval = false;
            for interval in parts {
                let (start, end) = match interval.split_once('-') {
                    Some((start, end)) => (start.trim().parse()?, end.trim().parse()?),
                    None => {
                        let single = interval.trim().parse()?;
                        (single, single)
                    }
                };
                set.add_interval(uuid, start, end);
                has_interval = true;
            }

            if !has_interval {
                bail!(ErrorKind::ConversionError, "GTID set entry has no interval", entry);
            }
        }

        Ok(set)
    }
}

impl fmt::Display for GtidSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (uuid, intervals) in &self.intervals {
            if !first {
                f.write_str(",")?;
            }
            first = false;

            f.write_str(uuid)?;
            for (start, end) in intervals {
                if start == end {
                    write!(f, ":{start}")?;
                } else {
                    write!(f, ":{start}-{end}")?;
                }
            }
        }

        Ok(())
    }
}
