use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::bail;
use crate::error::{CdcError, ErrorKind};
use crate::types::GtidSet;

/// A coordinate in the source binlog.
///
/// File positions compare by file name, then by offset. When a GTID set is present it takes
/// precedence and ordering becomes set containment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BinlogPosition {
    file: String,
    offset: u64,
    gtid_set: Option<String>,
}

impl BinlogPosition {
    pub fn new(file: impl Into<String>, offset: u64) -> Self {
        Self {
            file: file.into(),
            offset,
            gtid_set: None,
        }
    }

    pub fn with_gtid_set(mut self, gtid_set: impl Into<String>) -> Self {
        self.gtid_set = Some(gtid_set.into());
        self
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn gtid_set(&self) -> Option<&str> {
        self.gtid_set.as_deref()
    }

    /// Returns `true` when `self` is strictly after `other`.
    ///
    /// For GTID positions this means `self` holds at least one transaction `other` does not. A
    /// GTID set that fails to parse falls back to file and offset comparison.
    pub fn newer_than(&self, other: &BinlogPosition) -> bool {
        if let (Some(ours), Some(theirs)) = (&self.gtid_set, &other.gtid_set) {
            if let (Ok(ours), Ok(theirs)) = (ours.parse::<GtidSet>(), theirs.parse::<GtidSet>()) {
                return !ours.is_contained_within(&theirs);
            }
        }

        match self.file.cmp(&other.file) {
            Ordering::Greater => true,
            Ordering::Equal => self.offset > other.offset,
            Ordering::Less => false,
        }
    }
}

impl fmt::Display for BinlogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.offset)?;
        if let Some(gtid_set) = &self.gtid_set {
            write!(f, "[{gtid_set}]")?;
        }

        Ok(())
    }
}

/// A resumable replication position: a binlog coordinate plus the last heartbeat value that was
/// read from the stream at that point.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    binlog: BinlogPosition,
    last_heartbeat_read: u64,
}

impl Position {
    pub fn new(binlog: BinlogPosition, last_heartbeat_read: u64) -> Self {
        Self {
            binlog,
            last_heartbeat_read,
        }
    }

    pub fn binlog(&self) -> &BinlogPosition {
        &self.binlog
    }

    pub fn last_heartbeat_read(&self) -> u64 {
        self.last_heartbeat_read
    }

    /// Derives a position at the same coordinate carrying `heartbeat`.
    pub fn with_heartbeat(&self, heartbeat: u64) -> Position {
        Position {
            binlog: self.binlog.clone(),
            last_heartbeat_read: heartbeat,
        }
    }

    /// Compares binlog coordinates only, heartbeat values do not order positions.
    pub fn newer_than(&self, other: &Position) -> bool {
        self.binlog.newer_than(&other.binlog)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (heartbeat {})", self.binlog, self.last_heartbeat_read)
    }
}

/// Parses `FILE:OFFSET[:HEARTBEAT]`.
impl FromStr for Position {
    type Err = CdcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        let (file, offset, heartbeat) = match parts.as_slice() {
            [file, offset] => (*file, offset.parse()?, 0),
            [file, offset, heartbeat] => (*file, offset.parse()?, heartbeat.parse()?),
            _ => bail!(
                ErrorKind::ConfigError,
                "Invalid position",
                detail = format!("Expected FILE:OFFSET[:HEARTBEAT], got `{s}`")
            ),
        };

        if file.is_empty() {
            bail!(ErrorKind::ConfigError, "Invalid position", "The file name is empty");
        }

        Ok(Position::new(BinlogPosition::new(file, offset), heartbeat))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UUID: &str = "3e11fa47-71ca-11e1-9e33-c80aa9429562";

    #[test]
    fn file_positions_order_by_file_then_offset() {
        let a = BinlogPosition::new("mysql-bin.000001", 500);
        let b = BinlogPosition::new("mysql-bin.000001", 900);
        let c = BinlogPosition::new("mysql-bin.000002", 4);

        assert!(b.newer_than(&a));
        assert!(!a.newer_than(&b));
        assert!(c.newer_than(&b));
        assert!(!a.newer_than(&a));
    }

    #[test]
    fn gtid_positions_order_by_containment() {
        let a = BinlogPosition::new("mysql-bin.000009", 100).with_gtid_set(format!("{UUID}:1-10"));
        let b = BinlogPosition::new("mysql-bin.000001", 4).with_gtid_set(format!("{UUID}:1-11"));

        assert!(b.newer_than(&a));
        assert!(!a.newer_than(&b));
    }

    #[test]
    fn parses_file_offset_and_heartbeat() {
        let position: Position = "mysql-bin.000003:120:9".parse().unwrap();

        assert_eq!(position.binlog().file(), "mysql-bin.000003");
        assert_eq!(position.binlog().offset(), 120);
        assert_eq!(position.last_heartbeat_read(), 9);
        assert!("mysql-bin.000003".parse::<Position>().is_err());
        assert!("mysql-bin.000003:abc".parse::<Position>().is_err());
    }

    #[test]
    fn heartbeat_does_not_affect_ordering() {
        let base = Position::new(BinlogPosition::new("mysql-bin.000001", 10), 0);
        let with_heartbeat = base.with_heartbeat(42);

        assert_eq!(with_heartbeat.last_heartbeat_read(), 42);
        assert_eq!(base.last_heartbeat_read(), 0);
        assert!(!with_heartbeat.newer_than(&base));
        assert!(!base.newer_than(&with_heartbeat));
    }
}
