use crate::error::DefinitionError;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::fmt;

/// Closure schedule of one chamber. Offsets are seconds from `start_time` and always
/// satisfy `0 <= close < open < end`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CycleDefinition {
    chamber_id: String,
    start_time: DateTime<Utc>,
    close_offset: i64,
    open_offset: i64,
    end_offset: i64,
}

impl CycleDefinition {
    pub fn new(
        chamber_id: impl Into<String>,
        start_time: DateTime<Utc>,
        close_offset: i64,
        open_offset: i64,
        end_offset: i64,
    ) -> Result<Self, DefinitionError> {
        let chamber_id = chamber_id.into();
        if chamber_id.trim().is_empty() {
            return Err(DefinitionError::EmptyChamber);
        }
        if !(0 <= close_offset && close_offset < open_offset && open_offset < end_offset) {
            return Err(DefinitionError::BadOffsets {
                close: close_offset,
                open: open_offset,
                end: end_offset,
            });
        }
        Ok(Self { chamber_id, start_time, close_offset, open_offset, end_offset })
    }

    pub fn chamber_id(&self) -> &str {
        &self.chamber_id
    }
    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }
    pub fn start_ts(&self) -> i64 {
        self.start_time.timestamp()
    }
    pub fn close_offset(&self) -> i64 {
        self.close_offset
    }
    pub fn open_offset(&self) -> i64 {
        self.open_offset
    }
    pub fn end_offset(&self) -> i64 {
        self.end_offset
    }

    /// Expected length of the closed period in seconds.
    pub fn closed_duration(&self) -> i64 {
        self.open_offset - self.close_offset
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        self.start_time + Duration::seconds(self.end_offset)
    }

    /// Same schedule with a different end offset, still subject to the offset ordering.
    pub fn with_end_offset(&self, end_offset: i64) -> Result<Self, DefinitionError> {
        Self::new(
            self.chamber_id.clone(),
            self.start_time,
            self.close_offset,
            self.open_offset,
            end_offset,
        )
    }
}

impl fmt::Display for CycleDefinition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "chamber {} at {} ({}/{}/{})",
            self.chamber_id,
            self.start_time.format("%Y-%m-%d %H:%M:%S"),
            self.close_offset,
            self.open_offset,
            self.end_offset
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 12, 10, 0, 0).unwrap()
    }

    #[test]
    fn accepts_ordered_offsets() {
        let def = CycleDefinition::new("1", start(), 60, 700, 900).unwrap();
        assert_eq!(def.closed_duration(), 640);
        assert_eq!(def.end_time() - def.start_time(), Duration::seconds(900));
        // close may sit right at the start
        assert!(CycleDefinition::new("1", start(), 0, 1, 2).is_ok());
    }

    #[test]
    fn rejects_broken_ordering() {
        for (c, o, e) in [(-1, 700, 900), (700, 700, 900), (60, 900, 900), (60, 700, 600)] {
            assert_eq!(
                CycleDefinition::new("1", start(), c, o, e),
                Err(DefinitionError::BadOffsets { close: c, open: o, end: e })
            );
        }
    }

    #[test]
    fn rejects_empty_chamber() {
        assert_eq!(
            CycleDefinition::new("  ", start(), 60, 700, 900),
            Err(DefinitionError::EmptyChamber)
        );
    }

    #[test]
    fn end_nudge_keeps_invariant() {
        let def = CycleDefinition::new("1", start(), 60, 700, 900).unwrap();
        assert_eq!(def.with_end_offset(960).unwrap().end_offset(), 960);
        assert!(def.with_end_offset(700).is_err());
    }
}
