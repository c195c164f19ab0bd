//! Civil-time clock with a fixed UTC offset.
//!
//! All timestamps the coordinator writes come from one `Clock` so that
//! stored times are directly comparable without re-deriving timezones.

use chrono::{DateTime, FixedOffset, Utc};

use crate::error::{ControlError, Result};

#[derive(Debug, Clone, Copy)]
pub struct Clock {
    offset: FixedOffset,
}

impl Clock {
    /// Build a clock at a whole-hour offset east of UTC (negative for west).
    pub fn from_hours(hours: i32) -> Result<Self> {
        let offset = FixedOffset::east_opt(hours * 3600).ok_or_else(|| {
            ControlError::InvalidArgument(format!("utc offset out of range: {hours}"))
        })?;
        Ok(Self { offset })
    }

    pub fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.offset)
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }
}

impl Default for Clock {
    /// UTC+8, the offset the fleet's stream platform operates in.
    fn default() -> Self {
        Self {
            offset: FixedOffset::east_opt(8 * 3600).expect("+8h is a valid offset"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_offset_is_plus_eight() {
        let clock = Clock::default();
        assert_eq!(clock.offset().local_minus_utc(), 8 * 3600);
    }

    #[test]
    fn test_out_of_range_offset_rejected() {
        assert!(Clock::from_hours(8).is_ok());
        assert!(Clock::from_hours(-5).is_ok());
        assert!(Clock::from_hours(25).is_err());
    }

    #[test]
    fn test_now_carries_offset() {
        let clock = Clock::from_hours(8).unwrap();
        let now = clock.now();
        assert_eq!(now.offset().local_minus_utc(), 8 * 3600);
    }
}
