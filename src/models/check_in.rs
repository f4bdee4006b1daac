//! Check-in model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::session::shift_minutes;
use super::CapacityStatus;

/// How a check-in was recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CheckInMethod {
    Qr,
    #[default]
    Manual,
}

impl CheckInMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Qr => "qr",
            Self::Manual => "manual",
        }
    }
}

impl std::fmt::Display for CheckInMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CheckInMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "qr" => Ok(Self::Qr),
            "manual" => Ok(Self::Manual),
            _ => Err(format!("Invalid check-in method: {}", s)),
        }
    }
}

/// Check-in entity
///
/// `is_late` is fixed when the row is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckIn {
    pub id: String,
    pub participant_id: String,
    pub session_id: String,
    pub method: CheckInMethod,
    pub check_in_time: DateTime<Utc>,
    pub is_late: bool,
    pub created_at: DateTime<Utc>,
}

/// A check-in strictly after `start_time + threshold_minutes` is late.
pub fn is_late(check_in_time: DateTime<Utc>, start_time: DateTime<Utc>, threshold_minutes: i64) -> bool {
    check_in_time > shift_minutes(start_time, threshold_minutes)
}

/// Check-in by participant id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCheckInInput {
    pub participant_id: String,
    pub session_id: String,
    #[serde(default)]
    pub method: CheckInMethod,
}

/// Check-in by badge scan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanCheckInInput {
    pub qr_code: String,
    pub session_id: String,
}

/// Successful admission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckInResult {
    pub check_in: CheckIn,
    pub capacity: CapacityStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    #[test]
    fn test_late_boundary() {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let threshold = start + Duration::minutes(15);

        assert!(!is_late(threshold - Duration::seconds(1), start, 15));
        assert!(!is_late(threshold, start, 15));
        assert!(is_late(threshold + Duration::seconds(1), start, 15));
    }

    #[test]
    fn test_late_near_end_of_time() {
        let start = DateTime::<Utc>::MAX_UTC - Duration::minutes(1);
        assert!(!is_late(DateTime::<Utc>::MAX_UTC, start, 15));
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!("QR".parse::<CheckInMethod>().unwrap(), CheckInMethod::Qr);
        assert_eq!(CheckInMethod::default(), CheckInMethod::Manual);
        assert!("badge".parse::<CheckInMethod>().is_err());
    }

    proptest! {
        #[test]
        fn late_flag_matches_offset(offset_secs in -7200i64..7200, threshold in 0i64..120) {
            let start = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
            let at = start + Duration::seconds(offset_secs);
            prop_assert_eq!(is_late(at, start, threshold), offset_secs > threshold * 60);
        }
    }
}
