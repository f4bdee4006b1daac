//! Session model

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Fraction of capacity at which a session counts as nearly full
pub const NEAR_CAPACITY_PERCENT: f64 = 80.0;

/// Session lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    #[default]
    Scheduled,
    Open,
    Ended,
}

impl SessionStatus {
    /// Value of the `is_open` column that accompanies this status
    pub fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "SCHEDULED",
            Self::Open => "OPEN",
            Self::Ended => "ENDED",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "SCHEDULED" => Ok(Self::Scheduled),
            "OPEN" => Ok(Self::Open),
            "ENDED" => Ok(Self::Ended),
            _ => Err(format!("Invalid session status: {}", s)),
        }
    }
}

/// Session entity
///
/// `check_ins_count` is only ever written by capacity admission and
/// reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub name: String,
    /// `None` or a non-positive value means unlimited
    pub capacity: Option<i64>,
    pub capacity_enforced: bool,
    pub check_ins_count: i64,
    pub status: SessionStatus,
    pub is_open: bool,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub auto_open_minutes_before: Option<i64>,
    pub auto_end_grace_minutes: Option<i64>,
    pub late_threshold_minutes: Option<i64>,
    pub requires_registration: bool,
    /// Last time admission or reconciliation touched `check_ins_count`
    pub counter_updated_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Capacity with "unlimited" normalised to 0
    pub fn effective_capacity(&self) -> i64 {
        self.capacity.filter(|c| *c > 0).unwrap_or(0)
    }

    /// Whether admissions are bounded by capacity
    pub fn enforces_capacity(&self) -> bool {
        self.capacity_enforced && self.effective_capacity() > 0
    }

    /// Late threshold in minutes, falling back to `default`
    pub fn late_threshold(&self, default: i64) -> i64 {
        self.late_threshold_minutes.unwrap_or(default)
    }

    /// Instant from which the scheduler may open this session
    pub fn auto_open_at(&self, default_minutes_before: i64) -> DateTime<Utc> {
        let minutes = self.auto_open_minutes_before.unwrap_or(default_minutes_before);
        shift_minutes(self.start_time, minutes.saturating_neg())
    }

    /// Instant from which the scheduler may end this session
    ///
    /// Negative grace is treated as zero.
    pub fn auto_end_at(&self, default_grace_minutes: i64) -> DateTime<Utc> {
        let grace = self.auto_end_grace_minutes.unwrap_or(default_grace_minutes).max(0);
        shift_minutes(self.end_time, grace)
    }
}

/// `at` moved by `minutes`, clamped to the representable range
pub fn shift_minutes(at: DateTime<Utc>, minutes: i64) -> DateTime<Utc> {
    Duration::try_minutes(minutes)
        .and_then(|offset| at.checked_add_signed(offset))
        .unwrap_or(if minutes < 0 {
            DateTime::<Utc>::MIN_UTC
        } else {
            DateTime::<Utc>::MAX_UTC
        })
}

/// Input for creating a new session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionInput {
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub capacity: Option<i64>,
    #[serde(default = "default_true")]
    pub capacity_enforced: bool,
    #[serde(default)]
    pub auto_open_minutes_before: Option<i64>,
    #[serde(default)]
    pub auto_end_grace_minutes: Option<i64>,
    #[serde(default)]
    pub late_threshold_minutes: Option<i64>,
    #[serde(default)]
    pub requires_registration: bool,
}

fn default_true() -> bool {
    true
}

impl CreateSessionInput {
    pub fn new(name: impl Into<String>, start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            start_time,
            end_time,
            capacity: None,
            capacity_enforced: true,
            auto_open_minutes_before: None,
            auto_end_grace_minutes: None,
            late_threshold_minutes: None,
            requires_registration: false,
        }
    }

    pub fn with_capacity(mut self, capacity: i64) -> Self {
        self.capacity = Some(capacity);
        self
    }
}

/// Occupancy snapshot returned with every admission
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CapacityStatus {
    /// 0 means unlimited
    pub capacity: i64,
    pub check_ins_count: i64,
    /// -1 means unlimited
    pub remaining: i64,
    pub percent_full: f64,
    pub is_at_capacity: bool,
    pub is_near_capacity: bool,
    pub capacity_enforced: bool,
}

impl CapacityStatus {
    pub fn new(capacity: Option<i64>, check_ins_count: i64, capacity_enforced: bool) -> Self {
        let capacity = capacity.filter(|c| *c > 0).unwrap_or(0);

        if capacity == 0 {
            return Self {
                capacity,
                check_ins_count,
                remaining: -1,
                percent_full: 0.0,
                is_at_capacity: false,
                is_near_capacity: false,
                capacity_enforced,
            };
        }

        let percent_full = (check_ins_count as f64 / capacity as f64 * 100.0 * 100.0).round() / 100.0;
        Self {
            capacity,
            check_ins_count,
            remaining: (capacity - check_ins_count).max(0),
            percent_full,
            is_at_capacity: check_ins_count >= capacity,
            is_near_capacity: percent_full >= NEAR_CAPACITY_PERCENT,
            capacity_enforced,
        }
    }

    pub fn for_session(session: &Session) -> Self {
        Self::new(session.capacity, session.check_ins_count, session.capacity_enforced)
    }
}

/// Check-in statistics for a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub total: i64,
    pub on_time: i64,
    pub late: i64,
    pub qr: i64,
    pub manual: i64,
}
