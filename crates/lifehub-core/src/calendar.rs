//! Calendar events, tasks and milestones.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of entries shown in each countdown group.
const COUNTDOWN_LIMIT: usize = 10;

/// Error returned when a stored enum value is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {kind}: {value}")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

/// Kind of calendar entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Task,
    Event,
    Milestone,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Event => "event",
            Self::Milestone => "milestone",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "task" => Ok(Self::Task),
            "event" => Ok(Self::Event),
            "milestone" => Ok(Self::Milestone),
            other => Err(ParseEnumError {
                kind: "event type",
                value: other.to_string(),
            }),
        }
    }
}

/// Priority of a calendar entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(ParseEnumError {
                kind: "priority",
                value: other.to_string(),
            }),
        }
    }
}

/// A stored calendar entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub date_time: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub priority: Priority,
    pub category: Option<String>,
    pub location: Option<String>,
    pub is_all_day: bool,
    pub reminder_minutes: Option<i32>,
    pub recurrence_pattern: Option<String>,
    pub recurrence_end_date: Option<DateTime<Utc>>,
    pub is_completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields accepted when creating or replacing a calendar entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCalendarEvent {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub date_time: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub priority: Priority,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub is_all_day: bool,
    #[serde(default)]
    pub reminder_minutes: Option<i32>,
    #[serde(default)]
    pub recurrence_pattern: Option<String>,
    #[serde(default)]
    pub recurrence_end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_completed: bool,
}

impl NewCalendarEvent {
    /// Creates an entry with the required fields; optional ones start empty.
    pub fn new(
        title: impl Into<String>,
        date_time: DateTime<Utc>,
        event_type: EventType,
        priority: Priority,
    ) -> Self {
        Self {
            title: title.into(),
            description: None,
            date_time,
            event_type,
            priority,
            category: None,
            location: None,
            is_all_day: false,
            reminder_minutes: None,
            recurrence_pattern: None,
            recurrence_end_date: None,
            is_completed: false,
        }
    }

    /// Checks the fields the database would otherwise reject.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.title.trim().is_empty() {
            return Err("title is required");
        }
        if self.reminder_minutes.is_some_and(|m| m < 0) {
            return Err("reminder_minutes must not be negative");
        }
        if let Some(end) = self.recurrence_end_date
            && end < self.date_time
        {
            return Err("recurrence_end_date is before date_time");
        }
        Ok(())
    }
}

/// Count of upcoming entries and how many of them are urgent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountdownStats {
    pub total: usize,
    pub urgent: usize,
}

/// The next entries of one kind plus their stats.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CountdownGroup {
    pub events: Vec<CalendarEvent>,
    pub stats: CountdownStats,
}

/// Countdown summary: open tasks and upcoming milestones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Countdown {
    pub todo_items: CountdownGroup,
    pub major_events: CountdownGroup,
}

/// Builds the countdown summary at `now`.
///
/// Tasks count when they are not completed and still ahead; they are urgent
/// within one day. Milestones count when still ahead; they are urgent within
/// seven days. Each group lists at most ten entries, soonest first.
pub fn build_countdown(events: &[CalendarEvent], now: DateTime<Utc>) -> Countdown {
    let todo = group(
        events
            .iter()
            .filter(|e| e.event_type == EventType::Task && !e.is_completed),
        now,
        Duration::days(1),
    );
    let major = group(
        events
            .iter()
            .filter(|e| e.event_type == EventType::Milestone),
        now,
        Duration::days(7),
    );
    Countdown {
        todo_items: todo,
        major_events: major,
    }
}

fn group<'a>(
    events: impl Iterator<Item = &'a CalendarEvent>,
    now: DateTime<Utc>,
    urgency: Duration,
) -> CountdownGroup {
    let mut upcoming: Vec<&CalendarEvent> = events.filter(|e| e.date_time > now).collect();
    upcoming.sort_by_key(|e| e.date_time);

    let urgent_before = now + urgency;
    let stats = CountdownStats {
        total: upcoming.len(),
        urgent: upcoming
            .iter()
            .filter(|e| e.date_time <= urgent_before)
            .count(),
    };

    CountdownGroup {
        events: upcoming
            .into_iter()
            .take(COUNTDOWN_LIMIT)
            .cloned()
            .collect(),
        stats,
    }
}
