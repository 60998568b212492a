//! Calendar of recurring events consumed by the event model component.

use crate::error::{ForecastError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named event window, inclusive at both ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub name: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Relative strength of this occurrence (defaults to 1).
    #[serde(default)]
    pub weight: Option<f64>,
}

impl CalendarEvent {
    pub fn new(name: impl Into<String>, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(ForecastError::InvalidParameter(
                "calendar event name must not be empty".to_string(),
            ));
        }
        if end < start {
            return Err(ForecastError::InvalidParameter(format!(
                "calendar event '{}' ends ({}) before it starts ({})",
                name, end, start
            )));
        }
        Ok(Self {
            name,
            start,
            end,
            weight: None,
        })
    }

    pub fn with_weight(mut self, weight: f64) -> Result<Self> {
        if !weight.is_finite() {
            return Err(ForecastError::InvalidParameter(format!(
                "calendar event '{}' has a non-finite weight",
                self.name
            )));
        }
        self.weight = Some(weight);
        Ok(self)
    }

    pub fn contains(&self, timestamp: &DateTime<Utc>) -> bool {
        *timestamp >= self.start && *timestamp <= self.end
    }

    pub fn effective_weight(&self) -> f64 {
        self.weight.unwrap_or(1.0)
    }
}

/// Immutable table of calendar events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventCalendar {
    events: Vec<CalendarEvent>,
}

impl EventCalendar {
    /// Build a calendar, validating every event.
    pub fn new(events: Vec<CalendarEvent>) -> Result<Self> {
        for event in &events {
            if event.name.is_empty() || event.end < event.start {
                return Err(ForecastError::InvalidParameter(format!(
                    "malformed calendar event '{}' ({} .. {})",
                    event.name, event.start, event.end
                )));
            }
            if event.weight.is_some_and(|w| !w.is_finite()) {
                return Err(ForecastError::InvalidParameter(format!(
                    "calendar event '{}' has a non-finite weight",
                    event.name
                )));
            }
        }
        Ok(Self { events })
    }

    pub fn events(&self) -> &[CalendarEvent] {
        &self.events
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Distinct event names in order of first appearance.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for event in &self.events {
            if !names.contains(&event.name) {
                names.push(event.name.clone());
            }
        }
        names
    }

    /// Summed weight of the occurrences of `name` that contain `timestamp`.
    pub fn indicator(&self, name: &str, timestamp: &DateTime<Utc>) -> f64 {
        self.events
            .iter()
            .filter(|e| e.name == name && e.contains(timestamp))
            .map(CalendarEvent::effective_weight)
            .sum()
    }

    /// Names of events with at least one occurrence touching `timestamps`.
    pub fn names_active_in(&self, timestamps: &[DateTime<Utc>]) -> Vec<String> {
        self.names()
            .into_iter()
            .filter(|name| timestamps.iter().any(|t| self.indicator(name, t) != 0.0))
            .collect()
    }
}
