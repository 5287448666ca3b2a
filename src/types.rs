use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("month must be between 1 and 12, got '{0}'")]
    Month(String),
    #[error("unknown day of week '{0}'")]
    Day(String),
    #[error("hour must be between 00:00 and 23:00, got '{0}'")]
    Hour(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Month(u8);

impl Month {
    pub fn new(month: u8) -> Result<Self, SelectionError> {
        if (1..=12).contains(&month) {
            Ok(Month(month))
        } else {
            Err(SelectionError::Month(month.to_string()))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl FromStr for Month {
    type Err = SelectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let month: u8 = s
            .trim()
            .parse()
            .map_err(|_| SelectionError::Month(s.to_string()))?;
        Month::new(month)
    }
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for Month {
    type Error = SelectionError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Month> for String {
    fn from(m: Month) -> String {
        m.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl Weekday {
    pub const ALL: [Weekday; 7] = [
        Weekday::Monday,
        Weekday::Tuesday,
        Weekday::Wednesday,
        Weekday::Thursday,
        Weekday::Friday,
        Weekday::Saturday,
        Weekday::Sunday,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Weekday::Monday => "Monday",
            Weekday::Tuesday => "Tuesday",
            Weekday::Wednesday => "Wednesday",
            Weekday::Thursday => "Thursday",
            Weekday::Friday => "Friday",
            Weekday::Saturday => "Saturday",
            Weekday::Sunday => "Sunday",
        }
    }
}

impl FromStr for Weekday {
    type Err = SelectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Weekday::ALL
            .into_iter()
            .find(|d| d.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| SelectionError::Day(s.to_string()))
    }
}

impl fmt::Display for Weekday {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<String> for Weekday {
    type Error = SelectionError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Weekday> for String {
    fn from(d: Weekday) -> String {
        d.name().to_string()
    }
}

/// Whole hour of the day, rendered on the wire as `HH:00`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HourOfDay(u8);

impl HourOfDay {
    pub fn new(hour: u8) -> Result<Self, SelectionError> {
        if hour < 24 {
            Ok(HourOfDay(hour))
        } else {
            Err(SelectionError::Hour(hour.to_string()))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl FromStr for HourOfDay {
    type Err = SelectionError;

    // Accepts "08:00" as well as a bare "8"; minutes other than 00 are rejected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || SelectionError::Hour(s.to_string());
        let trimmed = s.trim();
        let (hour, minutes) = match trimmed.split_once(':') {
            Some((h, m)) => (h, Some(m)),
            None => (trimmed, None),
        };
        if let Some(m) = minutes {
            if m != "00" {
                return Err(err());
            }
        }
        let hour: u8 = hour.parse().map_err(|_| err())?;
        HourOfDay::new(hour).map_err(|_| err())
    }
}

impl fmt::Display for HourOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:00", self.0)
    }
}

impl TryFrom<String> for HourOfDay {
    type Error = SelectionError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<HourOfDay> for String {
    fn from(h: HourOfDay) -> String {
        h.to_string()
    }
}

/// What the user currently has picked in the dashboard controls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Selection {
    pub pollutant: String,
    pub feature: String,
    pub month: Month,
    pub day: Weekday,
    pub hour: HourOfDay,
}

impl Default for Selection {
    fn default() -> Self {
        Selection {
            pollutant: "no2".to_string(),
            feature: "Bicycle Score".to_string(),
            month: Month(1),
            day: Weekday::Friday,
            hour: HourOfDay(8),
        }
    }
}

/// Query for one of the GeoJSON surface endpoints.
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceQuery {
    pub data_type: String,
    pub month: Month,
    pub day: Weekday,
    pub hour: HourOfDay,
}

impl SurfaceQuery {
    pub fn query_pairs(&self) -> [(&'static str, String); 4] {
        [
            ("dataType", self.data_type.clone()),
            ("month", self.month.to_string()),
            ("day", self.day.to_string()),
            ("hour", self.hour.to_string()),
        ]
    }
}

/// Query for the scenario re-prediction endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictRequest {
    pub changes: String,
    pub air_pollutant: String,
    pub month: Month,
    pub day: Weekday,
    pub hour: HourOfDay,
}

impl PredictRequest {
    pub fn query_pairs(&self) -> [(&'static str, String); 5] {
        [
            ("changes", self.changes.clone()),
            ("air_pollutant", self.air_pollutant.clone()),
            ("month", self.month.to_string()),
            ("day", self.day.to_string()),
            ("hour", self.hour.to_string()),
        ]
    }
}

impl Selection {
    pub fn feature_vector_query(&self) -> SurfaceQuery {
        SurfaceQuery {
            data_type: self.feature.clone(),
            month: self.month,
            day: self.day,
            hour: self.hour,
        }
    }

    pub fn air_pollution_query(&self) -> SurfaceQuery {
        SurfaceQuery {
            data_type: self.pollutant.clone(),
            month: self.month,
            day: self.day,
            hour: self.hour,
        }
    }

    pub fn predict_request(&self, changes: String) -> PredictRequest {
        PredictRequest {
            changes,
            air_pollutant: self.pollutant.clone(),
            month: self.month,
            day: self.day,
            hour: self.hour,
        }
    }
}
