use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const MIN_PERCENT: i32 = -100;
pub const MAX_PERCENT: i32 = 100;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScenarioError {
    #[error("adjustment for '{feature}' must be between -100 and 100 percent, got {percent}")]
    PercentOutOfRange { feature: String, percent: i32 },
    #[error("feature name must not be empty")]
    EmptyFeature,
    #[error("malformed change '{0}', expected 'feature:percent'")]
    Malformed(String),
}

/// Percentage adjustments per feature, in the order features were first
/// selected. Selecting a feature again overwrites its value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScenarioAdjustments {
    entries: Vec<(String, i32)>,
}

impl ScenarioAdjustments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(&mut self, feature: &str, percent: i32) -> Result<(), ScenarioError> {
        let feature = feature.trim();
        if feature.is_empty() {
            return Err(ScenarioError::EmptyFeature);
        }
        if !(MIN_PERCENT..=MAX_PERCENT).contains(&percent) {
            return Err(ScenarioError::PercentOutOfRange {
                feature: feature.to_string(),
                percent,
            });
        }
        match self.entries.iter_mut().find(|(name, _)| name == feature) {
            Some(entry) => entry.1 = percent,
            None => self.entries.push((feature.to_string(), percent)),
        }
        Ok(())
    }

    pub fn get(&self, feature: &str) -> Option<i32> {
        self.entries
            .iter()
            .find(|(name, _)| name == feature)
            .map(|(_, pct)| *pct)
    }

    pub fn remove(&mut self, feature: &str) -> Option<i32> {
        let idx = self.entries.iter().position(|(name, _)| name == feature)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i32)> {
        self.entries.iter().map(|(name, pct)| (name.as_str(), *pct))
    }

    /// The `changes` query value the prediction service expects:
    /// `feature:percent` pairs joined by commas.
    pub fn to_query(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ScenarioAdjustments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, pct)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{name}:{pct}")?;
        }
        Ok(())
    }
}

impl FromStr for ScenarioAdjustments {
    type Err = ScenarioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut adjustments = ScenarioAdjustments::new();
        for part in s.split(',').filter(|p| !p.trim().is_empty()) {
            let (feature, percent) = parse_change(part)?;
            adjustments.select(&feature, percent)?;
        }
        Ok(adjustments)
    }
}

/// Parses one `feature:percent` entry. Feature names may contain spaces, so
/// the split is on the last colon.
pub fn parse_change(entry: &str) -> Result<(String, i32), ScenarioError> {
    let (feature, percent) = entry
        .rsplit_once(':')
        .ok_or_else(|| ScenarioError::Malformed(entry.to_string()))?;
    let percent: i32 = percent
        .trim()
        .parse()
        .map_err(|_| ScenarioError::Malformed(entry.to_string()))?;
    let feature = feature.trim();
    if feature.is_empty() {
        return Err(ScenarioError::EmptyFeature);
    }
    Ok((feature.to_string(), percent))
}

// Serialized as a JSON object keyed by feature, preserving selection order.
impl Serialize for ScenarioAdjustments {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, pct) in &self.entries {
            map.serialize_entry(name, pct)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reselect_overwrites() {
        let mut changes = ScenarioAdjustments::new();
        changes.select("Bicycle Score", 10).unwrap();
        changes.select("HGV Score", -5).unwrap();
        changes.select("Bicycle Score", 25).unwrap();

        assert_eq!(changes.len(), 2);
        assert_eq!(changes.get("Bicycle Score"), Some(25));
        assert_eq!(changes.to_query(), "Bicycle Score:25,HGV Score:-5");
    }

    #[test]
    fn test_each_feature_serialized_once() {
        let mut changes = ScenarioAdjustments::new();
        for pct in [-100, 0, 40, 100] {
            changes.select("Urban", pct).unwrap();
        }
        let query = changes.to_query();
        assert_eq!(query.matches("Urban:").count(), 1);
        assert_eq!(query, "Urban:100");
    }

    #[test]
    fn test_percent_range_enforced() {
        let mut changes = ScenarioAdjustments::new();
        assert_eq!(
            changes.select("Urban", 101),
            Err(ScenarioError::PercentOutOfRange {
                feature: "Urban".to_string(),
                percent: 101
            })
        );
        assert!(changes.select("Urban", -101).is_err());
        assert_eq!(changes.select("  ", 5), Err(ScenarioError::EmptyFeature));
        assert!(changes.is_empty());
    }

    #[test]
    fn test_empty_serializes_to_empty_string() {
        assert_eq!(ScenarioAdjustments::new().to_query(), "");
    }

    #[test]
    fn test_parse_round_trip_keeps_order() {
        let parsed: ScenarioAdjustments = "Car and Taxi Score:-5, NAEI SNAP 1 NOx:20".parse().unwrap();
        assert_eq!(parsed.to_query(), "Car and Taxi Score:-5,NAEI SNAP 1 NOx:20");
        assert!("Urban".parse::<ScenarioAdjustments>().is_err());
        assert!("Urban:lots".parse::<ScenarioAdjustments>().is_err());
    }

    #[test]
    fn test_remove_and_clear() {
        let mut changes: ScenarioAdjustments = "a:1,b:2".parse().unwrap();
        assert_eq!(changes.remove("a"), Some(1));
        assert_eq!(changes.remove("a"), None);
        changes.clear();
        assert!(changes.is_empty());
    }

    #[test]
    fn test_serializes_as_object() {
        let changes: ScenarioAdjustments = "Bicycle Score:10,Urban:-3".parse().unwrap();
        let json = serde_json::to_string(&changes).unwrap();
        assert_eq!(json, r#"{"Bicycle Score":10,"Urban":-3}"#);
    }
}
