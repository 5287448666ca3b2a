use crate::scenario::ScenarioAdjustments;
use crate::types::Selection;
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::info;

/// Body of a `/generate-report` request: the dashboard's current selections.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRequest {
    pub selected_air_pollution: String,
    pub selected_feature_vector: String,
    pub selected_month: String,
    pub selected_day: String,
    pub selected_hour: String,
    pub changes: ScenarioAdjustments,
    pub slider_value: i32,
}

impl ReportRequest {
    pub fn from_parts(selection: &Selection, changes: &ScenarioAdjustments, slider_value: i32) -> Self {
        ReportRequest {
            selected_air_pollution: selection.pollutant.clone(),
            selected_feature_vector: selection.feature.clone(),
            selected_month: selection.month.to_string(),
            selected_day: selection.day.to_string(),
            selected_hour: selection.hour.to_string(),
            changes: changes.clone(),
            slider_value,
        }
    }
}

pub fn save_report(path: &Path, pdf: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create report directory: {:?}", parent))?;
    }
    fs::write(path, pdf).with_context(|| format!("Failed to write report: {:?}", path))?;
    info!("Saved {} byte report to {:?}", pdf.len(), path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_request_body_shape() {
        let mut changes = ScenarioAdjustments::new();
        changes.select("Bicycle Score", 10).unwrap();
        changes.select("Car and Taxi Score", -5).unwrap();
        let request = ReportRequest::from_parts(&Selection::default(), &changes, 15);

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["selectedAirPollution"], "no2");
        assert_eq!(json["selectedFeatureVector"], "Bicycle Score");
        assert_eq!(json["selectedMonth"], "1");
        assert_eq!(json["selectedDay"], "Friday");
        assert_eq!(json["selectedHour"], "08:00");
        assert_eq!(json["changes"]["Car and Taxi Score"], -5);
        assert_eq!(json["sliderValue"], 15);
    }

    #[test]
    fn test_save_report_creates_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reports").join("eii.pdf");
        save_report(&path, b"%PDF-1.4").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"%PDF-1.4");
    }
}
