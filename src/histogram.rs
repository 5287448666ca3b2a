use crate::color::to_css_alpha;
use image::Rgba;
use serde::Serialize;

/// Number of AQI categories; categories are 1-based.
pub const AQI_BINS: usize = 10;

const ORIGINAL_COLOR: Rgba<u8> = Rgba([255, 99, 132, 255]);
const UPDATED_COLOR: Rgba<u8> = Rgba([54, 162, 235, 255]);

/// Counts of AQI categories 1..=10. Anything outside that range, or not a
/// whole number, is dropped without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AqiHistogram {
    counts: [u32; AQI_BINS],
}

impl AqiHistogram {
    pub fn from_categories<I: IntoIterator<Item = i64>>(categories: I) -> Self {
        let mut hist = AqiHistogram::default();
        for category in categories {
            hist.record(category);
        }
        hist
    }

    /// Bins values decoded from JSON, where categories arrive as floats.
    pub fn from_values<I: IntoIterator<Item = f64>>(values: I) -> Self {
        Self::from_categories(
            values
                .into_iter()
                .filter(|v| v.is_finite() && v.fract() == 0.0)
                .map(|v| v as i64),
        )
    }

    /// Returns whether the category landed in a bin.
    pub fn record(&mut self, category: i64) -> bool {
        if (1..=AQI_BINS as i64).contains(&category) {
            self.counts[(category - 1) as usize] += 1;
            true
        } else {
            false
        }
    }

    pub fn counts(&self) -> &[u32; AQI_BINS] {
        &self.counts
    }

    pub fn total(&self) -> u32 {
        self.counts.iter().sum()
    }

    pub fn labels() -> Vec<String> {
        (1..=AQI_BINS).map(|i| i.to_string()).collect()
    }
}

/// One bar series, shaped like a chart.js dataset.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartDataset {
    pub label: String,
    pub data: Vec<u32>,
    pub background_color: String,
    pub border_color: String,
    pub border_width: u32,
}

impl ChartDataset {
    fn from_histogram(label: String, hist: &AqiHistogram, color: Rgba<u8>) -> Self {
        ChartDataset {
            label,
            data: hist.counts().to_vec(),
            background_color: to_css_alpha(&color, 0.2),
            border_color: to_css_alpha(&color, 1.0),
            border_width: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartData {
    pub labels: Vec<String>,
    pub datasets: Vec<ChartDataset>,
}

impl ChartData {
    /// Fresh chart holding only the baseline histogram.
    pub fn baseline(aqi_property: &str, hist: &AqiHistogram) -> Self {
        ChartData {
            labels: AqiHistogram::labels(),
            datasets: vec![ChartDataset::from_histogram(
                format!("Original {aqi_property} count"),
                hist,
                ORIGINAL_COLOR,
            )],
        }
    }

    /// The same chart with every scenario series removed, or `None` when
    /// nothing but scenario series was on it.
    pub fn without_scenario(&self) -> Option<ChartData> {
        let datasets: Vec<ChartDataset> = self
            .datasets
            .iter()
            .filter(|d| d.label.starts_with("Original "))
            .cloned()
            .collect();
        (!datasets.is_empty()).then(|| ChartData {
            labels: self.labels.clone(),
            datasets,
        })
    }

    /// Baseline series (when there is one) followed by the scenario series.
    /// Earlier scenario series are replaced, not accumulated.
    pub fn with_scenario(previous: Option<&ChartData>, aqi_property: &str, hist: &AqiHistogram) -> Self {
        let mut datasets: Vec<ChartDataset> = previous
            .and_then(ChartData::without_scenario)
            .map(|chart| chart.datasets)
            .unwrap_or_default();
        datasets.push(ChartDataset::from_histogram(
            format!("Updated {aqi_property} count"),
            hist,
            UPDATED_COLOR,
        ));
        ChartData {
            labels: AqiHistogram::labels(),
            datasets,
        }
    }
}
