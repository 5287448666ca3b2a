//! Min-max choropleth color scaling.
//!
//! A [`ColorScale`] maps a value to its position between the minimum and
//! maximum of a set of values, and a [`Palette`] turns that position into an
//! RGBA color by linear interpolation between two endpoint colors.

use image::Rgba;
use serde::{Deserialize, Serialize};

const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);

/// Gradient direction for a choropleth panel, named low end first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Palette {
    WhiteToRed,
    WhiteToBlue,
    RedToBlue,
}

impl Palette {
    pub fn endpoints(self) -> (Rgba<u8>, Rgba<u8>) {
        match self {
            Palette::WhiteToRed => (WHITE, RED),
            Palette::WhiteToBlue => (WHITE, BLUE),
            Palette::RedToBlue => (RED, BLUE),
        }
    }

    /// Color at `ratio` along the gradient. Each channel is
    /// `floor(low + (high - low) * ratio)`; the ratio is clamped to [0, 1]
    /// and a NaN ratio maps to the low end.
    pub fn color_at(self, ratio: f64) -> Rgba<u8> {
        let ratio = if ratio.is_nan() { 0.0 } else { ratio.clamp(0.0, 1.0) };
        let (low, high) = self.endpoints();
        let mut out = [0u8; 4];
        for (i, channel) in out.iter_mut().enumerate() {
            let lo = low.0[i] as f64;
            let hi = high.0[i] as f64;
            *channel = (lo + (hi - lo) * ratio).floor().clamp(0.0, 255.0) as u8;
        }
        Rgba(out)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorScale {
    min: f64,
    max: f64,
    palette: Palette,
}

impl ColorScale {
    /// Scale spanning the finite values in `values`. Returns `None` when there
    /// is no finite value to span.
    pub fn from_values(values: &[f64], palette: Palette) -> Option<Self> {
        let (min, max) = finite_range(values.iter().copied())?;
        Some(ColorScale { min, max, palette })
    }

    /// Scale spanning several value sets at once, so that panels drawn with
    /// it are directly comparable.
    pub fn spanning(sets: &[&[f64]], palette: Palette) -> Option<Self> {
        let (min, max) = finite_range(sets.iter().flat_map(|s| s.iter().copied()))?;
        Some(ColorScale { min, max, palette })
    }

    pub fn with_palette(self, palette: Palette) -> Self {
        ColorScale { palette, ..self }
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn palette(&self) -> Palette {
        self.palette
    }

    /// Position of `value` in [min, max], clamped to [0, 1].
    ///
    /// A degenerate scale (every value equal) has no span, so every value
    /// sits at ratio 0 rather than producing NaN or infinite channels.
    pub fn ratio(&self, value: f64) -> f64 {
        let span = self.max - self.min;
        if !(span > 0.0) || !value.is_finite() {
            return 0.0;
        }
        ((value - self.min) / span).clamp(0.0, 1.0)
    }

    pub fn color(&self, value: f64) -> Rgba<u8> {
        self.palette.color_at(self.ratio(value))
    }
}

fn finite_range(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    values
        .filter(|v| v.is_finite())
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

/// CSS `rgb(r, g, b)` string for a color, as chart and map styles expect.
pub fn to_css(color: &Rgba<u8>) -> String {
    format!("rgb({}, {}, {})", color.0[0], color.0[1], color.0[2])
}

/// CSS `rgba(r, g, b, a)` with an explicit alpha in [0, 1].
pub fn to_css_alpha(color: &Rgba<u8>, alpha: f64) -> String {
    format!(
        "rgba({}, {}, {}, {})",
        color.0[0],
        color.0[1],
        color.0[2],
        alpha.clamp(0.0, 1.0)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_extremes_map_to_endpoints() {
        let values = [3.0, 9.5, -2.0, 14.0];
        for palette in [Palette::WhiteToRed, Palette::WhiteToBlue, Palette::RedToBlue] {
            let scale = ColorScale::from_values(&values, palette).unwrap();
            let (low, high) = palette.endpoints();
            assert_eq!(scale.color(-2.0), low);
            assert_eq!(scale.color(14.0), high);
        }
    }

    #[test]
    fn test_mid_scale_color() {
        let scale = ColorScale::from_values(&[10.0, 20.0, 30.0], Palette::WhiteToRed).unwrap();
        assert_relative_eq!(scale.ratio(20.0), 0.5);
        // floor(255 * 0.5) on the fading channels
        assert_eq!(scale.color(20.0), Rgba([255, 127, 127, 255]));

        let scale = scale.with_palette(Palette::RedToBlue);
        assert_eq!(scale.color(20.0), Rgba([127, 0, 127, 255]));

        let scale = scale.with_palette(Palette::WhiteToBlue);
        assert_eq!(scale.color(20.0), Rgba([127, 127, 255, 255]));
    }

    #[test]
    fn test_degenerate_range_is_constant() {
        let scale = ColorScale::from_values(&[4.2, 4.2, 4.2], Palette::WhiteToRed).unwrap();
        assert_eq!(scale.ratio(4.2), 0.0);
        assert_eq!(scale.color(4.2), Rgba([255, 255, 255, 255]));
        assert_eq!(scale.color(100.0), Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn test_out_of_range_is_clamped() {
        let scale = ColorScale::from_values(&[0.0, 10.0], Palette::WhiteToBlue).unwrap();
        assert_eq!(scale.ratio(-5.0), 0.0);
        assert_eq!(scale.ratio(50.0), 1.0);
        assert_eq!(scale.color(f64::NAN), WHITE);
    }

    #[test]
    fn test_monotonic_in_value() {
        let values: Vec<f64> = (0..=100).map(|v| v as f64 * 0.37).collect();
        let scale = ColorScale::from_values(&values, Palette::WhiteToRed).unwrap();
        let mut prev = scale.color(values[0]);
        for v in &values[1..] {
            let c = scale.color(*v);
            // green and blue fade toward red
            assert!(c.0[1] <= prev.0[1]);
            assert!(c.0[2] <= prev.0[2]);
            assert_eq!(c.0[0], 255);
            prev = c;
        }
    }

    #[test]
    fn test_empty_or_non_finite_has_no_scale() {
        assert!(ColorScale::from_values(&[], Palette::WhiteToRed).is_none());
        assert!(ColorScale::from_values(&[f64::NAN, f64::INFINITY], Palette::WhiteToRed).is_none());
        let scale = ColorScale::from_values(&[f64::NAN, 2.0, 6.0], Palette::WhiteToRed).unwrap();
        assert_eq!((scale.min(), scale.max()), (2.0, 6.0));
    }

    #[test]
    fn test_spanning_covers_all_sets() {
        let a = [1.0, 5.0];
        let b = [3.0, 9.0];
        let scale = ColorScale::spanning(&[&a, &b], Palette::WhiteToRed).unwrap();
        assert_eq!((scale.min(), scale.max()), (1.0, 9.0));
    }

    #[test]
    fn test_css_strings() {
        assert_eq!(to_css(&Rgba([255, 127, 0, 255])), "rgb(255, 127, 0)");
        assert_eq!(to_css_alpha(&Rgba([54, 162, 235, 255]), 0.2), "rgba(54, 162, 235, 0.2)");
    }
}
