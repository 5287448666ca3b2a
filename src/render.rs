use crate::config::RenderConfig;
use crate::histogram::ChartData;
use crate::layers::ChoroplethLayer;
use anyhow::{anyhow, Context, Result};
use geo::{Geometry, Rect};
use image::{ImageBuffer, Rgba, RgbaImage};
use rayon::prelude::*;
use std::f64::consts::PI;
use std::fs;
use std::path::Path;
use tracing::info;

// Web Mercator stops being finite at the poles.
const MAX_LAT: f64 = 85.051_128_78;
const PADDING: f64 = 0.02;
const GUTTER: u32 = 8;
const POINT_RADIUS: i64 = 1;

#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub width: u32,
    pub height: u32,
    pub fill_opacity: f64,
    pub background: Rgba<u8>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self::from_config(&RenderConfig::default())
    }
}

impl RenderOptions {
    pub fn from_config(config: &RenderConfig) -> Self {
        RenderOptions {
            width: config.width.max(1),
            height: config.height.max(1),
            fill_opacity: config.fill_opacity,
            background: Rgba([255, 255, 255, 255]),
        }
    }
}

/// Visible area in projected (Mercator) coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Extent {
    min_x: f64,
    min_y: f64,
    max_x: f64,
    max_y: f64,
}

impl Extent {
    /// Padded to the image aspect ratio so cells are not stretched.
    fn fit(bounds: Rect<f64>, width: u32, height: u32) -> Self {
        let (x0, y0) = project(bounds.min().x, bounds.min().y);
        let (x1, y1) = project(bounds.max().x, bounds.max().y);
        let (cx, cy) = ((x0 + x1) / 2.0, (y0 + y1) / 2.0);

        let mut w = (x1 - x0).max(1e-6) * (1.0 + 2.0 * PADDING);
        let mut h = (y1 - y0).max(1e-6) * (1.0 + 2.0 * PADDING);
        let aspect = width as f64 / height as f64;
        if w / h > aspect {
            h = w / aspect;
        } else {
            w = h * aspect;
        }

        Extent {
            min_x: cx - w / 2.0,
            min_y: cy - h / 2.0,
            max_x: cx + w / 2.0,
            max_y: cy + h / 2.0,
        }
    }

    fn union(a: Rect<f64>, b: Rect<f64>) -> Rect<f64> {
        Rect::new(
            geo::Coord {
                x: a.min().x.min(b.min().x),
                y: a.min().y.min(b.min().y),
            },
            geo::Coord {
                x: a.max().x.max(b.max().x),
                y: a.max().y.max(b.max().y),
            },
        )
    }

    /// Lon/lat at the center of pixel `(px, py)`.
    fn pixel_to_lon_lat(&self, px: u32, py: u32, width: u32, height: u32) -> (f64, f64) {
        let x = self.min_x + (px as f64 + 0.5) / width as f64 * (self.max_x - self.min_x);
        let y = self.max_y - (py as f64 + 0.5) / height as f64 * (self.max_y - self.min_y);
        unproject(x, y)
    }

    fn lon_lat_to_pixel(&self, lon: f64, lat: f64, width: u32, height: u32) -> (i64, i64) {
        let (x, y) = project(lon, lat);
        let px = (x - self.min_x) / (self.max_x - self.min_x) * width as f64;
        let py = (self.max_y - y) / (self.max_y - self.min_y) * height as f64;
        (px.floor() as i64, py.floor() as i64)
    }
}

fn project(lon: f64, lat: f64) -> (f64, f64) {
    let lat_rad = lat.clamp(-MAX_LAT, MAX_LAT).to_radians();
    (lon.to_radians(), (PI / 4.0 + lat_rad / 2.0).tan().ln())
}

fn unproject(x: f64, y: f64) -> (f64, f64) {
    (x.to_degrees(), (2.0 * y.exp().atan() - PI / 2.0).to_degrees())
}

fn blend(background: Rgba<u8>, fill: Rgba<u8>, alpha: f64) -> Rgba<u8> {
    let mut out = [0u8; 4];
    for (i, channel) in out.iter_mut().enumerate().take(3) {
        let v = background.0[i] as f64 * (1.0 - alpha) + fill.0[i] as f64 * alpha;
        *channel = v.round().clamp(0.0, 255.0) as u8;
    }
    out[3] = 255;
    Rgba(out)
}

/// Draws one layer filling the image.
pub fn render_layer(layer: &ChoroplethLayer, opts: &RenderOptions) -> Result<RgbaImage> {
    let bounds = layer
        .bounds()
        .ok_or_else(|| anyhow!("Layer '{}' has no drawable geometry", layer.property()))?;
    let extent = Extent::fit(bounds, opts.width, opts.height);
    Ok(render_in_extent(layer, &extent, opts))
}

/// Baseline and scenario side by side, sharing one extent so the panels line up.
pub fn render_comparison(left: &ChoroplethLayer, right: &ChoroplethLayer, opts: &RenderOptions) -> Result<RgbaImage> {
    let bounds = match (left.bounds(), right.bounds()) {
        (Some(a), Some(b)) => Extent::union(a, b),
        (Some(a), None) | (None, Some(a)) => a,
        (None, None) => return Err(anyhow!("Neither layer has drawable geometry")),
    };
    let extent = Extent::fit(bounds, opts.width, opts.height);

    let left_img = render_in_extent(left, &extent, opts);
    let right_img = render_in_extent(right, &extent, opts);

    let mut canvas: RgbaImage = ImageBuffer::from_pixel(opts.width * 2 + GUTTER, opts.height, opts.background);
    image::imageops::replace(&mut canvas, &left_img, 0, 0);
    image::imageops::replace(&mut canvas, &right_img, (opts.width + GUTTER) as i64, 0);
    Ok(canvas)
}

fn render_in_extent(layer: &ChoroplethLayer, extent: &Extent, opts: &RenderOptions) -> RgbaImage {
    let (width, height) = (opts.width, opts.height);
    let mut img: RgbaImage = ImageBuffer::from_pixel(width, height, opts.background);

    img.par_chunks_mut(width as usize * 4)
        .enumerate()
        .for_each(|(py, row)| {
            for px in 0..width {
                let (lon, lat) = extent.pixel_to_lon_lat(px, py as u32, width, height);
                if let Some(color) = layer.color_at(lon, lat) {
                    let pixel = blend(opts.background, color, opts.fill_opacity);
                    let offset = px as usize * 4;
                    row[offset..offset + 4].copy_from_slice(&pixel.0);
                }
            }
        });

    // Point cells are drawn as small squares on top of the areas.
    for (cell, color) in layer.surface().cells().iter().zip(layer.colors()) {
        let points: Vec<geo::Point<f64>> = match &cell.geometry {
            Some(Geometry::Point(p)) => vec![*p],
            Some(Geometry::MultiPoint(mp)) => mp.0.clone(),
            _ => continue,
        };
        let pixel = blend(opts.background, *color, opts.fill_opacity);
        for p in points {
            let (cx, cy) = extent.lon_lat_to_pixel(p.x(), p.y(), width, height);
            for dy in -POINT_RADIUS..=POINT_RADIUS {
                for dx in -POINT_RADIUS..=POINT_RADIUS {
                    let (x, y) = (cx + dx, cy + dy);
                    if x >= 0 && y >= 0 && (x as u32) < width && (y as u32) < height {
                        img.put_pixel(x as u32, y as u32, pixel);
                    }
                }
            }
        }
    }

    img
}

pub fn save_png(img: &RgbaImage, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("Failed to create output directory: {:?}", parent))?;
    }
    img.save(path).with_context(|| format!("Failed to save image: {:?}", path))?;
    info!("Wrote {}x{} image to {:?}", img.width(), img.height(), path);
    Ok(())
}

/// PNG bytes for serving over HTTP.
pub fn encode_png(img: &RgbaImage) -> Result<Vec<u8>> {
    let mut bytes = std::io::Cursor::new(Vec::new());
    img.write_to(&mut bytes, image::ImageFormat::Png)
        .context("Failed to encode PNG")?;
    Ok(bytes.into_inner())
}

pub fn write_chart_json(chart: &ChartData, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("Failed to create output directory: {:?}", parent))?;
    }
    let json = serde_json::to_string_pretty(chart)?;
    fs::write(path, json).with_context(|| format!("Failed to write chart: {:?}", path))?;
    info!("Wrote chart data to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Palette;
    use crate::data::fixtures::pollution_grid;
    use crate::data::Surface;
    use crate::histogram::AqiHistogram;
    use approx::assert_relative_eq;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn layer(values: [f64; 4], palette: Palette) -> ChoroplethLayer {
        let surface = Surface::from_geojson_str(&pollution_grid("no2", values, [1; 4])).unwrap();
        ChoroplethLayer::build(Arc::new(surface), "no2 Prediction mean", palette).unwrap()
    }

    fn opts() -> RenderOptions {
        RenderOptions {
            width: 64,
            height: 64,
            fill_opacity: 1.0,
            background: Rgba([255, 255, 255, 255]),
        }
    }

    #[test]
    fn test_projection_round_trip() {
        let (x, y) = project(-4.0, 54.5);
        let (lon, lat) = unproject(x, y);
        assert_relative_eq!(lon, -4.0, epsilon = 1e-9);
        assert_relative_eq!(lat, 54.5, epsilon = 1e-9);
    }

    #[test]
    fn test_blend() {
        let white = Rgba([255, 255, 255, 255]);
        assert_eq!(blend(white, Rgba([255, 0, 0, 255]), 0.5), Rgba([255, 128, 128, 255]));
        assert_eq!(blend(white, Rgba([0, 0, 255, 255]), 0.0), white);
    }

    #[test]
    fn test_render_layer_colors_cells() {
        let layer = layer([10.0, 20.0, 30.0, 30.0], Palette::WhiteToRed);
        let img = render_layer(&layer, &opts()).unwrap();
        assert_eq!(img.dimensions(), (64, 64));

        // The grid is taller than wide in Mercator, so it is centered
        // horizontally. Bottom-left is the minimum cell, top-right the maximum.
        assert_eq!(*img.get_pixel(20, 52), Rgba([255, 255, 255, 255]));
        assert_eq!(*img.get_pixel(44, 12), Rgba([255, 0, 0, 255]));
        assert_eq!(*img.get_pixel(44, 52), Rgba([255, 127, 127, 255]));
        // Padding outside the grid keeps the background.
        assert_eq!(*img.get_pixel(2, 32), Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn test_render_points() {
        let body = json!({
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "geometry": {"type": "Point", "coordinates": [0.0, 50.0]}, "properties": {"v": 1.0}},
                {"type": "Feature", "geometry": {"type": "Point", "coordinates": [1.0, 51.0]}, "properties": {"v": 2.0}}
            ]
        })
        .to_string();
        let surface = Surface::from_geojson_str(&body).unwrap();
        let layer = ChoroplethLayer::build(Arc::new(surface), "v", Palette::RedToBlue).unwrap();
        let img = render_layer(&layer, &opts()).unwrap();
        let blue = img.pixels().filter(|p| **p == Rgba([0, 0, 255, 255])).count();
        let red = img.pixels().filter(|p| **p == Rgba([255, 0, 0, 255])).count();
        assert!(blue > 0 && red > 0);
    }

    #[test]
    fn test_layer_without_geometry_is_an_error() {
        let body = r#"{"type":"FeatureCollection","features":[{"type":"Feature","geometry":null,"properties":{"v":1.0}}]}"#;
        let surface = Surface::from_geojson_str(body).unwrap();
        let layer = ChoroplethLayer::build(Arc::new(surface), "v", Palette::WhiteToRed).unwrap();
        assert!(render_layer(&layer, &opts()).is_err());
    }

    #[test]
    fn test_comparison_and_png_output() {
        let left = layer([1.0, 2.0, 3.0, 4.0], Palette::WhiteToRed);
        let right = layer([4.0, 3.0, 2.0, 1.0], Palette::WhiteToBlue);
        let img = render_comparison(&left, &right, &opts()).unwrap();
        assert_eq!(img.dimensions(), (64 * 2 + GUTTER, 64));

        let dir = tempdir().unwrap();
        let path = dir.path().join("panels").join("compare.png");
        save_png(&img, &path).unwrap();
        assert!(std::fs::metadata(&path).unwrap().len() > 0);

        let bytes = encode_png(&img).unwrap();
        assert_eq!(&bytes[1..4], b"PNG");
    }

    #[test]
    fn test_chart_json_written() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chart.json");
        let chart = ChartData::baseline("no2 AQI", &AqiHistogram::from_categories([1, 2, 2]));
        write_chart_json(&chart, &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("Original no2 AQI count"));
    }
}
