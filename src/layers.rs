use crate::color::{ColorScale, Palette};
use crate::data::{DataError, Surface};
use geo::{BoundingRect, Contains, Geometry, Point, Rect};
use image::Rgba;
use rstar::{RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// The two map panels of the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PanelId {
    FeatureVector,
    AirPollution,
}

impl PanelId {
    pub const ALL: [PanelId; 2] = [PanelId::FeatureVector, PanelId::AirPollution];

    pub fn slug(self) -> &'static str {
        match self {
            PanelId::FeatureVector => "feature-vector",
            PanelId::AirPollution => "air-pollution",
        }
    }
}

impl fmt::Display for PanelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

impl FromStr for PanelId {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PanelId::ALL
            .into_iter()
            .find(|p| p.slug() == s)
            .ok_or_else(|| format!("unknown panel '{s}'"))
    }
}

#[derive(Debug, Error)]
pub enum LayerError {
    #[error("panel {0} already has a layer")]
    Occupied(PanelId),
    #[error("surface has no '{0}' values to scale")]
    NothingToScale(String),
    #[error(transparent)]
    Data(#[from] DataError),
}

// Bounding box of one cell, pointing back into the layer's cell list.
struct CellIndex {
    index: usize,
    aabb: AABB<[f64; 2]>,
}

impl RTreeObject for CellIndex {
    type Envelope = AABB<[f64; 2]>;
    fn envelope(&self) -> Self::Envelope {
        self.aabb
    }
}

/// A surface colored by one numeric property.
pub struct ChoroplethLayer {
    property: String,
    surface: Arc<Surface>,
    values: Vec<f64>,
    colors: Vec<Rgba<u8>>,
    scale: ColorScale,
    tree: RTree<CellIndex>,
    bounds: Option<Rect<f64>>,
}

impl fmt::Debug for ChoroplethLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChoroplethLayer")
            .field("property", &self.property)
            .field("cells", &self.values.len())
            .field("scale", &self.scale)
            .finish()
    }
}

impl ChoroplethLayer {
    /// Validates `property` on every cell and colors the surface with a
    /// min-max scale over its values.
    pub fn build(surface: Arc<Surface>, property: &str, palette: Palette) -> Result<Self, LayerError> {
        let values = surface.numeric_property(property)?;
        let scale = ColorScale::from_values(&values, palette)
            .ok_or_else(|| LayerError::NothingToScale(property.to_string()))?;
        Ok(Self::with_scale(surface, property, values, scale))
    }

    fn with_scale(surface: Arc<Surface>, property: &str, values: Vec<f64>, scale: ColorScale) -> Self {
        let colors = values.iter().map(|v| scale.color(*v)).collect();

        let mut bounds: Option<Rect<f64>> = None;
        let items: Vec<CellIndex> = surface
            .cells()
            .iter()
            .enumerate()
            .filter_map(|(index, cell)| {
                let rect = cell.geometry.as_ref()?.bounding_rect()?;
                bounds = Some(match bounds {
                    None => rect,
                    Some(b) => Rect::new(
                        geo::Coord {
                            x: b.min().x.min(rect.min().x),
                            y: b.min().y.min(rect.min().y),
                        },
                        geo::Coord {
                            x: b.max().x.max(rect.max().x),
                            y: b.max().y.max(rect.max().y),
                        },
                    ),
                });
                Some(CellIndex {
                    index,
                    aabb: AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
                })
            })
            .collect();

        ChoroplethLayer {
            property: property.to_string(),
            surface,
            values,
            colors,
            scale,
            tree: RTree::bulk_load(items),
            bounds,
        }
    }

    pub fn property(&self) -> &str {
        &self.property
    }

    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn colors(&self) -> &[Rgba<u8>] {
        &self.colors
    }

    pub fn scale(&self) -> &ColorScale {
        &self.scale
    }

    /// Bounding box over all drawable cells, in lon/lat.
    pub fn bounds(&self) -> Option<Rect<f64>> {
        self.bounds
    }

    /// Same cells recolored with another scale.
    pub fn rescaled(&self, scale: ColorScale) -> ChoroplethLayer {
        Self::with_scale(self.surface.clone(), &self.property, self.values.clone(), scale)
    }

    /// Index of the area cell covering `(lon, lat)`. Point cells are never hit.
    pub fn locate(&self, lon: f64, lat: f64) -> Option<usize> {
        let point = Point::new(lon, lat);
        let envelope = AABB::from_point([lon, lat]);
        self.tree
            .locate_in_envelope_intersecting(&envelope)
            .map(|c| c.index)
            .filter(|&i| match &self.surface.cells()[i].geometry {
                Some(Geometry::Polygon(p)) => p.contains(&point),
                Some(Geometry::MultiPolygon(mp)) => mp.contains(&point),
                Some(Geometry::Rect(r)) => r.contains(&point),
                _ => false,
            })
            .min()
    }

    /// Property value of the cell under `(lon, lat)`.
    pub fn value_at(&self, lon: f64, lat: f64) -> Option<f64> {
        self.locate(lon, lat).map(|i| self.values[i])
    }

    /// Color of the cell under `(lon, lat)`.
    pub fn color_at(&self, lon: f64, lat: f64) -> Option<Rgba<u8>> {
        self.locate(lon, lat).map(|i| self.colors[i])
    }
}

/// Layers currently presented on each panel.
#[derive(Debug, Default)]
pub struct LayerRegistry {
    layers: HashMap<PanelId, Arc<ChoroplethLayer>>,
}

impl LayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, panel: PanelId, layer: Arc<ChoroplethLayer>) -> Result<(), LayerError> {
        if self.layers.contains_key(&panel) {
            return Err(LayerError::Occupied(panel));
        }
        self.layers.insert(panel, layer);
        Ok(())
    }

    /// Installs `layer`, returning whatever it displaced.
    pub fn replace(&mut self, panel: PanelId, layer: Arc<ChoroplethLayer>) -> Option<Arc<ChoroplethLayer>> {
        self.layers.insert(panel, layer)
    }

    pub fn dispose(&mut self, panel: PanelId) -> Option<Arc<ChoroplethLayer>> {
        self.layers.remove(&panel)
    }

    pub fn get(&self, panel: PanelId) -> Option<&Arc<ChoroplethLayer>> {
        self.layers.get(&panel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::fixtures::pollution_grid;

    fn layer() -> ChoroplethLayer {
        let surface = Surface::from_geojson_str(&pollution_grid("no2", [10.0, 20.0, 30.0, 30.0], [1, 2, 3, 3])).unwrap();
        ChoroplethLayer::build(Arc::new(surface), "no2 Prediction mean", Palette::WhiteToRed).unwrap()
    }

    #[test]
    fn test_colors_follow_scale() {
        let layer = layer();
        assert_eq!(layer.colors()[0], Rgba([255, 255, 255, 255]));
        assert_eq!(layer.colors()[1], Rgba([255, 127, 127, 255]));
        assert_eq!(layer.colors()[2], Rgba([255, 0, 0, 255]));
    }

    #[test]
    fn test_locate_cells() {
        let layer = layer();
        assert_eq!(layer.locate(0.5, 50.5), Some(0));
        assert_eq!(layer.locate(1.5, 50.5), Some(1));
        assert_eq!(layer.value_at(0.5, 51.5), Some(30.0));
        assert_eq!(layer.value_at(5.0, 5.0), None);
    }

    #[test]
    fn test_bounds_cover_grid() {
        let b = layer().bounds().unwrap();
        assert_eq!((b.min().x, b.min().y, b.max().x, b.max().y), (0.0, 50.0, 2.0, 52.0));
    }

    #[test]
    fn test_build_rejects_missing_property() {
        let surface = Surface::from_geojson_str(&pollution_grid("no2", [1.0; 4], [1; 4])).unwrap();
        let err = ChoroplethLayer::build(Arc::new(surface), "o3 Prediction mean", Palette::WhiteToRed).unwrap_err();
        assert!(matches!(err, LayerError::Data(DataError::MissingProperty { index: 0, .. })));

        let empty = Arc::new(Surface::default());
        let err = ChoroplethLayer::build(empty, "no2 Prediction mean", Palette::WhiteToRed).unwrap_err();
        assert!(matches!(err, LayerError::NothingToScale(_)));
    }

    #[test]
    fn test_registry_lifecycle() {
        let mut registry = LayerRegistry::new();
        let a = Arc::new(layer());
        let b = Arc::new(layer());

        registry.create(PanelId::AirPollution, a.clone()).unwrap();
        assert!(matches!(
            registry.create(PanelId::AirPollution, b.clone()),
            Err(LayerError::Occupied(PanelId::AirPollution))
        ));

        let old = registry.replace(PanelId::AirPollution, b.clone()).unwrap();
        assert!(Arc::ptr_eq(&old, &a));
        assert!(Arc::ptr_eq(registry.get(PanelId::AirPollution).unwrap(), &b));
        assert!(registry.get(PanelId::FeatureVector).is_none());

        assert!(registry.dispose(PanelId::AirPollution).is_some());
        assert!(registry.dispose(PanelId::AirPollution).is_none());
    }

    #[test]
    fn test_panel_slugs() {
        assert_eq!("air-pollution".parse::<PanelId>().unwrap(), PanelId::AirPollution);
        assert!("map".parse::<PanelId>().is_err());
    }
}
