//! Names the prediction service understands for pollutants and model covariates.

pub const AIR_POLLUTANTS: [&str; 5] = ["no2", "o3", "pm10", "pm2.5", "so2"];

const TRAFFIC_SCORES: [&str; 5] = [
    "Bicycle Score",
    "Car and Taxi Score",
    "Bus and Coach Score",
    "LGV Score",
    "HGV Score",
];

const WEATHER: [&str; 11] = [
    "100m_u_component_of_wind",
    "100m_v_component_of_wind",
    "10m_u_component_of_wind",
    "10m_v_component_of_wind",
    "2m_dewpoint_temperature",
    "2m_temperature",
    "boundary_layer_height",
    "downward_uv_radiation_at_the_surface",
    "instantaneous_10m_wind_gust",
    "surface_pressure",
    "total_column_rain_water",
];

const SATELLITE: [&str; 5] = ["S5P_NO2", "S5P_AAI", "S5P_CO", "S5P_HCHO", "S5P_O3"];

const ROAD_DISTANCE: [&str; 14] = [
    "residential",
    "footway",
    "service",
    "primary",
    "path",
    "cycleway",
    "tertiary",
    "secondary",
    "unclassified",
    "trunk",
    "track",
    "motorway",
    "pedestrian",
    "living_street",
];

const ROAD_LENGTH: [&str; 14] = [
    "cycleway",
    "footway",
    "living_street",
    "motorway",
    "path",
    "pedestrian",
    "primary",
    "residential",
    "secondary",
    "service",
    "tertiary",
    "track",
    "trunk",
    "unclassified",
];

const LAND_USE: [&str; 22] = [
    "No Land",
    "Broadleaved woodland",
    "Coniferous Woodland",
    "Arable and Horticulture",
    "Improved Grassland",
    "Neutral Grassland",
    "Calcareous Grassland",
    "Acid grassland",
    "Fen Marsh and Swamp",
    "Heather",
    "Heather grassland",
    "Bog",
    "Inland Rock",
    "Saltwater",
    "Freshwater",
    "Supra-littoral Rock",
    "Supra-littoral Sediment",
    "Littoral Rock",
    "Littoral sediment",
    "Saltmarsh",
    "Urban",
    "Suburban",
];

const NAEI_SPECIES: [&str; 7] = ["NOx", "CO", "SOx", "NH3", "NMVOC", "PM10", "PM25"];
const NAEI_SECTORS: u8 = 11;

/// All feature-vector covariate names, in the order the dashboard lists them.
pub fn feature_vector_names() -> Vec<String> {
    let mut names: Vec<String> = TRAFFIC_SCORES
        .iter()
        .chain(WEATHER.iter())
        .chain(SATELLITE.iter())
        .map(|s| s.to_string())
        .collect();

    names.extend(
        ROAD_DISTANCE
            .iter()
            .map(|road| format!("Road Infrastructure Distance {road}")),
    );
    names.extend(
        ROAD_LENGTH
            .iter()
            .map(|road| format!("Total Length {road}")),
    );
    names.extend(LAND_USE.iter().map(|s| s.to_string()));

    for species in NAEI_SPECIES {
        for sector in 1..=NAEI_SECTORS {
            names.push(format!("NAEI SNAP {sector} {species}"));
        }
    }
    names
}

pub fn is_known_pollutant(name: &str) -> bool {
    AIR_POLLUTANTS.contains(&name)
}

pub fn is_known_feature(name: &str) -> bool {
    feature_vector_names().iter().any(|n| n == name)
}
