// Data-driven project configuration.
//
// All tunable parameters live in `ProjectConfig`, loaded from a JSON
// settings tree at startup. The simulation core never uses magic numbers
// for site or process parameters — it reads from the config. Key paths
// mirror the project-file layout (`model.world.*`, `model.settings.*`,
// `model.site.*`, `system.settings.*`); unknown keys are rejected so a
// typo fails at load time instead of silently running with a default.
//
// The environment table (environment.rs) overrides single keys per
// resource unit through `apply_key`, which accepts the dotted key paths of
// the overridable subset (site and soil/permafrost parameters).

use serde::Deserialize;

use crate::error::SimError;

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct ProjectConfig {
    pub model: ModelConfig,
    pub system: SystemConfig,
}

impl ProjectConfig {
    pub fn from_json(json: &str) -> Result<Self, SimError> {
        let config: ProjectConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Range checks for site parameterization (`InvalidSite` on failure).
    pub fn validate(&self) -> Result<(), SimError> {
        let s = &self.model.settings;
        if s.light_extinction_coefficient <= 0.0 {
            return Err(SimError::InvalidSite("lightExtinctionCoefficient must be positive".into()));
        }
        if s.light_extinction_coefficient_opacity <= 0.0 {
            return Err(SimError::InvalidSite(
                "lightExtinctionCoefficientOpacity must be positive".into(),
            ));
        }
        if s.temperature_tau <= 0.0 {
            return Err(SimError::InvalidSite("temperatureTau must be positive".into()));
        }
        let soil = &s.soil;
        if soil.qb <= 0.0 || soil.qh <= 0.0 {
            return Err(SimError::InvalidSite("soil qb/qh must be positive".into()));
        }
        for (name, v) in [
            ("el", soil.el),
            ("er", soil.er),
            ("leaching", soil.leaching),
        ] {
            if v <= 0.0 || v > 1.0 {
                return Err(SimError::InvalidSite(format!("soil '{name}' must be in (0, 1]")));
            }
        }
        self.model.site.validate()?;
        Ok(())
    }

    /// Apply a per-resource-unit override addressed by its dotted settings
    /// key. Returns `Ok(false)` for keys that are not overridable.
    pub fn apply_key(&mut self, key: &str, value: &str) -> Result<bool, SimError> {
        let parse = |v: &str| -> Result<f64, SimError> {
            v.parse::<f64>()
                .map_err(|_| SimError::Config(format!("bad numeric value '{v}' for key '{key}'")))
        };
        let site = &mut self.model.site;
        let soil = &mut self.model.settings.soil;
        let pf = &mut self.model.settings.permafrost;
        match key {
            "model.site.pctSand" => site.pct_sand = parse(value)?,
            "model.site.pctClay" => site.pct_clay = parse(value)?,
            "model.site.soilDepth" => site.soil_depth = parse(value)?,
            "model.site.somDecompRate" => site.som_decomp_rate = parse(value)?,
            "model.site.soilHumificationRate" => site.soil_humification_rate = parse(value)?,
            "model.site.availableNitrogen" => site.available_nitrogen = parse(value)?,
            "model.site.youngLabileC" => site.young_labile_c = parse(value)?,
            "model.site.youngLabileN" => site.young_labile_n = parse(value)?,
            "model.site.youngLabileDecompRate" => site.young_labile_decomp_rate = parse(value)?,
            "model.site.youngRefractoryC" => site.young_refractory_c = parse(value)?,
            "model.site.youngRefractoryN" => site.young_refractory_n = parse(value)?,
            "model.site.youngRefractoryDecompRate" => {
                site.young_refractory_decomp_rate = parse(value)?
            }
            "model.site.somC" => site.som_c = parse(value)?,
            "model.site.somN" => site.som_n = parse(value)?,
            "model.settings.soil.qb" => soil.qb = parse(value)?,
            "model.settings.soil.qh" => soil.qh = parse(value)?,
            "model.settings.soil.leaching" => soil.leaching = parse(value)?,
            "model.settings.soil.el" => soil.el = parse(value)?,
            "model.settings.soil.er" => soil.er = parse(value)?,
            "model.settings.permafrost.initialDepthFrozen" => {
                pf.initial_depth_frozen = parse(value)?
            }
            "model.settings.permafrost.deepSoilTemperature" => {
                pf.deep_soil_temperature = parse(value)?
            }
            "model.settings.permafrost.organicLayerDefaultDepth" => {
                pf.organic_layer_default_depth = parse(value)?
            }
            _ => return Ok(false),
        }
        Ok(true)
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct ModelConfig {
    pub world: WorldConfig,
    pub settings: SettingsConfig,
    pub site: SiteConfig,
    pub time_events: Vec<TimeEventConfig>,
    pub management: ManagementConfig,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct WorldConfig {
    /// LIF cell size (m); the model is calibrated for 2 m.
    pub cell_size: f64,
    /// Project width (m).
    pub width: f64,
    /// Project height (m).
    pub height: f64,
    /// Buffer width around the project rectangle (m).
    pub buffer: f64,
    pub location: Option<LocationConfig>,
    pub resource_units_as_grid: bool,
    pub stand_grid: StandGridConfig,
    pub environment_enabled: bool,
    pub environment_file: String,
    /// "matrix" (x/y columns) or "grid" (id column + raster).
    pub environment_mode: String,
    pub environment_grid: String,
    /// Periodic 1-ha boundary for small-domain experiments.
    pub torus: bool,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            cell_size: 2.0,
            width: 100.0,
            height: 100.0,
            buffer: 60.0,
            location: None,
            resource_units_as_grid: true,
            stand_grid: StandGridConfig::default(),
            environment_enabled: false,
            environment_file: String::new(),
            environment_mode: "matrix".to_string(),
            environment_grid: String::new(),
            torus: false,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct LocationConfig {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub rotation: f64,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct StandGridConfig {
    pub enabled: bool,
    pub file_name: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct SettingsConfig {
    pub growth_enabled: bool,
    pub mortality_enabled: bool,
    pub carbon_cycle_enabled: bool,
    pub regeneration_enabled: bool,
    /// Beer-Lambert extinction for the stand-level interception fraction.
    pub light_extinction_coefficient: f64,
    /// Extinction used for the per-tree crown opacity.
    pub light_extinction_coefficient_opacity: f64,
    /// Time constant (days) for the delayed temperature response.
    pub temperature_tau: f64,
    pub light_response: LightResponseConfig,
    pub permafrost: PermafrostConfig,
    pub soil: SoilSettingsConfig,
    pub grass: GrassConfig,
    pub browsing: BrowsingConfig,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            growth_enabled: true,
            mortality_enabled: true,
            carbon_cycle_enabled: false,
            regeneration_enabled: false,
            light_extinction_coefficient: 0.5,
            light_extinction_coefficient_opacity: 0.6,
            temperature_tau: 5.0,
            light_response: LightResponseConfig::default(),
            permafrost: PermafrostConfig::default(),
            soil: SoilSettingsConfig::default(),
            grass: GrassConfig::default(),
            browsing: BrowsingConfig::default(),
        }
    }
}

/// The two ends of the light-response spectrum; a species interpolates by
/// its shade-tolerance class.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct LightResponseConfig {
    pub shade_intolerant: String,
    pub shade_tolerant: String,
}

impl Default for LightResponseConfig {
    fn default() -> Self {
        Self {
            shade_intolerant: "1-exp(-3.3*(lri-0.08))".to_string(),
            shade_tolerant: "1-exp(-6.9*lri)".to_string(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct PermafrostConfig {
    pub enabled: bool,
    /// Depth (m) of the constant deep-soil temperature boundary.
    pub deep_soil_depth: f64,
    /// Thermal conductivity of snow (W/m/K). Must be set when enabled.
    pub lambda_snow: f64,
    /// Thermal conductivity of the soil organic layer (W/m/K).
    pub lambda_organic_layer: f64,
    /// Bulk density of the organic layer (kg/m3).
    pub organic_layer_density: f64,
    /// Cap on |freeze/thaw| per day (mm water equivalent).
    pub max_freeze_thaw_per_day: f64,
    /// Simulate only; do not write back into the water cycle.
    pub only_simulate: bool,
    pub deep_soil_temperature: f64,
    pub initial_depth_frozen: f64,
    /// Organic layer depth (m) used when the carbon cycle is disabled.
    pub organic_layer_default_depth: f64,
}

impl Default for PermafrostConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            deep_soil_depth: 5.0,
            lambda_snow: 0.0,
            lambda_organic_layer: 0.0,
            organic_layer_density: 60.0,
            max_freeze_thaw_per_day: 10.0,
            only_simulate: false,
            deep_soil_temperature: 0.0,
            initial_depth_frozen: 1.0,
            organic_layer_default_depth: 0.0,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct SoilSettingsConfig {
    /// C/N ratio of soil microbes.
    pub qb: f64,
    /// C/N ratio of soil organic matter.
    pub qh: f64,
    /// Fraction of mineralized N in SOM lost to leaching.
    pub leaching: f64,
    /// Microbial efficiency, labile pool.
    pub el: f64,
    /// Microbial efficiency, refractory pool.
    pub er: f64,
}

impl Default for SoilSettingsConfig {
    fn default() -> Self {
        Self { qb: 5.0, qh: 25.0, leaching: 0.15, el: 0.0577, er: 0.073 }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct GrassConfig {
    pub enabled: bool,
    /// Expression of competition (`1 - LIF`) for the potential cover.
    pub grass_potential: String,
    /// Expression of cover for the effect on establishment.
    pub grass_effect: String,
    /// Years until full cover builds up on an open pixel.
    pub max_time_lag: f64,
}

impl Default for GrassConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            grass_potential: "min(1.5*x, 1)".to_string(),
            grass_effect: "1-0.5*x".to_string(),
            max_time_lag: 3.0,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct BrowsingConfig {
    pub enabled: bool,
    /// Landscape browsing pressure, scales the per-species probability.
    pub browsing_pressure: f64,
}

/// Per-resource-unit site parameters (overridable via the environment
/// table).
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct SiteConfig {
    pub pct_sand: f64,
    pub pct_clay: f64,
    /// Effective soil depth (mm).
    pub soil_depth: f64,
    /// SOM decomposition rate k_o (1/yr).
    pub som_decomp_rate: f64,
    /// Humification rate h.
    pub soil_humification_rate: f64,
    /// Plant-available nitrogen (kg/ha/yr) used until the soil solver
    /// produces its own value.
    pub available_nitrogen: f64,
    // initial soil pools, kg/ha
    pub young_labile_c: f64,
    pub young_labile_n: f64,
    pub young_labile_decomp_rate: f64,
    pub young_refractory_c: f64,
    pub young_refractory_n: f64,
    pub young_refractory_decomp_rate: f64,
    pub som_c: f64,
    pub som_n: f64,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            pct_sand: 40.0,
            pct_clay: 20.0,
            soil_depth: 1000.0,
            som_decomp_rate: 0.02,
            soil_humification_rate: 0.3,
            available_nitrogen: 70.0,
            young_labile_c: 12_000.0,
            young_labile_n: 500.0,
            young_labile_decomp_rate: 0.25,
            young_refractory_c: 18_000.0,
            young_refractory_n: 250.0,
            young_refractory_decomp_rate: 0.1,
            som_c: 60_000.0,
            som_n: 2_500.0,
        }
    }
}

impl SiteConfig {
    pub fn validate(&self) -> Result<(), SimError> {
        if self.som_decomp_rate <= 0.0 || self.som_decomp_rate > 1.0 {
            return Err(SimError::InvalidSite("somDecompRate must be in (0, 1]".into()));
        }
        if self.soil_humification_rate <= 0.0 || self.soil_humification_rate > 1.0 {
            return Err(SimError::InvalidSite("soilHumificationRate must be in (0, 1]".into()));
        }
        if self.soil_depth <= 0.0 {
            return Err(SimError::InvalidSite("soilDepth must be positive".into()));
        }
        if !(0.0..=100.0).contains(&self.pct_sand) || !(0.0..=100.0).contains(&self.pct_clay) {
            return Err(SimError::InvalidSite("pctSand/pctClay must be percentages".into()));
        }
        Ok(())
    }
}

/// A scheduled settings override: in `year`, set `key` to `value`.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct TimeEventConfig {
    pub year: u32,
    pub key: String,
    pub value: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct ManagementConfig {
    pub enabled: bool,
    /// Tree filter expression (tree variables: dbh, height, age, species,
    /// lri, stress).
    pub filter: String,
    /// Fraction of matching trees removed per year.
    pub fraction: f64,
    // routing of removed biomass
    pub stem_to_snag_fraction: f64,
    pub branch_to_snag_fraction: f64,
    pub foliage_to_soil_fraction: f64,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct SystemConfig {
    pub settings: SystemSettingsConfig,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct SystemSettingsConfig {
    pub random_seed: u64,
    pub multithreading: bool,
    pub expression_linearization_enabled: bool,
    pub log_level: String,
}

impl Default for SystemSettingsConfig {
    fn default() -> Self {
        Self {
            random_seed: 1,
            multithreading: true,
            expression_linearization_enabled: true,
            log_level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        let c = ProjectConfig::default();
        assert!(c.validate().is_ok());
        assert_eq!(c.model.world.buffer, 60.0);
        assert!(c.system.settings.multithreading);
    }

    #[test]
    fn parses_partial_json() {
        let c = ProjectConfig::from_json(
            r#"{ "model": { "world": { "width": 300, "height": 200, "torus": true } } }"#,
        )
        .unwrap();
        assert_eq!(c.model.world.width, 300.0);
        assert_eq!(c.model.world.cell_size, 2.0);
        assert!(c.model.world.torus);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = ProjectConfig::from_json(r#"{ "model": { "world": { "widht": 300 } } }"#);
        assert!(err.is_err());
    }

    #[test]
    fn invalid_site_parameters_fail() {
        let mut c = ProjectConfig::default();
        c.model.settings.temperature_tau = 0.0;
        assert!(matches!(c.validate(), Err(SimError::InvalidSite(_))));

        let mut c = ProjectConfig::default();
        c.model.settings.soil.el = 0.0;
        assert!(matches!(c.validate(), Err(SimError::InvalidSite(_))));

        let mut c = ProjectConfig::default();
        c.model.site.som_decomp_rate = -0.1;
        assert!(matches!(c.validate(), Err(SimError::InvalidSite(_))));
    }

    #[test]
    fn apply_key_overrides_site_values() {
        let mut c = ProjectConfig::default();
        assert!(c.apply_key("model.site.pctSand", "77").unwrap());
        assert_eq!(c.model.site.pct_sand, 77.0);
        assert!(c.apply_key("model.settings.soil.qh", "30").unwrap());
        assert_eq!(c.model.settings.soil.qh, 30.0);
        // unknown keys are reported, not applied
        assert!(!c.apply_key("model.world.width", "1").unwrap());
        // bad numerics error out
        assert!(c.apply_key("model.site.pctClay", "abc").is_err());
    }
}
