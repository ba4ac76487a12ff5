// Daily water cycle of a resource unit.
//
// A single soil-water bucket per unit: snow pack, canopy interception, a
// radiation-driven evapotranspiration demand and overflow past field
// capacity. The bucket geometry (depth, field capacity, wilting point) is
// derived from soil texture; the permafrost extension shrinks it while
// parts of the column are frozen and owns the freeze/thaw bookkeeping.
//
// The cycle's product for the rest of the model is the monthly mean
// relative plant-available water (feeding the 3PG water response), the
// annual evapotranspiration and runoff sums, and a `WaterCycleData`
// summary handed to disturbance modules.

use crate::climate::Climate;
use crate::config::{PermafrostConfig, SiteConfig};
use crate::error::SimError;
use crate::permafrost::Permafrost;

/// Snow density used to translate water equivalent to depth (kg/m3).
const SNOW_DENSITY: f64 = 300.0;
/// Degree-day melt factor (mm per degree C per day).
const MELT_FACTOR: f64 = 0.7;
/// Canopy storage per unit leaf area (mm).
const INTERCEPTION_PER_LAI: f64 = 0.3;
/// Potential evapotranspiration per unit radiation (mm per MJ/m2).
const PET_PER_RADIATION: f64 = 0.15;

/// The mutable bucket state shared with the permafrost extension.
#[derive(Clone, Copy, Debug)]
pub struct Bucket {
    /// Current water content (mm).
    pub content_mm: f64,
    /// Effective (unfrozen) soil depth (mm).
    pub soil_depth_mm: f64,
    pub field_capacity_mm: f64,
    pub wilting_point_mm: f64,
}

impl Bucket {
    /// Relative plant-available water in [0, 1].
    pub fn relative_available(&self) -> f64 {
        let span = self.field_capacity_mm - self.wilting_point_mm;
        if span <= 0.0 {
            return 0.0;
        }
        ((self.content_mm - self.wilting_point_mm) / span).clamp(0.0, 1.0)
    }
}

/// Snow pack as water equivalent.
#[derive(Clone, Copy, Debug, Default)]
pub struct SnowPack {
    swe_mm: f64,
}

impl SnowPack {
    /// Process one day of precipitation; returns the water reaching the
    /// ground (rain plus melt).
    pub fn process(&mut self, prec_mm: f64, mean_temp: f64) -> f64 {
        if mean_temp <= 0.0 {
            self.swe_mm += prec_mm;
            return 0.0;
        }
        let melt = (MELT_FACTOR * mean_temp).min(self.swe_mm);
        self.swe_mm -= melt;
        prec_mm + melt
    }

    /// Snow depth (m).
    pub fn depth_m(&self) -> f64 {
        self.swe_mm / SNOW_DENSITY
    }

    pub fn water_equivalent_mm(&self) -> f64 {
        self.swe_mm
    }
}

/// Annual summary published to disturbance modules.
#[derive(Clone, Copy, Debug, Default)]
pub struct WaterCycleData {
    pub annual_precipitation_mm: f64,
    pub annual_evapotranspiration_mm: f64,
    pub annual_runoff_mm: f64,
    pub max_snow_depth_m: f64,
    /// Mean growing-season (Apr-Sep) relative available water.
    pub growing_season_water: f64,
}

/// The per-unit water cycle.
#[derive(Debug)]
pub struct WaterCycle {
    bucket: Bucket,
    /// Full (thawed) profile values.
    full_depth_mm: f64,
    full_field_capacity_mm: f64,
    full_wilting_point_mm: f64,
    /// Porosity (volumetric water content at saturation).
    theta_sat: f64,
    snow: SnowPack,
    permafrost: Option<Permafrost>,
    monthly_rel_water: [f64; 12],
    data: WaterCycleData,
}

impl WaterCycle {
    pub fn setup(site: &SiteConfig, permafrost: &PermafrostConfig) -> Result<Self, SimError> {
        // texture-derived volumetric fractions (simple pedotransfer)
        let sand = site.pct_sand / 100.0;
        let clay = site.pct_clay / 100.0;
        let theta_sat = (0.50 - 0.10 * sand).clamp(0.3, 0.6);
        let theta_fc = (0.40 - 0.15 * sand + 0.1 * clay).clamp(0.1, theta_sat);
        let theta_pwp = (0.05 + 0.35 * clay).clamp(0.01, theta_fc - 0.01);

        let depth = site.soil_depth;
        let bucket = Bucket {
            content_mm: theta_fc * depth * 0.8,
            soil_depth_mm: depth,
            field_capacity_mm: theta_fc * depth,
            wilting_point_mm: theta_pwp * depth,
        };
        let mut cycle = Self {
            bucket,
            full_depth_mm: depth,
            full_field_capacity_mm: bucket.field_capacity_mm,
            full_wilting_point_mm: bucket.wilting_point_mm,
            theta_sat,
            snow: SnowPack::default(),
            permafrost: None,
            monthly_rel_water: [0.0; 12],
            data: WaterCycleData::default(),
        };
        if permafrost.enabled {
            let pf = Permafrost::setup(permafrost, site, theta_sat, &mut cycle.bucket)?;
            cycle.permafrost = Some(pf);
        }
        Ok(cycle)
    }

    pub fn bucket(&self) -> &Bucket {
        &self.bucket
    }

    pub fn snow(&self) -> &SnowPack {
        &self.snow
    }

    pub fn permafrost(&self) -> Option<&Permafrost> {
        self.permafrost.as_ref()
    }

    pub fn permafrost_mut(&mut self) -> Option<&mut Permafrost> {
        self.permafrost.as_mut()
    }

    pub fn full_depth_mm(&self) -> f64 {
        self.full_depth_mm
    }

    pub fn theta_sat(&self) -> f64 {
        self.theta_sat
    }

    /// Monthly mean relative plant-available water of the last year.
    pub fn monthly_rel_water(&self) -> &[f64; 12] {
        &self.monthly_rel_water
    }

    pub fn data(&self) -> &WaterCycleData {
        &self.data
    }

    /// Start-of-year hook: permafrost organic layer and deep-soil
    /// temperature tracking.
    pub fn new_year(&mut self, mean_annual_temp: f64, organic_layer_biomass_t_ha: Option<f64>) {
        if let Some(pf) = &mut self.permafrost {
            pf.new_year(mean_annual_temp, organic_layer_biomass_t_ha);
        }
    }

    /// Run the daily cycle for one climate year. `lai` is the leaf-area
    /// index of the unit (trees + saplings).
    pub fn run_year(&mut self, climate: &Climate, lai: f64) {
        let mut monthly_sum = [0.0f64; 12];
        let mut monthly_days = [0u32; 12];
        let mut et_sum = 0.0;
        let mut runoff_sum = 0.0;
        let mut prec_sum = 0.0;
        let mut max_snow = 0.0f64;
        let mut gs_sum = 0.0;
        let mut gs_days = 0u32;

        for day in climate.year_days() {
            prec_sum += day.prec;
            let ground_water = self.snow.process(day.prec, day.mean_temp());
            max_snow = max_snow.max(self.snow.depth_m());

            if let Some(pf) = &mut self.permafrost {
                pf.run(day, &mut self.bucket, self.snow.depth_m());
            }

            // canopy interception evaporates without reaching the soil
            let interception = ground_water.min(INTERCEPTION_PER_LAI * lai);
            let input = ground_water - interception;

            self.bucket.content_mm += input;
            if self.bucket.content_mm > self.bucket.field_capacity_mm {
                runoff_sum += self.bucket.content_mm - self.bucket.field_capacity_mm;
                self.bucket.content_mm = self.bucket.field_capacity_mm;
            }

            // transpiration demand: radiation-bound, scaled by available
            // water; nothing transpires from frozen or snow-covered soil
            let rel = self.bucket.relative_available();
            if day.mean_temp() > 0.0 && self.snow.depth_m() < 0.01 {
                let pet = PET_PER_RADIATION * day.rad;
                let et = (pet * rel).min(self.bucket.content_mm);
                self.bucket.content_mm -= et;
                et_sum += et + interception;
            }

            let m = (day.month - 1) as usize;
            monthly_sum[m] += self.bucket.relative_available();
            monthly_days[m] += 1;
            if (4..=9).contains(&day.month) {
                gs_sum += self.bucket.relative_available();
                gs_days += 1;
            }
        }

        for m in 0..12 {
            self.monthly_rel_water[m] =
                if monthly_days[m] > 0 { monthly_sum[m] / monthly_days[m] as f64 } else { 0.0 };
        }
        self.data = WaterCycleData {
            annual_precipitation_mm: prec_sum,
            annual_evapotranspiration_mm: et_sum,
            annual_runoff_mm: runoff_sum,
            max_snow_depth_m: max_snow,
            growing_season_water: if gs_days > 0 { gs_sum / gs_days as f64 } else { 0.0 },
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::climate::{Climate, synthetic_year};

    fn cycle() -> WaterCycle {
        WaterCycle::setup(&SiteConfig::default(), &PermafrostConfig::default()).unwrap()
    }

    #[test]
    fn snow_accumulates_below_zero_and_melts_above() {
        let mut snow = SnowPack::default();
        assert_eq!(snow.process(10.0, -5.0), 0.0);
        assert!(snow.depth_m() > 0.0);
        let melt = snow.process(0.0, 10.0);
        assert!(melt > 0.0);
    }

    #[test]
    fn bucket_stays_within_bounds_over_a_year() {
        let mut wc = cycle();
        let climate = Climate::from_days("t", synthetic_year(2000, 6.0, 12.0, 700.0)).unwrap();
        wc.run_year(&climate, 3.0);
        let b = wc.bucket();
        assert!(b.content_mm >= 0.0);
        assert!(b.content_mm <= b.field_capacity_mm + 1e-9);
        assert!(wc.data().annual_evapotranspiration_mm > 0.0);
        assert!((0.0..=1.0).contains(&wc.data().growing_season_water));
    }

    #[test]
    fn wet_climate_keeps_more_water_than_dry() {
        let wet_climate = Climate::from_days("w", synthetic_year(2000, 6.0, 12.0, 1200.0)).unwrap();
        let dry_climate = Climate::from_days("d", synthetic_year(2000, 6.0, 12.0, 150.0)).unwrap();
        let mut wet = cycle();
        let mut dry = cycle();
        wet.run_year(&wet_climate, 3.0);
        dry.run_year(&dry_climate, 3.0);
        assert!(
            wet.data().growing_season_water > dry.data().growing_season_water,
            "wet {} dry {}",
            wet.data().growing_season_water,
            dry.data().growing_season_water
        );
    }

    #[test]
    fn interception_scales_with_lai() {
        let climate = Climate::from_days("t", synthetic_year(2000, 6.0, 12.0, 700.0)).unwrap();
        let mut bare = cycle();
        let mut dense = cycle();
        bare.run_year(&climate, 0.0);
        dense.run_year(&climate, 6.0);
        assert!(
            dense.data().annual_runoff_mm <= bare.data().annual_runoff_mm,
            "dense {} bare {}",
            dense.data().annual_runoff_mm,
            bare.data().annual_runoff_mm
        );
    }
}
