// Stand-level primary production (3PG-style light-use efficiency).
//
// Per resource unit and species, the year's GPP per unit effective area
// follows from monthly utilizable radiation: global radiation is reduced
// to PAR, each month is scaled by the most limiting of the temperature,
// soil-water and VPD responses, and the annual sum is converted to biomass
// with a light-use efficiency damped by the nitrogen response. The same
// responses set the fraction of assimilates routed below ground
// (Landsberg & Waring): poor growing conditions shift allocation to the
// roots.
//
// The temperature response uses a delayed temperature (first-order lag
// with time constant `temperatureTau`) so early-spring warm spells do not
// switch production on instantly.

use crate::climate::Climate;
use crate::species::Species;

/// Light-use efficiency (g C per MJ utilizable PAR).
const EPSILON: f64 = 2.5;
/// PAR fraction of global radiation.
const PAR_FRACTION: f64 = 0.5;

/// Environmental responses of one species on one resource unit.
#[derive(Clone, Debug, Default)]
pub struct SpeciesResponse {
    /// Per month: min(temperature, water) x vpd response in [0, 1].
    pub monthly_response: [f64; 12],
    pub monthly_radiation: [f64; 12],
    pub nitrogen_response: f64,
    /// Mean of the monthly combined responses, radiation-weighted.
    pub mean_response: f64,
}

impl SpeciesResponse {
    /// Compute the responses from this year's climate and water state.
    pub fn calculate(
        species: &Species,
        climate: &Climate,
        monthly_rel_water: &[f64; 12],
        available_nitrogen: f64,
        temperature_tau: f64,
    ) -> Self {
        let p = &species.params;

        // delayed daily temperature, aggregated monthly
        let mut monthly_delayed_temp = [0.0f64; 12];
        let mut monthly_days = [0u32; 12];
        let mut delayed = climate.year_days().first().map(|d| d.mean_temp()).unwrap_or(0.0);
        for day in climate.year_days() {
            delayed += (day.mean_temp() - delayed) / temperature_tau.max(1.0);
            let m = (day.month - 1) as usize;
            monthly_delayed_temp[m] += delayed;
            monthly_days[m] += 1;
        }
        for m in 0..12 {
            if monthly_days[m] > 0 {
                monthly_delayed_temp[m] /= monthly_days[m] as f64;
            }
        }

        // drought threshold from the species' minimum water potential:
        // more negative psi_min means production keeps going on drier soil
        let drought_threshold = (0.6 + p.psi_min / 5.0).clamp(0.05, 0.8);

        let mut monthly_response = [0.0f64; 12];
        let mut monthly_radiation = [0.0f64; 12];
        let mut weighted = 0.0;
        let mut rad_total = 0.0;
        for m in 0..12 {
            let f_temp = temperature_response(monthly_delayed_temp[m], p.resp_temp_min, p.resp_temp_max);
            let f_water = ((monthly_rel_water[m] - drought_threshold)
                / (1.0 - drought_threshold))
                .clamp(0.0, 1.0);
            let f_vpd = (p.resp_vpd_exponent * climate.month(m).mean_vpd).exp().clamp(0.0, 1.0);
            monthly_response[m] = f_temp.min(f_water) * f_vpd;
            monthly_radiation[m] = climate.month(m).rad_sum;
            weighted += monthly_response[m] * monthly_radiation[m];
            rad_total += monthly_radiation[m];
        }

        let nitrogen_response = nitrogen_response(available_nitrogen, p.resp_nitrogen_class);
        let mean_response = if rad_total > 0.0 { weighted / rad_total } else { 0.0 };
        Self { monthly_response, monthly_radiation, nitrogen_response, mean_response }
    }
}

/// Trapezoid response: off below `t_min`, full in the middle band, off
/// above `t_max`.
fn temperature_response(t: f64, t_min: f64, t_max: f64) -> f64 {
    if t <= t_min || t >= t_max {
        return 0.0;
    }
    let span = t_max - t_min;
    let rise = t_min + 0.3 * span;
    let fall = t_max - 0.2 * span;
    if t < rise {
        (t - t_min) / (rise - t_min)
    } else if t > fall {
        (t_max - t) / (t_max - fall)
    } else {
        1.0
    }
}

/// Saturating nitrogen response; the class shifts the nitrogen demand
/// (1 = frugal, 3 = demanding). Shared with the establishment filter.
pub(crate) fn nitrogen_response(available_nitrogen: f64, class: f64) -> f64 {
    let n0 = 5.0 + 15.0 * (class.clamp(1.0, 3.0) - 1.0);
    (1.0 - (-0.05 * (available_nitrogen - n0)).exp()).clamp(0.0, 1.0)
}

/// The 3PG result for one resource unit x species.
#[derive(Clone, Copy, Debug, Default)]
pub struct Production3pg {
    /// GPP per m2 effective area (kg biomass / m2 / yr).
    gpp_per_area: f64,
    /// Fraction of NPP routed below ground.
    root_fraction: f64,
    /// Annual utilizable PAR (MJ/m2).
    utilizable_radiation: f64,
}

impl Production3pg {
    pub fn gpp_per_area(&self) -> f64 {
        self.gpp_per_area
    }

    pub fn root_fraction(&self) -> f64 {
        self.root_fraction
    }

    pub fn utilizable_radiation(&self) -> f64 {
        self.utilizable_radiation
    }

    /// Run the annual production from the response aggregates.
    pub fn calculate(&mut self, response: &SpeciesResponse) {
        let mut utilizable = 0.0;
        for m in 0..12 {
            utilizable += response.monthly_radiation[m] * PAR_FRACTION * response.monthly_response[m];
        }
        self.utilizable_radiation = utilizable;
        // gC -> kg biomass: /1000 g->kg, x2 carbon->dry matter
        self.gpp_per_area =
            utilizable * EPSILON * response.nitrogen_response / 1000.0 * 2.0;

        // Landsberg & Waring: allocation shifts to roots when conditions
        // worsen
        let m = response.mean_response * response.nitrogen_response;
        self.root_fraction = 0.8 / (1.0 + 2.5 * m);
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
