// Daily climate series and derived aggregates.
//
// A `Climate` owns a multi-year daily series and exposes exactly one year
// at a time; `next_year()` advances (and wraps around when the series is
// exhausted, so short tables can drive long runs). Monthly and annual
// aggregates are recomputed on every advance — they feed the 3PG response
// calculation, the water cycle, the soil climate factor and the
// permafrost deep-soil temperature.

use serde::{Deserialize, Serialize};

use crate::error::SimError;

/// One day of climate input.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ClimateDay {
    pub year: i32,
    /// 1..=12
    pub month: u8,
    /// 1..=31
    pub day: u8,
    /// Daily minimum temperature (C).
    pub min_temp: f64,
    /// Daily maximum temperature (C).
    pub max_temp: f64,
    /// Precipitation (mm).
    pub prec: f64,
    /// Global radiation (MJ/m2).
    pub rad: f64,
    /// Mean vapour pressure deficit (kPa).
    pub vpd: f64,
}

impl ClimateDay {
    pub fn mean_temp(&self) -> f64 {
        (self.min_temp + self.max_temp) * 0.5
    }
}

/// Aggregates of one month of the current climate year.
#[derive(Clone, Copy, Debug, Default)]
pub struct MonthAggregate {
    pub mean_temp: f64,
    pub prec_sum: f64,
    pub rad_sum: f64,
    pub mean_vpd: f64,
    pub days: u32,
}

/// A named daily climate series.
#[derive(Debug)]
pub struct Climate {
    name: String,
    days: Vec<ClimateDay>,
    /// Range of `days` holding the current year.
    begin: usize,
    end: usize,
    months: [MonthAggregate; 12],
    mean_annual_temp: f64,
    annual_precipitation: f64,
    annual_radiation: f64,
    /// Growing degree days above 5 C.
    gdd: f64,
    /// Days with frost (min temp below 0) during April-September.
    frost_days_growing_season: u32,
    years_advanced: u32,
}

impl Climate {
    pub fn from_days(name: &str, days: Vec<ClimateDay>) -> Result<Self, SimError> {
        if days.is_empty() {
            return Err(SimError::Config(format!("climate '{name}': empty series")));
        }
        let mut climate = Self {
            name: name.to_string(),
            days,
            begin: 0,
            end: 0,
            months: [MonthAggregate::default(); 12],
            mean_annual_temp: 0.0,
            annual_precipitation: 0.0,
            annual_radiation: 0.0,
            gdd: 0.0,
            frost_days_growing_season: 0,
            years_advanced: 0,
        };
        climate.next_year();
        Ok(climate)
    }

    /// Parse a JSON array of `ClimateDay` rows.
    pub fn from_json(name: &str, json: &str) -> Result<Self, SimError> {
        let days: Vec<ClimateDay> = serde_json::from_str(json)?;
        Self::from_days(name, days)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Days of the current year.
    pub fn year_days(&self) -> &[ClimateDay] {
        &self.days[self.begin..self.end]
    }

    pub fn month(&self, month_index: usize) -> &MonthAggregate {
        &self.months[month_index]
    }

    pub fn mean_annual_temperature(&self) -> f64 {
        self.mean_annual_temp
    }

    pub fn annual_precipitation(&self) -> f64 {
        self.annual_precipitation
    }

    pub fn annual_radiation(&self) -> f64 {
        self.annual_radiation
    }

    pub fn growing_degree_days(&self) -> f64 {
        self.gdd
    }

    pub fn frost_days_growing_season(&self) -> u32 {
        self.frost_days_growing_season
    }

    /// Advance to the next year of the series (wrapping at the end) and
    /// recompute the aggregates.
    pub fn next_year(&mut self) {
        if self.years_advanced > 0 {
            let next = if self.end >= self.days.len() { 0 } else { self.end };
            self.begin = next;
        }
        let start_year = self.days[self.begin].year;
        let mut end = self.begin;
        while end < self.days.len() && self.days[end].year == start_year {
            end += 1;
        }
        self.end = end;
        self.years_advanced += 1;
        self.recompute_aggregates();
    }

    fn recompute_aggregates(&mut self) {
        self.months = [MonthAggregate::default(); 12];
        let mut temp_sum = 0.0;
        let mut prec = 0.0;
        let mut rad = 0.0;
        let mut gdd = 0.0;
        let mut frost = 0u32;
        for day in &self.days[self.begin..self.end] {
            let m = &mut self.months[(day.month - 1) as usize];
            m.mean_temp += day.mean_temp();
            m.prec_sum += day.prec;
            m.rad_sum += day.rad;
            m.mean_vpd += day.vpd;
            m.days += 1;

            temp_sum += day.mean_temp();
            prec += day.prec;
            rad += day.rad;
            gdd += (day.mean_temp() - 5.0).max(0.0);
            if (4..=9).contains(&day.month) && day.min_temp < 0.0 {
                frost += 1;
            }
        }
        for m in &mut self.months {
            if m.days > 0 {
                m.mean_temp /= m.days as f64;
                m.mean_vpd /= m.days as f64;
            }
        }
        let n = (self.end - self.begin).max(1) as f64;
        self.mean_annual_temp = temp_sum / n;
        self.annual_precipitation = prec;
        self.annual_radiation = rad;
        self.gdd = gdd;
        self.frost_days_growing_season = frost;
    }
}

/// Generate a simple synthetic year of daily climate for tests and
/// self-contained setups: a sinusoidal temperature course around
/// `mean_temp` with the given seasonal amplitude, constant daily
/// precipitation summing to `annual_prec`.
pub fn synthetic_year(
    year: i32,
    mean_temp: f64,
    amplitude: f64,
    annual_prec: f64,
) -> Vec<ClimateDay> {
    let mut days = Vec::with_capacity(365);
    const DAYS_PER_MONTH: [u8; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
    let mut doy = 0.0;
    for (month, &month_days) in DAYS_PER_MONTH.iter().enumerate() {
        for day in 1..=month_days {
            // coldest around mid-January
            let season = ((doy - 195.0) / 365.0 * std::f64::consts::TAU).cos();
            let t = mean_temp + amplitude * season;
            let rad = (12.0 + 10.0 * season).max(0.5);
            days.push(ClimateDay {
                year,
                month: month as u8 + 1,
                day,
                min_temp: t - 4.0,
                max_temp: t + 4.0,
                prec: annual_prec / 365.0,
                rad,
                vpd: (0.1 + 0.05 * t.max(0.0)).min(2.0),
            });
            doy += 1.0;
        }
    }
    days
}
