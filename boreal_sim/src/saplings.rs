// The regeneration layer: sapling cohorts on the 2 m grid.
//
// Every 2 m cell of a resource unit carries at most one sapling cohort per
// species (a height, an age and a stress counter). Establishment draws a
// lottery per cell against seed availability x abiotic filter x corrected
// light; sapling growth moves heights along the species' potential curve
// scaled by light, with browsing and a stress counter pruning the losers.
// A cohort crossing 1.3 m leaves the layer and becomes an individual tree
// (promotion happens in the resource unit, which owns both sides).
//
// The abiotic filter (temperature sum, frost days, growing-season water,
// nitrogen) is computed once per resource unit x species and year.

use smallvec::SmallVec;

use crate::climate::Climate;
use crate::production::nitrogen_response;
use crate::species::Species;
use crate::types::SAPLING_PROMOTION_HEIGHT;

/// Initial height of a freshly established sapling (m).
pub const INITIAL_SAPLING_HEIGHT: f64 = 0.05;
/// Height growth below this threshold (m/yr) counts as a stress year.
const STRESS_GROWTH_THRESHOLD: f64 = 0.02;
/// Browsing affects saplings below this height (m).
const BROWSING_MAX_HEIGHT: f64 = 2.0;

/// One sapling cohort (single tracked height per species and cell).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sapling {
    pub species: u16,
    pub height: f64,
    pub age: u16,
    pub stress_years: u8,
}

/// A 2 m regeneration cell.
#[derive(Clone, Debug, Default)]
pub struct SaplingCell {
    pub saplings: SmallVec<[Sapling; 4]>,
}

impl SaplingCell {
    pub fn is_empty(&self) -> bool {
        self.saplings.is_empty()
    }

    /// Tallest sapling on the cell, 0 if none.
    pub fn max_height(&self) -> f64 {
        self.saplings.iter().map(|s| s.height).fold(0.0, f64::max)
    }

    pub fn has_species(&self, species: usize) -> bool {
        self.saplings.iter().any(|s| s.species as usize == species)
    }

    /// Add a new cohort; at most one per species.
    pub fn establish(&mut self, species: usize) -> bool {
        if self.has_species(species) {
            return false;
        }
        self.saplings.push(Sapling {
            species: species as u16,
            height: INITIAL_SAPLING_HEIGHT,
            age: 0,
            stress_years: 0,
        });
        true
    }
}

/// The per-RU x species abiotic establishment filter of the year.
pub fn establishment_probability(
    species: &Species,
    climate: &Climate,
    growing_season_water: f64,
    available_nitrogen: f64,
) -> f64 {
    let p = &species.params;

    // temperature sum window with a 10% shoulder on both sides
    let gdd = climate.growing_degree_days();
    let shoulder = 0.1 * (p.est_gdd_max - p.est_gdd_min);
    let f_gdd = if gdd < p.est_gdd_min || gdd > p.est_gdd_max {
        0.0
    } else if gdd < p.est_gdd_min + shoulder {
        (gdd - p.est_gdd_min) / shoulder
    } else if gdd > p.est_gdd_max - shoulder {
        (p.est_gdd_max - gdd) / shoulder
    } else {
        1.0
    };

    // growing-season frost kills a tolerance-dependent share
    let frost = climate.frost_days_growing_season() as f64;
    let f_frost = (-0.02 * (1.0 - p.est_frost_tolerance) * frost).exp();

    let f_water = ((growing_season_water - 0.05) / 0.3).clamp(0.0, 1.0);
    let f_nitrogen = nitrogen_response(available_nitrogen, p.resp_nitrogen_class);

    (f_gdd * f_frost * f_water * f_nitrogen).clamp(0.0, 1.0)
}

/// Outcome of one sapling-cohort year.
pub enum SaplingFate {
    Alive,
    Died,
    /// Crossed the promotion height: create a tree with this dbh (cm).
    Promoted { dbh: f64 },
}

/// Advance one cohort by a year. `corrected_light` is the LRI-corrected
/// light at the cell for the cohort's height; `browsing_draw` is `true`
/// when this cohort is browsed this year.
pub fn grow_sapling(
    sapling: &mut Sapling,
    species: &Species,
    corrected_light: f64,
    browsing_draw: bool,
) -> SaplingFate {
    let potential = species.sapling_growth_potential(sapling.height);
    let mut growth = potential * species.light_response(corrected_light);
    if browsing_draw && sapling.height < BROWSING_MAX_HEIGHT {
        growth = 0.0;
    }

    if growth < STRESS_GROWTH_THRESHOLD {
        sapling.stress_years = sapling.stress_years.saturating_add(1);
        if sapling.stress_years as u32 > species.params.sapling_stress_years {
            return SaplingFate::Died;
        }
    } else {
        sapling.stress_years = 0;
    }

    sapling.height += growth;
    sapling.age = sapling.age.saturating_add(1);

    if sapling.height >= SAPLING_PROMOTION_HEIGHT {
        // dbh from the sapling h/d ratio: hd = 100 * h[m] / dbh[cm]
        let dbh = 100.0 * sapling.height / species.params.sapling_hd;
        return SaplingFate::Promoted { dbh };
    }
    SaplingFate::Alive
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::climate::{Climate, synthetic_year};
    use crate::config::SettingsConfig;
    use crate::species::{SpeciesSet, SpeciesSetData};

    fn set() -> SpeciesSet {
        SpeciesSet::setup(SpeciesSetData::default(), &SettingsConfig::default(), true).unwrap()
    }

    #[test]
    fn one_cohort_per_species_per_cell() {
        let mut cell = SaplingCell::default();
        assert!(cell.establish(0));
        assert!(!cell.establish(0));
        assert!(cell.establish(1));
        assert_eq!(cell.saplings.len(), 2);
        assert!(cell.max_height() > 0.0);
    }

    #[test]
    fn abiotic_filter_scales_with_climate() {
        let s = set();
        let mild = Climate::from_days("m", synthetic_year(2000, 6.0, 10.0, 700.0)).unwrap();
        let arctic = Climate::from_days("a", synthetic_year(2000, -14.0, 10.0, 400.0)).unwrap();
        let p_mild = establishment_probability(s.species(0), &mild, 0.8, 80.0);
        let p_arctic = establishment_probability(s.species(0), &arctic, 0.8, 80.0);
        assert!(p_mild > 0.0);
        assert!(p_arctic < p_mild);
        assert!((0.0..=1.0).contains(&p_mild));
    }

    #[test]
    fn saplings_grow_in_light_and_stall_in_shade() {
        let s = set();
        let species = s.species(0);
        let mut lit = Sapling { species: 0, height: 0.5, age: 3, stress_years: 0 };
        let mut shaded = lit;
        grow_sapling(&mut lit, species, 1.0, false);
        grow_sapling(&mut shaded, species, 0.02, false);
        assert!(lit.height > shaded.height);
    }

    #[test]
    fn chronic_shade_kills_a_cohort() {
        let s = set();
        let species = s.species(0);
        let mut sap = Sapling { species: 0, height: 0.3, age: 1, stress_years: 0 };
        let mut died = false;
        for _ in 0..10 {
            if matches!(grow_sapling(&mut sap, species, 0.0, false), SaplingFate::Died) {
                died = true;
                break;
            }
        }
        assert!(died);
    }

    #[test]
    fn promotion_at_breast_height() {
        let s = set();
        let species = s.species(0);
        let mut sap = Sapling { species: 0, height: 1.25, age: 9, stress_years: 0 };
        match grow_sapling(&mut sap, species, 1.0, false) {
            SaplingFate::Promoted { dbh } => {
                assert!(dbh > 0.0);
                assert!(dbh < 5.0);
            }
            _ => panic!("expected promotion, height = {}", sap.height),
        }
    }

    #[test]
    fn browsing_stops_small_saplings_only() {
        let s = set();
        let species = s.species(0);
        let mut small = Sapling { species: 0, height: 0.5, age: 2, stress_years: 0 };
        let h0 = small.height;
        grow_sapling(&mut small, species, 1.0, true);
        assert_eq!(small.height, h0);
        let mut tall = Sapling { species: 0, height: 2.5, age: 12, stress_years: 0 };
        let h1 = tall.height;
        grow_sapling(&mut tall, species, 1.0, true);
        assert!(tall.height > h1);
    }
}
