// Species parameterization and the species set.
//
// A `Species` bundles everything the per-tree code asks of a taxon: the
// allometric functions (foliage/wood/root/branch biomass, crown radius,
// h/d corridor, stem fraction), turnover and mortality constants, the
// light-response curve, the 3PG response parameters, and the regeneration
// parameters feeding seed dispersal and establishment. Allometries are
// configured as expression strings of `dbh` and parsed once; the hot
// accessors evaluate the (optionally linearized) expressions.
//
// A `SpeciesSet` owns its species, the shared LRI-correction function and
// the per-year seed-year state. Species and sets outlive all trees; trees
// refer to a species by index within the set that their resource unit
// points to.

use boreal_expr::Expression;
use boreal_prng::GameRng;
use rustc_hash::FxHashMap;
use serde::Deserialize;

use crate::config::SettingsConfig;
use crate::error::SimError;
use crate::seed_dispersal::SeedDispersal;
use crate::stamp::{Stamp, StampContainer};

/// Raw per-species parameter record (one JSON object per species).
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct SpeciesParams {
    pub id: String,
    pub name: String,
    // allometries: expressions of `dbh` (cm) -> kg (biomass) or m (radius)
    pub biomass_foliage: String,
    pub biomass_woody: String,
    pub biomass_root: String,
    pub biomass_branch: String,
    pub crown_radius: String,
    /// Fraction of woody growth routed to the stem, expression of `dbh`.
    pub fraction_stem: String,
    pub specific_leaf_area: f64,
    pub fineroot_foliage_ratio: f64,
    pub turnover_leaf: f64,
    pub turnover_root: f64,
    /// Ratio of the allometric exponents b_woody / b_foliage.
    pub allometric_ratio_wf: f64,
    /// Form factor of the stem volume (-).
    pub volume_factor: f64,
    /// Wood density (kg/m3).
    pub wood_density: f64,
    /// h/d corridor, expressions of `dbh` (result: ratio in %-points).
    pub hd_low: String,
    pub hd_high: String,
    pub maximum_age: f64,
    pub maximum_height: f64,
    /// Aging factor, expression of the harmonic mean of relative age and
    /// relative height (`x` in [0, 1]).
    pub aging: String,
    pub death_prob_intrinsic: f64,
    /// Coefficient of the stress mortality: p = 1 - exp(-c * stress).
    pub death_prob_stress: f64,
    /// Shade tolerance class in [0, 1]; interpolates the light response.
    pub shade_tolerance: f64,
    // 3PG responses
    pub resp_temp_min: f64,
    pub resp_temp_max: f64,
    /// VPD response exponent (negative): exp(k * vpd).
    pub resp_vpd_exponent: f64,
    /// Nitrogen response class (1 = tolerant of poor soils .. 3 =
    /// demanding).
    pub resp_nitrogen_class: f64,
    /// Minimum soil water potential (MPa, negative).
    pub psi_min: f64,
    // regeneration
    pub maturity_age: u32,
    pub seed_year_interval: u32,
    pub non_seed_year_fraction: f64,
    /// Scales the seed kernel: expected establishment probability at the
    /// source cell in a seed year.
    pub fecundity: f64,
    pub dispersal_as1: f64,
    pub dispersal_as2: f64,
    pub dispersal_ks: f64,
    /// Seed probability imposed on the buffer belt around the project
    /// (external seed rain); 0 disables.
    pub external_seed_background: f64,
    pub est_gdd_min: f64,
    pub est_gdd_max: f64,
    /// Survival per growing-season frost day during establishment.
    pub est_frost_tolerance: f64,
    /// Sapling height growth potential (m/yr), expression of `h` (m).
    pub sapling_growth_potential: String,
    /// h/d ratio applied when a sapling is promoted to a tree.
    pub sapling_hd: f64,
    /// Stress years a sapling survives before it dies.
    pub sapling_stress_years: u32,
    pub browsing_probability: f64,
    // litter quality
    pub cn_foliage: f64,
    pub cn_wood: f64,
    pub cn_fineroot: f64,
    /// Decomposition rate of standing dead wood (1/yr).
    pub snag_decomp_rate: f64,
    /// Decomposition rate of fresh labile litter (1/yr).
    pub decomp_rate_labile: f64,
    /// Decomposition rate of woody debris (1/yr).
    pub decomp_rate_refractory: f64,
}

impl Default for SpeciesParams {
    fn default() -> Self {
        // a generic boreal conifer
        Self {
            id: "piab".to_string(),
            name: "Norway spruce".to_string(),
            biomass_foliage: "0.0778*dbh^1.974".to_string(),
            biomass_woody: "0.0764*dbh^2.505".to_string(),
            biomass_root: "0.0344*dbh^2.336".to_string(),
            biomass_branch: "0.0213*dbh^2.286".to_string(),
            crown_radius: "0.6+0.0701*dbh".to_string(),
            fraction_stem: "0.7+0.2*min(dbh/50, 1)".to_string(),
            specific_leaf_area: 4.8,
            fineroot_foliage_ratio: 0.75,
            turnover_leaf: 0.12,
            turnover_root: 0.63,
            allometric_ratio_wf: 1.27,
            volume_factor: 0.42,
            wood_density: 400.0,
            hd_low: "160-1.5*dbh".to_string(),
            hd_high: "190-0.7*dbh".to_string(),
            maximum_age: 500.0,
            maximum_height: 45.0,
            aging: "1/(1+(x/0.95)^4)".to_string(),
            death_prob_intrinsic: 0.002,
            death_prob_stress: 4.0,
            shade_tolerance: 0.8,
            resp_temp_min: -2.0,
            resp_temp_max: 18.0,
            resp_vpd_exponent: -0.4,
            resp_nitrogen_class: 2.0,
            psi_min: -1.6,
            maturity_age: 40,
            seed_year_interval: 5,
            non_seed_year_fraction: 0.25,
            fecundity: 0.8,
            dispersal_as1: 25.0,
            dispersal_as2: 150.0,
            dispersal_ks: 0.85,
            external_seed_background: 0.0,
            est_gdd_min: 300.0,
            est_gdd_max: 2200.0,
            est_frost_tolerance: 0.5,
            sapling_growth_potential: "1.5*(1-h/4)".to_string(),
            sapling_hd: 80.0,
            sapling_stress_years: 3,
            browsing_probability: 0.1,
            cn_foliage: 30.0,
            cn_wood: 300.0,
            cn_fineroot: 40.0,
            snag_decomp_rate: 0.04,
            decomp_rate_labile: 0.25,
            decomp_rate_refractory: 0.1,
        }
    }
}

/// A fully parsed species.
#[derive(Debug)]
pub struct Species {
    index: usize,
    id: String,
    name: String,
    biomass_foliage: Expression,
    biomass_woody: Expression,
    biomass_root: Expression,
    biomass_branch: Expression,
    fraction_stem: Expression,
    hd_low: Expression,
    hd_high: Expression,
    aging_expr: Expression,
    light_response_intolerant: Expression,
    light_response_tolerant: Expression,
    sapling_growth_potential: Expression,
    stamps: StampContainer,
    seed_dispersal: Option<SeedDispersal>,
    seed_year: bool,
    pub params: SpeciesParams,
}

impl Species {
    fn build(
        index: usize,
        params: SpeciesParams,
        settings: &SettingsConfig,
        linearize: bool,
    ) -> Result<Self, SimError> {
        let expr = |text: &str, var: &str| -> Result<Expression, SimError> {
            Ok(Expression::parse_strict(text, &[var])?)
        };
        let biomass_foliage = expr(&params.biomass_foliage, "dbh")?;
        let biomass_woody = expr(&params.biomass_woody, "dbh")?;
        let biomass_root = expr(&params.biomass_root, "dbh")?;
        let biomass_branch = expr(&params.biomass_branch, "dbh")?;
        let crown_radius = expr(&params.crown_radius, "dbh")?;
        let fraction_stem = expr(&params.fraction_stem, "dbh")?;
        let hd_low = expr(&params.hd_low, "dbh")?;
        let hd_high = expr(&params.hd_high, "dbh")?;
        let aging_expr = expr(&params.aging, "x")?;
        let light_response_intolerant =
            expr(&settings.light_response.shade_intolerant, "lri")?;
        let light_response_tolerant = expr(&settings.light_response.shade_tolerant, "lri")?;
        let sapling_growth_potential = expr(&params.sapling_growth_potential, "h")?;
        if linearize {
            aging_expr.linearize(0.0, 1.0, 512);
            light_response_intolerant.linearize(0.0, 1.0, 512);
            light_response_tolerant.linearize(0.0, 1.0, 512);
        }
        let stamps = StampContainer::build(|dbh| crown_radius.calc1(dbh).max(0.1));
        Ok(Self {
            index,
            id: params.id.clone(),
            name: params.name.clone(),
            biomass_foliage,
            biomass_woody,
            biomass_root,
            biomass_branch,
            fraction_stem,
            hd_low,
            hd_high,
            aging_expr,
            light_response_intolerant,
            light_response_tolerant,
            sapling_growth_potential,
            stamps,
            seed_dispersal: None,
            seed_year: true,
            params,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // --- allometries ---------------------------------------------------

    pub fn biomass_foliage(&self, dbh: f64) -> f64 {
        self.biomass_foliage.calc1(dbh).max(0.0)
    }

    pub fn biomass_woody(&self, dbh: f64) -> f64 {
        self.biomass_woody.calc1(dbh).max(0.0)
    }

    pub fn biomass_root(&self, dbh: f64) -> f64 {
        self.biomass_root.calc1(dbh).max(0.0)
    }

    pub fn biomass_branch(&self, dbh: f64) -> f64 {
        self.biomass_branch.calc1(dbh).max(0.0)
    }

    pub fn specific_leaf_area(&self) -> f64 {
        self.params.specific_leaf_area
    }

    pub fn fineroot_foliage_ratio(&self) -> f64 {
        self.params.fineroot_foliage_ratio
    }

    pub fn turnover_leaf(&self) -> f64 {
        self.params.turnover_leaf
    }

    pub fn turnover_root(&self) -> f64 {
        self.params.turnover_root
    }

    pub fn allometric_ratio_wf(&self) -> f64 {
        self.params.allometric_ratio_wf
    }

    /// Fraction of net woody growth that goes into the stem.
    pub fn allometric_fraction_stem(&self, dbh: f64) -> f64 {
        self.fraction_stem.calc1(dbh).clamp(0.0, 1.0)
    }

    pub fn volume_factor(&self) -> f64 {
        self.params.volume_factor
    }

    pub fn density(&self) -> f64 {
        self.params.wood_density
    }

    /// The h/d corridor (low = open grown, high = maximum competition).
    pub fn hd_range(&self, dbh: f64) -> (f64, f64) {
        (self.hd_low.calc1(dbh), self.hd_high.calc1(dbh))
    }

    // --- aging and mortality -------------------------------------------

    /// Aging factor in [0, 1]: the harmonic mean of relative height and
    /// relative age pushed through the species aging function.
    pub fn aging(&self, height: f64, age: u32) -> f64 {
        let rel_height = (height / self.params.maximum_height).min(1.0);
        let rel_age = (age as f64 / self.params.maximum_age).min(1.0);
        if rel_height <= 0.0 || rel_age <= 0.0 {
            return 1.0;
        }
        let x = 2.0 * rel_height * rel_age / (rel_height + rel_age);
        self.aging_expr.calc1(x).clamp(0.0, 1.0)
    }

    /// Estimate the age of a tree set up without one, from its height.
    pub fn estimate_age(&self, height: f64) -> u32 {
        (self.params.maximum_age * (height / self.params.maximum_height).min(1.0)).max(1.0) as u32
    }

    pub fn death_prob_intrinsic(&self) -> f64 {
        self.params.death_prob_intrinsic
    }

    pub fn death_prob_stress(&self, stress_index: f64) -> f64 {
        1.0 - (-self.params.death_prob_stress * stress_index).exp()
    }

    // --- light ----------------------------------------------------------

    /// Light response for a corrected LRI in [0, 1], interpolated between
    /// the intolerant and tolerant curve by the species' tolerance class.
    pub fn light_response(&self, lri: f64) -> f64 {
        let c = self.params.shade_tolerance;
        let v = self.light_response_intolerant.calc1(lri) * (1.0 - c)
            + self.light_response_tolerant.calc1(lri) * c;
        v.clamp(0.0, 1.0)
    }

    pub fn stamps(&self) -> &StampContainer {
        &self.stamps
    }

    pub fn stamp_index(&self, dbh: f64, height: f64) -> u32 {
        self.stamps.index_for(dbh, height)
    }

    pub fn stamp(&self, index: u32) -> &Stamp {
        self.stamps.get(index)
    }

    // --- regeneration ---------------------------------------------------

    pub fn is_seed_year(&self) -> bool {
        self.seed_year
    }

    pub fn seed_dispersal(&self) -> Option<&SeedDispersal> {
        self.seed_dispersal.as_ref()
    }

    pub fn seed_dispersal_mut(&mut self) -> Option<&mut SeedDispersal> {
        self.seed_dispersal.as_mut()
    }

    pub(crate) fn setup_seed_dispersal(&mut self, dispersal: SeedDispersal) {
        self.seed_dispersal = Some(dispersal);
    }

    /// Called by every tree after growth: a mature tree marks its 20 m
    /// seed cell as a seed source.
    pub fn seed_production(&self, age: u32, height: f64, lif_index: (usize, usize)) {
        if age < self.params.maturity_age || height < 4.0 {
            return;
        }
        if let Some(dispersal) = &self.seed_dispersal {
            dispersal.set_mature_tree(lif_index);
        }
    }

    /// Potential sapling height growth (m/yr) at height `h`.
    pub fn sapling_growth_potential(&self, h: f64) -> f64 {
        self.sapling_growth_potential.calc1(h).max(0.0)
    }

    fn new_year(&mut self, rng: &mut GameRng) {
        // a seed year is drawn with p = 1/interval; off years produce the
        // non-seed-year fraction
        let interval = self.params.seed_year_interval.max(1);
        self.seed_year = rng.chance(1.0 / interval as f64);
        // last year's seed probabilities are consumed; mature trees
        // restamp their sources during growth
        if let Some(dispersal) = &mut self.seed_dispersal {
            dispersal.clear();
        }
    }
}

/// Input for one species set: a name, its species records, and an optional
/// LRI-correction function of `lri` and `relH`.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct SpeciesSetData {
    pub name: String,
    pub lri_correction: String,
    pub species: Vec<SpeciesParams>,
}

impl Default for SpeciesSetData {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            // boost the readout of subdominant trees: at relH = 1 the raw
            // value passes through, smaller trees read brighter
            lri_correction: "lri^(0.5+0.5*relH)".to_string(),
            species: vec![SpeciesParams::default()],
        }
    }
}

/// A set of species sharing stamps and the LRI correction; selected per
/// resource unit through the environment.
#[derive(Debug)]
pub struct SpeciesSet {
    name: String,
    species: Vec<Species>,
    index_by_id: FxHashMap<String, usize>,
    lri_correction: Expression,
}

impl SpeciesSet {
    pub fn setup(data: SpeciesSetData, settings: &SettingsConfig, linearize: bool) -> Result<Self, SimError> {
        if data.species.is_empty() {
            return Err(SimError::Config(format!("species set '{}' is empty", data.name)));
        }
        let lri_correction = Expression::parse_strict(&data.lri_correction, &["lri", "relH"])?;
        if linearize {
            lri_correction.linearize2d(0.0, 1.0, 0.0, 1.0, 64, 64);
        }
        let mut species = Vec::with_capacity(data.species.len());
        let mut index_by_id = FxHashMap::default();
        for (i, params) in data.species.into_iter().enumerate() {
            if index_by_id.contains_key(&params.id) {
                return Err(SimError::Config(format!("duplicate species id '{}'", params.id)));
            }
            index_by_id.insert(params.id.clone(), i);
            species.push(Species::build(i, params, settings, linearize)?);
        }
        log::debug!("species set '{}' with {} species", data.name, species.len());
        Ok(Self { name: data.name, species, index_by_id, lri_correction })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn count(&self) -> usize {
        self.species.len()
    }

    pub fn species(&self, index: usize) -> &Species {
        &self.species[index]
    }

    pub fn species_mut(&mut self, index: usize) -> &mut Species {
        &mut self.species[index]
    }

    pub fn all(&self) -> &[Species] {
        &self.species
    }

    pub fn all_mut(&mut self) -> &mut [Species] {
        &mut self.species
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index_by_id.get(id).copied()
    }

    /// LRI correction for a raw readout sum and a relative height < 1.
    pub fn lri_correction(&self, lri: f64, rel_height: f64) -> f64 {
        self.lri_correction.calc2(lri.clamp(0.0, 1.0), rel_height.clamp(0.0, 1.0))
    }

    /// Seed-year draws for all species.
    pub fn new_year(&mut self, rng: &mut GameRng) {
        for s in &mut self.species {
            s.new_year(rng);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_set() -> SpeciesSet {
        SpeciesSet::setup(SpeciesSetData::default(), &SettingsConfig::default(), true).unwrap()
    }

    #[test]
    fn allometries_increase_with_dbh() {
        let set = default_set();
        let s = set.species(0);
        assert!(s.biomass_foliage(30.0) > s.biomass_foliage(10.0));
        assert!(s.biomass_woody(30.0) > s.biomass_woody(10.0));
        assert!(s.biomass_root(30.0) > s.biomass_root(10.0));
        assert!(s.biomass_foliage(10.0) > 0.0);
    }

    #[test]
    fn hd_corridor_is_ordered() {
        let set = default_set();
        let s = set.species(0);
        for dbh in [5.0, 15.0, 40.0, 70.0] {
            let (low, high) = s.hd_range(dbh);
            assert!(low < high, "dbh {dbh}: {low} !< {high}");
            assert!(low > 10.0 && high < 250.0);
        }
    }

    #[test]
    fn aging_declines_toward_limits() {
        let set = default_set();
        let s = set.species(0);
        let young = s.aging(10.0, 30);
        let old = s.aging(42.0, 450);
        assert!(young > 0.9);
        assert!(old < young);
        assert!((0.0..=1.0).contains(&old));
    }

    #[test]
    fn light_response_monotone() {
        let set = default_set();
        let s = set.species(0);
        let lo = s.light_response(0.1);
        let hi = s.light_response(0.9);
        assert!(hi > lo);
        assert!((0.0..=1.0).contains(&lo));
        assert!((0.0..=1.0).contains(&hi));
    }

    #[test]
    fn stress_mortality_saturates() {
        let set = default_set();
        let s = set.species(0);
        assert_eq!(s.death_prob_stress(0.0), 0.0);
        assert!(s.death_prob_stress(0.5) < s.death_prob_stress(1.0));
        assert!(s.death_prob_stress(10.0) <= 1.0);
    }

    #[test]
    fn lri_correction_boosts_subdominants() {
        let set = default_set();
        let raw = 0.4;
        let corrected = set.lri_correction(raw, 0.3);
        assert!(corrected >= raw);
        let at_top = set.lri_correction(raw, 1.0);
        assert!((at_top - raw).abs() < 0.02);
    }

    #[test]
    fn duplicate_ids_rejected() {
        let mut data = SpeciesSetData::default();
        data.species.push(SpeciesParams::default());
        assert!(SpeciesSet::setup(data, &SettingsConfig::default(), false).is_err());
    }

    #[test]
    fn seed_year_draw_is_deterministic() {
        let mut set = default_set();
        let mut rng_a = GameRng::new(11);
        let mut rng_b = GameRng::new(11);
        set.new_year(&mut rng_a);
        let a = set.species(0).is_seed_year();
        set.new_year(&mut rng_b);
        assert_eq!(set.species(0).is_seed_year(), a);
    }
}
