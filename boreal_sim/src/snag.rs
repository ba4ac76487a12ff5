// Standing and downed dead wood, and the litter inboxes.
//
// The snag component receives all dead biomass of a resource unit: leaf
// and fine-root senescence (labile litter), woody turnover and branch or
// coarse-root debris (refractory litter), and whole trees from mortality,
// management and disturbance. Standing stems decay with a climate-scaled
// species rate and transfer into the downed-wood pool; every year the
// accumulated labile and refractory fluxes are handed to the soil solver.
//
// All masses are kept as carbon/nitrogen pairs in kg/ha (a resource unit
// is one hectare, so per-unit kg are kg/ha). `CnPool` additionally tracks
// an input-weighted decomposition rate, the form the ICBM/2N soil model
// expects.

use serde::{Deserialize, Serialize};

use crate::species::Species;
use crate::tree::Tree;
use crate::types::BIOMASS_C_FRACTION;

/// A carbon/nitrogen pair (kg/ha).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CnPair {
    pub c: f64,
    pub n: f64,
}

impl CnPair {
    pub fn new(c: f64, n: f64) -> Self {
        Self { c, n }
    }

    pub fn is_empty(&self) -> bool {
        self.c == 0.0
    }

    pub fn is_valid(&self) -> bool {
        self.c >= 0.0 && self.n >= 0.0
    }

    /// C/N ratio.
    pub fn cn(&self) -> f64 {
        if self.n > 0.0 { self.c / self.n } else { 0.0 }
    }

    pub fn add(&mut self, other: CnPair) {
        self.c += other.c;
        self.n += other.n;
    }

    pub fn scaled(&self, factor: f64) -> CnPair {
        CnPair { c: self.c * factor, n: self.n * factor }
    }

    /// Biomass equivalent of the carbon content (same mass unit as `c`).
    pub fn biomass(&self) -> f64 {
        self.c / BIOMASS_C_FRACTION
    }
}

/// A C/N pool carrying a decomposition-rate parameter. Adding input
/// updates the rate as the carbon-weighted mean of pool and input rates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CnPool {
    pub c: f64,
    pub n: f64,
    /// Decomposition rate (1/yr) associated with this material.
    pub parameter: f64,
}

impl CnPool {
    pub fn new(c: f64, n: f64, parameter: f64) -> Self {
        Self { c, n, parameter }
    }

    pub fn is_empty(&self) -> bool {
        self.c == 0.0
    }

    pub fn cn(&self) -> f64 {
        if self.n > 0.0 { self.c / self.n } else { 0.0 }
    }

    pub fn pair(&self) -> CnPair {
        CnPair { c: self.c, n: self.n }
    }

    pub fn biomass(&self) -> f64 {
        self.c / BIOMASS_C_FRACTION
    }

    /// Add material with its own decomposition rate; the pool rate becomes
    /// the carbon-weighted mean.
    pub fn add_with_rate(&mut self, input: CnPair, rate: f64) {
        let total_c = self.c + input.c;
        if total_c > 0.0 {
            self.parameter = (self.parameter * self.c + rate * input.c) / total_c;
        }
        self.c += input.c;
        self.n += input.n;
    }

    pub fn clear(&mut self) {
        self.c = 0.0;
        self.n = 0.0;
    }
}

/// Carbon/nitrogen from biomass (kg) with a C/N ratio.
fn biomass_to_cn(biomass_kg: f64, cn_ratio: f64) -> CnPair {
    let c = biomass_kg * BIOMASS_C_FRACTION;
    CnPair { c, n: if cn_ratio > 0.0 { c / cn_ratio } else { 0.0 } }
}

/// The annual output of the snag dynamics: inputs for the soil solver.
#[derive(Clone, Copy, Debug, Default)]
pub struct SnagOutput {
    pub labile_to_soil: CnPool,
    pub refractory_to_soil: CnPool,
}

/// Snag pools of one resource unit.
#[derive(Clone, Debug, Default)]
pub struct Snag {
    /// Standing dead stems.
    standing: CnPool,
    /// Downed wood: branches, coarse roots, fallen stems.
    downed: CnPool,
    /// Fresh labile litter of the current year (foliage, fine roots).
    labile_flux: CnPool,
    /// Fresh refractory litter of the current year.
    refractory_flux: CnPool,
    /// Carbon removed from the unit by harvest this year (kg/ha).
    harvest_c: f64,
}

impl Snag {
    pub fn standing(&self) -> &CnPool {
        &self.standing
    }

    pub fn downed(&self) -> &CnPool {
        &self.downed
    }

    /// Total snag carbon (kg/ha).
    pub fn total_c(&self) -> f64 {
        self.standing.c + self.downed.c + self.labile_flux.c + self.refractory_flux.c
    }

    pub fn harvest_c(&self) -> f64 {
        self.harvest_c
    }

    /// Leaf/fine-root senescence of a living tree.
    pub fn add_turnover_litter(&mut self, species: &Species, foliage_kg: f64, fineroot_kg: f64) {
        let p = &species.params;
        self.labile_flux.add_with_rate(
            biomass_to_cn(foliage_kg, p.cn_foliage),
            p.decomp_rate_labile,
        );
        self.labile_flux.add_with_rate(
            biomass_to_cn(fineroot_kg, p.cn_fineroot),
            p.decomp_rate_labile,
        );
    }

    /// Woody turnover (e.g. coarse-root surplus over the allometry).
    pub fn add_turnover_wood(&mut self, species: &Species, woody_kg: f64) {
        let p = &species.params;
        self.refractory_flux
            .add_with_rate(biomass_to_cn(woody_kg, p.cn_wood), p.decomp_rate_refractory);
    }

    /// A tree died: stem stands, branches and coarse roots go down,
    /// foliage and fine roots are labile litter.
    pub fn add_mortality(&mut self, species: &Species, tree: &Tree) {
        let p = &species.params;
        self.standing
            .add_with_rate(biomass_to_cn(tree.woody_mass, p.cn_wood), p.snag_decomp_rate);
        let branches = species.biomass_branch(tree.dbh);
        self.downed.add_with_rate(
            biomass_to_cn(branches + tree.coarse_root_mass, p.cn_wood),
            p.decomp_rate_refractory,
        );
        self.labile_flux.add_with_rate(
            biomass_to_cn(tree.foliage_mass, p.cn_foliage),
            p.decomp_rate_labile,
        );
        self.labile_flux.add_with_rate(
            biomass_to_cn(tree.fine_root_mass, p.cn_fineroot),
            p.decomp_rate_labile,
        );
    }

    /// A tree was removed by management: the given fractions stay on site,
    /// the rest leaves the unit as harvest.
    pub fn add_harvest(
        &mut self,
        species: &Species,
        tree: &Tree,
        stem_to_snag: f64,
        branch_to_snag: f64,
        foliage_to_soil: f64,
    ) {
        let p = &species.params;
        let branches = species.biomass_branch(tree.dbh);
        self.standing.add_with_rate(
            biomass_to_cn(tree.woody_mass * stem_to_snag, p.cn_wood),
            p.snag_decomp_rate,
        );
        self.downed.add_with_rate(
            biomass_to_cn(branches * branch_to_snag + tree.coarse_root_mass, p.cn_wood),
            p.decomp_rate_refractory,
        );
        self.labile_flux.add_with_rate(
            biomass_to_cn(tree.foliage_mass * foliage_to_soil + tree.fine_root_mass, p.cn_foliage),
            p.decomp_rate_labile,
        );
        let removed = tree.woody_mass * (1.0 - stem_to_snag) + branches * (1.0 - branch_to_snag)
            + tree.foliage_mass * (1.0 - foliage_to_soil);
        self.harvest_c += removed * BIOMASS_C_FRACTION;
    }

    /// A disturbance killed the tree with explicit routing fractions
    /// (anything not routed burns/exports).
    #[allow(clippy::too_many_arguments)]
    pub fn add_disturbance(
        &mut self,
        species: &Species,
        tree: &Tree,
        stem_to_snag: f64,
        stem_to_soil: f64,
        branch_to_snag: f64,
        branch_to_soil: f64,
        foliage_to_soil: f64,
    ) {
        let p = &species.params;
        let branches = species.biomass_branch(tree.dbh);
        self.standing.add_with_rate(
            biomass_to_cn(tree.woody_mass * stem_to_snag, p.cn_wood),
            p.snag_decomp_rate,
        );
        self.downed.add_with_rate(
            biomass_to_cn(
                tree.woody_mass * stem_to_soil
                    + branches * (branch_to_snag + branch_to_soil)
                    + tree.coarse_root_mass,
                p.cn_wood,
            ),
            p.decomp_rate_refractory,
        );
        self.labile_flux.add_with_rate(
            biomass_to_cn(tree.foliage_mass * foliage_to_soil + tree.fine_root_mass, p.cn_foliage),
            p.decomp_rate_labile,
        );
    }

    /// Advance the snag pools one year. `re` is the climate factor scaling
    /// decomposition. Returns the inputs for the soil solver and resets
    /// the per-year fluxes.
    pub fn calculate_year(&mut self, re: f64) -> SnagOutput {
        // standing stems transfer to downed wood
        if !self.standing.is_empty() {
            let rate = 1.0 - (-self.standing.parameter * re).exp();
            let fall = self.standing.pair().scaled(rate);
            self.standing.c -= fall.c;
            self.standing.n -= fall.n;
            self.downed.add_with_rate(fall, self.standing.parameter);
        }
        // downed wood feeds the refractory soil input
        if !self.downed.is_empty() {
            let rate = 1.0 - (-self.downed.parameter * re).exp();
            let to_soil = self.downed.pair().scaled(rate);
            self.downed.c -= to_soil.c;
            self.downed.n -= to_soil.n;
            self.refractory_flux.add_with_rate(to_soil, self.downed.parameter);
        }

        let output = SnagOutput {
            labile_to_soil: self.labile_flux,
            refractory_to_soil: self.refractory_flux,
        };
        self.labile_flux.clear();
        self.refractory_flux.clear();
        output
    }

    /// Reset the per-year harvest tracker (start of year).
    pub fn new_year(&mut self) {
        self.harvest_c = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SettingsConfig;
    use crate::species::{SpeciesSet, SpeciesSetData};

    fn species_set() -> SpeciesSet {
        SpeciesSet::setup(SpeciesSetData::default(), &SettingsConfig::default(), false).unwrap()
    }

    #[test]
    fn cn_pool_weighted_rate() {
        let mut pool = CnPool::new(100.0, 2.0, 0.1);
        pool.add_with_rate(CnPair::new(100.0, 2.0), 0.3);
        assert!((pool.parameter - 0.2).abs() < 1e-12);
        assert_eq!(pool.c, 200.0);
    }

    #[test]
    fn mortality_routes_all_compartments() {
        let set = species_set();
        let s = set.species(0);
        let tree = crate::tree::Tree::setup(1, s, (10, 10), 30.0, 20.0, 60, 0.6);
        let mut snag = Snag::default();
        snag.add_mortality(s, &tree);

        let biomass_in = tree.woody_mass
            + tree.foliage_mass
            + tree.fine_root_mass
            + tree.coarse_root_mass
            + s.biomass_branch(tree.dbh);
        assert!((snag.total_c() - biomass_in * BIOMASS_C_FRACTION).abs() < 1e-6);
        assert!(snag.standing().c > 0.0);
        assert!(snag.downed().c > 0.0);
    }

    #[test]
    fn yearly_decay_conserves_carbon() {
        let set = species_set();
        let s = set.species(0);
        let tree = crate::tree::Tree::setup(1, s, (10, 10), 30.0, 20.0, 60, 0.6);
        let mut snag = Snag::default();
        snag.add_mortality(s, &tree);
        let before = snag.total_c();
        let out = snag.calculate_year(1.0);
        let after = snag.total_c();
        let to_soil = out.labile_to_soil.c + out.refractory_to_soil.c;
        assert!((before - after - to_soil).abs() < 1e-6);
        assert!(to_soil > 0.0);
    }

    #[test]
    fn standing_pool_shrinks_monotonically() {
        let set = species_set();
        let s = set.species(0);
        let tree = crate::tree::Tree::setup(1, s, (10, 10), 40.0, 25.0, 90, 0.6);
        let mut snag = Snag::default();
        snag.add_mortality(s, &tree);
        let mut last = snag.standing().c;
        for _ in 0..50 {
            snag.calculate_year(1.0);
            assert!(snag.standing().c <= last);
            last = snag.standing().c;
        }
        assert!(last < 0.2 * tree.woody_mass * BIOMASS_C_FRACTION);
    }

    #[test]
    fn harvest_tracks_removed_carbon() {
        let set = species_set();
        let s = set.species(0);
        let tree = crate::tree::Tree::setup(1, s, (10, 10), 30.0, 20.0, 60, 0.6);
        let mut snag = Snag::default();
        snag.add_harvest(s, &tree, 0.0, 0.0, 0.0);
        // everything above ground was removed; coarse/fine roots stay
        assert!(snag.harvest_c() > 0.0);
        assert!(snag.standing().is_empty());
    }
}
