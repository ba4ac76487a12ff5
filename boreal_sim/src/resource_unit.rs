// The resource unit: a 1-ha cell owning trees and pools.
//
// The unit is the granule of parallel scheduling: every phase of the
// annual loop fans out over resource units, and a worker touches only its
// own trees, its own pools (snag, soil, water, saplings, statistics) and
// the shared light/height fields through their commutative operations.
//
// Aggregation jobs of the unit: the WLA/LRI accumulator that turns
// per-tree light readouts into the unit-level `lri_modifier`; splitting
// the stand-level production among trees proportional to leaf area x
// light response (`intercepted_area`); and the carbon chain
// snag -> soil with the climate factor `re`.
//
// `id == -1` marks a non-stockable unit: it stays addressable on the grid
// but all per-tree phases skip it.

use boreal_prng::GameRng;

use crate::climate::Climate;
use crate::config::{ProjectConfig, SiteConfig};
use crate::error::SimError;
use crate::grass::GrassCover;
use crate::grid::Rect;
use crate::light::LightField;
use crate::production::{Production3pg, SpeciesResponse};
use crate::saplings::{
    INITIAL_SAPLING_HEIGHT, SaplingCell, SaplingFate, establishment_probability, grow_sapling,
};
use crate::snag::Snag;
use crate::soil::Soil;
use crate::species::SpeciesSet;
use crate::stats::StandStatistics;
use crate::tree::{LightContext, Tree};
use crate::types::{PX_PER_HEIGHT, PX_PER_RU, RU_AREA, SAPLING_PROMOTION_HEIGHT};
use crate::water::WaterCycle;

/// Per-species state of one resource unit.
#[derive(Debug, Default)]
pub struct RuSpecies {
    pub statistics: StandStatistics,
    pub statistics_dead: StandStatistics,
    pub statistics_mgmt: StandStatistics,
    pub response: SpeciesResponse,
    pub prod: Production3pg,
}

#[derive(Debug)]
pub struct ResourceUnit {
    index: usize,
    id: i32,
    bounding_box: Rect,
    /// LIF index of the south-west corner of the unit.
    lif_corner: (usize, usize),
    climate: usize,
    species_set: usize,
    trees: Vec<Tree>,
    tree_id_counter: u32,
    ru_species: Vec<RuSpecies>,
    snag: Snag,
    soil: Option<Soil>,
    water: WaterCycle,
    /// 2 m regeneration cells (row-major 50x50); empty when regeneration
    /// is disabled.
    sapling_cells: Vec<SaplingCell>,
    rng: GameRng,
    site: SiteConfig,
    stockable_area: f64,
    stocked_area: f64,
    // light accumulators of the year
    wla_sum: f64,
    lri_sum: f64,
    aggregated_light_response: f64,
    effective_area_per_wla: f64,
    lri_modifier: f64,
    has_dead_trees: bool,
    available_nitrogen: f64,
}

impl ResourceUnit {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        index: usize,
        id: i32,
        bounding_box: Rect,
        lif_corner: (usize, usize),
        climate: usize,
        species_set: usize,
        species_count: usize,
        site: SiteConfig,
        config: &ProjectConfig,
        seed: u64,
    ) -> Result<Self, SimError> {
        site.validate()?;
        let settings = &config.model.settings;
        let water = WaterCycle::setup(&site, &settings.permafrost)?;
        let soil = if settings.carbon_cycle_enabled {
            Some(Soil::setup(
                &settings.soil,
                site.som_decomp_rate,
                site.soil_humification_rate,
                crate::snag::CnPool::new(
                    site.young_labile_c,
                    site.young_labile_n,
                    site.young_labile_decomp_rate,
                ),
                crate::snag::CnPool::new(
                    site.young_refractory_c,
                    site.young_refractory_n,
                    site.young_refractory_decomp_rate,
                ),
                crate::snag::CnPair::new(site.som_c, site.som_n),
                site.available_nitrogen,
            )?)
        } else {
            None
        };
        let sapling_cells = if settings.regeneration_enabled {
            vec![SaplingCell::default(); PX_PER_RU * PX_PER_RU]
        } else {
            Vec::new()
        };
        let available_nitrogen = site.available_nitrogen;
        Ok(Self {
            index,
            id,
            bounding_box,
            lif_corner,
            climate,
            species_set,
            trees: Vec::new(),
            tree_id_counter: 0,
            ru_species: (0..species_count).map(|_| RuSpecies::default()).collect(),
            snag: Snag::default(),
            soil,
            water,
            sapling_cells,
            rng: GameRng::new(seed),
            site,
            stockable_area: RU_AREA,
            stocked_area: 0.0,
            wla_sum: 0.0,
            lri_sum: 0.0,
            aggregated_light_response: 0.0,
            effective_area_per_wla: 0.0,
            lri_modifier: 1.0,
            has_dead_trees: false,
            available_nitrogen,
        })
    }

    // --- accessors ------------------------------------------------------

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn set_id(&mut self, id: i32) {
        self.id = id;
    }

    pub fn is_stockable(&self) -> bool {
        self.id != -1
    }

    pub fn bounding_box(&self) -> Rect {
        self.bounding_box
    }

    pub fn lif_corner(&self) -> (usize, usize) {
        self.lif_corner
    }

    pub fn climate_index(&self) -> usize {
        self.climate
    }

    pub fn species_set_index(&self) -> usize {
        self.species_set
    }

    pub fn trees(&self) -> &[Tree] {
        &self.trees
    }

    pub fn trees_mut(&mut self) -> &mut [Tree] {
        &mut self.trees
    }

    pub fn ru_species(&self) -> &[RuSpecies] {
        &self.ru_species
    }

    pub fn snag(&self) -> &Snag {
        &self.snag
    }

    pub fn snag_mut(&mut self) -> &mut Snag {
        &mut self.snag
    }

    pub fn soil(&self) -> Option<&Soil> {
        self.soil.as_ref()
    }

    pub fn water(&self) -> &WaterCycle {
        &self.water
    }

    pub fn sapling_cells(&self) -> &[SaplingCell] {
        &self.sapling_cells
    }

    pub fn rng_mut(&mut self) -> &mut GameRng {
        &mut self.rng
    }

    pub fn site(&self) -> &SiteConfig {
        &self.site
    }

    pub fn stockable_area(&self) -> f64 {
        self.stockable_area
    }

    pub fn set_stockable_area(&mut self, area: f64) {
        self.stockable_area = area.min(RU_AREA);
    }

    pub fn stocked_area(&self) -> f64 {
        self.stocked_area
    }

    pub fn set_stocked_area(&mut self, area: f64) {
        self.stocked_area = area;
    }

    pub fn lri_modifier(&self) -> f64 {
        self.lri_modifier
    }

    /// Sum of leaf area x light response over the unit's trees (set
    /// during the growth phase).
    pub fn aggregated_light_response(&self) -> f64 {
        self.aggregated_light_response
    }

    pub fn available_nitrogen(&self) -> f64 {
        self.available_nitrogen
    }

    pub fn has_dead_trees(&self) -> bool {
        self.has_dead_trees
    }

    pub fn mark_dead_trees(&mut self) {
        self.has_dead_trees = true;
    }

    /// Leaf area (m2) of all living trees.
    pub fn total_leaf_area(&self) -> f64 {
        self.trees.iter().filter(|t| !t.is_dead()).map(|t| t.leaf_area).sum()
    }

    /// Leaf-area index over the hectare.
    pub fn leaf_area_index(&self) -> f64 {
        self.total_leaf_area() / RU_AREA
    }

    /// Total living biomass (kg).
    pub fn total_biomass(&self, set: &SpeciesSet) -> f64 {
        self.trees
            .iter()
            .filter(|t| !t.is_dead())
            .map(|t| {
                t.foliage_mass
                    + t.woody_mass
                    + t.fine_root_mass
                    + t.coarse_root_mass
                    + set.species(t.species).biomass_branch(t.dbh)
            })
            .sum()
    }

    /// Create a tree on this unit at a LIF-grid position.
    pub fn add_tree(
        &mut self,
        set: &SpeciesSet,
        species: usize,
        lif_index: (usize, usize),
        dbh: f64,
        height: f64,
        age: u32,
        opacity_k: f64,
    ) -> u32 {
        self.tree_id_counter += 1;
        let id = ((self.index as u32) << 18) | self.tree_id_counter;
        let tree = Tree::setup(id, set.species(species), lif_index, dbh, height, age, opacity_k);
        self.trees.push(tree);
        id
    }

    // --- annual-loop callbacks -----------------------------------------

    /// Reset the per-year accumulators.
    pub fn new_year(&mut self) {
        self.wla_sum = 0.0;
        self.lri_sum = 0.0;
        self.aggregated_light_response = 0.0;
        self.effective_area_per_wla = 0.0;
        self.stocked_area = 0.0;
        self.snag.new_year();
    }

    /// Light phase 1: stamp heights, then light-influence patterns.
    pub fn apply_pattern(&self, set: &SpeciesSet, ctx: &LightContext<'_>) {
        if !self.is_stockable() {
            return;
        }
        for tree in &self.trees {
            tree.height_grid(set.species(tree.species), ctx);
        }
        for tree in &self.trees {
            tree.apply_lip(set.species(tree.species), ctx);
        }
    }

    /// Light phase 2: read the light resource index of every tree and
    /// accumulate the unit's weighted leaf area.
    pub fn read_pattern(&mut self, set: &SpeciesSet, ctx: &LightContext<'_>) {
        if !self.is_stockable() {
            return;
        }
        let mut wla = 0.0;
        let mut lri = 0.0;
        for tree in &mut self.trees {
            tree.read_lif(set.species(tree.species), set, ctx);
            wla += tree.leaf_area;
            lri += tree.leaf_area * tree.lri;
        }
        self.wla_sum = wla;
        self.lri_sum = lri;
    }

    /// Stand-level production: water cycle, responses, 3PG per species.
    /// Also derives the unit's LRI modifier from the light accumulators.
    pub fn production(&mut self, set: &SpeciesSet, climate: &Climate, config: &ProjectConfig) {
        if !self.is_stockable() {
            return;
        }
        // understocked units scale the light readout up so that the mean
        // corrected LRI approaches 1 (explicitly 1.0 for an empty unit)
        self.lri_modifier = if self.wla_sum > 0.0 {
            let mean_lri = self.lri_sum / self.wla_sum;
            RU_AREA / (mean_lri * RU_AREA).max(1.0)
        } else {
            1.0
        };

        // organic-layer fuel for the permafrost: above-ground share of the
        // young soil pools (t/ha)
        let organic = self
            .soil
            .as_ref()
            .map(|s| 0.5 * (s.young_labile().biomass() + s.young_refractory().biomass()));
        self.water.new_year(climate.mean_annual_temperature(), organic);
        let lai = self.leaf_area_index();
        self.water.run_year(climate, lai);

        if let Some(soil) = &self.soil {
            self.available_nitrogen = soil.available_nitrogen();
        }

        let settings = &config.model.settings;
        for (i, rus) in self.ru_species.iter_mut().enumerate() {
            rus.response = SpeciesResponse::calculate(
                set.species(i),
                climate,
                self.water.monthly_rel_water(),
                self.available_nitrogen,
                settings.temperature_tau,
            );
            rus.prod.calculate(&rus.response);
        }
    }

    /// Effective interception area of one tree (m2): the unit's effective
    /// area split proportional to leaf area x light response.
    pub fn intercepted_area(&self, leaf_area: f64, light_response: f64) -> f64 {
        self.effective_area_per_wla * leaf_area * light_response
    }

    /// Tree growth: light responses, interception split, per-tree growth
    /// and mortality, statistics.
    pub fn grow(&mut self, set: &SpeciesSet, config: &ProjectConfig) -> Result<(), SimError> {
        if !self.is_stockable() {
            return Ok(());
        }
        let settings = &config.model.settings;

        // before grow: reset the per-species statistics
        for rus in &mut self.ru_species {
            rus.statistics.clear();
            rus.statistics_dead.clear();
        }

        // light responses and the aggregated weighted leaf area
        let lri_modifier = self.lri_modifier;
        let mut aggregated = 0.0;
        for tree in &mut self.trees {
            tree.calc_light_response(set.species(tree.species), lri_modifier);
            aggregated += tree.leaf_area * tree.light_response;
        }
        self.aggregated_light_response = aggregated;

        // effective area of the unit: stocked area x Beer-Lambert
        // interception of the canopy LAI (leaf area over the stocked part)
        let lai = if self.stocked_area > 0.0 {
            self.total_leaf_area() / self.stocked_area
        } else {
            0.0
        };
        let interception = 1.0 - (-settings.light_extinction_coefficient * lai).exp();
        let effective_area = self.stocked_area * interception;
        self.effective_area_per_wla =
            if aggregated > 0.0 { effective_area / aggregated } else { 0.0 };

        let opacity_k = settings.light_extinction_coefficient_opacity;
        let mortality = settings.mortality_enabled;
        let effective_area_per_wla = self.effective_area_per_wla;

        let Self { trees, ru_species, snag, rng, .. } = self;
        let mut invariant_error = None;
        for tree in trees.iter_mut() {
            if tree.is_dead() {
                continue;
            }
            let species = set.species(tree.species);
            let rus = &mut ru_species[tree.species];
            let effective_area =
                effective_area_per_wla * tree.leaf_area * tree.light_response;
            let d = tree.grow(
                species,
                rus.prod.gpp_per_area(),
                effective_area,
                rus.prod.root_fraction(),
                lri_modifier,
                mortality,
                opacity_k,
                snag,
                rng,
            );
            if !tree.dimensions_valid() {
                invariant_error.get_or_insert_with(|| SimError::GrowthInvariant {
                    id: tree.id,
                    message: format!(
                        "dbh {:.2} height {:.2} foliage {:.3}",
                        tree.dbh, tree.height, tree.foliage_mass
                    ),
                });
                tree.set_dead();
            }
            if tree.is_dead() {
                self.has_dead_trees = true;
                rus.statistics_dead.add(tree, species, Some(&d));
            } else {
                rus.statistics.add(tree, species, Some(&d));
            }
        }
        match invariant_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Remove dead trees from storage. Tree slices taken before this call
    /// are invalid afterwards; the model calls it only at phase barriers.
    pub fn clean_tree_list(&mut self) {
        if self.has_dead_trees {
            self.trees.retain(|t| !t.is_dead());
            self.has_dead_trees = false;
        }
    }

    /// Recreate the living statistics outside the growth phase (after
    /// management or disturbance removals).
    pub fn recreate_stand_statistics(&mut self, set: &SpeciesSet) {
        for rus in &mut self.ru_species {
            rus.statistics.clear();
        }
        for tree in &self.trees {
            if !tree.is_dead() {
                self.ru_species[tree.species].statistics.add(
                    tree,
                    set.species(tree.species),
                    None,
                );
            }
        }
    }

    // --- regeneration ---------------------------------------------------

    /// Establishment screen on the 2 m cells of this unit.
    pub fn establishment(
        &mut self,
        set: &SpeciesSet,
        lif: &LightField,
        dominance: &crate::light::DominanceField,
        grass: &GrassCover,
        climate: &Climate,
    ) {
        if !self.is_stockable() || self.sapling_cells.is_empty() {
            return;
        }
        let gs_water = self.water.data().growing_season_water;
        let nitrogen = self.available_nitrogen;

        // species in random order so no species systematically grabs the
        // free cells first
        let mut order: Vec<usize> = (0..set.count()).collect();
        for i in (1..order.len()).rev() {
            let j = self.rng.range_usize(0, i + 1);
            order.swap(i, j);
        }

        for species_index in order {
            let species = set.species(species_index);
            let Some(dispersal) = species.seed_dispersal() else { continue };
            let p_abiotic =
                establishment_probability(species, climate, gs_water, nitrogen);
            if p_abiotic <= 0.0 {
                continue;
            }
            for cell_index in 0..self.sapling_cells.len() {
                let cell = &self.sapling_cells[cell_index];
                if cell.has_species(species_index)
                    || cell.max_height() >= SAPLING_PROMOTION_HEIGHT
                {
                    continue;
                }
                let (gx, gy) = self.cell_to_lif(cell_index);
                let (cx, cy) = lif.cell_center(gx, gy);
                let seed_value = dispersal.value_at(cx, cy) as f64;
                if seed_value <= 0.0 {
                    continue;
                }
                // light for a sapling: corrected as if reading at 4 m
                let dominant = dominance.height(gx / PX_PER_HEIGHT, gy / PX_PER_HEIGHT) as f64;
                let hrel = (4.0 / dominant.max(4.0)).min(1.0);
                let lif_corrected = set.lri_correction(lif.get(gx, gy) as f64, hrel);
                let grass_effect = grass.effect_at(gy * lif.size_x() + gx);

                let p = seed_value * p_abiotic * lif_corrected * grass_effect;
                if self.rng.next_f64() < p {
                    self.sapling_cells[cell_index].establish(species_index);
                }
            }
        }
    }

    /// Sapling growth, death and promotion to trees.
    pub fn sapling_growth(
        &mut self,
        set: &SpeciesSet,
        lif: &LightField,
        dominance: &crate::light::DominanceField,
        config: &ProjectConfig,
    ) {
        if !self.is_stockable() || self.sapling_cells.is_empty() {
            return;
        }
        let browsing = &config.model.settings.browsing;
        let opacity_k = config.model.settings.light_extinction_coefficient_opacity;
        let mut promotions: Vec<(usize, usize, f64, u16)> = Vec::new();

        for cell_index in 0..self.sapling_cells.len() {
            let (gx, gy) = self.cell_to_lif(cell_index);
            let light = lif.get(gx, gy) as f64;
            let dominant = dominance.height(gx / PX_PER_HEIGHT, gy / PX_PER_HEIGHT) as f64;

            let cell = &mut self.sapling_cells[cell_index];
            let mut i = 0;
            while i < cell.saplings.len() {
                let sapling = &mut cell.saplings[i];
                let species = set.species(sapling.species as usize);
                let hrel = (sapling.height.max(INITIAL_SAPLING_HEIGHT) / dominant.max(4.0))
                    .min(1.0);
                let corrected = set.lri_correction(light, hrel);
                let browsed = browsing.enabled
                    && self.rng.next_f64()
                        < browsing.browsing_pressure * species.params.browsing_probability;
                match grow_sapling(sapling, species, corrected, browsed) {
                    SaplingFate::Alive => i += 1,
                    SaplingFate::Died => {
                        cell.saplings.swap_remove(i);
                    }
                    SaplingFate::Promoted { dbh } => {
                        promotions.push((
                            cell_index,
                            sapling.species as usize,
                            dbh,
                            sapling.age,
                        ));
                        cell.saplings.swap_remove(i);
                    }
                }
            }
        }

        for (cell_index, species_index, dbh, age) in promotions {
            let lif_index = self.cell_to_lif(cell_index);
            let height = SAPLING_PROMOTION_HEIGHT;
            self.add_tree(set, species_index, lif_index, dbh, height, age as u32, opacity_k);
        }
    }

    /// Remove the living trees matched by `predicate` (management or
    /// disturbance path); retained biomass fractions go to the snag
    /// pools. Returns the number of removed trees.
    pub fn remove_trees_where(
        &mut self,
        set: &SpeciesSet,
        mut predicate: impl FnMut(&Tree, &mut GameRng) -> bool,
        stem_to_snag: f64,
        branch_to_snag: f64,
        foliage_to_soil: f64,
    ) -> usize {
        let Self { trees, snag, rng, ru_species, .. } = self;
        let mut removed = 0;
        for tree in trees.iter_mut() {
            if tree.is_dead() {
                continue;
            }
            if predicate(tree, rng) {
                let species = set.species(tree.species);
                tree.remove(species, snag, stem_to_snag, branch_to_snag, foliage_to_soil);
                ru_species[tree.species].statistics_mgmt.add(tree, species, None);
                removed += 1;
            }
        }
        if removed > 0 {
            self.has_dead_trees = true;
        }
        removed
    }

    /// LIF-grid index of a sapling cell.
    fn cell_to_lif(&self, cell_index: usize) -> (usize, usize) {
        (
            self.lif_corner.0 + cell_index % PX_PER_RU,
            self.lif_corner.1 + cell_index / PX_PER_RU,
        )
    }

    // --- carbon cycle ---------------------------------------------------

    /// Snag decay and the ICBM/2N soil update.
    pub fn carbon_cycle(&mut self, climate: &Climate) -> Result<(), SimError> {
        let Some(soil) = &mut self.soil else { return Ok(()) };
        let re = climate_factor_re(climate, self.water.data().growing_season_water);
        let out = self.snag.calculate_year(re);
        soil.set_climate_factor(re);
        soil.set_soil_input(out.labile_to_soil, out.refractory_to_soil);
        soil.calculate_year()?;
        self.available_nitrogen = soil.available_nitrogen();
        Ok(())
    }
}

/// Climate factor scaling decomposition: Lloyd & Taylor (1994)
/// temperature dependence normalized at 10 C, damped by water
/// availability.
pub fn climate_factor_re(climate: &Climate, growing_season_water: f64) -> f64 {
    let t = climate.mean_annual_temperature();
    let temp_factor = if t <= -46.0 {
        0.0
    } else {
        (308.56 * (1.0 / 56.02 - 1.0 / (t + 46.02))).exp()
    };
    let water_factor = 0.2 + 0.8 * growing_season_water.clamp(0.0, 1.0);
    temp_factor * water_factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::climate::{Climate, synthetic_year};
    use crate::config::ProjectConfig;
    use crate::light::DominanceField;
    use crate::species::{SpeciesSet, SpeciesSetData};

    fn setup_world(carbon: bool) -> (ProjectConfig, SpeciesSet, Climate) {
        let mut config = ProjectConfig::default();
        config.model.settings.carbon_cycle_enabled = carbon;
        config.model.settings.mortality_enabled = false;
        let set =
            SpeciesSet::setup(SpeciesSetData::default(), &config.model.settings, true).unwrap();
        let climate = Climate::from_days("t", synthetic_year(2000, 6.0, 12.0, 700.0)).unwrap();
        (config, set, climate)
    }

    fn make_ru(config: &ProjectConfig) -> ResourceUnit {
        ResourceUnit::new(
            0,
            0,
            Rect::from_size(0.0, 0.0, 100.0, 100.0),
            (30, 30),
            0,
            0,
            1,
            config.model.site.clone(),
            config,
            7,
        )
        .unwrap()
    }

    fn light_world() -> (LightField, DominanceField) {
        let rect = Rect::from_size(-60.0, -60.0, 220.0, 220.0);
        let lif = LightField::new(rect, 2.0);
        let mut dom = DominanceField::new(rect, 10.0);
        dom.reset_for_year(4.0);
        (lif, dom)
    }

    #[test]
    fn lri_modifier_defaults_to_one_for_empty_unit() {
        let (config, set, climate) = setup_world(false);
        let mut ru = make_ru(&config);
        ru.production(&set, &climate, &config);
        assert_eq!(ru.lri_modifier(), 1.0);
    }

    #[test]
    fn full_year_on_one_unit_grows_the_tree() {
        let (config, set, climate) = setup_world(false);
        let mut ru = make_ru(&config);
        let (lif, dom) = light_world();
        ru.add_tree(&set, 0, (55, 55), 30.0, 20.0, 50, 0.6);

        ru.new_year();
        let ctx = LightContext { lif: &lif, dominance: &dom, torus: false };
        ru.apply_pattern(&set, &ctx);
        ru.read_pattern(&set, &ctx);
        ru.set_stocked_area(100.0); // one stocked height pixel
        ru.production(&set, &climate, &config);
        let dbh_before = ru.trees()[0].dbh;
        ru.grow(&set, &config).unwrap();

        let tree = &ru.trees()[0];
        assert!(tree.lri > 0.9, "lone tree lri = {}", tree.lri);
        assert!(tree.dbh > dbh_before);
        assert!(tree.dbh - dbh_before < 1.0, "increment {}", tree.dbh - dbh_before);
        assert!(ru.ru_species()[0].statistics.npp() > 0.0);
    }

    #[test]
    fn grow_splits_production_by_light_and_leaf_area() {
        let (config, set, climate) = setup_world(false);
        let mut ru = make_ru(&config);
        let (lif, dom) = light_world();
        ru.add_tree(&set, 0, (45, 55), 35.0, 22.0, 60, 0.6);
        ru.add_tree(&set, 0, (65, 55), 15.0, 12.0, 30, 0.6);
        ru.new_year();
        let ctx = LightContext { lif: &lif, dominance: &dom, torus: false };
        ru.apply_pattern(&set, &ctx);
        ru.read_pattern(&set, &ctx);
        ru.set_stocked_area(200.0);
        ru.production(&set, &climate, &config);
        ru.grow(&set, &config).unwrap();
        let big = ru.intercepted_area(ru.trees()[0].leaf_area, ru.trees()[0].light_response);
        let small = ru.intercepted_area(ru.trees()[1].leaf_area, ru.trees()[1].light_response);
        assert!(big > small);
    }

    #[test]
    fn clean_tree_list_drops_dead_trees() {
        let (config, set, _) = setup_world(false);
        let mut ru = make_ru(&config);
        ru.add_tree(&set, 0, (40, 40), 20.0, 15.0, 40, 0.6);
        ru.add_tree(&set, 0, (60, 60), 20.0, 15.0, 40, 0.6);
        ru.trees_mut()[0].set_dead();
        ru.mark_dead_trees();
        ru.clean_tree_list();
        assert_eq!(ru.trees().len(), 1);
        assert!(!ru.has_dead_trees());
    }

    #[test]
    fn carbon_cycle_updates_nitrogen() {
        let (config, set, climate) = setup_world(true);
        let mut ru = make_ru(&config);
        // a dead tree feeds the snag pools
        let tree = Tree::setup(9, set.species(0), (40, 40), 25.0, 18.0, 50, 0.6);
        ru.snag_mut().add_mortality(set.species(0), &tree);
        // water state for the climate factor
        ru.production(&set, &climate, &config);
        ru.carbon_cycle(&climate).unwrap();
        assert!(ru.available_nitrogen() > 0.0);
        assert!(ru.soil().unwrap().total_c() > 0.0);
    }

    #[test]
    fn regeneration_cells_exist_only_when_enabled() {
        let (config, ..) = setup_world(false);
        let ru = make_ru(&config);
        assert!(ru.sapling_cells().is_empty());

        let mut config2 = ProjectConfig::default();
        config2.model.settings.regeneration_enabled = true;
        let ru2 = make_ru(&config2);
        assert_eq!(ru2.sapling_cells().len(), PX_PER_RU * PX_PER_RU);
    }
}
