// The model: landscape setup and the annual driver.
//
// Owns the three aligned grids (2 m light field, 10 m dominance field,
// 100 m resource-unit map), the resource units, species sets, climates,
// the environment mapping, the module registry and the output manager.
// Everything else borrows from here; back-references are indices valid
// for the life of the model (no reference counting).
//
// `run_year` drives the fixed phase sequence over the landscape; each
// phase fans out over resource units via the thread runner and the driver
// checks the cancel flag between phases. A phase error leaves the model
// in the paused-with-error state: the year is not committed, no outputs
// are written, and the caller may inspect the error.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use boreal_prng::GameRng;

use crate::climate::{Climate, ClimateDay};
use crate::config::ProjectConfig;
use crate::environment::{CLIMATE_KEY, Environment, SPECIES_KEY};
use crate::error::SimError;
use crate::grass::GrassCover;
use crate::grid::{Grid, Rect, parse_esri_ascii};
use crate::light::{DominanceField, LightField, height_flags};
use crate::management::{ExpressionThinning, Management};
use crate::modules::ModuleRegistry;
use crate::outputs::{OutputContext, OutputManager};
use crate::resource_unit::ResourceUnit;
use crate::seed_dispersal::{DispersalParams, SeedDispersal};
use crate::species::{SpeciesSet, SpeciesSetData};
use crate::threading::ThreadRunner;
use crate::timeevents::TimeEvents;
use crate::tree::LightContext;
use crate::types::{HEIGHT_CELL_SIZE, HEIGHT_PIXEL_AREA, LIF_CELL_SIZE, PX_PER_HEIGHT, RU_SIZE};

/// Base height (m) of the regeneration layer on the dominance grid.
const REGENERATION_LAYER_HEIGHT: f32 = 4.0;

/// Everything the model ingests at build time. File contents are passed
/// as strings — reading them is the project loader's concern.
#[derive(Default)]
pub struct ModelInput {
    pub config: ProjectConfig,
    /// At least one species set; the environment selects by name.
    pub species_sets: Vec<SpeciesSetData>,
    /// Named daily climate tables; the first is the default.
    pub climates: Vec<(String, Vec<ClimateDay>)>,
    /// Environment table (CSV) when `environmentEnabled`.
    pub environment_csv: Option<String>,
    /// Integer id raster (ESRI ASCII) for environment grid mode.
    pub environment_grid: Option<String>,
    /// Stand grid raster (ESRI ASCII) masking the stockable landscape.
    pub stand_grid: Option<String>,
}

/// A tree record for stand initialization (project-metric coordinates).
#[derive(Clone, Debug)]
pub struct TreeInit {
    pub species_id: String,
    pub x: f64,
    pub y: f64,
    pub dbh: f64,
    pub height: f64,
    pub age: u32,
}

/// Outcome of one `run_year` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum YearOutcome {
    Completed,
    Cancelled,
}

pub struct Model {
    config: ProjectConfig,
    project_rect: Rect,
    lif: LightField,
    dominance: DominanceField,
    ru_map: Grid<Option<usize>>,
    resource_units: Vec<ResourceUnit>,
    species_sets: Vec<SpeciesSet>,
    climates: Vec<Climate>,
    environment: Environment,
    grass: GrassCover,
    time_events: TimeEvents,
    modules: ModuleRegistry,
    outputs: OutputManager,
    management: Option<Box<dyn Management>>,
    runner: ThreadRunner,
    rng: GameRng,
    year: u32,
    cancel: Arc<AtomicBool>,
    error: Option<SimError>,
    total_stockable_area_ha: f64,
}

impl Model {
    /// Build the landscape from its inputs. The year counter is 0 until
    /// `before_run`.
    pub fn build(input: ModelInput) -> Result<Self, SimError> {
        let config = input.config;
        config.validate()?;
        let world = &config.model.world;
        if !world.resource_units_as_grid {
            return Err(SimError::Config("resourceUnitsAsGrid must be true".into()));
        }
        if (world.cell_size - LIF_CELL_SIZE).abs() > 1e-9 {
            return Err(SimError::Config(format!(
                "the light grid is calibrated for {LIF_CELL_SIZE} m cells (got {})",
                world.cell_size
            )));
        }

        let project_rect = Rect::from_size(0.0, 0.0, world.width, world.height);
        let total_rect = Rect::new(
            -world.buffer,
            -world.buffer,
            world.width + world.buffer,
            world.height + world.buffer,
        );
        log::info!(
            "world setup: {}x{} m, buffer {} m, torus: {}",
            world.width,
            world.height,
            world.buffer,
            world.torus
        );

        let lif = LightField::new(total_rect, LIF_CELL_SIZE);
        let mut dominance = DominanceField::new(total_rect, HEIGHT_CELL_SIZE);

        // classify the dominance cells: valid inside the project (or per
        // stand grid), forest-outside beyond the edge (unless torus)
        let stand_raster = match (&input.stand_grid, world.stand_grid.enabled) {
            (Some(text), true) => Some(parse_esri_ascii(text).map_err(SimError::Config)?),
            (None, true) => {
                return Err(SimError::Config("standGrid.enabled without stand grid data".into()));
            }
            _ => None,
        };
        for i in 0..dominance.count() {
            let (x, y) = dominance.index_of(i);
            let (cx, cy) = dominance.cell_center(x, y);
            match &stand_raster {
                Some(raster) => {
                    let inside = raster.grid.coord_valid(cx, cy);
                    let value = if inside { *raster.grid.value_at(cx, cy) } else { raster.nodata };
                    dominance.set_flag(i, height_flags::VALID, inside && value > -1.0);
                    dominance.set_flag(
                        i,
                        height_flags::FOREST_OUTSIDE,
                        inside && value < -1.0 && value != raster.nodata,
                    );
                }
                None => {
                    let inside = project_rect.contains(cx, cy);
                    dominance.set_flag(i, height_flags::VALID, inside);
                    if !inside && !world.torus {
                        dominance.set_flag(i, height_flags::FOREST_OUTSIDE, true);
                    }
                }
            }
        }
        // radiating pixels: forest-outside cells adjacent to a valid cell
        {
            let (sx, sy) = (dominance.size_x() as isize, dominance.size_y() as isize);
            let mut radiating = Vec::new();
            for i in 0..dominance.count() {
                if !dominance.is_forest_outside(i) {
                    continue;
                }
                let (x, y) = dominance.index_of(i);
                'neighbors: for dy in -1isize..=1 {
                    for dx in -1isize..=1 {
                        if dx == 0 && dy == 0 {
                            continue;
                        }
                        let (nx, ny) = (x as isize + dx, y as isize + dy);
                        if nx >= 0
                            && ny >= 0
                            && nx < sx
                            && ny < sy
                            && dominance.is_valid(dominance.linear(nx as usize, ny as usize))
                        {
                            radiating.push(i);
                            break 'neighbors;
                        }
                    }
                }
            }
            for i in radiating {
                dominance.set_flag(i, height_flags::RADIATING, true);
            }
        }

        // environment
        let environment = if world.environment_enabled {
            let csv = input.environment_csv.as_deref().ok_or_else(|| {
                SimError::Config("environmentEnabled without environment table".into())
            })?;
            if world.environment_mode == "grid" {
                let grid_text = input.environment_grid.as_deref().ok_or_else(|| {
                    SimError::Config("environment grid mode without id raster".into())
                })?;
                let raster = parse_esri_ascii(grid_text).map_err(SimError::Config)?;
                let mut id_grid = Grid::from_rect_fn(raster.grid.rect(), raster.grid.cell_size(), || -1i32);
                for i in 0..raster.grid.count() {
                    let v = *raster.grid.at_linear(i);
                    *id_grid.at_linear_mut(i) = if v == raster.nodata { -1 } else { v as i32 };
                }
                Environment::from_grid_csv(csv, id_grid)?
            } else {
                Environment::from_matrix_csv(csv)?
            }
        } else {
            Environment::disabled()
        };

        // climates: the set named by the environment, or all provided
        if input.climates.is_empty() {
            return Err(SimError::Config("at least one climate table is required".into()));
        }
        let mut climates = Vec::new();
        let mut climate_index_by_name = rustc_hash::FxHashMap::default();
        for (name, days) in input.climates {
            climate_index_by_name.insert(name.clone(), climates.len());
            climates.push(Climate::from_days(&name, days)?);
        }
        for name in environment.distinct_values(CLIMATE_KEY) {
            if !climate_index_by_name.contains_key(&name) {
                return Err(SimError::Config(format!(
                    "environment references unknown climate table '{name}'"
                )));
            }
        }

        // species sets
        if input.species_sets.is_empty() {
            return Err(SimError::Config("at least one species set is required".into()));
        }
        let linearize = config.system.settings.expression_linearization_enabled;
        let mut species_sets = Vec::new();
        let mut set_index_by_name = rustc_hash::FxHashMap::default();
        for data in input.species_sets {
            set_index_by_name.insert(data.name.clone(), species_sets.len());
            species_sets.push(SpeciesSet::setup(data, &config.model.settings, linearize)?);
        }
        for name in environment.distinct_values(SPECIES_KEY) {
            if !set_index_by_name.contains_key(&name) {
                return Err(SimError::Config(format!(
                    "environment references unknown species set '{name}'"
                )));
            }
        }

        // seed dispersal per species, over the full (buffered) landscape
        if config.model.settings.regeneration_enabled {
            for set in &mut species_sets {
                for species in set.all_mut() {
                    let p = &species.params;
                    let dispersal = SeedDispersal::new(
                        total_rect,
                        project_rect,
                        DispersalParams {
                            as1: p.dispersal_as1,
                            as2: p.dispersal_as2,
                            ks: p.dispersal_ks,
                            fecundity: p.fecundity,
                            non_seed_year_fraction: p.non_seed_year_fraction,
                            external_seed_background: p.external_seed_background,
                        },
                    );
                    species.setup_seed_dispersal(dispersal);
                }
            }
        }

        // resource units on the 100 m grid
        let seed = config.system.settings.random_seed;
        let mut ru_map = Grid::from_rect_fn(project_rect, RU_SIZE, || None::<usize>);
        let mut resource_units = Vec::new();
        for i in 0..ru_map.count() {
            let (x, y) = ru_map.index_of(i);
            let cell_rect = ru_map.cell_rect(x, y);
            let (cx, cy) = cell_rect.center();
            let resolved = environment.position(&config, cx, cy)?;
            let climate_index = match &resolved.climate_name {
                Some(name) => *climate_index_by_name
                    .get(name)
                    .ok_or_else(|| SimError::Config(format!("unknown climate '{name}'")))?,
                None => 0,
            };
            let set_index = match &resolved.species_set_name {
                Some(name) => *set_index_by_name
                    .get(name)
                    .ok_or_else(|| SimError::Config(format!("unknown species set '{name}'")))?,
                None => 0,
            };
            let index = resource_units.len();
            let (lx, ly) = lif.index_at(cell_rect.left, cell_rect.bottom);
            let ru = ResourceUnit::new(
                index,
                index as i32,
                cell_rect,
                (lx as usize, ly as usize),
                climate_index,
                set_index,
                species_sets[set_index].count(),
                resolved.config.model.site.clone(),
                &resolved.config,
                GameRng::derive_seed(seed, index as u64),
            )?;
            resource_units.push(ru);
            *ru_map.at_linear_mut(i) = Some(index);
        }

        let grass = GrassCover::setup(&config.model.settings.grass, total_rect, LIF_CELL_SIZE)?;
        let management: Option<Box<dyn Management>> = if config.model.management.enabled {
            Some(Box::new(ExpressionThinning::from_config(&config.model.management)?))
        } else {
            None
        };
        let time_events = TimeEvents::new(config.model.time_events.clone());
        let runner = ThreadRunner::new(config.system.settings.multithreading);

        let mut model = Self {
            project_rect,
            lif,
            dominance,
            ru_map,
            resource_units,
            species_sets,
            climates,
            environment,
            grass,
            time_events,
            modules: ModuleRegistry::default(),
            outputs: OutputManager::standard(),
            management,
            runner,
            rng: GameRng::new(seed),
            year: 0,
            cancel: Arc::new(AtomicBool::new(false)),
            error: None,
            total_stockable_area_ha: 0.0,
            config,
        };
        model.calculate_stockable_area();
        log::info!(
            "created {} resource units, total stockable area {:.1} ha",
            model.resource_units.len(),
            model.total_stockable_area_ha
        );
        Ok(model)
    }

    // --- accessors ------------------------------------------------------

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    pub fn year(&self) -> u32 {
        self.year
    }

    pub fn light_field(&self) -> &LightField {
        &self.lif
    }

    pub fn dominance_field(&self) -> &DominanceField {
        &self.dominance
    }

    pub fn resource_units(&self) -> &[ResourceUnit] {
        &self.resource_units
    }

    pub fn resource_units_mut(&mut self) -> &mut [ResourceUnit] {
        &mut self.resource_units
    }

    pub fn species_sets(&self) -> &[SpeciesSet] {
        &self.species_sets
    }

    pub fn climates(&self) -> &[Climate] {
        &self.climates
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    pub fn outputs(&self) -> &OutputManager {
        &self.outputs
    }

    pub fn modules_mut(&mut self) -> &mut ModuleRegistry {
        &mut self.modules
    }

    pub fn total_stockable_area_ha(&self) -> f64 {
        self.total_stockable_area_ha
    }

    /// Handle for cancelling between phases/years from another thread.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// The stored phase error, if the model is paused.
    pub fn error(&self) -> Option<&SimError> {
        self.error.as_ref()
    }

    pub fn is_paused_with_error(&self) -> bool {
        self.error.is_some()
    }

    /// Resource unit at a metric position.
    pub fn resource_unit_at(&self, x: f64, y: f64) -> Option<&ResourceUnit> {
        if !self.ru_map.coord_valid(x, y) {
            return None;
        }
        self.ru_map.value_at(x, y).map(|i| &self.resource_units[i])
    }

    // --- stand initialization ------------------------------------------

    /// Plant a tree (stand initialization / testing). Individual trees
    /// start at 5 cm dbh; smaller stems belong to the sapling layer.
    pub fn plant_tree(&mut self, init: &TreeInit) -> Result<u32, SimError> {
        if init.dbh < 5.0 {
            return Err(SimError::Config(format!(
                "tree at {}/{}: dbh {} below the 5 cm individual threshold",
                init.x, init.y, init.dbh
            )));
        }
        if init.height <= 0.0 || init.height > 150.0 {
            return Err(SimError::Config(format!("invalid tree height {}", init.height)));
        }
        if !self.ru_map.coord_valid(init.x, init.y) {
            return Err(SimError::Config(format!(
                "position {}/{} is outside the project area",
                init.x, init.y
            )));
        }
        let ru_index = self
            .ru_map
            .value_at(init.x, init.y)
            .ok_or_else(|| {
                SimError::Config(format!("position {}/{} is not stockable", init.x, init.y))
            })?;
        let ru = &mut self.resource_units[ru_index];
        let set = &self.species_sets[ru.species_set_index()];
        let species = set
            .index_of(&init.species_id)
            .ok_or_else(|| SimError::Config(format!("unknown species '{}'", init.species_id)))?;
        let (lx, ly) = self.lif.index_at(init.x, init.y);
        let opacity_k = self.config.model.settings.light_extinction_coefficient_opacity;
        Ok(ru.add_tree(
            set,
            species,
            (lx as usize, ly as usize),
            init.dbh,
            init.height,
            init.age,
            opacity_k,
        ))
    }

    pub fn plant_trees(&mut self, inits: &[TreeInit]) -> Result<(), SimError> {
        for init in inits {
            self.plant_tree(init)?;
        }
        Ok(())
    }

    /// Total number of living trees.
    pub fn tree_count(&self) -> usize {
        self.resource_units
            .iter()
            .map(|ru| ru.trees().iter().filter(|t| !t.is_dead()).count())
            .sum()
    }

    // --- run control ----------------------------------------------------

    /// Initial statistics and year-0 outputs; sets the year counter to 1.
    pub fn before_run(&mut self) -> Result<(), SimError> {
        self.modules.setup()?;
        for ru in &self.resource_units {
            self.modules.setup_resource_unit(ru);
        }
        self.apply_pattern();
        self.read_pattern();
        self.calculate_stocked_area();
        for ru in &mut self.resource_units {
            let set = &self.species_sets[ru.species_set_index()];
            ru.recreate_stand_statistics(set);
        }
        self.execute_outputs(0);
        self.year = 1;
        Ok(())
    }

    /// Run one year; see the phase list in the module header. On error
    /// the model pauses and the same error is returned.
    pub fn run_year(&mut self) -> Result<YearOutcome, SimError> {
        if let Some(err) = &self.error {
            return Err(SimError::Config(format!("model is paused with an error: {err}")));
        }
        match self.run_year_inner() {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                log::warn!("year {} failed: {err}", self.year);
                self.error = Some(SimError::Config(err.to_string()));
                Err(err)
            }
        }
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    fn run_year_inner(&mut self) -> Result<YearOutcome, SimError> {
        if self.cancelled() {
            return Ok(YearOutcome::Cancelled);
        }
        self.modules.year_begin();

        if !self.time_events.is_empty() {
            let mut config = self.config.clone();
            self.time_events.run(self.year, &mut config)?;
            self.config = config;
        }

        if self.year > 1 {
            for climate in &mut self.climates {
                climate.next_year();
            }
        }
        for ru in &mut self.resource_units {
            ru.new_year();
        }
        for set in &mut self.species_sets {
            set.new_year(&mut self.rng);
        }

        if let Some(management) = &mut self.management {
            management.run(&mut self.resource_units, &self.species_sets)?;
            self.clean_tree_lists(true);
        } else {
            self.clean_tree_lists(true);
        }
        if self.cancelled() {
            return Ok(YearOutcome::Cancelled);
        }

        self.apply_pattern();
        if self.cancelled() {
            return Ok(YearOutcome::Cancelled);
        }
        self.read_pattern();
        if self.cancelled() {
            return Ok(YearOutcome::Cancelled);
        }
        self.grow()?;

        // publish the water summaries of the year (the water cycle ran
        // with the production phase) to the disturbance modules
        for ru in &self.resource_units {
            self.modules.calculate_water(ru, ru.water().data());
        }

        self.grass_execute();

        if self.config.model.settings.regeneration_enabled {
            self.regeneration();
            if self.cancelled() {
                return Ok(YearOutcome::Cancelled);
            }
        }

        if self.config.model.settings.carbon_cycle_enabled {
            self.carbon_cycle()?;
        }

        // disturbance modules, randomized order
        self.modules.run(&mut self.resource_units, &self.species_sets, &mut self.rng, self.year)?;
        self.clean_tree_lists(false);

        self.execute_outputs(self.year);
        log::debug!("year {} complete, {} trees", self.year, self.tree_count());
        self.year += 1;
        Ok(YearOutcome::Completed)
    }

    // --- phases ---------------------------------------------------------

    fn apply_pattern(&mut self) {
        self.initialize_light_grid();
        self.dominance.reset_for_year(REGENERATION_LAYER_HEIGHT);

        let Self { resource_units, species_sets, lif, dominance, config, runner, .. } = self;
        let species_sets: &[SpeciesSet] = species_sets;
        let ctx = LightContext { lif, dominance, torus: config.model.world.torus };
        runner.run(resource_units, |ru| {
            ru.apply_pattern(&species_sets[ru.species_set_index()], &ctx);
        });
    }

    fn read_pattern(&mut self) {
        let Self { resource_units, species_sets, lif, dominance, config, runner, .. } = self;
        let species_sets: &[SpeciesSet] = species_sets;
        let ctx = LightContext { lif, dominance, torus: config.model.world.torus };
        runner.run(resource_units, |ru| {
            ru.read_pattern(&species_sets[ru.species_set_index()], &ctx);
        });
    }

    fn grow(&mut self) -> Result<(), SimError> {
        if !self.config.model.settings.growth_enabled {
            return Ok(());
        }
        self.calculate_stocked_area();

        let Self { resource_units, species_sets, climates, config, runner, .. } = self;
        let species_sets: &[SpeciesSet] = species_sets;
        let climates: &[Climate] = climates;
        let config: &ProjectConfig = config;
        runner.run(resource_units, |ru| {
            ru.production(
                &species_sets[ru.species_set_index()],
                &climates[ru.climate_index()],
                config,
            );
        });
        runner.run_fallible(resource_units, |ru| {
            ru.grow(&species_sets[ru.species_set_index()], config)
        })?;

        for ru in self.resource_units.iter_mut() {
            ru.clean_tree_list();
        }
        Ok(())
    }

    fn grass_execute(&mut self) {
        let Self { grass, lif, .. } = self;
        grass.execute(lif);
    }

    fn regeneration(&mut self) {
        // seed maps: dispersal per species (they are independent)
        for set in &mut self.species_sets {
            for species in set.all_mut() {
                let seed_year = species.is_seed_year();
                if let Some(dispersal) = species.seed_dispersal_mut() {
                    dispersal.execute(seed_year);
                }
            }
        }

        let Self {
            resource_units, species_sets, lif, dominance, grass, climates, runner, config, ..
        } = self;
        let species_sets: &[SpeciesSet] = species_sets;
        let climates: &[Climate] = climates;
        let lif: &LightField = lif;
        let dominance: &DominanceField = dominance;
        let grass: &GrassCover = grass;
        let config: &ProjectConfig = config;
        runner.run(resource_units, |ru| {
            ru.establishment(
                &species_sets[ru.species_set_index()],
                lif,
                dominance,
                grass,
                &climates[ru.climate_index()],
            );
        });
        runner.run(resource_units, |ru| {
            ru.sapling_growth(&species_sets[ru.species_set_index()], lif, dominance, config);
        });
    }

    fn carbon_cycle(&mut self) -> Result<(), SimError> {
        let Self { resource_units, climates, runner, .. } = self;
        let climates: &[Climate] = climates;
        runner.run_fallible(resource_units, |ru| ru.carbon_cycle(&climates[ru.climate_index()]))
    }

    fn clean_tree_lists(&mut self, recalculate_stats: bool) {
        for ru in &mut self.resource_units {
            if ru.has_dead_trees() {
                ru.clean_tree_list();
                if recalculate_stats {
                    let set = &self.species_sets[ru.species_set_index()];
                    ru.recreate_stand_statistics(set);
                }
            }
        }
    }

    /// Reset the light field to full light and pre-darken the border
    /// around radiating out-of-project pixels.
    fn initialize_light_grid(&mut self) {
        self.lif.fill(1.0);

        const MAX_RADIATE_DISTANCE: isize = 7;
        let step_width = 1.0f32 / MAX_RADIATE_DISTANCE as f32;
        let px_offset = (PX_PER_HEIGHT / 2) as isize;

        for i in 0..self.dominance.count() {
            if !self.dominance.is_radiating(i) {
                continue;
            }
            let (hx, hy) = self.dominance.index_of(i);
            let ix_center = hx as isize * PX_PER_HEIGHT as isize + px_offset;
            let iy_center = hy as isize * PX_PER_HEIGHT as isize + px_offset;
            for y in (iy_center - MAX_RADIATE_DISTANCE)..=(iy_center + MAX_RADIATE_DISTANCE) {
                for x in (ix_center - MAX_RADIATE_DISTANCE)..=(ix_center + MAX_RADIATE_DISTANCE) {
                    if !self.lif.is_index_valid(x, y) {
                        continue;
                    }
                    let h_index = self
                        .dominance
                        .linear(x as usize / PX_PER_HEIGHT, y as usize / PX_PER_HEIGHT);
                    if !self.dominance.is_valid(h_index) {
                        continue;
                    }
                    let value =
                        (x - ix_center).abs().max((y - iy_center).abs()) as f32 * step_width;
                    if self.lif.get(x as usize, y as usize) > value {
                        self.lif.set(x as usize, y as usize, value);
                    }
                }
            }
        }
    }

    /// Stockable area per unit from the valid dominance pixels; a unit
    /// with none becomes non-stockable (id -1).
    fn calculate_stockable_area(&mut self) {
        self.total_stockable_area_ha = 0.0;
        let mut valid_px = vec![0usize; self.resource_units.len()];
        for i in 0..self.dominance.count() {
            if !self.dominance.is_valid(i) {
                continue;
            }
            let (x, y) = self.dominance.index_of(i);
            let (cx, cy) = self.dominance.cell_center(x, y);
            if self.ru_map.coord_valid(cx, cy)
                && let Some(index) = self.ru_map.value_at(cx, cy)
            {
                valid_px[*index] += 1;
            }
        }
        for (index, ru) in self.resource_units.iter_mut().enumerate() {
            let area = valid_px[index] as f64 * HEIGHT_PIXEL_AREA;
            ru.set_stockable_area(area);
            self.total_stockable_area_ha += area / (RU_SIZE * RU_SIZE);
            if valid_px[index] == 0 && ru.id() > -1 {
                ru.set_id(-1);
            }
        }
    }

    /// Count stocked 10 m pixels (at least one tree centered on them) per
    /// unit.
    fn calculate_stocked_area(&mut self) {
        let mut stocked_px = vec![0usize; self.resource_units.len()];
        for i in 0..self.dominance.count() {
            if self.dominance.tree_count(i) == 0 {
                continue;
            }
            let (x, y) = self.dominance.index_of(i);
            let (cx, cy) = self.dominance.cell_center(x, y);
            if self.ru_map.coord_valid(cx, cy)
                && let Some(index) = self.ru_map.value_at(cx, cy)
            {
                stocked_px[*index] += 1;
            }
        }
        for (index, ru) in self.resource_units.iter_mut().enumerate() {
            ru.set_stocked_area(stocked_px[index] as f64 * HEIGHT_PIXEL_AREA);
        }
    }

    fn execute_outputs(&mut self, year: u32) {
        let mut outputs = std::mem::take(&mut self.outputs);
        {
            let ctx = OutputContext {
                year,
                resource_units: &self.resource_units,
                species_sets: &self.species_sets,
            };
            outputs.execute("tree", &ctx);
            outputs.execute("stand", &ctx);
            outputs.execute("carbon", &ctx);
            outputs.execute("water", &ctx);
        }
        self.outputs = outputs;
    }

    /// Project rectangle (without the buffer).
    pub fn project_rect(&self) -> Rect {
        self.project_rect
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::climate::synthetic_year;
    use crate::species::SpeciesSetData;

    fn basic_input() -> ModelInput {
        let mut config = ProjectConfig::default();
        config.model.world.width = 100.0;
        config.model.world.height = 100.0;
        config.system.settings.multithreading = false;
        // keep the small test stands deterministic-alive
        config.model.settings.mortality_enabled = false;
        ModelInput {
            config,
            species_sets: vec![SpeciesSetData::default()],
            climates: vec![("default".to_string(), synthetic_year(2000, 6.0, 12.0, 700.0))],
            ..ModelInput::default()
        }
    }

    #[test]
    fn build_creates_aligned_grids() {
        let model = Model::build(basic_input()).unwrap();
        // 100 m project + 60 m buffer each side = 220 m = 110 light px
        assert_eq!(model.light_field().size_x(), 110);
        assert_eq!(model.dominance_field().size_x(), 22);
        assert_eq!(model.resource_units().len(), 1);
        assert!((model.total_stockable_area_ha() - 1.0).abs() < 1e-9);
        // out-of-project cells are forest-outside
        assert!(model.dominance_field().is_forest_outside(0));
        let center = model.dominance_field().linear(11, 11);
        assert!(model.dominance_field().is_valid(center));
    }

    #[test]
    fn plant_tree_validates_and_places() {
        let mut model = Model::build(basic_input()).unwrap();
        let init = TreeInit {
            species_id: "piab".to_string(),
            x: 50.0,
            y: 50.0,
            dbh: 30.0,
            height: 20.0,
            age: 50,
        };
        model.plant_tree(&init).unwrap();
        assert_eq!(model.tree_count(), 1);
        // below the individual-tree threshold
        let small = TreeInit { dbh: 3.0, ..init.clone() };
        assert!(model.plant_tree(&small).is_err());
        // outside the project
        let outside = TreeInit { x: 500.0, ..init };
        assert!(model.plant_tree(&outside).is_err());
    }

    #[test]
    fn single_tree_year_matches_expectations() {
        let mut model = Model::build(basic_input()).unwrap();
        model
            .plant_tree(&TreeInit {
                species_id: "piab".to_string(),
                x: 50.0,
                y: 50.0,
                dbh: 30.0,
                height: 20.0,
                age: 50,
            })
            .unwrap();
        model.before_run().unwrap();
        assert_eq!(model.year(), 1);
        let dbh_before = model.resource_units()[0].trees()[0].dbh;
        assert_eq!(model.run_year().unwrap(), YearOutcome::Completed);
        assert_eq!(model.year(), 2);

        let ru = &model.resource_units()[0];
        let tree = &ru.trees()[0];
        assert!(tree.lri > 0.9, "lone tree lri {}", tree.lri);
        assert!(tree.dbh > dbh_before);
        assert!(tree.dbh - dbh_before < 1.0, "increment {}", tree.dbh - dbh_before);
        assert!(ru.ru_species()[0].statistics.npp() > 0.0);
        // outputs received rows for year 0 and year 1
        let stand = model.outputs().table("stand").unwrap();
        assert!(stand.rows.len() >= 2);
    }

    #[test]
    fn cancel_flag_stops_between_phases() {
        let mut model = Model::build(basic_input()).unwrap();
        model.before_run().unwrap();
        model.cancel_flag().store(true, Ordering::Relaxed);
        assert_eq!(model.run_year().unwrap(), YearOutcome::Cancelled);
        assert_eq!(model.year(), 1);
    }

    #[test]
    fn lif_values_stay_in_range_with_many_trees() {
        let mut model = Model::build(basic_input()).unwrap();
        let mut inits = Vec::new();
        for ix in 0..9 {
            for iy in 0..9 {
                inits.push(TreeInit {
                    species_id: "piab".to_string(),
                    x: 10.0 + ix as f64 * 10.0,
                    y: 10.0 + iy as f64 * 10.0,
                    dbh: 25.0,
                    height: 18.0,
                    age: 45,
                });
            }
        }
        model.plant_trees(&inits).unwrap();
        model.before_run().unwrap();
        model.run_year().unwrap();
        let lif = model.light_field();
        for y in 0..lif.size_y() {
            for x in 0..lif.size_x() {
                let v = lif.get(x, y);
                assert!((0.02..=1.0).contains(&v), "lif[{x},{y}] = {v}");
            }
        }
        // every living tree has a valid LRI
        for ru in model.resource_units() {
            for tree in ru.trees() {
                assert!((0.0..=1.0).contains(&tree.lri));
            }
        }
    }
}
