// The individual tree: state, light functions, growth and mortality.
//
// A tree is the basic simulation entity and is kept lightweight: dimensions
// (dbh, height), the biomass compartments, the NPP reserve, its light
// state (LRI, light response, opacity), its LIF-grid position and handles
// to its species and current stamp. Trees below 4 m height belong to the
// regeneration layer (saplings.rs), not here.
//
// The light functions come in pairs: the standard variant and a torus
// variant that wraps the influence at the edges of the tree's 1-ha unit
// (used for small-domain experiments so edge artifacts vanish).
//
// Writes to the shared light/height fields go through the commutative
// atomic operations of `LightField`/`DominanceField` only — that is the
// whole synchronization story of the parallel light phase.

use boreal_prng::GameRng;

use crate::light::{DominanceField, LightField};
use crate::snag::Snag;
use crate::species::Species;
use crate::species::SpeciesSet;
use crate::types::{LIF_FLOOR, PX_PER_HEIGHT, PX_PER_RU, torus_index};

/// Attenuation applied to light read from forest-outside pixels.
const OUTSIDE_AREA_FACTOR: f64 = 0.1;

const FLAG_DEAD: u8 = 1;
const FLAG_MARKED: u8 = 2;

/// Shared grids plus the boundary mode, passed into the light functions.
pub struct LightContext<'a> {
    pub lif: &'a LightField,
    pub dominance: &'a DominanceField,
    /// Periodic 1-ha boundary.
    pub torus: bool,
}

/// Per-year growth bookkeeping handed through the growth pipeline.
#[derive(Clone, Copy, Debug, Default)]
pub struct TreeGrowthData {
    pub npp: f64,
    pub npp_above: f64,
    pub npp_stem: f64,
    pub stress_index: f64,
}

/// An individual tree.
#[derive(Clone, Debug)]
pub struct Tree {
    pub id: u32,
    pub age: u32,
    /// Index of the species within the resource unit's species set.
    pub species: usize,
    /// Position on the LIF grid.
    pub position: (usize, usize),
    /// Diameter at breast height (cm).
    pub dbh: f64,
    /// Height (m).
    pub height: f64,
    // biomass pools (kg dry matter)
    pub foliage_mass: f64,
    pub woody_mass: f64,
    pub fine_root_mass: f64,
    pub coarse_root_mass: f64,
    pub npp_reserve: f64,
    /// Leaf area (m2).
    pub leaf_area: f64,
    /// Crown opacity from leaf area and crown area (Beer-Lambert).
    pub opacity: f64,
    pub lri: f64,
    pub light_response: f64,
    pub stress_index: f64,
    /// Diameter increment of the last year (cm).
    pub dbh_delta: f64,
    /// Index of the current stamp in the species' container.
    pub stamp: u32,
    flags: u8,
}

impl Tree {
    /// Create and initialize a tree from dimensions. The biomass pools are
    /// filled from the species allometries; `age = 0` estimates the age
    /// from height.
    pub fn setup(
        id: u32,
        species: &Species,
        position: (usize, usize),
        dbh: f64,
        height: f64,
        age: u32,
        opacity_k: f64,
    ) -> Self {
        debug_assert!(dbh > 0.0 && height > 0.0);
        let foliage_mass = species.biomass_foliage(dbh);
        let stamp = species.stamp_index(dbh, height);
        let crown_area = species.stamp(stamp).crown_area() as f64;
        let leaf_area = foliage_mass * species.specific_leaf_area();
        let age = if age == 0 { species.estimate_age(height) } else { age };
        Self {
            id,
            age,
            species: species.index(),
            position,
            dbh,
            height,
            foliage_mass,
            woody_mass: species.biomass_woody(dbh),
            fine_root_mass: foliage_mass * species.fineroot_foliage_ratio(),
            coarse_root_mass: species.biomass_root(dbh),
            npp_reserve: (1.0 + species.fineroot_foliage_ratio()) * foliage_mass,
            leaf_area,
            opacity: 1.0 - (-opacity_k * leaf_area / crown_area).exp(),
            lri: 0.0,
            light_response: 0.0,
            stress_index: 0.0,
            dbh_delta: 0.1,
            stamp,
            flags: 0,
        }
    }

    pub fn is_dead(&self) -> bool {
        self.flags & FLAG_DEAD != 0
    }

    pub fn set_dead(&mut self) {
        self.flags |= FLAG_DEAD;
    }

    pub fn is_marked(&self) -> bool {
        self.flags & FLAG_MARKED != 0
    }

    pub fn set_marked(&mut self, on: bool) {
        if on {
            self.flags |= FLAG_MARKED;
        } else {
            self.flags &= !FLAG_MARKED;
        }
    }

    /// Stem volume (m3): form factor x d2 x h.
    pub fn volume(&self, species: &Species) -> f64 {
        species.volume_factor() * self.dbh * self.dbh * self.height * 0.0001
    }

    /// Basal area (m2).
    pub fn basal_area(&self) -> f64 {
        let r = self.dbh / 200.0;
        r * r * std::f64::consts::PI
    }

    pub fn crown_radius(&self, species: &Species) -> f64 {
        species.stamp(self.stamp).crown_radius() as f64
    }

    pub fn biomass_branch(&self, species: &Species) -> f64 {
        species.biomass_branch(self.dbh)
    }

    // ------------------------------------------------------------------
    // Light functions (pattern stuff)
    // ------------------------------------------------------------------

    /// Update the dominant-height grid for this tree.
    pub fn height_grid(&self, species: &Species, ctx: &LightContext<'_>) {
        if ctx.torus {
            self.height_grid_torus(species, ctx);
            return;
        }
        let hx = self.position.0 / PX_PER_HEIGHT;
        let hy = self.position.1 / PX_PER_HEIGHT;
        ctx.dominance.increase_count(hx, hy);
        ctx.dominance.raise_height(hx, hy, self.height as f32);

        // lift neighbor cells when the crown reader reaches across the
        // 10 m cell edge
        let stamp = species.stamp(self.stamp);
        let r = stamp.reader().map(|s| s.offset()).unwrap_or(0) as isize;
        let index_ew = (self.position.0 % PX_PER_HEIGHT) as isize;
        let index_ns = (self.position.1 % PX_PER_HEIGHT) as isize;
        let lift = |x: isize, y: isize| {
            if ctx.dominance.is_index_valid(x, y) {
                ctx.dominance.raise_height(x as usize, y as usize, self.height as f32);
            }
        };
        if index_ew - r < 0 {
            lift(hx as isize - 1, hy as isize);
        }
        if index_ew + r >= PX_PER_HEIGHT as isize {
            lift(hx as isize + 1, hy as isize);
        }
        if index_ns - r < 0 {
            lift(hx as isize, hy as isize - 1);
        }
        if index_ns + r >= PX_PER_HEIGHT as isize {
            lift(hx as isize, hy as isize + 1);
        }
    }

    fn height_grid_torus(&self, species: &Species, ctx: &LightContext<'_>) {
        let count = (PX_PER_RU / PX_PER_HEIGHT) as isize; // 10 height px per ha
        let buffer = (ctx.dominance.index_at(0.0, 0.0).0).max(0);
        let px = (self.position.0 / PX_PER_HEIGHT) as isize;
        let py = (self.position.1 / PX_PER_HEIGHT) as isize;
        let local_x = (px - buffer).rem_euclid(count) + buffer;
        let local_y = (py - buffer).rem_euclid(count) + buffer;
        let ru_off = (px - local_x, py - local_y);

        let wrap = |x: isize, y: isize| -> (isize, isize) {
            (
                torus_index(x, count, buffer, ru_off.0),
                torus_index(y, count, buffer, ru_off.1),
            )
        };
        let (cx, cy) = wrap(local_x, local_y);
        ctx.dominance.increase_count(cx as usize, cy as usize);
        ctx.dominance.raise_height(cx as usize, cy as usize, self.height as f32);

        let stamp = species.stamp(self.stamp);
        let r = stamp.reader().map(|s| s.offset()).unwrap_or(0) as isize;
        let index_ew = (self.position.0 % PX_PER_HEIGHT) as isize;
        let index_ns = (self.position.1 % PX_PER_HEIGHT) as isize;
        let lift = |x: isize, y: isize| {
            let (tx, ty) = wrap(x, y);
            if ctx.dominance.is_index_valid(tx, ty) {
                ctx.dominance.raise_height(tx as usize, ty as usize, self.height as f32);
            }
        };
        if index_ew - r < 0 {
            lift(local_x - 1, local_y);
        }
        if index_ew + r >= PX_PER_HEIGHT as isize {
            lift(local_x + 1, local_y);
        }
        if index_ns - r < 0 {
            lift(local_x, local_y - 1);
        }
        if index_ns + r >= PX_PER_HEIGHT as isize {
            lift(local_x, local_y + 1);
        }
    }

    /// Multiply this tree's light-influence pattern onto the light field.
    pub fn apply_lip(&self, species: &Species, ctx: &LightContext<'_>) {
        if ctx.torus {
            self.apply_lip_torus(species, ctx);
            return;
        }
        let stamp = species.stamp(self.stamp);
        let offset = stamp.offset() as isize;
        let size = stamp.size() as isize;
        let x0 = self.position.0 as isize - offset;
        let y0 = self.position.1 as isize - offset;
        // the buffer makes this impossible for in-project trees; a stamp
        // escaping the grid is silently skipped
        if !ctx.lif.is_index_valid(x0, y0) || !ctx.lif.is_index_valid(x0 + size, y0 + size) {
            return;
        }
        for y in 0..size {
            let gy = (y0 + y) as usize;
            for x in 0..size {
                let gx = (x0 + x) as usize;
                let value = stamp.value(x as usize, y as usize);
                let local_dom =
                    ctx.dominance.height(gx / PX_PER_HEIGHT, gy / PX_PER_HEIGHT) as f64;
                let z =
                    (self.height - stamp.distance_to_center(x as usize, y as usize) as f64).max(0.0);
                let z_zstar = if z >= local_dom { 1.0 } else { z / local_dom.max(1e-6) };
                let factor =
                    (1.0 - value as f64 * self.opacity * z_zstar).max(LIF_FLOOR as f64) as f32;
                ctx.lif.multiply(gx, gy, factor);
            }
        }
    }

    /// Torus version of `apply_lip` (glued edges of the 1-ha area).
    fn apply_lip_torus(&self, species: &Species, ctx: &LightContext<'_>) {
        let stamp = species.stamp(self.stamp);
        let buffer = ctx.lif.buffer_offset() as isize;
        let count = PX_PER_RU as isize;
        let local_x = (self.position.0 as isize - buffer).rem_euclid(count) + buffer;
        let local_y = (self.position.1 as isize - buffer).rem_euclid(count) + buffer;
        let ru_off = (self.position.0 as isize - local_x, self.position.1 as isize - local_y);

        let offset = stamp.offset() as isize;
        let size = stamp.size() as isize;
        let x0 = local_x - offset;
        let y0 = local_y - offset;
        if !ctx.lif.is_index_valid(x0, y0) || !ctx.lif.is_index_valid(x0 + size, y0 + size) {
            return;
        }
        for y in 0..size {
            let yt = torus_index(y0 + y, count, buffer, ru_off.1);
            for x in 0..size {
                let xt = torus_index(x0 + x, count, buffer, ru_off.0);
                let local_dom = ctx
                    .dominance
                    .height(xt as usize / PX_PER_HEIGHT, yt as usize / PX_PER_HEIGHT)
                    as f64;
                let z =
                    (self.height - stamp.distance_to_center(x as usize, y as usize) as f64).max(0.0);
                let z_zstar = if z >= local_dom { 1.0 } else { z / local_dom.max(1e-6) };
                let value = stamp.value(x as usize, y as usize);
                let factor =
                    (1.0 - value as f64 * self.opacity * z_zstar).max(LIF_FLOOR as f64) as f32;
                ctx.lif.multiply(xt as usize, yt as usize, factor);
            }
        }
    }

    /// Read the light resource index of this tree from the light field.
    ///
    /// The field is scanned with the reader stamp over the crown; the
    /// influence of the focal tree itself is divided out of every cell,
    /// forest-outside pixels contribute with a fixed attenuation, and the
    /// height-relative LRI correction of the species set is applied.
    pub fn read_lif(&mut self, species: &Species, set: &SpeciesSet, ctx: &LightContext<'_>) {
        if ctx.torus {
            self.read_lif_torus(species, set, ctx);
            return;
        }
        let stamp = species.stamp(self.stamp);
        let Some(reader) = stamp.reader() else { return };
        let d_offset = stamp.offset() - reader.offset();
        let rx = self.position.0 as isize - reader.offset() as isize;
        let ry = self.position.1 as isize - reader.offset() as isize;
        let size = reader.size() as isize;
        if !ctx.lif.is_index_valid(rx, ry) || !ctx.lif.is_index_valid(rx + size, ry + size) {
            return;
        }

        let mut sum = 0.0f64;
        for y in 0..size as usize {
            let gy = (ry + y as isize) as usize;
            for x in 0..size as usize {
                let gx = (rx + x as isize) as usize;
                let h_index = (gx / PX_PER_HEIGHT, gy / PX_PER_HEIGHT);
                let local_dom = ctx.dominance.height(h_index.0, h_index.1) as f64;
                let z = (self.height - reader.distance_to_center(x, y) as f64).max(0.0);
                let z_zstar = if z >= local_dom { 1.0 } else { z / local_dom.max(1e-6) };

                let own_value =
                    (1.0 - stamp.offset_value(x, y, d_offset) as f64 * self.opacity * z_zstar)
                        .max(LIF_FLOOR as f64);
                let mut value = ctx.lif.get(gx, gy) as f64 / own_value; // remove self
                if ctx.dominance.is_forest_outside(ctx.dominance.linear(h_index.0, h_index.1)) {
                    value *= OUTSIDE_AREA_FACTOR;
                }
                sum += value * reader.value(x, y) as f64;
            }
        }
        self.finish_lri(sum, set, ctx);
    }

    fn read_lif_torus(&mut self, species: &Species, set: &SpeciesSet, ctx: &LightContext<'_>) {
        let stamp = species.stamp(self.stamp);
        let Some(reader) = stamp.reader() else { return };
        let buffer = ctx.lif.buffer_offset() as isize;
        let count = PX_PER_RU as isize;
        let local_x = (self.position.0 as isize - buffer).rem_euclid(count) + buffer;
        let local_y = (self.position.1 as isize - buffer).rem_euclid(count) + buffer;
        let ru_off = (self.position.0 as isize - local_x, self.position.1 as isize - local_y);

        let d_offset = stamp.offset() - reader.offset();
        let rx = local_x - reader.offset() as isize;
        let ry = local_y - reader.offset() as isize;
        let size = reader.size() as isize;

        let mut sum = 0.0f64;
        for y in 0..size {
            let yt = torus_index(ry + y, count, buffer, ru_off.1) as usize;
            for x in 0..size {
                let xt = torus_index(rx + x, count, buffer, ru_off.0) as usize;
                let local_dom =
                    ctx.dominance.height(xt / PX_PER_HEIGHT, yt / PX_PER_HEIGHT) as f64;
                let z =
                    (self.height - reader.distance_to_center(x as usize, y as usize) as f64).max(0.0);
                let z_zstar = if z >= local_dom { 1.0 } else { z / local_dom.max(1e-6) };

                let own_value = (1.0
                    - stamp.offset_value(x as usize, y as usize, d_offset) as f64
                        * self.opacity
                        * z_zstar)
                    .max(LIF_FLOOR as f64);
                let value = ctx.lif.get(xt, yt) as f64 / own_value;
                sum += value * reader.value(x as usize, y as usize) as f64;
            }
        }
        self.finish_lri(sum, set, ctx);
    }

    fn finish_lri(&mut self, sum: f64, set: &SpeciesSet, ctx: &LightContext<'_>) {
        let mut lri = sum;
        let hx = self.position.0 / PX_PER_HEIGHT;
        let hy = self.position.1 / PX_PER_HEIGHT;
        let dominant = ctx.dominance.height(hx, hy) as f64;
        let hrel = if dominant > 0.0 { self.height / dominant } else { 1.0 };
        if hrel < 1.0 {
            lri = set.lri_correction(lri, hrel);
        }
        if lri.is_nan() {
            log::warn!("LRI invalid (nan), tree {}", self.id);
            lri = 0.0;
        }
        self.lri = lri.min(1.0);
    }

    /// Light response from the unit-corrected LRI.
    pub fn calc_light_response(&mut self, species: &Species, lri_modifier: f64) {
        let lri = (self.lri * lri_modifier).clamp(0.0, 1.0);
        self.light_response = species.light_response(lri);
    }

    // ------------------------------------------------------------------
    // Growth
    // ------------------------------------------------------------------

    /// Yearly growth: GPP -> NPP -> partitioning -> stem geometry,
    /// followed by stress mortality and seed production. Returns the
    /// growth record for statistics.
    #[allow(clippy::too_many_arguments)]
    pub fn grow(
        &mut self,
        species: &Species,
        gpp_per_area: f64,
        effective_area: f64,
        root_fraction: f64,
        lri_modifier: f64,
        mortality_enabled: bool,
        opacity_k: f64,
        snag: &mut Snag,
        rng: &mut GameRng,
    ) -> TreeGrowthData {
        let mut d = TreeGrowthData::default();
        self.age += 1;

        let raw_gpp = gpp_per_area * effective_area;
        let aging_factor = species.aging(self.height, self.age);
        let gpp = raw_gpp * aging_factor;
        d.npp = gpp * crate::types::AUTOTROPHIC_RESPIRATION;

        if d.npp > 0.0 {
            self.partition(species, &mut d, root_fraction, lri_modifier, opacity_k, snag);
        }

        if mortality_enabled {
            self.mortality(species, &d, snag, rng);
        }
        self.stress_index = d.stress_index;

        species.seed_production(self.age, self.height, self.position);
        d
    }

    /// Partitioning of this year's assimilates to the biomass
    /// compartments (Duursma 2007) and growth of the stem.
    fn partition(
        &mut self,
        species: &Species,
        d: &mut TreeGrowthData,
        root_fraction: f64,
        lri_modifier: f64,
        opacity_k: f64,
        snag: &mut Snag,
    ) {
        // add the reserve pool to the distributable assimilates
        let npp = d.npp + self.npp_reserve;
        if npp.is_nan() {
            log::warn!("NPP invalid (nan), tree {} flagged dead", self.id);
            self.set_dead();
            return;
        }

        let foliage_mass_allo = species.biomass_foliage(self.dbh);
        let reserve_size = foliage_mass_allo * (1.0 + species.fineroot_foliage_ratio());
        let refill_reserve =
            reserve_size.min((1.0 + species.fineroot_foliage_ratio()) * self.foliage_mass);

        let to_fol = species.turnover_leaf();
        let to_root = species.turnover_root();
        // the turnover rate of wood depends on the size of the reserve
        let to_wood = refill_reserve / (self.woody_mass + refill_reserve);

        let apct_root = root_fraction;
        d.npp_above = d.npp * (1.0 - apct_root);
        let b_wf = species.allometric_ratio_wf();

        // Duursma 2007, Eq. (20)
        let mut apct_wood = (foliage_mass_allo * to_wood / npp + b_wf * (1.0 - apct_root)
            - b_wf * foliage_mass_allo * to_fol / npp)
            / (foliage_mass_allo / self.woody_mass + b_wf);
        apct_wood = apct_wood.clamp(0.0, 1.0 - apct_root);
        let apct_foliage = 1.0 - apct_root - apct_wood;

        // senescence feeds the snag/litter inboxes
        let sen_root = self.fine_root_mass * to_root;
        let sen_foliage = self.foliage_mass * to_fol;
        snag.add_turnover_litter(species, sen_foliage, sen_root);

        // roots: refill the fine-root pool first, the rest goes to coarse
        // roots capped by the allometry
        self.fine_root_mass -= sen_root;
        let mut delta_root = apct_root * npp;
        let fineroot_miss =
            self.foliage_mass * species.fineroot_foliage_ratio() - self.fine_root_mass;
        if fineroot_miss > 0.0 {
            let delta_fineroot = fineroot_miss.min(delta_root);
            self.fine_root_mass += delta_fineroot;
            delta_root -= delta_fineroot;
        }
        let max_coarse_root = species.biomass_root(self.dbh);
        self.coarse_root_mass += delta_root;
        if self.coarse_root_mass > max_coarse_root {
            snag.add_turnover_wood(species, self.coarse_root_mass - max_coarse_root);
            self.coarse_root_mass = max_coarse_root;
        }

        // foliage
        let delta_foliage = apct_foliage * npp - sen_foliage;
        self.foliage_mass = (self.foliage_mass + delta_foliage).max(0.0);
        if self.foliage_mass.is_nan() {
            log::warn!("foliage mass invalid (nan), tree {} flagged dead", self.id);
            self.set_dead();
            return;
        }
        self.leaf_area = self.foliage_mass * species.specific_leaf_area();

        // stress: what fraction of the maintenance demand was not covered
        d.stress_index = (1.0
            - npp
                / (to_fol * foliage_mass_allo
                    + to_root * foliage_mass_allo * species.fineroot_foliage_ratio()
                    + reserve_size))
            .max(0.0);

        // woody: refill the reserve first, the rest grows wood
        let gross_woody = apct_wood * npp;
        let to_reserve = reserve_size.min(gross_woody);
        self.npp_reserve = to_reserve;
        let net_woody = gross_woody - to_reserve;
        self.dbh_delta = 0.0;

        if net_woody > 0.0 {
            let net_stem = net_woody * species.allometric_fraction_stem(self.dbh);
            d.npp_stem = net_stem;
            self.woody_mass += net_woody;
            self.grow_diameter(species, net_stem, lri_modifier, opacity_k);
        }
    }

    /// Diameter and height increment from the net stem NPP. Works in
    /// meters of dbh internally; refines the increment by bracketed
    /// bisection when the linearized estimate leaves more than 1 kg of
    /// stem-mass residual.
    fn grow_diameter(
        &mut self,
        species: &Species,
        net_stem_npp: f64,
        lri_modifier: f64,
        opacity_k: f64,
    ) {
        let hd_growth = self.relative_height_growth(species, lri_modifier);
        let d_m = self.dbh / 100.0;
        let d_delta_m = self.dbh_delta / 100.0;

        let mass_factor = species.volume_factor() * species.density();
        let stem_mass = mass_factor * d_m * d_m * self.height;

        // diameter increment per kg of stem NPP, linearized at the
        // current dimensions
        let factor_diameter = 1.0
            / (mass_factor
                * (d_m + d_delta_m)
                * (d_m + d_delta_m)
                * (2.0 * self.height / d_m + hd_growth));
        let delta_d_estimate = factor_diameter * net_stem_npp;

        // stem-mass residual of the estimate (Eq. 9)
        let stem_estimate = mass_factor
            * (d_m + delta_d_estimate)
            * (d_m + delta_d_estimate)
            * (self.height + delta_d_estimate * hd_growth);
        let stem_residual = stem_estimate - (stem_mass + net_stem_npp);

        let mut d_increment = factor_diameter * (net_stem_npp - stem_residual); // Eq. (11)
        if stem_residual.abs() > 1.0 {
            let res_final = mass_factor
                * (d_m + d_increment)
                * (d_m + d_increment)
                * (self.height + d_increment * hd_growth)
                - (stem_mass + net_stem_npp);
            if res_final.abs() > 1.0 {
                // solve iteratively: step outward until the residual flips
                // sign, then halve the step
                d_increment = 0.02;
                let mut step = 0.01;
                let mut reached_error = false;
                loop {
                    let est_stem = mass_factor
                        * (d_m + d_increment)
                        * (d_m + d_increment)
                        * (self.height + d_increment * hd_growth);
                    let residual = est_stem - (stem_mass + net_stem_npp);
                    if residual.abs() < 1.0 {
                        break;
                    }
                    if residual > 0.0 {
                        d_increment -= step;
                        reached_error = true;
                    } else {
                        d_increment += step;
                    }
                    if reached_error {
                        step /= 2.0;
                    }
                    if step <= 0.00001 {
                        break;
                    }
                }
            }
        }

        let d_increment = d_increment.max(0.0);

        self.dbh += d_increment * 100.0;
        self.dbh_delta = d_increment * 100.0;
        self.height += d_increment * hd_growth;

        // refresh stamp and opacity for the new dimensions
        self.stamp = species.stamp_index(self.dbh, self.height);
        let crown_area = species.stamp(self.stamp).crown_area() as f64;
        self.opacity = 1.0 - (-opacity_k * self.leaf_area / crown_area).exp();
    }

    /// h/d ratio of this year's increment: open-grown trees (high light)
    /// run along `hd_low`, suppressed trees along `hd_high`.
    fn relative_height_growth(&self, species: &Species, lri_modifier: f64) -> f64 {
        let (hd_low, hd_high) = species.hd_range(self.dbh);
        debug_assert!(hd_low <= hd_high);
        let lri = (self.lri * lri_modifier).clamp(0.0, 1.0);
        hd_high - (hd_high - hd_low) * lri
    }

    fn mortality(
        &mut self,
        species: &Species,
        d: &TreeGrowthData,
        snag: &mut Snag,
        rng: &mut GameRng,
    ) {
        // death if the crown is gone
        if self.foliage_mass < 0.00001 {
            self.die(species, snag);
            return;
        }
        let p_death =
            species.death_prob_intrinsic() + species.death_prob_stress(d.stress_index);
        if rng.next_f64() < p_death {
            self.die(species, snag);
        }
    }

    /// Natural death: flag and route all biomass into the snag pools.
    pub fn die(&mut self, species: &Species, snag: &mut Snag) {
        if self.is_dead() {
            return;
        }
        self.set_dead();
        snag.add_mortality(species, self);
    }

    /// Removal by management: flag the tree and route the retained
    /// fractions to the snag pools (the rest leaves the system as
    /// harvest).
    pub fn remove(
        &mut self,
        species: &Species,
        snag: &mut Snag,
        stem_to_snag: f64,
        branch_to_snag: f64,
        foliage_to_soil: f64,
    ) {
        if self.is_dead() {
            return;
        }
        self.set_dead();
        snag.add_harvest(species, self, stem_to_snag, branch_to_snag, foliage_to_soil);
    }

    /// Removal by a disturbance (fire, wind): like `die`, but the module
    /// controls how stem/branch biomass splits between snag, soil and
    /// loss (combustion, export).
    #[allow(clippy::too_many_arguments)]
    pub fn remove_disturbance(
        &mut self,
        species: &Species,
        snag: &mut Snag,
        stem_to_snag: f64,
        stem_to_soil: f64,
        branch_to_snag: f64,
        branch_to_soil: f64,
        foliage_to_soil: f64,
    ) {
        if self.is_dead() {
            return;
        }
        self.set_dead();
        snag.add_disturbance(
            species,
            self,
            stem_to_snag,
            stem_to_soil,
            branch_to_snag,
            branch_to_soil,
            foliage_to_soil,
        );
    }

    /// Sanity range of the tree dimensions; checked by the resource unit
    /// after a growth pass.
    pub fn dimensions_valid(&self) -> bool {
        self.dbh > 0.0
            && self.dbh < 10_000.0
            && self.height > 0.0
            && self.height < 1_000.0
            && self.foliage_mass >= 0.0
    }
}
