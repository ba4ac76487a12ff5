// Per-species seed dispersal on the 20 m seed grid.
//
// During tree growth every mature tree marks its 20 m cell as a seed
// source (a concurrent, idempotent store — growth runs parallel over
// resource units). Between years `execute()` turns the source marks into a
// seed probability field in three phases:
//
//   1. edge detection: only source pixels at the edge of a closed source
//      area emit (interior pixels disperse into already-saturated cells);
//   2. distribution: a TreeMig-style two-lognormal kernel is added around
//      every emitter, scaled down in non-seed years;
//   3. cleanup: isolated sub-threshold pixels are cleared (a non-zero
//      pixel survives only if itself above the occupancy threshold or a
//      neighbor is non-zero), and the external-seed belt in the buffer is
//      applied.
//
// Values are probabilities in [0, 1] read by the establishment screen.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::grid::{Grid, GridRunner, Rect};
use crate::types::{PX_PER_SEED, SEED_CELL_SIZE};

/// Seeds per destination cell needed for establishment at full
/// probability; also the cutoff for the isolated-pixel cleanup.
const OCCUPANCY_THRESHOLD: f32 = 0.05;

/// Kernel values below this fraction of the total are trimmed.
const KERNEL_CUTOFF: f32 = 1e-5;

/// Marker for an emitting edge pixel between phases 1 and 2.
const EDGE_MARKER: f32 = -1.0;

#[derive(Clone, Copy, Debug)]
pub struct DispersalParams {
    pub as1: f64,
    pub as2: f64,
    pub ks: f64,
    pub fecundity: f64,
    pub non_seed_year_fraction: f64,
    /// Seed probability imposed on the buffer belt (external seed input);
    /// 0 disables.
    pub external_seed_background: f64,
}

/// The per-species seed map plus its dispersal kernels.
#[derive(Debug)]
pub struct SeedDispersal {
    seed_map: Grid<AtomicU32>,
    kernel_seed_year: Grid<f32>,
    kernel_non_seed_year: Grid<f32>,
    params: DispersalParams,
    /// Metric rectangle of the project (cells outside form the external
    /// seed belt).
    project_rect: Rect,
}

impl SeedDispersal {
    /// `full_rect` is the buffered landscape rectangle shared with the
    /// light grid; `project_rect` the unbuffered project area.
    pub fn new(full_rect: Rect, project_rect: Rect, params: DispersalParams) -> Self {
        let seed_map =
            Grid::from_rect_fn(full_rect, SEED_CELL_SIZE, || AtomicU32::new(0f32.to_bits()));
        let kernel_seed_year = build_kernel(&params, params.fecundity);
        let kernel_non_seed_year =
            build_kernel(&params, params.fecundity * params.non_seed_year_fraction);
        Self { seed_map, kernel_seed_year, kernel_non_seed_year, params, project_rect }
    }

    pub fn params(&self) -> &DispersalParams {
        &self.params
    }

    /// Mark the seed cell containing a LIF index as a mature source.
    /// Concurrent calls are fine: the store is idempotent.
    pub fn set_mature_tree(&self, lif_index: (usize, usize)) {
        let x = lif_index.0 / PX_PER_SEED;
        let y = lif_index.1 / PX_PER_SEED;
        if self.seed_map.is_index_valid(x as isize, y as isize) {
            self.seed_map.at(x, y).store(1f32.to_bits(), Ordering::Relaxed);
        }
    }

    /// Seed probability at a metric position.
    pub fn value_at(&self, x: f64, y: f64) -> f32 {
        let (ix, iy) = self.seed_map.index_at(x, y);
        match self.seed_map.get(ix, iy) {
            Some(cell) => f32::from_bits(cell.load(Ordering::Relaxed)),
            None => 0.0,
        }
    }

    fn get(&self, x: usize, y: usize) -> f32 {
        f32::from_bits(self.seed_map.at(x, y).load(Ordering::Relaxed))
    }

    fn set(&mut self, x: usize, y: usize, v: f32) {
        self.seed_map.at_mut(x, y).store(v.to_bits(), Ordering::Relaxed);
    }

    /// Zero the map (start of the regeneration cycle).
    pub fn clear(&mut self) {
        for cell in self.seed_map.iter_mut() {
            cell.store(0f32.to_bits(), Ordering::Relaxed);
        }
    }

    /// Run the dispersal for this year. `seed_year` selects the kernel.
    pub fn execute(&mut self, seed_year: bool) {
        if self.edge_detection() {
            self.distribute(seed_year);
            self.cleanup_isolated();
        }
        self.apply_external_seeds();
    }

    /// Phase 1: mark source pixels that border a non-saturated pixel as
    /// emitters. Returns false if no pixel is lit at all.
    fn edge_detection(&mut self) -> bool {
        let mut any = false;
        let mut edges = Vec::new();
        let mut runner = GridRunner::whole(&self.seed_map);
        while let Some(idx) = runner.next_index() {
            let (x, y) = self.seed_map.index_of(idx);
            if self.get(x, y) < 0.999 {
                continue;
            }
            any = true;
            let mut is_edge = false;
            for n in runner.neighbors8().into_iter().flatten() {
                let (nx, ny) = self.seed_map.index_of(n);
                if self.get(nx, ny) < 0.999 {
                    is_edge = true;
                    break;
                }
            }
            // pixels at the grid border always emit
            if runner.neighbors8().iter().any(|n| n.is_none()) {
                is_edge = true;
            }
            if is_edge {
                edges.push((x, y));
            }
        }
        for (x, y) in edges {
            self.set(x, y, EDGE_MARKER);
        }
        any
    }

    /// Phase 2: add the kernel around every emitter.
    fn distribute(&mut self, seed_year: bool) {
        let kernel = if seed_year {
            self.kernel_seed_year.clone()
        } else {
            self.kernel_non_seed_year.clone()
        };
        let k_off = kernel.size_x() / 2;
        let sx = self.seed_map.size_x();
        let sy = self.seed_map.size_y();
        for y in 0..sy {
            for x in 0..sx {
                if self.get(x, y) != EDGE_MARKER {
                    continue;
                }
                for ky in 0..kernel.size_y() {
                    for kx in 0..kernel.size_x() {
                        let k = *kernel.at(kx, ky);
                        if k <= 0.0 {
                            continue;
                        }
                        let tx = x as isize + kx as isize - k_off as isize;
                        let ty = y as isize + ky as isize - k_off as isize;
                        if !self.seed_map.is_index_valid(tx, ty) {
                            continue;
                        }
                        let (tx, ty) = (tx as usize, ty as usize);
                        let old = self.get(tx, ty);
                        if old == EDGE_MARKER {
                            continue;
                        }
                        self.set(tx, ty, (old + k).min(1.0));
                    }
                }
            }
        }
        // emitters are saturated sources
        for y in 0..sy {
            for x in 0..sx {
                if self.get(x, y) == EDGE_MARKER {
                    self.set(x, y, 1.0);
                }
            }
        }
    }

    /// Phase 3: clear sub-threshold pixels with an all-zero neighborhood.
    fn cleanup_isolated(&mut self) {
        let mut to_clear = Vec::new();
        let mut runner = GridRunner::whole(&self.seed_map);
        while let Some(idx) = runner.next_index() {
            let (x, y) = self.seed_map.index_of(idx);
            let v = self.get(x, y);
            if v <= 0.0 || v >= OCCUPANCY_THRESHOLD {
                continue;
            }
            let isolated = runner.neighbors8().into_iter().flatten().all(|n| {
                let (nx, ny) = self.seed_map.index_of(n);
                self.get(nx, ny) <= 0.0
            });
            if isolated {
                to_clear.push((x, y));
            }
        }
        for (x, y) in to_clear {
            self.set(x, y, 0.0);
        }
    }

    /// Impose the external seed probability on cells outside the project
    /// rectangle.
    fn apply_external_seeds(&mut self) {
        let background = self.params.external_seed_background as f32;
        if background <= 0.0 {
            return;
        }
        for i in 0..self.seed_map.count() {
            let (x, y) = self.seed_map.index_of(i);
            let (cx, cy) = self.seed_map.cell_center(x, y);
            if !self.project_rect.contains(cx, cy) {
                let old = self.get(x, y);
                self.set(x, y, old.max(background));
            }
        }
    }
}

/// Two-lognormal TreeMig mixture, sampled on the 20 m grid and normalized
/// so the kernel sums to `max_seed`.
fn build_kernel(params: &DispersalParams, max_seed: f64) -> Grid<f32> {
    let density = |d: f64| -> f64 {
        let ln1 = (d.max(1.0) / params.as1).ln();
        let ln2 = (d.max(1.0) / params.as2).ln();
        params.ks * (-0.5 * ln1 * ln1).exp() + (1.0 - params.ks) * (-0.5 * ln2 * ln2).exp()
    };
    // radius: extend until the density has decayed to a negligible level,
    // capped at 31 cells (620 m)
    let mut radius_cells = 2usize;
    while radius_cells < 31 {
        let d = (radius_cells as f64 + 1.0) * SEED_CELL_SIZE;
        if density(d) < 1e-6 {
            break;
        }
        radius_cells += 1;
    }
    let size = radius_cells * 2 + 1;
    let mut kernel = Grid::from_dimensions_fn(SEED_CELL_SIZE, size, size, || 0f32);
    let mut sum = 0.0f64;
    for y in 0..size {
        for x in 0..size {
            let dx = (x as f64 - radius_cells as f64) * SEED_CELL_SIZE;
            let dy = (y as f64 - radius_cells as f64) * SEED_CELL_SIZE;
            let v = density((dx * dx + dy * dy).sqrt());
            *kernel.at_mut(x, y) = v as f32;
            sum += v;
        }
    }
    if sum > 0.0 {
        let scale = (max_seed / sum) as f32;
        for v in kernel.iter_mut() {
            *v *= scale;
            if *v < KERNEL_CUTOFF {
                *v = 0.0;
            }
        }
    }
    kernel
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Rect;

    fn params() -> DispersalParams {
        DispersalParams {
            as1: 25.0,
            as2: 150.0,
            ks: 0.85,
            fecundity: 0.8,
            non_seed_year_fraction: 0.25,
            external_seed_background: 0.0,
        }
    }

    fn dispersal() -> SeedDispersal {
        let full = Rect::from_size(-60.0, -60.0, 220.0, 220.0);
        let project = Rect::from_size(0.0, 0.0, 100.0, 100.0);
        SeedDispersal::new(full, project, params())
    }

    #[test]
    fn mature_tree_lands_in_its_seed_cell() {
        let d = dispersal();
        // LIF index (75, 75) -> seed cell (7, 7)
        d.set_mature_tree((75, 75));
        let (cx, cy) = d.seed_map.cell_center(7, 7);
        assert_eq!(d.value_at(cx, cy), 1.0);
    }

    #[test]
    fn execute_spreads_around_source() {
        let mut d = dispersal();
        d.set_mature_tree((75, 75));
        d.execute(true);
        let (cx, cy) = d.seed_map.cell_center(7, 7);
        // source stays saturated
        assert_eq!(d.value_at(cx, cy), 1.0);
        // neighbors received seeds
        let (nx, ny) = d.seed_map.cell_center(8, 7);
        assert!(d.value_at(nx, ny) > 0.0);
        // far-away cells received less
        let (fx, fy) = d.seed_map.cell_center(12, 7);
        assert!(d.value_at(fx, fy) < d.value_at(nx, ny));
    }

    #[test]
    fn non_seed_year_is_weaker() {
        let mut a = dispersal();
        a.set_mature_tree((75, 75));
        a.execute(true);
        let mut b = dispersal();
        b.set_mature_tree((75, 75));
        b.execute(false);
        let (nx, ny) = a.seed_map.cell_center(8, 7);
        assert!(b.value_at(nx, ny) < a.value_at(nx, ny));
        assert!(b.value_at(nx, ny) > 0.0);
    }

    #[test]
    fn empty_map_stays_empty() {
        let mut d = dispersal();
        d.execute(true);
        assert_eq!(d.seed_map.iter().map(|c| f32::from_bits(c.load(Ordering::Relaxed)) as f64).sum::<f64>(), 0.0);
    }

    #[test]
    fn external_belt_covers_buffer_only() {
        let full = Rect::from_size(-60.0, -60.0, 220.0, 220.0);
        let project = Rect::from_size(0.0, 0.0, 100.0, 100.0);
        let mut p = params();
        p.external_seed_background = 0.3;
        let mut d = SeedDispersal::new(full, project, p);
        d.execute(true);
        assert!(d.value_at(-30.0, -30.0) >= 0.3);
        assert_eq!(d.value_at(50.0, 50.0), 0.0);
    }

    #[test]
    fn kernel_mass_matches_fecundity() {
        let k = build_kernel(&params(), 0.8);
        let total: f64 = k.iter().map(|v| *v as f64).sum();
        assert!((total - 0.8).abs() < 0.02);
    }
}
