// Shared constants and foundational spatial types.
//
// The three grids of the model (2 m light, 10 m dominance, 100 m resource
// units) share one metric rectangle and an index origin; the integer ratios
// below bind them. Translating an index between resolutions is integer
// division, never a coordinate search.

/// Side length of a light (LIF) cell in meters.
pub const LIF_CELL_SIZE: f64 = 2.0;

/// LIF cells per dominance-grid cell side (10 m / 2 m).
pub const PX_PER_HEIGHT: usize = 5;

/// LIF cells per resource-unit side (100 m / 2 m).
pub const PX_PER_RU: usize = 50;

/// Dominance-grid cells per resource-unit side.
pub const HEIGHT_PX_PER_RU: usize = PX_PER_RU / PX_PER_HEIGHT;

/// Side length of a dominance-grid cell in meters.
pub const HEIGHT_CELL_SIZE: f64 = LIF_CELL_SIZE * PX_PER_HEIGHT as f64;

/// Area of one dominance-grid pixel (m2).
pub const HEIGHT_PIXEL_AREA: f64 = HEIGHT_CELL_SIZE * HEIGHT_CELL_SIZE;

/// Side length of a resource unit in meters.
pub const RU_SIZE: f64 = 100.0;

/// Area of a resource unit (m2).
pub const RU_AREA: f64 = RU_SIZE * RU_SIZE;

/// Seed-map cells are 20 m: this many LIF cells per seed cell side.
pub const PX_PER_SEED: usize = 10;

/// Side length of a seed-map cell in meters.
pub const SEED_CELL_SIZE: f64 = LIF_CELL_SIZE * PX_PER_SEED as f64;

/// NPP = GPP x this factor (autotrophic respiration, Waring et al. 1998).
pub const AUTOTROPHIC_RESPIRATION: f64 = 0.47;

/// Carbon content of dry biomass.
pub const BIOMASS_C_FRACTION: f64 = 0.5;

/// Saplings are promoted to individual trees at this height (m); the
/// regeneration layer covers everything below.
pub const SAPLING_PROMOTION_HEIGHT: f64 = 1.3;

/// Floor applied to light-influence factors so the field never saturates
/// to zero.
pub const LIF_FLOOR: f32 = 0.02;

/// Wrap an index into the 1-ha torus.
///
/// `count` is the number of pixels per resource-unit side at the grid's
/// resolution, `buffer` the width of the out-of-project buffer in pixels,
/// and `ru_offset` the index of the unit's lower-left corner relative to
/// the buffer edge.
#[inline]
pub fn torus_index(index: isize, count: isize, buffer: isize, ru_offset: isize) -> isize {
    buffer + ru_offset + (index - buffer + count).rem_euclid(count)
}
