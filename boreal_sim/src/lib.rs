// boreal_sim — individual-based forest landscape and disturbance
// simulator.
//
// Models a spatially explicit forest on a rectangular landscape of 1-ha
// resource units, each with its own population of individual trees. On an
// annual time step every tree's dimensions, biomass pools and life status
// advance according to the light it captures under competition, the
// stand-level primary production, the allocation of assimilates, and
// stress mortality; regeneration, the snag/soil carbon cycle and optional
// disturbance modules complete the year. This crate is a pure headless
// library: no rendering, no database, no UI — file contents go in,
// tabular outputs come out.
//
// Module overview:
// - `grid.rs`:          Dense 2-D rasters with metric rectangles; ESRI
//                       ASCII import.
// - `light.rs`:         The shared 2 m light field and 10 m dominance
//                       field (commutative atomic writes).
// - `stamp.rs`:         Per-species light-influence kernels and readers.
// - `species.rs`:       Species allometries/responses, the species set.
// - `climate.rs`:       Daily climate series with annual advance.
// - `tree.rs`:          The individual tree: light functions and growth.
// - `resource_unit.rs`: The 1-ha unit owning trees and pools; the granule
//                       of parallel scheduling.
// - `production.rs`:    3PG-style stand production and responses.
// - `water.rs`:         Daily soil-water bucket, snow, interception.
// - `permafrost.rs`:    Seasonal freeze/thaw of the active layer.
// - `snag.rs`:          Standing/downed dead wood, litter inboxes.
// - `soil.rs`:          ICBM/2N soil carbon and nitrogen.
// - `seed_dispersal.rs`:Per-species seed maps and dispersal kernels.
// - `saplings.rs`:      Sapling cohorts on the 2 m grid, establishment.
// - `grass.rs`:         Grass/herb cover layer.
// - `environment.rs`:   Per-unit site parameters, climate/species choice.
// - `timeevents.rs`:    Scheduled settings overrides.
// - `management.rs`:    Expression-filtered tree removal.
// - `modules.rs`:       Disturbance plug-in registry.
// - `outputs.rs`:       Tabular output sinks.
// - `threading.rs`:     The per-resource-unit parallel map.
// - `model.rs`:         Landscape setup and the annual driver.
// - `config.rs`:        The JSON settings tree.
// - `types.rs`:         Grid ratios and shared constants.
// - `error.rs`:         `SimError`.
//
// **Determinism.** All randomness flows through `boreal_prng` generators
// seeded from the project seed (one stream per resource unit). With
// multithreading disabled a run is bit-for-bit reproducible; the parallel
// light phase is commutative but not associative in floating point, so
// regression comparisons use the single-threaded mode.

pub mod climate;
pub mod config;
pub mod environment;
pub mod error;
pub mod grass;
pub mod grid;
pub mod light;
pub mod management;
pub mod model;
pub mod modules;
pub mod outputs;
pub mod permafrost;
pub mod production;
pub mod resource_unit;
pub mod saplings;
pub mod seed_dispersal;
pub mod snag;
pub mod soil;
pub mod species;
pub mod stamp;
pub mod stats;
pub mod threading;
pub mod timeevents;
pub mod tree;
pub mod types;
pub mod water;

pub use config::ProjectConfig;
pub use error::SimError;
pub use model::{Model, ModelInput, TreeInit, YearOutcome};
