// Per-resource-unit, per-species stand statistics.
//
// Accumulated tree by tree during the growth phase (and for the dead and
// management removal lists when trees leave), finalized once per year.
// Average getters return `None` for empty units — "no data" is
// distinguishable from zero.

use crate::species::Species;
use crate::tree::{Tree, TreeGrowthData};
use crate::types::RU_AREA;

#[derive(Clone, Debug, Default)]
pub struct StandStatistics {
    count: u32,
    dbh_sum: f64,
    height_sum: f64,
    basal_area: f64,
    volume: f64,
    leaf_area: f64,
    npp: f64,
    npp_above: f64,
    biomass: f64,
}

impl StandStatistics {
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Add one tree; `growth` carries this year's NPP when available.
    pub fn add(&mut self, tree: &Tree, species: &Species, growth: Option<&TreeGrowthData>) {
        self.count += 1;
        self.dbh_sum += tree.dbh;
        self.height_sum += tree.height;
        self.basal_area += tree.basal_area();
        self.volume += tree.volume(species);
        self.leaf_area += tree.leaf_area;
        self.biomass += tree.foliage_mass
            + tree.woody_mass
            + tree.fine_root_mass
            + tree.coarse_root_mass
            + species.biomass_branch(tree.dbh);
        if let Some(d) = growth {
            self.npp += d.npp;
            self.npp_above += d.npp_above;
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Mean dbh (cm); `None` for an empty unit.
    pub fn dbh_avg(&self) -> Option<f64> {
        (self.count > 0).then(|| self.dbh_sum / self.count as f64)
    }

    /// Mean height (m); `None` for an empty unit.
    pub fn height_avg(&self) -> Option<f64> {
        (self.count > 0).then(|| self.height_sum / self.count as f64)
    }

    /// Basal area (m2) on the unit.
    pub fn basal_area(&self) -> f64 {
        self.basal_area
    }

    /// Standing volume (m3).
    pub fn volume(&self) -> f64 {
        self.volume
    }

    /// Leaf-area index over the full hectare.
    pub fn leaf_area_index(&self) -> f64 {
        self.leaf_area / RU_AREA
    }

    pub fn leaf_area(&self) -> f64 {
        self.leaf_area
    }

    /// NPP of the year (kg biomass).
    pub fn npp(&self) -> f64 {
        self.npp
    }

    pub fn npp_above(&self) -> f64 {
        self.npp_above
    }

    /// Total living biomass (kg).
    pub fn biomass(&self) -> f64 {
        self.biomass
    }
}
