// Classic management: expression-filtered removals.
//
// Management runs on the driver thread between the per-unit resets and
// the light phase, so removed trees never stamp this year's pattern. The
// built-in implementation selects trees with a filter expression over the
// tree variables (dbh, height, age, lri, stress, species) and removes a
// configured fraction of the matches; biomass routing (snag vs. off-site
// harvest) is configurable. Richer regimes (agents, scripted scenarios)
// plug in through the same trait.

use boreal_expr::{Expression, VarSource};
use boreal_prng::GameRng;

use crate::config::ManagementConfig;
use crate::error::SimError;
use crate::resource_unit::ResourceUnit;
use crate::species::SpeciesSet;
use crate::tree::Tree;

/// Variable binding for a single tree.
#[derive(Default)]
pub struct TreeVars<'a> {
    tree: Option<&'a Tree>,
}

impl<'a> TreeVars<'a> {
    pub fn bound(tree: &'a Tree) -> Self {
        Self { tree: Some(tree) }
    }

    pub const NAMES: [&'static str; 6] = ["dbh", "height", "age", "lri", "stress", "species"];
}

impl VarSource for TreeVars<'_> {
    fn var_index(&self, name: &str) -> Option<usize> {
        Self::NAMES.iter().position(|n| *n == name)
    }

    fn value(&self, index: usize) -> f64 {
        let Some(tree) = self.tree else { return 0.0 };
        match index {
            0 => tree.dbh,
            1 => tree.height,
            2 => tree.age as f64,
            3 => tree.lri,
            4 => tree.stress_index,
            5 => tree.species as f64,
            _ => 0.0,
        }
    }
}

/// The management interface invoked once per year by the model.
pub trait Management: Send {
    fn run(
        &mut self,
        resource_units: &mut [ResourceUnit],
        species_sets: &[SpeciesSet],
    ) -> Result<usize, SimError>;
}

/// Filter-expression thinning.
pub struct ExpressionThinning {
    filter: Expression,
    fraction: f64,
    stem_to_snag: f64,
    branch_to_snag: f64,
    foliage_to_soil: f64,
}

impl ExpressionThinning {
    pub fn from_config(config: &ManagementConfig) -> Result<Self, SimError> {
        if config.filter.is_empty() {
            return Err(SimError::Config("management: 'filter' expression is required".into()));
        }
        let filter = Expression::parse_bound(&config.filter, Some(&TreeVars::default()), true)?;
        Ok(Self {
            filter,
            fraction: config.fraction.clamp(0.0, 1.0),
            stem_to_snag: config.stem_to_snag_fraction,
            branch_to_snag: config.branch_to_snag_fraction,
            foliage_to_soil: config.foliage_to_soil_fraction,
        })
    }
}

impl Management for ExpressionThinning {
    fn run(
        &mut self,
        resource_units: &mut [ResourceUnit],
        species_sets: &[SpeciesSet],
    ) -> Result<usize, SimError> {
        let mut removed = 0;
        for ru in resource_units.iter_mut() {
            if !ru.is_stockable() {
                continue;
            }
            let set = &species_sets[ru.species_set_index()];
            let filter = &self.filter;
            let fraction = self.fraction;
            removed += ru.remove_trees_where(
                set,
                |tree: &Tree, rng: &mut GameRng| {
                    let vars = TreeVars::bound(tree);
                    filter.execute(&[], Some(&vars), None) != 0.0 && rng.chance(fraction)
                },
                self.stem_to_snag,
                self.branch_to_snag,
                self.foliage_to_soil,
            );
        }
        if removed > 0 {
            log::debug!("management removed {removed} trees");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::climate::{Climate, synthetic_year};
    use crate::config::ProjectConfig;
    use crate::grid::Rect;
    use crate::species::{SpeciesSet, SpeciesSetData};

    fn world() -> (ProjectConfig, SpeciesSet, Climate, ResourceUnit) {
        let config = ProjectConfig::default();
        let set =
            SpeciesSet::setup(SpeciesSetData::default(), &config.model.settings, true).unwrap();
        let climate = Climate::from_days("t", synthetic_year(2000, 6.0, 12.0, 700.0)).unwrap();
        let ru = ResourceUnit::new(
            0,
            0,
            Rect::from_size(0.0, 0.0, 100.0, 100.0),
            (30, 30),
            0,
            0,
            1,
            config.model.site.clone(),
            &config,
            3,
        )
        .unwrap();
        (config, set, climate, ru)
    }

    #[test]
    fn thinning_removes_only_matching_trees() {
        let (_config, set, _climate, mut ru) = world();
        ru.add_tree(&set, 0, (40, 40), 40.0, 28.0, 90, 0.6);
        ru.add_tree(&set, 0, (60, 60), 12.0, 10.0, 25, 0.6);

        let mc = ManagementConfig {
            enabled: true,
            filter: "dbh>30".to_string(),
            fraction: 1.0,
            stem_to_snag_fraction: 0.0,
            branch_to_snag_fraction: 0.0,
            foliage_to_soil_fraction: 1.0,
        };
        let mut thinning = ExpressionThinning::from_config(&mc).unwrap();
        let sets = [set];
        let mut rus = [ru];
        let removed = thinning.run(&mut rus, &sets).unwrap();
        assert_eq!(removed, 1);
        let ru = &mut rus[0];
        assert!(ru.has_dead_trees());
        ru.clean_tree_list();
        assert_eq!(ru.trees().len(), 1);
        assert!(ru.trees()[0].dbh < 30.0);
        // removed stem left the system as harvest
        assert!(ru.snag().harvest_c() > 0.0);
    }

    #[test]
    fn missing_filter_is_rejected() {
        let mc = ManagementConfig { enabled: true, ..ManagementConfig::default() };
        assert!(ExpressionThinning::from_config(&mc).is_err());
    }

    #[test]
    fn bad_variable_in_filter_is_rejected() {
        let mc = ManagementConfig {
            enabled: true,
            filter: "crown>3".to_string(),
            fraction: 0.5,
            ..ManagementConfig::default()
        };
        assert!(ExpressionThinning::from_config(&mc).is_err());
    }
}
