// Registry for disturbance plug-ins.
//
// The core hosts disturbance modules (fire, wind, ...) behind a small
// trait: `setup` once, `setup_resource_unit` per unit, `year_begin` at the
// top of every year, `calculate_water` with each unit's water summary,
// and `run` after the regular dynamics. `run` is dispatched in randomized
// order so no module is systematically first on the shared landscape.
//
// Modules mutate the world only through the `DisturbanceContext` handed
// to `run` (units, species sets, the model rng and year).

use boreal_prng::GameRng;

use crate::error::SimError;
use crate::resource_unit::ResourceUnit;
use crate::species::SpeciesSet;
use crate::water::WaterCycleData;

/// What a disturbance module may touch during `run`.
pub struct DisturbanceContext<'a> {
    pub resource_units: &'a mut [ResourceUnit],
    pub species_sets: &'a [SpeciesSet],
    pub rng: &'a mut GameRng,
    pub year: u32,
}

pub trait DisturbanceModule: Send {
    fn name(&self) -> &str;

    fn setup(&mut self) -> Result<(), SimError> {
        Ok(())
    }

    /// Per-unit setup hook (e.g. fuel parameters from the environment).
    fn setup_resource_unit(&mut self, _ru: &ResourceUnit) {}

    fn year_begin(&mut self) {}

    /// Water summary of one unit, published after its water cycle ran.
    fn calculate_water(&mut self, _ru: &ResourceUnit, _data: &WaterCycleData) {}

    fn run(&mut self, ctx: &mut DisturbanceContext<'_>) -> Result<(), SimError>;
}

/// The module container of the model.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: Vec<Box<dyn DisturbanceModule>>,
}

impl ModuleRegistry {
    pub fn register(&mut self, module: Box<dyn DisturbanceModule>) {
        self.modules.push(module);
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn setup(&mut self) -> Result<(), SimError> {
        for module in &mut self.modules {
            module.setup()?;
        }
        Ok(())
    }

    pub fn setup_resource_unit(&mut self, ru: &ResourceUnit) {
        for module in &mut self.modules {
            module.setup_resource_unit(ru);
        }
    }

    pub fn year_begin(&mut self) {
        for module in &mut self.modules {
            module.year_begin();
        }
    }

    pub fn calculate_water(&mut self, ru: &ResourceUnit, data: &WaterCycleData) {
        for module in &mut self.modules {
            module.calculate_water(ru, data);
        }
    }

    /// Run all modules once, in randomized order.
    pub fn run(
        &mut self,
        resource_units: &mut [ResourceUnit],
        species_sets: &[SpeciesSet],
        rng: &mut GameRng,
        year: u32,
    ) -> Result<(), SimError> {
        let mut pending: Vec<usize> = (0..self.modules.len()).collect();
        while !pending.is_empty() {
            let pick = rng.range_usize(0, pending.len());
            let index = pending.swap_remove(pick);
            let module = &mut self.modules[index];
            log::debug!("executing disturbance module '{}'", module.name());
            let mut ctx = DisturbanceContext {
                resource_units: &mut *resource_units,
                species_sets,
                rng: &mut *rng,
                year,
            };
            module.run(&mut ctx)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Recorder {
        name: String,
        order: Arc<AtomicUsize>,
        ran_at: Arc<AtomicUsize>,
    }

    impl DisturbanceModule for Recorder {
        fn name(&self) -> &str {
            &self.name
        }
        fn run(&mut self, _ctx: &mut DisturbanceContext<'_>) -> Result<(), SimError> {
            let at = self.order.fetch_add(1, Ordering::Relaxed);
            self.ran_at.store(at + 1, Ordering::Relaxed);
            Ok(())
        }
    }

    #[test]
    fn all_modules_run_exactly_once() {
        let order = Arc::new(AtomicUsize::new(0));
        let mut registry = ModuleRegistry::default();
        let mut slots = Vec::new();
        for i in 0..5 {
            let ran_at = Arc::new(AtomicUsize::new(0));
            slots.push(ran_at.clone());
            registry.register(Box::new(Recorder {
                name: format!("m{i}"),
                order: order.clone(),
                ran_at,
            }));
        }
        let mut rng = GameRng::new(17);
        registry.run(&mut [], &[], &mut rng, 1).unwrap();
        assert_eq!(order.load(Ordering::Relaxed), 5);
        for slot in &slots {
            assert!(slot.load(Ordering::Relaxed) > 0);
        }
    }

    #[test]
    fn run_order_depends_on_the_seed() {
        // with 5 modules two different seeds almost surely differ; use a
        // pair that does
        let run_with_seed = |seed: u64| -> Vec<usize> {
            let order = Arc::new(AtomicUsize::new(0));
            let mut registry = ModuleRegistry::default();
            let mut slots = Vec::new();
            for i in 0..5 {
                let ran_at = Arc::new(AtomicUsize::new(0));
                slots.push(ran_at.clone());
                registry.register(Box::new(Recorder {
                    name: format!("m{i}"),
                    order: order.clone(),
                    ran_at,
                }));
            }
            let mut rng = GameRng::new(seed);
            registry.run(&mut [], &[], &mut rng, 1).unwrap();
            slots.iter().map(|s| s.load(Ordering::Relaxed)).collect()
        };
        assert_ne!(run_with_seed(1), run_with_seed(99));
        // deterministic given the seed
        assert_eq!(run_with_seed(4), run_with_seed(4));
    }
}
