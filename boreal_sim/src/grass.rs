// Grass and herb cover on the 2 m grid.
//
// An optional layer competing with tree regeneration: each light pixel
// carries a cover state in 0..=255 that grows toward a light-dependent
// potential with a configurable time lag. The effect on establishment is
// a precomputed 256-step table of the `grassEffect` expression, looked up
// by the establishment screen as a multiplier.

use boreal_expr::Expression;

use crate::config::GrassConfig;
use crate::error::SimError;
use crate::grid::{Grid, Rect};
use crate::light::LightField;

#[derive(Debug, Default)]
pub struct GrassCover {
    enabled: bool,
    grid: Grid<u8>,
    /// Establishment multiplier per cover state.
    effect: Vec<f64>,
    potential: Option<Expression>,
    /// Cover states gained per year on a fully open pixel.
    growth_rate: i32,
    /// Cover state reached under full light.
    max_state: u8,
}

impl GrassCover {
    pub fn setup(config: &GrassConfig, rect: Rect, cell_size: f64) -> Result<Self, SimError> {
        if !config.enabled {
            return Ok(Self::default());
        }
        if config.grass_potential.is_empty() || config.grass_effect.is_empty() {
            return Err(SimError::Config(
                "grass module: 'grassPotential' and 'grassEffect' expressions are required".into(),
            ));
        }
        if config.max_time_lag <= 0.0 {
            return Err(SimError::Config("grass module: 'maxTimeLag' is missing or zero".into()));
        }
        let potential = Expression::parse_strict(&config.grass_potential, &["x"])?;
        potential.linearize(0.0, 1.0, 512);
        let effect_expr = Expression::parse_strict(&config.grass_effect, &["x"])?;

        let effect: Vec<f64> =
            (0..256).map(|i| effect_expr.calc1(i as f64 / 255.0).clamp(0.0, 1.0)).collect();
        let max_state = (potential.calc1(1.0).clamp(0.0, 1.0) * 255.0) as u8;

        Ok(Self {
            enabled: true,
            grid: Grid::from_rect_fn(rect, cell_size, || 0u8),
            effect,
            potential: Some(potential),
            growth_rate: (256.0 / config.max_time_lag) as i32,
            max_state,
        })
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Establishment multiplier of a light pixel (1 when disabled).
    pub fn effect_at(&self, linear_index: usize) -> f64 {
        if !self.enabled {
            return 1.0;
        }
        self.effect[*self.grid.at_linear(linear_index) as usize]
    }

    /// Annual update: each pixel grows toward the potential implied by
    /// its current light level.
    pub fn execute(&mut self, lif: &LightField) {
        if !self.enabled {
            return;
        }
        let Some(potential) = &self.potential else { return };
        for i in 0..self.grid.count() {
            let light = lif.get_linear(i) as f64;
            let state = *self.grid.at_linear(i);
            if light == 1.0 && state == self.max_state {
                continue;
            }
            let target = (potential.calc1(1.0 - light).clamp(0.0, 1.0) * 255.0) as i32;
            let new_state = (state as i32 + self.growth_rate).min(target);
            *self.grid.at_linear_mut(i) = new_state.clamp(0, 255) as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> GrassConfig {
        GrassConfig { enabled: true, ..GrassConfig::default() }
    }

    fn rect() -> Rect {
        Rect::from_size(0.0, 0.0, 20.0, 20.0)
    }

    #[test]
    fn disabled_cover_is_transparent() {
        let g = GrassCover::setup(&GrassConfig::default(), rect(), 2.0).unwrap();
        assert!(!g.enabled());
        assert_eq!(g.effect_at(0), 1.0);
    }

    #[test]
    fn missing_time_lag_is_rejected() {
        let mut c = config();
        c.max_time_lag = 0.0;
        assert!(GrassCover::setup(&c, rect(), 2.0).is_err());
    }

    #[test]
    fn cover_builds_up_under_shade() {
        let mut g = GrassCover::setup(&config(), rect(), 2.0).unwrap();
        let lif = LightField::new(rect(), 2.0);
        // shade one pixel heavily
        lif.multiply(3, 3, 0.3);
        let idx = 3 * 10 + 3;
        let open_effect = g.effect_at(idx);
        for _ in 0..5 {
            g.execute(&lif);
        }
        // shaded pixel grew grass, so the establishment effect dropped
        assert!(g.effect_at(idx) <= open_effect);
        // over years the state saturates, and the effect stays in [0, 1]
        assert!((0.0..=1.0).contains(&g.effect_at(idx)));
    }
}
