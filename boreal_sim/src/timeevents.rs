// Scheduled settings overrides ("time events").
//
// A list of (year, key, value) records applied at the top of the matching
// simulation year, before anything else runs. Supported keys are the
// per-unit overridable settings plus a handful of global switches; an
// event with an unknown key fails the year rather than being silently
// dropped.

use crate::config::{ProjectConfig, TimeEventConfig};
use crate::error::SimError;

#[derive(Debug, Default)]
pub struct TimeEvents {
    events: Vec<TimeEventConfig>,
}

impl TimeEvents {
    pub fn new(events: Vec<TimeEventConfig>) -> Self {
        Self { events }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Apply all events scheduled for `year` to the configuration.
    /// Returns the number of applied events.
    pub fn run(&self, year: u32, config: &mut ProjectConfig) -> Result<usize, SimError> {
        let mut applied = 0;
        for event in self.events.iter().filter(|e| e.year == year) {
            apply_global_key(config, &event.key, &event.value)?;
            log::debug!("time event: year {} set {} = {}", year, event.key, event.value);
            applied += 1;
        }
        Ok(applied)
    }
}

/// Apply a settings key: the overridable site/soil keys plus global
/// switches that make sense mid-run.
fn apply_global_key(config: &mut ProjectConfig, key: &str, value: &str) -> Result<(), SimError> {
    if config.apply_key(key, value)? {
        return Ok(());
    }
    let parse_bool = |v: &str| -> Result<bool, SimError> {
        match v {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            _ => Err(SimError::Config(format!("bad boolean '{v}' for key '{key}'"))),
        }
    };
    let parse_f64 = |v: &str| -> Result<f64, SimError> {
        v.parse::<f64>()
            .map_err(|_| SimError::Config(format!("bad numeric value '{v}' for key '{key}'")))
    };
    let s = &mut config.model.settings;
    match key {
        "model.settings.growthEnabled" => s.growth_enabled = parse_bool(value)?,
        "model.settings.mortalityEnabled" => s.mortality_enabled = parse_bool(value)?,
        "model.settings.regenerationEnabled" => s.regeneration_enabled = parse_bool(value)?,
        "model.settings.carbonCycleEnabled" => s.carbon_cycle_enabled = parse_bool(value)?,
        "model.settings.browsing.browsingPressure" => {
            s.browsing.browsing_pressure = parse_f64(value)?
        }
        "model.management.fraction" => config.model.management.fraction = parse_f64(value)?,
        "model.management.enabled" => config.model.management.enabled = parse_bool(value)?,
        _ => {
            return Err(SimError::Config(format!("time event: unsupported key '{key}'")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(year: u32, key: &str, value: &str) -> TimeEventConfig {
        TimeEventConfig { year, key: key.to_string(), value: value.to_string() }
    }

    #[test]
    fn events_fire_only_in_their_year() {
        let te = TimeEvents::new(vec![
            event(3, "model.settings.regenerationEnabled", "true"),
            event(5, "model.site.pctSand", "90"),
        ]);
        let mut config = ProjectConfig::default();
        assert_eq!(te.run(1, &mut config).unwrap(), 0);
        assert!(!config.model.settings.regeneration_enabled);
        assert_eq!(te.run(3, &mut config).unwrap(), 1);
        assert!(config.model.settings.regeneration_enabled);
        assert_eq!(te.run(5, &mut config).unwrap(), 1);
        assert_eq!(config.model.site.pct_sand, 90.0);
    }

    #[test]
    fn unknown_keys_are_an_error() {
        let te = TimeEvents::new(vec![event(1, "model.settings.unknown", "1")]);
        let mut config = ProjectConfig::default();
        assert!(te.run(1, &mut config).is_err());
    }
}
