// Tabular output sinks.
//
// An `Output` produces rows keyed by (year, resource unit, species, ...)
// when the driver invokes it at the defined moments of the annual loop.
// The manager collects rows into named in-memory tables; what happens to
// a finished table (SQL emission, file export) is the caller's concern —
// the core only defines the invocation contract and the row shape.

use crate::resource_unit::ResourceUnit;
use crate::species::SpeciesSet;

/// One cell of an output row.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Int(i64),
    Double(f64),
    Str(String),
    /// Explicit no-data (empty units report `Null`, never silently 0).
    Null,
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<Option<f64>> for Value {
    fn from(v: Option<f64>) -> Self {
        v.map(Value::Double).unwrap_or(Value::Null)
    }
}

/// What outputs see when they execute.
pub struct OutputContext<'a> {
    pub year: u32,
    pub resource_units: &'a [ResourceUnit],
    pub species_sets: &'a [SpeciesSet],
}

pub trait Output: Send {
    fn name(&self) -> &'static str;
    fn columns(&self) -> &'static [&'static str];
    /// Append this year's rows via `sink`.
    fn exec(&mut self, ctx: &OutputContext<'_>, sink: &mut dyn FnMut(Vec<Value>));
}

/// A collected table.
#[derive(Clone, Debug, Default)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

/// Owns the outputs and their collected tables.
#[derive(Default)]
pub struct OutputManager {
    outputs: Vec<(Box<dyn Output>, Table)>,
}

impl OutputManager {
    /// The default set: stand, carbon, tree and water tables.
    pub fn standard() -> Self {
        let mut manager = Self::default();
        manager.register(Box::new(StandOutput));
        manager.register(Box::new(CarbonOutput));
        manager.register(Box::new(TreeOutput));
        manager.register(Box::new(WaterOutput));
        manager
    }

    pub fn register(&mut self, output: Box<dyn Output>) {
        let table = Table {
            columns: output.columns().iter().map(|c| c.to_string()).collect(),
            rows: Vec::new(),
        };
        self.outputs.push((output, table));
    }

    /// Execute one named output; unknown names are ignored (an output may
    /// be unregistered while the loop still calls it).
    pub fn execute(&mut self, name: &str, ctx: &OutputContext<'_>) {
        for (output, table) in &mut self.outputs {
            if output.name() == name {
                output.exec(ctx, &mut |row| table.rows.push(row));
            }
        }
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.outputs.iter().find(|(o, _)| o.name() == name).map(|(_, t)| t)
    }
}

/// Per resource unit x species stand state.
pub struct StandOutput;

impl Output for StandOutput {
    fn name(&self) -> &'static str {
        "stand"
    }

    fn columns(&self) -> &'static [&'static str] {
        &[
            "year", "ru", "species", "count", "dbh_avg", "height_avg", "basal_area", "volume",
            "lai", "npp",
        ]
    }

    fn exec(&mut self, ctx: &OutputContext<'_>, sink: &mut dyn FnMut(Vec<Value>)) {
        for ru in ctx.resource_units {
            if !ru.is_stockable() {
                continue;
            }
            let set = &ctx.species_sets[ru.species_set_index()];
            for (i, rus) in ru.ru_species().iter().enumerate() {
                let stats = &rus.statistics;
                if stats.count() == 0 {
                    continue;
                }
                sink(vec![
                    Value::Int(ctx.year as i64),
                    Value::Int(ru.index() as i64),
                    Value::Str(set.species(i).id().to_string()),
                    Value::Int(stats.count() as i64),
                    stats.dbh_avg().into(),
                    stats.height_avg().into(),
                    stats.basal_area().into(),
                    stats.volume().into(),
                    stats.leaf_area_index().into(),
                    stats.npp().into(),
                ]);
            }
        }
    }
}

/// Carbon pools per resource unit.
pub struct CarbonOutput;

impl Output for CarbonOutput {
    fn name(&self) -> &'static str {
        "carbon"
    }

    fn columns(&self) -> &'static [&'static str] {
        &[
            "year",
            "ru",
            "snag_c",
            "soil_yl_c",
            "soil_yr_c",
            "soil_som_c",
            "available_nitrogen",
        ]
    }

    fn exec(&mut self, ctx: &OutputContext<'_>, sink: &mut dyn FnMut(Vec<Value>)) {
        for ru in ctx.resource_units {
            if !ru.is_stockable() {
                continue;
            }
            let (yl, yr, som) = match ru.soil() {
                Some(soil) => (
                    Value::Double(soil.young_labile().c),
                    Value::Double(soil.young_refractory().c),
                    Value::Double(soil.som().c),
                ),
                None => (Value::Null, Value::Null, Value::Null),
            };
            sink(vec![
                Value::Int(ctx.year as i64),
                Value::Int(ru.index() as i64),
                Value::Double(ru.snag().total_c()),
                yl,
                yr,
                som,
                Value::Double(ru.available_nitrogen()),
            ]);
        }
    }
}

/// One row per living tree.
pub struct TreeOutput;

impl Output for TreeOutput {
    fn name(&self) -> &'static str {
        "tree"
    }

    fn columns(&self) -> &'static [&'static str] {
        &["year", "ru", "id", "species", "dbh", "height", "age", "lri", "stress"]
    }

    fn exec(&mut self, ctx: &OutputContext<'_>, sink: &mut dyn FnMut(Vec<Value>)) {
        for ru in ctx.resource_units {
            let set = &ctx.species_sets[ru.species_set_index()];
            for tree in ru.trees() {
                if tree.is_dead() {
                    continue;
                }
                sink(vec![
                    Value::Int(ctx.year as i64),
                    Value::Int(ru.index() as i64),
                    Value::Int(tree.id as i64),
                    Value::Str(set.species(tree.species).id().to_string()),
                    Value::Double(tree.dbh),
                    Value::Double(tree.height),
                    Value::Int(tree.age as i64),
                    Value::Double(tree.lri),
                    Value::Double(tree.stress_index),
                ]);
            }
        }
    }
}

/// Water cycle summary per resource unit.
pub struct WaterOutput;

impl Output for WaterOutput {
    fn name(&self) -> &'static str {
        "water"
    }

    fn columns(&self) -> &'static [&'static str] {
        &["year", "ru", "precipitation", "et", "runoff", "max_snow_depth", "growing_season_water"]
    }

    fn exec(&mut self, ctx: &OutputContext<'_>, sink: &mut dyn FnMut(Vec<Value>)) {
        for ru in ctx.resource_units {
            if !ru.is_stockable() {
                continue;
            }
            let data = ru.water().data();
            sink(vec![
                Value::Int(ctx.year as i64),
                Value::Int(ru.index() as i64),
                Value::Double(data.annual_precipitation_mm),
                Value::Double(data.annual_evapotranspiration_mm),
                Value::Double(data.annual_runoff_mm),
                Value::Double(data.max_snow_depth_m),
                Value::Double(data.growing_season_water),
            ]);
        }
    }
}
