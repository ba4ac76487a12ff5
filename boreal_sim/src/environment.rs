// Per-resource-unit environment: site parameters, climate and species
// selection.
//
// The environment table is a CSV file with a header row. In *matrix* mode
// the columns `x` and `y` (integer 1-ha indices) address resource units
// directly; in *grid* mode an `id` column is matched against an integer
// raster covering the landscape. Every other column whose name equals a
// settings key overrides that key for the unit at the row's position; the
// special columns `model.species.source` and `model.climate.tableName`
// select which of the shared species sets / climates the unit uses.
//
// `position()` resolves a metric position to the effective configuration:
// a copy of the base config with the row's overrides applied, plus the
// selected climate and species-set names.

use rustc_hash::FxHashMap;

use crate::config::ProjectConfig;
use crate::error::SimError;
use crate::grid::Grid;

pub const SPECIES_KEY: &str = "model.species.source";
pub const CLIMATE_KEY: &str = "model.climate.tableName";

/// A minimal CSV table: header plus string rows. Separators: comma,
/// semicolon or tab (decided by the header line).
#[derive(Clone, Debug)]
pub struct CsvTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl CsvTable {
    pub fn parse(text: &str) -> Result<Self, SimError> {
        let mut lines = text.lines().filter(|l| !l.trim().is_empty());
        let header = lines
            .next()
            .ok_or_else(|| SimError::Config("environment table: empty input".into()))?;
        let sep = if header.contains(';') {
            ';'
        } else if header.contains('\t') {
            '\t'
        } else {
            ','
        };
        let columns: Vec<String> = header.split(sep).map(|c| c.trim().to_string()).collect();
        let mut rows = Vec::new();
        for (number, line) in lines.enumerate() {
            let row: Vec<String> = line.split(sep).map(|c| c.trim().to_string()).collect();
            if row.len() != columns.len() {
                return Err(SimError::Config(format!(
                    "environment table: row {} has {} columns, header has {}",
                    number + 2,
                    row.len(),
                    columns.len()
                )));
            }
            rows.push(row);
        }
        Ok(Self { columns, rows })
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

/// The resolved environment of one resource unit.
#[derive(Clone, Debug)]
pub struct ResolvedEnvironment {
    pub config: ProjectConfig,
    pub climate_name: Option<String>,
    pub species_set_name: Option<String>,
}

/// Maps a resource-unit position to its site configuration.
#[derive(Debug, Default)]
pub struct Environment {
    table: Option<CsvTable>,
    /// "x_y" (matrix mode) or "id" (grid mode) -> row index.
    row_by_key: FxHashMap<String, usize>,
    /// Integer raster for grid mode.
    grid: Option<Grid<i32>>,
    grid_mode: bool,
}

impl Environment {
    /// An environment that always answers with the base configuration.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.table.is_some()
    }

    /// Load the table in matrix mode (`x`/`y` columns).
    pub fn from_matrix_csv(text: &str) -> Result<Self, SimError> {
        let table = CsvTable::parse(text)?;
        let ix = table
            .column_index("x")
            .ok_or_else(|| SimError::Config("environment (matrix mode): no 'x' column".into()))?;
        let iy = table
            .column_index("y")
            .ok_or_else(|| SimError::Config("environment (matrix mode): no 'y' column".into()))?;
        let mut row_by_key = FxHashMap::default();
        for (row, values) in table.rows.iter().enumerate() {
            row_by_key.insert(format!("{}_{}", values[ix], values[iy]), row);
        }
        Ok(Self { table: Some(table), row_by_key, grid: None, grid_mode: false })
    }

    /// Load the table in grid mode (`id` column plus an id raster).
    pub fn from_grid_csv(text: &str, grid: Grid<i32>) -> Result<Self, SimError> {
        let table = CsvTable::parse(text)?;
        let id_col = table
            .column_index("id")
            .ok_or_else(|| SimError::Config("environment (grid mode): no 'id' column".into()))?;
        let mut row_by_key = FxHashMap::default();
        for (row, values) in table.rows.iter().enumerate() {
            row_by_key.insert(values[id_col].clone(), row);
        }
        Ok(Self { table: Some(table), row_by_key, grid: Some(grid), grid_mode: true })
    }

    /// All distinct values of a column (used to pre-create climates and
    /// species sets).
    pub fn distinct_values(&self, column: &str) -> Vec<String> {
        let Some(table) = &self.table else { return Vec::new() };
        let Some(idx) = table.column_index(column) else { return Vec::new() };
        let mut seen = Vec::new();
        for row in &table.rows {
            if !seen.contains(&row[idx]) {
                seen.push(row[idx].clone());
            }
        }
        seen
    }

    /// Resolve the environment at a metric position (the center of a
    /// resource unit). Applies the row's overrides onto a copy of `base`.
    pub fn position(
        &self,
        base: &ProjectConfig,
        x: f64,
        y: f64,
    ) -> Result<ResolvedEnvironment, SimError> {
        let mut resolved = ResolvedEnvironment {
            config: base.clone(),
            climate_name: None,
            species_set_name: None,
        };
        let Some(table) = &self.table else {
            return Ok(resolved);
        };

        let key = if self.grid_mode {
            let grid = self
                .grid
                .as_ref()
                .ok_or_else(|| SimError::Config("environment: grid mode without raster".into()))?;
            let (ix, iy) = grid.index_at(x, y);
            let id = grid
                .get(ix, iy)
                .copied()
                .ok_or_else(|| SimError::Config(format!("environment: position {x}/{y} outside the id raster")))?;
            if id == -1 {
                return Ok(resolved);
            }
            id.to_string()
        } else {
            format!("{}_{}", (x / 100.0) as i64, (y / 100.0) as i64)
        };

        let row = *self.row_by_key.get(&key).ok_or_else(|| {
            SimError::Config(format!(
                "environment: no row for position {x}/{y} (key '{key}')"
            ))
        })?;

        for (col, name) in table.columns.iter().enumerate() {
            if name == "x" || name == "y" || name == "id" {
                continue;
            }
            let value = &table.rows[row][col];
            match name.as_str() {
                SPECIES_KEY => resolved.species_set_name = Some(value.clone()),
                CLIMATE_KEY => resolved.climate_name = Some(value.clone()),
                _ => {
                    if !resolved.config.apply_key(name, value)? {
                        return Err(SimError::Config(format!(
                            "environment: column '{name}' is not an overridable settings key"
                        )));
                    }
                }
            }
        }
        resolved.config.validate()?;
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Rect;

    #[test]
    fn csv_parses_and_checks_shape() {
        let t = CsvTable::parse("a,b,c\n1,2,3\n4,5,6\n").unwrap();
        assert_eq!(t.columns, vec!["a", "b", "c"]);
        assert_eq!(t.rows.len(), 2);
        assert!(CsvTable::parse("a,b\n1,2,3\n").is_err());
        assert!(CsvTable::parse("").is_err());
    }

    #[test]
    fn matrix_mode_overrides_site_keys() {
        let env = Environment::from_matrix_csv(
            "x,y,model.site.pctSand,model.climate.tableName\n0,0,80,clim_a\n1,0,20,clim_b\n",
        )
        .unwrap();
        let base = ProjectConfig::default();
        let a = env.position(&base, 50.0, 50.0).unwrap();
        assert_eq!(a.config.model.site.pct_sand, 80.0);
        assert_eq!(a.climate_name.as_deref(), Some("clim_a"));
        let b = env.position(&base, 150.0, 50.0).unwrap();
        assert_eq!(b.config.model.site.pct_sand, 20.0);
        assert_eq!(b.climate_name.as_deref(), Some("clim_b"));
        // unknown position errors
        assert!(env.position(&base, 950.0, 50.0).is_err());
    }

    #[test]
    fn matrix_mode_requires_coordinates() {
        assert!(Environment::from_matrix_csv("id,model.site.pctSand\n1,40\n").is_err());
    }

    #[test]
    fn grid_mode_maps_ids_to_rows() {
        let mut grid = Grid::from_rect_fn(Rect::from_size(0.0, 0.0, 200.0, 100.0), 100.0, || -1);
        *grid.at_mut(0, 0) = 7;
        *grid.at_mut(1, 0) = 9;
        let env = Environment::from_grid_csv(
            "id,model.site.pctClay\n7,33\n9,11\n",
            grid,
        )
        .unwrap();
        let base = ProjectConfig::default();
        let a = env.position(&base, 50.0, 50.0).unwrap();
        assert_eq!(a.config.model.site.pct_clay, 33.0);
        let b = env.position(&base, 150.0, 50.0).unwrap();
        assert_eq!(b.config.model.site.pct_clay, 11.0);
    }

    #[test]
    fn invalid_override_values_fail_validation() {
        let env = Environment::from_matrix_csv("x,y,model.site.somDecompRate\n0,0,-5\n").unwrap();
        let base = ProjectConfig::default();
        assert!(env.position(&base, 50.0, 50.0).is_err());
    }

    #[test]
    fn distinct_values_deduplicate() {
        let env = Environment::from_matrix_csv(
            "x,y,model.climate.tableName\n0,0,a\n1,0,b\n2,0,a\n",
        )
        .unwrap();
        assert_eq!(env.distinct_values(CLIMATE_KEY), vec!["a", "b"]);
    }
}
