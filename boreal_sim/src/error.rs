// Error types for the simulator.
//
// Setup paths (configuration, site parameterization, soil/permafrost
// initialization) return `Result<_, SimError>` and abort the run. Inside a
// simulation phase the policy differs: per-tree arithmetic anomalies are
// trapped locally (the tree is flagged, the worker continues) and only
// structural failures unwind to the phase barrier, where the driver stores
// them and enters the paused-with-error state.

use std::path::Path;

/// All error kinds the simulator core surfaces.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    /// Missing/invalid project key, malformed grid file, inconsistent
    /// environment table.
    #[error("configuration error: {0}")]
    Config(String),

    /// A per-resource-unit site parameter is outside its allowed range.
    #[error("invalid site parameter: {0}")]
    InvalidSite(String),

    /// Tree dimensions escaped the sanity range (dbh, height or foliage).
    #[error("growth invariant violated for tree {id}: {message}")]
    GrowthInvariant { id: u32, message: String },

    /// Non-positive rate or mass in the soil pools, at setup or after
    /// integration.
    #[error("soil error: {0}")]
    Soil(String),

    /// Zero conductivity or otherwise unusable permafrost parameters.
    #[error("permafrost parameter error: {0}")]
    Permafrost(String),

    /// Expression parse failure or unbound variable in strict mode.
    #[error(transparent)]
    Expression(#[from] boreal_expr::ExprError),

    #[error("error reading '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SimError {
    /// Attach a path to an I/O error.
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        SimError::Io { path: path.display().to_string(), source }
    }
}
