use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

/// Engine errors surfaced synchronously to callers of `load()` / `start_run()`.
///
/// Per-request transport failures are not represented here: they become
/// `RequestOutcome` data (see `ErrorKind`) and never abort a run.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The schema document could not be retrieved.
    #[error("failed to fetch schema document: {0}")]
    SchemaFetch(#[from] reqwest::Error),

    /// The schema document is structurally invalid.
    #[error("malformed schema document: {0}")]
    SchemaFormat(String),

    /// A schema node has no recognized `type` and no `enum`.
    #[error("unsupported schema node: {0}")]
    UnsupportedSchema(String),

    /// Schema nesting exceeds the synthesis depth ceiling.
    #[error("schema nesting exceeds {0} levels")]
    SchemaTooDeep(usize),

    /// Invalid run configuration, raised before a run ever starts.
    #[error("invalid run configuration: {0}")]
    RunConfig(String),
}
