//! Schema-driven load-generation and metrics engine.
//!
//! The engine ingests a machine-readable description of an HTTP API,
//! synthesizes realistic request payloads from it, drives configurable
//! concurrent traffic against the target under a chosen scheduling pattern
//! for a bounded duration, and aggregates per-request observations into
//! percentile and distribution statistics while the run is in flight.
//!
//! The main building blocks are:
//!
//! - [`SchemaCatalog`] / [`CatalogLoader`]: parse an API description
//!   document into a normalized endpoint list, cached by source URL.
//! - [`Synthesizer`] / [`RequestTemplates`]: type-directed synthesis of
//!   request values, with a per-endpoint template cache and per-request
//!   regeneration of fields marked dynamic.
//! - [`RunHandle`] and the scheduler behind it: the run lifecycle
//!   (`Idle → Running → Completed/Cancelled/Failed`), the 100ms tick loop,
//!   traffic patterns and cooperative draining cancellation.
//! - [`MetricsRecorder`] / [`RunSnapshot`]: concurrent-safe outcome
//!   aggregation with percentiles, exposable at any time during a run.
//! - [`TestSession`]: owns one session's catalog, template cache and run
//!   history; presentation layers only ever see immutable snapshots.

pub mod catalog;
pub mod error;
pub mod export;
pub mod metrics;
pub mod schema;
pub mod scheduler;
pub mod session;
pub mod synth;
pub mod types;

pub use catalog::{CatalogLoader, Endpoint, ParamLocation, Parameter, SchemaCatalog};
pub use error::{EngineError, EngineResult};
pub use export::{outcome_rows, OutcomeRow, RunExport};
pub use metrics::{EndpointMetrics, MetricsRecorder, RunSnapshot};
pub use schema::{NumericBounds, SchemaKind, SchemaNode, StringFormat};
pub use scheduler::RunHandle;
pub use session::{CompletedRun, TestSession};
pub use synth::{RequestTemplates, Synthesizer, MAX_DEPTH};
pub use types::{
    EndpointId, ErrorKind, GeneratedRequest, RequestOutcome, RunConfig, RunState, TrafficPattern,
};
