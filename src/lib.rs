// Peer Reconciliation - Core Library
// Multi-source peer field reconciliation + QC for comparable-company valuation

pub mod error;
pub mod fields;         // Field vocabulary, keys, units
pub mod peers;          // Peer entities + registry
pub mod records;        // Raw / normalized source records
pub mod normalizer;     // Alias mapping + unit scaling
pub mod selector;       // One canonical record per (source, entity, year)
pub mod config;         // Run configuration + QC thresholds
pub mod merge;          // Precedence walk, provenance
pub mod overrides;      // Manual overrides + explanations
pub mod metrics;        // Computed EV, multiples
pub mod qc;             // QC rules + peer-group statistics
pub mod report;         // Per-peer output + coverage summary
pub mod pipeline;       // One run end to end
pub mod io;             // CSV loaders
pub mod store;          // SQLite persistence of runs

// Re-export commonly used types
pub use error::{ConfigError, NormalizationError, ReconcileError};
pub use fields::{Field, FieldData, FieldKey, FieldKind, Unit};
pub use peers::{Peer, PeerRegistry, FLAG_CORE, FLAG_SELECTED, FLAG_SENSITIVITY};
pub use records::{NormalizedRecord, RawRecord, RawScalar, RawValue, SourceData};
pub use normalizer::{NormalizationTable, Normalizer};
pub use selector::{selection_order, DeterministicSelector, Selection, SelectionPolicy};
pub use config::{EvMode, QcConfig, RatioCheck, ReconciliationConfig, RequiredField};
pub use merge::{FieldStatus, FieldValue, MergeEngine, PeerFields, SourceRef};
pub use overrides::{apply_overrides, Explanation, Override, OverrideOutcome};
pub use metrics::{in_eur, metric_multiple, EvBasis, Multiple};
pub use qc::{Issue, QcEngine, QcRule, RuleContext, RuleKind, Severity};
pub use report::{
    CoverageGap, CoverageSummary, ReconciledPeerRecord, ReconciliationReport, SourceCoverage,
};
pub use pipeline::{Reconciler, RunInput};
pub use store::{load_issues_for_run, save_report, setup_database};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
