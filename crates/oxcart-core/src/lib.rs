#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::cargo,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions, clippy::multiple_crate_versions)]

//! Durable fan-out/fan-in orchestration engine for bulk directory archiving.
//!
//! One orchestration instance copies a directory tree to an object store:
//! the walker enumerates the work set, the dispatcher runs one transfer task
//! per file under a parallelism bound, the checkpoint log durably records
//! every terminal outcome so a restart resumes instead of re-copying, and the
//! catalog serves status queries to pollers.
//!
//! Layout: `model.rs` (domain types), `walker.rs` (tree enumeration),
//! `store.rs` (object store seam), `checkpoint.rs` (append-only durable log),
//! `dispatcher.rs` (bounded fan-out/fan-in), `aggregate.rs` (result folding),
//! `status.rs` (instance catalog), `engine.rs` (lifecycle driver).

pub mod aggregate;
pub mod checkpoint;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod model;
pub mod status;
pub mod store;
pub mod walker;

pub use aggregate::aggregate;
pub use checkpoint::{CheckpointLog, InstanceReplay, LoadedInstance};
pub use dispatcher::{CancelFlag, Dispatcher};
pub use engine::ArchiveEngine;
pub use error::{CoreError, CoreResult};
pub use model::{
    AggregateResult, ArchiveRequest, FileRecord, InstanceFilter, InstanceStatus,
    OrchestrationInstance, PlannedTask, TransferResult,
};
pub use status::InstanceCatalog;
pub use store::{ObjectStore, StoreError, StoreResult, UploadReceipt};
pub use walker::{SkippedSubtree, WalkOutcome, walk};
