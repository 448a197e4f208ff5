//! Core library for the k6forge build service.
//!
//! k6forge builds custom k6 binaries with a caller-selected set of
//! extensions. A client submits a target platform, a k6 version constraint
//! and a list of extension constraints; the service resolves the constraints
//! against a catalog, builds the binary if no content-identical artifact
//! exists yet, stores it in an object store and returns the artifact
//! metadata (id, download URL, resolved versions, checksum).
//!
//! # Architecture
//!
//! The crate is organised around a small set of capability traits with
//! swappable implementations:
//!
//! - [`catalog::Catalog`]: maps dependency names to modules and the versions
//!   available for them.
//! - [`store::ObjectStore`]: content-addressed binary storage with
//!   deduplication ([`store::MemoryObjectStore`], [`store::FileObjectStore`],
//!   [`store::BlobObjectStore`], [`store::HttpObjectStore`]).
//! - [`blob::BlobStore`]: conditional blob primitives (create-if-absent,
//!   put-if-match, delete-if-match) used by the distributed lock and the
//!   blob-backed object store.
//! - [`lock::Lock`]: mutual exclusion per artifact id
//!   ([`lock::ProcessLock`] within a process, [`lock::LeaseLock`] across
//!   instances).
//! - [`foundry::Foundry`]: the compiler back end, treated as opaque.
//! - [`service::BuildService`]: the public operations `resolve` and `build`,
//!   implemented locally by [`service::LocalBuildService`] and remotely by
//!   [`service::BuildClient`].
//!
//! # Concurrency model
//!
//! At most one build per artifact id runs at a time: a per-process mutex
//! registry eliminates redundant builds within an instance and a lease lock
//! over shared blob storage covers the cross-instance case. Both locks are
//! advisory; the object store's duplicate-object semantics are the final
//! correctness backstop, so a rare double build converges on the same
//! content-identical artifact.

pub mod api;
pub mod blob;
pub mod catalog;
pub mod clock;
pub mod constraint;
pub mod download;
pub mod foundry;
pub mod lock;
pub mod platform;
pub mod resolver;
pub mod service;
pub mod store;

pub use api::{BuildRequest, BuildResponse, ResolveRequest, ResolveResponse, WireError};
pub use catalog::{Catalog, CatalogEntry};
pub use constraint::Constraint;
pub use platform::Platform;
pub use resolver::ResolvedDependency;
pub use service::{Artifact, BuildError, BuildService, Dependency};
pub use store::{Object, ObjectStore};

/// Default name of the base runner dependency.
pub const DEFAULT_BASE_RUNNER: &str = "k6";
