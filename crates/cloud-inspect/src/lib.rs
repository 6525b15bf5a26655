//! Curvature-based anomaly detection and density-filtered surface
//! reconstruction for scanned point clouds.
//!
//! The pipeline ingests `.ply` point clouds, estimates a surface-variation
//! curvature per point, flags anomalous regions in red, and reconstructs
//! density-filtered triangle meshes from both the original and the colorized
//! cloud. A batch orchestrator walks scan subfolders, invokes an external
//! raw-cloud generator per subfolder, and processes every discovered file on
//! a bounded worker pool with per-file failure isolation.
//!
//! # Quick Start
//!
//! ```no_run
//! use cloud_inspect::{
//!     BatchEngine, CloudPipeline, GeneratorCommand, ProcessingParams,
//!     ReconstructionParams,
//! };
//! use std::path::Path;
//!
//! let pipeline = CloudPipeline::new(
//!     ProcessingParams::default(),
//!     ReconstructionParams::default(),
//!     Some(GeneratorCommand::new("/opt/scanner/range-image-gen")),
//!     BatchEngine::with_default_workers().unwrap(),
//! );
//!
//! let summary = pipeline.run(Path::new("scans"), Path::new("out")).unwrap();
//! println!("{} files processed", summary.files_succeeded);
//! ```
//!
//! # Processing a single file
//!
//! ```no_run
//! use cloud_inspect::{pipeline, ProcessingParams, ReconstructionParams};
//! use std::path::Path;
//!
//! let artifacts = pipeline::process_file(
//!     Path::new("scan.ply"),
//!     Path::new("out"),
//!     ProcessingParams::default(),
//!     ReconstructionParams::default(),
//! ).unwrap();
//! println!("colorized cloud at {}", artifacts.colored_cloud.display());
//! ```

pub mod batch;
pub mod classify;
pub mod curvature;
pub mod density;
pub mod error;
pub mod generator;
pub mod io;
pub mod pipeline;
pub mod reconstruct;
pub mod spatial;
pub mod tracing_ext;
pub mod types;

pub use batch::{default_worker_count, BatchEngine, TaskOutcome};
pub use error::{CloudError, CloudResult, ErrorCode};
pub use generator::{GeneratorCommand, DEFAULT_GENERATOR_TIMEOUT};
pub use pipeline::{CloudPipeline, FileArtifacts, RunSummary};
pub use reconstruct::ReconstructionParams;
pub use spatial::SpatialIndex;
pub use types::{CloudPoint, Mesh, PointCloud, PointColor, ProcessingParams, Vertex};
