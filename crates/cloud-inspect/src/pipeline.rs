//! End-to-end inspection pipeline.
//!
//! A run walks every subfolder of a root directory: the external generator
//! (when configured) populates the matching output subfolder with raw `.ply`
//! clouds, and each cloud is then processed as an independent parallel task.
//! One input file yields three artifacts next to it: the colorized cloud, a
//! filtered mesh of the original points, and a filtered mesh of the reloaded
//! colorized cloud.
//!
//! Failure isolation is per boundary: a broken generator skips its subfolder,
//! a broken file fails its own task, and the run always completes with a
//! summary of what went wrong.

use std::path::{Path, PathBuf};
use std::sync::mpsc;

use tracing::{error, info, warn};

use crate::batch::{BatchEngine, TaskOutcome};
use crate::classify;
use crate::curvature;
use crate::density;
use crate::error::{CloudError, CloudResult};
use crate::generator::GeneratorCommand;
use crate::io;
use crate::reconstruct::{self, ReconstructionParams};
use crate::spatial::SpatialIndex;
use crate::tracing_ext::OperationTimer;
use crate::types::ProcessingParams;

/// Output paths produced for one input file.
#[derive(Debug, Clone)]
pub struct FileArtifacts {
    pub colored_cloud: PathBuf,
    pub original_mesh: PathBuf,
    pub colored_mesh: PathBuf,
}

/// What happened over a whole run.
#[derive(Debug, Default)]
pub struct RunSummary {
    /// Subfolders visited.
    pub subfolders: usize,

    /// Subfolders whose generator (or output directory) failed, with the
    /// rendered error. Their files were never discovered.
    pub generator_failures: Vec<(PathBuf, String)>,

    /// Files fully processed.
    pub files_succeeded: usize,

    /// Per-file task failures.
    pub file_failures: Vec<TaskOutcome>,
}

impl RunSummary {
    /// Total files submitted for processing.
    pub fn files_total(&self) -> usize {
        self.files_succeeded + self.file_failures.len()
    }

    /// True when nothing failed anywhere.
    pub fn is_clean(&self) -> bool {
        self.generator_failures.is_empty() && self.file_failures.is_empty()
    }
}

/// The configured pipeline.
pub struct CloudPipeline {
    params: ProcessingParams,
    reconstruction: ReconstructionParams,
    generator: Option<GeneratorCommand>,
    engine: BatchEngine,
}

impl CloudPipeline {
    /// Assemble a pipeline. A `None` generator means the input subfolders
    /// already contain `.ply` clouds.
    pub fn new(
        params: ProcessingParams,
        reconstruction: ReconstructionParams,
        generator: Option<GeneratorCommand>,
        engine: BatchEngine,
    ) -> Self {
        Self {
            params,
            reconstruction,
            generator,
            engine,
        }
    }

    /// Process every subfolder under `root`, mirroring the layout into
    /// `output_root`.
    ///
    /// Generators run sequentially per subfolder while discovered files are
    /// processed concurrently, so early subfolders' clouds overlap with later
    /// subfolders' generation.
    pub fn run(&self, root: &Path, output_root: &Path) -> CloudResult<RunSummary> {
        std::fs::create_dir_all(output_root).map_err(|e| CloudError::io_write(output_root, e))?;

        let mut subfolders: Vec<PathBuf> = std::fs::read_dir(root)
            .map_err(|e| CloudError::io_read(root, e))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_dir())
            .collect();
        subfolders.sort();

        let mut summary = RunSummary {
            subfolders: subfolders.len(),
            ..Default::default()
        };

        let (tx, rx) = mpsc::channel();

        for subdir in &subfolders {
            info!(subfolder = %subdir.display(), "processing subfolder");

            if let Err(e) = self.prepare_subfolder(subdir, output_root, &tx) {
                error!(
                    subfolder = %subdir.display(),
                    error = %e,
                    "subfolder skipped"
                );
                summary
                    .generator_failures
                    .push((subdir.clone(), format!("[{}] {}", e.code(), e)));
            }
        }

        drop(tx);

        for outcome in rx {
            match &outcome.result {
                Ok(()) => summary.files_succeeded += 1,
                Err(details) => {
                    error!(file = %outcome.path.display(), error = %details, "file failed");
                    summary.file_failures.push(outcome);
                }
            }
        }

        info!(
            subfolders = summary.subfolders,
            files = summary.files_total(),
            succeeded = summary.files_succeeded,
            failed = summary.file_failures.len(),
            generator_failures = summary.generator_failures.len(),
            "run complete"
        );

        Ok(summary)
    }

    /// Run the generator for one subfolder and submit its `.ply` files.
    fn prepare_subfolder(
        &self,
        subdir: &Path,
        output_root: &Path,
        outcomes: &mpsc::Sender<TaskOutcome>,
    ) -> CloudResult<()> {
        let name = subdir.file_name().unwrap_or(subdir.as_os_str());
        let output_subfolder = output_root.join(name);
        std::fs::create_dir_all(&output_subfolder)
            .map_err(|e| CloudError::io_write(&output_subfolder, e))?;

        // The generator drops raw clouds into the output subfolder; without
        // one the input subfolder is expected to hold them already.
        let discovery_dir = if let Some(generator) = &self.generator {
            generator.run(subdir, &output_subfolder)?;
            output_subfolder.clone()
        } else {
            subdir.to_path_buf()
        };

        let mut submitted = 0usize;
        for entry in
            std::fs::read_dir(&discovery_dir).map_err(|e| CloudError::io_read(&discovery_dir, e))?
        {
            let path = match entry {
                Ok(e) => e.path(),
                Err(_) => continue,
            };
            if !is_raw_cloud(&path) {
                continue;
            }

            let params = self.params;
            let reconstruction = self.reconstruction;
            let output_dir = output_subfolder.clone();
            let task_path = path.clone();
            self.engine.submit(path, outcomes.clone(), move || {
                process_file(&task_path, &output_dir, params, reconstruction).map(|_| ())
            });
            submitted += 1;
        }

        if submitted == 0 {
            warn!(subfolder = %discovery_dir.display(), "no .ply files to process");
        }

        Ok(())
    }
}

/// Only plain `.ply` inputs are processed; previously produced artifacts are
/// skipped so reruns do not feed on their own output.
fn is_raw_cloud(path: &Path) -> bool {
    if !path.is_file() {
        return false;
    }
    let has_ply_ext = path
        .extension()
        .map(|e| e.to_string_lossy().eq_ignore_ascii_case("ply"))
        .unwrap_or(false);
    if !has_ply_ext {
        return false;
    }

    let stem = file_stem(path);
    !stem.ends_with("_colored") && !stem.ends_with("_filtered_mesh")
}

/// Process a single cloud file into its three artifacts.
pub fn process_file(
    ply_path: &Path,
    output_dir: &Path,
    params: ProcessingParams,
    reconstruction: ReconstructionParams,
) -> CloudResult<FileArtifacts> {
    info!(file = %ply_path.display(), "processing cloud");

    let cloud = io::load_cloud_ply(ply_path)?;
    info!(points = cloud.len(), "cloud loaded");
    let _timer = OperationTimer::with_points("process_file", cloud.len());

    let index = SpatialIndex::build(&cloud);
    let cloud = curvature::with_curvature(cloud, &index, &params);
    let cloud = classify::classify(cloud, &index, &params);

    let stem = file_stem(ply_path);
    let colored_cloud = output_dir.join(colored_cloud_name(&stem));
    io::write_colored_cloud(&cloud, &colored_cloud)?;

    // Mesh of the original points, filtered against them.
    let mesh = reconstruct::reconstruct_surface(&cloud, &reconstruction)?;
    let mesh = density::filter_by_density(mesh, &index, &params);
    let original_mesh = output_dir.join(filtered_mesh_name(&stem, false));
    io::write_mesh_ply(&mesh, &original_mesh)?;

    // Mesh of the colorized artifact, reloaded so it sees exactly what was
    // written, filtered against its own points.
    let colorized = io::load_cloud_ply(&colored_cloud)?;
    let colorized_index = SpatialIndex::build(&colorized);
    let mesh = reconstruct::reconstruct_surface(&colorized, &reconstruction)?;
    let mesh = density::filter_by_density(mesh, &colorized_index, &params);
    let colored_mesh = output_dir.join(filtered_mesh_name(&file_stem(&colored_cloud), true));
    io::write_mesh_ply(&mesh, &colored_mesh)?;

    Ok(FileArtifacts {
        colored_cloud,
        original_mesh,
        colored_mesh,
    })
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn colored_cloud_name(stem: &str) -> String {
    format!("{stem}_colored.ply")
}

fn filtered_mesh_name(stem: &str, colored: bool) -> String {
    let suffix = if colored {
        "_colored_filtered_mesh.ply"
    } else {
        "_original_filtered_mesh.ply"
    };
    format!("{stem}{suffix}")
}
