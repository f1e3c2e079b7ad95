//! Local Studio connector.
//!
//! Every operation launches the Studio batch script once. Payloads are exchanged through
//! temporary directories that are removed when the operation returns.

use std::fmt;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::config::{JobOptions, StudioConfig};
use crate::error::{ConnectorError, ConnectorResult};
use crate::lifecycle::{self, JobBackend, JobRun, ProcessDefinition};
use crate::observability::ConnectorLogger;
use crate::resource::Resource;
use crate::serialization::{
    METADATA_EXTENSION, Payload, TABULAR_EXTENSION, deserialize_from_file, serialize_to_file,
};

use super::launcher::{self, LaunchSpec};
use super::{Connector, check_output_count};

const OUTPUT_DIR_PREFIX: &str = "rapidminer-scripting-output-";
const INPUT_DIR_PREFIX: &str = "rapidminer-scripting-inputs-";

/// Connector to a locally installed Studio, driven in batch mode.
pub struct Studio {
    config: StudioConfig,
    home: PathBuf,
    logger: ConnectorLogger,
}

impl fmt::Debug for Studio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Studio")
            .field("name", &self.logger.name())
            .field("home", &self.home)
            .field("config", &self.config)
            .finish()
    }
}

/// A temporary directory owned by a process run.
#[derive(Debug)]
pub struct StagingDir(TempDir);

impl StagingDir {
    fn create(prefix: &str) -> ConnectorResult<Self> {
        Ok(Self(tempfile::Builder::new().prefix(prefix).tempdir()?))
    }

    pub fn path(&self) -> &Path {
        self.0.path()
    }
}

impl fmt::Display for StagingDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.path().display())
    }
}

impl Studio {
    /// Create a connector. Nothing is launched until the first operation.
    pub fn new(config: StudioConfig) -> Self {
        let home = config.resolve_home();
        let logger = ConnectorLogger::new("Studio", &config.log);
        Self { config, home, logger }
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Path of the batch script for this platform.
    pub fn script_path(&self) -> PathBuf {
        let script = if cfg!(windows) {
            "rapidminer-batch.bat"
        } else {
            "rapidminer-batch.sh"
        };
        self.home.join("scripts").join(script)
    }

    fn run_launcher(&self, mut spec: LaunchSpec) -> ConnectorResult<()> {
        spec.credential = self.config.password.clone();
        let temp_dir = if spec.needs_temp_dir() {
            Some(StagingDir::create(OUTPUT_DIR_PREFIX)?)
        } else {
            None
        };
        spec.temp_dir = temp_dir.as_ref().map(|d| d.path().to_path_buf());

        let args = launcher::build_arguments(&self.config.launcher_class, &spec);
        let launch = launcher::launch(&self.script_path(), &args, &self.logger)?;
        launch.check()
    }
}

/// The file a single-resource read produced: the only `.csv` in `dir`, otherwise the first file.
fn single_result(dir: &Path) -> ConnectorResult<PathBuf> {
    let csv_files = list_files(dir, &format!("*.{TABULAR_EXTENSION}"))?;
    if let [only] = csv_files.as_slice() {
        return Ok(only.clone());
    }
    list_files(dir, "*")?.into_iter().next().ok_or_else(|| {
        ConnectorError::deserialization(format!("no result was written to '{}'", dir.display()))
    })
}

/// Every `*.*` file in `dir` except metadata companions, sorted by name.
fn process_results(dir: &Path) -> ConnectorResult<Vec<PathBuf>> {
    Ok(list_files(dir, "*.*")?
        .into_iter()
        .filter(|p| p.extension().and_then(|e| e.to_str()) != Some(METADATA_EXTENSION))
        .collect())
}

fn list_files(dir: &Path, pattern: &str) -> ConnectorResult<Vec<PathBuf>> {
    let dir = dir.to_str().ok_or_else(|| {
        ConnectorError::configuration(format!("non UTF-8 directory '{}'", dir.display()))
    })?;
    let full = format!("{}/{pattern}", glob::Pattern::escape(dir));
    let paths = glob::glob(&full).map_err(|e| ConnectorError::configuration(e.to_string()))?;
    let mut files = Vec::new();
    for entry in paths {
        let path = entry.map_err(|e| ConnectorError::Io(e.into()))?;
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

impl Connector for Studio {
    fn read_resource(&self, inputs: &[Resource]) -> ConnectorResult<Vec<Payload>> {
        let output_dirs = inputs
            .iter()
            .map(|_| StagingDir::create(OUTPUT_DIR_PREFIX))
            .collect::<ConnectorResult<Vec<_>>>()?;

        self.run_launcher(LaunchSpec {
            inputs: inputs.to_vec(),
            outputs: output_dirs.iter().map(|d| Resource::file(d.path())).collect(),
            ..Default::default()
        })?;

        output_dirs
            .iter()
            .map(|d| single_result(d.path()).and_then(deserialize_from_file))
            .collect()
    }

    fn write_resource(&self, payloads: &[Payload], outputs: &[Resource]) -> ConnectorResult<()> {
        check_output_count(payloads, outputs)?;
        let mut input_dirs = Vec::with_capacity(payloads.len());
        let mut input_files = Vec::with_capacity(payloads.len());
        for payload in payloads {
            let dir = StagingDir::create(INPUT_DIR_PREFIX)?;
            let file = serialize_to_file(payload, dir.path().join("input0"))?;
            input_files.push(Resource::file(file));
            input_dirs.push(dir);
        }

        self.run_launcher(LaunchSpec {
            inputs: input_files,
            outputs: outputs.to_vec(),
            ..Default::default()
        })
    }

    fn run_process(
        &self,
        path: &str,
        inputs: &[Payload],
        options: &JobOptions,
    ) -> ConnectorResult<Vec<Payload>> {
        lifecycle::run_job(self, path, inputs, options)
    }
}

impl JobBackend for Studio {
    type Transient = StagingDir;
    type Handle = ();

    fn logger(&self) -> &ConnectorLogger {
        &self.logger
    }

    fn prepare(&self, process_path: &str) -> ConnectorResult<ProcessDefinition> {
        Ok(ProcessDefinition::new(process_path))
    }

    fn stage_inputs(
        &self,
        payloads: &[Payload],
        run: &mut JobRun<StagingDir>,
    ) -> ConnectorResult<()> {
        if payloads.is_empty() {
            return Ok(());
        }
        let dir = StagingDir::create(INPUT_DIR_PREFIX)?;
        let base = dir.path().to_path_buf();
        run.own(dir);
        for (idx, payload) in payloads.iter().enumerate() {
            let file = serialize_to_file(payload, base.join(format!("input{idx}")))?;
            run.inputs.push(Resource::file(file));
        }
        Ok(())
    }

    fn allocate_outputs(&self, run: &mut JobRun<StagingDir>) -> ConnectorResult<()> {
        let dir = StagingDir::create(OUTPUT_DIR_PREFIX)?;
        run.outputs.push(Resource::file(dir.path()));
        run.own(dir);
        Ok(())
    }

    fn submit(&self, run: &mut JobRun<StagingDir>, options: &JobOptions) -> ConnectorResult<()> {
        self.run_launcher(LaunchSpec {
            process: Some(run.process.path.clone()),
            inputs: run.inputs.clone(),
            output_dir: Some(output_dir(run)?.to_path_buf()),
            operator: options.operator.clone(),
            macros: options.macros.clone(),
            ..Default::default()
        })
    }

    fn await_completion(&self, _handle: &(), _options: &JobOptions) -> ConnectorResult<()> {
        Ok(())
    }

    fn collect_outputs(&self, run: &JobRun<StagingDir>) -> ConnectorResult<Vec<Payload>> {
        process_results(output_dir(run)?)?
            .into_iter()
            .map(deserialize_from_file)
            .collect()
    }

    fn release(&self, transient: StagingDir) -> ConnectorResult<()> {
        Ok(transient.0.close()?)
    }
}

fn output_dir(run: &JobRun<StagingDir>) -> ConnectorResult<&Path> {
    match run.outputs.first() {
        Some(Resource::File(dir)) => Ok(dir.as_path()),
        _ => Err(ConnectorError::configuration("no output directory was allocated")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_lives_under_home() {
        let studio = Studio::new(StudioConfig {
            studio_home: Some(PathBuf::from("/opt/studio")),
            ..Default::default()
        });
        let script = studio.script_path();
        assert!(script.starts_with("/opt/studio/scripts"));
        assert!(script.to_string_lossy().contains("rapidminer-batch"));
    }

    #[test]
    fn picks_the_single_csv_or_the_first_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.fo"), b"x").unwrap();
        std::fs::write(dir.path().join("z.csv"), b"a\n1\n").unwrap();
        std::fs::write(dir.path().join("z.pmd"), b"{}").unwrap();
        assert_eq!(single_result(dir.path()).unwrap(), dir.path().join("z.csv"));

        std::fs::write(dir.path().join("y.csv"), b"a\n1\n").unwrap();
        assert_eq!(single_result(dir.path()).unwrap(), dir.path().join("b.fo"));
    }

    #[test]
    fn process_results_skip_metadata() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["out1.csv", "out1.pmd", "out0.bin", "README"] {
            std::fs::write(dir.path().join(name), b"{}").unwrap();
        }
        let names: Vec<_> = process_results(dir.path())
            .unwrap()
            .into_iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["out0.bin", "out1.csv"]);
    }

    #[test]
    fn list_files_escapes_the_directory_and_skips_subdirectories() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("run [1]");
        std::fs::create_dir_all(dir.join("nested.d")).unwrap();
        std::fs::write(dir.join("b.csv"), b"a\n").unwrap();
        std::fs::write(dir.join("a.fo"), b"x").unwrap();

        let files = list_files(&dir, "*.*").unwrap();
        assert_eq!(files, vec![dir.join("a.fo"), dir.join("b.csv")]);
        assert!(list_files(&root.path().join("absent"), "*.*").unwrap().is_empty());
    }
}
