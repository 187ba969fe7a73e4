use super::{ArgKind, CommandArgs, EngineCommand};
use chrono::Local;
use std::path::{Path, PathBuf};
use tracing::debug;

const OUTPUT_FLAG: &str = "output";

/// Best-effort copies of engine inputs and outputs for offline debugging
///
/// Files land in the mirror directory as `<command>_<flag>_<timestamp>.json`;
/// raw stdout uses `stdout` in place of the flag.
/// Nothing here may fail an engine call.
#[derive(Debug, Clone)]
pub struct DiagnosticsMirror {
    dir: PathBuf,
}

impl DiagnosticsMirror {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Copy every path argument that names an existing input file.
    ///
    /// The `--output` file of a command that writes one is still empty here;
    /// `capture_written_output` copies it once the engine has finished.
    pub fn capture_inputs(&self, command: EngineCommand, args: &CommandArgs) {
        let stamp = timestamp();

        for (flag, value) in args.values() {
            let is_path = command
                .spec(flag)
                .map(|s| s.kind == ArgKind::Path)
                .unwrap_or(false);
            if !is_path || (command.writes_output_file() && flag == OUTPUT_FLAG) {
                continue;
            }
            self.copy(command, flag, Path::new(value), &stamp);
        }
    }

    /// Copy the file the engine wrote to `--output`.
    pub fn capture_written_output(&self, command: EngineCommand, args: &CommandArgs) {
        if !command.writes_output_file() {
            return;
        }
        if let Some(path) = args.get(OUTPUT_FLAG) {
            self.copy(command, OUTPUT_FLAG, Path::new(path), &timestamp());
        }
    }

    /// Write the raw engine stdout.
    pub fn capture_stdout(&self, command: EngineCommand, raw: &str) {
        let target = self.target(command, "stdout", &timestamp());
        if let Err(e) = self.ensure_dir().and_then(|_| std::fs::write(&target, raw)) {
            debug!("Skipping diagnostics copy of engine stdout: {}", e);
        }
    }

    fn copy(&self, command: EngineCommand, flag: &str, source: &Path, stamp: &str) {
        if !source.is_file() {
            return;
        }
        let target = self.target(command, flag, stamp);
        if let Err(e) = self.ensure_dir().and_then(|_| std::fs::copy(source, &target)) {
            debug!("Skipping diagnostics copy of --{}: {}", flag, e);
        }
    }

    fn ensure_dir(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)
    }

    fn target(&self, command: EngineCommand, flag: &str, stamp: &str) -> PathBuf {
        let name = format!(
            "{}_{}_{}.json",
            command.words().join("_"),
            flag.replace('-', "_"),
            stamp
        );
        self.dir.join(name)
    }
}

fn timestamp() -> String {
    Local::now().format("%Y%m%d_%H%M%S_%3f").to_string()
}
