//! Project-structure discovery
//!
//! Scans the output directory for files workers have produced so generated
//! instructions can reference real paths instead of guessed ones.

use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

/// Discovered layout of the project output directory
#[derive(Debug, Clone, Default)]
pub struct ProjectLayout {
    /// The output directory, when it exists and holds any source files
    pub project_root: Option<PathBuf>,
    pub main_files: Vec<String>,
    pub test_files: Vec<String>,
    pub package_dirs: Vec<String>,
}

impl ProjectLayout {
    /// Scan `base_dir` for produced files (bounded depth)
    pub fn discover(base_dir: &Path) -> Self {
        let mut layout = Self::default();

        if !base_dir.exists() {
            return layout;
        }

        for entry in WalkDir::new(base_dir).max_depth(3).into_iter().filter_map(Result::ok) {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy();

            if path.is_dir() && path.join("__init__.py").exists() {
                layout.package_dirs.push(path.display().to_string());
            } else if path.is_file() && name.ends_with(".py") {
                if name.starts_with("test_") || name.ends_with("_test.py") {
                    layout.test_files.push(path.display().to_string());
                } else if name != "__init__.py" {
                    layout.main_files.push(path.display().to_string());
                }
            }
        }

        if !layout.main_files.is_empty() || !layout.test_files.is_empty() {
            layout.project_root = Some(base_dir.to_path_buf());
        }

        debug!(
            main = layout.main_files.len(),
            tests = layout.test_files.len(),
            "discovered project layout"
        );

        layout
    }

    /// Recommended working directory for a worker
    pub fn working_directory(&self, base_dir: &Path) -> PathBuf {
        self.project_root.clone().unwrap_or_else(|| base_dir.to_path_buf())
    }

    /// Path-hint text for instruction prompts
    pub fn format_hints(&self, base_dir: &Path) -> String {
        let working_dir = self.working_directory(base_dir);

        let list = |files: &[String]| {
            if files.is_empty() {
                "none detected".to_string()
            } else {
                files.iter().take(5).cloned().collect::<Vec<_>>().join(", ")
            }
        };

        format!(
            "Path information:\n\
             - recommended working directory: {}\n\
             - project root: {}\n\
             - main files: {}\n\
             - test files: {}\n\
             Run tests from the working directory and use the project root for file operations.",
            working_dir.display(),
            self.project_root
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "not detected".to_string()),
            list(&self.main_files),
            list(&self.test_files),
        )
    }
}
