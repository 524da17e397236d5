//! Pre-flight validation of the local repository
//!
//! Runs before any node is contacted:
//! 1. the working tree is clean;
//! 2. there are no unpushed commits (interactive runs may push them);
//! 3. the configured source trees pass static syntax validation.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};

use sd_core::types::short_commit;
use sd_core::{PreflightError, ReleaseCandidate};

/// Directories never searched for sources
const SKIPPED_DIRS: &[&str] = &[".git", "__pycache__", ".venv", "venv", "node_modules", ".mypy_cache"];

/// Produces the release candidate or explains why there is none
pub trait Preflight: Send + Sync {
    fn check(&self, non_interactive: bool) -> Result<ReleaseCandidate, PreflightError>;
}

/// Static syntax validation of local sources
pub trait SyntaxChecker: Send + Sync {
    /// Files under `roots` that fail to parse
    fn check(&self, roots: &[PathBuf]) -> Result<Vec<String>>;
}

/// Byte-compiles `*.py` files with the local Python interpreter, writing nothing
pub struct PythonCompileChecker {
    interpreter: String,
}

impl Default for PythonCompileChecker {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
        }
    }
}

/// Compiles each argument in memory and prints the ones that fail
const COMPILE_SCRIPT: &str = "\
import sys
for path in sys.argv[1:]:
    try:
        with open(path, 'rb') as fh:
            compile(fh.read(), path, 'exec')
    except (SyntaxError, ValueError):
        print(path)
";

impl PythonCompileChecker {
    pub fn with_interpreter(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
        }
    }
}

impl SyntaxChecker for PythonCompileChecker {
    fn check(&self, roots: &[PathBuf]) -> Result<Vec<String>> {
        let mut files = Vec::new();
        for root in roots {
            collect_files(root, "py", &mut files)?;
        }
        if files.is_empty() {
            return Ok(Vec::new());
        }
        files.sort();

        let output = Command::new(&self.interpreter)
            .arg("-c")
            .arg(COMPILE_SCRIPT)
            .args(&files)
            .output()
            .with_context(|| format!("Failed to run {}", self.interpreter))?;
        if !output.status.success() {
            anyhow::bail!(
                "{} exited with {}: {}",
                self.interpreter,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(String::from)
            .collect())
    }
}

fn collect_files(dir: &Path, extension: &str, out: &mut Vec<PathBuf>) -> Result<()> {
    if !dir.exists() {
        tracing::debug!("Source dir {} does not exist, skipping", dir.display());
        return Ok(());
    }
    for entry in std::fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))? {
        let path = entry?.path();
        if path.is_dir() {
            let skip = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| SKIPPED_DIRS.contains(&n))
                .unwrap_or(false);
            if !skip {
                collect_files(&path, extension, out)?;
            }
        } else if path.extension().and_then(|e| e.to_str()) == Some(extension) {
            out.push(path);
        }
    }
    Ok(())
}

/// Asks the operator a yes/no question
pub type Confirm = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// Pre-flight against a local git checkout
pub struct GitPreflight {
    repo: PathBuf,
    branch: String,
    source_dirs: Vec<PathBuf>,
    checker: Box<dyn SyntaxChecker>,
    confirm: Confirm,
}

impl GitPreflight {
    pub fn new(repo: impl Into<PathBuf>, branch: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            branch: branch.into(),
            source_dirs: Vec::new(),
            checker: Box::new(PythonCompileChecker::default()),
            confirm: Box::new(|_| false),
        }
    }

    /// Source trees, relative to the repository
    pub fn with_source_dirs(mut self, dirs: &[String]) -> Self {
        self.source_dirs = dirs.iter().map(|d| self.repo.join(d)).collect();
        self
    }

    pub fn with_checker(mut self, checker: Box<dyn SyntaxChecker>) -> Self {
        self.checker = checker;
        self
    }

    pub fn with_confirm(mut self, confirm: Confirm) -> Self {
        self.confirm = confirm;
        self
    }

    fn git(&self, args: &[&str]) -> Result<String, PreflightError> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo)
            .output()
            .map_err(|e| PreflightError::Git(format!("cannot run git: {e}")))?;
        if !output.status.success() {
            return Err(PreflightError::Git(format!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
    }

    fn dirty_files(&self) -> Result<Vec<String>, PreflightError> {
        Ok(self
            .git(&["status", "--porcelain"])?
            .lines()
            .filter(|l| l.len() > 3)
            .map(|l| l[3..].to_string())
            .collect())
    }

    fn unpushed_count(&self) -> Result<usize, PreflightError> {
        let range = format!("origin/{}..HEAD", self.branch);
        let count = self.git(&["rev-list", "--count", &range])?;
        count
            .trim()
            .parse()
            .map_err(|_| PreflightError::Git(format!("unexpected rev-list output: {count}")))
    }

    fn push(&self) -> Result<(), PreflightError> {
        self.git(&["push", "origin", &self.branch])
            .map(|_| ())
            .map_err(|e| PreflightError::PushFailed(e.to_string()))
    }
}

impl Preflight for GitPreflight {
    fn check(&self, non_interactive: bool) -> Result<ReleaseCandidate, PreflightError> {
        let branch = self.git(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        if branch == "HEAD" {
            return Err(PreflightError::DetachedHead);
        }
        if branch != self.branch {
            return Err(PreflightError::WrongBranch {
                expected: self.branch.clone(),
                actual: branch,
            });
        }

        let dirty = self.dirty_files()?;
        if !dirty.is_empty() {
            return Err(PreflightError::DirtyTree(dirty));
        }
        tracing::info!("✓ Working tree clean");

        let unpushed = self.unpushed_count()?;
        if unpushed > 0 {
            if non_interactive {
                return Err(PreflightError::UnpushedCommits(unpushed));
            }
            let question = format!("{unpushed} unpushed commit(s) on {}. Push to origin now?", self.branch);
            if !(self.confirm)(&question) {
                return Err(PreflightError::UnpushedCommits(unpushed));
            }
            self.push()?;
            tracing::info!("Pushed {} commit(s) to origin/{}", unpushed, self.branch);
        }
        tracing::info!("✓ No unpushed commits");

        let failures = self
            .checker
            .check(&self.source_dirs)
            .map_err(|e| PreflightError::Git(format!("syntax check could not run: {e:#}")))?;
        if !failures.is_empty() {
            let relative = failures
                .into_iter()
                .map(|f| {
                    Path::new(&f)
                        .strip_prefix(&self.repo)
                        .map(|p| p.display().to_string())
                        .unwrap_or(f)
                })
                .collect();
            return Err(PreflightError::syntax(relative));
        }
        tracing::info!("✓ Syntax check passed");

        let commit = self.git(&["rev-parse", "HEAD"])?;
        tracing::info!("Release candidate {} on {}", short_commit(&commit), branch);
        Ok(ReleaseCandidate {
            commit,
            branch,
            is_clean: true,
            has_unpushed: false,
        })
    }
}

/// A candidate decided up front; no local repository is inspected
pub struct FixedCandidate(pub ReleaseCandidate);

impl Preflight for FixedCandidate {
    fn check(&self, _non_interactive: bool) -> Result<ReleaseCandidate, PreflightError> {
        Ok(self.0.clone())
    }
}
