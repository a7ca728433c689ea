//! Storage layer for taskflow
//!
//! Layout under the configured root:
//! ```text
//! <root>/
//! ├── <project>/
//! │   ├── project.json          # Project record
//! │   └── tasks/
//! │       ├── 001-fix-login.yaml  # Task record, slug is cosmetic
//! │       └── 001.iter001.yaml    # Iteration records
//! └── .templates/               # Custom templates (see template.rs)
//! ```
//!
//! Every write goes through [`write_atomic`], so readers only ever see the
//! previous or the new content of a canonical file.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;

use crate::error::{Error, Result};
use crate::identity::parse_task_number;
use crate::model::{Iteration, Project, Task};

pub const PROJECT_FILE: &str = "project.json";
pub const TASKS_DIR: &str = "tasks";

const TASK_EXT: &str = ".yaml";
const ITER_MARKER: &str = ".iter";
const TEMP_MARKER: &str = ".tmp.";

/// Filesystem-backed record store rooted at one directory.
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // =========================================================================
    // Paths
    // =========================================================================

    pub fn project_dir(&self, project: &str) -> Result<PathBuf> {
        check_segment("project", project)?;
        Ok(self.root.join(project))
    }

    pub fn project_file(&self, project: &str) -> Result<PathBuf> {
        Ok(self.project_dir(project)?.join(PROJECT_FILE))
    }

    pub fn tasks_dir(&self, project: &str) -> Result<PathBuf> {
        Ok(self.project_dir(project)?.join(TASKS_DIR))
    }

    /// Canonical path of a task file: `{id}-{slug}.yaml`.
    pub fn task_file(&self, project: &str, id: &str, title: &str) -> Result<PathBuf> {
        check_segment("task id", id)?;
        let slug = slugify(title);
        let name = if slug.is_empty() {
            format!("{id}{TASK_EXT}")
        } else {
            format!("{id}-{slug}{TASK_EXT}")
        };
        Ok(self.tasks_dir(project)?.join(name))
    }

    /// Path of an iteration file: `{id}.iter{NNN}.yaml`.
    pub fn iteration_file(&self, project: &str, task_id: &str, number: u32) -> Result<PathBuf> {
        check_segment("task id", task_id)?;
        Ok(self
            .tasks_dir(project)?
            .join(format!("{task_id}{ITER_MARKER}{number:03}{TASK_EXT}")))
    }

    // =========================================================================
    // Projects
    // =========================================================================

    pub fn project_exists(&self, project: &str) -> bool {
        self.project_file(project)
            .map(|path| path.is_file())
            .unwrap_or(false)
    }

    pub fn read_project(&self, project: &str) -> Result<Project> {
        let path = self.project_file(project)?;
        let record: Project = read_json_record(&path, || format!("project '{project}'"))?;
        Ok(record)
    }

    pub fn write_project(&self, project: &Project) -> Result<()> {
        let path = self.project_file(&project.name)?;
        fs::create_dir_all(self.tasks_dir(&project.name)?)?;
        let mut content = serde_json::to_string_pretty(project)?;
        content.push('\n');
        write_atomic(&path, content.as_bytes())?;
        tracing::debug!(path = %path.display(), "wrote project");
        Ok(())
    }

    /// Lazily enumerate project names. A missing root yields nothing.
    pub fn list_projects(&self) -> Result<ProjectNames> {
        match fs::read_dir(&self.root) {
            Ok(entries) => Ok(ProjectNames {
                entries: Some(entries),
            }),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Ok(ProjectNames { entries: None })
            }
            Err(err) => Err(err.into()),
        }
    }

    // =========================================================================
    // Tasks
    // =========================================================================

    /// All files that claim to hold task `id`, sorted by file name.
    fn task_candidates(&self, project: &str, id: &str) -> Result<Vec<PathBuf>> {
        check_segment("task id", id)?;
        let dir = self.tasks_dir(project)?;
        let prefix = format!("{id}-");
        let exact = format!("{id}{TASK_EXT}");
        let mut found = Vec::new();
        for name in read_dir_names(&dir)? {
            if name == exact || (name.starts_with(&prefix) && is_task_file_name(&name)) {
                found.push(dir.join(name));
            }
        }
        found.sort();
        Ok(found)
    }

    pub fn read_task(&self, project: &str, id: &str) -> Result<Task> {
        let candidates = self.task_candidates(project, id)?;
        if candidates.len() > 1 {
            tracing::warn!(project, id, count = candidates.len(), "duplicate task files");
        }

        let mut first_err = None;
        for path in candidates {
            match read_yaml_record::<Task>(&path) {
                Ok(task) if task.id == id => {
                    tracing::debug!(path = %path.display(), "read task");
                    return Ok(task);
                }
                Ok(task) => {
                    tracing::warn!(path = %path.display(), found = %task.id, "task file id mismatch");
                }
                Err(err) => {
                    first_err.get_or_insert(err);
                }
            }
        }

        Err(first_err.unwrap_or_else(|| {
            Error::NotFound(format!("task {id} in project '{project}'"))
        }))
    }

    /// Write a task under its canonical name, then drop files left behind by
    /// an earlier title. Files whose record carries another id are kept.
    pub fn write_task(&self, project: &str, task: &Task) -> Result<()> {
        let path = self.task_file(project, &task.id, &task.title)?;
        let content = serde_yaml::to_string(task)?;
        write_atomic(&path, content.as_bytes())?;
        tracing::debug!(path = %path.display(), "wrote task");

        for stale in self.task_candidates(project, &task.id)? {
            if stale == path {
                continue;
            }
            match read_yaml_record::<Task>(&stale) {
                Ok(record) if record.id == task.id => {
                    tracing::debug!(path = %stale.display(), "removing stale task file");
                    fs::remove_file(&stale)?;
                }
                Ok(record) => {
                    tracing::warn!(
                        path = %stale.display(),
                        found = %record.id,
                        "leaving task file with mismatched id"
                    );
                }
                Err(err) => {
                    tracing::warn!(path = %stale.display(), error = %err, "leaving unreadable task file");
                }
            }
        }
        Ok(())
    }

    /// Task IDs in the project, ordered numerically then lexically.
    pub fn list_tasks(&self, project: &str) -> Result<Vec<String>> {
        if !self.project_exists(project) {
            return Err(Error::NotFound(format!("project '{project}'")));
        }
        let names = read_dir_names(&self.tasks_dir(project)?)?;
        for name in names.iter().filter(|name| name.contains(TEMP_MARKER)) {
            tracing::warn!(project, file = %name, "skipping leftover temp file");
        }
        let mut ids: Vec<String> = names
            .into_iter()
            .filter(|name| is_task_file_name(name))
            .filter_map(|name| task_id_from_file_name(&name))
            .collect();
        ids.sort_by(|a, b| {
            (parse_task_number(a), a.as_str()).cmp(&(parse_task_number(b), b.as_str()))
        });
        ids.dedup();
        Ok(ids)
    }

    /// Remove a task file and all of its iteration files.
    pub fn delete_task(&self, project: &str, id: &str) -> Result<()> {
        let candidates = self.task_candidates(project, id)?;
        if candidates.is_empty() {
            return Err(Error::NotFound(format!("task {id} in project '{project}'")));
        }
        for number in self.list_iterations(project, id)? {
            fs::remove_file(self.iteration_file(project, id, number)?)?;
        }
        for path in candidates {
            fs::remove_file(&path)?;
        }
        tracing::debug!(project, id, "deleted task files");
        Ok(())
    }

    // =========================================================================
    // Iterations
    // =========================================================================

    pub fn iteration_exists(&self, project: &str, task_id: &str, number: u32) -> Result<bool> {
        Ok(self.iteration_file(project, task_id, number)?.is_file())
    }

    pub fn read_iteration(&self, project: &str, task_id: &str, number: u32) -> Result<Iteration> {
        let path = self.iteration_file(project, task_id, number)?;
        let record: Iteration = read_yaml_record(&path)?;
        if record.task_id != task_id || record.iteration != number {
            return Err(Error::Validation(format!(
                "{}: record claims task {} iteration {}",
                path.display(),
                record.task_id,
                record.iteration
            )));
        }
        Ok(record)
    }

    pub fn write_iteration(&self, project: &str, iteration: &Iteration) -> Result<()> {
        let path = self.iteration_file(project, &iteration.task_id, iteration.iteration)?;
        let content = serde_yaml::to_string(iteration)?;
        write_atomic(&path, content.as_bytes())?;
        tracing::debug!(path = %path.display(), "wrote iteration");
        Ok(())
    }

    /// Iteration numbers present on disk for a task, ascending.
    pub fn list_iterations(&self, project: &str, task_id: &str) -> Result<Vec<u32>> {
        check_segment("task id", task_id)?;
        let prefix = format!("{task_id}{ITER_MARKER}");
        let mut numbers: Vec<u32> = read_dir_names(&self.tasks_dir(project)?)?
            .into_iter()
            .filter_map(|name| {
                let digits = name.strip_prefix(&prefix)?.strip_suffix(TASK_EXT)?;
                if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                digits.parse().ok()
            })
            .collect();
        numbers.sort_unstable();
        Ok(numbers)
    }
}

/// Lazy iterator over project directory names.
#[derive(Debug)]
pub struct ProjectNames {
    entries: Option<fs::ReadDir>,
}

impl Iterator for ProjectNames {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        let entries = self.entries.as_mut()?;
        loop {
            let entry = match entries.next()? {
                Ok(entry) => entry,
                Err(err) => return Some(Err(err.into())),
            };
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.starts_with('.') || !entry.path().join(PROJECT_FILE).is_file() {
                continue;
            }
            return Some(Ok(name));
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Write data atomically: unique temp file next to the target, fsync, rename.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| Error::Storage(format!("invalid target path {}", path.display())))?;

    // Dropping the handle on any error below removes the temp file.
    let mut temp_file = tempfile::Builder::new()
        .prefix(&format!("{file_name}{TEMP_MARKER}"))
        .tempfile_in(parent)?;
    temp_file.write_all(data)?;
    temp_file.as_file().sync_all()?;
    temp_file
        .persist(path)
        .map_err(|err| Error::Io(err.error))?;
    Ok(())
}

/// Lower-case, collapse non-alphanumerics to `-`, trim dashes.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;
    for ch in title.chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch);
        } else {
            pending_dash = true;
        }
    }
    slug
}

fn check_segment(what: &str, value: &str) -> Result<()> {
    if value.is_empty()
        || value.starts_with('.')
        || value.contains(['/', '\\'])
        || value.chars().any(char::is_control)
    {
        return Err(Error::Validation(format!("invalid {what} '{value}'")));
    }
    Ok(())
}

fn is_task_file_name(name: &str) -> bool {
    name.ends_with(TASK_EXT) && !name.starts_with('.') && !name.contains(ITER_MARKER)
}

fn task_id_from_file_name(name: &str) -> Option<String> {
    let stem = name.strip_suffix(TASK_EXT)?;
    let id = stem.split('-').next()?;
    (!id.is_empty()).then(|| id.to_string())
}

/// Names of regular files in `dir`; a missing directory is empty.
fn read_dir_names(dir: &Path) -> Result<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    Ok(names)
}

fn read_to_string(path: &Path, what: impl FnOnce() -> String) -> Result<String> {
    fs::read_to_string(path).map_err(|err| {
        if err.kind() == io::ErrorKind::NotFound {
            Error::NotFound(what())
        } else {
            Error::Storage(format!("cannot read {}: {err}", path.display()))
        }
    })
}

fn read_json_record<T: DeserializeOwned>(path: &Path, what: impl FnOnce() -> String) -> Result<T> {
    let content = read_to_string(path, what)?;
    let value: serde_json::Value =
        serde_json::from_str(&content).map_err(|err| Error::corrupt(path, err))?;
    serde_json::from_value(value)
        .map_err(|err| Error::Validation(format!("{}: {err}", path.display())))
}

fn read_yaml_record<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = read_to_string(path, || format!("record {}", path.display()))?;
    let value: serde_yaml::Value =
        serde_yaml::from_str(&content).map_err(|err| Error::corrupt(path, err))?;
    if value.is_null() {
        return Err(Error::corrupt(path, "empty file"));
    }
    serde_yaml::from_value(value)
        .map_err(|err| Error::Validation(format!("{}: {err}", path.display())))
}
