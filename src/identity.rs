//! Task ID allocation
//!
//! IDs are zero-padded decimal strings issued from `Project.next_task_id`.
//! The counter only moves forward: even when it is lost or stale on disk the
//! next ID is always above every task file that exists.

use crate::error::{Error, Result};
use crate::model::Project;
use crate::storage::Storage;

/// Format a task number, widening past `width` digits when needed.
pub fn format_task_id(number: u64, width: usize) -> String {
    format!("{number:0width$}")
}

/// Numeric value of an ID made only of ASCII digits.
pub fn parse_task_number(id: &str) -> Option<u64> {
    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    id.parse().ok()
}

/// Reserve the next task ID on the in-memory `project`.
///
/// The caller persists the task first and the project second, so a failed
/// task write leaves the stored counter untouched.
pub fn allocate_task_id(storage: &Storage, project: &mut Project, width: usize) -> Result<String> {
    let mut highest = 0u64;
    let mut foreign = Vec::new();
    for id in storage.list_tasks(&project.name)? {
        match parse_task_number(&id) {
            Some(number) => highest = highest.max(number),
            None => foreign.push(id),
        }
    }

    let next = match project.next_task_id {
        Some(counter) if counter > highest => counter,
        Some(counter) => {
            tracing::warn!(
                project = %project.name,
                counter,
                highest,
                "task counter behind existing tasks; skipping ahead"
            );
            bump(highest, &project.name)?
        }
        None => {
            if !foreign.is_empty() {
                return Err(Error::Storage(format!(
                    "project '{}' has no usable task counter and non-numeric task ids: {}",
                    project.name,
                    foreign.join(", ")
                )));
            }
            tracing::warn!(project = %project.name, highest, "recomputing task counter from files");
            bump(highest, &project.name)?
        }
    };

    if !foreign.is_empty() {
        tracing::warn!(project = %project.name, ids = ?foreign, "ignoring non-numeric task ids");
    }

    project.next_task_id = Some(bump(next, &project.name)?);
    Ok(format_task_id(next, width))
}

fn bump(value: u64, project: &str) -> Result<u64> {
    value
        .checked_add(1)
        .ok_or_else(|| Error::Storage(format!("task counter overflow in project '{project}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NewTask, Task};
    use tempfile::TempDir;

    fn setup() -> (TempDir, Storage, Project) {
        let temp = TempDir::new().expect("tempdir");
        let storage = Storage::new(temp.path());
        let project = Project::new("alpha", "");
        storage.write_project(&project).expect("write project");
        (temp, storage, project)
    }

    fn put_task(storage: &Storage, id: &str) {
        let task = Task::new(
            id,
            "alpha",
            NewTask {
                title: "Work".to_string(),
                ..NewTask::default()
            },
        );
        storage.write_task("alpha", &task).expect("write task");
    }

    #[test]
    fn formats_with_padding_and_widens() {
        assert_eq!(format_task_id(7, 3), "007");
        assert_eq!(format_task_id(999, 3), "999");
        assert_eq!(format_task_id(1000, 3), "1000");
        assert_eq!(format_task_id(42, 5), "00042");
    }

    #[test]
    fn parses_only_digit_ids() {
        assert_eq!(parse_task_number("012"), Some(12));
        assert_eq!(parse_task_number("12a"), None);
        assert_eq!(parse_task_number("+12"), None);
        assert_eq!(parse_task_number(""), None);
    }

    #[test]
    fn allocates_sequentially() {
        let (_temp, storage, mut project) = setup();
        assert_eq!(allocate_task_id(&storage, &mut project, 3).unwrap(), "001");
        assert_eq!(allocate_task_id(&storage, &mut project, 3).unwrap(), "002");
        assert_eq!(project.next_task_id(), Some(3));
    }

    #[test]
    fn missing_counter_recomputes_from_files() {
        let (_temp, storage, mut project) = setup();
        put_task(&storage, "004");
        put_task(&storage, "009");
        project.next_task_id = None;

        assert_eq!(allocate_task_id(&storage, &mut project, 3).unwrap(), "010");
        assert_eq!(project.next_task_id(), Some(11));
    }

    #[test]
    fn stale_counter_never_reissues_existing_id() {
        let (_temp, storage, mut project) = setup();
        put_task(&storage, "005");
        project.next_task_id = Some(2);

        assert_eq!(allocate_task_id(&storage, &mut project, 3).unwrap(), "006");
    }

    #[test]
    fn empty_project_without_counter_starts_at_one() {
        let (_temp, storage, mut project) = setup();
        project.next_task_id = None;
        assert_eq!(allocate_task_id(&storage, &mut project, 3).unwrap(), "001");
    }

    #[test]
    fn unrecoverable_counter_is_storage_error() {
        let (_temp, storage, mut project) = setup();
        put_task(&storage, "abc");
        project.next_task_id = None;

        let err = allocate_task_id(&storage, &mut project, 3).expect_err("unrecoverable");
        assert!(matches!(err, Error::Storage(_)));
        assert_eq!(err.kind(), "storage");
    }

    #[test]
    fn valid_counter_tolerates_foreign_ids() {
        let (_temp, storage, mut project) = setup();
        put_task(&storage, "abc");
        assert_eq!(allocate_task_id(&storage, &mut project, 3).unwrap(), "001");
    }
}
