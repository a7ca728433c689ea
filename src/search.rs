//! Free-text search over stored records.
//!
//! There is no index: each search walks the storage tree and yields hits as
//! it goes. Queries are a single literal substring matched case-insensitively,
//! so `heat pump` only matches those two words adjacent to each other.
//!
//! The same scans back two derived views: tasks related to a given task by
//! shared keywords, and tasks touched within the last few days.

use std::collections::{HashSet, VecDeque};
use std::ops::Range;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::config::SearchConfig;
use crate::error::{Error, Result};
use crate::model::{Iteration, Task, TaskStatus};
use crate::storage::Storage;

#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub text: String,
    pub status: Option<TaskStatus>,
    pub project: Option<String>,
    pub limit: Option<usize>,
}

impl SearchQuery {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

/// Field a hit was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchField {
    Title,
    Description,
    Notes,
    IterationNotes,
    Summary,
    UserFeedback,
    NextSteps,
    /// Placeholder for empty queries, which list tasks rather than match text.
    Status,
}

impl MatchField {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchField::Title => "title",
            MatchField::Description => "description",
            MatchField::Notes => "notes",
            MatchField::IterationNotes => "iteration_notes",
            MatchField::Summary => "summary",
            MatchField::UserFeedback => "user_feedback",
            MatchField::NextSteps => "next_steps",
            MatchField::Status => "status",
        }
    }
}

/// Context around a match. `text` is the rendered, highlighted form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snippet {
    pub text: String,
    pub before: String,
    pub matched: String,
    pub after: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    pub project: String,
    pub task_id: String,
    pub title: String,
    pub status: TaskStatus,
    pub field: MatchField,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iteration: Option<u32>,
    pub snippet: Snippet,
}

/// Read-only scanner bound to one storage root.
pub struct SearchEngine<'a> {
    storage: &'a Storage,
    settings: &'a SearchConfig,
}

impl<'a> SearchEngine<'a> {
    pub fn new(storage: &'a Storage, settings: &'a SearchConfig) -> Self {
        Self { storage, settings }
    }

    /// Start a search. Projects in scope are resolved eagerly; task records
    /// are read only as the iterator advances.
    pub fn search(&self, query: SearchQuery) -> Result<SearchResults<'a>> {
        let projects = match &query.project {
            Some(project) => {
                if !self.storage.project_exists(project) {
                    return Err(Error::NotFound(format!("project '{project}'")));
                }
                vec![project.clone()]
            }
            None => {
                let mut names = self.storage.list_projects()?.collect::<Result<Vec<_>>>()?;
                names.sort();
                names
            }
        };

        let needle: Vec<char> = query.text.chars().flat_map(char::to_lowercase).collect();
        tracing::debug!(query = %query.text, projects = projects.len(), "searching");

        Ok(SearchResults {
            storage: self.storage,
            settings: self.settings,
            needle,
            status: query.status,
            limit: query.limit,
            projects: projects.into_iter(),
            project: None,
            tasks: Vec::new().into_iter(),
            pending: VecDeque::new(),
            emitted: 0,
        })
    }

    /// Other tasks in the same project sharing more than
    /// [`RELATED_THRESHOLD`] of the source task's keywords, best first.
    pub fn related(&self, project: &str, task_id: &str) -> Result<Vec<RelatedTask>> {
        let source = self.storage.read_task(project, task_id)?;
        let keywords = keywords(&source);
        if keywords.is_empty() {
            return Ok(Vec::new());
        }

        let mut related = Vec::new();
        for id in self.storage.list_tasks(project)? {
            if id == source.id {
                continue;
            }
            let task = self.storage.read_task(project, &id)?;
            let haystack = task_text(&task);
            let shared = keywords
                .iter()
                .filter(|word| haystack.contains(word.as_str()))
                .count();
            let score = shared as f64 / keywords.len() as f64;
            if score > RELATED_THRESHOLD {
                related.push(RelatedTask {
                    project: project.to_string(),
                    task_id: task.id,
                    title: task.title,
                    status: task.status,
                    score,
                });
            }
        }
        // stable: equal scores keep task order
        related.sort_by(|a, b| b.score.total_cmp(&a.score));
        tracing::debug!(project, task_id, found = related.len(), "related tasks");
        Ok(related)
    }

    /// Tasks whose latest timestamp falls within the last `days` days,
    /// newest first.
    pub fn recent(&self, days: u32) -> Result<Vec<RecentActivity>> {
        let cutoff = Utc::now() - Duration::days(i64::from(days));
        let mut projects = self.storage.list_projects()?.collect::<Result<Vec<_>>>()?;
        projects.sort();

        let mut recent = Vec::new();
        for project in projects {
            for id in self.storage.list_tasks(&project)? {
                let task = self.storage.read_task(&project, &id)?;
                let updated = self.last_update(&project, &task)?;
                if updated > cutoff {
                    recent.push(RecentActivity {
                        project: project.clone(),
                        task_id: task.id,
                        title: task.title,
                        status: task.status,
                        updated,
                    });
                }
            }
        }
        recent.sort_by(|a, b| b.updated.cmp(&a.updated));
        Ok(recent)
    }

    fn last_update(&self, project: &str, task: &Task) -> Result<DateTime<Utc>> {
        let mut latest = [task.started, task.completed]
            .into_iter()
            .flatten()
            .fold(task.created, |latest, at| latest.max(at));
        for number in self.storage.list_iterations(project, &task.id)? {
            let iteration = self.storage.read_iteration(project, &task.id, number)?;
            latest = latest.max(iteration.completed.unwrap_or(iteration.started));
        }
        Ok(latest)
    }
}

/// Share of keywords another task must contain to count as related.
pub const RELATED_THRESHOLD: f64 = 0.3;

/// Window used by `recent` when callers give none.
pub const DEFAULT_RECENT_DAYS: u32 = 7;

const MIN_KEYWORD_CHARS: usize = 4;
const COMMON_WORDS: &[&str] = &[
    "that", "this", "with", "from", "have", "been", "were", "what", "when", "where",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelatedTask {
    pub project: String,
    pub task_id: String,
    pub title: String,
    pub status: TaskStatus,
    /// Fraction of the source task's keywords found in this task.
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecentActivity {
    pub project: String,
    pub task_id: String,
    pub title: String,
    pub status: TaskStatus,
    pub updated: DateTime<Utc>,
}

fn task_text(task: &Task) -> String {
    format!("{} {} {}", task.title, task.description, task.notes).to_lowercase()
}

/// Distinct lower-cased words of four or more characters, in first-seen
/// order, minus a few filler words.
fn keywords(task: &Task) -> Vec<String> {
    let text = task_text(task);
    let mut seen = HashSet::new();
    text.split(|ch: char| !(ch.is_alphanumeric() || ch == '_'))
        .filter(|word| word.chars().count() >= MIN_KEYWORD_CHARS)
        .filter(|word| !COMMON_WORDS.contains(word))
        .filter(|word| seen.insert(*word))
        .map(str::to_string)
        .collect()
}

/// Lazy stream of hits in project, task, field order.
pub struct SearchResults<'a> {
    storage: &'a Storage,
    settings: &'a SearchConfig,
    needle: Vec<char>,
    status: Option<TaskStatus>,
    limit: Option<usize>,
    projects: std::vec::IntoIter<String>,
    project: Option<String>,
    tasks: std::vec::IntoIter<String>,
    pending: VecDeque<SearchHit>,
    emitted: usize,
}

impl Iterator for SearchResults<'_> {
    type Item = Result<SearchHit>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.limit.is_some_and(|limit| self.emitted >= limit) {
                return None;
            }
            if let Some(hit) = self.pending.pop_front() {
                self.emitted += 1;
                return Some(Ok(hit));
            }
            if let Some(task_id) = self.tasks.next() {
                if let Err(err) = self.scan_task(&task_id) {
                    return Some(Err(err));
                }
                continue;
            }
            let project = self.projects.next()?;
            match self.storage.list_tasks(&project) {
                Ok(ids) => {
                    self.tasks = ids.into_iter();
                    self.project = Some(project);
                }
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

impl SearchResults<'_> {
    fn scan_task(&mut self, task_id: &str) -> Result<()> {
        let Some(project) = self.project.clone() else {
            return Ok(());
        };
        let task = self.storage.read_task(&project, task_id)?;
        if self.status.as_ref().is_some_and(|status| *status != task.status) {
            return Ok(());
        }

        if self.needle.is_empty() {
            let snippet = Snippet {
                text: task.title.clone(),
                before: String::new(),
                matched: task.title.clone(),
                after: String::new(),
            };
            self.push(&project, &task, MatchField::Status, None, snippet);
            return Ok(());
        }

        for (field, text) in [
            (MatchField::Title, &task.title),
            (MatchField::Description, &task.description),
            (MatchField::Notes, &task.notes),
        ] {
            if let Some(snippet) = self.match_text(text) {
                self.push(&project, &task, field, None, snippet);
            }
        }

        for number in self.storage.list_iterations(&project, &task.id)? {
            let iteration = self.storage.read_iteration(&project, &task.id, number)?;
            for (field, text) in iteration_fields(&iteration) {
                if let Some(snippet) = self.match_text(text) {
                    self.push(&project, &task, field, Some(number), snippet);
                }
            }
        }
        Ok(())
    }

    fn match_text(&self, text: &str) -> Option<Snippet> {
        let range = find_ignore_case(text, &self.needle)?;
        Some(snippet(text, range, self.settings))
    }

    fn push(
        &mut self,
        project: &str,
        task: &Task,
        field: MatchField,
        iteration: Option<u32>,
        snippet: Snippet,
    ) {
        self.pending.push_back(SearchHit {
            project: project.to_string(),
            task_id: task.id.clone(),
            title: task.title.clone(),
            status: task.status.clone(),
            field,
            iteration,
            snippet,
        });
    }
}

fn iteration_fields(iteration: &Iteration) -> [(MatchField, &str); 4] {
    [
        (MatchField::IterationNotes, iteration.notes.as_str()),
        (MatchField::Summary, iteration.summary.as_str()),
        (MatchField::UserFeedback, iteration.user_feedback.as_str()),
        (MatchField::NextSteps, iteration.next_steps.as_str()),
    ]
}

/// Byte range of the first case-insensitive occurrence of `needle`
/// (already lower-cased) in `haystack`.
fn find_ignore_case(haystack: &str, needle: &[char]) -> Option<Range<usize>> {
    if needle.is_empty() {
        return None;
    }
    for (start, _) in haystack.char_indices() {
        let mut expected = needle.iter();
        for (offset, ch) in haystack[start..].char_indices() {
            if !ch.to_lowercase().all(|lower| expected.next() == Some(&lower)) {
                break;
            }
            if expected.len() == 0 {
                return Some(start..start + offset + ch.len_utf8());
            }
        }
    }
    None
}

fn snippet(text: &str, range: Range<usize>, settings: &SearchConfig) -> Snippet {
    let radius = settings.context_chars.max(1);
    let from = text[..range.start]
        .char_indices()
        .rev()
        .nth(radius - 1)
        .map_or(0, |(index, _)| index);
    let to = text[range.end..]
        .char_indices()
        .nth(radius)
        .map_or(text.len(), |(index, _)| range.end + index);

    let before = flatten(&text[from..range.start]);
    let matched = flatten(&text[range.clone()]);
    let after = flatten(&text[range.end..to]);

    let mut rendered = String::new();
    if from > 0 {
        rendered.push_str("...");
    }
    rendered.push_str(&before);
    rendered.push_str(&settings.highlight_open);
    rendered.push_str(&matched);
    rendered.push_str(&settings.highlight_close);
    rendered.push_str(&after);
    if to < text.len() {
        rendered.push_str("...");
    }

    Snippet {
        text: rendered,
        before,
        matched,
        after,
    }
}

fn flatten(text: &str) -> String {
    text.replace(['\n', '\r'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::manager::Manager;
    use crate::model::NewTask;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Manager) {
        let temp = TempDir::new().expect("tempdir");
        let manager = Manager::new(Config {
            root: temp.path().join("projects"),
            ..Config::default()
        });
        manager.create_project("house", "").expect("project");
        (temp, manager)
    }

    fn add(manager: &Manager, project: &str, title: &str, description: &str) -> Task {
        manager
            .create_task(
                project,
                NewTask {
                    title: title.to_string(),
                    description: description.to_string(),
                    notes: String::new(),
                },
            )
            .expect("task")
    }

    fn collect(manager: &Manager, query: SearchQuery) -> Vec<SearchHit> {
        manager
            .search(query)
            .expect("search")
            .collect::<Result<Vec<_>>>()
            .expect("hits")
    }

    #[test]
    fn finds_phrase_in_description() {
        let (_temp, manager) = setup();
        let task = add(&manager, "house", "Winter prep", "heat pump efficiency");

        let hits = collect(&manager, SearchQuery::text("heat pump"));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].project, "house");
        assert_eq!(hits[0].task_id, task.id);
        assert_eq!(hits[0].field, MatchField::Description);
        assert!(hits[0].snippet.text.contains("heat pump"));
        assert_eq!(hits[0].snippet.text, "**heat pump** efficiency");
    }

    #[test]
    fn status_filter_excludes_non_matching_tasks() {
        let (_temp, manager) = setup();
        add(&manager, "house", "Winter prep", "heat pump efficiency");

        let query = SearchQuery {
            status: Some(TaskStatus::Completed),
            ..SearchQuery::text("heat pump")
        };
        assert!(collect(&manager, query).is_empty());
    }

    #[test]
    fn multi_word_query_is_one_literal() {
        let (_temp, manager) = setup();
        add(&manager, "house", "Pump heat", "the pump needs heat");
        assert!(collect(&manager, SearchQuery::text("heat pump")).is_empty());
    }

    #[test]
    fn matching_ignores_unicode_case() {
        let (_temp, manager) = setup();
        add(&manager, "house", "ÉTUDE thermique", "");
        let hits = collect(&manager, SearchQuery::text("étude"));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].snippet.matched, "ÉTUDE");
    }

    #[test]
    fn empty_query_lists_tasks_in_status() {
        let (_temp, manager) = setup();
        let a = add(&manager, "house", "One", "");
        add(&manager, "house", "Two", "");
        manager.start_iteration("house", &a.id).unwrap();

        let query = SearchQuery {
            status: Some(TaskStatus::InProgress),
            ..SearchQuery::default()
        };
        let hits = collect(&manager, query);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].field, MatchField::Status);
        assert_eq!(hits[0].snippet.text, "One");
    }

    #[test]
    fn whitespace_query_is_a_literal() {
        let (_temp, manager) = setup();
        add(&manager, "house", "Boiler", "");
        add(&manager, "house", "Paint fence", "");

        let hits = collect(&manager, SearchQuery::text(" "));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "Paint fence");
        assert_eq!(hits[0].field, MatchField::Title);
        assert!(collect(&manager, SearchQuery::text("   ")).is_empty());
    }

    #[test]
    fn related_ranks_by_shared_keywords() {
        let (_temp, manager) = setup();
        let source = add(&manager, "house", "Boiler service", "check boiler pressure valve");
        add(&manager, "house", "Paint fence", "two coats");
        let close = add(&manager, "house", "Boiler pressure", "valve keeps dripping");
        let loose = add(&manager, "house", "Service van", "book boiler engineer");

        let related = manager.related_tasks("house", &source.id).unwrap();
        let ids: Vec<_> = related.iter().map(|task| task.task_id.as_str()).collect();
        assert_eq!(ids, vec![close.id.as_str(), loose.id.as_str()]);
        assert!(related[0].score > related[1].score);
        assert!(related.iter().all(|task| task.score > RELATED_THRESHOLD));
    }

    #[test]
    fn related_for_missing_task_is_not_found() {
        let (_temp, manager) = setup();
        assert!(matches!(
            manager.related_tasks("house", "042"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn keywords_skip_short_and_filler_words() {
        let task = Task::new(
            "001",
            "house",
            NewTask {
                title: "Fix the boiler".to_string(),
                description: "this boiler_room, with BOILER noise".to_string(),
                notes: String::new(),
            },
        );
        assert_eq!(keywords(&task), vec!["boiler", "boiler_room", "noise"]);
    }

    #[test]
    fn recent_orders_newest_first_and_respects_window() {
        let (_temp, manager) = setup();
        manager.create_project("garden", "").unwrap();
        let old = add(&manager, "house", "Old job", "");
        let fresh = add(&manager, "garden", "Fresh job", "");
        let busy = add(&manager, "house", "Busy job", "");

        let storage = manager.storage();
        let mut record = storage.read_task("house", &old.id).unwrap();
        record.created = Utc::now() - Duration::days(30);
        storage.write_task("house", &record).unwrap();

        let mut record = storage.read_task("garden", &fresh.id).unwrap();
        record.created = Utc::now() - Duration::days(2);
        storage.write_task("garden", &record).unwrap();

        let mut record = storage.read_task("house", &busy.id).unwrap();
        record.created = Utc::now() - Duration::days(20);
        let mut iteration = record.begin_iteration(Utc::now() - Duration::hours(1));
        iteration.notes = "still going".to_string();
        storage.write_iteration("house", &iteration).unwrap();
        storage.write_task("house", &record).unwrap();

        let recent = manager.recent_activity(7).unwrap();
        let order: Vec<_> = recent
            .iter()
            .map(|item| format!("{}/{}", item.project, item.task_id))
            .collect();
        assert_eq!(order, vec!["house/002", "garden/001"]);
        assert!(recent[0].updated > recent[1].updated);

        assert_eq!(manager.recent_activity(60).unwrap().len(), 3);
        assert!(manager.recent_activity(0).unwrap().is_empty());
    }

    #[test]
    fn iteration_fields_are_searched_in_order() {
        let (_temp, manager) = setup();
        let task = add(&manager, "house", "Boiler", "");
        manager.start_iteration("house", &task.id).unwrap();
        manager.add_note("house", &task.id, "valve sticks").unwrap();
        manager
            .set_next_steps("house", &task.id, "replace valve")
            .unwrap();

        let hits = collect(&manager, SearchQuery::text("VALVE"));
        let fields: Vec<_> = hits.iter().map(|hit| hit.field).collect();
        assert_eq!(fields, vec![MatchField::IterationNotes, MatchField::NextSteps]);
        assert!(hits.iter().all(|hit| hit.iteration == Some(1)));
    }

    #[test]
    fn walks_projects_in_order_and_honours_limit() {
        let (_temp, manager) = setup();
        manager.create_project("garden", "").unwrap();
        add(&manager, "house", "Paint fence", "");
        add(&manager, "garden", "Fence posts", "");
        add(&manager, "garden", "Fence gate", "");

        let hits = collect(&manager, SearchQuery::text("fence"));
        let order: Vec<_> = hits
            .iter()
            .map(|hit| format!("{}/{}", hit.project, hit.task_id))
            .collect();
        assert_eq!(order, vec!["garden/001", "garden/002", "house/001"]);

        let limited = SearchQuery {
            limit: Some(2),
            ..SearchQuery::text("fence")
        };
        assert_eq!(collect(&manager, limited).len(), 2);

        let scoped = SearchQuery {
            project: Some("house".to_string()),
            ..SearchQuery::text("fence")
        };
        assert_eq!(collect(&manager, scoped).len(), 1);
    }

    #[test]
    fn unknown_project_filter_is_not_found() {
        let (_temp, manager) = setup();
        let query = SearchQuery {
            project: Some("nowhere".to_string()),
            ..SearchQuery::text("x")
        };
        assert!(matches!(manager.search(query), Err(Error::NotFound(_))));
    }

    #[test]
    fn snippet_truncates_on_char_boundaries() {
        let settings = SearchConfig {
            context_chars: 3,
            ..SearchConfig::default()
        };
        let text = "ééééé needle ààààà";
        let range = find_ignore_case(text, &"NEEDLE".to_lowercase().chars().collect::<Vec<_>>())
            .expect("match");
        let snip = snippet(text, range, &settings);
        assert_eq!(snip.before, "éé ");
        assert_eq!(snip.after, " àà");
        assert_eq!(snip.text, "...éé **needle** àà...");
    }

    #[test]
    fn find_returns_none_without_match() {
        let needle: Vec<char> = "zz".chars().collect();
        assert_eq!(find_ignore_case("abc", &needle), None);
        assert_eq!(find_ignore_case("abc", &[]), None);
    }
}
