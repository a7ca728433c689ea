//! Named task templates with `{variable}` placeholders.
//!
//! Built-in templates ship with the binary; custom ones live as
//! `<templates_dir>/<name>.json` files holding `{title, description?, notes?}`.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::NewTask;
use crate::storage::write_atomic;

/// Variable bindings used to expand a template.
pub type Variables = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub notes: String,
}

impl Template {
    /// Placeholder names referenced anywhere in the template.
    pub fn variables(&self) -> BTreeSet<String> {
        [&self.title, &self.description, &self.notes]
            .into_iter()
            .flat_map(|pattern| placeholders(pattern))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateOrigin {
    Builtin,
    Custom,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateSummary {
    pub name: String,
    pub title: String,
    pub origin: TemplateOrigin,
    pub variables: Vec<String>,
}

/// All templates visible from one templates directory.
#[derive(Debug, Clone)]
pub struct TemplateRegistry {
    dir: PathBuf,
    templates: BTreeMap<String, (Template, TemplateOrigin)>,
}

impl TemplateRegistry {
    /// Built-ins plus every `*.json` file in `dir` (which may not exist).
    pub fn load(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let mut templates: BTreeMap<_, _> = builtin_templates()
            .into_iter()
            .map(|(name, template)| (name.to_string(), (template, TemplateOrigin::Builtin)))
            .collect();

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => Some(entries),
            Err(err) if err.kind() == io::ErrorKind::NotFound => None,
            Err(err) => return Err(err.into()),
        };
        for entry in entries.into_iter().flatten() {
            let path = entry?.path();
            let Some(name) = custom_name(&path) else {
                continue;
            };
            if templates.contains_key(&name) {
                tracing::warn!(path = %path.display(), "custom template shadows a built-in; ignored");
                continue;
            }
            let template = read_template(&path)?;
            tracing::debug!(name = %name, "loaded custom template");
            templates.insert(name, (template, TemplateOrigin::Custom));
        }

        Ok(Self { dir, templates })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn list(&self) -> Vec<TemplateSummary> {
        self.templates
            .iter()
            .map(|(name, (template, origin))| TemplateSummary {
                name: name.clone(),
                title: template.title.clone(),
                origin: *origin,
                variables: template.variables().into_iter().collect(),
            })
            .collect()
    }

    pub fn get(&self, name: &str) -> Result<&Template> {
        self.templates
            .get(name)
            .map(|(template, _)| template)
            .ok_or_else(|| Error::NotFound(format!("template '{name}'")))
    }

    /// Expand a template into task creation fields.
    pub fn instantiate(&self, name: &str, variables: &Variables) -> Result<NewTask> {
        let template = self.get(name)?;
        let mut missing = BTreeSet::new();
        let mut expand = |pattern: &str| match render(pattern, variables) {
            Ok(text) => text,
            Err(names) => {
                missing.extend(names);
                String::new()
            }
        };
        let fields = NewTask {
            title: expand(&template.title),
            description: expand(&template.description),
            notes: expand(&template.notes),
        };
        if !missing.is_empty() {
            return Err(Error::Validation(format!(
                "template '{name}' needs values for: {}",
                missing.into_iter().collect::<Vec<_>>().join(", ")
            )));
        }
        Ok(fields)
    }

    /// Persist a custom template. Names must be new.
    pub fn save(&mut self, name: &str, template: Template) -> Result<PathBuf> {
        validate_template_name(name)?;
        if template.title.trim().is_empty() {
            return Err(Error::Validation("template title cannot be empty".to_string()));
        }
        if self.templates.contains_key(name) {
            return Err(Error::Conflict(format!("template '{name}'")));
        }

        let path = self.dir.join(format!("{name}.json"));
        let mut content = serde_json::to_string_pretty(&template)?;
        content.push('\n');
        write_atomic(&path, content.as_bytes())?;
        tracing::info!(name, path = %path.display(), "saved template");
        self.templates
            .insert(name.to_string(), (template, TemplateOrigin::Custom));
        Ok(path)
    }
}

/// Substitute `{name}` placeholders. Returns the missing names on failure.
pub fn render(pattern: &str, variables: &Variables) -> std::result::Result<String, Vec<String>> {
    let mut out = String::with_capacity(pattern.len());
    let mut missing = Vec::new();
    let mut rest = pattern;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match placeholder_at(after) {
            Some(name) => {
                match variables.get(name) {
                    Some(value) => out.push_str(value),
                    None => missing.push(name.to_string()),
                }
                rest = &after[name.len() + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    if missing.is_empty() {
        Ok(out)
    } else {
        Err(missing)
    }
}

/// Placeholder names in order of appearance.
pub fn placeholders(pattern: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut rest = pattern;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        match placeholder_at(after) {
            Some(name) => {
                names.push(name.to_string());
                rest = &after[name.len() + 1..];
            }
            None => rest = after,
        }
    }
    names
}

/// Identifier directly followed by `}` at the start of `text`.
fn placeholder_at(text: &str) -> Option<&str> {
    let close = text.find('}')?;
    let name = &text[..close];
    let mut chars = name.chars();
    let first = chars.next()?;
    if (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
    {
        Some(name)
    } else {
        None
    }
}

fn custom_name(path: &Path) -> Option<String> {
    if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    validate_template_name(stem).ok()?;
    Some(stem.to_string())
}

fn validate_template_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name.starts_with('.')
        || !name
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_'))
    {
        return Err(Error::Validation(format!(
            "invalid template name '{name}' (letters, digits, '-' and '_' only)"
        )));
    }
    Ok(())
}

fn read_template(path: &Path) -> Result<Template> {
    let content = fs::read_to_string(path)?;
    let value: serde_json::Value =
        serde_json::from_str(&content).map_err(|err| Error::corrupt(path, err))?;
    serde_json::from_value(value)
        .map_err(|err| Error::Validation(format!("{}: {err}", path.display())))
}

fn builtin_templates() -> Vec<(&'static str, Template)> {
    vec![
        (
            "bug_investigation",
            Template {
                title: "Investigate {issue} in {component}".to_string(),
                description: "Observed: {issue}\nComponent: {component}\n\n\
                              Capture reproduction steps and the expected behaviour."
                    .to_string(),
                notes: "- [ ] Reproduce\n- [ ] Check recent changes\n\
                        - [ ] Find root cause\n- [ ] Fix and add regression test"
                    .to_string(),
            },
        ),
        (
            "feature_implementation",
            Template {
                title: "Implement {feature}".to_string(),
                description: "Goal: {feature}\n\nAcceptance criteria:\n- [ ] {criteria}"
                    .to_string(),
                notes: "- [ ] Design\n- [ ] Build core behaviour\n\
                        - [ ] Tests\n- [ ] Document"
                    .to_string(),
            },
        ),
        (
            "refactoring",
            Template {
                title: "Refactor {component}".to_string(),
                description: "Why: {reason}\n\nBehaviour must stay unchanged.".to_string(),
                notes: "- [ ] Tests green before starting\n- [ ] Small steps\n\
                        - [ ] Tests green after"
                    .to_string(),
            },
        ),
        (
            "optimization",
            Template {
                title: "Optimize {target}".to_string(),
                description: "Metric: {metric}\nCurrent: {current}\nTarget: {goal}".to_string(),
                notes: "- [ ] Measure baseline\n- [ ] Profile hotspots\n\
                        - [ ] Apply change\n- [ ] Measure again"
                    .to_string(),
            },
        ),
    ]
}
