//! taskflow config init

use std::path::PathBuf;

use serde::Serialize;

use crate::config::{Config, LOCAL_CONFIG_FILE};
use crate::error::{Error, Result};
use crate::output::{emit_success, OutputOptions, Report};

pub fn run_init(path: Option<PathBuf>, force: bool, output: OutputOptions) -> Result<()> {
    #[derive(Serialize)]
    struct Written {
        path: String,
    }

    let path = path.unwrap_or_else(|| PathBuf::from(LOCAL_CONFIG_FILE));
    if path.exists() && !force {
        return Err(Error::Conflict(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )));
    }
    Config::default().save(&path)?;

    let written = Written {
        path: path.display().to_string(),
    };
    let mut report = Report::new(format!("Wrote {}", written.path));
    report.next("edit the file, then run `taskflow project new <name>`");
    emit_success(output, "config init", &written, Some(&report))
}
