use anyhow::Result;
use stacksize_pdb::Project;
use stacksize_pdb::reader::{FileLoader, LogEntry, PagedReader};
use std::path::PathBuf;
use std::rc::Rc;
use tracing::info;

/// Adds `files` to a new project. Nothing is read beyond what it takes to open each file.
pub async fn open_project(files: &[PathBuf]) -> Result<Project> {
    let mut project = Project::new();
    for path in files.iter() {
        let loader = FileLoader::open(path).await?;
        info!(file = %path.display(), "opened");
        project.add_file(path.display().to_string(), PagedReader::new(Rc::new(loader)));
    }
    Ok(project)
}

/// Formats an optional size, using `?` for unknown.
pub fn show_size(size: Option<impl std::fmt::Display>) -> String {
    match size {
        Some(size) => size.to_string(),
        None => "?".to_string(),
    }
}

/// Formats a caller stack size, for which `-1` means unknown.
pub fn show_caller_size(size: i64) -> String {
    show_size((size >= 0).then_some(size))
}

/// Prints diagnostics below a table row.
pub fn print_diagnostics(indent: usize, diagnostics: &[LogEntry]) {
    for entry in diagnostics.iter() {
        println!("{:indent$}{} ({})", "", entry.message, entry.location);
    }
}
