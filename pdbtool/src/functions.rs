use crate::util::{open_project, print_diagnostics, show_caller_size, show_size};
use anyhow::Result;
use stacksize_pdb::reader::{CapturingLogger, LogEntry, TracingLogger};
use std::cmp::Reverse;
use std::path::PathBuf;

/// Lists the functions found in a set of files.
#[derive(clap::Parser)]
pub struct FunctionsOptions {
    /// PDB files, PE images and object files. Types come from the first PDB, or from the object
    /// files if no PDB is given.
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Only show functions whose name contains this string.
    #[arg(long)]
    filter: Option<String>,

    /// Sort by self stack size, largest first.
    #[arg(long)]
    sort: bool,

    /// Show why a caller stack size could not be determined.
    #[arg(long)]
    why: bool,
}

struct Row<'a> {
    name: &'a str,
    self_size: Option<u32>,
    caller_size: i64,
    diagnostics: Vec<LogEntry>,
}

pub async fn command(options: FunctionsOptions) -> Result<()> {
    let project = open_project(&options.files).await?;
    let functions = project.get_all_functions(&TracingLogger).await?;

    let mut rows = Vec::new();
    for f in functions.iter() {
        if let Some(filter) = &options.filter {
            if !f.name.contains(filter.as_str()) {
                continue;
            }
        }
        let diagnostics = CapturingLogger::new();
        let caller_size = project.caller_stack_size(f, &diagnostics).await?;
        rows.push(Row {
            name: &f.name,
            self_size: f.self_stack_size,
            caller_size,
            diagnostics: diagnostics.take(),
        });
    }

    if options.sort {
        rows.sort_by_key(|row| Reverse(row.self_size));
    }

    println!("{:>10} {:>10}  name", "self", "caller");
    for row in rows.iter() {
        println!(
            "{:>10} {:>10}  {}",
            show_size(row.self_size),
            show_caller_size(row.caller_size),
            row.name
        );
        if options.why {
            print_diagnostics(24, &row.diagnostics);
        }
    }

    println!();
    println!("{} functions", rows.len());
    let unknown = rows.iter().filter(|row| row.caller_size < 0).count();
    if unknown != 0 && !options.why {
        println!("{unknown} caller stack sizes could not be determined; use --why to see why");
    }
    Ok(())
}
