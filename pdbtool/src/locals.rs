use crate::util::{open_project, print_diagnostics, show_caller_size, show_size};
use anyhow::{Result, bail};
use stacksize_pdb::reader::{CapturingLogger, TracingLogger};
use std::path::PathBuf;

/// Lists the parameters and locals of a function, with their types.
#[derive(clap::Parser)]
pub struct LocalsOptions {
    /// PDB files, PE images and object files.
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// The name of the function. Every function with this name is shown.
    #[arg(long, short)]
    function: String,
}

pub async fn command(options: LocalsOptions) -> Result<()> {
    let project = open_project(&options.files).await?;
    let functions = project.get_all_functions(&TracingLogger).await?;

    let mut num_found = 0;
    for f in functions.iter().filter(|f| f.name == options.function) {
        num_found += 1;
        let caller_size = project.caller_stack_size(f, &TracingLogger).await?;
        println!(
            "{} (self {}, caller {})",
            f.name,
            show_size(f.self_stack_size),
            show_caller_size(caller_size)
        );

        let diagnostics = CapturingLogger::new();
        for (local, ty) in project.locals(f, &diagnostics).await? {
            let (size, type_name) = match &ty {
                Some(ty) => (ty.byte_size.to_string(), ty.name.as_str()),
                None => ("?".to_string(), "?"),
            };
            println!(
                "    rsp+0x{:<6x} {:>6}  {:<24} {}",
                local.sp_offset, size, type_name, local.name
            );
        }
        print_diagnostics(4, &diagnostics.take());
    }

    if num_found == 0 {
        bail!("No function named {:?} was found.", options.function);
    }
    Ok(())
}
