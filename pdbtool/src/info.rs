use crate::util::open_project;
use anyhow::Result;
use stacksize_pdb::reader::TracingLogger;
use stacksize_pdb::{FileInfo, PdbSummary};
use std::path::PathBuf;

/// Describes PDB files, PE images and object files.
#[derive(clap::Parser)]
pub struct InfoOptions {
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

pub async fn command(options: InfoOptions) -> Result<()> {
    let project = open_project(&options.files).await?;
    for file in project.file_info(&TracingLogger).await? {
        show_file(&file);
    }
    Ok(())
}

fn show_file(file: &FileInfo) {
    match file.flavor {
        Some(flavor) => println!("{}: {flavor}", file.name),
        None => {
            println!("{}: not recognized", file.name);
            return;
        }
    }

    if let Some(pdb) = &file.pdb {
        show_pdb(pdb);
    }

    if !file.sections.is_empty() {
        println!("    sections:");
        for (i, s) in file.sections.iter().enumerate() {
            println!(
                "    [{i:3}] {:<8}  rva 0x{:08x}  file offset 0x{:08x}  size 0x{:08x}  {:?}",
                s.name, s.virtual_address, s.data_offset, s.data_size, s.characteristics
            );
        }
    }

    if let Some(r) = &file.pdb_reference {
        println!("    PDB: {}", r.path);
        println!("         {} age {}", r.guid, r.age);
    }
}

fn show_pdb(pdb: &PdbSummary) {
    println!(
        "    block size: {}, streams: {}",
        pdb.block_size, pdb.num_streams
    );
    if let Some(info) = &pdb.info {
        println!("    PDB info: {info}");
    }
    for (name, stream) in [("TPI", &pdb.tpi), ("IPI", &pdb.ipi)] {
        if let Some(s) = stream {
            println!(
                "    {name}: type indexes {}..{}, {} bytes of records",
                s.type_index_begin, s.type_index_end, s.type_record_bytes
            );
        }
    }
    if !pdb.modules.is_empty() {
        println!("    modules:");
        for m in pdb.modules.iter() {
            let stream = match m.stream {
                Some(s) => s.to_string(),
                None => "-".to_string(),
            };
            println!(
                "    [{:4}] stream {:>5}  symbols {:>8} bytes  {}",
                m.index, stream, m.sym_byte_size, m.module_name
            );
        }
    }
}
