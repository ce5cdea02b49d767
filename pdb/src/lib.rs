//! Reads Program Database (PDB) files and combines their debug information with that of PE images
//! and COFF object files.
//!
//! The MSF container is decoded by `stacksize-msf`; this crate decodes the streams within it that
//! lead to functions and types: the PDB Info stream, the DBI stream and its Module Info records,
//! and the TPI and IPI streams. [`Project`] ties PDBs, images and object files together.
//!
//! # References
//! * <https://llvm.org/docs/PDB/index.html>
//! * <https://github.com/microsoft/microsoft-pdb>

#![forbid(unused_must_use)]
#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::collapsible_if)]
#![allow(clippy::needless_lifetimes)]

pub mod container;
pub mod dbi;
pub mod pdbi;
pub mod project;
mod stream_index;
pub mod taster;
pub mod tpi;


pub use container::ProjectReader;
pub use project::{
    FileInfo, PdbSummary, Project, ProjectFunction, ProjectLocal, ProjectTypeTable, ProjectTypes,
};
pub use stacksize_codeview as codeview;
pub use stacksize_coff as coff;
pub use stacksize_msf as msf;
pub use stacksize_reader as reader;
pub use stream_index::{NIL_STREAM_INDEX, Stream, StreamIndexU16};
pub use taster::{Flavor, what_flavor};
