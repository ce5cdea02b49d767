//! Combines functions and types from a set of input files.
//!
//! A [`Project`] holds PDB files, PE images and COFF object files. Functions are collected from
//! every input; types come from a PDB if one was added, otherwise from an object file's
//! `.debug$T` section. This lets an unlinked object file be paired with the PDB that its
//! compiler wrote types to.
//!
//! All decoding runs inside load scopes over the readers of every input file, so input files are
//! only read as far as needed. Results are cached. A value is cached only once the load scope that
//! computed it has completed, so a scope that is retried never leaves partial results behind.
//!
//! A file or module that cannot be decoded is reported to the logger and skipped; the other
//! inputs are still used.

use crate::dbi::{DbiStream, ModuleInfo, parse_dbi_stream};
use crate::pdbi::{PdbInfo, parse_pdbi_stream};
use crate::tpi::{TypeStream, TypeStreamInfo, parse_tpi_stream};
use crate::{Flavor, ProjectReader, Stream, what_flavor};
use anyhow::{Result, bail};
use stacksize_codeview::{
    Function, Local, Type, TypeTable, TypesOutcome, parse_types_section, scan_functions,
    scan_module_symbols,
};
use stacksize_coff::{CoffFile, PdbReference, Section};
use stacksize_msf::{BlocksReader, SuperBlock, parse_stream_directory, parse_superblock};
use stacksize_reader::{
    Location, Logger, PagedReader, Reader, SubReader, is_fault, with_load_scope,
};
use std::cell::OnceCell;
use std::fmt;
use tracing::{debug, trace};

/// A function found in any of a project's files.
pub type ProjectFunction = Function<ProjectReader>;

/// A local found in any of a project's files.
pub type ProjectLocal = Local<ProjectReader>;

/// A type table from a PDB type stream or a `.debug$T` section.
pub type ProjectTypeTable = TypeTable<SubReader<ProjectReader>>;

/// The type information a project found: a table, or a reference to a PDB that was not added.
pub type ProjectTypes = TypesOutcome<SubReader<ProjectReader>>;

/// A set of input files whose debug information is combined.
#[derive(Default)]
pub struct Project {
    files: Vec<ProjectFile>,
    cached: ProjectCache,
}

/// Results derived from all files. Reset whenever a file is added.
#[derive(Default)]
struct ProjectCache {
    functions: OnceCell<Vec<ProjectFunction>>,
    type_table: OnceCell<Option<ProjectTypes>>,
    type_index_table: OnceCell<Option<ProjectTypes>>,
}

struct ProjectFile {
    name: String,
    reader: PagedReader,
    kind: OnceCell<FileKind>,
}

enum FileKind {
    Pdb(PdbFile),
    Coff(CoffFile),
    /// Recognized, but its headers could not be decoded.
    Damaged(Flavor),
    Unknown,
}

impl FileKind {
    fn flavor(&self) -> Option<Flavor> {
        match self {
            Self::Pdb(_) => Some(Flavor::Pdb),
            Self::Coff(coff) => Some(match coff.kind {
                stacksize_coff::CoffKind::Pe => Flavor::Pe,
                stacksize_coff::CoffKind::Object => Flavor::Coff,
            }),
            Self::Damaged(flavor) => Some(*flavor),
            Self::Unknown => None,
        }
    }
}

/// The MSF layer of a PDB file, plus the streams decoded from it so far.
struct PdbFile {
    superblock: SuperBlock,
    streams: Vec<BlocksReader<PagedReader>>,
    info: OnceCell<Option<PdbInfo>>,
    dbi: OnceCell<DbiStream>,
    tpi: OnceCell<Option<TypeStream<ProjectReader>>>,
    ipi: OnceCell<Option<TypeStream<ProjectReader>>>,
}

impl PdbFile {
    fn open(reader: &PagedReader) -> Result<Self> {
        let Some(superblock) = parse_superblock(reader)? else {
            bail!("The file does not start with the MSF signature.");
        };
        let streams = parse_stream_directory(reader, &superblock)?;
        debug!(
            block_size = superblock.block_size,
            num_streams = streams.len(),
            "opened PDB"
        );
        Ok(Self {
            superblock,
            streams,
            info: OnceCell::new(),
            dbi: OnceCell::new(),
            tpi: OnceCell::new(),
            ipi: OnceCell::new(),
        })
    }

    /// A reader for stream `stream`, or `None` if there is no such stream.
    fn stream(&self, stream: u32) -> Option<ProjectReader> {
        self.streams
            .get(stream as usize)
            .map(|s| ProjectReader::Stream(s.clone()))
    }

    fn type_stream_cell(&self, stream: Stream) -> &OnceCell<Option<TypeStream<ProjectReader>>> {
        if stream == Stream::IPI {
            &self.ipi
        } else {
            &self.tpi
        }
    }
}

/// A summary of one input file, for display.
#[derive(Clone, Debug)]
pub struct FileInfo {
    #[allow(missing_docs)]
    pub name: String,
    /// `None` if the file was not recognized.
    pub flavor: Option<Flavor>,
    /// The section table of a PE image or object file.
    pub sections: Vec<Section>,
    /// The PDB that a PE image names in its debug directory.
    pub pdb_reference: Option<PdbReference>,
    /// Present for PDB files.
    pub pdb: Option<PdbSummary>,
}

/// What is known about a PDB file.
#[derive(Clone, Debug)]
pub struct PdbSummary {
    #[allow(missing_docs)]
    pub block_size: u32,
    #[allow(missing_docs)]
    pub num_streams: usize,
    /// The contents of the PDB Info stream, if the PDB has one.
    pub info: Option<PdbInfo>,
    #[allow(missing_docs)]
    pub modules: Vec<ModuleInfo>,
    /// The header of the TPI stream.
    pub tpi: Option<TypeStreamInfo>,
    /// The header of the IPI stream.
    pub ipi: Option<TypeStreamInfo>,
}

/// Returns the value in `cell`, computing it with `init` if the cell is empty.
///
/// Nothing is stored if `init` fails.
async fn get_or_init_async<'c, T>(
    cell: &'c OnceCell<T>,
    init: impl Future<Output = Result<T>>,
) -> Result<&'c T> {
    if let Some(value) = cell.get() {
        return Ok(value);
    }
    let value = init.await?;
    Ok(cell.get_or_init(|| value))
}

/// Sends the error of a failed step to `logger`, prefixed with `context`, and returns `Ok(None)`
/// so that the caller can carry on with its other inputs. Faults are still returned as errors.
fn skip_on_error<T>(
    result: Result<T>,
    context: impl fmt::Display,
    logger: &dyn Logger,
) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if is_fault(&e) => Err(e),
        Err(e) => {
            logger.log(&format!("{context}: {e:#}"), &Location::default());
            Ok(None)
        }
    }
}

impl Project {
    /// Creates an empty project.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an input file. `name` is only used in messages.
    ///
    /// Files are not read until their contents are needed. Functions and types that were
    /// already collected are discarded, since the new file may contribute to them.
    pub fn add_file(&mut self, name: impl Into<String>, reader: PagedReader) {
        let name = name.into();
        debug!(%name, "adding file to project");
        self.files.push(ProjectFile {
            name,
            reader,
            kind: OnceCell::new(),
        });
        self.cached = ProjectCache::default();
    }

    /// The number of files added.
    pub fn num_files(&self) -> usize {
        self.files.len()
    }

    /// Runs `f` in a load scope over the readers of every file in this project.
    ///
    /// See [`with_load_scope`]. Any reader derived from this project's functions, locals or type
    /// tables can be used inside `f`.
    pub async fn load_scope<T>(
        &self,
        logger: &dyn Logger,
        f: impl FnMut(&dyn Logger) -> Result<T>,
    ) -> Result<T> {
        let readers: Vec<&PagedReader> = self.files.iter().map(|file| &file.reader).collect();
        with_load_scope(&readers, logger, f).await
    }

    /// Determines what kind of file `file` is, and decodes its headers.
    async fn kind<'p>(
        &'p self,
        file: &'p ProjectFile,
        logger: &dyn Logger,
    ) -> Result<&'p FileKind> {
        get_or_init_async(&file.kind, async {
            let reader = &file.reader;
            let flavor = self.load_scope(logger, |_| what_flavor(reader)).await;
            let flavor = match skip_on_error(flavor, &file.name, logger)? {
                Some(Some(flavor)) => flavor,
                Some(None) => {
                    logger.log(
                        &format!(
                            "{}: not a PDB file, PE image or x64 COFF object file",
                            file.name
                        ),
                        &Location::at_file_offset(0),
                    );
                    return Ok(FileKind::Unknown);
                }
                None => return Ok(FileKind::Unknown),
            };

            let opened = self
                .load_scope(logger, |_| {
                    Ok(match flavor {
                        Flavor::Pdb => FileKind::Pdb(PdbFile::open(reader)?),
                        Flavor::Pe | Flavor::Coff => match stacksize_coff::parse(reader)? {
                            Some(coff) => FileKind::Coff(coff),
                            None => FileKind::Unknown,
                        },
                    })
                })
                .await;
            let kind = skip_on_error(opened, &file.name, logger)?
                .unwrap_or(FileKind::Damaged(flavor));
            debug!(name = %file.name, %flavor, "identified file");
            Ok(kind)
        })
        .await
    }

    async fn dbi<'p>(&self, pdb: &'p PdbFile, logger: &dyn Logger) -> Result<&'p DbiStream> {
        get_or_init_async(&pdb.dbi, async {
            let Some(stream) = pdb.stream(Stream::DBI.into()) else {
                return Ok(DbiStream::default());
            };
            let dbi = self.load_scope(logger, |l| parse_dbi_stream(&stream, l)).await;
            Ok(skip_on_error(dbi, "DBI stream", logger)?.unwrap_or_default())
        })
        .await
    }

    async fn pdb_info<'p>(
        &self,
        pdb: &'p PdbFile,
        logger: &dyn Logger,
    ) -> Result<Option<&'p PdbInfo>> {
        let info = get_or_init_async(&pdb.info, async {
            let Some(stream) = pdb.stream(Stream::PDB.into()) else {
                return Ok(None);
            };
            let info = self.load_scope(logger, |_| parse_pdbi_stream(&stream)).await;
            skip_on_error(info, "PDB info stream", logger)
        })
        .await?;
        Ok(info.as_ref())
    }

    async fn type_stream<'p>(
        &self,
        pdb: &'p PdbFile,
        which: Stream,
        logger: &dyn Logger,
    ) -> Result<Option<&'p TypeStream<ProjectReader>>> {
        let ts = get_or_init_async(pdb.type_stream_cell(which), async {
            let Some(stream) = pdb.stream(which.into()) else {
                return Ok(None);
            };
            let header = self.load_scope(logger, |_| parse_tpi_stream(&stream)).await;
            Ok(skip_on_error(header, format!("stream {which}"), logger)?.flatten())
        })
        .await?;
        Ok(ts.as_ref())
    }

    /// Finds the functions in every file.
    ///
    /// PDB functions come from the Module Streams that the DBI stream lists. PE image and object
    /// file functions come from their `.debug$S` sections.
    pub async fn get_all_functions(&self, logger: &dyn Logger) -> Result<&[ProjectFunction]> {
        let functions =
            get_or_init_async(&self.cached.functions, self.collect_functions(logger)).await?;
        Ok(functions)
    }

    async fn collect_functions(&self, logger: &dyn Logger) -> Result<Vec<ProjectFunction>> {
        let mut functions = Vec::new();
        for file in self.files.iter() {
            match self.kind(file, logger).await? {
                FileKind::Pdb(pdb) => {
                    let dbi = self.dbi(pdb, logger).await?;
                    for module in dbi.modules.iter() {
                        let Some(stream_index) = module.stream else {
                            trace!(name = %module.module_name, "module has no stream");
                            continue;
                        };
                        let Some(stream) = pdb.stream(stream_index) else {
                            logger.log(
                                &format!(
                                    "module {} has stream {stream_index}, which does not exist",
                                    module.module_name
                                ),
                                &Location::default(),
                            );
                            continue;
                        };
                        let found = self
                            .load_scope(logger, |l| {
                                scan_module_symbols(&stream, module.sym_byte_size, l)
                            })
                            .await;
                        let context = format!("module {}", module.module_name);
                        match skip_on_error(found, context, logger)? {
                            Some(Some(found)) => functions.extend(found),
                            Some(None) => debug!(
                                name = %module.module_name,
                                "module stream does not start with the CodeView signature"
                            ),
                            None => {}
                        }
                    }
                }
                FileKind::Coff(coff) => {
                    let file_reader = ProjectReader::File(file.reader.clone());
                    for section in coff.section_readers(&file_reader, ".debug$S") {
                        let found = self
                            .load_scope(logger, |l| scan_functions(&section, l))
                            .await;
                        let context = format!("{}: .debug$S section", file.name);
                        match skip_on_error(found, context, logger)? {
                            Some(Some(found)) => functions.extend(found),
                            Some(None) => debug!(
                                name = %file.name,
                                "`.debug$S` section does not start with the CodeView signature"
                            ),
                            None => {}
                        }
                    }
                }
                FileKind::Damaged(_) | FileKind::Unknown => {}
            }
        }
        debug!(num_functions = functions.len(), "collected functions");
        Ok(functions)
    }

    /// The table that function types and local types are resolved in.
    ///
    /// This is the TPI stream of the first PDB, whatever order the files were added in. Without a
    /// PDB it is the first `.debug$T` section that holds records. If the only `.debug$T` sections
    /// point to a PDB that was not added, the returned outcome is
    /// [`TypesOutcome::SeparatePdb`]. Returns `Ok(None)` if no file has types.
    pub async fn get_type_table(&self, logger: &dyn Logger) -> Result<Option<&ProjectTypes>> {
        let types = get_or_init_async(
            &self.cached.type_table,
            self.find_types(Stream::TPI, logger),
        )
        .await?;
        Ok(types.as_ref())
    }

    /// The table that `S_GPROC32_ID` item IDs are resolved in.
    ///
    /// This is the IPI stream of the first PDB. Object files keep item IDs in the same
    /// `.debug$T` section as types, so without a PDB this is the same as
    /// [`Project::get_type_table`].
    pub async fn get_type_index_table(
        &self,
        logger: &dyn Logger,
    ) -> Result<Option<&ProjectTypes>> {
        let types = get_or_init_async(
            &self.cached.type_index_table,
            self.find_types(Stream::IPI, logger),
        )
        .await?;
        Ok(types.as_ref())
    }

    async fn find_types(&self, which: Stream, logger: &dyn Logger) -> Result<Option<ProjectTypes>> {
        for file in self.files.iter() {
            let FileKind::Pdb(pdb) = self.kind(file, logger).await? else {
                continue;
            };
            let Some(type_stream) = self.type_stream(pdb, which, logger).await? else {
                debug!(name = %file.name, stream = %which, "PDB has no type stream");
                return Ok(None);
            };
            let types = self
                .load_scope(logger, |l| type_stream.parse_types(l))
                .await;
            let context = format!("{}: stream {which}", file.name);
            if let Some(types) = skip_on_error(types, context, logger)? {
                debug!(name = %file.name, stream = %which, "using types from PDB");
                return Ok(Some(types));
            }
        }

        let mut separate_pdb = None;
        for file in self.files.iter() {
            let FileKind::Coff(coff) = self.kind(file, logger).await? else {
                continue;
            };
            let file_reader = ProjectReader::File(file.reader.clone());
            for section in coff.section_readers(&file_reader, ".debug$T") {
                let types = self
                    .load_scope(logger, |l| parse_types_section(&section, l))
                    .await;
                let context = format!("{}: .debug$T section", file.name);
                match skip_on_error(types, context, logger)? {
                    Some(Some(TypesOutcome::Table(table))) => {
                        debug!(
                            name = %file.name,
                            num_types = table.len(),
                            "using types from object file"
                        );
                        return Ok(Some(TypesOutcome::Table(table)));
                    }
                    Some(Some(TypesOutcome::SeparatePdb(server))) => {
                        if separate_pdb.is_none() {
                            separate_pdb = Some(server);
                        }
                    }
                    Some(None) => debug!(
                        name = %file.name,
                        "`.debug$T` section does not start with the CodeView signature"
                    ),
                    None => {}
                }
            }
        }
        Ok(separate_pdb.map(TypesOutcome::SeparatePdb))
    }

    /// Computes the caller stack size of `function` using this project's type tables.
    ///
    /// Returns `-1` if the size cannot be determined, including when the types are in a PDB that
    /// was not added; the reason is sent to `logger`.
    pub async fn caller_stack_size(
        &self,
        function: &ProjectFunction,
        logger: &dyn Logger,
    ) -> Result<i64> {
        let location = function.reader.locate(function.byte_offset);
        let type_table = match self.get_type_table(logger).await? {
            Some(TypesOutcome::Table(table)) => table,
            Some(TypesOutcome::SeparatePdb(server)) => {
                logger.log(
                    &format!(
                        "types are in a separate PDB: {} ({} age {})",
                        server.path, server.guid, server.age
                    ),
                    &location,
                );
                return Ok(-1);
            }
            None => {
                logger.log("no type information found", &location);
                return Ok(-1);
            }
        };
        let type_index_table = match self.get_type_index_table(logger).await? {
            Some(TypesOutcome::Table(table)) => Some(table),
            _ => None,
        };
        self.load_scope(logger, |l| {
            function.caller_stack_size(type_table, type_index_table, l)
        })
        .await
    }

    /// The parameters and locals of `function`, each with its type if it could be resolved.
    pub async fn locals(
        &self,
        function: &ProjectFunction,
        logger: &dyn Logger,
    ) -> Result<Vec<(ProjectLocal, Option<Type>)>> {
        let locals = self.load_scope(logger, |l| function.locals(l)).await?;
        let type_table = match self.get_type_table(logger).await? {
            Some(TypesOutcome::Table(table)) => Some(table),
            _ => None,
        };
        let types = self
            .load_scope(logger, |l| {
                locals
                    .iter()
                    .map(|local| match type_table {
                        Some(table) => local.get_type(table, l),
                        None => Ok(None),
                    })
                    .collect::<Result<Vec<_>>>()
            })
            .await?;
        Ok(locals.into_iter().zip(types).collect())
    }

    /// Maps a function's code location to an offset in the file that holds the code.
    ///
    /// Only functions found in a PE image or object file have one; PDB functions describe code
    /// in an image that is not part of the PDB.
    pub async fn code_file_offset(
        &self,
        function: &ProjectFunction,
        logger: &dyn Logger,
    ) -> Result<Option<u64>> {
        let Some(section_index) = function.code_section_index else {
            return Ok(None);
        };
        let source = function.reader.base().source();
        for file in self.files.iter() {
            if file.reader.source_id() != source.source_id() {
                continue;
            }
            if let FileKind::Coff(coff) = self.kind(file, logger).await? {
                return Ok(coff.code_file_offset(section_index, function.code_offset));
            }
        }
        Ok(None)
    }

    /// Describes every file in the project.
    pub async fn file_info(&self, logger: &dyn Logger) -> Result<Vec<FileInfo>> {
        let mut infos = Vec::with_capacity(self.files.len());
        for file in self.files.iter() {
            let kind = self.kind(file, logger).await?;
            let mut info = FileInfo {
                name: file.name.clone(),
                flavor: kind.flavor(),
                sections: Vec::new(),
                pdb_reference: None,
                pdb: None,
            };
            match kind {
                FileKind::Pdb(pdb) => {
                    let pdb_info = self.pdb_info(pdb, logger).await?.cloned();
                    let modules = self.dbi(pdb, logger).await?.modules.clone();
                    let tpi = self.type_stream(pdb, Stream::TPI, logger).await?;
                    let ipi = self.type_stream(pdb, Stream::IPI, logger).await?;
                    info.pdb = Some(PdbSummary {
                        block_size: pdb.superblock.block_size,
                        num_streams: pdb.streams.len(),
                        info: pdb_info,
                        modules,
                        tpi: tpi.map(|t| t.info.clone()),
                        ipi: ipi.map(|t| t.info.clone()),
                    });
                }
                FileKind::Coff(coff) => {
                    info.sections = coff.sections.clone();
                    let reader = &file.reader;
                    let reference = self
                        .load_scope(logger, |_| coff.pdb_reference(reader))
                        .await;
                    let context = format!("{}: debug directory", file.name);
                    info.pdb_reference = skip_on_error(reference, context, logger)?.flatten();
                }
                FileKind::Damaged(_) | FileKind::Unknown => {}
            }
            infos.push(info);
        }
        Ok(infos)
    }
}
