use std::fmt;

/// Identifies an MSF stream for diagnostics.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum StreamId {
    /// The stream directory, which is itself stored in blocks but has no stream index.
    Directory,
    /// A numbered stream.
    Index(u32),
}

/// Where a byte came from. Only used in log and error messages.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub struct Location {
    /// Absolute offset in the file, if it can be determined.
    pub file_offset: Option<u64>,
    /// The stream and stream-relative offset, if the byte was read through an MSF stream.
    pub stream: Option<(StreamId, u64)>,
}

impl Location {
    /// A location at a known file offset.
    pub fn at_file_offset(file_offset: u64) -> Self {
        Self {
            file_offset: Some(file_offset),
            stream: None,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.stream {
            Some((stream, stream_offset)) => {
                match stream {
                    StreamId::Directory => write!(f, "stream directory")?,
                    StreamId::Index(i) => write!(f, "stream #{i}")?,
                }
                write!(f, " offset 0x{stream_offset:x}")?;
                if let Some(file_offset) = self.file_offset {
                    write!(f, " (file offset 0x{file_offset:x})")?;
                }
                Ok(())
            }
            None => match self.file_offset {
                Some(file_offset) => write!(f, "file offset 0x{file_offset:x}"),
                None => write!(f, "unknown location"),
            },
        }
    }
}
