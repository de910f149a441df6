use std::fmt;
use std::str::FromStr;

use super::StorageError;
use crate::block::Range;

/// Artifact kinds persisted per module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    /// Full store state from the module's initial block (`.kv`).
    Complete,
    /// Store mutations for a single save-interval window (`.partial`).
    Partial,
    /// Map module output for one window (`.output`).
    Output,
}

impl FileKind {
    pub fn extension(self) -> &'static str {
        match self {
            FileKind::Complete => "kv",
            FileKind::Partial => "partial",
            FileKind::Output => "output",
        }
    }

    fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "kv" => Some(FileKind::Complete),
            "partial" => Some(FileKind::Partial),
            "output" => Some(FileKind::Output),
            _ => None,
        }
    }

    /// Directory under the module prefix holding this kind.
    pub fn directory(self) -> &'static str {
        match self {
            FileKind::Complete | FileKind::Partial => "states",
            FileKind::Output => "outputs",
        }
    }
}

/// Parsed `<10-digit start>-<10-digit end>.<ext>` artifact name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileInfo {
    pub range: Range,
    pub kind: FileKind,
}

impl FileInfo {
    pub fn new(range: Range, kind: FileKind) -> Self {
        Self { range, kind }
    }

    pub fn filename(&self) -> String {
        self.to_string()
    }

    /// Object-store key, e.g. `balances/states/0000000050-0000000060.partial`.
    pub fn path(&self, module: &str) -> String {
        format!("{}{}", module_prefix(module, self.kind), self)
    }
}

/// Listing prefix for one module's artifacts of `kind`.
pub fn module_prefix(module: &str, kind: FileKind) -> String {
    format!("{module}/{}/", kind.directory())
}

impl fmt::Display for FileInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:010}-{:010}.{}",
            self.range.start_block(),
            self.range.exclusive_end_block(),
            self.kind.extension()
        )
    }
}

impl FromStr for FileInfo {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || StorageError::InvalidFilename(s.to_string());
        let (stem, ext) = s.rsplit_once('.').ok_or_else(invalid)?;
        let kind = FileKind::from_extension(ext).ok_or_else(invalid)?;
        let (start, end) = stem.split_once('-').ok_or_else(invalid)?;
        let start = parse_block_number(start).ok_or_else(invalid)?;
        let end = parse_block_number(end).ok_or_else(invalid)?;
        let range = Range::new(start, end).map_err(|_| invalid())?;
        Ok(FileInfo { range, kind })
    }
}

fn parse_block_number(digits: &str) -> Option<u64> {
    if digits.len() != 10 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
