use std::path::PathBuf;

/// A class binary that could not be decoded. Always local to one file or entry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedClassError {
    #[error("Not a class file (bad magic number).")]
    BadMagic,

    #[error("Class file is truncated at offset {0}.")]
    Truncated(usize),

    #[error("Invalid constant pool: {0}")]
    BadConstantPool(String),

    #[error("Class file has {0} unexpected trailing bytes.")]
    TrailingBytes(usize),

    #[error("Invalid Code attribute: {0}")]
    BadCode(String),

    #[error("Invalid class structure at offset {0}.")]
    Invalid(usize),
}

/// Fatal configuration problems, reported once before any processing starts.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required {0} path.")]
    MissingPath(&'static str),

    #[error("Only one of --all, --classfiles and --archives can be used.")]
    ConflictingScope,

    #[error("Unknown keep option: '{0}'")]
    UnknownKeep(String),

    #[error("Output path must be a directory. Path: '{}'", .0.display())]
    OutputNotDirectory(PathBuf),

    #[error("Could not create output directory. Path: '{}'", .1.display())]
    OutputNotCreatable(#[source] std::io::Error, PathBuf),

    #[error("Input path does not exist. Path: '{}'", .0.display())]
    MissingInput(PathBuf),
}

/// Failures of an archive stream itself, as opposed to a single entry inside it.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("Could not open archive '{1}'.")]
    Open(#[source] zip::result::ZipError, String),

    #[error("Could not read entry '{1}'.")]
    Read(#[source] std::io::Error, String),

    #[error("Could not read entry '{1}'.")]
    Entry(#[source] zip::result::ZipError, String),

    #[error("Could not start entry '{1}'.")]
    StartEntry(#[source] zip::result::ZipError, String),

    #[error("Could not write entry '{1}'.")]
    Write(#[source] std::io::Error, String),

    #[error("Could not finish archive '{1}'.")]
    Finish(#[source] zip::result::ZipError, String),

    #[error("Nested archive '{0}' exceeds the maximum nesting depth of {1}.")]
    NestingTooDeep(String, usize),
}
