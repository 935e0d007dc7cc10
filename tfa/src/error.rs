use thiserror::Error;

/// Failures raised while packing or unpacking a TFA archive.
#[derive(Debug, Error)]
pub enum TfaError {
    /// An entry's relative path cannot be represented in a 100+155 byte
    /// USTAR name/prefix pair.
    #[error("entry name is too long to encode: {0:?}")]
    EntryTooLong(String),

    /// A decoded entry's relative path escapes the destination directory,
    /// e.g. via a `..` component or an absolute path.
    #[error("entry path is unsafe: {0:?}")]
    UnsafePath(String),

    /// The accumulated header block failed its checksum, or carried a magic
    /// other than `ustar`.
    #[error("corrupt archive header")]
    CorruptHeader,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
