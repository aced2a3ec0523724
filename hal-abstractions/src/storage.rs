//! Named-blob storage
//!
//! Mirrors a small flash filesystem: whole files are written and read back,
//! never patched in place. File handles use the `embedded-io` traits so any
//! byte-stream backend can sit underneath.

use embedded_io::{ErrorType, Read, Write};

/// Metadata available on an open file
pub trait BlobFile: ErrorType {
    /// Stored length of the file in bytes
    fn size(&self) -> usize;
}

/// Named-blob storage backend
///
/// A writer commits its bytes on `flush()`; dropping a writer without
/// flushing may discard them.
pub trait BlobStorage {
    /// Backend specific failure
    type Error;

    /// Readable file handle
    type Reader<'a>: Read + BlobFile
    where
        Self: 'a;

    /// Writable file handle, truncating any previous contents
    type Writer<'a>: Write
    where
        Self: 'a;

    /// Make the backend ready. Cheap to call repeatedly once mounted.
    fn mount(&mut self) -> Result<(), Self::Error>;

    /// Check whether `name` exists
    fn exists(&mut self, name: &str) -> bool;

    /// Open `name` for reading
    fn open_read(&mut self, name: &str) -> Result<Self::Reader<'_>, Self::Error>;

    /// Create or overwrite `name`
    fn open_write(&mut self, name: &str) -> Result<Self::Writer<'_>, Self::Error>;

    /// Delete `name`. Removing a missing file is not an error.
    fn remove(&mut self, name: &str) -> Result<(), Self::Error>;
}
