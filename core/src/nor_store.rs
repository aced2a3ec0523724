//! Named-blob storage on one erase block of NOR flash
//!
//! The block holds a single blob. A write buffers the new contents in RAM and
//! on `flush()` erases the block and programs one image:
//!
//! | offset | size | field                                   |
//! |--------|------|-----------------------------------------|
//! | 0      | 4    | magic `b"BLOB"`                         |
//! | 4      | 2    | data length, little-endian              |
//! | 6      | 1    | name length                             |
//! | 7      | 1    | checksum over name and data             |
//! | 8      | 32   | name, 0xFF padded                       |
//! | 40     | 256  | data, 0xFF padded                       |
//!
//! An erased block reads as empty; a checksum mismatch makes the blob
//! unreadable so the caller can rewrite it.

use embedded_io::{ErrorKind, ErrorType, Read, Write};
use embedded_storage::nor_flash::NorFlash;
use hal_abstractions::storage::{BlobFile, BlobStorage};

pub const MAX_NAME_LEN: usize = 32;
pub const MAX_BLOB_LEN: usize = 256;

const MAGIC: [u8; 4] = *b"BLOB";
const HEADER_LEN: usize = 8;
const NAME_OFFSET: usize = HEADER_LEN;
const DATA_OFFSET: usize = NAME_OFFSET + MAX_NAME_LEN;
const IMAGE_LEN: usize = DATA_OFFSET + MAX_BLOB_LEN;

/// Flash blob store errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NorStoreError {
    /// Block offset is unaligned or past the end of flash
    OutOfBounds,
    /// Name longer than [`MAX_NAME_LEN`]
    NameTooLong,
    /// No blob with that name
    NotFound,
    /// Stored checksum does not match
    Corrupt,
    /// Flash driver reported an error
    Flash,
}

impl core::fmt::Display for NorStoreError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::OutOfBounds => write!(f, "block out of bounds"),
            Self::NameTooLong => write!(f, "name too long"),
            Self::NotFound => write!(f, "not found"),
            Self::Corrupt => write!(f, "checksum mismatch"),
            Self::Flash => write!(f, "flash error"),
        }
    }
}

impl core::error::Error for NorStoreError {}

impl embedded_io::Error for NorStoreError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound => ErrorKind::NotFound,
            Self::NameTooLong => ErrorKind::InvalidInput,
            Self::Corrupt => ErrorKind::InvalidData,
            Self::OutOfBounds | Self::Flash => ErrorKind::Other,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Header {
    data_len: usize,
    name_len: usize,
    checksum: u8,
}

/// Single-blob store on the erase block at `offset`
pub struct NorBlobStore<F> {
    flash: F,
    offset: u32,
}

impl<F: NorFlash> NorBlobStore<F> {
    /// `offset` must be the start of an erase block
    pub fn new(flash: F, offset: u32) -> Self {
        Self { flash, offset }
    }

    pub fn into_inner(self) -> F {
        self.flash
    }

    fn read_header(&mut self) -> Result<Option<Header>, NorStoreError> {
        let mut header = [0u8; HEADER_LEN];
        self.flash
            .read(self.offset, &mut header)
            .map_err(|_| NorStoreError::Flash)?;
        if header[..4] != MAGIC {
            return Ok(None);
        }
        let data_len = usize::from(u16::from_le_bytes([header[4], header[5]]));
        let name_len = usize::from(header[6]);
        if data_len > MAX_BLOB_LEN || name_len > MAX_NAME_LEN {
            return Err(NorStoreError::Corrupt);
        }
        Ok(Some(Header {
            data_len,
            name_len,
            checksum: header[7],
        }))
    }

    /// Header of the stored blob if it is called `name`
    fn locate(&mut self, name: &str) -> Result<Header, NorStoreError> {
        let header = self.read_header()?.ok_or(NorStoreError::NotFound)?;
        let mut stored = [0u8; MAX_NAME_LEN];
        self.flash
            .read(
                self.offset + NAME_OFFSET as u32,
                &mut stored[..header.name_len],
            )
            .map_err(|_| NorStoreError::Flash)?;
        if &stored[..header.name_len] != name.as_bytes() {
            return Err(NorStoreError::NotFound);
        }
        Ok(header)
    }

    fn verify(&mut self, header: &Header) -> Result<(), NorStoreError> {
        let mut image = [0u8; IMAGE_LEN - HEADER_LEN];
        self.flash
            .read(self.offset + NAME_OFFSET as u32, &mut image)
            .map_err(|_| NorStoreError::Flash)?;
        let name = &image[..header.name_len];
        let data = &image[MAX_NAME_LEN..MAX_NAME_LEN + header.data_len];
        if checksum8(name, data) != header.checksum {
            return Err(NorStoreError::Corrupt);
        }
        Ok(())
    }

    fn erase_block(&mut self) -> Result<(), NorStoreError> {
        self.flash
            .erase(self.offset, self.offset + F::ERASE_SIZE as u32)
            .map_err(|_| NorStoreError::Flash)
    }

    fn commit(&mut self, name: &[u8], data: &[u8]) -> Result<(), NorStoreError> {
        let mut image = [0xFFu8; IMAGE_LEN];
        image[..4].copy_from_slice(&MAGIC);
        image[4..6].copy_from_slice(&(data.len() as u16).to_le_bytes());
        image[6] = name.len() as u8;
        image[7] = checksum8(name, data);
        image[NAME_OFFSET..NAME_OFFSET + name.len()].copy_from_slice(name);
        image[DATA_OFFSET..DATA_OFFSET + data.len()].copy_from_slice(data);

        self.erase_block()?;
        self.flash
            .write(self.offset, &image)
            .map_err(|_| NorStoreError::Flash)
    }
}

impl<F: NorFlash> BlobStorage for NorBlobStore<F> {
    type Error = NorStoreError;
    type Reader<'a>
        = NorReader<'a, F>
    where
        Self: 'a;
    type Writer<'a>
        = NorWriter<'a, F>
    where
        Self: 'a;

    fn mount(&mut self) -> Result<(), NorStoreError> {
        let start = self.offset as usize;
        if start % F::ERASE_SIZE != 0
            || IMAGE_LEN > F::ERASE_SIZE
            || start + F::ERASE_SIZE > self.flash.capacity()
        {
            return Err(NorStoreError::OutOfBounds);
        }
        Ok(())
    }

    fn exists(&mut self, name: &str) -> bool {
        self.locate(name).is_ok()
    }

    fn open_read(&mut self, name: &str) -> Result<NorReader<'_, F>, NorStoreError> {
        let header = self.locate(name)?;
        self.verify(&header)?;
        Ok(NorReader {
            flash: &mut self.flash,
            start: self.offset + DATA_OFFSET as u32,
            len: header.data_len,
            pos: 0,
        })
    }

    fn open_write(&mut self, name: &str) -> Result<NorWriter<'_, F>, NorStoreError> {
        let name = heapless::String::try_from(name).map_err(|_| NorStoreError::NameTooLong)?;
        Ok(NorWriter {
            store: self,
            name,
            data: heapless::Vec::new(),
        })
    }

    fn remove(&mut self, name: &str) -> Result<(), NorStoreError> {
        match self.locate(name) {
            Ok(_) => self.erase_block(),
            Err(NorStoreError::NotFound) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Streams a verified blob out of flash
pub struct NorReader<'a, F> {
    flash: &'a mut F,
    start: u32,
    len: usize,
    pos: usize,
}

impl<F> ErrorType for NorReader<'_, F> {
    type Error = NorStoreError;
}

impl<F: NorFlash> Read for NorReader<'_, F> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, NorStoreError> {
        let n = buf.len().min(self.len - self.pos);
        if n == 0 {
            return Ok(0);
        }
        self.flash
            .read(self.start + self.pos as u32, &mut buf[..n])
            .map_err(|_| NorStoreError::Flash)?;
        self.pos += n;
        Ok(n)
    }
}

impl<F: NorFlash> BlobFile for NorReader<'_, F> {
    fn size(&self) -> usize {
        self.len
    }
}

/// Buffers a blob in RAM; `flush` programs it
pub struct NorWriter<'a, F> {
    store: &'a mut NorBlobStore<F>,
    name: heapless::String<MAX_NAME_LEN>,
    data: heapless::Vec<u8, MAX_BLOB_LEN>,
}

impl<F> ErrorType for NorWriter<'_, F> {
    type Error = NorStoreError;
}

impl<F: NorFlash> Write for NorWriter<'_, F> {
    /// Accepts bytes until the blob is full, then returns `Ok(0)`
    fn write(&mut self, buf: &[u8]) -> Result<usize, NorStoreError> {
        let n = buf.len().min(MAX_BLOB_LEN - self.data.len());
        // Cannot fail: n is bounded by the remaining capacity
        let _ = self.data.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> Result<(), NorStoreError> {
        self.store.commit(self.name.as_bytes(), &self.data)
    }
}

fn checksum8(name: &[u8], data: &[u8]) -> u8 {
    let mut acc = 0x5Au8;
    for &byte in name.iter().chain(data) {
        acc ^= byte.rotate_left(1);
        acc = acc.rotate_left(1);
    }
    acc
}
