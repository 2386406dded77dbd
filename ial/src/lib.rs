//! The image abstraction layer: read-only access to disk image files, and the big-endian field
//! helpers shared by every on-disk structure decoder.

use std::{
    fmt, mem,
    io::{self, prelude::*},
    sync::Mutex,
};

/// Interpret `bytes` as a big-endian unsigned integer.
///
/// The slice must be exactly 1, 2, 4 or 8 bytes long. Callers slice directly at fixed field
/// boundaries, so any other length is a bug in the caller and panics.
pub fn read_be_uint(bytes: &[u8]) -> u64 {
    match bytes.len() {
        1 => u64::from(bytes[0]),
        2 => {
            let mut raw = [0u8; mem::size_of::<u16>()];
            raw.copy_from_slice(bytes);
            u64::from(u16::from_be_bytes(raw))
        }
        4 => {
            let mut raw = [0u8; mem::size_of::<u32>()];
            raw.copy_from_slice(bytes);
            u64::from(u32::from_be_bytes(raw))
        }
        8 => {
            let mut raw = [0u8; mem::size_of::<u64>()];
            raw.copy_from_slice(bytes);
            u64::from_be_bytes(raw)
        }
        other => panic!("unsupported big-endian field width: {} bytes", other),
    }
}

pub fn read_be_u64(block: &[u8], offset: usize) -> u64 {
    read_be_uint(&block[offset..offset + mem::size_of::<u64>()])
}
pub fn read_be_u32(block: &[u8], offset: usize) -> u32 {
    read_be_uint(&block[offset..offset + mem::size_of::<u32>()]) as u32
}
pub fn read_be_u16(block: &[u8], offset: usize) -> u16 {
    read_be_uint(&block[offset..offset + mem::size_of::<u16>()]) as u16
}
pub fn read_be_u8(block: &[u8], offset: usize) -> u8 {
    block[offset]
}
pub fn write_be_u64(block: &mut [u8], offset: usize, number: u64) {
    let bytes = number.to_be_bytes();
    block[offset..offset + bytes.len()].copy_from_slice(&bytes)
}
pub fn write_be_u32(block: &mut [u8], offset: usize, number: u32) {
    let bytes = number.to_be_bytes();
    block[offset..offset + bytes.len()].copy_from_slice(&bytes)
}
pub fn write_be_u16(block: &mut [u8], offset: usize, number: u16) {
    let bytes = number.to_be_bytes();
    block[offset..offset + bytes.len()].copy_from_slice(&bytes)
}
pub fn write_be_u8(block: &mut [u8], offset: usize, number: u8) {
    block[offset] = number;
}

/// A trait which allows device I/O errors to get some kind of abstraction.
pub trait IoError: fmt::Debug + fmt::Display + std::error::Error + Send + Sync + 'static {
    /// Returns whether the operations that failed because of this error should retry. This
    /// corresponds to something like EINTR, not EAGAIN or EWOULDBLOCK.
    fn should_retry(&self) -> bool;

    /// Returns whether the device ended before the requested range could be read.
    fn is_unexpected_eof(&self) -> bool {
        false
    }
}

impl IoError for io::Error {
    fn should_retry(&self) -> bool {
        self.kind() == io::ErrorKind::Interrupted
    }
    fn is_unexpected_eof(&self) -> bool {
        self.kind() == io::ErrorKind::UnexpectedEof
    }
}

pub struct DeviceError {
    inner: Box<dyn IoError>,
}
impl DeviceError {
    pub fn inner(&self) -> &dyn IoError {
        &*self.inner
    }
    pub fn is_unexpected_eof(&self) -> bool {
        self.inner.is_unexpected_eof()
    }
}
impl fmt::Debug for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.inner, f)
    }
}
impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.inner, f)
    }
}
impl std::error::Error for DeviceError {}

impl<E: IoError> From<E> for DeviceError {
    fn from(err: E) -> Self {
        Self {
            inner: Box::new(err),
        }
    }
}

/// A readonly image device, such as a disk image file.
///
/// This trait doesn't require a seeking method, since all reads are supposed to be atomic (as in
/// that the seek and read call cannot be divided).
///
/// This trait only uses shared references to self, so it's up to the implementer to use locking,
/// positioned I/O if possible, or single-threaded interior mutability.
pub trait DeviceRo: fmt::Debug {
    /// Read bytes from the device at a specific offset, blocking. All bytes have to be read,
    /// unlike _read(2)_; a device that ends before the buffer is filled fails.
    fn read_blocking(&self, offset: u64, buffer: &mut [u8]) -> Result<(), DeviceError>;

    /// Retrieve the length of the device in bytes.
    fn size_blocking(&self) -> Result<u64, DeviceError>;
}

impl<T: DeviceRo + ?Sized> DeviceRo for &T {
    fn read_blocking(&self, offset: u64, buffer: &mut [u8]) -> Result<(), DeviceError> {
        (**self).read_blocking(offset, buffer)
    }
    fn size_blocking(&self) -> Result<u64, DeviceError> {
        (**self).size_blocking()
    }
}

/// A device backed by anything that can seek and read, such as a [`std::fs::File`] or an
/// in-memory [`std::io::Cursor`].
pub struct BasicDevice<D> {
    device: Mutex<D>,
}
impl<D> BasicDevice<D> {
    pub fn new(inner: D) -> Self {
        Self {
            device: Mutex::new(inner),
        }
    }
}

impl<D> fmt::Debug for BasicDevice<D> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "(device)")
    }
}

impl<D: Read + Seek> BasicDevice<D> {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, D>, DeviceError> {
        self.device
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "device lock poisoned").into())
    }
}

impl<D: Read + Seek> DeviceRo for BasicDevice<D> {
    fn read_blocking(&self, offset: u64, buffer: &mut [u8]) -> Result<(), DeviceError> {
        let mut guard = self.lock()?;

        let _ = guard.seek(io::SeekFrom::Start(offset))?;
        guard.read_exact(buffer)?;

        Ok(())
    }

    fn size_blocking(&self) -> Result<u64, DeviceError> {
        Ok(self.lock()?.seek(io::SeekFrom::End(0))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Cursor;

    #[test]
    fn big_endian_widths() {
        assert_eq!(read_be_uint(&[0xAB]), 0xAB);
        assert_eq!(read_be_uint(&[0x12, 0x34]), 0x1234);
        assert_eq!(read_be_uint(&[0x51, 0x46, 0x49, 0xFB]), 0x5146_49FB);
        assert_eq!(
            read_be_uint(&[0, 0, 0, 0, 0, 0x03, 0x00, 0x00]),
            0x0003_0000
        );
        assert_eq!(read_be_uint(&[0xFF; 8]), u64::max_value());
    }

    #[test]
    #[should_panic]
    fn odd_width_is_a_caller_bug() {
        read_be_uint(&[0, 0, 0]);
    }

    #[test]
    fn offset_helpers() {
        let mut block = [0u8; 16];
        write_be_u64(&mut block, 0, 0x0102_0304_0506_0708);
        write_be_u32(&mut block, 8, 0xDEAD_BEEF);
        write_be_u16(&mut block, 12, 0x0A0B);
        write_be_u8(&mut block, 14, 0x7F);

        assert_eq!(block[..8], [1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(read_be_u64(&block, 0), 0x0102_0304_0506_0708);
        assert_eq!(read_be_u32(&block, 8), 0xDEAD_BEEF);
        assert_eq!(read_be_u16(&block, 12), 0x0A0B);
        assert_eq!(read_be_u8(&block, 14), 0x7F);
        assert_eq!(read_be_u8(&block, 15), 0);
    }

    #[test]
    fn basic_device_reads_at_offsets() {
        let device = BasicDevice::new(Cursor::new((0u8..=255).collect::<Vec<_>>()));
        assert_eq!(device.size_blocking().unwrap(), 256);

        let mut buffer = [0u8; 4];
        device.read_blocking(100, &mut buffer).unwrap();
        assert_eq!(buffer, [100, 101, 102, 103]);

        device.read_blocking(0, &mut buffer).unwrap();
        assert_eq!(buffer, [0, 1, 2, 3]);
    }

    #[test]
    fn short_device_reports_eof() {
        let device = BasicDevice::new(Cursor::new(vec![0u8; 10]));
        let mut buffer = [0u8; 8];
        let err = device.read_blocking(4, &mut buffer).unwrap_err();
        assert!(err.is_unexpected_eof());
        assert!(!err.inner().should_retry());
    }
}
