//! Estimating the image end offset from the refcount structures.
//!
//! The refcount table is an array of big-endian `u64` offsets, each pointing to a refcount block
//! of one cluster. A refcount block is an array of big-endian counters, one per cluster of the
//! image, each `1 << refcount_order` bits wide.
//!
//! The estimate assumes that allocation is dense from the start of the image: every refcount
//! block before the last one referenced by the table is counted as completely full, and only the
//! last block is actually read, up to its first zero counter. Zero table entries and zero
//! counters both terminate the scan, even if nonzero entries follow them.

use ial::{read_be_uint, DeviceError, DeviceRo};
use quick_error::quick_error;

use crate::header::Header;

/// The refcount structures are read in windows of this many bytes.
pub const READ_WINDOW: usize = 512;

/// Refcount table entries are always 64 bits, regardless of the refcount order.
pub const TABLE_ENTRY_LEN: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReadErrorPolicy {
    /// Fail the scan with [`ScanError::Io`].
    Propagate,
    /// Stop scanning at the unreadable window and keep the total accumulated so far.
    Truncate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ScanOptions {
    pub on_read_error: ReadErrorPolicy,
}
impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            on_read_error: ReadErrorPolicy::Propagate,
        }
    }
}

quick_error! {
    #[derive(Debug, PartialEq, Eq)]
    pub enum OptionsParseError {
        UnknownOption(option: String) {
            description("unknown scan option")
            display("unknown option: `{}`", option)
        }
    }
}

impl ScanOptions {
    pub fn parse(options_str: &str) -> Result<Self, OptionsParseError> {
        let mut options = Self::default();

        for option in options_str.split(',').map(str::trim).filter(|option| !option.is_empty()) {
            match option {
                "strict" => options.on_read_error = ReadErrorPolicy::Propagate,
                "lenient" => options.on_read_error = ReadErrorPolicy::Truncate,
                other => return Err(OptionsParseError::UnknownOption(other.to_owned())),
            }
        }

        Ok(options)
    }
}

quick_error! {
    #[derive(Debug)]
    pub enum ScanError {
        UnsupportedRefcountOrder(order: u32) {
            description("unsupported refcount order")
            display("unsupported refcount_order: [{}], entries must be 1 to 8 bytes wide", order)
        }
        Overflow {
            description("image geometry overflows a 64-bit offset")
            display("the refcount geometry overflows a 64-bit byte offset")
        }
        Io(offset: u64, err: DeviceError) {
            description("i/o error")
            display("failed to read refcount metadata at offset {:#x}: {}", offset, err)
        }
    }
}

/// Compute the image end offset: the byte offset one past the last cluster that the refcount
/// structures report as allocated.
///
/// An empty table yields 0 for any geometry; the refcount width and block coverage only have to
/// be representable once a refcount block is actually referenced.
pub fn image_end_offset<D: DeviceRo>(
    device: &D,
    header: &Header,
    options: &ScanOptions,
) -> Result<u64, ScanError> {
    let cluster_size = header.cluster_size().ok_or(ScanError::Overflow)?;
    let mut scan = RefcountScan {
        device,
        options,
        cluster_size,
        blocks: 0,
        last_block: 0,
        total: 0,
    };

    let table_len = cluster_size
        .checked_mul(u64::from(header.refcount_table_clusters))
        .ok_or(ScanError::Overflow)?;
    scan.walk_table(header.refcount_table_offset, table_len)?;

    if scan.last_block == 0 {
        log::debug!("refcount table at {:#x} is empty", header.refcount_table_offset);
        return Ok(0);
    }

    let entry_width = header
        .refcount_entry_width()
        .ok_or_else(|| ScanError::UnsupportedRefcountOrder(header.refcount_order()))?;
    let whole_block = (cluster_size / entry_width as u64)
        .checked_mul(cluster_size)
        .ok_or(ScanError::Overflow)?;

    // Every block before the last one is assumed to be full.
    scan.total = (scan.blocks - 1)
        .checked_mul(whole_block)
        .ok_or(ScanError::Overflow)?;
    log::debug!(
        "{} bytes covered by full refcount blocks, measuring the last block at {:#x}",
        scan.total,
        scan.last_block
    );
    scan.measure_last_block(entry_width)?;

    Ok(scan.total)
}

struct RefcountScan<'a, D> {
    device: &'a D,
    options: &'a ScanOptions,
    cluster_size: u64,

    /// Nonzero table entries seen before the terminating zero.
    blocks: u64,
    last_block: u64,

    total: u64,
}

impl<'a, D: DeviceRo> RefcountScan<'a, D> {
    /// Returns `Ok(false)` when the window could not be read and the scan should stop.
    fn read_window(&self, offset: u64, window: &mut [u8; READ_WINDOW]) -> Result<bool, ScanError> {
        match self.device.read_blocking(offset, window) {
            Ok(()) => Ok(true),
            Err(err) => match self.options.on_read_error {
                ReadErrorPolicy::Propagate => Err(ScanError::Io(offset, err)),
                ReadErrorPolicy::Truncate => {
                    log::warn!(
                        "stopping the refcount scan at unreadable offset {:#x}: {}",
                        offset,
                        err
                    );
                    Ok(false)
                }
            },
        }
    }

    fn walk_table(&mut self, table_offset: u64, table_len: u64) -> Result<(), ScanError> {
        let mut window = [0u8; READ_WINDOW];

        for index in 0..table_len / READ_WINDOW as u64 {
            let offset = window_offset(table_offset, index)?;
            if !self.read_window(offset, &mut window)? {
                return Ok(());
            }
            log::trace!("refcount table window at {:#x}", offset);

            for entry in window.chunks_exact(TABLE_ENTRY_LEN) {
                let block_offset = read_be_uint(entry);
                if block_offset == 0 {
                    return Ok(());
                }
                self.blocks += 1;
                self.last_block = block_offset;
            }
        }
        Ok(())
    }

    fn measure_last_block(&mut self, entry_width: usize) -> Result<(), ScanError> {
        let mut window = [0u8; READ_WINDOW];

        for index in 0..self.cluster_size / READ_WINDOW as u64 {
            let offset = window_offset(self.last_block, index)?;
            if !self.read_window(offset, &mut window)? {
                return Ok(());
            }

            for counter in window.chunks_exact(entry_width) {
                if read_be_uint(counter) == 0 {
                    return Ok(());
                }
                self.total = self
                    .total
                    .checked_add(self.cluster_size)
                    .ok_or(ScanError::Overflow)?;
            }
        }
        Ok(())
    }
}

fn window_offset(base: u64, index: u64) -> Result<u64, ScanError> {
    index
        .checked_mul(READ_WINDOW as u64)
        .and_then(|relative| base.checked_add(relative))
        .ok_or(ScanError::Overflow)
}
