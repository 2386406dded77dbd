//! Read-only analysis of qcow2 disk images.
//!
//! Only metadata is interpreted: the header, its extensions and the refcount structures. Guest
//! data, L1/L2 tables and snapshots are never read.

use ial::DeviceRo;
use quick_error::quick_error;

pub mod extensions;
pub mod features;
pub mod header;
pub mod refcount;
pub mod report;
pub mod validation;

#[cfg(test)]
mod testing;

pub use extensions::HeaderExtension;
pub use features::FeatureFlags;
pub use header::{CryptMethod, Header, LoadHeaderError};
pub use refcount::{ReadErrorPolicy, ScanError, ScanOptions};
pub use report::{Report, ReportOptions};
pub use validation::ValidationError;

quick_error! {
    #[derive(Debug)]
    pub enum OpenError {
        Load(err: LoadHeaderError) {
            description("the header couldn't be loaded")
            display("{}", err)
            from()
        }
        Invalid(err: ValidationError) {
            description("the header is invalid")
            display("{}", err)
            from()
        }
    }
}

quick_error! {
    #[derive(Debug)]
    pub enum AnalyzeError {
        Scan(err: ScanError) {
            description("refcount scan error")
            display("{}", err)
            from()
        }
    }
}

/// An opened image with a validated header.
///
/// The image owns its device for the whole analysis; dropping it releases the underlying file.
pub struct Image<D> {
    device: D,
    header: Header,
}

impl<D: DeviceRo> Image<D> {
    /// Load the header from the start of the device and validate it.
    pub fn open(device: D) -> Result<Self, OpenError> {
        let header = Header::load(&device)?;
        header.validate()?;

        log::debug!(
            "qcow2 version {} image, {} byte clusters, refcount order {}",
            header.version,
            header.cluster_size().unwrap_or(0),
            header.refcount_order()
        );

        Ok(Self { device, header })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    /// The backing file name, if the image has one and it can be read.
    pub fn backing_file(&self) -> Option<String> {
        if !self.header.has_backing_file() {
            return None;
        }

        let mut name = vec![0u8; self.header.backing_file_size as usize];
        match self
            .device
            .read_blocking(self.header.backing_file_offset, &mut name)
        {
            Ok(()) => Some(String::from_utf8_lossy(&name).into_owned()),
            Err(err) => {
                log::warn!(
                    "ignoring the unreadable backing file name at {:#x}: {}",
                    self.header.backing_file_offset,
                    err
                );
                None
            }
        }
    }

    pub fn extensions(&self) -> Vec<HeaderExtension> {
        extensions::read_extensions(&self.device, &self.header)
    }

    pub fn image_end_offset(&self, options: &ScanOptions) -> Result<u64, ScanError> {
        refcount::image_end_offset(&self.device, &self.header, options)
    }

    pub fn analyze(
        &self,
        scan_options: &ScanOptions,
        report_options: &ReportOptions,
    ) -> Result<Report, AnalyzeError> {
        let cluster_size = self.header.cluster_size().ok_or(ScanError::Overflow)?;
        let image_end_offset = self.image_end_offset(scan_options)?;

        let extensions = if report_options.verbose {
            self.extensions()
        } else {
            Vec::new()
        };

        Ok(Report::build(
            &self.header,
            cluster_size,
            image_end_offset,
            self.backing_file(),
            &extensions,
            report_options,
        ))
    }
}
