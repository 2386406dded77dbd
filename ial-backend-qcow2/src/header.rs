use ial::{
    read_be_u32, read_be_u64, read_be_u8, write_be_u32, write_be_u64, write_be_u8, DeviceError,
    DeviceRo,
};
use quick_error::quick_error;

use crate::features::FeatureFlags;

/// "QFI" followed by 0xFB.
pub const MAGIC: [u8; 4] = *b"QFI\xfb";

/// The number of bytes read from offset 0: the 105 defined bytes, padded to a multiple of 8.
pub const HEADER_LEN: usize = 112;

/// Length of a version 2 header. Header extensions start right after it.
pub const V2_HEADER_LEN: u32 = 72;

/// Smallest valid `header_length` of a version 3 header.
pub const V3_MIN_HEADER_LEN: u32 = 104;

/// Version 2 images have no `refcount_order` field, and always use 16-bit refcounts.
pub const V2_REFCOUNT_ORDER: u32 = 4;

/// The fixed leading structure of a qcow2 image, decoded field by field.
///
/// Every field up to `snapshots_offset` is valid for all versions. The feature bitmasks,
/// `refcount_order`, `header_length` and `compression_type` are only defined for version 3 and
/// later; for version 2 they hold whatever bytes followed the header, and should be accessed
/// through the version-aware methods instead.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    pub magic: [u8; 4],
    pub version: u32,
    pub backing_file_offset: u64,
    pub backing_file_size: u32,
    pub cluster_bits: u32,
    pub size: u64,
    pub crypt_method: u32,
    pub l1_size: u32,
    pub l1_table_offset: u64,
    pub refcount_table_offset: u64,
    pub refcount_table_clusters: u32,
    pub nb_snapshots: u32,
    pub snapshots_offset: u64,

    pub incompatible_features: u64,
    pub compatible_features: u64,
    pub autoclear_features: u64,
    pub refcount_order: u32,
    pub header_length: u32,
    pub compression_type: u8,
    pub padding: [u8; 7],
}

quick_error! {
    #[derive(Debug)]
    pub enum LoadHeaderError {
        Truncated(size: u64) {
            description("the image is too short to hold a qcow2 header")
            display(
                "qcow2 header is truncated: the image is {} bytes long, at least {} are required",
                size,
                HEADER_LEN
            )
        }
        Io(err: DeviceError) {
            description("i/o error")
            display("failed to read the qcow2 header: {}", err)
            from()
        }
    }
}

impl Header {
    /// Read the header region from the start of the device and decode it.
    pub fn load<D: DeviceRo>(device: &D) -> Result<Self, LoadHeaderError> {
        let size = device.size_blocking()?;
        if size < HEADER_LEN as u64 {
            return Err(LoadHeaderError::Truncated(size));
        }

        let mut block = [0u8; HEADER_LEN];
        match device.read_blocking(0, &mut block) {
            Ok(()) => (),
            Err(err) if err.is_unexpected_eof() => return Err(LoadHeaderError::Truncated(size)),
            Err(err) => return Err(err.into()),
        }

        Ok(Self::parse(&block))
    }

    /// Decode every field at its fixed offset. This never fails; use [`Header::validate`] to
    /// check that the result actually describes a qcow2 image.
    pub fn parse(block: &[u8; HEADER_LEN]) -> Self {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&block[0..4]);

        let mut padding = [0u8; 7];
        padding.copy_from_slice(&block[105..112]);

        Self {
            magic,
            version: read_be_u32(block, 4),
            backing_file_offset: read_be_u64(block, 8),
            backing_file_size: read_be_u32(block, 16),
            cluster_bits: read_be_u32(block, 20),
            size: read_be_u64(block, 24),
            crypt_method: read_be_u32(block, 32),
            l1_size: read_be_u32(block, 36),
            l1_table_offset: read_be_u64(block, 40),
            refcount_table_offset: read_be_u64(block, 48),
            refcount_table_clusters: read_be_u32(block, 56),
            nb_snapshots: read_be_u32(block, 60),
            snapshots_offset: read_be_u64(block, 64),

            incompatible_features: read_be_u64(block, 72),
            compatible_features: read_be_u64(block, 80),
            autoclear_features: read_be_u64(block, 88),
            refcount_order: read_be_u32(block, 96),
            header_length: read_be_u32(block, 100),
            compression_type: read_be_u8(block, 104),
            padding,
        }
    }

    /// Encode every field back at its fixed offset; the inverse of [`Header::parse`].
    pub fn serialize(&self, block: &mut [u8; HEADER_LEN]) {
        block[0..4].copy_from_slice(&self.magic);
        write_be_u32(block, 4, self.version);
        write_be_u64(block, 8, self.backing_file_offset);
        write_be_u32(block, 16, self.backing_file_size);
        write_be_u32(block, 20, self.cluster_bits);
        write_be_u64(block, 24, self.size);
        write_be_u32(block, 32, self.crypt_method);
        write_be_u32(block, 36, self.l1_size);
        write_be_u64(block, 40, self.l1_table_offset);
        write_be_u64(block, 48, self.refcount_table_offset);
        write_be_u32(block, 56, self.refcount_table_clusters);
        write_be_u32(block, 60, self.nb_snapshots);
        write_be_u64(block, 64, self.snapshots_offset);

        write_be_u64(block, 72, self.incompatible_features);
        write_be_u64(block, 80, self.compatible_features);
        write_be_u64(block, 88, self.autoclear_features);
        write_be_u32(block, 96, self.refcount_order);
        write_be_u32(block, 100, self.header_length);
        write_be_u8(block, 104, self.compression_type);
        block[105..112].copy_from_slice(&self.padding);
    }

    pub fn is_v3(&self) -> bool {
        self.version >= 3
    }

    /// The cluster size in bytes, or `None` if `cluster_bits` cannot be represented.
    pub fn cluster_size(&self) -> Option<u64> {
        1u64.checked_shl(self.cluster_bits)
    }

    pub fn crypt_method(&self) -> Option<CryptMethod> {
        CryptMethod::try_parse(self.crypt_method)
    }

    /// log2 of the refcount width in bits.
    pub fn refcount_order(&self) -> u32 {
        if self.is_v3() {
            self.refcount_order
        } else {
            V2_REFCOUNT_ORDER
        }
    }

    /// The width of a refcount block entry in bytes, if it is a whole number of bytes that fits
    /// a `u64`.
    pub fn refcount_entry_width(&self) -> Option<usize> {
        match self.refcount_order() {
            order @ 3..=6 => Some((1usize << order) / 8),
            _ => None,
        }
    }

    pub fn has_backing_file(&self) -> bool {
        self.backing_file_offset != 0 && self.backing_file_size > 0
    }

    /// Where the header extensions begin.
    pub fn extensions_offset(&self) -> u64 {
        if self.is_v3() {
            u64::from(std::cmp::max(self.header_length, V3_MIN_HEADER_LEN))
        } else {
            u64::from(V2_HEADER_LEN)
        }
    }

    /// The named feature flags, which only exist for version 3 and later.
    pub fn feature_flags(&self) -> Option<FeatureFlags> {
        if self.is_v3() {
            Some(FeatureFlags::decode(
                self.incompatible_features,
                self.compatible_features,
                self.autoclear_features,
            ))
        } else {
            None
        }
    }
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum CryptMethod {
    None = 0,
    Aes = 1,
    Luks = 2,
}
impl CryptMethod {
    pub fn try_parse(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(CryptMethod::None),
            1 => Some(CryptMethod::Aes),
            2 => Some(CryptMethod::Luks),
            _ => None,
        }
    }
    pub fn name(self) -> &'static str {
        match self {
            Self::None => "no",
            Self::Aes => "AES",
            Self::Luks => "LUKS",
        }
    }
}
