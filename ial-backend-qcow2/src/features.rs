//! Version 3 feature bitmasks.
//!
//! Each bitmask gates optional format capabilities. This tool tests the bits counted from the
//! most significant end of each 64-bit field, so bit 63 is the first feature of each mask.

use bitflags::bitflags;
use serde::Serialize;

bitflags! {
    pub struct IncompatibleFeatures: u64 {
        const DIRTY = 1 << 63;
        const CORRUPT = 1 << 62;
        const EXTERNAL_DATA_FILE = 1 << 61;
        const COMPRESSION_TYPE = 1 << 60;
        const EXTENDED_L2 = 1 << 59;
    }
}

bitflags! {
    pub struct CompatibleFeatures: u64 {
        const LAZY_REFCOUNTS = 1 << 63;
    }
}

bitflags! {
    pub struct AutoclearFeatures: u64 {
        const BITMAPS = 1 << 63;
        const RAW_EXTERNAL_DATA = 1 << 62;
    }
}

/// The named feature flags of a version 3 header.
#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq, Serialize)]
pub struct FeatureFlags {
    pub dirty_bit: bool,
    pub corrupt_bit: bool,
    pub external_data_file: bool,
    pub compression_type: bool,
    pub extended_l2: bool,

    pub lazy_refcount: bool,

    pub bitmaps_extension: bool,
    pub raw_external_data: bool,
}

impl FeatureFlags {
    /// Only meaningful for version 3 headers; version 2 has no feature fields at all.
    pub fn decode(incompatible: u64, compatible: u64, autoclear: u64) -> Self {
        let incompatible = IncompatibleFeatures::from_bits_truncate(incompatible);
        let compatible = CompatibleFeatures::from_bits_truncate(compatible);
        let autoclear = AutoclearFeatures::from_bits_truncate(autoclear);

        Self {
            dirty_bit: incompatible.contains(IncompatibleFeatures::DIRTY),
            corrupt_bit: incompatible.contains(IncompatibleFeatures::CORRUPT),
            external_data_file: incompatible.contains(IncompatibleFeatures::EXTERNAL_DATA_FILE),
            compression_type: incompatible.contains(IncompatibleFeatures::COMPRESSION_TYPE),
            extended_l2: incompatible.contains(IncompatibleFeatures::EXTENDED_L2),

            lazy_refcount: compatible.contains(CompatibleFeatures::LAZY_REFCOUNTS),

            bitmaps_extension: autoclear.contains(AutoclearFeatures::BITMAPS),
            raw_external_data: autoclear.contains(AutoclearFeatures::RAW_EXTERNAL_DATA),
        }
    }
}
