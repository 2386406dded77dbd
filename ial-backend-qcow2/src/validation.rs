use quick_error::quick_error;

use crate::header::{CryptMethod, Header, MAGIC};

/// Backing file names must be shorter than this.
pub const MAX_BACKING_FILE_SIZE: u32 = 1024;

/// Clusters must be larger than `1 << MIN_CLUSTER_BITS` bytes.
pub const MIN_CLUSTER_BITS: u32 = 8;

quick_error! {
    #[derive(Debug, PartialEq, Eq)]
    pub enum ValidationError {
        BadMagic(magic: [u8; 4]) {
            description("not a qcow2 image")
            display("invalid magic: [{}]", String::from_utf8_lossy(magic))
        }
        UnsupportedVersion(version: u32) {
            description("unsupported qcow2 version")
            display("invalid version: [{}]", version)
        }
        BackingFileSizeTooLarge(size: u32) {
            description("backing file name is too long")
            display("invalid backing_file_size: [{}]", size)
        }
        ClusterBitsTooSmall(bits: u32) {
            description("cluster size is too small")
            display("invalid cluster_bits: [{}]", bits)
        }
        UnsupportedCryptMethod(method: u32) {
            description("unsupported encryption method")
            display("invalid crypt_method: [{}]", method)
        }
    }
}

impl Header {
    /// Check the structural invariants of the header, stopping at the first violation.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.magic != MAGIC {
            return Err(ValidationError::BadMagic(self.magic));
        }
        if self.version != 2 && self.version != 3 {
            return Err(ValidationError::UnsupportedVersion(self.version));
        }
        if self.backing_file_size >= MAX_BACKING_FILE_SIZE {
            return Err(ValidationError::BackingFileSizeTooLarge(self.backing_file_size));
        }
        if self.cluster_bits <= MIN_CLUSTER_BITS {
            return Err(ValidationError::ClusterBitsTooSmall(self.cluster_bits));
        }
        if CryptMethod::try_parse(self.crypt_method).is_none() {
            return Err(ValidationError::UnsupportedCryptMethod(self.crypt_method));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn accepts_both_versions() {
        assert_eq!(testing::header(2, 16).validate(), Ok(()));
        assert_eq!(testing::header(3, 16).validate(), Ok(()));
    }

    #[test]
    fn magic_is_checked_first() {
        let mut header = testing::header(7, 2);
        header.magic = *b"QFI\xfa";
        header.crypt_method = 99;
        assert_eq!(header.validate(), Err(ValidationError::BadMagic(*b"QFI\xfa")));

        header.magic = *b"\0\0\0\0";
        assert_eq!(header.validate(), Err(ValidationError::BadMagic([0; 4])));
    }

    #[test]
    fn versions() {
        for version in [0, 1, 4, 5, u32::max_value()].iter() {
            let header = testing::header(*version, 16);
            assert_eq!(header.validate(), Err(ValidationError::UnsupportedVersion(*version)));
        }
    }

    #[test]
    fn backing_file_size_boundary() {
        let mut header = testing::header(3, 16);
        header.backing_file_size = 1023;
        assert_eq!(header.validate(), Ok(()));
        header.backing_file_size = 1024;
        assert_eq!(header.validate(), Err(ValidationError::BackingFileSizeTooLarge(1024)));
    }

    #[test]
    fn cluster_bits_boundary() {
        assert_eq!(testing::header(3, 9).validate(), Ok(()));
        assert_eq!(testing::header(3, 8).validate(), Err(ValidationError::ClusterBitsTooSmall(8)));
        assert_eq!(testing::header(3, 0).validate(), Err(ValidationError::ClusterBitsTooSmall(0)));
    }

    #[test]
    fn crypt_methods() {
        let mut header = testing::header(3, 16);
        for method in 0..3 {
            header.crypt_method = method;
            assert_eq!(header.validate(), Ok(()));
        }
        for method in [3, 4, 0x8000_0000, u32::max_value()].iter() {
            header.crypt_method = *method;
            assert_eq!(header.validate(), Err(ValidationError::UnsupportedCryptMethod(*method)));
        }
    }

    #[test]
    fn only_the_first_failure_is_reported() {
        let mut header = testing::header(3, 4);
        header.backing_file_size = 4096;
        header.crypt_method = 7;
        assert_eq!(header.validate(), Err(ValidationError::BackingFileSizeTooLarge(4096)));
    }

    #[test]
    fn messages_name_the_field() {
        assert_eq!(ValidationError::UnsupportedVersion(4).to_string(), "invalid version: [4]");
        assert_eq!(
            ValidationError::BadMagic(*b"QFI\xfa").to_string(),
            "invalid magic: [QFI\u{fffd}]"
        );
    }
}
