//! The analysis result handed to frontends.

use serde::Serialize;

use crate::{
    extensions::HeaderExtension,
    features::FeatureFlags,
    header::{CryptMethod, Header},
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ReportOptions {
    /// Include table locations, feature flags and header extensions.
    pub verbose: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BasicReport {
    pub qcow_version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backing_file: Option<String>,
    pub cluster_size: u64,
    pub virtual_size: u64,
    pub crypt_method: &'static str,
    pub image_end_offset: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct VerboseReport {
    #[serde(flatten)]
    pub basic: BasicReport,

    pub l1_size: u32,
    pub l1_table_offset: u64,
    pub refcount_table_offset: u64,
    pub refcount_table_clusters: u32,
    pub number_snapshots: u32,
    pub snapshots_offset: u64,

    #[serde(flatten)]
    pub v3: Option<V3Details>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub backing_file_format: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub header_extensions: Vec<&'static str>,
}

/// Fields that only exist in version 3 headers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct V3Details {
    #[serde(flatten)]
    pub features: FeatureFlags,
    pub refcount_order: u32,
    pub header_length: u32,
    pub compression_method: u8,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Report {
    Basic(BasicReport),
    Verbose(VerboseReport),
}

impl Report {
    /// Combine the decoded header with the values computed from the rest of the image.
    ///
    /// `extensions` is only consulted for verbose reports.
    pub fn build(
        header: &Header,
        cluster_size: u64,
        image_end_offset: u64,
        backing_file: Option<String>,
        extensions: &[HeaderExtension],
        options: &ReportOptions,
    ) -> Self {
        let basic = BasicReport {
            qcow_version: header.version,
            backing_file,
            cluster_size,
            virtual_size: header.size,
            crypt_method: header.crypt_method().map_or("unknown", CryptMethod::name),
            image_end_offset,
        };
        if !options.verbose {
            return Report::Basic(basic);
        }

        let v3 = header.feature_flags().map(|features| V3Details {
            features,
            refcount_order: header.refcount_order(),
            header_length: header.header_length,
            compression_method: header.compression_type,
        });
        let backing_file_format = extensions.iter().find_map(|extension| match extension {
            HeaderExtension::BackingFileFormat(format) => Some(format.clone()),
            _ => None,
        });

        Report::Verbose(VerboseReport {
            basic,
            l1_size: header.l1_size,
            l1_table_offset: header.l1_table_offset,
            refcount_table_offset: header.refcount_table_offset,
            refcount_table_clusters: header.refcount_table_clusters,
            number_snapshots: header.nb_snapshots,
            snapshots_offset: header.snapshots_offset,
            v3,
            backing_file_format,
            header_extensions: extensions.iter().map(HeaderExtension::name).collect(),
        })
    }

    pub fn basic(&self) -> &BasicReport {
        match self {
            Report::Basic(basic) => basic,
            Report::Verbose(verbose) => &verbose.basic,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    use serde_json::json;

    #[test]
    fn basic_report() {
        let mut header = testing::header(3, 16);
        header.crypt_method = 1;

        let report = Report::build(&header, 65536, 6_553_600, None, &[], &ReportOptions::default());
        assert_eq!(
            serde_json::to_value(&report).unwrap(),
            json!({
                "qcow_version": 3,
                "cluster_size": 65536,
                "virtual_size": 1u64 << 30,
                "crypt_method": "AES",
                "image_end_offset": 6_553_600,
            })
        );
    }

    #[test]
    fn backing_file_is_reported_when_present() {
        let header = testing::header(2, 16);
        let report = Report::build(
            &header,
            65536,
            0,
            Some("base.img".to_owned()),
            &[],
            &ReportOptions::default(),
        );
        assert_eq!(report.basic().backing_file.as_deref(), Some("base.img"));
        assert_eq!(serde_json::to_value(&report).unwrap()["backing_file"], "base.img");
    }

    #[test]
    fn verbose_v3_report() {
        let mut header = testing::header(3, 16);
        header.incompatible_features = 1 << 63;
        header.autoclear_features = 1 << 63;
        header.compression_type = 1;

        let extensions = [
            HeaderExtension::BackingFileFormat("raw".to_owned()),
            HeaderExtension::Bitmaps,
        ];
        let options = ReportOptions { verbose: true };
        let report = Report::build(&header, 65536, 1 << 20, None, &extensions, &options);
        let value = serde_json::to_value(&report).unwrap();

        assert_eq!(value["qcow_version"], 3);
        assert_eq!(value["image_end_offset"], 1 << 20);
        assert_eq!(value["l1_size"], 2);
        assert_eq!(value["l1_table_offset"], 3 * 65536);
        assert_eq!(value["refcount_table_offset"], 65536);
        assert_eq!(value["refcount_table_clusters"], 1);
        assert_eq!(value["number_snapshots"], 0);
        assert_eq!(value["dirty_bit"], true);
        assert_eq!(value["corrupt_bit"], false);
        assert_eq!(value["lazy_refcount"], false);
        assert_eq!(value["bitmaps_extension"], true);
        assert_eq!(value["refcount_order"], 4);
        assert_eq!(value["header_length"], 112);
        assert_eq!(value["compression_method"], 1);
        assert_eq!(value["backing_file_format"], "raw");
        assert_eq!(value["header_extensions"], json!(["backing_file_format", "bitmaps"]));
    }

    #[test]
    fn verbose_v2_report_has_no_feature_flags() {
        let header = testing::header(2, 16);
        let report = Report::build(&header, 65536, 0, None, &[], &ReportOptions { verbose: true });
        let value = serde_json::to_value(&report).unwrap();

        assert_eq!(value["l1_size"], 2);
        assert!(value.get("dirty_bit").is_none());
        assert!(value.get("refcount_order").is_none());
        assert!(value.get("header_extensions").is_none());
    }
}
