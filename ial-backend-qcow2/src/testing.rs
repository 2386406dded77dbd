//! Synthetic images for unit tests.

use std::io::Cursor;

use ial::{write_be_u64, BasicDevice};

use crate::header::{Header, HEADER_LEN, MAGIC, V2_HEADER_LEN};

pub(crate) type MemoryDevice = BasicDevice<Cursor<Vec<u8>>>;

/// A valid header with 16-bit refcounts and a one-cluster refcount table in the second cluster.
pub(crate) fn header(version: u32, cluster_bits: u32) -> Header {
    let cluster_size = 1u64.checked_shl(cluster_bits).unwrap_or(0);

    Header {
        magic: MAGIC,
        version,
        backing_file_offset: 0,
        backing_file_size: 0,
        cluster_bits,
        size: 1 << 30,
        crypt_method: 0,
        l1_size: 2,
        l1_table_offset: 3 * cluster_size,
        refcount_table_offset: cluster_size,
        refcount_table_clusters: 1,
        nb_snapshots: 0,
        snapshots_offset: 0,

        incompatible_features: 0,
        compatible_features: 0,
        autoclear_features: 0,
        refcount_order: if version >= 3 { 4 } else { 0 },
        header_length: if version >= 3 { HEADER_LEN as u32 } else { 0 },
        compression_type: 0,
        padding: [0; 7],
    }
}

pub(crate) struct ImageBuilder {
    header: Header,
    bytes: Vec<u8>,
}

impl ImageBuilder {
    /// Lays out the header cluster and a zeroed refcount table.
    pub(crate) fn new(header: Header) -> Self {
        let mut this = Self {
            header,
            bytes: Vec::new(),
        };
        let cluster_size = this.cluster_size();
        this.reserve(cluster_size);

        let table_len = cluster_size * u64::from(this.header.refcount_table_clusters);
        let table_end = this.header.refcount_table_offset + table_len;
        this.reserve(table_end);
        this
    }

    fn cluster_size(&self) -> u64 {
        // Keep absurd geometries small; the tests using them never read the refcount structures.
        self.header.cluster_size().unwrap_or(512).min(1 << 21)
    }

    fn reserve(&mut self, end: u64) {
        if self.bytes.len() < end as usize {
            self.bytes.resize(end as usize, 0);
        }
    }

    pub(crate) fn put(&mut self, offset: u64, data: &[u8]) {
        self.reserve(offset + data.len() as u64);
        self.bytes[offset as usize..offset as usize + data.len()].copy_from_slice(data);
    }

    pub(crate) fn table(&mut self, entries: &[u64]) {
        let table_offset = self.header.refcount_table_offset as usize;
        for (index, entry) in entries.iter().enumerate() {
            let offset = table_offset + index * 8;
            self.reserve(offset as u64 + 8);
            write_be_u64(&mut self.bytes, offset, *entry);
        }
    }

    /// Write a full refcount block cluster, starting with `counters`.
    pub(crate) fn refcount_block(&mut self, offset: u64, counters: &[u64]) {
        let width = self
            .header
            .refcount_entry_width()
            .expect("the refcount order must be byte-aligned");
        let cluster_size = self.cluster_size();
        self.reserve(offset + cluster_size);

        for (index, counter) in counters.iter().enumerate() {
            let bytes = counter.to_be_bytes();
            self.put(offset + (index * width) as u64, &bytes[8 - width..]);
        }
    }

    /// Version 2 headers end at byte 72, where their extensions may already have been put.
    pub(crate) fn build(mut self) -> (Header, MemoryDevice) {
        let mut block = [0u8; HEADER_LEN];
        self.header.serialize(&mut block);
        let len = if self.header.is_v3() {
            HEADER_LEN
        } else {
            V2_HEADER_LEN as usize
        };
        self.put(0, &block[..len]);
        (self.header, BasicDevice::new(Cursor::new(self.bytes)))
    }
}
