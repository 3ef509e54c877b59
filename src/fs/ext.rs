//! ext2/3/4 superblock decoding (spec.md §4.3).
//!
//! The superblock always lives 1024 bytes into the filesystem regardless of
//! block size; offsets below are relative to that point, following the
//! canonical ext2/3/4 on-disk layout.

use crate::bytesrc::{trim_label, RawImage};
use crate::model::FilesystemSummary;
use crate::model::FilesystemType;
const SUPERBLOCK_OFFSET: u64 = 1024;

pub fn sniff(raw: &mut RawImage, base: u64) -> std::io::Result<bool> {
    let mut magic = [0u8; 2];
    raw.read_at(base + SUPERBLOCK_OFFSET + 56, &mut magic)?;
    Ok(magic == [0x53, 0xEF])
}

pub fn decode(raw: &mut RawImage, base: u64) -> std::io::Result<FilesystemSummary> {
    let mut sb = vec![0u8; 264];
    raw.read_at(base + SUPERBLOCK_OFFSET, &mut sb)?;

    let log_block_size = u32::from_le_bytes(sb[24..28].try_into().unwrap());
    let block_size = 1024u32 << log_block_size;

    let feature_compat = u32::from_le_bytes(sb[92..96].try_into().unwrap());
    let feature_incompat = u32::from_le_bytes(sb[96..100].try_into().unwrap());
    let feature_ro_compat = u32::from_le_bytes(sb[100..104].try_into().unwrap());

    let uuid_bytes = &sb[104..120];
    let uuid = format!(
        "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
        uuid_bytes[0], uuid_bytes[1], uuid_bytes[2], uuid_bytes[3],
        uuid_bytes[4], uuid_bytes[5],
        uuid_bytes[6], uuid_bytes[7],
        uuid_bytes[8], uuid_bytes[9],
        uuid_bytes[10], uuid_bytes[11], uuid_bytes[12], uuid_bytes[13], uuid_bytes[14], uuid_bytes[15],
    );

    let label = trim_label(&sb[120..136]);

    let mut features = Vec::new();
    if feature_compat & 0x0004 != 0 {
        features.push("has_journal".to_string());
    }
    if feature_compat & 0x0002 != 0 {
        features.push("dir_index".to_string());
    }
    if feature_incompat & 0x0040 != 0 {
        features.push("extents".to_string());
    }
    if feature_incompat & 0x0080 != 0 {
        features.push("64bit".to_string());
    }
    if feature_ro_compat & 0x0400 != 0 {
        features.push("metadata_csum".to_string());
    }
    if feature_ro_compat & 0x0002 != 0 {
        features.push("huge_file".to_string());
    }
    if feature_ro_compat & 0x0010 != 0 {
        features.push("gdt_csum".to_string());
    }
    if feature_incompat & 0x0010 != 0 {
        features.push("meta_bg".to_string());
    }

    Ok(FilesystemSummary {
        fs_type: FilesystemType::Ext4,
        label,
        uuid,
        block_size,
        features,
        notes: Vec::new(),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_superblock(log_block_size: u32) -> Vec<u8> {
        let mut sb = vec![0u8; 264];
        sb[24..28].copy_from_slice(&log_block_size.to_le_bytes());
        sb[56] = 0x53;
        sb[57] = 0xEF;
        sb[92..96].copy_from_slice(&0x0004u32.to_le_bytes()); // has_journal
        sb[96..100].copy_from_slice(&0x0040u32.to_le_bytes()); // extents
        sb[104..120].copy_from_slice(&[0x11; 16]);
        sb[120..136].copy_from_slice(b"root\0\0\0\0\0\0\0\0\0\0\0\0");
        sb
    }

    #[test]
    fn sniff_recognizes_ext_magic() {
        let sb = build_superblock(2);
        assert_eq!(sb[56], 0x53);
        assert_eq!(sb[57], 0xEF);
    }

    #[test]
    fn block_size_derives_from_log_block_size() {
        assert_eq!(1024u32 << 2, 4096);
        assert_eq!(1024u32 << 0, 1024);
    }
}
