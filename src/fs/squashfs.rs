//! squashfs superblock decoding (spec.md §4.3).
//!
//! Only the fixed 96-byte superblock at offset 0 is read; squashfs images
//! embedded in a partition (e.g. a read-only rootfs) never need more than
//! the header fields spec.md asks for.

use crate::bytesrc::RawImage;
use crate::model::{FilesystemSummary, FilesystemType};

const MAGIC_LE: [u8; 4] = *b"hsqs";

fn compression_name(id: u16) -> &'static str {
    match id {
        1 => "gzip",
        2 => "lzma",
        3 => "lzo",
        4 => "xz",
        5 => "lz4",
        6 => "zstd",
        _ => "unknown",
    }
}

pub fn sniff(raw: &mut RawImage, base: u64) -> std::io::Result<bool> {
    let mut magic = [0u8; 4];
    raw.read_at(base, &mut magic)?;
    Ok(magic == MAGIC_LE)
}

fn decode_superblock(sb: &[u8]) -> FilesystemSummary {
    let inode_count = u32::from_le_bytes(sb[4..8].try_into().unwrap());
    let block_size = u32::from_le_bytes(sb[12..16].try_into().unwrap());
    let flags = u16::from_le_bytes(sb[16..18].try_into().unwrap());
    let compression_id = u16::from_le_bytes(sb[20..22].try_into().unwrap());
    let version_major = u16::from_le_bytes(sb[28..30].try_into().unwrap());
    let version_minor = u16::from_le_bytes(sb[30..32].try_into().unwrap());

    let mut notes = Vec::new();
    if inode_count == 0 {
        notes.push("inode count is zero".to_string());
    }

    FilesystemSummary {
        fs_type: FilesystemType::Squashfs,
        block_size,
        compression: compression_name(compression_id).to_string(),
        version: format!("{version_major}.{version_minor}"),
        fs_flags: Some(flags),
        notes,
        ..Default::default()
    }
}

pub fn decode(raw: &mut RawImage, base: u64) -> std::io::Result<FilesystemSummary> {
    let mut sb = vec![0u8; 96];
    raw.read_at(base, &mut sb)?;
    Ok(decode_superblock(&sb))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_superblock() -> Vec<u8> {
        let mut sb = vec![0u8; 96];
        sb[0..4].copy_from_slice(&MAGIC_LE);
        sb[4..8].copy_from_slice(&1234u32.to_le_bytes());
        sb[12..16].copy_from_slice(&131072u32.to_le_bytes());
        sb[16..18].copy_from_slice(&0u16.to_le_bytes()); // flags
        sb[20..22].copy_from_slice(&4u16.to_le_bytes()); // compression: xz
        sb[28..30].copy_from_slice(&4u16.to_le_bytes());
        sb[30..32].copy_from_slice(&0u16.to_le_bytes());
        sb
    }

    #[test]
    fn sniff_recognizes_hsqs_magic() {
        let sb = build_superblock();
        assert_eq!(&sb[0..4], b"hsqs");
    }

    #[test]
    fn decode_reads_flags_and_compression_at_spec_offsets() {
        let summary = decode_superblock(&build_superblock());
        assert_eq!(summary.compression, "xz");
        assert_eq!(summary.block_size, 131072);
        assert_eq!(summary.fs_flags, Some(0));
        assert_eq!(summary.version, "4.0");
    }

    #[test]
    fn compression_id_maps_to_xz() {
        assert_eq!(compression_name(4), "xz");
        assert_eq!(compression_name(99), "unknown");
    }
}
