//! GPT header and partition entry array decoding.
//!
//! Layout and field order follow the UEFI specification and mirror the
//! teacher's `GPTHeader`/`GPTPartitionEntry` byte-for-byte reads (see
//! `examples/forensicxlab-exhume_partitions/src/gpt.rs`), adapted to the
//! `RawImage` random-access source and the neutral `PartitionTableSummary`
//! data model instead of a forensic-evidence-specific struct tree.

use crate::bytesrc::{read_u32_le, read_u64_le, RawImage};
use crate::error::{Error, Result};
use crate::model::{PartitionSummary, PartitionTableSummary, PartitionTableType};
use std::io::Cursor;

pub const SECTOR_SIZE: u64 = 512;
const GPT_SIGNATURE: [u8; 8] = *b"EFI PART";
pub const ESP_TYPE_GUID: &str = "C12A7328-F81F-11D2-BA4B-00A0C93EC93B";

#[derive(Debug, Default, Clone)]
pub struct GptHeader {
    pub signature: [u8; 8],
    pub revision: u32,
    pub header_size: u32,
    pub crc32: u32,
    pub current_lba: u64,
    pub backup_lba: u64,
    pub first_usable_lba: u64,
    pub last_usable_lba: u64,
    pub disk_guid: [u8; 16],
    pub partition_entry_lba: u64,
    pub num_partition_entries: u32,
    pub partition_entry_size: u32,
    pub partition_array_crc32: u32,
}

impl GptHeader {
    pub fn is_gpt(&self) -> bool {
        self.signature == GPT_SIGNATURE
    }

    pub fn from_bytes(bytes: &[u8]) -> std::io::Result<Self> {
        let mut cur = Cursor::new(bytes);
        let mut signature = [0u8; 8];
        std::io::Read::read_exact(&mut cur, &mut signature)?;
        let revision = read_u32_le(&mut cur)?;
        let header_size = read_u32_le(&mut cur)?;
        let crc32 = read_u32_le(&mut cur)?;
        let _reserved = read_u32_le(&mut cur)?;
        let current_lba = read_u64_le(&mut cur)?;
        let backup_lba = read_u64_le(&mut cur)?;
        let first_usable_lba = read_u64_le(&mut cur)?;
        let last_usable_lba = read_u64_le(&mut cur)?;
        let mut disk_guid = [0u8; 16];
        std::io::Read::read_exact(&mut cur, &mut disk_guid)?;
        let partition_entry_lba = read_u64_le(&mut cur)?;
        let num_partition_entries = read_u32_le(&mut cur)?;
        let partition_entry_size = read_u32_le(&mut cur)?;
        let partition_array_crc32 = read_u32_le(&mut cur)?;

        Ok(Self {
            signature,
            revision,
            header_size,
            crc32,
            current_lba,
            backup_lba,
            first_usable_lba,
            last_usable_lba,
            disk_guid,
            partition_entry_lba,
            num_partition_entries,
            partition_entry_size,
            partition_array_crc32,
        })
    }
}

#[derive(Debug, Default, Clone)]
pub struct GptPartitionEntry {
    pub partition_type_guid: [u8; 16],
    pub partition_guid: [u8; 16],
    pub starting_lba: u64,
    pub ending_lba: u64,
    pub attributes: u64,
    pub partition_name: String,
}

impl GptPartitionEntry {
    pub fn from_bytes(bytes: &[u8]) -> std::io::Result<Self> {
        let mut cur = Cursor::new(bytes);
        let mut partition_type_guid = [0u8; 16];
        std::io::Read::read_exact(&mut cur, &mut partition_type_guid)?;
        let mut partition_guid = [0u8; 16];
        std::io::Read::read_exact(&mut cur, &mut partition_guid)?;
        let starting_lba = read_u64_le(&mut cur)?;
        let ending_lba = read_u64_le(&mut cur)?;
        let attributes = read_u64_le(&mut cur)?;
        let mut name_units = [0u16; 36];
        for unit in name_units.iter_mut() {
            *unit = byteorder::ReadBytesExt::read_u16::<byteorder::LittleEndian>(&mut cur)?;
        }
        let partition_name = String::from_utf16_lossy(&name_units)
            .trim_end_matches('\0')
            .to_string();

        Ok(Self {
            partition_type_guid,
            partition_guid,
            starting_lba,
            ending_lba,
            attributes,
            partition_name,
        })
    }

    pub fn is_unused(&self) -> bool {
        self.partition_type_guid == [0u8; 16]
    }
}

/// Mixed-endian GUID formatting: the first three fields of an on-disk GUID
/// are little-endian, the last two are big-endian. Matches
/// `gpt::format_guid` in the teacher crate.
pub fn format_guid(guid: &[u8; 16]) -> String {
    format!(
        "{:02X}{:02X}{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
        guid[3], guid[2], guid[1], guid[0],
        guid[5], guid[4],
        guid[7], guid[6],
        guid[8], guid[9],
        guid[10], guid[11], guid[12], guid[13], guid[14], guid[15],
    )
}

pub fn attr_flags_string(attr: u64) -> String {
    let mut flags = Vec::new();
    if attr & (1 << 0) != 0 {
        flags.push("required");
    }
    if attr & (1 << 2) != 0 {
        flags.push("legacy-bios-bootable");
    }
    if attr & (1 << 60) != 0 {
        flags.push("read-only");
    }
    flags.join(",")
}

/// Decodes a GPT partition table from `raw`, assuming LBA0 holds a
/// protective MBR (per spec.md §4.2 "for GPT a protective MBR is expected").
pub fn decode(raw: &mut RawImage, protective_mbr: bool) -> Result<PartitionTableSummary> {
    let mut lba1 = [0u8; 512];
    raw.read_at(SECTOR_SIZE, &mut lba1)?;
    let header = GptHeader::from_bytes(&lba1)?;
    if !header.is_gpt() {
        return Err(Error::UnsupportedTableType);
    }

    let entry_size = header.partition_entry_size.max(128) as u64;
    let mut partitions = Vec::new();
    for i in 0..header.num_partition_entries as u64 {
        let offset = header.partition_entry_lba * SECTOR_SIZE + i * entry_size;
        let mut buf = vec![0u8; entry_size as usize];
        raw.read_at(offset, &mut buf)?;
        let entry = GptPartitionEntry::from_bytes(&buf)?;
        if entry.is_unused() {
            continue;
        }
        if entry.starting_lba == 0 && entry.ending_lba == 0 {
            continue;
        }
        let size_bytes = (entry.ending_lba - entry.starting_lba + 1) * SECTOR_SIZE;
        partitions.push(PartitionSummary {
            index: 0, // assigned after sort
            name: entry.partition_name.clone(),
            partition_type: format_guid(&entry.partition_type_guid),
            guid: format_guid(&entry.partition_guid),
            start_lba: entry.starting_lba,
            end_lba: entry.ending_lba,
            size_bytes,
            flags: attr_flags_string(entry.attributes),
            attr_raw: entry.attributes,
            attr_required: entry.attributes & (1 << 0) != 0,
            attr_legacy_bios_bootable: entry.attributes & (1 << 2) != 0,
            attr_read_only: entry.attributes & (1 << 60) != 0,
            logical_sector_size: SECTOR_SIZE as u32,
            filesystem: None,
        });
    }

    partitions.sort_by_key(|p| p.start_lba);
    for (i, p) in partitions.iter_mut().enumerate() {
        p.index = (i + 1) as u32;
    }

    Ok(PartitionTableSummary {
        table_type: PartitionTableType::Gpt,
        disk_guid: format_guid(&header.disk_guid),
        logical_sector_size: SECTOR_SIZE as u32,
        physical_sector_size: SECTOR_SIZE as u32,
        protective_mbr,
        partitions,
        largest_free_span: None,
        misaligned_partitions: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_header(disk_guid: [u8; 16], num_entries: u32) -> Vec<u8> {
        let mut bytes = vec![0u8; 512];
        bytes[0..8].copy_from_slice(&GPT_SIGNATURE);
        bytes[8..12].copy_from_slice(&0x00010000u32.to_le_bytes());
        bytes[12..16].copy_from_slice(&92u32.to_le_bytes());
        bytes[24..32].copy_from_slice(&1u64.to_le_bytes()); // current_lba
        bytes[32..40].copy_from_slice(&100u64.to_le_bytes()); // backup_lba
        bytes[40..48].copy_from_slice(&34u64.to_le_bytes()); // first_usable_lba
        bytes[48..56].copy_from_slice(&66u64.to_le_bytes()); // last_usable_lba
        bytes[56..72].copy_from_slice(&disk_guid);
        bytes[72..80].copy_from_slice(&2u64.to_le_bytes()); // partition_entry_lba
        bytes[80..84].copy_from_slice(&num_entries.to_le_bytes());
        bytes[84..88].copy_from_slice(&128u32.to_le_bytes());
        bytes
    }

    #[test]
    fn header_parses_signature_and_geometry() {
        let bytes = build_header([0xAA; 16], 128);
        let header = GptHeader::from_bytes(&bytes).unwrap();
        assert!(header.is_gpt());
        assert_eq!(header.num_partition_entries, 128);
        assert_eq!(header.partition_entry_lba, 2);
    }

    #[test]
    fn format_guid_is_mixed_endian_and_uppercase() {
        let guid = [
            0x28, 0x73, 0x2a, 0xc1, 0x1f, 0xf8, 0xd2, 0x11, 0xba, 0x4b, 0x00, 0xa0, 0xc9, 0x3e,
            0xc9, 0x3b,
        ];
        assert_eq!(format_guid(&guid), ESP_TYPE_GUID);
    }
}
