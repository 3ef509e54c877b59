//! MBR partition table decoding, including the extended/logical (EBR) chain.
//!
//! Structure and the CHS/type-byte handling follow the teacher's `mbr.rs`
//! and `ebr.rs` (see `examples/forensicxlab-exhume_partitions/src/{mbr,ebr}.rs`):
//! a fixed 4-entry primary table, with types `0x05`/`0x0F`/`0x85` walked
//! recursively as a linked list of Extended Boot Records to discover logical
//! partitions. Logical partitions are flattened into the same partition list
//! spec.md §3 describes for an MBR `PartitionTableSummary`.

use crate::bytesrc::RawImage;
use crate::error::{Error, Result};
use crate::model::{PartitionSummary, PartitionTableSummary, PartitionTableType};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};

pub const SECTOR_SIZE: u64 = 512;
pub const PROTECTIVE_GPT_TYPE: u8 = 0xEE;

#[derive(Debug, Default, Clone)]
pub struct MbrEntry {
    pub boot_indicator: u8,
    pub partition_type: u8,
    pub start_lba: u32,
    pub size_sectors: u32,
}

impl MbrEntry {
    fn from_bytes(bytes: &[u8]) -> std::io::Result<Self> {
        let mut cur = Cursor::new(bytes);
        let boot_indicator = cur.read_u8()?;
        let mut _chs = [0u8; 3];
        cur.read_exact(&mut _chs)?;
        let partition_type = cur.read_u8()?;
        let mut _chs2 = [0u8; 3];
        cur.read_exact(&mut _chs2)?;
        let start_lba = cur.read_u32::<LittleEndian>()?;
        let size_sectors = cur.read_u32::<LittleEndian>()?;
        Ok(Self {
            boot_indicator,
            partition_type,
            start_lba,
            size_sectors,
        })
    }

    fn is_empty(&self) -> bool {
        self.partition_type == 0x00
    }

    fn is_extended(&self) -> bool {
        matches!(self.partition_type, 0x05 | 0x0F | 0x85)
    }
}

#[derive(Debug, Default, Clone)]
pub struct MbrSector {
    pub entries: [MbrEntry; 4],
    pub boot_signature: u16,
}

impl MbrSector {
    pub fn from_bytes(bytes: &[u8]) -> std::io::Result<Self> {
        if bytes.len() < 512 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "512 bytes are required to identify an MBR sector",
            ));
        }
        let mut cur = Cursor::new(bytes);
        let mut bootloader = [0u8; 446];
        cur.read_exact(&mut bootloader)?;
        let mut entry_bytes = [0u8; 16];
        let mut entries: [MbrEntry; 4] = Default::default();
        for entry in entries.iter_mut() {
            cur.read_exact(&mut entry_bytes)?;
            *entry = MbrEntry::from_bytes(&entry_bytes)?;
        }
        let boot_signature = cur.read_u16::<LittleEndian>()?;
        Ok(Self {
            entries,
            boot_signature,
        })
    }

    pub fn is_valid(&self) -> bool {
        self.boot_signature == 0xAA55
    }

    pub fn is_protective(&self) -> bool {
        self.entries.iter().any(|e| e.partition_type == PROTECTIVE_GPT_TYPE)
    }
}

fn partition_type_string(t: u8) -> String {
    format!("0x{t:02X}")
}

/// Walks the Extended Boot Record chain starting at `start_lba` (relative
/// to disk LBA 0, as the teacher's `parse_ebr` takes it relative to the
/// extended partition base on first call) and appends every logical
/// partition found, mirroring `ebr::parse_ebr`'s recursive structure.
fn walk_ebr_chain(raw: &mut RawImage, start_lba: u32, extended_base: u32) -> Result<Vec<PartitionSummary>> {
    let mut found = Vec::new();
    let ebr_lba = extended_base as u64 + start_lba as u64;
    let mut sector = [0u8; 512];
    raw.read_at(ebr_lba * SECTOR_SIZE, &mut sector)?;
    let ebr = MbrSector::from_bytes(&sector)?;

    let logical = &ebr.entries[0];
    if !logical.is_empty() {
        let abs_start = ebr_lba as u32 + logical.start_lba;
        found.push(make_summary(abs_start, logical.size_sectors, logical.partition_type));
    }

    let next = &ebr.entries[1];
    if !next.is_empty() {
        let mut rest = walk_ebr_chain(raw, next.start_lba, extended_base)?;
        found.append(&mut rest);
    }

    Ok(found)
}

fn make_summary(start_lba: u32, size_sectors: u32, partition_type: u8) -> PartitionSummary {
    let start = start_lba as u64;
    let end = start + size_sectors as u64 - 1;
    PartitionSummary {
        index: 0,
        name: String::new(),
        partition_type: partition_type_string(partition_type),
        guid: String::new(),
        start_lba: start,
        end_lba: end,
        size_bytes: size_sectors as u64 * SECTOR_SIZE,
        flags: String::new(),
        attr_raw: 0,
        attr_required: false,
        attr_legacy_bios_bootable: false,
        attr_read_only: false,
        logical_sector_size: SECTOR_SIZE as u32,
        filesystem: None,
    }
}

/// Decodes an MBR partition table, flattening any extended/logical chain
/// into the same ordered partition list as primary entries.
pub fn decode(raw: &mut RawImage) -> Result<PartitionTableSummary> {
    let mut sector = [0u8; 512];
    raw.read_at(0, &mut sector)?;
    let mbr = MbrSector::from_bytes(&sector)?;
    if !mbr.is_valid() {
        return Err(Error::UnsupportedTableType);
    }

    let mut partitions = Vec::new();
    for (i, entry) in mbr.entries.iter().enumerate() {
        if entry.is_empty() || entry.partition_type == PROTECTIVE_GPT_TYPE {
            continue;
        }
        partitions.push(make_summary(entry.start_lba, entry.size_sectors, entry.partition_type));
        if entry.is_extended() {
            let mut logical = walk_ebr_chain(raw, entry.start_lba, entry.start_lba)?;
            partitions.append(&mut logical);
        }
        let _ = i;
    }

    partitions.sort_by_key(|p| p.start_lba);
    for (i, p) in partitions.iter_mut().enumerate() {
        p.index = (i + 1) as u32;
    }

    Ok(PartitionTableSummary {
        table_type: PartitionTableType::Mbr,
        disk_guid: String::new(),
        logical_sector_size: SECTOR_SIZE as u32,
        physical_sector_size: SECTOR_SIZE as u32,
        protective_mbr: false,
        partitions,
        largest_free_span: None,
        misaligned_partitions: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_sector(entries: &[(u8, u32, u32)]) -> Vec<u8> {
        let mut bytes = vec![0u8; 512];
        for (i, (ptype, start, size)) in entries.iter().enumerate() {
            let off = 446 + i * 16;
            bytes[off] = 0x00;
            bytes[off + 4] = *ptype;
            bytes[off + 8..off + 12].copy_from_slice(&start.to_le_bytes());
            bytes[off + 12..off + 16].copy_from_slice(&size.to_le_bytes());
        }
        bytes[510] = 0x55;
        bytes[511] = 0xAA;
        bytes
    }

    #[test]
    fn decodes_primary_entries() {
        let bytes = build_sector(&[(0x83, 2048, 1024), (0x82, 3072, 512)]);
        let mbr = MbrSector::from_bytes(&bytes).unwrap();
        assert!(mbr.is_valid());
        assert_eq!(mbr.entries[0].partition_type, 0x83);
        assert_eq!(mbr.entries[0].start_lba, 2048);
    }

    #[test]
    fn protective_mbr_is_detected() {
        let bytes = build_sector(&[(PROTECTIVE_GPT_TYPE, 1, 0xFFFFFFFF)]);
        let mbr = MbrSector::from_bytes(&bytes).unwrap();
        assert!(mbr.is_protective());
    }

    #[test]
    fn type_byte_renders_as_hex_string() {
        assert_eq!(partition_type_string(0x83), "0x83");
        assert_eq!(partition_type_string(0x0B), "0x0B");
    }
}
