//! FAT12/16/32 BIOS Parameter Block decoding and a mini directory walker
//! (spec.md §4.3) used to enumerate `EFI/**` files on an ESP without
//! mounting the filesystem.

use crate::bytesrc::{trim_label, RawImage};
use crate::model::{FatType, FilesystemSummary, FilesystemType};

pub fn sniff(raw: &mut RawImage, base: u64) -> std::io::Result<bool> {
    let mut sig = [0u8; 2];
    raw.read_at(base + 510, &mut sig)?;
    Ok(sig == [0x55, 0xAA])
}

#[derive(Debug, Clone, Default)]
pub struct FatLayout {
    pub fat_type: Option<FatType>,
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: u16,
    pub num_fats: u8,
    pub root_entry_count: u16,
    pub fat_size_sectors: u32,
    pub root_dir_first_sector: u64,
    pub root_dir_sector_count: u64,
    pub first_data_sector: u64,
    pub root_cluster: u32,
    pub volume_id: u32,
    pub label: String,
}

impl FatLayout {
    fn cluster_to_sector(&self, cluster: u32) -> u64 {
        self.first_data_sector + (cluster as u64 - 2) * self.sectors_per_cluster as u64
    }
}

pub fn decode(raw: &mut RawImage, base: u64) -> std::io::Result<(FilesystemSummary, FatLayout)> {
    let mut bpb = vec![0u8; 90];
    raw.read_at(base, &mut bpb)?;

    let bytes_per_sector = u16::from_le_bytes(bpb[11..13].try_into().unwrap());
    let sectors_per_cluster = bpb[13];
    let reserved_sectors = u16::from_le_bytes(bpb[14..16].try_into().unwrap());
    let num_fats = bpb[16];
    let root_entry_count = u16::from_le_bytes(bpb[17..19].try_into().unwrap());
    let total_sectors16 = u16::from_le_bytes(bpb[19..21].try_into().unwrap());
    let fat_size16 = u16::from_le_bytes(bpb[22..24].try_into().unwrap());
    let total_sectors32 = u32::from_le_bytes(bpb[32..36].try_into().unwrap());
    let fat_size32 = u32::from_le_bytes(bpb[36..40].try_into().unwrap());
    let root_cluster = u32::from_le_bytes(bpb[44..48].try_into().unwrap());

    let total_sectors = if total_sectors16 != 0 {
        total_sectors16 as u32
    } else {
        total_sectors32
    };

    let mut notes = Vec::new();
    if !matches!(bytes_per_sector, 512 | 1024 | 2048 | 4096) {
        notes.push(format!("unusual bytes_per_sector {bytes_per_sector}"));
    }
    if sectors_per_cluster == 0 {
        notes.push("sectors_per_cluster is zero".to_string());
    }
    if num_fats == 0 {
        notes.push("num_FATs is zero".to_string());
    }
    if total_sectors == 0 {
        notes.push("total_sectors is zero".to_string());
    }

    let is_fat32 = root_entry_count == 0 && fat_size16 == 0 && fat_size32 != 0;
    let fat_size_sectors = if is_fat32 { fat_size32 } else { fat_size16 as u32 };
    if !is_fat32 && fat_size16 == 0 {
        notes.push("FAT16 BPB has fat_sz16 == 0; cluster_count reported as 0".to_string());
    }

    let root_dir_sectors =
        ((root_entry_count as u64 * 32) + (bytes_per_sector as u64 - 1)) / bytes_per_sector.max(1) as u64;
    let root_dir_first_sector =
        reserved_sectors as u64 + num_fats as u64 * fat_size_sectors as u64;
    let first_data_sector = root_dir_first_sector + root_dir_sectors;

    let data_sectors = total_sectors as u64 - first_data_sector;
    let cluster_count = if sectors_per_cluster != 0 {
        data_sectors / sectors_per_cluster as u64
    } else {
        0
    };

    let fat_type = if fat_size_sectors == 0 && cluster_count == 0 {
        None
    } else if cluster_count < 4085 {
        Some(FatType::Fat12)
    } else if cluster_count < 65525 {
        Some(FatType::Fat16)
    } else {
        Some(FatType::Fat32)
    };

    let (volume_id, label) = if is_fat32 {
        let volume_id = u32::from_le_bytes(bpb[67..71].try_into().unwrap());
        let label = trim_label(&bpb[71..82]);
        (volume_id, label)
    } else {
        let volume_id = u32::from_le_bytes(bpb[39..43].try_into().unwrap());
        let label = trim_label(&bpb[43..54]);
        (volume_id, label)
    };

    let layout = FatLayout {
        fat_type: fat_type.clone(),
        bytes_per_sector,
        sectors_per_cluster,
        reserved_sectors,
        num_fats,
        root_entry_count,
        fat_size_sectors,
        root_dir_first_sector,
        root_dir_sector_count: root_dir_sectors,
        first_data_sector,
        root_cluster,
        volume_id,
        label: label.clone(),
    };

    let summary = FilesystemSummary {
        fs_type: FilesystemType::Vfat,
        label,
        uuid: format!("{volume_id:08x}"),
        block_size: bytes_per_sector as u32 * sectors_per_cluster.max(1) as u32,
        notes,
        fat_type,
        bytes_per_sector: Some(bytes_per_sector),
        sectors_per_cluster: Some(sectors_per_cluster),
        cluster_count: Some(cluster_count as u32),
        ..Default::default()
    };

    Ok((summary, layout))
}

/// A file found while walking the FAT directory tree.
pub struct FatFile {
    /// POSIX-style path relative to the filesystem root, e.g. `EFI/BOOT/BOOTX64.EFI`.
    pub path: String,
    pub data: Vec<u8>,
}

const ATTR_DIRECTORY: u8 = 0x10;
const ATTR_VOLUME_ID: u8 = 0x08;
const ATTR_LONG_NAME: u8 = 0x0F;

/// Walks the FAT12/16/32 directory tree starting at the root, descending
/// only into directories whose name matches `prefix_filter` (case
/// insensitive) at the top level — used to limit the walk to `EFI/**`
/// without reading the whole filesystem.
pub fn walk_dir(raw: &mut RawImage, base: u64, layout: &FatLayout, prefix_filter: &str) -> std::io::Result<Vec<FatFile>> {
    let mut out = Vec::new();
    let root_entries = if matches!(layout.fat_type, Some(FatType::Fat32)) {
        read_cluster_chain_entries(raw, base, layout, layout.root_cluster)?
    } else {
        let offset = base + layout.root_dir_first_sector * layout.bytes_per_sector as u64;
        let len = layout.root_dir_sector_count * layout.bytes_per_sector as u64;
        let mut buf = vec![0u8; len as usize];
        raw.read_at(offset, &mut buf)?;
        parse_dir_entries(&buf)
    };

    for entry in root_entries {
        if entry.is_dir && entry.name.eq_ignore_ascii_case(prefix_filter) {
            walk_subdir(raw, base, layout, entry.cluster, &entry.name, &mut out)?;
        }
    }
    Ok(out)
}

fn walk_subdir(
    raw: &mut RawImage,
    base: u64,
    layout: &FatLayout,
    cluster: u32,
    path_prefix: &str,
    out: &mut Vec<FatFile>,
) -> std::io::Result<()> {
    let entries = read_cluster_chain_entries(raw, base, layout, cluster)?;
    for entry in entries {
        if entry.name == "." || entry.name == ".." {
            continue;
        }
        let child_path = format!("{path_prefix}/{}", entry.name);
        if entry.is_dir {
            walk_subdir(raw, base, layout, entry.cluster, &child_path, out)?;
        } else {
            let data = read_cluster_chain_data(raw, base, layout, entry.cluster, entry.size)?;
            out.push(FatFile {
                path: child_path,
                data,
            });
        }
    }
    Ok(())
}

struct DirEntry {
    name: String,
    is_dir: bool,
    cluster: u32,
    size: u32,
}

fn parse_dir_entries(buf: &[u8]) -> Vec<DirEntry> {
    let mut out = Vec::new();
    for chunk in buf.chunks_exact(32) {
        let first = chunk[0];
        if first == 0x00 {
            break;
        }
        if first == 0xE5 {
            continue;
        }
        let attr = chunk[11];
        if attr == ATTR_LONG_NAME {
            continue;
        }
        if attr & ATTR_VOLUME_ID != 0 {
            continue;
        }
        let name = short_name(chunk);
        let is_dir = attr & ATTR_DIRECTORY != 0;
        let cluster_hi = u16::from_le_bytes(chunk[20..22].try_into().unwrap()) as u32;
        let cluster_lo = u16::from_le_bytes(chunk[26..28].try_into().unwrap()) as u32;
        let cluster = (cluster_hi << 16) | cluster_lo;
        let size = u32::from_le_bytes(chunk[28..32].try_into().unwrap());
        out.push(DirEntry {
            name,
            is_dir,
            cluster,
            size,
        });
    }
    out
}

fn short_name(chunk: &[u8]) -> String {
    let base = String::from_utf8_lossy(&chunk[0..8]).trim_end().to_string();
    let ext = String::from_utf8_lossy(&chunk[8..11]).trim_end().to_string();
    if base == "." || base == ".." {
        return base;
    }
    if ext.is_empty() {
        base
    } else {
        format!("{base}.{ext}")
    }
}

fn fat_entry_is_eoc(fat_type: &FatType, value: u32) -> bool {
    match fat_type {
        FatType::Fat12 => value >= 0xFF8,
        FatType::Fat16 => value >= 0xFFF8,
        FatType::Fat32 => value >= 0x0FFFFFF8,
    }
}

fn next_cluster(raw: &mut RawImage, base: u64, layout: &FatLayout, cluster: u32) -> std::io::Result<u32> {
    let fat_type = layout.fat_type.clone().unwrap_or(FatType::Fat32);
    let fat_offset = base + layout.reserved_sectors as u64 * layout.bytes_per_sector as u64;
    match fat_type {
        FatType::Fat12 => {
            let entry_offset = cluster as u64 + cluster as u64 / 2;
            let mut buf = [0u8; 2];
            raw.read_at(fat_offset + entry_offset, &mut buf)?;
            let raw_value = u16::from_le_bytes(buf);
            let value = if cluster % 2 == 0 {
                raw_value & 0x0FFF
            } else {
                raw_value >> 4
            };
            Ok(value as u32)
        }
        FatType::Fat16 => {
            let mut buf = [0u8; 2];
            raw.read_at(fat_offset + cluster as u64 * 2, &mut buf)?;
            Ok(u16::from_le_bytes(buf) as u32)
        }
        FatType::Fat32 => {
            let mut buf = [0u8; 4];
            raw.read_at(fat_offset + cluster as u64 * 4, &mut buf)?;
            Ok(u32::from_le_bytes(buf) & 0x0FFFFFFF)
        }
    }
}

fn read_cluster_chain_data(
    raw: &mut RawImage,
    base: u64,
    layout: &FatLayout,
    start_cluster: u32,
    size: u32,
) -> std::io::Result<Vec<u8>> {
    let mut data = Vec::with_capacity(size as usize);
    let mut cluster = start_cluster;
    let cluster_size = layout.bytes_per_sector as u64 * layout.sectors_per_cluster.max(1) as u64;
    let fat_type = layout.fat_type.clone().unwrap_or(FatType::Fat32);
    let mut guard = 0;
    while cluster >= 2 && data.len() < size as usize && guard < 1_000_000 {
        let offset = base + layout.cluster_to_sector(cluster) * layout.bytes_per_sector as u64;
        let mut buf = vec![0u8; cluster_size as usize];
        raw.read_at(offset, &mut buf)?;
        let remaining = size as usize - data.len();
        data.extend_from_slice(&buf[..remaining.min(buf.len())]);
        if data.len() >= size as usize {
            break;
        }
        let next = next_cluster(raw, base, layout, cluster)?;
        if fat_entry_is_eoc(&fat_type, next) {
            break;
        }
        cluster = next;
        guard += 1;
    }
    Ok(data)
}

fn read_cluster_chain_entries(
    raw: &mut RawImage,
    base: u64,
    layout: &FatLayout,
    start_cluster: u32,
) -> std::io::Result<Vec<DirEntry>> {
    let mut entries = Vec::new();
    let mut cluster = start_cluster;
    let cluster_size = layout.bytes_per_sector as u64 * layout.sectors_per_cluster.max(1) as u64;
    let fat_type = layout.fat_type.clone().unwrap_or(FatType::Fat32);
    let mut guard = 0;
    while cluster >= 2 && guard < 1_000_000 {
        let offset = base + layout.cluster_to_sector(cluster) * layout.bytes_per_sector as u64;
        let mut buf = vec![0u8; cluster_size as usize];
        raw.read_at(offset, &mut buf)?;
        entries.extend(parse_dir_entries(&buf));
        let next = next_cluster(raw, base, layout, cluster)?;
        if fat_entry_is_eoc(&fat_type, next) {
            break;
        }
        cluster = next;
        guard += 1;
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_fat32_bpb(total_sectors: u32, fat_size: u32, root_cluster: u32) -> Vec<u8> {
        let mut bpb = vec![0u8; 512];
        bpb[11..13].copy_from_slice(&512u16.to_le_bytes());
        bpb[13] = 8; // sectors per cluster
        bpb[14..16].copy_from_slice(&32u16.to_le_bytes()); // reserved
        bpb[16] = 2; // num fats
        bpb[17..19].copy_from_slice(&0u16.to_le_bytes()); // root_entry_count = 0 => fat32
        bpb[19..21].copy_from_slice(&0u16.to_le_bytes());
        bpb[22..24].copy_from_slice(&0u16.to_le_bytes()); // fat_sz16 = 0 => fat32
        bpb[32..36].copy_from_slice(&total_sectors.to_le_bytes());
        bpb[36..40].copy_from_slice(&fat_size.to_le_bytes());
        bpb[44..48].copy_from_slice(&root_cluster.to_le_bytes());
        bpb[67..71].copy_from_slice(&0xDEAD_BEEFu32.to_le_bytes());
        bpb[71..82].copy_from_slice(b"ESP        ");
        bpb[510] = 0x55;
        bpb[511] = 0xAA;
        bpb
    }

    #[test]
    fn sniff_checks_boot_signature() {
        let bpb = build_fat32_bpb(2_000_000, 2000, 2);
        assert_eq!(bpb[510], 0x55);
        assert_eq!(bpb[511], 0xAA);
    }

    #[test]
    fn short_name_joins_base_and_extension() {
        let mut chunk = [0x20u8; 32];
        chunk[0..8].copy_from_slice(b"BOOTX64 ");
        chunk[8..11].copy_from_slice(b"EFI");
        assert_eq!(short_name(&chunk), "BOOTX64.EFI");
    }

    #[test]
    fn fat32_eoc_detection() {
        assert!(fat_entry_is_eoc(&FatType::Fat32, 0x0FFFFFFF));
        assert!(!fat_entry_is_eoc(&FatType::Fat32, 5));
    }
}
