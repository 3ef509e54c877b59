//! Top-level partition-table decode dispatch (spec.md §4.2): sniff GPT vs
//! MBR from LBA0/LBA1, decode the chosen variant, then derive the
//! cross-cutting `largest_free_span` and `misaligned_partitions` fields
//! that apply regardless of table type.

use crate::bytesrc::RawImage;
use crate::error::{Error, Result};
use crate::mbr::{self, MbrSector};
use crate::model::{FreeSpanSummary, PartitionTableSummary};
use crate::gpt;

const ONE_MIB: u64 = 1024 * 1024;

pub fn decode(raw: &mut RawImage) -> Result<PartitionTableSummary> {
    let mut sector = [0u8; 512];
    raw.read_at(0, &mut sector)?;
    let mbr = MbrSector::from_bytes(&sector).map_err(|_| Error::UnsupportedTableType)?;
    if !mbr.is_valid() {
        return Err(Error::UnsupportedTableType);
    }

    let mut table = if mbr.is_protective() {
        gpt::decode(raw, true)?
    } else {
        mbr::decode(raw)?
    };

    table.largest_free_span = largest_free_span(&table, raw.size_bytes / table.logical_sector_size as u64);
    table.misaligned_partitions = misaligned_partitions(&table);
    Ok(table)
}

fn largest_free_span(table: &PartitionTableSummary, total_sectors: u64) -> Option<FreeSpanSummary> {
    if total_sectors == 0 {
        return None;
    }
    let mut spans: Vec<(u64, u64)> = Vec::new();
    let mut cursor = 0u64;
    for p in &table.partitions {
        if p.start_lba > cursor {
            spans.push((cursor, p.start_lba - 1));
        }
        cursor = p.end_lba + 1;
    }
    if cursor < total_sectors {
        spans.push((cursor, total_sectors - 1));
    }

    spans
        .into_iter()
        .filter(|(s, e)| e >= s)
        .max_by_key(|(s, e)| e - s + 1)
        .map(|(s, e)| FreeSpanSummary {
            start_lba: s,
            end_lba: e,
            size_bytes: (e - s + 1) * table.logical_sector_size as u64,
        })
}

fn misaligned_partitions(table: &PartitionTableSummary) -> Vec<u32> {
    let align = if table.physical_sector_size > 0 {
        (table.physical_sector_size as u64).max(ONE_MIB)
    } else {
        ONE_MIB.max(4096)
    };
    table
        .partitions
        .iter()
        .filter(|p| {
            let start_bytes = p.start_lba * table.logical_sector_size as u64;
            start_bytes % align != 0 || start_bytes % ONE_MIB != 0
        })
        .map(|p| p.index)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PartitionSummary, PartitionTableType};

    fn table_with(partitions: Vec<PartitionSummary>) -> PartitionTableSummary {
        PartitionTableSummary {
            table_type: PartitionTableType::Gpt,
            disk_guid: String::new(),
            logical_sector_size: 512,
            physical_sector_size: 512,
            protective_mbr: true,
            partitions,
            largest_free_span: None,
            misaligned_partitions: Vec::new(),
        }
    }

    fn part(index: u32, start: u64, end: u64) -> PartitionSummary {
        PartitionSummary {
            index,
            start_lba: start,
            end_lba: end,
            size_bytes: (end - start + 1) * 512,
            logical_sector_size: 512,
            ..Default::default()
        }
    }

    #[test]
    fn largest_free_span_picks_the_biggest_gap() {
        let table = table_with(vec![part(1, 2048, 4095), part(2, 10000, 12000)]);
        let span = largest_free_span(&table, 20000).unwrap();
        assert_eq!(span.start_lba, 12001);
        assert_eq!(span.end_lba, 19999);
    }

    #[test]
    fn no_gap_returns_none() {
        let table = table_with(vec![part(1, 0, 999)]);
        let span = largest_free_span(&table, 1000);
        assert!(span.is_none());
    }

    #[test]
    fn misaligned_partition_is_flagged() {
        let mut table = table_with(vec![part(1, 63, 2047)]); // 63*512 not 1MiB aligned
        table.misaligned_partitions = misaligned_partitions(&table);
        assert_eq!(table.misaligned_partitions, vec![1]);
    }

    #[test]
    fn aligned_partition_is_not_flagged() {
        let mut table = table_with(vec![part(1, 2048, 4095)]); // 2048*512 = 1MiB
        table.misaligned_partitions = misaligned_partitions(&table);
        assert!(table.misaligned_partitions.is_empty());
    }
}
