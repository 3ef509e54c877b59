//! Deterministic text rendering (spec.md §4.9). Tables follow the teacher's
//! `print_info` style (`prettytable::{Table, Row, Cell}`), one table per
//! logical block, written into the caller's `io::Write`.

use crate::model::{EqualityClass, ImageCompareResult, ImageSummary, PartitionDiffStatus};
use prettytable::{Cell, Row, Table};
use std::io::{self, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    Diff,
    Summary,
    Full,
}

pub fn render_summary(writer: &mut impl Write, image: &ImageSummary) -> io::Result<()> {
    let mut table = Table::new();
    table.add_row(Row::new(vec![Cell::new("File"), Cell::new(&image.file)]));
    if !image.sha256.is_empty() {
        table.add_row(Row::new(vec![Cell::new("SHA-256"), Cell::new(&image.sha256)]));
    }
    table.add_row(Row::new(vec![
        Cell::new("Size (bytes)"),
        Cell::new(&image.size_bytes.to_string()),
    ]));
    table.add_row(Row::new(vec![
        Cell::new("Partition table"),
        Cell::new(image.partition_table.table_type.as_str()),
    ]));
    table.add_row(Row::new(vec![
        Cell::new("Partitions"),
        Cell::new(&image.partition_table.partitions.len().to_string()),
    ]));

    let mut partitions_table = Table::new();
    partitions_table.add_row(Row::new(vec![
        Cell::new("Index"),
        Cell::new("Name"),
        Cell::new("Type"),
        Cell::new("Start LBA"),
        Cell::new("End LBA"),
        Cell::new("Filesystem"),
        Cell::new("EFI binaries"),
    ]));
    for p in &image.partition_table.partitions {
        let fs = p
            .filesystem
            .as_ref()
            .map(|fs| fs.fs_type.as_str().to_string())
            .unwrap_or_else(|| "-".to_string());
        let efi_count = p
            .filesystem
            .as_ref()
            .map(|fs| fs.efi_binaries.len())
            .unwrap_or(0);
        partitions_table.add_row(Row::new(vec![
            Cell::new(&p.index.to_string()),
            Cell::new(&p.name),
            Cell::new(&p.partition_type),
            Cell::new(&p.start_lba.to_string()),
            Cell::new(&p.end_lba.to_string()),
            Cell::new(&fs),
            Cell::new(&efi_count.to_string()),
        ]));
    }
    table.add_row(Row::new(vec![
        Cell::new("Partitions detail"),
        Cell::new(&partitions_table.to_string()),
    ]));

    if let Some(verity) = &image.verity {
        table.add_row(Row::new(vec![
            Cell::new("Verity"),
            Cell::new(&format!("{} ({})", verity.enabled, verity.method)),
        ]));
    }

    writeln!(writer, "{table}")
}

pub fn render_compare(writer: &mut impl Write, result: &ImageCompareResult, mode: RenderMode) -> io::Result<()> {
    writeln!(writer, "Equality:")?;
    let mut eq_table = Table::new();
    eq_table.add_row(Row::new(vec![Cell::new("Class"), Cell::new(class_label(&result.equality.class))]));
    eq_table.add_row(Row::new(vec![
        Cell::new("Volatile diffs"),
        Cell::new(&result.equality.volatile_diffs.to_string()),
    ]));
    eq_table.add_row(Row::new(vec![
        Cell::new("Meaningful diffs"),
        Cell::new(&result.equality.meaningful_diffs.to_string()),
    ]));
    writeln!(writer, "{eq_table}")?;

    if mode == RenderMode::Summary {
        writeln!(writer, "Summary:")?;
        let mut s = Table::new();
        s.add_row(Row::new(vec![Cell::new("Changed"), Cell::new(&result.summary.changed.to_string())]));
        s.add_row(Row::new(vec![Cell::new("Added"), Cell::new(&result.summary.added.to_string())]));
        s.add_row(Row::new(vec![Cell::new("Removed"), Cell::new(&result.summary.removed.to_string())]));
        s.add_row(Row::new(vec![Cell::new("Modified"), Cell::new(&result.summary.modified.to_string())]));
        writeln!(writer, "{s}")?;
        return Ok(());
    }

    if mode == RenderMode::Full {
        writeln!(writer, "From: {}", result.from)?;
        writeln!(writer, "To: {}", result.to)?;
        for reason in &result.equality.meaningful_reasons {
            writeln!(writer, "  meaningful: {reason}")?;
        }
        for reason in &result.equality.volatile_reasons {
            writeln!(writer, "  volatile: {reason}")?;
        }
    }

    if !result.diff.partition_table_changes.is_empty() {
        writeln!(writer, "Partition table:")?;
        let mut t = Table::new();
        t.add_row(Row::new(vec![Cell::new("Field"), Cell::new("From"), Cell::new("To")]));
        for c in &result.diff.partition_table_changes {
            t.add_row(Row::new(vec![Cell::new(&c.field), Cell::new(&c.from), Cell::new(&c.to)]));
        }
        writeln!(writer, "{t}")?;
    }

    if !result.diff.partitions.is_empty() {
        writeln!(writer, "Partitions:")?;
        let mut t = Table::new();
        t.add_row(Row::new(vec![Cell::new("Key"), Cell::new("Status"), Cell::new("Changes")]));
        for p in &result.diff.partitions {
            let status = match p.status {
                PartitionDiffStatus::Added => "added",
                PartitionDiffStatus::Removed => "removed",
                PartitionDiffStatus::Modified => "modified",
            };
            let changes = p
                .changes
                .iter()
                .map(|c| format!("{}: {} -> {}", c.field, c.from, c.to))
                .collect::<Vec<_>>()
                .join(", ");
            t.add_row(Row::new(vec![Cell::new(&p.key), Cell::new(status), Cell::new(&changes)]));
        }
        writeln!(writer, "{t}")?;
    }

    if !result.diff.global_efi_binaries.is_empty() {
        writeln!(writer, "EFI binaries (global):")?;
        let mut t = Table::new();
        t.add_row(Row::new(vec![Cell::new("Path"), Cell::new("Changes")]));
        for efi in &result.diff.global_efi_binaries {
            let changes = efi
                .changes
                .iter()
                .map(|c| format!("{}: {} -> {}", c.field, c.from, c.to))
                .collect::<Vec<_>>()
                .join(", ");
            t.add_row(Row::new(vec![Cell::new(&efi.path), Cell::new(&changes)]));

            if let Some(uki) = &efi.uki {
                if let Some(kernel_change) = uki.payload_changes.iter().find(|c| c.field == "kernelSha256") {
                    writeln!(
                        writer,
                        "UKI payload: kernel: {} -> {}",
                        short_hash(&kernel_change.from),
                        short_hash(&kernel_change.to)
                    )?;
                }
            }
        }
        writeln!(writer, "{t}")?;
    }

    if let Some(verity) = &result.diff.verity {
        writeln!(writer, "Verity:")?;
        if verity.added {
            writeln!(writer, "  added")?;
        } else if verity.removed {
            writeln!(writer, "  removed")?;
        } else {
            for c in &verity.changes {
                writeln!(writer, "  {}: {} -> {}", c.field, c.from, c.to)?;
            }
        }
    }

    Ok(())
}

fn short_hash(hash: &str) -> &str {
    &hash[..hash.len().min(12)]
}

fn class_label(class: &EqualityClass) -> &'static str {
    class.as_str()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CompareSummary, Equality, ImageDiff};

    fn empty_result() -> ImageCompareResult {
        ImageCompareResult {
            schema_version: "1".to_string(),
            from: "a.raw".to_string(),
            to: "b.raw".to_string(),
            equality: Equality {
                class: EqualityClass::Different,
                volatile_diffs: 0,
                meaningful_diffs: 1,
                volatile_reasons: Vec::new(),
                meaningful_reasons: vec!["sizeBytes: image size changed".to_string()],
            },
            summary: CompareSummary {
                changed: true,
                added: 0,
                removed: 0,
                modified: 0,
            },
            diff: ImageDiff::default(),
        }
    }

    #[test]
    fn render_diff_includes_equality_header() {
        let mut out = Vec::new();
        render_compare(&mut out, &empty_result(), RenderMode::Diff).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Equality:"));
    }

    #[test]
    fn render_full_includes_meaningful_reason() {
        let mut out = Vec::new();
        render_compare(&mut out, &empty_result(), RenderMode::Full).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("meaningful: sizeBytes"));
    }
}
