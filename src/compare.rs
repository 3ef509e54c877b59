//! Structural comparer (spec.md §4.8): diffs two `ImageSummary` values field
//! by field, classifies every change as volatile or meaningful, and derives
//! the final `Equality.class` from the tally.

use crate::model::{
    BootloaderConfigDiff, CompareSummary, EfiDiffEntry, EFIBinaryEvidence, Equality, EqualityClass,
    FieldChange, FilesystemDiff, FilesystemSummary, ImageCompareResult, ImageDiff, ImageSummary,
    PartitionDiffEntry, PartitionDiffStatus, PartitionSummary, PartitionTableSummary,
    SectionMapDiff, UkiDiff, VerityDiff, VerityInfo,
};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

fn cmdline_uuid_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)[0-9a-f]{8}[-_]?[0-9a-f]{4}[-_]?[0-9a-f]{4}[-_]?[0-9a-f]{4}[-_]?[0-9a-f]{12}")
            .expect("static UUID pattern is valid")
    })
}

/// Collapses whitespace and rewrites every UUID-looking token to a stable
/// placeholder, so two cmdlines differing only in disk-specific UUIDs
/// compare equal (spec.md §4.8 "cmdline normalization").
pub fn normalize_cmdline(cmdline: &str) -> String {
    let replaced = cmdline_uuid_regex().replace_all(cmdline, "<uuid>");
    replaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn change(field: &str, from: &str, to: &str, volatile: bool, reason: &str) -> Option<FieldChange> {
    if from == to {
        return None;
    }
    Some(FieldChange {
        field: field.to_string(),
        from: from.to_string(),
        to: to.to_string(),
        volatile,
        reason: reason.to_string(),
    })
}

fn partition_identity_key(table_type_is_gpt: bool, p: &PartitionSummary, index_in_order: usize) -> String {
    if table_type_is_gpt {
        if !p.partition_type.is_empty() {
            format!("gpt:{}:{}", p.partition_type.to_ascii_uppercase(), p.name.to_ascii_lowercase())
        } else {
            format!("gpt:{}:idx={}", p.name.to_ascii_lowercase(), index_in_order)
        }
    } else {
        format!(
            "mbr:{}:{}:idx={}",
            p.partition_type.to_ascii_lowercase(),
            p.name.to_ascii_lowercase(),
            index_in_order
        )
    }
}

fn keyed_partitions(pt: &PartitionTableSummary) -> BTreeMap<String, &PartitionSummary> {
    let is_gpt = matches!(pt.table_type, crate::model::PartitionTableType::Gpt);
    let mut seen: BTreeMap<String, u32> = BTreeMap::new();
    let mut out = BTreeMap::new();
    for (i, p) in pt.partitions.iter().enumerate() {
        let mut key = partition_identity_key(is_gpt, p, i + 1);
        if let Some(count) = seen.get_mut(&key) {
            *count += 1;
            key = format!("{key}#idx={}", p.index);
            if out.contains_key(&key) {
                key = format!("{key}#lba={}-{}", p.start_lba, p.end_lba);
            }
        } else {
            seen.insert(key.clone(), 1);
        }
        out.insert(key, p);
    }
    out
}

fn diff_partition_fields(from: &PartitionSummary, to: &PartitionSummary) -> Vec<FieldChange> {
    let mut changes = Vec::new();
    changes.extend(change("guid", &from.guid, &to.guid, true, "partition GUID varies between builds"));
    changes.extend(change("index", &from.index.to_string(), &to.index.to_string(), false, "partition index changed"));
    changes.extend(change("name", &from.name, &to.name, false, "partition name changed"));
    changes.extend(change("type", &from.partition_type, &to.partition_type, false, "partition type changed"));
    changes.extend(change("startLBA", &from.start_lba.to_string(), &to.start_lba.to_string(), false, "partition start moved"));
    changes.extend(change("endLBA", &from.end_lba.to_string(), &to.end_lba.to_string(), false, "partition end moved"));
    changes.extend(change("sizeBytes", &from.size_bytes.to_string(), &to.size_bytes.to_string(), false, "partition size changed"));
    changes.extend(change("flags", &from.flags, &to.flags, false, "partition attribute flags changed"));
    changes.extend(change("attrRaw", &from.attr_raw.to_string(), &to.attr_raw.to_string(), false, "raw attribute bits changed"));
    changes.extend(change(
        "logicalSectorSize",
        &from.logical_sector_size.to_string(),
        &to.logical_sector_size.to_string(),
        false,
        "logical sector size changed",
    ));
    changes
}

fn diff_filesystem(from: &Option<FilesystemSummary>, to: &Option<FilesystemSummary>) -> Option<FilesystemDiff> {
    match (from, to) {
        (None, None) => None,
        (Some(f), None) => Some(FilesystemDiff {
            changes: vec![FieldChange {
                field: "filesystem".to_string(),
                from: f.fs_type.as_str().to_string(),
                to: String::new(),
                volatile: false,
                reason: "filesystem removed".to_string(),
            }],
        }),
        (None, Some(t)) => Some(FilesystemDiff {
            changes: vec![FieldChange {
                field: "filesystem".to_string(),
                from: String::new(),
                to: t.fs_type.as_str().to_string(),
                volatile: false,
                reason: "filesystem added".to_string(),
            }],
        }),
        (Some(f), Some(t)) => {
            let mut changes = Vec::new();
            changes.extend(change("type", f.fs_type.as_str(), t.fs_type.as_str(), false, "filesystem type changed"));
            changes.extend(change("label", &f.label, &t.label, false, "filesystem label changed"));
            changes.extend(change("uuid", &f.uuid, &t.uuid, true, "filesystem UUID varies between builds"));
            changes.extend(change("blockSize", &f.block_size.to_string(), &t.block_size.to_string(), false, "block size changed"));
            if changes.is_empty() {
                None
            } else {
                Some(FilesystemDiff { changes })
            }
        }
    }
}

fn diff_section_map(from: &BTreeMap<String, String>, to: &BTreeMap<String, String>) -> SectionMapDiff {
    let mut diff = SectionMapDiff::default();
    for (name, hash) in to {
        match from.get(name) {
            None => {
                diff.added.insert(name.clone(), hash.clone());
            }
            Some(old) if old != hash => {
                diff.modified.insert(name.clone(), (old.clone(), hash.clone()));
            }
            _ => {}
        }
    }
    for (name, hash) in from {
        if !to.contains_key(name) {
            diff.removed.insert(name.clone(), hash.clone());
        }
    }
    diff
}

fn uki_only_volatile(from: &EFIBinaryEvidence, to: &EFIBinaryEvidence) -> bool {
    from.kernel_sha256 == to.kernel_sha256
        && from.uname == to.uname
        && normalize_cmdline(&from.cmdline) == normalize_cmdline(&to.cmdline)
}

fn diff_efi_binary(from: &EFIBinaryEvidence, to: &EFIBinaryEvidence) -> Option<EfiDiffEntry> {
    let mut changes = Vec::new();
    changes.extend(change("arch", &from.arch, &to.arch, false, "EFI binary architecture changed"));
    changes.extend(change("kind", from.kind.as_str(), to.kind.as_str(), false, "bootloader kind changed"));
    changes.extend(change("signed", &from.signed.to_string(), &to.signed.to_string(), true, "signature presence varies between builds"));
    changes.extend(change(
        "signatureSize",
        &from.signature_size.to_string(),
        &to.signature_size.to_string(),
        true,
        "signature size varies between builds",
    ));
    changes.extend(change("hasSbat", &from.has_sbat.to_string(), &to.has_sbat.to_string(), false, "SBAT presence changed"));
    changes.extend(change("isUki", &from.is_uki.to_string(), &to.is_uki.to_string(), false, "UKI classification changed"));
    changes.extend(change(
        "initrdSha256",
        &from.initrd_sha256,
        &to.initrd_sha256,
        true,
        "initrd hash is not yet reproducible across builds",
    ));

    let uki_aware = from.is_uki || to.is_uki;
    let is_volatile_if_uki = uki_aware && uki_only_volatile(from, to);

    changes.extend(change(
        "sha256",
        &from.sha256,
        &to.sha256,
        is_volatile_if_uki,
        if is_volatile_if_uki { "UKI differs only in volatile payload" } else { "EFI binary content changed" },
    ));
    changes.extend(change(
        "size",
        &from.size.to_string(),
        &to.size.to_string(),
        is_volatile_if_uki,
        if is_volatile_if_uki { "UKI differs only in volatile payload" } else { "EFI binary size changed" },
    ));
    changes.extend(change(
        "cmdline",
        &from.cmdline,
        &to.cmdline,
        is_volatile_if_uki,
        if is_volatile_if_uki { "cmdline differs only in UUID tokens" } else { "kernel cmdline changed" },
    ));
    changes.extend(change(
        "cmdlineSha256",
        &from.cmdline_sha256,
        &to.cmdline_sha256,
        is_volatile_if_uki,
        if is_volatile_if_uki { "cmdline differs only in UUID tokens" } else { "kernel cmdline changed" },
    ));
    changes.extend(change("kernelSha256", &from.kernel_sha256, &to.kernel_sha256, false, "kernel image changed"));
    changes.extend(change("unameSha256", &from.uname_sha256, &to.uname_sha256, false, "kernel version string changed"));
    changes.extend(change("osrelSha256", &from.osrel_sha256, &to.osrel_sha256, false, "os-release content changed"));

    let section_map = diff_section_map(&from.section_sha256, &to.section_sha256);
    let uki = if uki_aware {
        let payload_changes: Vec<FieldChange> = changes
            .iter()
            .filter(|c| matches!(c.field.as_str(), "sha256" | "size" | "cmdline" | "cmdlineSha256" | "kernelSha256" | "unameSha256"))
            .cloned()
            .collect();
        Some(UkiDiff { payload_changes, section_map })
    } else if !section_map.is_empty() {
        Some(UkiDiff { payload_changes: Vec::new(), section_map })
    } else {
        None
    };

    let boot_config = diff_boot_config(&from.boot_config, &to.boot_config);

    if changes.is_empty() && uki.is_none() && boot_config.is_none() {
        return None;
    }
    Some(EfiDiffEntry {
        path: to.path.clone(),
        changes,
        uki,
        boot_config,
    })
}

fn diff_kernel_references(
    from: &[crate::model::KernelReference],
    to: &[crate::model::KernelReference],
) -> Vec<FieldChange> {
    let from_map: BTreeMap<&str, &crate::model::KernelReference> =
        from.iter().map(|k| (k.path.as_str(), k)).collect();
    let to_map: BTreeMap<&str, &crate::model::KernelReference> =
        to.iter().map(|k| (k.path.as_str(), k)).collect();

    let mut paths: Vec<&str> = from_map.keys().chain(to_map.keys()).copied().collect();
    paths.sort();
    paths.dedup();

    let mut changes = Vec::new();
    for path in paths {
        match (from_map.get(path), to_map.get(path)) {
            (Some(f), Some(t)) => {
                if f.partition_uuid != t.partition_uuid || f.root_uuid != t.root_uuid {
                    changes.push(FieldChange {
                        field: format!("kernel_ref.{path}"),
                        from: f.partition_uuid.clone(),
                        to: t.partition_uuid.clone(),
                        volatile: true,
                        reason: "kernel reference UUID differs between builds".to_string(),
                    });
                }
            }
            (None, Some(_)) => changes.push(FieldChange {
                field: format!("kernel_ref.{path}"),
                from: String::new(),
                to: path.to_string(),
                volatile: false,
                reason: "kernel reference added".to_string(),
            }),
            (Some(_), None) => changes.push(FieldChange {
                field: format!("kernel_ref.{path}"),
                from: path.to_string(),
                to: String::new(),
                volatile: false,
                reason: "kernel reference removed".to_string(),
            }),
            (None, None) => unreachable!(),
        }
    }
    changes
}

/// Diffs UUID references grouped by context: a mismatch flag flipping is
/// meaningful (a reference that used to resolve now doesn't, or vice versa);
/// any other change to the set of referenced UUIDs is volatile, since the
/// UUID tokens themselves vary freely between builds (spec.md §4.8).
fn diff_uuid_references(
    from: &[crate::model::UuidReference],
    to: &[crate::model::UuidReference],
) -> Vec<FieldChange> {
    fn group(refs: &[crate::model::UuidReference]) -> BTreeMap<String, BTreeMap<String, bool>> {
        let mut m: BTreeMap<String, BTreeMap<String, bool>> = BTreeMap::new();
        for r in refs {
            m.entry(r.context.clone()).or_default().insert(r.uuid.clone(), r.mismatch);
        }
        m
    }
    let from_g = group(from);
    let to_g = group(to);

    let mut contexts: Vec<&String> = from_g.keys().chain(to_g.keys()).collect();
    contexts.sort();
    contexts.dedup();

    let empty = BTreeMap::new();
    let mut changes = Vec::new();
    for ctx in contexts {
        let f = from_g.get(ctx).unwrap_or(&empty);
        let t = to_g.get(ctx).unwrap_or(&empty);

        for (uuid, f_mismatch) in f {
            match t.get(uuid) {
                Some(t_mismatch) if f_mismatch != t_mismatch => changes.push(FieldChange {
                    field: format!("{ctx}.{uuid}"),
                    from: f_mismatch.to_string(),
                    to: t_mismatch.to_string(),
                    volatile: false,
                    reason: if *t_mismatch {
                        "UUID reference mismatch introduced".to_string()
                    } else {
                        "UUID reference mismatch resolved".to_string()
                    },
                }),
                Some(_) => {}
                None => changes.push(FieldChange {
                    field: ctx.clone(),
                    from: uuid.clone(),
                    to: String::new(),
                    volatile: true,
                    reason: "UUID reference removed".to_string(),
                }),
            }
        }
        for uuid in t.keys() {
            if !f.contains_key(uuid) {
                changes.push(FieldChange {
                    field: ctx.clone(),
                    from: String::new(),
                    to: uuid.clone(),
                    volatile: true,
                    reason: "UUID reference added".to_string(),
                });
            }
        }
    }
    changes
}

/// Notes are advisory text the validator attaches; additions/removals never
/// change meaning on their own (spec.md §4.8).
fn diff_notes(from: &[String], to: &[String]) -> Vec<FieldChange> {
    let from_set: BTreeSet<String> = from.iter().cloned().collect();
    let to_set: BTreeSet<String> = to.iter().cloned().collect();
    let mut changes = Vec::new();
    for n in &to_set {
        if !from_set.contains(n) {
            changes.push(FieldChange {
                field: "notes".to_string(),
                from: String::new(),
                to: n.clone(),
                volatile: true,
                reason: "note added".to_string(),
            });
        }
    }
    for n in &from_set {
        if !to_set.contains(n) {
            changes.push(FieldChange {
                field: "notes".to_string(),
                from: n.clone(),
                to: String::new(),
                volatile: true,
                reason: "note removed".to_string(),
            });
        }
    }
    changes
}

fn diff_boot_config(
    from: &Option<crate::model::BootloaderConfig>,
    to: &Option<crate::model::BootloaderConfig>,
) -> Option<BootloaderConfigDiff> {
    let (from, to) = match (from, to) {
        (Some(f), Some(t)) => (f, t),
        (None, None) => return None,
        _ => {
            return Some(BootloaderConfigDiff {
                notes_changes: vec![FieldChange {
                    field: "boot_config".to_string(),
                    from: String::new(),
                    to: String::new(),
                    volatile: false,
                    reason: "bootloader config presence changed".to_string(),
                }],
                ..Default::default()
            })
        }
    };

    let mut diff = BootloaderConfigDiff::default();

    for (path, hash) in &to.config_files {
        match from.config_files.get(path) {
            None => diff.config_file_changes.push(FieldChange {
                field: path.clone(),
                from: String::new(),
                to: hash.clone(),
                volatile: false,
                reason: "config file added".to_string(),
            }),
            Some(old) if old != hash => diff.config_file_changes.push(FieldChange {
                field: path.clone(),
                from: old.clone(),
                to: hash.clone(),
                volatile: false,
                reason: "config file modified".to_string(),
            }),
            _ => {}
        }
    }
    for path in from.config_files.keys() {
        if !to.config_files.contains_key(path) {
            diff.config_file_changes.push(FieldChange {
                field: path.clone(),
                from: "present".to_string(),
                to: String::new(),
                volatile: false,
                reason: "config file removed".to_string(),
            });
        }
    }

    let from_entries: BTreeMap<&str, &crate::model::BootEntry> =
        from.boot_entries.iter().map(|e| (e.name.as_str(), e)).collect();
    let to_entries: BTreeMap<&str, &crate::model::BootEntry> =
        to.boot_entries.iter().map(|e| (e.name.as_str(), e)).collect();

    for (name, entry) in &to_entries {
        match from_entries.get(name) {
            None => diff.boot_entries_added.push(entry.name.clone()),
            Some(old) => {
                if old.kernel != entry.kernel {
                    diff.boot_entries_modified.push(FieldChange {
                        field: format!("{name}.kernel"),
                        from: old.kernel.clone(),
                        to: entry.kernel.clone(),
                        volatile: false,
                        reason: "boot entry kernel changed".to_string(),
                    });
                } else if old.initrd != entry.initrd {
                    diff.boot_entries_modified.push(FieldChange {
                        field: format!("{name}.initrd"),
                        from: old.initrd.clone(),
                        to: entry.initrd.clone(),
                        volatile: false,
                        reason: "boot entry initrd changed".to_string(),
                    });
                } else if normalize_cmdline(&old.cmdline) != normalize_cmdline(&entry.cmdline) {
                    diff.boot_entries_modified.push(FieldChange {
                        field: format!("{name}.cmdline"),
                        from: old.cmdline.clone(),
                        to: entry.cmdline.clone(),
                        volatile: false,
                        reason: "boot entry cmdline changed".to_string(),
                    });
                } else if old.cmdline != entry.cmdline {
                    diff.boot_entries_modified.push(FieldChange {
                        field: format!("{name}.cmdline"),
                        from: old.cmdline.clone(),
                        to: entry.cmdline.clone(),
                        volatile: true,
                        reason: "boot entry cmdline differs only in UUID tokens".to_string(),
                    });
                }
            }
        }
    }
    for name in from_entries.keys() {
        if !to_entries.contains_key(name) {
            diff.boot_entries_removed.push(name.to_string());
        }
    }

    diff.kernel_reference_changes = diff_kernel_references(&from.kernel_references, &to.kernel_references);
    diff.uuid_reference_changes = diff_uuid_references(&from.uuid_references, &to.uuid_references);
    diff.notes_changes = diff_notes(&from.notes, &to.notes);

    if diff.config_file_changes.is_empty()
        && diff.boot_entries_added.is_empty()
        && diff.boot_entries_removed.is_empty()
        && diff.boot_entries_modified.is_empty()
        && diff.kernel_reference_changes.is_empty()
        && diff.uuid_reference_changes.is_empty()
        && diff.notes_changes.is_empty()
    {
        None
    } else {
        Some(diff)
    }
}

fn diff_verity(from: &Option<VerityInfo>, to: &Option<VerityInfo>) -> Option<VerityDiff> {
    match (from, to) {
        (None, None) => None,
        (Some(_), None) => Some(VerityDiff { removed: true, ..Default::default() }),
        (None, Some(_)) => Some(VerityDiff { added: true, ..Default::default() }),
        (Some(f), Some(t)) => {
            let mut changes = Vec::new();
            changes.extend(change("enabled", &f.enabled.to_string(), &t.enabled.to_string(), false, "verity enablement changed"));
            changes.extend(change("method", &f.method, &t.method, false, "verity method changed"));
            changes.extend(change("rootDevice", &f.root_device, &t.root_device, false, "verity root device changed"));
            changes.extend(change("hashPartition", &f.hash_partition.to_string(), &t.hash_partition.to_string(), false, "verity hash partition changed"));
            if changes.is_empty() {
                None
            } else {
                Some(VerityDiff { changes, added: false, removed: false })
            }
        }
    }
}

/// Compares two image summaries and produces a full structural diff plus
/// the derived equality classification.
pub fn compare(from: &ImageSummary, to: &ImageSummary) -> ImageCompareResult {
    let mut image_changes = Vec::new();
    image_changes.extend(change("sizeBytes", &from.size_bytes.to_string(), &to.size_bytes.to_string(), false, "image size changed"));

    let mut pt_changes = Vec::new();
    pt_changes.extend(change("diskGuid", &from.partition_table.disk_guid, &to.partition_table.disk_guid, true, "disk GUID varies between builds"));
    pt_changes.extend(change("type", from.partition_table.table_type.as_str(), to.partition_table.table_type.as_str(), false, "partition table type changed"));
    pt_changes.extend(change(
        "logicalSectorSize",
        &from.partition_table.logical_sector_size.to_string(),
        &to.partition_table.logical_sector_size.to_string(),
        false,
        "logical sector size changed",
    ));
    pt_changes.extend(change(
        "physicalSectorSize",
        &from.partition_table.physical_sector_size.to_string(),
        &to.partition_table.physical_sector_size.to_string(),
        false,
        "physical sector size changed",
    ));
    pt_changes.extend(change(
        "protectiveMbr",
        &from.partition_table.protective_mbr.to_string(),
        &to.partition_table.protective_mbr.to_string(),
        false,
        "protective MBR presence changed",
    ));

    let from_keyed = keyed_partitions(&from.partition_table);
    let to_keyed = keyed_partitions(&to.partition_table);

    let mut all_keys: Vec<&String> = from_keyed.keys().chain(to_keyed.keys()).collect();
    all_keys.sort();
    all_keys.dedup();

    let mut partitions = Vec::new();
    let mut added = 0u32;
    let mut removed = 0u32;
    let mut modified = 0u32;
    let mut global_efi: BTreeMap<String, EfiDiffEntry> = BTreeMap::new();

    for key in all_keys {
        match (from_keyed.get(key), to_keyed.get(key)) {
            (None, Some(_)) => {
                added += 1;
                partitions.push(PartitionDiffEntry {
                    key: key.clone(),
                    status: PartitionDiffStatus::Added,
                    changes: Vec::new(),
                    filesystem: None,
                    efi_binaries: Vec::new(),
                });
            }
            (Some(_), None) => {
                removed += 1;
                partitions.push(PartitionDiffEntry {
                    key: key.clone(),
                    status: PartitionDiffStatus::Removed,
                    changes: Vec::new(),
                    filesystem: None,
                    efi_binaries: Vec::new(),
                });
            }
            (Some(f), Some(t)) => {
                let field_changes = diff_partition_fields(f, t);
                let filesystem = diff_filesystem(&f.filesystem, &t.filesystem);

                let empty = Vec::new();
                let from_efi = f.filesystem.as_ref().map(|fs| &fs.efi_binaries).unwrap_or(&empty);
                let to_efi = t.filesystem.as_ref().map(|fs| &fs.efi_binaries).unwrap_or(&empty);
                let efi_binaries = diff_efi_binaries(from_efi, to_efi, &mut global_efi);

                if !field_changes.is_empty() || filesystem.is_some() || !efi_binaries.is_empty() {
                    modified += 1;
                    partitions.push(PartitionDiffEntry {
                        key: key.clone(),
                        status: PartitionDiffStatus::Modified,
                        changes: field_changes,
                        filesystem,
                        efi_binaries,
                    });
                }
            }
            (None, None) => unreachable!(),
        }
    }

    let verity = diff_verity(&from.verity, &to.verity);

    let diff = ImageDiff {
        image_changes,
        partition_table_changes: pt_changes,
        partitions,
        global_efi_binaries: global_efi.into_values().collect(),
        verity,
    };

    let (volatile_diffs, meaningful_diffs, volatile_reasons, meaningful_reasons) = tally(&diff);

    let both_hashed = !from.sha256.is_empty() && !to.sha256.is_empty();
    let hashes_equal = both_hashed && from.sha256 == to.sha256;

    let class = if both_hashed && hashes_equal {
        EqualityClass::BinaryIdentical
    } else if meaningful_diffs == 0 && both_hashed {
        EqualityClass::SemanticallyIdentical
    } else if meaningful_diffs == 0 {
        EqualityClass::SemanticallyIdenticalUnverified
    } else {
        EqualityClass::Different
    };

    ImageCompareResult {
        schema_version: "1".to_string(),
        from: from.file.clone(),
        to: to.file.clone(),
        equality: Equality {
            class,
            volatile_diffs,
            meaningful_diffs,
            volatile_reasons,
            meaningful_reasons,
        },
        summary: CompareSummary {
            changed: added > 0 || removed > 0 || modified > 0 || !diff.image_changes.is_empty() || !diff.partition_table_changes.is_empty(),
            added,
            removed,
            modified,
        },
        diff,
    }
}

fn diff_efi_binaries(
    from: &[EFIBinaryEvidence],
    to: &[EFIBinaryEvidence],
    global: &mut BTreeMap<String, EfiDiffEntry>,
) -> Vec<EfiDiffEntry> {
    let from_map: BTreeMap<&str, &EFIBinaryEvidence> = from.iter().map(|b| (b.path.as_str(), b)).collect();
    let to_map: BTreeMap<&str, &EFIBinaryEvidence> = to.iter().map(|b| (b.path.as_str(), b)).collect();

    let mut paths: Vec<&str> = from_map.keys().chain(to_map.keys()).copied().collect();
    paths.sort();
    paths.dedup();

    let mut out = Vec::new();
    for path in paths {
        match (from_map.get(path), to_map.get(path)) {
            (None, Some(_)) => {
                let entry = EfiDiffEntry {
                    path: path.to_string(),
                    changes: vec![FieldChange {
                        field: "path".to_string(),
                        from: String::new(),
                        to: path.to_string(),
                        volatile: false,
                        reason: "EFI binary added".to_string(),
                    }],
                    uki: None,
                    boot_config: None,
                };
                global.entry(path.to_string()).or_insert_with(|| entry.clone());
                out.push(entry);
            }
            (Some(_), None) => {
                let entry = EfiDiffEntry {
                    path: path.to_string(),
                    changes: vec![FieldChange {
                        field: "path".to_string(),
                        from: path.to_string(),
                        to: String::new(),
                        volatile: false,
                        reason: "EFI binary removed".to_string(),
                    }],
                    uki: None,
                    boot_config: None,
                };
                global.entry(path.to_string()).or_insert_with(|| entry.clone());
                out.push(entry);
            }
            (Some(f), Some(t)) => {
                if let Some(entry) = diff_efi_binary(f, t) {
                    global.entry(path.to_string()).or_insert_with(|| entry.clone());
                    out.push(entry);
                }
            }
            (None, None) => unreachable!(),
        }
    }
    out
}

fn tally(diff: &ImageDiff) -> (u32, u32, Vec<String>, Vec<String>) {
    let mut volatile = 0u32;
    let mut meaningful = 0u32;
    let mut volatile_reasons = Vec::new();
    let mut meaningful_reasons = Vec::new();

    let mut bucket = |c: &FieldChange| {
        if c.volatile {
            volatile += 1;
            volatile_reasons.push(format!("{}: {}", c.field, c.reason));
        } else {
            meaningful += 1;
            meaningful_reasons.push(format!("{}: {}", c.field, c.reason));
        }
    };

    for c in &diff.image_changes {
        bucket(c);
    }
    for c in &diff.partition_table_changes {
        bucket(c);
    }
    for p in &diff.partitions {
        match p.status {
            PartitionDiffStatus::Added | PartitionDiffStatus::Removed => {
                meaningful += 1;
                meaningful_reasons.push(format!("{}: partition {:?}", p.key, p.status));
            }
            PartitionDiffStatus::Modified => {
                for c in &p.changes {
                    bucket(c);
                }
                if let Some(fs) = &p.filesystem {
                    for c in &fs.changes {
                        bucket(c);
                    }
                }
                for efi in &p.efi_binaries {
                    tally_efi(efi, &mut bucket);
                }
            }
        }
    }
    for efi in &diff.global_efi_binaries {
        tally_efi(efi, &mut bucket);
    }
    if let Some(v) = &diff.verity {
        if v.added || v.removed {
            meaningful += 1;
            meaningful_reasons.push("verity: presence changed".to_string());
        }
        for c in &v.changes {
            bucket(c);
        }
    }

    (volatile, meaningful, volatile_reasons, meaningful_reasons)
}

fn tally_efi(efi: &EfiDiffEntry, bucket: &mut impl FnMut(&FieldChange)) {
    for c in &efi.changes {
        bucket(c);
    }
    if let Some(uki) = &efi.uki {
        for c in &uki.payload_changes {
            bucket(c);
        }
    }
    if let Some(cfg) = &efi.boot_config {
        for c in &cfg.config_file_changes {
            bucket(c);
        }
        for c in &cfg.boot_entries_modified {
            bucket(c);
        }
        for c in &cfg.kernel_reference_changes {
            bucket(c);
        }
        for c in &cfg.uuid_reference_changes {
            bucket(c);
        }
        for c in &cfg.notes_changes {
            bucket(c);
        }
        if !cfg.boot_entries_added.is_empty() || !cfg.boot_entries_removed.is_empty() {
            bucket(&FieldChange {
                field: "boot_entries".to_string(),
                from: String::new(),
                to: String::new(),
                volatile: false,
                reason: "boot entries added/removed".to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_cmdline_collapses_uuid_differences() {
        let a = "root=UUID=aaaaaaaa-1111-2222-3333-444444444444 ro";
        let b = "root=UUID=bbbbbbbb-1111-2222-3333-444444444444 ro";
        assert_eq!(normalize_cmdline(a), normalize_cmdline(b));
    }

    #[test]
    fn normalize_cmdline_distinguishes_extra_tokens() {
        let a = "root=UUID=aaaaaaaa-1111-2222-3333-444444444444 ro";
        let c = "root=UUID=aaaaaaaa-1111-2222-3333-444444444444 ro quiet";
        assert_ne!(normalize_cmdline(a), normalize_cmdline(c));
    }

    #[test]
    fn identical_summaries_have_no_diffs() {
        let summary = ImageSummary {
            file: "a.raw".to_string(),
            sha256: "abc".to_string(),
            size_bytes: 1024,
            partition_table: PartitionTableSummary::default(),
            verity: None,
        };
        let result = compare(&summary, &summary);
        assert!(!result.summary.changed);
        assert_eq!(result.equality.class, EqualityClass::BinaryIdentical);
    }

    #[test]
    fn unverified_when_hash_missing_and_no_meaningful_diff() {
        let summary = ImageSummary {
            file: "a.raw".to_string(),
            sha256: String::new(),
            size_bytes: 1024,
            partition_table: PartitionTableSummary::default(),
            verity: None,
        };
        let result = compare(&summary, &summary);
        assert_eq!(result.equality.class, EqualityClass::SemanticallyIdenticalUnverified);
    }

    #[test]
    fn boot_config_diff_classifies_uuid_and_kernel_ref_changes() {
        use crate::model::{BootloaderConfig, KernelReference, UuidReference};

        let from = BootloaderConfig {
            kernel_references: vec![KernelReference {
                path: "gpt2".to_string(),
                partition_uuid: "aaaa".to_string(),
                ..Default::default()
            }],
            uuid_references: vec![UuidReference {
                uuid: "deadbeef".to_string(),
                context: "kernel_cmdline".to_string(),
                mismatch: true,
                ..Default::default()
            }],
            notes: vec!["no bootloader config files found".to_string()],
            ..Default::default()
        };
        let to = BootloaderConfig {
            kernel_references: vec![KernelReference {
                path: "gpt2".to_string(),
                partition_uuid: "bbbb".to_string(),
                ..Default::default()
            }],
            uuid_references: vec![UuidReference {
                uuid: "deadbeef".to_string(),
                context: "kernel_cmdline".to_string(),
                mismatch: false,
                ..Default::default()
            }],
            notes: vec![],
            ..Default::default()
        };

        let diff = diff_boot_config(&Some(from), &Some(to)).unwrap();
        assert_eq!(diff.kernel_reference_changes.len(), 1);
        assert!(diff.kernel_reference_changes[0].volatile);
        assert_eq!(diff.uuid_reference_changes.len(), 1);
        assert!(!diff.uuid_reference_changes[0].volatile);
        assert_eq!(diff.notes_changes.len(), 1);
        assert!(diff.notes_changes[0].volatile);
    }

    #[test]
    fn size_change_is_meaningful_and_different() {
        let from = ImageSummary {
            file: "a.raw".to_string(),
            sha256: String::new(),
            size_bytes: 1024,
            partition_table: PartitionTableSummary::default(),
            verity: None,
        };
        let mut to = from.clone();
        to.size_bytes = 2048;
        let result = compare(&from, &to);
        assert_eq!(result.equality.class, EqualityClass::Different);
        assert!(result.equality.meaningful_diffs >= 1);
    }
}
