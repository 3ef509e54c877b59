//! dm-verity detection (spec.md §4.7): partition naming plus the first
//! UKI's cmdline are the only signals available without mounting anything.

use crate::model::{EFIBinaryEvidence, PartitionTableSummary, VerityInfo};

fn find_hash_partition(pt: &PartitionTableSummary) -> Option<u32> {
    pt.partitions
        .iter()
        .find(|p| {
            let lower = p.name.to_ascii_lowercase();
            lower.contains("hash") || lower == "roothashmap"
        })
        .map(|p| p.index)
}

fn first_uki_cmdline(efi_binaries: &[EFIBinaryEvidence]) -> Option<&str> {
    efi_binaries
        .iter()
        .find(|b| b.is_uki)
        .map(|b| b.cmdline.as_str())
}

fn extract_root(cmdline: &str) -> String {
    cmdline
        .split_whitespace()
        .find_map(|tok| tok.strip_prefix("root=").map(|v| v.to_string()))
        .unwrap_or_default()
}

/// Detects dm-verity evidence across the whole image: a hash-bearing
/// partition and/or verity markers in the first UKI's kernel cmdline.
pub fn detect(pt: &PartitionTableSummary, efi_binaries: &[EFIBinaryEvidence]) -> Option<VerityInfo> {
    let hash_partition = find_hash_partition(pt);
    let cmdline = first_uki_cmdline(efi_binaries);

    let mut notes = Vec::new();
    if hash_partition.is_some() && cmdline.is_none() {
        notes.push("hash partition present but no UKI cmdline available to confirm verity".to_string());
    }

    let cmdline = cmdline?;

    let method = if cmdline.contains("systemd.verity_name=")
        || cmdline.contains("systemd.verity_root_data=")
        || cmdline.contains("systemd.verity_root_hash=")
    {
        "systemd-verity"
    } else if cmdline.contains("root=/dev/mapper/") && cmdline.contains("verity") {
        "custom-initramfs"
    } else if cmdline.contains("roothash=") {
        "roothash-parameter"
    } else {
        return None;
    };

    Some(VerityInfo {
        enabled: true,
        method: method.to_string(),
        root_device: extract_root(cmdline),
        hash_partition: hash_partition.unwrap_or(0),
        notes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PartitionSummary;

    fn pt_with(partitions: Vec<PartitionSummary>) -> PartitionTableSummary {
        PartitionTableSummary {
            partitions,
            ..Default::default()
        }
    }

    fn uki(cmdline: &str) -> EFIBinaryEvidence {
        EFIBinaryEvidence {
            is_uki: true,
            cmdline: cmdline.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn detects_systemd_verity_from_cmdline() {
        let pt = pt_with(vec![PartitionSummary {
            index: 3,
            name: "roothash".to_string(),
            ..Default::default()
        }]);
        let binaries = vec![uki("root=/dev/sda2 systemd.verity_root_hash=deadbeef ro")];
        let info = detect(&pt, &binaries).unwrap();
        assert_eq!(info.method, "systemd-verity");
        assert_eq!(info.hash_partition, 3);
        assert_eq!(info.root_device, "/dev/sda2");
    }

    #[test]
    fn no_uki_cmdline_returns_none_with_note_suppressed() {
        let pt = pt_with(vec![]);
        let info = detect(&pt, &[]);
        assert!(info.is_none());
    }

    #[test]
    fn custom_initramfs_detection() {
        let pt = pt_with(vec![]);
        let binaries = vec![uki("root=/dev/mapper/root-verity ro")];
        let info = detect(&pt, &binaries).unwrap();
        assert_eq!(info.method, "custom-initramfs");
    }

    #[test]
    fn first_uki_is_selected_even_with_empty_cmdline() {
        let pt = pt_with(vec![]);
        let binaries = vec![
            uki(""),
            uki("root=/dev/mapper/root-verity verity"),
        ];
        assert_eq!(first_uki_cmdline(&binaries), Some(""));
        assert!(detect(&pt, &binaries).is_none());
    }
}
