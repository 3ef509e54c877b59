//! Filesystem probing dispatch (spec.md §4.3): sniff a partition's start for
//! a recognized magic, decode the matching superblock/BPB, and — for an EFI
//! System Partition — walk its FAT directory tree to collect EFI binary
//! evidence without mounting anything.

pub mod ext;
pub mod fat;
pub mod squashfs;

use crate::bootconfig;
use crate::bootloader;
use crate::bytesrc::RawImage;
use crate::gpt::ESP_TYPE_GUID;
use crate::model::{BootloaderKind, FilesystemSummary, PartitionSummary};
use crate::pe;

/// Identifies a partition as an EFI System Partition per spec.md §4.3: GPT
/// type GUID match, or a GPT partition named "boot", or (for MBR, which has
/// no standard ESP type GUID) an MBR type byte of `0xEF`.
pub fn is_esp(partition: &PartitionSummary) -> bool {
    partition.partition_type.eq_ignore_ascii_case(ESP_TYPE_GUID)
        || partition.name.eq_ignore_ascii_case("boot")
        || partition.name.eq_ignore_ascii_case("efi")
        || partition.partition_type == "0xEF"
}

/// Probes the filesystem starting at `base` (the partition's first byte
/// offset into the image) and, if it is vfat and looks like an ESP, walks
/// `EFI/**` collecting PE evidence for every binary found.
pub fn probe(
    raw: &mut RawImage,
    base: u64,
    partition: &PartitionSummary,
) -> std::io::Result<Option<FilesystemSummary>> {
    if ext::sniff(raw, base)? {
        return Ok(Some(ext::decode(raw, base)?));
    }
    if squashfs::sniff(raw, base)? {
        return Ok(Some(squashfs::decode(raw, base)?));
    }
    if fat::sniff(raw, base)? {
        let (mut summary, layout) = fat::decode(raw, base)?;
        if is_esp(partition) {
            populate_efi_binaries(raw, base, &layout, &mut summary);
        }
        return Ok(Some(summary));
    }
    Ok(None)
}

/// Walks `EFI/**` collecting every PE binary (classifying it on the spot so a
/// companion `grub.cfg` found in the same tree can be attached immediately)
/// plus any `grub.cfg` found alongside them, then separately checks the
/// top-level `loader/` directory for systemd-boot's `loader.conf` (spec.md
/// §4.3, §4.6).
fn populate_efi_binaries(
    raw: &mut RawImage,
    base: u64,
    layout: &fat::FatLayout,
    summary: &mut FilesystemSummary,
) {
    let efi_files = match fat::walk_dir(raw, base, layout, "EFI") {
        Ok(files) => files,
        Err(e) => {
            summary.notes.push(format!("failed to walk EFI directory: {e}"));
            return;
        }
    };

    let grub_cfg = efi_files
        .iter()
        .find(|f| f.path.to_ascii_lowercase().ends_with("grub.cfg"));

    for file in &efi_files {
        if !file.path.to_ascii_uppercase().ends_with(".EFI") {
            continue;
        }
        match pe::decode(&file.path, &file.data) {
            Ok(mut evidence) => {
                evidence.kind = bootloader::classify_one(&evidence.path, &evidence.sections);
                if evidence.is_uki {
                    summary.has_uki = true;
                }
                if evidence.kind == BootloaderKind::Shim {
                    summary.has_shim = true;
                }
                if let Some(cfg_file) = grub_cfg {
                    let content = String::from_utf8_lossy(&cfg_file.data);
                    attach_grub_config(&mut evidence, &cfg_file.path, &content);
                }
                summary.efi_binaries.push(evidence);
            }
            Err(e) => {
                summary
                    .notes
                    .push(format!("failed to parse {}: {e}", file.path));
            }
        }
    }

    match fat::walk_dir(raw, base, layout, "loader") {
        Ok(loader_files) => {
            if let Some(loader_conf) = loader_files
                .iter()
                .find(|f| f.path.to_ascii_lowercase().ends_with("loader.conf"))
            {
                let content = String::from_utf8_lossy(&loader_conf.data);
                let cfg = bootconfig::parse_loader_conf(&loader_conf.path, &content);
                attach_loader_config(&mut summary.efi_binaries, &cfg);
            }
        }
        Err(e) => {
            summary.notes.push(format!("failed to walk loader directory: {e}"));
        }
    }
}

/// Attaches a parsed `grub.cfg` to a Grub or shim binary. Other kinds (UKI,
/// systemd-boot, unknown) never get a grub config, even when one is present
/// elsewhere on the ESP.
fn attach_grub_config(evidence: &mut crate::model::EFIBinaryEvidence, cfg_path: &str, cfg_content: &str) {
    if matches!(evidence.kind, BootloaderKind::Grub | BootloaderKind::Shim) {
        evidence.boot_config = Some(bootconfig::parse_grub_cfg(cfg_path, cfg_content));
    }
}

/// Attaches a parsed `loader.conf` to every systemd-boot binary found on the
/// partition (in practice there is exactly one).
fn attach_loader_config(binaries: &mut [crate::model::EFIBinaryEvidence], cfg: &crate::model::BootloaderConfig) {
    for binary in binaries.iter_mut() {
        if binary.kind == BootloaderKind::SystemdBoot {
            binary.boot_config = Some(cfg.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn esp_detection_matches_type_guid() {
        let p = PartitionSummary {
            partition_type: ESP_TYPE_GUID.to_string(),
            ..Default::default()
        };
        assert!(is_esp(&p));
    }

    #[test]
    fn esp_detection_matches_name() {
        let p = PartitionSummary {
            name: "EFI".to_string(),
            ..Default::default()
        };
        assert!(is_esp(&p));
    }

    #[test]
    fn non_esp_partition_is_not_flagged() {
        let p = PartitionSummary {
            partition_type: "0x83".to_string(),
            name: "rootfs".to_string(),
            ..Default::default()
        };
        assert!(!is_esp(&p));
    }

    #[test]
    fn grub_binary_gets_companion_config_attached() {
        use crate::model::{BootloaderKind, EFIBinaryEvidence};

        let mut evidence = EFIBinaryEvidence {
            path: "EFI/fedora/grubx64.efi".to_string(),
            kind: BootloaderKind::Grub,
            ..Default::default()
        };
        attach_grub_config(
            &mut evidence,
            "EFI/fedora/grub.cfg",
            "menuentry 'Fedora' {\n  linux /vmlinuz root=/dev/sda2\n}\n",
        );
        let cfg = evidence.boot_config.expect("grub config should be attached");
        assert_eq!(cfg.boot_entries.len(), 1);
    }

    #[test]
    fn uki_binary_never_gets_grub_config_attached() {
        use crate::model::{BootloaderKind, EFIBinaryEvidence};

        let mut evidence = EFIBinaryEvidence {
            path: "EFI/Linux/uki.efi".to_string(),
            kind: BootloaderKind::Uki,
            ..Default::default()
        };
        attach_grub_config(&mut evidence, "EFI/fedora/grub.cfg", "menuentry 'Fedora' {}\n");
        assert!(evidence.boot_config.is_none());
    }

    #[test]
    fn loader_conf_attaches_only_to_systemd_boot_binaries() {
        use crate::model::{BootloaderKind, EFIBinaryEvidence};

        let cfg = bootconfig::parse_loader_conf("loader/loader.conf", "default fedora\n");
        let mut binaries = vec![
            EFIBinaryEvidence {
                path: "EFI/systemd/systemd-bootx64.efi".to_string(),
                kind: BootloaderKind::SystemdBoot,
                ..Default::default()
            },
            EFIBinaryEvidence {
                path: "EFI/Linux/uki.efi".to_string(),
                kind: BootloaderKind::Uki,
                ..Default::default()
            },
        ];
        attach_loader_config(&mut binaries, &cfg);
        assert!(binaries[0].boot_config.is_some());
        assert!(binaries[1].boot_config.is_none());
    }
}
