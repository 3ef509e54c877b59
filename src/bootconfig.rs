//! Bootloader configuration parsing (spec.md §4.6): `grub.cfg`,
//! systemd-boot `loader.conf`, and synthesis of a boot entry from a UKI's
//! cmdline when no config file is present. `validate` resolves every UUID
//! reference against the decoded partition table.

use crate::model::{
    BootEntry, BootloaderConfig, KernelReference, PartitionTableSummary, UuidReference,
    TRUNCATE_LIMIT,
};
use regex::Regex;
use std::sync::OnceLock;

fn uuid_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)[0-9a-f]{8}[-_]?[0-9a-f]{4}[-_]?[0-9a-f]{4}[-_]?[0-9a-f]{4}[-_]?[0-9a-f]{12}")
            .expect("static UUID pattern is valid")
    })
}

fn normalize_uuid(raw: &str) -> String {
    raw.to_ascii_lowercase().replace(['-', '_'], "")
}

fn find_uuids(line: &str, context: &str, out: &mut Vec<UuidReference>) {
    for m in uuid_regex().find_iter(line) {
        out.push(UuidReference {
            uuid: normalize_uuid(m.as_str()),
            context: context.to_string(),
            referenced_partition: None,
            mismatch: false,
        });
    }
}

fn extract_root(cmdline: &str) -> String {
    cmdline
        .split_whitespace()
        .find_map(|tok| tok.strip_prefix("root=").map(|v| v.to_string()))
        .unwrap_or_default()
}

fn truncate(content: &str) -> String {
    if content.len() <= TRUNCATE_LIMIT {
        content.to_string()
    } else {
        format!("{}\n[truncated...]", &content[..TRUNCATE_LIMIT])
    }
}

/// Parses `grub.cfg` content, recorded at `path` for `config_files`/`config_raw`.
pub fn parse_grub_cfg(path: &str, content: &str) -> BootloaderConfig {
    let mut cfg = BootloaderConfig::default();
    cfg.config_raw.insert(path.to_string(), truncate(content));
    cfg.config_files
        .insert(path.to_string(), crate::bytesrc::sha256_hex(content.as_bytes()));

    let mut current: Option<BootEntry> = None;

    for raw_line in content.lines() {
        let line = raw_line.trim();

        if let Some(rest) = line.strip_prefix("configfile") {
            let target = rest.trim();
            cfg.notes.push(format!("references external config: {target}"));
            cfg.boot_entries.push(BootEntry {
                name: format!("[External config] {target}"),
                ..Default::default()
            });
            continue;
        }

        if line.starts_with("search") {
            find_uuids(line, "grub_search", &mut cfg.uuid_references);
            continue;
        }

        if let Some(start) = line.find("(hd") {
            let rest = &line[start + 1..];
            if let Some(end) = rest.find(')') {
                let token = &rest[..end];
                if let Some(gpt_idx) = token.split(',').nth(1).and_then(|p| p.strip_prefix("gpt")) {
                    if let Ok(idx) = gpt_idx.parse::<u32>() {
                        cfg.kernel_references.push(KernelReference {
                            path: format!("gpt{idx}"),
                            ..Default::default()
                        });
                    }
                } else if let Some(msdos_idx) =
                    token.split(',').nth(1).and_then(|p| p.strip_prefix("msdos"))
                {
                    if let Ok(idx) = msdos_idx.parse::<u32>() {
                        cfg.kernel_references.push(KernelReference {
                            path: format!("msdos{idx}"),
                            ..Default::default()
                        });
                    }
                }
            }
            find_uuids(line, "grub_root_hd", &mut cfg.uuid_references);
            continue;
        }

        if let Some(rest) = line.strip_prefix("menuentry") {
            if let Some(current_entry) = current.take() {
                cfg.boot_entries.push(current_entry);
            }
            let name = rest
                .trim()
                .trim_start_matches('\'')
                .trim_start_matches('"')
                .split(['\'', '"'])
                .next()
                .unwrap_or("")
                .to_string();
            current = Some(BootEntry {
                name,
                ..Default::default()
            });
            continue;
        }

        if let Some(rest) = line.strip_prefix("linux") {
            let rest = rest.trim();
            let (kernel, cmdline) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
            find_uuids(cmdline, "kernel_cmdline", &mut cfg.uuid_references);
            if let Some(entry) = current.as_mut() {
                entry.kernel = kernel.to_string();
                entry.cmdline = cmdline.trim().to_string();
                entry.root_device = extract_root(cmdline);
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix("initrd") {
            if let Some(entry) = current.as_mut() {
                entry.initrd = rest.trim().to_string();
            }
            continue;
        }

        if line == "}" {
            if let Some(entry) = current.take() {
                cfg.boot_entries.push(entry);
            }
        }
    }

    if let Some(entry) = current.take() {
        cfg.boot_entries.push(entry);
    }

    cfg
}

/// Parses systemd-boot `loader.conf` content.
pub fn parse_loader_conf(path: &str, content: &str) -> BootloaderConfig {
    let mut cfg = BootloaderConfig::default();
    cfg.config_raw.insert(path.to_string(), truncate(content));
    cfg.config_files
        .insert(path.to_string(), crate::bytesrc::sha256_hex(content.as_bytes()));

    for raw_line in content.lines() {
        let line = raw_line.trim();
        if let Some(rest) = line.strip_prefix("default") {
            if let Some(value) = rest.trim_start().strip_prefix('=') {
                cfg.default_entry = value.trim().to_string();
            }
        }
        find_uuids(line, "systemd_boot_config", &mut cfg.uuid_references);
    }

    cfg
}

/// Builds a synthetic `BootEntry` from a UKI cmdline when no config file is
/// present on the ESP at all.
pub fn synthesize_from_uki_cmdline(uki_path: &str, cmdline: &str) -> BootloaderConfig {
    let mut cfg = BootloaderConfig::default();
    let mut uuid_refs = Vec::new();
    for tok in cmdline.split_whitespace() {
        if let Some(value) = tok.strip_prefix("boot_uuid=") {
            uuid_refs.push(UuidReference {
                uuid: normalize_uuid(value),
                context: "uki_boot_uuid".to_string(),
                referenced_partition: None,
                mismatch: false,
            });
        }
    }
    cfg.uuid_references = uuid_refs;
    cfg.boot_entries.push(BootEntry {
        name: format!("[UKI] {uki_path}"),
        cmdline: cmdline.to_string(),
        root_device: extract_root(cmdline),
        uki_path: uki_path.to_string(),
        is_default: true,
        ..Default::default()
    });
    cfg
}

/// Resolves every UUID reference against the partition table and emits the
/// notes spec.md §4.6 describes for missing kernels / empty configs.
pub fn validate(cfg: &mut BootloaderConfig, pt: &PartitionTableSummary) {
    for uuid_ref in cfg.uuid_references.iter_mut() {
        let found = pt.partitions.iter().find(|p| {
            normalize_uuid(&p.guid) == uuid_ref.uuid
                || p.filesystem
                    .as_ref()
                    .map(|fs| normalize_uuid(&fs.uuid) == uuid_ref.uuid)
                    .unwrap_or(false)
        });
        match found {
            Some(p) => uuid_ref.referenced_partition = Some(p.index),
            None => {
                uuid_ref.mismatch = true;
                cfg.notes.push(format!(
                    "UUID {} referenced in {} not found in partition table",
                    uuid_ref.uuid, uuid_ref.context
                ));
            }
        }
    }

    for kref in cfg.kernel_references.iter_mut() {
        let idx = kref
            .path
            .strip_prefix("gpt")
            .or_else(|| kref.path.strip_prefix("msdos"))
            .and_then(|n| n.parse::<u32>().ok());
        if let Some(idx) = idx {
            if let Some(p) = pt.partitions.iter().find(|p| p.index == idx) {
                kref.partition_uuid = p.guid.clone();
            }
        }
        if kref.path.is_empty() {
            cfg.notes
                .push("kernel reference with empty path".to_string());
        }
    }

    for entry in &cfg.boot_entries {
        if entry.kernel.is_empty() && entry.uki_path.is_empty() {
            cfg.notes
                .push(format!("boot entry '{}' has no kernel path", entry.name));
        }
    }

    if cfg.config_files.is_empty() && cfg.boot_entries.is_empty() {
        cfg.notes.push("no bootloader config files found".to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PartitionSummary, PartitionTableType};

    const GRUB_CFG: &str = r#"
set prefix=(hd0,gpt2)/grub
search --no-floppy --fs-uuid --set=root AAAA1111-2222-3333-4444-555566667777
menuentry 'Fedora Linux' {
    linux /vmlinuz root=UUID=AAAA1111-2222-3333-4444-555566667777 ro quiet
    initrd /initramfs.img
}
"#;

    #[test]
    fn parses_menuentry_kernel_and_initrd() {
        let cfg = parse_grub_cfg("/boot/grub2/grub.cfg", GRUB_CFG);
        assert_eq!(cfg.boot_entries.len(), 1);
        let entry = &cfg.boot_entries[0];
        assert_eq!(entry.name, "Fedora Linux");
        assert_eq!(entry.kernel, "/vmlinuz");
        assert_eq!(entry.initrd, "/initramfs.img");
        assert!(entry.cmdline.contains("ro quiet"));
    }

    #[test]
    fn extracts_root_hd_and_search_uuids() {
        let cfg = parse_grub_cfg("/boot/grub2/grub.cfg", GRUB_CFG);
        assert!(cfg
            .kernel_references
            .iter()
            .any(|k| k.path == "gpt2"));
        assert!(cfg
            .uuid_references
            .iter()
            .any(|u| u.context == "grub_search"));
        assert!(cfg
            .uuid_references
            .iter()
            .any(|u| u.context == "kernel_cmdline"));
    }

    #[test]
    fn uuid_normalization_strips_separators() {
        assert_eq!(
            normalize_uuid("AAAA1111-2222-3333-4444-555566667777"),
            "aaaa1111222233334444555566667777"
        );
    }

    #[test]
    fn validate_flags_unresolved_uuid() {
        let mut cfg = BootloaderConfig::default();
        cfg.uuid_references.push(UuidReference {
            uuid: "deadbeef00000000000000000000000".to_string(),
            context: "kernel_cmdline".to_string(),
            referenced_partition: None,
            mismatch: false,
        });
        let pt = PartitionTableSummary {
            table_type: PartitionTableType::Gpt,
            partitions: vec![PartitionSummary {
                index: 1,
                guid: "11111111-1111-1111-1111-111111111111".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        };
        validate(&mut cfg, &pt);
        assert!(cfg.uuid_references[0].mismatch);
        assert!(!cfg.notes.is_empty());
    }

    #[test]
    fn synthesize_from_uki_extracts_boot_uuid_and_root() {
        let cfg = synthesize_from_uki_cmdline(
            "EFI/Linux/uki.efi",
            "root=/dev/sda2 boot_uuid=AAAA1111-2222-3333-4444-555566667777 ro",
        );
        assert_eq!(cfg.boot_entries.len(), 1);
        assert_eq!(cfg.boot_entries[0].root_device, "/dev/sda2");
        assert_eq!(cfg.uuid_references[0].context, "uki_boot_uuid");
    }
}
