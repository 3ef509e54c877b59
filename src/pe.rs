//! PE/COFF parsing of EFI binaries found on an ESP, including Unified Kernel
//! Image (UKI) recognition (spec.md §4.4).
//!
//! Parsing itself is delegated to `goblin::pe`, the same crate the
//! `lanzaboote` stub and measurement code use to walk PE sections (see
//! `examples/other_examples/822b21b1_nix-community-lanzaboote__rust-uefi-linux-bootloader-src-measure.rs.rs`).

use crate::bytesrc::sha256_hex;
use crate::model::{Arch, BootloaderKind, EFIBinaryEvidence, KeyValue};
use goblin::pe::PE;
use std::collections::BTreeMap;

const UKI_LINUX_SECTION: &str = ".linux";
const UKI_CMDLINE_SECTION: &str = ".cmdline";
const UKI_OSREL_SECTION: &str = ".osrel";
const UKI_UNAME_SECTION: &str = ".uname";
const UKI_INITRD_SECTION: &str = ".initrd";
const SBAT_SECTION: &str = ".sbat";

/// Index of the Certificate Table (Authenticode security directory) among
/// a PE's 16 data directories.
const SECURITY_DIRECTORY_INDEX: usize = 4;

pub fn section_bytes<'a>(data: &'a [u8], pe: &PE, name: &str) -> Option<&'a [u8]> {
    pe.sections.iter().find_map(|section| {
        if section.name().ok()? != name {
            return None;
        }
        let start = section.pointer_to_raw_data as usize;
        let end = start + section.size_of_raw_data as usize;
        data.get(start..end)
    })
}

fn parse_os_release(raw: &str) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let value = value.trim().trim_matches('"').trim_matches('\'');
            map.insert(key.to_string(), value.to_string());
        }
    }
    map
}

/// Parses `data` (the whole contents of one EFI binary found on the ESP) and
/// builds the evidence record spec.md §4.4 describes: section list, per
/// section SHA-256, Authenticode signature presence, SBAT presence, and (if
/// the section set matches) UKI payload extraction.
pub fn decode(path: &str, data: &[u8]) -> Result<EFIBinaryEvidence, goblin::error::Error> {
    let pe = PE::parse(data)?;

    let arch = Arch::from_machine(pe.header.coff_header.machine);
    let sections: Vec<String> = pe
        .sections
        .iter()
        .filter_map(|s| s.name().ok().map(|n| n.to_string()))
        .collect();

    let mut section_sha256 = BTreeMap::new();
    for section in &pe.sections {
        let Ok(name) = section.name() else { continue };
        let start = section.pointer_to_raw_data as usize;
        let end = start + section.size_of_raw_data as usize;
        if let Some(bytes) = data.get(start..end) {
            section_sha256.insert(name.to_string(), sha256_hex(bytes));
        }
    }

    let (signed, signature_size) = pe
        .header
        .optional_header
        .and_then(|opt| opt.data_directories.get_certificate_table())
        .map(|dir| (dir.size != 0 && dir.virtual_address != 0, dir.size))
        .unwrap_or((false, 0));

    let has_sbat = sections.iter().any(|s| s == SBAT_SECTION);

    let has_linux = sections.iter().any(|s| s == UKI_LINUX_SECTION);
    let has_identity = sections.iter().any(|s| {
        s == UKI_CMDLINE_SECTION || s == UKI_OSREL_SECTION || s == UKI_UNAME_SECTION
    });
    let is_uki = has_linux && has_identity;

    let mut evidence = EFIBinaryEvidence {
        path: path.to_string(),
        size: data.len() as u64,
        sha256: sha256_hex(data),
        arch: arch.as_string(),
        kind: BootloaderKind::Unknown,
        signed,
        signature_size,
        has_sbat,
        sections,
        section_sha256: section_sha256.clone(),
        is_uki,
        ..Default::default()
    };

    if is_uki {
        if let Some(bytes) = section_bytes(data, &pe, UKI_CMDLINE_SECTION) {
            evidence.cmdline = String::from_utf8_lossy(bytes).trim_end_matches('\0').to_string();
            evidence.cmdline_sha256 = sha256_hex(bytes);
        }
        if let Some(bytes) = section_bytes(data, &pe, UKI_UNAME_SECTION) {
            evidence.uname = String::from_utf8_lossy(bytes).trim_end_matches('\0').to_string();
            evidence.uname_sha256 = sha256_hex(bytes);
        }
        if let Some(bytes) = section_bytes(data, &pe, UKI_OSREL_SECTION) {
            let raw = String::from_utf8_lossy(bytes).trim_end_matches('\0').to_string();
            let parsed = parse_os_release(&raw);
            evidence.os_release_sorted = parsed
                .iter()
                .map(|(key, value)| KeyValue { key: key.clone(), value: value.clone() })
                .collect();
            evidence.os_release = parsed;
            evidence.os_release_raw = raw;
            evidence.osrel_sha256 = sha256_hex(bytes);
        }
        if let Some(bytes) = section_bytes(data, &pe, UKI_LINUX_SECTION) {
            evidence.kernel_sha256 = sha256_hex(bytes);
        }
        if let Some(bytes) = section_bytes(data, &pe, UKI_INITRD_SECTION) {
            evidence.initrd_sha256 = sha256_hex(bytes);
        }
        evidence.kind = BootloaderKind::Uki;
    }

    Ok(evidence)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn os_release_parses_quoted_values() {
        let raw = "NAME=\"Fedora Linux\"\nVERSION_ID=40\n# comment\n";
        let map = parse_os_release(raw);
        assert_eq!(map.get("NAME").unwrap(), "Fedora Linux");
        assert_eq!(map.get("VERSION_ID").unwrap(), "40");
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn arch_from_machine_recognizes_x86_64() {
        assert_eq!(Arch::from_machine(0x8664), Arch::X86_64);
        assert!(matches!(Arch::from_machine(0x1234), Arch::Unknown(0x1234)));
    }
}
