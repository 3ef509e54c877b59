//! Bootloader classification (spec.md §4.5): path heuristics, section
//! fingerprints, then a SHA-inheritance pass over byte-identical copies.

use crate::model::{BootloaderKind, EFIBinaryEvidence};

fn classify_by_path(path: &str) -> Option<BootloaderKind> {
    let lower = path.to_ascii_lowercase();
    if lower.contains("grub") {
        return Some(BootloaderKind::Grub);
    }
    if lower.contains("mmx64.efi") || lower.contains("mmia32.efi") {
        return Some(BootloaderKind::MokManager);
    }
    if lower.contains("shim") {
        return Some(BootloaderKind::Shim);
    }
    if lower.contains("systemd") && lower.contains("boot") {
        return Some(BootloaderKind::SystemdBoot);
    }
    None
}

fn classify_by_sections(sections: &[String]) -> Option<BootloaderKind> {
    if sections.iter().any(|s| s == ".linux") {
        return Some(BootloaderKind::Uki);
    }
    if sections
        .iter()
        .any(|s| s == ".mods" || s.starts_with(".module"))
    {
        return Some(BootloaderKind::Grub);
    }
    if sections.iter().any(|s| s == ".sdmagic") {
        return Some(BootloaderKind::SystemdBoot);
    }
    if sections.iter().any(|s| s == ".sbat") {
        return Some(BootloaderKind::Shim);
    }
    None
}

/// Classifies a single binary by path, falling back to section fingerprints.
/// Exposed so the ESP walker can classify a binary as soon as it is decoded,
/// before the cross-partition SHA-inheritance pass runs.
pub fn classify_one(path: &str, sections: &[String]) -> BootloaderKind {
    classify_by_path(path)
        .or_else(|| classify_by_sections(sections))
        .unwrap_or(BootloaderKind::Unknown)
}

/// Classifies every EFI binary in `binaries`, then runs the SHA-inheritance
/// pass: any binary still `Unknown` after the first pass adopts the kind of
/// an already-classified binary sharing its SHA-256, gaining a note.
/// Binaries classified by path or section heuristics are never overwritten.
pub fn classify_all(binaries: &mut [EFIBinaryEvidence]) {
    for binary in binaries.iter_mut() {
        binary.kind = classify_one(&binary.path, &binary.sections);
    }

    let known: Vec<(String, BootloaderKind)> = binaries
        .iter()
        .filter(|b| b.kind != BootloaderKind::Unknown)
        .map(|b| (b.sha256.clone(), b.kind))
        .collect();

    for binary in binaries.iter_mut() {
        if binary.kind != BootloaderKind::Unknown || binary.sha256.is_empty() {
            continue;
        }
        if let Some((_, kind)) = known.iter().find(|(sha, _)| *sha == binary.sha256) {
            binary.kind = *kind;
            binary
                .notes
                .push("bootloader kind inherited from identical EFI binary (sha256 match)".to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binary(path: &str, sha: &str, sections: &[&str]) -> EFIBinaryEvidence {
        EFIBinaryEvidence {
            path: path.to_string(),
            sha256: sha.to_string(),
            sections: sections.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn path_heuristic_wins_over_sections() {
        let kind = classify_one("EFI/BOOT/GRUBX64.EFI", &[]);
        assert_eq!(kind, BootloaderKind::Grub);
    }

    #[test]
    fn section_heuristic_recognizes_uki() {
        let kind = classify_one("EFI/Linux/foo.efi", &[".linux".to_string()]);
        assert_eq!(kind, BootloaderKind::Uki);
    }

    #[test]
    fn sha_inheritance_propagates_to_unknown_copy() {
        let mut binaries = vec![
            binary("EFI/BOOT/GRUBX64.EFI", "abc", &[]),
            binary("EFI/BOOT/BOOTX64.EFI", "abc", &[]),
        ];
        classify_all(&mut binaries);
        assert_eq!(binaries[0].kind, BootloaderKind::Grub);
        assert_eq!(binaries[1].kind, BootloaderKind::Grub);
        assert!(binaries[1].notes.iter().any(|n| n.contains("inherited")));
    }

    #[test]
    fn first_classified_binary_is_never_overwritten() {
        let mut binaries = vec![
            binary("EFI/BOOT/BOOTX64.EFI", "abc", &[".sbat".to_string()]),
            binary("EFI/BOOT/GRUBX64.EFI", "abc", &[]),
        ];
        classify_all(&mut binaries);
        assert_eq!(binaries[0].kind, BootloaderKind::Shim);
    }
}
