//! Inspector orchestrator (spec.md §4.1): opens an image, decodes its
//! partition table, probes each partition's filesystem, enumerates EFI
//! binaries on ESPs, parses their PE/UKI payloads, classifies bootloaders,
//! attaches bootloader config, and detects dm-verity.

use crate::bootconfig;
use crate::bootloader;
use crate::bytesrc::RawImage;
use crate::error::{Error, Result};
use crate::fs as fsprobe;
use crate::model::{EFIBinaryEvidence, ImageSummary};
use crate::partition_table;
use crate::verity;
use log::{info, warn};
use std::path::{Path, PathBuf};

const MAX_LOGICAL_SECTOR_SIZE: u32 = 65535;

/// External collaborator that converts a non-raw image (qcow2, vhd, vhdx,
/// vmdk, vdi) to a raw file the inspector can read directly. Out of scope
/// for this engine; format detection and conversion live entirely on the
/// other side of this trait.
pub trait ImageNormalizer {
    /// Converts `src` to a raw image under `tmp_dir`, returning its path and
    /// an opaque cleanup token dropped when the caller is done with it.
    fn to_raw(&self, src: &Path, tmp_dir: &Path) -> std::io::Result<(PathBuf, Box<dyn std::any::Any>)>;
}

pub struct Inspector {
    pub hash_images: bool,
    normalizer: Option<Box<dyn ImageNormalizer>>,
}

impl Inspector {
    pub fn new(hash_images: bool) -> Self {
        Self {
            hash_images,
            normalizer: None,
        }
    }

    pub fn with_normalizer(hash_images: bool, normalizer: Box<dyn ImageNormalizer>) -> Self {
        Self {
            hash_images,
            normalizer: Some(normalizer),
        }
    }

    pub fn inspect(&self, path: &Path) -> Result<ImageSummary> {
        let metadata = std::fs::metadata(path).map_err(|_| {
            Error::ImageNotFound(path.display().to_string())
        })?;
        if metadata.is_dir() {
            return Err(Error::NotAFile(path.display().to_string()));
        }

        let mut raw_path = path.to_path_buf();
        let mut _cleanup_token: Option<Box<dyn std::any::Any>> = None;
        if !looks_raw(path) {
            if let Some(normalizer) = &self.normalizer {
                let tmp_dir = std::env::temp_dir();
                let (converted, token) = normalizer
                    .to_raw(path, &tmp_dir)
                    .map_err(|e| Error::Normalizer(e.to_string()))?;
                info!("normalized {} to raw at {}", path.display(), converted.display());
                raw_path = converted;
                _cleanup_token = Some(token);
            } else {
                warn!(
                    "{} does not look like a raw image and no normalizer was configured; reading it as-is",
                    path.display()
                );
            }
        }

        let mut raw = RawImage::open(&raw_path)?;

        let sha256 = if self.hash_images {
            raw.sha256_whole_file()?
        } else {
            String::new()
        };

        if raw.size_bytes == 0 {
            return Err(Error::InvalidGeometry("size_bytes is zero".to_string()));
        }

        let mut partition_table = partition_table::decode(&mut raw)?;
        if partition_table.logical_sector_size == 0
            || partition_table.logical_sector_size > MAX_LOGICAL_SECTOR_SIZE
        {
            return Err(Error::InvalidGeometry(format!(
                "logical_sector_size {} out of range",
                partition_table.logical_sector_size
            )));
        }

        for partition in partition_table.partitions.iter_mut() {
            let base = partition.start_lba * partition.logical_sector_size as u64;
            match fsprobe::probe(&mut raw, base, partition) {
                Ok(Some(mut fs_summary)) => {
                    bootloader::classify_all(&mut fs_summary.efi_binaries);
                    attach_uki_boot_configs(&mut fs_summary.efi_binaries);
                    fs_summary.efi_binaries.sort_by(|a, b| a.path.cmp(&b.path));
                    partition.filesystem = Some(fs_summary);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("failed to probe partition {}: {e}", partition.index);
                    partition.filesystem = None;
                }
            }
        }

        let all_efi_binaries: Vec<&EFIBinaryEvidence> = partition_table
            .partitions
            .iter()
            .filter_map(|p| p.filesystem.as_ref())
            .flat_map(|fs| fs.efi_binaries.iter())
            .collect();
        let owned_binaries: Vec<EFIBinaryEvidence> = all_efi_binaries.into_iter().cloned().collect();
        let verity_info = verity::detect(&partition_table, &owned_binaries);

        let pt_snapshot = partition_table.clone();
        for partition in partition_table.partitions.iter_mut() {
            if let Some(fs_summary) = partition.filesystem.as_mut() {
                for binary in fs_summary.efi_binaries.iter_mut() {
                    if let Some(cfg) = binary.boot_config.as_mut() {
                        bootconfig::validate(cfg, &pt_snapshot);
                    }
                }
            }
        }

        Ok(ImageSummary {
            file: path.display().to_string(),
            sha256,
            size_bytes: raw.size_bytes,
            partition_table,
            verity: verity_info,
        })
    }
}

/// Synthesizes a boot entry from each UKI's own cmdline. Grub/systemd-boot
/// binaries already got their `grub.cfg`/`loader.conf` attached while the ESP
/// was walked (`fs::populate_efi_binaries`), since that is where the config
/// file's sibling directory structure is visible.
fn attach_uki_boot_configs(binaries: &mut [EFIBinaryEvidence]) {
    for binary in binaries.iter_mut() {
        if binary.is_uki && binary.boot_config.is_none() {
            binary.boot_config = Some(bootconfig::synthesize_from_uki_cmdline(
                &binary.path,
                &binary.cmdline,
            ));
        }
    }
}

/// Best-effort extension sniff: only the formats `ImageNormalizer` is
/// documented to handle are treated as "not raw". Anything else (including
/// no extension at all) is assumed to already be a raw image.
fn looks_raw(path: &Path) -> bool {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => !matches!(
            ext.to_ascii_lowercase().as_str(),
            "qcow2" | "vhd" | "vhdx" | "vmdk" | "vdi"
        ),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_and_img_extensions_look_raw() {
        assert!(looks_raw(Path::new("disk.raw")));
        assert!(looks_raw(Path::new("disk.img")));
        assert!(looks_raw(Path::new("disk")));
    }

    #[test]
    fn known_foreign_formats_do_not_look_raw() {
        assert!(!looks_raw(Path::new("disk.qcow2")));
        assert!(!looks_raw(Path::new("disk.vhdx")));
    }
}
