//! The neutral data model produced by inspection and consumed by comparison
//! and rendering. Every entity here is a plain value; nothing holds a
//! back-reference to its parent or to the inspected file.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ImageSummary {
    pub file: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub sha256: String,
    pub size_bytes: u64,
    pub partition_table: PartitionTableSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verity: Option<VerityInfo>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum PartitionTableType {
    Gpt,
    Mbr,
}

impl Default for PartitionTableType {
    fn default() -> Self {
        PartitionTableType::Mbr
    }
}

impl PartitionTableType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartitionTableType::Gpt => "gpt",
            PartitionTableType::Mbr => "mbr",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct PartitionTableSummary {
    #[serde(rename = "type")]
    pub table_type: PartitionTableType,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub disk_guid: String,
    pub logical_sector_size: u32,
    pub physical_sector_size: u32,
    pub protective_mbr: bool,
    pub partitions: Vec<PartitionSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub largest_free_span: Option<FreeSpanSummary>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub misaligned_partitions: Vec<u32>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct FreeSpanSummary {
    pub start_lba: u64,
    pub end_lba: u64,
    pub size_bytes: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct PartitionSummary {
    pub index: u32,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(rename = "type")]
    pub partition_type: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub guid: String,
    pub start_lba: u64,
    pub end_lba: u64,
    pub size_bytes: u64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub flags: String,
    pub attr_raw: u64,
    pub attr_required: bool,
    pub attr_legacy_bios_bootable: bool,
    pub attr_read_only: bool,
    pub logical_sector_size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filesystem: Option<FilesystemSummary>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum FilesystemType {
    Ext4,
    Vfat,
    Squashfs,
    Unknown,
}

impl Default for FilesystemType {
    fn default() -> Self {
        FilesystemType::Unknown
    }
}

impl FilesystemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilesystemType::Ext4 => "ext4",
            FilesystemType::Vfat => "vfat",
            FilesystemType::Squashfs => "squashfs",
            FilesystemType::Unknown => "unknown",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum FatType {
    Fat12,
    Fat16,
    Fat32,
}

impl FatType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FatType::Fat12 => "FAT12",
            FatType::Fat16 => "FAT16",
            FatType::Fat32 => "FAT32",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct FilesystemSummary {
    #[serde(rename = "type")]
    pub fs_type: FilesystemType,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub label: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub uuid: String,
    pub block_size: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub features: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,

    // vfat
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fat_type: Option<FatType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_per_sector: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sectors_per_cluster: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_count: Option<u32>,

    // squashfs
    #[serde(skip_serializing_if = "String::is_empty")]
    pub compression: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fs_flags: Option<u16>,

    // EFI
    #[serde(default)]
    pub has_shim: bool,
    #[serde(default)]
    pub has_uki: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub efi_binaries: Vec<EFIBinaryEvidence>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    X86_64,
    X86,
    Arm64,
    Arm,
    Unknown(u16),
}

impl Default for Arch {
    fn default() -> Self {
        Arch::Unknown(0)
    }
}

impl Arch {
    pub fn from_machine(machine: u16) -> Arch {
        match machine {
            0x8664 => Arch::X86_64,
            0x014c => Arch::X86,
            0xAA64 => Arch::Arm64,
            0x01C0 => Arch::Arm,
            other => Arch::Unknown(other),
        }
    }

    pub fn as_string(&self) -> String {
        match self {
            Arch::X86_64 => "x86_64".to_string(),
            Arch::X86 => "x86".to_string(),
            Arch::Arm64 => "arm64".to_string(),
            Arch::Arm => "arm".to_string(),
            Arch::Unknown(v) => format!("unknown(0x{v:02X})"),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootloaderKind {
    Unknown,
    Uki,
    Shim,
    Grub,
    SystemdBoot,
    MokManager,
    LinuxEfiStub,
}

impl Default for BootloaderKind {
    fn default() -> Self {
        BootloaderKind::Unknown
    }
}

impl BootloaderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BootloaderKind::Unknown => "unknown",
            BootloaderKind::Uki => "uki",
            BootloaderKind::Shim => "shim",
            BootloaderKind::Grub => "grub",
            BootloaderKind::SystemdBoot => "systemd-boot",
            BootloaderKind::MokManager => "mok-manager",
            BootloaderKind::LinuxEfiStub => "linux-efi-stub",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct EFIBinaryEvidence {
    pub path: String,
    pub size: u64,
    pub sha256: String,
    pub arch: String,
    pub kind: BootloaderKind,
    pub signed: bool,
    pub signature_size: u32,
    pub has_sbat: bool,
    pub sections: Vec<String>,
    pub section_sha256: BTreeMap<String, String>,

    pub is_uki: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub cmdline: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub uname: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub os_release_raw: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub os_release: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub os_release_sorted: Vec<KeyValue>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub kernel_sha256: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub initrd_sha256: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub cmdline_sha256: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub osrel_sha256: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub uname_sha256: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub boot_config: Option<BootloaderConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct BootEntry {
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub kernel: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub initrd: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub cmdline: String,
    pub is_default: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub partition_uuid: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub root_device: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub uki_path: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct KernelReference {
    pub path: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub partition_uuid: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub root_uuid: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub boot_entry: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct UuidReference {
    pub uuid: String,
    pub context: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referenced_partition: Option<u32>,
    pub mismatch: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct BootloaderConfig {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config_files: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config_raw: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub boot_entries: Vec<BootEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kernel_references: Vec<KernelReference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub uuid_references: Vec<UuidReference>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub default_entry: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct VerityInfo {
    pub enabled: bool,
    pub method: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub root_device: String,
    pub hash_partition: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct FieldChange {
    pub field: String,
    pub from: String,
    pub to: String,
    pub volatile: bool,
    pub reason: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SectionMapDiff {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub added: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub removed: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub modified: BTreeMap<String, (String, String)>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct UkiDiff {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub payload_changes: Vec<FieldChange>,
    #[serde(default, skip_serializing_if = "SectionMapDiff::is_empty")]
    pub section_map: SectionMapDiff,
}

impl SectionMapDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct BootloaderConfigDiff {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub config_file_changes: Vec<FieldChange>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub boot_entries_added: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub boot_entries_removed: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub boot_entries_modified: Vec<FieldChange>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kernel_reference_changes: Vec<FieldChange>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub uuid_reference_changes: Vec<FieldChange>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes_changes: Vec<FieldChange>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct EfiDiffEntry {
    pub path: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<FieldChange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uki: Option<UkiDiff>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boot_config: Option<BootloaderConfigDiff>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct FilesystemDiff {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<FieldChange>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct PartitionDiffEntry {
    pub key: String,
    pub status: PartitionDiffStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<FieldChange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesystem: Option<FilesystemDiff>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub efi_binaries: Vec<EfiDiffEntry>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum PartitionDiffStatus {
    Added,
    Removed,
    Modified,
}

impl Default for PartitionDiffStatus {
    fn default() -> Self {
        PartitionDiffStatus::Modified
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct VerityDiff {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<FieldChange>,
    pub added: bool,
    pub removed: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ImageDiff {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_changes: Vec<FieldChange>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub partition_table_changes: Vec<FieldChange>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub partitions: Vec<PartitionDiffEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub global_efi_binaries: Vec<EfiDiffEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verity: Option<VerityDiff>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum EqualityClass {
    BinaryIdentical,
    SemanticallyIdentical,
    SemanticallyIdenticalUnverified,
    Different,
}

impl EqualityClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            EqualityClass::BinaryIdentical => "binary_identical",
            EqualityClass::SemanticallyIdentical => "semantically_identical",
            EqualityClass::SemanticallyIdenticalUnverified => "semantically_identical_unverified",
            EqualityClass::Different => "different",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Equality {
    pub class: EqualityClass,
    pub volatile_diffs: u32,
    pub meaningful_diffs: u32,
    pub volatile_reasons: Vec<String>,
    pub meaningful_reasons: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct CompareSummary {
    pub changed: bool,
    pub added: u32,
    pub removed: u32,
    pub modified: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ImageCompareResult {
    pub schema_version: String,
    pub from: String,
    pub to: String,
    pub equality: Equality,
    pub summary: CompareSummary,
    pub diff: ImageDiff,
}

pub const TRUNCATE_LIMIT: usize = 10 * 1024;
pub const TRUNCATE_MARKER: &str = "\n[truncated...]";

pub fn truncate_content(content: &str) -> String {
    if content.len() <= TRUNCATE_LIMIT {
        content.to_string()
    } else {
        let mut s = content[..TRUNCATE_LIMIT].to_string();
        s.push_str(TRUNCATE_MARKER);
        s
    }
}
