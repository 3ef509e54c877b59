//! Disk-image inspection and comparison engine: partition tables,
//! filesystems, EFI binaries and UKI payloads, bootloader configuration,
//! dm-verity evidence, and a semantic-equivalence diff between two images.

pub mod bootconfig;
pub mod bootloader;
pub mod bytesrc;
pub mod compare;
pub mod error;
pub mod fs;
pub mod gpt;
pub mod inspector;
pub mod mbr;
pub mod model;
pub mod partition_table;
pub mod pe;
pub mod render;
pub mod verity;

pub use compare::compare;
pub use error::{Error, Result};
pub use inspector::{ImageNormalizer, Inspector};
pub use model::{ImageCompareResult, ImageSummary};
pub use render::{render_compare, render_summary, RenderMode};
