pub mod auxv;
pub mod elf;
pub mod enter;
pub mod exit;
pub mod load_info;
pub mod loader;
pub mod params;
pub mod shebang;

pub use self::load_info::{LoadInfo, Mapping};
