pub mod event;
pub mod proot;
pub mod sigactions;
pub mod tracee;
pub mod translation;
