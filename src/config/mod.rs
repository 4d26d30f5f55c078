pub mod file;
pub mod target;
