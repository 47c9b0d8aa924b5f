pub mod file;
pub mod shared;
