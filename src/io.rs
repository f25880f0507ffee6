//! I/O helpers shared by the encoder and reader.

pub mod compression;
