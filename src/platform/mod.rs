// Filesystem helpers shared by the store and the CLI

pub mod common;
