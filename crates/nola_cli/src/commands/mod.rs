pub mod build;
pub mod deploy;
