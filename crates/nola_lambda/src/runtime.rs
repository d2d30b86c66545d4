pub use nola_core::{config, contract, storage_keys};
