pub mod devices;

pub use devices::{Devices, CONFIG_FILENAME};
