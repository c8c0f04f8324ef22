pub mod error;
pub mod extractor;
pub mod factory;
pub mod providers;
pub mod utils;

mod default;
mod race;

pub use default::default_client;
pub use extractor::{Extractor, ProviderExtractor};
