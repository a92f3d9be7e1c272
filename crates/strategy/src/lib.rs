pub mod config;
pub mod population;

pub use config::PopulationSpec;
pub use population::generate;
