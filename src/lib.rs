pub mod cluster;
pub mod clustering;
pub mod engine;
pub mod error;
pub mod initializer;
pub mod instance;
pub mod metric;
pub mod minibatch;
pub mod params;
pub mod postopt;
pub mod quality;
pub mod runtime;

#[cfg(test)]
pub mod tests;

/// dimensional analysis types
pub type Real = f64;
pub type Symbol = String;

// clustering parameters
pub const K_MAX: usize = 1000;
pub const K_DEFAULT: usize = 10;
pub const EPSILON_DEFAULT: Real = 1e-4;
pub const EPSILON_MAX_ITERATIONS_DEFAULT: usize = 10;
pub const REPLICATES_DEFAULT: usize = 1;
pub const MINI_BATCH_SIZE_DEFAULT: usize = 1000;

// row milestone at which database passes consult the memory oracle
pub const MEMORY_CHECK_INTERVAL: usize = 1000;

pub use crate::clustering::Clustering;
pub use crate::engine::train;
pub use crate::engine::train_with;
pub use crate::error::ClusterError;
pub use crate::instance::Instance;
pub use crate::minibatch::train_mini_batch;
pub use crate::params::Parameters;

/// initialize logging
pub fn init() {
    let config = simplelog::ConfigBuilder::new()
        .set_location_level(log::LevelFilter::Off)
        .set_target_level(log::LevelFilter::Off)
        .set_thread_level(log::LevelFilter::Off)
        .build();
    simplelog::TermLogger::init(
        log::LevelFilter::Info,
        config,
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )
    .expect("initialize logger");
}
