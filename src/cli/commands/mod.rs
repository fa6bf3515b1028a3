pub mod credit_config;
pub mod credits;
pub mod migrate;
pub mod tenant;
