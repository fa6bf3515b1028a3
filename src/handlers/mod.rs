// handlers/mod.rs - HTTP handlers grouped by resource
//
// Public: /health
// Protected (JWT + tenant + user validation): everything else

pub mod admin_promotion;
pub mod credit_config;
pub mod credits;
pub mod health;
pub mod locations;
pub mod organizations;
pub mod users;
