pub mod config;
pub mod database;
pub mod delivery;
pub mod errors;
pub mod joblog;
pub mod mapping;
pub mod messaging;
pub mod models;
pub mod requeue;
pub mod routes;
pub mod submission;
pub mod transform;
pub mod validation;
pub mod worker_processing;
pub mod worker_scheduler;
