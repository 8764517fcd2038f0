pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod queue;
pub mod retry;
pub mod routes;
pub mod services;
pub mod workers;
