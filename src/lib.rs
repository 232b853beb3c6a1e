pub mod access;
pub mod accounts;
pub mod ancestors;
pub mod attachments;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod mail;
pub mod models;
pub mod notifications;
pub mod routes;
pub mod s3;
pub mod schema;
pub mod state;
pub mod storage;
pub mod utils;
pub mod workers;

pub use workers::{default_handlers, Worker};
