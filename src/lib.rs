pub mod catalog;
pub mod commands;
pub mod config;
pub mod db;
pub mod distance;
pub mod error;
pub mod extraction;
pub mod models;
pub mod preprocessing;
pub mod queries;
pub mod report;
pub mod representations;
pub mod schema;
pub mod scoring;
pub mod tasks;
pub mod trials;
pub mod uuid;
