pub mod app;
pub mod config;
pub mod error;
pub mod favorites;
pub mod models;
pub mod tmdb;
