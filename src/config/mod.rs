//! Settings and configuration module
//!
//! Provides unified configuration with:
//! - Builder pattern
//! - TOML/JSON loading
//! - Site layout defaults for the UEC CampusSquare deployment
//! - Login credentials from the environment

pub mod config;

pub use config::{
    ClientConfig, ClientConfigBuilder, ConfigError, ListingLayout, LoginCredentials,
    PipelineSettings, SiteConfig,
};
