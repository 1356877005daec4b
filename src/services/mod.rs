pub mod analytics;
pub mod export;
pub mod migration;
pub mod timeline;
