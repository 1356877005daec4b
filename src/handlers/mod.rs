pub mod admin;
pub mod export;
pub mod food_logs;
pub mod health;
pub mod insights;
pub mod recovery;
pub mod session;
