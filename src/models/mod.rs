pub mod audit;
pub mod daily_log;
