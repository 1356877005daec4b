pub mod food_logs;
pub mod pool;

pub use food_logs::PgRemoteStore;
