pub mod local;
pub mod memory;
pub mod remote;

pub use local::{FileStorage, KeyValueStorage, LocalBackup, MemoryStorage};
pub use memory::MemoryRemoteStore;
pub use remote::{RemoteError, RemoteResult, RemoteStore};
