pub mod codec;
pub mod description_cache;
pub mod error;
pub mod memory;
pub mod storage;

pub use codec::{PayloadCodec, Persistence};
pub use description_cache::{DescriptionCache, DescriptionMap};
pub use error::CacheError;
pub use memory::MemoryCache;
pub use storage::{SqliteStorage, Storage};
