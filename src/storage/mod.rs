pub mod codec;
pub mod durable;
pub mod store;

pub use codec::{PersistedRecord, RECORD_VERSION, RecordRejection};
pub use store::{FileStore, RecordStore};
