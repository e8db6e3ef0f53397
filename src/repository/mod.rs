pub mod default;
pub mod etag;
pub mod interface;

pub use default::ObjectStoreFileRepository;
pub use etag::ETag;
pub use interface::{Error, FileEntry, FileStatus, VersionedFileRepository};
