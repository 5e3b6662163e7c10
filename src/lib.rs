pub mod cleanup;
pub mod config;
pub mod digest;
pub mod error;
pub mod fanout;
pub mod handler;
pub mod local;
pub mod obs;
pub mod options;
pub mod remote;
pub mod store;

#[cfg(feature = "test-util")]
pub mod test_support;

pub use error::{ErrorKind, Result, SaveError};
pub use handler::{FileHandler, UploadTokenSigner};
pub use options::SaveOptions;
pub use store::{FileStore, save_from_disk, save_from_reader};
