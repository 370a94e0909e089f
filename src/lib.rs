pub mod adapter;
pub mod batch;
pub mod callbacks;
pub mod config;
pub mod context;
pub mod error;
pub mod file_uploader;
pub mod input;
pub mod plan;
pub mod queue_manager;
pub mod rest;
pub mod signer;
pub mod xml;

pub use adapter::{ByteStream, HttpAdapter, RandomAccessSource, ReqwestHttpAdapter};
pub use batch::{upload_many_files, BatchError, BatchInput, BatchOptions, FileCompletion, FileResult};
pub use callbacks::{ErrorCallback, ProgressCallback};
pub use context::{merge_context, AmbientContextProvider, Context, StaticContextProvider};
pub use error::{Error, ErrorContext, Phase, Result};
pub use file_uploader::{upload_file, UploadOptions};
pub use input::{FileInput, InputOverrides};
pub use queue_manager::{QueueEntry, QueueManager};
pub use rest::{Envelope, ReqwestRestTransport, RestTransport};
pub use xml::{QuickXmlParser, XmlParser};
