pub mod delete_file;
pub mod download_file;
pub mod list_files;
pub mod upload_file;

pub use delete_file::{DeleteFileOperation, DeleteFileOperationRequest, DeleteFileOperationResult};
pub use download_file::{
    DownloadFileOperation, DownloadFileOperationRequest, DownloadFileOperationResult,
};
pub use list_files::{ListFilesOperation, ListFilesOperationRequest, ListFilesOperationResult};
pub use upload_file::{
    UploadFileOperation, UploadFileOperationRequest, UploadFileOperationResult, UploadProgress,
    UploadTracker,
};

/// Default bound on part transfers running at once for one upload or download.
pub const DEFAULT_MAX_CONCURRENT_TRANSFERS: usize = 4;
