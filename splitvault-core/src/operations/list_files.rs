use crate::error::Result;
use crate::storage::{FileRecord, MetadataStore, clean_path};
use std::sync::Arc;

#[derive(Clone)]
pub struct ListFilesOperation {
    store: Arc<MetadataStore>,
}

#[derive(Debug, Clone)]
pub struct ListFilesOperationRequest {
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct ListFilesOperationResult {
    pub path: String,
    pub directories: Vec<String>,
    pub files: Vec<FileRecord>,
}

impl ListFilesOperation {
    pub fn new(store: Arc<MetadataStore>) -> Self {
        Self { store }
    }

    pub fn run(&self, request: ListFilesOperationRequest) -> Result<ListFilesOperationResult> {
        let path = clean_path(&request.path);

        Ok(ListFilesOperationResult {
            directories: self.store.list_subdirectories(&path)?,
            files: self.store.list_files(&path)?,
            path,
        })
    }
}
