//! File and directory nodes.
//!
//! Nodes are built fresh from every listing or lookup and never cached. They
//! carry no locking; a node's fallible calls take `&mut self` so they can
//! record the last error next to the result.

use log::{debug, warn};
use std::path::Path;

use super::errors::MtpError;
use super::handle::SessionLink;
use super::storage;
use super::types::{ObjectDescriptor, ObjectId, ObjectKind, ROOT_NAME, ROOT_OBJECT_ID, StorageId};

const DOWNLOAD_FAILED: &str = "Failed to download file";
const DELETE_FAILED: &str = "Failed to delete file";

/// One object on a device: its identity and the last error of a call made through it.
#[derive(Debug, Clone)]
pub struct FileNode {
    link: SessionLink,
    id: ObjectId,
    parent_id: ObjectId,
    storage_id: StorageId,
    name: String,
    size: u64,
    modified: Option<u64>,
    last_error: String,
}

impl FileNode {
    pub(crate) fn from_descriptor(link: SessionLink, descriptor: ObjectDescriptor) -> Self {
        Self {
            link,
            id: descriptor.id,
            parent_id: descriptor.parent_id,
            storage_id: descriptor.storage_id,
            name: descriptor.name,
            size: descriptor.size,
            modified: descriptor.modified,
            last_error: String::new(),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn parent_id(&self) -> ObjectId {
        self.parent_id
    }

    pub fn storage_id(&self) -> StorageId {
        self.storage_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// In bytes. Zero for directories.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Unix timestamp in seconds, if the device reported one.
    pub fn modified(&self) -> Option<u64> {
        self.modified
    }

    pub fn is_directory(&self) -> bool {
        false
    }

    /// Empty when the last fallible call succeeded.
    pub fn last_error(&self) -> &str {
        &self.last_error
    }

    /// Copies the object's content to `destination`, replacing any existing file.
    pub fn download(&mut self, destination: &Path) -> Result<(), MtpError> {
        let result = self.download_inner(destination);
        self.record(&result);
        result
    }

    fn download_inner(&self, destination: &Path) -> Result<(), MtpError> {
        let session = self.link.session()?;
        debug!("Downloading object {} to {}", self.id, destination.display());
        self.link
            .transport()
            .download_to_path(session, self.id, destination)
            .map_err(|code| {
                let message = self.link.failure_message(session, DOWNLOAD_FAILED);
                warn!("Download of object {} failed (code {}): {}", self.id, code, message);
                MtpError::OperationFailed { message }
            })
    }

    /// Deletes the object on the device. The node itself stays around and is stale afterwards.
    pub fn delete(&mut self) -> Result<(), MtpError> {
        let result = storage::delete_object(&self.link, self.id, DELETE_FAILED);
        self.record(&result);
        result
    }

    pub(crate) fn link(&self) -> &SessionLink {
        &self.link
    }

    pub(crate) fn record<T>(&mut self, result: &Result<T, MtpError>) {
        match result {
            Ok(_) => self.last_error.clear(),
            Err(e) => self.last_error = e.to_string(),
        }
    }
}

/// A folder, or the synthetic root of a storage.
#[derive(Debug, Clone)]
pub struct DirectoryNode {
    file: FileNode,
}

impl DirectoryNode {
    pub(crate) fn from_descriptor(link: SessionLink, descriptor: ObjectDescriptor) -> Self {
        Self {
            file: FileNode::from_descriptor(link, descriptor),
        }
    }

    /// The id-0 directory at the top of a storage. Built locally, no transport call.
    pub(crate) fn synthetic_root(link: SessionLink, storage_id: StorageId) -> Self {
        Self::from_descriptor(
            link,
            ObjectDescriptor {
                id: ROOT_OBJECT_ID,
                parent_id: ROOT_OBJECT_ID,
                storage_id,
                name: ROOT_NAME.to_string(),
                size: 0,
                kind: ObjectKind::Folder,
                modified: None,
            },
        )
    }

    pub fn id(&self) -> ObjectId {
        self.file.id()
    }

    pub fn parent_id(&self) -> ObjectId {
        self.file.parent_id()
    }

    pub fn storage_id(&self) -> StorageId {
        self.file.storage_id()
    }

    pub fn name(&self) -> &str {
        self.file.name()
    }

    pub fn size(&self) -> u64 {
        self.file.size()
    }

    pub fn is_directory(&self) -> bool {
        true
    }

    pub fn is_root(&self) -> bool {
        self.file.id() == ROOT_OBJECT_ID
    }

    pub fn last_error(&self) -> &str {
        self.file.last_error()
    }

    /// The plain-file view of this directory.
    pub fn as_file(&self) -> &FileNode {
        &self.file
    }

    /// Direct children in device order.
    ///
    /// An empty result is either an empty folder or a failed listing; check
    /// `last_error()` or use `try_list_children` to tell them apart.
    pub fn list_children(&mut self) -> Vec<ObjectNode> {
        self.try_list_children().unwrap_or_default()
    }

    pub fn try_list_children(&mut self) -> Result<Vec<ObjectNode>, MtpError> {
        let result = storage::list_children(self.file.link(), self.storage_id(), self.id());
        self.file.record(&result);
        result
    }

    /// Creates a folder inside this one. Returns the new id, never 0.
    pub fn create_subdirectory(&mut self, name: &str) -> Result<ObjectId, MtpError> {
        let result = storage::create_folder(self.file.link(), self.storage_id(), name, self.id());
        self.file.record(&result);
        result
    }

    /// First child whose name matches exactly (case-sensitive), in listing order.
    pub fn lookup_by_name(&mut self, name: &str) -> Option<ObjectNode> {
        self.list_children().into_iter().find(|child| child.name() == name)
    }

    /// Sends a local file into this directory.
    ///
    /// An empty `remote_name` uses the local file name.
    pub fn upload(&mut self, local_path: &Path, remote_name: &str) -> Result<ObjectId, MtpError> {
        let result = storage::send_file(self.file.link(), self.storage_id(), local_path, remote_name, self.id());
        self.file.record(&result);
        result
    }

    pub fn download(&mut self, destination: &Path) -> Result<(), MtpError> {
        self.file.download(destination)
    }

    pub fn delete(&mut self) -> Result<(), MtpError> {
        self.file.delete()
    }
}

/// A listed object, classified once by the kind the transport reported.
#[derive(Debug, Clone)]
pub enum ObjectNode {
    File(FileNode),
    Directory(DirectoryNode),
}

impl ObjectNode {
    pub(crate) fn from_descriptor(link: SessionLink, descriptor: ObjectDescriptor) -> Self {
        if descriptor.is_folder() {
            Self::Directory(DirectoryNode::from_descriptor(link, descriptor))
        } else {
            Self::File(FileNode::from_descriptor(link, descriptor))
        }
    }

    pub fn as_file(&self) -> &FileNode {
        match self {
            Self::File(file) => file,
            Self::Directory(dir) => dir.as_file(),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.as_file().id()
    }

    pub fn parent_id(&self) -> ObjectId {
        self.as_file().parent_id()
    }

    pub fn storage_id(&self) -> StorageId {
        self.as_file().storage_id()
    }

    pub fn name(&self) -> &str {
        self.as_file().name()
    }

    pub fn size(&self) -> u64 {
        self.as_file().size()
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, Self::Directory(_))
    }

    pub fn last_error(&self) -> &str {
        self.as_file().last_error()
    }

    pub fn as_directory(&self) -> Option<&DirectoryNode> {
        match self {
            Self::Directory(dir) => Some(dir),
            Self::File(_) => None,
        }
    }

    pub fn as_directory_mut(&mut self) -> Option<&mut DirectoryNode> {
        match self {
            Self::Directory(dir) => Some(dir),
            Self::File(_) => None,
        }
    }

    pub fn into_directory(self) -> Option<DirectoryNode> {
        match self {
            Self::Directory(dir) => Some(dir),
            Self::File(_) => None,
        }
    }

    pub fn download(&mut self, destination: &Path) -> Result<(), MtpError> {
        match self {
            Self::File(file) => file.download(destination),
            Self::Directory(dir) => dir.download(destination),
        }
    }

    pub fn delete(&mut self) -> Result<(), MtpError> {
        match self {
            Self::File(file) => file.delete(),
            Self::Directory(dir) => dir.delete(),
        }
    }
}
