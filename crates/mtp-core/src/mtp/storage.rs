//! Storage partitions and the object operations shared with directory nodes.

use log::{debug, info, warn};
use std::path::Path;

use super::errors::MtpError;
use super::handle::SessionLink;
use super::node::{DirectoryNode, ObjectNode};
use super::transport::SessionHandle;
use super::types::{ObjectDescriptor, ObjectId, ROOT_OBJECT_ID, StorageDescriptor, StorageId, StorageInfo};

const LIST_FAILED: &str = "No files found";
const NOT_FOUND: &str = "File not found";
const CREATE_FAILED: &str = "Failed to create directory";
const DELETE_FAILED: &str = "Failed to delete object";
const SEND_FAILED: &str = "Failed to send file";
const UNKNOWN_STORAGE: &str = "Unknown Storage";

/// One storage partition of an open device session.
///
/// Description and capacity figures are a snapshot from the last storage
/// refresh. Objects are fetched from the device on every call.
#[derive(Debug, Clone)]
pub struct StorageHandle {
    link: SessionLink,
    descriptor: StorageDescriptor,
    last_error: String,
}

impl StorageHandle {
    pub(crate) fn new(link: SessionLink, descriptor: StorageDescriptor) -> Self {
        Self {
            link,
            descriptor,
            last_error: String::new(),
        }
    }

    pub fn id(&self) -> StorageId {
        self.descriptor.id
    }

    pub fn description(&self) -> &str {
        self.descriptor.description.as_deref().unwrap_or(UNKNOWN_STORAGE)
    }

    pub fn max_capacity(&self) -> u64 {
        self.descriptor.max_capacity
    }

    pub fn free_space(&self) -> u64 {
        self.descriptor.free_space
    }

    pub fn is_read_only(&self) -> bool {
        self.descriptor.read_only
    }

    pub fn info(&self) -> StorageInfo {
        StorageInfo {
            id: self.id(),
            description: self.description().to_string(),
            max_capacity: self.max_capacity(),
            free_space: self.free_space(),
            storage_type: self.descriptor.storage_type.clone(),
            is_read_only: self.is_read_only(),
        }
    }

    pub fn last_error(&self) -> &str {
        &self.last_error
    }

    /// The synthetic id-0 directory at the top of this storage.
    pub fn root_directory(&self) -> DirectoryNode {
        DirectoryNode::synthetic_root(self.link.clone(), self.id())
    }

    /// Looks an object up by id. `None` (with the reason in `last_error()`) when it can't be fetched.
    pub fn resolve_by_id(&mut self, object_id: ObjectId) -> Option<ObjectNode> {
        self.try_resolve_by_id(object_id).ok()
    }

    pub fn try_resolve_by_id(&mut self, object_id: ObjectId) -> Result<ObjectNode, MtpError> {
        let result = if object_id == ROOT_OBJECT_ID {
            self.link.session().map(|_| ObjectNode::Directory(self.root_directory()))
        } else {
            fetch_descriptor(&self.link, object_id).map(|desc| ObjectNode::from_descriptor(self.link.clone(), desc))
        };
        self.record(&result);
        result
    }

    /// Direct children of `parent_id` (0 for the storage root), in device order.
    ///
    /// Empty on failure too; `last_error()` tells the two apart.
    pub fn list_children(&mut self, parent_id: ObjectId) -> Vec<ObjectNode> {
        self.try_list_children(parent_id).unwrap_or_default()
    }

    pub fn try_list_children(&mut self, parent_id: ObjectId) -> Result<Vec<ObjectNode>, MtpError> {
        let result = list_children(&self.link, self.id(), parent_id);
        self.record(&result);
        result
    }

    /// Creates a folder and returns its id, never 0.
    pub fn create_directory(&mut self, name: &str, parent_id: ObjectId) -> Result<ObjectId, MtpError> {
        let result = create_folder(&self.link, self.id(), name, parent_id);
        self.record(&result);
        result
    }

    /// Deletes one object. Most devices refuse non-empty folders; see `delete_recursive`.
    pub fn delete_object(&mut self, object_id: ObjectId) -> Result<(), MtpError> {
        let result = delete_object(&self.link, object_id, DELETE_FAILED);
        self.record(&result);
        result
    }

    /// Deletes an object and, for folders, everything below it, children first.
    pub fn delete_recursive(&mut self, object_id: ObjectId) -> Result<(), MtpError> {
        let result =
            fetch_descriptor(&self.link, object_id).and_then(|desc| delete_tree(&self.link, self.id(), &desc));
        if result.is_ok() {
            info!("Deleted object {} and its contents", object_id);
        }
        self.record(&result);
        result
    }

    /// Sends a local file into `parent_id`. An empty `remote_name` uses the local file name.
    pub fn send_file(&mut self, local_path: &Path, remote_name: &str, parent_id: ObjectId) -> Result<ObjectId, MtpError> {
        let result = send_file(&self.link, self.id(), local_path, remote_name, parent_id);
        self.record(&result);
        result
    }

    /// Walks a slash-separated path from the storage root by exact name lookups.
    ///
    /// Empty, "/" and "." resolve to the root; relative paths are taken from the root.
    pub fn resolve_path(&mut self, path: &str) -> Result<ObjectNode, MtpError> {
        let result = self.resolve_path_inner(path);
        self.record(&result);
        result
    }

    fn resolve_path_inner(&self, path: &str) -> Result<ObjectNode, MtpError> {
        let mut current = ObjectNode::Directory(self.root_directory());
        for component in path_components(path) {
            let ObjectNode::Directory(dir) = &current else {
                return Err(MtpError::PathNotFound { path: path.to_string() });
            };
            let children = list_children(&self.link, self.id(), dir.id())?;
            current = children
                .into_iter()
                .find(|child| child.name() == component)
                .ok_or_else(|| MtpError::PathNotFound { path: path.to_string() })?;
        }
        debug!("Resolved {} to object {}", path, current.id());
        Ok(current)
    }

    fn record<T>(&mut self, result: &Result<T, MtpError>) {
        match result {
            Ok(_) => self.last_error.clear(),
            Err(e) => self.last_error = e.to_string(),
        }
    }
}

/// Splits a device path into its names, dropping empty and "." segments.
fn path_components(path: &str) -> Vec<&str> {
    path.split('/').filter(|part| !part.is_empty() && *part != ".").collect()
}

fn operation_failed(link: &SessionLink, session: SessionHandle, fallback: &str) -> MtpError {
    MtpError::OperationFailed {
        message: link.failure_message(session, fallback),
    }
}

pub(super) fn fetch_descriptor(link: &SessionLink, object_id: ObjectId) -> Result<ObjectDescriptor, MtpError> {
    let session = link.session()?;
    link.transport().fetch_metadata(session, object_id).map_err(|code| {
        let message = link.failure_message(session, NOT_FOUND);
        debug!("Object {} not found (code {}): {}", object_id, code, message);
        MtpError::ObjectNotFound { object_id, message }
    })
}

pub(super) fn list_children(
    link: &SessionLink,
    storage_id: StorageId,
    parent_id: ObjectId,
) -> Result<Vec<ObjectNode>, MtpError> {
    let session = link.session()?;
    let descriptors = link
        .transport()
        .list_children(session, storage_id, parent_id)
        .map_err(|code| {
            warn!(
                "Listing of object {} on storage {} failed (code {})",
                parent_id, storage_id, code
            );
            operation_failed(link, session, LIST_FAILED)
        })?;
    debug!(
        "Listed {} children of object {} on storage {}",
        descriptors.len(),
        parent_id,
        storage_id
    );
    Ok(descriptors
        .into_iter()
        .map(|desc| ObjectNode::from_descriptor(link.clone(), desc))
        .collect())
}

pub(super) fn create_folder(
    link: &SessionLink,
    storage_id: StorageId,
    name: &str,
    parent_id: ObjectId,
) -> Result<ObjectId, MtpError> {
    let session = link.session()?;
    match link.transport().create_folder(session, name, parent_id, storage_id) {
        Ok(id) if id != ROOT_OBJECT_ID => {
            info!("Created folder {} (id {}) under object {}", name, id, parent_id);
            Ok(id)
        }
        // The device answered but handed back no object
        Ok(_) | Err(_) => {
            let err = operation_failed(link, session, CREATE_FAILED);
            warn!("Creating folder {} under object {} failed: {}", name, parent_id, err);
            Err(err)
        }
    }
}

pub(super) fn delete_object(link: &SessionLink, object_id: ObjectId, fallback: &str) -> Result<(), MtpError> {
    let session = link.session()?;
    link.transport().delete_object(session, object_id).map_err(|code| {
        let err = operation_failed(link, session, fallback);
        warn!("Deleting object {} failed (code {}): {}", object_id, code, err);
        err
    })?;
    debug!("Deleted object {}", object_id);
    Ok(())
}

fn delete_tree(link: &SessionLink, storage_id: StorageId, descriptor: &ObjectDescriptor) -> Result<(), MtpError> {
    if descriptor.is_folder() {
        let session = link.session()?;
        let children = link
            .transport()
            .list_children(session, storage_id, descriptor.id)
            .map_err(|_| operation_failed(link, session, LIST_FAILED))?;
        for child in &children {
            delete_tree(link, storage_id, child)?;
        }
    }
    delete_object(link, descriptor.id, DELETE_FAILED)
}

pub(super) fn send_file(
    link: &SessionLink,
    storage_id: StorageId,
    local_path: &Path,
    remote_name: &str,
    parent_id: ObjectId,
) -> Result<ObjectId, MtpError> {
    let name = if remote_name.is_empty() {
        match local_path.file_name() {
            Some(name) => name.to_string_lossy().to_string(),
            None => {
                return Err(MtpError::OperationFailed {
                    message: SEND_FAILED.to_string(),
                });
            }
        }
    } else {
        remote_name.to_string()
    };

    let session = link.session()?;
    match link
        .transport()
        .send_file(session, local_path, &name, parent_id, storage_id)
    {
        Ok(id) if id != ROOT_OBJECT_ID => {
            info!("Sent {} as {} (id {})", local_path.display(), name, id);
            Ok(id)
        }
        Ok(_) | Err(_) => {
            let err = operation_failed(link, session, SEND_FAILED);
            warn!("Sending {} failed: {}", local_path.display(), err);
            Err(err)
        }
    }
}
