//! Services behind the HTTP handlers: object storage, blob file records,
//! the archive rebuilder, ACL clients and page rendering.

pub mod access_token;
pub mod acl;
pub mod archive;
pub mod blob_files;
pub mod object_store;
pub mod serving;
pub mod templates;
