//! Core data models for the blob file service.
//!
//! `BlobFile` is the metadata record for an uploaded file, `StoredObject`
//! the attributes the object store keeps for each payload, and `acl` holds
//! the wire types of the storage ACL API. Row types map to SQLite via
//! `sqlx::FromRow` and serialize as JSON via `serde`.

pub mod acl;
pub mod blob_file;
pub mod object;
