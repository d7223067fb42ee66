// src/lib.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
// Crate root: a path-addressed blob storage driver over COS/S3-style bucket
// stores, plus the transports it runs on.

pub mod config;
pub mod constants;
pub mod copy;
pub mod driver;
pub mod error;
pub mod metadata;
pub mod multipart;
pub mod object_store;
pub mod paths;
pub mod presign;
pub mod transport;

pub use config::{DriverParameters, ParamValue};
pub use copy::{CopyConfig, CopyEngine};
pub use driver::CosDriver;
pub use error::{DriverError, Result, TransportError, WriterState};
pub use multipart::ChunkedWriter;
pub use object_store::{FileInfo, FileWriter, StorageDriver, WalkControl};
pub use paths::PathMapper;
pub use presign::UrlOptions;
pub use transport::{MemoryClient, ObjectClient, S3Client};
