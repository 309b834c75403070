//! 外部工作台适配层

pub mod client;
pub mod types;

pub use client::{HttpWorkspaceClient, WorkspaceClient};
pub use types::{Page, PageParent, PropertyMap, QueryResult, canonical_id};
