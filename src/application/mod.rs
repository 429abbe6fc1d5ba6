//! Application services: data access, feed pagination, optimistic mutations
//! and the view models they drive.

pub mod error;
pub mod feed;
pub mod mutation;
pub mod pagination;
pub mod posts;
pub mod profiles;
pub mod repos;
pub mod session;
pub mod view;
