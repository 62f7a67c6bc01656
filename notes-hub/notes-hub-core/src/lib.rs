pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod journal;
pub mod propagation;
pub mod query;
pub mod service;
pub mod storage;
pub mod tree;

pub use auth::{IdentityResolver, RequestContext, UserId};
pub use config::HubConfig;
pub use error::{DocError, DocResult};
pub use service::{DocumentService, Mutation, UpdateDocument};
pub use storage::{Document, DocumentTable};
