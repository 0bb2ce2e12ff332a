//! Gantry State Management
//!
//! Persists the resources a reconciliation run manages. A [`StateSession`]
//! locks a [`StateBackend`], loads its [`StateFile`], and records every
//! applied step as it happens through the core `StateStore` contract.
//!
//! # Example
//!
//! ```ignore
//! use gantry_state::{create_backend, BackendConfig, StateSession};
//!
//! let config = BackendConfig::new("local").with_attribute("path", "gantry.state.json");
//! let mut session = StateSession::open(create_backend(&config)?, "apply").await?;
//!
//! let previous = session.resources()?;
//! let report = reconciler.apply(&plan, &previous, &desired, &mut session).await;
//!
//! session.close().await?;
//! ```

pub mod backend;
pub mod backends;
pub mod lock;
pub mod session;
pub mod state;

pub use backend::{BackendConfig, BackendError, BackendResult, StateBackend};
pub use backends::create_backend;
pub use lock::LockInfo;
pub use session::StateSession;
pub use state::{ResourceState, StateFile};
