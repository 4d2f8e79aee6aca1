//! Data model for the Newsreel pipeline.
//!
//! Plain types only: strongly typed identifiers, the release registry
//! record, cached content metadata, and per-account target state. No IO
//! and no async here; the store and worker crates build on top.

pub mod content;
pub mod error;
pub mod ids;
pub mod release;
pub mod target;

pub use content::{BestRelease, ContentInfo, ContentKind};
pub use error::{ModelError, Result};
pub use ids::{AccountId, ImdbId, ReleaseId};
pub use release::{ContentKey, HealthStatus, ReleaseRecord};
pub use target::{Account, AccountTarget, DownloadStatus, TargetState};
