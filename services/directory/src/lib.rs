//! Profile Directory Service
//!
//! Stores a handle-to-profile-image mapping, serves paginated listings and
//! single-handle lookups, and fills the mapping on demand by rendering a
//! profile page and extracting its profile image.
//!
//! ## Features
//!
//! - **Opaque Pagination**: scan continuation keys are wrapped in versioned,
//!   validated cursor tokens
//! - **Pluggable Store**: DynamoDB in production, an ordered in-memory store
//!   for local runs and tests
//! - **Pluggable Rendering**: headless Chrome over WebDriver, or recorded page
//!   snapshots
//! - **Configurable Refresh**: re-scrape on every ingest, or keep existing
//!   records
//!
//! ## Architecture
//!
//! ```text
//!  HTTP API
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │ GET /users   │────▶│ Directory    │────▶│ Cursor       │
//! │ GET /users/h │     │ Service      │     │ Codec        │
//! └──────────────┘     └──────────────┘     └──────────────┘
//!        │                    │
//!        │                    ▼
//!        │             ┌──────────────┐     ┌──────────────┐
//!        │             │ Profile      │────▶│ DynamoDB /   │
//!        │             │ Store        │     │ In-memory    │
//!        │             └──────────────┘     └──────────────┘
//!        ▼                    ▲
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │ POST /scrape │────▶│ Ingest       │────▶│ Page         │
//! └──────────────┘     │ Pipeline     │     │ Renderer     │
//!                      └──────────────┘     └──────────────┘
//!                             │
//!                             ▼
//!                      ┌──────────────┐
//!                      │ Image        │
//!                      │ Extractor    │
//!                      └──────────────┘
//! ```

pub mod api;
pub mod config;
pub mod cursor;
pub mod directory;
pub mod error;
pub mod extractor;
pub mod handle;
pub mod ingest;
pub mod renderer;
pub mod store;

pub use api::{AppState, ListResponse, LookupResponse};
pub use config::Config;
pub use cursor::{Cursor, CursorError};
pub use directory::{DirectoryService, ProfileListing};
pub use error::DirectoryError;
pub use extractor::extract_profile_image;
pub use handle::HandleValidator;
pub use ingest::{IngestPipeline, RefreshPolicy};
pub use renderer::{
    FixtureRenderer, ImageElement, PageRenderer, PageSnapshot, RenderError, RenderSession,
    WebDriverRenderer,
};
pub use store::{
    DynamoProfileStore, InMemoryProfileStore, Profile, ProfileStore, ScanPage, StoreError,
    StoreKey,
};
