pub mod config;
pub mod contracts;
pub mod db;
pub mod pg_store;

pub use config::{OrderApiConfig, ServiceConfig};
pub use contracts::{
    ConsentListQuery, ConsentListResponse, CreateLinkRequest, CreateLinkResponse, DecisionRequest,
    DecisionResponse, HealthResponse, LineItemsResponse, LinkDetailResponse,
    RefreshSnapshotsResponse, ResubmitResponse, SubmissionHistoryResponse,
};
pub use db::{connect_database, run_migrations};
pub use pg_store::PgLinkStore;
