// Library interface for rehabrs modules
// Integration tests and the CLI both go through these re-exports

pub mod admin;
pub mod config;
pub mod database;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod recommendation;
pub mod session;
pub mod similarity;
pub mod stability;
pub mod store;

pub use admin::{AdminConfig, AdminConsole, AdminStrategy};
pub use config::AppConfig;
pub use database::SqliteStore;
pub use error::{PersistenceError, RehabError, Result};
pub use logging::{LogConfig, LogFormat, LogLevel};
pub use metrics::{ExerciseMetrics, MetricsConfig, MetricsEngine};
pub use models::*;
pub use recommendation::{
    RecommendationConfig, RecommendationEngine, RecommendationOutcome, RecommendationSource,
};
pub use session::{sensor_channel, ExerciseSession, SensorFeed, SensorSubscription, StopReason};
pub use similarity::{SimilarityModel, SimilarityWeights};
pub use stability::{StabilityAnalyzer, StabilityAssessment};
pub use store::{ExerciseQuery, MemoryStore, RehabStore};
