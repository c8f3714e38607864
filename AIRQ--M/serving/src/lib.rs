#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Read side of the forecast serving contract: persisted artifacts, crowd feedback and AQI guidance.

/// Site forecasts and metrics read back from persisted artifacts.
#[path = "../catalog.rs"]
pub mod catalog;

/// Crowdsourced feedback store.
#[path = "../feedback.rs"]
pub mod feedback;

/// AQI bands and health recommendations.
#[path = "../health.rs"]
pub mod health;

pub use catalog::{
    ArtifactCatalog, CatalogError, ForecastRow, MetricsRow, SiteForecast, SiteMetricsView,
    DEFAULT_HORIZON,
};
pub use feedback::{
    submit, FeedbackEntry, FeedbackError, FeedbackStore, Feeling, MemoryFeedbackStore,
    NewFeedback, DEFAULT_LIMIT,
};
pub use health::{
    aqi_category, health_recommendation, Advice, AqiCategory, HealthRecommendation, Severity,
    UserProfile,
};
