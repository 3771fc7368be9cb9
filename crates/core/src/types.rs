/// Jobs are keyed by the UUID assigned by the request-serving API.
pub type JobId = uuid::Uuid;

/// Users are keyed by UUID in the relational store.
pub type UserId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
