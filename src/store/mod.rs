pub mod broadcast;
pub mod sqlite;
pub mod state;

pub use broadcast::EventStream;
pub use sqlite::{ReportStore, SqliteReportStore};
pub use state::ExecutionStore;
