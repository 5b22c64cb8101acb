pub mod analyzer;
pub mod config;
pub mod names;
pub mod ocr;
pub mod processor;
pub mod report;
pub mod scanner;
pub mod signature;
pub mod similarity;
pub mod store;

pub use analyzer::{AnalyzeError, TicketAnalysis, TicketAnalyzer};
pub use config::{load_config, save_config, AuditConfig};
pub use processor::{run_audit, RunOptions, RunSummary};
pub use scanner::{Month, ScanError, Scanner};
pub use store::{AuditRecord, AuditStore, SqliteAuditStore, StorageError};
