//! Out-of-band audit logging of proxied exchanges.

pub mod archive;
pub mod entry;
pub mod mask;
pub mod pipeline;
pub mod s3;
pub mod session;

pub use archive::{ArchiveReport, ArchiveStore, Archiver};
pub use entry::{build_log_entry, new_request_id, Exchange, LogEntry};
pub use mask::{mask_api_key, mask_headers};
pub use pipeline::{log_file_path, AuditLogger, PipelineState, LOG_FILE_NAME};
pub use s3::S3ArchiveStore;
pub use session::{extract_session_info, SessionInfo};
