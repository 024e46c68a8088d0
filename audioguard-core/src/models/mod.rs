pub mod upload_record;

pub use upload_record::{NewUploadRecord, UploadRecord};
