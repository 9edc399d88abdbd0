use crate::domain::EmailId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttachmentId(pub String);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub id: AttachmentId,
    pub email_id: EmailId,
    pub filename: Option<String>,
    pub mime_type: String,
    pub size: u64,
    /// IMAP BODYSTRUCTURE part id addressing this section, e.g. "2" or "1.2".
    pub body_section: String,
    pub transfer_encoding: String,
    pub content_id: Option<String>,
    pub downloaded: bool,
    pub local_path: Option<String>,
}
