use mongodb::bson::{oid::ObjectId, Bson};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KycDocument {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub user_id: ObjectId,
    pub doc_type: String,
    pub filename: String,
    pub content_type: String,
    // GridFS file id in the "kyc" bucket
    pub file_id: Bson,
    pub size: i64,
    // "pending" | "approved" | "rejected"
    pub status: String,
    #[serde(default)]
    pub review_note: Option<String>,
    pub created_at: i64,
}

impl KycDocument {
    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id.to_hex(),
            "user_id": self.user_id.to_hex(),
            "doc_type": self.doc_type,
            "filename": self.filename,
            "content_type": self.content_type,
            "size": self.size,
            "status": self.status,
            "review_note": self.review_note,
            "created_at": self.created_at,
        })
    }
}
