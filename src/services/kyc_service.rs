use chrono::Utc;
use futures_util::{
    io::{AsyncReadExt, AsyncWriteExt},
    StreamExt,
};
use mongodb::{
    bson::{doc, oid::ObjectId},
    options::{FindOptions, GridFsBucketOptions, GridFsUploadOptions},
    GridFsBucket,
};

use crate::{
    error::{ApiError, FieldErrors},
    events::{self, KYC_UPDATED},
    models::{KycDocument, User},
    AppState,
};

use super::{notification_service, telegram_service::escape_html};

pub const MAX_FILE_BYTES: usize = 5 * 1024 * 1024;
pub const DOC_TYPES: &[&str] = &["passport", "id_card", "drivers_license", "proof_of_address", "selfie"];
pub const CONTENT_TYPES: &[&str] = &["image/png", "image/jpeg", "application/pdf"];

pub const KYC_PENDING: &str = "pending";
pub const KYC_APPROVED: &str = "approved";
pub const KYC_REJECTED: &str = "rejected";

pub fn validate_upload(doc_type: &str, content_type: &str, size: usize) -> Result<(), FieldErrors> {
    let mut errs = FieldErrors::new();

    if !DOC_TYPES.contains(&doc_type) {
        errs.insert("doc_type".into(), format!("doc_type must be one of: {}.", DOC_TYPES.join(", ")));
    }
    if size == 0 {
        errs.insert("file".into(), "File is required.".into());
    } else if size > MAX_FILE_BYTES {
        errs.insert("file".into(), "File must be 5 MB or smaller.".into());
    } else if !CONTENT_TYPES.contains(&content_type) {
        errs.insert("file".into(), "Only PNG, JPEG or PDF files are accepted.".into());
    }

    if errs.is_empty() { Ok(()) } else { Err(errs) }
}

/// Strips path components and anything odd from a client-supplied name.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("");
    let clean: String = base
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .take(100)
        .collect();
    if clean.trim_matches('.').is_empty() {
        "document".to_string()
    } else {
        clean
    }
}

fn bucket(state: &AppState) -> GridFsBucket {
    state
        .db
        .gridfs_bucket(GridFsBucketOptions::builder().bucket_name("kyc".to_string()).build())
}

fn documents(state: &AppState) -> mongodb::Collection<KycDocument> {
    state.db.collection::<KycDocument>("kyc_documents")
}

pub async fn upload(
    state: &AppState,
    user: &User,
    doc_type: &str,
    filename: &str,
    content_type: &str,
    bytes: &[u8],
) -> Result<KycDocument, ApiError> {
    validate_upload(doc_type, content_type, bytes.len()).map_err(ApiError::validation)?;

    let filename = sanitize_filename(filename);
    let opts = GridFsUploadOptions::builder()
        .metadata(doc! { "user_id": user.id, "doc_type": doc_type, "content_type": content_type })
        .build();

    let mut stream = bucket(state).open_upload_stream(&filename, opts);
    stream.write_all(bytes).await.map_err(ApiError::internal)?;
    stream.close().await.map_err(ApiError::internal)?;
    let file_id = stream.id().clone();

    let doc = KycDocument {
        id: ObjectId::new(),
        user_id: user.id,
        doc_type: doc_type.to_string(),
        filename,
        content_type: content_type.to_string(),
        file_id,
        size: bytes.len() as i64,
        status: KYC_PENDING.to_string(),
        review_note: None,
        created_at: Utc::now().timestamp(),
    };
    documents(state).insert_one(&doc, None).await?;

    state
        .db
        .collection::<User>("users")
        .update_one(doc! { "_id": user.id }, doc! { "$set": { "kyc_status": KYC_PENDING } }, None)
        .await?;

    events::emit(&state.events_tx, user.id, KYC_UPDATED);
    state.telegram.spawn_admin(format!(
        "🪪 KYC document <b>{}</b> uploaded by {}",
        doc.doc_type,
        escape_html(&user.username)
    ));

    Ok(doc)
}

async fn collect(state: &AppState, filter: mongodb::bson::Document, limit: i64) -> Result<Vec<KycDocument>, String> {
    let opts = FindOptions::builder()
        .sort(doc! { "created_at": -1 })
        .limit(limit.clamp(1, 500))
        .build();

    let mut cursor = documents(state).find(filter, opts).await.map_err(|e| e.to_string())?;
    let mut out = Vec::new();
    while let Some(item) = cursor.next().await {
        out.push(item.map_err(|e| e.to_string())?);
    }
    Ok(out)
}

pub async fn list_for_user(state: &AppState, user_id: ObjectId) -> Result<Vec<KycDocument>, String> {
    collect(state, doc! { "user_id": user_id }, 100).await
}

pub async fn list_pending(state: &AppState) -> Result<Vec<KycDocument>, String> {
    collect(state, doc! { "status": KYC_PENDING }, 200).await
}

pub async fn read_file(state: &AppState, doc_id: ObjectId) -> Result<(KycDocument, Vec<u8>), ApiError> {
    let meta = documents(state)
        .find_one(doc! { "_id": doc_id }, None)
        .await?
        .ok_or_else(|| ApiError::not_found("Document not found"))?;

    let mut stream = bucket(state)
        .open_download_stream(meta.file_id.clone())
        .await
        .map_err(|e| {
            tracing::warn!("kyc file {} missing: {}", doc_id, e);
            ApiError::not_found("Document file not found")
        })?;

    let mut buf = Vec::with_capacity(meta.size.max(0) as usize);
    stream.read_to_end(&mut buf).await.map_err(ApiError::internal)?;

    Ok((meta, buf))
}

/// Applies a decision to every pending document of the user and to the
/// user's overall KYC status.
pub async fn review(state: &AppState, user_id: ObjectId, approve: bool, note: Option<String>) -> Result<u64, ApiError> {
    let users = state.db.collection::<User>("users");
    users
        .find_one(doc! { "_id": user_id }, None)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    let status = if approve { KYC_APPROVED } else { KYC_REJECTED };
    let note = note.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());

    let res = documents(state)
        .update_many(
            doc! { "user_id": user_id, "status": KYC_PENDING },
            doc! { "$set": { "status": status, "review_note": note.clone() } },
            None,
        )
        .await?;

    users
        .update_one(doc! { "_id": user_id }, doc! { "$set": { "kyc_status": status } }, None)
        .await?;

    let body = match &note {
        Some(n) => format!("Your identity verification was {status}. Note: {n}"),
        None => format!("Your identity verification was {status}."),
    };
    notification_service::notify_logged(state, user_id, "Verification update", &body, "kyc").await;
    events::emit(&state.events_tx, user_id, KYC_UPDATED);

    Ok(res.modified_count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_rules() {
        assert!(validate_upload("passport", "image/png", 1024).is_ok());

        let errs = validate_upload("library_card", "image/png", 10).unwrap_err();
        assert!(errs.contains_key("doc_type"));

        let errs = validate_upload("selfie", "image/gif", 10).unwrap_err();
        assert!(errs.contains_key("file"));

        let errs = validate_upload("selfie", "image/png", MAX_FILE_BYTES + 1).unwrap_err();
        assert_eq!(errs.get("file").map(String::as_str), Some("File must be 5 MB or smaller."));

        assert!(validate_upload("selfie", "image/png", 0).is_err());
    }

    #[test]
    fn filenames_are_flattened() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\docs\\my scan.pdf"), "myscan.pdf");
        assert_eq!(sanitize_filename(".."), "document");
    }
}
