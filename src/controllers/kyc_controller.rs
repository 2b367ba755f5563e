use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Extension, Multipart, Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use mongodb::bson::doc;
use serde::Deserialize;
use serde_json::json;

use crate::{
    error::{ApiError, ApiResult},
    models::CurrentUser,
    services::{audit_service, kyc_service},
    AppState,
};

use super::{load_user, parse_id, request_ip};

#[derive(Debug, Deserialize)]
pub struct ReviewInput {
    #[serde(default)]
    pub approve: bool,
    #[serde(default)]
    pub note: Option<String>,
}

struct Upload {
    doc_type: String,
    filename: String,
    content_type: String,
    bytes: Vec<u8>,
}

async fn read_upload(mut multipart: Multipart) -> ApiResult<Upload> {
    let mut up = Upload {
        doc_type: String::new(),
        filename: String::new(),
        content_type: String::new(),
        bytes: Vec::new(),
    };

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "doc_type" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Invalid doc_type: {e}")))?;
                up.doc_type = text.trim().to_lowercase();
            }
            "file" => {
                up.filename = field.file_name().unwrap_or("document").to_string();
                up.content_type = field.content_type().unwrap_or_default().to_lowercase();
                let data = field.bytes().await.map_err(|_| {
                    ApiError::field("file", "File must be 5 MB or smaller.")
                })?;
                up.bytes = data.to_vec();
            }
            _ => {}
        }
    }

    Ok(up)
}

// POST /api/kyc/documents (multipart: doc_type, file)
pub async fn post_document(
    State(state): State<AppState>,
    Extension(u): Extension<CurrentUser>,
    multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let up = read_upload(multipart).await?;
    let user = load_user(&state, u.id).await?;

    let doc = kyc_service::upload(&state, &user, &up.doc_type, &up.filename, &up.content_type, &up.bytes).await?;
    tracing::info!("kyc upload {} ({} bytes) by {}", doc.doc_type, doc.size, u.username);

    Ok((StatusCode::CREATED, Json(json!({ "document": doc.to_json() }))))
}

// GET /api/kyc/documents
pub async fn get_documents(State(state): State<AppState>, Extension(u): Extension<CurrentUser>) -> ApiResult<impl IntoResponse> {
    let user = load_user(&state, u.id).await?;
    let docs = kyc_service::list_for_user(&state, u.id)
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(json!({
        "kyc_status": user.kyc_status,
        "documents": docs.iter().map(|d| d.to_json()).collect::<Vec<_>>(),
    })))
}

// GET /api/admin/kyc/pending
pub async fn admin_get_pending(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let docs = kyc_service::list_pending(&state)
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(json!({
        "documents": docs.iter().map(|d| d.to_json()).collect::<Vec<_>>(),
    })))
}

// GET /api/admin/kyc/documents/:id/file
pub async fn admin_get_file(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Response> {
    let doc_id = parse_id(&id, "Document")?;
    let (meta, bytes) = kyc_service::read_file(&state, doc_id).await?;

    let content_type =
        HeaderValue::from_str(&meta.content_type).unwrap_or(HeaderValue::from_static("application/octet-stream"));
    let disposition = HeaderValue::from_str(&format!("inline; filename=\"{}\"", meta.filename))
        .unwrap_or(HeaderValue::from_static("inline"));

    let mut res = bytes.into_response();
    res.headers_mut().insert(header::CONTENT_TYPE, content_type);
    res.headers_mut().insert(header::CONTENT_DISPOSITION, disposition);
    Ok(res)
}

// POST /api/admin/kyc/:user_id/review
pub async fn admin_post_review(
    State(state): State<AppState>,
    Extension(admin): Extension<CurrentUser>,
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    Path(user_id): Path<String>,
    Json(input): Json<ReviewInput>,
) -> ApiResult<impl IntoResponse> {
    let user_id = parse_id(&user_id, "User")?;
    let updated = kyc_service::review(&state, user_id, input.approve, input.note.clone()).await?;

    audit_service::record(
        &state,
        Some(admin.id),
        if input.approve { "kyc.approved" } else { "kyc.rejected" },
        Some(user_id.to_hex()),
        doc! { "documents": updated as i64, "note": input.note },
        request_ip(&headers, peer),
    )
    .await;

    Ok(Json(json!({ "ok": true, "documents_updated": updated })))
}
