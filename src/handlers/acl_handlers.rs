//! Endpoints that grant or revoke a user's read access to `codes.csv`.

use crate::{AppState, errors::AppError, models::acl::ObjectAccessControl};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Html,
};
use serde::Deserialize;

/// Object whose ACL these endpoints manage.
pub const ACL_OBJECT: &str = "codes.csv";
pub const MISSING_E_MAIL: &str = "No value provided for argument e_mail";

#[derive(Debug, Deserialize)]
pub struct AclQuery {
    pub e_mail: Option<String>,
}

impl AclQuery {
    fn e_mail(&self) -> Option<&str> {
        self.e_mail.as_deref().filter(|e| !e.is_empty())
    }
}

fn status_text(status: Option<StatusCode>) -> String {
    status
        .map(|s| s.as_u16().to_string())
        .unwrap_or_else(|| "None".into())
}

/// `GET /insert_acl?e_mail=<address>`
pub async fn insert_acl(
    State(state): State<AppState>,
    Query(q): Query<AclQuery>,
) -> Result<Html<String>, AppError> {
    let Some(e_mail) = q.e_mail() else {
        return Ok(Html(state.templates.message(MISSING_E_MAIL)));
    };

    let status = state.acl.insert_user_acl(ACL_OBJECT, e_mail).await?;
    if status == Some(StatusCode::OK) {
        let download_link = format!(
            "https://console.developers.google.com/m/cloudstorage/b/{}/o/{}",
            state.acl.bucket(),
            ACL_OBJECT
        );
        return Ok(Html(state.templates.acl_granted(e_mail, &download_link)));
    }

    Ok(Html(state.templates.message(&format!(
        "TestAcl finished : {}",
        status_text(status)
    ))))
}

/// `GET /delete_acl?e_mail=<address>`: a missing entry is not an error.
pub async fn delete_acl(
    State(state): State<AppState>,
    Query(q): Query<AclQuery>,
) -> Result<Html<String>, AppError> {
    let Some(e_mail) = q.e_mail() else {
        return Ok(Html(state.templates.message(MISSING_E_MAIL)));
    };

    let status = state.acl.delete_user_acl(ACL_OBJECT, e_mail, true).await?;
    Ok(Html(state.templates.message(&format!(
        "Delete finished : {}",
        status_text(status)
    ))))
}

/// `GET /api_insert_acl?e_mail=<address>`: same grant through the typed
/// storage API client.
pub async fn api_insert_acl(
    State(state): State<AppState>,
    Query(q): Query<AclQuery>,
) -> Result<Html<String>, AppError> {
    let Some(e_mail) = q.e_mail() else {
        return Ok(Html(state.templates.message(MISSING_E_MAIL)));
    };

    let created = state
        .storage_api
        .insert_object_access_control(
            &state.config.default_bucket,
            ACL_OBJECT,
            &ObjectAccessControl::user_reader(e_mail),
        )
        .await?;
    match serde_json::to_string_pretty(&created) {
        Ok(json) => tracing::info!("{}", json),
        Err(err) => tracing::warn!("could not format ACL entry: {}", err),
    }

    Ok(Html(state.templates.message("ApiInsertAcl finished")))
}
