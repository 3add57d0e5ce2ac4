//! Handlers shared by every resource kind.
//!
//! Each handler is generic over the [`ResourceKind`]; routes instantiate it
//! per kind, e.g. `get(list::<Product>)`. Owned kinds are only reachable
//! behind an authentication gate, and single-record operations on them
//! additionally require the principal to own the record or be an admin.

use std::sync::Arc;

use axum::extract::Path;
use axum::extract::Query;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Extension;
use axum::Json;
use axum_extra::extract::WithRejection;
use serde::Deserialize;
use serde_json::Map;
use serde_json::Value;

use crate::domain::access::ensure_owner_or_admin;
use crate::domain::access::Principal;
use crate::domain::resource::errors::ResourceError;
use crate::domain::resource::kinds::ResourceKind;
use crate::domain::resource::models::DocumentId;
use crate::domain::resource::models::Expand;
use crate::domain::resource::models::LoadedDocument;
use crate::domain::resource::ports::ResourceServicePort;
use crate::domain::resource::query::QueryDescriptor;
use crate::domain::resource::query::DEFAULT_PAGE_SIZE;
use crate::domain::user::errors::SessionError;
use crate::domain::user::models::UserId;
use crate::inbound::http::handlers::ApiError;
use crate::inbound::http::handlers::ApiSuccess;
use crate::inbound::http::middleware::RequestedAt;

/// Results returned by text search when the caller names no limit.
const DEFAULT_SEARCH_LIMIT: u32 = 5;

/// Shared handle to the service of one resource kind.
pub struct ResourceHandle<K: ResourceKind>(pub Arc<dyn ResourceServicePort<K>>);

impl<K: ResourceKind> Clone for ResourceHandle<K> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

/// The principal a gated route attached, required for owned kinds.
fn owner_principal<K: ResourceKind>(
    principal: Option<Extension<Principal>>,
) -> Result<Option<Principal>, ApiError> {
    match principal {
        Some(Extension(principal)) => Ok(Some(principal)),
        None if K::OWNED => Err(ApiError::from(SessionError::MissingToken)),
        None => Ok(None),
    }
}

fn document_id<K: ResourceKind>(raw: &str) -> Result<DocumentId, ApiError> {
    Ok(DocumentId::from_string(K::SINGULAR, raw).map_err(ResourceError::from)?)
}

/// Load a record and check the principal may act on it.
async fn authorized<K: ResourceKind>(
    service: &dyn ResourceServicePort<K>,
    id: &DocumentId,
    principal: Option<&Principal>,
    expand: Expand,
) -> Result<LoadedDocument, ApiError> {
    let loaded = service.get_by_id(id, expand).await?;
    if let Some(principal) = principal {
        ensure_owner_or_admin(principal, loaded.document.owner.as_ref())?;
    }
    Ok(loaded)
}

pub async fn list<K: ResourceKind>(
    State(ResourceHandle(service)): State<ResourceHandle<K>>,
    Extension(RequestedAt(requested_at)): Extension<RequestedAt>,
    WithRejection(Query(descriptor), _): WithRejection<Query<QueryDescriptor>, ApiError>,
) -> Result<ApiSuccess, ApiError> {
    let records = service.list(&descriptor).await?;
    Ok(ApiSuccess::list(K::COLLECTION, records, requested_at))
}

/// Listing restricted to the calling principal's records.
pub async fn list_mine<K: ResourceKind>(
    State(ResourceHandle(service)): State<ResourceHandle<K>>,
    Extension(principal): Extension<Principal>,
    Extension(RequestedAt(requested_at)): Extension<RequestedAt>,
    WithRejection(Query(descriptor), _): WithRejection<Query<QueryDescriptor>, ApiError>,
) -> Result<ApiSuccess, ApiError> {
    let records = service.list_owned(&principal.id, &descriptor).await?;
    Ok(ApiSuccess::list(K::COLLECTION, records, requested_at))
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub q: Option<String>,
    pub limit: Option<u32>,
}

pub async fn search<K: ResourceKind>(
    State(ResourceHandle(service)): State<ResourceHandle<K>>,
    Extension(RequestedAt(requested_at)): Extension<RequestedAt>,
    WithRejection(Query(params), _): WithRejection<Query<SearchParams>, ApiError>,
) -> Result<ApiSuccess, ApiError> {
    let limit = params
        .limit
        .filter(|limit| *limit > 0)
        .unwrap_or(DEFAULT_SEARCH_LIMIT)
        .min(DEFAULT_PAGE_SIZE);
    let records = service
        .search(params.q.as_deref().unwrap_or_default(), limit)
        .await?;

    Ok(ApiSuccess::list(K::COLLECTION, records, requested_at))
}

pub async fn get<K: ResourceKind>(
    State(ResourceHandle(service)): State<ResourceHandle<K>>,
    Path(id): Path<String>,
    principal: Option<Extension<Principal>>,
) -> Result<ApiSuccess, ApiError> {
    let principal = owner_principal::<K>(principal)?;
    let id = document_id::<K>(&id)?;
    let expand = if K::OWNED { Expand::Owner } else { Expand::None };

    let loaded = authorized(service.as_ref(), &id, principal.as_ref(), expand).await?;
    Ok(ApiSuccess::new(StatusCode::OK).with(K::SINGULAR, loaded.render()))
}

/// Lookup by the alternate key of slugged kinds.
pub async fn get_by_slug<K: ResourceKind>(
    State(ResourceHandle(service)): State<ResourceHandle<K>>,
    Path(slug): Path<String>,
) -> Result<ApiSuccess, ApiError> {
    let loaded = service.get_by_slug(&slug).await?;
    Ok(ApiSuccess::new(StatusCode::OK).with(K::SINGULAR, loaded.render()))
}

/// Owner named in a create body, defaulting to the principal.
fn requested_owner(
    fields: &Map<String, Value>,
    principal: &Principal,
) -> Result<UserId, ApiError> {
    let owner = match fields.get("user") {
        None | Some(Value::Null) => return Ok(principal.id),
        Some(Value::String(raw)) => UserId::from_string(raw)
            .map_err(|e| ApiError::BadRequest(format!("Invalid user ID: {}", e)))?,
        Some(_) => return Err(ApiError::BadRequest("user must be a user ID".to_string())),
    };

    ensure_owner_or_admin(principal, Some(&owner))?;
    Ok(owner)
}

pub async fn create<K: ResourceKind>(
    State(ResourceHandle(service)): State<ResourceHandle<K>>,
    principal: Option<Extension<Principal>>,
    WithRejection(Json(fields), _): WithRejection<Json<Map<String, Value>>, ApiError>,
) -> Result<ApiSuccess, ApiError> {
    let owner = match owner_principal::<K>(principal)? {
        Some(principal) if K::OWNED => Some(requested_owner(&fields, &principal)?),
        _ => None,
    };

    let document = service.create(owner, fields).await?;
    Ok(ApiSuccess::new(StatusCode::CREATED)
        .with(K::SINGULAR, LoadedDocument::plain(document).render()))
}

pub async fn update<K: ResourceKind>(
    State(ResourceHandle(service)): State<ResourceHandle<K>>,
    Path(id): Path<String>,
    principal: Option<Extension<Principal>>,
    WithRejection(Json(patch), _): WithRejection<Json<Map<String, Value>>, ApiError>,
) -> Result<ApiSuccess, ApiError> {
    let principal = owner_principal::<K>(principal)?;
    let id = document_id::<K>(&id)?;
    if K::OWNED {
        authorized(service.as_ref(), &id, principal.as_ref(), Expand::None).await?;
    }

    let document = service.update(&id, patch).await?;
    Ok(ApiSuccess::new(StatusCode::OK).with(K::SINGULAR, LoadedDocument::plain(document).render()))
}

pub async fn delete<K: ResourceKind>(
    State(ResourceHandle(service)): State<ResourceHandle<K>>,
    Path(id): Path<String>,
    principal: Option<Extension<Principal>>,
) -> Result<StatusCode, ApiError> {
    let principal = owner_principal::<K>(principal)?;
    let id = document_id::<K>(&id)?;
    if K::OWNED {
        authorized(service.as_ref(), &id, principal.as_ref(), Expand::None).await?;
    }

    service.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
