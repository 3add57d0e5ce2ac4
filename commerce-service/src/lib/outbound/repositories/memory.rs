//! In-process stores backing the `memory` store backend and the integration
//! tests. Queries run through [`QuerySpec`] evaluation over rendered records.

use std::marker::PhantomData;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::domain::resource::errors::ResourceError;
use crate::domain::resource::kinds::ResourceKind;
use crate::domain::resource::models::Document;
use crate::domain::resource::models::DocumentId;
use crate::domain::resource::ports::ResourceRepository;
use crate::domain::resource::query::QuerySpec;
use crate::domain::user::models::EmailAddress;
use crate::domain::user::models::PasswordChange;
use crate::domain::user::models::ResetPasswordToken;
use crate::domain::user::models::User;
use crate::domain::user::models::UserChanges;
use crate::domain::user::models::UserId;
use crate::domain::user::ports::UserRepository;
use crate::user::errors::UserError;

/// Users kept in insertion order.
#[derive(Default)]
pub struct InMemoryUserRepository {
    users: RwLock<Vec<User>>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Reject `candidate` if another stored user already holds its username or
/// email. Uniqueness spans inactive users too.
fn check_unique(users: &[User], candidate: &User) -> Result<(), UserError> {
    for user in users.iter().filter(|user| user.id != candidate.id) {
        if user.username == candidate.username {
            return Err(UserError::UsernameAlreadyExists(
                candidate.username.as_str().to_string(),
            ));
        }
        if user.email == candidate.email {
            return Err(UserError::EmailAlreadyExists(
                candidate.email.as_str().to_string(),
            ));
        }
    }
    Ok(())
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn create(&self, user: User) -> Result<User, UserError> {
        let mut users = self.users.write().await;
        check_unique(&users, &user)?;
        users.push(user.clone());
        Ok(user)
    }

    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, UserError> {
        let users = self.users.read().await;
        Ok(users
            .iter()
            .find(|user| user.active && user.id == *id)
            .cloned())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, UserError> {
        let users = self.users.read().await;
        Ok(users
            .iter()
            .find(|user| user.active && user.username.as_str() == username)
            .cloned())
    }

    async fn find_by_email(&self, email: &EmailAddress) -> Result<Option<User>, UserError> {
        let users = self.users.read().await;
        Ok(users
            .iter()
            .find(|user| user.active && user.email == *email)
            .cloned())
    }

    async fn list(&self, spec: &QuerySpec) -> Result<Vec<User>, UserError> {
        let users = self.users.read().await;
        Ok(spec.select(users.iter().map(|user| (user.clone(), user.to_document()))))
    }

    async fn update_fields(
        &self,
        id: &UserId,
        changes: &UserChanges,
    ) -> Result<Option<User>, UserError> {
        let mut users = self.users.write().await;
        let Some(index) = users.iter().position(|user| user.active && user.id == *id) else {
            return Ok(None);
        };

        let mut candidate = users[index].clone();
        changes.apply(&mut candidate);
        check_unique(&users, &candidate)?;

        users[index] = candidate.clone();
        Ok(Some(candidate))
    }

    async fn set_password(
        &self,
        id: &UserId,
        change: &PasswordChange,
    ) -> Result<Option<User>, UserError> {
        let mut users = self.users.write().await;
        let holder = users.iter_mut().find(|user| {
            user.active && user.id == *id && change.applies_to(&user.password_hash)
        });

        Ok(holder.map(|user| {
            user.apply_password(change);
            user.clone()
        }))
    }

    async fn set_active(&self, id: &UserId, active: bool) -> Result<bool, UserError> {
        let mut users = self.users.write().await;
        match users
            .iter_mut()
            .find(|user| user.id == *id && user.active != active)
        {
            Some(user) => {
                user.active = active;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_reset_token(
        &self,
        id: &UserId,
        token: Option<ResetPasswordToken>,
    ) -> Result<(), UserError> {
        let mut users = self.users.write().await;
        if let Some(user) = users.iter_mut().find(|user| user.id == *id) {
            user.reset_password = token;
        }
        Ok(())
    }

    async fn consume_reset_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<User>, UserError> {
        let mut users = self.users.write().await;
        let holder = users.iter_mut().find(|user| {
            user.active
                && user
                    .reset_password
                    .as_ref()
                    .is_some_and(|token| token.matches(token_hash, now))
        });

        Ok(holder.map(|user| {
            user.reset_password = None;
            user.clone()
        }))
    }

    async fn delete(&self, id: &UserId) -> Result<bool, UserError> {
        let mut users = self.users.write().await;
        let before = users.len();
        users.retain(|user| user.id != *id);
        Ok(users.len() < before)
    }
}

/// Documents of one kind kept in insertion order.
pub struct InMemoryDocumentRepository<K: ResourceKind> {
    documents: RwLock<Vec<Document>>,
    kind: PhantomData<fn() -> K>,
}

impl<K: ResourceKind> InMemoryDocumentRepository<K> {
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(Vec::new()),
            kind: PhantomData,
        }
    }

    fn check_slug(documents: &[Document], candidate: &Document) -> Result<(), ResourceError> {
        let Some(slug) = &candidate.slug else {
            return Ok(());
        };
        let taken = documents
            .iter()
            .any(|document| document.id != candidate.id && document.slug.as_ref() == Some(slug));
        if taken {
            return Err(ResourceError::DuplicateSlug {
                kind: K::SINGULAR,
                slug: slug.clone(),
            });
        }
        Ok(())
    }
}

impl<K: ResourceKind> Default for InMemoryDocumentRepository<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<K: ResourceKind> ResourceRepository<K> for InMemoryDocumentRepository<K> {
    async fn find_all(&self, spec: &QuerySpec) -> Result<Vec<Value>, ResourceError> {
        let documents = self.documents.read().await;
        Ok(spec.evaluate(documents.iter().map(Document::render)))
    }

    async fn find_by_id(&self, id: &DocumentId) -> Result<Option<Document>, ResourceError> {
        let documents = self.documents.read().await;
        Ok(documents.iter().find(|document| document.id == *id).cloned())
    }

    async fn find_one_by_slug(&self, slug: &str) -> Result<Option<Document>, ResourceError> {
        let documents = self.documents.read().await;
        Ok(documents
            .iter()
            .find(|document| document.slug.as_deref() == Some(slug))
            .cloned())
    }

    async fn create(&self, document: Document) -> Result<Document, ResourceError> {
        let mut documents = self.documents.write().await;
        Self::check_slug(&documents, &document)?;
        documents.push(document.clone());
        Ok(document)
    }

    async fn update_by_id(
        &self,
        mut document: Document,
    ) -> Result<Option<Document>, ResourceError> {
        let mut documents = self.documents.write().await;
        let Some(index) = documents.iter().position(|stored| stored.id == document.id) else {
            return Ok(None);
        };
        if documents[index].version != document.version {
            return Err(ResourceError::VersionConflict {
                kind: K::SINGULAR,
                id: document.id.to_string(),
            });
        }
        Self::check_slug(&documents, &document)?;

        document.version += 1;
        documents[index] = document.clone();
        Ok(Some(document))
    }

    async fn delete_by_id(&self, id: &DocumentId) -> Result<bool, ResourceError> {
        let mut documents = self.documents.write().await;
        let before = documents.len();
        documents.retain(|document| document.id != *id);
        Ok(documents.len() < before)
    }
}
