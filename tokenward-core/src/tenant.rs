//! ACO and user administration.

use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{AuthError, Problems};
use crate::model::{Aco, User};
use crate::store::Repository;

/// Creates and looks up ACOs and their users.
#[derive(Clone)]
pub struct TenantDirectory {
    repo: Arc<dyn Repository>,
}

impl TenantDirectory {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }

    /// Create an ACO with a fresh UUID.
    pub async fn create_aco(&self, name: &str) -> Result<Aco, AuthError> {
        self.create_aco_with_id(Uuid::new_v4(), name).await
    }

    /// Create an ACO with a caller-chosen UUID.
    ///
    /// Fails with `Conflict` when the UUID is already taken.
    pub async fn create_aco_with_id(&self, uuid: Uuid, name: &str) -> Result<Aco, AuthError> {
        let mut problems = Problems::new();
        problems.require(name, "ACO name");
        problems.finish()?;

        let aco = Aco::with_uuid(uuid, name.trim());
        self.repo.insert_aco(aco.clone()).await?;
        tracing::info!(aco = %aco.uuid, "Created ACO {}", aco.name);
        Ok(aco)
    }

    /// Create a user in an existing ACO.
    ///
    /// All input problems are reported together. The email must not be used
    /// by any other user.
    pub async fn create_user(&self, aco_id: &str, name: &str, email: &str) -> Result<User, AuthError> {
        let mut problems = Problems::new();
        let aco_uuid = if aco_id.trim().is_empty() {
            problems.push("ACO ID must be provided");
            None
        } else {
            let parsed = Uuid::parse_str(aco_id.trim()).ok();
            problems.check(parsed.is_some(), "ACO ID must be a UUID");
            parsed
        };
        problems.require(name, "Name");
        problems.require(email, "Email address");
        problems.finish()?;

        let Some(aco_uuid) = aco_uuid else {
            return Err(AuthError::invalid("ACO ID must be a UUID"));
        };
        self.get_aco(aco_uuid).await?;

        let user = User {
            uuid: Uuid::new_v4(),
            name: name.trim().to_string(),
            email: email.trim().to_string(),
            aco_id: aco_uuid,
            created_at: Utc::now(),
        };
        self.repo.insert_user(user.clone()).await?;
        tracing::info!(aco = %aco_uuid, "Created user {}", user.uuid);
        Ok(user)
    }

    pub async fn get_aco(&self, uuid: Uuid) -> Result<Aco, AuthError> {
        self.repo
            .get_aco(uuid)
            .await?
            .ok_or_else(|| AuthError::not_found("aco", uuid))
    }

    pub async fn get_user(&self, uuid: Uuid) -> Result<User, AuthError> {
        self.repo
            .get_user(uuid)
            .await?
            .ok_or_else(|| AuthError::not_found("user", uuid))
    }

    /// Look up a user by textual id, validating its syntax first.
    pub async fn find_user(&self, user_id: &str) -> Result<User, AuthError> {
        let trimmed = user_id.trim();
        if trimmed.is_empty() {
            return Err(AuthError::invalid("User ID must be provided"));
        }
        let uuid = Uuid::parse_str(trimmed).map_err(|_| AuthError::invalid("User ID must be a UUID"))?;
        self.get_user(uuid).await
    }

    pub async fn users_for_aco(&self, aco_id: Uuid) -> Result<Vec<User>, AuthError> {
        Ok(self.repo.users_for_aco(aco_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::store::MemoryRepository;

    fn directory() -> TenantDirectory {
        TenantDirectory::new(Arc::new(MemoryRepository::new()))
    }

    #[tokio::test]
    async fn test_create_aco_rejects_blank_name() {
        let err = directory().create_aco("  ").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_create_aco_with_taken_id_conflicts() {
        let dir = directory();
        let aco = dir.create_aco("ACO Corp").await.unwrap();
        let err = dir.create_aco_with_id(aco.uuid, "Again").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_create_user_reports_every_problem() {
        let err = directory().create_user("not-a-uuid", "", "").await.unwrap_err();
        match err {
            AuthError::Validation { problems } => {
                assert_eq!(
                    problems,
                    vec![
                        "ACO ID must be a UUID".to_string(),
                        "Name must be provided".to_string(),
                        "Email address must be provided".to_string(),
                    ]
                );
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_create_user_requires_existing_aco() {
        let err = directory()
            .create_user(&Uuid::new_v4().to_string(), "Jane", "jane@example.com")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_create_user_duplicate_email_conflicts() {
        let dir = directory();
        let aco = dir.create_aco("ACO Corp").await.unwrap();
        let aco_id = aco.uuid.to_string();

        let user = dir.create_user(&aco_id, "Jane", "jane@example.com").await.unwrap();
        assert_eq!(dir.find_user(&user.uuid.to_string()).await.unwrap(), user);

        let err = dir
            .create_user(&aco_id, "Janet", "jane@example.com")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_find_user_validates_id() {
        let dir = directory();
        assert_eq!(dir.find_user("").await.unwrap_err().kind(), ErrorKind::Validation);
        assert_eq!(dir.find_user("abc").await.unwrap_err().kind(), ErrorKind::Validation);
        assert_eq!(
            dir.find_user(&Uuid::new_v4().to_string()).await.unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }
}
