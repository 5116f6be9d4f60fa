//! SQLite credential store implementation.
//!
//! Implements `CredentialStore` from `relay-core`. Access and refresh tokens
//! are sealed with [`VaultCrypto`] before they touch the database and opened
//! only when a row is decoded into a [`Credential`]. Refresh goes through the
//! [`OAuthRefresher`] and persists the new token material in place.

use std::sync::Arc;

use chrono::Utc;
use relay_core::repository::CredentialStore;
use relay_types::credential::{Credential, CredentialType, Redacted};
use relay_types::error::{RefreshError, RepositoryError};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;
use super::workflow::{format_datetime, parse_datetime, parse_uuid};
use crate::crypto::vault::VaultCrypto;
use crate::oauth::OAuthRefresher;

const CREDENTIAL_COLUMNS: &str = "id, user_id, service_provider, credential_type, encrypted_token, \
     encrypted_refresh_token, expires_at, is_valid, created_at, updated_at";

/// SQLite-backed implementation of `CredentialStore`.
///
/// Never logs token material, encrypted or not.
pub struct SqliteCredentialStore {
    pool: DatabasePool,
    crypto: Arc<VaultCrypto>,
    refresher: Arc<OAuthRefresher>,
}

impl SqliteCredentialStore {
    pub fn new(pool: DatabasePool, crypto: Arc<VaultCrypto>, refresher: Arc<OAuthRefresher>) -> Self {
        Self {
            pool,
            crypto,
            refresher,
        }
    }

    /// Look a credential up by its own ID (writer pool, so a just-committed
    /// refresh is always visible).
    pub async fn get_by_id(&self, id: &Uuid) -> Result<Option<Credential>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {CREDENTIAL_COLUMNS} FROM credentials WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool.writer)
            .await
            .map_err(query_err)?;

        row.map(|row| self.decode(&row)).transpose()
    }

    fn decode(&self, row: &sqlx::sqlite::SqliteRow) -> Result<Credential, RepositoryError> {
        let get = |col: &str| -> Result<String, RepositoryError> { row.try_get(col).map_err(query_err) };
        let get_opt =
            |col: &str| -> Result<Option<String>, RepositoryError> { row.try_get(col).map_err(query_err) };

        let credential_type: CredentialType = get("credential_type")?
            .parse()
            .map_err(RepositoryError::Query)?;
        let token = self.open(&get("encrypted_token")?)?;
        let refresh_token = get_opt("encrypted_refresh_token")?
            .map(|sealed| self.open(&sealed))
            .transpose()?;

        Ok(Credential {
            id: parse_uuid(&get("id")?)?,
            user_id: parse_uuid(&get("user_id")?)?,
            service_provider: get("service_provider")?,
            credential_type,
            token: Redacted::new(token),
            refresh_token: refresh_token.map(Redacted::new),
            expires_at: get_opt("expires_at")?
                .as_deref()
                .map(parse_datetime)
                .transpose()?,
            is_valid: row.try_get("is_valid").map_err(query_err)?,
            created_at: parse_datetime(&get("created_at")?)?,
            updated_at: parse_datetime(&get("updated_at")?)?,
        })
    }

    fn seal(&self, plaintext: &str) -> Result<String, RepositoryError> {
        self.crypto
            .seal(plaintext)
            .map_err(|e| RepositoryError::Query(format!("failed to seal token: {e}")))
    }

    fn open(&self, sealed: &str) -> Result<String, RepositoryError> {
        self.crypto
            .open(sealed)
            .map_err(|e| RepositoryError::Query(format!("failed to open token: {e}")))
    }
}

fn query_err(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Query(e.to_string())
}

impl CredentialStore for SqliteCredentialStore {
    async fn get_credential(&self, user_id: &Uuid, provider: &str) -> Result<Option<Credential>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {CREDENTIAL_COLUMNS} FROM credentials WHERE user_id = ? AND service_provider = ?"
        ))
        .bind(user_id.to_string())
        .bind(provider)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_err)?;

        row.map(|row| self.decode(&row)).transpose()
    }

    async fn mark_invalid(&self, id: &Uuid) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE credentials SET is_valid = 0, updated_at = ? WHERE id = ?")
            .bind(format_datetime(&Utc::now()))
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn refresh(&self, id: &Uuid) -> Result<Credential, RefreshError> {
        let storage = |e: RepositoryError| RefreshError::Storage(e.to_string());

        let current = self
            .get_by_id(id)
            .await
            .map_err(storage)?
            .ok_or_else(|| RefreshError::Storage(format!("credential {id} not found")))?;

        if current.credential_type != CredentialType::OAuth2 {
            return Err(RefreshError::NotRefreshable("not an oauth2 credential".to_string()));
        }
        let Some(refresh_token) = current.refresh_token.as_ref() else {
            return Err(RefreshError::NotRefreshable("no refresh token stored".to_string()));
        };

        let grant = self
            .refresher
            .refresh(&current.service_provider, refresh_token.expose())
            .await?;

        let now = Utc::now();
        let sealed_access = self.seal(&grant.access_token).map_err(storage)?;
        let sealed_refresh = grant
            .refresh_token
            .as_deref()
            .map(|rt| self.seal(rt))
            .transpose()
            .map_err(storage)?;

        sqlx::query(
            r#"UPDATE credentials SET
                 encrypted_token = ?,
                 encrypted_refresh_token = COALESCE(?, encrypted_refresh_token),
                 expires_at = ?,
                 updated_at = ?
               WHERE id = ?"#,
        )
        .bind(&sealed_access)
        .bind(&sealed_refresh)
        .bind(grant.expires_at.as_ref().map(format_datetime))
        .bind(format_datetime(&now))
        .bind(id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RefreshError::Storage(e.to_string()))?;

        tracing::debug!(credential_id = %id, "stored refreshed token");

        Ok(Credential {
            token: Redacted::new(grant.access_token),
            refresh_token: grant.refresh_token.map(Redacted::new).or(current.refresh_token.clone()),
            expires_at: grant.expires_at,
            updated_at: now,
            ..current
        })
    }

    async fn save(&self, credential: &Credential) -> Result<(), RepositoryError> {
        let sealed_token = self.seal(credential.token.expose())?;
        let sealed_refresh = credential
            .refresh_token
            .as_ref()
            .map(|rt| self.seal(rt.expose()))
            .transpose()?;

        sqlx::query(&format!(
            r#"INSERT INTO credentials ({CREDENTIAL_COLUMNS})
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(user_id, service_provider) DO UPDATE SET
                 id = excluded.id,
                 credential_type = excluded.credential_type,
                 encrypted_token = excluded.encrypted_token,
                 encrypted_refresh_token = excluded.encrypted_refresh_token,
                 expires_at = excluded.expires_at,
                 is_valid = excluded.is_valid,
                 updated_at = excluded.updated_at"#
        ))
        .bind(credential.id.to_string())
        .bind(credential.user_id.to_string())
        .bind(&credential.service_provider)
        .bind(credential.credential_type.to_string())
        .bind(&sealed_token)
        .bind(&sealed_refresh)
        .bind(credential.expires_at.as_ref().map(format_datetime))
        .bind(credential.is_valid)
        .bind(format_datetime(&credential.created_at))
        .bind(format_datetime(&credential.updated_at))
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        Ok(())
    }

    async fn list(&self, user_id: &Uuid) -> Result<Vec<Credential>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {CREDENTIAL_COLUMNS} FROM credentials WHERE user_id = ? ORDER BY service_provider ASC"
        ))
        .bind(user_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        rows.iter().map(|row| self.decode(row)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::post;
    use relay_types::config::OAuthClientSettings;
    use std::collections::BTreeMap;

    async fn test_store(token_url: Option<String>) -> (SqliteCredentialStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let pool = DatabasePool::open_in(dir.path()).await.unwrap();
        let mut settings = BTreeMap::new();
        if let Some(token_url) = token_url {
            settings.insert(
                "gmail".to_string(),
                OAuthClientSettings {
                    client_id: "client".to_string(),
                    client_secret: "secret".to_string(),
                    token_url,
                },
            );
        }
        let store = SqliteCredentialStore::new(
            pool,
            Arc::new(VaultCrypto::new(&[7u8; 32])),
            Arc::new(OAuthRefresher::new(&settings)),
        );
        (store, dir)
    }

    async fn token_endpoint(status: StatusCode, body: serde_json::Value) -> String {
        let router = Router::new().route(
            "/token",
            post(move || {
                let body = body.clone();
                async move { (status, axum::Json(body)) }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/token")
    }

    #[tokio::test]
    async fn test_save_and_get_decrypts() {
        let (store, _dir) = test_store(None).await;
        let user = Uuid::now_v7();
        let cred = Credential::secret(user, "discord", "bot-token-123");
        store.save(&cred).await.unwrap();

        let loaded = store.get_credential(&user, "discord").await.unwrap().unwrap();
        assert_eq!(loaded.id, cred.id);
        assert_eq!(loaded.token.expose(), "bot-token-123");
        assert_eq!(loaded.credential_type, CredentialType::Secret);
        assert!(loaded.is_valid);
        assert!(store.get_credential(&user, "gmail").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_tokens_are_encrypted_at_rest() {
        let (store, _dir) = test_store(None).await;
        let cred = Credential::oauth2(
            Uuid::now_v7(),
            "gmail",
            "ya29.plain-access",
            Some("1//plain-refresh".to_string()),
            None,
        );
        store.save(&cred).await.unwrap();

        let (token, refresh): (String, Option<String>) = sqlx::query_as(
            "SELECT encrypted_token, encrypted_refresh_token FROM credentials WHERE id = ?",
        )
        .bind(cred.id.to_string())
        .fetch_one(&store.pool.reader)
        .await
        .unwrap();
        assert!(!token.contains("ya29"));
        assert!(!refresh.unwrap().contains("plain-refresh"));
    }

    #[tokio::test]
    async fn test_save_replaces_per_user_and_provider() {
        let (store, _dir) = test_store(None).await;
        let user = Uuid::now_v7();
        store.save(&Credential::secret(user, "discord", "old")).await.unwrap();
        let replacement = Credential::secret(user, "discord", "new");
        store.save(&replacement).await.unwrap();

        let all = store.list(&user).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, replacement.id);
        assert_eq!(all[0].token.expose(), "new");
    }

    #[tokio::test]
    async fn test_mark_invalid() {
        let (store, _dir) = test_store(None).await;
        let user = Uuid::now_v7();
        let cred = Credential::secret(user, "discord", "token");
        store.save(&cred).await.unwrap();

        store.mark_invalid(&cred.id).await.unwrap();
        let loaded = store.get_credential(&user, "discord").await.unwrap().unwrap();
        assert!(!loaded.is_valid);

        assert!(matches!(
            store.mark_invalid(&Uuid::now_v7()).await,
            Err(RepositoryError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_refresh_persists_new_token() {
        let url = token_endpoint(
            StatusCode::OK,
            serde_json::json!({"access_token": "fresh", "expires_in": 3600}),
        )
        .await;
        let (store, _dir) = test_store(Some(url)).await;
        let user = Uuid::now_v7();
        let cred = Credential::oauth2(
            user,
            "gmail",
            "stale",
            Some("rt".to_string()),
            Some(Utc::now()),
        );
        store.save(&cred).await.unwrap();

        let refreshed = store.refresh(&cred.id).await.unwrap();
        assert_eq!(refreshed.token.expose(), "fresh");
        assert_eq!(refreshed.refresh_token.as_ref().map(|r| r.expose()), Some("rt"));

        let loaded = store.get_credential(&user, "gmail").await.unwrap().unwrap();
        assert_eq!(loaded.token.expose(), "fresh");
        assert_eq!(loaded.refresh_token.as_ref().map(|r| r.expose()), Some("rt"));
        assert!(loaded.expires_at.unwrap() > Utc::now());
    }

    #[tokio::test]
    async fn test_refresh_revoked_grant() {
        let url = token_endpoint(
            StatusCode::BAD_REQUEST,
            serde_json::json!({"error": "invalid_grant"}),
        )
        .await;
        let (store, _dir) = test_store(Some(url)).await;
        let cred = Credential::oauth2(
            Uuid::now_v7(),
            "gmail",
            "stale",
            Some("rt".to_string()),
            Some(Utc::now()),
        );
        store.save(&cred).await.unwrap();

        assert!(matches!(
            store.refresh(&cred.id).await,
            Err(RefreshError::Revoked(_))
        ));
    }

    #[tokio::test]
    async fn test_refresh_without_refresh_token() {
        let (store, _dir) = test_store(None).await;
        let secret = Credential::secret(Uuid::now_v7(), "discord", "token");
        store.save(&secret).await.unwrap();
        assert!(matches!(
            store.refresh(&secret.id).await,
            Err(RefreshError::NotRefreshable(_))
        ));

        let oauth = Credential::oauth2(Uuid::now_v7(), "gmail", "a", None, Some(Utc::now()));
        store.save(&oauth).await.unwrap();
        assert!(matches!(
            store.refresh(&oauth.id).await,
            Err(RefreshError::NotRefreshable(_))
        ));
    }
}
