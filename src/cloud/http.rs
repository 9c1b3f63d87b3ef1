//! HTTP clients for the bundled cloud server

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};

use super::{Document, DocumentStore, Fields, MAX_BATCH_WRITES};
use crate::account::AuthBackend;
use crate::error::{AuthError, AuthResult, CloudError, CloudResult};
use crate::models::{BatchDeleteRequest, Credentials, ReauthRequest};
use crate::session::{AuthUser, Session};

fn base(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

/// Turn a non-success response into [`CloudError::Status`].
async fn check(response: Response) -> CloudResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or(body);

    Err(CloudError::Status {
        status: status.as_u16(),
        message,
    })
}

/// Document store served by `taskmate serve`
#[derive(Clone)]
pub struct HttpDocumentStore {
    client: Client,
    base_url: String,
    session: Session,
}

impl HttpDocumentStore {
    pub fn new(base_url: &str, session: Session) -> Self {
        Self {
            client: Client::new(),
            base_url: base(base_url),
            session,
        }
    }

    fn authorized(&self, request: RequestBuilder) -> CloudResult<RequestBuilder> {
        let user = self.session.current().ok_or(CloudError::Unauthenticated)?;
        Ok(request.bearer_auth(user.token))
    }

    fn document_url(&self, path: &str) -> String {
        format!("{}/v1/documents/{path}", self.base_url)
    }
}

#[async_trait]
impl DocumentStore for HttpDocumentStore {
    async fn get_document(&self, path: &str) -> CloudResult<Option<Fields>> {
        let response = self
            .authorized(self.client.get(self.document_url(path)))?
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(check(response).await?.json().await?))
    }

    async fn merge_document(&self, path: &str, fields: Fields) -> CloudResult<()> {
        let response = self
            .authorized(self.client.patch(self.document_url(path)))?
            .json(&fields)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn delete_document(&self, path: &str) -> CloudResult<()> {
        let response = self
            .authorized(self.client.delete(self.document_url(path)))?
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn list_documents(&self, collection: &str) -> CloudResult<Vec<Document>> {
        let url = format!("{}/v1/collections/{collection}", self.base_url);
        let response = self.authorized(self.client.get(url))?.send().await?;
        Ok(check(response).await?.json().await?)
    }

    async fn batch_delete(&self, paths: &[String]) -> CloudResult<()> {
        if paths.len() > MAX_BATCH_WRITES {
            return Err(CloudError::BatchTooLarge(paths.len()));
        }

        let url = format!("{}/v1/batch/delete", self.base_url);
        let response = self
            .authorized(self.client.post(url))?
            .json(&BatchDeleteRequest {
                paths: paths.to_vec(),
            })
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }
}

/// Account endpoints of `taskmate serve`
#[derive(Clone)]
pub struct HttpAuthBackend {
    client: Client,
    base_url: String,
}

impl HttpAuthBackend {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base(base_url),
        }
    }

    async fn post_credentials(&self, route: &str, email: &str, password: &str) -> CloudResult<Response> {
        self.client
            .post(format!("{}/v1/auth/{route}", self.base_url))
            .json(&Credentials {
                email: email.to_string(),
                password: password.to_string(),
            })
            .send()
            .await
            .map_err(CloudError::from)
    }
}

#[async_trait]
impl AuthBackend for HttpAuthBackend {
    async fn sign_up(&self, email: &str, password: &str) -> AuthResult<AuthUser> {
        let response = self.post_credentials("signup", email, password).await?;
        if response.status() == StatusCode::CONFLICT {
            return Err(AuthError::EmailInUse(email.to_string()));
        }
        Ok(check(response).await?.json().await.map_err(CloudError::from)?)
    }

    async fn sign_in(&self, email: &str, password: &str) -> AuthResult<AuthUser> {
        let response = self.post_credentials("login", email, password).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(AuthError::InvalidCredentials);
        }
        Ok(check(response).await?.json().await.map_err(CloudError::from)?)
    }

    async fn reauthenticate(&self, user: &AuthUser, password: &str) -> AuthResult<()> {
        let response = self
            .client
            .post(format!("{}/v1/auth/reauthenticate", self.base_url))
            .bearer_auth(&user.token)
            .json(&ReauthRequest {
                password: password.to_string(),
            })
            .send()
            .await
            .map_err(CloudError::from)?;

        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(AuthError::ReauthenticationFailed);
        }
        check(response).await?;
        Ok(())
    }

    async fn delete_identity(&self, user: &AuthUser) -> AuthResult<()> {
        let response = self
            .client
            .delete(format!("{}/v1/auth/account", self.base_url))
            .bearer_auth(&user.token)
            .send()
            .await
            .map_err(CloudError::from)?;
        check(response).await?;
        Ok(())
    }
}
