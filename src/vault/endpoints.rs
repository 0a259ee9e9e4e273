use crate::error::RotorError;
use crate::vault::DatabaseCredentials;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;
use url::Url;

const VAULT_TOKEN_HEADER: &str = "X-Vault-Token";

/// Stateless Vault HTTP endpoints.
pub(super) struct VaultEndpoints;

impl VaultEndpoints {
    /// `POST /v1/auth/{mount}/login` with AppRole credentials.
    pub(super) async fn approle_login(
        http: &reqwest::Client,
        base: &Url,
        mount: &str,
        role_id: &str,
        secret_id: &str,
    ) -> Result<AuthInfo, RotorError> {
        let url = base.join(&format!("v1/auth/{}/login", mount.trim_matches('/')))?;
        let resp = http
            .post(url)
            .json(&json!({ "role_id": role_id, "secret_id": secret_id }))
            .send()
            .await?;
        let body: SecretResponse<serde_json::Value> = read_json(resp).await?;
        body.auth.ok_or(RotorError::MalformedVaultResponse("auth"))
    }

    /// `GET /v1/{path}` on a database secrets engine role.
    pub(super) async fn read_database_credentials(
        http: &reqwest::Client,
        base: &Url,
        token: &str,
        path: &str,
    ) -> Result<SecretResponse<DatabaseCredentials>, RotorError> {
        let url = base.join(&format!("v1/{}", path.trim_start_matches('/')))?;
        let resp = http
            .get(url)
            .header(VAULT_TOKEN_HEADER, token)
            .send()
            .await?;
        read_json(resp).await
    }

    /// `PUT /v1/auth/token/renew-self`; returns the new token TTL in seconds.
    pub(super) async fn renew_self(
        http: &reqwest::Client,
        base: &Url,
        token: &str,
        increment_secs: u64,
    ) -> Result<u64, RotorError> {
        let url = base.join("v1/auth/token/renew-self")?;
        let resp = http
            .put(url)
            .header(VAULT_TOKEN_HEADER, token)
            .json(&RenewRequest {
                lease_id: None,
                increment: increment_secs,
            })
            .send()
            .await?;
        let body: SecretResponse<serde_json::Value> = read_json(resp).await?;
        let auth = body.auth.ok_or(RotorError::MalformedVaultResponse("auth"))?;
        Ok(auth.lease_duration)
    }

    /// `PUT /v1/sys/leases/renew`; returns the new lease TTL in seconds.
    pub(super) async fn renew_lease(
        http: &reqwest::Client,
        base: &Url,
        token: &str,
        lease_id: &str,
        increment_secs: u64,
    ) -> Result<u64, RotorError> {
        let url = base.join("v1/sys/leases/renew")?;
        let resp = http
            .put(url)
            .header(VAULT_TOKEN_HEADER, token)
            .json(&RenewRequest {
                lease_id: Some(lease_id),
                increment: increment_secs,
            })
            .send()
            .await?;
        let body: SecretResponse<serde_json::Value> = read_json(resp).await?;
        Ok(body.lease_duration)
    }
}

async fn read_json<T>(resp: reqwest::Response) -> Result<T, RotorError>
where
    T: for<'de> Deserialize<'de>,
{
    let status = resp.status();
    if !status.is_success() {
        let errors = resp
            .json::<VaultErrors>()
            .await
            .map(|e| e.errors)
            .unwrap_or_default();
        debug!(%status, ?errors, "vault request rejected");
        return Err(RotorError::VaultStatus { status, errors });
    }
    let bytes = resp.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[derive(Debug, Serialize)]
struct RenewRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    lease_id: Option<&'a str>,
    increment: u64,
}

#[derive(Debug, Deserialize)]
struct VaultErrors {
    #[serde(default)]
    errors: Vec<String>,
}

/// Common envelope of Vault secret responses.
#[derive(Deserialize)]
pub(super) struct SecretResponse<T> {
    #[serde(default)]
    pub lease_id: String,
    #[serde(default)]
    pub lease_duration: u64,
    #[serde(default)]
    pub renewable: bool,
    pub data: Option<T>,
    pub auth: Option<AuthInfo>,
}

#[derive(Deserialize)]
pub(super) struct AuthInfo {
    pub client_token: String,
    pub lease_duration: u64,
    #[serde(default)]
    pub renewable: bool,
}
