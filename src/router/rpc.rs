//! JSON-RPC 2.0 entry point.
//!
//! Every answer is sent with HTTP 200; failures travel in the `error`
//! member. Credential failures all share one code and one message.

use std::net::SocketAddr;

use axum::Json;
use axum::extract::connect_info::ConnectInfo;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::header;
use axum::http::request::Parts;
use base64ct::{Base64, Encoding};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

use crate::AppState;
use crate::config;
use crate::error::{ServerError, code};
use crate::provider::{BrowserIdentity, IdentitySource};
use crate::user::UserLoginDto;

const JSONRPC_VERSION: &str = "2.0";
const MAX_BODY_SIZE: usize = 64 * 1024;

#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub id: Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    #[serde(default)]
    pub id: Value,
}

impl RpcResponse {
    fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            result: Some(result),
            error: None,
            id,
        }
    }

    fn failure(id: Value, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            result: None,
            error: Some(error),
            id,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

impl RpcError {
    fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<ServerError> for RpcError {
    fn from(err: ServerError) -> Self {
        if err.is_internal() {
            tracing::error!(error = %err, "rpc call failed");
        }

        Self::new(err.rpc_code(), err.public_message())
    }
}

/// Parameters of the `login` method.
#[derive(Deserialize, Validate)]
pub struct LoginParams {
    #[validate(length(min = 1, max = 255))]
    pub login: String,
    #[validate(length(min = 1, max = 4096))]
    pub password: String,
}

/// Public data of an authenticated user.
#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResult {
    pub id: i64,
    pub login: String,
}

/// Handle one JSON-RPC call.
pub async fn handler(
    State(state): State<AppState>,
    request: Request,
) -> Json<RpcResponse> {
    let (mut parts, body) = request.into_parts();
    let peer = ConnectInfo::<SocketAddr>::from_request_parts(&mut parts, &state)
        .await
        .ok()
        .map(|ConnectInfo(addr)| addr);

    let value = match axum::body::to_bytes(body, MAX_BODY_SIZE)
        .await
        .ok()
        .and_then(|bytes| serde_json::from_slice::<Value>(&bytes).ok())
    {
        Some(value) => value,
        None => {
            return Json(RpcResponse::failure(
                Value::Null,
                RpcError::new(code::PARSE_ERROR, "Parse error"),
            ));
        },
    };

    let call = match serde_json::from_value::<RpcRequest>(value) {
        Ok(call) if call.jsonrpc == JSONRPC_VERSION => call,
        Ok(call) => {
            return Json(RpcResponse::failure(
                call.id,
                RpcError::new(code::INVALID_REQUEST, "Invalid Request"),
            ));
        },
        Err(_) => {
            return Json(RpcResponse::failure(
                Value::Null,
                RpcError::new(code::INVALID_REQUEST, "Invalid Request"),
            ));
        },
    };

    let result = match call.method.as_str() {
        "login" => login(&state, &parts, peer, call.params).await,
        method => {
            tracing::debug!(%method, "unknown rpc method");
            Err(RpcError::new(code::METHOD_NOT_FOUND, "Method not found"))
        },
    };

    Json(match result {
        Ok(value) => RpcResponse::success(call.id, value),
        Err(err) => RpcResponse::failure(call.id, err),
    })
}

async fn login(
    state: &AppState,
    parts: &Parts,
    peer: Option<SocketAddr>,
    params: Value,
) -> Result<Value, RpcError> {
    let params: LoginParams = serde_json::from_value(params)
        .map_err(|_| RpcError::new(code::INVALID_PARAMS, "Invalid params"))?;
    params.validate().map_err(ServerError::from)?;

    let address = client_address(parts, peer, state.config.trust_forwarded)
        .ok_or_else(|| {
            RpcError::new(code::INVALID_REQUEST, "Unknown client address")
        })?;
    let identity = server_identity(parts, state.config.browser.as_ref());

    let auth = state.auth_service(identity)?;
    let credentials = UserLoginDto::new(params.login, params.password);
    let user = state
        .login_service()
        .login(&auth, &credentials, &address)
        .await?;

    serde_json::to_value(LoginResult {
        id: user.id,
        login: user.login,
    })
    .map_err(|err| {
        RpcError::from(ServerError::Internal {
            details: "cannot serialize login result".into(),
            source: Some(Box::new(err)),
        })
    })
}

/// Address of the client, taken from `X-Forwarded-For` only when the
/// deployment sits behind a trusted proxy.
fn client_address(
    parts: &Parts,
    peer: Option<SocketAddr>,
    trust_forwarded: bool,
) -> Option<String> {
    if trust_forwarded {
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|value| !value.is_empty());

        if let Some(address) = forwarded {
            return Some(address.to_owned());
        }
    }

    peer.map(|addr| addr.ip().to_string())
}

/// Identity the web server already authenticated, if any.
///
/// The configured proxy header wins over HTTP Basic credentials, which are
/// only read when `browser.basic_auth` is set.
fn server_identity(
    parts: &Parts,
    browser: Option<&config::Browser>,
) -> Option<BrowserIdentity> {
    let browser = browser?;

    if let Some(name) = &browser.header {
        let login = parts
            .headers
            .get(name.as_str())
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty());

        if let Some(login) = login {
            return Some(BrowserIdentity {
                login: login.to_owned(),
                source: IdentitySource::ProxyHeader,
            });
        }
    }

    if !browser.basic_auth {
        return None;
    }

    let value = parts.headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = Base64::decode_vec(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (login, _) = decoded.split_once(':')?;

    (!login.is_empty()).then(|| BrowserIdentity {
        login: login.to_owned(),
        source: IdentitySource::BasicAuth,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::Router;
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::{Method, StatusCode};
    use http_body_util::BodyExt;

    use super::*;
    use crate::config::Configuration;
    use crate::crypto;
    use crate::testing::{MemoryTrackStore, MemoryUserStore};
    use crate::track::{TrackRequest, TrackService};
    use crate::user::UserDataDto;

    struct Harness {
        app: Router,
        tracks: Arc<MemoryTrackStore>,
    }

    fn harness(config: Configuration) -> Harness {
        let hash = Arc::new(crypto::test_hash());
        let users = Arc::new(MemoryUserStore::with_hash(Arc::clone(&hash)));
        users.insert(UserDataDto {
            id: 1,
            login: "alice".into(),
            pass: hash.hash_key("hunter22").unwrap(),
            ..Default::default()
        });
        let tracks = Arc::new(MemoryTrackStore::default());

        let state = AppState {
            config: Arc::new(config),
            users: users.clone(),
            passwords: users,
            tracks: tracks.clone(),
            ldap: None,
            hash,
            metrics: None,
        };

        Harness {
            app: crate::app(state).layer(MockConnectInfo(SocketAddr::from((
                [127, 0, 0, 1],
                4000,
            )))),
            tracks,
        }
    }

    fn login_call(login: &str, password: &str) -> String {
        serde_json::json!({
            "jsonrpc": "2.0",
            "method": "login",
            "params": { "login": login, "password": password },
            "id": 7,
        })
        .to_string()
    }

    async fn call(
        app: Router,
        headers: &[(&str, &str)],
        body: String,
    ) -> RpcResponse {
        let response =
            crate::make_request(app, Method::POST, "/rpc", headers, body).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_login_success() {
        let harness = harness(Configuration::default());

        let response =
            call(harness.app, &[], login_call("alice", "hunter22")).await;
        assert!(response.error.is_none());
        assert_eq!(response.id, serde_json::json!(7));

        let result: LoginResult =
            serde_json::from_value(response.result.unwrap()).unwrap();
        assert_eq!(result.id, 1);
        assert_eq!(result.login, "alice");
        assert!(harness.tracks.tracks().is_empty());
    }

    #[tokio::test]
    async fn test_wrong_password_and_unknown_user_look_alike() {
        let harness = harness(Configuration::default());

        let wrong =
            call(harness.app.clone(), &[], login_call("alice", "nope")).await;
        let unknown =
            call(harness.app, &[], login_call("mallory", "hunter22")).await;

        for response in [wrong, unknown] {
            let error = response.error.unwrap();
            assert_eq!(error.code, code::AUTH_FAILURE);
            assert_eq!(error.message, crate::error::INVALID_CREDENTIALS);
        }
        assert_eq!(harness.tracks.tracks().len(), 2);
    }

    #[tokio::test]
    async fn test_lockout() {
        let harness = harness(Configuration::default());
        for _ in 0..10 {
            harness
                .tracks
                .add(&TrackRequest::now("login", "127.0.0.1").unwrap())
                .await
                .unwrap();
        }

        let response =
            call(harness.app, &[], login_call("alice", "hunter22")).await;
        assert_eq!(response.error.unwrap().code, code::LOCKOUT);
        assert_eq!(harness.tracks.tracks().len(), 10);
    }

    #[tokio::test]
    async fn test_forwarded_address() {
        let config = Configuration {
            trust_forwarded: true,
            ..Default::default()
        };
        let harness = harness(config);

        call(
            harness.app,
            &[("X-Forwarded-For", "203.0.113.9, 10.0.0.1")],
            login_call("alice", "nope"),
        )
        .await;

        let tracks = harness.tracks.tracks();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].ipv4(), Some([203, 0, 113, 9].as_slice()));
    }

    #[tokio::test]
    async fn test_proxy_identity_grants() {
        let config = Configuration {
            browser: Some(config::Browser {
                header: Some("X-Remote-User".into()),
                authoritative: true,
                ..Default::default()
            }),
            ..Default::default()
        };
        let harness = harness(config);

        let response = call(
            harness.app,
            &[("X-Remote-User", "alice")],
            login_call("alice", "whatever"),
        )
        .await;

        let result: LoginResult =
            serde_json::from_value(response.result.unwrap()).unwrap();
        assert_eq!(result.id, 1);
    }

    fn basic_auth_config(basic_auth: bool) -> Configuration {
        Configuration {
            browser: Some(config::Browser {
                authoritative: true,
                basic_auth,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn basic(credentials: &[u8]) -> String {
        format!("Basic {}", Base64::encode_string(credentials))
    }

    #[tokio::test]
    async fn test_basic_auth_identity_must_match() {
        let harness = harness(basic_auth_config(true));
        let credentials = basic(b"bob:pw");

        let response = call(
            harness.app.clone(),
            &[("Authorization", credentials.as_str())],
            login_call("alice", "nope"),
        )
        .await;
        assert_eq!(response.error.unwrap().code, code::AUTH_FAILURE);

        let credentials = basic(b"alice:pw");
        let response = call(
            harness.app,
            &[("Authorization", credentials.as_str())],
            login_call("alice", "nope"),
        )
        .await;
        assert_eq!(response.result.unwrap()["id"], 1);
    }

    #[tokio::test]
    async fn test_basic_auth_ignored_unless_enabled() {
        let harness = harness(basic_auth_config(false));
        let credentials = basic(b"alice:whatever");

        let response = call(
            harness.app,
            &[("Authorization", credentials.as_str())],
            login_call("alice", "nope"),
        )
        .await;

        let error = response.error.unwrap();
        assert_eq!(error.code, code::AUTH_FAILURE);
        assert_eq!(error.message, crate::error::INVALID_CREDENTIALS);
        assert_eq!(harness.tracks.tracks().len(), 1);
    }

    #[tokio::test]
    async fn test_protocol_errors() {
        let harness = harness(Configuration::default());

        let response =
            call(harness.app.clone(), &[], "{not json".to_owned()).await;
        assert_eq!(response.error.unwrap().code, code::PARSE_ERROR);
        assert_eq!(response.id, Value::Null);

        let response = call(
            harness.app.clone(),
            &[],
            r#"{"jsonrpc":"1.0","method":"login","id":1}"#.to_owned(),
        )
        .await;
        assert_eq!(response.error.unwrap().code, code::INVALID_REQUEST);

        let response = call(
            harness.app.clone(),
            &[],
            r#"{"jsonrpc":"2.0","method":"logout","id":2}"#.to_owned(),
        )
        .await;
        assert_eq!(response.error.unwrap().code, code::METHOD_NOT_FOUND);

        let response =
            call(harness.app, &[], login_call("", "hunter22")).await;
        assert_eq!(response.error.unwrap().code, code::INVALID_PARAMS);
        assert!(harness.tracks.tracks().is_empty());
    }

    #[tokio::test]
    async fn test_metrics_without_recorder() {
        let harness = harness(Configuration::default());

        let response = crate::make_request(
            harness.app,
            Method::GET,
            "/metrics",
            &[],
            String::new(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_status() {
        let config = Configuration {
            name: "vault".into(),
            ..Default::default()
        };
        let harness = harness(config);

        let response = crate::make_request(
            harness.app,
            Method::GET,
            "/status.json",
            &[],
            String::new(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let status: crate::router::status::Status =
            serde_json::from_slice(&body).unwrap();
        assert_eq!(status.name, "vault");
    }
}
