//! Gateway server.

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{FromRef, State},
    middleware,
    routing::{get, post},
};
use marquee_core::{AuthConfig, Config, RateLimitConfig};
use serde::{Deserialize, Serialize};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::GatewayError;
use crate::auth::gate::{optional_auth, require_admin, require_auth};
use crate::auth::setup::{AdminBootstrap, bootstrap_admin};
use crate::auth::{
    AuthError, AuthResponse, AuthService, CurrentUser, Identity, MaybeUser, PublicUser,
};
use crate::ratelimit::{RateLimiters, RatePolicy, rate_limit};
use crate::tasks::BackgroundTasks;

/// How long shutdown waits for background tasks.
const TASK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Port to listen on.
    pub port: u16,
    /// Bind address.
    pub bind_address: String,
    /// Data directory for persistent storage.
    pub data_dir: PathBuf,
    /// Per-request deadline.
    pub request_timeout: Duration,
    /// Authentication configuration.
    pub auth: AuthConfig,
    /// Rate-limit policies.
    pub rate_limits: RateLimitConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for GatewayConfig {
    fn from(config: &Config) -> Self {
        Self {
            port: config.server.port,
            bind_address: config.server.bind_address.clone(),
            data_dir: config.server.data_dir(),
            request_timeout: config.server.request_timeout(),
            auth: config.auth.clone(),
            rate_limits: config.rate_limits.clone(),
        }
    }
}

/// State shared by all handlers.
#[derive(Debug, Clone, FromRef)]
pub struct GatewayState {
    /// Authentication service.
    pub auth: Arc<AuthService>,
    /// Per-policy rate limiters.
    pub limiters: RateLimiters,
}

/// Gateway server.
#[derive(Debug)]
pub struct Gateway {
    config: GatewayConfig,
    state: GatewayState,
    bootstrap: Option<AdminBootstrap>,
    tasks: BackgroundTasks,
}

/// Builder for constructing a Gateway with its dependencies.
#[derive(Debug, Default)]
pub struct GatewayBuilder {
    config: GatewayConfig,
    auth: Option<Arc<AuthService>>,
    bootstrap: Option<AdminBootstrap>,
}

impl GatewayBuilder {
    /// Create a new builder with default config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set gateway configuration.
    #[must_use]
    pub fn with_config(mut self, config: GatewayConfig) -> Self {
        self.config = config;
        self
    }

    /// Use an already constructed auth service.
    #[must_use]
    pub fn with_auth_service(mut self, auth: Arc<AuthService>) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Create this admin on startup if the store is empty.
    #[must_use]
    pub fn with_admin_bootstrap(mut self, bootstrap: Option<AdminBootstrap>) -> Self {
        self.bootstrap = bootstrap;
        self
    }

    /// Build the gateway.
    ///
    /// # Errors
    ///
    /// Returns error if auth initialization fails.
    pub fn build(self) -> Result<Gateway, GatewayError> {
        let auth = match self.auth {
            Some(auth) => auth,
            None => {
                let auth_config = self.config.auth.clone().with_env_overrides();
                Arc::new(
                    AuthService::initialize(auth_config, &self.config.data_dir)
                        .map_err(|e| GatewayError::Config(format!("Auth init failed: {e}")))?,
                )
            }
        };

        let limiters = RateLimiters::from_config(&self.config.rate_limits);

        Ok(Gateway {
            config: self.config,
            state: GatewayState { auth, limiters },
            bootstrap: self.bootstrap,
            tasks: BackgroundTasks::new(),
        })
    }
}

impl Gateway {
    /// Create a gateway with admin bootstrap read from the environment.
    ///
    /// # Errors
    ///
    /// Returns error if auth initialization fails.
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        GatewayBuilder::new()
            .with_config(config)
            .with_admin_bootstrap(AdminBootstrap::from_env())
            .build()
    }

    /// Create a builder.
    #[must_use]
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::new()
    }

    /// Gateway configuration.
    #[must_use]
    pub const fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Authentication service.
    #[must_use]
    pub const fn auth(&self) -> &Arc<AuthService> {
        &self.state.auth
    }

    /// Build the HTTP router.
    pub fn router(&self) -> Router {
        let auth = &self.state.auth;
        let limiters = &self.state.limiters;
        let auth_policy = limiters.layer_state(RatePolicy::Auth, auth.clone());
        let api_policy = limiters.layer_state(RatePolicy::Api, auth.clone());

        let credentials = Router::new()
            .route("/register", post(register))
            .route("/login", post(login))
            .route("/refresh", post(refresh))
            .route("/logout", post(logout))
            .route_layer(middleware::from_fn_with_state(auth_policy, rate_limit));

        let account = Router::new()
            .route("/me", get(me))
            .route("/logout-all", post(logout_all))
            .route_layer(middleware::from_fn_with_state(auth.clone(), require_auth))
            .route_layer(middleware::from_fn_with_state(api_policy.clone(), rate_limit));

        let optional = Router::new()
            .route("/session", get(session))
            .route_layer(middleware::from_fn_with_state(auth.clone(), optional_auth))
            .route_layer(middleware::from_fn_with_state(api_policy.clone(), rate_limit));

        let admin = Router::new()
            .route("/users", get(list_users))
            .route("/sessions/purge", post(purge_sessions))
            .route_layer(middleware::from_fn_with_state(auth.clone(), require_admin))
            .route_layer(middleware::from_fn_with_state(api_policy, rate_limit));

        Router::new()
            .route("/health", get(health_handler))
            .nest("/api/auth", credentials.merge(account).merge(optional))
            .nest("/api/admin", admin)
            .layer(TimeoutLayer::new(self.config.request_timeout))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Create the bootstrap admin if configured and the store is empty.
    ///
    /// # Errors
    ///
    /// Returns error if the credentials are invalid or storage fails.
    pub async fn bootstrap(&self) -> Result<(), GatewayError> {
        if let Some(bootstrap) = &self.bootstrap {
            bootstrap_admin(&self.state.auth, bootstrap).await?;
        }
        Ok(())
    }

    fn spawn_background_tasks(&self) {
        self.state.limiters.spawn_sweepers(&self.tasks);

        let auth = self.state.auth.clone();
        let period = auth.config().session_sweep_interval();
        self.tasks.spawn_periodic("session-purge", period, move || {
            let auth = auth.clone();
            async move {
                if let Err(e) = auth.purge_expired_sessions().await {
                    tracing::warn!(error = %e, "Session purge failed");
                }
            }
        });
    }

    /// Serve on `listener` until `shutdown` resolves, then stop background tasks.
    ///
    /// # Errors
    ///
    /// Returns error if the server fails.
    pub async fn serve<F>(
        &self,
        listener: tokio::net::TcpListener,
        shutdown: F,
    ) -> Result<(), GatewayError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if let Err(e) = self.bootstrap().await {
            tracing::warn!(error = %e, "Admin bootstrap failed");
        }

        self.spawn_background_tasks();

        let app = self.router();
        if let Ok(addr) = listener.local_addr() {
            tracing::info!("Gateway API listening on http://{}", addr);
        }

        let result = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await;

        self.tasks.shutdown(TASK_SHUTDOWN_TIMEOUT).await;
        tracing::info!("Gateway stopped");

        result.map_err(|e| GatewayError::Server(e.to_string()))
    }

    /// Run the gateway server until Ctrl-C.
    ///
    /// # Errors
    ///
    /// Returns error if the address is invalid or the server fails.
    pub async fn run(&self) -> Result<(), GatewayError> {
        let addr: SocketAddr = format!("{}:{}", self.config.bind_address, self.config.port)
            .parse()
            .map_err(|e| GatewayError::Config(format!("Invalid address: {e}")))?;

        let listener = tokio::net::TcpListener::bind(addr).await?;
        self.serve(listener, shutdown_signal()).await
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}

async fn health_handler() -> &'static str {
    "OK"
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    username: String,
    email: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct RefreshRequest {
    refresh_token: String,
}

#[derive(Debug, Serialize)]
struct SessionStatus {
    authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<Identity>,
}

async fn register(
    State(auth): State<Arc<AuthService>>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<AuthResponse>, AuthError> {
    auth.register(&req.username, &req.email, &req.password)
        .await
        .map(Json)
}

async fn login(
    State(auth): State<Arc<AuthService>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AuthError> {
    auth.login(&req.username, &req.password).await.map(Json)
}

async fn refresh(
    State(auth): State<Arc<AuthService>>,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<AuthResponse>, AuthError> {
    auth.refresh(&req.refresh_token).await.map(Json)
}

async fn logout(
    State(auth): State<Arc<AuthService>>,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<serde_json::Value>, AuthError> {
    auth.logout(&req.refresh_token).await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

async fn me(
    State(auth): State<Arc<AuthService>>,
    CurrentUser(identity): CurrentUser,
) -> Result<Json<PublicUser>, AuthError> {
    auth.current_user(identity.user_id).await.map(Json)
}

async fn logout_all(
    State(auth): State<Arc<AuthService>>,
    CurrentUser(identity): CurrentUser,
) -> Result<Json<serde_json::Value>, AuthError> {
    let closed = auth.logout_all(identity.user_id).await?;
    Ok(Json(serde_json::json!({ "closed": closed })))
}

async fn session(MaybeUser(identity): MaybeUser) -> Json<SessionStatus> {
    Json(SessionStatus {
        authenticated: identity.is_some(),
        user: identity,
    })
}

async fn list_users(
    State(auth): State<Arc<AuthService>>,
) -> Result<Json<Vec<PublicUser>>, AuthError> {
    auth.list_users().await.map(Json)
}

async fn purge_sessions(
    State(auth): State<Arc<AuthService>>,
) -> Result<Json<serde_json::Value>, AuthError> {
    let removed = auth.purge_expired_sessions().await?;
    Ok(Json(serde_json::json!({ "removed": removed })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Argon2Hasher, SledCredentialStore, TokenCodec, UserRole};
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use marquee_core::RateLimitPolicy;
    use serde_json::Value;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tower::ServiceExt;

    fn test_gateway(config: GatewayConfig) -> (TempDir, Gateway) {
        let dir = TempDir::new().unwrap();
        let store = SledCredentialStore::open(dir.path()).unwrap();
        let codec = TokenCodec::new(&TokenCodec::generate_secret(), config.auth.access_token_ttl());
        let hasher = Argon2Hasher::with_params(64, 1, 1).unwrap();
        let auth = AuthService::new(
            config.auth.clone(),
            codec,
            Arc::new(store),
            Arc::new(hasher),
        );

        let gateway = Gateway::builder()
            .with_config(GatewayConfig {
                data_dir: dir.path().to_path_buf(),
                ..config
            })
            .with_auth_service(Arc::new(auth))
            .build()
            .unwrap();
        (dir, gateway)
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        bearer: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    fn creds(username: &str, password: &str) -> Value {
        serde_json::json!({ "username": username, "password": password })
    }

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();
        assert_eq!(config.port, 8096);
        assert_eq!(config.bind_address, "127.0.0.1");
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_health() {
        let (_dir, gateway) = test_gateway(GatewayConfig::default());
        let response = gateway
            .router()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_full_auth_flow() {
        let (_dir, gateway) = test_gateway(GatewayConfig::default());
        let app = gateway.router();

        // First account becomes admin, second is a regular user
        let (status, root) = send(
            &app,
            "POST",
            "/api/auth/register",
            None,
            Some(serde_json::json!({ "username": "root", "email": "root@x.com", "password": "rootpass1" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(root["user"]["role"], "admin");

        let (status, alice) = send(
            &app,
            "POST",
            "/api/auth/register",
            None,
            Some(serde_json::json!({ "username": "alice", "email": "a@x.com", "password": "pw123456" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(alice["user"]["role"], "user");
        assert!(alice["user"].get("password_hash").is_none());

        let (status, login) = send(&app, "POST", "/api/auth/login", None, Some(creds("alice", "pw123456"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(login["user"]["id"], alice["user"]["id"]);
        let access = login["access_token"].as_str().unwrap().to_string();

        let (status, body) = send(&app, "POST", "/api/auth/login", None, Some(creds("alice", "nope"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "UNAUTHORIZED");

        let (status, me) = send(&app, "GET", "/api/auth/me", Some(access.as_str()), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(me["username"], "alice");

        let (status, body) = send(&app, "GET", "/api/admin/users", Some(access.as_str()), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "FORBIDDEN");

        let admin_access = root["access_token"].as_str().unwrap();
        let (status, users) = send(&app, "GET", "/api/admin/users", Some(admin_access), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(users.as_array().unwrap().len(), 2);

        let (status, _) = send(&app, "GET", "/api/admin/users", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_refresh_and_logout() {
        let (_dir, gateway) = test_gateway(GatewayConfig::default());
        let app = gateway.router();

        let (_, reg) = send(
            &app,
            "POST",
            "/api/auth/register",
            None,
            Some(serde_json::json!({ "username": "alice", "email": "a@x.com", "password": "pw123456" })),
        )
        .await;
        let r1 = reg["refresh_token"].clone();

        let (status, rotated) = send(&app, "POST", "/api/auth/refresh", None, Some(serde_json::json!({ "refresh_token": r1 }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_ne!(rotated["access_token"], reg["access_token"]);

        let (status, body) = send(&app, "POST", "/api/auth/refresh", None, Some(serde_json::json!({ "refresh_token": r1 }))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "UNAUTHORIZED");

        let (status, _) = send(&app, "POST", "/api/auth/logout", None, Some(serde_json::json!({ "refresh_token": "unknown" }))).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_duplicate_and_invalid_registration() {
        let (_dir, gateway) = test_gateway(GatewayConfig::default());
        let app = gateway.router();
        let body = serde_json::json!({ "username": "alice", "email": "a@x.com", "password": "pw123456" });

        assert_eq!(send(&app, "POST", "/api/auth/register", None, Some(body.clone())).await.0, StatusCode::OK);

        let (status, err) = send(&app, "POST", "/api/auth/register", None, Some(body)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(err["code"], "CONFLICT");

        let (status, err) = send(
            &app,
            "POST",
            "/api/auth/register",
            None,
            Some(serde_json::json!({ "username": "bob", "email": "b@x.com", "password": "short" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(err["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_optional_session() {
        let (_dir, gateway) = test_gateway(GatewayConfig::default());
        let app = gateway.router();
        let (token, _) = gateway.auth().codec().sign(3, "carol", UserRole::User).unwrap();

        let (_, anon) = send(&app, "GET", "/api/auth/session", None, None).await;
        assert_eq!(anon["authenticated"], false);

        let (status, bad) = send(&app, "GET", "/api/auth/session", Some("garbage"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(bad["authenticated"], false);

        let (_, known) = send(&app, "GET", "/api/auth/session", Some(token.as_str()), None).await;
        assert_eq!(known["authenticated"], true);
        assert_eq!(known["user"]["username"], "carol");
    }

    #[tokio::test]
    async fn test_auth_endpoints_rate_limited() {
        let config = GatewayConfig {
            rate_limits: RateLimitConfig {
                auth: RateLimitPolicy::new(3, 60),
                ..RateLimitConfig::default()
            },
            ..GatewayConfig::default()
        };
        let (_dir, gateway) = test_gateway(config);
        let app = gateway.router();

        for _ in 0..3 {
            let (status, _) = send(&app, "POST", "/api/auth/login", None, Some(creds("ghost", "pw123456"))).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
        }

        let (status, body) = send(&app, "POST", "/api/auth/login", None, Some(creds("ghost", "pw123456"))).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body, serde_json::json!({ "error": "rate_limit_exceeded" }));

        // Other policies are independent
        let (status, _) = send(&app, "GET", "/api/auth/session", None, None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_bootstrap_admin() {
        let (_dir, gateway) = test_gateway(GatewayConfig::default());
        let gateway = Gateway {
            bootstrap: Some(AdminBootstrap {
                username: "root".to_string(),
                email: "root@x.com".to_string(),
                password: "rootpass1".to_string(),
            }),
            ..gateway
        };

        gateway.bootstrap().await.unwrap();
        gateway.bootstrap().await.unwrap();

        let users = gateway.auth().list_users().await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].role, UserRole::Admin);
    }

    #[tokio::test]
    async fn test_serve_and_graceful_shutdown() {
        let (_dir, gateway) = test_gateway(GatewayConfig::default());
        let gateway = Arc::new(gateway);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let server = {
            let gateway = gateway.clone();
            tokio::spawn(async move {
                gateway
                    .serve(listener, async {
                        let _ = stop_rx.await;
                    })
                    .await
            })
        };

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200"));

        assert_eq!(gateway.tasks.active(), 4);
        stop_tx.send(()).unwrap();
        server.await.unwrap().unwrap();
        assert_eq!(gateway.tasks.active(), 0);
    }
}
