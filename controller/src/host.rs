use std::{
    io::ErrorKind,
    net::SocketAddr,
    path::PathBuf,
    sync::{Arc, OnceLock},
    time::{Duration, Instant},
};

use anyhow::Context;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect},
    routing::{get, post},
    Json, Router,
};
use tokio::{net::TcpListener, sync::Mutex};
use tracing::{info, warn};

use fan_common::{
    api::{
        apply_ir_update, apply_network_update, build_ir_config_view, build_network_config_view,
        validate_ir_update, validate_network_update, ErrorBody, IrConfigUpdate,
        IrConfigUpdateResponse, IrDiagnostics, NetworkConfigUpdate, NetworkUpdateResponse,
    },
    nec, render_index, FanAction, FanController, FanRoute, IrCodeSet, RuntimeConfig,
};

const SIMULATED_SEND_INTERVAL_MS: u64 = 300;

#[derive(Clone)]
struct AppState {
    controller: Arc<Mutex<FanController>>,
    transmitter: Arc<Mutex<SimulatedTransmitter>>,
    store: AppStore,
}

#[derive(Clone)]
struct AppStore {
    runtime_path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

/// Stands in for the RMT transmitter: frames are encoded and logged, never sent.
struct SimulatedTransmitter {
    codes: IrCodeSet,
    carrier_khz: u32,
    repeat_count: u8,
    last_send_ms: Option<u64>,
    sent_frames: u64,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = AppStore::new();
    let mut runtime = store.load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        RuntimeConfig::default()
    });
    runtime.sanitize();
    info!(
        "runtime config loaded: ir=GPIO{}@{}kHz, repeat={}",
        runtime.ir.tx_pin, runtime.ir.carrier_khz, runtime.ir.repeat_count
    );

    let app = router(AppState::new(&runtime, store));

    let port = std::env::var("FAN_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind fan controller at {addr}"))?;

    info!("fan controller listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

fn router(app_state: AppState) -> Router {
    let mut app = Router::new()
        .route("/", get(handle_index))
        .route("/api/status", get(handle_get_status))
        .route("/api/ir/diagnostics", get(handle_get_ir_diagnostics))
        .route(
            "/api/ir/config",
            get(handle_get_ir_config).put(handle_put_ir_config),
        )
        .route(
            "/api/network",
            get(handle_get_network).put(handle_put_network),
        );

    for route in FanRoute::ALL {
        app = app.route(
            route.path(),
            post(move |State(state): State<AppState>| handle_fan_route(state, route)),
        );
    }

    app.with_state(app_state)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

impl AppState {
    fn new(runtime: &RuntimeConfig, store: AppStore) -> Self {
        Self {
            controller: Arc::new(Mutex::new(FanController::new())),
            transmitter: Arc::new(Mutex::new(SimulatedTransmitter::new(runtime))),
            store,
        }
    }
}

async fn handle_index(State(state): State<AppState>) -> impl IntoResponse {
    let power = state.controller.lock().await.power();
    Html(render_index(power))
}

async fn handle_fan_route(state: AppState, route: FanRoute) -> Redirect {
    let (actions, power) = {
        let mut controller = state.controller.lock().await;
        let actions = controller.dispatch(route, monotonic_ms());
        (actions, controller.power())
    };
    info!("{} -> fan presumed {}", route.path(), power.as_str());

    execute_fan_actions(&state, actions).await;
    Redirect::to("/")
}

async fn execute_fan_actions(state: &AppState, actions: Vec<FanAction>) {
    for action in actions {
        // The guard is held across the sleep so queued requests keep their spacing.
        let mut transmitter = state.transmitter.lock().await;
        let wait = transmitter.rate_limit_wait(monotonic_ms());
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
        transmitter.execute_action(action, monotonic_ms());
    }
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.controller.lock().await.status();
    Json(status)
}

async fn handle_get_ir_diagnostics(State(state): State<AppState>) -> impl IntoResponse {
    let diagnostics = state.transmitter.lock().await.diagnostics();
    Json(diagnostics)
}

async fn handle_get_ir_config(State(state): State<AppState>) -> impl IntoResponse {
    let runtime = state.store.load_runtime_config_or_default().await;
    Json(build_ir_config_view(&runtime.ir))
}

async fn handle_put_ir_config(
    State(state): State<AppState>,
    update: Result<Json<IrConfigUpdate>, JsonRejection>,
) -> impl IntoResponse {
    let Json(update) = match update {
        Ok(update) => update,
        Err(rejection) => return reject_body(rejection),
    };
    if let Err(err) = validate_ir_update(&update) {
        return error_response(StatusCode::BAD_REQUEST, &err.to_string());
    }

    let mut runtime = state.store.load_runtime_config_or_default().await;
    let restart_required = apply_ir_update(&mut runtime.ir, &update);

    if let Err(err) = state.store.save_runtime_config(&runtime).await {
        warn!("failed to persist ir config update: {err:#}");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to persist ir settings",
        );
    }

    let payload = IrConfigUpdateResponse {
        restart_required,
        ir: build_ir_config_view(&runtime.ir),
    };
    Json(payload).into_response()
}

async fn handle_get_network(State(state): State<AppState>) -> impl IntoResponse {
    let runtime = state.store.load_runtime_config_or_default().await;
    Json(build_network_config_view(&runtime.network))
}

async fn handle_put_network(
    State(state): State<AppState>,
    update: Result<Json<NetworkConfigUpdate>, JsonRejection>,
) -> impl IntoResponse {
    let Json(update) = match update {
        Ok(update) => update,
        Err(rejection) => return reject_body(rejection),
    };
    if let Err(err) = validate_network_update(&update) {
        return error_response(StatusCode::BAD_REQUEST, &err.to_string());
    }

    let mut runtime = state.store.load_runtime_config_or_default().await;
    let restart_required = apply_network_update(&mut runtime.network, update);

    if let Err(err) = state.store.save_runtime_config(&runtime).await {
        warn!("failed to persist network config update: {err:#}");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to persist network settings",
        );
    }

    let payload = NetworkUpdateResponse {
        restart_required,
        network: build_network_config_view(&runtime.network),
    };
    Json(payload).into_response()
}

impl SimulatedTransmitter {
    fn new(runtime: &RuntimeConfig) -> Self {
        Self {
            codes: runtime.codes,
            carrier_khz: runtime.ir.carrier_khz,
            repeat_count: runtime.ir.repeat_count,
            last_send_ms: None,
            sent_frames: 0,
        }
    }

    fn rate_limit_wait(&self, now_ms: u64) -> Duration {
        let Some(last) = self.last_send_ms else {
            return Duration::ZERO;
        };
        let elapsed = now_ms.saturating_sub(last);
        Duration::from_millis(SIMULATED_SEND_INTERVAL_MS.saturating_sub(elapsed))
    }

    fn execute_action(&mut self, action: FanAction, now_ms: u64) {
        match action {
            FanAction::Send(code) => {
                let value = self.codes.value(code);
                let raw = nec::encode(value);
                info!(
                    "simulated IR {} frame 0x{value:08X} ({} timings, x{})",
                    code.as_str(),
                    raw.len(),
                    self.repeat_count
                );
            }
        }
        self.last_send_ms = Some(now_ms);
        self.sent_frames = self.sent_frames.saturating_add(1);
    }

    fn diagnostics(&self) -> IrDiagnostics {
        IrDiagnostics {
            enabled: false,
            carrier_khz: self.carrier_khz,
            repeat_count: self.repeat_count,
            repeat_gap_ms: 0,
            min_send_interval_ms: SIMULATED_SEND_INTERVAL_MS,
            last_send_ms: self.last_send_ms,
            sent_frames: self.sent_frames,
            failed_actions: 0,
            last_error: Some("IR transmission is only available in ESP32 builds".to_string()),
        }
    }
}

impl AppStore {
    fn new() -> Self {
        let data_dir = std::env::var("FAN_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.fanctl"));
        Self::at(data_dir)
    }

    fn at(data_dir: PathBuf) -> Self {
        Self {
            runtime_path: Arc::new(data_dir.join("runtime.json")),
            lock: Arc::new(Mutex::new(())),
        }
    }

    async fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(self.runtime_path.as_ref()).await {
            Ok(raw) => Ok(serde_json::from_slice::<RuntimeConfig>(&raw)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
            Err(err) => Err(err.into()),
        }
    }

    async fn load_runtime_config_or_default(&self) -> RuntimeConfig {
        self.load_runtime_config().await.unwrap_or_else(|err| {
            warn!("failed to load runtime config from store: {err:#}");
            RuntimeConfig::default()
        })
    }

    async fn save_runtime_config(&self, runtime: &RuntimeConfig) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let path = self.runtime_path.as_ref().clone();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let payload = serde_json::to_vec_pretty(runtime)?;
        tokio::fs::write(path, payload).await?;
        Ok(())
    }
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

fn reject_body(rejection: JsonRejection) -> axum::response::Response {
    warn!("rejected request body: {}", rejection.body_text());
    error_response(StatusCode::BAD_REQUEST, "Invalid JSON body")
}

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{header, HeaderMap, Method, Request},
    };
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;

    struct TestApp {
        app: Router,
        state: AppState,
        _dir: tempfile::TempDir,
    }

    fn test_app() -> TestApp {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::new(
            &RuntimeConfig::default(),
            AppStore::at(dir.path().to_path_buf()),
        );
        TestApp {
            app: router(state.clone()),
            state,
            _dir: dir,
        }
    }

    async fn send(
        app: &Router,
        method: Method,
        uri: &str,
        body: Option<&str>,
    ) -> (StatusCode, HeaderMap, String) {
        let mut builder = Request::builder().method(method).uri(uri);
        if body.is_some() {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
        }
        let request = builder
            .body(body.map_or_else(Body::empty, |raw| Body::from(raw.to_string())))
            .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, headers, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn root_page_starts_off() {
        let test = test_app();
        let (status, _, body) = send(&test.app, Method::GET, "/", None).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Current State: <b>OFF</b>"));
    }

    #[tokio::test]
    async fn toggle_redirects_home_and_flips_state() {
        let test = test_app();
        let (status, headers, _) = send(&test.app, Method::POST, "/toggle", None).await;

        assert_eq!(status, StatusCode::SEE_OTHER);
        assert_eq!(headers[header::LOCATION], "/");

        let (_, _, body) = send(&test.app, Method::GET, "/", None).await;
        assert!(body.contains("Current State: <b>ON</b>"));
        assert_eq!(test.state.transmitter.lock().await.sent_frames, 1);
    }

    #[tokio::test]
    async fn toggle_ignores_a_junk_body() {
        let test = test_app();
        let (status, headers, _) =
            send(&test.app, Method::POST, "/toggle", Some("{\"speed\": oops")).await;

        assert_eq!(status, StatusCode::SEE_OTHER);
        assert_eq!(headers[header::LOCATION], "/");
        let controller = test.state.controller.lock().await;
        assert!(controller.power().is_on());
        assert_eq!(controller.tracker().toggles(), 1);
        assert_eq!(test.state.transmitter.lock().await.sent_frames, 1);
    }

    #[tokio::test]
    async fn sync_routes_change_state_without_transmitting() {
        let test = test_app();

        let (status, _, _) = send(&test.app, Method::POST, "/sync_on", None).await;
        assert_eq!(status, StatusCode::SEE_OTHER);
        assert!(test.state.controller.lock().await.power().is_on());

        let (status, _, _) = send(&test.app, Method::POST, "/sync_off", None).await;
        assert_eq!(status, StatusCode::SEE_OTHER);
        assert!(!test.state.controller.lock().await.power().is_on());
        assert_eq!(test.state.transmitter.lock().await.sent_frames, 0);
    }

    #[tokio::test]
    async fn power_routes_transmit_and_leave_state() {
        let test = test_app();

        send(&test.app, Method::POST, "/send_add_power", None).await;
        send(&test.app, Method::POST, "/send_lower_power?level=junk", None).await;

        assert!(!test.state.controller.lock().await.power().is_on());
        assert_eq!(test.state.transmitter.lock().await.sent_frames, 2);

        let (_, _, body) = send(&test.app, Method::GET, "/api/status", None).await;
        let status: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(status["power"], "OFF");
        assert_eq!(status["lastCommand"], "send_lower_power");
    }

    #[tokio::test]
    async fn unknown_paths_and_wrong_methods_are_rejected() {
        let test = test_app();

        let (status, _, _) = send(&test.app, Method::POST, "/explode", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _, _) = send(&test.app, Method::GET, "/toggle", None).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

        assert!(!test.state.controller.lock().await.power().is_on());
        assert_eq!(test.state.transmitter.lock().await.sent_frames, 0);
    }

    #[tokio::test]
    async fn ir_config_update_is_validated_and_persisted() {
        let test = test_app();

        let (status, _, body) = send(
            &test.app,
            Method::PUT,
            "/api/ir/config",
            Some(r#"{"txPin":4,"rmtChannel":12,"carrierKHz":38}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("rmtChannel is not supported"));

        let (status, _, body) = send(
            &test.app,
            Method::PUT,
            "/api/ir/config",
            Some(r#"{"txPin":18,"rmtChannel":1,"carrierKHz":38,"repeatCount":2}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let payload: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(payload["restartRequired"], true);
        assert_eq!(payload["ir"]["txPin"], 18);

        let stored = test.state.store.load_runtime_config().await.unwrap();
        assert_eq!(stored.ir.rmt_channel, 1);
        assert_eq!(stored.ir.repeat_count, 2);
    }

    #[tokio::test]
    async fn malformed_config_bodies_get_json_errors() {
        let test = test_app();

        for uri in ["/api/ir/config", "/api/network"] {
            let (status, headers, body) =
                send(&test.app, Method::PUT, uri, Some("{not json")).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(headers[header::CONTENT_TYPE], "application/json");
            let payload: serde_json::Value = serde_json::from_str(&body).unwrap();
            assert_eq!(payload["error"], "Invalid JSON body");
        }

        let stored = test.state.store.load_runtime_config().await.unwrap();
        assert_eq!(stored, RuntimeConfig::default());
    }

    #[tokio::test]
    async fn network_update_never_echoes_password() {
        let test = test_app();

        let (status, _, body) = send(
            &test.app,
            Method::PUT,
            "/api/network",
            Some(r#"{"wifiSsid":"home","wifiPass":"hunter22"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(!body.contains("hunter22"));

        let (_, _, body) = send(&test.app, Method::GET, "/api/network", None).await;
        let view: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(view["wifiSsid"], "home");
        assert_eq!(view["wifiPassSet"], true);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_sends_keep_their_spacing() {
        let test = test_app();
        let started = Instant::now();

        let (a, b, c) = tokio::join!(
            send(&test.app, Method::POST, "/send_add_power", None),
            send(&test.app, Method::POST, "/send_add_power", None),
            send(&test.app, Method::POST, "/send_add_power", None),
        );

        for (status, _, _) in [a, b, c] {
            assert_eq!(status, StatusCode::SEE_OTHER);
        }
        // Millisecond truncation in the clock can shave a tick off each gap.
        let spacing = Duration::from_millis(2 * SIMULATED_SEND_INTERVAL_MS - 10);
        assert!(started.elapsed() >= spacing);
        assert_eq!(test.state.transmitter.lock().await.sent_frames, 3);
    }

    #[test]
    fn rate_limit_waits_out_the_send_interval() {
        let mut transmitter = SimulatedTransmitter::new(&RuntimeConfig::default());
        assert_eq!(transmitter.rate_limit_wait(1_000), Duration::ZERO);

        transmitter.execute_action(FanAction::Send(fan_common::FanCode::Power), 1_000);
        assert_eq!(
            transmitter.rate_limit_wait(1_100),
            Duration::from_millis(200)
        );
        assert_eq!(transmitter.rate_limit_wait(1_400), Duration::ZERO);
    }
}
