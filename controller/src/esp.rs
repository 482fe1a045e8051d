use std::{
    sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError},
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use embedded_svc::{
    http::{Headers, Method},
    io::{Read, Write},
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{gpio::AnyOutputPin, prelude::Peripherals, rmt::RMT},
    http::server::{Configuration as HttpConfiguration, EspHttpConnection, EspHttpServer, Request},
    log::EspLogger,
    nvs::{EspDefaultNvsPartition, EspNvs},
};
use log::{info, warn};
use serde::Serialize;

use fan_common::{
    api::{
        apply_ir_update, apply_network_update, build_ir_config_view, build_network_config_view,
        validate_ir_update, validate_network_update, IrConfigUpdate, IrConfigUpdateResponse,
        NetworkConfigUpdate, NetworkUpdateResponse,
    },
    render_index, render_setup_page, FanAction, FanController, FanRoute, IrHardwareConfig,
    RetryPolicy, RuntimeConfig,
};

use crate::{
    ir::IrTransmitter,
    wifi::{self, Link},
};

const NVS_NAMESPACE: &str = "fanctl";
const NVS_RUNTIME_KEY: &str = "runtime_json";
const MAX_HTTP_BODY: usize = 2048;

type HttpRequest<'a, 'b> = Request<&'a mut EspHttpConnection<'b>>;

#[derive(Clone)]
struct SharedState {
    controller: Arc<Mutex<FanController>>,
    ir_sender: Arc<Mutex<IrTransmitter>>,
}

#[derive(Clone)]
struct NvsStore {
    partition: EspDefaultNvsPartition,
    lock: Arc<Mutex<()>>,
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let nvs_store = NvsStore {
        partition: nvs_partition.clone(),
        lock: Arc::new(Mutex::new(())),
    };

    let mut runtime = nvs_store.load_runtime_config().unwrap_or_else(|err| {
        warn!("failed to load runtime config from NVS: {err:#}");
        RuntimeConfig::default()
    });
    runtime.sanitize();
    ensure_wifi_defaults(&mut runtime);

    info!(
        "NVS config loaded: ssid=`{}`, static_ip={}, ir=GPIO{}@{}kHz",
        runtime.network.wifi_ssid,
        runtime.network.use_static_ip,
        runtime.ir.tx_pin,
        runtime.ir.carrier_khz,
    );

    let Peripherals { modem, rmt, .. } = Peripherals::take()?;
    let ir_sender = match init_ir_transmitter(rmt, &runtime) {
        Ok(transmitter) => {
            info!(
                "IR transmitter initialized on RMT channel{} / GPIO{} @ {}kHz",
                runtime.ir.rmt_channel, runtime.ir.tx_pin, runtime.ir.carrier_khz
            );
            transmitter
        }
        Err(err) => {
            warn!("failed to initialize IR transmitter, running disabled: {err:#}");
            IrTransmitter::disabled(&runtime.ir, runtime.codes)
        }
    };

    let link = wifi::bring_up(
        modem,
        sys_loop,
        nvs_partition,
        &runtime.network,
        RetryPolicy::default(),
    )
    .context("wifi startup failed")?;
    let station = match link {
        Link::Station(station) => station,
        Link::Setup(access_point) => {
            let server = create_setup_http_server(nvs_store)?;

            let _access_point = access_point;
            let _server = server;
            loop {
                thread::sleep(Duration::from_secs(60));
            }
        }
    };

    let shared_state = SharedState {
        controller: Arc::new(Mutex::new(FanController::new())),
        ir_sender: Arc::new(Mutex::new(ir_sender)),
    };

    let server = create_http_server(shared_state, nvs_store)?;
    wifi::spawn_link_supervisor()?;

    // Keep services alive for the program lifetime.
    let _station = station;
    let _server = server;

    loop {
        thread::sleep(Duration::from_secs(60));
    }
}

fn ensure_wifi_defaults(runtime: &mut RuntimeConfig) {
    if runtime.network.wifi_ssid.is_empty() {
        if let Some(ssid) = option_env!("WIFI_SSID") {
            runtime.network.wifi_ssid = ssid.to_string();
        }
    }

    if runtime.network.wifi_pass.is_empty() {
        if let Some(pass) = option_env!("WIFI_PASS") {
            runtime.network.wifi_pass = pass.to_string();
        }
    }
}

fn create_http_server(
    state: SharedState,
    nvs_store: NvsStore,
) -> anyhow::Result<EspHttpServer<'static>> {
    let conf = HttpConfiguration {
        stack_size: 12 * 1024,
        ..Default::default()
    };

    let mut server = EspHttpServer::new(&conf)?;

    {
        let state = state.clone();
        server.fn_handler::<anyhow::Error, _>("/", Method::Get, move |req| {
            let power = lock(&state.controller).power();
            req.into_response(200, Some("OK"), &[("Content-Type", "text/html; charset=utf-8")])?
                .write_all(render_index(power).as_bytes())?;
            Ok(())
        })?;
    }

    for route in FanRoute::ALL {
        let state = state.clone();
        server.fn_handler::<anyhow::Error, _>(route.path(), Method::Post, move |req| {
            dispatch_route(&state, route);
            write_redirect(req)
        })?;
    }

    {
        let state = state.clone();
        server.fn_handler("/api/status", Method::Get, move |req| {
            let status = lock(&state.controller).status();
            write_json(req, &status)
        })?;
    }

    {
        let state = state.clone();
        server.fn_handler("/api/ir/diagnostics", Method::Get, move |req| {
            let diagnostics = lock(&state.ir_sender).diagnostics();
            write_json(req, &diagnostics)
        })?;
    }

    {
        let nvs_store = nvs_store.clone();
        server.fn_handler("/api/ir/config", Method::Get, move |req| {
            let runtime = nvs_store.load_runtime_config().unwrap_or_default();
            write_json(req, &build_ir_config_view(&runtime.ir))
        })?;
    }

    {
        let nvs_store = nvs_store.clone();
        server.fn_handler::<anyhow::Error, _>("/api/ir/config", Method::Put, move |mut req| {
            let body = read_request_body(&mut req)?;
            let Ok(update) = serde_json::from_slice::<IrConfigUpdate>(&body) else {
                return write_error(req, 400, "Invalid ir config payload");
            };

            if let Err(err) = validate_ir_update(&update) {
                return write_error(req, 400, &err.to_string());
            }

            let mut runtime = nvs_store.load_runtime_config().unwrap_or_default();
            let restart_required = apply_ir_update(&mut runtime.ir, &update);
            nvs_store.save_runtime_config(&runtime)?;

            let payload = IrConfigUpdateResponse {
                restart_required,
                ir: build_ir_config_view(&runtime.ir),
            };
            write_json(req, &payload)
        })?;
    }

    register_network_handlers(&mut server, nvs_store, false)?;
    register_restart_handler(&mut server)?;

    Ok(server)
}

fn create_setup_http_server(nvs_store: NvsStore) -> anyhow::Result<EspHttpServer<'static>> {
    let conf = HttpConfiguration {
        stack_size: 12 * 1024,
        ..Default::default()
    };

    let mut server = EspHttpServer::new(&conf)?;

    server.fn_handler::<anyhow::Error, _>("/", Method::Get, move |req| {
        req.into_ok_response()?
            .write_all(render_setup_page().as_bytes())?;
        Ok(())
    })?;

    register_network_handlers(&mut server, nvs_store, true)?;
    register_restart_handler(&mut server)?;

    Ok(server)
}

fn register_network_handlers(
    server: &mut EspHttpServer<'static>,
    nvs_store: NvsStore,
    restart_on_save: bool,
) -> anyhow::Result<()> {
    {
        let nvs_store = nvs_store.clone();
        server.fn_handler("/api/network", Method::Get, move |req| {
            let runtime = nvs_store.load_runtime_config().unwrap_or_default();
            write_json(req, &build_network_config_view(&runtime.network))
        })?;
    }

    server.fn_handler::<anyhow::Error, _>("/api/network", Method::Put, move |mut req| {
        let body = read_request_body(&mut req)?;
        let Ok(update) = serde_json::from_slice::<NetworkConfigUpdate>(&body) else {
            return write_error(req, 400, "Invalid network payload");
        };

        if let Err(err) = validate_network_update(&update) {
            return write_error(req, 400, &err.to_string());
        }

        let mut runtime = nvs_store.load_runtime_config().unwrap_or_default();
        let restart_required = apply_network_update(&mut runtime.network, update);
        nvs_store.save_runtime_config(&runtime)?;

        if restart_on_save {
            schedule_restart(Duration::from_secs(3))?;
        }

        let payload = NetworkUpdateResponse {
            restart_required,
            network: build_network_config_view(&runtime.network),
        };
        write_json(req, &payload)
    })?;

    Ok(())
}

fn register_restart_handler(server: &mut EspHttpServer<'static>) -> anyhow::Result<()> {
    server.fn_handler::<anyhow::Error, _>("/api/restart", Method::Post, move |req| {
        schedule_restart(Duration::from_millis(500))?;
        write_json(req, &serde_json::json!({ "restarting": true }))
    })?;
    Ok(())
}

fn schedule_restart(delay: Duration) -> anyhow::Result<()> {
    thread::Builder::new()
        .name("restart-request".into())
        .spawn(move || {
            thread::sleep(delay);
            unsafe { esp_idf_svc::sys::esp_restart() };
        })
        .context("failed to spawn restart thread")?;
    Ok(())
}

fn dispatch_route(state: &SharedState, route: FanRoute) {
    let (actions, power) = {
        let mut controller = lock(&state.controller);
        let actions = controller.dispatch(route, monotonic_ms());
        (actions, controller.power())
    };
    info!("{} -> fan presumed {}", route.path(), power.as_str());
    execute_fan_actions(state, actions);
}

fn execute_fan_actions(state: &SharedState, actions: Vec<FanAction>) {
    for action in actions {
        let mut transmitter = lock(&state.ir_sender);
        let description = format!("{action:?}");
        if let Err(err) = transmitter.execute_action(action) {
            warn!("fan action failed [{description}]: {err:#}");
        } else {
            info!("fan action sent [{description}]");
        }
    }
}

fn read_request_body(req: &mut HttpRequest<'_, '_>) -> anyhow::Result<Vec<u8>> {
    let len = req.content_len().unwrap_or(0) as usize;
    if len > MAX_HTTP_BODY {
        return Err(anyhow!("request body too large"));
    }

    let mut body = vec![0_u8; len];
    if len > 0 {
        req.read_exact(&mut body)?;
    }
    Ok(body)
}

fn write_json<T: Serialize>(req: HttpRequest<'_, '_>, payload: &T) -> anyhow::Result<()> {
    let body = serde_json::to_vec(payload)?;
    req.into_response(
        200,
        Some("OK"),
        &[("Content-Type", "application/json; charset=utf-8")],
    )?
    .write_all(&body)?;
    Ok(())
}

fn write_error(req: HttpRequest<'_, '_>, status_code: u16, message: &str) -> anyhow::Result<()> {
    let payload = serde_json::json!({ "error": message });
    let body = serde_json::to_vec(&payload)?;
    req.into_response(
        status_code,
        None,
        &[("Content-Type", "application/json; charset=utf-8")],
    )?
    .write_all(&body)?;
    Ok(())
}

fn write_redirect(req: HttpRequest<'_, '_>) -> anyhow::Result<()> {
    req.into_response(303, Some("See Other"), &[("Location", "/")])?;
    Ok(())
}

fn init_ir_transmitter(rmt: RMT, runtime: &RuntimeConfig) -> anyhow::Result<IrTransmitter> {
    let ir: &IrHardwareConfig = &runtime.ir;
    if ir.tx_pin < 0 {
        return Err(anyhow!("invalid tx pin: {}", ir.tx_pin));
    }

    let pin = ir.tx_pin;
    let codes = runtime.codes;

    match ir.rmt_channel {
        0 => unsafe { IrTransmitter::new(rmt.channel0, AnyOutputPin::new(pin), ir, codes) },
        1 => unsafe { IrTransmitter::new(rmt.channel1, AnyOutputPin::new(pin), ir, codes) },
        2 => unsafe { IrTransmitter::new(rmt.channel2, AnyOutputPin::new(pin), ir, codes) },
        3 => unsafe { IrTransmitter::new(rmt.channel3, AnyOutputPin::new(pin), ir, codes) },
        #[cfg(any(esp32, esp32s3))]
        4 => unsafe { IrTransmitter::new(rmt.channel4, AnyOutputPin::new(pin), ir, codes) },
        #[cfg(any(esp32, esp32s3))]
        5 => unsafe { IrTransmitter::new(rmt.channel5, AnyOutputPin::new(pin), ir, codes) },
        #[cfg(any(esp32, esp32s3))]
        6 => unsafe { IrTransmitter::new(rmt.channel6, AnyOutputPin::new(pin), ir, codes) },
        #[cfg(any(esp32, esp32s3))]
        7 => unsafe { IrTransmitter::new(rmt.channel7, AnyOutputPin::new(pin), ir, codes) },
        _ => Err(anyhow!("unsupported RMT channel: {}", ir.rmt_channel)),
    }
}

impl NvsStore {
    fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        let _guard = lock(&self.lock);
        let mut nvs = EspNvs::new(self.partition.clone(), NVS_NAMESPACE, true)?;
        let mut buffer = vec![0_u8; 2048];

        match nvs.get_str(NVS_RUNTIME_KEY, &mut buffer)? {
            Some(value) => Ok(serde_json::from_str::<RuntimeConfig>(value)?),
            None => Ok(RuntimeConfig::default()),
        }
    }

    fn save_runtime_config(&self, runtime: &RuntimeConfig) -> anyhow::Result<()> {
        let _guard = lock(&self.lock);
        let mut nvs = EspNvs::new(self.partition.clone(), NVS_NAMESPACE, true)?;
        let payload = serde_json::to_string(runtime)?;
        nvs.set_str(NVS_RUNTIME_KEY, &payload)?;
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
