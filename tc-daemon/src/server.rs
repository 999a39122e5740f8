//! Unix socket server
//!
//! One JSON request per line in, one JSON response per line out. Every read
//! is bounded to [`MAX_MESSAGE_SIZE`] and has a timeout, and the number of
//! concurrent clients is capped.
//!
//! Fan mode requests go straight to the [`ModeController`]. GPU and profile
//! requests shell out to vendor tools, so they run on the blocking pool.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use tc_core::{ModeController, TuningService};
use tc_protocol::{
    ErrorCode, Request, RequestEnvelope, Response, ResponseData, ResponseEnvelope,
    MAX_MESSAGE_SIZE,
};

/// Maximum concurrent client connections
const MAX_CONNECTIONS: usize = 64;

/// Read timeout per message
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Budget for one GPU or profile operation, vendor tools included
const TUNING_TIMEOUT: Duration = Duration::from_secs(10);

/// Write timeout per message
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Owner and group only
const SOCKET_MODE: u32 = 0o660;

const VERSION: &str = env!("CARGO_PKG_VERSION");

static ACTIVE_CONNECTIONS: AtomicUsize = AtomicUsize::new(0);

/// Everything a request handler can reach
pub struct DaemonState {
    pub modes: ModeController,
    pub tuning: Arc<TuningService>,
    tuning_timeout: Duration,
}

impl DaemonState {
    pub fn new(modes: ModeController, tuning: TuningService) -> Self {
        Self {
            modes,
            tuning: Arc::new(tuning),
            tuning_timeout: TUNING_TIMEOUT,
        }
    }

    #[cfg(test)]
    fn with_tuning_timeout(mut self, limit: Duration) -> Self {
        self.tuning_timeout = limit;
        self
    }
}

/// Remove a stale socket left by a previous run; refuse anything else
fn prepare_socket_path(path: &Path) -> anyhow::Result<()> {
    let Ok(metadata) = path.symlink_metadata() else {
        return Ok(());
    };
    if metadata.file_type().is_symlink() {
        bail!("socket path {} is a symlink, refusing", path.display());
    }
    fs::remove_file(path).with_context(|| format!("removing stale socket {}", path.display()))?;
    debug!("Removed existing socket file");
    Ok(())
}

/// Serve clients until `shutdown` flips to true or its sender goes away
pub async fn run_server(
    socket_path: &Path,
    state: Arc<DaemonState>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    prepare_socket_path(socket_path)?;

    let listener = UnixListener::bind(socket_path)
        .with_context(|| format!("binding {}", socket_path.display()))?;
    fs::set_permissions(socket_path, fs::Permissions::from_mode(SOCKET_MODE))
        .with_context(|| format!("setting permissions on {}", socket_path.display()))?;

    info!(
        "Listening on {} (mode {:o}, max_conn={}, max_msg={})",
        socket_path.display(),
        SOCKET_MODE,
        MAX_CONNECTIONS,
        MAX_MESSAGE_SIZE
    );

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let current = ACTIVE_CONNECTIONS.load(Ordering::SeqCst);
                        if current >= MAX_CONNECTIONS {
                            warn!("Connection limit reached ({}), rejecting new connection", current);
                            drop(stream);
                            continue;
                        }

                        ACTIVE_CONNECTIONS.fetch_add(1, Ordering::SeqCst);
                        let state = Arc::clone(&state);
                        tokio::spawn(async move {
                            handle_client(stream, state).await;
                            ACTIVE_CONNECTIONS.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("Shutdown requested, no longer accepting connections");
                    break;
                }
            }
        }
    }

    if let Err(e) = fs::remove_file(socket_path) {
        debug!("Socket already gone: {}", e);
    }
    Ok(())
}

/// Read one `\n`-terminated line without buffering past `max_len`.
///
/// Returns `Ok(0)` on EOF and `InvalidData` when the line is too long.
async fn read_line_bounded<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    out: &mut Vec<u8>,
    max_len: usize,
) -> std::io::Result<usize> {
    out.clear();

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(out.len());
        }

        let (take_len, found_newline) = match available.iter().position(|b| *b == b'\n') {
            Some(pos) => (pos + 1, true),
            None => (available.len(), false),
        };

        let remaining = max_len.saturating_sub(out.len());
        if take_len > remaining {
            let consume_len = remaining.min(available.len());
            reader.consume(consume_len);
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "Message too large",
            ));
        }

        out.extend_from_slice(&available[..take_len]);
        reader.consume(take_len);

        if found_newline {
            return Ok(out.len());
        }
    }
}

async fn handle_client(stream: UnixStream, state: Arc<DaemonState>) {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line: Vec<u8> = Vec::with_capacity(MAX_MESSAGE_SIZE);
    let mut request_count: u64 = 0;

    loop {
        let read_result = timeout(
            READ_TIMEOUT,
            read_line_bounded(&mut reader, &mut line, MAX_MESSAGE_SIZE),
        )
        .await;

        match read_result {
            Ok(Ok(0)) => {
                debug!("Client disconnected after {} request(s)", request_count);
                break;
            }
            Ok(Ok(n)) => {
                request_count += 1;
                trace!("Request #{}: {} bytes", request_count, n);

                let envelope = match std::str::from_utf8(&line) {
                    Ok(text) if text.trim().is_empty() => continue,
                    Ok(text) => process_line(text, &state).await,
                    Err(e) => {
                        debug!("Non-UTF8 request: {}", e);
                        bad_request("Invalid request encoding")
                    }
                };

                if send_response(&mut writer, &envelope).await.is_err() {
                    break;
                }
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::InvalidData => {
                warn!("Message too large (>{} bytes), closing connection", MAX_MESSAGE_SIZE);
                let _ = send_response(&mut writer, &bad_request("Message too large")).await;
                break;
            }
            Ok(Err(e)) => {
                error!("Read error: {}", e);
                break;
            }
            Err(_) => {
                debug!("Read timeout, closing connection");
                break;
            }
        }
    }
}

fn bad_request(message: &str) -> ResponseEnvelope {
    ResponseEnvelope::new(0, Response::error(ErrorCode::BadRequest, message))
}

async fn send_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    envelope: &ResponseEnvelope,
) -> Result<(), ()> {
    let json = match serde_json::to_string(envelope) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize response: {}", e);
            r#"{"id":0,"code":500,"status":"error","kind":"internal","message":"Serialization error"}"#
                .to_string()
        }
    };

    let write_result = timeout(WRITE_TIMEOUT, async {
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await
    })
    .await;

    match write_result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            error!("Write error: {}", e);
            Err(())
        }
        Err(_) => {
            error!("Write timeout");
            Err(())
        }
    }
}

/// Decode one request line and answer it
pub async fn process_line(line: &str, state: &DaemonState) -> ResponseEnvelope {
    let envelope: RequestEnvelope = match serde_json::from_str(line.trim()) {
        Ok(envelope) => envelope,
        Err(e) => {
            debug!("Malformed request: {}", e);
            return bad_request(&format!("Invalid request: {}", e));
        }
    };

    let id = envelope.id;
    let request = envelope.request;
    if request.is_mutating() {
        info!(id, cmd = request.type_name(), "Handling request");
    } else {
        debug!(id, cmd = request.type_name(), "Handling request");
    }

    let response = handle_request(state, request).await;
    if let Response::Error { kind, message } = &response {
        debug!(id, ?kind, "Request failed: {}", message);
    }
    ResponseEnvelope::new(id, response)
}

/// Route a decoded request to the core
pub async fn handle_request(state: &DaemonState, request: Request) -> Response {
    match request {
        Request::Ping => Response::ok_string("pong"),
        Request::Version => Response::ok_string(VERSION),
        Request::ListFans => Response::Ok(ResponseData::fan_list(state.modes.list_fans().await)),
        Request::GetFanMode { fan_id } => into_response(
            state
                .modes
                .get_mode(fan_id)
                .await
                .map(|mode| Response::Ok(ResponseData::mode(mode))),
        ),
        Request::SetFanMode { fan_id, mode } => {
            into_response(state.modes.set_mode(fan_id, mode).await.map(|_| Response::ok()))
        }
        Request::GetGpuSettings { device_id } => {
            run_tuning(state, move |tuning| {
                tuning
                    .get_settings(device_id)
                    .map(|s| Response::Ok(ResponseData::gpu_settings(s)))
            })
            .await
        }
        Request::ApplyGpuSettings {
            device_id,
            settings,
        } => {
            run_tuning(state, move |tuning| {
                tuning
                    .apply_settings(device_id, &settings)
                    .map(Response::from_overclock)
            })
            .await
        }
        Request::ListProfiles => {
            run_tuning(state, |tuning| {
                tuning
                    .list_profiles()
                    .map(|p| Response::Ok(ResponseData::profile_list(p)))
            })
            .await
        }
        Request::SaveProfile { profile } => {
            run_tuning(state, move |tuning| tuning.save_profile(&profile).map(|_| Response::ok()))
                .await
        }
        Request::LoadProfile { name } => {
            run_tuning(state, move |tuning| {
                tuning.load_profile(&name).map(Response::from_overclock)
            })
            .await
        }
    }
}

fn into_response(result: tc_core::Result<Response>) -> Response {
    result.unwrap_or_else(|e| Response::from_error(&e))
}

/// Run a tuning operation on the blocking pool, bounded by the tuning timeout.
///
/// On timeout the client gets an error; the blocking task itself runs to
/// completion in the background.
async fn run_tuning<F>(state: &DaemonState, op: F) -> Response
where
    F: FnOnce(&TuningService) -> tc_core::Result<Response> + Send + 'static,
{
    let tuning = Arc::clone(&state.tuning);
    let task = tokio::task::spawn_blocking(move || op(&tuning));
    match timeout(state.tuning_timeout, task).await {
        Ok(Ok(result)) => into_response(result),
        Ok(Err(e)) => {
            error!("Tuning task failed: {}", e);
            Response::error(ErrorCode::Internal, "tuning task failed")
        }
        Err(_) => {
            warn!(
                timeout_ms = state.tuning_timeout.as_millis() as u64,
                "Tuning operation timed out"
            );
            Response::error(ErrorCode::Internal, "GPU operation timed out")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tc_core::{
        FanActuator, FanMode, JsonProfileStore, OverclockSettings, Profile, SettingsApplier,
        TemperatureSource,
    };
    use tc_gpu::{GpuBackend, GpuVendor, OverclockField, OverclockSink, SinkResponse};
    use tempfile::TempDir;

    #[derive(Default)]
    struct FanLog {
        enable: Mutex<String>,
        pwm: Mutex<Vec<i32>>,
    }

    struct FakeFan(Arc<FanLog>);

    impl FanActuator for FakeFan {
        fn name(&self) -> String {
            "pwm1 (ID:0)".to_string()
        }

        fn enable_manual(&self) -> tc_core::Result<()> {
            *self.0.enable.lock().unwrap() = "1".into();
            Ok(())
        }

        fn write_speed(&self, percent: i32) -> tc_core::Result<()> {
            self.0.pwm.lock().unwrap().push(percent);
            Ok(())
        }

        fn release_manual(&self) -> tc_core::Result<()> {
            *self.0.enable.lock().unwrap() = "2".into();
            Ok(())
        }

        fn read_manual_speed(&self) -> tc_core::Result<Option<i32>> {
            if *self.0.enable.lock().unwrap() != "1" {
                return Ok(None);
            }
            Ok(self.0.pwm.lock().unwrap().last().copied())
        }
    }

    struct FixedTemperature(i32);

    impl TemperatureSource for FixedTemperature {
        fn read(&self) -> Option<i32> {
            Some(self.0)
        }
    }

    /// NVIDIA device 0 whose power limit write needs root
    struct FakeGpus;

    struct FakeSink;

    impl OverclockSink for FakeSink {
        fn apply(&self, field: &OverclockField) -> SinkResponse {
            match field {
                OverclockField::PowerLimit(_) => {
                    tc_gpu::classify_failure("Insufficient Permissions")
                }
                OverclockField::VoltageOffset(_) => {
                    SinkResponse::Error("voltage rejected".to_string())
                }
                _ => SinkResponse::ok(),
            }
        }

        fn read_settings(&self) -> tc_gpu::Result<OverclockSettings> {
            Ok(OverclockSettings {
                core_clock_offset: 50,
                ..Default::default()
            })
        }
    }

    impl GpuBackend for FakeGpus {
        fn detect_vendor(&self, device_id: u32) -> tc_gpu::Result<GpuVendor> {
            match device_id {
                0 => Ok(GpuVendor::Nvidia),
                1 => Ok(GpuVendor::Unknown),
                7 => {
                    std::thread::sleep(Duration::from_millis(300));
                    Ok(GpuVendor::Nvidia)
                }
                n => Err(tc_core::TunectlError::not_found(format!("GPU {}", n))),
            }
        }

        fn sink(&self, _device_id: u32, _vendor: GpuVendor) -> tc_gpu::Result<Box<dyn OverclockSink>> {
            Ok(Box::new(FakeSink))
        }
    }

    fn test_state(dir: &TempDir) -> (DaemonState, Arc<FanLog>) {
        let log = Arc::new(FanLog::default());
        let fans: Vec<Arc<dyn FanActuator>> = vec![Arc::new(FakeFan(Arc::clone(&log)))];
        let modes = ModeController::new(fans, Arc::new(FixedTemperature(50)))
            .with_interval(Duration::from_millis(100));
        let tuning = TuningService::new(
            SettingsApplier::new(Arc::new(FakeGpus)),
            Arc::new(JsonProfileStore::new(dir.path())),
        );
        (DaemonState::new(modes, tuning), log)
    }

    async fn call(state: &DaemonState, request: Request) -> ResponseEnvelope {
        let line = serde_json::to_string(&RequestEnvelope::with_id(request, 9)).unwrap();
        process_line(&line, state).await
    }

    #[tokio::test]
    async fn test_ping_and_version() {
        let dir = TempDir::new().unwrap();
        let (state, _) = test_state(&dir);

        let pong = call(&state, Request::Ping).await;
        assert_eq!(pong.id, 9);
        assert_eq!(pong.code, 200);
        assert_eq!(pong.response.data().unwrap().value.as_deref(), Some("pong"));

        let version = call(&state, Request::Version).await;
        assert_eq!(version.response.data().unwrap().value.as_deref(), Some(VERSION));
    }

    #[tokio::test]
    async fn test_malformed_line_is_bad_request() {
        let dir = TempDir::new().unwrap();
        let (state, _) = test_state(&dir);

        let envelope = process_line("{not json", &state).await;
        assert_eq!(envelope.id, 0);
        assert_eq!(envelope.code, 400);
        assert!(matches!(
            envelope.response,
            Response::Error {
                kind: ErrorCode::BadRequest,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_fan_mode_round_trip() {
        let dir = TempDir::new().unwrap();
        let (state, log) = test_state(&dir);

        let set = call(
            &state,
            Request::SetFanMode {
                fan_id: 0,
                mode: FanMode::Fixed { speed: 40 },
            },
        )
        .await;
        assert_eq!(set.code, 200);
        assert_eq!(*log.pwm.lock().unwrap(), vec![40]);

        let get = call(&state, Request::GetFanMode { fan_id: 0 }).await;
        assert_eq!(
            get.response.data().unwrap().fan_mode,
            Some(FanMode::Fixed { speed: 40 })
        );

        let listed = call(&state, Request::ListFans).await;
        let fans = listed.response.data().unwrap().fans.clone().unwrap();
        assert_eq!(fans.len(), 1);
        assert_eq!(fans[0].name, "pwm1 (ID:0)");
    }

    #[tokio::test]
    async fn test_fan_errors_map_to_status_codes() {
        let dir = TempDir::new().unwrap();
        let (state, log) = test_state(&dir);

        let missing = call(&state, Request::GetFanMode { fan_id: 3 }).await;
        assert_eq!(missing.code, 404);

        let invalid = call(
            &state,
            Request::SetFanMode {
                fan_id: 0,
                mode: FanMode::Fixed { speed: 120 },
            },
        )
        .await;
        assert_eq!(invalid.code, 400);
        assert!(log.pwm.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_gpu_statuses() {
        let dir = TempDir::new().unwrap();
        let (state, _) = test_state(&dir);

        let partial = call(
            &state,
            Request::ApplyGpuSettings {
                device_id: 0,
                settings: OverclockSettings {
                    core_clock_offset: 100,
                    power_limit: 110,
                    ..Default::default()
                },
            },
        )
        .await;
        assert_eq!(partial.code, 207);
        let result = partial.response.data().unwrap().result.clone().unwrap();
        assert!(result.success);
        assert_eq!(result.warnings.len(), 1);

        let failed = call(
            &state,
            Request::ApplyGpuSettings {
                device_id: 0,
                settings: OverclockSettings {
                    voltage_offset: 25.0,
                    ..Default::default()
                },
            },
        )
        .await;
        assert_eq!(failed.code, 422);

        let unsupported = call(&state, Request::GetGpuSettings { device_id: 1 }).await;
        assert_eq!(unsupported.code, 501);

        let absent = call(&state, Request::GetGpuSettings { device_id: 4 }).await;
        assert_eq!(absent.code, 404);

        let read = call(&state, Request::GetGpuSettings { device_id: 0 }).await;
        assert_eq!(
            read.response.data().unwrap().settings.unwrap().core_clock_offset,
            50
        );
    }

    #[tokio::test]
    async fn test_slow_gpu_times_out() {
        let dir = TempDir::new().unwrap();
        let (state, _) = test_state(&dir);
        let state = state.with_tuning_timeout(Duration::from_millis(50));

        let slow = call(&state, Request::GetGpuSettings { device_id: 7 }).await;
        assert_eq!(slow.code, 500);
        match slow.response {
            Response::Error { kind, message } => {
                assert_eq!(kind, ErrorCode::Internal);
                assert!(message.contains("timed out"), "got {:?}", message);
            }
            other => panic!("expected error, got {:?}", other),
        }

        // later requests are unaffected
        let fast = call(&state, Request::GetGpuSettings { device_id: 0 }).await;
        assert_eq!(fast.code, 200);
    }

    #[tokio::test]
    async fn test_profiles_over_the_wire() {
        let dir = TempDir::new().unwrap();
        let (state, _) = test_state(&dir);

        let profile = Profile::new(
            "quiet",
            OverclockSettings {
                fan_speed: 35,
                ..Default::default()
            },
        );
        let saved = call(&state, Request::SaveProfile { profile }).await;
        assert_eq!(saved.code, 200);

        let listed = call(&state, Request::ListProfiles).await;
        let names: Vec<String> = listed
            .response
            .data()
            .unwrap()
            .profiles
            .clone()
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["quiet"]);

        let loaded = call(
            &state,
            Request::LoadProfile {
                name: "quiet".into(),
            },
        )
        .await;
        assert_eq!(loaded.code, 200);
        assert!(dir.path().join("_current.json").exists());

        let missing = call(
            &state,
            Request::LoadProfile {
                name: "loud".into(),
            },
        )
        .await;
        assert_eq!(missing.code, 404);
    }

    #[tokio::test]
    async fn test_bounded_read_rejects_long_lines() {
        let mut reader = BufReader::new(&b"0123456789\nrest"[..]);
        let mut line = Vec::new();
        assert!(read_line_bounded(&mut reader, &mut line, 4).await.is_err());

        let mut reader = BufReader::new(&b"ok\n"[..]);
        assert_eq!(read_line_bounded(&mut reader, &mut line, 4).await.unwrap(), 3);
        assert_eq!(line, b"ok\n");
        assert_eq!(read_line_bounded(&mut reader, &mut line, 4).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_socket_serves_until_shutdown() {
        let dir = TempDir::new().unwrap();
        let socket = dir.path().join("tunectl.sock");
        let (state, _) = test_state(&dir);
        let (tx, rx) = watch::channel(false);

        let server_socket = socket.clone();
        let server = tokio::spawn(async move {
            run_server(&server_socket, Arc::new(state), rx).await
        });

        let mut stream = loop {
            match UnixStream::connect(&socket).await {
                Ok(stream) => break stream,
                Err(_) => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        };
        stream
            .write_all(b"{\"id\":3,\"cmd\":\"Ping\"}\n")
            .await
            .unwrap();
        let mut reader = BufReader::new(stream);
        let mut reply = String::new();
        reader.read_line(&mut reply).await.unwrap();

        let envelope: ResponseEnvelope = serde_json::from_str(&reply).unwrap();
        assert_eq!(envelope.id, 3);
        assert!(envelope.response.is_ok());

        tx.send(true).unwrap();
        server.await.unwrap().unwrap();
        assert!(!socket.exists());
    }
}
