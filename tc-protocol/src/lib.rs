//! IPC protocol between tunectld and its clients
//!
//! One JSON object per line in each direction. Requests are tagged by
//! `cmd` with their arguments under `data`; responses carry a `status`
//! (`ok`, `partial`, `failed`, `error`) plus an HTTP-style `code`.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use tc_core::{
    validate_curve_points, validate_fan_speed, validate_overclock_settings, validate_profile_name,
    ApplyOutcome, ErrorKind, FanInfo, FanMode, OverclockResult, OverclockSettings, Profile,
    TunectlError,
};

/// Global request ID counter for correlation
static REQUEST_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Maximum message size for IPC (8KB)
pub const MAX_MESSAGE_SIZE: usize = 8 * 1024;

/// Generate a unique request ID for correlation
pub fn generate_request_id() -> u64 {
    REQUEST_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Unique request ID for correlation and debugging
    pub id: u64,
    /// The actual request
    #[serde(flatten)]
    pub request: Request,
}

impl RequestEnvelope {
    pub fn new(request: Request) -> Self {
        Self {
            id: generate_request_id(),
            request,
        }
    }

    pub fn with_id(request: Request, id: u64) -> Self {
        Self { id, request }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", content = "data")]
pub enum Request {
    Ping,
    Version,
    ListFans,
    GetFanMode {
        fan_id: usize,
    },
    SetFanMode {
        fan_id: usize,
        #[serde(flatten)]
        mode: FanMode,
    },
    GetGpuSettings {
        device_id: u32,
    },
    ApplyGpuSettings {
        device_id: u32,
        settings: OverclockSettings,
    },
    ListProfiles,
    SaveProfile {
        profile: Profile,
    },
    LoadProfile {
        name: String,
    },
}

impl Request {
    /// Validate request parameters before sending to the daemon
    pub fn validate(&self) -> Result<(), TunectlError> {
        match self {
            Request::Ping
            | Request::Version
            | Request::ListFans
            | Request::GetFanMode { .. }
            | Request::GetGpuSettings { .. }
            | Request::ListProfiles => Ok(()),

            Request::SetFanMode { mode, .. } => match mode {
                FanMode::Auto => Ok(()),
                FanMode::Fixed { speed } => validate_fan_speed(*speed),
                FanMode::Curve { points } => validate_curve_points(points),
            },

            Request::ApplyGpuSettings { settings, .. } => validate_overclock_settings(settings),

            Request::SaveProfile { profile } => {
                validate_profile_name(&profile.name)?;
                validate_overclock_settings(&profile.settings)
            }

            Request::LoadProfile { name } => {
                if name.is_empty() {
                    return Err(TunectlError::validation("name", "profile name cannot be empty"));
                }
                Ok(())
            }
        }
    }

    /// Whether the request changes hardware or stored state
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Request::SetFanMode { .. }
                | Request::ApplyGpuSettings { .. }
                | Request::SaveProfile { .. }
                | Request::LoadProfile { .. }
        )
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Request::Ping => "Ping",
            Request::Version => "Version",
            Request::ListFans => "ListFans",
            Request::GetFanMode { .. } => "GetFanMode",
            Request::SetFanMode { .. } => "SetFanMode",
            Request::GetGpuSettings { .. } => "GetGpuSettings",
            Request::ApplyGpuSettings { .. } => "ApplyGpuSettings",
            Request::ListProfiles => "ListProfiles",
            Request::SaveProfile { .. } => "SaveProfile",
            Request::LoadProfile { .. } => "LoadProfile",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Request ID this response corresponds to
    pub id: u64,
    /// HTTP-style status code
    pub code: u16,
    /// The actual response
    #[serde(flatten)]
    pub response: Response,
}

impl ResponseEnvelope {
    pub fn new(id: u64, response: Response) -> Self {
        Self {
            id,
            code: response.status_code(),
            response,
        }
    }
}

/// Wire name of an error kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Validation,
    NotFound,
    Unsupported,
    Hardware,
    Internal,
    BadRequest,
}

impl ErrorCode {
    pub fn status_code(self) -> u16 {
        match self {
            ErrorCode::Validation | ErrorCode::BadRequest => 400,
            ErrorCode::NotFound => 404,
            ErrorCode::Unsupported => 501,
            ErrorCode::Hardware | ErrorCode::Internal => 500,
        }
    }
}

impl From<ErrorKind> for ErrorCode {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Validation => ErrorCode::Validation,
            ErrorKind::NotFound => ErrorCode::NotFound,
            ErrorKind::Unsupported => ErrorCode::Unsupported,
            ErrorKind::Hardware => ErrorCode::Hardware,
            ErrorKind::Internal => ErrorCode::Internal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum Response {
    /// Fully successful
    #[serde(rename = "ok")]
    Ok(ResponseData),
    /// Applied with warnings
    #[serde(rename = "partial")]
    Partial(ResponseData),
    /// Processed, but at least one field failed
    #[serde(rename = "failed")]
    Failed(ResponseData),
    /// Request rejected as a whole
    #[serde(rename = "error")]
    Error { kind: ErrorCode, message: String },
}

/// Response payload; exactly the fields relevant to the request are set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fans: Option<Vec<FanInfo>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fan_mode: Option<FanMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<OverclockSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<OverclockResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profiles: Option<Vec<Profile>>,
}

impl ResponseData {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn string(v: impl Into<String>) -> Self {
        Self {
            value: Some(v.into()),
            ..Self::default()
        }
    }

    pub fn fan_list(f: Vec<FanInfo>) -> Self {
        Self {
            fans: Some(f),
            ..Self::default()
        }
    }

    pub fn mode(m: FanMode) -> Self {
        Self {
            fan_mode: Some(m),
            ..Self::default()
        }
    }

    pub fn gpu_settings(s: OverclockSettings) -> Self {
        Self {
            settings: Some(s),
            ..Self::default()
        }
    }

    pub fn profile_list(p: Vec<Profile>) -> Self {
        Self {
            profiles: Some(p),
            ..Self::default()
        }
    }
}

impl Response {
    pub fn ok() -> Self {
        Response::Ok(ResponseData::none())
    }

    pub fn ok_string(s: impl Into<String>) -> Self {
        Response::Ok(ResponseData::string(s))
    }

    pub fn error(kind: ErrorCode, msg: impl Into<String>) -> Self {
        Response::Error {
            kind,
            message: msg.into(),
        }
    }

    pub fn from_error(err: &TunectlError) -> Self {
        Self::error(err.kind().into(), err.to_string())
    }

    /// Pick ok/partial/failed from the result's outcome
    pub fn from_overclock(result: OverclockResult) -> Self {
        let outcome = result.outcome();
        let data = ResponseData {
            result: Some(result),
            ..ResponseData::default()
        };
        match outcome {
            ApplyOutcome::Full => Response::Ok(data),
            ApplyOutcome::Partial => Response::Partial(data),
            ApplyOutcome::Failed => Response::Failed(data),
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Response::Ok(_) => 200,
            Response::Partial(_) => 207,
            Response::Failed(_) => 422,
            Response::Error { kind, .. } => kind.status_code(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Response::Ok(_))
    }

    pub fn data(&self) -> Option<&ResponseData> {
        match self {
            Response::Ok(d) | Response::Partial(d) | Response::Failed(d) => Some(d),
            Response::Error { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tc_core::CurvePoint;

    #[test]
    fn test_request_wire_format() {
        let env = RequestEnvelope::with_id(
            Request::SetFanMode {
                fan_id: 2,
                mode: FanMode::Fixed { speed: 40 },
            },
            7,
        );
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"id": 7, "cmd": "SetFanMode", "data": {"fan_id": 2, "mode": "fixed", "speed": 40}})
        );

        let parsed: RequestEnvelope = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, env);
    }

    #[test]
    fn test_unit_request_parses() {
        let env: RequestEnvelope = serde_json::from_str(r#"{"id":1,"cmd":"ListProfiles"}"#).unwrap();
        assert_eq!(env.request, Request::ListProfiles);
    }

    #[test]
    fn test_validate_rejects_bad_input() {
        let bad_curve = Request::SetFanMode {
            fan_id: 0,
            mode: FanMode::Curve {
                points: vec![CurvePoint::new(40, 50)],
            },
        };
        assert!(bad_curve.validate().unwrap_err().is_validation());

        let reserved = Request::SaveProfile {
            profile: Profile::new("_current", OverclockSettings::default()),
        };
        assert!(reserved.validate().is_err());

        let bad_oc = Request::ApplyGpuSettings {
            device_id: 0,
            settings: OverclockSettings {
                core_clock_offset: 10000,
                ..Default::default()
            },
        };
        assert!(bad_oc.validate().is_err());
        assert!(Request::Ping.validate().is_ok());
    }

    #[test]
    fn test_overclock_status_codes() {
        let full = OverclockResult {
            success: true,
            applied: vec!["power limit: 110%".into()],
            ..Default::default()
        };
        let partial = OverclockResult {
            success: true,
            warnings: vec!["power_limit: permission denied".into()],
            ..Default::default()
        };
        let failed = OverclockResult {
            success: false,
            errors: vec!["core_clock_offset: rejected".into()],
            ..Default::default()
        };

        assert_eq!(Response::from_overclock(full).status_code(), 200);
        assert_eq!(Response::from_overclock(partial).status_code(), 207);
        assert_eq!(Response::from_overclock(failed).status_code(), 422);
    }

    #[test]
    fn test_error_status_codes() {
        let cases = [
            (TunectlError::validation("speed", "too high"), 400),
            (TunectlError::not_found("fan 4"), 404),
            (TunectlError::unsupported("intel"), 501),
            (TunectlError::Gpu("boom".into()), 500),
        ];
        for (err, code) in cases {
            assert_eq!(Response::from_error(&err).status_code(), code);
        }
    }

    #[test]
    fn test_response_envelope_carries_code() {
        let env = ResponseEnvelope::new(3, Response::error(ErrorCode::NotFound, "profile 'x'"));
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["code"], 404);
        assert_eq!(json["status"], "error");
        assert_eq!(json["kind"], "not_found");
    }
}
