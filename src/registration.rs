//! Device registration with the push-messaging backend.
//!
//! The chain runs permission → token → persist → server POST and halts at
//! whichever step fails; a later `initialize()` call or a token refresh from
//! the gateway picks it up again. The device id is minted once per install
//! and never rotated.

use serde::Serialize;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use uuid::Uuid;

use crate::{
    build_endpoint_url, StateStore, REGISTER_DEVICE_PATH, REGISTER_REQUEST_TIMEOUT_SECS,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RegistrationPhase {
    Unregistered,
    PermissionRequested,
    TokenObtained,
    ServerRegistered,
    Denied,
}

/// Platform seam for push permission and token acquisition.
pub(crate) trait PushGateway: Send + Sync {
    fn request_permission(&self) -> Result<bool, String>;
    fn current_token(&self) -> Result<Option<String>, String>;
}

/// Desktop gateway: there is no OS permission prompt to drive, and the push
/// token is provisioned through settings by the operator.
pub(crate) struct SettingsPushGateway {
    token: Option<String>,
}

impl SettingsPushGateway {
    pub(crate) fn new(token: Option<String>) -> Self {
        Self { token }
    }
}

impl PushGateway for SettingsPushGateway {
    fn request_permission(&self) -> Result<bool, String> {
        Ok(true)
    }

    fn current_token(&self) -> Result<Option<String>, String> {
        Ok(self.token.clone())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterDeviceBody<'a> {
    device_id: &'a str,
    fcm_token: &'a str,
    platform: &'a str,
}

pub(crate) struct DeviceRegistrar {
    base_url: String,
    auth_token: Option<String>,
    store: Arc<StateStore>,
    gateway: Box<dyn PushGateway>,
    phase: Mutex<RegistrationPhase>,
    in_flight: AtomicBool,
    http: reqwest::Client,
}

impl DeviceRegistrar {
    pub(crate) fn new(
        base_url: String,
        auth_token: Option<String>,
        store: Arc<StateStore>,
        gateway: Box<dyn PushGateway>,
    ) -> Result<Self, String> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REGISTER_REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|error| format!("Failed to build HTTP client: {error}"))?;
        Ok(Self {
            base_url,
            auth_token,
            store,
            gateway,
            phase: Mutex::new(RegistrationPhase::Unregistered),
            in_flight: AtomicBool::new(false),
            http,
        })
    }

    pub(crate) fn phase(&self) -> RegistrationPhase {
        self.phase
            .lock()
            .map(|phase| *phase)
            .unwrap_or(RegistrationPhase::Unregistered)
    }

    /// Drive the registration chain. No-op once server-registered; a second
    /// caller while a run is in flight gets the current phase back instead
    /// of a second chain. A halted chain can be retried by calling again.
    pub(crate) async fn initialize(&self) -> Result<RegistrationPhase, String> {
        if self.phase() == RegistrationPhase::ServerRegistered {
            return Ok(RegistrationPhase::ServerRegistered);
        }
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return Ok(self.phase());
        }

        let result = self.run_chain().await;
        self.in_flight.store(false, Ordering::SeqCst);
        result
    }

    async fn run_chain(&self) -> Result<RegistrationPhase, String> {
        self.set_phase(RegistrationPhase::PermissionRequested);
        let granted = self.gateway.request_permission()?;
        if !granted {
            self.set_phase(RegistrationPhase::Denied);
            return Err("Notification permission denied".to_string());
        }

        let token = self
            .gateway
            .current_token()?
            .ok_or_else(|| "No push token available yet".to_string())?;
        self.set_phase(RegistrationPhase::TokenObtained);
        {
            let token = token.clone();
            self.store
                .update(move |state| state.push_token = Some(token))
                .await?;
        }

        let device_id = self.ensure_device_id().await?;
        self.post_registration(&device_id, &token).await?;
        self.set_phase(RegistrationPhase::ServerRegistered);
        Ok(RegistrationPhase::ServerRegistered)
    }

    /// The gateway rotated the token behind our back: persist it and re-POST
    /// the registration unconditionally, whatever phase we were in.
    pub(crate) async fn handle_token_refresh(&self, new_token: &str) -> Result<(), String> {
        tracing::info!("push token refreshed, re-registering device");
        {
            let token = new_token.to_string();
            self.store
                .update(move |state| state.push_token = Some(token))
                .await?;
        }
        let device_id = self.ensure_device_id().await?;
        self.post_registration(&device_id, new_token).await?;
        self.set_phase(RegistrationPhase::ServerRegistered);
        Ok(())
    }

    async fn ensure_device_id(&self) -> Result<String, String> {
        if let Some(existing) = self.store.read().await.device_id {
            return Ok(existing);
        }

        let minted = Uuid::new_v4().to_string();
        {
            let minted = minted.clone();
            self.store
                .update(move |state| {
                    state.device_id.get_or_insert(minted);
                })
                .await?;
        }
        Ok(self.store.read().await.device_id.unwrap_or(minted))
    }

    async fn post_registration(&self, device_id: &str, push_token: &str) -> Result<(), String> {
        let endpoint = build_endpoint_url(&self.base_url, REGISTER_DEVICE_PATH)?;
        let body = RegisterDeviceBody {
            device_id,
            fcm_token: push_token,
            platform: std::env::consts::OS,
        };

        let mut request = self.http.post(endpoint).json(&body);
        if let Some(auth_token) = &self.auth_token {
            request = request.bearer_auth(auth_token);
        }
        let response = request
            .send()
            .await
            .map_err(|error| format!("Device registration request failed: {error}"))?;

        if !response.status().is_success() {
            return Err(format!(
                "Device registration failed with HTTP {}",
                response.status().as_u16()
            ));
        }

        if let Err(error) = self.store.update(|state| state.authenticated = true).await {
            tracing::warn!("failed to persist authenticated flag: {error}");
        }
        tracing::info!("device registered with push backend");
        Ok(())
    }

    fn set_phase(&self, next: RegistrationPhase) {
        if let Ok(mut phase) = self.phase.lock() {
            *phase = next;
        }
    }
}
