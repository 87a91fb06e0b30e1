//! First-boot workflow for the appliance.
//!
//! ```text
//! WaitingForStartup -> CheckingFirstBoot -+-> Done (already configured)
//!                                         |
//!                                         +-> AcceptingEula -> RotatingCredentials
//!                                             -> ApplyingNetworkConfig
//!                                             -> WaitingForReachability -> Done
//! ```
//!
//! Any failure stops the workflow in `Failed` and is reported together with
//! the state that was active when it happened.

use std::fmt;
use std::time::Duration;

use hwm_client::{paths, ClientError, Connector, Credentials, Progress, ResourceClient};
use hwm_reconcile::{with_retry, RetryPolicy};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, error, info};

use crate::desired::ApplianceSpec;
use crate::error::ConvergeError;
use crate::mapper;

/// Pause after the appliance answers on its new address, before the caller
/// is told the network change is complete.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(30);

pub const DEFAULT_USER: &str = "Administrator";
pub const DEFAULT_PASSWORD: &str = "admin";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapState {
    WaitingForStartup,
    CheckingFirstBoot,
    AcceptingEula,
    RotatingCredentials,
    ApplyingNetworkConfig,
    WaitingForReachability,
    Done,
    Failed,
}

impl fmt::Display for BootstrapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::WaitingForStartup => "waiting for startup",
            Self::CheckingFirstBoot => "checking first boot",
            Self::AcceptingEula => "accepting the EULA",
            Self::RotatingCredentials => "rotating credentials",
            Self::ApplyingNetworkConfig => "applying network configuration",
            Self::WaitingForReachability => "waiting for reachability",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Timing and factory-default settings of the workflow.
#[derive(Debug, Clone)]
pub struct BootstrapPolicy {
    pub startup: RetryPolicy,
    pub reachability: RetryPolicy,
    pub settle_delay: Duration,
    pub default_credentials: Credentials,
}

impl Default for BootstrapPolicy {
    fn default() -> Self {
        Self {
            startup: RetryPolicy::startup(),
            reachability: RetryPolicy::reachability(),
            settle_delay: DEFAULT_SETTLE_DELAY,
            default_credentials: Credentials::new(DEFAULT_USER, DEFAULT_PASSWORD),
        }
    }
}

/// Outcome of a completed workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BootstrapReport {
    pub changed: bool,
    pub state: BootstrapState,

    /// Address the appliance answers on at the end of the run.
    pub address: String,
}

/// Mutable context threaded through the workflow.
pub struct BootstrapSession<C> {
    client: C,
    credentials: Option<Credentials>,
    progress: Progress,
    eula_accepted: bool,
    state: BootstrapState,
}

impl<C: ResourceClient> BootstrapSession<C> {
    fn new(client: C, progress: Progress) -> Self {
        Self {
            client,
            credentials: None,
            progress,
            eula_accepted: false,
            state: BootstrapState::WaitingForStartup,
        }
    }

    pub fn state(&self) -> BootstrapState {
        self.state
    }

    pub fn progress(&self) -> Progress {
        self.progress
    }

    pub fn eula_accepted(&self) -> bool {
        self.eula_accepted
    }

    pub fn address(&self) -> &str {
        self.client.address()
    }

    fn transition(&mut self, next: BootstrapState) {
        info!(address = self.client.address(), from = %self.state, to = %next, "Bootstrap transition");
        self.state = next;
    }

    fn fail(&mut self, err: ConvergeError) -> ConvergeError {
        let state = self.state;
        error!(address = self.client.address(), %state, error = %err, "Bootstrap failed");
        self.state = BootstrapState::Failed;
        ConvergeError::Bootstrap {
            state,
            source: Box::new(err),
        }
    }
}

/// Runs the first-boot workflow through a connector.
pub struct ApplianceBootstrap<'a, K> {
    connector: &'a K,
    policy: BootstrapPolicy,
}

impl<'a, K: Connector> ApplianceBootstrap<'a, K> {
    pub fn new(connector: &'a K, policy: BootstrapPolicy) -> Self {
        Self { connector, policy }
    }

    pub fn policy(&self) -> &BootstrapPolicy {
        &self.policy
    }

    pub async fn run(&self, spec: &ApplianceSpec) -> Result<BootstrapReport, ConvergeError> {
        mapper::validate_addressing(spec)?;

        let mut session = self.wait_for_startup(&spec.initial_ip).await.map_err(|err| {
            error!(address = %spec.initial_ip, error = %err, "Appliance never finished starting");
            ConvergeError::Bootstrap {
                state: BootstrapState::WaitingForStartup,
                source: Box::new(err),
            }
        })?;

        session.transition(BootstrapState::CheckingFirstBoot);
        let configured = match self.check_first_boot(&mut session, spec).await {
            Ok(configured) => configured,
            Err(err) => return Err(session.fail(err)),
        };
        if configured {
            info!(address = session.address(), "Appliance already configured");
            session.transition(BootstrapState::Done);
            return Ok(BootstrapReport {
                changed: false,
                state: session.state,
                address: session.address().to_string(),
            });
        }

        if let Err(err) = self.configure(&mut session, spec).await {
            return Err(session.fail(err));
        }

        session.transition(BootstrapState::WaitingForReachability);
        let mut session = match self.wait_for_reachability(session, spec).await {
            Ok(session) => session,
            Err((mut session, err)) => return Err(session.fail(err)),
        };

        info!(
            address = session.address(),
            settle_secs = self.policy.settle_delay.as_secs(),
            "Appliance reachable; letting the network settle"
        );
        tokio::time::sleep(self.policy.settle_delay).await;

        session.transition(BootstrapState::Done);
        Ok(BootstrapReport {
            changed: true,
            state: session.state,
            address: session.address().to_string(),
        })
    }

    async fn wait_for_startup(&self, address: &str) -> Result<BootstrapSession<K::Client>, ConvergeError> {
        let connector = self.connector;
        let (client, progress) = with_retry(self.policy.startup, ClientError::is_transient, || async move {
            let client = connector.connect(address).await?;
            let progress = client.get_progress(paths::STARTUP_PROGRESS).await?;
            if progress.is_complete() {
                Ok::<_, ClientError>((client, progress))
            } else {
                info!(address, %progress, "Appliance still starting");
                Err(ClientError::Unavailable(format!("startup in progress ({progress})")))
            }
        })
        .await
        .map_err(|err| ConvergeError::from_retry("appliance startup", err))?;

        debug!(address, %progress, "Appliance services are up");
        Ok(BootstrapSession::new(client, progress))
    }

    /// Returns true when the appliance has already been set up with the
    /// caller's credentials.
    async fn check_first_boot(
        &self,
        session: &mut BootstrapSession<K::Client>,
        spec: &ApplianceSpec,
    ) -> Result<bool, ConvergeError> {
        let eula_required = match session.client.fetch(paths::EULA_STATUS).await? {
            Value::Bool(required) => required,
            other => {
                return Err(ConvergeError::UnexpectedRecord(format!(
                    "EULA status is not a boolean: {other}"
                )))
            }
        };
        session.eula_accepted = !eula_required;
        if eula_required {
            return Ok(false);
        }

        let credentials = spec.credentials();
        match session.client.login(&credentials).await {
            Ok(()) => {
                session.credentials = Some(credentials);
                Ok(true)
            }
            Err(err) if err.is_auth() => {
                info!(address = session.address(), "Caller credentials not active yet");
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn configure(
        &self,
        session: &mut BootstrapSession<K::Client>,
        spec: &ApplianceSpec,
    ) -> Result<(), ConvergeError> {
        if !session.eula_accepted {
            session.transition(BootstrapState::AcceptingEula);
            if !spec.accept_eula {
                return Err(ConvergeError::InvalidDesiredState(
                    "the appliance requires EULA acceptance but accept_eula is false".to_string(),
                ));
            }
            session
                .client
                .create(paths::EULA_SAVE, &json!({"supportAccess": "yes"}))
                .await?;
            session.eula_accepted = true;
        }

        session.transition(BootstrapState::RotatingCredentials);
        let defaults = &self.policy.default_credentials;
        let change = json!({
            "userName": defaults.user_name,
            "oldPassword": defaults.password,
            "newPassword": spec.password,
        });
        session.client.create(paths::CHANGE_PASSWORD, &change).await?;

        let credentials = spec.credentials();
        session.client.login(&credentials).await?;
        session.credentials = Some(credentials);

        session.transition(BootstrapState::ApplyingNetworkConfig);
        let current = session.client.fetch(paths::NETWORK_INTERFACES).await?;
        let config = mapper::map_network(&current, spec)?;
        match session
            .client
            .create(paths::NETWORK_INTERFACES, &config.create_body())
            .await
        {
            Ok(_) => Ok(()),
            Err(err) if err.is_transient() => {
                info!(error = %err, "Appliance dropped the connection while applying network settings");
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn wait_for_reachability(
        &self,
        session: BootstrapSession<K::Client>,
        spec: &ApplianceSpec,
    ) -> Result<BootstrapSession<K::Client>, (BootstrapSession<K::Client>, ConvergeError)> {
        let address = spec.target_address();
        let credentials = session
            .credentials
            .clone()
            .unwrap_or_else(|| spec.credentials());
        let connector = self.connector;
        let credentials_ref = &credentials;

        let result = with_retry(self.policy.reachability, ClientError::is_transient, || async move {
            let mut client = connector.connect(address).await?;
            client.login(credentials_ref).await?;
            Ok::<_, ClientError>(client)
        })
        .await;

        match result {
            Ok(client) => Ok(BootstrapSession {
                client,
                credentials: Some(credentials),
                ..session
            }),
            Err(err) => Err((session, ConvergeError::from_retry("login at the configured address", err))),
        }
    }
}
