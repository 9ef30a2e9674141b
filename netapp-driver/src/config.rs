//! Driver configuration
//!
//! Both structs can be flattened into a host binary's `clap::Parser` or
//! loaded from a serialized config file. Required settings are checked by
//! `validate()` before any remote call is made.

use std::time::Duration;

use clap::Args;
use remote_client::{Endpoint, RetryPolicy};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{DriverError, Result};

pub const DEFAULT_DFM_PORT: u16 = 8088;

/// Polling cadence and deadline shared by every poll-until-done loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    /// Delay between job / clone status checks
    pub poll_interval: Duration,
    /// Delay between LUN monitor checks after a refresh
    pub monitor_interval: Duration,
    /// Deadline for any one poll loop
    pub job_timeout: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            monitor_interval: Duration::from_secs(15),
            job_timeout: Duration::from_secs(3600),
        }
    }
}

/// OnCommand DFM server settings for the 7-mode driver
#[derive(Args, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DfmConfig {
    /// URL of the WSDL file for the DFM server
    #[arg(long = "netapp-wsdl-url", env = "NETAPP_WSDL_URL")]
    pub wsdl_url: Option<String>,

    /// User name for the DFM server
    #[arg(long = "netapp-login", env = "NETAPP_LOGIN")]
    pub login: Option<String>,

    /// Password for the DFM server
    #[arg(long = "netapp-password", env = "NETAPP_PASSWORD")]
    pub password: Option<String>,

    /// Hostname for the DFM server
    #[arg(long = "netapp-server-hostname", env = "NETAPP_SERVER_HOSTNAME")]
    pub server_hostname: Option<String>,

    /// Port number for the DFM server
    #[arg(long = "netapp-server-port", env = "NETAPP_SERVER_PORT", default_value_t = DEFAULT_DFM_PORT)]
    pub server_port: u16,

    /// Storage service to use for volumes without a storage class
    #[arg(long = "netapp-storage-service", env = "NETAPP_STORAGE_SERVICE")]
    pub storage_service: Option<String>,

    /// Storage service prefix; the storage class name is appended
    #[arg(long = "netapp-storage-service-prefix", env = "NETAPP_STORAGE_SERVICE_PREFIX")]
    pub storage_service_prefix: Option<String>,

    /// vFiler to provision new datasets on
    #[arg(long = "netapp-vfiler", env = "NETAPP_VFILER")]
    pub vfiler: Option<String>,

    /// Retries after a connection failure
    #[arg(long = "netapp-retries", env = "NETAPP_RETRIES", default_value_t = 0)]
    pub retries: u32,

    /// Seconds between job and clone status checks
    #[arg(long = "netapp-poll-interval", default_value_t = 5)]
    pub poll_interval_secs: u64,

    /// Seconds to wait for any one job, clone or monitor refresh
    #[arg(long = "netapp-job-timeout", default_value_t = 3600)]
    pub job_timeout_secs: u64,

    /// Seconds between LUN monitor checks after a refresh
    #[arg(long = "netapp-monitor-interval", default_value_t = 15)]
    pub monitor_interval_secs: u64,
}

impl Default for DfmConfig {
    fn default() -> Self {
        Self {
            wsdl_url: None,
            login: None,
            password: None,
            server_hostname: None,
            server_port: DEFAULT_DFM_PORT,
            storage_service: None,
            storage_service_prefix: None,
            vfiler: None,
            retries: 0,
            poll_interval_secs: 5,
            job_timeout_secs: 3600,
            monitor_interval_secs: 15,
        }
    }
}

impl DfmConfig {
    /// Fail on the first required setting that is missing.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("netapp_wsdl_url", self.wsdl_url.as_deref()),
            ("netapp_login", self.login.as_deref()),
            ("netapp_password", self.password.as_deref()),
            ("netapp_server_hostname", self.server_hostname.as_deref()),
        ];
        for (flag, value) in required {
            if value.is_none_or(str::is_empty) {
                return Err(DriverError::Configuration(format!("{} is not set", flag)));
            }
        }
        if self.server_port == 0 {
            return Err(DriverError::Configuration(
                "netapp_server_port is not set".to_string(),
            ));
        }
        if self.storage_service.is_none() && self.storage_service_prefix.is_none() {
            return Err(DriverError::Configuration(
                "Either netapp_storage_service or netapp_storage_service_prefix must be set"
                    .to_string(),
            ));
        }
        if let Some(wsdl) = &self.wsdl_url {
            Url::parse(wsdl).map_err(|e| {
                DriverError::Configuration(format!("netapp_wsdl_url '{}' is invalid: {}", wsdl, e))
            })?;
        }
        Ok(())
    }

    /// The DFM server the wrapper connects to.
    pub fn endpoint(&self) -> Result<Endpoint> {
        let host = self
            .server_hostname
            .as_deref()
            .ok_or_else(|| DriverError::Configuration("netapp_server_hostname is not set".into()))?;
        Ok(Endpoint::new(host, self.server_port))
    }

    /// SOAP location for an endpoint, as the transport addresses it.
    pub fn soap_url(endpoint: &Endpoint) -> String {
        format!("http://{}/apis/soap/v1", endpoint)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retries)
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            monitor_interval: Duration::from_secs(self.monitor_interval_secs),
            job_timeout: Duration::from_secs(self.job_timeout_secs),
        }
    }
}

/// Workflow automation server settings for the C-mode driver
#[derive(Args, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WfaConfig {
    /// URL of the workflow automation WSDL; also names the server
    #[arg(long = "wfa-wsdl-url", env = "WFA_WSDL_URL")]
    pub wsdl_url: Option<String>,

    #[arg(long = "wfa-login", env = "WFA_LOGIN")]
    pub login: Option<String>,

    #[arg(long = "wfa-password", env = "WFA_PASSWORD")]
    pub password: Option<String>,

    #[arg(long = "wfa-retries", env = "WFA_RETRIES", default_value_t = 0)]
    pub retries: u32,

    /// Seconds between workflow job status checks
    #[arg(long = "wfa-poll-interval", default_value_t = 2)]
    pub poll_interval_secs: u64,

    /// Seconds to wait for any one workflow job
    #[arg(long = "wfa-job-timeout", default_value_t = 3600)]
    pub job_timeout_secs: u64,
}

impl Default for WfaConfig {
    fn default() -> Self {
        Self {
            wsdl_url: None,
            login: None,
            password: None,
            retries: 0,
            poll_interval_secs: 2,
            job_timeout_secs: 3600,
        }
    }
}

impl WfaConfig {
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("wfa_wsdl_url", self.wsdl_url.as_deref()),
            ("wfa_login", self.login.as_deref()),
            ("wfa_password", self.password.as_deref()),
        ];
        for (flag, value) in required {
            if value.is_none_or(str::is_empty) {
                return Err(DriverError::Configuration(format!("{} is not set", flag)));
            }
        }
        self.endpoint().map(|_| ())
    }

    /// Server named by the WSDL URL; the scheme's default port applies when
    /// the URL has none.
    pub fn endpoint(&self) -> Result<Endpoint> {
        let raw = self
            .wsdl_url
            .as_deref()
            .ok_or_else(|| DriverError::Configuration("wfa_wsdl_url is not set".into()))?;
        let url = Url::parse(raw).map_err(|e| {
            DriverError::Configuration(format!("wfa_wsdl_url '{}' is invalid: {}", raw, e))
        })?;
        let host = url.host_str().ok_or_else(|| {
            DriverError::Configuration(format!("wfa_wsdl_url '{}' has no host", raw))
        })?;
        let port = url.port_or_known_default().ok_or_else(|| {
            DriverError::Configuration(format!("wfa_wsdl_url '{}' has no port", raw))
        })?;
        Ok(Endpoint::new(host, port))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retries)
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            job_timeout: Duration::from_secs(self.job_timeout_secs),
            ..PollSettings::default()
        }
    }
}
