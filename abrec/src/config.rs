//! Process configuration: defaults, environment overrides, path resolution.

use std::path::PathBuf;
use std::time::Duration;

use capture::http::{DEFAULT_REFERER, DEFAULT_USER_AGENT};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {reason}")]
    Invalid { reason: String },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Per-variant unit of the shared download concurrency budget.
    pub worker_count: usize,
    pub refresh_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub user_agent: String,
    pub referer: String,
}

#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub enable_transfer: bool,
    pub output_path: PathBuf,
    pub username: String,
    pub password: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ProcessingConfig {
    pub enabled: bool,
    pub auto_process: bool,
    pub ffmpeg_path: String,
}

#[derive(Debug, Clone)]
pub struct TransferConfig {
    pub worker_count: usize,
    pub file_settling_delay: Duration,
    pub queue_size: usize,
}

#[derive(Debug, Clone)]
pub struct CleanupConfig {
    pub after_transfer: bool,
    pub batch_size: usize,
    pub retain_hours: u64,
}

#[derive(Debug, Clone)]
pub struct PathsConfig {
    pub local_output: PathBuf,
    pub process_output: PathBuf,
    pub manifest_dir: PathBuf,
    pub persistence_file: PathBuf,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub core: CoreConfig,
    pub http: HttpConfig,
    pub remote: RemoteConfig,
    pub processing: ProcessingConfig,
    pub transfer: TransferConfig,
    pub cleanup: CleanupConfig,
    pub paths: PathsConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            core: CoreConfig {
                worker_count: 4,
                refresh_delay: Duration::from_secs(3),
            },
            http: HttpConfig {
                user_agent: DEFAULT_USER_AGENT.to_string(),
                referer: DEFAULT_REFERER.to_string(),
            },
            remote: RemoteConfig {
                enable_transfer: true,
                output_path: PathBuf::new(),
                username: String::new(),
                password: String::new(),
                timeout: Duration::from_secs(30),
            },
            processing: ProcessingConfig {
                enabled: true,
                auto_process: true,
                ffmpeg_path: "ffmpeg".to_string(),
            },
            transfer: TransferConfig {
                worker_count: 2,
                file_settling_delay: Duration::from_secs(5),
                queue_size: 100_000,
            },
            cleanup: CleanupConfig {
                after_transfer: true,
                batch_size: 1000,
                retain_hours: 0,
            },
            paths: PathsConfig {
                local_output: "data".into(),
                process_output: "out".into(),
                manifest_dir: "data".into(),
                persistence_file: "transfer_queue.json".into(),
            },
        }
    }
}

impl AppConfig {
    /// Loads configuration once at startup: defaults, environment overrides,
    /// then path resolution and validation.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env(|name| std::env::var(name).ok());
        config.resolve_and_validate()?;
        Ok(config)
    }

    /// Applies environment overrides via a lookup function (injected so the
    /// override rules are testable without touching the process env).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(parsed) = lookup("WORKER_COUNT").and_then(|v| v.parse().ok()) {
            self.core.worker_count = parsed;
        }
        if let Some(parsed) = lookup("REFRESH_DELAY_SECONDS").and_then(|v| v.parse().ok()) {
            self.core.refresh_delay = Duration::from_secs(parsed);
        }
        if let Some(path) = lookup("NAS_OUTPUT_PATH").filter(|v| !v.is_empty()) {
            self.remote.output_path = path.into();
        }
        if let Some(user) = lookup("NAS_USERNAME").filter(|v| !v.is_empty()) {
            self.remote.username = user;
        }
        if let Some(password) = lookup("NAS_PASSWORD").filter(|v| !v.is_empty()) {
            self.remote.password = password;
        }
        if let Some(enabled) = lookup("ENABLE_NAS_TRANSFER").filter(|v| !v.is_empty()) {
            self.remote.enable_transfer = enabled == "true";
        }
        if let Some(dir) = lookup("LOCAL_OUTPUT_DIR").filter(|v| !v.is_empty()) {
            self.paths.local_output = PathBuf::from(&dir);
            self.paths.manifest_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("PROCESS_OUTPUT_DIR").filter(|v| !v.is_empty()) {
            self.paths.process_output = dir.into();
        }
        if let Some(path) = lookup("FFMPEG_PATH").filter(|v| !v.is_empty()) {
            self.processing.ffmpeg_path = path;
        }
    }

    /// Anchors relative paths at the working directory, creates the local
    /// roots, and rejects inconsistent settings.
    fn resolve_and_validate(&mut self) -> Result<(), ConfigError> {
        let cwd = std::env::current_dir()?;

        for path in [
            &mut self.paths.local_output,
            &mut self.paths.process_output,
            &mut self.paths.manifest_dir,
        ] {
            if path.is_relative() {
                *path = cwd.join(&*path);
            }
        }
        if self.paths.persistence_file.is_relative() {
            self.paths.persistence_file = self.paths.local_output.join(&self.paths.persistence_file);
        }

        std::fs::create_dir_all(&self.paths.local_output)?;
        std::fs::create_dir_all(&self.paths.process_output)?;
        std::fs::create_dir_all(&self.paths.manifest_dir)?;

        self.validate()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.remote.enable_transfer && self.remote.output_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid {
                reason: "NAS_OUTPUT_PATH is required when transfer is enabled".to_string(),
            });
        }
        if self.processing.enabled && self.processing.ffmpeg_path.is_empty() {
            return Err(ConfigError::Invalid {
                reason: "FFMPEG_PATH is required when processing is enabled".to_string(),
            });
        }
        if self.core.worker_count == 0 {
            return Err(ConfigError::Invalid {
                reason: "WORKER_COUNT must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn event_path(&self, event: &str) -> PathBuf {
        self.paths.local_output.join(event)
    }

    pub fn manifest_path(&self, event: &str) -> PathBuf {
        self.paths.manifest_dir.join(format!("{event}.json"))
    }

    pub fn remote_event_path(&self, event: &str) -> PathBuf {
        self.remote.output_path.join(event)
    }

    pub fn process_output_path(&self, event: &str) -> PathBuf {
        self.paths.process_output.join(event)
    }

    /// Maps the app-level knobs onto the transfer service's configuration.
    pub fn transfer_service_config(&self, event: &str) -> transfer::TransferServiceConfig {
        transfer::TransferServiceConfig {
            storage: transfer::StorageConfig {
                root: self.remote.output_path.clone(),
                username: self.remote.username.clone(),
                password: self.remote.password.clone(),
                verify_size: true,
            },
            queue: transfer::QueueConfig {
                worker_count: self.transfer.worker_count,
                persistence_path: self.paths.persistence_file.clone(),
                max_queue_size: self.transfer.queue_size,
                storage_timeout: self.remote.timeout,
            },
            cleanup: transfer::CleanupConfig {
                enabled: self.cleanup.after_transfer,
                retention_period: Duration::from_secs(self.cleanup.retain_hours * 3600),
                batch_size: self.cleanup.batch_size,
                check_interval: self.transfer.file_settling_delay,
            },
            watch_root: self.event_path(event),
            file_settling_delay: self.transfer.file_settling_delay,
        }
    }
}
