use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub gateway: GatewayConfig,
    pub llm: LlmConfig,
    pub calendar: CalendarConfig,
    pub reminder: ReminderConfig,
    pub buffer: BufferConfig,
    pub queue: QueueConfig,
    pub agent: AgentConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

/// Outbound chat gateway (WhatsApp-style HTTP API).
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub base_url: String,
    pub api_key: SecretString,
    pub instance: String,
    /// Clinic staff number alerted on handoffs and new bookings.
    pub admin_number: Option<String>,
    /// Paragraphs longer than this are re-split at sentence boundaries.
    pub chunk_threshold: usize,
    pub typing_delay_ms_per_char: u64,
    pub typing_delay_cap_ms: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub embedding_model: String,
    pub transcription_model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Clone, Debug)]
pub struct CalendarConfig {
    pub base_url: String,
    pub api_token: Option<SecretString>,
    pub timezone: String,
}

/// Third-party reminder scheduler fired before each booking.
#[derive(Clone, Debug)]
pub struct ReminderConfig {
    pub enabled: bool,
    pub base_url: Option<String>,
    pub api_token: Option<SecretString>,
    /// Where the scheduler posts back when a reminder fires.
    pub webhook_url: Option<String>,
    pub lead_time_hours: u64,
}

#[derive(Clone, Debug)]
pub struct BufferConfig {
    /// Quiet period after the last fragment before a turn is flushed.
    pub idle_window_secs: u64,
}

#[derive(Clone, Debug)]
pub struct QueueConfig {
    pub worker_count: u32,
    pub max_retries: u32,
    pub retry_backoff_secs: u64,
    pub processing_timeout_secs: u64,
    pub poll_interval_ms: u64,
}

#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub history_limit: u32,
    pub max_tool_rounds: u32,
    pub receptionist_prompt: String,
    pub orchestrator_prompt: String,
    pub rag_prompt: String,
    pub scheduling_prompt: String,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    OpenAi,
    Anthropic,
    Ollama,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub gateway_base_url: Option<String>,
    pub gateway_api_key: Option<String>,
    pub idle_window_secs: Option<u64>,
    pub worker_count: Option<u32>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://recepta.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            gateway: GatewayConfig {
                base_url: String::new(),
                api_key: String::new().into(),
                instance: "clinic".to_string(),
                admin_number: None,
                chunk_threshold: 300,
                typing_delay_ms_per_char: 30,
                typing_delay_cap_ms: 3_000,
            },
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some("http://localhost:11434".to_string()),
                model: "llama3.1".to_string(),
                embedding_model: "text-embedding-3-small".to_string(),
                transcription_model: "whisper-1".to_string(),
                timeout_secs: 60,
                max_retries: 2,
            },
            calendar: CalendarConfig {
                base_url: "https://www.googleapis.com/calendar/v3".to_string(),
                api_token: None,
                timezone: "America/Sao_Paulo".to_string(),
            },
            reminder: ReminderConfig {
                enabled: false,
                base_url: None,
                api_token: None,
                webhook_url: None,
                lead_time_hours: 2,
            },
            buffer: BufferConfig { idle_window_secs: 8 },
            queue: QueueConfig {
                worker_count: 2,
                max_retries: 3,
                retry_backoff_secs: 5,
                processing_timeout_secs: 120,
                poll_interval_ms: 500,
            },
            agent: AgentConfig {
                history_limit: 20,
                max_tool_rounds: 8,
                receptionist_prompt: "You are the clinic receptionist. Collect the patient's full name, document, and insurance, then complete the registration.".to_string(),
                orchestrator_prompt: "Classify the patient's request as rag, scheduling, or human.".to_string(),
                rag_prompt: "Answer questions about the clinic using only the knowledge base.".to_string(),
                scheduling_prompt: "Help the patient book, rebook, or cancel appointments.".to_string(),
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|anthropic|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("recepta.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(gateway) = patch.gateway {
            if let Some(base_url) = gateway.base_url {
                self.gateway.base_url = base_url;
            }
            if let Some(api_key_value) = gateway.api_key {
                self.gateway.api_key = secret_value(api_key_value);
            }
            if let Some(instance) = gateway.instance {
                self.gateway.instance = instance;
            }
            if let Some(admin_number) = gateway.admin_number {
                self.gateway.admin_number = Some(admin_number);
            }
            if let Some(chunk_threshold) = gateway.chunk_threshold {
                self.gateway.chunk_threshold = chunk_threshold;
            }
            if let Some(per_char) = gateway.typing_delay_ms_per_char {
                self.gateway.typing_delay_ms_per_char = per_char;
            }
            if let Some(cap) = gateway.typing_delay_cap_ms {
                self.gateway.typing_delay_cap_ms = cap;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(embedding_model) = llm.embedding_model {
                self.llm.embedding_model = embedding_model;
            }
            if let Some(transcription_model) = llm.transcription_model {
                self.llm.transcription_model = transcription_model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
        }

        if let Some(calendar) = patch.calendar {
            if let Some(base_url) = calendar.base_url {
                self.calendar.base_url = base_url;
            }
            if let Some(api_token_value) = calendar.api_token {
                self.calendar.api_token = Some(secret_value(api_token_value));
            }
            if let Some(timezone) = calendar.timezone {
                self.calendar.timezone = timezone;
            }
        }

        if let Some(reminder) = patch.reminder {
            if let Some(enabled) = reminder.enabled {
                self.reminder.enabled = enabled;
            }
            if let Some(base_url) = reminder.base_url {
                self.reminder.base_url = Some(base_url);
            }
            if let Some(api_token_value) = reminder.api_token {
                self.reminder.api_token = Some(secret_value(api_token_value));
            }
            if let Some(webhook_url) = reminder.webhook_url {
                self.reminder.webhook_url = Some(webhook_url);
            }
            if let Some(lead_time_hours) = reminder.lead_time_hours {
                self.reminder.lead_time_hours = lead_time_hours;
            }
        }

        if let Some(buffer) = patch.buffer {
            if let Some(idle_window_secs) = buffer.idle_window_secs {
                self.buffer.idle_window_secs = idle_window_secs;
            }
        }

        if let Some(queue) = patch.queue {
            if let Some(worker_count) = queue.worker_count {
                self.queue.worker_count = worker_count;
            }
            if let Some(max_retries) = queue.max_retries {
                self.queue.max_retries = max_retries;
            }
            if let Some(retry_backoff_secs) = queue.retry_backoff_secs {
                self.queue.retry_backoff_secs = retry_backoff_secs;
            }
            if let Some(processing_timeout_secs) = queue.processing_timeout_secs {
                self.queue.processing_timeout_secs = processing_timeout_secs;
            }
            if let Some(poll_interval_ms) = queue.poll_interval_ms {
                self.queue.poll_interval_ms = poll_interval_ms;
            }
        }

        if let Some(agent) = patch.agent {
            if let Some(history_limit) = agent.history_limit {
                self.agent.history_limit = history_limit;
            }
            if let Some(max_tool_rounds) = agent.max_tool_rounds {
                self.agent.max_tool_rounds = max_tool_rounds;
            }
            if let Some(receptionist_prompt) = agent.receptionist_prompt {
                self.agent.receptionist_prompt = receptionist_prompt;
            }
            if let Some(orchestrator_prompt) = agent.orchestrator_prompt {
                self.agent.orchestrator_prompt = orchestrator_prompt;
            }
            if let Some(rag_prompt) = agent.rag_prompt {
                self.agent.rag_prompt = rag_prompt;
            }
            if let Some(scheduling_prompt) = agent.scheduling_prompt {
                self.agent.scheduling_prompt = scheduling_prompt;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("RECEPTA_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("RECEPTA_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("RECEPTA_DATABASE_MAX_CONNECTIONS", &value)?;
        }

        if let Some(value) = read_env("RECEPTA_GATEWAY_BASE_URL") {
            self.gateway.base_url = value;
        }
        if let Some(value) = read_env("RECEPTA_GATEWAY_API_KEY") {
            self.gateway.api_key = secret_value(value);
        }
        if let Some(value) = read_env("RECEPTA_GATEWAY_INSTANCE") {
            self.gateway.instance = value;
        }
        if let Some(value) = read_env("RECEPTA_GATEWAY_ADMIN_NUMBER") {
            self.gateway.admin_number = Some(value);
        }

        if let Some(value) = read_env("RECEPTA_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("RECEPTA_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("RECEPTA_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("RECEPTA_LLM_MODEL") {
            self.llm.model = value;
        }

        if let Some(value) = read_env("RECEPTA_CALENDAR_API_TOKEN") {
            self.calendar.api_token = Some(secret_value(value));
        }

        if let Some(value) = read_env("RECEPTA_REMINDER_BASE_URL") {
            self.reminder.enabled = true;
            self.reminder.base_url = Some(value);
        }
        if let Some(value) = read_env("RECEPTA_REMINDER_API_TOKEN") {
            self.reminder.api_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("RECEPTA_REMINDER_WEBHOOK_URL") {
            self.reminder.webhook_url = Some(value);
        }

        if let Some(value) = read_env("RECEPTA_BUFFER_IDLE_WINDOW_SECS") {
            self.buffer.idle_window_secs = parse_u64("RECEPTA_BUFFER_IDLE_WINDOW_SECS", &value)?;
        }
        if let Some(value) = read_env("RECEPTA_QUEUE_WORKER_COUNT") {
            self.queue.worker_count = parse_u32("RECEPTA_QUEUE_WORKER_COUNT", &value)?;
        }

        if let Some(value) = read_env("RECEPTA_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("RECEPTA_SERVER_PORT") {
            self.server.port = parse_u16("RECEPTA_SERVER_PORT", &value)?;
        }

        let log_level = read_env("RECEPTA_LOGGING_LEVEL").or_else(|| read_env("RECEPTA_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("RECEPTA_LOGGING_FORMAT").or_else(|| read_env("RECEPTA_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(gateway_base_url) = overrides.gateway_base_url {
            self.gateway.base_url = gateway_base_url;
        }
        if let Some(gateway_api_key) = overrides.gateway_api_key {
            self.gateway.api_key = secret_value(gateway_api_key);
        }
        if let Some(idle_window_secs) = overrides.idle_window_secs {
            self.buffer.idle_window_secs = idle_window_secs;
        }
        if let Some(worker_count) = overrides.worker_count {
            self.queue.worker_count = worker_count;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_gateway(&self.gateway)?;
        validate_llm(&self.llm)?;
        validate_reminder(&self.reminder)?;
        validate_buffer(&self.buffer)?;
        validate_queue(&self.queue)?;
        validate_agent(&self.agent)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("recepta.toml"), PathBuf::from("config/recepta.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_gateway(gateway: &GatewayConfig) -> Result<(), ConfigError> {
    if gateway.base_url.trim().is_empty() {
        return Err(ConfigError::Validation("gateway.base_url is required".to_string()));
    }
    if gateway.api_key.expose_secret().is_empty() {
        return Err(ConfigError::Validation("gateway.api_key is required".to_string()));
    }
    if gateway.instance.trim().is_empty() {
        return Err(ConfigError::Validation("gateway.instance is required".to_string()));
    }
    if gateway.chunk_threshold == 0 {
        return Err(ConfigError::Validation(
            "gateway.chunk_threshold must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation("llm.timeout_secs must be in range 1..=300".to_string()));
    }

    match llm.provider {
        LlmProvider::OpenAi | LlmProvider::Anthropic => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for openai/anthropic providers".to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {
            let missing =
                llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for ollama provider".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn validate_reminder(reminder: &ReminderConfig) -> Result<(), ConfigError> {
    if !reminder.enabled {
        return Ok(());
    }
    let base_missing = reminder.base_url.as_ref().map(|v| v.trim().is_empty()).unwrap_or(true);
    if base_missing {
        return Err(ConfigError::Validation(
            "reminder.base_url is required when reminders are enabled".to_string(),
        ));
    }
    let webhook_missing =
        reminder.webhook_url.as_ref().map(|v| v.trim().is_empty()).unwrap_or(true);
    if webhook_missing {
        return Err(ConfigError::Validation(
            "reminder.webhook_url is required when reminders are enabled".to_string(),
        ));
    }
    Ok(())
}

fn validate_buffer(buffer: &BufferConfig) -> Result<(), ConfigError> {
    if buffer.idle_window_secs == 0 || buffer.idle_window_secs > 600 {
        return Err(ConfigError::Validation(
            "buffer.idle_window_secs must be in range 1..=600".to_string(),
        ));
    }
    Ok(())
}

fn validate_queue(queue: &QueueConfig) -> Result<(), ConfigError> {
    if queue.worker_count == 0 {
        return Err(ConfigError::Validation(
            "queue.worker_count must be greater than zero".to_string(),
        ));
    }
    if queue.max_retries > 20 {
        return Err(ConfigError::Validation("queue.max_retries must be at most 20".to_string()));
    }
    if queue.processing_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "queue.processing_timeout_secs must be greater than zero".to_string(),
        ));
    }
    if queue.poll_interval_ms == 0 {
        return Err(ConfigError::Validation(
            "queue.poll_interval_ms must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_agent(agent: &AgentConfig) -> Result<(), ConfigError> {
    if agent.history_limit == 0 {
        return Err(ConfigError::Validation(
            "agent.history_limit must be greater than zero".to_string(),
        ));
    }
    if agent.max_tool_rounds == 0 || agent.max_tool_rounds > 32 {
        return Err(ConfigError::Validation(
            "agent.max_tool_rounds must be in range 1..=32".to_string(),
        ));
    }
    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.bind_address.trim().is_empty() {
        return Err(ConfigError::Validation("server.bind_address is required".to_string()));
    }
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
    if !LEVELS.contains(&logging.level.to_ascii_lowercase().as_str()) {
        return Err(ConfigError::Validation(format!(
            "logging.level must be one of {LEVELS:?}, got `{}`",
            logging.level
        )));
    }
    Ok(())
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    gateway: Option<GatewayPatch>,
    llm: Option<LlmPatch>,
    calendar: Option<CalendarPatch>,
    reminder: Option<ReminderPatch>,
    buffer: Option<BufferPatch>,
    queue: Option<QueuePatch>,
    agent: Option<AgentPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct GatewayPatch {
    base_url: Option<String>,
    api_key: Option<String>,
    instance: Option<String>,
    admin_number: Option<String>,
    chunk_threshold: Option<usize>,
    typing_delay_ms_per_char: Option<u64>,
    typing_delay_cap_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    embedding_model: Option<String>,
    transcription_model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct CalendarPatch {
    base_url: Option<String>,
    api_token: Option<String>,
    timezone: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReminderPatch {
    enabled: Option<bool>,
    base_url: Option<String>,
    api_token: Option<String>,
    webhook_url: Option<String>,
    lead_time_hours: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct BufferPatch {
    idle_window_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct QueuePatch {
    worker_count: Option<u32>,
    max_retries: Option<u32>,
    retry_backoff_secs: Option<u64>,
    processing_timeout_secs: Option<u64>,
    poll_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct AgentPatch {
    history_limit: Option<u32>,
    max_tool_rounds: Option<u32>,
    receptionist_prompt: Option<String>,
    orchestrator_prompt: Option<String>,
    rag_prompt: Option<String>,
    scheduling_prompt: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    fn valid_overrides() -> ConfigOverrides {
        ConfigOverrides {
            database_url: Some("sqlite::memory:".to_string()),
            gateway_base_url: Some("http://gateway.local".to_string()),
            gateway_api_key: Some("key-123".to_string()),
            ..ConfigOverrides::default()
        }
    }

    #[test]
    fn defaults_pass_validation_once_gateway_is_set() {
        let config = AppConfig::load(LoadOptions {
            overrides: valid_overrides(),
            ..LoadOptions::default()
        })
        .expect("load config");

        assert_eq!(config.buffer.idle_window_secs, 8);
        assert_eq!(config.queue.worker_count, 2);
        assert_eq!(config.agent.max_tool_rounds, 8);
        assert_eq!(config.reminder.lead_time_hours, 2);
        assert_eq!(config.logging.format, LogFormat::Compact);
    }

    #[test]
    fn missing_gateway_key_fails_validation() {
        let result = AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                gateway_base_url: Some("http://gateway.local".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        });

        let message = result.err().expect("should fail").to_string();
        assert!(message.contains("gateway.api_key"));
    }

    #[test]
    fn zero_idle_window_is_rejected() {
        let result = AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                idle_window_secs: Some(0),
                ..valid_overrides()
            },
            ..LoadOptions::default()
        });

        let message = result.err().expect("should fail").to_string();
        assert!(message.contains("buffer.idle_window_secs"));
    }

    #[test]
    fn toml_file_patch_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            r#"
[database]
url = "sqlite::memory:"

[gateway]
base_url = "http://gateway.local"
api_key = "key-from-file"
admin_number = "5599000000000"

[buffer]
idle_window_secs = 12

[queue]
worker_count = 4

[logging]
format = "json"
"#
        )
        .expect("write config");

        let config = AppConfig::load(LoadOptions {
            config_path: Some(file.path().to_path_buf()),
            require_file: true,
            overrides: ConfigOverrides::default(),
        })
        .expect("load config from file");

        assert_eq!(config.buffer.idle_window_secs, 12);
        assert_eq!(config.queue.worker_count, 4);
        assert_eq!(config.gateway.admin_number.as_deref(), Some("5599000000000"));
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn missing_required_file_is_reported() {
        let result = AppConfig::load(LoadOptions {
            config_path: Some("does/not/exist.toml".into()),
            require_file: true,
            overrides: valid_overrides(),
        });

        assert!(matches!(result, Err(ConfigError::MissingConfigFile(_))));
    }

    #[test]
    fn env_interpolation_requires_closing_brace() {
        let error = super::interpolate_env_vars("key = \"${UNTERMINATED").expect_err("must fail");
        assert!(matches!(error, ConfigError::UnterminatedInterpolation));
    }
}
