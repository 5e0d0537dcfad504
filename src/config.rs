//! Configuration for every component, resolved once at startup.
//!
//! Components never read the environment themselves; the binary calls
//! [`AppConfig::from_env`] and hands the pieces to the constructors.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::retry::RetryPolicy;

const DEFAULT_OUTPUT_DIR: &str = "./reports";
const DEFAULT_SUBJECT: &str = "Market Daily Wrap — {{DATE}}";
const DEFAULT_BODY: &str = "Attached is your daily market wrap for {{DATE}}.";
const DEFAULT_ATTACHMENT_NAME: &str = "Market_Wrap_{{DATE}}.pdf";
const DEFAULT_RUN_TIMEOUT_SECS: u64 = 600;

const DEFAULT_CONVERTER_PROGRAM: &str = "typst";
const DEFAULT_CONVERTER_ARGS: &str = "compile {input} {output}";
const DEFAULT_CONVERTER_TIMEOUT_SECS: u64 = 120;
const DEFAULT_CONVERTER_ATTEMPTS: u32 = 2;

const DEFAULT_SMTP_SERVER: &str = "smtp.gmail.com";
const DEFAULT_SMTP_PORT: u16 = 587;
const DEFAULT_SMTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SMTP_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration: {}", .0.join(", "))]
    Missing(Vec<String>),
    #[error("invalid value '{value}' for {var}: {reason}")]
    Invalid {
        var: String,
        value: String,
        reason: String,
    },
}

/// How the SMTP session is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsMode {
    #[default]
    StartTls,
    Tls,
    None,
}

impl FromStr for TlsMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "starttls" => Ok(Self::StartTls),
            "tls" | "ssl" => Ok(Self::Tls),
            "none" | "plain" => Ok(Self::None),
            other => Err(format!("unknown TLS mode '{other}' (expected starttls, tls or none)")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReportConfig {
    pub template_path: PathBuf,
    pub output_dir: PathBuf,
    pub keep_artifacts: bool,
    pub subject_template: String,
    pub body_template: String,
    pub attachment_name_template: String,
    pub run_timeout: Duration,
}

impl ReportConfig {
    pub fn new(template_path: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            template_path: template_path.into(),
            output_dir: output_dir.into(),
            keep_artifacts: true,
            subject_template: DEFAULT_SUBJECT.to_string(),
            body_template: DEFAULT_BODY.to_string(),
            attachment_name_template: DEFAULT_ATTACHMENT_NAME.to_string(),
            run_timeout: Duration::from_secs(DEFAULT_RUN_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConverterConfig {
    pub program: PathBuf,
    /// Arguments; `{input}` and `{output}` are substituted per call.
    pub args: Vec<String>,
    pub timeout: Duration,
    pub max_attempts: u32,
}

impl ConverterConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_secs(1))
    }
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from(DEFAULT_CONVERTER_PROGRAM),
            args: split_args(DEFAULT_CONVERTER_ARGS),
            timeout: Duration::from_secs(DEFAULT_CONVERTER_TIMEOUT_SECS),
            max_attempts: DEFAULT_CONVERTER_ATTEMPTS,
        }
    }
}

#[derive(Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub tls: TlsMode,
    pub username: String,
    pub password: String,
    pub timeout: Duration,
    pub max_attempts: u32,
}

impl SmtpConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_secs(2))
            .with_max_delay(Duration::from_secs(30))
    }
}

// Keeps the password out of logs.
impl fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("tls", &self.tls)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("timeout", &self.timeout)
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    pub sender: String,
    pub recipients: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub report: ReportConfig,
    pub converter: ConverterConfig,
    pub smtp: SmtpConfig,
    pub delivery: DeliveryConfig,
}

impl AppConfig {
    /// Load from the process environment, after reading `.env` if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup: &lookup };
        let mut missing = Vec::new();

        let template_path = vars.required("REPORT_TEMPLATE", &mut missing);
        let sender = vars.required("SENDER_EMAIL", &mut missing);
        let password = vars.required("SENDER_PASSWORD", &mut missing);
        let recipients = vars
            .required("RECIPIENT_EMAILS", &mut missing)
            .map(|raw| split_list(&raw))
            .unwrap_or_default();
        if recipients.is_empty() && !missing.iter().any(|name| name == "RECIPIENT_EMAILS") {
            missing.push("RECIPIENT_EMAILS".to_string());
        }

        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }
        let (Some(template_path), Some(sender), Some(password)) = (template_path, sender, password)
        else {
            return Err(ConfigError::Missing(missing));
        };

        let mut report = ReportConfig::new(
            template_path,
            vars.or("REPORT_OUTPUT_DIR", DEFAULT_OUTPUT_DIR),
        );
        report.keep_artifacts = vars.parse_bool("REPORT_KEEP_ARTIFACTS", true)?;
        report.subject_template = vars.or("REPORT_SUBJECT", DEFAULT_SUBJECT);
        report.body_template = vars.or("REPORT_BODY", DEFAULT_BODY);
        report.attachment_name_template =
            vars.or("REPORT_ATTACHMENT_NAME", DEFAULT_ATTACHMENT_NAME);
        report.run_timeout =
            Duration::from_secs(vars.parse("REPORT_RUN_TIMEOUT_SECS", DEFAULT_RUN_TIMEOUT_SECS)?);

        let converter = ConverterConfig {
            program: PathBuf::from(vars.or("CONVERTER_PROGRAM", DEFAULT_CONVERTER_PROGRAM)),
            args: split_args(&vars.or("CONVERTER_ARGS", DEFAULT_CONVERTER_ARGS)),
            timeout: Duration::from_secs(
                vars.parse("CONVERTER_TIMEOUT_SECS", DEFAULT_CONVERTER_TIMEOUT_SECS)?,
            ),
            max_attempts: vars.parse_attempts("CONVERTER_MAX_ATTEMPTS", DEFAULT_CONVERTER_ATTEMPTS)?,
        };
        if !converter.args.iter().any(|arg| arg.contains("{output}")) {
            return Err(ConfigError::Invalid {
                var: "CONVERTER_ARGS".to_string(),
                value: converter.args.join(" "),
                reason: "must contain the {output} placeholder".to_string(),
            });
        }

        let smtp = SmtpConfig {
            host: vars.or("SMTP_SERVER", DEFAULT_SMTP_SERVER),
            port: vars.parse("SMTP_PORT", DEFAULT_SMTP_PORT)?,
            tls: vars.parse("SMTP_TLS", TlsMode::default())?,
            username: sender.clone(),
            password,
            timeout: Duration::from_secs(vars.parse("SMTP_TIMEOUT_SECS", DEFAULT_SMTP_TIMEOUT_SECS)?),
            max_attempts: vars.parse_attempts("SMTP_MAX_ATTEMPTS", DEFAULT_SMTP_ATTEMPTS)?,
        };

        Ok(Self {
            report,
            converter,
            smtp,
            delivery: DeliveryConfig { sender, recipients },
        })
    }
}

struct Vars<'a, F: Fn(&str) -> Option<String>> {
    lookup: &'a F,
}

impl<F: Fn(&str) -> Option<String>> Vars<'_, F> {
    fn get(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn required(&self, name: &str, missing: &mut Vec<String>) -> Option<String> {
        let value = self.get(name);
        if value.is_none() {
            missing.push(name.to_string());
        }
        value
    }

    fn or(&self, name: &str, default: &str) -> String {
        self.get(name).unwrap_or_else(|| default.to_string())
    }

    fn parse<T>(&self, name: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.get(name) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|err: T::Err| ConfigError::Invalid {
                var: name.to_string(),
                reason: err.to_string(),
                value,
            }),
        }
    }

    fn parse_attempts(&self, name: &str, default: u32) -> Result<u32, ConfigError> {
        let attempts = self.parse(name, default)?;
        if attempts == 0 {
            return Err(ConfigError::Invalid {
                var: name.to_string(),
                value: "0".to_string(),
                reason: "at least one attempt is required".to_string(),
            });
        }
        Ok(attempts)
    }

    fn parse_bool(&self, name: &str, default: bool) -> Result<bool, ConfigError> {
        match self.get(name).map(|value| value.to_lowercase()) {
            None => Ok(default),
            Some(value) => match value.as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::Invalid {
                    var: name.to_string(),
                    value,
                    reason: "expected true or false".to_string(),
                }),
            },
        }
    }
}

fn split_args(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
