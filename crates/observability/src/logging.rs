//! Structured Logging Setup via tracing-subscriber
//!
//! Konfigurierbar per Umgebungsvariable, die Vorrang vor der Konfiguration hat:
//! - `RC_LOG_LEVEL`: Filter-Direktive (z.B. `info` oder `roomcast_session=debug`)
//! - `RC_LOG_FORMAT`: Format (text/json)

use std::str::FromStr;

use tracing_subscriber::{fmt, EnvFilter};

pub const ENV_LOG_LEVEL: &str = "RC_LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "RC_LOG_FORMAT";

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum LoggingError {
    #[error("Unbekanntes Log-Format: {0}")]
    UnbekanntesFormat(String),

    #[error("Ungueltiger Log-Level: {0}")]
    UngueltigerLevel(String),
}

/// Ausgabeformat der Log-Zeilen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            anderes => Err(LoggingError::UnbekanntesFormat(anderes.to_string())),
        }
    }
}

/// Initialisiert das Logging-System
///
/// Ein ungueltiges Format aus der Umgebung faellt auf den Wert aus der
/// Konfiguration zurueck, ein ungueltiger Level auf `info`. Schlaegt fehl,
/// wenn bereits ein globaler Subscriber gesetzt ist.
pub fn logging_initialisieren(level: &str, format: &str) -> anyhow::Result<()> {
    let filter = filter_bauen(level);
    let format = format_waehlen(std::env::var(ENV_LOG_FORMAT).ok().as_deref(), format);

    match format {
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .with_current_span(true)
            .try_init()
            .map_err(|e| anyhow::anyhow!(e))?,
        LogFormat::Text => fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
            .map_err(|e| anyhow::anyhow!(e))?,
    }

    tracing::debug!(?format, "Logging initialisiert");
    Ok(())
}

fn filter_bauen(level: &str) -> EnvFilter {
    EnvFilter::try_from_env(ENV_LOG_LEVEL)
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Umgebung vor Konfiguration, beides ungueltig ergibt Text
fn format_waehlen(aus_env: Option<&str>, aus_config: &str) -> LogFormat {
    aus_env
        .and_then(|f| f.parse().ok())
        .or_else(|| aus_config.parse().ok())
        .unwrap_or_default()
}

/// Prueft einen einfachen Log-Level (ohne Ziel-Direktiven)
pub fn log_level_pruefen(level: &str) -> Result<(), LoggingError> {
    match level {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        anderes => Err(LoggingError::UngueltigerLevel(anderes.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_parsen() {
        assert_eq!("text".parse::<LogFormat>(), Ok(LogFormat::Text));
        assert_eq!("json".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!(
            "JSON".parse::<LogFormat>(),
            Err(LoggingError::UnbekanntesFormat("JSON".into()))
        );
    }

    #[test]
    fn format_umgebung_vor_konfiguration() {
        assert_eq!(format_waehlen(Some("json"), "text"), LogFormat::Json);
        assert_eq!(format_waehlen(Some("xml"), "json"), LogFormat::Json);
        assert_eq!(format_waehlen(None, "json"), LogFormat::Json);
        assert_eq!(format_waehlen(None, "xml"), LogFormat::Text);
    }

    #[test]
    fn log_level_gueltige_und_ungueltige_werte() {
        for level in ["trace", "debug", "info", "warn", "error"] {
            assert!(log_level_pruefen(level).is_ok());
        }
        assert!(log_level_pruefen("verbose").is_err());
        // Gross-/Kleinschreibung
        assert!(log_level_pruefen("INFO").is_err());
        assert!(log_level_pruefen("").is_err());
    }

    #[test]
    fn zweite_initialisierung_schlaegt_fehl() {
        // Erster Aufruf kann scheitern, falls ein anderer Test schon initialisiert hat
        let _ = logging_initialisieren("debug", "text");
        assert!(logging_initialisieren("debug", "json").is_err());
    }
}
