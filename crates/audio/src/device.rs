//! Ausgabegeraete: Enumeration, Auswahl und Format-Fallback
//!
//! Der eigentliche Treiber steckt hinter dem Trait [`AudioHost`]. Die
//! Auswahl-Logik im [`DeviceManager`] ist davon unabhaengig testbar.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{AudioError, AudioResult};

/// Repraesentiert ein Audio-Ausgabegeraet mit seinen Eigenschaften
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputDevice {
    /// Interner Bezeichner
    pub id: String,
    /// Anzeigename des Geraets
    pub name: String,
    /// Maximale Kanalanzahl
    pub channels: u16,
    /// Standard-Abtastrate
    pub sample_rate: u32,
    /// Ob das Geraet Audio ausgeben kann
    pub output: bool,
}

/// Sample-Format des Ausgabestreams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    F32,
    I16,
    I32,
    I24,
}

/// Reihenfolge, in der Formate probiert werden
pub const FORMAT_REIHENFOLGE: [SampleFormat; 4] = [
    SampleFormat::F32,
    SampleFormat::I16,
    SampleFormat::I32,
    SampleFormat::I24,
];

impl std::fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::F32 => "f32",
            Self::I16 => "i16",
            Self::I32 => "i32",
            Self::I24 => "i24",
        };
        f.write_str(s)
    }
}

/// Parameter eines Ausgabestreams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StreamConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SampleFormat,
}

/// Render-Callback: fuellt den uebergebenen Buffer mit verschraenkten `f32`
pub type RenderCallback = Box<dyn FnMut(&mut [f32]) + Send + 'static>;

/// Laufender Ausgabestream; Drop beendet die Wiedergabe
pub trait OutputStream: Send + Sync {
    fn stop(&mut self);
}

/// Audio-Treiber
pub trait AudioHost: Send + Sync {
    /// Name des Treibers (fuer Status-Ausgaben)
    fn name(&self) -> &str;

    /// Alle Geraete, auch solche ohne Ausgabe
    fn devices(&self) -> AudioResult<Vec<OutputDevice>>;

    /// Prueft ob ein Stream mit dieser Konfiguration geoeffnet werden kann
    fn probe(&self, device: &OutputDevice, config: &StreamConfig) -> AudioResult<()>;

    /// Oeffnet und startet einen Ausgabestream
    fn open_output(
        &self,
        device: &OutputDevice,
        config: &StreamConfig,
        render: RenderCallback,
    ) -> AudioResult<Box<dyn OutputStream>>;
}

/// Ergebnis einer erfolgreichen Initialisierung
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AusgabeWahl {
    pub device: OutputDevice,
    pub config: StreamConfig,
}

/// Auswahl und Validierung von Ausgabegeraeten
#[derive(Clone)]
pub struct DeviceManager {
    host: Arc<dyn AudioHost>,
}

impl DeviceManager {
    pub fn new(host: Arc<dyn AudioHost>) -> Self {
        Self { host }
    }

    pub fn host(&self) -> &Arc<dyn AudioHost> {
        &self.host
    }

    /// Listet alle Geraete mit Ausgabe-Faehigkeit auf
    pub fn list_output_devices(&self) -> AudioResult<Vec<OutputDevice>> {
        let geraete: Vec<OutputDevice> = self
            .host
            .devices()?
            .into_iter()
            .filter(|d| d.output)
            .collect();
        debug!(anzahl = geraete.len(), "Ausgabegeraete gefunden");
        Ok(geraete)
    }

    /// Waehlt ein Ausgabegeraet
    ///
    /// Ohne Wunsch wird das erste ausgabefaehige Geraet genommen. Ein
    /// gewuenschtes Geraet, das fehlt oder keine Ausgabe hat, fuehrt zu
    /// einer Warnung und automatischer Auswahl.
    pub fn select_output(&self, gewuenscht: Option<&str>) -> AudioResult<OutputDevice> {
        let alle = self.host.devices()?;

        if let Some(id) = gewuenscht {
            match alle.iter().find(|d| d.id == id) {
                Some(d) if d.output => {
                    info!(geraet = %d.name, "Ausgabegeraet validiert");
                    return Ok(d.clone());
                }
                Some(d) => {
                    warn!(geraet = %d.name, "Geraet hat keine Ausgabe, waehle automatisch")
                }
                None => warn!(geraet = %id, "Ungueltiges Ausgabegeraet, waehle automatisch"),
            }
        }

        let d = alle
            .into_iter()
            .find(|d| d.output)
            .ok_or(AudioError::KeinAusgabegeraet)?;
        info!(geraet = %d.name, id = %d.id, "Standard-Ausgabegeraet gewaehlt");
        Ok(d)
    }

    /// Waehlt Geraet und Format
    ///
    /// Probiert `f32`, dann `i16`, `i32` und `i24`. Scheitern alle, ist
    /// die Audio-Ausgabe nicht verfuegbar.
    pub fn initialisieren(
        &self,
        gewuenscht: Option<&str>,
        sample_rate: u32,
        channels: u16,
    ) -> AudioResult<AusgabeWahl> {
        let device = self
            .select_output(gewuenscht)
            .map_err(|e| AudioError::DeviceUnavailable(e.to_string()))?;

        for format in FORMAT_REIHENFOLGE {
            let config = StreamConfig {
                sample_rate,
                channels,
                format,
            };
            match self.host.probe(&device, &config) {
                Ok(()) => {
                    info!(geraet = %device.name, %format, "Audio-Ausgabe initialisiert");
                    return Ok(AusgabeWahl { device, config });
                }
                Err(e) => debug!(%format, fehler = %e, "Format nicht nutzbar"),
            }
        }

        warn!(geraet = %device.name, "Alle Audio-Formate fehlgeschlagen, Wiedergabe nicht verfuegbar");
        Err(AudioError::DeviceUnavailable(format!(
            "kein nutzbares Format fuer {}",
            device.name
        )))
    }
}

// ---------------------------------------------------------------------------
// Host ohne Geraete
// ---------------------------------------------------------------------------

/// Host ohne Geraete, z.B. fuer Headless-Server
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHost;

impl AudioHost for NullHost {
    fn name(&self) -> &str {
        "null"
    }

    fn devices(&self) -> AudioResult<Vec<OutputDevice>> {
        Ok(Vec::new())
    }

    fn probe(&self, _device: &OutputDevice, _config: &StreamConfig) -> AudioResult<()> {
        Err(AudioError::KeinAusgabegeraet)
    }

    fn open_output(
        &self,
        _device: &OutputDevice,
        _config: &StreamConfig,
        _render: RenderCallback,
    ) -> AudioResult<Box<dyn OutputStream>> {
        Err(AudioError::KeinAusgabegeraet)
    }
}


#[cfg(test)]
mod tests {
    use super::testhost::{geraet, TestHost};
    use super::*;

    fn manager(geraete: Vec<OutputDevice>, formate: Vec<SampleFormat>) -> DeviceManager {
        DeviceManager::new(Arc::new(TestHost::new(geraete, formate)))
    }

    #[test]
    fn ohne_wunsch_erstes_ausgabegeraet() {
        let m = manager(
            vec![geraet("mic", false), geraet("a", true), geraet("b", true)],
            vec![SampleFormat::F32],
        );
        assert_eq!(m.select_output(None).unwrap().id, "a");
        assert_eq!(m.list_output_devices().unwrap().len(), 2);
    }

    #[test]
    fn gewuenschtes_geraet_wird_validiert() {
        let m = manager(
            vec![geraet("mic", false), geraet("a", true), geraet("b", true)],
            vec![SampleFormat::F32],
        );
        assert_eq!(m.select_output(Some("b")).unwrap().id, "b");
        // Kein Ausgabegeraet -> automatische Auswahl
        assert_eq!(m.select_output(Some("mic")).unwrap().id, "a");
        // Unbekannt -> automatische Auswahl
        assert_eq!(m.select_output(Some("gibtsnicht")).unwrap().id, "a");
    }

    #[test]
    fn keine_geraete_ist_fehler() {
        let m = manager(vec![geraet("mic", false)], vec![SampleFormat::F32]);
        assert!(matches!(
            m.select_output(None),
            Err(AudioError::KeinAusgabegeraet)
        ));
        assert!(matches!(
            m.initialisieren(None, 48000, 1),
            Err(AudioError::DeviceUnavailable(_))
        ));
    }

    #[test]
    fn format_fallback_reihenfolge() {
        let m = manager(vec![geraet("a", true)], vec![SampleFormat::I32, SampleFormat::I16]);
        let wahl = m.initialisieren(None, 48000, 1).unwrap();
        assert_eq!(wahl.config.format, SampleFormat::I16);

        let m = manager(vec![geraet("a", true)], vec![SampleFormat::I24]);
        let wahl = m.initialisieren(None, 44100, 2).unwrap();
        assert_eq!(wahl.config.format, SampleFormat::I24);
        assert_eq!(wahl.config.sample_rate, 44100);
    }

    #[test]
    fn alle_formate_scheitern() {
        let m = manager(vec![geraet("a", true)], vec![]);
        assert!(matches!(
            m.initialisieren(None, 48000, 1),
            Err(AudioError::DeviceUnavailable(_))
        ));
    }

    #[test]
    fn null_host_hat_keine_ausgabe() {
        let m = DeviceManager::new(Arc::new(NullHost));
        assert!(m.list_output_devices().unwrap().is_empty());
        assert!(m.initialisieren(None, 48000, 1).is_err());
    }
}
