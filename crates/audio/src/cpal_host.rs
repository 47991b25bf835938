//! Audio-Host auf Basis von cpal
//!
//! `cpal::Stream` ist nicht `Send`. Jeder Ausgabestream lebt deshalb in
//! einem eigenen Thread, der ihn baut, startet und beim Stoppen wieder
//! freigibt. Der zurueckgegebene Handle ist nur ein Stopp-Signal.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use crossbeam_channel::{bounded, Sender};
use tracing::{debug, error, warn};

use crate::device::{
    AudioHost, OutputDevice, OutputStream, RenderCallback, SampleFormat, StreamConfig,
};
use crate::error::{AudioError, AudioResult};

/// Host fuer das Standard-Audio-Backend der Plattform
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalHost;

impl CpalHost {
    pub fn new() -> Self {
        Self
    }
}

fn cpal_format(format: SampleFormat) -> Option<cpal::SampleFormat> {
    match format {
        SampleFormat::F32 => Some(cpal::SampleFormat::F32),
        SampleFormat::I16 => Some(cpal::SampleFormat::I16),
        SampleFormat::I32 => Some(cpal::SampleFormat::I32),
        // cpal 0.15 kennt kein gepacktes 24-Bit-Ausgabeformat
        SampleFormat::I24 => None,
    }
}

fn geraet_laden(id: &str) -> AudioResult<cpal::Device> {
    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| AudioError::StreamFehler(e.to_string()))?;
    for device in devices {
        if let Ok(name) = device.name() {
            if name == id {
                return Ok(device);
            }
        }
    }
    Err(AudioError::GeraetNichtGefunden(id.to_string()))
}

impl AudioHost for CpalHost {
    fn name(&self) -> &str {
        "cpal"
    }

    fn devices(&self) -> AudioResult<Vec<OutputDevice>> {
        let host = cpal::default_host();
        let devices = host
            .devices()
            .map_err(|e| AudioError::StreamFehler(e.to_string()))?;

        let mut result = Vec::new();
        for device in devices {
            let name = match device.name() {
                Ok(n) => n,
                Err(e) => {
                    warn!(fehler = %e, "Geraetename konnte nicht gelesen werden");
                    continue;
                }
            };
            let (channels, sample_rate, output) = match device.default_output_config() {
                Ok(cfg) => (cfg.channels(), cfg.sample_rate().0, cfg.channels() > 0),
                Err(_) => (0, 0, false),
            };
            result.push(OutputDevice {
                id: name.clone(),
                name,
                channels,
                sample_rate,
                output,
            });
        }
        debug!(anzahl = result.len(), "cpal-Geraete gefunden");
        Ok(result)
    }

    fn probe(&self, device: &OutputDevice, config: &StreamConfig) -> AudioResult<()> {
        let format = cpal_format(config.format)
            .ok_or_else(|| AudioError::FormatNichtUnterstuetzt(config.format.to_string()))?;
        let geraet = geraet_laden(&device.id)?;
        let passend = geraet
            .supported_output_configs()
            .map_err(|e| AudioError::StreamFehler(e.to_string()))?
            .any(|c| {
                c.sample_format() == format
                    && c.channels() >= config.channels
                    && c.min_sample_rate().0 <= config.sample_rate
                    && c.max_sample_rate().0 >= config.sample_rate
            });
        if passend {
            Ok(())
        } else {
            Err(AudioError::FormatNichtUnterstuetzt(config.format.to_string()))
        }
    }

    fn open_output(
        &self,
        device: &OutputDevice,
        config: &StreamConfig,
        render: RenderCallback,
    ) -> AudioResult<Box<dyn OutputStream>> {
        let id = device.id.clone();
        let config = *config;
        let (bereit_tx, bereit_rx) = bounded::<AudioResult<()>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);

        std::thread::Builder::new()
            .name("roomcast-audio-out".to_string())
            .spawn(move || {
                let stream = match stream_oeffnen(&id, &config, render) {
                    Ok(s) => s,
                    Err(e) => {
                        let _ = bereit_tx.send(Err(e));
                        return;
                    }
                };
                let _ = bereit_tx.send(Ok(()));
                // Blockiert bis der Handle gestoppt oder gedroppt wird
                let _ = stop_rx.recv();
                drop(stream);
                debug!(geraet = %id, "cpal-Stream geschlossen");
            })
            .map_err(|e| AudioError::StreamFehler(e.to_string()))?;

        bereit_rx
            .recv()
            .map_err(|e| AudioError::StreamFehler(e.to_string()))??;

        Ok(Box::new(CpalStream {
            stop_tx: Some(stop_tx),
        }))
    }
}

fn stream_oeffnen(
    id: &str,
    config: &StreamConfig,
    render: RenderCallback,
) -> AudioResult<cpal::Stream> {
    let geraet = geraet_laden(id)?;
    let stream_config = cpal::StreamConfig {
        channels: config.channels,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let stream = match config.format {
        SampleFormat::F32 => stream_bauen::<f32>(&geraet, &stream_config, render)?,
        SampleFormat::I16 => stream_bauen::<i16>(&geraet, &stream_config, render)?,
        SampleFormat::I32 => stream_bauen::<i32>(&geraet, &stream_config, render)?,
        SampleFormat::I24 => {
            return Err(AudioError::FormatNichtUnterstuetzt(config.format.to_string()))
        }
    };

    stream
        .play()
        .map_err(|e| AudioError::StreamFehler(e.to_string()))?;
    debug!(
        geraet = %id,
        rate = config.sample_rate,
        kanaele = config.channels,
        format = %config.format,
        "Playback-Stream geoeffnet"
    );
    Ok(stream)
}

fn stream_bauen<T>(
    geraet: &cpal::Device,
    config: &cpal::StreamConfig,
    mut render: RenderCallback,
) -> AudioResult<cpal::Stream>
where
    T: SizedSample + FromSample<f32> + Send + 'static,
{
    let mut puffer: Vec<f32> = Vec::new();
    geraet
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                puffer.resize(data.len(), 0.0);
                render(&mut puffer);
                for (out, s) in data.iter_mut().zip(puffer.iter()) {
                    *out = T::from_sample(*s);
                }
            },
            |err| error!(fehler = %err, "Playback-Fehler"),
            None,
        )
        .map_err(|e| AudioError::StreamFehler(e.to_string()))
}

/// Handle auf einen Ausgabestream im Audio-Thread
struct CpalStream {
    stop_tx: Option<Sender<()>>,
}

impl OutputStream for CpalStream {
    fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceManager;
    use std::sync::Arc;

    #[test]
    fn i24_wird_nicht_abgebildet() {
        assert!(cpal_format(SampleFormat::I24).is_none());
        assert_eq!(cpal_format(SampleFormat::F32), Some(cpal::SampleFormat::F32));
    }

    #[test]
    #[ignore = "Benoetigt Audio-Hardware"]
    fn ausgabegeraete_auflistbar() {
        let manager = DeviceManager::new(Arc::new(CpalHost::new()));
        let devices = manager.list_output_devices().expect("Liste sollte abrufbar sein");
        println!(
            "Ausgabegeraete: {:?}",
            devices.iter().map(|d| &d.name).collect::<Vec<_>>()
        );
    }

    #[test]
    #[ignore = "Benoetigt Audio-Hardware"]
    fn ausgabe_initialisieren() {
        let manager = DeviceManager::new(Arc::new(CpalHost::new()));
        let wahl = manager.initialisieren(None, 48000, 1);
        assert!(wahl.is_ok(), "Ausgabe sollte initialisierbar sein");
    }
}
