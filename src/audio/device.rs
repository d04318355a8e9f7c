//! Input device enumeration and selection via CPAL.

use crate::error::{NotulaError, Result};
use cpal::traits::{DeviceTrait, HostTrait};

/// Run a closure with stderr temporarily redirected to /dev/null.
///
/// Suppresses noisy ALSA/JACK/PipeWire messages that CPAL triggers while
/// probing audio backends. The messages are harmless but confusing.
///
/// # Safety
/// Uses `libc::dup`/`libc::dup2` to save and restore file descriptor 2.
/// Safe as long as no other thread is concurrently manipulating fd 2.
pub(crate) fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    unsafe {
        let saved_fd = libc::dup(2);
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
        if saved_fd >= 0 && devnull >= 0 {
            libc::dup2(devnull, 2);
            libc::close(devnull);
        }

        let result = f();

        if saved_fd >= 0 {
            libc::dup2(saved_fd, 2);
            libc::close(saved_fd);
        }

        result
    }
}

/// Description of one usable audio input device.
#[derive(Debug, Clone, PartialEq)]
pub struct InputDevice {
    /// Position in the enumeration order.
    pub id: usize,
    /// Backend-reported device name; used to select the device in config.
    pub name: String,
    /// Maximum input channel count.
    pub channels: u16,
    /// Default sample rate reported by the device.
    pub sample_rate: u32,
}

/// List all audio input devices that can deliver at least one channel.
///
/// # Errors
/// Returns `NotulaError::AudioCapture` if device enumeration fails.
pub fn list_input_devices() -> Result<Vec<InputDevice>> {
    let (host, devices) = with_suppressed_stderr(|| {
        let host = cpal::default_host();
        let devices = host.input_devices();
        (host, devices)
    });
    let _ = host; // keep host alive while iterating devices
    let devices = devices.map_err(|e| NotulaError::AudioCapture {
        message: format!("Failed to enumerate input devices: {}", e),
    })?;

    let mut found = Vec::new();
    for (id, device) in devices.enumerate() {
        let Ok(name) = device.name() else {
            continue;
        };
        if let Ok(config) = device.default_input_config() {
            found.push(InputDevice {
                id,
                name,
                channels: config.channels(),
                sample_rate: config.sample_rate().0,
            });
        }
    }

    Ok(found)
}

/// Resolve an input device by name, or the system default when `None`.
///
/// # Errors
/// Returns `NotulaError::AudioDeviceNotFound` when no matching device (or
/// no default device) exists.
pub fn find_input_device(name: Option<&str>) -> Result<cpal::Device> {
    with_suppressed_stderr(|| {
        let host = cpal::default_host();

        if let Some(wanted) = name {
            let devices = host.input_devices().map_err(|e| NotulaError::AudioCapture {
                message: format!("Failed to enumerate devices: {}", e),
            })?;

            for device in devices {
                if let Ok(device_name) = device.name()
                    && device_name == wanted
                {
                    return Ok(device);
                }
            }

            Err(NotulaError::AudioDeviceNotFound {
                device: wanted.to_string(),
            })
        } else {
            host.default_input_device()
                .ok_or_else(|| NotulaError::AudioDeviceNotFound {
                    device: "default".to_string(),
                })
        }
    })
}

/// Check whether the named device (or the default) can actually open a
/// stream at its default configuration.
pub fn test_device(name: Option<&str>) -> bool {
    fn probe(name: Option<&str>) -> Result<()> {
        use cpal::traits::StreamTrait;

        let device = find_input_device(name)?;
        let config = device
            .default_input_config()
            .map_err(|e| NotulaError::AudioCapture {
                message: format!("Failed to query default input config: {}", e),
            })?;

        let stream = device
            .build_input_stream(
                &config.into(),
                |_data: &[f32], _: &cpal::InputCallbackInfo| {},
                |_err| {},
                None,
            )
            .map_err(|e| NotulaError::AudioCapture {
                message: format!("Failed to open test stream: {}", e),
            })?;
        stream.play().map_err(|e| NotulaError::AudioCapture {
            message: format!("Failed to start test stream: {}", e),
        })?;
        std::thread::sleep(std::time::Duration::from_millis(100));
        Ok(())
    }

    probe(name).is_ok()
}
