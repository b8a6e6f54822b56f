use crate::error::{CameraError, CameraResult};
use crate::types::{CameraDescriptor, CameraType, PresetDescriptor};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

fn default_camera_type() -> CameraType {
    CameraType::AverPtzapp
}

fn default_visca_address() -> u8 {
    1
}

fn default_slew_velocity() -> u8 {
    10
}

fn default_max_preset() -> u32 {
    9
}

/// One entry of `cam_selectors`.
#[derive(Debug, Clone, Deserialize)]
pub struct CameraSelector {
    pub name: String,
    #[serde(rename = "serialnumber", default)]
    pub serial: String,
    #[serde(rename = "type", default = "default_camera_type")]
    pub camera_type: CameraType,
    #[serde(default = "default_visca_address")]
    pub address: u8,
    #[serde(default = "default_slew_velocity")]
    pub slew_velocity: u8,
    #[serde(default = "default_max_preset")]
    pub max_preset: u32,
}

/// Camera roster file, shared with the browser pages that predate the dock.
#[derive(Debug, Clone, Deserialize)]
pub struct CameraRoster {
    /// PTZApp server for `aver_ptzapp` cameras.
    pub cam_address: Option<String>,
    /// VISCA bridge for `visca_*` cameras.
    pub visca_server_address: Option<String>,
    #[serde(default)]
    pub cam_selectors: Vec<CameraSelector>,
    #[serde(default)]
    pub cam_presets: Vec<PresetDescriptor>,
}

impl CameraRoster {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read camera roster {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid camera roster {}", path.display()))
    }

    /// Accepts plain JSON as well as the `cam_data = {...};` script form,
    /// including trailing commas.
    pub fn parse(text: &str) -> Result<Self> {
        let body = unwrap_script(text);
        let json = strip_trailing_commas(body);
        let roster = serde_json::from_str(&json).context("failed to parse camera roster JSON")?;
        Ok(roster)
    }

    /// Resolve selectors into descriptors; index follows selector order.
    pub fn descriptors(&self) -> CameraResult<Vec<CameraDescriptor>> {
        self.cam_selectors
            .iter()
            .enumerate()
            .map(|(index, selector)| {
                let backend_address = match selector.camera_type {
                    CameraType::AverPtzapp => self.cam_address.clone(),
                    CameraType::ViscaJog | CameraType::ViscaJoystick => {
                        self.visca_server_address.clone()
                    }
                }
                .ok_or_else(|| {
                    CameraError::sequence(format!(
                        "no server address configured for {} camera {}",
                        selector.camera_type.backend_kind(),
                        selector.name
                    ))
                })?;

                Ok(CameraDescriptor {
                    index,
                    name: selector.name.clone(),
                    camera_type: selector.camera_type,
                    backend_address,
                    serial: selector.serial.clone(),
                    visca_address: selector.address,
                    max_preset: selector.max_preset,
                    slew_velocity: selector.slew_velocity,
                })
            })
            .collect()
    }

    pub fn presets_for(&self, camera_name: &str) -> Vec<PresetDescriptor> {
        self.cam_presets
            .iter()
            .filter(|p| p.camera == camera_name)
            .cloned()
            .collect()
    }
}

fn unwrap_script(text: &str) -> &str {
    let trimmed = text.trim();
    let body = match (trimmed.starts_with('{'), trimmed.find('=')) {
        (false, Some(eq)) => &trimmed[eq + 1..],
        _ => trimmed,
    };
    body.trim().trim_end_matches(';').trim_end()
}

/// Drop commas that directly precede `]` or `}`, outside of strings.
fn strip_trailing_commas(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut pending_comma: Option<String> = None;

    for ch in text.chars() {
        if in_string {
            out.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        if let Some(held) = pending_comma.as_mut() {
            if ch.is_whitespace() {
                held.push(ch);
                continue;
            }
            let held = pending_comma.take().unwrap_or_default();
            if ch == ']' || ch == '}' {
                out.push_str(&held[1..]);
            } else {
                out.push_str(&held);
            }
        }

        match ch {
            ',' => pending_comma = Some(String::from(",")),
            '"' => {
                in_string = true;
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }

    if let Some(held) = pending_comma {
        out.push_str(&held);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SCRIPT_ROSTER: &str = r#"cam_data=
{
"cam_address": "127.0.0.1:36680",
"visca_server_address": "127.0.0.1:8080",

"cam_selectors": [
    {"name" : "Cam1",
     "serialnumber" : "0",
     "type" : "visca_joystick",
     "address" : 1,
     "slew_velocity" : 10,
     "max_preset" : 15},
    {"name" : "Cam2",
     "serialnumber" : "5309115900007"},
  ],

"cam_presets": [
   {"name" : "Home, left",
    "camera" : "Cam1",
    "preset" : "1"},
   {"name" : "Center",
    "camera" : "Cam2",
    "preset" : "0"},
  ]
};"#;

    #[test]
    fn parses_script_form_with_trailing_commas() {
        let roster = CameraRoster::parse(SCRIPT_ROSTER).unwrap();
        let cameras = roster.descriptors().unwrap();

        assert_eq!(cameras.len(), 2);
        assert_eq!(cameras[0].camera_type, CameraType::ViscaJoystick);
        assert_eq!(cameras[0].backend_address, "127.0.0.1:8080");
        assert_eq!(cameras[0].max_preset, 15);
        assert_eq!(cameras[1].camera_type, CameraType::AverPtzapp);
        assert_eq!(cameras[1].backend_address, "127.0.0.1:36680");
        assert_eq!(cameras[1].serial, "5309115900007");
        assert_eq!(cameras[1].index, 1);

        let presets = roster.presets_for("Cam1");
        assert_eq!(presets.len(), 1);
        assert_eq!(presets[0].name, "Home, left");
        assert_eq!(presets[0].preset, 1);
    }

    #[test]
    fn missing_server_address_is_reported() {
        let roster = CameraRoster::parse(
            r#"{"cam_selectors": [{"name": "Cam1", "type": "visca_jog"}]}"#,
        )
        .unwrap();
        let err = roster.descriptors().unwrap_err();
        assert!(err.to_string().contains("visca camera Cam1"));
    }

    #[test]
    fn trailing_comma_inside_string_is_kept() {
        assert_eq!(strip_trailing_commas(r#"["a,]", 1,]"#), r#"["a,]", 1]"#);
        assert_eq!(strip_trailing_commas("{\"a\": 1 ,\n}"), "{\"a\": 1 \n}");
    }

    #[test]
    fn loads_from_file() -> anyhow::Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(SCRIPT_ROSTER.as_bytes())?;

        let roster = CameraRoster::load(file.path())?;
        assert_eq!(roster.cam_selectors.len(), 2);

        assert!(CameraRoster::load(file.path().with_extension("missing")).is_err());
        Ok(())
    }
}
