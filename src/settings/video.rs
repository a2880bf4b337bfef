/*!
 * Generic video encoder options plus backend-specific layers (H.264's
 * `flag_zerolatency`).
 *
 * Unsupported plane dimensions are rejected at PUT time rather than
 * deferred to the (absent, out-of-scope) codec call.
 */

pub mod h264;

use super::{parse_flat_or_json, Settings, SettingsTree, Value};
use crate::core::errors::{MpResult, Status};
use crate::frame::{MAX_HEIGHT, MAX_WIDTH};

const MAX_CONF_PRESET_LEN: usize = 127;

#[derive(Debug, Clone, PartialEq)]
pub struct EncoderOptions {
    pub bit_rate_output: u32,
    pub frame_rate_output: u32,
    pub width_output: u32,
    pub height_output: u32,
    pub gop_size: u32,
    pub conf_preset: String,
}

impl Default for EncoderOptions {
    fn default() -> Self {
        EncoderOptions {
            bit_rate_output: 300 * 1024,
            frame_rate_output: 15,
            width_output: 352,
            height_output: 288,
            gop_size: 15,
            conf_preset: String::new(),
        }
    }
}

impl Settings for EncoderOptions {
    fn put(&mut self, text: &str) -> MpResult<()> {
        let tree = parse_flat_or_json(text)?;
        let mut next = self.clone();

        if let Some(v) = tree.get("bit_rate_output") {
            next.bit_rate_output = v
                .as_u32()
                .ok_or_else(|| Status::InvalidArgument("bit_rate_output must be an integer".into()))?;
        }
        if let Some(v) = tree.get("frame_rate_output") {
            next.frame_rate_output = v
                .as_u32()
                .ok_or_else(|| Status::InvalidArgument("frame_rate_output must be an integer".into()))?;
        }
        if let Some(v) = tree.get("width_output") {
            next.width_output = v
                .as_u32()
                .ok_or_else(|| Status::InvalidArgument("width_output must be an integer".into()))?;
        }
        if let Some(v) = tree.get("height_output") {
            next.height_output = v
                .as_u32()
                .ok_or_else(|| Status::InvalidArgument("height_output must be an integer".into()))?;
        }
        if let Some(v) = tree.get("gop_size") {
            next.gop_size = v
                .as_u32()
                .ok_or_else(|| Status::InvalidArgument("gop_size must be an integer".into()))?;
        }
        if let Some(v) = tree.get("conf_preset") {
            let s = v
                .as_str()
                .ok_or_else(|| Status::InvalidArgument("conf_preset must be a string".into()))?;
            if s.len() > MAX_CONF_PRESET_LEN {
                return Err(Status::InvalidArgument(format!(
                    "conf_preset exceeds {MAX_CONF_PRESET_LEN} characters"
                )));
            }
            next.conf_preset = s.to_string();
        }

        if next.width_output == 0 || next.width_output > MAX_WIDTH {
            return Err(Status::InvalidArgument(format!(
                "width_output {} out of range (1..={MAX_WIDTH})",
                next.width_output
            )));
        }
        if next.height_output == 0 || next.height_output > MAX_HEIGHT {
            return Err(Status::InvalidArgument(format!(
                "height_output {} out of range (1..={MAX_HEIGHT})",
                next.height_output
            )));
        }

        *self = next;
        Ok(())
    }

    fn get(&self) -> SettingsTree {
        let mut tree = SettingsTree::empty_object();
        tree.set("bit_rate_output", Value::Number(self.bit_rate_output as f64));
        tree.set("frame_rate_output", Value::Number(self.frame_rate_output as f64));
        tree.set("width_output", Value::Number(self.width_output as f64));
        tree.set("height_output", Value::Number(self.height_output as f64));
        tree.set("gop_size", Value::Number(self.gop_size as f64));
        tree.set("conf_preset", Value::String(self.conf_preset.clone()));
        tree
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_cif_300kbps_15fps() {
        let opts = EncoderOptions::default();
        assert_eq!(opts.bit_rate_output, 300 * 1024);
        assert_eq!(opts.frame_rate_output, 15);
        assert_eq!(opts.width_output, 352);
        assert_eq!(opts.height_output, 288);
        assert_eq!(opts.gop_size, 15);
        assert_eq!(opts.conf_preset, "");
    }

    #[test]
    fn rejects_oversized_dimensions_at_put_time() {
        let mut opts = EncoderOptions::default();
        let err = opts.put("width_output=100000").unwrap_err();
        assert!(matches!(err, Status::InvalidArgument(_)));
        assert_eq!(opts.width_output, 352, "rejected PUT must not mutate state");
    }

    #[test]
    fn rejects_zero_dimensions() {
        let mut opts = EncoderOptions::default();
        assert!(opts.put("height_output=0").is_err());
    }

    #[test]
    fn rejects_conf_preset_longer_than_127_chars() {
        let mut opts = EncoderOptions::default();
        let long = "x".repeat(128);
        let err = opts.put(&format!("conf_preset={long}")).unwrap_err();
        assert!(matches!(err, Status::InvalidArgument(_)));
    }

    #[test]
    fn accepts_and_reads_back_a_partial_update() {
        let mut opts = EncoderOptions::default();
        opts.put("gop_size=30&conf_preset=veryfast").unwrap();
        assert_eq!(opts.gop_size, 30);
        assert_eq!(opts.conf_preset, "veryfast");
        assert_eq!(opts.width_output, 352);
    }
}
