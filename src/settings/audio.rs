/*!
 * Generic audio encoder/decoder options.
 */

use super::{parse_flat_or_json, Settings, SettingsTree, Value};
use crate::core::errors::{MpResult, Status};

/// Recognized generic audio-encoder options: `bit_rate_output`,
/// `sample_rate_output`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncoderOptions {
    pub bit_rate_output: u32,
    pub sample_rate_output: u32,
}

impl Default for EncoderOptions {
    fn default() -> Self {
        EncoderOptions {
            bit_rate_output: 64_000,
            sample_rate_output: 44_100,
        }
    }
}

impl Settings for EncoderOptions {
    fn put(&mut self, text: &str) -> MpResult<()> {
        let tree = parse_flat_or_json(text)?;
        let mut next = *self;
        if let Some(v) = tree.get("bit_rate_output") {
            next.bit_rate_output = v
                .as_u32()
                .ok_or_else(|| Status::InvalidArgument("bit_rate_output must be an integer".into()))?;
        }
        if let Some(v) = tree.get("sample_rate_output") {
            next.sample_rate_output = v
                .as_u32()
                .ok_or_else(|| Status::InvalidArgument("sample_rate_output must be an integer".into()))?;
        }
        *self = next;
        Ok(())
    }

    fn get(&self) -> SettingsTree {
        let mut tree = SettingsTree::empty_object();
        tree.set("bit_rate_output", Value::Number(self.bit_rate_output as f64));
        tree.set("sample_rate_output", Value::Number(self.sample_rate_output as f64));
        tree
    }
}

/// Closed set of output sample formats a generic audio decoder may
/// produce: any other string is rejected at PUT time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplesFormat {
    PlanarSigned16b,
    InterleavedSigned16b,
}

impl SamplesFormat {
    fn parse(s: &str) -> MpResult<Self> {
        match s {
            "planar_signed_16b" => Ok(SamplesFormat::PlanarSigned16b),
            "interleaved_signed_16b" => Ok(SamplesFormat::InterleavedSigned16b),
            other => Err(Status::InvalidArgument(format!(
                "unrecognized samples_format_output '{other}'"
            ))),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            SamplesFormat::PlanarSigned16b => "planar_signed_16b",
            SamplesFormat::InterleavedSigned16b => "interleaved_signed_16b",
        }
    }
}

impl Default for SamplesFormat {
    fn default() -> Self {
        SamplesFormat::InterleavedSigned16b
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecoderOptions {
    pub samples_format_output: SamplesFormat,
}

impl Settings for DecoderOptions {
    fn put(&mut self, text: &str) -> MpResult<()> {
        let tree = parse_flat_or_json(text)?;
        if let Some(v) = tree.get("samples_format_output") {
            let raw = v
                .as_str()
                .ok_or_else(|| Status::InvalidArgument("samples_format_output must be a string".into()))?;
            self.samples_format_output = SamplesFormat::parse(raw)?;
        }
        Ok(())
    }

    fn get(&self) -> SettingsTree {
        let mut tree = SettingsTree::empty_object();
        tree.set(
            "samples_format_output",
            Value::String(self.samples_format_output.as_str().to_string()),
        );
        tree
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoder_defaults_are_64kbps_44khz() {
        let opts = EncoderOptions::default();
        assert_eq!(opts.bit_rate_output, 64_000);
        assert_eq!(opts.sample_rate_output, 44_100);
    }

    #[test]
    fn encoder_put_updates_only_named_fields() {
        let mut opts = EncoderOptions::default();
        opts.put("bit_rate_output=128000").unwrap();
        assert_eq!(opts.bit_rate_output, 128_000);
        assert_eq!(opts.sample_rate_output, 44_100);
    }

    #[test]
    fn decoder_rejects_values_outside_closed_set() {
        let mut opts = DecoderOptions::default();
        let err = opts.put("samples_format_output=float32").unwrap_err();
        assert!(matches!(err, Status::InvalidArgument(_)));
        assert_eq!(opts.samples_format_output, SamplesFormat::InterleavedSigned16b);
    }

    #[test]
    fn decoder_accepts_planar_signed_16b() {
        let mut opts = DecoderOptions::default();
        opts.put("samples_format_output=planar_signed_16b").unwrap();
        assert_eq!(opts.samples_format_output, SamplesFormat::PlanarSigned16b);
    }
}
