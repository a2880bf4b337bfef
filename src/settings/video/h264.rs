/*!
 * H.264-specific encoder options, layered on top of the generic video
 * encoder options. This crate does not drive an actual H.264 encoder —
 * `Options` only models the recognized settings surface.
 */

use crate::settings::{parse_flat_or_json, Settings, SettingsTree, Value};
use crate::core::errors::{MpResult, Status};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Options {
    pub flag_zerolatency: bool,
}

impl Settings for Options {
    fn put(&mut self, text: &str) -> MpResult<()> {
        let tree = parse_flat_or_json(text)?;
        if let Some(v) = tree.get("flag_zerolatency") {
            self.flag_zerolatency = v
                .as_bool()
                .ok_or_else(|| Status::InvalidArgument("flag_zerolatency must be a boolean".into()))?;
        }
        Ok(())
    }

    fn get(&self) -> SettingsTree {
        let mut tree = SettingsTree::empty_object();
        tree.set("flag_zerolatency", Value::Bool(self.flag_zerolatency));
        tree
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_false() {
        assert!(!Options::default().flag_zerolatency);
    }

    #[test]
    fn put_accepts_boolean_flag() {
        let mut opts = Options::default();
        opts.put("flag_zerolatency=true").unwrap();
        assert!(opts.flag_zerolatency);
    }
}
