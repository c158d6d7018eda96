//! The config-loading boundary: traits describing how a program is built
//! from outside collaborators (a config file reader and an SFZ/region
//! constructor), neither of which this crate implements.

use crate::layer::Layer;
use crate::Result;

/// Read-only access to a config file's `section:key=value` structure.
///
/// Mirrors the shape of `cbox_config_has_section`/`cbox_config_get_string`/
/// `cbox_config_get_int` from the system this crate's matching engine was
/// modeled on.
pub trait ConfigSource {
    /// Whether `section` exists at all.
    fn has_section(&self, section: &str) -> bool;

    /// A string value, or `None` if the key is absent.
    fn get_string(&self, section: &str, key: &str) -> Option<String>;

    /// An integer value, or `None` if the key is absent or not an integer.
    fn get_int(&self, section: &str, key: &str) -> Option<i64>;
}

/// Constructs runtime-ready layers from either a full SFZ file or a named
/// config subsection. SFZ parsing and region-inheritance resolution happen
/// entirely behind this trait; this crate only consumes the result.
pub trait LayerSource {
    /// Load every region in the SFZ file at `path` as layers.
    fn load_sfz(&self, path: &str) -> Result<Vec<Layer>>;

    /// Build a single layer from a `slayer:<name>` config subsection.
    fn load_section(&self, cfg: &dyn ConfigSource, section: &str) -> Result<Layer>;
}

#[cfg(test)]
pub(crate) mod test_double {
    use super::*;
    use std::collections::HashMap;

    /// An in-memory [`ConfigSource`] for tests, keyed by `"section:key"`.
    #[derive(Default)]
    pub struct MapConfig {
        values: HashMap<String, String>,
        sections: std::collections::HashSet<String>,
    }

    impl MapConfig {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with(mut self, section: &str, key: &str, value: &str) -> Self {
            self.sections.insert(section.to_string());
            self.values
                .insert(format!("{section}:{key}"), value.to_string());
            self
        }
    }

    impl ConfigSource for MapConfig {
        fn has_section(&self, section: &str) -> bool {
            self.sections.contains(section)
        }

        fn get_string(&self, section: &str, key: &str) -> Option<String> {
            self.values.get(&format!("{section}:{key}")).cloned()
        }

        fn get_int(&self, section: &str, key: &str) -> Option<i64> {
            self.get_string(section, key).and_then(|v| v.parse().ok())
        }
    }

    /// A [`LayerSource`] that returns one default layer per section,
    /// regardless of its contents, sufficient to exercise `Program::from_config`.
    pub struct StubLoader {
        pub waveform: std::sync::Arc<dyn sampler_common::Waveform>,
    }

    impl LayerSource for StubLoader {
        fn load_sfz(&self, _path: &str) -> Result<Vec<Layer>> {
            let mut layer = Layer {
                eff_waveform: Some(self.waveform.clone()),
                ..Layer::default()
            };
            layer.runtime_prepare();
            Ok(vec![layer])
        }

        fn load_section(&self, _cfg: &dyn ConfigSource, _section: &str) -> Result<Layer> {
            let mut layer = Layer {
                eff_waveform: Some(self.waveform.clone()),
                ..Layer::default()
            };
            layer.runtime_prepare();
            Ok(layer)
        }
    }
}
