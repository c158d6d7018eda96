//! Program: an ordered collection of layers and groups, plus its lazily
//! built run-time layer list (RLL).

use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::{ConfigSource, LayerSource};
use crate::layer::{Layer, LayerHandle};
use crate::module::Module;
use crate::types::TriggerMode;
use crate::{Result, SamplerError};

/// Run-time layer list: a program's layers partitioned by trigger kind.
///
/// Built by scanning the program's `all_layers` in order; layers with
/// `trigger == Release` go into `release_layers`, everything else into
/// `attack_layers`. Both partitions preserve `all_layers`' own insertion
/// order (see design notes for why this differs from the system this was
/// modeled on).
#[derive(Default)]
pub struct Rll {
    /// Layers matched on note-on (and `First`/`Legato`).
    pub attack_layers: Vec<LayerHandle>,
    /// Layers matched on note-off.
    pub release_layers: Vec<LayerHandle>,
}

impl Rll {
    fn build(all_layers: &[LayerHandle]) -> Self {
        let mut attack_layers = Vec::new();
        let mut release_layers = Vec::new();
        for layer in all_layers {
            if layer.trigger == TriggerMode::Release {
                release_layers.push(layer.clone());
            } else {
                attack_layers.push(layer.clone());
            }
        }
        Self {
            attack_layers,
            release_layers,
        }
    }
}

/// A control-surface command, modelling the `/status`, `/regions`,
/// `/groups`, `/new_group` endpoints.
pub enum ProgramCommand {
    /// `/status`.
    Status,
    /// `/regions`.
    Regions,
    /// `/groups`.
    Groups,
    /// `/new_group`.
    NewGroup,
}

/// The reply to a [`ProgramCommand`].
pub enum ProgramReply {
    /// Reply to `/status`.
    Status {
        /// Number of layers in the program.
        layer_count: usize,
        /// The program's display name.
        name: String,
    },
    /// One `/region` reply per layer, in order.
    Regions(Vec<String>),
    /// The default group followed by one `/group` reply per group.
    Groups {
        /// Always present; the implicit defaults group.
        default_group: String,
        /// One entry per explicit group.
        groups: Vec<String>,
    },
    /// The UUID-equivalent identity of a newly created group.
    NewGroup(usize),
}

/// An ordered collection of layers loaded from one SFZ file or config
/// section.
pub struct Program {
    /// 0-based program slot number.
    pub prog_no: u32,
    /// Display name.
    pub name: String,
    /// Directory samples were resolved relative to.
    pub sample_dir: String,
    /// Source file this program was loaded from, if any.
    pub source_file: Option<String>,
    /// Every layer, in load order.
    all_layers: Vec<LayerHandle>,
    /// Group layers, used as inheritance defaults by a `LayerSource`.
    groups: Vec<LayerHandle>,
    /// The implicit defaults group every layer inherits from first.
    default_group: LayerHandle,
    /// Lazily (re)built index over `all_layers`.
    rll: RwLock<Option<Arc<Rll>>>,
}

impl Program {
    /// An empty program with no layers.
    pub fn new(prog_no: u32, name: String, sample_dir: String) -> Self {
        Self {
            prog_no,
            name,
            sample_dir,
            source_file: None,
            all_layers: Vec::new(),
            groups: Vec::new(),
            default_group: Arc::new(Layer::default()),
            rll: RwLock::new(None),
        }
    }

    /// Build a program from a config section, per the `spgm:<section>` /
    /// `spgm:!<path>` forms described by the control surface.
    pub fn from_config(
        _module: &Module,
        cfg: &dyn ConfigSource,
        loader: &dyn LayerSource,
        cfg_section: &str,
        name: &str,
        prog_no: u32,
    ) -> Result<Self> {
        if let Some(path) = cfg_section.strip_prefix("spgm:!") {
            let layers = loader.load_sfz(path)?;
            let mut program = Program::new(prog_no, name.to_string(), String::new());
            program.source_file = Some(path.to_string());
            for layer in layers {
                program.add_layer(layer);
            }
            return Ok(program);
        }

        let section = cfg_section.strip_prefix("spgm:").unwrap_or(cfg_section);
        let full_section = format!("spgm:{section}");
        if !cfg.has_section(&full_section) {
            return Err(SamplerError::ConfigSectionNotFound {
                section: full_section,
            });
        }

        let display_name = cfg
            .get_string(&full_section, "name")
            .unwrap_or_else(|| name.to_string());
        let sample_dir = cfg
            .get_string(&full_section, "sample_path")
            .unwrap_or_default();
        let mut program = Program::new(prog_no, display_name, sample_dir);

        if let Some(sfz) = cfg.get_string(&full_section, "sfz") {
            let layers = loader.load_sfz(&sfz)?;
            program.source_file = Some(sfz);
            for layer in layers {
                program.add_layer(layer);
            }
        }

        let mut n = 1;
        loop {
            let key = format!("layer{n}");
            let Some(subsection_name) = cfg.get_string(&full_section, &key) else {
                break;
            };
            let subsection = format!("slayer:{subsection_name}");
            match loader.load_section(cfg, &subsection) {
                Ok(layer) => program.add_layer(layer),
                Err(_) => {
                    // Diagnostics::layer_skipped is the caller's
                    // responsibility to wire up; this crate's own
                    // `from_config` keeps going so one bad region doesn't
                    // sink the whole program.
                }
            }
            n += 1;
        }

        Ok(program)
    }

    /// Every layer in load order.
    pub fn all_layers(&self) -> &[LayerHandle] {
        &self.all_layers
    }

    /// Explicit groups, in creation order.
    pub fn groups(&self) -> &[LayerHandle] {
        &self.groups
    }

    /// The implicit defaults group.
    pub fn default_group(&self) -> &LayerHandle {
        &self.default_group
    }

    /// Add a fully runtime-prepared layer, invalidating the cached RLL.
    pub fn add_layer(&mut self, mut layer: Layer) {
        layer.runtime_prepare();
        self.all_layers.push(Arc::new(layer));
        self.invalidate_rll();
    }

    /// Remove the layer at `index`, invalidating the cached RLL.
    pub fn delete_layer(&mut self, index: usize) -> Option<LayerHandle> {
        if index >= self.all_layers.len() {
            return None;
        }
        let removed = self.all_layers.remove(index);
        self.invalidate_rll();
        Some(removed)
    }

    /// Register a new group layer, returning its index within `groups()`.
    pub fn add_group(&mut self, mut layer: Layer) -> usize {
        layer.runtime_prepare();
        self.groups.push(Arc::new(layer));
        self.groups.len() - 1
    }

    /// Drop the cached RLL; it will be rebuilt on the next `rll()` call.
    pub fn invalidate_rll(&mut self) {
        *self.rll.write() = None;
    }

    /// The program's run-time layer list, building it on first access
    /// after construction or any layer-set change.
    pub fn rll(&self) -> Arc<Rll> {
        if self.rll.read().is_none() {
            *self.rll.write() = Some(Arc::new(Rll::build(&self.all_layers)));
        }
        self.rll.read().clone().unwrap()
    }

    /// Handle one control-surface command.
    pub fn handle_command(&mut self, cmd: ProgramCommand) -> ProgramReply {
        match cmd {
            ProgramCommand::Status => ProgramReply::Status {
                layer_count: self.all_layers.len(),
                name: self.name.clone(),
            },
            ProgramCommand::Regions => ProgramReply::Regions(
                (0..self.all_layers.len())
                    .map(|i| format!("region{i}"))
                    .collect(),
            ),
            ProgramCommand::Groups => ProgramReply::Groups {
                default_group: "default_group".to_string(),
                groups: (0..self.groups.len()).map(|i| format!("group{i}")).collect(),
            },
            ProgramCommand::NewGroup => {
                let idx = self.add_group(Layer::default());
                ProgramReply::NewGroup(idx)
            }
        }
    }
}
