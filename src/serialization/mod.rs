//! Saving and loading whole graphs.
//!
//! A graph archive is a single safetensors file:
//!
//! - **Tensors**: the array of every variable that has one, keyed by name.
//!   Arrays inside control flow bodies are keyed by their path,
//!   `<op>/<body>/<name>` (e.g. `loop/body/step`). Updater state, when saved,
//!   lives under `__updater/<param>/<slot>`. Within a key, `%`, `/` and `#`
//!   in names are written as `%25`, `%2F` and `%23`.
//! - **Metadata**: the JSON graph description, the loss variables, the
//!   training configuration and a format version.
//!
//! ```rust,ignore
//! sd.save("model.sdz", true)?;
//! let restored = SameDiff::load("model.sdz", true)?;
//! ```

pub mod checkpoint;
pub mod safetensors_io;

pub use checkpoint::{CheckpointListener, CheckpointManager};

use crate::graph::{Graph, Value, VariableType};
use crate::tensor::SameDiff;
use crate::train::TrainingConfig;
use safetensors::tensor::SafeTensors;
use safetensors_io::{decode_values, TensorStore};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

/// Version written into every archive.
pub const FORMAT_VERSION: u32 = 1;

const GRAPH_KEY: &str = "samediff.graph";
const VERSION_KEY: &str = "samediff.format_version";
const LOSS_KEY: &str = "samediff.loss_variables";
const CONFIG_KEY: &str = "samediff.training_config";
const SEQUENCES_KEY: &str = "samediff.sequences";
const UPDATER_PREFIX: &str = "__updater/";

#[derive(Error, Debug)]
pub enum SerializationError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SafeTensors error: {0}")]
    Safetensors(#[from] safetensors::SafeTensorError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Archive has no \"{0}\" metadata entry")]
    MissingMetadata(&'static str),

    #[error("Unsupported archive format version \"{0}\"")]
    UnsupportedVersion(String),

    #[error("Archive has no array for \"{0}\"")]
    MissingArray(String),

    #[error("Invalid array \"{0}\": {1}")]
    InvalidArray(String, String),

    #[error("Two arrays map to the archive key \"{0}\"")]
    DuplicateKey(String),
}

type Result<T> = std::result::Result<T, SerializationError>;

/// Everything stored in an archive.
#[derive(Debug, Clone)]
pub struct Archive {
    pub graph: Graph,
    pub loss_variables: Vec<String>,
    pub training_config: Option<TrainingConfig>,
    /// Updater state keyed `<param>/<slot>`, when it was saved.
    pub updater_state: Option<HashMap<String, Value>>,
}

/// Escapes the separators used in archive keys.
pub(crate) fn escape_name(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            '/' => escaped.push_str("%2F"),
            '#' => escaped.push_str("%23"),
            c => escaped.push(c),
        }
    }
    escaped
}

pub(crate) fn unescape_name(key: &str) -> String {
    let mut name = String::with_capacity(key.len());
    let mut rest = key;
    while let Some(pos) = rest.find('%') {
        name.push_str(&rest[..pos]);
        let code = rest.get(pos..pos + 3);
        let decoded = match code {
            Some("%25") => Some('%'),
            Some("%2F") => Some('/'),
            Some("%23") => Some('#'),
            _ => None,
        };
        match decoded {
            Some(c) => {
                name.push(c);
                rest = &rest[pos + 3..];
            }
            None => {
                name.push('%');
                rest = &rest[pos + 1..];
            }
        }
    }
    name.push_str(rest);
    name
}

fn collect_arrays(graph: &Graph, prefix: &str, store: &mut TensorStore) -> Result<()> {
    for var in graph.variables() {
        if let Some(array) = var.array() {
            store.insert(format!("{prefix}{}", escape_name(var.name())), array)?;
        }
    }
    for op in graph.ops() {
        for (role, body) in op.kind().sub_graphs() {
            collect_arrays(&body.graph, &format!("{prefix}{}/{role}/", escape_name(op.name())), store)?;
        }
    }
    Ok(())
}

fn restore_arrays(graph: &mut Graph, prefix: &str, arrays: &mut HashMap<String, Value>) -> Result<()> {
    for var in graph.variables.iter_mut() {
        let key = format!("{prefix}{}", escape_name(&var.name));
        match arrays.remove(&key) {
            Some(array) if array.dtype() != var.dtype => {
                return Err(SerializationError::InvalidArray(
                    key,
                    format!("stored as {} but the variable is {}", array.dtype(), var.dtype),
                ))
            }
            Some(array) => var.array = Some(array),
            None if matches!(var.var_type, VariableType::Variable | VariableType::Constant) => {
                return Err(SerializationError::MissingArray(key))
            }
            None => {}
        }
    }
    for op in graph.ops.iter_mut() {
        let name = op.name.clone();
        for (role, body) in op.kind.sub_graphs_mut() {
            restore_arrays(&mut body.graph, &format!("{prefix}{}/{role}/", escape_name(&name)), arrays)?;
        }
    }
    Ok(())
}

impl Archive {
    /// Encodes the archive into safetensors bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut store = TensorStore::default();
        collect_arrays(&self.graph, "", &mut store)?;
        if let Some(state) = &self.updater_state {
            let mut keys: Vec<&String> = state.keys().collect();
            keys.sort();
            for key in keys {
                store.insert(format!("{UPDATER_PREFIX}{}", escape_name(key)), &state[key])?;
            }
        }

        let mut metadata = HashMap::new();
        metadata.insert(VERSION_KEY.to_string(), FORMAT_VERSION.to_string());
        metadata.insert(GRAPH_KEY.to_string(), serde_json::to_string(&self.graph)?);
        metadata.insert(LOSS_KEY.to_string(), serde_json::to_string(&self.loss_variables)?);
        if let Some(config) = &self.training_config {
            metadata.insert(CONFIG_KEY.to_string(), serde_json::to_string(config)?);
        }
        metadata.insert(SEQUENCES_KEY.to_string(), serde_json::to_string(&store.sequences)?);
        store.serialize(metadata)
    }

    /// Decodes an archive; updater state is only read when `with_updater` is set.
    pub fn from_bytes(bytes: &[u8], with_updater: bool) -> Result<Self> {
        let (_, header) = SafeTensors::read_metadata(bytes)?;
        let metadata = header.metadata().clone().unwrap_or_default();
        let entry = |key: &'static str| metadata.get(key).ok_or(SerializationError::MissingMetadata(key));

        let version = entry(VERSION_KEY)?;
        if version.parse::<u32>().ok() != Some(FORMAT_VERSION) {
            return Err(SerializationError::UnsupportedVersion(version.clone()));
        }
        let mut graph: Graph = serde_json::from_str(entry(GRAPH_KEY)?)?;
        let loss_variables: Vec<String> = serde_json::from_str(entry(LOSS_KEY)?)?;
        let training_config = metadata
            .get(CONFIG_KEY)
            .map(|json| serde_json::from_str::<TrainingConfig>(json))
            .transpose()?;
        let sequences: BTreeMap<_, _> = match metadata.get(SEQUENCES_KEY) {
            Some(json) => serde_json::from_str(json)?,
            None => BTreeMap::new(),
        };

        let tensors = SafeTensors::deserialize(bytes)?;
        let mut arrays = decode_values(&tensors, &sequences)?;
        restore_arrays(&mut graph, "", &mut arrays)?;

        let mut updater_state = HashMap::new();
        for (key, value) in arrays {
            match key.strip_prefix(UPDATER_PREFIX) {
                Some(slot) => {
                    updater_state.insert(unescape_name(slot), value);
                }
                None => warn!(key = %key, "ignoring array with no matching variable"),
            }
        }
        let updater_state = (with_updater && !updater_state.is_empty()).then_some(updater_state);

        Ok(Self {
            graph,
            loss_variables,
            training_config,
            updater_state,
        })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let bytes = self.to_bytes()?;
        fs::write(path.as_ref(), bytes)?;
        debug!(path = %path.as_ref().display(), "graph archive written");
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>, with_updater: bool) -> Result<Self> {
        let bytes = fs::read(path.as_ref())?;
        Self::from_bytes(&bytes, with_updater)
    }
}

impl SameDiff {
    /// Snapshot of the graph, loss variables, training configuration and
    /// (optionally) updater state.
    pub fn archive(&self, with_updater: bool) -> Archive {
        let ctx = self.ctx.borrow();
        Archive {
            graph: ctx.graph.clone(),
            loss_variables: ctx.loss_variables.clone(),
            training_config: ctx.training_config.clone(),
            updater_state: if with_updater {
                ctx.updater.as_ref().map(|u| u.state())
            } else {
                None
            },
        }
    }

    /// Writes the graph to a single archive file.
    pub fn save(&self, path: impl AsRef<Path>, with_updater: bool) -> crate::Result<()> {
        self.archive(with_updater).save(path)?;
        Ok(())
    }

    /// Reads a graph written by [`save`](Self::save).
    pub fn load(path: impl AsRef<Path>, with_updater: bool) -> crate::Result<SameDiff> {
        SameDiff::from_archive(Archive::load(path, with_updater)?)
    }

    pub fn from_archive(archive: Archive) -> crate::Result<SameDiff> {
        let sd = SameDiff::from_graph(archive.graph);
        {
            let mut ctx = sd.ctx.borrow_mut();
            ctx.loss_variables = archive.loss_variables;
        }
        if let Some(config) = archive.training_config {
            sd.set_training_config(config)?;
        }
        if let Some(state) = archive.updater_state {
            sd.restore_updater_state(state)?;
        }
        Ok(sd)
    }
}
