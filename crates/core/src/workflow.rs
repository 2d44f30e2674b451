//! ComfyUI workflow document (API format) and job parameter injection.
//!
//! The document is a map of node id to node definition. Nodes that the
//! entrypoint rewrites are addressed through [`NodeRole`] rather than raw
//! ids; every role's node and input fields are checked when the document
//! is loaded, so [`WorkflowDocument::apply`] never has to guess.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::params::ResolvedParams;

/// Filename prefix written to both save-output nodes.
pub const OUTPUT_FILENAME_PREFIX: &str = "output";

/// Nodes of the bundled image-to-video workflow that the entrypoint
/// relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    /// `CLIPTextEncode` carrying the positive prompt.
    PositivePrompt,
    /// `EmptyLatentImage` defining size and batch.
    EmptyLatentImage,
    ImageCheckpointLoader,
    VideoCheckpointLoader,
    /// `KSampler` producing the still image.
    ImageSampler,
    /// `KSampler` producing the video frames.
    VideoSampler,
    SaveWebp,
    SaveApng,
}

impl NodeRole {
    pub const ALL: [NodeRole; 8] = [
        NodeRole::PositivePrompt,
        NodeRole::EmptyLatentImage,
        NodeRole::ImageCheckpointLoader,
        NodeRole::VideoCheckpointLoader,
        NodeRole::ImageSampler,
        NodeRole::VideoSampler,
        NodeRole::SaveWebp,
        NodeRole::SaveApng,
    ];

    /// Node identifier in the workflow document.
    pub fn node_id(self) -> &'static str {
        match self {
            Self::PositivePrompt => "18",
            Self::EmptyLatentImage => "22",
            Self::ImageCheckpointLoader => "16",
            Self::VideoCheckpointLoader => "15",
            Self::ImageSampler => "17",
            Self::VideoSampler => "3",
            Self::SaveWebp => "10",
            Self::SaveApng => "24",
        }
    }

    /// Input fields that must already exist on the node.
    pub fn required_inputs(self) -> &'static [&'static str] {
        match self {
            Self::PositivePrompt => &["text"],
            Self::EmptyLatentImage => &["width", "height", "batch_size"],
            Self::ImageCheckpointLoader | Self::VideoCheckpointLoader => &[],
            Self::ImageSampler => &["seed", "steps", "sampler_name", "scheduler"],
            Self::VideoSampler => &["steps", "sampler_name", "scheduler"],
            Self::SaveWebp | Self::SaveApng => &["filename_prefix", "framerate"],
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::PositivePrompt => "positive prompt",
            Self::EmptyLatentImage => "empty latent image",
            Self::ImageCheckpointLoader => "image checkpoint loader",
            Self::VideoCheckpointLoader => "video checkpoint loader",
            Self::ImageSampler => "image sampler",
            Self::VideoSampler => "video sampler",
            Self::SaveWebp => "save webp",
            Self::SaveApng => "save apng",
        }
    }
}

/// A single node definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub class_type: String,
    #[serde(default)]
    pub inputs: Map<String, Value>,
    /// Any other keys (e.g. `_meta`), passed through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Errors raised while loading or rewriting a workflow document.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Failed to read workflow file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid workflow JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Workflow is missing node {node_id} ({role})")]
    MissingNode {
        role: &'static str,
        node_id: &'static str,
    },

    #[error("Workflow node {node_id} ({role}) has no input '{input}'")]
    MissingInput {
        role: &'static str,
        node_id: &'static str,
        input: &'static str,
    },
}

/// A validated workflow document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct WorkflowDocument {
    nodes: BTreeMap<String, WorkflowNode>,
}

impl WorkflowDocument {
    /// Read and validate a workflow file.
    pub fn load(path: &Path) -> Result<Self, WorkflowError> {
        let raw = std::fs::read_to_string(path).map_err(|source| WorkflowError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    /// Parse and validate a workflow from its JSON text.
    pub fn from_json(raw: &str) -> Result<Self, WorkflowError> {
        let nodes: BTreeMap<String, WorkflowNode> = serde_json::from_str(raw)?;
        let doc = Self { nodes };
        doc.validate()?;
        Ok(doc)
    }

    /// Check that every [`NodeRole`] is present with its required inputs.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        for role in NodeRole::ALL {
            let node = self.node(role)?;
            for &input in role.required_inputs() {
                if !node.inputs.contains_key(input) {
                    return Err(WorkflowError::MissingInput {
                        role: role.name(),
                        node_id: role.node_id(),
                        input,
                    });
                }
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, role: NodeRole) -> Result<&WorkflowNode, WorkflowError> {
        self.nodes
            .get(role.node_id())
            .ok_or(WorkflowError::MissingNode {
                role: role.name(),
                node_id: role.node_id(),
            })
    }

    /// Current value of an input field on a role's node.
    pub fn input(&self, role: NodeRole, name: &str) -> Option<&Value> {
        self.nodes.get(role.node_id())?.inputs.get(name)
    }

    fn set_input(
        &mut self,
        role: NodeRole,
        name: &str,
        value: impl Into<Value>,
    ) -> Result<(), WorkflowError> {
        let node = self
            .nodes
            .get_mut(role.node_id())
            .ok_or(WorkflowError::MissingNode {
                role: role.name(),
                node_id: role.node_id(),
            })?;
        node.inputs.insert(name.to_string(), value.into());
        Ok(())
    }

    /// Overwrite the job-specific fields with `params`.
    ///
    /// The image sampler's seed is written twice, first with `seed` and
    /// then with `video_seed`, so the video seed is what ComfyUI sees.
    /// The video sampler's own seed is left as authored.
    pub fn apply(&mut self, params: &ResolvedParams) -> Result<(), WorkflowError> {
        use NodeRole::*;

        self.set_input(EmptyLatentImage, "width", params.size)?;
        self.set_input(EmptyLatentImage, "height", params.size)?;
        self.set_input(EmptyLatentImage, "batch_size", params.batch_size)?;

        self.set_input(PositivePrompt, "text", params.prompt.as_str())?;

        self.set_input(ImageSampler, "seed", params.seed)?;
        self.set_input(ImageSampler, "seed", params.video_seed)?;

        self.set_input(ImageSampler, "steps", params.steps)?;
        self.set_input(VideoSampler, "steps", params.video_steps)?;
        self.set_input(ImageSampler, "sampler_name", params.sampler.as_str())?;
        self.set_input(VideoSampler, "sampler_name", params.video_sampler.as_str())?;
        self.set_input(ImageSampler, "scheduler", params.scheduler.as_str())?;
        self.set_input(VideoSampler, "scheduler", params.video_scheduler.as_str())?;

        for save in [SaveWebp, SaveApng] {
            self.set_input(save, "filename_prefix", OUTPUT_FILENAME_PREFIX)?;
            self.set_input(save, "framerate", params.framerate)?;
        }

        Ok(())
    }
}
