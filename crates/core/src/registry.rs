//! Registry of known ComfyUI node types.
//!
//! The editor stores widget parameters positionally, so turning them into
//! named inputs needs a per-type field schema. Each known type is a
//! [`NodeKind`] variant; anything else is [`NodeKind::PassThrough`] and
//! contributes no widget-derived inputs.

use crate::overrides::OverrideField;

/// Widget value written into a seed node's mode field by a seed override.
pub const FIXED_SEED_MODE: &str = "fixed";

/// A known node type with a fixed widget schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    ClipTextEncode,
    KSamplerSelect,
    RandomNoise,
    KSampler,
    BasicScheduler,
    FluxGuidance,
    ModelSamplingFlux,
    EmptyLatentImage,
    EmptySd3LatentImage,
    SdxlAspectRatio,
    UnetLoader,
    VaeLoader,
    DualClipLoader,
    ClipLoader,
    CheckpointLoader,
    LoraLoader,
    LoraLoaderModelOnly,
    SaveImage,
    BasicGuider,
    SamplerCustomAdvanced,
    VaeDecode,
    /// Unrecognised type: passed through with link-derived inputs only.
    PassThrough,
}

/// Every variant except [`NodeKind::PassThrough`].
const KNOWN: &[NodeKind] = &[
    NodeKind::ClipTextEncode,
    NodeKind::KSamplerSelect,
    NodeKind::RandomNoise,
    NodeKind::KSampler,
    NodeKind::BasicScheduler,
    NodeKind::FluxGuidance,
    NodeKind::ModelSamplingFlux,
    NodeKind::EmptyLatentImage,
    NodeKind::EmptySd3LatentImage,
    NodeKind::SdxlAspectRatio,
    NodeKind::UnetLoader,
    NodeKind::VaeLoader,
    NodeKind::DualClipLoader,
    NodeKind::ClipLoader,
    NodeKind::CheckpointLoader,
    NodeKind::LoraLoader,
    NodeKind::LoraLoaderModelOnly,
    NodeKind::SaveImage,
    NodeKind::BasicGuider,
    NodeKind::SamplerCustomAdvanced,
    NodeKind::VaeDecode,
];

impl NodeKind {
    /// Resolve a ComfyUI class type name. Unknown names yield
    /// [`NodeKind::PassThrough`].
    pub fn from_class_type(class_type: &str) -> Self {
        KNOWN
            .iter()
            .copied()
            .find(|kind| kind.class_type() == Some(class_type))
            .unwrap_or(Self::PassThrough)
    }

    /// The ComfyUI class type name, or `None` for pass-through nodes.
    pub fn class_type(self) -> Option<&'static str> {
        let name = match self {
            Self::ClipTextEncode => "CLIPTextEncode",
            Self::KSamplerSelect => "KSamplerSelect",
            Self::RandomNoise => "RandomNoise",
            Self::KSampler => "KSampler",
            Self::BasicScheduler => "BasicScheduler",
            Self::FluxGuidance => "FluxGuidance",
            Self::ModelSamplingFlux => "ModelSamplingFlux",
            Self::EmptyLatentImage => "EmptyLatentImage",
            Self::EmptySd3LatentImage => "EmptySD3LatentImage",
            Self::SdxlAspectRatio => "CR SDXL Aspect Ratio",
            Self::UnetLoader => "UNETLoader",
            Self::VaeLoader => "VAELoader",
            Self::DualClipLoader => "DualCLIPLoader",
            Self::ClipLoader => "CLIPLoader",
            Self::CheckpointLoader => "CheckpointLoaderSimple",
            Self::LoraLoader => "LoraLoader",
            Self::LoraLoaderModelOnly => "LoraLoaderModelOnly",
            Self::SaveImage => "SaveImage",
            Self::BasicGuider => "BasicGuider",
            Self::SamplerCustomAdvanced => "SamplerCustomAdvanced",
            Self::VaeDecode => "VAEDecode",
            Self::PassThrough => return None,
        };
        Some(name)
    }

    /// Input names for the node's `widgets_values`, in positional order.
    ///
    /// Seed-bearing nodes include the editor's `control_after_generate`
    /// widget, which occupies a position in `widgets_values`.
    pub fn widget_fields(self) -> &'static [&'static str] {
        match self {
            Self::ClipTextEncode => &["text"],
            Self::KSamplerSelect => &["sampler_name"],
            Self::RandomNoise => &["noise_seed", "control_after_generate"],
            Self::KSampler => &[
                "seed",
                "control_after_generate",
                "steps",
                "cfg",
                "sampler_name",
                "scheduler",
                "denoise",
            ],
            Self::BasicScheduler => &["scheduler", "steps", "denoise"],
            Self::FluxGuidance => &["guidance"],
            Self::ModelSamplingFlux => &["max_shift", "base_shift", "width", "height"],
            Self::EmptyLatentImage | Self::EmptySd3LatentImage => {
                &["width", "height", "batch_size"]
            }
            Self::SdxlAspectRatio => &[
                "width",
                "height",
                "aspect_ratio",
                "swap_dimensions",
                "upscale_factor",
                "batch_size",
            ],
            Self::UnetLoader => &["unet_name", "weight_dtype"],
            Self::VaeLoader => &["vae_name"],
            Self::DualClipLoader => &["clip_name1", "clip_name2", "type"],
            Self::ClipLoader => &["clip_name", "type"],
            Self::CheckpointLoader => &["ckpt_name"],
            Self::LoraLoader => &["lora_name", "strength_model", "strength_clip"],
            Self::LoraLoaderModelOnly => &["lora_name", "strength_model"],
            Self::SaveImage => &["filename_prefix"],
            Self::BasicGuider | Self::SamplerCustomAdvanced | Self::VaeDecode => &[],
            Self::PassThrough => &[],
        }
    }

    /// The input an override of `field` writes to on this kind of node,
    /// or `None` if this kind does not accept that override.
    pub fn override_input(self, field: OverrideField) -> Option<&'static str> {
        match (field, self) {
            (OverrideField::Prompt, Self::ClipTextEncode) => Some("text"),
            (OverrideField::Seed, Self::RandomNoise) => Some("noise_seed"),
            (OverrideField::Seed, Self::KSampler) => Some("seed"),
            (
                OverrideField::Width,
                Self::EmptyLatentImage | Self::EmptySd3LatentImage | Self::SdxlAspectRatio,
            ) => Some("width"),
            (
                OverrideField::Height,
                Self::EmptyLatentImage | Self::EmptySd3LatentImage | Self::SdxlAspectRatio,
            ) => Some("height"),
            (OverrideField::Steps, Self::BasicScheduler | Self::KSampler) => Some("steps"),
            (OverrideField::Guidance, Self::FluxGuidance) => Some("guidance"),
            _ => None,
        }
    }

    /// The mode input forced to [`FIXED_SEED_MODE`] when the seed is
    /// overridden.
    pub fn seed_mode_input(self) -> Option<&'static str> {
        match self {
            Self::RandomNoise | Self::KSampler => Some("control_after_generate"),
            _ => None,
        }
    }
}
