//! Folder conventions of the consuming UIs.

use std::path::PathBuf;

use synapse_pack::AssetType;

/// Where a UI expects each kind of asset, relative to its install root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiLayout {
    ComfyUi,
    /// AUTOMATIC1111 and its forks (Forge, SD.Next)
    A1111,
    /// Unknown UI: `models/<asset_type>`
    Generic,
}

impl UiLayout {
    pub fn for_ui(ui: &str) -> Self {
        match ui.to_ascii_lowercase().as_str() {
            "comfyui" => UiLayout::ComfyUi,
            "forge" | "a1111" | "sdnext" => UiLayout::A1111,
            _ => UiLayout::Generic,
        }
    }

    pub fn folder(&self, asset_type: AssetType) -> PathBuf {
        let folder = match (self, asset_type) {
            (UiLayout::ComfyUi, AssetType::Checkpoint | AssetType::BaseModel) => "models/checkpoints",
            (UiLayout::ComfyUi, AssetType::Lora) => "models/loras",
            (UiLayout::ComfyUi, AssetType::Vae) => "models/vae",
            (UiLayout::ComfyUi, AssetType::Controlnet) => "models/controlnet",
            (UiLayout::ComfyUi, AssetType::Upscaler) => "models/upscale_models",
            (UiLayout::ComfyUi, AssetType::Embedding) => "models/embeddings",
            (UiLayout::ComfyUi, AssetType::CustomNode) => "custom_nodes",
            (UiLayout::ComfyUi, AssetType::Workflow) => "user/default/workflows",

            (UiLayout::A1111, AssetType::Checkpoint | AssetType::BaseModel) => {
                "models/Stable-diffusion"
            }
            (UiLayout::A1111, AssetType::Lora) => "models/Lora",
            (UiLayout::A1111, AssetType::Vae) => "models/VAE",
            (UiLayout::A1111, AssetType::Controlnet) => "models/ControlNet",
            (UiLayout::A1111, AssetType::Upscaler) => "models/ESRGAN",
            (UiLayout::A1111, AssetType::Embedding) => "embeddings",
            (UiLayout::A1111, AssetType::CustomNode) => "extensions",
            (UiLayout::A1111, AssetType::Workflow) => "workflows",

            (UiLayout::ComfyUi | UiLayout::A1111, AssetType::Unknown) => "models/other",
            (UiLayout::Generic, other) => return PathBuf::from("models").join(other.as_str()),
        };
        PathBuf::from(folder)
    }
}
