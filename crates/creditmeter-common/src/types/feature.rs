//! Billable feature identifiers

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Features that consume credits
///
/// Callers identify features by their wire string. Strings that do not map
/// to a variant are still billable; the catalog resolves them to a default
/// cost instead of rejecting them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureType {
    // Code generation
    CodeGenerationText,
    CodeGenerationImage,
    CodeGenerationVideo,
    CodeGenerationUpdate,

    // Video processing
    VideoToSceneGraph,
    WebpageToVideo,
    ImagesToVideo,

    // Screenshots
    UrlScreenshot,

    // Per-item / per-call features
    BatchProcessing,
    ApiAccess,
}

impl FeatureType {
    /// Every known feature, in catalog order
    pub const ALL: [FeatureType; 10] = [
        FeatureType::CodeGenerationText,
        FeatureType::CodeGenerationImage,
        FeatureType::CodeGenerationVideo,
        FeatureType::CodeGenerationUpdate,
        FeatureType::VideoToSceneGraph,
        FeatureType::WebpageToVideo,
        FeatureType::ImagesToVideo,
        FeatureType::UrlScreenshot,
        FeatureType::BatchProcessing,
        FeatureType::ApiAccess,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureType::CodeGenerationText => "code_generation_text",
            FeatureType::CodeGenerationImage => "code_generation_image",
            FeatureType::CodeGenerationVideo => "code_generation_video",
            FeatureType::CodeGenerationUpdate => "code_generation_update",
            FeatureType::VideoToSceneGraph => "video_to_scene_graph",
            FeatureType::WebpageToVideo => "webpage_to_video",
            FeatureType::ImagesToVideo => "images_to_video",
            FeatureType::UrlScreenshot => "url_screenshot",
            FeatureType::BatchProcessing => "batch_processing",
            FeatureType::ApiAccess => "api_access",
        }
    }
}

impl std::fmt::Display for FeatureType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a feature identifier is not in the catalog
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown feature: {0}")]
pub struct UnknownFeature(pub String);

impl FromStr for FeatureType {
    type Err = UnknownFeature;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FeatureType::ALL
            .iter()
            .copied()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| UnknownFeature(s.to_string()))
    }
}
