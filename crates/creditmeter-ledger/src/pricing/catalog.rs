//! Feature catalog
//!
//! Static mapping from feature identifier to base cost, plan eligibility
//! and descriptive metadata. The table is fixed at build time and carries a
//! version string so consumers can tell which price list billed them.

use creditmeter_common::{FeatureType, Plan};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version of the built-in price list
pub const CATALOG_VERSION: &str = "2025-06";

/// Base cost billed for identifiers missing from the catalog
pub const UNKNOWN_FEATURE_COST: u64 = 1;

/// Relative computational weight of a feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Complexity {
    Low,
    Medium,
    High,
    VeryHigh,
    /// Depends on what the call wraps (batches, API passthrough)
    Variable,
    /// Identifier not in the catalog
    Unknown,
}

/// Catalog entry
#[derive(Debug, Clone, Serialize)]
pub struct FeatureSpec {
    pub feature: FeatureType,
    pub base_cost: u64,
    pub description: &'static str,
    pub complexity: Complexity,
    pub models: &'static [&'static str],
    pub processing_time: &'static str,
}

/// Which plans may use a feature
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Eligibility {
    Plans(Vec<Plan>),
    Unrestricted,
}

impl Eligibility {
    pub fn allows(&self, plan: Plan) -> bool {
        match self {
            Eligibility::Plans(plans) => plans.contains(&plan),
            Eligibility::Unrestricted => true,
        }
    }
}

/// Cost lookup result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeatureCost {
    /// Identifier as requested
    pub feature: String,
    pub base_cost: u64,
    pub complexity: Complexity,
    pub eligible_plans: Eligibility,
}

/// Per-plan request limits
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PlanLimits {
    pub max_file_size_mb: Option<u64>,
    pub max_video_duration_secs: Option<u64>,
    pub max_batch_size: Option<u64>,
    pub priority_processing: bool,
}

impl PlanLimits {
    const UNLIMITED: PlanLimits = PlanLimits {
        max_file_size_mb: None,
        max_video_duration_secs: None,
        max_batch_size: None,
        priority_processing: true,
    };

    const FREE: PlanLimits = PlanLimits {
        max_file_size_mb: Some(5),
        max_video_duration_secs: Some(60),
        max_batch_size: Some(3),
        priority_processing: false,
    };
}

const FEATURES: [FeatureSpec; 10] = [
    FeatureSpec {
        feature: FeatureType::CodeGenerationText,
        base_cost: 1,
        description: "Generate code from text description",
        complexity: Complexity::Low,
        models: &["Claude-4-Sonnet", "GPT-4", "Claude-3.7-Sonnet"],
        processing_time: "10-30 seconds",
    },
    FeatureSpec {
        feature: FeatureType::CodeGenerationImage,
        base_cost: 2,
        description: "Generate code from screenshot/image",
        complexity: Complexity::Medium,
        models: &["Claude-3.7-Sonnet", "GPT-4-Vision", "Gemini-2.0-Flash"],
        processing_time: "20-60 seconds",
    },
    FeatureSpec {
        feature: FeatureType::CodeGenerationVideo,
        base_cost: 5,
        description: "Generate code from video recording",
        complexity: Complexity::High,
        models: &["Claude-3-Opus"],
        processing_time: "60-180 seconds",
    },
    FeatureSpec {
        feature: FeatureType::CodeGenerationUpdate,
        base_cost: 1,
        description: "Update existing code with modifications",
        complexity: Complexity::Low,
        models: &["Claude-4-Sonnet", "GPT-4"],
        processing_time: "10-30 seconds",
    },
    FeatureSpec {
        feature: FeatureType::VideoToSceneGraph,
        base_cost: 3,
        description: "Extract scene graph and objects from video",
        complexity: Complexity::High,
        models: &["Replicate-YOLO", "Frame-Extraction"],
        processing_time: "30-90 seconds",
    },
    FeatureSpec {
        feature: FeatureType::WebpageToVideo,
        base_cost: 8,
        description: "Convert webpage to video presentation",
        complexity: Complexity::VeryHigh,
        models: &["GPT-4", "DALL-E", "Text-to-Speech"],
        processing_time: "120-300 seconds",
    },
    FeatureSpec {
        feature: FeatureType::ImagesToVideo,
        base_cost: 2,
        description: "Create video from multiple images",
        complexity: Complexity::Medium,
        models: &["OpenCV-Video-Processing"],
        processing_time: "30-90 seconds",
    },
    FeatureSpec {
        feature: FeatureType::UrlScreenshot,
        base_cost: 1,
        description: "Capture screenshot from URL",
        complexity: Complexity::Low,
        models: &["ScreenshotOne-API"],
        processing_time: "5-15 seconds",
    },
    FeatureSpec {
        feature: FeatureType::BatchProcessing,
        base_cost: 1,
        description: "Process multiple items in batch",
        complexity: Complexity::Variable,
        models: &["Depends-on-batch-type"],
        processing_time: "Variable",
    },
    FeatureSpec {
        feature: FeatureType::ApiAccess,
        base_cost: 1,
        description: "API access to features",
        complexity: Complexity::Variable,
        models: &["Same-as-feature"],
        processing_time: "Variable",
    },
];

const FREE_FEATURES: &[FeatureType] = &[
    FeatureType::CodeGenerationText,
    FeatureType::CodeGenerationImage,
    FeatureType::UrlScreenshot,
];

const STARTER_FEATURES: &[FeatureType] = &[
    FeatureType::CodeGenerationText,
    FeatureType::CodeGenerationImage,
    FeatureType::CodeGenerationUpdate,
    FeatureType::UrlScreenshot,
    FeatureType::ImagesToVideo,
];

const BASIC_FEATURES: &[FeatureType] = &[
    FeatureType::CodeGenerationText,
    FeatureType::CodeGenerationImage,
    FeatureType::CodeGenerationVideo,
    FeatureType::CodeGenerationUpdate,
    FeatureType::UrlScreenshot,
    FeatureType::ImagesToVideo,
    FeatureType::VideoToSceneGraph,
];

/// The feature catalog
#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureCatalog;

impl FeatureCatalog {
    pub fn new() -> Self {
        Self
    }

    pub fn version(&self) -> &'static str {
        CATALOG_VERSION
    }

    /// Every catalog entry
    pub fn all_features(&self) -> &'static [FeatureSpec] {
        &FEATURES
    }

    /// Entry for a known feature
    pub fn spec(&self, feature: FeatureType) -> &'static FeatureSpec {
        // FEATURES is laid out in FeatureType::ALL order
        let idx = FeatureType::ALL
            .iter()
            .position(|f| *f == feature)
            .unwrap_or_default();
        &FEATURES[idx]
    }

    /// Features a plan may use
    pub fn plan_features(&self, plan: Plan) -> &'static [FeatureType] {
        match plan {
            Plan::Free => FREE_FEATURES,
            Plan::Starter => STARTER_FEATURES,
            Plan::Basic => BASIC_FEATURES,
            Plan::Professional | Plan::Enterprise => &FeatureType::ALL,
        }
    }

    /// Plan to feature table
    pub fn eligibility_table(&self) -> BTreeMap<Plan, Vec<FeatureType>> {
        Plan::ALL
            .iter()
            .map(|plan| (*plan, self.plan_features(*plan).to_vec()))
            .collect()
    }

    /// Request limits of a plan
    pub fn plan_limits(&self, plan: Plan) -> PlanLimits {
        match plan {
            Plan::Free => PlanLimits::FREE,
            _ => PlanLimits::UNLIMITED,
        }
    }

    /// Cost and eligibility of a feature identifier
    ///
    /// Unknown identifiers cost [`UNKNOWN_FEATURE_COST`] and are usable on
    /// every plan, so an unrecognized billable action is never free.
    pub fn cost(&self, feature: &str) -> FeatureCost {
        match feature.parse::<FeatureType>() {
            Ok(known) => {
                let spec = self.spec(known);
                let plans = Plan::ALL
                    .iter()
                    .copied()
                    .filter(|plan| self.plan_features(*plan).contains(&known))
                    .collect();
                FeatureCost {
                    feature: feature.to_string(),
                    base_cost: spec.base_cost,
                    complexity: spec.complexity,
                    eligible_plans: Eligibility::Plans(plans),
                }
            }
            Err(_) => FeatureCost {
                feature: feature.to_string(),
                base_cost: UNKNOWN_FEATURE_COST,
                complexity: Complexity::Unknown,
                eligible_plans: Eligibility::Unrestricted,
            },
        }
    }

    pub fn is_available(&self, feature: &str, plan: Plan) -> bool {
        self.cost(feature).eligible_plans.allows(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_matches_feature_order() {
        let catalog = FeatureCatalog::new();
        for (spec, feature) in catalog.all_features().iter().zip(FeatureType::ALL) {
            assert_eq!(spec.feature, feature);
            assert_eq!(catalog.spec(feature).feature, feature);
        }
    }

    #[test]
    fn test_base_costs() {
        let catalog = FeatureCatalog::new();
        let expected = [
            ("code_generation_text", 1),
            ("code_generation_image", 2),
            ("code_generation_video", 5),
            ("code_generation_update", 1),
            ("video_to_scene_graph", 3),
            ("webpage_to_video", 8),
            ("images_to_video", 2),
            ("url_screenshot", 1),
            ("batch_processing", 1),
            ("api_access", 1),
        ];
        for (feature, cost) in expected {
            assert_eq!(catalog.cost(feature).base_cost, cost, "{feature}");
        }
    }

    #[test]
    fn test_unknown_feature_is_billable_everywhere() {
        let catalog = FeatureCatalog::new();
        let cost = catalog.cost("hologram_export");

        assert_eq!(cost.base_cost, 1);
        assert_eq!(cost.complexity, Complexity::Unknown);
        assert_eq!(cost.eligible_plans, Eligibility::Unrestricted);
        for plan in Plan::ALL {
            assert!(catalog.is_available("hologram_export", plan));
        }
    }

    #[test]
    fn test_plan_eligibility() {
        let catalog = FeatureCatalog::new();

        assert!(catalog.is_available("url_screenshot", Plan::Free));
        assert!(!catalog.is_available("code_generation_video", Plan::Free));
        assert!(!catalog.is_available("code_generation_video", Plan::Starter));
        assert!(catalog.is_available("code_generation_video", Plan::Basic));
        assert!(!catalog.is_available("webpage_to_video", Plan::Basic));
        assert!(catalog.is_available("webpage_to_video", Plan::Professional));
        assert!(catalog.is_available("api_access", Plan::Enterprise));
    }

    #[test]
    fn test_tiers_are_cumulative() {
        let catalog = FeatureCatalog::new();
        let table = catalog.eligibility_table();
        assert_eq!(table.len(), 5);

        for pair in Plan::ALL.windows(2) {
            let lower = &table[&pair[0]];
            let higher = &table[&pair[1]];
            assert!(lower.iter().all(|f| higher.contains(f)), "{:?}", pair);
        }
    }

    #[test]
    fn test_free_plan_limits() {
        let catalog = FeatureCatalog::new();
        let free = catalog.plan_limits(Plan::Free);
        assert_eq!(free.max_file_size_mb, Some(5));
        assert!(!free.priority_processing);
        assert!(catalog.plan_limits(Plan::Basic).priority_processing);
    }
}
