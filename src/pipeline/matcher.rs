use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::face::{DetectedFace, DistanceMetric, FaceAnalyzer, FaceRegion};
use crate::pipeline::registry::{Identity, IdentityRegistry, SharedRegistry};

/// How a signature picks among identities within tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchPolicy {
    /// First identity in registry order under the tolerance wins, even if a
    /// later one is closer.
    #[default]
    First,
    /// Lowest distance under the tolerance wins; ties go to registry order.
    Nearest,
}

impl std::str::FromStr for MatchPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "first" => Ok(MatchPolicy::First),
            "nearest" => Ok(MatchPolicy::Nearest),
            other => Err(format!("unknown match policy {:?}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Label {
    Known(Arc<Identity>),
    Unknown,
}

impl Label {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Label::Known(identity) => Some(identity),
            Label::Unknown => None,
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Known(identity) => write!(f, "{} ({})", identity.display_name, identity.id),
            Label::Unknown => f.write_str("unknown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub region: FaceRegion,
    pub label: Label,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatcherConfig {
    /// Distances strictly below this are a match.
    pub tolerance: f32,
    pub metric: DistanceMetric,
    pub policy: MatchPolicy,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self { tolerance: 0.55, metric: DistanceMetric::Cosine, policy: MatchPolicy::First }
    }
}

pub struct FaceMatcher {
    analyzer: Arc<dyn FaceAnalyzer>,
    registry: Arc<SharedRegistry>,
    config: MatcherConfig,
}

impl FaceMatcher {
    pub fn new(analyzer: Arc<dyn FaceAnalyzer>, registry: Arc<SharedRegistry>, config: MatcherConfig) -> Self {
        Self { analyzer, registry, config }
    }

    /// Detect, sign and label every face in `frame`, in detection order.
    pub fn match_frame(&self, frame: &RgbImage) -> PipelineResult<Vec<MatchResult>> {
        let faces = self.analyzer.analyze(frame).map_err(PipelineError::Inference)?;
        if faces.is_empty() {
            return Ok(Vec::new());
        }
        let registry = self.registry.snapshot();
        Ok(self.label_faces(&registry, faces))
    }

    pub fn label_faces(&self, registry: &IdentityRegistry, faces: Vec<DetectedFace>) -> Vec<MatchResult> {
        faces
            .into_iter()
            .map(|face| {
                let label = match self.find_identity(registry, &face.signature) {
                    Some(identity) => Label::Known(identity),
                    None => Label::Unknown,
                };
                MatchResult { region: face.region, label }
            })
            .collect()
    }

    pub fn find_identity(&self, registry: &IdentityRegistry, signature: &[f32]) -> Option<Arc<Identity>> {
        let MatcherConfig { tolerance, metric, policy } = self.config;
        let mut candidates = registry
            .identities()
            .iter()
            .map(|identity| (identity, metric.distance(signature, &identity.signature)))
            .filter(|(_, d)| *d < tolerance);
        let chosen = match policy {
            MatchPolicy::First => candidates.next(),
            MatchPolicy::Nearest => candidates.fold(None, |best: Option<(&Arc<Identity>, f32)>, (identity, d)| match best {
                Some((_, bd)) if bd <= d => best,
                _ => Some((identity, d)),
            }),
        };
        chosen.map(|(identity, _)| identity.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoFaces;

    impl FaceAnalyzer for NoFaces {
        fn analyze(&self, _image: &RgbImage) -> anyhow::Result<Vec<DetectedFace>> {
            Ok(vec![])
        }
    }

    fn identity(id: &str, signature: Vec<f32>) -> Identity {
        Identity { id: id.to_string(), display_name: id.to_lowercase(), signature }
    }

    fn matcher(policy: MatchPolicy, registry: IdentityRegistry) -> FaceMatcher {
        let cfg = MatcherConfig { tolerance: 0.5, metric: DistanceMetric::Euclidean, policy };
        FaceMatcher::new(Arc::new(NoFaces), Arc::new(SharedRegistry::new(registry)), cfg)
    }

    fn registry() -> IdentityRegistry {
        // A is 0.4 away from the probe, B only 0.1; both within tolerance
        IdentityRegistry::from_identities(vec![
            identity("A", vec![0.4, 0.0]),
            identity("B", vec![0.1, 0.0]),
            identity("C", vec![5.0, 5.0]),
        ])
    }

    #[test]
    fn first_policy_takes_registry_order() {
        let m = matcher(MatchPolicy::First, IdentityRegistry::empty());
        let found = m.find_identity(&registry(), &[0.0, 0.0]).unwrap();
        assert_eq!(found.id, "A");
    }

    #[test]
    fn nearest_policy_takes_lowest_distance() {
        let m = matcher(MatchPolicy::Nearest, IdentityRegistry::empty());
        let found = m.find_identity(&registry(), &[0.0, 0.0]).unwrap();
        assert_eq!(found.id, "B");
    }

    #[test]
    fn tolerance_is_strict() {
        let m = matcher(MatchPolicy::First, IdentityRegistry::empty());
        let reg = IdentityRegistry::from_identities(vec![identity("A", vec![0.5, 0.0])]);
        assert!(m.find_identity(&reg, &[0.0, 0.0]).is_none());
    }

    #[test]
    fn zero_faces_yield_empty_results() {
        let m = matcher(MatchPolicy::First, registry());
        assert!(m.match_frame(&RgbImage::new(4, 4)).unwrap().is_empty());
    }

    #[test]
    fn label_display_forms() {
        let known = Label::Known(Arc::new(Identity { id: "S001".into(), display_name: "Alice".into(), signature: vec![] }));
        assert_eq!(known.to_string(), "Alice (S001)");
        assert_eq!(Label::Unknown.to_string(), "unknown");
    }

    #[test]
    fn policy_parses_case_insensitively() {
        assert_eq!("Nearest".parse::<MatchPolicy>().unwrap(), MatchPolicy::Nearest);
        assert_eq!("first".parse::<MatchPolicy>().unwrap(), MatchPolicy::First);
        assert!("best".parse::<MatchPolicy>().is_err());
    }
}
