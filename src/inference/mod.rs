//! Feature extraction, classification and the inference service.

mod backbone;
mod head;
mod prediction;
mod service;

pub use backbone::{BackboneLoader, FeatureExtractor, OnnxBackbone, OnnxBackboneLoader};
pub use head::{ClassifierHead, HeadOrigin, HeadSpec, WeightSnapshot};
pub use prediction::{ClassPrediction, ClassScore};
pub use service::{InferenceService, LoadHandle, ModelState};
