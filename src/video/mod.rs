pub mod sampler;

pub use sampler::{FrameSampler, FrameSource, SamplerConfig, StillFrameSource};
