//! Host sizing requirements and the merge rules applied to them.
//!
//! Sizing flows through three layers: the caller's request, the flavor's
//! defaults, and hard-coded fallbacks. [`complement_sizing`] merges a request
//! with a default layer (zero means "unset"); [`complement_host_definition`]
//! additionally applies the final fallbacks so the result is always usable.

use serde::{Deserialize, Serialize};

/// Sizing requirements for a host to be created.
///
/// Zero (or a negative GPU count) means "no requirement"; merge functions fill
/// such holes from defaults.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SizingRequirements {
    /// Minimum number of CPU cores
    pub min_cores: u32,
    /// Maximum number of CPU cores
    pub max_cores: u32,
    /// Minimum RAM, in GB
    pub min_ram_gb: f32,
    /// Maximum RAM, in GB
    pub max_ram_gb: f32,
    /// Minimum disk, in GB
    pub min_disk_gb: u32,
    /// Minimum number of GPUs; negative means "no GPU required"
    pub min_gpu: i32,
    /// Minimum CPU frequency, in GHz
    pub min_cpu_freq: f32,
    /// Image to boot the host from; empty means "use the resolved default"
    pub image: String,
}

impl Default for SizingRequirements {
    fn default() -> Self {
        Self {
            min_cores: 0,
            max_cores: 0,
            min_ram_gb: 0.0,
            max_ram_gb: 0.0,
            min_disk_gb: 0,
            min_gpu: -1,
            min_cpu_freq: 0.0,
            image: String::new(),
        }
    }
}

impl SizingRequirements {
    /// True if no requirement has been expressed at all
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Merge a request with a default layer: every unset field of `req` is filled
/// from `def`. A `None` request yields the defaults unchanged.
pub fn complement_sizing(
    req: Option<&SizingRequirements>,
    def: &SizingRequirements,
) -> SizingRequirements {
    let mut merged = match req {
        None => return def.clone(),
        Some(r) => r.clone(),
    };

    if def.min_cores > 0 && merged.min_cores == 0 {
        merged.min_cores = def.min_cores;
    }
    if def.max_cores > 0 && merged.max_cores == 0 {
        merged.max_cores = def.max_cores;
    }
    if def.min_ram_gb > 0.0 && merged.min_ram_gb == 0.0 {
        merged.min_ram_gb = def.min_ram_gb;
    }
    if def.max_ram_gb > 0.0 && merged.max_ram_gb == 0.0 {
        merged.max_ram_gb = def.max_ram_gb;
    }
    if def.min_disk_gb > 0 && merged.min_disk_gb == 0 {
        merged.min_disk_gb = def.min_disk_gb;
    }
    if merged.min_gpu <= 0 && def.min_gpu > 0 {
        merged.min_gpu = def.min_gpu;
    }
    if merged.min_cpu_freq == 0.0 && def.min_cpu_freq > 0.0 {
        merged.min_cpu_freq = def.min_cpu_freq;
    }
    if merged.image.is_empty() {
        merged.image = def.image.clone();
    }
    merged
}

/// Merge a request with persisted defaults, then apply hard fallbacks so every
/// field the provider needs ends up set.
pub fn complement_host_definition(
    req: &SizingRequirements,
    def: &SizingRequirements,
) -> SizingRequirements {
    let mut merged = complement_sizing(Some(req), def);

    if merged.min_cores == 0 {
        merged.min_cores = 2;
    }
    if merged.max_cores == 0 {
        merged.max_cores = 4;
    }
    if merged.min_ram_gb <= 0.0 {
        merged.min_ram_gb = 7.0;
    }
    if merged.max_ram_gb <= 0.0 {
        merged.max_ram_gb = 16.0;
    }
    if merged.min_disk_gb == 0 {
        merged.min_disk_gb = 50;
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flavor_default() -> SizingRequirements {
        SizingRequirements {
            min_cores: 4,
            max_cores: 8,
            min_ram_gb: 15.0,
            max_ram_gb: 32.0,
            min_disk_gb: 100,
            min_gpu: -1,
            ..Default::default()
        }
    }

    /// Story: the caller's explicit requirements always win over defaults
    #[test]
    fn story_request_fields_take_precedence() {
        let req = SizingRequirements {
            min_cores: 2,
            min_ram_gb: 7.0,
            ..Default::default()
        };
        let merged = complement_sizing(Some(&req), &flavor_default());
        assert_eq!(merged.min_cores, 2);
        assert_eq!(merged.min_ram_gb, 7.0);
        // Unset fields are filled from the flavor defaults.
        assert_eq!(merged.max_cores, 8);
        assert_eq!(merged.min_disk_gb, 100);
    }

    #[test]
    fn test_none_request_yields_defaults() {
        let merged = complement_sizing(None, &flavor_default());
        assert_eq!(merged, flavor_default());
    }

    /// Story: a node added with an empty request still gets a usable sizing
    #[test]
    fn story_hard_fallbacks_guarantee_usable_sizing() {
        let merged =
            complement_host_definition(&SizingRequirements::default(), &SizingRequirements::default());
        assert_eq!(merged.min_cores, 2);
        assert_eq!(merged.max_cores, 4);
        assert_eq!(merged.min_ram_gb, 7.0);
        assert_eq!(merged.max_ram_gb, 16.0);
        assert_eq!(merged.min_disk_gb, 50);
    }

    #[test]
    fn test_image_filled_from_default() {
        let def = SizingRequirements {
            image: "Ubuntu 18.04".to_string(),
            ..Default::default()
        };
        let merged = complement_sizing(Some(&SizingRequirements::default()), &def);
        assert_eq!(merged.image, "Ubuntu 18.04");
    }
}
