use serde::Deserialize;

/// Pixel format and auxiliary buffers wanted from the EGL surface.
///
/// Color channels must match exactly, depth and stencil are minimums.
/// `sample_count` is only handed to `eglChooseConfig` and takes no part
/// in [`select`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SurfaceConfigProfile {
    pub red_bits: i32,
    pub green_bits: i32,
    pub blue_bits: i32,
    pub alpha_bits: i32,
    pub depth_bits: i32,
    pub stencil_bits: i32,
    pub sample_count: i32,
}

impl Default for SurfaceConfigProfile {
    fn default() -> Self {
        Self {
            red_bits: 8,
            green_bits: 8,
            blue_bits: 8,
            alpha_bits: 8,
            depth_bits: 16,
            stencil_bits: 0,
            sample_count: 4,
        }
    }
}

impl SurfaceConfigProfile {
    pub fn with_samples(self, sample_count: i32) -> Self {
        Self {
            sample_count,
            ..self
        }
    }

    pub fn wants_multisample(&self) -> bool {
        self.sample_count > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigAttrib {
    Red,
    Green,
    Blue,
    Alpha,
    Depth,
    Stencil,
    Samples,
}

/// Reads one attribute of a candidate config. `None` means the query failed.
pub trait AttribQuery<C> {
    fn attrib(&self, config: &C, attrib: ConfigAttrib) -> Option<i32>;
}

/// Attribute values of a candidate, already read out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigAttribs {
    pub red: i32,
    pub green: i32,
    pub blue: i32,
    pub alpha: i32,
    pub depth: i32,
    pub stencil: i32,
    pub samples: i32,
}

impl ConfigAttribs {
    /// Snapshot every attribute of `config`, failed queries read as 0.
    pub fn read<C, Q: AttribQuery<C> + ?Sized>(query: &Q, config: &C) -> Self {
        let get = |attrib| query.attrib(config, attrib).unwrap_or(0);
        Self {
            red: get(ConfigAttrib::Red),
            green: get(ConfigAttrib::Green),
            blue: get(ConfigAttrib::Blue),
            alpha: get(ConfigAttrib::Alpha),
            depth: get(ConfigAttrib::Depth),
            stencil: get(ConfigAttrib::Stencil),
            samples: get(ConfigAttrib::Samples),
        }
    }
}

/// Return the first candidate, in input order, that satisfies `desired`.
///
/// Depth and stencil are compared as minimums before the color channels are
/// compared for equality. Attributes whose query fails count as 0.
pub fn select<'a, C, Q>(
    candidates: &'a [C],
    desired: &SurfaceConfigProfile,
    query: &Q,
) -> Option<&'a C>
where
    Q: AttribQuery<C> + ?Sized,
{
    let get = |config: &C, attrib| query.attrib(config, attrib).unwrap_or(0);

    candidates.iter().find(|&config| {
        let depth = get(config, ConfigAttrib::Depth);
        let stencil = get(config, ConfigAttrib::Stencil);
        if depth < desired.depth_bits || stencil < desired.stencil_bits {
            return false;
        }

        get(config, ConfigAttrib::Red) == desired.red_bits
            && get(config, ConfigAttrib::Green) == desired.green_bits
            && get(config, ConfigAttrib::Blue) == desired.blue_bits
            && get(config, ConfigAttrib::Alpha) == desired.alpha_bits
    })
}
